//! Endpoint handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

use guildmint_core::constants::LEADERBOARD_MAX_LIMIT;
use guildmint_core::time::{fmt_ts, utc_date_str};
use guildmint_core::MintError;
use guildmint_store::analytics;
use guildmint_store::schema::is_allowed_identifier;
use guildmint_store::settings::{self, XpThreshold};

use crate::{ApiError, ApiResult, ApiState};

// ── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": fmt_ts(Utc::now()),
    }))
}

// ── Stats ────────────────────────────────────────────────────────────────────

pub async fn guild_stats(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let period = params.get("period").map(String::as_str).unwrap_or("7d");
    let days = match period {
        "7d" => 7,
        "30d" => 30,
        "all" => 365 * 10,
        other => {
            return Err(MintError::InvalidInput(format!("unknown period {other:?}")).into())
        }
    };
    let now = Utc::now();
    let since = utc_date_str(now - Duration::days(days));

    let body = state.store.with_conn(|conn| {
        let totals = analytics::guild_totals(conn, &guild_id)?;
        let growth = analytics::growth_series(conn, &guild_id, &since)?;
        let top_members = top_members(conn, &guild_id, 10)?;
        let channel_activity = analytics::channel_activity(conn, &guild_id, &since)?;
        let top_channels = analytics::top_channels(conn, &guild_id, &since, 10)?;
        let hourly = analytics::hourly_histogram(conn, &guild_id)?;

        Ok(json!({
            "guild_id": guild_id,
            "period": period,
            "totals": totals,
            "growth": growth,
            "top_members": top_members,
            "channel_activity": channel_activity,
            "top_channels": top_channels,
            "hourly_activity": hourly.to_vec(),
        }))
    })?;
    Ok(Json(body))
}

fn top_members(
    conn: &rusqlite::Connection,
    guild: &str,
    limit: i64,
) -> Result<Vec<Value>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT userId, xp, level, messages FROM users
         WHERE guildId = ?1 ORDER BY xp DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![guild, limit], |row| {
            Ok(json!({
                "user_id": row.get::<_, String>(0)?,
                "xp": row.get::<_, f64>(1)?,
                "level": row.get::<_, i64>(2)?,
                "messages": row.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Leaderboard ──────────────────────────────────────────────────────────────

pub async fn leaderboard(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<i64>().ok())
        .unwrap_or(10)
        .clamp(1, LEADERBOARD_MAX_LIMIT);

    let body = state.store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT userId, xp, level, messages, coins FROM users
             WHERE guildId = ?1 ORDER BY xp DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![guild_id, limit], |row| {
                Ok(json!({
                    "user_id": row.get::<_, String>(0)?,
                    "xp": row.get::<_, f64>(1)?,
                    "level": row.get::<_, i64>(2)?,
                    "messages": row.get::<_, i64>(3)?,
                    "coins": row.get::<_, f64>(4)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "guild_id": guild_id, "leaderboard": rows }))
    })?;
    Ok(Json(body))
}

// ── Configuration ────────────────────────────────────────────────────────────

pub async fn get_config(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let body = state.store.with_conn(|conn| {
        Ok(json!({
            "engagement": settings::get_engagement_config(conn, &guild_id)?,
            "moderation": settings::get_moderation_config(conn, &guild_id)?,
            "xp_thresholds": settings::get_xp_thresholds(conn, &guild_id)?,
        }))
    })?;
    Ok(Json(body))
}

pub async fn update_config(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let Some(payload) = payload.as_object() else {
        return Err(MintError::InvalidInput("expected a JSON object".into()).into());
    };
    let now = Utc::now();

    state.store.with_tx(|tx| {
        if let Some(engagement) = payload.get("engagement").and_then(Value::as_object) {
            settings::update_engagement_config(tx, &guild_id, engagement, now)?;
        }
        if let Some(moderation) = payload.get("moderation").and_then(Value::as_object) {
            settings::update_moderation_config(tx, &guild_id, moderation, now)?;
        }
        if let Some(thresholds) = payload.get("xp_thresholds").and_then(Value::as_array) {
            let parsed: Vec<XpThreshold> = thresholds
                .iter()
                .filter_map(|t| {
                    let threshold_points = t.get("threshold_points")?.as_i64()?;
                    let role_id = t.get("role_id")?.as_str()?.to_string();
                    let role_name = t
                        .get("role_name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    Some(XpThreshold {
                        threshold_points,
                        role_id,
                        role_name,
                    })
                })
                .collect();
            settings::replace_xp_thresholds(tx, &guild_id, &parsed, now)?;
        }
        Ok(())
    })?;

    Ok(Json(json!({ "success": true, "message": "Configuration updated" })))
}

// ── Challenges (quest templates) ─────────────────────────────────────────────

const CHALLENGE_FIELDS: &[&str] = &[
    "name",
    "description",
    "type",
    "target_type",
    "target_value",
    "reward_coins",
    "reward_xp",
    "allow_other_channels",
    "rarity",
    "metadata",
    "active",
];

pub async fn list_challenges(
    State(state): State<Arc<ApiState>>,
    Path(_guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let body = state.store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, description, type, target_type, target_value,
                    reward_coins, reward_xp, allow_other_channels, rarity, metadata, active
             FROM quests ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "description": row.get::<_, String>(2)?,
                    "type": row.get::<_, String>(3)?,
                    "target_type": row.get::<_, String>(4)?,
                    "target_value": row.get::<_, i64>(5)?,
                    "reward_coins": row.get::<_, i64>(6)?,
                    "reward_xp": row.get::<_, i64>(7)?,
                    "allow_other_channels": row.get::<_, i64>(8)? != 0,
                    "rarity": row.get::<_, String>(9)?,
                    "metadata": row.get::<_, String>(10)?,
                    "active": row.get::<_, i64>(11)? != 0,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "challenges": rows }))
    })?;
    Ok(Json(body))
}

pub async fn create_challenge(
    State(state): State<Arc<ApiState>>,
    Path(_guild_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let name = require_str(&payload, "name")?;
    let description = require_str(&payload, "description")?;
    let quest_type = require_str(&payload, "type")?;
    if !["daily", "random", "event"].contains(&quest_type.as_str()) {
        return Err(MintError::InvalidInput(format!("unknown quest type {quest_type:?}")).into());
    }
    let target_type = require_str(&payload, "target_type")?;
    let target_value = payload
        .get("target_value")
        .and_then(Value::as_i64)
        .filter(|v| *v >= 1)
        .ok_or_else(|| MintError::InvalidInput("target_value must be >= 1".into()))?;

    let reward_coins = payload.get("reward_coins").and_then(Value::as_i64).unwrap_or(0);
    let reward_xp = payload.get("reward_xp").and_then(Value::as_i64).unwrap_or(0);
    let rarity = payload
        .get("rarity")
        .and_then(Value::as_str)
        .unwrap_or("common")
        .to_string();
    let metadata = payload
        .get("metadata")
        .map(|m| m.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let id = state.store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO quests (name, description, type, target_type, target_value,
                                 reward_coins, reward_xp, rarity, metadata, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
            rusqlite::params![
                name,
                description,
                quest_type,
                target_type,
                target_value,
                reward_coins,
                reward_xp,
                rarity,
                metadata
            ],
        )?;
        Ok(tx.last_insert_rowid())
    })?;

    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn update_challenge(
    State(state): State<Arc<ApiState>>,
    Path((_guild_id, challenge_id)): Path<(String, i64)>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let Some(fields) = payload.as_object() else {
        return Err(MintError::InvalidInput("expected a JSON object".into()).into());
    };

    let updated = state.store.with_tx(|tx| {
        let exists: Option<i64> = tx
            .query_row("SELECT id FROM quests WHERE id = ?1", [challenge_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(MintError::QuestNotFound(challenge_id));
        }
        whitelisted_update(tx, "quests", "id", challenge_id, CHALLENGE_FIELDS, fields)
    })?;

    Ok(Json(json!({ "success": true, "updated_fields": updated })))
}

pub async fn delete_challenge(
    State(state): State<Arc<ApiState>>,
    Path((_guild_id, challenge_id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    state.store.with_tx(|tx| {
        let n = tx.execute("DELETE FROM quests WHERE id = ?1", [challenge_id])?;
        if n == 0 {
            return Err(MintError::QuestNotFound(challenge_id));
        }
        Ok(())
    })?;
    Ok(Json(json!({ "success": true })))
}

// ── Streamers ────────────────────────────────────────────────────────────────

pub async fn list_streamers(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let body = state.store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, streamer_name, announce_channel_id, announced
             FROM streamers WHERE guild_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([&guild_id], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "streamer_name": row.get::<_, String>(1)?,
                    "announce_channel_id": row.get::<_, String>(2)?,
                    "announced": row.get::<_, i64>(3)? != 0,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "streamers": rows }))
    })?;
    Ok(Json(body))
}

pub async fn add_streamer(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let name = require_str(&payload, "streamer_name")?;
    let channel = require_str(&payload, "announce_channel_id")?;

    let id = state.store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO streamers (guild_id, streamer_name, announce_channel_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![guild_id, name, channel, fmt_ts(Utc::now())],
        )?;
        Ok(tx.last_insert_rowid())
    })?;
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn delete_streamer(
    State(state): State<Arc<ApiState>>,
    Path((guild_id, streamer_id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    state.store.with_tx(|tx| {
        let n = tx.execute(
            "DELETE FROM streamers WHERE id = ?1 AND guild_id = ?2",
            rusqlite::params![streamer_id, guild_id],
        )?;
        if n == 0 {
            return Err(MintError::NotFound(format!("streamer {streamer_id}")));
        }
        Ok(())
    })?;
    Ok(Json(json!({ "success": true })))
}

// ── Video channels ───────────────────────────────────────────────────────────

const YOUTUBE_FIELDS: &[&str] = &["channel_handle", "announce_channel_id", "last_video_id"];

pub async fn list_youtube(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let body = state.store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, channel_handle, announce_channel_id, last_video_id
             FROM youtube_channels WHERE guild_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([&guild_id], |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "channel_handle": row.get::<_, String>(1)?,
                    "announce_channel_id": row.get::<_, String>(2)?,
                    "last_video_id": row.get::<_, Option<String>>(3)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "youtube_channels": rows }))
    })?;
    Ok(Json(body))
}

pub async fn add_youtube(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let handle = require_str(&payload, "channel_handle")?;
    let channel = require_str(&payload, "announce_channel_id")?;

    let id = state.store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO youtube_channels (guild_id, channel_handle, announce_channel_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![guild_id, handle, channel, fmt_ts(Utc::now())],
        )?;
        Ok(tx.last_insert_rowid())
    })?;
    Ok(Json(json!({ "success": true, "id": id })))
}

pub async fn update_youtube(
    State(state): State<Arc<ApiState>>,
    Path((guild_id, channel_id)): Path<(String, i64)>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let Some(fields) = payload.as_object() else {
        return Err(MintError::InvalidInput("expected a JSON object".into()).into());
    };

    let updated = state.store.with_tx(|tx| {
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM youtube_channels WHERE id = ?1 AND guild_id = ?2",
                rusqlite::params![channel_id, guild_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(MintError::NotFound(format!("youtube channel {channel_id}")));
        }
        whitelisted_update(tx, "youtube_channels", "id", channel_id, YOUTUBE_FIELDS, fields)
    })?;
    Ok(Json(json!({ "success": true, "updated_fields": updated })))
}

pub async fn delete_youtube(
    State(state): State<Arc<ApiState>>,
    Path((guild_id, channel_id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    state.store.with_tx(|tx| {
        let n = tx.execute(
            "DELETE FROM youtube_channels WHERE id = ?1 AND guild_id = ?2",
            rusqlite::params![channel_id, guild_id],
        )?;
        if n == 0 {
            return Err(MintError::NotFound(format!("youtube channel {channel_id}")));
        }
        Ok(())
    })?;
    Ok(Json(json!({ "success": true })))
}

// ── Minigame settings ────────────────────────────────────────────────────────

pub async fn get_minigame_settings(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let settings = state
        .store
        .with_tx(|tx| settings::get_guild_settings(tx, &guild_id))?;
    Ok(Json(serde_json::to_value(settings).map_err(MintError::from)?))
}

pub async fn update_minigame_settings(
    State(state): State<Arc<ApiState>>,
    Path(guild_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let Some(fields) = payload.as_object() else {
        return Err(MintError::InvalidInput("expected a JSON object".into()).into());
    };

    let written = state
        .store
        .with_tx(|tx| settings::update_guild_settings(tx, &guild_id, fields, Utc::now()))?;
    if written == 0 {
        return Err(MintError::InvalidInput("no valid fields to update".into()).into());
    }
    Ok(Json(json!({ "success": true, "message": "Minigame settings updated" })))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn require_str(payload: &Value, key: &str) -> Result<String, ApiError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| MintError::InvalidInput(format!("missing field {key:?}")).into())
}

/// Parameterized single-row update over the intersection of the submitted
/// fields with `allowed`; identifiers must also pass the schema allow-list.
fn whitelisted_update(
    conn: &rusqlite::Connection,
    table: &str,
    key_col: &str,
    key: i64,
    allowed: &[&str],
    fields: &serde_json::Map<String, Value>,
) -> Result<usize, MintError> {
    if !is_allowed_identifier(table) || !is_allowed_identifier(key_col) {
        return Err(MintError::Storage(format!("unsafe identifier in update on {table}")));
    }

    let mut set_clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for (field, value) in fields {
        if !allowed.contains(&field.as_str()) || !is_allowed_identifier(field) {
            continue;
        }
        set_clauses.push(format!("{field} = ?{}", params.len() + 1));
        params.push(match value {
            Value::Null => Box::new(None::<String>),
            Value::Bool(b) => Box::new(if *b { 1i64 } else { 0i64 }),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Box::new(i)
                } else {
                    Box::new(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Box::new(s.clone()),
            other => Box::new(other.to_string()),
        });
    }
    if set_clauses.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {table} SET {} WHERE {key_col} = ?{}",
        set_clauses.join(", "),
        params.len() + 1
    );
    params.push(Box::new(key));
    let written = set_clauses.len();
    conn.execute(
        &sql,
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
    )?;
    Ok(written)
}
