//! Per-guild configuration rows.
//!
//! Three families: `guild_settings` (economy tuning), `engagement_config`
//! and `moderation_config`, plus the ordered XP-threshold → role list.
//! Rows are created lazily with defaults on first read. The update paths
//! iterate whitelisted submitted fields; identifiers come from the fixed
//! allow-lists below and values are always bound parameters.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use guildmint_core::time::fmt_ts;
use guildmint_core::MintError;

use crate::schema::is_allowed_identifier;

// ── Guild settings (economy tuning) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GuildSettings {
    pub guild_id: String,
    pub minigame_enabled: bool,
    pub minigame_channel_id: Option<String>,
    pub xp_trading_enabled: bool,
    pub trade_tax_percent: f64,
    pub duel_tax_percent: f64,
    pub daily_xp_transfer_cap_percent: f64,
    pub daily_xp_transfer_cap_max: f64,
    pub capture_cooldown_seconds: i64,
    pub duel_cooldown_seconds: i64,
}

impl GuildSettings {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(GuildSettings {
            guild_id: row.get("guildId")?,
            minigame_enabled: row.get::<_, i64>("minigame_enabled")? != 0,
            minigame_channel_id: row.get("minigame_channel_id")?,
            xp_trading_enabled: row.get::<_, i64>("xp_trading_enabled")? != 0,
            trade_tax_percent: row.get("trade_tax_percent")?,
            duel_tax_percent: row.get("duel_tax_percent")?,
            daily_xp_transfer_cap_percent: row.get("daily_xp_transfer_cap_percent")?,
            daily_xp_transfer_cap_max: row.get("daily_xp_transfer_cap_max")?,
            capture_cooldown_seconds: row.get("capture_cooldown_seconds")?,
            duel_cooldown_seconds: row.get("duel_cooldown_seconds")?,
        })
    }
}

/// Get the settings row for `guild`, inserting defaults when absent.
pub fn get_guild_settings(conn: &Connection, guild: &str) -> Result<GuildSettings, MintError> {
    let existing = conn
        .query_row(
            "SELECT * FROM guild_settings WHERE guildId = ?1",
            [guild],
            GuildSettings::from_row,
        )
        .optional()?;
    if let Some(settings) = existing {
        return Ok(settings);
    }
    conn.execute("INSERT INTO guild_settings (guildId) VALUES (?1)", [guild])?;
    conn.query_row(
        "SELECT * FROM guild_settings WHERE guildId = ?1",
        [guild],
        GuildSettings::from_row,
    )
    .map_err(MintError::from)
}

/// Fields the minigame-settings endpoint may update.
pub const MINIGAME_SETTINGS_FIELDS: &[&str] = &[
    "minigame_enabled",
    "minigame_channel_id",
    "xp_trading_enabled",
    "trade_tax_percent",
    "duel_tax_percent",
    "daily_xp_transfer_cap_percent",
    "daily_xp_transfer_cap_max",
    "capture_cooldown_seconds",
    "duel_cooldown_seconds",
];

/// Fields the engagement section of the config endpoint may update.
pub const ENGAGEMENT_CONFIG_FIELDS: &[&str] = &[
    "xp_per_message",
    "welcome_bonus_xp",
    "welcome_detection_enabled",
    "announcements_channel_id",
    "ambassador_role_id",
    "new_member_role_id",
    "new_member_role_duration_days",
    "welcome_dm_enabled",
    "welcome_dm_text",
    "welcome_public_text",
];

/// Fields the moderation section of the config endpoint may update.
pub const MODERATION_CONFIG_FIELDS: &[&str] = &[
    "log_channel_id",
    "appeal_channel_id",
    "ai_enabled",
    "ai_confidence_threshold",
    "ai_flag_channel_id",
    "ai_model",
    "ollama_host",
    "decay_multiplier",
    "warn_1_decay_days",
    "warn_2_decay_days",
    "warn_3_decay_days",
    "mute_duration_warn_2",
    "mute_duration_warn_3",
    "rules_message_id",
];

/// Apply whitelisted `fields` to the guild-settings row. Unknown keys are
/// silently dropped. Returns how many columns were written.
pub fn update_guild_settings(
    conn: &Connection,
    guild: &str,
    fields: &serde_json::Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<usize, MintError> {
    get_guild_settings(conn, guild)?;
    apply_whitelisted_update(
        conn,
        "guild_settings",
        "guildId",
        guild,
        MINIGAME_SETTINGS_FIELDS,
        fields,
        Some(("updated_at", fmt_ts(now))),
    )
}

/// Apply whitelisted `fields` to the engagement-config row.
pub fn update_engagement_config(
    conn: &Connection,
    guild: &str,
    fields: &serde_json::Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<usize, MintError> {
    conn.execute(
        "INSERT OR IGNORE INTO engagement_config (guild_id, created_at) VALUES (?1, ?2)",
        rusqlite::params![guild, fmt_ts(now)],
    )?;
    apply_whitelisted_update(
        conn,
        "engagement_config",
        "guild_id",
        guild,
        ENGAGEMENT_CONFIG_FIELDS,
        fields,
        None,
    )
}

/// Apply whitelisted `fields` to the moderation-config row.
pub fn update_moderation_config(
    conn: &Connection,
    guild: &str,
    fields: &serde_json::Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<usize, MintError> {
    conn.execute(
        "INSERT OR IGNORE INTO moderation_config (guild_id, created_at) VALUES (?1, ?2)",
        rusqlite::params![guild, fmt_ts(now)],
    )?;
    apply_whitelisted_update(
        conn,
        "moderation_config",
        "guild_id",
        guild,
        MODERATION_CONFIG_FIELDS,
        fields,
        None,
    )
}

/// Build and run `UPDATE {table} SET f1 = ?, ... WHERE {key_col} = ?` over
/// the intersection of `fields` with `allowed`. Every interpolated
/// identifier must also pass the schema allow-list.
fn apply_whitelisted_update(
    conn: &Connection,
    table: &str,
    key_col: &str,
    key: &str,
    allowed: &[&str],
    fields: &serde_json::Map<String, Value>,
    extra: Option<(&str, String)>,
) -> Result<usize, MintError> {
    let mut set_clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    for (key, value) in fields {
        if !allowed.contains(&key.as_str()) || !is_allowed_identifier(key) {
            continue;
        }
        set_clauses.push(format!("{key} = ?{}", params.len() + 1));
        params.push(json_to_sql(value));
    }
    if set_clauses.is_empty() {
        return Ok(0);
    }
    if let Some((col, value)) = extra {
        set_clauses.push(format!("{col} = ?{}", params.len() + 1));
        params.push(Box::new(value));
    }

    if !is_allowed_identifier(table) || !is_allowed_identifier(key_col) {
        return Err(MintError::Storage(format!("unsafe identifier in update on {table}")));
    }

    let sql = format!(
        "UPDATE {table} SET {} WHERE {key_col} = ?{}",
        set_clauses.join(", "),
        params.len() + 1
    );
    params.push(Box::new(key.to_string()));

    let written = set_clauses.len();
    conn.execute(
        &sql,
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
    )?;
    Ok(written)
}

fn json_to_sql(value: &Value) -> Box<dyn rusqlite::ToSql> {
    match value {
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
    }
}

// ── Engagement / moderation reads ────────────────────────────────────────────

/// Engagement configuration as a JSON object (column → value), for the API.
pub fn get_engagement_config(conn: &Connection, guild: &str) -> Result<Value, MintError> {
    row_as_json(conn, "SELECT * FROM engagement_config WHERE guild_id = ?1", guild)
}

/// Moderation configuration as a JSON object (column → value), for the API.
pub fn get_moderation_config(conn: &Connection, guild: &str) -> Result<Value, MintError> {
    row_as_json(conn, "SELECT * FROM moderation_config WHERE guild_id = ?1", guild)
}

fn row_as_json(conn: &Connection, sql: &str, guild: &str) -> Result<Value, MintError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let row = stmt
        .query_row([guild], |row| {
            let mut map = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                let v = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(n) => Value::from(n),
                    rusqlite::types::ValueRef::Real(f) => Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::from(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Value::Null,
                };
                map.insert(name.clone(), v);
            }
            Ok(Value::Object(map))
        })
        .optional()?;
    Ok(row.unwrap_or(Value::Null))
}

// ── Typed moderation thresholds ──────────────────────────────────────────────

/// The decay/mute numbers the moderation engine needs, with defaults when
/// no config row exists.
#[derive(Debug, Clone, Copy)]
pub struct ModerationThresholds {
    pub warn_1_decay_days: i64,
    pub warn_2_decay_days: i64,
    pub warn_3_decay_days: i64,
    pub mute_duration_warn_2: i64,
    pub mute_duration_warn_3: i64,
}

impl Default for ModerationThresholds {
    fn default() -> Self {
        use guildmint_core::constants::*;
        ModerationThresholds {
            warn_1_decay_days: WARN_1_DECAY_DAYS,
            warn_2_decay_days: WARN_2_DECAY_DAYS,
            warn_3_decay_days: WARN_3_DECAY_DAYS,
            mute_duration_warn_2: MUTE_DURATION_WARN_2_SECS,
            mute_duration_warn_3: MUTE_DURATION_WARN_3_SECS,
        }
    }
}

pub fn get_moderation_thresholds(
    conn: &Connection,
    guild: &str,
) -> Result<ModerationThresholds, MintError> {
    let row = conn
        .query_row(
            "SELECT warn_1_decay_days, warn_2_decay_days, warn_3_decay_days,
                    mute_duration_warn_2, mute_duration_warn_3
             FROM moderation_config WHERE guild_id = ?1",
            [guild],
            |row| {
                Ok(ModerationThresholds {
                    warn_1_decay_days: row.get(0)?,
                    warn_2_decay_days: row.get(1)?,
                    warn_3_decay_days: row.get(2)?,
                    mute_duration_warn_2: row.get(3)?,
                    mute_duration_warn_3: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

// ── XP thresholds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct XpThreshold {
    pub threshold_points: i64,
    pub role_id: String,
    pub role_name: String,
}

/// Threshold list for a guild, ordered by threshold ascending.
pub fn get_xp_thresholds(conn: &Connection, guild: &str) -> Result<Vec<XpThreshold>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT threshold_points, role_id, role_name FROM xp_thresholds
         WHERE guild_id = ?1 ORDER BY threshold_points ASC",
    )?;
    let rows = stmt
        .query_map([guild], |row| {
            Ok(XpThreshold {
                threshold_points: row.get(0)?,
                role_id: row.get(1)?,
                role_name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replace the whole threshold list (the POST semantics).
pub fn replace_xp_thresholds(
    conn: &Connection,
    guild: &str,
    thresholds: &[XpThreshold],
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    conn.execute("DELETE FROM xp_thresholds WHERE guild_id = ?1", [guild])?;
    let mut stmt = conn.prepare(
        "INSERT INTO xp_thresholds (guild_id, threshold_points, role_id, role_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for t in thresholds {
        stmt.execute(rusqlite::params![
            guild,
            t.threshold_points,
            t.role_id,
            t.role_name,
            fmt_ts(now)
        ])?;
    }
    Ok(())
}

// ── Quest exception channels ─────────────────────────────────────────────────

pub fn add_quest_exception_channel(
    conn: &Connection,
    guild: &str,
    channel: &str,
) -> Result<bool, MintError> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO quest_exception_channels (guildId, channelId) VALUES (?1, ?2)",
        [guild, channel],
    )?;
    Ok(n > 0)
}

pub fn remove_quest_exception_channel(
    conn: &Connection,
    guild: &str,
    channel: &str,
) -> Result<bool, MintError> {
    let n = conn.execute(
        "DELETE FROM quest_exception_channels WHERE guildId = ?1 AND channelId = ?2",
        [guild, channel],
    )?;
    Ok(n > 0)
}

pub fn get_quest_exception_channels(
    conn: &Connection,
    guild: &str,
) -> Result<Vec<String>, MintError> {
    let mut stmt =
        conn.prepare("SELECT channelId FROM quest_exception_channels WHERE guildId = ?1")?;
    let rows = stmt
        .query_map([guild], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::migrate_in_memory;
    use crate::Store;
    use chrono::TimeZone;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        migrate_in_memory(&store).unwrap();
        store
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn default_settings_created_lazily() {
        let store = fresh();
        store
            .with_conn(|c| {
                let s = get_guild_settings(c, "g1")?;
                assert_eq!(s.trade_tax_percent, 10.0);
                assert_eq!(s.daily_xp_transfer_cap_max, 500.0);
                assert_eq!(s.capture_cooldown_seconds, 60);
                assert!(s.xp_trading_enabled);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn whitelisted_update_applies_known_and_drops_unknown() {
        let store = fresh();
        store
            .with_conn(|c| {
                let fields: serde_json::Map<String, Value> = serde_json::from_str(
                    r#"{"trade_tax_percent": 5.0, "nonsense": 1, "guildId": "evil"}"#,
                )
                .unwrap();
                let written = update_guild_settings(c, "g1", &fields, now())?;
                assert_eq!(written, 1);
                let s = get_guild_settings(c, "g1")?;
                assert_eq!(s.trade_tax_percent, 5.0);
                assert_eq!(s.guild_id, "g1");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn xp_thresholds_replace_whole_list() {
        let store = fresh();
        store
            .with_conn(|c| {
                let first = vec![XpThreshold {
                    threshold_points: 100,
                    role_id: "r1".into(),
                    role_name: "Bronze".into(),
                }];
                replace_xp_thresholds(c, "g1", &first, now())?;
                let second = vec![
                    XpThreshold {
                        threshold_points: 500,
                        role_id: "r2".into(),
                        role_name: "Silver".into(),
                    },
                    XpThreshold {
                        threshold_points: 200,
                        role_id: "r3".into(),
                        role_name: "Iron".into(),
                    },
                ];
                replace_xp_thresholds(c, "g1", &second, now())?;
                let list = get_xp_thresholds(c, "g1")?;
                assert_eq!(list.len(), 2);
                // Ordered ascending regardless of insertion order.
                assert_eq!(list[0].threshold_points, 200);
                assert_eq!(list[1].threshold_points, 500);
                Ok(())
            })
            .unwrap();
    }
}
