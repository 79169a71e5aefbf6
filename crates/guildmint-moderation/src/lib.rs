//! guildmint-moderation — warn counters, automatic mutes, decay and
//! appeals.
//!
//! Every state change appends to the `warning_history` event stream.
//! Warn counts 2 and 3 trigger automatic mutes with guild-configurable
//! durations; counts decay on a schedule that lengthens with the count
//! (4+ uses the fallback window). At most one pending appeal per user;
//! an approval decrements the counter and lifts the mute when it reaches
//! zero.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use guildmint_core::constants::{
    APPEAL_COOLDOWN_HOURS, AUTO_MUTE_WARN_2, AUTO_MUTE_WARN_3, WARN_FALLBACK_DECAY_DAYS,
};
use guildmint_core::time::{fmt_ts, parse_ts};
use guildmint_core::MintError;
use guildmint_store::settings::{get_moderation_thresholds, ModerationThresholds};
use guildmint_store::Store;

// ── History actions ──────────────────────────────────────────────────────────

/// Events appended to the warning history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAction {
    WarnIssued,
    WarnDecreased,
    WarnDecay,
    MuteApplied,
    MuteRemoved,
    AppealCreated,
    AppealReviewed,
}

impl ModAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModAction::WarnIssued => "warn_issued",
            ModAction::WarnDecreased => "warn_decreased",
            ModAction::WarnDecay => "warn_decay",
            ModAction::MuteApplied => "mute_applied",
            ModAction::MuteRemoved => "mute_removed",
            ModAction::AppealCreated => "appeal_created",
            ModAction::AppealReviewed => "appeal_reviewed",
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn log_history(
    conn: &Connection,
    guild: &str,
    user: &str,
    action: ModAction,
    before: i64,
    after: i64,
    moderator: Option<&str>,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    conn.execute(
        "INSERT INTO warning_history
         (guild_id, user_id, action, warn_count_before, warn_count_after,
          moderator_id, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![guild, user, action.as_str(), before, after, moderator, reason, fmt_ts(now)],
    )?;
    Ok(())
}

// ── Warn counter ─────────────────────────────────────────────────────────────

pub fn warning_count(conn: &Connection, guild: &str, user: &str) -> Result<i64, MintError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT warn_count FROM warnings WHERE guild_id = ?1 AND user_id = ?2",
            [guild, user],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

/// Outcome of a warn, including any automatic mute that fired.
#[derive(Debug, Clone, Serialize)]
pub struct WarnResult {
    pub warn_count: i64,
    pub auto_mute_seconds: Option<i64>,
}

/// Issue a warning: bump the counter, log the event, and apply the
/// automatic mute when the count lands on a configured threshold.
pub fn warn(
    store: &Store,
    guild: &str,
    user: &str,
    moderator: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<WarnResult, MintError> {
    store.with_tx(|tx| {
        let old_count = warning_count(tx, guild, user)?;
        let new_count = old_count + 1;

        tx.execute(
            "INSERT INTO warnings (guild_id, user_id, warn_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(guild_id, user_id)
             DO UPDATE SET warn_count = excluded.warn_count, updated_at = excluded.updated_at",
            rusqlite::params![guild, user, new_count, fmt_ts(now)],
        )?;
        log_history(
            tx,
            guild,
            user,
            ModAction::WarnIssued,
            old_count,
            new_count,
            Some(moderator),
            Some(reason),
            now,
        )?;

        let thresholds = get_moderation_thresholds(tx, guild)?;
        let auto_mute_seconds = match new_count {
            n if n == AUTO_MUTE_WARN_2 => Some(thresholds.mute_duration_warn_2),
            n if n == AUTO_MUTE_WARN_3 => Some(thresholds.mute_duration_warn_3),
            _ => None,
        };
        if let Some(duration) = auto_mute_seconds {
            apply_mute_in(tx, guild, user, Some(moderator), reason, duration, now)?;
        }

        info!(guild, user, moderator, warn_count = new_count, "warning issued");
        Ok(WarnResult {
            warn_count: new_count,
            auto_mute_seconds,
        })
    })
}

/// Remove one warning (floor zero). A count reaching zero lifts any
/// active mute.
pub fn unwarn(
    store: &Store,
    guild: &str,
    user: &str,
    moderator: Option<&str>,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, MintError> {
    store.with_tx(|tx| {
        let new_count =
            decrement_in(tx, guild, user, ModAction::WarnDecreased, moderator, reason, now)?;
        if new_count == 0 {
            remove_mute_in(tx, guild, user, moderator, "warn count reached zero", now)?;
        }
        Ok(new_count)
    })
}

fn decrement_in(
    conn: &Connection,
    guild: &str,
    user: &str,
    action: ModAction,
    moderator: Option<&str>,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, MintError> {
    let old_count = warning_count(conn, guild, user)?;
    if old_count <= 0 {
        return Ok(0);
    }
    let new_count = old_count - 1;
    conn.execute(
        "UPDATE warnings SET warn_count = ?1, updated_at = ?2
         WHERE guild_id = ?3 AND user_id = ?4",
        rusqlite::params![new_count, fmt_ts(now), guild, user],
    )?;
    log_history(conn, guild, user, action, old_count, new_count, moderator, reason, now)?;
    Ok(new_count)
}

/// Warning history for a user, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub action: String,
    pub warn_count_before: i64,
    pub warn_count_after: i64,
    pub moderator_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: String,
}

pub fn warning_history(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<Vec<HistoryEvent>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT action, warn_count_before, warn_count_after, moderator_id, reason, created_at
         FROM warning_history WHERE guild_id = ?1 AND user_id = ?2
         ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([guild, user], |row| {
            Ok(HistoryEvent {
                action: row.get(0)?,
                warn_count_before: row.get(1)?,
                warn_count_after: row.get(2)?,
                moderator_id: row.get(3)?,
                reason: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Mutes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ActiveMute {
    pub guild_id: String,
    pub user_id: String,
    pub moderator_id: Option<String>,
    pub reason: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

impl ActiveMute {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ActiveMute {
            guild_id: row.get("guild_id")?,
            user_id: row.get("user_id")?,
            moderator_id: row.get("moderator_id")?,
            reason: row.get("reason")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn apply_mute_in(
    conn: &Connection,
    guild: &str,
    user: &str,
    moderator: Option<&str>,
    reason: &str,
    duration_seconds: i64,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    let expires = now + Duration::seconds(duration_seconds);
    conn.execute(
        "INSERT INTO active_mutes (guild_id, user_id, moderator_id, reason, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(guild_id, user_id)
         DO UPDATE SET moderator_id = excluded.moderator_id,
                       reason = excluded.reason,
                       expires_at = excluded.expires_at,
                       created_at = excluded.created_at",
        rusqlite::params![guild, user, moderator, reason, fmt_ts(expires), fmt_ts(now)],
    )?;
    log_history(
        conn,
        guild,
        user,
        ModAction::MuteApplied,
        0,
        0,
        moderator,
        Some(reason),
        now,
    )?;
    info!(guild, user, duration_seconds, "mute applied");
    Ok(())
}

/// Persist a mute directly (manual `mute` command).
pub fn apply_mute(
    store: &Store,
    guild: &str,
    user: &str,
    moderator: Option<&str>,
    reason: &str,
    duration_seconds: i64,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    store.with_tx(|tx| apply_mute_in(tx, guild, user, moderator, reason, duration_seconds, now))
}

fn remove_mute_in(
    conn: &Connection,
    guild: &str,
    user: &str,
    moderator: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, MintError> {
    let removed = conn.execute(
        "DELETE FROM active_mutes WHERE guild_id = ?1 AND user_id = ?2",
        [guild, user],
    )?;
    if removed == 0 {
        return Ok(false);
    }
    log_history(
        conn,
        guild,
        user,
        ModAction::MuteRemoved,
        0,
        0,
        moderator,
        Some(reason),
        now,
    )?;
    info!(guild, user, "mute removed");
    Ok(true)
}

/// Lift a mute (manual `unmute` command). Returns whether one existed.
pub fn remove_mute(
    store: &Store,
    guild: &str,
    user: &str,
    moderator: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, MintError> {
    store.with_tx(|tx| remove_mute_in(tx, guild, user, moderator, reason, now))
}

pub fn active_mute(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<Option<ActiveMute>, MintError> {
    conn.query_row(
        "SELECT * FROM active_mutes WHERE guild_id = ?1 AND user_id = ?2",
        [guild, user],
        ActiveMute::from_row,
    )
    .optional()
    .map_err(MintError::from)
}

/// All mutes whose expiry has passed; the scheduler removes them and
/// reports through the platform hooks.
pub fn expired_mutes(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<ActiveMute>, MintError> {
    let mut stmt = conn.prepare("SELECT * FROM active_mutes WHERE expires_at <= ?1")?;
    let rows = stmt
        .query_map([fmt_ts(now)], ActiveMute::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Remove every expired mute, logging each. Returns the lifted mutes.
pub fn sweep_expired_mutes(store: &Store, now: DateTime<Utc>) -> Result<Vec<ActiveMute>, MintError> {
    store.with_tx(|tx| {
        let expired = expired_mutes(tx, now)?;
        for mute in &expired {
            remove_mute_in(tx, &mute.guild_id, &mute.user_id, None, "mute expired", now)?;
        }
        Ok(expired)
    })
}

// ── Decay ────────────────────────────────────────────────────────────────────

/// Days until decay for a given count, per guild config.
pub fn decay_days(warn_count: i64, thresholds: &ModerationThresholds) -> i64 {
    match warn_count {
        1 => thresholds.warn_1_decay_days,
        2 => thresholds.warn_2_decay_days,
        3 => thresholds.warn_3_decay_days,
        _ => WARN_FALLBACK_DECAY_DAYS,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecayedUser {
    pub guild_id: String,
    pub user_id: String,
    pub warn_count: i64,
}

/// The decay pass: every user whose `updated_at + decay_days(count)` has
/// passed loses one warning, logged as `warn_decay`. Returns the users
/// whose counters changed (with the new count).
pub fn sweep_warn_decay(store: &Store, now: DateTime<Utc>) -> Result<Vec<DecayedUser>, MintError> {
    store.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "SELECT guild_id, user_id, warn_count, updated_at FROM warnings WHERE warn_count > 0",
        )?;
        let candidates = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut decayed = Vec::new();
        for (guild, user, count, updated_at) in candidates {
            let thresholds = get_moderation_thresholds(tx, &guild)?;
            let deadline = parse_ts(&updated_at)? + Duration::days(decay_days(count, &thresholds));
            if now < deadline {
                continue;
            }
            let new_count = decrement_in(
                tx,
                &guild,
                &user,
                ModAction::WarnDecay,
                None,
                Some("scheduled decay"),
                now,
            )?;
            decayed.push(DecayedUser {
                guild_id: guild,
                user_id: user,
                warn_count: new_count,
            });
        }
        Ok(decayed)
    })
}

// ── Appeals ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Appeal {
    pub id: i64,
    pub guild_id: String,
    pub user_id: String,
    pub appeal_reason: String,
    pub moderator_id: Option<String>,
    pub status: String,
    pub moderator_decision: Option<String>,
    pub created_at: String,
    pub reviewed_at: Option<String>,
}

impl Appeal {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Appeal {
            id: row.get("id")?,
            guild_id: row.get("guild_id")?,
            user_id: row.get("user_id")?,
            appeal_reason: row.get("appeal_reason")?,
            moderator_id: row.get("moderator_id")?,
            status: row.get("status")?,
            moderator_decision: row.get("moderator_decision")?,
            created_at: row.get("created_at")?,
            reviewed_at: row.get("reviewed_at")?,
        })
    }
}

/// Whether the user may submit a new appeal right now (48h spacing).
/// The dispatcher consults this before calling [`create_appeal`].
pub fn can_submit_appeal(
    conn: &Connection,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<bool, MintError> {
    let last: Option<String> = conn
        .query_row(
            "SELECT created_at FROM moderation_appeals
             WHERE guild_id = ?1 AND user_id = ?2 ORDER BY id DESC LIMIT 1",
            [guild, user],
            |row| row.get(0),
        )
        .optional()?;
    match last {
        Some(created) => Ok((now - parse_ts(&created)?).num_hours() >= APPEAL_COOLDOWN_HOURS),
        None => Ok(true),
    }
}

/// File an appeal. Rejects users with no warnings and users who already
/// have one pending.
pub fn create_appeal(
    store: &Store,
    guild: &str,
    user: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<i64, MintError> {
    store.with_tx(|tx| {
        if warning_count(tx, guild, user)? <= 0 {
            return Err(MintError::NothingToAppeal);
        }
        let pending: i64 = tx.query_row(
            "SELECT COUNT(*) FROM moderation_appeals
             WHERE guild_id = ?1 AND user_id = ?2 AND status = 'pending'",
            [guild, user],
            |row| row.get(0),
        )?;
        if pending > 0 {
            return Err(MintError::AppealAlreadyPending);
        }

        tx.execute(
            "INSERT INTO moderation_appeals (guild_id, user_id, appeal_reason, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![guild, user, reason, fmt_ts(now)],
        )?;
        let appeal_id = tx.last_insert_rowid();
        log_history(
            tx,
            guild,
            user,
            ModAction::AppealCreated,
            0,
            0,
            None,
            Some(reason),
            now,
        )?;
        info!(guild, user, appeal_id, "appeal created");
        Ok(appeal_id)
    })
}

pub fn pending_appeals(conn: &Connection, guild: &str) -> Result<Vec<Appeal>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM moderation_appeals
         WHERE guild_id = ?1 AND status = 'pending' ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map([guild], Appeal::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealDecision {
    Approved,
    Denied,
}

impl AppealDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            AppealDecision::Approved => "approved",
            AppealDecision::Denied => "denied",
        }
    }
}

/// Review a pending appeal. Approval decrements the warn counter; if that
/// zeroes it, any active mute lifts.
pub fn review_appeal(
    store: &Store,
    appeal_id: i64,
    moderator: &str,
    decision: AppealDecision,
    note: &str,
    now: DateTime<Utc>,
) -> Result<Appeal, MintError> {
    store.with_tx(|tx| {
        let appeal = tx
            .query_row(
                "SELECT * FROM moderation_appeals WHERE id = ?1",
                [appeal_id],
                Appeal::from_row,
            )
            .optional()?
            .ok_or(MintError::AppealNotFound(appeal_id))?;
        if appeal.status != "pending" {
            return Err(MintError::AppealAlreadyReviewed(appeal.status));
        }

        tx.execute(
            "UPDATE moderation_appeals
             SET status = ?1, moderator_id = ?2, moderator_decision = ?3, reviewed_at = ?4
             WHERE id = ?5",
            rusqlite::params![decision.as_str(), moderator, note, fmt_ts(now), appeal_id],
        )?;
        log_history(
            tx,
            &appeal.guild_id,
            &appeal.user_id,
            ModAction::AppealReviewed,
            0,
            0,
            Some(moderator),
            Some(note),
            now,
        )?;

        if decision == AppealDecision::Approved {
            let new_count = decrement_in(
                tx,
                &appeal.guild_id,
                &appeal.user_id,
                ModAction::WarnDecreased,
                Some(moderator),
                Some("appeal approved"),
                now,
            )?;
            // Crossing back under the first auto-mute threshold lifts the mute.
            if new_count < AUTO_MUTE_WARN_2 {
                remove_mute_in(
                    tx,
                    &appeal.guild_id,
                    &appeal.user_id,
                    Some(moderator),
                    "appeal approved",
                    now,
                )?;
            }
        }

        info!(appeal_id, moderator, decision = decision.as_str(), "appeal reviewed");
        tx.query_row(
            "SELECT * FROM moderation_appeals WHERE id = ?1",
            [appeal_id],
            Appeal::from_row,
        )
        .map_err(MintError::from)
    })
}

#[cfg(test)]
mod tests;
