//! Persistent per-`(guild, user, action)` cooldown rows.
//!
//! These back the minigame actions (capture, duel); the per-command chat
//! cooldowns live in memory in the rate limiter.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use guildmint_core::time::{fmt_ts, parse_ts};
use guildmint_core::MintError;

/// Seconds remaining on the cooldown, or `None` when the action is allowed.
pub fn check_cooldown(
    conn: &Connection,
    guild: &str,
    user: &str,
    action: &str,
    cooldown_secs: i64,
    now: DateTime<Utc>,
) -> Result<Option<i64>, MintError> {
    let last: Option<String> = conn
        .query_row(
            "SELECT last_action_at FROM user_cooldowns
             WHERE guildId = ?1 AND userId = ?2 AND action_type = ?3",
            [guild, user, action],
            |row| row.get(0),
        )
        .optional()?;

    let Some(last) = last else {
        return Ok(None);
    };
    let elapsed = (now - parse_ts(&last)?).num_seconds();
    if elapsed >= cooldown_secs {
        Ok(None)
    } else {
        Ok(Some(cooldown_secs - elapsed))
    }
}

/// Record that the action ran at `now`.
pub fn set_cooldown(
    conn: &Connection,
    guild: &str,
    user: &str,
    action: &str,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    conn.execute(
        "INSERT INTO user_cooldowns (guildId, userId, action_type, last_action_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(guildId, userId, action_type)
         DO UPDATE SET last_action_at = excluded.last_action_at",
        rusqlite::params![guild, user, action, fmt_ts(now)],
    )?;
    Ok(())
}
