//! Activity analytics rows backing the dashboard `/stats` endpoint:
//! daily member growth, per-channel message counts and the 24-bin hourly
//! histogram.

use chrono::{DateTime, Timelike, Utc};
use rusqlite::Connection;
use serde::Serialize;

use guildmint_core::time::utc_date_str;
use guildmint_core::MintError;

// ── Recording ────────────────────────────────────────────────────────────────

/// Upsert today's member-growth row with an absolute member count.
pub fn record_member_count(
    conn: &Connection,
    guild: &str,
    member_count: i64,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    conn.execute(
        "INSERT INTO member_growth (guild_id, date, member_count)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(guild_id, date) DO UPDATE SET member_count = excluded.member_count",
        rusqlite::params![guild, utc_date_str(now), member_count],
    )?;
    Ok(())
}

/// Count one join (or leave) against today's growth row.
pub fn record_member_change(
    conn: &Connection,
    guild: &str,
    joined: bool,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    let col = if joined { "joins_today" } else { "leaves_today" };
    // `col` is one of two fixed identifiers, never caller input.
    conn.execute(
        &format!(
            "INSERT INTO member_growth (guild_id, date, {col})
             VALUES (?1, ?2, 1)
             ON CONFLICT(guild_id, date) DO UPDATE SET {col} = {col} + 1"
        ),
        rusqlite::params![guild, utc_date_str(now)],
    )?;
    Ok(())
}

/// Count one message in `channel`, updating the daily channel row and the
/// hourly histogram together.
pub fn record_message(
    conn: &Connection,
    guild: &str,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    conn.execute(
        "INSERT INTO channel_stats (guild_id, channel_id, date, message_count)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(guild_id, channel_id, date)
         DO UPDATE SET message_count = message_count + 1",
        rusqlite::params![guild, channel, utc_date_str(now)],
    )?;
    conn.execute(
        "INSERT INTO hourly_activity (guild_id, hour, message_count)
         VALUES (?1, ?2, 1)
         ON CONFLICT(guild_id, hour) DO UPDATE SET message_count = message_count + 1",
        rusqlite::params![guild, now.hour() as i64],
    )?;
    Ok(())
}

// ── Queries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GrowthPoint {
    pub date: String,
    pub member_count: i64,
    pub joins_today: i64,
    pub leaves_today: i64,
}

pub fn growth_series(
    conn: &Connection,
    guild: &str,
    since_date: &str,
) -> Result<Vec<GrowthPoint>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT date, member_count, joins_today, leaves_today FROM member_growth
         WHERE guild_id = ?1 AND date >= ?2 ORDER BY date ASC",
    )?;
    let rows = stmt
        .query_map([guild, since_date], |row| {
            Ok(GrowthPoint {
                date: row.get(0)?,
                member_count: row.get(1)?,
                joins_today: row.get(2)?,
                leaves_today: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelActivity {
    pub channel_id: String,
    pub date: String,
    pub message_count: i64,
}

pub fn channel_activity(
    conn: &Connection,
    guild: &str,
    since_date: &str,
) -> Result<Vec<ChannelActivity>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, date, message_count FROM channel_stats
         WHERE guild_id = ?1 AND date >= ?2 ORDER BY date ASC",
    )?;
    let rows = stmt
        .query_map([guild, since_date], |row| {
            Ok(ChannelActivity {
                channel_id: row.get(0)?,
                date: row.get(1)?,
                message_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct TopChannel {
    pub channel_id: String,
    pub total_messages: i64,
}

pub fn top_channels(
    conn: &Connection,
    guild: &str,
    since_date: &str,
    limit: i64,
) -> Result<Vec<TopChannel>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, SUM(message_count) AS total_messages FROM channel_stats
         WHERE guild_id = ?1 AND date >= ?2
         GROUP BY channel_id ORDER BY total_messages DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![guild, since_date, limit], |row| {
            Ok(TopChannel {
                channel_id: row.get(0)?,
                total_messages: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The 24-bin hourly histogram; bins with no activity are zero.
pub fn hourly_histogram(conn: &Connection, guild: &str) -> Result<[i64; 24], MintError> {
    let mut bins = [0i64; 24];
    let mut stmt = conn
        .prepare("SELECT hour, message_count FROM hourly_activity WHERE guild_id = ?1")?;
    let rows = stmt.query_map([guild], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (hour, count) = row?;
        if (0..24).contains(&hour) {
            bins[hour as usize] = count;
        }
    }
    Ok(bins)
}

#[derive(Debug, Clone, Serialize)]
pub struct GuildTotals {
    pub total_users: i64,
    pub total_xp: f64,
    pub total_messages: i64,
}

pub fn guild_totals(conn: &Connection, guild: &str) -> Result<GuildTotals, MintError> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(xp), 0), COALESCE(SUM(messages), 0)
         FROM users WHERE guildId = ?1",
        [guild],
        |row| {
            Ok(GuildTotals {
                total_users: row.get(0)?,
                total_xp: row.get(1)?,
                total_messages: row.get(2)?,
            })
        },
    )
    .map_err(MintError::from)
}
