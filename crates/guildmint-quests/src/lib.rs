//! guildmint-quests — daily assignment, progress tracking, claims and
//! streaks.
//!
//! Assignment is idempotent per UTC day: the second call on the same day
//! returns the already-assigned rows. Progress counters clamp at the
//! template target; a claimed quest row is immutable.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use guildmint_core::constants::{
    DAILY_QUESTS_GUARANTEED, DAILY_QUESTS_RANDOM, DAILY_QUEST_RANDOM_CHANCE, STREAK_MULTIPLIERS,
};
use guildmint_core::time::{fmt_ts, parse_ts, utc_date, utc_date_str};
use guildmint_core::types::{Related, TxKind};
use guildmint_core::MintError;
use guildmint_store::tracking::{get_daily_tracking, set_streak};
use guildmint_store::Store;

// ── Rows ─────────────────────────────────────────────────────────────────────

/// A quest template row.
#[derive(Debug, Clone, Serialize)]
pub struct QuestTemplate {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub quest_type: String,
    pub target_type: String,
    pub target_value: i64,
    pub reward_coins: i64,
    pub reward_xp: i64,
    pub allow_other_channels: bool,
    pub rarity: String,
    pub metadata: String,
    pub active: bool,
}

impl QuestTemplate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(QuestTemplate {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            quest_type: row.get("type")?,
            target_type: row.get("target_type")?,
            target_value: row.get("target_value")?,
            reward_coins: row.get("reward_coins")?,
            reward_xp: row.get("reward_xp")?,
            allow_other_channels: row.get::<_, i64>("allow_other_channels")? != 0,
            rarity: row.get("rarity")?,
            metadata: row.get("metadata")?,
            active: row.get::<_, i64>("active")? != 0,
        })
    }
}

/// An assignment joined with its template.
#[derive(Debug, Clone, Serialize)]
pub struct UserQuest {
    pub user_quest_id: i64,
    pub quest_id: i64,
    pub name: String,
    pub description: String,
    pub target_type: String,
    pub target_value: i64,
    pub reward_coins: i64,
    pub reward_xp: i64,
    pub rarity: String,
    pub progress: i64,
    pub completed: bool,
    pub claimed: bool,
    pub assigned_at: String,
}

impl UserQuest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserQuest {
            user_quest_id: row.get("user_quest_id")?,
            quest_id: row.get("quest_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            target_type: row.get("target_type")?,
            target_value: row.get("target_value")?,
            reward_coins: row.get("reward_coins")?,
            reward_xp: row.get("reward_xp")?,
            rarity: row.get("rarity")?,
            progress: row.get("progress")?,
            completed: row.get::<_, i64>("completed")? != 0,
            claimed: row.get::<_, i64>("claimed")? != 0,
            assigned_at: row.get("assigned_at")?,
        })
    }
}

const USER_QUEST_SELECT: &str = "SELECT
    uq.id AS user_quest_id, q.id AS quest_id, q.name, q.description,
    q.target_type, q.target_value, q.reward_coins, q.reward_xp, q.rarity,
    uq.progress, uq.completed, uq.claimed, uq.assigned_at
    FROM user_quests uq JOIN quests q ON uq.questId = q.id";

// ── Templates ────────────────────────────────────────────────────────────────

/// Active templates of one type, ordered by rarity then name.
pub fn available_quests(
    conn: &Connection,
    quest_type: &str,
) -> Result<Vec<QuestTemplate>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM quests WHERE type = ?1 AND active = 1 ORDER BY rarity, name",
    )?;
    let rows = stmt
        .query_map([quest_type], QuestTemplate::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Assignment ───────────────────────────────────────────────────────────────

/// Daily quests already assigned to the user today.
pub fn user_daily_quests(
    conn: &Connection,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<Vec<UserQuest>, MintError> {
    let mut stmt = conn.prepare(&format!(
        "{USER_QUEST_SELECT}
         WHERE uq.guildId = ?1 AND uq.userId = ?2
           AND date(uq.assigned_at) = ?3 AND q.type = 'daily'
         ORDER BY uq.assigned_at"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![guild, user, utc_date_str(now)],
            UserQuest::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All unclaimed assignments for a user, newest first.
pub fn user_active_quests(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<Vec<UserQuest>, MintError> {
    let mut stmt = conn.prepare(&format!(
        "{USER_QUEST_SELECT}
         WHERE uq.guildId = ?1 AND uq.userId = ?2 AND uq.claimed = 0
         ORDER BY uq.assigned_at DESC"
    ))?;
    let rows = stmt
        .query_map([guild, user], UserQuest::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Assign the day's quests: `DAILY_QUESTS_GUARANTEED` guaranteed picks
/// preferring common rarity, then up to `DAILY_QUESTS_RANDOM` bonus picks
/// each included with 50% probability. Re-invocation on the same UTC day
/// returns the existing rows untouched.
pub fn assign_daily_quests<R: Rng>(
    store: &Store,
    guild: &str,
    user: &str,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<Vec<UserQuest>, MintError> {
    store.with_tx(|tx| {
        let existing = user_daily_quests(tx, guild, user, now)?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let pool = available_quests(tx, "daily")?;
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let mut picked: Vec<&QuestTemplate> = Vec::new();

        let commons: Vec<&QuestTemplate> =
            pool.iter().filter(|q| q.rarity == "common").collect();
        let guaranteed_pool: Vec<&QuestTemplate> = if commons.is_empty() {
            pool.iter().collect()
        } else {
            commons
        };
        let take = DAILY_QUESTS_GUARANTEED.min(guaranteed_pool.len());
        picked.extend(
            guaranteed_pool
                .choose_multiple(rng, take)
                .copied()
                .collect::<Vec<_>>(),
        );

        let mut remaining: Vec<&QuestTemplate> = pool
            .iter()
            .filter(|q| !picked.iter().any(|p| p.id == q.id))
            .collect();
        for _ in 0..DAILY_QUESTS_RANDOM {
            if remaining.is_empty() {
                break;
            }
            if rng.gen::<f64>() < DAILY_QUEST_RANDOM_CHANCE {
                let idx = rng.gen_range(0..remaining.len());
                picked.push(remaining.remove(idx));
            }
        }

        for quest in &picked {
            tx.execute(
                "INSERT INTO user_quests (guildId, userId, questId, progress, completed, claimed, assigned_at)
                 VALUES (?1, ?2, ?3, 0, 0, 0, ?4)",
                rusqlite::params![guild, user, quest.id, fmt_ts(now)],
            )?;
        }
        info!(guild, user, count = picked.len(), "daily quests assigned");

        user_daily_quests(tx, guild, user, now)
    })
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// A quest that just transitioned to completed.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedQuest {
    pub user_quest_id: i64,
    pub name: String,
    pub progress: i64,
    pub target: i64,
}

/// Add `amount` progress to every active assignment whose template matches
/// `target_type`. Progress clamps at the target; rows reaching the target
/// are marked completed. Returns the quests that completed on this call.
pub fn increment_quest_progress(
    store: &Store,
    guild: &str,
    user: &str,
    target_type: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CompletedQuest>, MintError> {
    store.with_tx(|tx| increment_quest_progress_in(tx, guild, user, target_type, amount, now))
}

/// Transaction-scoped variant for callers already inside `with_tx`.
pub fn increment_quest_progress_in(
    conn: &Connection,
    guild: &str,
    user: &str,
    target_type: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CompletedQuest>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT uq.id, uq.progress, q.target_value, q.name
         FROM user_quests uq JOIN quests q ON uq.questId = q.id
         WHERE uq.guildId = ?1 AND uq.userId = ?2 AND q.target_type = ?3
           AND uq.completed = 0 AND uq.claimed = 0",
    )?;
    let matches = stmt
        .query_map([guild, user, target_type], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut completed = Vec::new();
    for (id, progress, target, name) in matches {
        let new_progress = (progress + amount).min(target);
        if new_progress >= target {
            conn.execute(
                "UPDATE user_quests SET progress = ?1, completed = 1, completed_at = ?2
                 WHERE id = ?3",
                rusqlite::params![new_progress, fmt_ts(now), id],
            )?;
            completed.push(CompletedQuest {
                user_quest_id: id,
                name,
                progress: new_progress,
                target,
            });
        } else {
            conn.execute(
                "UPDATE user_quests SET progress = ?1 WHERE id = ?2",
                rusqlite::params![new_progress, id],
            )?;
        }
    }
    Ok(completed)
}

// ── Claims ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    pub quest_name: String,
    pub coins_rewarded: i64,
    pub xp_rewarded: i64,
    pub level_up: bool,
    pub new_level: Option<i64>,
}

/// Claim the rewards of a completed, unclaimed assignment. Rewards flow
/// through the ledger with kind `quest_reward` and the assignment id as the
/// related entity; the row becomes immutable afterwards.
pub fn claim_quest(
    store: &Store,
    guild: &str,
    user: &str,
    user_quest_id: i64,
    now: DateTime<Utc>,
) -> Result<ClaimResult, MintError> {
    store.with_tx(|tx| claim_quest_in(tx, guild, user, user_quest_id, now))
}

fn claim_quest_in(
    conn: &Connection,
    guild: &str,
    user: &str,
    user_quest_id: i64,
    now: DateTime<Utc>,
) -> Result<ClaimResult, MintError> {
    let quest = conn
        .query_row(
            "SELECT uq.completed, uq.claimed, q.name, q.reward_coins, q.reward_xp
             FROM user_quests uq JOIN quests q ON uq.questId = q.id
             WHERE uq.id = ?1 AND uq.guildId = ?2 AND uq.userId = ?3",
            rusqlite::params![user_quest_id, guild, user],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? != 0,
                    row.get::<_, i64>(1)? != 0,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or(MintError::QuestNotFound(user_quest_id))?;

    let (completed, claimed, name, reward_coins, reward_xp) = quest;
    if !completed {
        return Err(MintError::QuestNotCompleted);
    }
    if claimed {
        return Err(MintError::QuestAlreadyClaimed);
    }

    if reward_coins > 0 {
        guildmint_ledger::add_coins(
            conn,
            guild,
            user,
            reward_coins as f64,
            TxKind::QuestReward,
            Some(Related::quest(user_quest_id)),
            now,
        )?;
    }
    let mut level_up = false;
    let mut new_level = None;
    if reward_xp > 0 {
        let change = guildmint_ledger::add_xp(
            conn,
            guild,
            user,
            reward_xp as f64,
            TxKind::QuestReward,
            Some(Related::quest(user_quest_id)),
            now,
        )?;
        level_up = change.level_up;
        new_level = Some(change.new_level);
    }

    conn.execute(
        "UPDATE user_quests SET claimed = 1 WHERE id = ?1",
        [user_quest_id],
    )?;
    info!(guild, user, quest = %name, "quest claimed");

    Ok(ClaimResult {
        quest_name: name,
        coins_rewarded: reward_coins,
        xp_rewarded: reward_xp,
        level_up,
        new_level,
    })
}

/// Claim every completed, unclaimed assignment in one transaction.
pub fn claim_all_completed(
    store: &Store,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ClaimResult>, MintError> {
    store.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "SELECT id FROM user_quests
             WHERE guildId = ?1 AND userId = ?2 AND completed = 1 AND claimed = 0",
        )?;
        let ids = stmt
            .query_map([guild, user], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(claim_quest_in(tx, guild, user, id, now)?);
        }
        Ok(results)
    })
}

// ── Streaks ──────────────────────────────────────────────────────────────────

/// Update the streak on a daily claim: exactly-yesterday increments,
/// same-day keeps, anything else resets to 1. Returns the new streak.
pub fn update_streak(
    store: &Store,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<i64, MintError> {
    store.with_tx(|tx| {
        let tracking = get_daily_tracking(tx, guild, user)?;

        let mut new_streak = 1;
        if let Some(last) = &tracking.last_daily_claim {
            let days = (utc_date(now) - utc_date(parse_ts(last)?)).num_days();
            new_streak = match days {
                1 => tracking.streak + 1,
                0 => tracking.streak,
                _ => 1,
            };
        }

        set_streak(tx, guild, user, new_streak, now)?;
        Ok(new_streak)
    })
}

/// Reward multiplier for a streak length.
pub fn streak_multiplier(streak: i64) -> f64 {
    for (threshold, multiplier) in STREAK_MULTIPLIERS {
        if streak >= threshold {
            return multiplier;
        }
    }
    1.0
}

// ── Daily status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DailyStatus {
    pub quests: Vec<UserQuest>,
    pub total: usize,
    pub completed: usize,
    pub claimed: usize,
    pub streak: i64,
    pub can_claim_new: bool,
    pub all_completed: bool,
}

/// Daily summary for the `daily status` command.
pub fn daily_status(
    store: &Store,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<DailyStatus, MintError> {
    store.with_tx(|tx| {
        let quests = user_daily_quests(tx, guild, user, now)?;
        let tracking = get_daily_tracking(tx, guild, user)?;

        let mut eligible = true;
        if let Some(last) = &tracking.last_daily_claim {
            eligible = utc_date(parse_ts(last)?) < utc_date(now);
        }

        let total = quests.len();
        let completed = quests.iter().filter(|q| q.completed).count();
        let claimed = quests.iter().filter(|q| q.claimed).count();

        Ok(DailyStatus {
            total,
            completed,
            claimed,
            streak: tracking.streak,
            can_claim_new: eligible && total == 0,
            all_completed: total > 0 && completed == total,
            quests,
        })
    })
}
