//! guildmint-ledger — balances and the append-only transaction log.
//!
//! Every balance mutation appends exactly one ledger row per affected
//! currency, with `balance_after` equal to the new stored balance. The
//! auditable invariant: for any `(guild, user, currency)` the sum of all
//! ledger amounts equals the stored balance.
//!
//! All functions take a `&Connection` and run inside whatever transaction
//! the caller opened through `Store::with_tx`, so multi-step operations
//! (trade accept, duel, claim) stay atomic.

pub mod level;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use guildmint_core::time::fmt_ts;
use guildmint_core::types::{Balance, CoinChange, Currency, Related, TxKind, XpChange};
use guildmint_core::MintError;

pub use level::{level_from_xp, xp_for_level};

// ── Users ────────────────────────────────────────────────────────────────────

/// Fetch the balance row for `(guild, user)`, creating it lazily.
pub fn ensure_user(conn: &Connection, guild: &str, user: &str) -> Result<Balance, MintError> {
    let existing = conn
        .query_row(
            "SELECT xp, level, messages, coins FROM users WHERE guildId = ?1 AND userId = ?2",
            [guild, user],
            |row| {
                Ok(Balance {
                    xp: row.get(0)?,
                    level: row.get(1)?,
                    messages: row.get(2)?,
                    coins: row.get(3)?,
                })
            },
        )
        .optional()?;
    if let Some(balance) = existing {
        return Ok(balance);
    }
    conn.execute(
        "INSERT INTO users (guildId, userId, xp, level, messages, coins)
         VALUES (?1, ?2, 0, 1, 0, 0)",
        [guild, user],
    )?;
    Ok(Balance {
        xp: 0.0,
        level: 1,
        messages: 0,
        coins: 0.0,
    })
}

/// Current balances without side effects beyond lazy row creation.
pub fn get_balance(conn: &Connection, guild: &str, user: &str) -> Result<Balance, MintError> {
    ensure_user(conn, guild, user)
}

/// Count a message for the user (the dispatcher calls this per chat event).
pub fn bump_message_count(conn: &Connection, guild: &str, user: &str) -> Result<(), MintError> {
    ensure_user(conn, guild, user)?;
    conn.execute(
        "UPDATE users SET messages = messages + 1 WHERE guildId = ?1 AND userId = ?2",
        [guild, user],
    )?;
    Ok(())
}

// ── Coins ────────────────────────────────────────────────────────────────────

/// Credit coins. `amount` must be non-negative; zero-amount credits are
/// permitted (they still append a ledger row so callers stay uniform).
pub fn add_coins(
    conn: &Connection,
    guild: &str,
    user: &str,
    amount: f64,
    kind: TxKind,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<CoinChange, MintError> {
    mutate_coins(conn, guild, user, amount, kind, None, related, now)
}

/// Debit coins, failing with `InsufficientFunds` when the balance is short.
pub fn spend_coins(
    conn: &Connection,
    guild: &str,
    user: &str,
    amount: f64,
    kind: TxKind,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<CoinChange, MintError> {
    mutate_coins(conn, guild, user, -amount, kind, None, related, now)
}

/// Credit coins with extra ledger metadata (duel results carry the tax and
/// opponent here).
pub fn add_coins_with_metadata(
    conn: &Connection,
    guild: &str,
    user: &str,
    amount: f64,
    kind: TxKind,
    metadata: serde_json::Value,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<CoinChange, MintError> {
    mutate_coins(conn, guild, user, amount, kind, Some(metadata), related, now)
}

#[allow(clippy::too_many_arguments)]
fn mutate_coins(
    conn: &Connection,
    guild: &str,
    user: &str,
    signed_amount: f64,
    kind: TxKind,
    metadata: Option<serde_json::Value>,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<CoinChange, MintError> {
    let user_row = ensure_user(conn, guild, user)?;

    if signed_amount < 0.0 && -signed_amount > user_row.coins {
        return Err(MintError::InsufficientFunds {
            currency: "coins",
            have: user_row.coins,
            need: -signed_amount,
        });
    }

    let new_balance = user_row.coins + signed_amount;
    conn.execute(
        "UPDATE users SET coins = ?1 WHERE guildId = ?2 AND userId = ?3",
        rusqlite::params![new_balance, guild, user],
    )?;

    log_transaction(
        conn,
        guild,
        user,
        kind,
        signed_amount,
        Currency::Coins,
        new_balance,
        metadata,
        related,
        now,
    )?;

    debug!(guild, user, amount = signed_amount, kind = %kind, "coins mutated");
    Ok(CoinChange {
        old_balance: user_row.coins,
        new_balance,
        amount: signed_amount,
    })
}

// ── XP ───────────────────────────────────────────────────────────────────────

/// Credit XP and recompute the derived level.
pub fn add_xp(
    conn: &Connection,
    guild: &str,
    user: &str,
    amount: f64,
    kind: TxKind,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<XpChange, MintError> {
    mutate_xp(conn, guild, user, amount, kind, related, now)
}

/// Debit XP, failing with `InsufficientFunds` when the balance is short.
pub fn spend_xp(
    conn: &Connection,
    guild: &str,
    user: &str,
    amount: f64,
    kind: TxKind,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<XpChange, MintError> {
    mutate_xp(conn, guild, user, -amount, kind, related, now)
}

fn mutate_xp(
    conn: &Connection,
    guild: &str,
    user: &str,
    signed_amount: f64,
    kind: TxKind,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<XpChange, MintError> {
    let user_row = ensure_user(conn, guild, user)?;

    if signed_amount < 0.0 && -signed_amount > user_row.xp {
        return Err(MintError::InsufficientFunds {
            currency: "xp",
            have: user_row.xp,
            need: -signed_amount,
        });
    }

    let new_xp = user_row.xp + signed_amount;
    let new_level = level_from_xp(new_xp);
    conn.execute(
        "UPDATE users SET xp = ?1, level = ?2 WHERE guildId = ?3 AND userId = ?4",
        rusqlite::params![new_xp, new_level, guild, user],
    )?;

    log_transaction(
        conn,
        guild,
        user,
        kind,
        signed_amount,
        Currency::Xp,
        new_xp,
        None,
        related,
        now,
    )?;

    debug!(guild, user, amount = signed_amount, kind = %kind, "xp mutated");
    Ok(XpChange {
        old_xp: user_row.xp,
        new_xp,
        old_level: user_row.level,
        new_level,
        level_up: new_level > user_row.level,
        level_down: new_level < user_row.level,
        amount: signed_amount,
    })
}

// ── Transaction log ──────────────────────────────────────────────────────────

/// Append one ledger row. Returns the row id.
#[allow(clippy::too_many_arguments)]
pub fn log_transaction(
    conn: &Connection,
    guild: &str,
    user: &str,
    kind: TxKind,
    amount: f64,
    currency: Currency,
    balance_after: f64,
    metadata: Option<serde_json::Value>,
    related: Option<Related<'_>>,
    now: DateTime<Utc>,
) -> Result<i64, MintError> {
    let meta = metadata
        .map(|m| m.to_string())
        .unwrap_or_else(|| "{}".to_string());
    conn.execute(
        "INSERT INTO transactions (
            guildId, userId, kind, amount, currency, balance_after,
            metadata, related_id, related_type, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            guild,
            user,
            kind.as_str(),
            amount,
            currency.as_str(),
            balance_after,
            meta,
            related.map(|r| r.id),
            related.map(|r| r.kind),
            fmt_ts(now)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// One row of the transaction log, newest first in listings.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub kind: String,
    pub amount: f64,
    pub currency: String,
    pub balance_after: Option<f64>,
    pub metadata: String,
    pub related_id: Option<i64>,
    pub related_type: Option<String>,
    pub created_at: String,
}

/// Recent transactions for a user, optionally filtered by kind.
pub fn get_transactions(
    conn: &Connection,
    guild: &str,
    user: &str,
    limit: i64,
    kind: Option<&str>,
) -> Result<Vec<LedgerEntry>, MintError> {
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<LedgerEntry> {
        Ok(LedgerEntry {
            id: row.get(0)?,
            kind: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            balance_after: row.get(4)?,
            metadata: row.get(5)?,
            related_id: row.get(6)?,
            related_type: row.get(7)?,
            created_at: row.get(8)?,
        })
    };

    let rows = match kind {
        Some(kind) => {
            let mut stmt = conn.prepare(
                "SELECT id, kind, amount, currency, balance_after, metadata,
                        related_id, related_type, created_at
                 FROM transactions
                 WHERE guildId = ?1 AND userId = ?2 AND kind = ?3
                 ORDER BY id DESC LIMIT ?4",
            )?;
            let result = stmt
                .query_map(rusqlite::params![guild, user, kind, limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            result
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, kind, amount, currency, balance_after, metadata,
                        related_id, related_type, created_at
                 FROM transactions
                 WHERE guildId = ?1 AND userId = ?2
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let result = stmt
                .query_map(rusqlite::params![guild, user, limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            result
        }
    };
    Ok(rows)
}

/// Sum of all ledger amounts for `(guild, user, currency)`. Equals the
/// stored balance when the books are consistent; the test suites assert
/// this after every scenario.
pub fn ledger_sum(
    conn: &Connection,
    guild: &str,
    user: &str,
    currency: Currency,
) -> Result<f64, MintError> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions
         WHERE guildId = ?1 AND userId = ?2 AND currency = ?3",
        rusqlite::params![guild, user, currency.as_str()],
        |row| row.get(0),
    )
    .map_err(MintError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use guildmint_store::schema::migrate_in_memory;
    use guildmint_store::Store;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        migrate_in_memory(&store).unwrap();
        store
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn coin_round_trip_scenario() {
        // S1: seed 100, spend 40, audit the trail.
        let store = fresh();
        store
            .with_tx(|tx| {
                let credited = add_coins(tx, "G", "U", 100.0, TxKind::Seed, None, now())?;
                assert_eq!(credited.new_balance, 100.0);

                let spent = spend_coins(tx, "G", "U", 40.0, TxKind::ShopPurchase, None, now())?;
                assert_eq!(spent.new_balance, 60.0);

                let entries = get_transactions(tx, "G", "U", 20, None)?;
                assert_eq!(entries.len(), 2);
                // Newest first.
                assert_eq!(entries[0].amount, -40.0);
                assert_eq!(entries[0].balance_after, Some(60.0));
                assert_eq!(entries[1].amount, 100.0);
                assert_eq!(entries[1].balance_after, Some(100.0));

                assert_eq!(ledger_sum(tx, "G", "U", Currency::Coins)?, 60.0);
                assert_eq!(get_balance(tx, "G", "U")?.coins, 60.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn add_then_spend_same_amount_is_neutral() {
        let store = fresh();
        store
            .with_tx(|tx| {
                add_coins(tx, "G", "U", 250.0, TxKind::AdminGrant, None, now())?;
                spend_coins(tx, "G", "U", 250.0, TxKind::ShopPurchase, None, now())?;
                assert_eq!(get_balance(tx, "G", "U")?.coins, 0.0);
                let entries = get_transactions(tx, "G", "U", 10, None)?;
                assert_eq!(entries.len(), 2);
                assert_eq!(entries.iter().map(|e| e.amount).sum::<f64>(), 0.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn overspend_is_rejected_and_leaves_no_row() {
        let store = fresh();
        store
            .with_tx(|tx| {
                add_coins(tx, "G", "U", 10.0, TxKind::Seed, None, now())?;
                Ok(())
            })
            .unwrap();

        let err = store
            .with_tx(|tx| spend_coins(tx, "G", "U", 11.0, TxKind::ShopPurchase, None, now()))
            .unwrap_err();
        match err {
            MintError::InsufficientFunds { currency, have, need } => {
                assert_eq!(currency, "coins");
                assert_eq!(have, 10.0);
                assert_eq!(need, 11.0);
            }
            other => panic!("unexpected error: {other}"),
        }

        store
            .with_conn(|c| {
                assert_eq!(get_transactions(c, "G", "U", 10, None)?.len(), 1);
                assert_eq!(ledger_sum(c, "G", "U", Currency::Coins)?, 10.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn xp_mutations_track_level() {
        let store = fresh();
        store
            .with_tx(|tx| {
                // 125 XP is exactly level 2.
                let up = add_xp(tx, "G", "U", 125.0, TxKind::QuestReward, None, now())?;
                assert_eq!(up.new_level, 2);
                assert!(up.level_up);

                let down = spend_xp(tx, "G", "U", 1.0, TxKind::TradeEscrow, None, now())?;
                assert_eq!(down.new_level, 1);
                assert!(down.level_down);

                assert_eq!(ledger_sum(tx, "G", "U", Currency::Xp)?, 124.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn kind_filter() {
        let store = fresh();
        store
            .with_tx(|tx| {
                add_coins(tx, "G", "U", 5.0, TxKind::CaptureWin, None, now())?;
                add_coins(tx, "G", "U", 5.0, TxKind::Seed, None, now())?;
                let wins = get_transactions(tx, "G", "U", 10, Some("capture_win"))?;
                assert_eq!(wins.len(), 1);
                assert_eq!(wins[0].kind, "capture_win");
                Ok(())
            })
            .unwrap();
    }
}
