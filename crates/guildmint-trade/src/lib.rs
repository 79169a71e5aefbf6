//! guildmint-trade — two-party offers with escrow.
//!
//! State machine: `pending → accepted → completed`, with `canceled`
//! reachable from `pending` (either party, no funds moved) and from
//! `accepted` (sender only, escrow refunded). Funds leave the sender
//! exactly once on acceptance and reach the recipient exactly once on
//! completion; the tax difference is retained, never credited anywhere.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{info, warn};

use guildmint_core::constants::ESCROW_DURATION_MINUTES;
use guildmint_core::time::{fmt_ts, parse_ts};
use guildmint_core::types::{Related, TxKind};
use guildmint_core::MintError;
use guildmint_ledger::level_from_xp;
use guildmint_store::settings::get_guild_settings;
use guildmint_store::tracking::{check_daily_xp_limit, record_xp_transfer};
use guildmint_store::Store;

// ── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: i64,
    pub guild_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub coins: f64,
    pub xp: f64,
    pub status: String,
    pub tax_coins: f64,
    pub tax_xp: f64,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub escrow_release_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Trade {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Trade {
            id: row.get("id")?,
            guild_id: row.get("guildId")?,
            from_user_id: row.get("fromUserId")?,
            to_user_id: row.get("toUserId")?,
            coins: row.get("coins")?,
            xp: row.get("xp")?,
            status: row.get("status")?,
            tax_coins: row.get("tax_coins")?,
            tax_xp: row.get("tax_xp")?,
            created_at: row.get("created_at")?,
            accepted_at: row.get("accepted_at")?,
            escrow_release_at: row.get("escrow_release_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub fn get_trade(conn: &Connection, trade_id: i64) -> Result<Option<Trade>, MintError> {
    conn.query_row("SELECT * FROM trades WHERE id = ?1", [trade_id], Trade::from_row)
        .optional()
        .map_err(MintError::from)
}

/// Pending trades the user has sent and received, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTrades {
    pub sent: Vec<Trade>,
    pub received: Vec<Trade>,
}

pub fn pending_trades_for_user(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<PendingTrades, MintError> {
    let fetch = |column: &str| -> Result<Vec<Trade>, MintError> {
        // `column` is one of two fixed identifiers below, never caller input.
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM trades
             WHERE guildId = ?1 AND {column} = ?2 AND status = 'pending'
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map([guild, user], Trade::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    };
    Ok(PendingTrades {
        sent: fetch("fromUserId")?,
        received: fetch("toUserId")?,
    })
}

// ── Offer creation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TradeOffer {
    pub trade_id: i64,
    pub coins: f64,
    pub xp: f64,
    pub tax_coins: f64,
    pub tax_xp: f64,
    pub net_coins: f64,
    pub net_xp: f64,
}

/// Create a pending offer. No funds move; taxes are computed now so the
/// recipient sees the net amounts up front.
pub fn create_trade(
    store: &Store,
    guild: &str,
    from_user: &str,
    to_user: &str,
    coins: f64,
    xp: f64,
    now: DateTime<Utc>,
) -> Result<TradeOffer, MintError> {
    if from_user == to_user {
        return Err(MintError::SelfTrade);
    }
    if coins < 0.0 || xp < 0.0 {
        return Err(MintError::NegativeAmount);
    }
    if coins <= 0.0 && xp <= 0.0 {
        return Err(MintError::ZeroAmount);
    }

    store.with_tx(|tx| {
        let settings = get_guild_settings(tx, guild)?;
        if xp > 0.0 && !settings.xp_trading_enabled {
            return Err(MintError::XpTradingDisabled);
        }

        let sender = guildmint_ledger::ensure_user(tx, guild, from_user)?;
        if sender.coins < coins {
            return Err(MintError::InsufficientFunds {
                currency: "coins",
                have: sender.coins,
                need: coins,
            });
        }
        if sender.xp < xp {
            return Err(MintError::InsufficientFunds {
                currency: "xp",
                have: sender.xp,
                need: xp,
            });
        }

        if xp > 0.0 {
            let cap = check_daily_xp_limit(
                tx,
                guild,
                from_user,
                sender.xp,
                xp,
                settings.daily_xp_transfer_cap_percent,
                settings.daily_xp_transfer_cap_max,
                now,
            )?;
            if !cap.allowed {
                return Err(MintError::DailyXpCapExceeded {
                    remaining: cap.limit - cap.current_transferred,
                    limit: cap.limit,
                });
            }
        }

        let duplicates: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trades
             WHERE guildId = ?1 AND fromUserId = ?2 AND toUserId = ?3 AND status = 'pending'",
            [guild, from_user, to_user],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            return Err(MintError::DuplicatePendingTrade);
        }

        let tax_coins = (coins * settings.trade_tax_percent / 100.0).floor();
        let tax_xp = (xp * settings.trade_tax_percent / 100.0).floor();

        tx.execute(
            "INSERT INTO trades (guildId, fromUserId, toUserId, coins, xp,
                                 status, tax_coins, tax_xp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8)",
            rusqlite::params![guild, from_user, to_user, coins, xp, tax_coins, tax_xp, fmt_ts(now)],
        )?;
        let trade_id = tx.last_insert_rowid();
        info!(guild, from_user, to_user, trade_id, coins, xp, "trade offered");

        Ok(TradeOffer {
            trade_id,
            coins,
            xp,
            tax_coins,
            tax_xp,
            net_coins: coins - tax_coins,
            net_xp: xp - tax_xp,
        })
    })
}

// ── Acceptance (escrow) ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AcceptResult {
    pub trade_id: i64,
    pub escrow_release_at: String,
    pub minutes_until_release: i64,
}

/// Accept a pending trade as its recipient. The sender's funds move into
/// escrow and a release timer starts. If the sender has spent the funds
/// since the offer, the trade self-cancels and the acceptance fails with
/// `TradeFundsGone`.
pub fn accept_trade(
    store: &Store,
    guild: &str,
    user: &str,
    trade_id: i64,
    now: DateTime<Utc>,
) -> Result<AcceptResult, MintError> {
    match try_accept(store, guild, user, trade_id, now) {
        Err(e @ MintError::TradeFundsGone(_)) => {
            // The acceptance transaction rolled back; persist the
            // self-cancel separately so the dead offer cannot be retried.
            store.with_tx(|tx| {
                tx.execute(
                    "UPDATE trades SET status = 'canceled' WHERE id = ?1 AND status = 'pending'",
                    [trade_id],
                )?;
                Ok(())
            })?;
            warn!(trade_id, "acceptance self-canceled: sender funds gone");
            Err(e)
        }
        other => other,
    }
}

fn try_accept(
    store: &Store,
    guild: &str,
    user: &str,
    trade_id: i64,
    now: DateTime<Utc>,
) -> Result<AcceptResult, MintError> {
    store.with_tx(|tx| {
        let trade = get_trade(tx, trade_id)?.ok_or(MintError::TradeNotFound(trade_id))?;
        if trade.guild_id != guild {
            return Err(MintError::TradeNotFound(trade_id));
        }
        if trade.to_user_id != user {
            return Err(MintError::NotTradeRecipient);
        }
        if trade.status != "pending" {
            return Err(MintError::TradeNotPending(trade.status));
        }

        // The sender may have spent the funds since offering.
        let sender = guildmint_ledger::ensure_user(tx, guild, &trade.from_user_id)?;
        if sender.coins < trade.coins {
            return Err(MintError::TradeFundsGone("coins"));
        }
        if sender.xp < trade.xp {
            return Err(MintError::TradeFundsGone("xp"));
        }

        if trade.coins > 0.0 {
            guildmint_ledger::spend_coins(
                tx,
                guild,
                &trade.from_user_id,
                trade.coins,
                TxKind::TradeEscrow,
                Some(Related::trade(trade_id)),
                now,
            )?;
        }
        if trade.xp > 0.0 {
            guildmint_ledger::spend_xp(
                tx,
                guild,
                &trade.from_user_id,
                trade.xp,
                TxKind::TradeEscrow,
                Some(Related::trade(trade_id)),
                now,
            )?;
        }

        let release_at = now + Duration::minutes(ESCROW_DURATION_MINUTES);
        tx.execute(
            "UPDATE trades SET status = 'accepted', accepted_at = ?1, escrow_release_at = ?2
             WHERE id = ?3",
            rusqlite::params![fmt_ts(now), fmt_ts(release_at), trade_id],
        )?;
        info!(trade_id, release_at = %fmt_ts(release_at), "trade accepted into escrow");

        Ok(AcceptResult {
            trade_id,
            escrow_release_at: fmt_ts(release_at),
            minutes_until_release: ESCROW_DURATION_MINUTES,
        })
    })
}

// ── Completion ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    pub trade_id: i64,
    pub recipient_id: String,
    pub sender_id: String,
    pub coins_received: f64,
    pub xp_received: f64,
    pub recipient_level_up: bool,
}

/// Complete an accepted trade once its escrow timer has elapsed: credit
/// the recipient net of tax and count the sender's XP against the daily
/// transfer window.
pub fn complete_trade(
    store: &Store,
    trade_id: i64,
    now: DateTime<Utc>,
) -> Result<CompleteResult, MintError> {
    store.with_tx(|tx| complete_trade_in(tx, trade_id, now))
}

fn complete_trade_in(
    conn: &Connection,
    trade_id: i64,
    now: DateTime<Utc>,
) -> Result<CompleteResult, MintError> {
    let trade = get_trade(conn, trade_id)?.ok_or(MintError::TradeNotFound(trade_id))?;
    if trade.status != "accepted" {
        return Err(MintError::TradeNotAccepted(trade.status));
    }

    let release_at = trade
        .escrow_release_at
        .as_deref()
        .map(parse_ts)
        .transpose()?
        .ok_or_else(|| MintError::Other(format!("trade {trade_id} has no escrow timer")))?;
    if now < release_at {
        return Err(MintError::EscrowNotReleased((release_at - now).num_seconds()));
    }

    let net_coins = trade.coins - trade.tax_coins;
    let net_xp = trade.xp - trade.tax_xp;

    if net_coins > 0.0 {
        guildmint_ledger::add_coins(
            conn,
            &trade.guild_id,
            &trade.to_user_id,
            net_coins,
            TxKind::TradeReceived,
            Some(Related::trade(trade_id)),
            now,
        )?;
    }
    let mut recipient_level_up = false;
    if net_xp > 0.0 {
        let change = guildmint_ledger::add_xp(
            conn,
            &trade.guild_id,
            &trade.to_user_id,
            net_xp,
            TxKind::TradeReceived,
            Some(Related::trade(trade_id)),
            now,
        )?;
        recipient_level_up = change.level_up;
        record_xp_transfer(conn, &trade.guild_id, &trade.from_user_id, trade.xp, now)?;
    }

    conn.execute(
        "UPDATE trades SET status = 'completed', completed_at = ?1 WHERE id = ?2",
        rusqlite::params![fmt_ts(now), trade_id],
    )?;
    info!(trade_id, "trade completed");

    Ok(CompleteResult {
        trade_id,
        recipient_id: trade.to_user_id,
        sender_id: trade.from_user_id,
        coins_received: net_coins,
        xp_received: net_xp,
        recipient_level_up,
    })
}

/// The escrow sweeper: complete every accepted trade whose release time
/// has passed. Failures are logged per trade and do not stop the sweep.
/// Returns the ids completed this pass.
pub fn sweep_ready_trades(store: &Store, now: DateTime<Utc>) -> Result<Vec<i64>, MintError> {
    let ready: Vec<i64> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM trades WHERE status = 'accepted' AND escrow_release_at <= ?1",
        )?;
        let ids = stmt
            .query_map([fmt_ts(now)], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })?;

    let mut completed = Vec::with_capacity(ready.len());
    for trade_id in ready {
        match complete_trade(store, trade_id, now) {
            Ok(_) => completed.push(trade_id),
            Err(e) => warn!(trade_id, error = %e, "sweeper failed to complete trade"),
        }
    }
    Ok(completed)
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CancelResult {
    pub trade_id: i64,
    pub refunded: bool,
}

/// Cancel a trade. Pending: either party, nothing to refund. Accepted:
/// sender only, escrowed funds return via `trade_refund` rows. Completed
/// and already-canceled trades reject.
pub fn cancel_trade(
    store: &Store,
    guild: &str,
    user: &str,
    trade_id: i64,
    now: DateTime<Utc>,
) -> Result<CancelResult, MintError> {
    store.with_tx(|tx| {
        let trade = get_trade(tx, trade_id)?.ok_or(MintError::TradeNotFound(trade_id))?;
        if trade.guild_id != guild {
            return Err(MintError::TradeNotFound(trade_id));
        }

        let is_sender = trade.from_user_id == user;
        let is_recipient = trade.to_user_id == user;
        if !is_sender && !is_recipient {
            return Err(MintError::NotTradeParty);
        }

        match trade.status.as_str() {
            "completed" => return Err(MintError::TradeAlreadyCompleted),
            "canceled" => return Err(MintError::TradeAlreadyCanceled),
            "accepted" => {
                if !is_sender {
                    return Err(MintError::EscrowCancelNotBySender);
                }
                if trade.coins > 0.0 {
                    guildmint_ledger::add_coins(
                        tx,
                        guild,
                        &trade.from_user_id,
                        trade.coins,
                        TxKind::TradeRefund,
                        Some(Related::trade(trade_id)),
                        now,
                    )?;
                }
                if trade.xp > 0.0 {
                    guildmint_ledger::add_xp(
                        tx,
                        guild,
                        &trade.from_user_id,
                        trade.xp,
                        TxKind::TradeRefund,
                        Some(Related::trade(trade_id)),
                        now,
                    )?;
                }
            }
            _ => {}
        }

        let refunded = trade.status == "accepted";
        tx.execute("UPDATE trades SET status = 'canceled' WHERE id = ?1", [trade_id])?;
        info!(trade_id, refunded, "trade canceled");

        Ok(CancelResult { trade_id, refunded })
    })
}

// ── XP transfer preview ──────────────────────────────────────────────────────

/// Informational level-impact preview shown before an XP trade; never
/// blocks anything.
#[derive(Debug, Clone, Serialize)]
pub struct XpTransferWarning {
    pub current_xp: f64,
    pub xp_to_transfer: f64,
    pub remaining_xp: f64,
    pub current_level: i64,
    pub new_level: i64,
    pub will_level_down: bool,
    pub levels_lost: i64,
}

pub fn xp_transfer_warning(
    store: &Store,
    guild: &str,
    user: &str,
    xp_amount: f64,
) -> Result<XpTransferWarning, MintError> {
    store.with_tx(|tx| {
        let balance = guildmint_ledger::ensure_user(tx, guild, user)?;
        let remaining = balance.xp - xp_amount;
        let current_level = level_from_xp(balance.xp);
        let new_level = level_from_xp(remaining.max(0.0));
        Ok(XpTransferWarning {
            current_xp: balance.xp,
            xp_to_transfer: xp_amount,
            remaining_xp: remaining,
            current_level,
            new_level,
            will_level_down: new_level < current_level,
            levels_lost: (current_level - new_level).max(0),
        })
    })
}

#[cfg(test)]
mod tests;
