//! guildmint-minigame — capture attempts and arena duels.
//!
//! Probabilistic outcomes with stakes. The RNG is injected so the suites
//! can pin outcomes; every payout path runs inside one store transaction so
//! a mid-operation failure leaves balances untouched.

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use guildmint_core::constants::{
    CAPTURE_BASE_ODDS, CAPTURE_LEVEL_BONUS, CAPTURE_LEVEL_BONUS_MAX, CAPTURE_MAX_STAKE,
    CAPTURE_MIN_STAKE, CAPTURE_ODDS_CEILING, CAPTURE_STAKE_BONUS, CAPTURE_STAKE_BONUS_MAX,
    DUEL_LEVEL_SHIFT, DUEL_LEVEL_SHIFT_MAX, DUEL_MAX_BET, DUEL_MIN_BET,
};
use guildmint_core::time::fmt_ts;
use guildmint_core::types::TxKind;
use guildmint_core::MintError;
use guildmint_ledger::level_from_xp;
use guildmint_store::cooldowns::{check_cooldown, set_cooldown};
use guildmint_store::settings::get_guild_settings;
use guildmint_store::Store;

// ── Odds ─────────────────────────────────────────────────────────────────────

/// Capture odds before luck items: base 30%, up to +20% from levels above
/// the first, up to +15% from the stake.
pub fn capture_odds(user_xp: f64, stake: f64) -> f64 {
    let level = level_from_xp(user_xp);
    let level_bonus = (((level - 1) as f64) * CAPTURE_LEVEL_BONUS).min(CAPTURE_LEVEL_BONUS_MAX);
    let stake_bonus = (stake * CAPTURE_STAKE_BONUS).min(CAPTURE_STAKE_BONUS_MAX);
    CAPTURE_BASE_ODDS + level_bonus + stake_bonus
}

/// Win odds for both duelists: 50/50 shifted 2% per level of difference,
/// capped at ±20%.
pub fn duel_odds(user1_xp: f64, user2_xp: f64) -> (f64, f64) {
    let level_diff = level_from_xp(user1_xp) - level_from_xp(user2_xp);
    let shift = ((level_diff.abs() as f64) * DUEL_LEVEL_SHIFT).min(DUEL_LEVEL_SHIFT_MAX);
    match level_diff.signum() {
        1 => (0.50 + shift, 0.50 - shift),
        -1 => (0.50 - shift, 0.50 + shift),
        _ => (0.50, 0.50),
    }
}

/// Luck bonus from an active `capture_luck` effect, if any.
pub fn capture_luck_bonus(
    conn: &Connection,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<f64, MintError> {
    let effect = guildmint_shop::has_active_effect(conn, guild, user, "capture_luck", now)?;
    Ok(effect
        .and_then(|e| e.effect_data.get("bonus").and_then(|b| b.as_f64()))
        .unwrap_or(0.0))
}

// ── Capture ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub success: bool,
    pub roll: f64,
    pub odds: f64,
    pub stake: f64,
    /// Gross payout on success (stake included), zero on failure.
    pub winnings: f64,
    /// Signed coin delta applied to the balance.
    pub net_gain: f64,
    pub xp_gained: f64,
    pub level_up: bool,
    pub new_level: i64,
}

/// One capture attempt. Stake bounds, cooldown, odds roll, payout — all
/// inside a single transaction.
pub fn capture<R: Rng>(
    store: &Store,
    guild: &str,
    user: &str,
    stake: f64,
    luck_bonus: f64,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<CaptureResult, MintError> {
    if stake < CAPTURE_MIN_STAKE as f64 || stake > CAPTURE_MAX_STAKE as f64 {
        return Err(MintError::StakeOutOfRange {
            min: CAPTURE_MIN_STAKE,
            max: CAPTURE_MAX_STAKE,
        });
    }

    store.with_tx(|tx| {
        let settings = get_guild_settings(tx, guild)?;
        if let Some(remaining) = check_cooldown(
            tx,
            guild,
            user,
            "capture",
            settings.capture_cooldown_seconds,
            now,
        )? {
            return Err(MintError::OnCooldown {
                action: "capture".into(),
                remaining,
            });
        }

        let balance = guildmint_ledger::ensure_user(tx, guild, user)?;
        if balance.coins < stake {
            return Err(MintError::InsufficientFunds {
                currency: "coins",
                have: balance.coins,
                need: stake,
            });
        }

        let odds = (capture_odds(balance.xp, stake) + luck_bonus).min(CAPTURE_ODDS_CEILING);
        let roll: f64 = rng.gen();
        let success = roll < odds;

        set_cooldown(tx, guild, user, "capture", now)?;
        tx.execute(
            "UPDATE user_daily_tracking SET last_capture_at = ?1
             WHERE guildId = ?2 AND userId = ?3",
            rusqlite::params![fmt_ts(now), guild, user],
        )?;

        if success {
            // Longer odds pay better: 2x plus the inverse of the odds.
            let multiplier = 2.0 + (1.0 - odds);
            let winnings = (stake * multiplier).floor();
            let xp_gain = (stake * 0.1).floor();

            guildmint_ledger::add_coins(
                tx,
                guild,
                user,
                winnings - stake,
                TxKind::CaptureWin,
                None,
                now,
            )?;
            let xp = guildmint_ledger::add_xp(
                tx,
                guild,
                user,
                xp_gain,
                TxKind::CaptureWin,
                None,
                now,
            )?;

            info!(guild, user, stake, winnings, "capture succeeded");
            Ok(CaptureResult {
                success: true,
                roll,
                odds,
                stake,
                winnings,
                net_gain: winnings - stake,
                xp_gained: xp_gain,
                level_up: xp.level_up,
                new_level: xp.new_level,
            })
        } else {
            let xp_consolation = (stake * 0.02).floor().max(1.0);

            guildmint_ledger::spend_coins(
                tx,
                guild,
                user,
                stake,
                TxKind::CaptureLoss,
                None,
                now,
            )?;
            let xp = guildmint_ledger::add_xp(
                tx,
                guild,
                user,
                xp_consolation,
                TxKind::CaptureConsolation,
                None,
                now,
            )?;

            info!(guild, user, stake, "capture failed");
            Ok(CaptureResult {
                success: false,
                roll,
                odds,
                stake,
                winnings: 0.0,
                net_gain: -stake,
                xp_gained: xp_consolation,
                level_up: xp.level_up,
                new_level: xp.new_level,
            })
        }
    })
}

// ── Duel ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DuelResult {
    pub winner_id: String,
    pub loser_id: String,
    pub roll: f64,
    pub challenger_odds: f64,
    pub opponent_odds: f64,
    pub bet: f64,
    pub total_pot: f64,
    pub tax: f64,
    pub winnings: f64,
    pub net_gain: f64,
    pub winner_xp_gained: f64,
    pub loser_xp_gained: f64,
    pub winner_level_up: bool,
    pub loser_level_up: bool,
}

/// A duel between `challenger` and `opponent` for `bet` coins each.
/// The challenger carries the cooldown; both need the funds. The winner
/// takes the pot minus the guild's duel tax.
pub fn duel<R: Rng>(
    store: &Store,
    guild: &str,
    challenger: &str,
    opponent: &str,
    bet: f64,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<DuelResult, MintError> {
    if challenger == opponent {
        return Err(MintError::SelfDuel);
    }
    if bet < DUEL_MIN_BET as f64 || bet > DUEL_MAX_BET as f64 {
        return Err(MintError::BetOutOfRange {
            min: DUEL_MIN_BET,
            max: DUEL_MAX_BET,
        });
    }

    store.with_tx(|tx| {
        let settings = get_guild_settings(tx, guild)?;
        if let Some(remaining) = check_cooldown(
            tx,
            guild,
            challenger,
            "duel",
            settings.duel_cooldown_seconds,
            now,
        )? {
            return Err(MintError::OnCooldown {
                action: "duel".into(),
                remaining,
            });
        }

        let challenger_row = guildmint_ledger::ensure_user(tx, guild, challenger)?;
        let opponent_row = guildmint_ledger::ensure_user(tx, guild, opponent)?;
        if challenger_row.coins < bet {
            return Err(MintError::InsufficientFunds {
                currency: "coins",
                have: challenger_row.coins,
                need: bet,
            });
        }
        if opponent_row.coins < bet {
            return Err(MintError::InsufficientFunds {
                currency: "coins",
                have: opponent_row.coins,
                need: bet,
            });
        }

        let (challenger_odds, opponent_odds) = duel_odds(challenger_row.xp, opponent_row.xp);
        let roll: f64 = rng.gen();
        let challenger_wins = roll < challenger_odds;

        let total_pot = bet * 2.0;
        let tax = (total_pot * settings.duel_tax_percent / 100.0).floor();
        let winnings = total_pot - tax;
        let net_gain = winnings - bet;

        set_cooldown(tx, guild, challenger, "duel", now)?;
        tx.execute(
            "UPDATE user_daily_tracking SET last_duel_at = ?1
             WHERE guildId = ?2 AND userId = ?3",
            rusqlite::params![fmt_ts(now), guild, challenger],
        )?;

        let (winner, loser) = if challenger_wins {
            (challenger, opponent)
        } else {
            (opponent, challenger)
        };

        guildmint_ledger::spend_coins(tx, guild, loser, bet, TxKind::DuelLoss, None, now)?;
        guildmint_ledger::add_coins_with_metadata(
            tx,
            guild,
            winner,
            net_gain,
            TxKind::DuelWin,
            json!({ "tax": tax, "opponent": loser }),
            None,
            now,
        )?;

        let winner_xp_gain = (bet * 0.1).floor();
        let loser_xp_gain = (bet * 0.02).floor().max(1.0);
        let winner_xp =
            guildmint_ledger::add_xp(tx, guild, winner, winner_xp_gain, TxKind::DuelWin, None, now)?;
        let loser_xp = guildmint_ledger::add_xp(
            tx,
            guild,
            loser,
            loser_xp_gain,
            TxKind::DuelConsolation,
            None,
            now,
        )?;

        info!(guild, winner, loser, bet, tax, "duel resolved");
        Ok(DuelResult {
            winner_id: winner.to_string(),
            loser_id: loser.to_string(),
            roll,
            challenger_odds,
            opponent_odds,
            bet,
            total_pot,
            tax,
            winnings,
            net_gain,
            winner_xp_gained: winner_xp_gain,
            loser_xp_gained: loser_xp_gain,
            winner_level_up: winner_xp.level_up,
            loser_level_up: loser_xp.level_up,
        })
    })
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MinigameStats {
    pub attempts: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: f64,
    pub total_winnings: f64,
    pub total_losses: f64,
    pub net_profit: f64,
}

fn stats_for_kinds(
    conn: &Connection,
    guild: &str,
    user: &str,
    win_kind: &str,
    loss_kind: &str,
) -> Result<MinigameStats, MintError> {
    let count_of = |kind: &str| -> Result<i64, MintError> {
        conn.query_row(
            "SELECT COUNT(*) FROM transactions
             WHERE guildId = ?1 AND userId = ?2 AND kind = ?3 AND currency = 'coins'",
            [guild, user, kind],
            |row| row.get(0),
        )
        .map_err(MintError::from)
    };
    let wins = count_of(win_kind)?;
    let losses = count_of(loss_kind)?;

    let total_winnings: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions
         WHERE guildId = ?1 AND userId = ?2 AND kind = ?3 AND currency = 'coins'",
        [guild, user, win_kind],
        |row| row.get(0),
    )?;
    let total_losses: f64 = conn.query_row(
        "SELECT COALESCE(SUM(ABS(amount)), 0) FROM transactions
         WHERE guildId = ?1 AND userId = ?2 AND kind = ?3 AND currency = 'coins'",
        [guild, user, loss_kind],
        |row| row.get(0),
    )?;

    let attempts = wins + losses;
    let win_rate = if attempts > 0 {
        (wins as f64 / attempts as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    Ok(MinigameStats {
        attempts,
        wins,
        losses,
        win_rate,
        total_winnings,
        total_losses,
        net_profit: total_winnings - total_losses,
    })
}

/// Capture win/loss aggregates derived from the ledger.
pub fn capture_stats(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<MinigameStats, MintError> {
    stats_for_kinds(conn, guild, user, "capture_win", "capture_loss")
}

/// Duel win/loss aggregates derived from the ledger.
pub fn duel_stats(conn: &Connection, guild: &str, user: &str) -> Result<MinigameStats, MintError> {
    stats_for_kinds(conn, guild, user, "duel_win", "duel_loss")
}
