//! ─── Guildmint economy constants ─────────────────────────────────────────────
//!
//! Tuning values shared across the engines. Per-guild overrides for the
//! taxable/cooldown values live in the `guild_settings` row; these are the
//! process-wide invariants.

// ── Levels ───────────────────────────────────────────────────────────────────

/// XP-to-level divisor: `level = floor(sqrt(xp / LEVEL_MULTIPLIER)) + 1`.
pub const LEVEL_MULTIPLIER: f64 = 125.0;

// ── Capture ──────────────────────────────────────────────────────────────────

/// Minimum coins a capture attempt may stake.
pub const CAPTURE_MIN_STAKE: i64 = 10;

/// Maximum coins a capture attempt may stake.
pub const CAPTURE_MAX_STAKE: i64 = 1_000;

/// Base success probability before level/stake/luck bonuses.
pub const CAPTURE_BASE_ODDS: f64 = 0.30;

/// Per-level odds bonus (level 1 contributes nothing).
pub const CAPTURE_LEVEL_BONUS: f64 = 0.01;

/// Cap on the level bonus.
pub const CAPTURE_LEVEL_BONUS_MAX: f64 = 0.20;

/// Per-coin stake bonus.
pub const CAPTURE_STAKE_BONUS: f64 = 0.0003;

/// Cap on the stake bonus (reached at 500 coins).
pub const CAPTURE_STAKE_BONUS_MAX: f64 = 0.15;

/// Hard ceiling on total capture odds, luck items included.
pub const CAPTURE_ODDS_CEILING: f64 = 0.75;

/// Default capture cooldown when the guild row carries no override.
pub const CAPTURE_COOLDOWN_SECS: i64 = 60;

// ── Duel ─────────────────────────────────────────────────────────────────────

/// Minimum coins each duelist bets.
pub const DUEL_MIN_BET: i64 = 10;

/// Maximum coins each duelist bets.
pub const DUEL_MAX_BET: i64 = 500;

/// Odds shift per level of difference between the duelists.
pub const DUEL_LEVEL_SHIFT: f64 = 0.02;

/// Cap on the odds shift.
pub const DUEL_LEVEL_SHIFT_MAX: f64 = 0.20;

/// Default challenger cooldown when the guild row carries no override.
pub const DUEL_COOLDOWN_SECS: i64 = 300;

// ── Trades ───────────────────────────────────────────────────────────────────

/// Escrow holding period between acceptance and completion.
pub const ESCROW_DURATION_MINUTES: i64 = 5;

/// Default trade/duel tax when the guild row carries no override.
pub const DEFAULT_TAX_PERCENT: f64 = 10.0;

/// Default daily XP transfer cap: percent of the sender's XP...
pub const DEFAULT_XP_CAP_PERCENT: f64 = 10.0;

/// ...bounded by this absolute maximum.
pub const DEFAULT_XP_CAP_MAX: f64 = 500.0;

// ── Quests ───────────────────────────────────────────────────────────────────

/// Guaranteed daily quest assignments.
pub const DAILY_QUESTS_GUARANTEED: usize = 1;

/// Additional daily templates each offered with 50% probability.
pub const DAILY_QUESTS_RANDOM: usize = 2;

/// Probability that each random slot is filled.
pub const DAILY_QUEST_RANDOM_CHANCE: f64 = 0.5;

// ── Streaks ──────────────────────────────────────────────────────────────────

/// Streak length thresholds paired with their reward multipliers,
/// highest first.
pub const STREAK_MULTIPLIERS: [(i64, f64); 3] = [(30, 2.5), (14, 2.0), (7, 1.5)];

// ── Moderation ───────────────────────────────────────────────────────────────

/// Warn count that triggers the first automatic mute.
pub const AUTO_MUTE_WARN_2: i64 = 2;

/// Warn count that triggers the long automatic mute.
pub const AUTO_MUTE_WARN_3: i64 = 3;

/// Default mute durations (seconds) for the two thresholds.
pub const MUTE_DURATION_WARN_2_SECS: i64 = 3_600;
pub const MUTE_DURATION_WARN_3_SECS: i64 = 86_400;

/// Default decay windows (days) per warn count; 4+ uses the fallback.
pub const WARN_1_DECAY_DAYS: i64 = 7;
pub const WARN_2_DECAY_DAYS: i64 = 14;
pub const WARN_3_DECAY_DAYS: i64 = 21;
pub const WARN_FALLBACK_DECAY_DAYS: i64 = 28;

/// Minimum interval between appeal submissions by the same user.
pub const APPEAL_COOLDOWN_HOURS: i64 = 48;

// ── Voice XP ─────────────────────────────────────────────────────────────────

/// XP awarded per full hour in voice: uniform in this inclusive range.
pub const VOICE_XP_PER_HOUR_MIN: i64 = 15;
pub const VOICE_XP_PER_HOUR_MAX: i64 = 25;

// ── Backups ──────────────────────────────────────────────────────────────────

/// Snapshots retained before the oldest is deleted (configurable override).
pub const DEFAULT_MAX_BACKUPS: usize = 10;

// ── HTTP API ─────────────────────────────────────────────────────────────────

/// Default dashboard API port.
pub const DEFAULT_API_PORT: u16 = 5000;

/// Shared secret the operator is expected to replace.
pub const DEFAULT_API_SECRET: &str = "change-me";

/// Leaderboard page size ceiling.
pub const LEADERBOARD_MAX_LIMIT: i64 = 100;
