//! Sliding-window rate limiting with per-command cooldowns and spam
//! detection.
//!
//! Time is injected as monotonic seconds so the tests drive a virtual
//! clock. State lives in process memory behind a mutex; the periodic
//! cleanup pass bounds growth by pruning idle entries.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Max requests per user inside `user_window_secs`.
    pub user_max_requests: usize,
    pub user_window_secs: f64,

    /// Max requests per guild inside `server_window_secs`.
    pub server_max_requests: usize,
    pub server_window_secs: f64,

    /// Identical consecutive commands from one user that trigger the spam
    /// block, and how long the block lasts.
    pub spam_threshold: u32,
    pub spam_window_secs: f64,

    /// Cooldown applied to commands without a specific override.
    pub default_cooldown_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            user_max_requests: 10,
            user_window_secs: 60.0,
            server_max_requests: 50,
            server_window_secs: 60.0,
            spam_threshold: 5,
            spam_window_secs: 10.0,
            default_cooldown_secs: 3.0,
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    Cooldown,
    UserRateLimit,
    ServerRateLimit,
}

impl LimitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitReason::Cooldown => "cooldown",
            LimitReason::UserRateLimit => "user_rate_limit",
            LimitReason::ServerRateLimit => "server_rate_limit",
        }
    }
}

/// Result of the combined check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitCheck {
    Allowed,
    Limited { retry_after: f64, reason: LimitReason },
}

impl LimitCheck {
    pub fn is_limited(&self) -> bool {
        matches!(self, LimitCheck::Limited { .. })
    }
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct WindowEntry {
    timestamps: Vec<f64>,
    last_command: String,
    same_command_count: u32,
}

impl WindowEntry {
    fn evict_older_than(&mut self, cutoff: f64) {
        self.timestamps.retain(|ts| *ts > cutoff);
    }
}

#[derive(Default)]
struct LimiterState {
    users: HashMap<String, WindowEntry>,
    guilds: HashMap<String, WindowEntry>,
    /// `(user, command)` → last use, for per-command cooldowns.
    cooldowns: HashMap<(String, String), f64>,
}

/// The process-wide limiter. Cheap to share behind an `Arc`; the HTTP
/// thread never touches it.
pub struct RateLimiter {
    config: RateLimitConfig,
    command_cooldowns: Mutex<HashMap<String, f64>>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            config,
            command_cooldowns: Mutex::new(HashMap::new()),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Override the cooldown for one command name.
    pub fn set_command_cooldown(&self, command: &str, cooldown_secs: f64) {
        self.command_cooldowns
            .lock()
            .unwrap()
            .insert(command.to_string(), cooldown_secs);
    }

    pub fn command_cooldown(&self, command: &str) -> f64 {
        self.command_cooldowns
            .lock()
            .unwrap()
            .get(command)
            .copied()
            .unwrap_or(self.config.default_cooldown_secs)
    }

    /// The combined gate every command invocation passes through, in order:
    /// per-command cooldown → user window → server window. A pass records
    /// the invocation in both windows and starts the next cooldown.
    pub fn check_all(
        &self,
        user: &str,
        guild: Option<&str>,
        command: &str,
        now: f64,
    ) -> LimitCheck {
        let cooldown = self.command_cooldown(command);
        let mut state = self.state.lock().unwrap();

        // ── Cooldown ─────────────────────────────────────────────────────────
        let key = (user.to_string(), command.to_string());
        if let Some(last) = state.cooldowns.get(&key) {
            let elapsed = now - last;
            if elapsed < cooldown {
                return LimitCheck::Limited {
                    retry_after: cooldown - elapsed,
                    reason: LimitReason::Cooldown,
                };
            }
        }

        // ── User window (and spam detection) ─────────────────────────────────
        let entry = state.users.entry(user.to_string()).or_default();
        entry.evict_older_than(now - self.config.user_window_secs);

        if entry.timestamps.len() >= self.config.user_max_requests {
            let oldest = entry.timestamps.iter().copied().fold(f64::INFINITY, f64::min);
            let retry_after = (oldest + self.config.user_window_secs - now).max(0.0);
            warn!(user, retry_after, "user rate limited");
            return LimitCheck::Limited {
                retry_after,
                reason: LimitReason::UserRateLimit,
            };
        }

        if entry.last_command == command {
            entry.same_command_count += 1;
            if entry.same_command_count >= self.config.spam_threshold {
                warn!(user, command, "spam detected");
                return LimitCheck::Limited {
                    retry_after: self.config.spam_window_secs,
                    reason: LimitReason::UserRateLimit,
                };
            }
        } else {
            entry.last_command = command.to_string();
            entry.same_command_count = 1;
        }
        entry.timestamps.push(now);

        // ── Server window ────────────────────────────────────────────────────
        if let Some(guild) = guild {
            let entry = state.guilds.entry(guild.to_string()).or_default();
            entry.evict_older_than(now - self.config.server_window_secs);

            if entry.timestamps.len() >= self.config.server_max_requests {
                let oldest = entry.timestamps.iter().copied().fold(f64::INFINITY, f64::min);
                let retry_after = (oldest + self.config.server_window_secs - now).max(0.0);
                warn!(guild, retry_after, "server rate limited");
                return LimitCheck::Limited {
                    retry_after,
                    reason: LimitReason::ServerRateLimit,
                };
            }
            entry.timestamps.push(now);
        }

        state.cooldowns.insert(key, now);
        LimitCheck::Allowed
    }

    /// Prune entries with empty windows and cooldowns older than an hour.
    /// Called by the scheduler's cleanup task.
    pub fn cleanup(&self, now: f64) {
        let mut state = self.state.lock().unwrap();

        let user_cutoff = now - self.config.user_window_secs;
        state.users.retain(|_, entry| {
            entry.evict_older_than(user_cutoff);
            !entry.timestamps.is_empty()
        });

        let guild_cutoff = now - self.config.server_window_secs;
        state.guilds.retain(|_, entry| {
            entry.evict_older_than(guild_cutoff);
            !entry.timestamps.is_empty()
        });

        let cooldown_cutoff = now - 3600.0;
        state.cooldowns.retain(|_, last| *last > cooldown_cutoff);
    }

    /// Number of tracked users (cleanup test hook).
    pub fn tracked_users(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        // No cooldown and no spam interference unless a test wants them.
        let config = RateLimitConfig {
            default_cooldown_secs: 0.0,
            spam_threshold: 1000,
            ..RateLimitConfig::default()
        };
        RateLimiter::new(config)
    }

    #[test]
    fn eleventh_request_in_window_is_limited() {
        let rl = limiter();
        for i in 0..10 {
            // Distinct commands defeat the spam counter, times inside one window.
            let check = rl.check_all("u", Some("g"), &format!("cmd{i}"), 100.0 + i as f64);
            assert_eq!(check, LimitCheck::Allowed, "request {i}");
        }
        match rl.check_all("u", Some("g"), "cmd10", 110.0) {
            LimitCheck::Limited { retry_after, reason } => {
                assert_eq!(reason, LimitReason::UserRateLimit);
                // Oldest was at t=100, window 60 → retries at t=160.
                assert!(retry_after > 0.0);
                assert!((retry_after - 50.0).abs() < 1e-9);
            }
            LimitCheck::Allowed => panic!("11th request must be limited"),
        }
    }

    #[test]
    fn window_slides() {
        let rl = limiter();
        for i in 0..10 {
            rl.check_all("u", None, &format!("cmd{i}"), 100.0 + i as f64);
        }
        // 61s after the oldest, one slot has freed up.
        assert_eq!(rl.check_all("u", None, "late", 161.0), LimitCheck::Allowed);
    }

    #[test]
    fn cooldown_blocks_repeat_and_reports_remaining() {
        let rl = RateLimiter::default();
        rl.set_command_cooldown("capture", 60.0);
        assert_eq!(rl.check_all("u", None, "capture", 10.0), LimitCheck::Allowed);
        match rl.check_all("u", None, "capture", 40.0) {
            LimitCheck::Limited { retry_after, reason } => {
                assert_eq!(reason, LimitReason::Cooldown);
                assert!((retry_after - 30.0).abs() < 1e-9);
            }
            LimitCheck::Allowed => panic!("must be on cooldown"),
        }
        assert_eq!(rl.check_all("u", None, "capture", 70.0), LimitCheck::Allowed);
    }

    #[test]
    fn spam_detection_trips_on_identical_commands() {
        let config = RateLimitConfig {
            default_cooldown_secs: 0.0,
            spam_threshold: 5,
            ..RateLimitConfig::default()
        };
        let rl = RateLimiter::new(config);
        let mut limited = None;
        for i in 0..6 {
            if let LimitCheck::Limited { retry_after, .. } =
                rl.check_all("u", None, "same", 10.0 + i as f64)
            {
                limited = Some((i, retry_after));
                break;
            }
        }
        let (at, retry_after) = limited.expect("spam must trigger");
        assert_eq!(at, 4, "fifth identical command trips the detector");
        assert_eq!(retry_after, 10.0);
    }

    #[test]
    fn server_window_limits_across_users() {
        let config = RateLimitConfig {
            default_cooldown_secs: 0.0,
            spam_threshold: 1000,
            server_max_requests: 3,
            ..RateLimitConfig::default()
        };
        let rl = RateLimiter::new(config);
        for i in 0..3 {
            let user = format!("u{i}");
            assert_eq!(
                rl.check_all(&user, Some("g"), "cmd", 10.0),
                LimitCheck::Allowed
            );
        }
        match rl.check_all("u99", Some("g"), "cmd", 10.0) {
            LimitCheck::Limited { reason, .. } => {
                assert_eq!(reason, LimitReason::ServerRateLimit)
            }
            LimitCheck::Allowed => panic!("server window must trip"),
        }
    }

    #[test]
    fn cleanup_prunes_idle_entries() {
        let rl = limiter();
        rl.check_all("u1", Some("g"), "a", 10.0);
        rl.check_all("u2", Some("g"), "b", 10.0);
        assert_eq!(rl.tracked_users(), 2);
        rl.cleanup(10_000.0);
        assert_eq!(rl.tracked_users(), 0);
    }
}
