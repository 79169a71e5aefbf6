//! guildmint-limiter — request gating and input hygiene.
//!
//! Two halves: the in-memory [`RateLimiter`] every command invocation passes
//! through (cooldown → per-user window → per-guild window, plus repeated
//! identical-command spam detection), and the [`validate`] module of input
//! validators the command handlers call before touching state.

pub mod ratelimit;
pub mod validate;

pub use ratelimit::{LimitCheck, LimitReason, RateLimitConfig, RateLimiter};
