//! Contracts to the out-of-scope chat client and the external feed
//! providers.
//!
//! The scheduler only decides *when* something should happen; delivery
//! (posting a message, removing a role, ending a timeout) and outbound
//! API traffic belong to the platform layer behind these traits. The
//! `Null*` implementations log and do nothing, which is what the binary
//! wires when it runs headless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use guildmint_core::MintError;

// ── Platform delivery ────────────────────────────────────────────────────────

#[async_trait]
pub trait PlatformHooks: Send + Sync {
    /// Post a message to a channel (or the guild default when `None`).
    async fn announce(&self, guild: &str, channel: Option<&str>, message: &str);

    /// Remove a role from a member (temp-role expiry).
    async fn remove_role(&self, guild: &str, user: &str, role: &str);

    /// End a platform timeout (mute expiry / lift).
    async fn end_timeout(&self, guild: &str, user: &str);
}

/// Headless delivery: log and drop.
pub struct NullHooks;

#[async_trait]
impl PlatformHooks for NullHooks {
    async fn announce(&self, guild: &str, channel: Option<&str>, message: &str) {
        debug!(guild, ?channel, message, "announce (headless)");
    }

    async fn remove_role(&self, guild: &str, user: &str, role: &str) {
        debug!(guild, user, role, "remove role (headless)");
    }

    async fn end_timeout(&self, guild: &str, user: &str) {
        debug!(guild, user, "end timeout (headless)");
    }
}

// ── Scheduled events ─────────────────────────────────────────────────────────

/// A platform-scheduled event the reminder task watches.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub channel_id: Option<String>,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn upcoming_events(&self, guild: &str) -> Result<Vec<ScheduledEvent>, MintError>;
}

pub struct NullEvents;

#[async_trait]
impl EventSource for NullEvents {
    async fn upcoming_events(&self, _guild: &str) -> Result<Vec<ScheduledEvent>, MintError> {
        Ok(Vec::new())
    }
}

// ── External feeds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub title: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
}

/// Opaque livestream / video providers. Implementations own their tokens
/// and HTTP; the poller only sees results.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Current stream if the streamer is live.
    async fn streamer_live(&self, name: &str) -> Result<Option<StreamInfo>, MintError>;

    /// Most recent video on a channel, if any.
    async fn latest_video(&self, handle: &str) -> Result<Option<VideoInfo>, MintError>;
}

pub struct NullFeed;

#[async_trait]
impl LiveFeed for NullFeed {
    async fn streamer_live(&self, _name: &str) -> Result<Option<StreamInfo>, MintError> {
        Ok(None)
    }

    async fn latest_video(&self, _handle: &str) -> Result<Option<VideoInfo>, MintError> {
        Ok(None)
    }
}
