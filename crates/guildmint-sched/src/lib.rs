//! guildmint-sched — the periodic task runner.
//!
//! Each pass is an ordinary function over the store so the suites drive
//! them with a virtual clock; the [`Scheduler`] wraps them in tokio loops
//! that wait for the readiness signal before the first run, observe the
//! shutdown channel at every iteration boundary, and log-and-continue on
//! errors. No pass holds a store transaction across an await.

pub mod hooks;
pub mod voice;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use guildmint_core::time::fmt_ts;
use guildmint_core::MintError;
use guildmint_limiter::RateLimiter;
use guildmint_store::{backup, Store};

pub use hooks::{
    EventSource, LiveFeed, NullEvents, NullFeed, NullHooks, PlatformHooks, ScheduledEvent,
    StreamInfo, VideoInfo,
};
pub use voice::{VoiceAward, VoiceTracker};

/// Outbound feed calls are bounded to this before the pass gives up and
/// defers to the next iteration.
const FEED_TIMEOUT: Duration = Duration::from_secs(10);

// ── Guild enumeration ────────────────────────────────────────────────────────

/// Guilds with any settings row; the per-guild passes iterate these.
pub fn known_guilds(conn: &Connection) -> Result<Vec<String>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT guildId FROM guild_settings
         UNION SELECT guild_id FROM engagement_config",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Temp-role expiry ─────────────────────────────────────────────────────────

/// Delete expired temporary-role rows and ask the platform to remove the
/// role. Returns `(guild, user, role)` triples that expired.
pub async fn run_temp_role_expiry(
    store: &Store,
    platform: &dyn PlatformHooks,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String, String)>, MintError> {
    let expired = store.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "SELECT guild_id, user_id, role_id FROM temp_roles WHERE expires_at <= ?1",
        )?;
        let rows = stmt
            .query_map([fmt_ts(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        tx.execute("DELETE FROM temp_roles WHERE expires_at <= ?1", [fmt_ts(now)])?;
        Ok(rows)
    })?;

    for (guild, user, role) in &expired {
        platform.remove_role(guild, user, role).await;
    }
    if !expired.is_empty() {
        info!(count = expired.len(), "temporary roles expired");
    }
    Ok(expired)
}

/// Grant a temporary role (used on member join by the dispatcher).
pub fn grant_temp_role(
    store: &Store,
    guild: &str,
    user: &str,
    role: &str,
    duration_days: i64,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    store.with_tx(|tx| {
        tx.execute(
            "INSERT INTO temp_roles (guild_id, user_id, role_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guild_id, user_id, role_id)
             DO UPDATE SET expires_at = excluded.expires_at",
            rusqlite::params![
                guild,
                user,
                role,
                fmt_ts(now + ChronoDuration::days(duration_days)),
                fmt_ts(now)
            ],
        )?;
        Ok(())
    })
}

// ── Event reminders ──────────────────────────────────────────────────────────

/// Emit the 24-hour and 1-hour reminders for upcoming events, deduplicated
/// through the `event_reminders` table. Returns `(event_id, reminder_type)`
/// pairs sent this pass.
pub async fn run_event_reminders(
    store: &Store,
    events: &dyn EventSource,
    platform: &dyn PlatformHooks,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, MintError> {
    let guilds = store.with_conn(known_guilds)?;
    let mut sent = Vec::new();

    for guild in guilds {
        let upcoming = match events.upcoming_events(&guild).await {
            Ok(list) => list,
            Err(e) => {
                warn!(guild, error = %e, "event enumeration failed; skipping guild");
                continue;
            }
        };

        for event in upcoming {
            let delta = event.start_time - now;
            let reminder_type = if delta >= ChronoDuration::hours(23)
                && delta <= ChronoDuration::hours(25)
            {
                "24h"
            } else if delta >= ChronoDuration::minutes(30)
                && delta <= ChronoDuration::minutes(90)
            {
                "1h"
            } else {
                continue;
            };

            let fresh = store.with_tx(|tx| {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO event_reminders
                     (guild_id, event_id, reminder_type, sent_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![guild, event.event_id, reminder_type, fmt_ts(now)],
                )?;
                Ok(inserted > 0)
            })?;
            if !fresh {
                continue;
            }

            let message = match reminder_type {
                "24h" => format!("Reminder: **{}** starts in 24 hours!", event.name),
                _ => format!("Reminder: **{}** starts in 1 hour!", event.name),
            };
            platform
                .announce(&guild, event.channel_id.as_deref(), &message)
                .await;
            sent.push((event.event_id.clone(), reminder_type.to_string()));
        }
    }
    Ok(sent)
}

// ── Weekly challenge ─────────────────────────────────────────────────────────

/// Next Monday 09:00 UTC strictly after `now`.
pub fn next_weekly_slot(now: DateTime<Utc>) -> DateTime<Utc> {
    let mut day = now.date_naive();
    loop {
        if day.weekday() == Weekday::Mon {
            let slot = Utc
                .with_ymd_and_hms(day.year(), day.month(), day.day(), 9, 0, 0)
                .unwrap();
            if slot > now {
                return slot;
            }
        }
        day = day.succ_opt().expect("calendar overflow");
    }
}

/// Post one random active template per guild and record it in the history.
pub async fn run_weekly_challenge<R: Rng>(
    store: &Store,
    platform: &dyn PlatformHooks,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<Vec<(String, i64)>, MintError> {
    let guilds = store.with_conn(known_guilds)?;
    let mut posted = Vec::new();

    for guild in guilds {
        let picked = store.with_tx(|tx| {
            let mut stmt =
                tx.prepare("SELECT id, name, description FROM quests WHERE active = 1")?;
            let all = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            if all.is_empty() {
                return Ok(None);
            }
            let (id, name, description) = all[rng.gen_range(0..all.len())].clone();
            tx.execute(
                "INSERT INTO weekly_challenge_history (guild_id, quest_id, posted_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![guild, id, fmt_ts(now)],
            )?;
            Ok(Some((id, name, description)))
        })?;

        if let Some((quest_id, name, description)) = picked {
            platform
                .announce(
                    &guild,
                    None,
                    &format!("This week's challenge: **{name}** — {description}"),
                )
                .await;
            posted.push((guild, quest_id));
        }
    }
    Ok(posted)
}

// ── Moderation sweeps ────────────────────────────────────────────────────────

/// Lift expired mutes and report through the platform hooks.
pub async fn run_mute_sweep(
    store: &Store,
    platform: &dyn PlatformHooks,
    now: DateTime<Utc>,
) -> Result<usize, MintError> {
    let lifted = guildmint_moderation::sweep_expired_mutes(store, now)?;
    for mute in &lifted {
        platform.end_timeout(&mute.guild_id, &mute.user_id).await;
    }
    Ok(lifted.len())
}

// ── External feed polling ────────────────────────────────────────────────────

/// Poll streamer and video subscriptions, deduping announcements through
/// the per-row state (announced flag / last-seen video id). Provider calls
/// are bounded by [`FEED_TIMEOUT`]; a timed-out row is retried next pass.
pub async fn run_feed_poll(
    store: &Store,
    feed: &dyn LiveFeed,
    platform: &dyn PlatformHooks,
) -> Result<usize, MintError> {
    let mut announcements = 0;

    // ── Streamers ─────────────────────────────────────────────────────────
    let streamers = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, streamer_name, announce_channel_id, announced FROM streamers",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    for (id, guild, name, channel, announced) in streamers {
        let live = match timeout(FEED_TIMEOUT, feed.streamer_live(&name)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(streamer = %name, error = %e, "stream check failed");
                continue;
            }
            Err(_) => {
                warn!(streamer = %name, "stream check timed out");
                continue;
            }
        };

        match live {
            Some(stream) if !announced => {
                platform
                    .announce(
                        &guild,
                        Some(&channel),
                        &format!("**{name}** is live: {} ({})", stream.title, stream.category),
                    )
                    .await;
                store.with_tx(|tx| {
                    tx.execute("UPDATE streamers SET announced = 1 WHERE id = ?1", [id])?;
                    Ok(())
                })?;
                announcements += 1;
            }
            None if announced => {
                store.with_tx(|tx| {
                    tx.execute("UPDATE streamers SET announced = 0 WHERE id = ?1", [id])?;
                    Ok(())
                })?;
            }
            _ => {}
        }
    }

    // ── Video channels ────────────────────────────────────────────────────
    let channels = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, channel_handle, announce_channel_id, last_video_id
             FROM youtube_channels",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    for (id, guild, handle, channel, last_seen) in channels {
        let video = match timeout(FEED_TIMEOUT, feed.latest_video(&handle)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(handle = %handle, error = %e, "video check failed");
                continue;
            }
            Err(_) => {
                warn!(handle = %handle, "video check timed out");
                continue;
            }
        };

        if let Some(video) = video {
            if last_seen.as_deref() != Some(video.video_id.as_str()) {
                platform
                    .announce(
                        &guild,
                        Some(&channel),
                        &format!("New video from **{handle}**: {}", video.title),
                    )
                    .await;
                store.with_tx(|tx| {
                    tx.execute(
                        "UPDATE youtube_channels SET last_video_id = ?1 WHERE id = ?2",
                        rusqlite::params![video.video_id, id],
                    )?;
                    Ok(())
                })?;
                announcements += 1;
            }
        }
    }

    Ok(announcements)
}

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Everything the periodic loops need, shared by reference.
pub struct SchedulerContext {
    pub store: Arc<Store>,
    pub limiter: Arc<RateLimiter>,
    pub voice: Arc<VoiceTracker>,
    pub platform: Arc<dyn PlatformHooks>,
    pub events: Arc<dyn EventSource>,
    pub feed: Arc<dyn LiveFeed>,
    pub backup_dir: PathBuf,
    pub max_backups: usize,
    /// Seconds between database backups.
    pub backup_interval_secs: u64,
    /// Monotonic origin shared with the command dispatcher so limiter
    /// timestamps and the cleanup cutoff live on one scale.
    pub clock_origin: Instant,
}

/// Owns the spawned loops. Dropping without [`Scheduler::shutdown`] aborts
/// them; orderly shutdown lets the current iteration finish.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn every periodic task. Nothing runs until [`Scheduler::mark_ready`].
    pub fn start(ctx: SchedulerContext) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (ready_tx, _) = watch::channel(false);
        let ctx = Arc::new(ctx);

        let mut handles = Vec::new();
        let mut spawn_interval = |name: &'static str,
                                  period: Duration,
                                  task: fn(Arc<SchedulerContext>) -> TaskFuture| {
            let ctx = Arc::clone(&ctx);
            let mut shutdown_rx = shutdown_tx.subscribe();
            let mut ready_rx = ready_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if wait_until_ready(&mut ready_rx, &mut shutdown_rx).await {
                    return;
                }
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            task(Arc::clone(&ctx)).await;
                        }
                        _ = shutdown_rx.changed() => {
                            info!(task = name, "scheduler task stopping");
                            return;
                        }
                    }
                }
            }));
        };

        spawn_interval("temp_roles", Duration::from_secs(3_600), |ctx| {
            Box::pin(async move {
                if let Err(e) =
                    run_temp_role_expiry(&ctx.store, ctx.platform.as_ref(), Utc::now()).await
                {
                    error!(error = %e, "temp-role expiry pass failed");
                }
            })
        });

        spawn_interval("event_reminders", Duration::from_secs(3_600), |ctx| {
            Box::pin(async move {
                if let Err(e) = run_event_reminders(
                    &ctx.store,
                    ctx.events.as_ref(),
                    ctx.platform.as_ref(),
                    Utc::now(),
                )
                .await
                {
                    error!(error = %e, "event reminder pass failed");
                }
            })
        });

        spawn_interval("trade_sweeper", Duration::from_secs(60), |ctx| {
            Box::pin(async move {
                match guildmint_trade::sweep_ready_trades(&ctx.store, Utc::now()) {
                    Ok(completed) if !completed.is_empty() => {
                        info!(count = completed.len(), "escrow sweeper completed trades");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "trade sweep failed"),
                }
            })
        });

        spawn_interval("mute_sweeper", Duration::from_secs(60), |ctx| {
            Box::pin(async move {
                if let Err(e) = run_mute_sweep(&ctx.store, ctx.platform.as_ref(), Utc::now()).await
                {
                    error!(error = %e, "mute sweep failed");
                }
            })
        });

        spawn_interval("warn_decay", Duration::from_secs(3_600), |ctx| {
            Box::pin(async move {
                match guildmint_moderation::sweep_warn_decay(&ctx.store, Utc::now()) {
                    Ok(decayed) if !decayed.is_empty() => {
                        info!(count = decayed.len(), "warnings decayed");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "warn decay pass failed"),
                }
            })
        });

        spawn_interval("voice_xp", Duration::from_secs(300), |ctx| {
            Box::pin(async move {
                let mut rng = StdRng::from_entropy();
                if let Err(e) = ctx.voice.sweep(&ctx.store, &mut rng, Utc::now()) {
                    error!(error = %e, "voice xp sweep failed");
                }
            })
        });

        spawn_interval("feed_poller", Duration::from_secs(300), |ctx| {
            Box::pin(async move {
                if let Err(e) =
                    run_feed_poll(&ctx.store, ctx.feed.as_ref(), ctx.platform.as_ref()).await
                {
                    error!(error = %e, "feed poll failed");
                }
            })
        });

        spawn_interval("limiter_cleanup", Duration::from_secs(600), |ctx| {
            Box::pin(async move {
                ctx.limiter.cleanup(ctx.clock_origin.elapsed().as_secs_f64());
            })
        });

        let backup_period = Duration::from_secs(ctx.backup_interval_secs.max(60));
        spawn_interval("db_backup", backup_period, |ctx| {
            Box::pin(async move {
                let result = backup::create_backup(&ctx.store, &ctx.backup_dir, Utc::now())
                    .and_then(|_| backup::rotate_backups(&ctx.backup_dir, ctx.max_backups));
                if let Err(e) = result {
                    error!(error = %e, "scheduled backup failed");
                }
            })
        });

        // ── Weekly challenge: anchored to Mondays 09:00 UTC ──────────────────
        {
            let ctx = Arc::clone(&ctx);
            let mut shutdown_rx = shutdown_tx.subscribe();
            let mut ready_rx = ready_tx.subscribe();
            handles.push(tokio::spawn(async move {
                if wait_until_ready(&mut ready_rx, &mut shutdown_rx).await {
                    return;
                }
                loop {
                    let now = Utc::now();
                    let slot = next_weekly_slot(now);
                    let sleep_for = (slot - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::from_secs(60));
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {
                            let mut rng = StdRng::from_entropy();
                            if let Err(e) = run_weekly_challenge(
                                &ctx.store,
                                ctx.platform.as_ref(),
                                &mut rng,
                                Utc::now(),
                            )
                            .await
                            {
                                error!(error = %e, "weekly challenge post failed");
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            info!(task = "weekly_challenge", "scheduler task stopping");
                            return;
                        }
                    }
                }
            }));
        }

        Scheduler {
            shutdown_tx,
            ready_tx,
            handles,
        }
    }

    /// Release the tasks for their first iteration.
    pub fn mark_ready(&self) {
        let _ = self.ready_tx.send(true);
        info!("scheduler released");
    }

    /// Signal shutdown and wait for every task to finish its iteration.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

type TaskFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Wait for the ready flag. Returns `true` if shutdown arrived first.
async fn wait_until_ready(
    ready_rx: &mut watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    while !*ready_rx.borrow() {
        tokio::select! {
            changed = ready_rx.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
            _ = shutdown_rx.changed() => return true,
        }
    }
    false
}
