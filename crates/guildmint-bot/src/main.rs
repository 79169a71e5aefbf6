//! guildmint-bot — the service binary.
//!
//! Startup sequence:
//!   1. Load the env-file configuration (appending any missing keys)
//!   2. Corruption-check the database file, auto-recovering from the
//!      newest valid snapshot if needed
//!   3. Open the store and run the schema migration
//!   4. Start the scheduler tasks and the dashboard HTTP API
//!   5. Mark ready, then wait for Ctrl-C and shut down cleanly

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use guildmint_api::ApiState;
use guildmint_core::config::BotConfig;
use guildmint_limiter::RateLimiter;
use guildmint_sched::{
    NullEvents, NullFeed, NullHooks, Scheduler, SchedulerContext, VoiceTracker,
};
use guildmint_store::{backup, schema, Store};

#[derive(Parser, Debug)]
#[command(
    name = "guildmint-bot",
    version,
    about = "Guildmint — community engagement and economy service"
)]
struct Args {
    /// Path to the KEY=VALUE environment file.
    #[arg(long, default_value = ".env")]
    config: PathBuf,

    /// Override the database path from the config file.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Override the dashboard API port from the config file.
    #[arg(long)]
    api_port: Option<u16>,

    /// Seconds between scheduled database backups.
    #[arg(long, default_value_t = 86_400)]
    backup_interval: u64,
}

/// The root of the process: owns the store, the in-memory limiter state,
/// the voice tracker and the scheduler handles. Components receive
/// borrows (Arcs) of what they need.
struct Bot {
    store: Arc<Store>,
    limiter: Arc<RateLimiter>,
    voice: Arc<VoiceTracker>,
    scheduler: Scheduler,
    api_task: tokio::task::JoinHandle<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A throwaway subscriber for the config-loading phase; the real one
    // needs the configured level.
    let config = {
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt().with_env_filter("info").finish(),
        );
        BotConfig::load(&args.config)
            .with_context(|| format!("loading configuration from {}", args.config.display()))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.env_filter().parse().expect("level filter")),
        )
        .init();

    info!("guildmint starting");

    let db_path = args.database.clone().unwrap_or_else(|| config.database_path.clone());
    let api_port = args.api_port.unwrap_or(config.api_port);
    let now = chrono::Utc::now();

    // ── Corruption check & recovery ───────────────────────────────────────────
    if db_path.exists() {
        match backup::auto_recover(&db_path, &config.backup_dir, now) {
            Ok(false) => info!("database passed the corruption check"),
            Ok(true) => warn!("database was recovered from the most recent snapshot"),
            Err(e) => return Err(e).context("database is corrupt and unrecoverable"),
        }
    }

    // ── Store & migration ─────────────────────────────────────────────────────
    let store = Arc::new(Store::open(&db_path).context("opening database")?);
    schema::migrate(&store, &config.backup_dir, config.max_backups, now)
        .context("running schema migration")?;

    // ── Shared components ─────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::default());
    let voice = Arc::new(VoiceTracker::new());
    let clock_origin = Instant::now();

    // ── Scheduler ─────────────────────────────────────────────────────────────
    // The chat client and the feed adapters are external processes; their
    // seams get the headless implementations here.
    let scheduler = Scheduler::start(SchedulerContext {
        store: Arc::clone(&store),
        limiter: Arc::clone(&limiter),
        voice: Arc::clone(&voice),
        platform: Arc::new(NullHooks),
        events: Arc::new(NullEvents),
        feed: Arc::new(NullFeed),
        backup_dir: config.backup_dir.clone(),
        max_backups: config.max_backups,
        backup_interval_secs: args.backup_interval,
        clock_origin,
    });

    // ── Dashboard API ─────────────────────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        store: Arc::clone(&store),
        api_secret: config.api_secret.clone(),
        cors_origins: config.cors_origins.clone(),
    });
    let api_task = tokio::spawn(async move {
        if let Err(e) = guildmint_api::serve(api_state, api_port).await {
            tracing::error!(error = %e, "dashboard API stopped");
        }
    });

    let bot = Bot {
        store,
        limiter,
        voice,
        scheduler,
        api_task,
    };

    bot.scheduler.mark_ready();
    info!(guild = %config.guild_id, "guildmint ready");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");

    // Stop taking new work, let running iterations finish, close the
    // store last.
    let Bot {
        store,
        limiter: _limiter,
        voice: _voice,
        scheduler,
        api_task,
    } = bot;
    api_task.abort();
    scheduler.shutdown().await;
    drop(store);
    info!("guildmint stopped");
    Ok(())
}
