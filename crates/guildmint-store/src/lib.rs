//! guildmint-store — the persistent state layer.
//!
//! A single process-wide SQLite handle behind a mutex, a scoped transaction
//! primitive, startup schema migration, online backups with rotation and
//! auto-recovery, and the shared row helpers (guild settings, cooldowns,
//! daily tracking, activity analytics) the engines build on.

pub mod analytics;
pub mod backup;
pub mod cooldowns;
pub mod schema;
pub mod settings;
pub mod store;
pub mod tracking;

pub use store::Store;
