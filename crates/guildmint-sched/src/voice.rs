//! Voice-session XP accrual.
//!
//! Sessions are tracked in memory: the dispatcher reports joins and
//! leaves, and the 5-minute sweep awards `randint(15, 25)` XP per *full*
//! hour elapsed, then advances each session clock by exactly the hours it
//! paid for — partial hours roll over to the next sweep.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::info;

use guildmint_core::constants::{VOICE_XP_PER_HOUR_MAX, VOICE_XP_PER_HOUR_MIN};
use guildmint_core::types::TxKind;
use guildmint_core::MintError;
use guildmint_store::Store;

#[derive(Default)]
pub struct VoiceTracker {
    /// `(guild, user)` → last instant XP was settled up to.
    sessions: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceAward {
    pub guild_id: String,
    pub user_id: String,
    pub hours: i64,
    pub xp: f64,
}

impl VoiceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A member joined voice; starts (or restarts) their session clock.
    pub fn join(&self, guild: &str, user: &str, now: DateTime<Utc>) {
        self.sessions
            .lock()
            .unwrap()
            .insert((guild.to_string(), user.to_string()), now);
    }

    /// A member left voice; the unsettled partial hour is forfeited.
    pub fn leave(&self, guild: &str, user: &str) {
        self.sessions
            .lock()
            .unwrap()
            .remove(&(guild.to_string(), user.to_string()));
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Award XP for every full hour elapsed per tracked session.
    pub fn sweep<R: Rng>(
        &self,
        store: &Store,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Vec<VoiceAward>, MintError> {
        // Snapshot under the lock, settle against the store outside it.
        let snapshot: Vec<((String, String), DateTime<Utc>)> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let mut awards = Vec::new();
        for ((guild, user), last_settled) in snapshot {
            let hours = (now - last_settled).num_hours();
            if hours < 1 {
                continue;
            }
            let per_hour = rng.gen_range(VOICE_XP_PER_HOUR_MIN..=VOICE_XP_PER_HOUR_MAX);
            let xp = (per_hour * hours) as f64;

            store.with_tx(|tx| {
                guildmint_ledger::add_xp(tx, &guild, &user, xp, TxKind::VoiceXp, None, now)?;
                Ok(())
            })?;

            if let Some(entry) = self
                .sessions
                .lock()
                .unwrap()
                .get_mut(&(guild.clone(), user.clone()))
            {
                *entry = *entry + Duration::hours(hours);
            }

            info!(guild, user, hours, xp, "voice xp awarded");
            awards.push(VoiceAward {
                guild_id: guild,
                user_id: user,
                hours,
                xp,
            });
        }
        Ok(awards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use guildmint_ledger::get_balance;
    use guildmint_store::schema::migrate_in_memory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        migrate_in_memory(&store).unwrap();
        store
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 20, 0, 0).unwrap()
    }

    #[test]
    fn no_award_before_a_full_hour() {
        let store = fresh();
        let tracker = VoiceTracker::new();
        let mut rng = StdRng::seed_from_u64(3);

        tracker.join("G", "U", t0());
        let awards = tracker
            .sweep(&store, &mut rng, t0() + Duration::minutes(59))
            .unwrap();
        assert!(awards.is_empty());
    }

    #[test]
    fn awards_per_full_hour_and_rolls_the_clock() {
        let store = fresh();
        let tracker = VoiceTracker::new();
        let mut rng = StdRng::seed_from_u64(3);

        tracker.join("G", "U", t0());
        let awards = tracker
            .sweep(&store, &mut rng, t0() + Duration::minutes(150))
            .unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].hours, 2);
        assert!(awards[0].xp >= 30.0 && awards[0].xp <= 50.0);

        let balance = store.with_conn(|c| get_balance(c, "G", "U")).unwrap();
        assert_eq!(balance.xp, awards[0].xp);

        // The leftover 30 minutes stay banked: another sweep 40 minutes
        // later crosses the next hour boundary.
        let later = t0() + Duration::minutes(190);
        let again = tracker.sweep(&store, &mut rng, later).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].hours, 1);
    }

    #[test]
    fn leaving_stops_accrual() {
        let store = fresh();
        let tracker = VoiceTracker::new();
        let mut rng = StdRng::seed_from_u64(3);

        tracker.join("G", "U", t0());
        tracker.leave("G", "U");
        let awards = tracker
            .sweep(&store, &mut rng, t0() + Duration::hours(5))
            .unwrap();
        assert!(awards.is_empty());
        assert_eq!(tracker.tracked_sessions(), 0);
    }
}
