use super::*;
use chrono::TimeZone;
use guildmint_store::schema::migrate_in_memory;

fn fresh() -> Store {
    let store = Store::open_in_memory().unwrap();
    migrate_in_memory(&store).unwrap();
    store
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 4, 18, 0, 0).unwrap()
}

fn history_actions(store: &Store, guild: &str, user: &str) -> Vec<String> {
    let mut actions: Vec<String> = store
        .with_conn(|c| warning_history(c, guild, user))
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    actions.reverse(); // chronological
    actions
}

#[test]
fn warn_escalation_and_appeal_lifecycle() {
    // S6 end to end.
    let store = fresh();

    let first = warn(&store, "G", "U", "mod1", "spamming", now()).unwrap();
    assert_eq!(first.warn_count, 1);
    assert!(first.auto_mute_seconds.is_none());

    let second = warn(&store, "G", "U", "mod1", "still spamming", now()).unwrap();
    assert_eq!(second.warn_count, 2);
    assert_eq!(second.auto_mute_seconds, Some(3600), "warn 2 → 1-hour mute");

    store
        .with_conn(|c| {
            let mute = active_mute(c, "G", "U")?.expect("mute must be active");
            assert_eq!(mute.moderator_id.as_deref(), Some("mod1"));
            Ok(())
        })
        .unwrap();
    assert_eq!(
        history_actions(&store, "G", "U"),
        vec!["warn_issued", "warn_issued", "mute_applied"]
    );

    let appeal_id = create_appeal(&store, "G", "U", "I will behave", now()).unwrap();
    let reviewed = review_appeal(
        &store,
        appeal_id,
        "mod2",
        AppealDecision::Approved,
        "ok",
        now(),
    )
    .unwrap();
    assert_eq!(reviewed.status, "approved");
    assert_eq!(reviewed.moderator_decision.as_deref(), Some("ok"));

    store
        .with_conn(|c| {
            assert_eq!(warning_count(c, "G", "U")?, 1);
            assert!(active_mute(c, "G", "U")?.is_none(), "mute lifted below threshold");
            Ok(())
        })
        .unwrap();
    assert_eq!(
        history_actions(&store, "G", "U"),
        vec![
            "warn_issued",
            "warn_issued",
            "mute_applied",
            "appeal_created",
            "appeal_reviewed",
            "warn_decreased",
            "mute_removed",
        ]
    );
}

#[test]
fn third_warn_applies_the_long_mute() {
    let store = fresh();
    for _ in 0..2 {
        warn(&store, "G", "U", "m", "r", now()).unwrap();
    }
    let third = warn(&store, "G", "U", "m", "r", now()).unwrap();
    assert_eq!(third.warn_count, 3);
    assert_eq!(third.auto_mute_seconds, Some(86_400));
}

#[test]
fn mute_durations_follow_guild_config() {
    let store = fresh();
    store
        .with_tx(|tx| {
            tx.execute(
                "INSERT INTO moderation_config (guild_id, mute_duration_warn_2) VALUES ('G', 120)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    let second = warn(&store, "G", "U", "m", "r", now()).unwrap();
    assert_eq!(second.auto_mute_seconds, Some(120));
}

#[test]
fn unwarn_floors_at_zero_and_lifts_mute() {
    let store = fresh();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    warn(&store, "G", "U", "m", "r", now()).unwrap();

    assert_eq!(unwarn(&store, "G", "U", Some("m"), None, now()).unwrap(), 1);
    assert_eq!(unwarn(&store, "G", "U", Some("m"), None, now()).unwrap(), 0);
    assert_eq!(unwarn(&store, "G", "U", Some("m"), None, now()).unwrap(), 0);

    store
        .with_conn(|c| {
            assert!(active_mute(c, "G", "U")?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn decay_boundary_is_exact() {
    let store = fresh();
    warn(&store, "G", "U", "m", "r", now()).unwrap();

    // One warning decays after 7 days; one second early is a no-op.
    let early = now() + Duration::days(7) - Duration::seconds(1);
    assert!(sweep_warn_decay(&store, early).unwrap().is_empty());
    store
        .with_conn(|c| {
            assert_eq!(warning_count(c, "G", "U")?, 1);
            Ok(())
        })
        .unwrap();

    let on_time = now() + Duration::days(7);
    let decayed = sweep_warn_decay(&store, on_time).unwrap();
    assert_eq!(decayed.len(), 1);
    assert_eq!(decayed[0].warn_count, 0);
    assert!(history_actions(&store, "G", "U").contains(&"warn_decay".to_string()));
}

#[test]
fn decay_window_scales_with_count() {
    let store = fresh();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    warn(&store, "G", "U", "m", "r", now()).unwrap();

    // Two warnings decay after 14 days, not 7.
    let after_seven = now() + Duration::days(7);
    assert!(sweep_warn_decay(&store, after_seven).unwrap().is_empty());

    let after_fourteen = now() + Duration::days(14);
    let decayed = sweep_warn_decay(&store, after_fourteen).unwrap();
    assert_eq!(decayed.len(), 1);
    assert_eq!(decayed[0].warn_count, 1);
}

#[test]
fn appeal_requires_warnings_and_uniqueness() {
    let store = fresh();
    assert!(matches!(
        create_appeal(&store, "G", "U", "please", now()),
        Err(MintError::NothingToAppeal)
    ));

    warn(&store, "G", "U", "m", "r", now()).unwrap();
    create_appeal(&store, "G", "U", "please", now()).unwrap();
    assert!(matches!(
        create_appeal(&store, "G", "U", "again", now()),
        Err(MintError::AppealAlreadyPending)
    ));
}

#[test]
fn appeal_cooldown_is_48_hours() {
    let store = fresh();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    let id = create_appeal(&store, "G", "U", "please", now()).unwrap();
    review_appeal(&store, id, "mod", AppealDecision::Denied, "no", now()).unwrap();

    store
        .with_conn(|c| {
            assert!(!can_submit_appeal(c, "G", "U", now() + Duration::hours(47))?);
            assert!(can_submit_appeal(c, "G", "U", now() + Duration::hours(48))?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn denied_appeal_changes_nothing() {
    let store = fresh();
    warn(&store, "G", "U", "m", "r", now()).unwrap();
    warn(&store, "G", "U", "m", "r", now()).unwrap();

    let id = create_appeal(&store, "G", "U", "please", now()).unwrap();
    let reviewed =
        review_appeal(&store, id, "mod", AppealDecision::Denied, "nope", now()).unwrap();
    assert_eq!(reviewed.status, "denied");

    store
        .with_conn(|c| {
            assert_eq!(warning_count(c, "G", "U")?, 2);
            assert!(active_mute(c, "G", "U")?.is_some());
            Ok(())
        })
        .unwrap();

    // A reviewed appeal cannot be re-reviewed.
    assert!(matches!(
        review_appeal(&store, id, "mod", AppealDecision::Approved, "x", now()),
        Err(MintError::AppealAlreadyReviewed(_))
    ));
}

#[test]
fn expired_mute_sweep() {
    let store = fresh();
    apply_mute(&store, "G", "U", Some("m"), "manual", 600, now()).unwrap();

    assert!(sweep_expired_mutes(&store, now() + Duration::seconds(599)).unwrap().is_empty());
    let lifted = sweep_expired_mutes(&store, now() + Duration::seconds(600)).unwrap();
    assert_eq!(lifted.len(), 1);
    assert_eq!(lifted[0].user_id, "U");
    store
        .with_conn(|c| {
            assert!(active_mute(c, "G", "U")?.is_none());
            Ok(())
        })
        .unwrap();
}
