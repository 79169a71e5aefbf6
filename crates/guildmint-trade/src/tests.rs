use super::*;
use chrono::TimeZone;
use guildmint_core::types::Currency;
use guildmint_ledger::{add_coins, add_xp, get_balance, get_transactions, ledger_sum, spend_coins};
use guildmint_store::schema::migrate_in_memory;

fn fresh() -> Store {
    let store = Store::open_in_memory().unwrap();
    migrate_in_memory(&store).unwrap();
    store
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap()
}

fn seed(store: &Store, user: &str, coins: f64, xp: f64) {
    store
        .with_tx(|tx| {
            if coins > 0.0 {
                add_coins(tx, "G", user, coins, TxKind::Seed, None, now())?;
            }
            if xp > 0.0 {
                add_xp(tx, "G", user, xp, TxKind::Seed, None, now())?;
            }
            Ok(())
        })
        .unwrap();
}

fn coins_of(store: &Store, user: &str) -> f64 {
    store.with_conn(|c| Ok(get_balance(c, "G", user)?.coins)).unwrap()
}

fn status_of(store: &Store, trade_id: i64) -> String {
    store
        .with_conn(|c| Ok(get_trade(c, trade_id)?.unwrap().status))
        .unwrap()
}

// ── Offer creation ───────────────────────────────────────────────────────────

#[test]
fn offer_guards() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);

    assert!(matches!(
        create_trade(&store, "G", "A", "A", 10.0, 0.0, now()),
        Err(MintError::SelfTrade)
    ));
    assert!(matches!(
        create_trade(&store, "G", "A", "B", 0.0, 0.0, now()),
        Err(MintError::ZeroAmount)
    ));
    assert!(matches!(
        create_trade(&store, "G", "A", "B", -5.0, 0.0, now()),
        Err(MintError::NegativeAmount)
    ));
    assert!(matches!(
        create_trade(&store, "G", "A", "B", 200.0, 0.0, now()),
        Err(MintError::InsufficientFunds { .. })
    ));
}

#[test]
fn offer_computes_tax_and_moves_no_funds() {
    // S2 preview: 50 coins at 10% → tax 5, net 45.
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);

    let offer = create_trade(&store, "G", "A", "B", 50.0, 0.0, now()).unwrap();
    assert_eq!(offer.tax_coins, 5.0);
    assert_eq!(offer.net_coins, 45.0);
    assert_eq!(coins_of(&store, "A"), 100.0, "no funds move on offer");
    assert_eq!(status_of(&store, offer.trade_id), "pending");
}

#[test]
fn duplicate_pending_offer_to_same_recipient_rejected() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    create_trade(&store, "G", "A", "B", 10.0, 0.0, now()).unwrap();
    assert!(matches!(
        create_trade(&store, "G", "A", "B", 20.0, 0.0, now()),
        Err(MintError::DuplicatePendingTrade)
    ));
    // A different recipient is fine.
    assert!(create_trade(&store, "G", "A", "C", 10.0, 0.0, now()).is_ok());
}

#[test]
fn xp_trading_can_be_disabled_per_guild() {
    let store = fresh();
    seed(&store, "A", 0.0, 1000.0);
    store
        .with_tx(|tx| {
            get_guild_settings(tx, "G")?;
            tx.execute("UPDATE guild_settings SET xp_trading_enabled = 0 WHERE guildId = 'G'", [])?;
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        create_trade(&store, "G", "A", "B", 0.0, 50.0, now()),
        Err(MintError::XpTradingDisabled)
    ));
}

#[test]
fn daily_xp_cap_blocks_oversized_offers() {
    let store = fresh();
    seed(&store, "A", 0.0, 10_000.0);

    // Cap = min(10% of 10_000, 500) = 500.
    assert!(matches!(
        create_trade(&store, "G", "A", "B", 0.0, 501.0, now()),
        Err(MintError::DailyXpCapExceeded { limit, .. }) if limit == 500.0
    ));
    assert!(create_trade(&store, "G", "A", "B", 0.0, 500.0, now()).is_ok());
}

// ── Happy path (S2) ──────────────────────────────────────────────────────────

#[test]
fn escrow_happy_path() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);

    let offer = create_trade(&store, "G", "A", "B", 50.0, 0.0, now()).unwrap();
    let accepted = accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap();
    assert_eq!(accepted.minutes_until_release, 5);

    // Funds left the sender on acceptance; recipient has nothing yet.
    assert_eq!(coins_of(&store, "A"), 50.0);
    assert_eq!(coins_of(&store, "B"), 0.0);
    assert_eq!(status_of(&store, offer.trade_id), "accepted");

    // One second past release the sweeper completes it.
    let release = now() + chrono::Duration::minutes(5) + chrono::Duration::seconds(1);
    let completed = sweep_ready_trades(&store, release).unwrap();
    assert_eq!(completed, vec![offer.trade_id]);

    assert_eq!(coins_of(&store, "A"), 50.0);
    assert_eq!(coins_of(&store, "B"), 45.0, "recipient gets net of tax");
    assert_eq!(status_of(&store, offer.trade_id), "completed");

    store
        .with_conn(|c| {
            // Sender: -50 escrow. Recipient: +45 received. Tax retained.
            let a_rows = get_transactions(c, "G", "A", 10, Some("trade_escrow"))?;
            assert_eq!(a_rows.len(), 1);
            assert_eq!(a_rows[0].amount, -50.0);
            let b_rows = get_transactions(c, "G", "B", 10, Some("trade_received"))?;
            assert_eq!(b_rows.len(), 1);
            assert_eq!(b_rows[0].amount, 45.0);
            assert_eq!(ledger_sum(c, "G", "A", Currency::Coins)?, 50.0);
            assert_eq!(ledger_sum(c, "G", "B", Currency::Coins)?, 45.0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn sweeper_ignores_unripe_escrow() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 50.0, 0.0, now()).unwrap();
    accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap();

    let early = now() + chrono::Duration::minutes(4);
    assert!(sweep_ready_trades(&store, early).unwrap().is_empty());
    assert_eq!(status_of(&store, offer.trade_id), "accepted");
}

#[test]
fn completion_records_sender_xp_against_daily_cap() {
    let store = fresh();
    seed(&store, "A", 0.0, 10_000.0);

    let offer = create_trade(&store, "G", "A", "B", 0.0, 300.0, now()).unwrap();
    accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap();
    let release = now() + chrono::Duration::minutes(6);
    sweep_ready_trades(&store, release).unwrap();

    // 300 of the 500 cap consumed: a 201-XP offer must fail, 200 succeeds.
    assert!(matches!(
        create_trade(&store, "G", "A", "C", 0.0, 201.0, release),
        Err(MintError::DailyXpCapExceeded { .. })
    ));
    assert!(create_trade(&store, "G", "A", "C", 0.0, 200.0, release).is_ok());
}

// ── Cancellation (S3) ────────────────────────────────────────────────────────

#[test]
fn cancel_pending_is_balance_neutral() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 30.0, 0.0, now()).unwrap();

    // The recipient may cancel a pending offer.
    let result = cancel_trade(&store, "G", "B", offer.trade_id, now()).unwrap();
    assert!(!result.refunded);
    assert_eq!(coins_of(&store, "A"), 100.0);
    store
        .with_conn(|c| {
            assert_eq!(get_transactions(c, "G", "A", 10, None)?.len(), 1, "only the seed row");
            Ok(())
        })
        .unwrap();
}

#[test]
fn cancel_during_escrow_refunds_sender_exactly() {
    // S3: accept then cancel before release → full refund, exact rows.
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 30.0, 0.0, now()).unwrap();
    accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap();
    assert_eq!(coins_of(&store, "A"), 70.0);

    // The recipient cannot cancel escrow.
    assert!(matches!(
        cancel_trade(&store, "G", "B", offer.trade_id, now()),
        Err(MintError::EscrowCancelNotBySender)
    ));

    let result = cancel_trade(&store, "G", "A", offer.trade_id, now()).unwrap();
    assert!(result.refunded);
    assert_eq!(coins_of(&store, "A"), 100.0);
    assert_eq!(coins_of(&store, "B"), 0.0);
    assert_eq!(status_of(&store, offer.trade_id), "canceled");

    store
        .with_conn(|c| {
            let escrow = get_transactions(c, "G", "A", 10, Some("trade_escrow"))?;
            let refund = get_transactions(c, "G", "A", 10, Some("trade_refund"))?;
            assert_eq!(escrow[0].amount, -30.0);
            assert_eq!(refund[0].amount, 30.0);
            assert_eq!(ledger_sum(c, "G", "A", Currency::Coins)?, 100.0);
            Ok(())
        })
        .unwrap();

    // A canceled escrow never completes.
    let release = now() + chrono::Duration::minutes(6);
    assert!(sweep_ready_trades(&store, release).unwrap().is_empty());
}

#[test]
fn terminal_states_reject_cancel() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 30.0, 0.0, now()).unwrap();
    accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap();
    sweep_ready_trades(&store, now() + chrono::Duration::minutes(6)).unwrap();

    assert!(matches!(
        cancel_trade(&store, "G", "A", offer.trade_id, now()),
        Err(MintError::TradeAlreadyCompleted)
    ));

    let offer2 = create_trade(&store, "G", "A", "B", 10.0, 0.0, now()).unwrap();
    cancel_trade(&store, "G", "A", offer2.trade_id, now()).unwrap();
    assert!(matches!(
        cancel_trade(&store, "G", "A", offer2.trade_id, now()),
        Err(MintError::TradeAlreadyCanceled)
    ));

    // An outsider is never a party.
    let offer3 = create_trade(&store, "G", "A", "B", 10.0, 0.0, now()).unwrap();
    assert!(matches!(
        cancel_trade(&store, "G", "X", offer3.trade_id, now()),
        Err(MintError::NotTradeParty)
    ));
}

// ── Acceptance re-check ──────────────────────────────────────────────────────

#[test]
fn acceptance_self_cancels_when_sender_spent_the_funds() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 80.0, 0.0, now()).unwrap();

    // Sender drains their balance before B accepts.
    store
        .with_tx(|tx| {
            spend_coins(tx, "G", "A", 50.0, TxKind::ShopPurchase, None, now())?;
            Ok(())
        })
        .unwrap();

    let err = accept_trade(&store, "G", "B", offer.trade_id, now()).unwrap_err();
    assert!(matches!(err, MintError::TradeFundsGone("coins")));
    assert_eq!(status_of(&store, offer.trade_id), "canceled");
    assert_eq!(coins_of(&store, "A"), 50.0, "no escrow debit happened");

    // Re-acceptance of the dead offer fails on status.
    assert!(matches!(
        accept_trade(&store, "G", "B", offer.trade_id, now()),
        Err(MintError::TradeNotPending(_))
    ));
}

#[test]
fn two_trades_race_for_the_same_funds() {
    // First acceptance wins the sender's funds; the second self-cancels.
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let t1 = create_trade(&store, "G", "A", "B", 80.0, 0.0, now()).unwrap();
    let t2 = create_trade(&store, "G", "A", "C", 80.0, 0.0, now()).unwrap();

    accept_trade(&store, "G", "B", t1.trade_id, now()).unwrap();
    let err = accept_trade(&store, "G", "C", t2.trade_id, now()).unwrap_err();
    assert!(matches!(err, MintError::TradeFundsGone("coins")));
    assert_eq!(status_of(&store, t1.trade_id), "accepted");
    assert_eq!(status_of(&store, t2.trade_id), "canceled");
}

#[test]
fn only_recipient_accepts() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    let offer = create_trade(&store, "G", "A", "B", 10.0, 0.0, now()).unwrap();
    assert!(matches!(
        accept_trade(&store, "G", "C", offer.trade_id, now()),
        Err(MintError::NotTradeRecipient)
    ));
    assert!(matches!(
        accept_trade(&store, "G", "A", offer.trade_id, now()),
        Err(MintError::NotTradeRecipient)
    ));
}

// ── Preview ──────────────────────────────────────────────────────────────────

#[test]
fn xp_transfer_warning_reports_level_impact() {
    let store = fresh();
    seed(&store, "A", 0.0, 500.0); // level 3

    let warning = xp_transfer_warning(&store, "G", "A", 400.0).unwrap();
    assert_eq!(warning.current_level, 3);
    assert_eq!(warning.new_level, 1, "100 xp is level 1");
    assert!(warning.will_level_down);
    assert_eq!(warning.levels_lost, 2);

    let harmless = xp_transfer_warning(&store, "G", "A", 10.0).unwrap();
    assert!(!harmless.will_level_down);
    assert_eq!(harmless.levels_lost, 0);
}

#[test]
fn pending_listing_shows_both_directions() {
    let store = fresh();
    seed(&store, "A", 100.0, 0.0);
    seed(&store, "B", 100.0, 0.0);
    let sent = create_trade(&store, "G", "A", "B", 10.0, 0.0, now()).unwrap();
    let received = create_trade(&store, "G", "B", "A", 20.0, 0.0, now()).unwrap();

    let listing = store
        .with_conn(|c| pending_trades_for_user(c, "G", "A"))
        .unwrap();
    assert_eq!(listing.sent.len(), 1);
    assert_eq!(listing.sent[0].id, sent.trade_id);
    assert_eq!(listing.received.len(), 1);
    assert_eq!(listing.received[0].id, received.trade_id);
}
