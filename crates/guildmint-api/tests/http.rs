//! End-to-end test for the dashboard API.
//!
//! Starts the real axum app on a loopback port against an in-memory store
//! and asserts over HTTP.
//!
//! Run with:
//!   cargo test -p guildmint-api --test http

use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use guildmint_api::{serve, ApiState};
use guildmint_core::types::TxKind;
use guildmint_store::schema::migrate_in_memory;
use guildmint_store::Store;

const SECRET: &str = "test-secret";

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_for_api(client: &reqwest::Client, base: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(format!("{base}/api/health")).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Boot a server with seeded balances; returns the base URL and the store.
async fn start_server() -> (String, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    migrate_in_memory(&store).unwrap();

    let now = chrono::Utc::now();
    store
        .with_tx(|tx| {
            for (user, xp) in [("alice", 900.0), ("bob", 400.0), ("carol", 100.0)] {
                guildmint_ledger::add_xp(tx, "guild-1", user, xp, TxKind::Seed, None, now)?;
            }
            guildmint_ledger::add_coins(tx, "guild-1", "alice", 25.0, TxKind::Seed, None, now)?;
            Ok(())
        })
        .unwrap();

    let port = free_port();
    let state = Arc::new(ApiState {
        store: Arc::clone(&store),
        api_secret: SECRET.to_string(),
        cors_origins: Vec::new(),
    });
    tokio::spawn(async move {
        let _ = serve(state, port).await;
    });

    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();
    assert!(
        wait_for_api(&client, &base, Duration::from_secs(10)).await,
        "API did not become ready"
    );
    (base, store)
}

#[tokio::test]
async fn health_is_open_everything_else_is_keyed() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].is_string());

    // No key → 401 with the canonical error shape.
    let resp = client
        .get(format!("{base}/api/guilds/guild-1/leaderboard"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    // Wrong key → still 401.
    let resp = client
        .get(format!("{base}/api/guilds/guild-1/leaderboard"))
        .header("X-API-Key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn leaderboard_orders_by_xp_and_caps_limit() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{base}/api/guilds/guild-1/leaderboard?limit=2"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let rows = body["leaderboard"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["user_id"], "alice");
    assert_eq!(rows[1]["user_id"], "bob");

    // A limit beyond the cap is clamped rather than rejected.
    let resp = client
        .get(format!("{base}/api/guilds/guild-1/leaderboard?limit=100000"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn stats_endpoint_returns_all_sections() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{base}/api/guilds/guild-1/stats?period=30d"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["period"], "30d");
    assert_eq!(body["totals"]["total_users"], 3);
    assert_eq!(body["hourly_activity"].as_array().unwrap().len(), 24);
    assert_eq!(body["top_members"][0]["user_id"], "alice");

    let resp = client
        .get(format!("{base}/api/guilds/guild-1/stats?period=2y"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400, "unknown period is invalid input");
}

#[tokio::test]
async fn minigame_settings_update_respects_whitelist() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/guilds/guild-1/minigame-settings"))
        .header("X-API-Key", SECRET)
        .json(&serde_json::json!({
            "trade_tax_percent": 15.0,
            "guildId": "hijack",
            "bogus": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let settings: serde_json::Value = client
        .get(format!("{base}/api/guilds/guild-1/minigame-settings"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["trade_tax_percent"], 15.0);
    assert_eq!(settings["guild_id"], "guild-1", "identifier fields are not writable");

    // Nothing whitelisted → 400.
    let resp = client
        .post(format!("{base}/api/guilds/guild-1/minigame-settings"))
        .header("X-API-Key", SECRET)
        .json(&serde_json::json!({ "bogus": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn challenge_crud_round_trip() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();
    let challenges_url = format!("{base}/api/guilds/guild-1/challenges");

    let created: serde_json::Value = client
        .post(&challenges_url)
        .header("X-API-Key", SECRET)
        .json(&serde_json::json!({
            "name": "Marathon",
            "description": "Send 500 messages",
            "type": "event",
            "target_type": "messages_sent",
            "target_value": 500,
            "reward_coins": 1000,
            "reward_xp": 400,
            "rarity": "legendary"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let resp = client
        .put(format!("{challenges_url}/{id}"))
        .header("X-API-Key", SECRET)
        .json(&serde_json::json!({ "reward_coins": 1500, "unknown_field": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let listing: serde_json::Value = client
        .get(&challenges_url)
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ours = listing["challenges"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"] == id)
        .unwrap()
        .clone();
    assert_eq!(ours["reward_coins"], 1500);
    assert_eq!(ours["name"], "Marathon");

    let resp = client
        .delete(format!("{challenges_url}/{id}"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{challenges_url}/{id}"))
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404, "double delete is a not-found");
}

#[tokio::test]
async fn config_post_replaces_threshold_list() {
    let (base, _store) = start_server().await;
    let client = reqwest::Client::new();
    let config_url = format!("{base}/api/guilds/guild-1/config");

    let resp = client
        .post(&config_url)
        .header("X-API-Key", SECRET)
        .json(&serde_json::json!({
            "engagement": { "xp_per_message": 8, "not_a_field": 1 },
            "xp_thresholds": [
                { "threshold_points": 1000, "role_id": "r-gold", "role_name": "Gold" },
                { "threshold_points": 100, "role_id": "r-bronze" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let config: serde_json::Value = client
        .get(&config_url)
        .header("X-API-Key", SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["engagement"]["xp_per_message"], 8);
    let thresholds = config["xp_thresholds"].as_array().unwrap();
    assert_eq!(thresholds.len(), 2);
    // Ordered ascending by threshold.
    assert_eq!(thresholds[0]["role_id"], "r-bronze");
    assert_eq!(thresholds[1]["role_id"], "r-gold");
}
