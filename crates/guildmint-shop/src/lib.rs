//! guildmint-shop — priced items, consumable inventory and timed effects.
//!
//! Purchases debit coins and/or XP through the ledger in one transaction.
//! Consumables land in the inventory; using one with an `effect` descriptor
//! in its metadata upserts a timed row into the active-effects table, which
//! the minigame engine consults for luck bonuses.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use guildmint_core::time::fmt_ts;
use guildmint_core::types::{Related, TxKind};
use guildmint_core::MintError;
use guildmint_store::Store;

/// Fallback effect duration when an item's metadata omits it.
const DEFAULT_EFFECT_MINUTES: i64 = 60;

// ── Items ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ShopItem {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price_coins: i64,
    pub price_xp: i64,
    pub consumable: bool,
    pub stock: i64,
    pub metadata: Value,
    pub active: bool,
}

impl ShopItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = row.get("metadata")?;
        Ok(ShopItem {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            price_coins: row.get("price_coins")?,
            price_xp: row.get("price_xp")?,
            consumable: row.get::<_, i64>("consumable")? != 0,
            stock: row.get("stock")?,
            metadata: serde_json::from_str(&raw).unwrap_or(Value::Object(Default::default())),
            active: row.get::<_, i64>("active")? != 0,
        })
    }
}

/// Purchasable items (active, with stock remaining), cheapest first.
pub fn shop_items(conn: &Connection, active_only: bool) -> Result<Vec<ShopItem>, MintError> {
    let sql = if active_only {
        "SELECT * FROM shop_items WHERE active = 1 AND (stock = -1 OR stock > 0)
         ORDER BY price_coins, price_xp"
    } else {
        "SELECT * FROM shop_items ORDER BY price_coins, price_xp"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], ShopItem::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn shop_item(conn: &Connection, item_id: i64) -> Result<Option<ShopItem>, MintError> {
    conn.query_row(
        "SELECT * FROM shop_items WHERE id = ?1",
        [item_id],
        ShopItem::from_row,
    )
    .optional()
    .map_err(MintError::from)
}

// ── Purchases ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseResult {
    pub item_name: String,
    pub quantity: i64,
    pub coins_spent: i64,
    pub xp_spent: i64,
    pub is_consumable: bool,
    pub level_down: bool,
    pub new_level: Option<i64>,
}

/// Buy `quantity` of an item: validates activity, stock and funds, debits
/// through the ledger, decrements limited stock and fills the inventory for
/// consumables. One transaction end to end.
pub fn buy_item(
    store: &Store,
    guild: &str,
    user: &str,
    item_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> Result<PurchaseResult, MintError> {
    if quantity < 1 {
        return Err(MintError::ZeroQuantity);
    }

    store.with_tx(|tx| {
        let item = shop_item(tx, item_id)?.ok_or(MintError::ItemNotFound(item_id))?;
        if !item.active {
            return Err(MintError::ItemInactive);
        }
        if item.stock != -1 && item.stock < quantity {
            return Err(MintError::OutOfStock(item.stock));
        }

        let total_coins = item.price_coins * quantity;
        let total_xp = item.price_xp * quantity;

        let balance = guildmint_ledger::get_balance(tx, guild, user)?;
        if balance.coins < total_coins as f64 {
            return Err(MintError::InsufficientFunds {
                currency: "coins",
                have: balance.coins,
                need: total_coins as f64,
            });
        }
        if total_xp > 0 && balance.xp < total_xp as f64 {
            return Err(MintError::InsufficientFunds {
                currency: "xp",
                have: balance.xp,
                need: total_xp as f64,
            });
        }

        if total_coins > 0 {
            guildmint_ledger::spend_coins(
                tx,
                guild,
                user,
                total_coins as f64,
                TxKind::ShopPurchase,
                Some(Related::shop_item(item_id)),
                now,
            )?;
        }
        let mut level_down = false;
        let mut new_level = None;
        if total_xp > 0 {
            let change = guildmint_ledger::spend_xp(
                tx,
                guild,
                user,
                total_xp as f64,
                TxKind::ShopPurchase,
                Some(Related::shop_item(item_id)),
                now,
            )?;
            level_down = change.level_down;
            new_level = Some(change.new_level);
        }

        if item.stock != -1 {
            tx.execute(
                "UPDATE shop_items SET stock = stock - ?1 WHERE id = ?2",
                rusqlite::params![quantity, item_id],
            )?;
        }

        if item.consumable {
            tx.execute(
                "INSERT INTO user_inventory (guildId, userId, itemId, quantity, acquired_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(guildId, userId, itemId)
                 DO UPDATE SET quantity = quantity + excluded.quantity,
                               acquired_at = excluded.acquired_at",
                rusqlite::params![guild, user, item_id, quantity, fmt_ts(now)],
            )?;
        }

        info!(guild, user, item = %item.name, quantity, "shop purchase");
        Ok(PurchaseResult {
            item_name: item.name,
            quantity,
            coins_spent: total_coins,
            xp_spent: total_xp,
            is_consumable: item.consumable,
            level_down,
            new_level,
        })
    })
}

// ── Inventory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct InventoryEntry {
    pub item_id: i64,
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub metadata: Value,
}

/// Items the user currently holds (quantity > 0), most recent first.
pub fn user_inventory(
    conn: &Connection,
    guild: &str,
    user: &str,
) -> Result<Vec<InventoryEntry>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT ui.itemId, si.name, si.description, ui.quantity, si.metadata
         FROM user_inventory ui JOIN shop_items si ON ui.itemId = si.id
         WHERE ui.guildId = ?1 AND ui.userId = ?2 AND ui.quantity > 0
         ORDER BY ui.acquired_at DESC",
    )?;
    let rows = stmt
        .query_map([guild, user], |row| {
            let raw: String = row.get(4)?;
            Ok(InventoryEntry {
                item_id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                quantity: row.get(3)?,
                metadata: serde_json::from_str(&raw)
                    .unwrap_or(Value::Object(Default::default())),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct UseResult {
    pub item_name: String,
    pub effect: Option<String>,
    pub expires_at: Option<String>,
}

/// Consume one unit from the inventory. If the item's metadata names an
/// `effect`, upsert it into the active-effects table with
/// `expires_at = now + duration_minutes`.
pub fn use_item(
    store: &Store,
    guild: &str,
    user: &str,
    item_id: i64,
    now: DateTime<Utc>,
) -> Result<UseResult, MintError> {
    store.with_tx(|tx| {
        let held = tx
            .query_row(
                "SELECT ui.quantity, si.name, si.metadata
                 FROM user_inventory ui JOIN shop_items si ON ui.itemId = si.id
                 WHERE ui.guildId = ?1 AND ui.userId = ?2 AND ui.itemId = ?3",
                rusqlite::params![guild, user, item_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((quantity, name, raw_meta)) = held else {
            return Err(MintError::NotInInventory);
        };
        if quantity < 1 {
            return Err(MintError::NotInInventory);
        }

        tx.execute(
            "UPDATE user_inventory SET quantity = quantity - 1
             WHERE guildId = ?1 AND userId = ?2 AND itemId = ?3",
            rusqlite::params![guild, user, item_id],
        )?;

        let metadata: Value =
            serde_json::from_str(&raw_meta).unwrap_or(Value::Object(Default::default()));
        let effect = metadata.get("effect").and_then(Value::as_str).map(String::from);

        let mut expires_at = None;
        if let Some(effect_type) = &effect {
            let minutes = metadata
                .get("duration_minutes")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_EFFECT_MINUTES);
            let expiry = fmt_ts(now + Duration::minutes(minutes));
            tx.execute(
                "INSERT INTO user_active_effects (guildId, userId, effect_type, effect_data, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(guildId, userId, effect_type)
                 DO UPDATE SET effect_data = excluded.effect_data,
                               expires_at = excluded.expires_at",
                rusqlite::params![guild, user, effect_type, metadata.to_string(), expiry],
            )?;
            expires_at = Some(expiry);
        }

        info!(guild, user, item = %name, effect = ?effect, "item used");
        Ok(UseResult {
            item_name: name,
            effect,
            expires_at,
        })
    })
}

// ── Active effects ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ActiveEffect {
    pub effect_type: String,
    pub effect_data: Value,
    pub expires_at: String,
}

/// Unexpired effects for a user.
pub fn active_effects(
    conn: &Connection,
    guild: &str,
    user: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ActiveEffect>, MintError> {
    let mut stmt = conn.prepare(
        "SELECT effect_type, effect_data, expires_at FROM user_active_effects
         WHERE guildId = ?1 AND userId = ?2 AND expires_at > ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![guild, user, fmt_ts(now)], |row| {
            let raw: String = row.get(1)?;
            Ok(ActiveEffect {
                effect_type: row.get(0)?,
                effect_data: serde_json::from_str(&raw)
                    .unwrap_or(Value::Object(Default::default())),
                expires_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The named effect if it is active, or `None`. Expired rows are ignored,
/// not deleted.
pub fn has_active_effect(
    conn: &Connection,
    guild: &str,
    user: &str,
    effect_type: &str,
    now: DateTime<Utc>,
) -> Result<Option<ActiveEffect>, MintError> {
    Ok(active_effects(conn, guild, user, now)?
        .into_iter()
        .find(|e| e.effect_type == effect_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use guildmint_core::types::Currency;
    use guildmint_ledger::{add_coins, add_xp, get_balance, ledger_sum};
    use guildmint_store::schema::migrate_in_memory;

    fn fresh() -> Store {
        let store = Store::open_in_memory().unwrap();
        migrate_in_memory(&store).unwrap();
        store
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn seed_coins(store: &Store, user: &str, coins: f64) {
        store
            .with_tx(|tx| {
                add_coins(tx, "G", user, coins, TxKind::Seed, None, now())?;
                Ok(())
            })
            .unwrap();
    }

    /// Insert a limited-stock non-consumable and a consumable with an effect.
    fn seed_items(store: &Store) -> (i64, i64) {
        store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO shop_items (name, description, price_coins, price_xp, consumable, stock, metadata)
                     VALUES ('Trophy', 'display only', 50, 0, 0, 2, '{}')",
                    [],
                )?;
                let trophy = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO shop_items (name, description, price_coins, price_xp, consumable, stock, metadata)
                     VALUES ('Luck Charm', 'capture luck', 150, 0, 1, -1,
                             '{\"effect\": \"capture_luck\", \"bonus\": 0.10, \"duration_minutes\": 30}')",
                    [],
                )?;
                Ok((trophy, tx.last_insert_rowid()))
            })
            .unwrap()
    }

    #[test]
    fn purchase_debits_and_decrements_stock() {
        let store = fresh();
        let (trophy, _) = seed_items(&store);
        seed_coins(&store, "U", 120.0);

        let result = buy_item(&store, "G", "U", trophy, 2, now()).unwrap();
        assert_eq!(result.coins_spent, 100);
        assert!(!result.is_consumable);

        store
            .with_conn(|c| {
                assert_eq!(get_balance(c, "G", "U")?.coins, 20.0);
                assert_eq!(ledger_sum(c, "G", "U", Currency::Coins)?, 20.0);
                let stock: i64 = c.query_row(
                    "SELECT stock FROM shop_items WHERE id = ?1",
                    [trophy],
                    |r| r.get(0),
                )?;
                assert_eq!(stock, 0);
                Ok(())
            })
            .unwrap();

        // Sold out now.
        seed_coins(&store, "U", 100.0);
        let err = buy_item(&store, "G", "U", trophy, 1, now()).unwrap_err();
        assert!(matches!(err, MintError::OutOfStock(0)));
    }

    #[test]
    fn insufficient_funds_rolls_back_everything() {
        let store = fresh();
        let (trophy, _) = seed_items(&store);
        seed_coins(&store, "U", 10.0);

        let err = buy_item(&store, "G", "U", trophy, 1, now()).unwrap_err();
        assert!(matches!(err, MintError::InsufficientFunds { .. }));

        store
            .with_conn(|c| {
                let stock: i64 = c.query_row(
                    "SELECT stock FROM shop_items WHERE id = ?1",
                    [trophy],
                    |r| r.get(0),
                )?;
                assert_eq!(stock, 2, "stock untouched by the failed purchase");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn xp_priced_item_reports_level_down() {
        let store = fresh();
        let item = store
            .with_tx(|tx| {
                add_xp(tx, "G", "U", 130.0, TxKind::Seed, None, now())?; // level 2
                tx.execute(
                    "INSERT INTO shop_items (name, description, price_coins, price_xp, consumable, stock)
                     VALUES ('XP Sink', 'd', 0, 100, 0, -1)",
                    [],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .unwrap();

        let result = buy_item(&store, "G", "U", item, 1, now()).unwrap();
        assert_eq!(result.xp_spent, 100);
        assert!(result.level_down);
        assert_eq!(result.new_level, Some(1));
    }

    #[test]
    fn consumable_lands_in_inventory_and_effect_activates() {
        let store = fresh();
        let (_, charm) = seed_items(&store);
        seed_coins(&store, "U", 300.0);

        buy_item(&store, "G", "U", charm, 2, now()).unwrap();
        let inventory = store.with_conn(|c| user_inventory(c, "G", "U")).unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].quantity, 2);

        let used = use_item(&store, "G", "U", charm, now()).unwrap();
        assert_eq!(used.effect.as_deref(), Some("capture_luck"));

        store
            .with_conn(|c| {
                let effect = has_active_effect(c, "G", "U", "capture_luck", now())?
                    .expect("effect must be active");
                assert_eq!(effect.effect_data["bonus"], 0.10);

                // Expired 31 minutes later.
                let later = now() + Duration::minutes(31);
                assert!(has_active_effect(c, "G", "U", "capture_luck", later)?.is_none());

                let inventory = user_inventory(c, "G", "U")?;
                assert_eq!(inventory[0].quantity, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reusing_effect_extends_expiry() {
        let store = fresh();
        let (_, charm) = seed_items(&store);
        seed_coins(&store, "U", 300.0);
        buy_item(&store, "G", "U", charm, 2, now()).unwrap();

        use_item(&store, "G", "U", charm, now()).unwrap();
        let later = now() + Duration::minutes(20);
        use_item(&store, "G", "U", charm, later).unwrap();

        store
            .with_conn(|c| {
                // 40 minutes after the first use the refreshed effect still runs.
                let probe = now() + Duration::minutes(40);
                assert!(has_active_effect(c, "G", "U", "capture_luck", probe)?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn using_unowned_item_fails() {
        let store = fresh();
        let (_, charm) = seed_items(&store);
        let err = use_item(&store, "G", "U", charm, now()).unwrap_err();
        assert!(matches!(err, MintError::NotInInventory));
    }
}
