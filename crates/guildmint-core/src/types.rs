use serde::{Deserialize, Serialize};

// ── Currencies ───────────────────────────────────────────────────────────────

/// The two currencies tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Coins,
    Xp,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Coins => "coins",
            Currency::Xp => "xp",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Transaction kinds ────────────────────────────────────────────────────────

/// Closed enumeration of ledger transaction kinds.
///
/// The `kind` column stays a free-form string so new kinds can be introduced
/// without a migration; this enum is the projection used by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    QuestReward,
    TradeEscrow,
    TradeReceived,
    TradeRefund,
    CaptureWin,
    CaptureLoss,
    CaptureConsolation,
    DuelWin,
    DuelLoss,
    DuelConsolation,
    ShopPurchase,
    VoiceXp,
    MessageXp,
    WelcomeBonus,
    AdminGrant,
    Seed,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::QuestReward => "quest_reward",
            TxKind::TradeEscrow => "trade_escrow",
            TxKind::TradeReceived => "trade_received",
            TxKind::TradeRefund => "trade_refund",
            TxKind::CaptureWin => "capture_win",
            TxKind::CaptureLoss => "capture_loss",
            TxKind::CaptureConsolation => "capture_consolation",
            TxKind::DuelWin => "duel_win",
            TxKind::DuelLoss => "duel_loss",
            TxKind::DuelConsolation => "duel_consolation",
            TxKind::ShopPurchase => "shop_purchase",
            TxKind::VoiceXp => "voice_xp",
            TxKind::MessageXp => "message_xp",
            TxKind::WelcomeBonus => "welcome_bonus",
            TxKind::AdminGrant => "admin_grant",
            TxKind::Seed => "seed",
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Related-entity reference ─────────────────────────────────────────────────

/// Optional link from a ledger row to the entity that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Related<'a> {
    pub id: i64,
    pub kind: &'a str,
}

impl<'a> Related<'a> {
    pub fn trade(id: i64) -> Self {
        Related { id, kind: "trade" }
    }
    pub fn quest(id: i64) -> Self {
        Related { id, kind: "quest" }
    }
    pub fn shop_item(id: i64) -> Self {
        Related { id, kind: "shop_item" }
    }
}

// ── Balance snapshots ────────────────────────────────────────────────────────

/// One `(guild, user)` balance row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub coins: f64,
    pub xp: f64,
    pub level: i64,
    pub messages: i64,
}

/// Result of a coin mutation.
#[derive(Debug, Clone, Serialize)]
pub struct CoinChange {
    pub old_balance: f64,
    pub new_balance: f64,
    pub amount: f64,
}

/// Result of an XP mutation, including the derived level transition.
#[derive(Debug, Clone, Serialize)]
pub struct XpChange {
    pub old_xp: f64,
    pub new_xp: f64,
    pub old_level: i64,
    pub new_level: i64,
    pub level_up: bool,
    pub level_down: bool,
    pub amount: f64,
}
