use thiserror::Error;

/// Workspace-wide error type.
///
/// Variants group into the taxonomy the HTTP layer and the (external) chat
/// client map from: invalid input, insufficient funds, rate limiting,
/// state conflicts, permissions, not-found, storage and external failures.
#[derive(Debug, Error)]
pub enum MintError {
    // ── Input validation ─────────────────────────────────────────────────────
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("self-trade not allowed")]
    SelfTrade,

    #[error("cannot duel yourself")]
    SelfDuel,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("negative amounts are not allowed")]
    NegativeAmount,

    #[error("stake out of range: must be between {min} and {max} coins")]
    StakeOutOfRange { min: i64, max: i64 },

    #[error("bet out of range: must be between {min} and {max} coins")]
    BetOutOfRange { min: i64, max: i64 },

    #[error("quantity must be at least 1")]
    ZeroQuantity,

    // ── Funds ────────────────────────────────────────────────────────────────
    #[error("insufficient {currency}: have {have}, need {need}")]
    InsufficientFunds {
        currency: &'static str,
        have: f64,
        need: f64,
    },

    #[error("daily XP transfer limit reached: {remaining} XP remaining today (limit {limit})")]
    DailyXpCapExceeded { remaining: f64, limit: f64 },

    // ── Rate limiting / cooldowns ────────────────────────────────────────────
    #[error("rate limited ({reason}): retry in {retry_after:.1}s")]
    RateLimited { retry_after: f64, reason: &'static str },

    #[error("on cooldown for `{action}`: {remaining}s remaining")]
    OnCooldown { action: String, remaining: i64 },

    // ── State conflicts ──────────────────────────────────────────────────────
    #[error("trade is not pending (status: {0})")]
    TradeNotPending(String),

    #[error("trade cannot be completed (status: {0})")]
    TradeNotAccepted(String),

    #[error("cannot cancel a completed trade")]
    TradeAlreadyCompleted,

    #[error("trade is already canceled")]
    TradeAlreadyCanceled,

    #[error("escrow period not over: {0}s remaining")]
    EscrowNotReleased(i64),

    #[error("you already have a pending trade with this user")]
    DuplicatePendingTrade,

    #[error("trade canceled: sender no longer has enough {0}")]
    TradeFundsGone(&'static str),

    #[error("XP trading is disabled on this server")]
    XpTradingDisabled,

    #[error("quest not yet completed")]
    QuestNotCompleted,

    #[error("quest already claimed")]
    QuestAlreadyClaimed,

    #[error("user has no warnings to appeal")]
    NothingToAppeal,

    #[error("an appeal is already pending for this user")]
    AppealAlreadyPending,

    #[error("appeal already reviewed (status: {0})")]
    AppealAlreadyReviewed(String),

    #[error("item is not available for purchase")]
    ItemInactive,

    #[error("not enough stock: only {0} available")]
    OutOfStock(i64),

    #[error("item not in inventory")]
    NotInInventory,

    // ── Permissions ──────────────────────────────────────────────────────────
    #[error("you are not the recipient of this trade")]
    NotTradeRecipient,

    #[error("you are not involved in this trade")]
    NotTradeParty,

    #[error("only the sender can cancel during the escrow period")]
    EscrowCancelNotBySender,

    // ── Not found ────────────────────────────────────────────────────────────
    #[error("trade not found: {0}")]
    TradeNotFound(i64),

    #[error("quest not found: {0}")]
    QuestNotFound(i64),

    #[error("shop item not found: {0}")]
    ItemNotFound(i64),

    #[error("appeal not found: {0}")]
    AppealNotFound(i64),

    #[error("not found: {0}")]
    NotFound(String),

    // ── Storage / serialization ──────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database corruption detected: {0}")]
    Corruption(String),

    #[error("backup error: {0}")]
    Backup(String),

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("missing required configuration key: {0}")]
    MissingConfigKey(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    // ── External providers ───────────────────────────────────────────────────
    #[error("external call timed out: {0}")]
    ExternalTimeout(String),

    #[error("external provider error: {0}")]
    External(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl MintError {
    /// True when the caller may retry once with a short jitter
    /// (transient storage contention only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MintError::Storage(msg) if msg.contains("locked") || msg.contains("busy"))
    }
}

// The orphan rule forces the rusqlite conversion to live next to the error
// type, so this crate carries the rusqlite dependency for it.
impl From<rusqlite::Error> for MintError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::DatabaseCorrupt =>
            {
                MintError::Corruption(e.to_string())
            }
            _ => MintError::Storage(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for MintError {
    fn from(e: serde_json::Error) -> Self {
        MintError::Serialization(e.to_string())
    }
}
