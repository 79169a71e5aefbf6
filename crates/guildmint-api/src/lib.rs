//! guildmint-api — the dashboard HTTP service.
//!
//! A small axum app bound to a configurable port. Every `/api/guilds/...`
//! route requires the `X-API-Key` header, compared in constant time
//! against the configured secret; `/api/health` is open. Responses are
//! JSON, errors are `{"error": "<message>"}` with a 4xx/5xx status.
//! Update endpoints only ever interpolate whitelisted identifiers;
//! values are bound parameters.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use guildmint_core::MintError;
use guildmint_store::Store;

/// Shared state for every handler.
pub struct ApiState {
    pub store: Arc<Store>,
    pub api_secret: String,
    pub cors_origins: Vec<String>,
}

// ── Error mapping ────────────────────────────────────────────────────────────

/// Wrapper turning [`MintError`] into the wire shape.
pub struct ApiError(pub MintError);

impl From<MintError> for ApiError {
    fn from(e: MintError) -> Self {
        ApiError(e)
    }
}

fn status_for(err: &MintError) -> StatusCode {
    use MintError::*;
    match err {
        InvalidInput(_) | SelfTrade | SelfDuel | ZeroAmount | NegativeAmount
        | StakeOutOfRange { .. } | BetOutOfRange { .. } | ZeroQuantity
        | InsufficientFunds { .. } | DailyXpCapExceeded { .. } => StatusCode::BAD_REQUEST,
        RateLimited { .. } | OnCooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
        NotTradeRecipient | NotTradeParty | EscrowCancelNotBySender => StatusCode::FORBIDDEN,
        TradeNotFound(_) | QuestNotFound(_) | ItemNotFound(_) | AppealNotFound(_)
        | NotFound(_) => StatusCode::NOT_FOUND,
        TradeNotPending(_) | TradeNotAccepted(_) | TradeAlreadyCompleted
        | TradeAlreadyCanceled | EscrowNotReleased(_) | DuplicatePendingTrade
        | TradeFundsGone(_) | XpTradingDisabled | QuestNotCompleted | QuestAlreadyClaimed
        | NothingToAppeal | AppealAlreadyPending | AppealAlreadyReviewed(_) | ItemInactive
        | OutOfStock(_) | NotInInventory => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "internal error surfaced to the API");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Authentication ───────────────────────────────────────────────────────────

/// Constant-time byte comparison; length differences still cost a full scan.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    let longest = a.len().max(b.len());
    for i in 0..longest {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(presented.as_bytes(), state.api_secret.as_bytes()) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: Arc<ApiState>) -> Router {
    let cors = if state.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    let guild_routes = Router::new()
        .route("/stats", get(routes::guild_stats))
        .route("/leaderboard", get(routes::leaderboard))
        .route("/config", get(routes::get_config).post(routes::update_config))
        .route("/challenges", get(routes::list_challenges).post(routes::create_challenge))
        .route(
            "/challenges/{challenge_id}",
            put(routes::update_challenge).delete(routes::delete_challenge),
        )
        .route("/streamers", get(routes::list_streamers).post(routes::add_streamer))
        .route("/streamers/{streamer_id}", delete(routes::delete_streamer))
        .route("/youtube", get(routes::list_youtube).post(routes::add_youtube))
        .route(
            "/youtube/{channel_id}",
            put(routes::update_youtube).delete(routes::delete_youtube),
        )
        .route(
            "/minigame-settings",
            get(routes::get_minigame_settings).post(routes::update_minigame_settings),
        )
        .layer(middleware::from_fn_with_state(Arc::clone(&state), require_api_key));

    Router::new()
        .route("/api/health", get(routes::health))
        .nest("/api/guilds/{guild_id}", guild_routes)
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the task is aborted or the listener fails.
pub async fn serve(state: Arc<ApiState>, port: u16) -> Result<(), MintError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MintError::Other(format!("binding API port {port}: {e}")))?;
    info!(%addr, "dashboard API listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| MintError::Other(format!("API server: {e}")))
}
