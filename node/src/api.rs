//! # HTTP API
//!
//! Read-mostly JSON endpoints over the hosted engine, built on `axum`.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                        |
//! |--------|-----------------------------------|------------------------------------|
//! | GET    | `/health`                         | Liveness probe                     |
//! | GET    | `/status`                         | Cursor positions and lag           |
//! | GET    | `/escrow/supply`                  | Total voting power now             |
//! | GET    | `/escrow/:user`                   | A user's lock and voting power     |
//! | GET    | `/gauges/:channel`                | Channel weight and relative weight |
//! | GET    | `/channels/:channel/users/:user`  | Channel credit and minted amount   |
//! | GET    | `/fees/users/:user`               | Fee credit and claims              |
//! | POST   | `/sync`                           | Run one keeper round               |
//!
//! Amounts are `0x`-prefixed hex strings. Queries take the read lock;
//! `POST /sync` takes the write lock for exactly one round.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use velock_contracts::{EngineError, EngineStatus, ErrorKind, SyncReport};
use velock_protocol::{Address, Amount, FixedMath, Timestamp};

use crate::keeper::Keeper;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Node software version string.
    pub version: String,
    pub keeper: Arc<Keeper>,
}

/// Builds the API router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/escrow/supply", get(supply_handler))
        .route("/escrow/:user", get(escrow_handler))
        .route("/gauges/:channel", get(gauge_handler))
        .route("/channels/:channel/users/:user", get(channel_user_handler))
        .route("/fees/users/:user", get(fee_user_handler))
        .route("/sync", post(sync_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub engine: EngineStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SupplyResponse {
    pub timestamp: Timestamp,
    pub total_supply: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EscrowResponse {
    pub user: Address,
    pub timestamp: Timestamp,
    /// Tokens locked.
    pub amount: Amount,
    /// Unlock time, zero when there is no lock.
    pub end: Timestamp,
    /// Voting power at `timestamp`.
    pub balance: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GaugeResponse {
    pub channel: Address,
    pub type_id: u32,
    pub type_name: String,
    pub weight: Amount,
    /// Share of emission this week, scaled by 1e18.
    pub relative_weight: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelUserResponse {
    pub channel: Address,
    pub user: Address,
    /// Credit as of the user's last checkpoint.
    pub integrate_fraction: Amount,
    pub minted: Amount,
    pub mintable: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeeUserResponse {
    pub user: Address,
    pub claimed: Amount,
    /// Credited but not yet paid, as of the user's last claim.
    pub claimable: Amount,
    pub time_cursor: Timestamp,
    pub user_epoch: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub caught_up: bool,
    pub steps: u64,
    pub report: SyncReport,
}

/// Standard error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A handler failure with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match (&e, e.kind()) {
            (EngineError::UnknownChannel { .. }, _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::InputValidation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Authorization) => StatusCode::FORBIDDEN,
            (_, ErrorKind::TemporalGuard) | (_, ErrorKind::State) => StatusCode::CONFLICT,
            (_, ErrorKind::Arithmetic) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("bad address {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: always 200 while the process is serving.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let now = state.keeper.now();
    let engine = state.keeper.engine().read().status(now);
    Json(StatusResponse {
        version: state.version.clone(),
        engine,
    })
}

async fn supply_handler(State(state): State<AppState>) -> Json<SupplyResponse> {
    let timestamp = state.keeper.now();
    let total_supply = state.keeper.engine().read().total_supply_at(timestamp);
    Json(SupplyResponse {
        timestamp,
        total_supply,
    })
}

async fn escrow_handler(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> ApiResult<EscrowResponse> {
    let user = parse_address(&user)?;
    let timestamp = state.keeper.now();
    let engine = state.keeper.engine().read();
    let locked = engine.locked(&user);
    Ok(Json(EscrowResponse {
        user,
        timestamp,
        amount: locked.amount,
        end: locked.end,
        balance: engine.balance_of(&user, timestamp),
    }))
}

async fn gauge_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> ApiResult<GaugeResponse> {
    let channel = parse_address(&channel)?;
    let now = state.keeper.now();
    let engine = state.keeper.engine().read();
    let controller = engine.controller();
    let type_id = controller
        .gauge_types(&channel)
        .ok_or_else(|| ApiError::not_found(format!("{channel} is not a registered gauge")))?;
    Ok(Json(GaugeResponse {
        channel,
        type_id,
        type_name: controller
            .gauge_type_names(type_id)
            .unwrap_or_default()
            .to_string(),
        weight: controller.get_gauge_weight(&channel),
        relative_weight: engine.gauge_relative_weight(&channel, now)?,
    }))
}

async fn channel_user_handler(
    State(state): State<AppState>,
    Path((channel, user)): Path<(String, String)>,
) -> ApiResult<ChannelUserResponse> {
    let channel = parse_address(&channel)?;
    let user = parse_address(&user)?;
    let engine = state.keeper.engine().read();
    let integrate_fraction = engine.integrate_fraction(&channel, &user)?;
    let minted = engine.minted(&user, &channel);
    Ok(Json(ChannelUserResponse {
        channel,
        user,
        integrate_fraction,
        minted,
        mintable: integrate_fraction.floor_sub(minted),
    }))
}

async fn fee_user_handler(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> ApiResult<FeeUserResponse> {
    let user = parse_address(&user)?;
    let engine = state.keeper.engine().read();
    let fees = engine.fees();
    Ok(Json(FeeUserResponse {
        user,
        claimed: fees.claimed(&user),
        claimable: fees.claimable(&user),
        time_cursor: fees.accountant().time_cursor_of(&user),
        user_epoch: fees.accountant().user_epoch_of(&user),
    }))
}

/// `POST /sync`: one bounded round of every catch-up loop.
async fn sync_handler(State(state): State<AppState>) -> ApiResult<SyncResponse> {
    let report = state.keeper.round()?;
    Ok(Json(SyncResponse {
        caught_up: report.caught_up(),
        steps: report.steps(),
        report,
    }))
}
