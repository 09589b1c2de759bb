//! HTTP API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::{Atoms, FillEstimate, MarketId, OrderId, OrderRecord, Rate, Side};
use crate::feed::SharedSession;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Book session, written only by the feed driver.
    pub session: SharedSession,
    /// Prometheus render handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Drift tolerance used when a request does not give one.
    pub default_tolerance: Decimal,
}

impl AppState {
    /// Create new app state.
    pub fn new(session: SharedSession, default_tolerance: Decimal) -> Self {
        Self {
            session,
            metrics: None,
            default_tolerance,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether a snapshot has been applied.
    pub ready: bool,
    /// Active market.
    pub market: MarketId,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub error: String,
}

/// One order inside a bin.
#[derive(Debug, Serialize)]
pub struct BinOrderResponse {
    /// Order id.
    pub id: OrderId,
    /// Remaining quantity.
    pub qty: Atoms,
}

/// One price-level bin.
#[derive(Debug, Serialize)]
pub struct BinResponse {
    /// Shared rate (0 for market orders).
    pub rate: Rate,
    /// Whether the bin holds epoch-queue orders.
    pub provisional: bool,
    /// Aggregate quantity.
    pub qty: Atoms,
    /// Whether the user owns an order in the bin.
    pub owned: bool,
    /// Relevance weight in [0, 1].
    pub weight: Decimal,
    /// Orders in the bin.
    pub orders: Vec<BinOrderResponse>,
}

/// Bins for one side.
#[derive(Debug, Serialize)]
pub struct BinsResponse {
    /// Side requested.
    pub side: Side,
    /// Bins, best first.
    pub bins: Vec<BinResponse>,
}

/// Heaviest relevant order response.
#[derive(Debug, Serialize)]
pub struct HeaviestResponse {
    /// Side requested.
    pub side: Side,
    /// Tolerance applied.
    pub tolerance: Decimal,
    /// Best rate on the side.
    pub best_price: Option<Rate>,
    /// Heaviest order within the tolerance.
    pub order: Option<OrderRecord>,
}

/// Query for the heaviest order endpoint.
#[derive(Debug, Deserialize)]
pub struct HeaviestQuery {
    /// Drift tolerance as a fraction (e.g., 0.05).
    pub tolerance: Option<Decimal>,
}

/// Fill estimate response.
#[derive(Debug, Serialize)]
pub struct FillResponse {
    /// Taker side.
    pub side: Side,
    /// Quantity requested.
    pub qty: Atoms,
    /// Estimate, absent when the book cannot absorb the quantity.
    pub estimate: Option<FillEstimate>,
}

/// Query for the fill estimate endpoint.
#[derive(Debug, Deserialize)]
pub struct FillQuery {
    /// Quantity to fill, in atoms.
    pub qty: Atoms,
}

fn parse_side(raw: &str) -> Result<Side, Response> {
    raw.parse::<Side>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("unknown side '{raw}'"),
            }),
        )
            .into_response()
    })
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 once a snapshot is applied, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let response = ReadyResponse {
        ready: session.is_ready(),
        market: session.market().clone(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Book summary handler.
pub async fn book(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.read().await.summary())
}

/// Bins for one side.
pub async fn bins(State(state): State<AppState>, Path(side): Path<String>) -> Response {
    let side = match parse_side(&side) {
        Ok(side) => side,
        Err(response) => return response,
    };

    let session = state.session.read().await;
    let weights = session.relevance_weights(side);
    let bins = session
        .bins(side)
        .iter()
        .zip(weights)
        .map(|(bin, weight)| BinResponse {
            rate: bin.rate,
            provisional: bin.provisional,
            qty: bin.quantity,
            owned: bin.owned,
            weight,
            orders: bin
                .orders
                .iter()
                .map(|o| BinOrderResponse {
                    id: o.id.clone(),
                    qty: o.quantity_atoms,
                })
                .collect(),
        })
        .collect();

    Json(BinsResponse { side, bins }).into_response()
}

/// Heaviest order within a drift tolerance of the best rate.
pub async fn heaviest(
    State(state): State<AppState>,
    Path(side): Path<String>,
    Query(query): Query<HeaviestQuery>,
) -> Response {
    let side = match parse_side(&side) {
        Ok(side) => side,
        Err(response) => return response,
    };
    let tolerance = query.tolerance.unwrap_or(state.default_tolerance);

    let session = state.session.read().await;
    Json(HeaviestResponse {
        side,
        tolerance,
        best_price: session.best_price(side),
        order: session.heaviest_relevant_order(side, tolerance),
    })
    .into_response()
}

/// Estimated cost of filling a taker order against the opposite side.
pub async fn fill(
    State(state): State<AppState>,
    Path(side): Path<String>,
    Query(query): Query<FillQuery>,
) -> Response {
    let side = match parse_side(&side) {
        Ok(side) => side,
        Err(response) => return response,
    };

    let session = state.session.read().await;
    Json(FillResponse {
        side,
        qty: query.qty,
        estimate: session.fill_estimate(side, query.qty),
    })
    .into_response()
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
