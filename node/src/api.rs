//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the operator node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                         | Description                          |
//! |--------|------------------------------|--------------------------------------|
//! | GET    | `/health`                    | Liveness probe                       |
//! | GET    | `/status`                    | Lifecycle and stage summary          |
//! | GET    | `/balance/:address`          | Working balance, decimal wei         |
//! | POST   | `/send/light_tx`             | Submit `{lightTxJson}`               |
//! | GET    | `/receipt/:light_tx_hash`    | Receipt lookup                       |
//! | GET    | `/roothash`                  | Build a checkpoint                   |
//! | GET    | `/roothash/:stage_height`    | Roots of a stage                     |
//! | POST   | `/attach`                    | Submit signed roots and commit       |
//! | GET    | `/slice`                     | Inclusion proof                      |
//! | GET    | `/pending/receipts`          | Uncommitted light transaction hashes |
//! | GET    | `/server/address`            | Operator address                     |
//! | GET    | `/sidechain/address`         | Settlement contract address          |
//! | GET    | `/ws`                        | Live lifecycle events                |
//!
//! Refusals the client can act on (bad signature, duplicate, empty stage,
//! ...) come back as `200 {ok: false, message, code}`. Missing stages and
//! receipts are 404; parent-chain and storage failures are 500.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use childchain_protocol::stage::{
    ErrorCategory, ErrorCode, LifecycleStatus, ParentChain, RootHashes, StageError,
    StageLifecycle, StageOutcome,
};
use childchain_protocol::transaction::{LightTransaction, LightTxType};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    /// Operator address as configured, reported by `/server/address`.
    pub operator_address: String,
    pub sidechain_address: String,
    pub lifecycle: Arc<StageLifecycle>,
    pub chain: Arc<dyn ParentChain>,
    /// Broadcast channel for live event notifications.
    pub event_tx: broadcast::Sender<NodeEvent>,
    pub metrics: SharedMetrics,
}

impl AppState {
    fn publish(&self, event: NodeEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }

    /// Bring the stage and pool gauges in line with the lifecycle.
    pub fn refresh_gauges(&self) {
        let status = self.lifecycle.status();
        self.metrics
            .stage_height
            .set(status.committed_height as i64);
        self.metrics
            .pending_receipts
            .set(status.pending_receipts as i64);
    }
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A light transaction was admitted.
    Receipt {
        light_tx_hash: String,
        gsn: u64,
        stage_height: u64,
        kind: LightTxType,
    },
    CheckpointBuilt {
        stage_height: u64,
        receipt_root: String,
        account_root: Option<String>,
        receipt_count: usize,
    },
    StageCommitted {
        stage_height: u64,
        parent_tx_hash: Option<String>,
    },
    StageRolledBack {
        stage_height: u64,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/balance/:address", get(balance_handler))
        .route("/send/light_tx", post(send_light_tx_handler))
        .route("/receipt/:light_tx_hash", get(receipt_handler))
        .route("/roothash", get(checkpoint_handler))
        .route("/roothash/:stage_height", get(stage_roots_handler))
        .route("/attach", post(attach_handler))
        .route("/slice", get(slice_handler))
        .route("/pending/receipts", get(pending_receipts_handler))
        .route("/server/address", get(server_address_handler))
        .route("/sidechain/address", get(sidechain_address_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLightTxRequest {
    pub light_tx_json: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    pub stage_height: u64,
    pub receipt_root_hash: String,
    #[serde(default)]
    pub account_root_hash: Option<String>,
    /// Operator-signed parent-chain transaction carrying the roots.
    pub serialized_tx: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SliceQuery {
    pub stage_height: u64,
    pub light_tx_hash: String,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub operator_address: String,
    pub sidechain_address: String,
    #[serde(flatten)]
    pub lifecycle: LifecycleStatus,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Body of every refusal.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub message: String,
    pub code: ErrorCode,
}

fn error_response(err: &StageError) -> Response {
    let status = match err.code() {
        ErrorCode::StageNotFound | ErrorCode::ReceiptNotFound => StatusCode::NOT_FOUND,
        _ => match err.category() {
            ErrorCategory::External | ErrorCategory::Configuration => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::OK,
        },
    };
    let body = ErrorResponse {
        ok: false,
        message: err.to_string(),
        code: err.code(),
    };
    (status, Json(body)).into_response()
}

fn join_error_response(e: tokio::task::JoinError) -> Response {
    tracing::error!("blocking task failed: {}", e);
    let body = ErrorResponse {
        ok: false,
        message: "Something went wrong.".into(),
        code: ErrorCode::SomethingWentWrong,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        operator_address: state.operator_address.clone(),
        sidechain_address: state.sidechain_address.clone(),
        lifecycle: state.lifecycle.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /balance/:address` — working balance as a decimal wei string.
async fn balance_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.lifecycle.balance(&address) {
        Ok(balance) => Json(json!({ "balance": balance.to_string() })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /send/light_tx` — admit a signed light transaction.
async fn send_light_tx_handler(
    State(state): State<AppState>,
    Json(req): Json<SendLightTxRequest>,
) -> Response {
    let result = match LightTransaction::from_value(req.light_tx_json) {
        Ok(tx) => {
            let lifecycle = Arc::clone(&state.lifecycle);
            match tokio::task::spawn_blocking(move || lifecycle.submit(tx)).await {
                Ok(result) => result,
                Err(e) => return join_error_response(e),
            }
        }
        Err(e) => Err(StageError::from(e)),
    };

    match result {
        Ok(receipt) => {
            state.metrics.light_txs_accepted_total.inc();
            state.refresh_gauges();
            state.publish(NodeEvent::Receipt {
                light_tx_hash: receipt.light_tx_hash().to_string(),
                gsn: receipt.gsn(),
                stage_height: receipt.light_tx().stage_height(),
                kind: receipt.light_tx().kind(),
            });
            Json(json!({ "ok": true, "receipt": receipt.to_json() })).into_response()
        }
        Err(e) => {
            state
                .metrics
                .light_txs_rejected_total
                .with_label_values(&[e.code().as_str()])
                .inc();
            tracing::warn!(code = %e.code(), error = %e, "light transaction rejected");
            error_response(&e)
        }
    }
}

async fn receipt_handler(
    Path(light_tx_hash): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.lifecycle.receipt(&light_tx_hash) {
        Ok(receipt) => Json(receipt.to_json()).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /roothash` — capture the pending pool and build the next stage.
async fn checkpoint_handler(State(state): State<AppState>) -> Response {
    if let Err(e) = state.lifecycle.reconcile(state.chain.as_ref()).await {
        tracing::error!(code = %e.code(), error = %e, "parent chain out of step with local stages");
        return error_response(&e);
    }

    let lifecycle = Arc::clone(&state.lifecycle);
    let result = match tokio::task::spawn_blocking(move || lifecycle.request_checkpoint()).await {
        Ok(result) => result,
        Err(e) => return join_error_response(e),
    };

    match result {
        Ok(checkpoint) => {
            let metrics = &state.metrics;
            metrics.checkpoints_built_total.inc();
            metrics.max_collision.set(checkpoint.max_collision as i64);
            metrics
                .tree_build_seconds
                .observe(checkpoint.build_millis as f64 / 1000.0);
            state.refresh_gauges();
            state.publish(NodeEvent::CheckpointBuilt {
                stage_height: checkpoint.stage_height,
                receipt_root: checkpoint.roots.receipt_root.clone(),
                account_root: checkpoint.roots.account_root.clone(),
                receipt_count: checkpoint.receipt_count,
            });
            Json(json!({
                "ok": true,
                "stageHeight": checkpoint.stage_height,
                "rootHash": checkpoint.roots.receipt_root,
                "receiptRootHash": checkpoint.roots.receipt_root,
                "accountRootHash": checkpoint.roots.account_root,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn stage_roots_handler(
    Path(stage_height): Path<u64>,
    State(state): State<AppState>,
) -> Response {
    match state.lifecycle.stage_roots(stage_height) {
        Ok(roots) => Json(json!({
            "ok": true,
            "stageHeight": stage_height,
            "receiptRootHash": roots.receipt_root,
            "accountRootHash": roots.account_root,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /attach` — check operator-signed roots, submit them to the
/// parent chain and commit the stage.
async fn attach_handler(
    State(state): State<AppState>,
    Json(req): Json<AttachRequest>,
) -> Response {
    let signed = RootHashes::new(req.receipt_root_hash, req.account_root_hash);
    let before = state.lifecycle.status().last_outcome;

    let published = state
        .lifecycle
        .publish_roots(
            req.stage_height,
            &signed,
            &req.serialized_tx,
            state.chain.as_ref(),
        )
        .await;

    // Committing persists and flushes the stage, so it runs off the runtime.
    let result = match published {
        Ok((onchain, parent_tx_hash)) => {
            let lifecycle = Arc::clone(&state.lifecycle);
            let stage_height = req.stage_height;
            match tokio::task::spawn_blocking(move || {
                lifecycle.commit(stage_height, &onchain, parent_tx_hash)
            })
            .await
            {
                Ok(result) => result,
                Err(e) => return join_error_response(e),
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(record) => {
            state.metrics.stages_committed_total.inc();
            state.refresh_gauges();
            state.publish(NodeEvent::StageCommitted {
                stage_height: record.stage_height,
                parent_tx_hash: record.parent_tx_hash.clone(),
            });
            Json(json!({
                "ok": true,
                "stageHeight": record.stage_height,
                "txHash": record.parent_tx_hash,
            }))
            .into_response()
        }
        Err(e) => {
            let after = state.lifecycle.status().last_outcome;
            if after != before {
                if let Some(StageOutcome::RolledBack {
                    stage_height,
                    reason,
                }) = after
                {
                    state.metrics.stages_rolled_back_total.inc();
                    state.refresh_gauges();
                    state.publish(NodeEvent::StageRolledBack {
                        stage_height,
                        reason,
                    });
                }
            }
            tracing::warn!(stage_height = req.stage_height, code = %e.code(), error = %e, "attach failed");
            error_response(&e)
        }
    }
}

/// `GET /slice?stage_height=N&light_tx_hash=H` — inclusion proof.
async fn slice_handler(Query(query): Query<SliceQuery>, State(state): State<AppState>) -> Response {
    match state
        .lifecycle
        .proof(query.stage_height, &query.light_tx_hash)
    {
        Ok(proof) => Json(proof).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn pending_receipts_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "lightTxHashes": state.lifecycle.pending_light_tx_hashes() }))
}

async fn server_address_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "address": state.operator_address }))
}

async fn sidechain_address_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "address": state.sidechain_address }))
}

/// `GET /ws` — WebSocket upgrade for live event streaming.
///
/// Push-only: client messages are read and ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
