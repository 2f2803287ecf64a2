//! HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::aggregates::{DocumentStatus, NewDocument, NewNotification, NewReturnRequest, OrderDocument, OrderNotification, OrderStatusUpdate, ReturnRequest, ReturnUpdate};
use crate::marketplace::{ReconciliationEngine, SyncRequest, SyncRun};
use crate::orders::{DispatchReport, NotificationSender, OrderService, UnifiedOrder, UnifiedOrderFilter};
use crate::MarketplaceError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub orders: Arc<OrderService>,
    pub sender: Arc<dyn NotificationSender>,
    pub shutdown: CancellationToken,
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotConfigured(_) | Self::Config(_) | Self::Validation(_) | Self::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SyncInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() { tracing::error!("request failed: {}", self); }
        (status, Json(json!({"success": false, "message": self.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<T, MarketplaceError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-marketplace"})) }))
        .route("/api/v1/marketplace/sync", post(trigger_sync).fallback(method_not_allowed))
        .route("/api/v1/marketplace/sync-runs", get(list_sync_runs))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id/status", put(update_order_status))
        .route("/api/v1/orders/:id/documents", get(list_documents).post(create_document))
        .route("/api/v1/returns", post(create_return))
        .route("/api/v1/returns/:id", put(update_return))
        .route("/api/v1/documents/:id/status", put(advance_document))
        .route("/api/v1/notifications", post(queue_notification))
        .route("/api/v1/notifications/dispatch", post(dispatch_notifications))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, Json(json!({"success": false, "message": "Method not allowed"}))).into_response()
}

async fn trigger_sync(State(s): State<AppState>, body: Result<Json<SyncRequest>, JsonRejection>) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = body.map_err(|e| MarketplaceError::Validation(e.body_text()))?;
    let outcome = s.engine.run(request, &s.shutdown).await?;
    Ok(Json(json!({
        "success": true,
        "syncType": outcome.sync_type,
        "processed": outcome.processed,
        "errors": outcome.errors,
        "runId": outcome.run_id,
    })))
}

#[derive(Debug, Deserialize)] pub struct LimitParams { pub limit: Option<i64> }

async fn list_sync_runs(State(s): State<AppState>, Query(p): Query<LimitParams>) -> ApiResult<Json<Vec<SyncRun>>> {
    Ok(Json(s.engine.recent_runs(p.limit.unwrap_or(20)).await?))
}

async fn list_orders(State(s): State<AppState>, Query(filter): Query<UnifiedOrderFilter>) -> ApiResult<Json<Vec<UnifiedOrder>>> {
    Ok(Json(s.orders.unified_orders(&filter).await?))
}

async fn update_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<OrderStatusUpdate>) -> ApiResult<Json<UnifiedOrder>> {
    Ok(Json(s.orders.update_order_status(id, r).await?))
}

async fn create_return(State(s): State<AppState>, Json(r): Json<NewReturnRequest>) -> ApiResult<(StatusCode, Json<ReturnRequest>)> {
    Ok((StatusCode::CREATED, Json(s.orders.create_return(r).await?)))
}

async fn update_return(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ReturnUpdate>) -> ApiResult<Json<ReturnRequest>> {
    Ok(Json(s.orders.update_return(id, r).await?))
}

async fn list_documents(State(s): State<AppState>, Path(order_id): Path<Uuid>) -> ApiResult<Json<Vec<OrderDocument>>> {
    Ok(Json(s.orders.documents(order_id).await?))
}

async fn create_document(State(s): State<AppState>, Path(order_id): Path<Uuid>, Json(r): Json<NewDocument>) -> ApiResult<(StatusCode, Json<OrderDocument>)> {
    Ok((StatusCode::CREATED, Json(s.orders.create_document(order_id, r).await?)))
}

#[derive(Debug, Deserialize)] pub struct DocumentStatusChange { pub status: DocumentStatus }

async fn advance_document(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<DocumentStatusChange>) -> ApiResult<Json<OrderDocument>> {
    Ok(Json(s.orders.advance_document(id, r.status).await?))
}

async fn queue_notification(State(s): State<AppState>, Json(r): Json<NewNotification>) -> ApiResult<(StatusCode, Json<OrderNotification>)> {
    Ok((StatusCode::CREATED, Json(s.orders.queue_notification(r).await?)))
}

async fn dispatch_notifications(State(s): State<AppState>, Query(p): Query<LimitParams>) -> ApiResult<Json<DispatchReport>> {
    Ok(Json(s.orders.dispatch_notifications(s.sender.as_ref(), p.limit.unwrap_or(100)).await?))
}
