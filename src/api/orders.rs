use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::orders::model::Order;
use crate::orders::refund::{RefundError, RefundOrchestrator};
use crate::orders::store::OrderStore;
use crate::orders::submission::{OrderSubmissionService, SubmitOrderRequest};
use crate::providers::types::RefundReason;

pub struct OrdersState {
    pub submission: Arc<OrderSubmissionService>,
    pub refunds: Arc<RefundOrchestrator>,
    pub store: Arc<dyn OrderStore>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub user_id: Uuid,
    pub package_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub payment_intent_id: Option<String>,
    pub customer_ref: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub display_id: String,
    pub status: String,
    pub quantity: i32,
    pub retail_price: BigDecimal,
    pub currency: String,
    pub iccid: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub apple_install_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            display_id: order.display_id,
            status: order.status.as_str().to_string(),
            quantity: order.quantity,
            retail_price: order.retail_price,
            currency: order.currency,
            iccid: order.iccid,
            qr_code: order.qr_code,
            qr_code_url: order.qr_code_url,
            smdp_address: order.smdp_address,
            activation_code: order.activation_code,
            apple_install_url: order.apple_install_url,
            failure_reason: order.failure_reason,
            created_at: order.created_at,
            activated_at: order.activated_at,
        }
    }
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<OrdersState>>,
    Json(body): Json<CreateOrderBody>,
) -> impl IntoResponse {
    if body.quantity == 0 {
        return (StatusCode::BAD_REQUEST, "quantity must be at least 1").into_response();
    }

    let request = SubmitOrderRequest {
        user_id: body.user_id,
        package_id: body.package_id,
        quantity: body.quantity,
        payment_intent_id: body.payment_intent_id,
        customer_ref: body.customer_ref,
    };

    match state.submission.submit(request).await {
        Ok(order) => {
            info!(order_id = %order.id, display_id = %order.display_id, "order created");
            (StatusCode::CREATED, Json(OrderView::from(order))).into_response()
        }
        Err(e) => {
            error!(error = %e, "order submission failed");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        }
    }
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<Arc<OrdersState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.find_by_id(id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(OrderView::from(order))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Order not found").into_response(),
        Err(e) => {
            error!(order_id = %id, error = %e, "order lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed").into_response()
        }
    }
}

/// GET /api/orders/{id}/refund-eligibility
pub async fn refund_eligibility(
    State(state): State<Arc<OrdersState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.refunds.eligibility(id).await {
        Ok(eligibility) => (StatusCode::OK, Json(eligibility)).into_response(),
        Err(e) => refund_error_response(id, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub reason: String,
    pub notes: Option<String>,
}

/// POST /api/orders/{id}/refund
pub async fn refund_order(
    State(state): State<Arc<OrdersState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> impl IntoResponse {
    let reason = match RefundReason::from_str(&body.reason) {
        Ok(reason) => reason,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.refunds.process_refund(id, reason, body.notes).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "action": outcome.action,
                "payment_refunded": outcome.payment_refunded,
                "payment_error": outcome.payment_error,
                "order": OrderView::from(outcome.order),
            })),
        )
            .into_response(),
        Err(e) => refund_error_response(id, e),
    }
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<OrdersState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.refunds.process_cancellation(id).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "action": outcome.action,
                "payment_refunded": outcome.payment_refunded,
                "order": OrderView::from(outcome.order),
            })),
        )
            .into_response(),
        Err(e) => refund_error_response(id, e),
    }
}

fn refund_error_response(order_id: Uuid, e: RefundError) -> axum::response::Response {
    match e {
        RefundError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, "Order not found").into_response()
        }
        RefundError::AlreadyFinalized(_, status) => (
            StatusCode::CONFLICT,
            format!("Order is already {}", status),
        )
            .into_response(),
        RefundError::NotEligible { reason, .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, reason).into_response()
        }
        RefundError::VendorRejected(reason) | RefundError::CancellationRejected(reason) => {
            (StatusCode::UNPROCESSABLE_ENTITY, reason).into_response()
        }
        other => {
            error!(order_id = %order_id, error = %other, "refund operation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Operation failed").into_response()
        }
    }
}
