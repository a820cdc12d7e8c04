use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::webhook_processor::{WebhookDisposition, WebhookError, WebhookProcessor};

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// Vendors sign under different header names.
fn signature_header(provider: &str) -> &'static str {
    match provider {
        "voyatel" => "x-voyatel-signature",
        "globimo" => "x-globimo-signature",
        "mobiroam" => "x-mobiroam-signature",
        _ => "x-webhook-signature",
    }
}

/// POST /webhooks/{provider}
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    info!(provider = %provider, "Received webhook");

    let signature = headers
        .get(signature_header(&provider))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state
        .processor
        .process(&provider, &body, signature.as_deref())
        .await
    {
        Ok(WebhookDisposition::Processed) | Ok(WebhookDisposition::NoChange) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(WebhookDisposition::Ignored) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ignored"})),
        )
            .into_response(),
        Err(WebhookError::UnknownProvider(slug)) => {
            warn!(provider = %slug, "Webhook for unknown provider");
            (StatusCode::NOT_FOUND, "Unknown provider").into_response()
        }
        Err(WebhookError::InvalidSignature(reason)) => {
            warn!(provider = %provider, reason = %reason, "Invalid webhook signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(WebhookError::Malformed(reason)) => {
            warn!(provider = %provider, reason = %reason, "Malformed webhook payload");
            (StatusCode::UNPROCESSABLE_ENTITY, "Malformed payload").into_response()
        }
        Err(WebhookError::OrderNotFound) => {
            // Acknowledged so the vendor stops re-delivering; the polling
            // sweep will pick the order up once the reference propagates.
            warn!(provider = %provider, "Webhook references no known order");
            (
                StatusCode::OK,
                Json(serde_json::json!({"status": "unmatched"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(provider = %provider, error = %e, "Webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendors_have_distinct_signature_headers() {
        assert_eq!(signature_header("voyatel"), "x-voyatel-signature");
        assert_eq!(signature_header("globimo"), "x-globimo-signature");
        assert_eq!(signature_header("mobiroam"), "x-mobiroam-signature");
        assert_eq!(signature_header("other"), "x-webhook-signature");
    }
}
