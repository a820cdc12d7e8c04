use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration as ChronoDuration;
use dotenv::dotenv;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use roamlink_backend::api;
use roamlink_backend::api::orders::OrdersState;
use roamlink_backend::api::webhooks::WebhookState;
use roamlink_backend::config::AppConfig;
use roamlink_backend::database;
use roamlink_backend::logging::init_tracing;
use roamlink_backend::orders::reconciler::{ReconcilerConfig, StatusReconciler};
use roamlink_backend::orders::refund::RefundOrchestrator;
use roamlink_backend::orders::retry::{RetryCoordinator, RetryPolicy};
use roamlink_backend::orders::store::OrderStore;
use roamlink_backend::orders::submission::OrderSubmissionService;
use roamlink_backend::providers::registry::{
    ProviderConfigStore, ProviderRegistry, ProviderResolver,
};
use roamlink_backend::services::notification::{NotificationService, NotificationStore};
use roamlink_backend::services::payment_gateway::{HttpPaymentGateway, PaymentGateway};
use roamlink_backend::services::pricing::PricingSource;
use roamlink_backend::services::usage_sync::UsageSyncService;
use roamlink_backend::services::webhook_processor::WebhookProcessor;
use roamlink_backend::workers::{ReconcileWorker, RetryWorker, UsageSyncWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn health(State(pool): State<PgPool>) -> impl axum::response::IntoResponse {
    match database::health_check(&pool).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "degraded", "error": e.to_string()})),
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let config = AppConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "🚀 Starting Roamlink backend service"
    );

    info!("📊 Initializing database connection pool...");
    let pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("✅ Database connection pool initialized");

    // Repositories
    let order_store: Arc<dyn OrderStore> = Arc::new(database::OrderRepository::new(pool.clone()));
    let provider_store: Arc<dyn ProviderConfigStore> =
        Arc::new(database::ProviderConfigRepository::new(pool.clone()));
    let notification_store: Arc<dyn NotificationStore> =
        Arc::new(database::NotificationRepository::new(pool.clone()));
    let pricing: Arc<dyn PricingSource> = Arc::new(database::PackageRepository::new(pool.clone()));

    // Provider registry with cached vendor configuration
    let registry: Arc<dyn ProviderResolver> = Arc::new(ProviderRegistry::new(
        provider_store,
        Duration::from_secs(config.provider_cache_ttl_secs),
    ));

    // Payment gateway is optional: without credentials, refunds settle on
    // the vendor side only and reversals are flagged for manual handling.
    let gateway: Option<Arc<dyn PaymentGateway>> = match HttpPaymentGateway::from_env() {
        Ok(gateway) => Some(Arc::new(gateway)),
        Err(e) => {
            info!(reason = %e, "payment gateway not configured; reversals disabled");
            None
        }
    };

    // Core services
    let notifier = Arc::new(NotificationService::new(notification_store));
    let submission = Arc::new(OrderSubmissionService::new(
        registry.clone(),
        order_store.clone(),
        pricing,
        notifier.clone(),
    ));
    let reconciler = Arc::new(StatusReconciler::new(
        registry.clone(),
        order_store.clone(),
        notifier.clone(),
        ReconcilerConfig {
            recheck_after: ChronoDuration::seconds(config.workers.recheck_after_secs),
            batch_size: config.workers.reconcile_batch_size,
        },
    ));
    let retry_coordinator = Arc::new(RetryCoordinator::new(
        order_store.clone(),
        submission.clone(),
        notifier.clone(),
        RetryPolicy::with_windows(config.retry_backoff_minutes.clone()),
    ));
    let refunds = Arc::new(RefundOrchestrator::new(
        registry.clone(),
        order_store.clone(),
        gateway,
        notifier.clone(),
    ));
    let usage_sync = Arc::new(UsageSyncService::new(
        registry.clone(),
        order_store.clone(),
        notifier.clone(),
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(
        registry.clone(),
        order_store.clone(),
        reconciler.clone(),
        notifier.clone(),
    ));

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();
    worker_handles.push(tokio::spawn(
        ReconcileWorker::new(
            reconciler.clone(),
            Duration::from_secs(config.workers.reconcile_interval_secs),
        )
        .run(shutdown_rx.clone()),
    ));
    worker_handles.push(tokio::spawn(
        RetryWorker::new(
            retry_coordinator,
            Duration::from_secs(config.workers.retry_interval_secs),
        )
        .run(shutdown_rx.clone()),
    ));
    worker_handles.push(tokio::spawn(
        UsageSyncWorker::new(
            usage_sync,
            Duration::from_secs(config.workers.usage_interval_secs),
        )
        .run(shutdown_rx),
    ));
    info!("✅ Background workers started");

    // Routes
    let orders_state = Arc::new(OrdersState {
        submission,
        refunds,
        store: order_store,
    });
    let webhook_state = Arc::new(WebhookState {
        processor: webhook_processor,
    });

    let app = Router::new()
        .route("/health", get(health))
        .with_state(pool)
        .merge(
            Router::new()
                .route("/api/orders", post(api::orders::create_order))
                .route("/api/orders/{id}", get(api::orders::get_order))
                .route(
                    "/api/orders/{id}/refund-eligibility",
                    get(api::orders::refund_eligibility),
                )
                .route("/api/orders/{id}/refund", post(api::orders::refund_order))
                .route("/api/orders/{id}/cancel", post(api::orders::cancel_order))
                .with_state(orders_state),
        )
        .merge(
            Router::new()
                .route("/webhooks/{provider}", post(api::webhooks::handle_webhook))
                .with_state(webhook_state),
        )
        .layer(tower::ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
