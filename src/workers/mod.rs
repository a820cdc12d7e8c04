//! Background sweep workers. Each owns one periodic loop and stops on the
//! shared shutdown signal; a failed cycle is logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::orders::reconciler::StatusReconciler;
use crate::orders::retry::RetryCoordinator;
use crate::services::usage_sync::UsageSyncService;

/// Polls vendors for in-flight orders on a fixed cadence.
pub struct ReconcileWorker {
    reconciler: Arc<StatusReconciler>,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<StatusReconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "status reconciliation worker started"
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("status reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.reconciler.run_sweep().await {
                        warn!(error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }
        info!("status reconciliation worker stopped");
    }
}

/// Re-drives failed orders on a fixed cadence; eligibility windows are
/// enforced inside the coordinator.
pub struct RetryWorker {
    coordinator: Arc<RetryCoordinator>,
    interval: Duration,
}

impl RetryWorker {
    pub fn new(coordinator: Arc<RetryCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "order retry worker started"
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("order retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.coordinator.run_sweep().await {
                        warn!(error = %e, "retry sweep failed");
                    }
                }
            }
        }
        info!("order retry worker stopped");
    }
}

/// Periodic per-SIM usage poll for provisioned orders.
pub struct UsageSyncWorker {
    service: Arc<UsageSyncService>,
    interval: Duration,
}

impl UsageSyncWorker {
    pub fn new(service: Arc<UsageSyncService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "usage sync worker started"
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("usage sync worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.service.run_sweep().await {
                        warn!(error = %e, "usage sync sweep failed");
                    }
                }
            }
        }
        info!("usage sync worker stopped");
    }
}
