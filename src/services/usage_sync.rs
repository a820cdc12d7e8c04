use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::orders::store::{OrderStore, StoreError};
use crate::providers::error::ProviderError;
use crate::providers::registry::ProviderResolver;
use crate::services::notification::NotificationService;

#[derive(Debug, Default, Clone, Copy)]
pub struct UsageSyncStats {
    pub examined: usize,
    pub activated: usize,
    pub low_data: usize,
}

/// Polls vendors for per-SIM usage on provisioned orders. The first
/// sighting of a network-active profile stamps `activated_at`; the stamp
/// is write-once, so later sweeps leave it alone.
pub struct UsageSyncService {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<NotificationService>,
    batch_size: i64,
}

impl UsageSyncService {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            resolver,
            store,
            notifier,
            batch_size: 100,
        }
    }

    pub async fn run_sweep(&self) -> Result<UsageSyncStats, StoreError> {
        let orders = self.store.find_provisioned(self.batch_size).await?;
        let mut stats = UsageSyncStats {
            examined: orders.len(),
            ..UsageSyncStats::default()
        };

        for order in orders {
            let (Some(iccid), Some(provider_id)) = (&order.iccid, order.provider_id) else {
                continue;
            };
            let adapter = match self.resolver.resolve_by_id(provider_id).await {
                Ok((_record, adapter)) => adapter,
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "usage sync cannot resolve provider");
                    continue;
                }
            };

            let snapshot = match adapter.get_usage(iccid).await {
                Ok(snapshot) => snapshot,
                Err(ProviderError::NotSupported { .. }) => {
                    debug!(order_id = %order.id, provider = adapter.slug(), "vendor has no usage API");
                    continue;
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "usage query failed");
                    continue;
                }
            };

            if snapshot.active && !order.is_activated() {
                self.store.set_activated(order.id, Utc::now()).await?;
                info!(
                    order_id = %order.id,
                    display_id = %order.display_id,
                    iccid = %snapshot.iccid,
                    "profile first seen active on network"
                );
                stats.activated += 1;
            }

            if snapshot.is_low_data() {
                self.notifier.low_data(&order, &snapshot).await;
                stats.low_data += 1;
            }
        }

        Ok(stats)
    }
}
