use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::orders::model::{Order, OrderStatus, ProvisioningUpdate};

/// Opaque persistence failure. Services treat the store as a collaborator
/// and never inspect driver-level detail.
#[derive(Debug, Error)]
#[error("order store error: {0}")]
pub struct StoreError(pub String);

/// Persistence contract for orders. All mutations are single-row writes;
/// orders are processed independently so no multi-row transactions exist.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_vendor_order_id(&self, reference: &str)
        -> Result<Option<Order>, StoreError>;

    async fn find_by_request_id(&self, reference: &str) -> Result<Option<Order>, StoreError>;

    async fn find_by_iccid(&self, iccid: &str) -> Result<Option<Order>, StoreError>;

    /// Orders in `pending`/`processing` whose `last_status_check` is null
    /// or older than `cutoff`, oldest first.
    async fn find_due_for_status_check(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError>;

    /// Orders in `failed` with `retry_count` below the cap.
    async fn find_retry_candidates(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError>;

    /// Completed orders holding an ICCID, for the usage sweep.
    async fn find_provisioned(&self, limit: i64) -> Result<Vec<Order>, StoreError>;

    /// Stamps `last_status_check` only. Issued before any vendor call so a
    /// throwing order is not reselected by the next sweep.
    async fn touch_status_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError>;

    /// Applies provisioning fields (and optionally a status) reported by a
    /// vendor. `None` fields are left untouched.
    async fn apply_provisioning(
        &self,
        id: Uuid,
        update: &ProvisioningUpdate,
    ) -> Result<Order, StoreError>;

    /// Writes the outcome of one retry attempt in a single update.
    async fn record_retry_outcome(
        &self,
        id: Uuid,
        retry_count: i32,
        last_retry_at: DateTime<Utc>,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError>;

    /// Stamps `activated_at` if and only if it is still null.
    async fn set_activated(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
