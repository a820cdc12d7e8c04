use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::orders::model::{Order, OrderStatus, ProvisioningUpdate};
use crate::orders::store::{OrderStore, StoreError};

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        StoreError(e.to_string())
    }
}

/// Raw `orders` row. Status is stored as text and validated on the way
/// out so an unknown value fails loudly instead of deserializing wrong.
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    pub id: Uuid,
    pub display_id: String,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub vendor_order_id: Option<String>,
    pub request_id: Option<String>,
    pub iccid: Option<String>,
    pub quantity: i32,
    pub retail_price: BigDecimal,
    pub wholesale_price: BigDecimal,
    pub currency: String,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub roaming_enabled: bool,
    pub apple_install_url: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, DatabaseError> {
        let status = OrderStatus::from_db_status(&self.status).ok_or_else(|| {
            DatabaseError::mapping(format!("unknown order status in row: {}", self.status))
        })?;
        Ok(Order {
            id: self.id,
            display_id: self.display_id,
            user_id: self.user_id,
            package_id: self.package_id,
            provider_id: self.provider_id,
            vendor_order_id: self.vendor_order_id,
            request_id: self.request_id,
            iccid: self.iccid,
            quantity: self.quantity,
            retail_price: self.retail_price,
            wholesale_price: self.wholesale_price,
            currency: self.currency,
            qr_code: self.qr_code,
            qr_code_url: self.qr_code_url,
            smdp_address: self.smdp_address,
            activation_code: self.activation_code,
            roaming_enabled: self.roaming_enabled,
            apple_install_url: self.apple_install_url,
            status,
            retry_count: self.retry_count,
            last_retry_at: self.last_retry_at,
            last_status_check: self.last_status_check,
            failure_reason: self.failure_reason,
            payment_intent_id: self.payment_intent_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            activated_at: self.activated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, display_id, user_id, package_id, provider_id, vendor_order_id, \
     request_id, iccid, quantity, retail_price, wholesale_price, currency, qr_code, qr_code_url, \
     smdp_address, activation_code, roaming_enabled, apple_install_url, status, retry_count, \
     last_retry_at, last_status_check, failure_reason, payment_intent_id, created_at, updated_at, \
     activated_at";

/// Postgres-backed order store.
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        sql: String,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(OrderRow::into_order).transpose()
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders ({})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                     $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
             RETURNING {}",
            ORDER_COLUMNS, ORDER_COLUMNS
        ))
        .bind(order.id)
        .bind(&order.display_id)
        .bind(order.user_id)
        .bind(order.package_id)
        .bind(order.provider_id)
        .bind(&order.vendor_order_id)
        .bind(&order.request_id)
        .bind(&order.iccid)
        .bind(order.quantity)
        .bind(&order.retail_price)
        .bind(&order.wholesale_price)
        .bind(&order.currency)
        .bind(&order.qr_code)
        .bind(&order.qr_code_url)
        .bind(&order.smdp_address)
        .bind(&order.activation_code)
        .bind(order.roaming_enabled)
        .bind(&order.apple_install_url)
        .bind(order.status.as_str())
        .bind(order.retry_count)
        .bind(order.last_retry_at)
        .bind(order.last_status_check)
        .bind(&order.failure_reason)
        .bind(&order.payment_intent_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.activated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into_order()?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(OrderRow::into_order).transpose()?)
    }

    async fn find_by_vendor_order_id(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .fetch_optional(
                format!(
                    "SELECT {} FROM orders WHERE vendor_order_id = $1",
                    ORDER_COLUMNS
                ),
                reference,
            )
            .await?)
    }

    async fn find_by_request_id(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .fetch_optional(
                format!("SELECT {} FROM orders WHERE request_id = $1", ORDER_COLUMNS),
                reference,
            )
            .await?)
    }

    async fn find_by_iccid(&self, iccid: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .fetch_optional(
                format!("SELECT {} FROM orders WHERE iccid = $1", ORDER_COLUMNS),
                iccid,
            )
            .await?)
    }

    async fn find_due_for_status_check(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE status IN ('pending', 'processing')
               AND (last_status_check IS NULL OR last_status_check < $1)
             ORDER BY created_at ASC
             LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows
            .into_iter()
            .map(OrderRow::into_order)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_retry_candidates(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE status = 'failed' AND retry_count < $1
             ORDER BY created_at ASC
             LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows
            .into_iter()
            .map(OrderRow::into_order)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_provisioned(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders
             WHERE status = 'completed' AND iccid IS NOT NULL
             ORDER BY created_at ASC
             LIMIT $1",
            ORDER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows
            .into_iter()
            .map(OrderRow::into_order)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn touch_status_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET last_status_check = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET status = $2, failure_reason = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(failure_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into_order()?)
    }

    async fn apply_provisioning(
        &self,
        id: Uuid,
        update: &ProvisioningUpdate,
    ) -> Result<Order, StoreError> {
        // COALESCE keeps any field the update leaves as None.
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET
                 status = COALESCE($2, status),
                 iccid = COALESCE($3, iccid),
                 qr_code = COALESCE($4, qr_code),
                 qr_code_url = COALESCE($5, qr_code_url),
                 smdp_address = COALESCE($6, smdp_address),
                 activation_code = COALESCE($7, activation_code),
                 apple_install_url = COALESCE($8, apple_install_url),
                 vendor_order_id = COALESCE($9, vendor_order_id),
                 request_id = COALESCE($10, request_id),
                 failure_reason = COALESCE($11, failure_reason),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.iccid)
        .bind(&update.qr_code)
        .bind(&update.qr_code_url)
        .bind(&update.smdp_address)
        .bind(&update.activation_code)
        .bind(&update.apple_install_url)
        .bind(&update.vendor_order_id)
        .bind(&update.request_id)
        .bind(&update.failure_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into_order()?)
    }

    async fn record_retry_outcome(
        &self,
        id: Uuid,
        retry_count: i32,
        last_retry_at: DateTime<Utc>,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET retry_count = $2, last_retry_at = $3, status = $4, failure_reason = $5,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(id)
        .bind(retry_count)
        .bind(last_retry_at)
        .bind(status.as_str())
        .bind(failure_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into_order()?)
    }

    async fn set_activated(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET activated_at = $2 WHERE id = $1 AND activated_at IS NULL")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
