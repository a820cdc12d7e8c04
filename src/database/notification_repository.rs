use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::orders::store::StoreError;
use crate::services::notification::{NotificationKind, NotificationStore};

/// Persists user notifications; delivery workers read them back out of the
/// same table.
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for NotificationRepository {
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: JsonValue,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, title, message, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind.as_str())
        .bind(title)
        .bind(message)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
