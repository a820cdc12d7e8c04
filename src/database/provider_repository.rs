use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::providers::registry::{ProviderConfigStore, ProviderRecord, RegistryStoreError};

impl From<DatabaseError> for RegistryStoreError {
    fn from(e: DatabaseError) -> Self {
        RegistryStoreError(e.to_string())
    }
}

#[derive(Debug, Clone, FromRow)]
struct ProviderConfigRow {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub is_enabled: bool,
    pub is_preferred: bool,
    pub margin_percent: BigDecimal,
    pub webhook_secret: Option<String>,
    pub settings: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProviderConfigRow> for ProviderRecord {
    fn from(row: ProviderConfigRow) -> Self {
        ProviderRecord {
            id: row.id,
            slug: row.slug,
            display_name: row.display_name,
            is_enabled: row.is_enabled,
            is_preferred: row.is_preferred,
            margin_percent: row.margin_percent,
            webhook_secret: row.webhook_secret,
            settings: row.settings,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Vendor configuration rows backing the provider registry.
pub struct ProviderConfigRepository {
    pool: PgPool,
}

impl ProviderConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Flip a provider on or off. The registry picks the change up on its
    /// next cache refresh.
    pub async fn set_enabled(
        &self,
        slug: &str,
        is_enabled: bool,
    ) -> Result<ProviderRecord, DatabaseError> {
        let row = sqlx::query_as::<_, ProviderConfigRow>(
            "UPDATE esim_provider_configs
             SET is_enabled = $2, updated_at = NOW()
             WHERE slug = $1
             RETURNING id, slug, display_name, is_enabled, is_preferred, margin_percent, \
                       webhook_secret, settings, created_at, updated_at",
        )
        .bind(slug)
        .bind(is_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(row.into())
    }
}

#[async_trait]
impl ProviderConfigStore for ProviderConfigRepository {
    async fn find_all(&self) -> Result<Vec<ProviderRecord>, RegistryStoreError> {
        let rows = sqlx::query_as::<_, ProviderConfigRow>(
            "SELECT id, slug, display_name, is_enabled, is_preferred, margin_percent, \
                    webhook_secret, settings, created_at, updated_at
             FROM esim_provider_configs
             ORDER BY slug ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(ProviderRecord::from).collect())
    }
}
