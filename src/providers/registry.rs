use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::providers::adapter::EsimProvider;
use crate::providers::error::ProviderError;
use crate::providers::vendors::{
    GlobimoAdapter, GlobimoConfig, MobiroamAdapter, MobiroamConfig, VoyatelAdapter, VoyatelConfig,
    GLOBIMO_SLUG, MOBIROAM_SLUG, VOYATEL_SLUG,
};

/// Vendor configuration row. Mutated only by admin tooling; read-only here.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
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

/// Source of provider configuration rows.
#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<ProviderRecord>, RegistryStoreError>;
}

/// Opaque store failure, kept separate from configuration errors so callers
/// can tell "database down" apart from "vendor misconfigured".
#[derive(Debug, Error)]
#[error("provider config store error: {0}")]
pub struct RegistryStoreError(pub String);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown provider id: {0}")]
    UnknownProvider(Uuid),
    #[error("Unknown provider slug: {0}")]
    UnknownSlug(String),
    #[error("Provider {0} is disabled")]
    ProviderDisabled(String),
    #[error("No enabled providers configured")]
    NoProvidersAvailable,
    #[error("Provider {slug} misconfigured: {source}")]
    Misconfigured {
        slug: String,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Store(#[from] RegistryStoreError),
}

/// Resolution seam consumed by the orchestration services. The registry is
/// the production implementation; tests substitute scripted adapters.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    async fn resolve_by_id(
        &self,
        id: Uuid,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError>;

    async fn resolve_by_slug(
        &self,
        slug: &str,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError>;
}

#[async_trait]
impl ProviderResolver for ProviderRegistry {
    async fn resolve_by_id(
        &self,
        id: Uuid,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.get_by_id(id).await
    }

    async fn resolve_by_slug(
        &self,
        slug: &str,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.get_by_slug(slug).await
    }
}

struct ConfigCache {
    by_id: HashMap<Uuid, ProviderRecord>,
    by_slug: HashMap<String, ProviderRecord>,
    loaded_at: Instant,
}

/// Resolves vendor configuration and adapter instances.
///
/// Configuration rows are cached by id and slug together with a short TTL;
/// on expiry the full set is refetched and both maps are rebuilt in one
/// step so they never disagree. Adapter instances are memoized per vendor
/// id for the process lifetime; a configuration refresh does not recreate
/// an adapter, only `clear_cache` does.
pub struct ProviderRegistry {
    store: Arc<dyn ProviderConfigStore>,
    ttl: Duration,
    cache: RwLock<Option<ConfigCache>>,
    adapters: RwLock<HashMap<Uuid, Arc<dyn EsimProvider>>>,
}

impl ProviderRegistry {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new(store: Arc<dyn ProviderConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(None),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_by_id(
        &self,
        id: Uuid,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.refresh_if_stale().await?;
        let record = {
            let cache = self.cache.read().await;
            cache
                .as_ref()
                .and_then(|c| c.by_id.get(&id).cloned())
                .ok_or(RegistryError::UnknownProvider(id))?
        };
        if !record.is_enabled {
            return Err(RegistryError::ProviderDisabled(record.slug));
        }
        let adapter = self.adapter_for(&record).await?;
        Ok((record, adapter))
    }

    pub async fn get_by_slug(
        &self,
        slug: &str,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.refresh_if_stale().await?;
        let record = {
            let cache = self.cache.read().await;
            cache
                .as_ref()
                .and_then(|c| c.by_slug.get(slug).cloned())
                .ok_or_else(|| RegistryError::UnknownSlug(slug.to_string()))?
        };
        if !record.is_enabled {
            return Err(RegistryError::ProviderDisabled(record.slug));
        }
        let adapter = self.adapter_for(&record).await?;
        Ok((record, adapter))
    }

    pub async fn get_all_enabled(&self) -> Result<Vec<ProviderRecord>, RegistryError> {
        self.refresh_if_stale().await?;
        let cache = self.cache.read().await;
        let mut enabled: Vec<ProviderRecord> = cache
            .as_ref()
            .map(|c| c.by_id.values().filter(|r| r.is_enabled).cloned().collect())
            .unwrap_or_default();
        enabled.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(enabled)
    }

    /// The preferred vendor, falling back to the first enabled one when no
    /// row is flagged preferred.
    pub async fn get_preferred(
        &self,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        let enabled = self.get_all_enabled().await?;
        let record = enabled
            .iter()
            .find(|r| r.is_preferred)
            .or_else(|| enabled.first())
            .cloned()
            .ok_or(RegistryError::NoProvidersAvailable)?;
        let adapter = self.adapter_for(&record).await?;
        Ok((record, adapter))
    }

    /// Drops both the configuration cache and all memoized adapters. The
    /// next lookup refetches configuration and reconstructs adapters.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        let mut adapters = self.adapters.write().await;
        *cache = None;
        adapters.clear();
        info!("provider registry cache cleared");
    }

    async fn refresh_if_stale(&self) -> Result<(), RegistryError> {
        {
            let cache = self.cache.read().await;
            if let Some(c) = cache.as_ref() {
                if c.loaded_at.elapsed() < self.ttl {
                    return Ok(());
                }
            }
        }

        let records = self
            .store
            .find_all()
            .await
            .map_err(RegistryError::Store)?;
        let mut by_id = HashMap::with_capacity(records.len());
        let mut by_slug = HashMap::with_capacity(records.len());
        for record in records {
            by_slug.insert(record.slug.clone(), record.clone());
            by_id.insert(record.id, record);
        }
        debug!(providers = by_id.len(), "provider configuration cache rebuilt");

        let mut cache = self.cache.write().await;
        *cache = Some(ConfigCache {
            by_id,
            by_slug,
            loaded_at: Instant::now(),
        });
        Ok(())
    }

    async fn adapter_for(
        &self,
        record: &ProviderRecord,
    ) -> Result<Arc<dyn EsimProvider>, RegistryError> {
        {
            let adapters = self.adapters.read().await;
            if let Some(adapter) = adapters.get(&record.id) {
                return Ok(adapter.clone());
            }
        }

        let adapter = build_adapter(record)?;
        let mut adapters = self.adapters.write().await;
        let entry = adapters.entry(record.id).or_insert(adapter);
        Ok(entry.clone())
    }
}

/// Closed slug-to-constructor table. Adding a vendor means adding one arm
/// here plus its adapter module; shared orchestration logic never branches
/// on vendor identity.
fn build_adapter(record: &ProviderRecord) -> Result<Arc<dyn EsimProvider>, RegistryError> {
    let misconfigured = |source: ProviderError| RegistryError::Misconfigured {
        slug: record.slug.clone(),
        source,
    };

    match record.slug.as_str() {
        VOYATEL_SLUG => {
            let config =
                VoyatelConfig::from_settings(&record.settings, record.webhook_secret.clone())
                    .map_err(misconfigured)?;
            Ok(Arc::new(VoyatelAdapter::new(config).map_err(misconfigured)?))
        }
        GLOBIMO_SLUG => {
            let config =
                GlobimoConfig::from_settings(&record.settings, record.webhook_secret.clone())
                    .map_err(misconfigured)?;
            Ok(Arc::new(GlobimoAdapter::new(config).map_err(misconfigured)?))
        }
        MOBIROAM_SLUG => {
            let config =
                MobiroamConfig::from_settings(&record.settings, record.webhook_secret.clone())
                    .map_err(misconfigured)?;
            Ok(Arc::new(
                MobiroamAdapter::new(config).map_err(misconfigured)?,
            ))
        }
        other => Err(RegistryError::UnknownSlug(other.to_string())),
    }
}
