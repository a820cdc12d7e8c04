use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::services::pricing::{PriceQuote, PricingError, PricingSource};

#[derive(Debug, Clone, FromRow)]
struct PackagePricingRow {
    pub provider_id: Uuid,
    pub vendor_package_code: String,
    pub wholesale_price: BigDecimal,
    pub currency: String,
    pub roaming_enabled: bool,
    pub margin_percent: BigDecimal,
}

/// Catalog lookup joining a package to its vendor linkage and the
/// provider's configured margin.
pub struct PackageRepository {
    pool: PgPool,
}

impl PackageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PricingSource for PackageRepository {
    async fn quote(&self, package_id: Uuid, quantity: u32) -> Result<PriceQuote, PricingError> {
        let row = sqlx::query_as::<_, PackagePricingRow>(
            "SELECT p.provider_id, p.vendor_package_code, p.wholesale_price, p.currency, \
                    p.roaming_enabled, c.margin_percent
             FROM packages p
             JOIN esim_provider_configs c ON c.id = p.provider_id
             WHERE p.id = $1 AND p.is_active = TRUE",
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PricingError::Lookup(DatabaseError::from_sqlx(e).to_string()))?
        .ok_or(PricingError::UnknownPackage(package_id))?;

        let qty = BigDecimal::from(quantity);
        let wholesale_total = &row.wholesale_price * &qty;
        let markup = &row.margin_percent / BigDecimal::from(100);
        let retail_total = &wholesale_total * (BigDecimal::from(1) + markup);

        Ok(PriceQuote {
            provider_id: row.provider_id,
            package_code: row.vendor_package_code,
            retail_price: retail_total,
            wholesale_price: wholesale_total,
            currency: row.currency,
            roaming_enabled: row.roaming_enabled,
        })
    }
}
