use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Unknown package: {0}")]
    UnknownPackage(Uuid),
    #[error("Pricing lookup failed: {0}")]
    Lookup(String),
}

/// Resolved price and vendor linkage for one package purchase. Pricing
/// computation (margins, discounts, currency conversion) happens upstream;
/// this is the already-settled quote the submission flow consumes.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub provider_id: Uuid,
    /// Vendor-side package code submitted with the order.
    pub package_code: String,
    pub retail_price: BigDecimal,
    pub wholesale_price: BigDecimal,
    pub currency: String,
    pub roaming_enabled: bool,
}

#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Quote for `quantity` units of `package_id`, prices already totalled.
    async fn quote(&self, package_id: Uuid, quantity: u32) -> Result<PriceQuote, PricingError>;
}
