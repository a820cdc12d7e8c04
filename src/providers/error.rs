use thiserror::Error;

/// Errors surfaced by vendor adapters.
///
/// The `retryable` distinction drives the order lifecycle: retryable errors
/// were already retried inside the adapter's HTTP layer and, if they still
/// surface, leave the order in `failed` for the retry coordinator to pick
/// up. Non-retryable errors also mark the order `failed` but signal that an
/// immediate re-attempt is unlikely to help.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Network error calling {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("Rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Vendor error from {provider}: {message}")]
    Vendor {
        provider: String,
        message: String,
        vendor_code: Option<String>,
        retryable: bool,
    },

    #[error("{provider} has no record for reference {reference}")]
    OrderNotFound { provider: String, reference: String },

    #[error("Webhook verification failed: {reason}")]
    WebhookVerification { reason: String },

    #[error("Malformed vendor response: {message}")]
    MalformedResponse { message: String },

    #[error("Operation not supported by {provider}: {operation}")]
    NotSupported { provider: String, operation: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::Vendor { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// True when the vendor simply has no record for our stored reference.
    /// Callers treat this as a reconciliation gap rather than a failure.
    pub fn is_reconciliation_gap(&self) -> bool {
        matches!(self, ProviderError::OrderNotFound { .. })
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
