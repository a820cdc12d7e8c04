pub mod notification;
pub mod payment_gateway;
pub mod pricing;
pub mod usage_sync;
pub mod webhook_processor;

pub use notification::{NotificationKind, NotificationService, NotificationStore};
pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use pricing::{PriceQuote, PricingSource};
pub use usage_sync::UsageSyncService;
pub use webhook_processor::{WebhookDisposition, WebhookError, WebhookProcessor};
