//! Order lifecycle: submission, reconciliation, retries and refunds.

pub mod model;
pub mod reconciler;
pub mod refund;
pub mod retry;
pub mod store;
pub mod submission;

pub use model::{Order, OrderStatus, ProvisioningUpdate, MAX_RETRY_ATTEMPTS};
pub use reconciler::{ReconcilerConfig, StatusReconciler};
pub use refund::{check_eligibility, RefundAction, RefundOrchestrator, RefundOutcome};
pub use retry::{RetryCoordinator, RetryPolicy};
pub use store::{OrderStore, StoreError};
pub use submission::{OrderSubmissionService, SubmitOrderRequest};
