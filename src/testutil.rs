//! In-memory fakes and fixtures shared by the unit tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::orders::model::{generate_display_id, Order, OrderStatus, ProvisioningUpdate};
use crate::orders::store::{OrderStore, StoreError};
use crate::providers::adapter::EsimProvider;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::registry::{ProviderRecord, ProviderResolver, RegistryError};
use crate::providers::types::{
    CancelRequest, CancelResponse, OrderRequest, OrderResponse, RateLimit, RefundRequest,
    RefundResponse, StatusQuery, StatusResponse, UsageSnapshot, VendorWebhookEvent,
    WebhookVerification,
};
use crate::services::notification::{NotificationKind, NotificationStore};
use crate::services::payment_gateway::{
    GatewayError, GatewayRefundRequest, GatewayRefundResponse, PaymentGateway,
};
use crate::services::pricing::{PriceQuote, PricingError, PricingSource};

pub fn order_fixture(status: OrderStatus) -> Order {
    let id = Uuid::new_v4();
    Order {
        id,
        display_id: generate_display_id(&id),
        user_id: Uuid::new_v4(),
        package_id: Uuid::new_v4(),
        provider_id: Some(Uuid::new_v4()),
        vendor_order_id: None,
        request_id: None,
        iccid: None,
        quantity: 1,
        retail_price: BigDecimal::from(12),
        wholesale_price: BigDecimal::from(8),
        currency: "USD".to_string(),
        qr_code: None,
        qr_code_url: None,
        smdp_address: None,
        activation_code: None,
        roaming_enabled: false,
        apple_install_url: None,
        status,
        retry_count: 0,
        last_retry_at: None,
        last_status_check: None,
        failure_reason: None,
        payment_intent_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        activated_at: None,
    }
}

pub fn provider_record_fixture(slug: &str) -> ProviderRecord {
    ProviderRecord {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        display_name: slug.to_uppercase(),
        is_enabled: true,
        is_preferred: false,
        margin_percent: BigDecimal::from(20),
        webhook_secret: Some("whsec_test".to_string()),
        settings: serde_json::json!({"api_key": "key_test"}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// In-memory `OrderStore` that counts mutating writes so tests can assert
/// idempotence.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    pub mutations: AtomicUsize,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let store = Self::new();
        {
            let mut map = store.orders.lock().unwrap();
            for order in orders {
                map.insert(order.id, order);
            }
        }
        store
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError> {
        self.record_mutation();
        self.orders
            .lock()
            .unwrap()
            .insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_vendor_order_id(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.vendor_order_id.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_request_id(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.request_id.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_iccid(&self, iccid: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.iccid.as_deref() == Some(iccid))
            .cloned())
    }

    async fn find_due_for_status_check(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut due: Vec<Order> = orders
            .values()
            .filter(|o| {
                matches!(o.status, OrderStatus::Pending | OrderStatus::Processing)
                    && o.last_status_check.map_or(true, |t| t < cutoff)
            })
            .cloned()
            .collect();
        due.sort_by_key(|o| o.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find_retry_candidates(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut candidates: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::Failed && o.retry_count < max_retries)
            .cloned()
            .collect();
        candidates.sort_by_key(|o| o.created_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn find_provisioned(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut provisioned: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::Completed && o.iccid.is_some())
            .cloned()
            .collect();
        provisioned.sort_by_key(|o| o.created_at);
        provisioned.truncate(limit as usize);
        Ok(provisioned)
    }

    async fn touch_status_check(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        // Deliberately not counted as a mutation: the reconciler idempotence
        // property allows this write on every pass.
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("order {} not found", id)))?;
        order.last_status_check = Some(at);
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError> {
        self.record_mutation();
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("order {} not found", id)))?;
        order.status = status;
        order.failure_reason = failure_reason;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn apply_provisioning(
        &self,
        id: Uuid,
        update: &ProvisioningUpdate,
    ) -> Result<Order, StoreError> {
        self.record_mutation();
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("order {} not found", id)))?;
        if let Some(status) = update.status {
            order.status = status;
        }
        if let Some(v) = &update.iccid {
            order.iccid = Some(v.clone());
        }
        if let Some(v) = &update.qr_code {
            order.qr_code = Some(v.clone());
        }
        if let Some(v) = &update.qr_code_url {
            order.qr_code_url = Some(v.clone());
        }
        if let Some(v) = &update.smdp_address {
            order.smdp_address = Some(v.clone());
        }
        if let Some(v) = &update.activation_code {
            order.activation_code = Some(v.clone());
        }
        if let Some(v) = &update.apple_install_url {
            order.apple_install_url = Some(v.clone());
        }
        if let Some(v) = &update.vendor_order_id {
            order.vendor_order_id = Some(v.clone());
        }
        if let Some(v) = &update.request_id {
            order.request_id = Some(v.clone());
        }
        if let Some(v) = &update.failure_reason {
            order.failure_reason = Some(v.clone());
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn record_retry_outcome(
        &self,
        id: Uuid,
        retry_count: i32,
        last_retry_at: DateTime<Utc>,
        status: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, StoreError> {
        self.record_mutation();
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("order {} not found", id)))?;
        order.retry_count = retry_count;
        order.last_retry_at = Some(last_retry_at);
        order.status = status;
        order.failure_reason = failure_reason;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn set_activated(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.record_mutation();
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError(format!("order {} not found", id)))?;
        if order.activated_at.is_none() {
            order.activated_at = Some(at);
        }
        Ok(())
    }
}

/// Scriptable provider: responses are queued per operation and calls are
/// recorded for assertion.
pub struct StubProvider {
    pub slug: String,
    pub refunds: bool,
    pub cancellation: bool,
    pub threshold: u32,
    pub calls: Mutex<Vec<String>>,
    create_results: Mutex<VecDeque<ProviderResult<OrderResponse>>>,
    create_async_results: Mutex<VecDeque<ProviderResult<OrderResponse>>>,
    status_results: Mutex<VecDeque<ProviderResult<StatusResponse>>>,
    refund_results: Mutex<VecDeque<ProviderResult<RefundResponse>>>,
    cancel_results: Mutex<VecDeque<ProviderResult<CancelResponse>>>,
    usage_results: Mutex<VecDeque<ProviderResult<UsageSnapshot>>>,
}

impl StubProvider {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            refunds: false,
            cancellation: false,
            threshold: 5,
            calls: Mutex::new(Vec::new()),
            create_results: Mutex::new(VecDeque::new()),
            create_async_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            refund_results: Mutex::new(VecDeque::new()),
            cancel_results: Mutex::new(VecDeque::new()),
            usage_results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_capabilities(mut self, refunds: bool, cancellation: bool) -> Self {
        self.refunds = refunds;
        self.cancellation = cancellation;
        self
    }

    pub fn push_create(&self, result: ProviderResult<OrderResponse>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn push_create_async(&self, result: ProviderResult<OrderResponse>) {
        self.create_async_results.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: ProviderResult<StatusResponse>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    pub fn push_refund(&self, result: ProviderResult<RefundResponse>) {
        self.refund_results.lock().unwrap().push_back(result);
    }

    pub fn push_cancel(&self, result: ProviderResult<CancelResponse>) {
        self.cancel_results.lock().unwrap().push_back(result);
    }

    pub fn push_usage(&self, result: ProviderResult<UsageSnapshot>) {
        self.usage_results.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn pop<T>(queue: &Mutex<VecDeque<ProviderResult<T>>>, op: &str) -> ProviderResult<T> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted {} result left", op))
    }
}

#[async_trait]
impl EsimProvider for StubProvider {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn create_order(&self, _request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.record("create_order");
        Self::pop(&self.create_results, "create_order")
    }

    async fn create_order_async(&self, _request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.record("create_order_async");
        Self::pop(&self.create_async_results, "create_order_async")
    }

    async fn get_order_status(&self, query: &StatusQuery) -> ProviderResult<StatusResponse> {
        self.record(format!("get_order_status:{}", query.reference()));
        Self::pop(&self.status_results, "get_order_status")
    }

    async fn request_refund(&self, _request: &RefundRequest) -> ProviderResult<RefundResponse> {
        self.record("request_refund");
        Self::pop(&self.refund_results, "request_refund")
    }

    async fn cancel_order(&self, _request: &CancelRequest) -> ProviderResult<CancelResponse> {
        self.record("cancel_order");
        Self::pop(&self.cancel_results, "cancel_order")
    }

    fn validate_webhook(
        &self,
        _payload: &[u8],
        signature: Option<&str>,
    ) -> ProviderResult<WebhookVerification> {
        match signature {
            Some("valid") => Ok(WebhookVerification::ok()),
            _ => Ok(WebhookVerification::rejected("invalid stub signature")),
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> ProviderResult<VendorWebhookEvent> {
        let event: VendorWebhookEvent =
            serde_json::from_slice(payload).map_err(|e| ProviderError::MalformedResponse {
                message: e.to_string(),
            })?;
        Ok(event)
    }

    async fn get_usage(&self, iccid: &str) -> ProviderResult<UsageSnapshot> {
        self.record(format!("get_usage:{}", iccid));
        Self::pop(&self.usage_results, "get_usage")
    }

    fn supports_refunds(&self) -> bool {
        self.refunds
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellation
    }

    fn sync_rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_hour: 3600,
            requests_per_second: Some(2),
        }
    }

    fn sync_threshold(&self) -> u32 {
        self.threshold
    }
}

/// Resolver handing out stub providers keyed by record id and slug.
pub struct StubResolver {
    providers: HashMap<Uuid, (ProviderRecord, Arc<StubProvider>)>,
}

impl StubResolver {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(mut self, record: ProviderRecord, provider: Arc<StubProvider>) -> Self {
        self.providers.insert(record.id, (record, provider));
        self
    }
}

#[async_trait]
impl ProviderResolver for StubResolver {
    async fn resolve_by_id(
        &self,
        id: Uuid,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.providers
            .get(&id)
            .map(|(record, provider)| {
                (record.clone(), provider.clone() as Arc<dyn EsimProvider>)
            })
            .ok_or(RegistryError::UnknownProvider(id))
    }

    async fn resolve_by_slug(
        &self,
        slug: &str,
    ) -> Result<(ProviderRecord, Arc<dyn EsimProvider>), RegistryError> {
        self.providers
            .values()
            .find(|(record, _)| record.slug == slug)
            .map(|(record, provider)| {
                (record.clone(), provider.clone() as Arc<dyn EsimProvider>)
            })
            .ok_or_else(|| RegistryError::UnknownSlug(slug.to_string()))
    }
}

/// Notification store recording every emitted notification.
#[derive(Default)]
pub struct RecordingNotifications {
    pub sent: Mutex<Vec<(Uuid, NotificationKind, String)>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|(_, k, _)| *k).collect()
    }
}

#[async_trait]
impl NotificationStore for RecordingNotifications {
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        _message: &str,
        _metadata: JsonValue,
    ) -> Result<(), StoreError> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id, kind, title.to_string()));
        Ok(())
    }
}

/// Payment gateway with scripted outcomes and a call log.
pub struct StubGateway {
    pub calls: Mutex<Vec<GatewayRefundRequest>>,
    results: Mutex<VecDeque<Result<GatewayRefundResponse, GatewayError>>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, result: Result<GatewayRefundResponse, GatewayError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn succeed_next(&self) {
        self.push(Ok(GatewayRefundResponse {
            success: true,
            refund_id: Some("re_test".to_string()),
            amount: None,
            status: "succeeded".to_string(),
            error_message: None,
        }));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError> {
        self.calls.lock().unwrap().push(request.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted gateway result left"))
    }
}

/// Pricing source returning one fixed quote.
pub struct StubPricing {
    pub quote: PriceQuote,
}

impl StubPricing {
    pub fn for_provider(provider_id: Uuid) -> Self {
        Self {
            quote: PriceQuote {
                provider_id,
                package_code: "EU-10GB-30D".to_string(),
                retail_price: BigDecimal::from(12),
                wholesale_price: BigDecimal::from(8),
                currency: "USD".to_string(),
                roaming_enabled: true,
            },
        }
    }
}

#[async_trait]
impl PricingSource for StubPricing {
    async fn quote(&self, _package_id: Uuid, _quantity: u32) -> Result<PriceQuote, PricingError> {
        Ok(self.quote.clone())
    }
}
