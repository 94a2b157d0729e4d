use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ConnectOptions, Database};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use payments_api::cache::{CacheBackend, InMemoryCache};
use payments_api::config::AppConfig;
use payments_api::coordination::DistributedLock;
use payments_api::entities::payment::PaymentGatewayKind;
use payments_api::errors::ServiceError;
use payments_api::events::{EventPublisher, PaymentEvent};
use payments_api::gateways::{
    ChargeOutcome, ChargeRequest, GatewayRegistry, PaymentGateway, RefundOutcome, RefundRequest,
    WebhookEvent, WebhookStatus,
};
use payments_api::handlers::AppServices;
use payments_api::repositories::PaymentRepository;
use payments_api::services::payments::InitializePaymentRequest;
use payments_api::services::PaymentService;
use payments_api::AppState;

/// Gateway double with scripted outcomes and call counters.
#[derive(Debug)]
pub struct ScriptedGateway {
    kind: PaymentGatewayKind,
    pub charge_outcome: Mutex<ChargeOutcome>,
    pub refund_outcome: Mutex<RefundOutcome>,
    pub refunds_supported: AtomicBool,
    /// What `verify_webhook` reports; `None` models a provider without
    /// signature support.
    pub verification: Mutex<Option<bool>>,
    pub process_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn paystack() -> Self {
        Self {
            kind: PaymentGatewayKind::Paystack,
            charge_outcome: Mutex::new(ChargeOutcome {
                success: true,
                message: "Authorization URL created".to_string(),
                transaction_id: Some("pay_123".to_string()),
                redirect_url: Some("https://pay/123".to_string()),
            }),
            refund_outcome: Mutex::new(RefundOutcome {
                success: true,
                message: "Refund has been queued for processing".to_string(),
                transaction_id: Some("pay_123".to_string()),
                response: Some(json!({ "refund_reference": "rf_1" })),
            }),
            refunds_supported: AtomicBool::new(true),
            verification: Mutex::new(Some(true)),
            process_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_charge_outcome(&self, outcome: ChargeOutcome) {
        *self.charge_outcome.lock().unwrap() = outcome;
    }

    pub fn set_verification(&self, verification: Option<bool>) {
        *self.verification.lock().unwrap() = verification;
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn kind(&self) -> PaymentGatewayKind {
        self.kind
    }

    async fn process(&self, _req: &ChargeRequest) -> ChargeOutcome {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        self.charge_outcome.lock().unwrap().clone()
    }

    async fn refund(&self, _req: &RefundRequest) -> RefundOutcome {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.refund_outcome.lock().unwrap().clone()
    }

    fn supports_refunds(&self) -> bool {
        self.refunds_supported.load(Ordering::SeqCst)
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("x-test-signature")
    }

    fn verify_webhook(&self, _payload: &[u8], _signature: Option<&str>) -> Option<bool> {
        *self.verification.lock().unwrap()
    }

    fn parse_webhook(&self, payload: &Value) -> Result<WebhookEvent, ServiceError> {
        let transaction_id = payload
            .get("transaction_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadRequest("missing transaction_id".into()))?;
        let status = match payload.get("status").and_then(Value::as_str) {
            Some("success") => WebhookStatus::Success,
            Some("failed") => WebhookStatus::Failed,
            _ => WebhookStatus::Pending,
        };
        let amount = payload
            .get("amount")
            .and_then(Value::as_i64)
            .map(Decimal::from)
            .unwrap_or(dec!(0));
        Ok(WebhookEvent {
            transaction_id: transaction_id.to_string(),
            status,
            amount,
            metadata: payload.clone(),
        })
    }
}

/// Publisher double that records every event.
#[derive(Default)]
pub struct CapturingPublisher {
    events: AsyncMutex<Vec<PaymentEvent>>,
}

impl CapturingPublisher {
    pub async fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish_with_key(
        &self,
        _key: Option<&str>,
        event: &PaymentEvent,
    ) -> Result<(), ServiceError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Application harness backed by in-memory SQLite, an in-memory cache, a
/// scripted gateway, and a capturing publisher.
pub struct TestApp {
    pub state: AppState,
    pub service: Arc<PaymentService>,
    pub gateway: Arc<ScriptedGateway>,
    pub publisher: Arc<CapturingPublisher>,
}

impl TestApp {
    pub async fn new() -> Self {
        // A short lock TTL so replay tests can cross the expiry window.
        Self::with_lock_ttl(Duration::from_millis(200)).await
    }

    pub async fn with_lock_ttl(lock_ttl: Duration) -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.expect("sqlite connects");
        payments_api::db::ensure_schema(&db)
            .await
            .expect("schema creates");
        let db = Arc::new(db);

        let cache = Arc::new(InMemoryCache::new());
        let gateway = Arc::new(ScriptedGateway::paystack());
        let mut registry = GatewayRegistry::new();
        registry.register(gateway.clone());
        let gateways = Arc::new(registry);

        let publisher = Arc::new(CapturingPublisher::default());
        let repo = PaymentRepository::new(
            db.clone(),
            cache.clone() as Arc<dyn CacheBackend>,
            Duration::from_secs(300),
        );
        let lock = DistributedLock::new(cache.clone() as Arc<dyn CacheBackend>, lock_ttl);
        let service = Arc::new(PaymentService::new(
            db.clone(),
            repo,
            gateways.clone(),
            publisher.clone() as Arc<dyn EventPublisher>,
            lock,
            None,
        ));

        let state = AppState {
            db,
            config: AppConfig::new("sqlite::memory:", "redis://127.0.0.1:6379"),
            redis: Arc::new(
                redis::Client::open("redis://127.0.0.1:6379").expect("client constructs"),
            ),
            gateways,
            services: AppServices {
                payments: service.clone(),
            },
        };

        Self {
            state,
            service,
            gateway,
            publisher,
        }
    }

    pub fn router(&self) -> axum::Router {
        payments_api::app(self.state.clone())
    }
}

pub fn initialize_request(order_id: Uuid, amount: Decimal) -> InitializePaymentRequest {
    InitializePaymentRequest {
        order_id,
        customer_id: Uuid::new_v4(),
        owner_id: None,
        store_id: None,
        gateway: PaymentGatewayKind::Paystack,
        method: None,
        amount,
        currency: "NGN".to_string(),
        customer_email: "a@b.com".to_string(),
        customer_name: Some("Ada Bello".to_string()),
        phone: None,
    }
}

pub fn webhook_body(transaction_id: &str, status: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "transaction_id": transaction_id,
        "status": status,
        "amount": amount,
    }))
    .expect("webhook body serializes")
}
