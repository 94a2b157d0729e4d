//! Gateway adapters: a uniform interface over heterogeneous payment
//! providers. Adapters never propagate provider-reported failures or
//! transport errors as `Err`; both come back as failure outcomes with a
//! readable message so the orchestrator can surface them unchanged.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::GatewaysConfig;
use crate::entities::payment::PaymentGatewayKind;
use crate::errors::ServiceError;

pub mod flutterwave;
pub mod paystack;

pub use flutterwave::FlutterwaveGateway;
pub use paystack::PaystackGateway;

/// Charge initialization request passed to `PaymentGateway::process`.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub phone: Option<String>,
    pub name: Option<String>,
    /// Our correlation reference echoed into gateway metadata.
    pub customer_ref: String,
    pub callback_url: Option<String>,
}

/// Result of a charge initialization attempt.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub success: bool,
    pub message: String,
    pub transaction_id: Option<String>,
    pub redirect_url: Option<String>,
}

impl ChargeOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transaction_id: None,
            redirect_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub success: bool,
    pub message: String,
    pub transaction_id: Option<String>,
    /// Raw provider response, persisted into payment metadata on success.
    pub response: Option<Value>,
}

impl RefundOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transaction_id: None,
            response: None,
        }
    }
}

/// Canonical status reported by a provider webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Success,
    Failed,
    Pending,
}

/// Provider webhook body parsed into the canonical shape the orchestrator
/// reconciles against.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub transaction_id: String,
    pub status: WebhookStatus,
    pub amount: Decimal,
    pub metadata: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> PaymentGatewayKind;

    /// Initialize a charge. Infallible by contract: provider rejections and
    /// transport failures are both `success: false` outcomes.
    async fn process(&self, req: &ChargeRequest) -> ChargeOutcome;

    /// Issue a refund. Providers that reject or do not support the refund
    /// return a failure outcome, not an error.
    async fn refund(&self, req: &RefundRequest) -> RefundOutcome;

    fn supports_refunds(&self) -> bool {
        true
    }

    /// Header carrying the provider's webhook signature, if any.
    fn signature_header(&self) -> Option<&'static str>;

    /// Verify a webhook signature. `None` means the provider offers no
    /// verification; callers must log a warning and treat the payload as
    /// unauthenticated.
    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> Option<bool>;

    /// Pure parsing of the provider webhook body into the canonical shape.
    fn parse_webhook(&self, payload: &Value) -> Result<WebhookEvent, ServiceError>;
}

/// Resolves `gateway enum -> adapter instance`. Built once at construction
/// time from configured credentials; requesting an unconfigured gateway is a
/// hard error, never a silent fallback.
#[derive(Default)]
pub struct GatewayRegistry {
    adapters: HashMap<PaymentGatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from process configuration. Only providers with
    /// credentials present are registered.
    pub fn from_config(cfg: &GatewaysConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut registry = Self::new();
        if let Some(paystack) = &cfg.paystack {
            registry.register(Arc::new(PaystackGateway::new(
                http.clone(),
                paystack.secret_key.clone(),
                paystack.base_url.clone(),
            )));
        }
        if let Some(flutterwave) = &cfg.flutterwave {
            registry.register(Arc::new(FlutterwaveGateway::new(
                http.clone(),
                flutterwave.secret_key.clone(),
                flutterwave.secret_hash.clone(),
                flutterwave.base_url.clone(),
            )));
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn PaymentGateway>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn resolve(&self, kind: PaymentGatewayKind) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ServiceError::GatewayNotConfigured(kind.to_string()))
    }

    /// Parse a URL path segment into a configured gateway kind.
    pub fn kind_from_path(&self, segment: &str) -> Result<PaymentGatewayKind, ServiceError> {
        PaymentGatewayKind::from_str(segment)
            .map_err(|_| ServiceError::BadRequest(format!("unknown gateway '{}'", segment)))
    }
}

/// Decode a JSON amount that may arrive as a number or a numeric string.
pub(crate) fn json_amount(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        Some(Value::String(s)) => Decimal::from_str(s).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
