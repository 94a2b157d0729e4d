use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::coordination::{DistributedLock, RequestCoalescer};
use crate::entities::payment::{
    Model as PaymentModel, PaymentGatewayKind, PaymentMethod, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::events::{EventHandler, EventPublisher, PaymentEvent};
use crate::gateways::{ChargeRequest, GatewayRegistry, RefundRequest, WebhookStatus};
use crate::repositories::{
    NewPayment, PaymentFilter, PaymentRepository, StorePaymentStats,
};

fn validate_positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must be greater than 0".into());
        Err(err)
    }
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

fn default_currency() -> String {
    "NGN".to_string()
}

/// Request to initialize a payment for an order
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct InitializePaymentRequest {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub gateway: PaymentGatewayKind,
    pub method: Option<PaymentMethod>,
    #[validate(custom = "validate_positive_decimal")]
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub currency: String,
    #[validate(email)]
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
}

/// Response for a payment initialization
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InitializePaymentResponse {
    pub payment_id: String,
    pub redirect_url: Option<String>,
}

/// Request to refund a payment
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct RefundPaymentRequest {
    #[validate(custom = "validate_positive_decimal")]
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// How a webhook was reconciled against the stored payment.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Confirmed(PaymentModel),
    Failed(PaymentModel),
    AlreadyProcessed(PaymentModel),
    PendingUpdate(PaymentModel),
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            WebhookOutcome::Confirmed(_) => "payment confirmed",
            WebhookOutcome::Failed(_) => "payment failed",
            WebhookOutcome::AlreadyProcessed(_) => "already processed",
            WebhookOutcome::PendingUpdate(_) => "pending update recorded",
        }
    }

    pub fn payment(&self) -> &PaymentModel {
        match self {
            WebhookOutcome::Confirmed(p)
            | WebhookOutcome::Failed(p)
            | WebhookOutcome::AlreadyProcessed(p)
            | WebhookOutcome::PendingUpdate(p) => p,
        }
    }
}

/// The payment state machine.
///
/// Initializes payments against the resolved gateway adapter, reconciles
/// webhooks into status transitions, issues refunds, and publishes the
/// lifecycle events other services react to. Gateway-facing calls are
/// single-attempt: transient provider errors surface to the caller, which
/// retries at the HTTP layer.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    repo: PaymentRepository,
    gateways: Arc<GatewayRegistry>,
    publisher: Arc<dyn EventPublisher>,
    lock: DistributedLock,
    confirm_coalescer: RequestCoalescer<PaymentModel>,
    callback_base_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        repo: PaymentRepository,
        gateways: Arc<GatewayRegistry>,
        publisher: Arc<dyn EventPublisher>,
        lock: DistributedLock,
        callback_base_url: Option<String>,
    ) -> Self {
        Self {
            db,
            repo,
            gateways,
            publisher,
            lock,
            confirm_coalescer: RequestCoalescer::new(),
            callback_base_url,
        }
    }

    fn callback_url(&self, order_id: Uuid) -> Option<String> {
        self.callback_base_url
            .as_ref()
            .map(|base| format!("{}/payments/callback?order_id={}", base, order_id))
    }

    /// Initialize a payment for an order.
    ///
    /// The existence check and the insert share one storage transaction so a
    /// concurrent retry cannot slip a second record in between. A retry that
    /// finds its own `Pending` record gets the stored reference back without
    /// a second gateway call, which is what prevents duplicate charges.
    #[instrument(skip(self, req), fields(order_id = %req.order_id, gateway = %req.gateway))]
    pub async fn initialize_payment(
        &self,
        req: InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse, ServiceError> {
        req.validate()?;

        let txn = self.db.begin().await?;

        if let Some(existing) = self
            .repo
            .find_conflicting_by_order_id(&txn, req.order_id)
            .await?
        {
            return match existing.status {
                PaymentStatus::Success => Err(ServiceError::InvalidOperation(format!(
                    "payment for order {} already completed",
                    req.order_id
                ))),
                _ => {
                    info!(
                        payment_id = %existing.payment_id,
                        "returning existing pending initialization"
                    );
                    let redirect_url = existing
                        .metadata
                        .get("redirect_url")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Ok(InitializePaymentResponse {
                        payment_id: existing.payment_id,
                        redirect_url,
                    })
                }
            };
        }

        let adapter = self.gateways.resolve(req.gateway)?;
        let charge = ChargeRequest {
            amount: req.amount,
            currency: req.currency.clone(),
            email: req.customer_email.clone(),
            phone: req.phone.clone(),
            name: req.customer_name.clone(),
            customer_ref: req.order_id.to_string(),
            callback_url: self.callback_url(req.order_id),
        };

        let outcome = adapter.process(&charge).await;
        if !outcome.success {
            warn!(message = %outcome.message, "gateway rejected payment initialization");
            return Err(ServiceError::PaymentFailed(outcome.message));
        }
        let transaction_id = outcome.transaction_id.ok_or_else(|| {
            ServiceError::PaymentFailed("gateway returned no transaction reference".to_string())
        })?;

        let saga_id = Uuid::new_v4().to_string();
        let model = self
            .repo
            .create(
                &txn,
                NewPayment {
                    order_id: req.order_id,
                    customer_id: req.customer_id,
                    owner_id: req.owner_id,
                    store_id: req.store_id,
                    payment_id: transaction_id,
                    amount: req.amount,
                    currency: req.currency,
                    gateway: req.gateway,
                    method: req.method.unwrap_or(PaymentMethod::Card),
                    customer_email: req.customer_email,
                    customer_name: req.customer_name,
                    metadata: json!({ "redirect_url": outcome.redirect_url.clone() }),
                    saga_id,
                },
            )
            .await?;
        txn.commit().await?;

        self.repo.cache_payment(&model).await;
        info!(
            payment_id = %model.payment_id,
            saga_id = %model.saga_id,
            "payment initialized"
        );

        Ok(InitializePaymentResponse {
            payment_id: model.payment_id,
            redirect_url: outcome.redirect_url,
        })
    }

    /// Reconcile a provider webhook into the payment state machine.
    #[instrument(skip(self, raw_body, signature), fields(gateway = %gateway))]
    pub async fn handle_webhook(
        &self,
        gateway: PaymentGatewayKind,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let adapter = self.gateways.resolve(gateway)?;

        match adapter.verify_webhook(raw_body, signature) {
            Some(true) => {}
            Some(false) => {
                warn!("webhook signature verification failed");
                return Err(ServiceError::WebhookRejected(format!(
                    "invalid {} webhook signature",
                    gateway
                )));
            }
            None => {
                warn!("gateway {} offers no webhook verification, accepting unauthenticated payload", gateway);
            }
        }

        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;
        let event = adapter.parse_webhook(&payload)?;

        // Fail fast on contention: a parallel delivery of the same webhook is
        // already driving this transition. No retry here; the provider will.
        let lock_key = format!("payment:webhook:{}", event.transaction_id);
        if !self.lock.try_acquire(&lock_key).await? {
            info!(transaction_id = %event.transaction_id, "webhook already being processed");
            return Err(ServiceError::LockContended(format!(
                "payment {} is already being processed",
                event.transaction_id
            )));
        }

        let payment = self
            .repo
            .find_by_payment_id(&event.transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment {} not found", event.transaction_id))
            })?;

        match (payment.status, event.status) {
            // Idempotence short-circuit: the webhook repeats what we already
            // know. Return the record unchanged, publish nothing.
            (PaymentStatus::Success, WebhookStatus::Success)
            | (PaymentStatus::Failed, WebhookStatus::Failed) => {
                info!(payment_id = %payment.payment_id, "duplicate webhook, state unchanged");
                Ok(WebhookOutcome::AlreadyProcessed(payment))
            }
            (_, WebhookStatus::Success) if event.amount < payment.amount => {
                warn!(
                    payment_id = %payment.payment_id,
                    expected = %payment.amount,
                    reported = %event.amount,
                    "webhook amount below stored amount, treating as failure"
                );
                let failed = self
                    .fail_payment(
                        &event.transaction_id,
                        format!(
                            "amount mismatch: expected {}, gateway reported {}",
                            payment.amount, event.amount
                        ),
                    )
                    .await?;
                Ok(WebhookOutcome::Failed(failed))
            }
            (_, WebhookStatus::Success) => {
                let confirmed = self
                    .confirm_payment(&event.transaction_id, event.metadata)
                    .await?;
                Ok(WebhookOutcome::Confirmed(confirmed))
            }
            (_, WebhookStatus::Failed) => {
                let reason = event
                    .metadata
                    .get("gateway_response")
                    .or_else(|| event.metadata.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("payment failed at gateway")
                    .to_string();
                let failed = self.fail_payment(&event.transaction_id, reason).await?;
                Ok(WebhookOutcome::Failed(failed))
            }
            (_, WebhookStatus::Pending) => {
                let updated = self
                    .repo
                    .patch_metadata(&event.transaction_id, "last_webhook", event.metadata)
                    .await?;
                Ok(WebhookOutcome::PendingUpdate(updated))
            }
        }
    }

    /// Confirm a pending payment.
    ///
    /// Coalesced per transaction id: concurrent duplicate confirmations
    /// execute the transition exactly once and every caller observes the
    /// same result. The publish failure propagates even though the status
    /// change has committed; a lost event is a reconciliation gap, not a
    /// lost payment.
    pub async fn confirm_payment(
        &self,
        transaction_id: &str,
        gateway_metadata: Value,
    ) -> Result<PaymentModel, ServiceError> {
        let key = format!("confirm:{}", transaction_id);
        let repo = self.repo.clone();
        let publisher = self.publisher.clone();
        let transaction_id = transaction_id.to_string();

        self.confirm_coalescer
            .execute(&key, || async move {
                let payment = repo
                    .find_by_payment_id(&transaction_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("payment {} not found", transaction_id))
                    })?;
                if payment.status == PaymentStatus::Success {
                    return Ok(payment);
                }

                let updated = repo
                    .update_status(
                        &transaction_id,
                        PaymentStatus::Success,
                        Some(("last_webhook", gateway_metadata)),
                    )
                    .await?;

                publisher
                    .publish(&PaymentEvent::PaymentCompleted {
                        order_id: updated.order_id,
                        payment_id: updated.payment_id.clone(),
                        saga_id: updated.saga_id.clone(),
                        amount: updated.amount,
                        paid_at: updated.paid_at.unwrap_or_else(Utc::now),
                    })
                    .await?;

                info!(payment_id = %updated.payment_id, "payment confirmed");
                Ok(updated)
            })
            .await
    }

    /// Mark a pending payment as failed. No-op when already failed.
    pub async fn fail_payment(
        &self,
        transaction_id: &str,
        reason: String,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self
            .repo
            .find_by_payment_id(transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment {} not found", transaction_id))
            })?;
        if payment.status == PaymentStatus::Failed {
            return Ok(payment);
        }

        let updated = self
            .repo
            .update_status(
                transaction_id,
                PaymentStatus::Failed,
                Some(("failure_reason", json!(reason))),
            )
            .await?;

        self.publisher
            .publish(&PaymentEvent::PaymentFailed {
                order_id: updated.order_id,
                saga_id: updated.saga_id.clone(),
                reason: reason.clone(),
            })
            .await?;

        warn!(payment_id = %updated.payment_id, reason = %reason, "payment failed");
        Ok(updated)
    }

    /// Refund a successful payment through its original gateway.
    #[instrument(skip(self, req), fields(payment_id = %payment_id))]
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        req: RefundPaymentRequest,
    ) -> Result<PaymentModel, ServiceError> {
        req.validate()?;

        let payment = self
            .repo
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        if payment.status != PaymentStatus::Success {
            return Err(ServiceError::InvalidOperation(
                "only successful payments can be refunded".to_string(),
            ));
        }
        if let Some(amount) = req.amount {
            if amount > payment.amount {
                return Err(ServiceError::InvalidOperation(format!(
                    "refund amount {} exceeds captured amount {}",
                    amount, payment.amount
                )));
            }
        }

        let adapter = self.gateways.resolve(payment.gateway)?;
        if !adapter.supports_refunds() {
            return Err(ServiceError::InvalidOperation(format!(
                "refund not supported for gateway {}",
                payment.gateway
            )));
        }

        let outcome = adapter
            .refund(&RefundRequest {
                transaction_id: payment.payment_id.clone(),
                amount: req.amount,
                reason: req.reason.clone(),
            })
            .await;
        if !outcome.success {
            warn!(message = %outcome.message, "gateway rejected refund");
            return Err(ServiceError::PaymentFailed(outcome.message));
        }

        let refund_response = outcome
            .response
            .unwrap_or_else(|| json!({ "message": outcome.message }));
        let updated = self
            .repo
            .update_status(
                payment_id,
                PaymentStatus::Refunded,
                Some(("refund_response", refund_response)),
            )
            .await?;

        let refund_amount = req.amount.unwrap_or(payment.amount);
        self.publisher
            .publish(&PaymentEvent::PaymentRefunded {
                order_id: updated.order_id,
                saga_id: updated.saga_id.clone(),
                original_payment_id: updated.payment_id.clone(),
                refund_amount,
                reason: req.reason,
            })
            .await?;

        info!(payment_id = %updated.payment_id, %refund_amount, "payment refunded");
        Ok(updated)
    }

    /// Cancel a pending payment. Reserved for explicit cancellation flows;
    /// never driven by webhooks.
    pub async fn cancel_payment(&self, transaction_id: &str) -> Result<PaymentModel, ServiceError> {
        self.repo
            .update_status(transaction_id, PaymentStatus::Cancelled, None)
            .await
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<PaymentModel, ServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", id)))
    }

    pub async fn get_by_payment_id(&self, payment_id: &str) -> Result<PaymentModel, ServiceError> {
        self.repo
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))
    }

    pub async fn get_by_saga_id(&self, saga_id: &str) -> Result<PaymentModel, ServiceError> {
        self.repo
            .find_by_saga_id(saga_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no payment for saga {}", saga_id)))
    }

    pub async fn list_payments(
        &self,
        filter: &PaymentFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<PaymentModel>, u64), ServiceError> {
        self.repo.list(filter, page, per_page).await
    }

    pub async fn store_stats(
        &self,
        store_id: Uuid,
        from: Option<chrono::DateTime<Utc>>,
        to: Option<chrono::DateTime<Utc>>,
    ) -> Result<StorePaymentStats, ServiceError> {
        self.repo.store_stats(store_id, from, to).await
    }
}

/// Routes externally-reported payment failures from the bus into the state
/// machine.
pub struct ExternalFailureHandler {
    service: Arc<PaymentService>,
}

impl ExternalFailureHandler {
    pub fn new(service: Arc<PaymentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for ExternalFailureHandler {
    async fn handle(&self, _topic: &str, payload: &Value) -> Result<(), ServiceError> {
        let transaction_id = payload
            .get("payment_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::BadRequest("external failure event missing payment_id".to_string())
            })?;
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("externally reported failure")
            .to_string();
        self.service.fail_payment(transaction_id, reason).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_must_be_positive() {
        assert!(validate_positive_decimal(&dec!(5000)).is_ok());
        assert!(validate_positive_decimal(&Decimal::ZERO).is_err());
        assert!(validate_positive_decimal(&dec!(-1)).is_err());
    }

    #[test]
    fn currency_must_be_a_three_letter_code() {
        assert!(validate_currency("NGN").is_ok());
        assert!(validate_currency("usd").is_ok());
        assert!(validate_currency("NG").is_err());
        assert!(validate_currency("N1N").is_err());
    }

    #[test]
    fn initialize_request_validates() {
        let req = InitializePaymentRequest {
            order_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            owner_id: None,
            store_id: None,
            gateway: PaymentGatewayKind::Paystack,
            method: None,
            amount: dec!(5000),
            currency: "NGN".to_string(),
            customer_email: "a@b.com".to_string(),
            customer_name: None,
            phone: None,
        };
        assert!(req.validate().is_ok());

        let bad = InitializePaymentRequest {
            customer_email: "not-an-email".to_string(),
            ..req
        };
        assert!(bad.validate().is_err());
    }
}
