use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::entities::payment::PaymentGatewayKind;
use crate::errors::ServiceError;

use super::{
    constant_time_eq, json_amount, ChargeOutcome, ChargeRequest, PaymentGateway, RefundOutcome,
    RefundRequest, WebhookEvent, WebhookStatus,
};

const DEFAULT_BASE_URL: &str = "https://api.flutterwave.com/v3";

/// Flutterwave adapter. The merchant generates the transaction reference
/// (`tx_ref`) up front; webhooks authenticate with a static `verif-hash`
/// header rather than a payload signature.
#[derive(Debug)]
pub struct FlutterwaveGateway {
    http: reqwest::Client,
    secret_key: String,
    secret_hash: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FlutterwaveResponse<T> {
    status: String,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkData {
    link: String,
}

impl FlutterwaveGateway {
    pub fn new(
        http: reqwest::Client,
        secret_key: String,
        secret_hash: String,
        base_url: Option<String>,
    ) -> Self {
        Self {
            http,
            secret_key,
            secret_hash,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Flutterwave
    }

    async fn process(&self, req: &ChargeRequest) -> ChargeOutcome {
        let tx_ref = format!("FLW-{}", Uuid::new_v4().simple());
        let body = json!({
            "tx_ref": tx_ref,
            "amount": req.amount,
            "currency": req.currency,
            "redirect_url": req.callback_url,
            "customer": {
                "email": req.email,
                "phonenumber": req.phone,
                "name": req.name,
            },
            "meta": { "customer_ref": req.customer_ref },
        });

        let response = self
            .http
            .post(format!("{}/payments", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await;

        let parsed: FlutterwaveResponse<PaymentLinkData> = match response {
            Ok(resp) => match resp.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "flutterwave payment returned an unreadable body");
                    return ChargeOutcome::failure(format!("flutterwave response invalid: {}", e));
                }
            },
            Err(e) => {
                warn!(error = %e, "flutterwave payment request failed");
                return ChargeOutcome::failure(format!("flutterwave request failed: {}", e));
            }
        };

        if parsed.status != "success" {
            return ChargeOutcome::failure(parsed.message);
        }
        match parsed.data {
            Some(data) => ChargeOutcome {
                success: true,
                message: parsed.message,
                transaction_id: Some(tx_ref),
                redirect_url: Some(data.link),
            },
            None => ChargeOutcome::failure("flutterwave returned no payment link"),
        }
    }

    async fn refund(&self, req: &RefundRequest) -> RefundOutcome {
        let mut body = json!({ "comments": req.reason });
        if let Some(amount) = req.amount {
            body["amount"] = json!(amount);
        }

        let response = self
            .http
            .post(format!(
                "{}/transactions/{}/refund",
                self.base_url, req.transaction_id
            ))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await;

        let parsed: FlutterwaveResponse<Value> = match response {
            Ok(resp) => match resp.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "flutterwave refund returned an unreadable body");
                    return RefundOutcome::failure(format!("flutterwave response invalid: {}", e));
                }
            },
            Err(e) => {
                warn!(error = %e, "flutterwave refund request failed");
                return RefundOutcome::failure(format!("flutterwave request failed: {}", e));
            }
        };

        if parsed.status != "success" {
            return RefundOutcome::failure(parsed.message);
        }
        RefundOutcome {
            success: true,
            message: parsed.message,
            transaction_id: Some(req.transaction_id.clone()),
            response: parsed.data,
        }
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("verif-hash")
    }

    fn verify_webhook(&self, _payload: &[u8], signature: Option<&str>) -> Option<bool> {
        match signature {
            Some(hash) => Some(constant_time_eq(hash, &self.secret_hash)),
            None => Some(false),
        }
    }

    fn parse_webhook(&self, payload: &Value) -> Result<WebhookEvent, ServiceError> {
        let data = payload
            .get("data")
            .ok_or_else(|| ServiceError::BadRequest("flutterwave webhook missing data".into()))?;
        let tx_ref = data
            .get("tx_ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadRequest("flutterwave webhook missing tx_ref".into()))?;

        let status = match data.get("status").and_then(Value::as_str).unwrap_or("") {
            "successful" => WebhookStatus::Success,
            "failed" => WebhookStatus::Failed,
            _ => WebhookStatus::Pending,
        };

        Ok(WebhookEvent {
            transaction_id: tx_ref.to_string(),
            status,
            amount: json_amount(data.get("amount")),
            metadata: data.clone(),
        })
    }
}
