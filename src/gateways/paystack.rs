use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha512;
use tracing::warn;

use crate::entities::payment::PaymentGatewayKind;
use crate::errors::ServiceError;

use super::{
    json_amount, ChargeOutcome, ChargeRequest, PaymentGateway, RefundOutcome, RefundRequest,
    WebhookEvent, WebhookStatus,
};

type HmacSha512 = Hmac<Sha512>;

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

/// Paystack adapter. Amounts cross the wire in kobo (minor units); webhooks
/// are signed with HMAC-SHA512 of the raw body under the secret key.
#[derive(Debug)]
pub struct PaystackGateway {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PaystackResponse<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

impl PaystackGateway {
    pub fn new(http: reqwest::Client, secret_key: String, base_url: Option<String>) -> Self {
        Self {
            http,
            secret_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn to_kobo(amount: Decimal) -> i64 {
        (amount * dec!(100)).trunc().to_i64().unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Paystack
    }

    async fn process(&self, req: &ChargeRequest) -> ChargeOutcome {
        let body = json!({
            "email": req.email,
            "amount": Self::to_kobo(req.amount),
            "currency": req.currency,
            "callback_url": req.callback_url,
            "metadata": {
                "customer_ref": req.customer_ref,
                "phone": req.phone,
                "name": req.name,
            },
        });

        let response = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await;

        let parsed: PaystackResponse<InitializeData> = match response {
            Ok(resp) => match resp.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "paystack initialize returned an unreadable body");
                    return ChargeOutcome::failure(format!("paystack response invalid: {}", e));
                }
            },
            Err(e) => {
                warn!(error = %e, "paystack initialize request failed");
                return ChargeOutcome::failure(format!("paystack request failed: {}", e));
            }
        };

        if !parsed.status {
            return ChargeOutcome::failure(parsed.message);
        }
        match parsed.data {
            Some(data) => ChargeOutcome {
                success: true,
                message: parsed.message,
                transaction_id: Some(data.reference),
                redirect_url: Some(data.authorization_url),
            },
            None => ChargeOutcome::failure("paystack returned no transaction data"),
        }
    }

    async fn refund(&self, req: &RefundRequest) -> RefundOutcome {
        let mut body = json!({
            "transaction": req.transaction_id,
            "merchant_note": req.reason,
        });
        if let Some(amount) = req.amount {
            body["amount"] = json!(Self::to_kobo(amount));
        }

        let response = self
            .http
            .post(format!("{}/refund", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await;

        let parsed: PaystackResponse<Value> = match response {
            Ok(resp) => match resp.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "paystack refund returned an unreadable body");
                    return RefundOutcome::failure(format!("paystack response invalid: {}", e));
                }
            },
            Err(e) => {
                warn!(error = %e, "paystack refund request failed");
                return RefundOutcome::failure(format!("paystack request failed: {}", e));
            }
        };

        if !parsed.status {
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
        Some("x-paystack-signature")
    }

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> Option<bool> {
        let Some(signature) = signature else {
            return Some(false);
        };
        let Ok(expected) = hex::decode(signature) else {
            return Some(false);
        };
        let mut mac = HmacSha512::new_from_slice(self.secret_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload);
        Some(mac.verify_slice(&expected).is_ok())
    }

    fn parse_webhook(&self, payload: &Value) -> Result<WebhookEvent, ServiceError> {
        let data = payload
            .get("data")
            .ok_or_else(|| ServiceError::BadRequest("paystack webhook missing data".into()))?;
        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadRequest("paystack webhook missing reference".into()))?;

        let event = payload.get("event").and_then(Value::as_str).unwrap_or("");
        let status = data.get("status").and_then(Value::as_str).unwrap_or("");
        let status = if event == "charge.success" || status == "success" {
            WebhookStatus::Success
        } else if matches!(status, "failed" | "reversed" | "abandoned") {
            WebhookStatus::Failed
        } else {
            WebhookStatus::Pending
        };

        Ok(WebhookEvent {
            transaction_id: reference.to_string(),
            status,
            amount: json_amount(data.get("amount")) / dec!(100),
            metadata: data.clone(),
        })
    }
}
