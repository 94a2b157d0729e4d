use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Enum representing the possible statuses of a payment.
///
/// Transitions are monotonic: `Pending -> {Success, Failed, Cancelled}` and
/// `Success -> Refunded`. Terminal statuses are never overwritten.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl PaymentStatus {
    /// Whether this status can legally move to `next`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Pending, Cancelled) | (Success, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Payment providers this service can route charges through.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum PaymentGatewayKind {
    #[sea_orm(string_value = "paystack")]
    Paystack,
    #[sea_orm(string_value = "flutterwave")]
    Flutterwave,
}

/// Payment instrument selected by the customer.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "ussd")]
    Ussd,
    #[sea_orm(string_value = "wallet")]
    Wallet,
}

/// The `payments` table.
///
/// `payment_id` holds the gateway-issued external transaction reference and
/// is globally unique. Records are never deleted; terminal rows are retained
/// for audit and reconciliation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub store_id: Option<Uuid>,

    /// Gateway-issued external transaction reference.
    #[sea_orm(unique)]
    pub payment_id: String,

    pub amount: Decimal,
    pub currency: String,

    pub status: PaymentStatus,
    pub gateway: PaymentGatewayKind,
    pub method: PaymentMethod,

    pub customer_email: String,
    pub customer_name: Option<String>,

    /// Gateway-specific echo data: webhook payload snapshot, refund response.
    pub metadata: Json,

    /// Correlation id tying together all events of one business transaction.
    pub saga_id: String,

    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,

    /// Bumped on every mutating write; versions cache entries.
    pub version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
