use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::cache::{self, CacheBackend};
use crate::entities::payment::{
    self, ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel,
    PaymentGatewayKind, PaymentMethod, PaymentStatus,
};
use crate::errors::ServiceError;

/// Data for a new `Pending` payment record.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub gateway: PaymentGatewayKind,
    pub method: PaymentMethod,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub metadata: Value,
    pub saga_id: String,
}

/// Filter for the paginated list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub gateway: Option<PaymentGatewayKind>,
    pub order_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StatusBreakdown {
    pub status: PaymentStatus,
    pub count: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StorePaymentStats {
    pub store_id: Uuid,
    pub total_count: i64,
    pub by_status: Vec<StatusBreakdown>,
}

/// Durable payment persistence with a cache-aside read path.
///
/// Point lookups read through the cache under three keys (id, external
/// reference, order); every mutating write refreshes all three. Cache
/// unavailability degrades to direct storage reads and never fails the
/// primary operation. Transaction-scoped reads bypass the cache entirely.
#[derive(Clone)]
pub struct PaymentRepository {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheBackend>,
    cache_ttl: Duration,
}

impl PaymentRepository {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<dyn CacheBackend>, cache_ttl: Duration) -> Self {
        Self { db, cache, cache_ttl }
    }

    async fn cache_read(&self, key: &str) -> Option<PaymentModel> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(key, error = %e, "cache entry undecodable, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling back to storage");
                None
            }
        }
    }

    /// Write-through of all three point-lookup keys. Best effort.
    pub async fn cache_payment(&self, model: &PaymentModel) {
        let raw = match serde_json::to_string(model) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(payment_id = %model.payment_id, error = %e, "payment not cacheable");
                return;
            }
        };
        for key in [
            cache::payment_id_key(&model.id),
            cache::payment_ref_key(&model.payment_id),
            cache::payment_order_key(&model.order_id),
        ] {
            if let Err(e) = self.cache.set(&key, &raw, Some(self.cache_ttl)).await {
                warn!(key, error = %e, "cache write failed");
            }
        }
    }

    /// Insert a new `Pending` record on the given connection (normally the
    /// initialize transaction). The unique index on `payment_id` rejects
    /// duplicate external references at the storage layer.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        data: NewPayment,
    ) -> Result<PaymentModel, ServiceError> {
        let now = Utc::now();
        let model = PaymentActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(data.order_id),
            customer_id: Set(data.customer_id),
            owner_id: Set(data.owner_id),
            store_id: Set(data.store_id),
            payment_id: Set(data.payment_id),
            amount: Set(data.amount),
            currency: Set(data.currency),
            status: Set(PaymentStatus::Pending),
            gateway: Set(data.gateway),
            method: Set(data.method),
            customer_email: Set(data.customer_email),
            customer_name: Set(data.customer_name),
            metadata: Set(data.metadata),
            saga_id: Set(data.saga_id),
            paid_at: Set(None),
            failed_at: Set(None),
            refunded_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(conn).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentModel>, ServiceError> {
        let key = cache::payment_id_key(&id);
        if let Some(hit) = self.cache_read(&key).await {
            return Ok(Some(hit));
        }
        let found = PaymentEntity::find_by_id(id).one(&*self.db).await?;
        if let Some(model) = &found {
            self.cache_payment(model).await;
        }
        Ok(found)
    }

    pub async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        let key = cache::payment_ref_key(payment_id);
        if let Some(hit) = self.cache_read(&key).await {
            return Ok(Some(hit));
        }
        let found = PaymentEntity::find()
            .filter(payment::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?;
        if let Some(model) = &found {
            self.cache_payment(model).await;
        }
        Ok(found)
    }

    /// Latest payment for an order, read through the cache.
    pub async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        let key = cache::payment_order_key(&order_id);
        if let Some(hit) = self.cache_read(&key).await {
            return Ok(Some(hit));
        }
        let found = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        if let Some(model) = &found {
            self.cache_payment(model).await;
        }
        Ok(found)
    }

    /// Transaction-scoped lookup backing the create-if-absent check: the
    /// newest record that would conflict with a fresh initialize (`Pending`
    /// or `Success`). Bypasses the cache.
    pub async fn find_conflicting_by_order_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(
                payment::Column::Status
                    .is_in([PaymentStatus::Pending, PaymentStatus::Success]),
            )
            .order_by_desc(payment::Column::CreatedAt)
            .one(conn)
            .await?)
    }

    pub async fn find_by_saga_id(
        &self,
        saga_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::SagaId.eq(saga_id))
            .one(&*self.db)
            .await?)
    }

    /// The single write path used by confirm/fail/refund/cancel.
    ///
    /// Applying the current status again is an idempotent no-op; any other
    /// transition outside the state machine's table is rejected. The terminal
    /// timestamp matching the new status is set only if unset, the version is
    /// bumped, and all cache keys are refreshed.
    pub async fn update_status(
        &self,
        payment_id: &str,
        new_status: PaymentStatus,
        metadata_patch: Option<(&str, Value)>,
    ) -> Result<PaymentModel, ServiceError> {
        let current = PaymentEntity::find()
            .filter(payment::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        if current.status == new_status {
            return Ok(current);
        }
        if !current.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "invalid status transition {} -> {}",
                current.status, new_status
            )));
        }

        let now = Utc::now();
        let prev = current.clone();
        let mut active: PaymentActiveModel = current.into();
        active.status = Set(new_status);
        match new_status {
            PaymentStatus::Success if prev.paid_at.is_none() => {
                active.paid_at = Set(Some(now));
            }
            PaymentStatus::Failed if prev.failed_at.is_none() => {
                active.failed_at = Set(Some(now));
            }
            PaymentStatus::Refunded if prev.refunded_at.is_none() => {
                active.refunded_at = Set(Some(now));
            }
            _ => {}
        }
        if let Some((key, value)) = metadata_patch {
            active.metadata = Set(patched_metadata(&prev.metadata, key, value));
        }
        active.version = Set(prev.version + 1);
        active.updated_at = Set(now);

        let updated = active.update(&*self.db).await?;
        self.cache_payment(&updated).await;
        Ok(updated)
    }

    /// Patch one metadata key without touching the status. Used for
    /// non-terminal webhook reports.
    pub async fn patch_metadata(
        &self,
        payment_id: &str,
        key: &str,
        value: Value,
    ) -> Result<PaymentModel, ServiceError> {
        let current = PaymentEntity::find()
            .filter(payment::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        let prev = current.clone();
        let mut active: PaymentActiveModel = current.into();
        active.metadata = Set(patched_metadata(&prev.metadata, key, value));
        active.version = Set(prev.version + 1);
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        self.cache_payment(&updated).await;
        Ok(updated)
    }

    pub async fn list(
        &self,
        filter: &PaymentFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<PaymentModel>, u64), ServiceError> {
        let mut query = PaymentEntity::find();
        if let Some(status) = filter.status {
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(gateway) = filter.gateway {
            query = query.filter(payment::Column::Gateway.eq(gateway));
        }
        if let Some(order_id) = filter.order_id {
            query = query.filter(payment::Column::OrderId.eq(order_id));
        }
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(payment::Column::CustomerId.eq(customer_id));
        }
        if let Some(store_id) = filter.store_id {
            query = query.filter(payment::Column::StoreId.eq(store_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(payment::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(payment::Column::CreatedAt.lte(to));
        }

        let paginator = query
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Per-store totals by status over a date range.
    pub async fn store_stats(
        &self,
        store_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StorePaymentStats, ServiceError> {
        let mut query = PaymentEntity::find()
            .select_only()
            .column(payment::Column::Status)
            .column_as(payment::Column::Id.count(), "count")
            .column_as(payment::Column::Amount.sum(), "amount")
            .filter(payment::Column::StoreId.eq(store_id))
            .group_by(payment::Column::Status);
        if let Some(from) = from {
            query = query.filter(payment::Column::CreatedAt.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(payment::Column::CreatedAt.lte(to));
        }

        let rows: Vec<(PaymentStatus, i64, Option<Decimal>)> =
            query.into_tuple().all(&*self.db).await?;

        let by_status: Vec<StatusBreakdown> = rows
            .into_iter()
            .map(|(status, count, amount)| StatusBreakdown {
                status,
                count,
                amount: amount.unwrap_or_default(),
            })
            .collect();
        let total_count = by_status.iter().map(|b| b.count).sum();

        Ok(StorePaymentStats {
            store_id,
            total_count,
            by_status,
        })
    }
}

fn patched_metadata(current: &Value, key: &str, value: Value) -> Value {
    let mut metadata = if current.is_object() {
        current.clone()
    } else {
        json!({})
    };
    metadata[key] = value;
    metadata
}
