use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order, order_line_item, BusinessUnit, CustomerSource, OrderSource, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        like_pattern,
        line_items::{self, LineInput, NormalizedLine},
        page_bounds, parse_range_bound, Page,
    },
    unify::{CustomerCandidate, UnificationService, UpsertOutcome},
};

/// An order from any source system, before it is stored
#[derive(Debug, Clone)]
pub struct ExternalOrder {
    pub source: OrderSource,
    pub external_id: String,
    pub order_number: String,
    /// When the source gave no date, a stored order keeps its date and a new one uses now
    pub order_date: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub currency: String,
    /// Customer as seen on the order; its email links the order to the unified customer
    pub customer: CustomerCandidate,
    pub business_unit: Option<BusinessUnit>,
    pub subtotal: Option<Decimal>,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Option<Decimal>,
    pub notes: Option<String>,
    pub lines: Vec<LineInput>,
}

impl ExternalOrder {
    pub fn new(
        source: OrderSource,
        external_id: impl Into<String>,
        customer: CustomerCandidate,
    ) -> Self {
        let external_id = external_id.into();
        Self {
            source,
            order_number: external_id.clone(),
            external_id,
            order_date: None,
            status: OrderStatus::Pending,
            currency: "USD".to_string(),
            customer,
            business_unit: None,
            subtotal: None,
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            total: None,
            notes: None,
            lines: Vec::new(),
        }
    }
}

/// An order with its line items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub line_items: Vec<order_line_item::Model>,
}

/// Filters for the unified order listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub source: Option<OrderSource>,
    pub business_unit: Option<BusinessUnit>,
    pub status: Option<OrderStatus>,
    pub customer_email: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
}

/// Order entered by staff
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    /// `manual` (default), `distributor` or `digital`
    pub source: Option<OrderSource>,
    #[validate(length(min = 1, max = 64))]
    pub order_number: Option<String>,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(max = 200))]
    pub customer_name: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    pub status: Option<OrderStatus>,
    pub order_date: Option<DateTime<Utc>>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub line_items: Vec<LineInput>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

fn staff_order_number(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("M-{}-{:04}", now.format("%Y%m%d"), suffix)
}

fn stored_line(model: &order_line_item::Model) -> NormalizedLine {
    NormalizedLine {
        sku: model.sku.clone(),
        description: model.description.clone(),
        quantity: model.quantity,
        unit: model.unit,
        pallet_quantity: model.pallet_quantity,
        unit_price: model.unit_price,
        total: model.total,
    }
}

/// Service for the unified order table
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    bags_per_pallet: u32,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, bags_per_pallet: u32) -> Self {
        Self {
            db_pool,
            event_sender,
            bags_per_pallet,
        }
    }

    pub fn bags_per_pallet(&self) -> u32 {
        self.bags_per_pallet
    }

    /// Ingest path shared by CSV imports, legacy migration, webhooks and quote conversion.
    /// Keyed by `(source, external_id)`; line items are replaced on update and the
    /// customer is unified by email.
    pub async fn upsert_external<C: ConnectionTrait>(
        conn: &C,
        external: ExternalOrder,
        bags_per_pallet: u32,
    ) -> Result<(order::Model, UpsertOutcome), ServiceError> {
        if external.external_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "order has no external id".into(),
            ));
        }

        // All arithmetic happens before the first write so a bad amount leaves nothing behind
        let (lines, any_pallet) = line_items::normalize_lines(&external.lines, bags_per_pallet)?;
        let business_unit =
            line_items::order_business_unit(external.source, external.business_unit, any_pallet);
        let subtotal = match external.subtotal {
            Some(subtotal) => subtotal,
            None => line_items::subtotal(&lines)?,
        };
        let total = match external.total {
            Some(total) => total,
            None => subtotal
                .checked_add(external.tax)
                .and_then(|sum| sum.checked_add(external.shipping))
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "order {} has a total out of range",
                        external.external_id.trim()
                    ))
                })?,
        };

        let existing = order::Entity::find()
            .filter(order::Column::Source.eq(external.source))
            .filter(order::Column::ExternalId.eq(external.external_id.trim()))
            .one(conn)
            .await?;
        let now = Utc::now();
        let order_date = external
            .order_date
            .or_else(|| existing.as_ref().map(|o| o.order_date))
            .unwrap_or(now);

        let mut candidate = external.customer;
        candidate.business_unit = candidate.business_unit.or(Some(business_unit));
        candidate.seen_at = candidate.seen_at.or(external.order_date);
        let customer_name = match candidate.resolved_names() {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(name), None) | (None, Some(name)) => Some(name),
            (None, None) => candidate.company.clone(),
        };
        let (customer, _) = UnificationService::upsert_customer(conn, candidate).await?;

        let proposed = order::Model {
            id: existing.as_ref().map(|o| o.id).unwrap_or_else(Uuid::new_v4),
            source: external.source,
            external_id: external.external_id.trim().to_string(),
            order_number: external.order_number.trim().to_string(),
            customer_id: Some(customer.id),
            customer_email: customer.email.clone(),
            customer_name,
            business_unit,
            status: external.status,
            order_date,
            currency: external.currency.trim().to_uppercase(),
            subtotal,
            tax: external.tax,
            shipping: external.shipping,
            total,
            notes: external.notes,
            created_at: existing.as_ref().map(|o| o.created_at).unwrap_or(now),
            updated_at: existing.as_ref().map(|o| o.updated_at).unwrap_or(now),
        };

        let outcome = match existing {
            None => {
                proposed.clone().into_active_model().reset_all().insert(conn).await?;
                UpsertOutcome::Inserted
            }
            Some(current) => {
                let stored_lines: Vec<NormalizedLine> = current
                    .find_related(order_line_item::Entity)
                    .all(conn)
                    .await?
                    .iter()
                    .map(stored_line)
                    .collect();
                if current == proposed && stored_lines == lines {
                    return Ok((current, UpsertOutcome::Unchanged));
                }
                let mut updated = proposed.clone();
                updated.updated_at = now;
                updated.into_active_model().reset_all().update(conn).await?;
                order_line_item::Entity::delete_many()
                    .filter(order_line_item::Column::OrderId.eq(current.id))
                    .exec(conn)
                    .await?;
                UpsertOutcome::Updated
            }
        };

        for line in lines {
            order_line_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(proposed.id),
                sku: Set(line.sku),
                description: Set(line.description),
                quantity: Set(line.quantity),
                unit: Set(line.unit),
                pallet_quantity: Set(line.pallet_quantity),
                unit_price: Set(line.unit_price),
                total: Set(line.total),
            }
            .insert(conn)
            .await?;
        }

        let stored = order::Entity::find_by_id(proposed.id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError("order vanished after upsert".into()))?;
        Ok((stored, outcome))
    }

    /// Marks an ingested order cancelled. Returns `None` when it was never ingested.
    pub async fn cancel_external<C: ConnectionTrait>(
        conn: &C,
        source: OrderSource,
        external_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(current) = order::Entity::find()
            .filter(order::Column::Source.eq(source))
            .filter(order::Column::ExternalId.eq(external_id))
            .one(conn)
            .await?
        else {
            return Ok(None);
        };
        let mut active: order::ActiveModel = current.into();
        active.status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        Ok(Some(active.update(conn).await?))
    }

    /// Creates an order entered by staff
    #[instrument(skip(self, request), fields(customer_email = %request.customer_email))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderDetail, ServiceError> {
        request.validate()?;
        for line in &request.line_items {
            line.validate()?;
        }

        let source = request.source.unwrap_or(OrderSource::Manual);
        if matches!(source, OrderSource::Ecommerce | OrderSource::Accounting) {
            return Err(ServiceError::ValidationError(format!(
                "{} orders are ingested from their system and cannot be entered by hand",
                source
            )));
        }

        let now = Utc::now();
        let mut candidate = CustomerCandidate::new(
            match source {
                OrderSource::Manual => CustomerSource::Manual,
                other => other.customer_source(),
            },
            request.customer_email,
        );
        if let Some(name) = request.customer_name {
            candidate = candidate.with_full_name(name);
        }
        candidate.company = request.company;
        candidate.phone = request.phone;

        let mut external = ExternalOrder::new(source, Uuid::new_v4().to_string(), candidate);
        external.order_number = request
            .order_number
            .unwrap_or_else(|| staff_order_number(now));
        external.order_date = Some(request.order_date.unwrap_or(now));
        external.status = request.status.unwrap_or(OrderStatus::Pending);
        external.currency = request.currency.unwrap_or_else(|| "USD".into());
        external.business_unit = request.business_unit;
        external.tax = request.tax.unwrap_or_default();
        external.shipping = request.shipping.unwrap_or_default();
        external.notes = request.notes;
        external.lines = request.line_items;

        let txn = self.db_pool.begin().await?;
        let (order, _) = Self::upsert_external(&txn, external, self.bags_per_pallet).await?;
        txn.commit().await?;

        info!(order_id = %order.id, source = %order.source, "order created");
        self.event_sender
            .send_or_log(Event::OrderIngested {
                order_id: order.id,
                source: order.source,
            })
            .await;
        self.get_order(order.id).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db_pool;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        let line_items = order
            .find_related(order_line_item::Entity)
            .all(db)
            .await?;
        Ok(OrderDetail { order, line_items })
    }

    /// Newest first
    #[instrument(skip(self))]
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Page<order::Model>, ServiceError> {
        let db = &*self.db_pool;
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut condition = Condition::all();
        if let Some(source) = filter.source {
            condition = condition.add(order::Column::Source.eq(source));
        }
        if let Some(unit) = filter.business_unit {
            condition = condition.add(order::Column::BusinessUnit.eq(unit));
        }
        if let Some(status) = filter.status {
            condition = condition.add(order::Column::Status.eq(status));
        }
        if let Some(email) = filter.customer_email.as_deref() {
            condition = condition.add(order::Column::CustomerEmail.eq(email.trim().to_lowercase()));
        }
        if let Some(from) = parse_range_bound("from", filter.from.as_deref(), false)? {
            condition = condition.add(order::Column::OrderDate.gte(from));
        }
        if let Some(to) = parse_range_bound("to", filter.to.as_deref(), true)? {
            condition = condition.add(order::Column::OrderDate.lte(to));
        }
        if let Some(pattern) = like_pattern(filter.search.as_deref()) {
            condition = condition.add(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(order::Column::OrderNumber))).like(pattern.clone()))
                    .add(Expr::col(order::Column::CustomerEmail).like(pattern.clone()))
                    .add(Expr::expr(Func::lower(Expr::col(order::Column::CustomerName))).like(pattern)),
            );
        }

        let paginator = order::Entity::find()
            .filter(condition)
            .order_by_desc(order::Column::OrderDate)
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, limit);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;
        let current = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        let mut active: order::ActiveModel = current.into();
        active.status = Set(request.status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        self.event_sender
            .send_or_log(Event::OrderChanged(order_id))
            .await;
        Ok(updated)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let existing = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        order_line_item::Entity::delete_many()
            .filter(order_line_item::Column::OrderId.eq(existing.id))
            .exec(&txn)
            .await?;
        existing.delete(&txn).await?;
        txn.commit().await?;

        info!(order_id = %order_id, "order deleted");
        self.event_sender
            .send_or_log(Event::OrderChanged(order_id))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_order_numbers_carry_the_date() {
        let now = Utc::now();
        let number = staff_order_number(now);
        assert!(number.starts_with(&format!("M-{}-", now.format("%Y%m%d"))));
        assert_eq!(number.len(), "M-YYYYMMDD-XXXX".len());
    }

    #[test]
    fn manual_orders_default_to_usd_and_pending() {
        let candidate = CustomerCandidate::new(CustomerSource::Manual, "a@example.com");
        let order = ExternalOrder::new(OrderSource::Manual, "ext-1", candidate);
        assert_eq!(order.order_number, "ext-1");
        assert_eq!(order.currency, "USD");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.order_date, None);
    }
}
