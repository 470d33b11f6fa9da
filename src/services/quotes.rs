use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{order, quote, quote_line_item, BusinessUnit, CustomerSource, QuoteStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce_platform::{CommercePlatform, DraftLineItem, DraftOrderRequest},
        like_pattern,
        line_items::{self, LineInput, NormalizedLine},
        orders::OrderService,
        page_bounds, Page,
    },
    unify::{CustomerCandidate, UnificationService},
};

const QUOTE_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: quote::Model,
    pub line_items: Vec<quote_line_item::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertedQuote {
    pub quote: quote::Model,
    pub order: order::Model,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<QuoteStatus>,
    pub customer_email: Option<String>,
    /// Matches quote number, customer email and name
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQuoteRequest {
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(max = 200))]
    pub customer_name: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(length(min = 1))]
    pub line_items: Vec<LineInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateQuoteRequest {
    #[validate(length(max = 200))]
    pub customer_name: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    /// `draft`, `sent` or `cancelled`
    pub status: Option<QuoteStatus>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(length(min = 1))]
    pub line_items: Option<Vec<LineInput>>,
}

/// `Q-YYYYMMDD-XXXX`
pub fn generate_quote_number(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("Q-{}-{:04}", now.format("%Y%m%d"), suffix)
}

fn validate_lines(lines: &[LineInput]) -> Result<(), ServiceError> {
    for line in lines {
        line.validate()?;
    }
    Ok(())
}

fn whole_quantity(line: &quote_line_item::Model, quantity: Decimal) -> Result<u32, ServiceError> {
    quantity
        .fract()
        .is_zero()
        .then(|| quantity.to_u32())
        .flatten()
        .filter(|q| *q > 0)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "line '{}' has quantity {} which the platform cannot accept",
                line.description, quantity
            ))
        })
}

/// Quote lines become draft order lines; the platform only takes whole quantities.
/// Lines quoted by the pallet go out as pallets at the pallet price, not as bags.
fn draft_lines(lines: &[quote_line_item::Model]) -> Result<Vec<DraftLineItem>, ServiceError> {
    lines
        .iter()
        .map(|line| {
            let (sold, price) = match line.pallet_quantity.filter(|p| !p.is_zero()) {
                Some(pallets) => {
                    let price = line.total.checked_div(pallets).ok_or_else(|| {
                        ServiceError::ValidationError(format!(
                            "line '{}' has a pallet price out of range",
                            line.description
                        ))
                    })?;
                    (
                        pallets,
                        price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
                    )
                }
                None => (line.quantity, line.unit_price),
            };
            Ok(DraftLineItem {
                title: line.description.clone(),
                sku: line.sku.clone(),
                quantity: whole_quantity(line, sold)?,
                price: price.normalize().to_string(),
            })
        })
        .collect()
}

/// The platform does not carry units, so lines the quote sold by the pallet are
/// marked again before the order is ingested and converted to bags.
fn mark_pallet_lines(lines: &mut [LineInput], quoted: &[quote_line_item::Model]) {
    fn trimmed(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }
    for line in lines.iter_mut() {
        let sold_by_pallet = quoted.iter().any(|q| {
            q.pallet_quantity.is_some()
                && trimmed(q.sku.as_deref()) == trimmed(line.sku.as_deref())
                && q.description.trim() == line.description.trim()
        });
        if sold_by_pallet {
            line.unit = Some("pallet".to_string());
        }
    }
}

async fn insert_lines<C: ConnectionTrait>(
    conn: &C,
    quote_id: Uuid,
    lines: Vec<NormalizedLine>,
) -> Result<(), ServiceError> {
    for line in lines {
        quote_line_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            quote_id: Set(quote_id),
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
    Ok(())
}

#[derive(Clone)]
pub struct QuoteService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    platform: Arc<dyn CommercePlatform>,
    bags_per_pallet: u32,
}

impl QuoteService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        platform: Arc<dyn CommercePlatform>,
        bags_per_pallet: u32,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            platform,
            bags_per_pallet,
        }
    }

    async fn unused_quote_number<C: ConnectionTrait>(
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        for _ in 0..QUOTE_NUMBER_ATTEMPTS {
            let candidate = generate_quote_number(now);
            let taken = quote::Entity::find()
                .filter(quote::Column::QuoteNumber.eq(candidate.as_str()))
                .count(conn)
                .await?;
            if taken == 0 {
                return Ok(candidate);
            }
        }
        Err(ServiceError::Conflict(
            "could not allocate a quote number; retry".into(),
        ))
    }

    /// Creates a draft quote; totals are computed here and the customer is unified
    #[instrument(skip(self, request), fields(customer_email = %request.customer_email))]
    pub async fn create_quote(
        &self,
        request: CreateQuoteRequest,
        created_by: Option<Uuid>,
    ) -> Result<QuoteDetail, ServiceError> {
        request.validate()?;
        validate_lines(&request.line_items)?;

        let (lines, any_pallet) =
            line_items::normalize_lines(&request.line_items, self.bags_per_pallet)?;
        let subtotal = line_items::subtotal(&lines)?;

        let mut candidate =
            CustomerCandidate::new(CustomerSource::Manual, request.customer_email.clone());
        if let Some(name) = request.customer_name.clone() {
            candidate = candidate.with_full_name(name);
        }
        candidate.company = request.company.clone();
        candidate.phone = request.phone.clone();
        candidate.business_unit = request.business_unit;

        let now = Utc::now();
        let txn = self.db_pool.begin().await?;
        let (customer, _) = UnificationService::upsert_customer(&txn, candidate).await?;
        let business_unit = request
            .business_unit
            .or(any_pallet.then_some(BusinessUnit::Pallet))
            .or(customer.business_unit)
            .unwrap_or(BusinessUnit::Retail);
        let quote_number = Self::unused_quote_number(&txn, now).await?;

        let stored = quote::ActiveModel {
            id: Set(Uuid::new_v4()),
            quote_number: Set(quote_number),
            customer_id: Set(Some(customer.id)),
            customer_email: Set(customer.email.clone()),
            customer_name: Set(request
                .customer_name
                .filter(|n| !n.trim().is_empty())
                .or_else(|| customer.display_name())),
            business_unit: Set(business_unit),
            status: Set(QuoteStatus::Draft),
            notes: Set(request.notes),
            valid_until: Set(request.valid_until),
            subtotal: Set(subtotal),
            total: Set(subtotal),
            external_draft_id: Set(None),
            converted_order_id: Set(None),
            created_by: Set(created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        insert_lines(&txn, stored.id, lines).await?;
        txn.commit().await?;

        info!(quote_id = %stored.id, quote_number = %stored.quote_number, "quote created");
        self.get_quote(stored.id).await
    }

    pub async fn get_quote(&self, quote_id: Uuid) -> Result<QuoteDetail, ServiceError> {
        let db = &*self.db_pool;
        let quote = quote::Entity::find_by_id(quote_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote", quote_id))?;
        let line_items = quote.find_related(quote_line_item::Entity).all(db).await?;
        Ok(QuoteDetail { quote, line_items })
    }

    #[instrument(skip(self))]
    pub async fn list_quotes(&self, filter: QuoteFilter) -> Result<Page<quote::Model>, ServiceError> {
        let db = &*self.db_pool;
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut condition = Condition::all();
        if let Some(status) = filter.status {
            condition = condition.add(quote::Column::Status.eq(status));
        }
        if let Some(email) = filter.customer_email.as_deref() {
            condition = condition.add(quote::Column::CustomerEmail.eq(email.trim().to_lowercase()));
        }
        if let Some(pattern) = like_pattern(filter.search.as_deref()) {
            let lower = |col: quote::Column| Expr::expr(Func::lower(Expr::col(col)));
            condition = condition.add(
                Condition::any()
                    .add(lower(quote::Column::QuoteNumber).like(pattern.clone()))
                    .add(quote::Column::CustomerEmail.like(pattern.clone()))
                    .add(lower(quote::Column::CustomerName).like(pattern)),
            );
        }

        let paginator = quote::Entity::find()
            .filter(condition)
            .order_by_desc(quote::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Edits a draft or sent quote; line items, when given, replace the existing ones
    #[instrument(skip(self, request), fields(quote_id = %quote_id))]
    pub async fn update_quote(
        &self,
        quote_id: Uuid,
        request: UpdateQuoteRequest,
    ) -> Result<QuoteDetail, ServiceError> {
        request.validate()?;
        if let Some(lines) = &request.line_items {
            validate_lines(lines)?;
        }
        if request.status == Some(QuoteStatus::Converted) {
            return Err(ServiceError::ValidationError(
                "quotes are converted through the convert endpoint".into(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let current = quote::Entity::find_by_id(quote_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote", quote_id))?;
        if !current.status.is_editable() {
            return Err(ServiceError::Conflict(format!(
                "quote {} is {} and can no longer be edited",
                current.quote_number, current.status
            )));
        }

        let mut active: quote::ActiveModel = current.clone().into();
        if let Some(name) = request.customer_name {
            active.customer_name = Set(Some(name).filter(|n| !n.trim().is_empty()));
        }
        if let Some(unit) = request.business_unit {
            active.business_unit = Set(unit);
        }
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes).filter(|n| !n.trim().is_empty()));
        }
        if let Some(valid_until) = request.valid_until {
            active.valid_until = Set(Some(valid_until));
        }
        if let Some(inputs) = request.line_items {
            let (lines, any_pallet) = line_items::normalize_lines(&inputs, self.bags_per_pallet)?;
            let subtotal = line_items::subtotal(&lines)?;
            active.subtotal = Set(subtotal);
            active.total = Set(subtotal);
            if any_pallet && request.business_unit.is_none() {
                active.business_unit = Set(BusinessUnit::Pallet);
            }
            quote_line_item::Entity::delete_many()
                .filter(quote_line_item::Column::QuoteId.eq(quote_id))
                .exec(&txn)
                .await?;
            insert_lines(&txn, quote_id, lines).await?;
        }
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        self.get_quote(quote_id).await
    }

    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn delete_quote(&self, quote_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let existing = quote::Entity::find_by_id(quote_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote", quote_id))?;
        if existing.status == QuoteStatus::Converted {
            return Err(ServiceError::Conflict(format!(
                "quote {} was converted to an order and cannot be deleted",
                existing.quote_number
            )));
        }
        quote_line_item::Entity::delete_many()
            .filter(quote_line_item::Column::QuoteId.eq(quote_id))
            .exec(&txn)
            .await?;
        existing.delete(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Creates and completes a draft order on the platform, then records the resulting
    /// order and marks the quote converted in one transaction. A platform failure leaves
    /// the quote untouched.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn convert_quote(&self, quote_id: Uuid) -> Result<ConvertedQuote, ServiceError> {
        let detail = self.get_quote(quote_id).await?;
        let quote = &detail.quote;
        match quote.status {
            QuoteStatus::Converted => {
                return Err(ServiceError::Conflict(format!(
                    "quote {} is already converted",
                    quote.quote_number
                )))
            }
            QuoteStatus::Cancelled => {
                return Err(ServiceError::InvalidOperation(format!(
                    "quote {} is cancelled",
                    quote.quote_number
                )))
            }
            QuoteStatus::Draft | QuoteStatus::Sent => {}
        }

        let draft_request = DraftOrderRequest {
            line_items: draft_lines(&detail.line_items)?,
            email: quote.customer_email.clone(),
            note: quote.notes.clone(),
            tags: format!("quote:{},{}", quote.quote_number, quote.business_unit),
        };

        let draft = self.platform.create_draft_order(&draft_request).await?;
        let completed = self.platform.complete_draft_order(&draft.id).await?;
        let platform_order_id = completed.order_id.ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "draft order {} completed without an order id",
                draft.id
            ))
        })?;
        let platform_order = self.platform.fetch_order(&platform_order_id).await?;
        let mut external = platform_order.into_external().ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "order {} has no customer email",
                platform_order_id
            ))
        })?;
        external.business_unit = Some(quote.business_unit);
        mark_pallet_lines(&mut external.lines, &detail.line_items);

        let txn = self.db_pool.begin().await?;
        let fresh = quote::Entity::find_by_id(quote_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Quote", quote_id))?;
        if fresh.status == QuoteStatus::Converted {
            warn!(quote_id = %quote_id, draft_id = %draft.id, "quote converted concurrently");
            return Err(ServiceError::Conflict(format!(
                "quote {} is already converted",
                fresh.quote_number
            )));
        }

        let (order, _) = OrderService::upsert_external(&txn, external, self.bags_per_pallet).await?;
        let mut active: quote::ActiveModel = fresh.into();
        active.status = Set(QuoteStatus::Converted);
        active.external_draft_id = Set(Some(draft.id.clone()));
        active.converted_order_id = Set(Some(order.id));
        active.updated_at = Set(Utc::now());
        let quote = active.update(&txn).await?;
        txn.commit().await?;

        info!(
            quote_id = %quote_id,
            order_id = %order.id,
            draft_id = %draft.id,
            "quote converted"
        );
        self.event_sender
            .send_or_log(Event::QuoteConverted {
                quote_id,
                order_id: order.id,
            })
            .await;
        Ok(ConvertedQuote { quote, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::LineUnit;
    use rust_decimal_macros::dec;

    fn line(quantity: Decimal) -> quote_line_item::Model {
        quote_line_item::Model {
            id: Uuid::new_v4(),
            quote_id: Uuid::new_v4(),
            sku: Some("TS-40".into()),
            description: "Topsoil".into(),
            quantity,
            unit: LineUnit::Bag,
            pallet_quantity: None,
            unit_price: dec!(10.5000),
            total: quantity * dec!(10.5),
        }
    }

    #[test]
    fn quote_numbers_follow_the_pattern() {
        let now = Utc::now();
        let number = generate_quote_number(now);
        let prefix = format!("Q-{}-", now.format("%Y%m%d"));
        assert!(number.starts_with(&prefix));
        let suffix = &number[prefix.len()..];
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn draft_lines_need_whole_quantities() {
        let lines = draft_lines(&[line(dec!(100))]).unwrap();
        assert_eq!(lines[0].quantity, 100);
        assert_eq!(lines[0].price, "10.5");
        assert!(draft_lines(&[line(dec!(1.5))]).is_err());
    }

    fn pallet_line() -> quote_line_item::Model {
        quote_line_item::Model {
            id: Uuid::new_v4(),
            quote_id: Uuid::new_v4(),
            sku: Some("TS-40-PAL".into()),
            description: "Topsoil pallet".into(),
            quantity: dec!(100),
            unit: LineUnit::Bag,
            pallet_quantity: Some(dec!(2)),
            unit_price: dec!(10.0000),
            total: dec!(1000.00),
        }
    }

    #[test]
    fn pallet_lines_are_drafted_as_pallets() {
        let lines = draft_lines(&[pallet_line()]).unwrap();
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[0].price, "500");
        assert_eq!(lines[0].sku.as_deref(), Some("TS-40-PAL"));
    }

    #[test]
    fn returned_lines_sold_by_the_pallet_are_marked() {
        let mut returned = vec![
            LineInput {
                sku: Some("TS-40-PAL".into()),
                description: "Topsoil pallet ".into(),
                quantity: dec!(2),
                unit: None,
                unit_price: Some(dec!(500)),
                total: None,
            },
            LineInput::new("Topsoil", dec!(4), dec!(10.5)),
        ];
        mark_pallet_lines(&mut returned, &[pallet_line(), line(dec!(4))]);
        assert_eq!(returned[0].unit.as_deref(), Some("pallet"));
        assert_eq!(returned[1].unit, None);

        let normalized = line_items::normalize_line(&returned[0], 50).unwrap();
        assert_eq!(normalized.quantity, dec!(100));
        assert_eq!(normalized.pallet_quantity, Some(dec!(2)));
        assert_eq!(normalized.unit_price, dec!(10));
    }
}
