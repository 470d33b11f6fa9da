use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{customer, inquiry, order, quote, BusinessUnit, CustomerSource},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{like_pattern, page_bounds, Page},
    unify::{normalize_email, CustomerCandidate, UnificationService, UpsertOutcome},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Matches email, first/last name and company
    pub search: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    pub source: Option<CustomerSource>,
}

/// Customer entered through the API; merged into an existing record when the email is known
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    /// Full name, split when first/last are not given
    #[validate(length(max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    pub source: Option<CustomerSource>,
    pub ecommerce_customer_id: Option<String>,
    pub accounting_customer_id: Option<String>,
    pub accepts_marketing: Option<bool>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

impl CreateCustomerRequest {
    pub fn into_candidate(self) -> CustomerCandidate {
        let mut candidate =
            CustomerCandidate::new(self.source.unwrap_or(CustomerSource::Manual), self.email);
        if let Some(name) = self.name {
            candidate = candidate.with_full_name(name);
        }
        candidate.first_name = self.first_name;
        candidate.last_name = self.last_name;
        candidate.company = self.company;
        candidate.phone = self.phone;
        candidate.address1 = self.address1;
        candidate.address2 = self.address2;
        candidate.city = self.city;
        candidate.state = self.state;
        candidate.postal_code = self.postal_code;
        candidate.country = self.country;
        candidate.business_unit = self.business_unit;
        candidate.ecommerce_customer_id = self.ecommerce_customer_id;
        candidate.accounting_customer_id = self.accounting_customer_id;
        candidate.accepts_marketing = self.accepts_marketing;
        candidate.notes = self.notes;
        candidate
    }
}

/// Explicit edit: every field that is present replaces the stored value
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCustomerRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    pub ecommerce_customer_id: Option<String>,
    pub accounting_customer_id: Option<String>,
    pub accepts_marketing: Option<bool>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MergeCustomersRequest {
    pub keep_id: Uuid,
    pub merge_id: Uuid,
}

fn text(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

/// Service for the unified customer table
#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    unification: UnificationService,
}

impl CustomerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        let unification = UnificationService::new(db_pool.clone(), event_sender.clone());
        Self {
            db_pool,
            event_sender,
            unification,
        }
    }

    pub fn unification(&self) -> &UnificationService {
        &self.unification
    }

    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        filter: CustomerFilter,
    ) -> Result<Page<customer::Model>, ServiceError> {
        let db = &*self.db_pool;
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut condition = Condition::all();
        if let Some(unit) = filter.business_unit {
            condition = condition.add(customer::Column::BusinessUnit.eq(unit));
        }
        if let Some(source) = filter.source {
            condition = condition.add(customer::Column::Sources.like(format!("%{}%", source)));
        }
        if let Some(pattern) = like_pattern(filter.search.as_deref()) {
            let lower = |col: customer::Column| Expr::expr(Func::lower(Expr::col(col)));
            condition = condition.add(
                Condition::any()
                    .add(customer::Column::Email.like(pattern.clone()))
                    .add(lower(customer::Column::FirstName).like(pattern.clone()))
                    .add(lower(customer::Column::LastName).like(pattern.clone()))
                    .add(lower(customer::Column::Company).like(pattern)),
            );
        }

        let paginator = customer::Entity::find()
            .filter(condition)
            .order_by_asc(customer::Column::Email)
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

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<customer::Model, ServiceError> {
        customer::Entity::find_by_id(customer_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", customer_id))
    }

    /// Creates or merges by email
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<(customer::Model, UpsertOutcome), ServiceError> {
        request.validate()?;
        self.unification.upsert(request.into_candidate()).await
    }

    /// Explicit edit. Moving to an email another customer owns is a conflict;
    /// records linked to this customer follow the new email.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn update_customer(
        &self,
        customer_id: Uuid,
        request: UpdateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;
        let current = customer::Entity::find_by_id(customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", customer_id))?;

        let mut new_email = None;
        if let Some(raw) = request.email.as_deref() {
            let email = normalize_email(raw).ok_or_else(|| {
                ServiceError::ValidationError(format!("invalid email address '{}'", raw))
            })?;
            if email != current.email {
                let taken = customer::Entity::find()
                    .filter(customer::Column::Email.eq(email.as_str()))
                    .one(&txn)
                    .await?;
                if taken.is_some() {
                    return Err(ServiceError::Conflict(format!(
                        "another customer already uses {}",
                        email
                    )));
                }
                new_email = Some(email);
            }
        }

        let mut active: customer::ActiveModel = current.clone().into();
        if let Some(email) = new_email.clone() {
            active.email = Set(email);
        }
        macro_rules! replace {
            ($($field:ident),*) => {
                $(if let Some(value) = text(request.$field.clone()) {
                    active.$field = Set(value);
                })*
            };
        }
        replace!(
            first_name,
            last_name,
            company,
            phone,
            address1,
            address2,
            city,
            state,
            postal_code,
            country,
            ecommerce_customer_id,
            accounting_customer_id,
            notes
        );
        if let Some(unit) = request.business_unit {
            active.business_unit = Set(Some(unit));
        }
        if let Some(accepts) = request.accepts_marketing {
            active.accepts_marketing = Set(accepts);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&txn).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("another customer already uses that email".into())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        if let Some(email) = new_email {
            order::Entity::update_many()
                .col_expr(order::Column::CustomerEmail, Expr::value(email.clone()))
                .filter(order::Column::CustomerId.eq(customer_id))
                .exec(&txn)
                .await?;
            inquiry::Entity::update_many()
                .col_expr(inquiry::Column::Email, Expr::value(email.clone()))
                .filter(inquiry::Column::CustomerId.eq(customer_id))
                .exec(&txn)
                .await?;
            quote::Entity::update_many()
                .col_expr(quote::Column::CustomerEmail, Expr::value(email))
                .filter(quote::Column::CustomerId.eq(customer_id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CustomerChanged(customer_id))
            .await;
        Ok(updated)
    }

    /// Deletes the customer; orders, inquiries and quotes keep their email but lose the link
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn delete_customer(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let existing = customer::Entity::find_by_id(customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", customer_id))?;

        let unlink = Expr::value(Option::<Uuid>::None);
        order::Entity::update_many()
            .col_expr(order::Column::CustomerId, unlink.clone())
            .filter(order::Column::CustomerId.eq(customer_id))
            .exec(&txn)
            .await?;
        inquiry::Entity::update_many()
            .col_expr(inquiry::Column::CustomerId, unlink.clone())
            .filter(inquiry::Column::CustomerId.eq(customer_id))
            .exec(&txn)
            .await?;
        quote::Entity::update_many()
            .col_expr(quote::Column::CustomerId, unlink)
            .filter(quote::Column::CustomerId.eq(customer_id))
            .exec(&txn)
            .await?;
        existing.delete(&txn).await?;
        txn.commit().await?;

        info!(customer_id = %customer_id, "customer deleted");
        self.event_sender
            .send_or_log(Event::CustomerChanged(customer_id))
            .await;
        Ok(())
    }

    /// Orders matched by the customer's email
    pub async fn customer_orders(&self, customer_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        let customer = self.get_customer(customer_id).await?;
        Ok(order::Entity::find()
            .filter(order::Column::CustomerEmail.eq(customer.email))
            .order_by_desc(order::Column::OrderDate)
            .all(&*self.db_pool)
            .await?)
    }

    pub async fn customer_inquiries(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<inquiry::Model>, ServiceError> {
        let customer = self.get_customer(customer_id).await?;
        Ok(inquiry::Entity::find()
            .filter(inquiry::Column::Email.eq(customer.email))
            .order_by_desc(inquiry::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Quotes linked to the customer or carrying its email
    pub async fn customer_quotes(&self, customer_id: Uuid) -> Result<Vec<quote::Model>, ServiceError> {
        let customer = self.get_customer(customer_id).await?;
        Ok(quote::Entity::find()
            .filter(
                quote::Column::CustomerId
                    .eq(customer.id)
                    .or(quote::Column::CustomerEmail.eq(customer.email)),
            )
            .order_by_desc(quote::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn merge_customers(
        &self,
        request: MergeCustomersRequest,
    ) -> Result<customer::Model, ServiceError> {
        self.unification
            .merge_customers(request.keep_id, request.merge_id)
            .await
    }
}
