use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{inquiry, user, CustomerSource, InquiryStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{like_pattern, page_bounds, Page},
    unify::{CustomerCandidate, UnificationService},
};

pub const WEBSITE_SOURCE: &str = "website";

/// Public contact form submission
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ContactFormRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(min = 1, max = 5000))]
    pub message: String,
    /// Hidden field; humans leave it empty
    #[serde(default)]
    pub website: Option<String>,
}

impl ContactFormRequest {
    pub fn is_spam(&self) -> bool {
        self.website
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InquiryFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<InquiryStatus>,
    pub assigned_to: Option<Uuid>,
    /// Matches name, email, company and message
    pub search: Option<String>,
}

fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateInquiryRequest {
    pub status: Option<InquiryStatus>,
    /// `null` unassigns; absent leaves the assignee alone
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
}

#[derive(Clone)]
pub struct InquiryService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InquiryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Stores a contact form submission and unifies its sender as a website customer.
    /// Honeypot hits are dropped and reported as `None`.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn submit_contact_form(
        &self,
        request: ContactFormRequest,
    ) -> Result<Option<inquiry::Model>, ServiceError> {
        // Bots get the same answer whether or not the rest of the form is valid
        if request.is_spam() {
            warn!("contact form honeypot triggered; submission dropped");
            metrics::counter!("crm.contact.spam", 1);
            return Ok(None);
        }
        request.validate()?;

        let mut candidate = CustomerCandidate::new(CustomerSource::Website, request.email.clone())
            .with_full_name(request.name.clone());
        candidate.company = request.company.clone();
        candidate.phone = request.phone.clone();

        let txn = self.db_pool.begin().await?;
        let (customer, _) = UnificationService::upsert_customer(&txn, candidate).await?;
        let now = Utc::now();
        let stored = inquiry::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            email: Set(customer.email.clone()),
            phone: Set(request.phone.filter(|p| !p.trim().is_empty())),
            company: Set(request.company.filter(|c| !c.trim().is_empty())),
            message: Set(request.message.trim().to_string()),
            source: Set(WEBSITE_SOURCE.to_string()),
            status: Set(InquiryStatus::New),
            assigned_to: Set(None),
            customer_id: Set(Some(customer.id)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(inquiry_id = %stored.id, customer_id = %customer.id, "inquiry received");
        self.event_sender
            .send_or_log(Event::InquiryReceived {
                inquiry_id: stored.id,
                name: stored.name.clone(),
                email: stored.email.clone(),
                company: stored.company.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::CustomerChanged(customer.id))
            .await;
        Ok(Some(stored))
    }

    #[instrument(skip(self))]
    pub async fn list_inquiries(
        &self,
        filter: InquiryFilter,
    ) -> Result<Page<inquiry::Model>, ServiceError> {
        let db = &*self.db_pool;
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut condition = Condition::all();
        if let Some(status) = filter.status {
            condition = condition.add(inquiry::Column::Status.eq(status));
        }
        if let Some(user_id) = filter.assigned_to {
            condition = condition.add(inquiry::Column::AssignedTo.eq(user_id));
        }
        if let Some(pattern) = like_pattern(filter.search.as_deref()) {
            let lower = |col: inquiry::Column| Expr::expr(Func::lower(Expr::col(col)));
            condition = condition.add(
                Condition::any()
                    .add(lower(inquiry::Column::Name).like(pattern.clone()))
                    .add(inquiry::Column::Email.like(pattern.clone()))
                    .add(lower(inquiry::Column::Company).like(pattern.clone()))
                    .add(lower(inquiry::Column::Message).like(pattern)),
            );
        }

        let paginator = inquiry::Entity::find()
            .filter(condition)
            .order_by_desc(inquiry::Column::CreatedAt)
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

    pub async fn get_inquiry(&self, inquiry_id: Uuid) -> Result<inquiry::Model, ServiceError> {
        inquiry::Entity::find_by_id(inquiry_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Inquiry", inquiry_id))
    }

    #[instrument(skip(self, request), fields(inquiry_id = %inquiry_id))]
    pub async fn update_inquiry(
        &self,
        inquiry_id: Uuid,
        request: UpdateInquiryRequest,
    ) -> Result<inquiry::Model, ServiceError> {
        let db = &*self.db_pool;
        let current = self.get_inquiry(inquiry_id).await?;

        if let Some(Some(user_id)) = request.assigned_to {
            let assignee = user::Entity::find_by_id(user_id).one(db).await?;
            if !assignee.map(|u| u.active).unwrap_or(false) {
                return Err(ServiceError::ValidationError(format!(
                    "assignee {} is not an active user",
                    user_id
                )));
            }
        }

        let mut active: inquiry::ActiveModel = current.into();
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(assignee) = request.assigned_to {
            active.assigned_to = Set(assignee);
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(db).await?)
    }

    #[instrument(skip(self), fields(inquiry_id = %inquiry_id))]
    pub async fn delete_inquiry(&self, inquiry_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_inquiry(inquiry_id).await?;
        existing.delete(&*self.db_pool).await?;
        Ok(())
    }
}
