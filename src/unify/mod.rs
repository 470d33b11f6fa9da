//! Customer data unification.
//!
//! Every customer write, whatever system it comes from, is funnelled through
//! [`UnificationService::upsert_customer`]. The normalized email is the identity
//! key and [`merge`] decides what survives when two records describe the same
//! person.

pub mod schema_drift;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel,
    QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{customer, inquiry, order, quote, BusinessUnit, CustomerSource};
use crate::errors::{is_unique_violation, ServiceError};
use crate::events::{Event, EventSender};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9!#$%&'*+/=?^_`{|}~.-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$")
        .expect("email pattern compiles")
});

/// Trims, lowercases and strips a `mailto:` prefix. Returns `None` unless the
/// result is a single `local@domain.tld` address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut email = raw.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase();
    if let Some(rest) = email.strip_prefix("mailto:") {
        email = rest.trim().to_string();
    }
    if email.starts_with('.') || email.contains("..") || email.contains(".@") {
        return None;
    }
    EMAIL_RE.is_match(&email).then_some(email)
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn phone_digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn fill(slot: &mut Option<String>, incoming: &Option<String>) {
    if blank(slot) && !blank(incoming) {
        *slot = clean(incoming.clone());
    }
}

/// Splits `"Ada King Lovelace"` into `("Ada", "King Lovelace")`
pub fn split_full_name(full: &str) -> (Option<String>, Option<String>) {
    let full = full.trim();
    match full.split_once(char::is_whitespace) {
        Some((first, last)) => (clean(Some(first.to_string())), clean(Some(last.to_string()))),
        None => (clean(Some(full.to_string())), None),
    }
}

/// A source-agnostic customer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCandidate {
    pub source: CustomerSource,
    /// Every source this record stands for; always contains `source` unless built from a stored row
    pub sources: BTreeSet<CustomerSource>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub company: Option<String>,
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
    pub notes: Option<String>,
    pub seen_at: Option<DateTime<Utc>>,
}

impl CustomerCandidate {
    pub fn new(source: CustomerSource, email: impl Into<String>) -> Self {
        Self {
            source,
            sources: BTreeSet::from([source]),
            email: email.into(),
            first_name: None,
            last_name: None,
            full_name: None,
            company: None,
            phone: None,
            address1: None,
            address2: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            business_unit: None,
            ecommerce_customer_id: None,
            accounting_customer_id: None,
            accepts_marketing: None,
            notes: None,
            seen_at: None,
        }
    }

    /// Turns a stored customer back into a candidate so it can be merged into another row
    pub fn from_model(model: &customer::Model) -> Self {
        let sources = model.source_set();
        let source = sources
            .iter()
            .next()
            .copied()
            .unwrap_or(CustomerSource::Manual);
        Self {
            source,
            sources,
            email: model.email.clone(),
            first_name: model.first_name.clone(),
            last_name: model.last_name.clone(),
            full_name: None,
            company: model.company.clone(),
            phone: model.phone.clone(),
            address1: model.address1.clone(),
            address2: model.address2.clone(),
            city: model.city.clone(),
            state: model.state.clone(),
            postal_code: model.postal_code.clone(),
            country: model.country.clone(),
            business_unit: model.business_unit,
            ecommerce_customer_id: model.ecommerce_customer_id.clone(),
            accounting_customer_id: model.accounting_customer_id.clone(),
            accepts_marketing: Some(model.accepts_marketing),
            notes: model.notes.clone(),
            seen_at: Some(model.first_seen_at),
        }
    }

    /// Sets first/last from `full` when a whole name is all that is known
    pub fn with_full_name(mut self, full: impl Into<String>) -> Self {
        self.full_name = clean(Some(full.into()));
        self
    }

    /// First and last name, falling back to splitting the full name
    pub fn resolved_names(&self) -> (Option<String>, Option<String>) {
        if !blank(&self.first_name) || !blank(&self.last_name) {
            return (clean(self.first_name.clone()), clean(self.last_name.clone()));
        }
        match self.full_name.as_deref() {
            Some(full) => split_full_name(full),
            None => (None, None),
        }
    }

    /// The explicit business unit, or the default of the source system
    pub fn effective_business_unit(&self) -> Option<BusinessUnit> {
        self.business_unit
            .or_else(|| self.source.default_business_unit())
    }

    /// Builds a fresh row for an email seen for the first time
    pub fn into_new_model(self, email: String, now: DateTime<Utc>) -> customer::Model {
        let (first_name, last_name) = self.resolved_names();
        let business_unit = self.effective_business_unit();
        customer::Model {
            id: Uuid::new_v4(),
            email,
            first_name,
            last_name,
            company: clean(self.company),
            phone: clean(self.phone).filter(|p| !phone_digits(p).is_empty()),
            address1: clean(self.address1),
            address2: clean(self.address2),
            city: clean(self.city),
            state: clean(self.state),
            postal_code: clean(self.postal_code),
            country: clean(self.country),
            business_unit,
            sources: customer::format_sources(&self.sources),
            ecommerce_customer_id: clean(self.ecommerce_customer_id),
            accounting_customer_id: clean(self.accounting_customer_id),
            accepts_marketing: self.accepts_marketing.unwrap_or(false),
            notes: clean(self.notes),
            first_seen_at: self.seen_at.map(|s| s.min(now)).unwrap_or(now),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Folds `incoming` into `existing`. Existing non-blank values win; see the module docs.
/// `updated_at` is left untouched so callers can detect "nothing changed" by equality.
pub fn merge(existing: &customer::Model, incoming: &CustomerCandidate) -> customer::Model {
    let mut merged = existing.clone();
    let (first, last) = incoming.resolved_names();

    fill(&mut merged.first_name, &first);
    fill(&mut merged.last_name, &last);
    fill(&mut merged.company, &incoming.company);

    let existing_digits = merged.phone.as_deref().map(phone_digits).unwrap_or_default();
    let incoming_digits = incoming.phone.as_deref().map(phone_digits).unwrap_or_default();
    if existing_digits.is_empty() && !incoming_digits.is_empty() {
        merged.phone = clean(incoming.phone.clone());
    }

    fill(&mut merged.address1, &incoming.address1);
    fill(&mut merged.address2, &incoming.address2);
    fill(&mut merged.city, &incoming.city);
    fill(&mut merged.state, &incoming.state);
    fill(&mut merged.postal_code, &incoming.postal_code);
    fill(&mut merged.country, &incoming.country);
    fill(&mut merged.ecommerce_customer_id, &incoming.ecommerce_customer_id);
    fill(&mut merged.accounting_customer_id, &incoming.accounting_customer_id);
    fill(&mut merged.notes, &incoming.notes);

    let mut sources = existing.source_set();
    sources.extend(incoming.sources.iter().copied());
    merged.sources = customer::format_sources(&sources);

    merged.accepts_marketing =
        existing.accepts_marketing || incoming.accepts_marketing.unwrap_or(false);

    if let Some(seen) = incoming.seen_at {
        merged.first_seen_at = merged.first_seen_at.min(seen);
    }

    merged.business_unit =
        BusinessUnit::max_ranked(existing.business_unit, incoming.effective_business_unit());

    merged
}

/// What `upsert_customer` did with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// A row that was skipped, with its position in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row: usize,
    pub reason: String,
}

impl RowIssue {
    pub fn new(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
        }
    }
}

/// Skip-and-count summary of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub issues: Vec<RowIssue>,
}

impl ImportReport {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        self.total_rows += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn skip(&mut self, issue: RowIssue) {
        self.total_rows += 1;
        self.skipped += 1;
        self.issues.push(issue);
    }
}

#[derive(Clone)]
pub struct UnificationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl UnificationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Inserts or merges one candidate on the caller's connection or transaction
    pub async fn upsert_customer<C: ConnectionTrait>(
        conn: &C,
        candidate: CustomerCandidate,
    ) -> Result<(customer::Model, UpsertOutcome), ServiceError> {
        let email = normalize_email(&candidate.email).ok_or_else(|| {
            ServiceError::ValidationError(format!("invalid email address '{}'", candidate.email))
        })?;

        let existing = customer::Entity::find()
            .filter(customer::Column::Email.eq(email.as_str()))
            .one(conn)
            .await?;

        let now = Utc::now();
        match existing {
            None => {
                let model = candidate.into_new_model(email, now);
                let inserted = model
                    .into_active_model()
                    .reset_all()
                    .insert(conn)
                    .await
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            ServiceError::Conflict(
                                "customer was created concurrently; retry the request".into(),
                            )
                        } else {
                            ServiceError::DatabaseError(e)
                        }
                    })?;
                Ok((inserted, UpsertOutcome::Inserted))
            }
            Some(current) => {
                let mut merged = merge(&current, &candidate);
                if merged == current {
                    return Ok((current, UpsertOutcome::Unchanged));
                }
                merged.updated_at = now;
                let updated = merged.into_active_model().reset_all().update(conn).await?;
                Ok((updated, UpsertOutcome::Updated))
            }
        }
    }

    /// Single-record upsert in its own transaction
    #[instrument(skip(self, candidate), fields(source = %candidate.source))]
    pub async fn upsert(
        &self,
        candidate: CustomerCandidate,
    ) -> Result<(customer::Model, UpsertOutcome), ServiceError> {
        let txn = self.db_pool.begin().await?;
        let (model, outcome) = Self::upsert_customer(&txn, candidate).await?;
        txn.commit().await?;

        if outcome != UpsertOutcome::Unchanged {
            self.event_sender
                .send_or_log(Event::CustomerChanged(model.id))
                .await;
        }
        Ok((model, outcome))
    }

    /// Ingests a batch in one transaction. Bad rows are skipped and reported;
    /// a database error rolls back the whole batch.
    #[instrument(skip(self, rows))]
    pub async fn import_customers(
        &self,
        rows: Vec<Result<CustomerCandidate, RowIssue>>,
    ) -> Result<ImportReport, ServiceError> {
        let txn = self.db_pool.begin().await?;
        let report = Self::import_customers_on(&txn, rows).await?;
        txn.commit().await?;

        info!(
            total = report.total_rows,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "customer batch imported"
        );
        Ok(report)
    }

    /// Batch body shared by the CSV and legacy paths
    pub async fn import_customers_on<C: ConnectionTrait>(
        conn: &C,
        rows: Vec<Result<CustomerCandidate, RowIssue>>,
    ) -> Result<ImportReport, ServiceError> {
        let mut report = ImportReport::default();
        for (index, row) in rows.into_iter().enumerate() {
            let candidate = match row {
                Ok(candidate) => candidate,
                Err(issue) => {
                    metrics::counter!("crm.import.rows", 1, "kind" => "customer", "result" => "skipped");
                    report.skip(issue);
                    continue;
                }
            };
            match Self::upsert_customer(conn, candidate).await {
                Ok((_, outcome)) => {
                    metrics::counter!("crm.import.rows", 1, "kind" => "customer", "result" => "ok");
                    report.record(outcome);
                }
                Err(ServiceError::ValidationError(reason)) => {
                    metrics::counter!("crm.import.rows", 1, "kind" => "customer", "result" => "skipped");
                    report.skip(RowIssue::new(index + 1, reason));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Folds `merge_id` into `keep_id` and deletes it. Orders, inquiries and quotes
    /// that pointed at the dropped record, by id or by email, now point at the kept one.
    #[instrument(skip(self))]
    pub async fn merge_customers(
        &self,
        keep_id: Uuid,
        merge_id: Uuid,
    ) -> Result<customer::Model, ServiceError> {
        if keep_id == merge_id {
            return Err(ServiceError::BadRequest(
                "cannot merge a customer into itself".into(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let keep = customer::Entity::find_by_id(keep_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", keep_id))?;
        let dropped = customer::Entity::find_by_id(merge_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer", merge_id))?;

        let moved_orders = order::Entity::update_many()
            .col_expr(order::Column::CustomerId, Expr::value(keep.id))
            .col_expr(order::Column::CustomerEmail, Expr::value(keep.email.clone()))
            .filter(
                order::Column::CustomerId
                    .eq(dropped.id)
                    .or(order::Column::CustomerEmail.eq(dropped.email.as_str())),
            )
            .exec(&txn)
            .await?
            .rows_affected;

        inquiry::Entity::update_many()
            .col_expr(inquiry::Column::CustomerId, Expr::value(keep.id))
            .col_expr(inquiry::Column::Email, Expr::value(keep.email.clone()))
            .filter(
                inquiry::Column::CustomerId
                    .eq(dropped.id)
                    .or(inquiry::Column::Email.eq(dropped.email.as_str())),
            )
            .exec(&txn)
            .await?;

        quote::Entity::update_many()
            .col_expr(quote::Column::CustomerId, Expr::value(keep.id))
            .col_expr(quote::Column::CustomerEmail, Expr::value(keep.email.clone()))
            .filter(
                quote::Column::CustomerId
                    .eq(dropped.id)
                    .or(quote::Column::CustomerEmail.eq(dropped.email.as_str())),
            )
            .exec(&txn)
            .await?;

        customer::Entity::delete_by_id(dropped.id).exec(&txn).await?;

        let mut merged = merge(&keep, &CustomerCandidate::from_model(&dropped));
        merged.updated_at = Utc::now();
        let merged = merged.into_active_model().reset_all().update(&txn).await?;
        txn.commit().await?;

        info!(kept = %keep_id, merged = %merge_id, moved_orders, "customers merged");
        if let Err(e) = self
            .event_sender
            .send(Event::CustomersMerged {
                kept_id: keep_id,
                merged_id: merge_id,
            })
            .await
        {
            warn!(error = %e, "merge event dropped");
        }
        Ok(merged)
    }
}
