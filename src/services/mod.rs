// Unified records
pub mod customers;
pub mod inquiries;
pub mod line_items;
pub mod orders;
pub mod quotes;

// External systems
pub mod accounting;
pub mod commerce_platform;

// Reporting and notifications
pub mod dashboard;
pub mod push;

// Staff accounts
pub mod users;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::LikeExpr;

use crate::errors::ServiceError;
use crate::unify::schema_drift::parse_date;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// One page of a listing plus the total number of matching rows
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.total + self.limit - 1) / self.limit
        }
    }
}

/// Clamps 1-based page and page size to sane values
pub fn page_bounds(page: Option<u64>, limit: Option<u64>) -> (u64, u64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, limit)
}

const LIKE_ESCAPE: char = '\\';

/// Escapes `LIKE` wildcards so they match literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Lowercased `%term%` for case-insensitive `LIKE` searches; `None` for blank input
pub fn like_pattern(term: Option<&str>) -> Option<LikeExpr> {
    let term = term?.trim();
    if term.is_empty() {
        return None;
    }
    Some(LikeExpr::new(format!("%{}%", escape_like(&term.to_lowercase()))).escape(LIKE_ESCAPE))
}

/// Parses a `from`/`to` query bound. A date-only upper bound covers the whole day.
pub fn parse_range_bound(
    name: &str,
    raw: Option<&str>,
    upper: bool,
) -> Result<Option<DateTime<Utc>>, ServiceError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let parsed = parse_date(raw)
        .ok_or_else(|| ServiceError::BadRequest(format!("invalid {} date '{}'", name, raw)))?;
    let date_only = !raw.contains(':');
    Ok(Some(if upper && date_only {
        parsed + Duration::days(1) - Duration::microseconds(1)
    } else {
        parsed
    }))
}
