//! Sales and customer dashboards, served from TTL caches that data-changing events clear.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    cache::TtlCache,
    db::DbPool,
    entities::{customer, order, BusinessUnit, CustomerSource, OrderStatus},
    errors::ServiceError,
    events::{Event, EventHandler},
};

const TOP_CUSTOMER_LIMIT: usize = 10;
const NEW_CUSTOMER_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitTotals {
    pub business_unit: BusinessUnit,
    pub orders: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub business_unit: BusinessUnit,
    pub orders: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopCustomer {
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub name: Option<String>,
    pub orders: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub by_business_unit: Vec<UnitTotals>,
    pub monthly: Vec<MonthlyRevenue>,
    pub top_customers: Vec<TopCustomer>,
    pub order_count: u64,
    pub grand_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitCount {
    /// `None` for customers no channel has claimed yet
    pub business_unit: Option<BusinessUnit>,
    pub customers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCount {
    pub source: CustomerSource,
    pub customers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub total: u64,
    pub by_business_unit: Vec<UnitCount>,
    pub by_source: Vec<SourceCount>,
    pub new_last_30_days: u64,
}

/// Aggregates revenue-bearing orders. Cancelled and refunded orders are skipped.
pub fn summarize_sales(
    orders: &[order::Model],
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> SalesSummary {
    let mut units: BTreeMap<u8, UnitTotals> = BTreeMap::new();
    let mut monthly: BTreeMap<(String, u8), MonthlyRevenue> = BTreeMap::new();
    let mut customers: HashMap<&str, TopCustomer> = HashMap::new();
    let mut order_count = 0;
    let mut grand_total = Decimal::ZERO;

    for o in orders.iter().filter(|o| o.status.counts_as_revenue()) {
        order_count += 1;
        grand_total = grand_total.saturating_add(o.total);

        let unit = units.entry(o.business_unit.rank()).or_insert(UnitTotals {
            business_unit: o.business_unit,
            orders: 0,
            revenue: Decimal::ZERO,
        });
        unit.orders += 1;
        unit.revenue = unit.revenue.saturating_add(o.total);

        let month = o.order_date.format("%Y-%m").to_string();
        let bucket = monthly
            .entry((month.clone(), o.business_unit.rank()))
            .or_insert(MonthlyRevenue {
                month,
                business_unit: o.business_unit,
                orders: 0,
                revenue: Decimal::ZERO,
            });
        bucket.orders += 1;
        bucket.revenue = bucket.revenue.saturating_add(o.total);

        let top = customers
            .entry(o.customer_email.as_str())
            .or_insert(TopCustomer {
                customer_id: o.customer_id,
                email: o.customer_email.clone(),
                name: None,
                orders: 0,
                revenue: Decimal::ZERO,
            });
        top.orders += 1;
        top.revenue = top.revenue.saturating_add(o.total);
        if top.customer_id.is_none() {
            top.customer_id = o.customer_id;
        }
        if o.customer_name.is_some() {
            top.name = o.customer_name.clone();
        }
    }

    let mut top_customers: Vec<TopCustomer> = customers.into_values().collect();
    top_customers.sort_by(|a, b| b.revenue.cmp(&a.revenue).then_with(|| a.email.cmp(&b.email)));
    top_customers.truncate(TOP_CUSTOMER_LIMIT);

    SalesSummary {
        from,
        to,
        by_business_unit: units.into_values().collect(),
        monthly: monthly.into_values().collect(),
        top_customers,
        order_count,
        grand_total,
    }
}

/// Counts customers per business unit and per source; `new_since` marks the "new" window
pub fn summarize_customers(customers: &[customer::Model], new_since: DateTime<Utc>) -> CustomerSummary {
    let mut units: BTreeMap<Option<u8>, UnitCount> = BTreeMap::new();
    let mut sources: BTreeMap<CustomerSource, u64> = BTreeMap::new();
    let mut new_last_30_days = 0;

    for c in customers {
        units
            .entry(c.business_unit.map(BusinessUnit::rank))
            .or_insert(UnitCount {
                business_unit: c.business_unit,
                customers: 0,
            })
            .customers += 1;
        for source in c.source_set() {
            *sources.entry(source).or_default() += 1;
        }
        if c.created_at >= new_since {
            new_last_30_days += 1;
        }
    }

    CustomerSummary {
        total: customers.len() as u64,
        by_business_unit: units.into_values().collect(),
        by_source: sources
            .into_iter()
            .map(|(source, customers)| SourceCount { source, customers })
            .collect(),
        new_last_30_days,
    }
}

type SalesKey = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

#[derive(Clone)]
pub struct DashboardService {
    db_pool: Arc<DbPool>,
    sales_cache: TtlCache<SalesKey, SalesSummary>,
    customer_cache: TtlCache<(), CustomerSummary>,
}

impl DashboardService {
    pub fn new(db_pool: Arc<DbPool>, ttl: std::time::Duration) -> Self {
        Self {
            db_pool,
            sales_cache: TtlCache::new("dashboard_sales", ttl),
            customer_cache: TtlCache::new("dashboard_customers", ttl),
        }
    }

    #[instrument(skip(self))]
    pub async fn sales_summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<SalesSummary, ServiceError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ServiceError::BadRequest("'from' is after 'to'".into()));
            }
        }
        let db = self.db_pool.clone();
        self.sales_cache
            .get_or_try_insert_with((from, to), || async move {
                let mut query = order::Entity::find().filter(
                    order::Column::Status
                        .is_not_in([OrderStatus::Cancelled, OrderStatus::Refunded]),
                );
                if let Some(from) = from {
                    query = query.filter(order::Column::OrderDate.gte(from));
                }
                if let Some(to) = to {
                    query = query.filter(order::Column::OrderDate.lte(to));
                }
                let orders = query
                    .order_by_asc(order::Column::OrderDate)
                    .all(&*db)
                    .await?;
                debug!(orders = orders.len(), "sales summary recomputed");
                Ok::<_, ServiceError>(summarize_sales(&orders, from, to))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn customer_summary(&self) -> Result<CustomerSummary, ServiceError> {
        let db = self.db_pool.clone();
        self.customer_cache
            .get_or_try_insert_with((), || async move {
                let customers = customer::Entity::find().all(&*db).await?;
                let since = Utc::now() - Duration::days(NEW_CUSTOMER_WINDOW_DAYS);
                Ok::<_, ServiceError>(summarize_customers(&customers, since))
            })
            .await
    }

    pub fn invalidate(&self) {
        self.sales_cache.clear();
        self.customer_cache.clear();
    }

    /// Drops expired entries from both caches
    pub fn purge_expired(&self) -> usize {
        self.sales_cache.purge_expired() + self.customer_cache.purge_expired()
    }
}

/// Clears dashboard caches whenever an event changes aggregated data
pub struct DashboardInvalidator {
    dashboards: DashboardService,
}

impl DashboardInvalidator {
    pub fn new(dashboards: DashboardService) -> Self {
        Self { dashboards }
    }
}

#[async_trait]
impl EventHandler for DashboardInvalidator {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        if event.affects_dashboards() {
            self.dashboards.invalidate();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderSource;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order(email: &str, unit: BusinessUnit, status: OrderStatus, month: u32, total: Decimal) -> order::Model {
        let at = Utc.with_ymd_and_hms(2024, month, 10, 12, 0, 0).unwrap();
        order::Model {
            id: Uuid::new_v4(),
            source: OrderSource::Manual,
            external_id: Uuid::new_v4().to_string(),
            order_number: "M-1".into(),
            customer_id: None,
            customer_email: email.into(),
            customer_name: Some(email.to_uppercase()),
            business_unit: unit,
            status,
            order_date: at,
            currency: "USD".into(),
            subtotal: total,
            tax: Decimal::ZERO,
            shipping: Decimal::ZERO,
            total,
            notes: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn sales_summary_excludes_cancelled_and_refunded() {
        let orders = vec![
            order("a@x.com", BusinessUnit::Retail, OrderStatus::Paid, 1, dec!(100)),
            order("a@x.com", BusinessUnit::Pallet, OrderStatus::Fulfilled, 1, dec!(900)),
            order("b@x.com", BusinessUnit::Retail, OrderStatus::Pending, 2, dec!(50)),
            order("b@x.com", BusinessUnit::Retail, OrderStatus::Cancelled, 2, dec!(5000)),
            order("c@x.com", BusinessUnit::Digital, OrderStatus::Refunded, 2, dec!(70)),
        ];
        let summary = summarize_sales(&orders, None, None);

        assert_eq!(summary.order_count, 3);
        assert_eq!(summary.grand_total, dec!(1050));
        assert_eq!(
            summary.by_business_unit,
            vec![
                UnitTotals { business_unit: BusinessUnit::Retail, orders: 2, revenue: dec!(150) },
                UnitTotals { business_unit: BusinessUnit::Pallet, orders: 1, revenue: dec!(900) },
            ]
        );
        let months: Vec<(&str, BusinessUnit)> = summary
            .monthly
            .iter()
            .map(|m| (m.month.as_str(), m.business_unit))
            .collect();
        assert_eq!(
            months,
            vec![
                ("2024-01", BusinessUnit::Retail),
                ("2024-01", BusinessUnit::Pallet),
                ("2024-02", BusinessUnit::Retail),
            ]
        );
        assert_eq!(summary.top_customers[0].email, "a@x.com");
        assert_eq!(summary.top_customers[0].revenue, dec!(1000));
        assert_eq!(summary.top_customers.len(), 2);
    }

    #[test]
    fn huge_totals_saturate_instead_of_overflowing() {
        let orders = vec![
            order("a@x.com", BusinessUnit::Retail, OrderStatus::Paid, 1, Decimal::MAX),
            order("a@x.com", BusinessUnit::Retail, OrderStatus::Paid, 1, Decimal::MAX),
        ];
        let summary = summarize_sales(&orders, None, None);
        assert_eq!(summary.order_count, 2);
        assert_eq!(summary.grand_total, Decimal::MAX);
        assert_eq!(summary.by_business_unit[0].revenue, Decimal::MAX);
        assert_eq!(summary.top_customers[0].revenue, Decimal::MAX);
    }

    #[test]
    fn top_customers_are_capped() {
        let orders: Vec<_> = (0..15)
            .map(|i| order(&format!("c{}@x.com", i), BusinessUnit::Retail, OrderStatus::Paid, 3, Decimal::from(i)))
            .collect();
        let summary = summarize_sales(&orders, None, None);
        assert_eq!(summary.top_customers.len(), TOP_CUSTOMER_LIMIT);
        assert_eq!(summary.top_customers[0].email, "c14@x.com");
    }

    #[test]
    fn customer_counts_by_unit_and_source() {
        let now = Utc::now();
        let customer = |unit: Option<BusinessUnit>, sources: &str, age_days: i64| customer::Model {
            id: Uuid::new_v4(),
            email: format!("{}@x.com", Uuid::new_v4()),
            first_name: None,
            last_name: None,
            company: None,
            phone: None,
            address1: None,
            address2: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            business_unit: unit,
            sources: sources.into(),
            ecommerce_customer_id: None,
            accounting_customer_id: None,
            accepts_marketing: false,
            notes: None,
            first_seen_at: now - Duration::days(age_days),
            created_at: now - Duration::days(age_days),
            updated_at: now,
        };
        let customers = vec![
            customer(Some(BusinessUnit::Retail), "ecommerce,website", 1),
            customer(Some(BusinessUnit::Pallet), "accounting", 90),
            customer(None, "csv_import", 5),
        ];
        let summary = summarize_customers(&customers, now - Duration::days(NEW_CUSTOMER_WINDOW_DAYS));

        assert_eq!(summary.total, 3);
        assert_eq!(summary.new_last_30_days, 2);
        assert_eq!(summary.by_business_unit[0].business_unit, None);
        assert_eq!(summary.by_business_unit.len(), 3);
        let website = summary
            .by_source
            .iter()
            .find(|s| s.source == CustomerSource::Website)
            .unwrap();
        assert_eq!(website.customers, 1);
        assert_eq!(summary.by_source.len(), 4);
    }
}
