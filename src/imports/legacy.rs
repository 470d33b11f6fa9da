//! One-shot migration from the previous SQLite schema.
//!
//! The old database grew columns through years of ad-hoc `ALTER TABLE`s, so
//! nothing about its shape is assumed: columns are discovered with
//! `PRAGMA table_info`, resolved through the same alias tables the CSV
//! importer uses, and every value is read back as text.

use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, Statement, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    db::DbPool,
    entities::{CustomerSource, OrderSource},
    errors::ServiceError,
    imports::{customer_from_fields, group_order_rows, ingest_orders_on},
    unify::{
        schema_drift::{ColumnMap, FieldMap, RecordKind},
        CustomerCandidate, ImportReport, RowIssue, UnificationService,
    },
};

pub const DEFAULT_CUSTOMERS_TABLE: &str = "customers";
pub const DEFAULT_ORDERS_TABLE: &str = "all_orders";

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table name pattern compiles"));

#[derive(Debug, Clone)]
pub struct LegacyOptions {
    pub customers_table: String,
    pub orders_table: String,
    /// System the legacy orders came from; also supplies the default business unit
    /// for legacy customers that never had one
    pub source: OrderSource,
    /// Run everything, report, then roll back
    pub dry_run: bool,
}

impl Default for LegacyOptions {
    fn default() -> Self {
        Self {
            customers_table: DEFAULT_CUSTOMERS_TABLE.to_string(),
            orders_table: DEFAULT_ORDERS_TABLE.to_string(),
            source: OrderSource::Manual,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LegacyReport {
    pub dry_run: bool,
    pub customers: ImportReport,
    pub orders: ImportReport,
    /// `table.column` entries that matched no alias and were ignored
    pub ignored_columns: Vec<String>,
}

fn checked_table(name: &str) -> Result<&str, ServiceError> {
    if TABLE_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(ServiceError::BadRequest(format!("invalid table name '{}'", name)))
    }
}

/// Column names of `table` in declaration order; empty when the table does not exist
pub async fn discover_columns(
    legacy: &DatabaseConnection,
    table: &str,
) -> Result<Vec<String>, ServiceError> {
    let table = checked_table(table)?;
    let rows = legacy
        .query_all(Statement::from_string(
            DbBackend::Sqlite,
            format!("PRAGMA table_info(\"{}\")", table),
        ))
        .await?;
    rows.iter()
        .map(|row| row.try_get::<String>("", "name").map_err(ServiceError::from))
        .collect()
}

fn text_value(row: &QueryResult, index: usize) -> Result<String, ServiceError> {
    Ok(row
        .try_get::<Option<String>>("", &format!("c{}", index))?
        .unwrap_or_default())
}

/// Reads every row of `table` as text, aliased into canonical fields
async fn read_table(
    legacy: &DatabaseConnection,
    table: &str,
    kind: RecordKind,
    ignored: &mut Vec<String>,
) -> Result<Vec<(usize, FieldMap)>, ServiceError> {
    let columns = discover_columns(legacy, table).await?;
    if columns.is_empty() {
        warn!(table, "legacy table not found; skipped");
        return Ok(Vec::new());
    }
    let map = ColumnMap::resolve(columns.iter().map(String::as_str), kind);
    ignored.extend(map.unknown_headers().iter().map(|c| format!("{}.{}", table, c)));

    let select = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("CAST(\"{}\" AS TEXT) AS c{}", column.replace('"', "\"\""), i))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = legacy
        .query_all(Statement::from_string(
            DbBackend::Sqlite,
            format!("SELECT {} FROM \"{}\" ORDER BY rowid", select, table),
        ))
        .await?;

    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let values = (0..columns.len())
            .map(|i| text_value(row, i))
            .collect::<Result<Vec<_>, _>>()?;
        parsed.push((index + 1, map.row(values.iter().map(String::as_str))));
    }
    info!(table, rows = parsed.len(), "legacy table read");
    Ok(parsed)
}

/// Copies customers then orders from the legacy database into `target` in one
/// transaction. Bad rows are skipped and reported; with `dry_run` nothing is kept.
#[instrument(skip(target, legacy), fields(dry_run = options.dry_run))]
pub async fn migrate_legacy(
    target: &DbPool,
    legacy: &DatabaseConnection,
    options: &LegacyOptions,
    bags_per_pallet: u32,
) -> Result<LegacyReport, ServiceError> {
    if legacy.get_database_backend() != DbBackend::Sqlite {
        return Err(ServiceError::BadRequest(
            "the legacy database must be SQLite".into(),
        ));
    }
    let mut report = LegacyReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    let customer_rows = read_table(
        legacy,
        &options.customers_table,
        RecordKind::Customer,
        &mut report.ignored_columns,
    )
    .await?;
    let fallback_unit = options.source.default_business_unit();
    let candidates = customer_rows
        .into_iter()
        .map(|(row, fields)| -> Result<CustomerCandidate, RowIssue> {
            let mut candidate = customer_from_fields(&fields, CustomerSource::Legacy)
                .map_err(|reason| RowIssue::new(row, reason))?;
            candidate.business_unit.get_or_insert(fallback_unit);
            Ok(candidate)
        })
        .collect();

    let order_rows = read_table(
        legacy,
        &options.orders_table,
        RecordKind::Order,
        &mut report.ignored_columns,
    )
    .await?;
    let orders = group_order_rows(order_rows, options.source);

    let txn = target.begin().await?;
    report.customers = UnificationService::import_customers_on(&txn, candidates).await?;
    report.orders = ingest_orders_on(&txn, orders, bags_per_pallet).await?;
    if options.dry_run {
        txn.rollback().await?;
    } else {
        txn.commit().await?;
    }

    info!(
        customers_inserted = report.customers.inserted,
        customers_skipped = report.customers.skipped,
        orders_inserted = report.orders.inserted,
        orders_skipped = report.orders.skipped,
        "legacy migration finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_plain_identifiers() {
        assert!(checked_table("all_orders").is_ok());
        assert!(checked_table("orders; DROP TABLE x").is_err());
        assert!(checked_table("\"quoted\"").is_err());
    }
}
