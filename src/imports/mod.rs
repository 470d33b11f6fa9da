//! CSV ingestion for customer and order exports.
//!
//! Exports from different systems (and different years of the same system)
//! disagree on header names, so every file goes through the alias tables in
//! [`crate::unify::schema_drift`] before rows are turned into candidates.
//! Row numbers in reports count data rows, starting at 1 below the header.

pub mod legacy;

use sea_orm::{ConnectionTrait, TransactionTrait};
use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    db::DbPool,
    entities::{CustomerSource, OrderSource},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{line_items::LineInput, orders::ExternalOrder, orders::OrderService},
    tracing::with_metrics,
    unify::{
        schema_drift::{parse_business_unit, parse_order_status, ColumnMap, FieldMap, RecordKind},
        CustomerCandidate, ImportReport, RowIssue, UnificationService,
    },
};

/// An order assembled from one or more rows, tagged with the first row it came from
#[derive(Debug, Clone)]
pub struct ParsedOrder {
    pub row: usize,
    pub order: ExternalOrder,
}

/// Builds a customer candidate from one aliased row
pub fn customer_from_fields(
    fields: &FieldMap,
    source: CustomerSource,
) -> Result<CustomerCandidate, String> {
    let email = fields.get("email").ok_or("missing email")?;
    let mut candidate = CustomerCandidate::new(source, email);
    if let Some(full) = fields.string("full_name") {
        candidate = candidate.with_full_name(full);
    }
    candidate.first_name = fields.string("first_name");
    candidate.last_name = fields.string("last_name");
    candidate.company = fields.string("company");
    candidate.phone = fields.string("phone");
    candidate.address1 = fields.string("address1");
    candidate.address2 = fields.string("address2");
    candidate.city = fields.string("city");
    candidate.state = fields.string("state");
    candidate.postal_code = fields.string("postal_code");
    candidate.country = fields.string("country");
    candidate.ecommerce_customer_id = fields.string("ecommerce_customer_id");
    candidate.accounting_customer_id = fields.string("accounting_customer_id");
    candidate.notes = fields.string("notes");
    candidate.accepts_marketing = fields.bool("accepts_marketing");
    if let Some(raw) = fields.get("business_unit") {
        candidate.business_unit = Some(
            fields
                .business_unit("business_unit")
                .ok_or_else(|| format!("unknown business unit '{}'", raw))?,
        );
    }
    candidate.seen_at = fields.date("created_at")?;
    Ok(candidate)
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn column_map<R: Read>(
    reader: &mut csv::Reader<R>,
    kind: RecordKind,
) -> Result<ColumnMap, ServiceError> {
    let headers = reader.headers()?.clone();
    let map = ColumnMap::resolve(headers.iter(), kind);
    if !map.unknown_headers().is_empty() {
        info!(ignored = ?map.unknown_headers(), "unrecognised CSV columns ignored");
    }
    Ok(map)
}

/// Every data row becomes a candidate or the reason it was rejected.
/// A file with no email column is rejected as a whole.
pub fn parse_customer_csv<R: Read>(
    reader: R,
    source: CustomerSource,
) -> Result<Vec<Result<CustomerCandidate, RowIssue>>, ServiceError> {
    let mut reader = csv_reader(reader);
    let map = column_map(&mut reader, RecordKind::Customer)?;
    if !map.has("email") {
        return Err(ServiceError::ImportError(
            "customer file has no recognisable email column".into(),
        ));
    }

    Ok(reader
        .records()
        .enumerate()
        .map(|(index, record)| -> Result<CustomerCandidate, RowIssue> {
            let row = index + 1;
            let record = record.map_err(|e| RowIssue::new(row, e.to_string()))?;
            customer_from_fields(&map.row(record.iter()), source)
                .map_err(|reason| RowIssue::new(row, reason))
        })
        .collect())
}

fn first<'a>(rows: &'a [(usize, FieldMap)], field: &str) -> Option<&'a str> {
    rows.iter().find_map(|(_, fields)| fields.get(field))
}

fn line_from_fields(fields: &FieldMap) -> Result<Option<LineInput>, String> {
    let sku = fields.string("sku");
    let description = fields.string("description");
    if sku.is_none() && description.is_none() {
        return Ok(None);
    }
    let quantity = match fields.get("quantity") {
        Some(raw) => rust_decimal::Decimal::from_str(raw.replace(',', "").as_str())
            .map_err(|_| format!("invalid quantity '{}'", raw))?,
        None => rust_decimal::Decimal::ONE,
    };
    Ok(Some(LineInput {
        description: description.or_else(|| sku.clone()).unwrap_or_default(),
        sku,
        quantity,
        unit: fields.string("unit"),
        unit_price: fields.money("unit_price")?,
        total: fields.money("line_total")?,
    }))
}

fn order_from_rows(
    key: String,
    rows: &[(usize, FieldMap)],
    source: OrderSource,
) -> Result<ExternalOrder, RowIssue> {
    let first_row = rows.first().map(|(row, _)| *row).unwrap_or(1);
    let at = |row: usize| move |reason: String| RowIssue::new(row, reason);

    let email = first(rows, "email").ok_or_else(|| RowIssue::new(first_row, "missing email"))?;
    let mut candidate = CustomerCandidate::new(source.customer_source(), email);
    if let Some(name) = first(rows, "customer_name") {
        candidate = candidate.with_full_name(name);
    }
    candidate.company = first(rows, "company").map(str::to_string);
    candidate.phone = first(rows, "phone").map(str::to_string);
    candidate.ecommerce_customer_id = first(rows, "ecommerce_customer_id").map(str::to_string);
    candidate.accounting_customer_id = first(rows, "accounting_customer_id").map(str::to_string);

    let mut order = ExternalOrder::new(source, key, candidate);
    if let Some(number) = first(rows, "order_number") {
        order.order_number = number.to_string();
    }
    if let Some(currency) = first(rows, "currency") {
        order.currency = currency.to_uppercase();
    }
    if let Some(raw) = first(rows, "status") {
        order.status = parse_order_status(raw)
            .ok_or_else(|| RowIssue::new(first_row, format!("unknown order status '{}'", raw)))?;
    }
    if let Some(raw) = first(rows, "business_unit") {
        order.business_unit = Some(
            parse_business_unit(raw).ok_or_else(|| {
                RowIssue::new(first_row, format!("unknown business unit '{}'", raw))
            })?,
        );
    }
    order.notes = first(rows, "notes").map(str::to_string);

    // Order-level values come from the first row that carries them
    let header_row = rows
        .iter()
        .find(|(_, fields)| fields.get("total").is_some() || fields.get("order_date").is_some())
        .unwrap_or(&rows[0]);
    let (row, fields) = header_row;
    if let Some(date) = fields.date("order_date").map_err(at(*row))? {
        order.order_date = Some(date);
    }
    order.subtotal = fields.money("subtotal").map_err(at(*row))?;
    order.total = fields.money("total").map_err(at(*row))?;
    order.tax = fields.money("tax").map_err(at(*row))?.unwrap_or_default();
    order.shipping = fields.money("shipping").map_err(at(*row))?.unwrap_or_default();

    for (row, fields) in rows {
        if let Some(line) = line_from_fields(fields).map_err(at(*row))? {
            order.lines.push(line);
        }
    }
    Ok(order)
}

fn row_of(result: &Result<ParsedOrder, RowIssue>) -> usize {
    match result {
        Ok(parsed) => parsed.row,
        Err(issue) => issue.row,
    }
}

/// Groups one-row-per-line-item rows by order and builds an order per group,
/// in the order groups first appear
pub fn group_order_rows(
    rows: Vec<(usize, FieldMap)>,
    source: OrderSource,
) -> Vec<Result<ParsedOrder, RowIssue>> {
    let mut results = grouped_orders(rows, source);
    results.sort_by_key(row_of);
    results
}

fn grouped_orders(
    rows: Vec<(usize, FieldMap)>,
    source: OrderSource,
) -> Vec<Result<ParsedOrder, RowIssue>> {
    let mut results: Vec<Result<ParsedOrder, RowIssue>> = Vec::new();
    let mut groups: Vec<(String, Vec<(usize, FieldMap)>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (row, fields) in rows {
        let Some(key) = fields
            .get("external_id")
            .or_else(|| fields.get("order_number"))
            .map(str::to_string)
        else {
            if !fields.is_empty() {
                results.push(Err(RowIssue::new(row, "missing order number")));
            }
            continue;
        };
        match index.get(&key) {
            Some(&at) => groups[at].1.push((row, fields)),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![(row, fields)]));
            }
        }
    }

    for (key, rows) in groups {
        let row = rows[0].0;
        results.push(order_from_rows(key, &rows, source).map(|order| ParsedOrder { row, order }));
    }
    results
}

/// Parses an order export. A file without an order number or email column is rejected.
pub fn parse_order_csv<R: Read>(
    reader: R,
    source: OrderSource,
) -> Result<Vec<Result<ParsedOrder, RowIssue>>, ServiceError> {
    let mut reader = csv_reader(reader);
    let map = column_map(&mut reader, RecordKind::Order)?;
    if !map.has("order_number") && !map.has("external_id") {
        return Err(ServiceError::ImportError(
            "order file has no recognisable order number column".into(),
        ));
    }
    if !map.has("email") {
        return Err(ServiceError::ImportError(
            "order file has no recognisable customer email column".into(),
        ));
    }

    let mut rows = Vec::new();
    let mut unreadable = Vec::new();
    for (index, record) in reader.records().enumerate() {
        match record {
            Ok(record) => rows.push((index + 1, map.row(record.iter()))),
            Err(e) => unreadable.push(Err(RowIssue::new(index + 1, e.to_string()))),
        }
    }
    let mut parsed = grouped_orders(rows, source);
    parsed.extend(unreadable);
    parsed.sort_by_key(row_of);
    Ok(parsed)
}

/// Upserts parsed orders on the caller's transaction with skip-and-count reporting
pub async fn ingest_orders_on<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<Result<ParsedOrder, RowIssue>>,
    bags_per_pallet: u32,
) -> Result<ImportReport, ServiceError> {
    let mut report = ImportReport::default();
    for parsed in orders {
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(issue) => {
                metrics::counter!("crm.import.rows", 1, "kind" => "order", "result" => "skipped");
                report.skip(issue);
                continue;
            }
        };
        let row = parsed.row;
        match OrderService::upsert_external(conn, parsed.order, bags_per_pallet).await {
            Ok((_, outcome)) => {
                metrics::counter!("crm.import.rows", 1, "kind" => "order", "result" => "ok");
                report.record(outcome);
            }
            Err(ServiceError::ValidationError(reason)) => {
                metrics::counter!("crm.import.rows", 1, "kind" => "order", "result" => "skipped");
                report.skip(RowIssue::new(row, reason));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

#[derive(Clone)]
pub struct ImportService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    bags_per_pallet: u32,
}

impl ImportService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, bags_per_pallet: u32) -> Self {
        Self {
            db_pool,
            event_sender,
            bags_per_pallet,
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len(), source = %source))]
    pub async fn import_customers_csv(
        &self,
        data: &[u8],
        source: CustomerSource,
    ) -> Result<ImportReport, ServiceError> {
        let rows = parse_customer_csv(data, source)?;
        let report = with_metrics("import_customers_csv", || async {
            let txn = self.db_pool.begin().await?;
            let report = UnificationService::import_customers_on(&txn, rows).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(report)
        })
        .await?;

        self.finish("customers", source.to_string(), &report).await;
        Ok(report)
    }

    #[instrument(skip(self, data), fields(bytes = data.len(), source = %source))]
    pub async fn import_orders_csv(
        &self,
        data: &[u8],
        source: OrderSource,
    ) -> Result<ImportReport, ServiceError> {
        let orders = parse_order_csv(data, source)?;
        let report = with_metrics("import_orders_csv", || async {
            let txn = self.db_pool.begin().await?;
            let report = ingest_orders_on(&txn, orders, self.bags_per_pallet).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(report)
        })
        .await?;

        self.finish("orders", source.to_string(), &report).await;
        Ok(report)
    }

    async fn finish(&self, kind: &str, source: String, report: &ImportReport) {
        if report.skipped > 0 {
            warn!(kind, skipped = report.skipped, "import skipped rows");
        }
        info!(
            kind,
            total = report.total_rows,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "import finished"
        );
        self.event_sender
            .send_or_log(Event::ImportCompleted {
                kind: kind.to_string(),
                source,
                inserted: report.inserted,
                updated: report.updated,
                skipped: report.skipped,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BusinessUnit, OrderStatus};
    use rust_decimal_macros::dec;

    #[test]
    fn customer_rows_tolerate_header_drift() {
        let data = "\u{feff}Email Address,First Name,Last_Name,Company,Accepts Marketing,Customer Type\n\
                    ADA@Example.com ,Ada,Lovelace,Engines Ltd,yes,wholesale\n\
                    ,Nobody,,,,\n\
                    grace@example.com,Grace,Hopper,,no,spaceship\n";
        let rows = parse_customer_csv(data.as_bytes(), CustomerSource::CsvImport).unwrap();
        assert_eq!(rows.len(), 3);

        let ada = rows[0].as_ref().unwrap();
        assert_eq!(ada.email, "ADA@Example.com");
        assert_eq!(ada.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(ada.accepts_marketing, Some(true));
        assert_eq!(ada.business_unit, Some(BusinessUnit::Distributor));

        assert_eq!(rows[1].as_ref().unwrap_err(), &RowIssue::new(2, "missing email"));
        assert_eq!(rows[2].as_ref().unwrap_err().row, 3);
    }

    #[test]
    fn customer_file_without_email_column_is_rejected() {
        let data = "Name,Phone\nAda,555\n";
        assert!(parse_customer_csv(data.as_bytes(), CustomerSource::CsvImport).is_err());
    }

    #[test]
    fn order_rows_are_grouped_by_order_number() {
        let data = "Name,Email,Financial Status,Created at,Total,Lineitem quantity,Lineitem name,Lineitem price,Lineitem sku\n\
                    #1001,ada@example.com,paid,2024-03-01 10:00:00 -0500,$150.00,2,Topsoil bag,25.00,TS-1\n\
                    #1002,grace@example.com,refunded,2024-03-02,40,1,Mulch,40,MU-1\n\
                    #1001,,,,,1,Compost pallet,100,CP-PAL\n";
        let orders = parse_order_csv(data.as_bytes(), OrderSource::Ecommerce).unwrap();
        assert_eq!(orders.len(), 2);

        let first = orders[0].as_ref().unwrap();
        assert_eq!(first.row, 1);
        assert_eq!(first.order.external_id, "#1001");
        assert_eq!(first.order.status, OrderStatus::Paid);
        assert_eq!(first.order.total, Some(dec!(150.00)));
        assert_eq!(first.order.lines.len(), 2);
        assert_eq!(first.order.lines[1].sku.as_deref(), Some("CP-PAL"));
        assert_eq!(first.order.customer.source, CustomerSource::Ecommerce);

        let second = orders[1].as_ref().unwrap();
        assert_eq!(second.row, 2);
        assert_eq!(second.order.status, OrderStatus::Refunded);
    }

    #[test]
    fn bad_order_values_become_row_issues() {
        let data = "Order Number,Email,Total\nA-1,a@example.com,lots\n,b@example.com,5\n";
        let orders = parse_order_csv(data.as_bytes(), OrderSource::Distributor).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].as_ref().unwrap_err().row, 1);
        assert_eq!(orders[1].as_ref().unwrap_err(), &RowIssue::new(2, "missing order number"));
    }

    #[test]
    fn unreadable_rows_are_reported_in_file_order() {
        let mut data = b"Order Number,Email,Total\nA-1,a@example.com,5\n".to_vec();
        data.extend_from_slice(b"A-2,b@example.com,\xff\xfe\n");
        data.extend_from_slice(b"A-3,c@example.com,7\n");
        let orders = parse_order_csv(data.as_slice(), OrderSource::Distributor).unwrap();
        let rows: Vec<usize> = orders.iter().map(row_of).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert!(orders[1].is_err());
        assert_eq!(orders[2].as_ref().unwrap().order.external_id, "A-3");
    }

    #[test]
    fn orders_without_a_date_leave_it_unset() {
        let data = "Order Number,Email,Total\nA-1,a@example.com,5\n";
        let orders = parse_order_csv(data.as_bytes(), OrderSource::Distributor).unwrap();
        assert_eq!(orders[0].as_ref().unwrap().order.order_date, None);
    }
}
