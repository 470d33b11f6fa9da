//! Header aliasing and tolerant value parsing for exports whose columns drift
//! between systems and over time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::entities::{BusinessUnit, OrderStatus};

/// Lowercases a header and folds `_`, `-`, `.`, `/`, `#` and runs of whitespace into single spaces
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .chars()
        .map(|c| match c {
            '_' | '-' | '.' | '/' | '#' | ':' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_aliases(table: &[(&'static str, &[&str])]) -> HashMap<String, &'static str> {
    let mut map = HashMap::new();
    for (canonical, aliases) in table {
        map.insert(normalize_header(canonical), *canonical);
        for alias in *aliases {
            map.insert(normalize_header(alias), *canonical);
        }
    }
    map
}

static CUSTOMER_ALIASES: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    build_aliases(&[
        (
            "email",
            &[
                "E-mail",
                "Email Address",
                "Customer Email",
                "Main Email",
                "Contact Email",
                "Primary Email",
                "mail",
            ],
        ),
        ("first_name", &["First", "Given Name", "Billing First Name", "fname"]),
        ("last_name", &["Last", "Surname", "Family Name", "Billing Last Name", "lname"]),
        (
            "full_name",
            &["Name", "Customer", "Customer Name", "Contact", "Contact Name", "Display Name"],
        ),
        ("company", &["Company Name", "Business", "Business Name", "Organization", "Account"]),
        ("phone", &["Phone Number", "Main Phone", "Telephone", "Tel", "Mobile", "Default Address Phone"]),
        ("address1", &["Address", "Address 1", "Street", "Street Address", "Bill to 1", "Default Address Address1"]),
        ("address2", &["Address 2", "Suite", "Bill to 2", "Default Address Address2"]),
        ("city", &["Town", "Billing Address City", "Default Address City"]),
        (
            "state",
            &["Province", "Province Code", "Region", "State/Province", "Billing Address State", "Default Address Province Code"],
        ),
        (
            "postal_code",
            &["Zip", "Zip Code", "Postcode", "Postal", "Billing Address Postal Code", "Default Address Zip"],
        ),
        ("country", &["Country Code", "Billing Address Country", "Default Address Country Code"]),
        ("business_unit", &["BU", "Channel", "Sales Channel", "Segment", "Customer Type"]),
        (
            "accepts_marketing",
            &["Accepts Email Marketing", "Marketing", "Newsletter", "Opt In", "Subscribed"],
        ),
        ("ecommerce_customer_id", &["Customer ID", "Shopify ID", "Shopify Customer ID"]),
        ("accounting_customer_id", &["QuickBooks ID", "QB ID", "Accounting ID", "List ID"]),
        ("notes", &["Note", "Memo", "Comments"]),
        ("created_at", &["Created", "Created Date", "Customer Since", "Date Added", "Signup Date"]),
    ])
});

static ORDER_ALIASES: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    build_aliases(&[
        (
            "order_number",
            &["Name", "Order", "Order #", "Order No", "Order Number", "Num", "Invoice", "Invoice #", "Invoice Number", "PO Number"],
        ),
        ("external_id", &["Id", "Order ID", "Transaction ID", "Txn ID", "Invoice ID"]),
        (
            "order_date",
            &["Date", "Created at", "Created", "Order Date", "Invoice Date", "Txn Date", "Processed At", "Paid at"],
        ),
        ("status", &["Financial Status", "Order Status", "Payment Status", "State"]),
        ("currency", &["Currency Code"]),
        ("email", &["E-mail", "Customer Email", "Email Address", "Contact Email"]),
        (
            "customer_name",
            &["Customer", "Customer Name", "Billing Name", "Bill To", "Ship To Name", "Sold To"],
        ),
        ("company", &["Billing Company", "Company Name"]),
        ("phone", &["Billing Phone", "Phone Number"]),
        ("subtotal", &["Sub Total", "Merchandise Total"]),
        ("tax", &["Taxes", "Tax Amount", "Sales Tax"]),
        ("shipping", &["Shipping Amount", "Freight", "Delivery"]),
        ("total", &["Order Total", "Total Amount", "Invoice Total", "Grand Total"]),
        ("business_unit", &["BU", "Channel", "Sales Channel", "Segment"]),
        ("notes", &["Note", "Memo", "Comments"]),
        ("sku", &["Lineitem sku", "Item", "Item Code", "Product Code", "Product SKU"]),
        ("description", &["Lineitem name", "Item Description", "Product", "Product Name", "Memo/Description"]),
        ("quantity", &["Lineitem quantity", "Qty", "Quantity Ordered", "Units"]),
        ("unit", &["U/M", "UOM", "Unit of Measure", "Units Of Measure"]),
        ("unit_price", &["Lineitem price", "Price", "Sales Price", "Rate", "Unit Cost"]),
        ("line_total", &["Amount", "Line Amount", "Extended Price", "Line Total"]),
        ("ecommerce_customer_id", &["Shopify Customer ID"]),
        ("accounting_customer_id", &["QuickBooks Customer ID", "Customer ID"]),
    ])
});

pub fn canonical_customer_field(header: &str) -> Option<&'static str> {
    CUSTOMER_ALIASES.get(&normalize_header(header)).copied()
}

pub fn canonical_order_field(header: &str) -> Option<&'static str> {
    ORDER_ALIASES.get(&normalize_header(header)).copied()
}

/// Which alias table a header row should be resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Customer,
    Order,
}

/// Column position to canonical field mapping for one export
#[derive(Debug, Clone)]
pub struct ColumnMap {
    fields: Vec<Option<&'static str>>,
    unknown: Vec<String>,
}

impl ColumnMap {
    pub fn resolve<'a, I>(headers: I, kind: RecordKind) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = Vec::new();
        let mut unknown = Vec::new();
        for header in headers {
            let field = match kind {
                RecordKind::Customer => canonical_customer_field(header),
                RecordKind::Order => canonical_order_field(header),
            };
            if field.is_none() && !header.trim().is_empty() {
                unknown.push(header.trim().to_string());
            }
            fields.push(field);
        }
        Self { fields, unknown }
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| *f == Some(field))
    }

    /// Headers that matched no alias; they are ignored
    pub fn unknown_headers(&self) -> &[String] {
        &self.unknown
    }

    /// Builds the field map for one row of values, positionally aligned with the headers
    pub fn row<'a, I>(&self, values: I) -> FieldMap
    where
        I: IntoIterator<Item = &'a str>,
    {
        FieldMap::from_pairs(self.fields.iter().copied().zip(values))
    }
}

/// Canonical field name to trimmed, non-empty value for one row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    values: HashMap<&'static str, String>,
}

impl FieldMap {
    /// The first non-empty value wins when several columns alias the same field
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Option<&'static str>, &'a str)>,
    {
        let mut values = HashMap::new();
        for (field, raw) in pairs {
            let Some(field) = field else { continue };
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            values.entry(field).or_insert_with(|| value.to_string());
        }
        Self { values }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn string(&self, field: &str) -> Option<String> {
        self.get(field).map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn money(&self, field: &str) -> Result<Option<Decimal>, String> {
        self.get(field)
            .map(|v| parse_money(v).ok_or_else(|| format!("invalid amount in {}: '{}'", field, v)))
            .transpose()
    }

    pub fn date(&self, field: &str) -> Result<Option<DateTime<Utc>>, String> {
        self.get(field)
            .map(|v| parse_date(v).ok_or_else(|| format!("invalid date in {}: '{}'", field, v)))
            .transpose()
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(parse_bool)
    }

    pub fn business_unit(&self, field: &str) -> Option<BusinessUnit> {
        self.get(field).and_then(parse_business_unit)
    }
}

/// Parses `$1,234.50`, `1234.5`, `(12.00)` and `-$3` style amounts
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '€' | '£'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let cleaned = cleaned.strip_prefix("USD").unwrap_or(&cleaned);
    let value = Decimal::from_str(cleaned).ok()?;
    Some(if negative { -value } else { value })
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS ±zzzz`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and `MM/DD/YYYY`.
/// Dates without a time are taken as midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "t" | "1" | "subscribed" | "opted in" | "on" => Some(true),
        "no" | "n" | "false" | "f" | "0" | "unsubscribed" | "not subscribed" | "opted out"
        | "off" => Some(false),
        _ => None,
    }
}

/// Business unit names plus the synonyms found in older exports
pub fn parse_business_unit(raw: &str) -> Option<BusinessUnit> {
    match normalize_header(raw).as_str() {
        "retail" | "web" | "shop" | "online" | "ecommerce" | "consumer" | "website" => {
            Some(BusinessUnit::Retail)
        }
        "pallet" | "pallets" | "bulk" | "commercial" | "contractor" => Some(BusinessUnit::Pallet),
        "distributor" | "distribution" | "wholesale" | "dealer" | "reseller" => {
            Some(BusinessUnit::Distributor)
        }
        "digital" | "download" | "downloads" | "digital goods" => Some(BusinessUnit::Digital),
        _ => None,
    }
}

/// Maps the status vocabularies of the source systems onto order statuses
pub fn parse_order_status(raw: &str) -> Option<OrderStatus> {
    match normalize_header(raw).as_str() {
        "pending" | "authorized" | "open" | "unpaid" | "partially paid" | "draft" => {
            Some(OrderStatus::Pending)
        }
        "paid" | "settled" | "captured" => Some(OrderStatus::Paid),
        "fulfilled" | "shipped" | "delivered" | "closed" | "complete" | "completed" => {
            Some(OrderStatus::Fulfilled)
        }
        "cancelled" | "canceled" | "void" | "voided" => Some(OrderStatus::Cancelled),
        "refunded" | "partially refunded" => Some(OrderStatus::Refunded),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("Email")]
    #[case("E-mail")]
    #[case("Email Address")]
    #[case("Customer Email")]
    #[case("  EMAIL_ADDRESS ")]
    #[case("\u{feff}Email")]
    fn email_header_variants_resolve(#[case] header: &str) {
        assert_eq!(canonical_customer_field(header), Some("email"));
    }

    #[test]
    fn name_means_order_number_in_order_exports() {
        assert_eq!(canonical_customer_field("Name"), Some("full_name"));
        assert_eq!(canonical_order_field("Name"), Some("order_number"));
        assert_eq!(canonical_order_field("Lineitem quantity"), Some("quantity"));
        assert_eq!(canonical_order_field("U/M"), Some("unit"));
    }

    #[test]
    fn column_map_keeps_first_non_empty_alias() {
        let map = ColumnMap::resolve(
            ["Email", "Customer Email", "Favourite Colour"],
            RecordKind::Customer,
        );
        assert_eq!(map.unknown_headers(), &["Favourite Colour".to_string()]);
        let row = map.row(["", "b@example.com", "blue"]);
        assert_eq!(row.get("email"), Some("b@example.com"));
        let row = map.row(["a@example.com", "b@example.com", "blue"]);
        assert_eq!(row.get("email"), Some("a@example.com"));
    }

    #[rstest]
    #[case("$1,234.50", dec!(1234.50))]
    #[case("1234.5", dec!(1234.5))]
    #[case("(12.00)", dec!(-12.00))]
    #[case("-$3", dec!(-3))]
    #[case(" 0 ", dec!(0))]
    fn money_parses(#[case] raw: &str, #[case] expected: Decimal) {
        assert_eq!(parse_money(raw), Some(expected));
    }

    #[test]
    fn money_rejects_garbage() {
        assert_eq!(parse_money("n/a"), None);
        assert_eq!(parse_money(""), None);
    }

    #[rstest]
    #[case("2024-03-05T10:00:00Z")]
    #[case("2024-03-05 10:00:00 +0000")]
    #[case("2024-03-05")]
    #[case("03/05/2024")]
    fn dates_parse(#[case] raw: &str) {
        let dt = parse_date(raw).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 3, 5));
    }

    #[test]
    fn offsets_are_converted_to_utc() {
        let dt = parse_date("2024-03-05 22:30:00 -0500").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-06T03:30:00+00:00");
    }

    #[test]
    fn business_unit_synonyms() {
        assert_eq!(parse_business_unit("Wholesale"), Some(BusinessUnit::Distributor));
        assert_eq!(parse_business_unit("BULK"), Some(BusinessUnit::Pallet));
        assert_eq!(parse_business_unit("web"), Some(BusinessUnit::Retail));
        assert_eq!(parse_business_unit("shop"), Some(BusinessUnit::Retail));
        assert_eq!(parse_business_unit("digital"), Some(BusinessUnit::Digital));
        assert_eq!(parse_business_unit("galactic"), None);
    }

    #[test]
    fn booleans_and_statuses() {
        assert_eq!(parse_bool("Subscribed"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_order_status("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(parse_order_status("partially_refunded"), Some(OrderStatus::Refunded));
    }
}
