//! Enumerations stored as strings in the database and exchanged as lowercase JSON.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The sales channel a customer, order or quote belongs to.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BusinessUnit {
    #[sea_orm(string_value = "retail")]
    Retail,
    #[sea_orm(string_value = "pallet")]
    Pallet,
    #[sea_orm(string_value = "distributor")]
    Distributor,
    #[sea_orm(string_value = "digital")]
    Digital,
}

impl BusinessUnit {
    /// Precedence used when two records disagree: retail < digital < pallet < distributor
    pub fn rank(self) -> u8 {
        match self {
            BusinessUnit::Retail => 0,
            BusinessUnit::Digital => 1,
            BusinessUnit::Pallet => 2,
            BusinessUnit::Distributor => 3,
        }
    }

    /// Picks the higher-ranked of two optional units
    pub fn max_ranked(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(x), Some(y)) => Some(if y.rank() > x.rank() { y } else { x }),
            (x, None) => x,
            (None, y) => y,
        }
    }
}

/// System an order was ingested from.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderSource {
    #[sea_orm(string_value = "ecommerce")]
    Ecommerce,
    #[sea_orm(string_value = "accounting")]
    Accounting,
    #[sea_orm(string_value = "distributor")]
    Distributor,
    #[sea_orm(string_value = "digital")]
    Digital,
    #[sea_orm(string_value = "manual")]
    Manual,
}

impl OrderSource {
    pub fn default_business_unit(self) -> BusinessUnit {
        match self {
            OrderSource::Ecommerce | OrderSource::Manual => BusinessUnit::Retail,
            OrderSource::Accounting => BusinessUnit::Pallet,
            OrderSource::Distributor => BusinessUnit::Distributor,
            OrderSource::Digital => BusinessUnit::Digital,
        }
    }

    /// The customer source recorded when an order from this system creates or touches a customer
    pub fn customer_source(self) -> CustomerSource {
        match self {
            OrderSource::Ecommerce => CustomerSource::Ecommerce,
            OrderSource::Accounting => CustomerSource::Accounting,
            OrderSource::Distributor => CustomerSource::Distributor,
            OrderSource::Digital => CustomerSource::Digital,
            OrderSource::Manual => CustomerSource::Manual,
        }
    }
}

/// Where a customer record was seen. Stored as a sorted comma list on the customer row.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CustomerSource {
    Ecommerce,
    Accounting,
    Distributor,
    Digital,
    Website,
    CsvImport,
    Legacy,
    Manual,
}

impl CustomerSource {
    pub fn default_business_unit(self) -> Option<BusinessUnit> {
        match self {
            CustomerSource::Ecommerce | CustomerSource::Website | CustomerSource::Manual => {
                Some(BusinessUnit::Retail)
            }
            CustomerSource::Accounting => Some(BusinessUnit::Pallet),
            CustomerSource::Distributor => Some(BusinessUnit::Distributor),
            CustomerSource::Digital => Some(BusinessUnit::Digital),
            CustomerSource::CsvImport | CustomerSource::Legacy => None,
        }
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "fulfilled")]
    Fulfilled,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    /// Orders that still count toward revenue
    pub fn counts_as_revenue(self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LineUnit {
    #[sea_orm(string_value = "bag")]
    Bag,
    #[sea_orm(string_value = "each")]
    Each,
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InquiryStatus {
    #[sea_orm(string_value = "new")]
    New,
    #[sea_orm(string_value = "contacted")]
    Contacted,
    #[sea_orm(string_value = "qualified")]
    Qualified,
    #[sea_orm(string_value = "closed")]
    Closed,
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QuoteStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "converted")]
    Converted,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl QuoteStatus {
    pub fn is_editable(self) -> bool {
        matches!(self, QuoteStatus::Draft | QuoteStatus::Sent)
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "manager")]
    Manager,
    #[sea_orm(string_value = "sales")]
    Sales,
    #[sea_orm(string_value = "viewer")]
    Viewer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn business_unit_rank_prefers_distributor() {
        assert_eq!(
            BusinessUnit::max_ranked(Some(BusinessUnit::Retail), Some(BusinessUnit::Pallet)),
            Some(BusinessUnit::Pallet)
        );
        assert_eq!(
            BusinessUnit::max_ranked(Some(BusinessUnit::Distributor), Some(BusinessUnit::Digital)),
            Some(BusinessUnit::Distributor)
        );
        assert_eq!(
            BusinessUnit::max_ranked(None, Some(BusinessUnit::Digital)),
            Some(BusinessUnit::Digital)
        );
        assert_eq!(BusinessUnit::max_ranked(None, None), None);
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!(OrderSource::from_str("Accounting").unwrap(), OrderSource::Accounting);
        assert_eq!(CustomerSource::from_str("csv_import").unwrap(), CustomerSource::CsvImport);
        assert_eq!(CustomerSource::CsvImport.to_string(), "csv_import");
        assert!(UserRole::from_str("root").is_err());
    }

    #[test]
    fn per_source_business_unit_defaults() {
        assert_eq!(OrderSource::Ecommerce.default_business_unit(), BusinessUnit::Retail);
        assert_eq!(OrderSource::Accounting.default_business_unit(), BusinessUnit::Pallet);
        assert_eq!(OrderSource::Distributor.default_business_unit(), BusinessUnit::Distributor);
        assert_eq!(OrderSource::Digital.default_business_unit(), BusinessUnit::Digital);
        assert_eq!(OrderSource::Manual.default_business_unit(), BusinessUnit::Retail);
    }
}
