use super::enums::{BusinessUnit, CustomerSource};
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// The unified customer table: one row per normalized email.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Trimmed, lowercased email; unique
    #[sea_orm(unique)]
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub business_unit: Option<BusinessUnit>,
    /// Sorted comma list of `CustomerSource` values
    pub sources: String,
    pub ecommerce_customer_id: Option<String>,
    pub accounting_customer_id: Option<String>,
    pub accepts_marketing: bool,
    pub notes: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn source_set(&self) -> BTreeSet<CustomerSource> {
        parse_sources(&self.sources)
    }

    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            self.company.clone()
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Parses a stored source list, ignoring unknown entries
pub fn parse_sources(raw: &str) -> BTreeSet<CustomerSource> {
    raw.split(',')
        .filter_map(|s| CustomerSource::from_str(s.trim()).ok())
        .collect()
}

pub fn format_sources(sources: &BTreeSet<CustomerSource>) -> String {
    sources
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
    #[sea_orm(has_many = "super::inquiry::Entity")]
    Inquiries,
    #[sea_orm(has_many = "super::quote::Entity")]
    Quotes,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::inquiry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Inquiries.def()
    }
}

impl Related<super::quote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Quotes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
