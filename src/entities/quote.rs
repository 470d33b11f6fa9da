use super::enums::{BusinessUnit, QuoteStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quotes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// `Q-YYYYMMDD-XXXX`
    #[sea_orm(unique)]
    pub quote_number: String,
    pub customer_id: Option<Uuid>,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub business_unit: BusinessUnit,
    pub status: QuoteStatus,
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub subtotal: Decimal,
    pub total: Decimal,
    /// Draft order id on the e-commerce platform, set on conversion
    pub external_draft_id: Option<String>,
    /// Local order created by conversion
    pub converted_order_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::quote_line_item::Entity")]
    LineItems,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id",
        on_delete = "SetNull"
    )]
    Customer,
}

impl Related<super::quote_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LineItems.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
