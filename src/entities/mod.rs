pub mod customer;
pub mod enums;
pub mod inquiry;
pub mod order;
pub mod order_line_item;
pub mod push_subscription;
pub mod quote;
pub mod quote_line_item;
pub mod user;
pub mod webhook_event;

pub use enums::{
    BusinessUnit, CustomerSource, InquiryStatus, LineUnit, OrderSource, OrderStatus, QuoteStatus,
    UserRole,
};
