pub mod common;
pub mod customers;
pub mod dashboard;
pub mod health;
pub mod imports;
pub mod inquiries;
pub mod orders;
pub mod push;
pub mod quotes;
pub mod users;
pub mod webhooks;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{EventHandler, EventSender};
use crate::imports::ImportService;
use crate::services::{
    accounting::AccountingService,
    commerce_platform::{self, CommercePlatform},
    customers::CustomerService,
    dashboard::{DashboardInvalidator, DashboardService},
    inquiries::InquiryService,
    orders::OrderService,
    push::{self as push_service, InquiryNotifier, PushGateway, PushService},
    quotes::QuoteService,
    users::UserService,
};
use crate::db::DbPool;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub customers: Arc<CustomerService>,
    pub orders: Arc<OrderService>,
    pub inquiries: Arc<InquiryService>,
    pub quotes: Arc<QuoteService>,
    pub accounting: Arc<AccountingService>,
    pub dashboard: Arc<DashboardService>,
    pub push: Arc<PushService>,
    pub users: Arc<UserService>,
    pub imports: Arc<ImportService>,
}

impl AppServices {
    /// Builds every service from configuration; external systems come from the config
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let platform = commerce_platform::from_config(config)?;
        let gateway = push_service::gateway_from_config(config);
        Ok(Self::with_integrations(
            db_pool,
            event_sender,
            config,
            platform,
            gateway,
        ))
    }

    /// Same as [`AppServices::new`] with the e-commerce platform and push gateway supplied
    pub fn with_integrations(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
        platform: Arc<dyn CommercePlatform>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        let bags = config.bags_per_pallet;
        Self {
            customers: Arc::new(CustomerService::new(db_pool.clone(), event_sender.clone())),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone(), bags)),
            inquiries: Arc::new(InquiryService::new(db_pool.clone(), event_sender.clone())),
            quotes: Arc::new(QuoteService::new(
                db_pool.clone(),
                event_sender.clone(),
                platform,
                bags,
            )),
            accounting: Arc::new(AccountingService::new(
                db_pool.clone(),
                event_sender.clone(),
                config.accounting_webhook_secret.clone(),
                config.webhook_tolerance_secs,
                bags,
            )),
            dashboard: Arc::new(DashboardService::new(
                db_pool.clone(),
                config.dashboard_cache_ttl(),
            )),
            push: Arc::new(PushService::new(db_pool.clone(), gateway)),
            users: Arc::new(UserService::new(db_pool.clone())),
            imports: Arc::new(ImportService::new(db_pool, event_sender, bags)),
        }
    }

    /// Consumers for the event channel: dashboard invalidation and inquiry push notifications
    pub fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![
            Arc::new(DashboardInvalidator::new((*self.dashboard).clone())),
            Arc::new(InquiryNotifier::new((*self.push).clone())),
        ]
    }
}
