//! Client for the e-commerce platform's admin REST API (draft orders and orders).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::AppConfig;
use crate::entities::{CustomerSource, OrderSource, OrderStatus};
use crate::errors::ServiceError;
use crate::services::line_items::LineInput;
use crate::services::orders::ExternalOrder;
use crate::unify::{schema_drift::parse_order_status, CustomerCandidate};

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Platform ids are numbers in some payloads and strings in others
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("unexpected id {}", other))),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("unexpected id {}", other))),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DraftLineItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub quantity: u32,
    /// Unit price as a decimal string
    pub price: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DraftOrderRequest {
    pub line_items: Vec<DraftLineItem>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub tags: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DraftOrder {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformCustomer {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub accepts_marketing: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformLineItem {
    pub sku: Option<String>,
    pub title: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopMoney {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoneySet {
    pub shop_money: ShopMoney,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformOrder {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub currency: String,
    pub financial_status: Option<String>,
    pub subtotal_price: Option<Decimal>,
    pub total_tax: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub total_shipping_price_set: Option<MoneySet>,
    pub note: Option<String>,
    pub customer: Option<PlatformCustomer>,
    #[serde(default)]
    pub line_items: Vec<PlatformLineItem>,
}

impl PlatformOrder {
    /// Maps the platform order onto the ingest shape. `None` when it carries no email at all.
    pub fn into_external(self) -> Option<ExternalOrder> {
        let email = self
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| self.customer.as_ref().and_then(|c| c.email.clone()))?;

        let mut candidate = CustomerCandidate::new(CustomerSource::Ecommerce, email);
        if let Some(customer) = self.customer {
            candidate.first_name = customer.first_name;
            candidate.last_name = customer.last_name;
            candidate.phone = customer.phone;
            candidate.ecommerce_customer_id = customer.id;
            candidate.accepts_marketing = customer.accepts_marketing;
        }

        let mut external = ExternalOrder::new(OrderSource::Ecommerce, self.id, candidate);
        external.order_number = self.name;
        external.order_date = Some(self.created_at);
        external.status = self
            .financial_status
            .as_deref()
            .and_then(parse_order_status)
            .unwrap_or(OrderStatus::Pending);
        external.currency = self.currency;
        external.subtotal = self.subtotal_price;
        external.tax = self.total_tax.unwrap_or_default();
        external.shipping = self
            .total_shipping_price_set
            .map(|s| s.shop_money.amount)
            .unwrap_or_default();
        external.total = self.total_price;
        external.notes = self.note;
        external.lines = self
            .line_items
            .into_iter()
            .map(|line| LineInput {
                sku: line.sku,
                description: line.title,
                quantity: line.quantity,
                unit: None,
                unit_price: Some(line.price),
                total: None,
            })
            .collect();
        Some(external)
    }
}

#[derive(Deserialize)]
struct DraftOrderEnvelope {
    draft_order: DraftOrder,
}

#[derive(Deserialize)]
struct OrderEnvelope {
    order: PlatformOrder,
}

#[derive(Serialize)]
struct DraftOrderCreateEnvelope<'a> {
    draft_order: &'a DraftOrderRequest,
}

#[async_trait]
pub trait CommercePlatform: Send + Sync {
    async fn create_draft_order(&self, draft: &DraftOrderRequest) -> Result<DraftOrder, ServiceError>;
    async fn complete_draft_order(&self, draft_id: &str) -> Result<DraftOrder, ServiceError>;
    async fn fetch_order(&self, order_id: &str) -> Result<PlatformOrder, ServiceError>;
}

/// Admin REST API client authenticated with an access token
pub struct RestCommercePlatform {
    client: reqwest::Client,
    base_url: Url,
    api_version: String,
    access_token: String,
}

impl RestCommercePlatform {
    pub fn new(base_url: &str, access_token: &str, api_version: &str) -> Result<Self, ServiceError> {
        // `Url::join` replaces the last segment unless the base ends in a slash
        let base_url = match base_url.trim() {
            trimmed if trimmed.ends_with('/') => trimmed.to_string(),
            trimmed => format!("{}/", trimmed),
        };
        let base_url = Url::parse(&base_url).map_err(|e| {
            ServiceError::InternalError(format!("invalid commerce_api_base_url: {}", e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_version: api_version.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(&format!("admin/api/{}/{}", self.api_version, path))
            .map_err(|e| ServiceError::InternalError(format!("bad platform url: {}", e)))
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, ServiceError> {
        let response = request
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, what, "e-commerce platform unreachable");
                ServiceError::ExternalServiceError(format!("{} failed: {}", what, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, what, body = %body, "e-commerce platform rejected request");
            return Err(ServiceError::ExternalServiceError(format!(
                "{} failed with status {}",
                what, status
            )));
        }
        response.json::<T>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("{} returned an unexpected body: {}", what, e))
        })
    }
}

#[async_trait]
impl CommercePlatform for RestCommercePlatform {
    #[instrument(skip(self, draft), fields(lines = draft.line_items.len()))]
    async fn create_draft_order(&self, draft: &DraftOrderRequest) -> Result<DraftOrder, ServiceError> {
        let url = self.endpoint("draft_orders.json")?;
        let envelope: DraftOrderEnvelope = self
            .send(
                self.client
                    .post(url)
                    .json(&DraftOrderCreateEnvelope { draft_order: draft }),
                "draft order create",
            )
            .await?;
        info!(draft_id = %envelope.draft_order.id, "draft order created");
        Ok(envelope.draft_order)
    }

    #[instrument(skip(self))]
    async fn complete_draft_order(&self, draft_id: &str) -> Result<DraftOrder, ServiceError> {
        let url = self.endpoint(&format!("draft_orders/{}/complete.json", draft_id))?;
        let envelope: DraftOrderEnvelope = self
            .send(self.client.put(url), "draft order complete")
            .await?;
        Ok(envelope.draft_order)
    }

    #[instrument(skip(self))]
    async fn fetch_order(&self, order_id: &str) -> Result<PlatformOrder, ServiceError> {
        let url = self.endpoint(&format!("orders/{}.json", order_id))?;
        let envelope: OrderEnvelope = self.send(self.client.get(url), "order fetch").await?;
        Ok(envelope.order)
    }
}

/// Used when no platform credentials are configured
pub struct UnconfiguredCommercePlatform;

impl UnconfiguredCommercePlatform {
    fn unavailable() -> ServiceError {
        ServiceError::ServiceUnavailable("e-commerce platform is not configured".into())
    }
}

#[async_trait]
impl CommercePlatform for UnconfiguredCommercePlatform {
    async fn create_draft_order(&self, _draft: &DraftOrderRequest) -> Result<DraftOrder, ServiceError> {
        Err(Self::unavailable())
    }

    async fn complete_draft_order(&self, _draft_id: &str) -> Result<DraftOrder, ServiceError> {
        Err(Self::unavailable())
    }

    async fn fetch_order(&self, _order_id: &str) -> Result<PlatformOrder, ServiceError> {
        Err(Self::unavailable())
    }
}

/// The REST client when credentials are configured, otherwise the unconfigured stand-in
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn CommercePlatform>, ServiceError> {
    match config.commerce_credentials() {
        Some((base_url, token)) => Ok(Arc::new(RestCommercePlatform::new(
            base_url,
            token,
            &config.commerce_api_version,
        )?)),
        None => {
            info!("e-commerce platform not configured; quote conversion disabled");
            Ok(Arc::new(UnconfiguredCommercePlatform))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn base_url_path_is_kept_with_or_without_a_trailing_slash() {
        for base in ["https://shop.example.com/store", "https://shop.example.com/store/"] {
            let platform = RestCommercePlatform::new(base, "token", "2024-01").unwrap();
            assert_eq!(
                platform.endpoint("orders/1.json").unwrap().as_str(),
                "https://shop.example.com/store/admin/api/2024-01/orders/1.json"
            );
        }
        let bare = RestCommercePlatform::new("https://shop.example.com", "token", "2024-01").unwrap();
        assert_eq!(
            bare.endpoint("draft_orders.json").unwrap().as_str(),
            "https://shop.example.com/admin/api/2024-01/draft_orders.json"
        );
        assert!(RestCommercePlatform::new("not a url", "token", "2024-01").is_err());
    }

    #[test]
    fn draft_order_ids_accept_numbers_and_strings() {
        let numeric: DraftOrder =
            serde_json::from_str(r#"{"id": 994118539, "order_id": null, "status": "open"}"#).unwrap();
        assert_eq!(numeric.id, "994118539");
        assert_eq!(numeric.order_id, None);
        let completed: DraftOrder =
            serde_json::from_str(r#"{"id": "d-1", "order_id": 450789469, "status": "completed"}"#)
                .unwrap();
        assert_eq!(completed.order_id.as_deref(), Some("450789469"));
    }

    #[test]
    fn platform_order_maps_to_an_ecommerce_order() {
        let order: PlatformOrder = serde_json::from_value(serde_json::json!({
            "id": 450789469,
            "name": "#1001",
            "email": "Ada@Example.com",
            "created_at": "2024-03-05T10:00:00-05:00",
            "currency": "USD",
            "financial_status": "paid",
            "subtotal_price": "1000.00",
            "total_tax": "80.00",
            "total_price": "1105.00",
            "total_shipping_price_set": {"shop_money": {"amount": "25.00"}},
            "customer": {"id": 207119551, "first_name": "Ada", "last_name": "Lovelace"},
            "line_items": [{"sku": "TS-40-PAL", "title": "Topsoil pallet", "quantity": 2, "price": "500.00"}]
        }))
        .unwrap();

        let external = order.into_external().unwrap();
        assert_eq!(external.source, OrderSource::Ecommerce);
        assert_eq!(external.external_id, "450789469");
        assert_eq!(external.order_number, "#1001");
        assert_eq!(external.status, OrderStatus::Paid);
        assert_eq!(external.shipping, dec!(25.00));
        assert_eq!(external.customer.ecommerce_customer_id.as_deref(), Some("207119551"));
        assert_eq!(external.lines.len(), 1);
        assert_eq!(external.lines[0].unit_price, Some(dec!(500.00)));
    }

    #[tokio::test]
    async fn unconfigured_platform_is_unavailable() {
        let platform = UnconfiguredCommercePlatform;
        let err = platform.fetch_order("1").await.unwrap_err();
        assert_matches!(err, ServiceError::ServiceUnavailable(_));
    }
}
