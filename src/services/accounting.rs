//! Accounting system webhook: signed invoice deliveries become accounting orders.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{webhook_event, CustomerSource, OrderSource, OrderStatus},
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{line_items::LineInput, orders::ExternalOrder, orders::OrderService},
    unify::{
        schema_drift::{parse_date, parse_order_status},
        CustomerCandidate,
    },
};

type HmacSha256 = Hmac<Sha256>;

pub const PROVIDER: &str = "accounting";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`
pub fn sign_payload(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks the signature and that the timestamp (unix seconds) is within `tolerance_secs` of `now`
pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(ServiceError::Unauthorized("missing webhook signature".into()));
    };
    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| ServiceError::Unauthorized("malformed webhook timestamp".into()))?;
    if now.abs_diff(sent_at) > tolerance_secs {
        return Err(ServiceError::Unauthorized("webhook timestamp outside tolerance".into()));
    }

    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let provided = hex::decode(signature)
        .map_err(|_| ServiceError::Unauthorized("malformed webhook signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(timestamp.trim().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| ServiceError::Unauthorized("invalid webhook signature".into()))
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {}", other))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDelivery {
    #[serde(deserialize_with = "id_string")]
    pub event_id: String,
    pub event_type: String,
    pub invoice: Option<Invoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub number: Option<String>,
    pub status: Option<String>,
    pub customer: InvoiceCustomer,
    pub txn_date: Option<String>,
    pub currency: Option<String>,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    pub total: Option<Decimal>,
    pub memo: Option<String>,
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceCustomer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    pub sku: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Option<Decimal>,
    pub amount: Option<Decimal>,
}

impl Invoice {
    pub fn into_external(self) -> Result<ExternalOrder, ServiceError> {
        let mut candidate = CustomerCandidate::new(CustomerSource::Accounting, self.customer.email);
        if let Some(name) = self.customer.name {
            candidate = candidate.with_full_name(name);
        }
        candidate.company = self.customer.company;
        candidate.phone = self.customer.phone;
        candidate.accounting_customer_id = self.customer.id;

        let order_date = match self.txn_date.as_deref() {
            Some(raw) => Some(parse_date(raw).ok_or_else(|| {
                ServiceError::ValidationError(format!("invalid txn_date '{}'", raw))
            })?),
            None => None,
        };

        let mut external = ExternalOrder::new(OrderSource::Accounting, self.id.clone(), candidate);
        external.order_number = self.number.unwrap_or(self.id);
        external.order_date = order_date;
        external.status = self
            .status
            .as_deref()
            .and_then(parse_order_status)
            .unwrap_or(OrderStatus::Pending);
        if let Some(currency) = self.currency {
            external.currency = currency;
        }
        external.subtotal = self.subtotal;
        external.tax = self.tax.unwrap_or_default();
        external.shipping = self.shipping.unwrap_or_default();
        external.total = self.total;
        external.notes = self.memo;
        external.lines = self
            .lines
            .into_iter()
            .map(|line| LineInput {
                sku: line.sku,
                description: line.description,
                quantity: line.quantity,
                unit: line.unit,
                unit_price: line.unit_price,
                total: line.amount,
            })
            .collect();
        Ok(external)
    }
}

/// What a delivery led to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Processed { order_id: Uuid },
    Cancelled { order_id: Option<Uuid> },
    Duplicate,
    Ignored { event_type: String },
}

#[derive(Clone)]
pub struct AccountingService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    secret: Option<String>,
    tolerance_secs: u64,
    bags_per_pallet: u32,
}

impl AccountingService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        secret: Option<String>,
        tolerance_secs: u64,
        bags_per_pallet: u32,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs,
            bags_per_pallet,
        }
    }

    /// Verifies, de-duplicates and applies one delivery. The event id is recorded in the
    /// same transaction as its effects, so a failed delivery can be retried.
    #[instrument(skip(self, timestamp, signature, body), fields(bytes = body.len()))]
    pub async fn handle_delivery(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<DeliveryOutcome, ServiceError> {
        if let Some(secret) = &self.secret {
            if let Err(e) = verify_signature(
                secret,
                timestamp,
                signature,
                body,
                self.tolerance_secs,
                Utc::now().timestamp(),
            ) {
                warn!(error = %e, "accounting webhook rejected");
                metrics::counter!("crm.webhooks.deliveries", 1, "provider" => PROVIDER, "result" => "rejected");
                return Err(e);
            }
        }

        let delivery: WebhookDelivery = serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

        let txn = self.db_pool.begin().await?;
        let seen = webhook_event::Entity::find()
            .filter(webhook_event::Column::Provider.eq(PROVIDER))
            .filter(webhook_event::Column::EventId.eq(delivery.event_id.as_str()))
            .count(&txn)
            .await?;
        if seen > 0 {
            info!(event_id = %delivery.event_id, "replayed webhook acknowledged");
            metrics::counter!("crm.webhooks.deliveries", 1, "provider" => PROVIDER, "result" => "duplicate");
            return Ok(DeliveryOutcome::Duplicate);
        }

        let recorded = webhook_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider: Set(PROVIDER.to_string()),
            event_id: Set(delivery.event_id.clone()),
            event_type: Set(delivery.event_type.clone()),
            received_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await;
        match recorded {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(DeliveryOutcome::Duplicate),
            Err(e) => return Err(e.into()),
        }

        let outcome = match delivery.event_type.as_str() {
            "invoice.created" | "invoice.updated" => {
                let invoice = delivery.invoice.ok_or_else(|| {
                    ServiceError::BadRequest("invoice event without an invoice".into())
                })?;
                let external = invoice.into_external()?;
                let (order, _) =
                    OrderService::upsert_external(&txn, external, self.bags_per_pallet).await?;
                DeliveryOutcome::Processed { order_id: order.id }
            }
            "invoice.voided" | "invoice.deleted" => {
                let invoice = delivery.invoice.ok_or_else(|| {
                    ServiceError::BadRequest("invoice event without an invoice".into())
                })?;
                let cancelled =
                    OrderService::cancel_external(&txn, OrderSource::Accounting, &invoice.id).await?;
                DeliveryOutcome::Cancelled {
                    order_id: cancelled.map(|o| o.id),
                }
            }
            other => DeliveryOutcome::Ignored {
                event_type: other.to_string(),
            },
        };
        txn.commit().await?;

        info!(event_id = %delivery.event_id, event_type = %delivery.event_type, outcome = ?outcome, "accounting webhook processed");
        metrics::counter!("crm.webhooks.deliveries", 1, "provider" => PROVIDER, "result" => "processed");
        match &outcome {
            DeliveryOutcome::Processed { order_id } => {
                self.event_sender
                    .send_or_log(Event::OrderIngested {
                        order_id: *order_id,
                        source: OrderSource::Accounting,
                    })
                    .await
            }
            DeliveryOutcome::Cancelled {
                order_id: Some(order_id),
            } => {
                self.event_sender
                    .send_or_log(Event::OrderChanged(*order_id))
                    .await
            }
            _ => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_test";

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"event_id":"1"}"#;
        let sig = sign_payload(SECRET, "1700000000", body);
        assert!(verify_signature(SECRET, Some("1700000000"), Some(&sig), body, 300, 1700000100).is_ok());
        let prefixed = format!("sha256={}", sig);
        assert!(verify_signature(SECRET, Some("1700000000"), Some(&prefixed), body, 300, 1700000000).is_ok());
    }

    #[test]
    fn tampered_stale_or_missing_signatures_fail() {
        let body = br#"{"event_id":"1"}"#;
        let sig = sign_payload(SECRET, "1700000000", body);
        let tampered = br#"{"event_id":"2"}"#;
        let cases = [
            verify_signature(SECRET, Some("1700000000"), Some(&sig), tampered, 300, 1700000000),
            verify_signature(SECRET, Some("1700000000"), Some(&sig), body, 300, 1700000301),
            verify_signature(SECRET, None, Some(&sig), body, 300, 1700000000),
            verify_signature(SECRET, Some("1700000000"), Some("zz"), body, 300, 1700000000),
            verify_signature("other", Some("1700000000"), Some(&sig), body, 300, 1700000000),
            verify_signature(SECRET, Some("-9223372036854775808"), Some(&sig), body, 300, 1700000000),
        ];
        for result in cases {
            assert_matches!(result, Err(ServiceError::Unauthorized(_)));
        }
    }

    #[test]
    fn invoice_maps_to_accounting_order() {
        let delivery: WebhookDelivery = serde_json::from_value(serde_json::json!({
            "event_id": 77,
            "event_type": "invoice.created",
            "invoice": {
                "id": 1042,
                "number": "INV-1042",
                "customer": {"id": "QB-7", "name": "Grace Hopper", "email": "grace@navy.example", "company": "Navy"},
                "txn_date": "2024-02-01",
                "total": "1000.00",
                "lines": [{"sku": "TS-40", "description": "Topsoil", "quantity": 2, "unit": "pallet", "unit_price": "500"}]
            }
        }))
        .unwrap();
        assert_eq!(delivery.event_id, "77");

        let external = delivery.invoice.unwrap().into_external().unwrap();
        assert_eq!(external.source, OrderSource::Accounting);
        assert_eq!(external.external_id, "1042");
        assert_eq!(external.order_number, "INV-1042");
        assert_eq!(external.total, Some(dec!(1000.00)));
        assert_eq!(external.customer.accounting_customer_id.as_deref(), Some("QB-7"));
        assert_eq!(external.customer.resolved_names().1.as_deref(), Some("Hopper"));
        assert_eq!(external.lines[0].unit.as_deref(), Some("pallet"));
    }
}
