//! Browser push: subscription storage, VAPID delivery and the inquiry notifier.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use futures::{stream, StreamExt};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessage, WebPushMessageBuilder,
};

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::push_subscription,
    errors::ServiceError,
    events::{Event, EventHandler},
};

const P256DH_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const SEND_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Shape of the browser's `PushSubscription.toJSON()`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(url)]
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendPushRequest {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(length(max = 1000))]
    #[serde(default)]
    pub body: String,
    pub url: Option<String>,
    /// Only these users' subscriptions; everyone when absent
    #[serde(default)]
    pub user_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub delivered: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Result of handing one message to a push service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The subscription expired or was revoked and should be forgotten
    Gone,
    Failed(String),
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// VAPID public key handed to browsers; `None` when push is off
    fn public_key(&self) -> Option<&str>;

    async fn deliver(&self, subscription: &push_subscription::Model, payload: &[u8]) -> Delivery;
}

pub struct WebPushGateway {
    client: HyperWebPushClient,
    public_key: String,
    private_key: String,
    subject: Option<String>,
}

impl WebPushGateway {
    pub fn new(public_key: String, private_key: String, subject: Option<String>) -> Self {
        Self {
            client: HyperWebPushClient::new(),
            public_key,
            private_key,
            subject,
        }
    }

    /// Encrypts `payload` for the subscription and signs it with the VAPID key
    pub fn signed_message(
        &self,
        subscription: &push_subscription::Model,
        payload: &[u8],
    ) -> Result<WebPushMessage, String> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.p256dh.trim_end_matches('='),
            subscription.auth.trim_end_matches('='),
        );

        let mut signature = VapidSignatureBuilder::from_base64(
            self.private_key.trim().trim_end_matches('='),
            web_push::URL_SAFE_NO_PAD,
            &info,
        )
        .map_err(|e| format!("vapid key: {}", e))?;
        if let Some(subject) = &self.subject {
            signature.add_claim("sub", subject.as_str());
        }
        let signature = signature
            .build()
            .map_err(|e| format!("vapid signature: {}", e))?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.build().map_err(|e| format!("message: {}", e))
    }
}

#[async_trait]
impl PushGateway for WebPushGateway {
    fn public_key(&self) -> Option<&str> {
        Some(&self.public_key)
    }

    async fn deliver(&self, subscription: &push_subscription::Model, payload: &[u8]) -> Delivery {
        let message = match self.signed_message(subscription, payload) {
            Ok(message) => message,
            Err(reason) => return Delivery::Failed(reason),
        };
        match self.client.send(message).await {
            Ok(()) => Delivery::Delivered,
            Err(WebPushError::EndpointNotValid | WebPushError::EndpointNotFound) => Delivery::Gone,
            Err(e) => Delivery::Failed(e.to_string()),
        }
    }
}

/// Used when no VAPID keys are configured
pub struct DisabledPushGateway;

#[async_trait]
impl PushGateway for DisabledPushGateway {
    fn public_key(&self) -> Option<&str> {
        None
    }

    async fn deliver(&self, _subscription: &push_subscription::Model, _payload: &[u8]) -> Delivery {
        Delivery::Failed("push notifications are not configured".into())
    }
}

pub fn gateway_from_config(config: &AppConfig) -> Arc<dyn PushGateway> {
    match (&config.vapid_public_key, &config.vapid_private_key) {
        (Some(public), Some(private)) if config.push_enabled() => Arc::new(WebPushGateway::new(
            public.clone(),
            private.clone(),
            config.vapid_subject.clone(),
        )),
        _ => {
            info!("VAPID keys not configured; push notifications disabled");
            Arc::new(DisabledPushGateway)
        }
    }
}

/// Decodes a base64url key, tolerating the padding some browsers add
fn decode_key(name: &str, raw: &str, expected_len: usize) -> Result<Vec<u8>, ServiceError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim().trim_end_matches('='))
        .map_err(|_| ServiceError::ValidationError(format!("{} is not base64url", name)))?;
    if bytes.len() != expected_len {
        return Err(ServiceError::ValidationError(format!(
            "{} must be {} bytes, got {}",
            name,
            expected_len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

pub fn validate_keys(keys: &SubscriptionKeys) -> Result<(), ServiceError> {
    let p256dh = decode_key("p256dh", &keys.p256dh, P256DH_LEN)?;
    if p256dh[0] != 0x04 {
        return Err(ServiceError::ValidationError(
            "p256dh must be an uncompressed P-256 point".into(),
        ));
    }
    decode_key("auth", &keys.auth, AUTH_SECRET_LEN)?;
    Ok(())
}

#[derive(Clone)]
pub struct PushService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PushGateway>,
}

impl PushService {
    pub fn new(db_pool: Arc<DbPool>, gateway: Arc<dyn PushGateway>) -> Self {
        Self { db_pool, gateway }
    }

    pub fn public_key(&self) -> Result<String, ServiceError> {
        self.gateway
            .public_key()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::ServiceUnavailable("push notifications are disabled".into()))
    }

    /// Stores the subscription for `user_id`; re-subscribing the same endpoint refreshes it
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        request: SubscribeRequest,
    ) -> Result<push_subscription::Model, ServiceError> {
        request.validate()?;
        validate_keys(&request.keys)?;
        let db = &*self.db_pool;

        let existing = push_subscription::Entity::find()
            .filter(push_subscription::Column::Endpoint.eq(request.endpoint.as_str()))
            .one(db)
            .await?;
        let saved = match existing {
            Some(current) => {
                let mut active = current.into_active_model();
                active.user_id = Set(user_id);
                active.p256dh = Set(request.keys.p256dh);
                active.auth = Set(request.keys.auth);
                active.update(db).await?
            }
            None => {
                push_subscription::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    endpoint: Set(request.endpoint),
                    p256dh: Set(request.keys.p256dh),
                    auth: Set(request.keys.auth),
                    created_at: Set(Utc::now()),
                }
                .insert(db)
                .await?
            }
        };
        debug!(subscription_id = %saved.id, "push subscription stored");
        Ok(saved)
    }

    /// Returns whether a subscription was removed
    #[instrument(skip(self, endpoint), fields(user_id = %user_id))]
    pub async fn unsubscribe(&self, user_id: Uuid, endpoint: &str) -> Result<bool, ServiceError> {
        let result = push_subscription::Entity::delete_many()
            .filter(push_subscription::Column::Endpoint.eq(endpoint))
            .filter(push_subscription::Column::UserId.eq(user_id))
            .exec(&*self.db_pool)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Fans a notification out to every matching subscription. Gone endpoints are deleted.
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn send(&self, request: SendPushRequest) -> Result<PushReport, ServiceError> {
        request.validate()?;
        if self.gateway.public_key().is_none() {
            return Err(ServiceError::ServiceUnavailable(
                "push notifications are disabled".into(),
            ));
        }
        let db = &*self.db_pool;

        let mut query = push_subscription::Entity::find();
        if let Some(user_ids) = &request.user_ids {
            query = query.filter(push_subscription::Column::UserId.is_in(user_ids.clone()));
        }
        let subscriptions = query.all(db).await?;

        let payload = serde_json::to_vec(&serde_json::json!({
            "title": request.title,
            "body": request.body,
            "url": request.url,
        }))
        .map_err(|e| ServiceError::InternalError(format!("push payload: {}", e)))?;

        let gateway = self.gateway.clone();
        let outcomes: Vec<(push_subscription::Model, Delivery)> = stream::iter(subscriptions)
            .map(|subscription| {
                let gateway = gateway.clone();
                let payload = &payload;
                async move {
                    let delivery = gateway.deliver(&subscription, payload).await;
                    (subscription, delivery)
                }
            })
            .buffer_unordered(SEND_CONCURRENCY)
            .collect()
            .await;

        let mut report = PushReport::default();
        for (subscription, delivery) in outcomes {
            match delivery {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Gone => {
                    subscription.delete(db).await?;
                    report.removed += 1;
                }
                Delivery::Failed(reason) => {
                    warn!(endpoint = %subscription.endpoint, %reason, "push delivery failed");
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("crm.push.delivered", report.delivered as u64);
        metrics::counter!("crm.push.failed", report.failed as u64);
        info!(
            delivered = report.delivered,
            removed = report.removed,
            failed = report.failed,
            "push fan-out finished"
        );
        Ok(report)
    }
}

/// Notifies every subscribed user about new inquiries
pub struct InquiryNotifier {
    push: PushService,
}

impl InquiryNotifier {
    pub fn new(push: PushService) -> Self {
        Self { push }
    }
}

#[async_trait]
impl EventHandler for InquiryNotifier {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        let Event::InquiryReceived {
            inquiry_id,
            name,
            email,
            company,
        } = event
        else {
            return Ok(());
        };
        if self.push.gateway.public_key().is_none() {
            return Ok(());
        }

        let from = match company {
            Some(company) => format!("{} ({})", name, company),
            None => format!("{} <{}>", name, email),
        };
        self.push
            .send(SendPushRequest {
                title: "New inquiry".into(),
                body: from,
                url: Some(format!("/inquiries/{}", inquiry_id)),
                user_ids: None,
            })
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(p256dh_len: usize, auth_len: usize) -> SubscriptionKeys {
        let mut point = vec![0x04u8; p256dh_len];
        point[1] = 7;
        SubscriptionKeys {
            p256dh: URL_SAFE_NO_PAD.encode(point),
            auth: URL_SAFE_NO_PAD.encode(vec![1u8; auth_len]),
        }
    }

    #[test]
    fn browser_keys_are_validated() {
        assert!(validate_keys(&keys(65, 16)).is_ok());
        assert!(validate_keys(&keys(64, 16)).is_err());
        assert!(validate_keys(&keys(65, 12)).is_err());

        let mut compressed = keys(65, 16);
        let mut point = vec![0x02u8; 65];
        point[1] = 1;
        compressed.p256dh = URL_SAFE_NO_PAD.encode(point);
        assert!(validate_keys(&compressed).is_err());

        let mut padded = keys(65, 16);
        padded.auth.push_str("==");
        assert!(validate_keys(&padded).is_ok());

        let mut garbage = keys(65, 16);
        garbage.auth = "not base64!".into();
        assert!(validate_keys(&garbage).is_err());
    }

    #[test]
    fn disabled_gateway_has_no_key() {
        assert!(DisabledPushGateway.public_key().is_none());
    }

    const VAPID_PRIVATE: &str = "IQ9Ur0ykXoHS9gzfYX0aBjy9lvdrjx_PFUXmie9YRcY";
    const VAPID_PUBLIC: &str =
        "BMjQIp55pdbU8pfCBKyXcZjlmER_mXt5LqNrN1hrXbdBS5EnhIbMu3Au-RV53iIpztzNXkGI56BFB1udQ8Bq_H4";

    fn browser_subscription(endpoint: &str) -> push_subscription::Model {
        push_subscription::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            p256dh: "BH1HTeKM7-NwaLGHEqxeu2IamQaVVLkcsFHPIHmsCnqxcBHPQBprF41bEMOr3O1hUQ2jU1opNEm1F_lZV_sxMP8".into(),
            auth: "sBXU5_tIYz-5w7G2B25BEw".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn messages_are_encrypted_and_vapid_signed() {
        let gateway = WebPushGateway::new(
            VAPID_PUBLIC.into(),
            VAPID_PRIVATE.into(),
            Some("mailto:ops@example.com".into()),
        );
        let message = gateway
            .signed_message(
                &browser_subscription("https://updates.push.services.mozilla.com/wpush/v2/abc"),
                br#"{"title":"New inquiry"}"#,
            )
            .unwrap();

        assert_eq!(message.endpoint.host(), Some("updates.push.services.mozilla.com"));
        let payload = message.payload.expect("encrypted payload");
        assert!(!payload.content.is_empty());
        assert_eq!(payload.content_encoding, ContentEncoding::Aes128Gcm);
        let (_, authorization) = payload
            .crypto_headers
            .iter()
            .find(|(name, _)| *name == "Authorization")
            .expect("vapid header");
        assert!(authorization.starts_with("vapid t="));
        assert!(authorization.ends_with(&format!("k={}", VAPID_PUBLIC)));
    }

    #[test]
    fn unusable_private_key_fails_without_sending() {
        let gateway = WebPushGateway::new(VAPID_PUBLIC.into(), "not a key".into(), None);
        let err = gateway
            .signed_message(&browser_subscription("https://push.example.com/1"), b"{}")
            .unwrap_err();
        assert!(err.starts_with("vapid key"));
    }
}
