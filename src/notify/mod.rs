//! Notifications
//!
//! [`Notifier`] delivers one notification to a set of device tokens and reports
//! the outcome per token. [`NotificationService`] persists the in-app record,
//! sends the push and prunes tokens the gateway reports as permanently dead.

mod gateway;
mod service;

pub use gateway::{PushGatewayConfig, PushGatewayNotifier};
pub use service::{NOTIFICATIONS, NotificationService, NotifyReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Document,
}

impl Notification {
    pub fn new(kind: &str, title: &str, body: &str) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: Document::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    InvalidToken,
    Unregistered,
    Transient,
}

impl DeliveryErrorKind {
    /// Permanent failures mean the token should be dropped from the user.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryErrorKind::InvalidToken | DeliveryErrorKind::Unregistered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDelivery {
    pub token: String,
    pub success: bool,
    pub error_kind: Option<DeliveryErrorKind>,
}

impl TokenDelivery {
    pub fn delivered(token: &str) -> Self {
        Self {
            token: token.to_string(),
            success: true,
            error_kind: None,
        }
    }

    pub fn failed(token: &str, kind: DeliveryErrorKind) -> Self {
        Self {
            token: token.to_string(),
            success: false,
            error_kind: Some(kind),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// One result per input token, in input order.
    async fn send(&self, tokens: &[String], notification: &Notification) -> Vec<TokenDelivery>;
}

/// Notifier used when no push gateway is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, tokens: &[String], notification: &Notification) -> Vec<TokenDelivery> {
        info!(
            kind = %notification.kind,
            tokens = tokens.len(),
            "Push gateway disabled, notification logged only"
        );
        tokens.iter().map(|t| TokenDelivery::delivered(t)).collect()
    }
}
