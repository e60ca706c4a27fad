//! HTTP push gateway notifier

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{DeliveryErrorKind, Notification, Notifier, TokenDelivery};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushGatewayConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Push delivery over an HTTP gateway, one POST per token
#[derive(Clone)]
pub struct PushGatewayNotifier {
    client: Client,
    url: Url,
    api_key: Option<String>,
}

impl PushGatewayNotifier {
    pub fn new(config: &PushGatewayConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("Invalid push gateway URL")?;
        if url.scheme() != "https" {
            warn!("Push gateway is not using HTTPS: {}", url);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("hearth-functions/0.1")
            .build()
            .context("Failed to create push gateway HTTP client")?;

        info!(gateway = %url, "Push gateway notifier configured");
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
        })
    }

    /// Map a gateway response status to a delivery outcome.
    pub fn classify_status(status: StatusCode) -> Option<DeliveryErrorKind> {
        if status.is_success() {
            None
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Some(DeliveryErrorKind::Unregistered)
        } else if status == StatusCode::BAD_REQUEST {
            Some(DeliveryErrorKind::InvalidToken)
        } else {
            Some(DeliveryErrorKind::Transient)
        }
    }

    async fn send_one(&self, token: &str, notification: &Notification) -> TokenDelivery {
        let mut data = notification.data.clone();
        data.insert("type".into(), json!(notification.kind));

        let payload = json!({
            "token": token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": data,
        });

        let mut request = self.client.post(self.url.clone()).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => match Self::classify_status(response.status()) {
                None => TokenDelivery::delivered(token),
                Some(kind) => {
                    debug!(status = %response.status(), kind = ?kind, "Push delivery rejected");
                    TokenDelivery::failed(token, kind)
                }
            },
            Err(e) => {
                warn!(error = %e, "Push gateway request failed");
                TokenDelivery::failed(token, DeliveryErrorKind::Transient)
            }
        }
    }
}

#[async_trait]
impl Notifier for PushGatewayNotifier {
    async fn send(&self, tokens: &[String], notification: &Notification) -> Vec<TokenDelivery> {
        let mut results = Vec::with_capacity(tokens.len());
        for token in tokens {
            results.push(self.send_one(token, notification).await);
        }
        results
    }
}
