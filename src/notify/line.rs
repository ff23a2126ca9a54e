//! LINE Messaging API push messages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::Notifier;
use crate::credentials::CredentialStore;

const BASE_URL: &str = "https://api.line.me";

pub struct LineNotifier {
    access_token: SecretString,
    user_id: String,
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl LineNotifier {
    pub fn new(access_token: SecretString, user_id: impl Into<String>) -> Self {
        Self {
            access_token,
            user_id: user_id.into(),
            base_url: BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Override API base URL (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `None` when `line_access_token` is not configured.
    ///
    /// A token without `line_user_id` is an error.
    pub async fn from_credentials(store: &dyn CredentialStore) -> Result<Option<Self>> {
        let Some(token) = store.get("line_access_token").await? else {
            return Ok(None);
        };
        let user_id = store
            .get("line_user_id")
            .await?
            .context("LINE_ACCESS_TOKEN is set but LINE_USER_ID is missing")?;
        Ok(Some(Self::new(token, user_id.expose_secret())))
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/v2/bot/message/push", self.base_url.trim_end_matches('/'));
        let body = PushRequest {
            to: &self.user_id,
            messages: [TextMessage { kind: "text", text }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .context("LINE HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE push failed ({status}): {body_text}");
        }

        tracing::info!("Sent LINE message");
        Ok(())
    }
}
