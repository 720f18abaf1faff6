//! Discord REST client

use super::{ChannelInfo, ChatApi, MessageHandle, ReportPayload};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
const HISTORY_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

impl ApiMessage {
    fn into_handle(self) -> MessageHandle {
        let created_at = self
            .timestamp
            .or_else(|| snowflake_timestamp(&self.id))
            .unwrap_or_else(Utc::now);
        MessageHandle {
            id: self.id,
            channel_id: self.channel_id,
            created_at,
        }
    }
}

/// Creation time encoded in the upper bits of a snowflake id
pub fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.parse().ok()?;
    let millis = (raw >> 22) as i64 + DISCORD_EPOCH_MS;
    DateTime::from_timestamp_millis(millis)
}

fn embed_body(payload: &ReportPayload) -> serde_json::Value {
    let mut embed = json!({
        "title": payload.title,
        "description": payload.description,
        "color": payload.color,
    });
    if !payload.fields.is_empty() {
        embed["fields"] = json!(payload.fields);
    }
    if let Some(footer) = &payload.footer {
        embed["footer"] = json!({ "text": footer });
    }
    if let Some(at) = payload.timestamp {
        embed["timestamp"] = json!(at.to_rfc3339());
    }
    json!({ "content": "", "embeds": [embed] })
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, token, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("DiscordBot (traffic-warden, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Maps non-success statuses; 404 becomes `MessageNotFound(what)`
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(WardenError::MessageNotFound(what.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(WardenError::Chat {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatApi for DiscordClient {
    async fn login(&self) -> Result<String> {
        let response = self.request(Method::GET, "/users/@me").send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(WardenError::Auth(format!("token rejected ({status})")));
        }
        let user: ApiUser = Self::check(response, "current user").await?.json().await?;
        Ok(user.username)
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        let response = self
            .request(Method::GET, &format!("/channels/{channel_id}"))
            .send()
            .await?;
        let channel: ApiChannel = Self::check(response, channel_id).await?.json().await?;
        Ok(ChannelInfo {
            id: channel.id,
            name: channel.name,
        })
    }

    async fn send_message(&self, channel_id: &str, payload: &ReportPayload) -> Result<MessageHandle> {
        let response = self
            .request(Method::POST, &format!("/channels/{channel_id}/messages"))
            .json(&embed_body(payload))
            .send()
            .await?;
        let message: ApiMessage = Self::check(response, channel_id).await?.json().await?;
        debug!(channel_id, message_id = %message.id, "Message sent");
        Ok(message.into_handle())
    }

    async fn edit_message(&self, handle: &MessageHandle, payload: &ReportPayload) -> Result<MessageHandle> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/channels/{}/messages/{}", handle.channel_id, handle.id),
            )
            .json(&embed_body(payload))
            .send()
            .await?;
        let message: ApiMessage = Self::check(response, &handle.id).await?.json().await?;
        Ok(message.into_handle())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<MessageHandle> {
        let response = self
            .request(Method::GET, &format!("/channels/{channel_id}/messages/{message_id}"))
            .send()
            .await?;
        let message: ApiMessage = Self::check(response, message_id).await?.json().await?;
        Ok(message.into_handle())
    }

    async fn list_recent_messages(&self, channel_id: &str) -> Result<Vec<MessageHandle>> {
        let response = self
            .request(Method::GET, &format!("/channels/{channel_id}/messages"))
            .query(&[("limit", HISTORY_PAGE_SIZE)])
            .send()
            .await?;
        let messages: Vec<ApiMessage> = Self::check(response, channel_id).await?.json().await?;
        Ok(messages.into_iter().map(ApiMessage::into_handle).collect())
    }

    async fn bulk_delete(&self, channel_id: &str, handles: &[MessageHandle]) -> Result<()> {
        let ids: Vec<&str> = handles.iter().map(|h| h.id.as_str()).collect();
        let response = self
            .request(Method::POST, &format!("/channels/{channel_id}/messages/bulk-delete"))
            .json(&json!({ "messages": ids }))
            .send()
            .await?;
        Self::check(response, channel_id).await?;
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<()> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/channels/{}/messages/{}", handle.channel_id, handle.id),
            )
            .send()
            .await?;
        Self::check(response, &handle.id).await?;
        Ok(())
    }
}
