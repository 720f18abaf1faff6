//! Chat platform access
//!
//! - `ChatApi`: the message operations the reconciler relies on
//! - `DiscordClient`: REST implementation over reqwest
//! - `ReportPayload`: one embed-style message body

mod discord;

pub use discord::DiscordClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const COLOR_RED: u32 = 0xE7_4C_3C;
pub const COLOR_AMBER: u32 = 0xF3_9C_12;
pub const COLOR_GREEN: u32 = 0x2E_CC_71;

/// Platform limits on a single embed, counted in characters
pub const FIELD_VALUE_LIMIT: usize = 1024;
pub const EMBED_FIELD_LIMIT: usize = 25;
pub const EMBED_TEXT_LIMIT: usize = 6000;

/// Reference to a message that exists on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Message body sent to or edited on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReportPayload {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color,
            fields: Vec::new(),
            footer: None,
            timestamp: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Characters counted against the embed total
    pub fn text_len(&self) -> usize {
        let fields: usize = self
            .fields
            .iter()
            .map(|f| f.name.chars().count() + f.value.chars().count())
            .sum();
        self.title.chars().count()
            + self.description.chars().count()
            + self.footer.as_deref().map_or(0, |f| f.chars().count())
            + fields
    }

    /// First limit the payload breaks, if any
    pub fn limit_violation(&self) -> Option<String> {
        if self.fields.len() > EMBED_FIELD_LIMIT {
            return Some(format!("{} fields exceed the limit of {EMBED_FIELD_LIMIT}", self.fields.len()));
        }
        if let Some(field) = self.fields.iter().find(|f| f.value.chars().count() > FIELD_VALUE_LIMIT) {
            return Some(format!(
                "field '{}' value exceeds {FIELD_VALUE_LIMIT} characters",
                field.name
            ));
        }
        let total = self.text_len();
        (total > EMBED_TEXT_LIMIT).then(|| format!("embed text of {total} characters exceeds {EMBED_TEXT_LIMIT}"))
    }
}

/// Chat operations; `edit_message` and `fetch_message` report a vanished
/// message as `WardenError::MessageNotFound`
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Verifies the token; returns the bot's user name
    async fn login(&self) -> Result<String>;

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo>;

    async fn send_message(&self, channel_id: &str, payload: &ReportPayload) -> Result<MessageHandle>;

    async fn edit_message(&self, handle: &MessageHandle, payload: &ReportPayload) -> Result<MessageHandle>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<MessageHandle>;

    async fn list_recent_messages(&self, channel_id: &str) -> Result<Vec<MessageHandle>>;

    async fn bulk_delete(&self, channel_id: &str, handles: &[MessageHandle]) -> Result<()>;

    async fn delete_message(&self, handle: &MessageHandle) -> Result<()>;
}
