/*!
In-memory chat client

Implements `ChatApi` without a network. Keeps the live messages of every
channel, records each call for assertions, and can be told to fail logins,
fetches, bulk deletes or individual deletes. Payloads over the embed limits
are rejected the way the platform rejects them.
*/

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use traffic_warden::chat::{ChannelInfo, ChatApi, MessageHandle, ReportPayload};
use traffic_warden::{Result, WardenError};

const BULK_DELETE_MAX_AGE_DAYS: i64 = 14;

/// Recorded call, in invocation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Login,
    FetchChannel(String),
    Send(String),
    Edit(String),
    Fetch(String),
    ListRecent(String),
    BulkDelete(usize),
    Delete(String),
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub handle: MessageHandle,
    pub payload: Option<ReportPayload>,
}

#[derive(Debug, Default)]
struct ChatState {
    // keyed by numeric id so iteration follows creation order
    messages: BTreeMap<u64, StoredMessage>,
    next_id: u64,
    calls: Vec<ChatCall>,
    reject_login: bool,
    fail_bulk_delete: bool,
    fetch_failure: Option<u16>,
    undeletable: HashSet<String>,
}

/// Mock chat client that simulates a single workspace with any number of channels
#[derive(Debug)]
pub struct MockChatClient {
    state: Mutex<ChatState>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChatState {
                next_id: 1_000,
                ..ChatState::default()
            }),
        }
    }

    pub fn reject_login(&self) {
        self.state.lock().reject_login = true;
    }

    pub fn fail_bulk_delete(&self) {
        self.state.lock().fail_bulk_delete = true;
    }

    /// Every `fetch_message` answers with this status until `heal_fetch`
    pub fn fail_fetch(&self, status: u16) {
        self.state.lock().fetch_failure = Some(status);
    }

    pub fn heal_fetch(&self) {
        self.state.lock().fetch_failure = None;
    }

    pub fn make_undeletable(&self, message_id: &str) {
        self.state.lock().undeletable.insert(message_id.to_string());
    }

    /// Adds a message posted before the warden started (e.g. a previous run's report)
    pub fn seed_message(&self, channel_id: &str, created_at: DateTime<Utc>) -> MessageHandle {
        let mut state = self.state.lock();
        let handle = Self::allocate(&mut state, channel_id, created_at);
        let key = state.next_id;
        state.messages.insert(
            key,
            StoredMessage {
                handle: handle.clone(),
                payload: None,
            },
        );
        handle
    }

    /// Simulates someone deleting a message by hand
    pub fn remove_message(&self, message_id: &str) -> bool {
        let key: u64 = message_id.parse().unwrap_or_default();
        self.state.lock().messages.remove(&key).is_some()
    }

    pub fn live_messages(&self, channel_id: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .messages
            .values()
            .filter(|m| m.handle.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn message(&self, message_id: &str) -> Option<StoredMessage> {
        let key: u64 = message_id.parse().ok()?;
        self.state.lock().messages.get(&key).cloned()
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&ChatCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn sends(&self) -> usize {
        self.count_calls(|c| matches!(c, ChatCall::Send(_)))
    }

    pub fn edits(&self) -> usize {
        self.count_calls(|c| matches!(c, ChatCall::Edit(_)))
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn allocate(state: &mut ChatState, channel_id: &str, created_at: DateTime<Utc>) -> MessageHandle {
        state.next_id += 1;
        MessageHandle {
            id: state.next_id.to_string(),
            channel_id: channel_id.to_string(),
            created_at,
        }
    }

    fn check_limits(payload: &ReportPayload) -> Result<()> {
        match payload.limit_violation() {
            Some(reason) => Err(WardenError::Chat {
                status: 400,
                body: format!("Invalid Form Body: {reason}"),
            }),
            None => Ok(()),
        }
    }

    fn key(message_id: &str) -> Result<u64> {
        message_id
            .parse()
            .map_err(|_| WardenError::MessageNotFound(message_id.to_string()))
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for MockChatClient {
    async fn login(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::Login);
        if state.reject_login {
            return Err(WardenError::Auth("token rejected (401 Unauthorized)".into()));
        }
        Ok("warden-bot".to_string())
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.state.lock().calls.push(ChatCall::FetchChannel(channel_id.to_string()));
        Ok(ChannelInfo {
            id: channel_id.to_string(),
            name: Some("traffic-reports".to_string()),
        })
    }

    async fn send_message(&self, channel_id: &str, payload: &ReportPayload) -> Result<MessageHandle> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::Send(channel_id.to_string()));
        Self::check_limits(payload)?;
        let handle = Self::allocate(&mut state, channel_id, Utc::now());
        let key = state.next_id;
        state.messages.insert(
            key,
            StoredMessage {
                handle: handle.clone(),
                payload: Some(payload.clone()),
            },
        );
        Ok(handle)
    }

    async fn edit_message(&self, handle: &MessageHandle, payload: &ReportPayload) -> Result<MessageHandle> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::Edit(handle.id.clone()));
        Self::check_limits(payload)?;
        let key = Self::key(&handle.id)?;
        let stored = state
            .messages
            .get_mut(&key)
            .ok_or_else(|| WardenError::MessageNotFound(handle.id.clone()))?;
        stored.payload = Some(payload.clone());
        Ok(stored.handle.clone())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<MessageHandle> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::Fetch(message_id.to_string()));
        if let Some(status) = state.fetch_failure {
            return Err(WardenError::Chat {
                status,
                body: "upstream unavailable".into(),
            });
        }
        let key = Self::key(message_id)?;
        state
            .messages
            .get(&key)
            .filter(|m| m.handle.channel_id == channel_id)
            .map(|m| m.handle.clone())
            .ok_or_else(|| WardenError::MessageNotFound(message_id.to_string()))
    }

    async fn list_recent_messages(&self, channel_id: &str) -> Result<Vec<MessageHandle>> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::ListRecent(channel_id.to_string()));
        Ok(state
            .messages
            .values()
            .rev()
            .filter(|m| m.handle.channel_id == channel_id)
            .take(100)
            .map(|m| m.handle.clone())
            .collect())
    }

    async fn bulk_delete(&self, _channel_id: &str, handles: &[MessageHandle]) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::BulkDelete(handles.len()));

        if state.fail_bulk_delete {
            return Err(WardenError::Chat {
                status: 500,
                body: "bulk delete unavailable".into(),
            });
        }
        if !(2..=100).contains(&handles.len()) {
            return Err(WardenError::Chat {
                status: 400,
                body: "bulk delete needs between 2 and 100 messages".into(),
            });
        }
        let cutoff = Utc::now() - Duration::days(BULK_DELETE_MAX_AGE_DAYS);
        if handles.iter().any(|h| h.created_at <= cutoff) {
            return Err(WardenError::Chat {
                status: 400,
                body: "messages older than 2 weeks cannot be bulk deleted".into(),
            });
        }
        if handles.iter().any(|h| state.undeletable.contains(&h.id)) {
            return Err(WardenError::Chat {
                status: 403,
                body: "missing permissions".into(),
            });
        }

        for handle in handles {
            if let Ok(key) = Self::key(&handle.id) {
                state.messages.remove(&key);
            }
        }
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ChatCall::Delete(handle.id.clone()));

        if state.undeletable.contains(&handle.id) {
            return Err(WardenError::Chat {
                status: 403,
                body: "missing permissions".into(),
            });
        }
        let key = Self::key(&handle.id)?;
        state
            .messages
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| WardenError::MessageNotFound(handle.id.clone()))
    }
}
