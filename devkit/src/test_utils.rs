/*!
Test harness for the warden

Owns a mock chat client, a mock provider and a temporary directory for the
message pointer, and builds reconcilers and wardens on top of them. Building
twice from the same harness simulates a process restart: the chat history
and the pointer file survive, the in-memory slot registry does not.
*/

use crate::chat_stub::MockChatClient;
use crate::provider_stub::MockProvider;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use traffic_warden::chat::ChatApi;
use traffic_warden::pointer::PointerStore;
use traffic_warden::provider::{ProviderApi, ProviderCredential};
use traffic_warden::reconciler::MessageReconciler;
use traffic_warden::report::{ComposerOptions, ReportComposer};
use traffic_warden::warden::Warden;

pub const CHANNEL_ID: &str = "424242";

pub struct TestHarness {
    pub chat: Arc<MockChatClient>,
    pub provider: Arc<MockProvider>,
    pub credentials: Vec<ProviderCredential>,
    state_dir: TempDir,
}

impl TestHarness {
    pub fn new(provider: MockProvider, tokens: &[&str]) -> Result<Self> {
        tracing_subscriber::fmt()
            .with_env_filter("traffic_warden=debug")
            .with_test_writer()
            .try_init()
            .ok();

        Ok(Self {
            chat: Arc::new(MockChatClient::new()),
            provider: Arc::new(provider),
            credentials: tokens.iter().map(|t| ProviderCredential::new(*t)).collect(),
            state_dir: tempfile::tempdir()?,
        })
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.state_dir.path().join("data").join("message.json")
    }

    pub fn pointer(&self) -> PointerStore {
        PointerStore::new(self.pointer_path())
    }

    /// Message id currently persisted on disk, if any
    pub async fn persisted_message_id(&self) -> Option<String> {
        self.pointer().load().await.ok().flatten().map(|p| p.message_id)
    }

    pub fn reconciler(&self) -> MessageReconciler {
        let chat: Arc<dyn ChatApi> = self.chat.clone();
        MessageReconciler::new(chat, CHANNEL_ID, self.pointer())
    }

    pub fn warden(&self, options: ComposerOptions) -> Warden {
        self.warden_with(options, self.reconciler())
    }

    pub fn warden_with(&self, options: ComposerOptions, reconciler: MessageReconciler) -> Warden {
        let provider: Arc<dyn ProviderApi> = self.provider.clone();
        Warden::new(
            provider,
            self.credentials.clone(),
            options.thresholds,
            ReportComposer::new(options),
            reconciler,
        )
    }
}
