//! Message reconciliation
//!
//! Keeps at most one live chat message per report slot. A slot with a
//! mapping is edited in place; a slot without one (or whose message has
//! vanished) gets a new message. The summary slot is durable: its message id
//! is persisted after every create so a restarted process edits the same
//! message instead of posting a new one.
//!
//! Startup, in order:
//! 1. `restore` resolves the persisted pointer (or the pre-seeded id)
//! 2. `clear_history` removes older channel messages, sparing the restored one

use crate::chat::{ChatApi, MessageHandle, ReportPayload};
use crate::error::Result;
use crate::pointer::PointerStore;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bulk deletion only accepts messages younger than 14 days; keep an hour of margin
const BULK_DELETE_WINDOW_HOURS: i64 = 14 * 24 - 1;
const BULK_DELETE_MAX: usize = 100;
const MAX_CLEAR_PASSES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReportSlot {
    Summary,
    /// Detail message of one server, by provider server id
    Server(u64),
}

impl ReportSlot {
    pub fn key(&self) -> String {
        match self {
            ReportSlot::Summary => "summary".to_string(),
            ReportSlot::Server(id) => format!("per-server:{id}"),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, ReportSlot::Summary)
    }
}

impl fmt::Display for ReportSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    /// The mapped message was gone; a new one replaced it
    Recreated,
}

/// Slot to live message mapping, owned by the reconciler for the process lifetime
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: HashMap<ReportSlot, MessageHandle>,
}

impl SlotRegistry {
    pub fn get(&self, slot: &ReportSlot) -> Option<&MessageHandle> {
        self.slots.get(slot)
    }

    pub fn insert(&mut self, slot: ReportSlot, handle: MessageHandle) {
        self.slots.insert(slot, handle);
    }

    pub fn remove(&mut self, slot: &ReportSlot) -> Option<MessageHandle> {
        self.slots.remove(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Server ids that currently have a detail message
    pub fn server_ids(&self) -> Vec<u64> {
        self.slots
            .keys()
            .filter_map(|slot| match slot {
                ReportSlot::Server(id) => Some(*id),
                ReportSlot::Summary => None,
            })
            .collect()
    }
}

/// Which startup behaviors run before the first cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupPolicy {
    pub clear_history: bool,
    pub reuse_pointer: bool,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            clear_history: true,
            reuse_pointer: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearStats {
    pub deleted: usize,
    pub failed: usize,
}

pub struct MessageReconciler {
    chat: Arc<dyn ChatApi>,
    channel_id: String,
    registry: SlotRegistry,
    pointer: PointerStore,
    seed_message_id: Option<String>,
}

impl MessageReconciler {
    pub fn new(chat: Arc<dyn ChatApi>, channel_id: impl Into<String>, pointer: PointerStore) -> Self {
        Self {
            chat,
            channel_id: channel_id.into(),
            registry: SlotRegistry::default(),
            pointer,
            seed_message_id: None,
        }
    }

    /// Message id to fall back on when no pointer file exists
    pub fn with_seed_message(mut self, message_id: Option<String>) -> Self {
        self.seed_message_id = message_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Runs the startup steps selected by `policy`; returns the reused summary message, if any
    pub async fn prepare(&mut self, policy: StartupPolicy) -> Option<MessageHandle> {
        let restored = if policy.reuse_pointer {
            self.restore().await
        } else {
            None
        };

        if policy.clear_history {
            let keep = restored.as_ref().map(|h| h.id.clone());
            let stats = self.clear_history(keep.as_deref()).await;
            info!(
                deleted = stats.deleted,
                failed = stats.failed,
                kept = keep.as_deref().unwrap_or("none"),
                "Channel history cleared"
            );
        }

        restored
    }

    /// Maps the summary slot to the persisted message when it still exists
    pub async fn restore(&mut self) -> Option<MessageHandle> {
        let (message_id, from_file) = match self.pointer.load().await {
            Ok(Some(pointer)) => (Some(pointer.message_id), true),
            Ok(None) => (self.seed_message_id.clone(), false),
            Err(e) => {
                warn!(error = %e, "Pointer unreadable, treating as absent");
                (self.seed_message_id.clone(), false)
            }
        };

        let message_id = message_id?;
        match self.chat.fetch_message(&self.channel_id, &message_id).await {
            Ok(handle) => {
                info!(slot = %ReportSlot::Summary, message_id = %handle.id, "Reusing existing summary message");
                self.registry.insert(ReportSlot::Summary, handle.clone());
                if !from_file {
                    self.persist(&ReportSlot::Summary, &handle.id).await;
                }
                Some(handle)
            }
            Err(e) if e.is_not_found() => {
                info!(slot = %ReportSlot::Summary, message_id = %message_id, "Persisted summary message is gone, a new one will be created");
                None
            }
            Err(e) => {
                // Unconfirmed: keep the mapping; the first edit settles whether it still exists
                warn!(
                    slot = %ReportSlot::Summary,
                    message_id = %message_id,
                    error = %e,
                    "Could not verify persisted summary message, keeping it"
                );
                let handle = MessageHandle {
                    id: message_id,
                    channel_id: self.channel_id.clone(),
                    created_at: Utc::now(),
                };
                self.registry.insert(ReportSlot::Summary, handle.clone());
                Some(handle)
            }
        }
    }

    /// Deletes recent channel messages except `keep`; failures are logged and skipped
    pub async fn clear_history(&self, keep: Option<&str>) -> ClearStats {
        let mut stats = ClearStats::default();

        for pass in 0..MAX_CLEAR_PASSES {
            let messages = match self.chat.list_recent_messages(&self.channel_id).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(channel_id = %self.channel_id, error = %e, "Could not list channel history");
                    break;
                }
            };

            let deletable: Vec<MessageHandle> = messages
                .into_iter()
                .filter(|m| Some(m.id.as_str()) != keep)
                .collect();
            if deletable.is_empty() {
                break;
            }

            let cutoff = Utc::now() - Duration::hours(BULK_DELETE_WINDOW_HOURS);
            let (recent, old): (Vec<_>, Vec<_>) = deletable.into_iter().partition(|m| m.created_at > cutoff);
            debug!(pass, recent = recent.len(), old = old.len(), "Clearing channel history");

            let before = stats.deleted;
            for chunk in recent.chunks(BULK_DELETE_MAX) {
                if chunk.len() < 2 {
                    self.delete_each(chunk, &mut stats).await;
                    continue;
                }
                match self.chat.bulk_delete(&self.channel_id, chunk).await {
                    Ok(()) => stats.deleted += chunk.len(),
                    Err(e) => {
                        warn!(count = chunk.len(), error = %e, "Bulk delete failed, deleting one by one");
                        self.delete_each(chunk, &mut stats).await;
                    }
                }
            }
            self.delete_each(&old, &mut stats).await;

            if stats.deleted == before {
                break;
            }
        }

        stats
    }

    async fn delete_each(&self, handles: &[MessageHandle], stats: &mut ClearStats) {
        for handle in handles {
            match self.chat.delete_message(handle).await {
                Ok(()) => stats.deleted += 1,
                Err(e) if e.is_not_found() => stats.deleted += 1,
                Err(e) => {
                    warn!(message_id = %handle.id, error = %e, "Could not delete message, skipping");
                    stats.failed += 1;
                }
            }
        }
    }

    /// Edits the slot's message, or creates one when the slot is unmapped or its message vanished
    pub async fn reconcile(&mut self, slot: &ReportSlot, payload: &ReportPayload) -> Result<ReconcileOutcome> {
        let Some(handle) = self.registry.get(slot).cloned() else {
            self.create(slot, payload).await?;
            return Ok(ReconcileOutcome::Created);
        };

        match self.chat.edit_message(&handle, payload).await {
            Ok(updated) => {
                debug!(slot = %slot, message_id = %updated.id, "Message updated");
                self.registry.insert(slot.clone(), updated);
                Ok(ReconcileOutcome::Updated)
            }
            Err(e) if e.is_not_found() => {
                warn!(slot = %slot, message_id = %handle.id, "Mapped message no longer exists, recreating");
                self.registry.remove(slot);
                self.create(slot, payload).await?;
                Ok(ReconcileOutcome::Recreated)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes detail messages of servers missing from `present`; returns how many were dropped
    pub async fn prune_servers(&mut self, present: &HashSet<u64>) -> usize {
        let mut dropped = 0;

        for id in self.registry.server_ids() {
            if present.contains(&id) {
                continue;
            }
            let slot = ReportSlot::Server(id);
            let Some(handle) = self.registry.remove(&slot) else {
                continue;
            };
            match self.chat.delete_message(&handle).await {
                Ok(()) => info!(slot = %slot, message_id = %handle.id, "Server gone, detail message deleted"),
                Err(e) if e.is_not_found() => debug!(slot = %slot, message_id = %handle.id, "Detail message already gone"),
                Err(e) => warn!(slot = %slot, message_id = %handle.id, error = %e, "Could not delete detail message"),
            }
            dropped += 1;
        }

        dropped
    }

    async fn create(&mut self, slot: &ReportSlot, payload: &ReportPayload) -> Result<()> {
        let handle = self.chat.send_message(&self.channel_id, payload).await?;
        info!(slot = %slot, message_id = %handle.id, "Message created");

        let message_id = handle.id.clone();
        self.registry.insert(slot.clone(), handle);
        self.persist(slot, &message_id).await;
        Ok(())
    }

    async fn persist(&self, slot: &ReportSlot, message_id: &str) {
        if !slot.is_durable() {
            return;
        }
        if let Err(e) = self.pointer.save(message_id).await {
            error!(slot = %slot, message_id, error = %e, "Failed to persist message pointer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keys() {
        assert_eq!(ReportSlot::Summary.key(), "summary");
        assert_eq!(ReportSlot::Server(42).key(), "per-server:42");
        assert!(ReportSlot::Summary.is_durable());
        assert!(!ReportSlot::Server(42).is_durable());
    }

    #[test]
    fn test_registry_replaces_mapping() {
        let mut registry = SlotRegistry::default();
        let handle = |id: &str| MessageHandle {
            id: id.to_string(),
            channel_id: "c".to_string(),
            created_at: Utc::now(),
        };

        registry.insert(ReportSlot::Summary, handle("1"));
        registry.insert(ReportSlot::Summary, handle("2"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&ReportSlot::Summary).unwrap().id, "2");
        registry.insert(ReportSlot::Server(7), handle("3"));
        assert_eq!(registry.server_ids(), vec![7]);
        assert!(registry.remove(&ReportSlot::Summary).is_some());
        assert!(registry.remove(&ReportSlot::Server(7)).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_policy_enables_both() {
        let policy = StartupPolicy::default();
        assert!(policy.clear_history && policy.reuse_pointer);
    }
}
