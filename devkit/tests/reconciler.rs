//! Message reconciliation against the in-memory chat client

use chrono::{Duration, Utc};
use std::collections::HashSet;
use traffic_warden::chat::{ReportPayload, COLOR_AMBER, COLOR_GREEN};
use traffic_warden::reconciler::{ReconcileOutcome, ReportSlot, StartupPolicy};
use warden_devkit::test_utils::CHANNEL_ID;
use warden_devkit::{ChatCall, MockProvider, TestHarness};

fn payload(title: &str) -> ReportPayload {
    ReportPayload::new(title, "report body", COLOR_AMBER)
}

fn harness() -> TestHarness {
    TestHarness::new(MockProvider::new(), &["token-a"]).unwrap()
}

#[tokio::test]
async fn test_reconcile_twice_edits_single_message() {
    let harness = harness();
    let mut reconciler = harness.reconciler();
    let report = payload("Traffic Report");

    let first = reconciler.reconcile(&ReportSlot::Summary, &report).await.unwrap();
    let second = reconciler.reconcile(&ReportSlot::Summary, &report).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Created);
    assert_eq!(second, ReconcileOutcome::Updated);
    assert_eq!(harness.chat.live_messages(CHANNEL_ID).len(), 1);
    assert_eq!(harness.chat.sends(), 1);
    assert_eq!(harness.chat.edits(), 1);
}

#[tokio::test]
async fn test_create_persists_summary_pointer() {
    let harness = harness();
    let mut reconciler = harness.reconciler();

    reconciler.reconcile(&ReportSlot::Summary, &payload("first")).await.unwrap();
    let live = harness.chat.live_messages(CHANNEL_ID);

    assert_eq!(harness.persisted_message_id().await, Some(live[0].handle.id.clone()));

    let raw = std::fs::read_to_string(harness.pointer_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["messageId"], live[0].handle.id.as_str());
}

#[tokio::test]
async fn test_per_server_slots_are_not_persisted() {
    let harness = harness();
    let mut reconciler = harness.reconciler();

    reconciler
        .reconcile(&ReportSlot::Server(1), &payload("web-1"))
        .await
        .unwrap();

    assert_eq!(harness.persisted_message_id().await, None);
    assert_eq!(reconciler.registry().len(), 1);
}

#[tokio::test]
async fn test_slots_map_to_distinct_messages() {
    let harness = harness();
    let mut reconciler = harness.reconciler();

    for _ in 0..3 {
        reconciler.reconcile(&ReportSlot::Summary, &payload("summary")).await.unwrap();
        reconciler
            .reconcile(&ReportSlot::Server(1), &payload("web-1"))
            .await
            .unwrap();
        reconciler
            .reconcile(&ReportSlot::Server(2), &payload("db-1"))
            .await
            .unwrap();
    }

    assert_eq!(harness.chat.live_messages(CHANNEL_ID).len(), 3);
    assert_eq!(harness.chat.sends(), 3);
    assert_eq!(harness.chat.edits(), 6);
}

#[tokio::test]
async fn test_restart_edits_persisted_message() {
    let harness = harness();
    let original_id = {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("before restart")).await.unwrap();
        harness.persisted_message_id().await.unwrap()
    };

    let mut restarted = harness.reconciler();
    let restored = restarted.prepare(StartupPolicy::default()).await;
    assert_eq!(restored.map(|h| h.id), Some(original_id.clone()));

    let outcome = restarted
        .reconcile(&ReportSlot::Summary, &payload("after restart"))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Updated);
    let live = harness.chat.live_messages(CHANNEL_ID);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].handle.id, original_id);
    assert_eq!(live[0].payload.as_ref().unwrap().title, "after restart");
}

#[tokio::test]
async fn test_restart_with_deleted_message_creates_and_repersists() {
    let harness = harness();
    let stale_id = {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("old")).await.unwrap();
        harness.persisted_message_id().await.unwrap()
    };
    harness.chat.remove_message(&stale_id);

    let mut restarted = harness.reconciler();
    assert!(restarted.prepare(StartupPolicy::default()).await.is_none());

    let outcome = restarted.reconcile(&ReportSlot::Summary, &payload("new")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created);

    let new_id = harness.persisted_message_id().await.unwrap();
    assert_ne!(new_id, stale_id);
    assert_eq!(harness.chat.live_messages(CHANNEL_ID)[0].handle.id, new_id);
}

#[tokio::test]
async fn test_message_deleted_mid_run_is_recreated() {
    let harness = harness();
    let mut reconciler = harness.reconciler();

    reconciler.reconcile(&ReportSlot::Summary, &payload("one")).await.unwrap();
    let first_id = harness.persisted_message_id().await.unwrap();
    harness.chat.remove_message(&first_id);

    let outcome = reconciler.reconcile(&ReportSlot::Summary, &payload("two")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recreated);

    let second_id = harness.persisted_message_id().await.unwrap();
    assert_ne!(first_id, second_id);
    assert_eq!(reconciler.registry().get(&ReportSlot::Summary).unwrap().id, second_id);

    let third = reconciler.reconcile(&ReportSlot::Summary, &payload("three")).await.unwrap();
    assert_eq!(third, ReconcileOutcome::Updated);
    assert_eq!(harness.chat.live_messages(CHANNEL_ID).len(), 1);
}

#[tokio::test]
async fn test_corrupt_pointer_falls_back_to_create() {
    let harness = harness();
    std::fs::create_dir_all(harness.pointer_path().parent().unwrap()).unwrap();
    std::fs::write(harness.pointer_path(), "garbage").unwrap();

    let mut reconciler = harness.reconciler();
    assert!(reconciler.restore().await.is_none());

    let outcome = reconciler.reconcile(&ReportSlot::Summary, &payload("fresh")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created);
    assert!(harness.persisted_message_id().await.is_some());
}

#[tokio::test]
async fn test_seeded_message_id_is_reused_and_persisted() {
    let harness = harness();
    let existing = harness.chat.seed_message(CHANNEL_ID, Utc::now());

    let mut reconciler = harness.reconciler().with_seed_message(Some(existing.id.clone()));
    let restored = reconciler.prepare(StartupPolicy::default()).await;

    assert_eq!(restored.map(|h| h.id), Some(existing.id.clone()));
    assert_eq!(harness.persisted_message_id().await, Some(existing.id.clone()));

    let outcome = reconciler
        .reconcile(&ReportSlot::Summary, &ReportPayload::new("ok", "fine", COLOR_GREEN))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Updated);
}

#[tokio::test]
async fn test_history_reset_spares_restored_message() {
    let harness = harness();
    let summary_id = {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("summary")).await.unwrap();
        harness.persisted_message_id().await.unwrap()
    };
    for _ in 0..5 {
        harness.chat.seed_message(CHANNEL_ID, Utc::now() - Duration::hours(2));
    }
    for _ in 0..2 {
        harness.chat.seed_message(CHANNEL_ID, Utc::now() - Duration::days(40));
    }

    let mut restarted = harness.reconciler();
    restarted.prepare(StartupPolicy::default()).await;

    let live = harness.chat.live_messages(CHANNEL_ID);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].handle.id, summary_id);
    assert_eq!(harness.chat.count_calls(|c| matches!(c, ChatCall::BulkDelete(5))), 1);
    assert_eq!(harness.chat.count_calls(|c| matches!(c, ChatCall::Delete(_))), 2);
}

#[tokio::test]
async fn test_history_reset_without_reuse_clears_everything() {
    let harness = harness();
    {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("summary")).await.unwrap();
    }
    harness.chat.seed_message(CHANNEL_ID, Utc::now());

    let mut restarted = harness.reconciler();
    let restored = restarted
        .prepare(StartupPolicy {
            clear_history: true,
            reuse_pointer: false,
        })
        .await;

    assert!(restored.is_none());
    assert!(harness.chat.live_messages(CHANNEL_ID).is_empty());

    let outcome = restarted.reconcile(&ReportSlot::Summary, &payload("fresh")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created);
}

#[tokio::test]
async fn test_reuse_without_reset_leaves_history() {
    let harness = harness();
    harness.chat.seed_message(CHANNEL_ID, Utc::now());
    harness.chat.seed_message(CHANNEL_ID, Utc::now());

    let mut reconciler = harness.reconciler();
    reconciler
        .prepare(StartupPolicy {
            clear_history: false,
            reuse_pointer: true,
        })
        .await;

    assert_eq!(harness.chat.live_messages(CHANNEL_ID).len(), 2);
    assert_eq!(harness.chat.count_calls(|c| matches!(c, ChatCall::ListRecent(_))), 0);
}

#[tokio::test]
async fn test_bulk_failure_falls_back_to_single_deletes() {
    let harness = harness();
    for _ in 0..4 {
        harness.chat.seed_message(CHANNEL_ID, Utc::now());
    }
    harness.chat.fail_bulk_delete();

    let stats = harness.reconciler().clear_history(None).await;

    assert_eq!(stats.deleted, 4);
    assert_eq!(stats.failed, 0);
    assert!(harness.chat.live_messages(CHANNEL_ID).is_empty());
}

#[tokio::test]
async fn test_undeletable_message_is_skipped() {
    let harness = harness();
    let stuck = harness.chat.seed_message(CHANNEL_ID, Utc::now() - Duration::days(30));
    harness.chat.seed_message(CHANNEL_ID, Utc::now() - Duration::days(30));
    harness.chat.make_undeletable(&stuck.id);

    let stats = harness.reconciler().clear_history(None).await;

    assert_eq!(stats.deleted, 1);
    assert!(stats.failed >= 1);
    let live = harness.chat.live_messages(CHANNEL_ID);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].handle.id, stuck.id);
}

#[tokio::test]
async fn test_unverified_pointer_survives_history_reset() {
    let harness = harness();
    let summary_id = {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("summary")).await.unwrap();
        harness.persisted_message_id().await.unwrap()
    };
    harness.chat.seed_message(CHANNEL_ID, Utc::now());
    harness.chat.fail_fetch(502);

    let mut restarted = harness.reconciler();
    let restored = restarted.prepare(StartupPolicy::default()).await;
    assert_eq!(restored.map(|h| h.id), Some(summary_id.clone()));

    let live = harness.chat.live_messages(CHANNEL_ID);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].handle.id, summary_id);

    harness.chat.heal_fetch();
    let outcome = restarted.reconcile(&ReportSlot::Summary, &payload("after")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(harness.persisted_message_id().await, Some(summary_id));
}

#[tokio::test]
async fn test_unverified_pointer_to_deleted_message_is_recreated() {
    let harness = harness();
    let stale_id = {
        let mut reconciler = harness.reconciler();
        reconciler.reconcile(&ReportSlot::Summary, &payload("old")).await.unwrap();
        harness.persisted_message_id().await.unwrap()
    };
    harness.chat.remove_message(&stale_id);
    harness.chat.fail_fetch(503);

    let mut restarted = harness.reconciler();
    restarted.prepare(StartupPolicy::default()).await;

    let outcome = restarted.reconcile(&ReportSlot::Summary, &payload("new")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recreated);
    assert_ne!(harness.persisted_message_id().await.unwrap(), stale_id);
}

#[tokio::test]
async fn test_prune_deletes_detail_messages_of_missing_servers() {
    let harness = harness();
    let mut reconciler = harness.reconciler();
    reconciler.reconcile(&ReportSlot::Summary, &payload("summary")).await.unwrap();
    reconciler.reconcile(&ReportSlot::Server(1), &payload("one")).await.unwrap();
    reconciler.reconcile(&ReportSlot::Server(2), &payload("two")).await.unwrap();

    let dropped = reconciler.prune_servers(&HashSet::from([2])).await;

    assert_eq!(dropped, 1);
    assert!(reconciler.registry().get(&ReportSlot::Server(1)).is_none());
    assert!(reconciler.registry().get(&ReportSlot::Summary).is_some());
    assert_eq!(harness.chat.live_messages(CHANNEL_ID).len(), 2);
}
