//! One monitoring cycle: fetch, classify, act, compose, reconcile

use crate::executor::{ActionExecutor, ActionResult};
use crate::provider::{collect_snapshots, ProviderApi, ProviderCredential};
use crate::reconciler::{MessageReconciler, ReconcileOutcome, ReportSlot};
use crate::report::ReportComposer;
use crate::scheduler::Job;
use crate::usage::{classify_all, Bucket, Thresholds, UsageRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Counters describing one finished cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub servers: usize,
    pub notify: usize,
    pub kill_candidates: usize,
    pub killed: usize,
    pub failed_shutdowns: usize,
    pub messages_created: usize,
    pub messages_updated: usize,
    pub messages_deleted: usize,
    pub reconcile_errors: usize,
}

pub struct Warden {
    provider: Arc<dyn ProviderApi>,
    credentials: Vec<ProviderCredential>,
    thresholds: Thresholds,
    executor: ActionExecutor,
    composer: ReportComposer,
    reconciler: MessageReconciler,
}

impl Warden {
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        credentials: Vec<ProviderCredential>,
        thresholds: Thresholds,
        composer: ReportComposer,
        reconciler: MessageReconciler,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(provider.clone()),
            provider,
            credentials,
            thresholds,
            composer,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &MessageReconciler {
        &self.reconciler
    }

    pub async fn run_cycle(&mut self) -> CycleSummary {
        let listing = collect_snapshots(self.provider.as_ref(), &self.credentials).await;
        let records = classify_all(&listing.snapshots, &self.thresholds);

        let candidates: Vec<UsageRecord> = records
            .iter()
            .filter(|r| r.bucket == Bucket::Kill)
            .cloned()
            .collect();
        let results = self.executor.execute(&candidates).await;

        let mut summary = summarize(&records, &results);
        let report = self.composer.compose(&records, &results);

        let mut updates = Vec::with_capacity(report.servers.len() + 1);
        if let Some(payload) = report.summary {
            updates.push((ReportSlot::Summary, payload));
        }
        updates.extend(report.servers);

        for (slot, payload) in updates {
            match self.reconciler.reconcile(&slot, &payload).await {
                Ok(ReconcileOutcome::Updated) => summary.messages_updated += 1,
                Ok(ReconcileOutcome::Created | ReconcileOutcome::Recreated) => summary.messages_created += 1,
                Err(e) => {
                    error!(slot = %slot, error = %e, "Failed to reconcile report message");
                    summary.reconcile_errors += 1;
                }
            }
        }

        // a partial listing cannot tell a deleted server from an unreachable one
        if listing.is_complete() {
            let present: HashSet<u64> = records.iter().map(|r| r.id).collect();
            summary.messages_deleted = self.reconciler.prune_servers(&present).await;
        }

        info!(
            servers = summary.servers,
            notify = summary.notify,
            killed = summary.killed,
            failed_shutdowns = summary.failed_shutdowns,
            "Cycle complete"
        );
        summary
    }
}

fn summarize(records: &[UsageRecord], results: &[ActionResult]) -> CycleSummary {
    let killed = results.iter().filter(|r| r.succeeded).count();
    CycleSummary {
        servers: records.len(),
        notify: records.iter().filter(|r| r.bucket == Bucket::Notify).count(),
        kill_candidates: results.len(),
        killed,
        failed_shutdowns: results.len() - killed,
        ..CycleSummary::default()
    }
}

#[async_trait]
impl Job for Warden {
    async fn run(&mut self) {
        self.run_cycle().await;
    }
}
