//! Shutdown execution for servers over the kill threshold
//!
//! Each candidate gets exactly one shutdown request per cycle. Requests run
//! concurrently and a failure only marks its own record as not killed.

use crate::provider::ProviderApi;
use crate::usage::{Bucket, UsageRecord};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of one shutdown attempt
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub record: UsageRecord,
    pub succeeded: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

pub struct ActionExecutor {
    provider: Arc<dyn ProviderApi>,
}

impl ActionExecutor {
    pub fn new(provider: Arc<dyn ProviderApi>) -> Self {
        Self { provider }
    }

    /// Shut down every KILL record; records in other buckets are skipped
    pub async fn execute(&self, candidates: &[UsageRecord]) -> Vec<ActionResult> {
        let kills: Vec<&UsageRecord> = candidates.iter().filter(|r| r.bucket == Bucket::Kill).collect();
        let skipped = candidates.len() - kills.len();
        if skipped > 0 {
            warn!(skipped, "Ignoring shutdown candidates outside the kill bucket");
        }

        join_all(kills.into_iter().map(|record| self.shutdown_one(record))).await
    }

    async fn shutdown_one(&self, record: &UsageRecord) -> ActionResult {
        let start_time = Instant::now();
        info!(
            server_id = record.id,
            server = %record.name,
            usage_percent = record.usage_percent,
            "Shutting down server over kill threshold"
        );

        let result = self.provider.shutdown(record.id, &record.credential).await;
        let execution_time_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => {
                info!(server_id = record.id, elapsed_ms = execution_time_ms, "Shutdown request completed");
                ActionResult {
                    record: record.clone(),
                    succeeded: true,
                    error: None,
                    execution_time_ms,
                }
            }
            Err(e) => {
                error!(
                    server_id = record.id,
                    server = %record.name,
                    elapsed_ms = execution_time_ms,
                    error = %e,
                    "Shutdown failed, will retry next cycle"
                );
                ActionResult {
                    record: record.clone(),
                    succeeded: false,
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            }
        }
    }
}
