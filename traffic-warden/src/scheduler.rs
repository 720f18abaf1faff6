//! Periodic job runner with a cancelable handle
//!
//! The job runs once immediately, then on every interval tick. A cycle
//! always runs to completion before the next tick is awaited, so a slow cycle
//! delays the next one instead of overlapping it.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Work executed on every tick
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(&mut self);
}

pub struct ScheduledTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<J: Job>(period: Duration, mut job: J) -> Self {
        let (cancel, mut cancelled) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(every = %humantime::format_duration(period), "Scheduled task started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = timer.tick() => {
                        job.run().await;
                        debug!("Cycle finished");
                    }
                }
            }

            info!("Scheduled task stopped");
        });

        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops scheduling; a cycle already running finishes first
    pub async fn cancel(self) {
        let _ = self.cancel.send(true);
        let _ = self.handle.await;
    }
}

/// Resolves once `signal` fires. A signal that cannot be installed is
/// logged and never resolves, so the scheduler keeps running.
pub async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Failed to listen for shutdown signal, running until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
        work: Duration,
    }

    #[async_trait]
    impl Job for Counter {
        async fn run(&mut self) {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(work: Duration) -> (Counter, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let job = Counter {
            runs: runs.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            overlaps: overlaps.clone(),
            work,
        };
        (job, runs, overlaps)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_periodically() {
        let (job, runs, _) = counter(Duration::from_millis(1));
        let task = ScheduledTask::spawn(Duration::from_secs(60), job);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_never_overlap() {
        let (job, runs, overlaps) = counter(Duration::from_secs(90));
        let task = ScheduledTask::spawn(Duration::from_secs(60), job);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(runs.load(Ordering::SeqCst) >= 5);

        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_future_runs() {
        let (job, runs, _) = counter(Duration::from_millis(1));
        let task = ScheduledTask::spawn(Duration::from_secs(60), job);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());
        task.cancel().await;
        let after_cancel = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_signal() {
        wait_for_shutdown(async { Ok(()) }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_signal_never_resolves() {
        let failed = wait_for_shutdown(async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) });
        let outcome = tokio::time::timeout(Duration::from_secs(3600), failed).await;
        assert!(outcome.is_err());
    }
}
