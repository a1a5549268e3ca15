use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};

use crate::breaker::CircuitBreaker;
use crate::config::SchedulerSettings;
use crate::intake::IntakeSource;
use crate::models::WorkItem;
use crate::queue::{Enqueued, WorkQueue};
use crate::worker::{Disposition, IngestionWorker};

/// Where the daemon loop currently is, surfaced through the ops API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleTally {
    completed: usize,
    partial: usize,
    failed: usize,
    blocked: usize,
    interrupted: usize,
}

/// The daemon loop: periodic intake, one bounded processing pass per
/// cycle, then sleep until the interval elapses, an operator pokes the
/// wake handle, or shutdown is requested.
pub struct ContinuousScheduler {
    queue: Arc<dyn WorkQueue>,
    intake: Arc<dyn IntakeSource>,
    worker: IngestionWorker,
    breaker: Arc<Mutex<CircuitBreaker>>,
    settings: SchedulerSettings,
    shutdown: watch::Receiver<bool>,
    wake: Arc<Notify>,
    phase: watch::Sender<SchedulerPhase>,
}

impl ContinuousScheduler {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        intake: Arc<dyn IntakeSource>,
        worker: IngestionWorker,
        breaker: Arc<Mutex<CircuitBreaker>>,
        settings: SchedulerSettings,
        shutdown: watch::Receiver<bool>,
        wake: Arc<Notify>,
    ) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Running);
        Self {
            queue,
            intake,
            worker,
            breaker,
            settings,
            shutdown,
            wake,
            phase,
        }
    }

    pub fn phase_receiver(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    pub async fn run(mut self) {
        tracing::info!(
            "Scheduler started (cycle interval {}s, batch size {})",
            self.settings.cycle_interval.as_secs(),
            self.settings.batch_size
        );

        let mut cycle: u64 = 0;
        loop {
            if *self.shutdown.borrow() {
                self.note_shutdown();
                break;
            }

            if cycle % self.settings.intake_every_n_cycles == 0 {
                self.run_intake().await;
            }
            cycle += 1;
            self.run_cycle(cycle).await;

            if *self.shutdown.borrow() {
                self.note_shutdown();
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.cycle_interval) => {}
                _ = self.wake.notified() => {
                    tracing::info!("Cycle triggered by operator");
                }
                _ = self.shutdown.changed() => {}
            }
        }

        self.phase.send_replace(SchedulerPhase::Stopped);
        tracing::info!("Scheduler stopped after {cycle} cycles");
    }

    /// Flip the published phase to shutting-down exactly once.
    fn note_shutdown(&self) {
        let flipped = self.phase.send_if_modified(|phase| {
            if *phase == SchedulerPhase::Running {
                *phase = SchedulerPhase::ShuttingDown;
                true
            } else {
                false
            }
        });
        if flipped {
            tracing::info!("Graceful shutdown: stopping at the next item boundary");
        }
    }

    async fn run_intake(&self) {
        let seen = match self.queue.known_ids().await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!("Intake skipped, could not list known ids: {e}");
                return;
            }
        };

        let ids = match self.intake.list_new_ids(&seen).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Intake failed: {e}");
                return;
            }
        };
        if ids.is_empty() {
            tracing::debug!("Intake: no new ids");
            return;
        }

        let mut inserted = 0usize;
        let mut duplicates = 0usize;
        for id in &ids {
            match self.queue.enqueue(id).await {
                Ok(Enqueued::Inserted) => inserted += 1,
                Ok(Enqueued::Duplicate) => duplicates += 1,
                Err(e) => tracing::error!("Failed to enqueue {id}: {e}"),
            }
        }
        tracing::info!("Intake: {inserted} enqueued, {duplicates} duplicates");
    }

    async fn run_cycle(&mut self, cycle: u64) {
        let started = Instant::now();

        let batch = match self.queue.select_batch(self.settings.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("Cycle {cycle}: batch selection failed: {e}");
                return;
            }
        };
        // The statistics line goes out every cycle, empty or not.
        let mut tally = CycleTally::default();
        if batch.is_empty() {
            tracing::debug!("Cycle {cycle}: queue empty");
        } else {
            tracing::info!("Cycle {cycle}: processing {} items", batch.len());

            for (index, item) in batch.iter().enumerate() {
                if *self.shutdown.borrow() {
                    self.note_shutdown();
                    self.release_rest(&batch[index..]).await;
                    break;
                }

                match self.worker.process(item, &self.shutdown).await {
                    Disposition::Completed => tally.completed += 1,
                    Disposition::Partial => tally.partial += 1,
                    Disposition::Failed => tally.failed += 1,
                    Disposition::Blocked => tally.blocked += 1,
                    Disposition::Interrupted => tally.interrupted += 1,
                }
            }
        }

        let counts = match self.queue.status_counts().await {
            Ok(counts) if counts.is_empty() => "empty".to_string(),
            Ok(counts) => counts
                .iter()
                .map(|(status, count)| format!("{}={count}", status.as_str()))
                .collect::<Vec<_>>()
                .join(" "),
            Err(e) => format!("unavailable ({e})"),
        };
        let breaker = self.breaker.lock().await.statistics();

        tracing::info!(
            "Cycle {cycle} done in {:.1}s: {} completed, {} partial, {} failed, {} blocked, {} interrupted; queue: {counts}; breaker: {} ({:.0}% failing)",
            started.elapsed().as_secs_f64(),
            tally.completed,
            tally.partial,
            tally.failed,
            tally.blocked,
            tally.interrupted,
            breaker.state.as_str(),
            breaker.failure_rate * 100.0
        );
    }

    /// Hand unprocessed items back to the queue so a restart can pick
    /// them up without waiting out a lease.
    async fn release_rest(&self, rest: &[WorkItem]) {
        for item in rest {
            if let Err(e) = self.queue.release(&item.record_id).await {
                tracing::error!("Failed to release {}: {e}", item.record_id);
            }
        }
        if !rest.is_empty() {
            tracing::info!("Released {} unprocessed items for the next run", rest.len());
        }
    }
}
