use replica_common::{ReplicaError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ranker::{Ranker, ScoredKey};
use crate::snapshot::{IndexSnapshot, SnapshotBuilder};
use crate::store::VectorStore;

/// Scheduler lifecycle as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Snapshot matches the last observed mutation
    Idle,
    /// Mutation observed, rebuild pending
    Dirty,
    /// Rebuild in flight
    Rebuilding,
    /// Last rebuild failed; previous snapshot kept
    ///
    /// Reported until the next cycle or mutation. The dirty flag stays
    /// raised, so for scheduling this behaves like `Idle` with a rebuild
    /// pending: the next cycle retries without another `ask_for_rebuild`.
    Failed,
}

/// Result of one scheduling step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed since the last successful rebuild
    Skipped,
    /// A new snapshot was swapped in
    Rebuilt { generation: u64 },
    /// Rebuild failed, dirty flag re-armed
    Failed { reason: String },
}

/// Rebuild counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct RebuildCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

struct SchedulerState {
    dirty: bool,
    phase: SchedulerPhase,
    current: Option<Arc<IndexSnapshot>>,
    generation: u64,
    last_error: Option<String>,
}

/// Keeps an immutable [`IndexSnapshot`] in sync with a [`VectorStore`]
///
/// The state lock guards only the dirty flag and the snapshot pointer; the
/// rebuild itself runs outside it, so searches never wait for a rebuild.
pub struct IndexScheduler {
    store: Arc<VectorStore>,
    builder: Arc<dyn SnapshotBuilder>,
    ranker: Ranker,
    period: Duration,
    state: Mutex<SchedulerState>,
    // Held for a whole cycle: at most one rebuild in flight
    cycle_gate: Mutex<()>,
    counters: RebuildCounters,
}

impl IndexScheduler {
    /// Create a scheduler; it starts dirty so the first cycle builds a snapshot
    pub fn new(
        store: Arc<VectorStore>,
        builder: Arc<dyn SnapshotBuilder>,
        ranker: Ranker,
        period: Duration,
    ) -> Self {
        Self {
            store,
            builder,
            ranker,
            period,
            state: Mutex::new(SchedulerState {
                dirty: true,
                phase: SchedulerPhase::Dirty,
                current: None,
                generation: 0,
                last_error: None,
            }),
            cycle_gate: Mutex::new(()),
            counters: RebuildCounters::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    /// Mark the snapshot out of date
    ///
    /// Calls made while a rebuild runs coalesce into a single follow-up rebuild.
    pub async fn ask_for_rebuild(&self) {
        let mut state = self.state.lock().await;
        state.dirty = true;
        if state.phase != SchedulerPhase::Rebuilding {
            state.phase = SchedulerPhase::Dirty;
        }
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    pub async fn phase(&self) -> SchedulerPhase {
        self.state.lock().await.phase
    }

    pub async fn current_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.state.lock().await.current.clone()
    }

    /// Generation of the current snapshot (0 before the first build)
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub fn stats(&self) -> RebuildStats {
        RebuildStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// One scheduling step: rebuild if dirty, swap the snapshot in on success
    pub async fn run_cycle(&self) -> CycleOutcome {
        let _gate = self.cycle_gate.lock().await;

        let generation = {
            let mut state = self.state.lock().await;
            if !state.dirty {
                return CycleOutcome::Skipped;
            }
            state.dirty = false;
            state.phase = SchedulerPhase::Rebuilding;
            state.generation + 1
        };

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        info!("Index rebuilding (generation {})...", generation);
        let started = Instant::now();

        match self.build_snapshot(generation).await {
            Ok(snapshot) => {
                let items = snapshot.len();
                let built_at = snapshot.built_at();
                {
                    let mut state = self.state.lock().await;
                    state.current = Some(Arc::new(snapshot));
                    state.generation = generation;
                    state.last_error = None;
                    state.phase = if state.dirty {
                        SchedulerPhase::Dirty
                    } else {
                        SchedulerPhase::Idle
                    };
                }
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Index rebuilt - generation {}, {} items in {:?} (built at {})",
                    generation,
                    items,
                    started.elapsed(),
                    built_at
                );
                CycleOutcome::Rebuilt { generation }
            }
            Err(err) => {
                let reason = err.to_string();
                {
                    let mut state = self.state.lock().await;
                    state.dirty = true;
                    state.phase = SchedulerPhase::Failed;
                    state.last_error = Some(reason.clone());
                }
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Index rebuilding failed, keeping previous snapshot: {}", reason);
                CycleOutcome::Failed { reason }
            }
        }
    }

    async fn build_snapshot(&self, generation: u64) -> Result<IndexSnapshot> {
        let space = self.store.snapshot_vectors().await?;
        let builder = Arc::clone(&self.builder);

        tokio::task::spawn_blocking(move || builder.build(space, generation))
            .await
            .map_err(|e| ReplicaError::rebuild_failed(format!("rebuild task aborted: {}", e)))?
            .map_err(|e| match e {
                ReplicaError::RebuildFailed(_) => e,
                other => ReplicaError::rebuild_failed(other.to_string()),
            })
    }

    /// Rank from the current snapshot
    ///
    /// Fails with `IndexUnavailable` before the first successful build and
    /// with `StaleIndex` when a requested key postdates the snapshot.
    pub async fn search(
        &self,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredKey>> {
        let snapshot = self
            .current_snapshot()
            .await
            .ok_or(ReplicaError::IndexUnavailable)?;

        if let Some(missing) = snapshot.first_missing(positive.iter().chain(negative)) {
            debug!(
                "Key {} missing from snapshot generation {}",
                missing,
                snapshot.generation()
            );
            return Err(ReplicaError::stale_index(missing.as_str()));
        }

        let ranker = self.ranker;
        let (positive, negative) = (positive.to_vec(), negative.to_vec());
        tokio::task::spawn_blocking(move || snapshot.search(&ranker, &positive, &negative, k))
            .await
            .map_err(|e| ReplicaError::internal(format!("search task aborted: {}", e)))?
    }

    /// Rank against the live store vectors, bypassing the snapshot
    pub async fn search_live(
        &self,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredKey>> {
        let space = self.store.snapshot_vectors().await?;
        let ranker = self.ranker;
        let (positive, negative) = (positive.to_vec(), negative.to_vec());

        tokio::task::spawn_blocking(move || {
            ranker
                .score_with_negatives(&positive, &negative, space.keys(), space.vectors())
                .map(|scores| scores.top_k(k))
        })
        .await
        .map_err(|e| ReplicaError::internal(format!("search task aborted: {}", e)))?
    }

    /// Spawn the periodic rebuild worker
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(token.clone()));
        SchedulerHandle {
            token,
            task: Some(task),
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let start = tokio::time::Instant::now() + self.period;
        let mut ticker = tokio::time::interval_at(start, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Index scheduler started - period {:?}", self.period);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("Index scheduler stopped");
    }
}

/// Stop signal for a running scheduler worker
///
/// Dropping the handle also stops the worker.
pub struct SchedulerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the worker and wait for it; an in-flight rebuild finishes first
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Index scheduler task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
