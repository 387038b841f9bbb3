//! Contains the per-kind worker loop of the crawl.
//!
//! An `EntityWorker` owns nothing but handles: its own queue, the record store
//! of its kind, and the queue of the opposite kind. Each iteration it:
//!
//! - Waits on its queue until an entry arrives, the idle timeout lapses, or
//!   shutdown is signalled
//! - Fetches the full record through the rate-limited `Fetcher`
//! - Persists it with insert-if-absent
//! - Enqueues every neighbour into the opposite queue
//!
//! Unit-of-work failures (fetch errors, missing fields) stay inside the
//! worker. Budget exhaustion and store failures are reported to the
//! supervisor over the event channel, after which the worker exits.

use crate::client::Fetcher;
use crate::error::CrawlError;
use crate::queue::DedupQueue;
use crate::record::{EntityKind, QueueEntry, Record};
use crate::shutdown::Shutdown;
use crate::state::{CrawlerState, WorkerStatus};
use crate::stats::StatCollector;
use crate::store::RecordStore;
use kanal::AsyncSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Run-level conditions a worker reports to the supervisor.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    BudgetExhausted { kind: EntityKind, worker: usize },
    StoreUnavailable { kind: EntityKind, worker: usize, message: String },
}

/// Why a worker loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    IdleTimeout,
    Shutdown,
    Fatal,
}

/// Handles shared by every worker of both kinds.
pub(crate) struct WorkerContext {
    pub fetcher: Arc<Fetcher>,
    pub stats: Arc<StatCollector>,
    pub state: Arc<CrawlerState>,
    pub shutdown: Arc<Shutdown>,
    pub events: AsyncSender<WorkerEvent>,
    pub idle_timeout: Duration,
}

pub(crate) type WorkerResult = (EntityKind, usize, WorkerExit);

/// Spawns `count` workers of kind `R` into `tasks`.
pub(crate) fn spawn_worker_pool<R: Record>(
    tasks: &mut JoinSet<WorkerResult>,
    count: usize,
    queue: Arc<DedupQueue<R>>,
    store: Arc<dyn RecordStore<R>>,
    neighbors: Arc<DedupQueue<R::Neighbor>>,
    ctx: Arc<WorkerContext>,
) {
    for index in 0..count {
        let worker = EntityWorker {
            index,
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            neighbors: Arc::clone(&neighbors),
            ctx: Arc::clone(&ctx),
            status: WorkerStatus::Idle,
        };
        ctx.state.worker_started(R::KIND);
        debug!("Spinning up {} worker {}", R::KIND, index);
        tasks.spawn(async move {
            let exit = worker.run().await;
            (R::KIND, index, exit)
        });
    }
}

pub(crate) struct EntityWorker<R: Record> {
    index: usize,
    queue: Arc<DedupQueue<R>>,
    store: Arc<dyn RecordStore<R>>,
    neighbors: Arc<DedupQueue<R::Neighbor>>,
    ctx: Arc<WorkerContext>,
    status: WorkerStatus,
}

impl<R: Record> EntityWorker<R> {
    pub(crate) async fn run(mut self) -> WorkerExit {
        trace!("{} worker {} started", R::KIND, self.index);
        let idle_timeout = self.ctx.idle_timeout;
        let mut idle_since = Instant::now();

        loop {
            if self.ctx.shutdown.is_triggered() {
                trace!("{} worker {} observed shutdown", R::KIND, self.index);
                return self.terminate(WorkerExit::Shutdown);
            }

            let deadline = idle_deadline(idle_since, idle_timeout);
            let entry = match self.queue.dequeue_until(deadline, &self.ctx.shutdown).await {
                Ok(entry) => entry,
                Err(e) => return self.fail(e).await,
            };

            let Some(entry) = entry else {
                if !self.ctx.shutdown.is_triggered() && idle_since.elapsed() >= idle_timeout {
                    info!(
                        "{} worker {} idle for {:?}, exiting",
                        R::KIND,
                        self.index,
                        idle_since.elapsed()
                    );
                    return self.terminate(WorkerExit::IdleTimeout);
                }
                continue;
            };

            self.set_status(WorkerStatus::Working);
            if let Err(e) = self.process(entry).await {
                return self.fail(e).await;
            }
            self.set_status(WorkerStatus::Idle);
            idle_since = Instant::now();
        }
    }

    async fn process(&self, entry: QueueEntry) -> Result<(), CrawlError> {
        let kind = R::KIND;
        debug!(
            "{} worker {} processing {} {} (queued {} ms)",
            kind,
            self.index,
            kind,
            entry.id,
            entry.wait_ms()
        );

        let record = match R::fetch(&self.ctx.fetcher, &entry.id).await {
            Ok(record) => record,
            Err(e @ CrawlError::MissingField { .. }) => {
                warn!("Skipping record: {}", e);
                self.ctx.stats.increment_skipped(kind);
                return Ok(());
            }
            Err(e @ CrawlError::TransientFetch { .. }) => {
                warn!("Fetch failed: {}", e);
                self.ctx.stats.increment_fetch_failed(kind);
                return self.handle_failed(&entry).await;
            }
            Err(e @ CrawlError::CallBudgetExceeded { .. }) => {
                // Never attempted; keep it for a resumed run.
                self.queue.restore(entry).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let id = record.id().clone();
        let neighbors = record.neighbors();
        if self.store.insert_if_absent(record).await? {
            self.ctx.stats.increment_processed(kind);
        } else {
            debug!("{} {} was already stored by another worker", kind, id);
            self.ctx.stats.increment_duplicates(kind);
        }
        self.queue.note_stored(&id);

        let neighbor_kind = kind.opposite();
        let mut added = 0;
        for neighbor in neighbors {
            if self.neighbors.enqueue(neighbor).await? {
                self.ctx.stats.increment_enqueued(neighbor_kind);
                added += 1;
            }
        }
        trace!("{} {} discovered {} new {} ids", kind, id, added, neighbor_kind);
        Ok(())
    }

    async fn handle_failed(&self, entry: &QueueEntry) -> Result<(), CrawlError> {
        let kind = R::KIND;
        let policy = self.ctx.fetcher.policy();
        if policy.requeue && entry.attempts < policy.max_requeues {
            if self.queue.requeue(entry).await? {
                debug!("Requeued {} {} (attempt {})", kind, entry.id, entry.attempts + 1);
                self.ctx.stats.increment_requeued(kind);
            }
        } else {
            warn!("Dropping {} {} after {} requeues", kind, entry.id, entry.attempts);
            self.ctx.stats.increment_dropped(kind);
        }
        Ok(())
    }

    async fn fail(mut self, e: CrawlError) -> WorkerExit {
        let kind = R::KIND;
        let worker = self.index;
        let event = match e {
            CrawlError::CallBudgetExceeded { .. } => {
                info!("{} worker {} stopping: {}", kind, worker, e);
                WorkerEvent::BudgetExhausted { kind, worker }
            }
            other => {
                error!("{} worker {} stopping on fatal error: {}", kind, worker, other);
                WorkerEvent::StoreUnavailable {
                    kind,
                    worker,
                    message: other.to_string(),
                }
            }
        };
        if self.ctx.events.send(event).await.is_err() {
            debug!("Supervisor event channel closed");
        }
        self.set_status(WorkerStatus::Terminated);
        WorkerExit::Fatal
    }

    fn terminate(mut self, exit: WorkerExit) -> WorkerExit {
        self.set_status(WorkerStatus::Terminated);
        exit
    }

    fn set_status(&mut self, status: WorkerStatus) {
        if self.status == WorkerStatus::Terminated {
            return;
        }
        self.ctx.state.transition(R::KIND, self.status, status);
        self.status = status;
    }
}

fn idle_deadline(idle_since: Instant, idle_timeout: Duration) -> Instant {
    idle_since
        .checked_add(idle_timeout)
        .unwrap_or_else(|| idle_since + Duration::from_secs(86400 * 365 * 30))
}
