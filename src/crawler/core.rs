//! The crawl supervisor.
//!
//! This module defines `CrawlSupervisor`, the central orchestrator of a run.
//! It seeds the user queue, spawns the user and item worker pools, and then
//! watches for the first of:
//!
//! - every worker exiting on its idle timeout (frontier exhausted)
//! - the call budget running out
//! - the run duration elapsing
//! - a fatal store failure reported by a worker
//! - Ctrl-C
//!
//! Once a stop condition is seen it signals shutdown, gives in-flight work a
//! bounded grace period, writes a final checkpoint when configured, and
//! returns a `CrawlReport`.

use super::worker::{spawn_worker_pool, WorkerContext, WorkerEvent, WorkerResult};
use crate::builder::CrawlConfig;
use crate::client::Fetcher;
use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::record::{EntityId, EntityKind, ItemRecord, UserRecord};
use crate::shutdown::{Shutdown, StopReason};
use crate::state::CrawlerState;
use crate::stats::{StatCollector, StatsSnapshot};
use kanal::bounded_async;
use serde::Serialize;
use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "checkpoint")]
use crate::checkpoint::save_checkpoint;
#[cfg(feature = "checkpoint")]
use std::path::PathBuf;

const BUDGET_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Summary of a finished crawl.
#[derive(Clone, Debug, Serialize)]
pub struct CrawlReport {
    pub users_processed: usize,
    pub items_processed: usize,
    pub calls_made: usize,
    pub stop_reason: StopReason,
    /// Ids still waiting in each queue when the run ended.
    pub users_pending: usize,
    pub items_pending: usize,
    pub stats: StatsSnapshot,
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stopped ({}): {} users and {} items processed with {} calls, {} users and {} items pending",
            self.stop_reason,
            self.users_processed,
            self.items_processed,
            self.calls_made,
            self.users_pending,
            self.items_pending
        )
    }
}

/// The central orchestrator of a crawl: owns both worker pools and decides
/// when the run is over.
pub struct CrawlSupervisor {
    config: CrawlConfig,
    frontier: Frontier,
    fetcher: Arc<Fetcher>,
    stats: Arc<StatCollector>,
    state: Arc<CrawlerState>,
    shutdown: Arc<Shutdown>,
    seeds: Vec<EntityId>,
    reseed: bool,
    #[cfg(feature = "checkpoint")]
    checkpoint_path: Option<PathBuf>,
    #[cfg(feature = "checkpoint")]
    checkpoint_interval: Option<Duration>,
}

impl CrawlSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: CrawlConfig,
        frontier: Frontier,
        fetcher: Arc<Fetcher>,
        stats: Arc<StatCollector>,
        seeds: Vec<EntityId>,
        reseed: bool,
        #[cfg(feature = "checkpoint")] checkpoint_path: Option<PathBuf>,
        #[cfg(feature = "checkpoint")] checkpoint_interval: Option<Duration>,
    ) -> Self {
        CrawlSupervisor {
            config,
            frontier,
            fetcher,
            stats,
            state: CrawlerState::new(),
            shutdown: Arc::new(Shutdown::new()),
            seeds,
            reseed,
            #[cfg(feature = "checkpoint")]
            checkpoint_path,
            #[cfg(feature = "checkpoint")]
            checkpoint_interval,
        }
    }

    /// Runs the crawl to completion.
    ///
    /// Errors are only returned for failures before the worker pools start
    /// (seeding, reseeding). Once running, every stop condition, including a
    /// store failure, ends in a `CrawlReport`.
    pub async fn start_crawl(self) -> Result<CrawlReport, CrawlError> {
        let config = &self.config;
        info!(
            "Crawl starting: user_workers={}, item_workers={}, call_budget={}, max_jitter={:?}, idle_timeout={:?}, run_duration={:?}",
            config.user_workers,
            config.item_workers,
            config.call_budget,
            self.fetcher.limiter().max_jitter(),
            config.idle_timeout,
            config.run_duration
        );

        let seeded = self.frontier.seed_users(self.seeds.iter().cloned()).await?;
        debug!("Seeded {} of {} user ids", seeded, self.seeds.len());
        if self.reseed {
            self.frontier.reseed_from_records().await?;
        }

        let channel_capacity = (config.user_workers + config.item_workers).max(16);
        trace!("Creating worker event channel with capacity {}", channel_capacity);
        let (event_tx, event_rx) = bounded_async::<WorkerEvent>(channel_capacity);

        let ctx = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            stats: Arc::clone(&self.stats),
            state: Arc::clone(&self.state),
            shutdown: Arc::clone(&self.shutdown),
            events: event_tx,
            idle_timeout: config.idle_timeout,
        });

        let mut workers: JoinSet<WorkerResult> = JoinSet::new();
        spawn_worker_pool::<UserRecord>(
            &mut workers,
            config.user_workers,
            Arc::clone(&self.frontier.users),
            Arc::clone(&self.frontier.user_records),
            Arc::clone(&self.frontier.items),
            Arc::clone(&ctx),
        );
        spawn_worker_pool::<ItemRecord>(
            &mut workers,
            config.item_workers,
            Arc::clone(&self.frontier.items),
            Arc::clone(&self.frontier.item_records),
            Arc::clone(&self.frontier.users),
            Arc::clone(&ctx),
        );
        // Workers hold the only senders from here on.
        drop(ctx);

        #[cfg(feature = "checkpoint")]
        let checkpoint_task = self.spawn_checkpoint_task();

        let limiter = Arc::clone(self.fetcher.limiter());
        let run_deadline = Instant::now().checked_add(config.run_duration);
        let mut progress = interval(config.progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        progress.tick().await;
        let mut budget_check = interval(BUDGET_CHECK_INTERVAL);
        budget_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;
        let mut ctrl_c_enabled = true;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(result) => log_worker_exit(result),
                    None => {
                        info!("All workers have exited, frontier exhausted.");
                        break;
                    }
                },
                event = event_rx.recv(), if events_open => match event {
                    Ok(WorkerEvent::BudgetExhausted { kind, worker }) => {
                        info!("{} worker {} reported the call budget exhausted", kind, worker);
                        self.shutdown.trigger(StopReason::CallBudgetExhausted);
                    }
                    Ok(WorkerEvent::StoreUnavailable { kind, worker, message }) => {
                        error!("{} worker {} lost its store: {}", kind, worker, message);
                        self.shutdown.trigger(StopReason::StoreUnavailable(message));
                    }
                    Err(_) => events_open = false,
                },
                _ = budget_check.tick() => {
                    if limiter.is_exhausted() {
                        info!("Call budget of {} exhausted, initiating shutdown.", limiter.call_budget());
                        self.shutdown.trigger(StopReason::CallBudgetExhausted);
                    }
                },
                _ = self.shutdown.wait() => {
                    debug!("Shutdown requested from outside the supervisor");
                },
                _ = progress.tick() => self.log_progress().await,
                _ = wait_for_deadline(run_deadline) => {
                    info!("Run duration of {:?} elapsed, initiating shutdown.", config.run_duration);
                    self.shutdown.trigger(StopReason::RunDurationElapsed);
                },
                res = tokio::signal::ctrl_c(), if ctrl_c_enabled => match res {
                    Ok(()) => {
                        info!("Ctrl-C received, initiating graceful shutdown.");
                        self.shutdown.trigger(StopReason::Interrupted);
                    }
                    Err(e) => {
                        warn!("Unable to listen for Ctrl-C: {}", e);
                        ctrl_c_enabled = false;
                    }
                },
            }

            if self.shutdown.is_triggered() {
                break;
            }
        }

        self.drain(&mut workers).await;

        #[cfg(feature = "checkpoint")]
        {
            if let Some(task) = checkpoint_task {
                task.abort();
            }
            if let Some(path) = &self.checkpoint_path {
                debug!("Creating final checkpoint at {:?}", path);
                match save_checkpoint(path, &self.frontier).await {
                    Ok(()) => info!("Final checkpoint saved successfully to {:?}", path),
                    Err(e) => error!("Final checkpoint save failed: {}", e),
                }
            }
        }

        let stop_reason = match self.shutdown.reason() {
            Some(reason) => reason,
            None if limiter.is_exhausted() => StopReason::CallBudgetExhausted,
            None => StopReason::FrontierExhausted,
        };

        let snapshot = self.stats.snapshot();
        let report = CrawlReport {
            users_processed: snapshot.users.processed,
            items_processed: snapshot.items.processed,
            calls_made: limiter.calls_made(),
            stop_reason,
            users_pending: self.frontier.users.len().await.unwrap_or_default(),
            items_pending: self.frontier.items.len().await.unwrap_or_default(),
            stats: snapshot,
        };
        info!("Crawl finished: {}", report);
        debug!("{}", self.stats);
        Ok(report)
    }

    /// Signals shutdown and waits up to the grace period for workers to exit.
    async fn drain(&self, workers: &mut JoinSet<WorkerResult>) {
        if !self.shutdown.is_triggered() && workers.is_empty() {
            return;
        }
        self.shutdown.trigger(StopReason::FrontierExhausted);

        let grace = self.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = workers.join_next().await {
                log_worker_exit(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Workers did not finish within {:?}, aborting {} remaining",
                grace,
                workers.len()
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        } else {
            trace!("All workers completed during shutdown");
        }
    }

    async fn log_progress(&self) {
        let snapshot = self.stats.snapshot();
        let users = self.state.counts(EntityKind::User);
        let items = self.state.counts(EntityKind::Item);
        if self.state.is_idle() {
            debug!("No worker is processing an entry");
        }
        info!(
            "Progress after {:?}: {} users and {} items stored, {} calls made; queued {} users, {} items; workers working {}/{}, idle {}/{}, done {}/{}",
            snapshot.elapsed,
            snapshot.users.processed,
            snapshot.items.processed,
            snapshot.calls_made,
            self.frontier.users.len().await.unwrap_or_default(),
            self.frontier.items.len().await.unwrap_or_default(),
            users.working,
            items.working,
            users.idle,
            items.idle,
            users.terminated,
            items.terminated,
        );
    }

    #[cfg(feature = "checkpoint")]
    fn spawn_checkpoint_task(&self) -> Option<tokio::task::JoinHandle<()>> {
        let (Some(path), Some(every)) = (self.checkpoint_path.clone(), self.checkpoint_interval)
        else {
            return None;
        };
        let frontier = self.frontier.clone();
        let shutdown = Arc::clone(&self.shutdown);

        trace!("Starting periodic checkpoint task with interval: {:?}", every);
        Some(tokio::spawn(async move {
            let mut timer = interval(every);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = save_checkpoint(&path, &frontier).await {
                            error!("Periodic checkpoint save failed: {}", e);
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }
        }))
    }

    /// Returns the shared statistics, readable while the crawl runs.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Returns the shutdown signal; triggering it stops the crawl.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }
}

fn log_worker_exit(result: Result<WorkerResult, tokio::task::JoinError>) {
    match result {
        Ok((kind, index, exit)) => debug!("{} worker {} exited: {:?}", kind, index, exit),
        Err(e) if e.is_cancelled() => trace!("Worker task cancelled"),
        Err(e) => error!("Worker task failed: {}", e),
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
