use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::db::{Ledger, Repository};
use crate::error::{AppError, Result};
use crate::lock::CycleLock;
use crate::models::{RunStatus, RunSummary};

use super::Orchestrator;

/// Drives the orchestrator on a fixed interval and owns process lifetime:
/// signal handling, the cycle lock discipline, and the whole-cycle safety
/// timeout. At most one cycle is ever in flight.
pub struct Scheduler {
    orchestrator: Orchestrator,
    repo: Arc<Repository>,
    ledger: Arc<Ledger>,
    lock: CycleLock,
    interval: Duration,
    cycle_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        orchestrator: Orchestrator,
        repo: Arc<Repository>,
        ledger: Arc<Ledger>,
        lock_path: &str,
        interval_hours: u32,
    ) -> Self {
        let interval = Duration::from_secs(u64::from(interval_hours) * 3600);
        // A lock older than twice the interval is always stale, whatever
        // the liveness probe claims.
        let lock = CycleLock::new(lock_path, interval * 2);
        Self {
            orchestrator,
            repo,
            ledger,
            lock,
            interval,
            cycle_timeout: interval * 2,
        }
    }

    /// Override the whole-cycle cutover, which otherwise tracks twice the
    /// interval.
    #[allow(dead_code)]
    pub fn with_cycle_timeout(mut self, cycle_timeout: Duration) -> Self {
        self.cycle_timeout = cycle_timeout;
        self
    }

    /// Timer loop. The first tick fires immediately; a tick that finds the
    /// lock busy is skipped, not queued. Runs until a shutdown signal.
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        spawn_signal_listener(shutdown_tx);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle_now(shutdown_rx.clone()).await {
                        Ok(_) | Err(AppError::LockBusy) => {}
                        Err(e) => tracing::error!(error = %e, "ingestion cycle failed"),
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("scheduler shut down");
        Ok(())
    }

    /// One on-demand cycle under the same lock discipline as a scheduled
    /// tick. `AppError::LockBusy` means another cycle is in flight; that
    /// is a normal skip.
    pub async fn run_cycle_now(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(RunStatus, RunSummary)> {
        let run_id = Ledger::new_run_id();

        match self.lock.acquire(&run_id) {
            Ok(_) => {}
            Err(AppError::LockBusy) => {
                tracing::info!("another cycle is running, skipping this tick");
                return Err(AppError::LockBusy);
            }
            Err(e) => return Err(e),
        }

        let result = self.locked_cycle(&run_id, shutdown).await;

        // The lock is released on every path, including fatal errors.
        if let Err(e) = self.lock.release(&run_id) {
            tracing::error!(run_id = %run_id, error = %e, "failed to release cycle lock");
        }
        result
    }

    async fn locked_cycle(
        &self,
        run_id: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(RunStatus, RunSummary)> {
        self.ledger.begin_run(run_id).await?;
        let start = Instant::now();

        let sources = match self.repo.get_active_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                self.finalize(run_id, RunStatus::Failed, &RunSummary::default(), start, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        // Safety cutover: a wedged cycle must not hold the lock forever.
        let cycle = self
            .orchestrator
            .run_cycle(run_id, sources, shutdown.clone());
        match tokio::time::timeout(self.cycle_timeout, cycle).await {
            Ok(Ok((status, summary))) => {
                let error = match status {
                    RunStatus::Aborted => Some("graceful shutdown requested".to_string()),
                    _ => None,
                };
                self.finalize(run_id, status, &summary, start, error).await;
                Ok((status, summary))
            }
            Ok(Err(e)) => {
                self.finalize(run_id, RunStatus::Failed, &RunSummary::default(), start, Some(e.to_string()))
                    .await;
                Err(e)
            }
            Err(_) => {
                let message = format!(
                    "cycle exceeded maximum duration of {}s",
                    self.cycle_timeout.as_secs()
                );
                tracing::error!(run_id = %run_id, "{message}");
                self.finalize(
                    run_id,
                    RunStatus::Failed,
                    &RunSummary::default(),
                    start,
                    Some(message.clone()),
                )
                .await;
                Err(AppError::Other(anyhow::anyhow!(message)))
            }
        }
    }

    /// Finalization is best-effort on error paths: if the ledger itself is
    /// unreachable there is nothing left to record to.
    async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: &RunSummary,
        start: Instant,
        error: Option<String>,
    ) {
        let duration = start.elapsed().as_secs() as i64;
        if let Err(e) = self
            .ledger
            .finalize_run(run_id, status, summary, duration, error)
            .await
        {
            tracing::error!(run_id = %run_id, error = %e, "failed to finalize run");
        }
    }
}

#[cfg(unix)]
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });
}
