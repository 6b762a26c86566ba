//! Periodic cleanup task for Duelhall.
//!
//! Persistent state and live sessions can drift apart: a server restarts
//! with rooms still `in_progress`, a player opens a room and walks away,
//! a session goes quiet without either side closing it. The sweeper
//! reconciles them on a fixed interval.
//!
//! The crate knows nothing about rooms. It runs a [`SweepJob`] every
//! `interval` on its own Tokio task, records [`SweepMetrics`], and
//! reports failures on an error channel instead of crashing: a failed
//! sweep is logged, published, and simply tried again on the next tick.
//!
//! # Usage
//!
//! ```ignore
//! let handle = Sweeper::spawn(job, SweeperConfig::every(Duration::from_secs(60)));
//! let mut errors = handle.errors();
//! tokio::spawn(async move {
//!     while let Ok(e) = errors.recv().await {
//!         alert(e);
//!     }
//! });
//! // ...
//! handle.stop().await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use duelhall_protocol::ErrorKind;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sweeper settings.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between the end of one sweep and the start of the next.
    pub interval: Duration,
    /// Random delay (0..max) added before the *first* sweep, so replicas
    /// started together do not sweep in lockstep.
    pub initial_jitter: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_jitter: Duration::from_secs(5),
        }
    }
}

impl SweeperConfig {
    /// Sweeps every `interval`, without start-up jitter.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            initial_jitter: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Job contract
// ---------------------------------------------------------------------------

/// What one sweep accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Open rooms deleted for age.
    pub purged_stale: usize,
    /// Matched or in-progress rooms expired for lack of a live session.
    pub expired_orphaned: usize,
    /// Finished or expired rooms deleted after retention.
    pub purged_closed: usize,
    /// Live sessions closed for inactivity.
    pub reaped_idle: usize,
    /// Ended games whose rooms were marked finished on a later pass,
    /// after the store refused the first attempt.
    pub finished_late: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.purged_stale
            + self.expired_orphaned
            + self.purged_closed
            + self.reaped_idle
            + self.finished_late
    }
}

/// A failed sweep step.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sweep step `{step}` failed ({kind}): {message}")]
pub struct SweepError {
    /// Which step failed, e.g. `"expire_orphaned"`.
    pub step: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl SweepError {
    pub fn new(step: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn stopped() -> Self {
        Self::new("trigger", ErrorKind::Transient, "sweeper is not running")
    }
}

/// The work the sweeper repeats.
pub trait SweepJob: Send + Sync + 'static {
    fn sweep(&self) -> impl Future<Output = Result<SweepReport, SweepError>> + Send;
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics, updated after every sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepMetrics {
    /// Sweeps run, successful or not.
    pub total_sweeps: u64,
    pub total_failures: u64,
    /// Failures since the last successful sweep.
    pub consecutive_failures: u64,
    /// Exponential moving average of sweep duration (α = 0.1).
    pub avg_duration: Duration,
    pub max_duration: Duration,
    pub last_report: Option<SweepReport>,
}

impl SweepMetrics {
    fn record(&mut self, elapsed: Duration, outcome: &Result<SweepReport, SweepError>) {
        self.total_sweeps += 1;
        match outcome {
            Ok(report) => {
                self.consecutive_failures = 0;
                self.last_report = Some(*report);
            }
            Err(_) => {
                self.total_failures += 1;
                self.consecutive_failures += 1;
            }
        }
        if elapsed > self.max_duration {
            self.max_duration = elapsed;
        }
        let alpha = 0.1;
        let prev = self.avg_duration.as_secs_f64();
        self.avg_duration =
            Duration::from_secs_f64(prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha);
    }
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

type Reply = oneshot::Sender<Result<SweepReport, SweepError>>;

/// Spawns sweeper tasks.
pub struct Sweeper;

impl Sweeper {
    /// Starts running `job` on its own task.
    ///
    /// The task runs until [`SweeperHandle::stop`] is called or the
    /// handle is dropped.
    pub fn spawn<J: SweepJob>(job: J, config: SweeperConfig) -> SweeperHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (errors_tx, _) = broadcast::channel(64);
        let (metrics_tx, metrics_rx) = watch::channel(SweepMetrics::default());

        let worker = Worker {
            job: Arc::new(job),
            config,
            errors: errors_tx.clone(),
            metrics: metrics_tx,
        };
        let task = tokio::spawn(worker.run(stop_rx, trigger_rx));

        SweeperHandle {
            stop: Some(stop_tx),
            trigger: trigger_tx,
            errors: errors_tx,
            metrics: metrics_rx,
            task: Some(task),
        }
    }
}

struct Worker<J> {
    job: Arc<J>,
    config: SweeperConfig,
    errors: broadcast::Sender<SweepError>,
    metrics: watch::Sender<SweepMetrics>,
}

impl<J: SweepJob> Worker<J> {
    async fn run(self, mut stop: oneshot::Receiver<()>, mut trigger: mpsc::Receiver<Reply>) {
        let mut next = Instant::now() + self.config.interval + self.jitter();
        debug!(interval = ?self.config.interval, "sweeper started");

        loop {
            tokio::select! {
                // Fires on an explicit stop and when the handle is dropped.
                _ = &mut stop => break,
                Some(reply) = trigger.recv() => {
                    let outcome = self.sweep_once().await;
                    let _ = reply.send(outcome);
                }
                _ = time::sleep_until(next) => {
                    // Already logged and counted in the metrics.
                    let _ = self.sweep_once().await;
                    // Schedule from now, so a slow sweep never causes a burst.
                    next = Instant::now() + self.config.interval;
                }
            }
        }

        debug!("sweeper stopped");
    }

    async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let started = Instant::now();
        let outcome = self.job.sweep().await;
        let elapsed = started.elapsed();

        let mut failures = 0;
        self.metrics.send_modify(|m| {
            m.record(elapsed, &outcome);
            failures = m.consecutive_failures;
        });

        match &outcome {
            Ok(report) if report.total() > 0 => {
                info!(
                    purged_stale = report.purged_stale,
                    expired_orphaned = report.expired_orphaned,
                    purged_closed = report.purged_closed,
                    reaped_idle = report.reaped_idle,
                    finished_late = report.finished_late,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "sweep complete"
                );
            }
            Ok(_) => debug!("sweep complete, nothing to do"),
            Err(e) => {
                warn!(
                    step = e.step,
                    kind = %e.kind,
                    consecutive_failures = failures,
                    error = %e.message,
                    "sweep failed, retrying next interval"
                );
                // No subscribers is fine.
                let _ = self.errors.send(e.clone());
            }
        }
        outcome
    }

    fn jitter(&self) -> Duration {
        let max = self.config.initial_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max))
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Controls a running sweeper. Dropping it stops the sweeper.
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<Reply>,
    errors: broadcast::Sender<SweepError>,
    metrics: watch::Receiver<SweepMetrics>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Subscribes to sweep failures from now on.
    pub fn errors(&self) -> broadcast::Receiver<SweepError> {
        self.errors.subscribe()
    }

    /// Runs a sweep right away and waits for its outcome. The periodic
    /// schedule is unaffected.
    pub async fn sweep_now(&self) -> Result<SweepReport, SweepError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger
            .send(reply_tx)
            .await
            .map_err(|_| SweepError::stopped())?;
        reply_rx.await.map_err(|_| SweepError::stopped())?
    }

    /// Snapshot of the current metrics.
    pub fn metrics(&self) -> SweepMetrics {
        self.metrics.borrow().clone()
    }

    /// Returns `true` while the sweeper task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the sweeper and waits for an in-flight sweep to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "sweeper task ended abnormally");
            }
        }
        info!("sweeper stopped");
    }
}
