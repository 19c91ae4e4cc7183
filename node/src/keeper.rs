//! # Keeper
//!
//! Drives the engine's bounded catch-up loops to convergence. Each wake-up
//! runs sync rounds until every cursor reports `caught_up` or the per-tick
//! round budget is spent, dropping the write lock between rounds so queries
//! are never starved. Snapshots go to `<data_dir>/engine.snapshot` on their
//! own interval and once more at shutdown.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use velock_contracts::{Engine, EngineResult, SyncReport};
use velock_protocol::{BlockContext, Timestamp};

use crate::metrics::SharedMetrics;

/// File name of the engine snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "engine.snapshot";

/// The engine as shared between the keeper and the API.
pub type SharedEngine = Arc<RwLock<Engine>>;

/// Source of "now" in unix seconds.
pub type Clock = fn() -> Timestamp;

/// Current unix time from the system clock.
pub fn wall_clock() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// The context for the next engine mutation. Never earlier than the last
/// one, and one block higher.
pub fn next_context(last: BlockContext, now: Timestamp) -> BlockContext {
    BlockContext::new(now.max(last.timestamp), last.height + 1)
}

/// What one keeper tick accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub rounds: u32,
    pub steps: u64,
    pub caught_up: bool,
}

pub struct Keeper {
    engine: SharedEngine,
    metrics: SharedMetrics,
    clock: Clock,
    max_rounds: u32,
}

impl Keeper {
    pub fn new(engine: SharedEngine, metrics: SharedMetrics, max_rounds: u32) -> Self {
        Self {
            engine,
            metrics,
            clock: wall_clock,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Replaces the wall clock.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// One sync round under the write lock, with metrics.
    pub fn round(&self) -> EngineResult<SyncReport> {
        let now = self.now();
        let mut engine = self.engine.write();
        let ctx = next_context(engine.last_ctx(), now);
        let started = Instant::now();
        match engine.sync(ctx) {
            Ok(report) => {
                self.metrics
                    .observe_round(&report, started.elapsed().as_secs_f64());
                self.metrics.observe_status(&engine.status(ctx.timestamp));
                Ok(report)
            }
            Err(e) => {
                self.metrics.keeper_errors_total.inc();
                Err(e)
            }
        }
    }

    /// Runs rounds until caught up or out of budget.
    pub async fn tick(&self) -> EngineResult<TickOutcome> {
        let mut outcome = TickOutcome::default();
        while outcome.rounds < self.max_rounds {
            let report = self.round()?;
            outcome.rounds += 1;
            outcome.steps += report.steps();
            if report.caught_up() {
                outcome.caught_up = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        if outcome.caught_up {
            tracing::debug!(rounds = outcome.rounds, steps = outcome.steps, "keeper caught up");
        } else {
            tracing::warn!(
                rounds = outcome.rounds,
                steps = outcome.steps,
                "keeper round budget spent before catching up"
            );
        }
        Ok(outcome)
    }

    /// Writes the current engine state to `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.engine.read().snapshot()?;
        write_snapshot(path, &bytes)?;
        self.metrics.snapshots_written_total.inc();
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    /// Ticks every `interval` and snapshots every `snapshot_interval` until
    /// `shutdown` flips, then writes a final snapshot.
    pub async fn run(
        self,
        interval: Duration,
        snapshot_interval: Duration,
        snapshot_path: PathBuf,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut keeper_timer = tokio::time::interval(interval);
        let mut snapshot_timer = tokio::time::interval(snapshot_interval);
        snapshot_timer.tick().await;

        loop {
            tokio::select! {
                _ = keeper_timer.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, kind = ?e.kind(), "keeper round failed");
                    }
                }
                _ = snapshot_timer.tick() => {
                    if let Err(e) = self.persist(&snapshot_path) {
                        tracing::error!("snapshot failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.persist(&snapshot_path)
            .context("failed to write final snapshot")?;
        tracing::info!(path = %snapshot_path.display(), "keeper stopped, final snapshot written");
        Ok(())
    }
}

/// Writes through a temporary file and a rename, so a crash mid-write
/// leaves the previous snapshot intact.
pub fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("snapshot.tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move snapshot into {}", path.display()))?;
    Ok(())
}

/// Reads a snapshot, or `None` if there is no file.
pub fn load_snapshot(path: &Path) -> Result<Option<Engine>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let engine = Engine::restore(&bytes)
        .with_context(|| format!("failed to restore engine from {}", path.display()))?;
    Ok(Some(engine))
}
