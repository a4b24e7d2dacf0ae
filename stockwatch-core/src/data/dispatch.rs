//! Concurrent dispatcher.
//!
//! Runs one unit of work per symbol on a private, bounded rayon pool. Workers
//! never touch shared counters: each finished unit sends `(index, outcome)`
//! over an mpsc channel and the calling thread is the single consumer that
//! folds outcomes into a [`RunSummary`], drives progress and calls the
//! caller's hook. Anything the hook owns (the manifest) is therefore only ever
//! touched from one thread.
//!
//! Every `throttle_every` completions the consumer closes a pool-wide gate for
//! a jittered pause. Units that have not started yet wait at the gate; units
//! already in flight finish normally.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::fetch::{JitterRange, Outcome, Sleeper};
use super::provider::{DataError, DownloadProgress};
use super::summary::RunSummary;
use crate::domain::{Market, SymbolRecord};

/// Pool sizing and throttle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Close the gate after every this many completions; 0 disables throttling.
    pub throttle_every: usize,
    pub throttle_pause: JitterRange,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            throttle_every: 100,
            throttle_pause: JitterRange::millis(5_000, 10_000),
        }
    }
}

/// Pool-wide pause gate.
#[derive(Debug, Default)]
pub struct Throttle {
    resume_at: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Hold back new units for `pause` from now. Never shortens an existing pause.
    pub fn close_for(&self, pause: Duration) {
        let until = Instant::now() + pause;
        let mut resume_at = self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
        *resume_at = Some(match *resume_at {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Time left until the gate opens, if it is closed.
    pub fn remaining(&self) -> Option<Duration> {
        let resume_at = self.resume_at.lock().unwrap_or_else(|e| e.into_inner());
        resume_at
            .and_then(|t| t.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Block until the gate is open.
    pub fn wait(&self, sleeper: &dyn Sleeper) {
        if let Some(remaining) = self.remaining() {
            sleeper.sleep(remaining);
        }
    }
}

/// Bounded worker pool with a single aggregating consumer.
pub struct Dispatcher<'a> {
    config: DispatchConfig,
    sleeper: &'a dyn Sleeper,
    progress: &'a dyn DownloadProgress,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: DispatchConfig, sleeper: &'a dyn Sleeper, progress: &'a dyn DownloadProgress) -> Self {
        Self {
            config,
            sleeper,
            progress,
        }
    }

    /// Run `work` once per unit and return the aggregate.
    ///
    /// `on_outcome` is called on the calling thread, once per unit, in
    /// completion order. Returns only after every unit has been drained.
    pub fn run<W, H>(
        &self,
        market: Market,
        units: &[SymbolRecord],
        work: W,
        mut on_outcome: H,
    ) -> Result<RunSummary, DataError>
    where
        W: Fn(&SymbolRecord) -> Outcome + Sync,
        H: FnMut(&SymbolRecord, &Outcome),
    {
        let started = Instant::now();
        let total = units.len();
        let mut summary = RunSummary::new(market);
        self.progress.on_start(total);

        if total == 0 {
            self.progress.on_batch_complete(0, 0);
            return Ok(summary);
        }

        let workers = self.config.workers.clamp(1, total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{}-worker-{i}", market.code()))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build worker pool: {e}")))?;

        tracing::debug!(market = %market, workers, total, "dispatching");

        let throttle = Throttle::default();
        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
        let work = &work;
        let gate = &throttle;
        let sleeper = self.sleeper;

        pool.in_place_scope(|scope| {
            for (idx, unit) in units.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    gate.wait(sleeper);
                    let outcome = run_isolated(work, unit);
                    // The consumer outlives every sender; a send error is unreachable.
                    let _ = tx.send((idx, outcome));
                });
            }
            drop(tx);

            let mut rng = rand::thread_rng();
            for (completed, (idx, outcome)) in rx.iter().enumerate() {
                let completed = completed + 1;
                let unit = &units[idx];

                summary.record(&unit.ticker, &outcome);
                on_outcome(unit, &outcome);
                self.progress.on_complete(&unit.ticker, completed, total);

                let every = self.config.throttle_every;
                if every > 0 && completed % every == 0 && completed < total {
                    let pause = self.config.throttle_pause.sample(&mut rng);
                    tracing::info!(
                        market = %market,
                        completed,
                        pause_ms = pause.as_millis() as u64,
                        "throttling worker pool"
                    );
                    throttle.close_for(pause);
                }
            }
        });

        summary.elapsed = started.elapsed();
        self.progress.on_batch_complete(summary.total, total);
        Ok(summary)
    }
}

/// Run one unit, converting a panic into an `Error` outcome.
fn run_isolated<W>(work: &W, unit: &SymbolRecord) -> Outcome
where
    W: Fn(&SymbolRecord) -> Outcome,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work(unit))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(ticker = %unit.ticker, "worker panicked: {message}");
            Outcome::error(format!("worker panicked: {message}"))
        }
    }
}
