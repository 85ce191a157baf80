//! Periodic re-execution of a check with explicit start/stop.

use crate::utils::{NetworkError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One check-compare-notify cycle.
#[async_trait]
pub trait MonitorCheck: Send + Sync + 'static {
    fn name(&self) -> String;

    async fn run_check(&self, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Another cycle was still running.
    Skipped,
}

enum State {
    Stopped,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
}

/// Runs a [`MonitorCheck`] immediately on `start()` and then on every
/// interval tick until `stop()`.
///
/// Dropping the monitor does not stop the loop.
pub struct PeriodicMonitor<C> {
    check: Arc<C>,
    interval: Duration,
    in_flight: Arc<Mutex<()>>,
    state: State,
}

async fn run_guarded<C: MonitorCheck>(
    check: &C,
    in_flight: &Mutex<()>,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let Ok(_guard) = in_flight.try_lock() else {
        log::debug!("{}: previous run still in flight, skipping", check.name());
        return Ok(RunOutcome::Skipped);
    };
    check.run_check(cancel).await?;
    Ok(RunOutcome::Completed)
}

impl<C: MonitorCheck> PeriodicMonitor<C> {
    pub fn new(check: C, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(NetworkError::Configuration("monitor interval must be positive".to_string()));
        }
        Ok(Self {
            check: Arc::new(check),
            interval,
            in_flight: Arc::new(Mutex::new(())),
            state: State::Stopped,
        })
    }

    pub fn check(&self) -> &C {
        &self.check
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Starts the loop, restarting it if already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&mut self) {
        self.stop();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let check = Arc::clone(&self.check);
        let in_flight = Arc::clone(&self.in_flight);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match run_guarded(check.as_ref(), &in_flight, &token).await {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => log::warn!("{} failed: {}", check.name(), e),
                }
            }
            log::debug!("{} loop exited", check.name());
        });

        log::info!("{} started, interval {:?}", self.check.name(), interval);
        self.state = State::Running { cancel, handle };
    }

    /// Stops the loop; does nothing when already stopped.
    pub fn stop(&mut self) {
        if let State::Running { cancel, handle } = std::mem::replace(&mut self.state, State::Stopped) {
            cancel.cancel();
            handle.abort();
            log::info!("{} stopped", self.check.name());
        }
    }

    /// Runs a single cycle now. Returns [`RunOutcome::Skipped`] without
    /// running anything if another cycle is in progress.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        run_guarded(self.check.as_ref(), &self.in_flight, cancel).await
    }
}
