//! Free-running telemetry sampler.
//!
//! One task polls the BMC and the agent every tick and appends whatever came
//! back. It knows nothing about trials; samples are attributed to trials later
//! by timestamp.

use crate::agent::AgentClient;
use crate::bmc::Bmc;
use crate::clock::RunClock;
use crate::errors::StoreError;
use crate::model::{BmcSample, RaplSample};
use crate::storage::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub ticks: u64,
    pub bmc_samples: u64,
    pub rapl_samples: u64,
    pub bmc_failures: u64,
    pub rapl_failures: u64,
}

pub struct Collector {
    bmc: Arc<dyn Bmc>,
    agent: Arc<dyn AgentClient>,
    store: Store,
    clock: RunClock,
    run_id: i64,
    state: Arc<Mutex<CollectorState>>,
}

/// Returned by [`Collector::start`]; the only way to stop the loop.
pub struct CollectorHandle {
    cancel: CancellationToken,
    failed: CancellationToken,
    state: Arc<Mutex<CollectorState>>,
    task: JoinHandle<Result<CollectorStats, StoreError>>,
}

impl Collector {
    pub fn new(
        bmc: Arc<dyn Bmc>,
        agent: Arc<dyn AgentClient>,
        store: Store,
        clock: RunClock,
        run_id: i64,
    ) -> Self {
        Self {
            bmc,
            agent,
            store,
            clock,
            run_id,
            state: Arc::new(Mutex::new(CollectorState::Idle)),
        }
    }

    pub fn state(&self) -> CollectorState {
        read_state(&self.state)
    }

    /// Spawns the sampling loop. The first tick fires immediately.
    pub fn start(self, interval: Duration) -> CollectorHandle {
        let cancel = CancellationToken::new();
        let failed = CancellationToken::new();
        let state = self.state.clone();
        set_state(&state, CollectorState::Running);
        tracing::info!(
            event = "collector.start",
            run_id = self.run_id,
            interval_ms = interval.as_millis() as u64
        );

        let token = cancel.clone();
        let guard = failed.clone().drop_guard();
        let task = tokio::spawn(async move {
            let res = self.run(interval, token).await;
            // only a clean stop disarms; an error or a panic trips `failed`
            if res.is_ok() {
                guard.disarm();
            }
            res
        });

        CollectorHandle {
            cancel,
            failed,
            state,
            task,
        }
    }

    async fn run(
        self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<CollectorStats, StoreError> {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        // Late ticks push the schedule back rather than bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = CollectorStats::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // A tick that has started runs to completion, stop or not.
            if let Err(e) = self.tick(&mut stats).await {
                tracing::error!(
                    event = "collector.store_failed",
                    run_id = self.run_id,
                    error = %e
                );
                set_state(&self.state, CollectorState::Stopped);
                return Err(e);
            }
        }

        set_state(&self.state, CollectorState::Stopped);
        tracing::info!(
            event = "collector.stopped",
            run_id = self.run_id,
            ticks = stats.ticks,
            bmc_samples = stats.bmc_samples,
            rapl_samples = stats.rapl_samples
        );
        Ok(stats)
    }

    async fn tick(&self, stats: &mut CollectorStats) -> Result<(), StoreError> {
        stats.ticks += 1;
        let bmc_read = async {
            let (power, cap) = self.bmc.read_power_and_cap().await;
            let ts = self.clock.now();
            (ts, power, cap)
        };
        let rapl_read = async {
            let res = self.agent.rapl_power().await;
            (self.clock.now(), res)
        };
        let ((bmc_ts, power, cap), (rapl_ts, rapl)) = tokio::join!(bmc_read, rapl_read);

        let bmc_row = match (power, cap) {
            (Ok(power_watts), Ok(cap_level)) => Some(BmcSample {
                timestamp: bmc_ts,
                power_watts,
                cap_level,
            }),
            (Ok(power_watts), Err(e)) => {
                // The power reading is still worth keeping.
                tracing::warn!(event = "collector.bmc_cap_failed", error = %e);
                Some(BmcSample {
                    timestamp: bmc_ts,
                    power_watts,
                    cap_level: None,
                })
            }
            (Err(e), _) => {
                stats.bmc_failures += 1;
                tracing::warn!(event = "collector.bmc_poll_failed", error = %e);
                None
            }
        };

        let rapl_rows: Vec<RaplSample> = match rapl {
            Ok(readings) => readings
                .into_iter()
                .map(|r| RaplSample {
                    timestamp: rapl_ts,
                    package_id: r.package_id,
                    power_watts: r.power_watts,
                })
                .collect(),
            Err(e) => {
                stats.rapl_failures += 1;
                tracing::warn!(event = "collector.rapl_poll_failed", error = %e);
                Vec::new()
            }
        };

        self.store
            .insert_tick(self.run_id, bmc_row.as_ref(), &rapl_rows)?;
        stats.bmc_samples += u64::from(bmc_row.is_some());
        stats.rapl_samples += rapl_rows.len() as u64;
        Ok(())
    }
}

impl CollectorHandle {
    pub fn state(&self) -> CollectorState {
        read_state(&self.state)
    }

    /// Cancelled as soon as the loop dies on a store failure or a panic.
    /// The error itself comes out of [`CollectorHandle::stop`].
    pub fn failure(&self) -> CancellationToken {
        self.failed.clone()
    }

    /// Asks the loop to stop and waits for the in-flight tick to be written.
    pub async fn stop(self) -> Result<CollectorStats, StoreError> {
        {
            let mut s = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *s == CollectorState::Running {
                *s = CollectorState::Stopping;
            }
        }
        self.cancel.cancel();
        match self.task.await {
            Ok(res) => res,
            Err(e) => {
                tracing::error!(event = "collector.join_failed", error = %e);
                set_state(&self.state, CollectorState::Stopped);
                Err(StoreError::CollectorTask(e.to_string()))
            }
        }
    }
}

fn read_state(state: &Mutex<CollectorState>) -> CollectorState {
    *state.lock().unwrap_or_else(|p| p.into_inner())
}

fn set_state(state: &Mutex<CollectorState>, next: CollectorState) {
    *state.lock().unwrap_or_else(|p| p.into_inner()) = next;
}
