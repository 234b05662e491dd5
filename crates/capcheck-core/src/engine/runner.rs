use crate::agent::AgentClient;
use crate::bmc::control::CommandError;
use crate::bmc::{Bmc, CappingControl};
use crate::clock::RunClock;
use crate::collector::{Collector, CollectorStats};
use crate::config::{CapcheckConfig, TimingConfig};
use crate::engine::grid;
use crate::errors::{StoreError, TrialError};
use crate::model::{RunStatus, Trial};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub trial: Trial,
    pub test_id: i64,
    /// Set when the trial was marked invalid.
    pub error: Option<String>,
}

impl TrialOutcome {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trials: Vec<TrialOutcome>,
    pub collector: CollectorStats,
}

impl CampaignReport {
    pub fn invalid_trials(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_valid()).count()
    }
}

/// Drives the trial grid while a [`Collector`] samples in the background.
///
/// Commands go out strictly one at a time. A BMC or agent failure costs only
/// the trial it happened in; a store failure ends the run.
pub struct Sequencer {
    pub store: Store,
    pub bmc: Arc<dyn Bmc>,
    pub agent: Arc<dyn AgentClient>,
    pub timing: TimingConfig,
    pub uncapped_power: Option<u32>,
    pub clock: RunClock,
    pub cancel: CancellationToken,
}

impl Sequencer {
    pub fn new(
        store: Store,
        bmc: Arc<dyn Bmc>,
        agent: Arc<dyn AgentClient>,
        cfg: &CapcheckConfig,
    ) -> Self {
        Self {
            store,
            bmc,
            agent,
            timing: cfg.timing,
            uncapped_power: cfg.uncapped_power,
            clock: RunClock::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn run(&self, cfg: &CapcheckConfig) -> anyhow::Result<CampaignReport> {
        let trials = grid::expand(&cfg.campaign);

        if let Err(e) = self.bmc.connect().await {
            tracing::warn!(
                event = "bmc.connect_failed",
                bmc = self.bmc.kind().as_str(),
                error = %e,
                "continuing without a session"
            );
        }

        let started_at = self.clock.now();
        let run_id = self
            .store
            .create_run(&started_at, &serde_json::to_value(cfg)?)?;
        tracing::info!(
            event = "run.start",
            run_id,
            trials = trials.len(),
            bmc = self.bmc.kind().as_str()
        );

        let result = self.drive(run_id, started_at, &trials).await;

        if let Err(e) = self.bmc.disconnect().await {
            tracing::warn!(event = "bmc.disconnect_failed", error = %e);
        }
        result
    }

    async fn drive(
        &self,
        run_id: i64,
        started_at: DateTime<Utc>,
        trials: &[Trial],
    ) -> anyhow::Result<CampaignReport> {
        let mut fatal: Option<StoreError> = self.record_system_info().await.err();
        let mut outcomes = Vec::with_capacity(trials.len());

        let collector = Collector::new(
            self.bmc.clone(),
            self.agent.clone(),
            self.store.clone(),
            self.clock,
            run_id,
        )
        .start(Duration::from_millis(self.timing.sample_interval_ms));
        let fault = collector.failure();
        let control = CappingControl::new(self.bmc.clone(), self.store.clone(), self.clock, run_id);

        if fatal.is_none() {
            for (i, trial) in trials.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = collector_alive(&fault) {
                    fatal = Some(e);
                    break;
                }
                if i > 0 {
                    match self.wait(self.timing.inter_trial_pause_seconds, &fault).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            fatal = Some(e);
                            break;
                        }
                    }
                }
                match self.run_trial(&control, &fault, run_id, trial).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
            }
        }

        if fatal.is_none() {
            if let Some(watts) = self.uncapped_power {
                fatal = self.restore_cap(&control, watts).await.err();
            }
        }

        // keep sampling past the last trial
        if fatal.is_none() && !self.cancel.is_cancelled() {
            fatal = self.wait(self.timing.tail_seconds, &fault).await.err();
        }

        let collector_stats = match collector.stop().await {
            Ok(stats) => stats,
            Err(e) => {
                // the collector's own error replaces the halt marker
                if matches!(fatal, None | Some(StoreError::CollectorHalted)) {
                    fatal = Some(e);
                }
                CollectorStats::default()
            }
        };

        let finished_at = self.clock.now();
        if let Some(e) = fatal {
            tracing::error!(event = "run.failed", run_id, error = %e);
            if let Err(fe) = self
                .store
                .finalize_run(run_id, &finished_at, RunStatus::Failed)
            {
                tracing::warn!(event = "run.finalize_failed", run_id, error = %fe);
            }
            return Err(anyhow::Error::new(e)
                .context(format!("run {} stopped on a persistence failure", run_id)));
        }

        let status = if self.cancel.is_cancelled() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        self.store.finalize_run(run_id, &finished_at, status)?;

        let report = CampaignReport {
            run_id,
            status,
            started_at,
            finished_at,
            trials: outcomes,
            collector: collector_stats,
        };
        tracing::info!(
            event = "run.finished",
            run_id,
            status = status.as_str(),
            trials = report.trials.len(),
            invalid = report.invalid_trials()
        );
        Ok(report)
    }

    /// Agent failures only cost the `system_info` row.
    async fn record_system_info(&self) -> Result<(), StoreError> {
        match self.agent.system_info().await {
            Ok(info) => {
                tracing::info!(
                    event = "system_info",
                    hostname = %info.hostname,
                    os = ?info.os,
                    cpu = ?info.cpu
                );
                self.store
                    .upsert_system_info(&info, self.bmc.kind().as_str(), &self.clock.now())
            }
            Err(e) => {
                tracing::warn!(event = "system_info.unavailable", error = %e);
                Ok(())
            }
        }
    }

    /// Runs one trial and records its outcome. Only store failures are
    /// returned as errors.
    async fn run_trial(
        &self,
        control: &CappingControl,
        fault: &CancellationToken,
        run_id: i64,
        trial: &Trial,
    ) -> Result<TrialOutcome, StoreError> {
        let test_id = self.store.begin_test(
            run_id,
            trial.load_percent,
            trial.cap_watts,
            &self.clock.now(),
        )?;
        tracing::info!(
            event = "trial.start",
            trial = trial.index,
            test_id,
            load_pct = trial.load_percent,
            cap_watts = trial.cap_watts
        );

        let err = match self.trial_steps(control, fault, test_id, trial).await {
            Ok(()) => {
                tracing::info!(event = "trial.complete", trial = trial.index, test_id);
                return Ok(TrialOutcome {
                    trial: *trial,
                    test_id,
                    error: None,
                });
            }
            Err(TrialError::Persistence(e)) => return Err(e),
            Err(e) => e,
        };

        tracing::error!(
            event = "trial.invalid",
            trial = trial.index,
            test_id,
            load_pct = trial.load_percent,
            cap_watts = trial.cap_watts,
            error = %err
        );
        self.store.invalidate_test(test_id, &err.to_string())?;

        // Leave the machine uncapped for the next trial.
        match control.deactivate_capping().await {
            Ok(()) => {}
            Err(CommandError::Persistence(e)) => return Err(e),
            Err(CommandError::Bmc(e)) => {
                tracing::warn!(event = "trial.cleanup_failed", test_id, error = %e);
            }
        }

        Ok(TrialOutcome {
            trial: *trial,
            test_id,
            error: Some(err.to_string()),
        })
    }

    /// A trial whose samples stopped being written is never completed.
    async fn trial_steps(
        &self,
        control: &CappingControl,
        fault: &CancellationToken,
        test_id: i64,
        trial: &Trial,
    ) -> Result<(), TrialError> {
        self.checkpoint(fault)?;
        control
            .set_cap_level(trial.cap_watts)
            .await
            .map_err(at_step("set_cap_level"))?;

        self.checkpoint(fault)?;
        control
            .activate_capping()
            .await
            .map_err(at_step("activate_capping"))?;

        self.checkpoint(fault)?;
        self.agent
            .start_load(trial.load_percent, self.timing.trial_seconds)
            .await
            .map_err(|source| TrialError::Agent { source })?;

        if !self.wait(self.timing.trial_seconds, fault).await? {
            return Err(TrialError::Cancelled);
        }

        control
            .deactivate_capping()
            .await
            .map_err(at_step("deactivate_capping"))?;
        collector_alive(fault)?;
        self.store.complete_test(test_id, &self.clock.now())?;
        Ok(())
    }

    async fn restore_cap(&self, control: &CappingControl, watts: u32) -> Result<(), StoreError> {
        tracing::info!(event = "run.restore_cap", cap_watts = watts);
        let steps = [
            control.set_cap_level(watts).await,
            control.deactivate_capping().await,
        ];
        for res in steps {
            match res {
                Ok(()) => {}
                Err(CommandError::Persistence(e)) => return Err(e),
                Err(CommandError::Bmc(e)) => {
                    tracing::warn!(event = "run.restore_cap_failed", error = %e);
                }
            }
        }
        Ok(())
    }

    fn checkpoint(&self, fault: &CancellationToken) -> Result<(), TrialError> {
        collector_alive(fault)?;
        if self.cancel.is_cancelled() {
            return Err(TrialError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps unless cancelled first. Returns false on cancellation and an
    /// error if the collector dies meanwhile.
    async fn wait(&self, secs: u64, fault: &CancellationToken) -> Result<bool, StoreError> {
        tokio::select! {
            biased;
            _ = fault.cancelled() => Err(StoreError::CollectorHalted),
            _ = self.cancel.cancelled() => Ok(false),
            _ = sleep(Duration::from_secs(secs)) => Ok(true),
        }
    }
}

fn collector_alive(fault: &CancellationToken) -> Result<(), StoreError> {
    if fault.is_cancelled() {
        return Err(StoreError::CollectorHalted);
    }
    Ok(())
}

fn at_step(step: &'static str) -> impl FnOnce(CommandError) -> TrialError {
    move |e| match e {
        CommandError::Bmc(source) => TrialError::Bmc { step, source },
        CommandError::Persistence(e) => TrialError::Persistence(e),
    }
}
