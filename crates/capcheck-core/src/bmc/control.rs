use super::Bmc;
use crate::clock::RunClock;
use crate::errors::{BmcError, StoreError};
use crate::model::{CappingCommand, CommandType};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Bmc(#[from] BmcError),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// The command side of a BMC: every write is logged to `capping_commands`
/// before it is sent, so the issue time survives a failed or hung call.
///
/// Only the sequencer holds one of these; the collector reads through the
/// bare [`Bmc`].
pub struct CappingControl {
    bmc: Arc<dyn Bmc>,
    store: Store,
    clock: RunClock,
    run_id: i64,
    last_issued: Mutex<Option<DateTime<Utc>>>,
}

impl CappingControl {
    pub fn new(bmc: Arc<dyn Bmc>, store: Store, clock: RunClock, run_id: i64) -> Self {
        Self {
            bmc,
            store,
            clock,
            run_id,
            last_issued: Mutex::new(None),
        }
    }

    pub async fn set_cap_level(&self, watts: u32) -> Result<(), CommandError> {
        self.record(CommandType::SetCapLevel, Some(watts))?;
        self.bmc.set_cap_level(watts).await?;
        Ok(())
    }

    pub async fn activate_capping(&self) -> Result<(), CommandError> {
        self.record(CommandType::ActivateCapping, None)?;
        self.bmc.activate_capping().await?;
        Ok(())
    }

    pub async fn deactivate_capping(&self) -> Result<(), CommandError> {
        self.record(CommandType::DeactivateCapping, None)?;
        self.bmc.deactivate_capping().await?;
        Ok(())
    }

    fn record(&self, command_type: CommandType, value: Option<u32>) -> Result<(), StoreError> {
        let timestamp = {
            let mut last = self.last_issued.lock().map_err(|_| StoreError::Poisoned)?;
            let now = self.clock.now();
            let ts = match *last {
                Some(prev) if prev > now => prev,
                _ => now,
            };
            *last = Some(ts);
            ts
        };
        tracing::debug!(
            event = "bmc.command",
            command = command_type.as_str(),
            value = ?value
        );
        self.store.insert_capping_command(
            self.run_id,
            &CappingCommand {
                timestamp,
                command_type,
                value,
            },
        )
    }
}
