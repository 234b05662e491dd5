use crate::config::{BmcConfig, BmcKind};
use crate::errors::BmcError;
use async_trait::async_trait;
use std::sync::Arc;

pub mod control;
pub mod ipmi;
pub mod redfish;

pub use control::CappingControl;
pub use ipmi::IpmiBmc;
pub use redfish::RedfishBmc;

/// Power-capping capabilities of a baseboard management controller.
///
/// Every method is a single request/response; implementations hold no
/// partially-updated state across an await, so the collector's reads may
/// interleave with the sequencer's writes.
#[async_trait]
pub trait Bmc: Send + Sync {
    /// Instantaneous power draw in watts.
    async fn current_power(&self) -> Result<f64, BmcError>;

    /// Configured cap in watts, `None` when no limit is active.
    async fn current_cap_level(&self) -> Result<Option<f64>, BmcError>;

    /// One collector poll: power and cap, each failing on its own.
    async fn read_power_and_cap(
        &self,
    ) -> (Result<f64, BmcError>, Result<Option<f64>, BmcError>) {
        tokio::join!(self.current_power(), self.current_cap_level())
    }

    async fn set_cap_level(&self, watts: u32) -> Result<(), BmcError>;

    async fn activate_capping(&self) -> Result<(), BmcError>;

    async fn deactivate_capping(&self) -> Result<(), BmcError>;

    fn kind(&self) -> BmcKind;

    /// Open a session, if the protocol has one.
    async fn connect(&self) -> Result<(), BmcError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BmcError> {
        Ok(())
    }
}

pub fn from_config(cfg: &BmcConfig) -> Result<Arc<dyn Bmc>, BmcError> {
    match cfg.kind {
        BmcKind::Ipmi => Ok(Arc::new(IpmiBmc::new(cfg))),
        BmcKind::Redfish => Ok(Arc::new(RedfishBmc::new(cfg)?)),
    }
}
