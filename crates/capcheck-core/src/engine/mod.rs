pub mod grid;
pub mod runner;

pub use runner::{CampaignReport, Sequencer, TrialOutcome};
