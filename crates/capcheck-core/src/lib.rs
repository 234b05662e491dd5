pub mod agent;
pub mod bmc;
pub mod clock;
pub mod collector;
pub mod config;
pub mod engine;
pub mod errors;
pub mod model;

pub mod report;
pub mod storage;
