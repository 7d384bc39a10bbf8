//! Configuration and telemetry shared by the dedup and polling layers.

pub mod config;
pub mod telemetry;
