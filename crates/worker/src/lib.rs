//! Worker process: wires the engine's stores, registry, scheduler and runner
//! from environment configuration.

pub mod app;
pub mod config;
