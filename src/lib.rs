//! # Lead Intelligence Engine
//!
//! Multi-source lead enrichment and synchronization: provider adapters feed
//! an enrichment aggregator and a lead scoring engine, while a per-provider
//! sync scheduler and a discovery poller keep organization records fresh.

pub mod adapters;
pub mod clock;
pub mod config;
pub mod db;
pub mod discovery;
pub mod domain;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod repositories;
pub mod scheduler;
pub mod scoring;
pub mod telemetry;
pub use migration;
