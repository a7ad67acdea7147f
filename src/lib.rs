//! switch-fleet - concurrent configuration management for network switches
//!
//! Connects to every switch of an inventory over SSH, runs show/configure
//! commands or pulls running-config backups, and reports one result per
//! device.

pub mod backup;
pub mod config;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod inventory;
pub mod models;
pub mod orchestrator;
pub mod session;
