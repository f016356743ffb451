//! Watchdog Configuration Module
//!
//! Policy timings and the binary's route host settings, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `ROUTE_WATCHDOG_CONFIG` environment variable (path to TOML file)
//! 2. `watchdog.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The binary's `--config` flag bypasses the search and fails hard if the file
//! cannot be loaded.

pub mod defaults;
pub mod validation;
mod watchdog_config;

pub use watchdog_config::*;
