//! Supervisor Configuration Module
//!
//! Fleet, permission policy and timing loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `WARDEN_CONFIG` environment variable (path to TOML file)
//! 3. `warden.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded config is shared as an `Arc<SupervisorConfig>` and handed to
//! each component at construction.

mod supervisor_config;
pub mod defaults;
pub mod validation;

pub use supervisor_config::*;
