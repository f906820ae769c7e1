//! # augur-core
//!
//! Core types, collaborator traits, configuration, and error handling shared
//! by the Augur forecasting crates.

pub mod config;
pub mod error;
pub mod traits;
