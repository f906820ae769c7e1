//! # augur-backtest
//!
//! Parallel ensemble forecasting and walk-forward evaluation on top of
//! `augur-hmm`: a persistent worker pool, ensemble aggregation, and the
//! controller that retrains per chunk and folds revealed outcomes back in.

pub mod ensemble;
pub mod pool;
pub mod walk_forward;

pub use ensemble::{aggregate, EnsembleForecast, EnsembleTask, MemberForecast};
pub use pool::{TaskHandle, TaskPool};
pub use walk_forward::{StepRecord, WalkForward, WalkForwardReport};
