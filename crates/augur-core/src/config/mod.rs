mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AugurError;
use defaults::*;

/// Top-level Augur configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub augur: AugurConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugurConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AugurConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Shape and training budget of a single HMM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of hidden states (N).
    #[serde(default = "default_hmm_states")]
    pub hmm_states: usize,
    /// Size of the observation alphabet (M).
    #[serde(default = "default_hmm_observations")]
    pub hmm_observations: usize,
    /// Cap on Baum-Welch iterations per training call.
    #[serde(default = "default_training_iterations")]
    pub training_iterations: usize,
    /// Stop early once |delta log-likelihood| drops below this. 0 disables the check.
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// Free-list depth per buffer length in the training scratch pool.
    #[serde(default = "default_scratch_max_per_size")]
    pub scratch_max_per_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hmm_states: default_hmm_states(),
            hmm_observations: default_hmm_observations(),
            training_iterations: default_training_iterations(),
            convergence_tolerance: default_convergence_tolerance(),
            scratch_max_per_size: default_scratch_max_per_size(),
        }
    }
}

/// What to do when an ensemble member fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole chunk (default).
    #[default]
    Abort,
    /// Average over the surviving members; fail only if none survive.
    DropFailed,
}

/// Ensemble and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Number of independently initialized models per chunk (K).
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    /// Number of persistent worker threads.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Base seed for model initialization. Absent = fresh entropy per run.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            worker_pool_size: default_worker_pool_size(),
            seed: None,
            failure_policy: default_failure_policy(),
        }
    }
}

/// Walk-forward settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Records forecast per retraining.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    /// Reject values the forecasting core cannot run with.
    pub fn validate(&self) -> Result<(), AugurError> {
        let positive = [
            ("model.hmm_states", self.model.hmm_states),
            ("model.hmm_observations", self.model.hmm_observations),
            ("ensemble.ensemble_size", self.ensemble.ensemble_size),
            ("ensemble.worker_pool_size", self.ensemble.worker_pool_size),
            ("walk_forward.chunk_size", self.walk_forward.chunk_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AugurError::Config(format!("{name} must be at least 1")));
            }
        }

        let tol = self.model.convergence_tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return Err(AugurError::Config(format!(
                "model.convergence_tolerance must be a finite non-negative number, got {tol}"
            )));
        }

        Ok(())
    }
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, AugurError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| AugurError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| AugurError::Config(format!("failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}
