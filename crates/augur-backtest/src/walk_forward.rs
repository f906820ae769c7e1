//! Walk-forward controller.
//!
//! Records are consumed in chunks. For each chunk the controller trains an
//! ensemble on everything revealed so far, averages the members' forecasts,
//! asks the decision function for a bet on each record in turn, and reveals
//! that record before deciding on the next. A chunk's forecast is always
//! complete before any of its records is revealed, so training never sees the
//! outcomes it is predicting.

use std::collections::VecDeque;
use std::sync::Arc;

use augur_core::config::Config;
use augur_core::error::AugurError;
use augur_core::traits::{Decision, Outcome, RunningStats};
use augur_hmm::rng::{derive_seed, entropy_seed};
use serde::Serialize;
use tracing::{debug, info};

use crate::ensemble::{self, EnsembleForecast};
use crate::pool::TaskPool;

/// One decided-and-revealed record.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord<B> {
    /// Position of the record in the full history.
    pub index: usize,
    /// Ensemble observation distribution the decision was made on.
    pub probabilities: Vec<f64>,
    pub bet: B,
    /// Observation code revealed afterwards (`None` if unresolved).
    pub observed: Option<usize>,
}

/// Everything a [`WalkForward::run`] call decided.
#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport<B> {
    pub steps: Vec<StepRecord<B>>,
    /// Chunks forecast.
    pub chunks: usize,
    /// Ensemble tasks submitted across all chunks.
    pub tasks: usize,
    /// Members dropped after failing.
    pub dropped: usize,
}

impl<B> WalkForwardReport<B> {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            chunks: 0,
            tasks: 0,
            dropped: 0,
        }
    }

    /// Share of resolved steps whose bet `covers` the revealed symbol.
    /// `None` when no step was resolved.
    pub fn hit_rate<F>(&self, covers: F) -> Option<f64>
    where
        F: Fn(&B, usize) -> bool,
    {
        let mut resolved = 0usize;
        let mut hits = 0usize;
        for step in &self.steps {
            if let Some(symbol) = step.observed {
                resolved += 1;
                if covers(&step.bet, symbol) {
                    hits += 1;
                }
            }
        }
        (resolved > 0).then(|| hits as f64 / resolved as f64)
    }
}

/// Walk-forward state: revealed history, its observation codes, and the
/// collaborator's running statistics.
pub struct WalkForward<R, S> {
    config: Config,
    pool: Arc<TaskPool>,
    history: Vec<R>,
    /// Shared with in-flight ensemble tasks; only appended to between chunks.
    sequence: Arc<Vec<Option<usize>>>,
    stats: S,
    base_seed: u64,
    chunks: usize,
}

impl<R, S> WalkForward<R, S>
where
    R: Outcome,
    S: RunningStats<R>,
{
    /// Controller with empty history.
    pub fn new(config: Config, pool: Arc<TaskPool>, stats: S) -> Result<Self, AugurError> {
        config.validate()?;
        let base_seed = config.ensemble.seed.unwrap_or_else(entropy_seed);
        info!(
            "walk-forward: K={} N={} M={} chunk={} seed={}",
            config.ensemble.ensemble_size,
            config.model.hmm_states,
            config.model.hmm_observations,
            config.walk_forward.chunk_size,
            base_seed
        );
        Ok(Self {
            config,
            pool,
            history: Vec::new(),
            sequence: Arc::new(Vec::new()),
            stats,
            base_seed,
            chunks: 0,
        })
    }

    /// Reveal already-known records before the first chunk.
    pub fn with_history<I>(mut self, records: I) -> Result<Self, AugurError>
    where
        I: IntoIterator<Item = R>,
    {
        for record in records {
            self.reveal(record)?;
        }
        Ok(self)
    }

    pub fn history(&self) -> &[R] {
        &self.history
    }

    pub fn sequence(&self) -> &[Option<usize>] {
        &self.sequence
    }

    pub fn stats(&self) -> &S {
        &self.stats
    }

    /// Chunks forecast so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Seed every member seed is derived from.
    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Train the ensemble on the revealed sequence and forecast `len` steps.
    ///
    /// Waits for every member; the sequence is not modified meanwhile.
    pub async fn forecast_chunk(&mut self, len: usize) -> Result<EnsembleForecast, AugurError> {
        let chunk = self.chunks;
        let seeds: Vec<u64> = (0..self.config.ensemble.ensemble_size)
            .map(|member| derive_seed(self.base_seed, chunk as u64, member as u64))
            .collect();

        let forecast = ensemble::forecast(
            &self.pool,
            &self.config.model,
            Arc::clone(&self.sequence),
            len,
            &seeds,
            self.config.ensemble.failure_policy,
            chunk,
        )
        .await?;

        self.chunks += 1;
        Ok(forecast)
    }

    /// Fold one revealed record into the sequence, statistics and history.
    ///
    /// A code outside the alphabet is rejected and nothing is changed.
    pub fn reveal(&mut self, record: R) -> Result<(), AugurError> {
        let code = record.observation_code();
        self.check_code(code)?;
        Arc::make_mut(&mut self.sequence).push(code);
        self.stats.observe(&record);
        self.history.push(record);
        Ok(())
    }

    fn check_code(&self, code: Option<usize>) -> Result<(), AugurError> {
        let alphabet = self.config.model.hmm_observations;
        match code {
            Some(symbol) if symbol >= alphabet => Err(AugurError::InvalidObservation {
                position: self.history.len(),
                symbol,
                alphabet,
            }),
            _ => Ok(()),
        }
    }

    /// Walk forward over `records`, chunk by chunk.
    ///
    /// A chunk whose ensemble fails (per the configured failure policy) ends
    /// the run with that error; its records are left unrevealed. A record
    /// with an out-of-range code ends the run before it is decided on; the
    /// records revealed before it stay revealed.
    pub async fn run<I, D>(
        &mut self,
        records: I,
        decision: &mut D,
    ) -> Result<WalkForwardReport<D::Bet>, AugurError>
    where
        I: IntoIterator<Item = R>,
        D: Decision<S>,
    {
        let mut pending: VecDeque<R> = records.into_iter().collect();
        let mut report = WalkForwardReport::new();
        let chunk_size = self.config.walk_forward.chunk_size;

        while !pending.is_empty() {
            let len = chunk_size.min(pending.len());
            let forecast = self.forecast_chunk(len).await?;
            report.chunks += 1;
            report.tasks += forecast.members + forecast.dropped;
            report.dropped += forecast.dropped;

            for probabilities in forecast.steps {
                let Some(record) = pending.pop_front() else {
                    break;
                };
                let observed = record.observation_code();
                self.check_code(observed)?;
                let bet = decision.decide(&probabilities, &self.stats);
                report.steps.push(StepRecord {
                    index: self.history.len(),
                    probabilities,
                    bet,
                    observed,
                });
                self.reveal(record)?;
            }

            debug!(
                "walk-forward: chunk {} done, {} revealed, {} pending",
                self.chunks,
                self.history.len(),
                pending.len()
            );
        }

        info!(
            "walk-forward: {} records over {} chunks ({} tasks, {} dropped)",
            report.steps.len(),
            report.chunks,
            report.tasks,
            report.dropped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
