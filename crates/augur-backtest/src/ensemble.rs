//! Ensembles of independently initialized HMMs.
//!
//! Every member trains a fresh random model on the same read-only sequence
//! and forecasts the same number of steps. Members are combined with equal
//! weight; the average smooths over EM's dependence on its starting point.

use std::sync::Arc;

use augur_core::config::{FailurePolicy, ModelConfig};
use augur_core::error::{AugurError, TaskError};
use augur_hmm::{DeterministicRng, Hmm, TrainReport};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::pool::TaskPool;

/// Work item for one ensemble member.
#[derive(Debug, Clone)]
pub struct EnsembleTask {
    /// Shared view of the known observation codes; never mutated by a task.
    pub sequence: Arc<Vec<Option<usize>>>,
    pub num_states: usize,
    pub num_observations: usize,
    pub train_iterations: usize,
    pub convergence_tolerance: f64,
    pub steps_to_predict: usize,
    pub scratch_depth: usize,
    /// Seed for this member's initialization.
    pub seed: u64,
}

impl EnsembleTask {
    /// Task for `sequence` shaped by `model`.
    pub fn from_model_config(
        model: &ModelConfig,
        sequence: Arc<Vec<Option<usize>>>,
        steps_to_predict: usize,
        seed: u64,
    ) -> Self {
        Self {
            sequence,
            num_states: model.hmm_states,
            num_observations: model.hmm_observations,
            train_iterations: model.training_iterations,
            convergence_tolerance: model.convergence_tolerance,
            steps_to_predict,
            scratch_depth: model.scratch_max_per_size,
            seed,
        }
    }

    /// Initialize, train and forecast one member.
    pub fn run(&self) -> Result<MemberForecast, AugurError> {
        let mut rng = DeterministicRng::seeded(self.seed);
        let mut hmm = Hmm::new(self.num_states, self.num_observations, &mut rng)?
            .with_scratch_depth(self.scratch_depth);
        let report = hmm.train(
            &self.sequence,
            self.train_iterations,
            self.convergence_tolerance,
        )?;
        let steps = hmm.predict_steps(&self.sequence, self.steps_to_predict)?;
        Ok(MemberForecast { steps, report })
    }
}

/// One member's per-step observation distributions.
#[derive(Debug, Clone)]
pub struct MemberForecast {
    pub steps: Vec<Vec<f64>>,
    pub report: TrainReport,
}

/// Aggregated forecast for a chunk.
#[derive(Debug, Clone)]
pub struct EnsembleForecast {
    /// Per-step mean distribution over the surviving members.
    pub steps: Vec<Vec<f64>>,
    /// Members that contributed.
    pub members: usize,
    /// Members dropped under [`FailurePolicy::DropFailed`].
    pub dropped: usize,
}

/// Component-wise mean of the members' per-step vectors, weight 1/K each.
///
/// Members must agree on step count and alphabet size. An empty slice yields
/// an empty forecast.
pub fn aggregate(members: &[MemberForecast]) -> Vec<Vec<f64>> {
    let Some(first) = members.first() else {
        return Vec::new();
    };

    let mut sums: Vec<Vec<f64>> = first.steps.clone();
    for member in &members[1..] {
        for (acc, row) in sums.iter_mut().zip(&member.steps) {
            for (a, v) in acc.iter_mut().zip(row) {
                *a += v;
            }
        }
    }

    let k = members.len() as f64;
    for row in &mut sums {
        row.iter_mut().for_each(|v| *v /= k);
    }
    sums
}

/// Submit `seeds.len()` members to `pool`, wait for all of them, and average.
///
/// `chunk` only labels logs and errors. Failures are handled per `policy`.
pub async fn forecast(
    pool: &TaskPool,
    model: &ModelConfig,
    sequence: Arc<Vec<Option<usize>>>,
    steps_to_predict: usize,
    seeds: &[u64],
    policy: FailurePolicy,
    chunk: usize,
) -> Result<EnsembleForecast, AugurError> {
    let handles: Vec<_> = seeds
        .iter()
        .map(|&seed| {
            let task = EnsembleTask::from_model_config(
                model,
                Arc::clone(&sequence),
                steps_to_predict,
                seed,
            );
            pool.submit(move || task.run())
        })
        .collect();

    let outcomes = join_all(handles).await;
    settle(outcomes, policy, chunk, sequence.len())
}

/// Apply `policy` to the members' outcomes and average the survivors.
fn settle(
    outcomes: Vec<Result<Result<MemberForecast, AugurError>, TaskError>>,
    policy: FailurePolicy,
    chunk: usize,
    positions: usize,
) -> Result<EnsembleForecast, AugurError> {
    let members = outcomes.len();
    let mut survivors = Vec::with_capacity(members);
    let mut failures: Vec<String> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Ok(member)) => survivors.push(member),
            Ok(Err(e)) => failures.push(e.to_string()),
            Err(e) => failures.push(e.to_string()),
        }
    }

    if !failures.is_empty() {
        let failed = failures.len();
        let reason = failures.join("; ");
        if policy == FailurePolicy::Abort || survivors.is_empty() {
            return Err(AugurError::EnsembleFailed {
                chunk,
                failed,
                members,
                reason,
            });
        }
        warn!("ensemble: chunk {chunk} dropped {failed}/{members} members: {reason}");
    }

    let collapsed = survivors.iter().filter(|m| m.report.collapsed).count();
    debug!(
        "ensemble: chunk {chunk} trained {} members on {} positions ({} collapsed)",
        survivors.len(),
        positions,
        collapsed
    );

    Ok(EnsembleForecast {
        steps: aggregate(&survivors),
        members: survivors.len(),
        dropped: failures.len(),
    })
}
