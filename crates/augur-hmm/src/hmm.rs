//! Discrete-emission Hidden Markov Model.
//!
//! N hidden states, M observation symbols. Training is Baum-Welch with
//! per-step scaling in both passes; prediction filters to the end of the
//! given sequence and then projects the state distribution forward one
//! transition per step.
//!
//! Sequences are `[Option<usize>]`: `None` marks an unresolved position whose
//! emission probability is 1 in both passes and which contributes nothing to
//! the emission re-estimate.

use augur_core::error::AugurError;
use tracing::debug;

use crate::rng::DeterministicRng;
use crate::scratch::ScratchPool;

/// Stand-in for any normalizer or denominator that is exactly zero.
pub const EPSILON: f64 = 1e-300;

/// Lower bound on random initial weights so no row starts with a zero cell.
pub const INIT_FLOOR: f64 = 1e-3;

const DEFAULT_SCRATCH_DEPTH: usize = 4;

/// Outcome of a [`Hmm::train`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainReport {
    /// EM rounds whose forward pass completed.
    pub iterations: usize,
    /// Log-likelihood from the last completed forward pass.
    pub log_likelihood: Option<f64>,
    /// Stopped because the log-likelihood change fell below the tolerance.
    pub converged: bool,
    /// Stopped because a forward pass produced a non-positive normalizer.
    pub collapsed: bool,
}

/// Result of one EM round.
enum Round {
    Updated(f64),
    Converged(f64),
    Collapsed,
}

/// Hidden Markov Model with a discrete observation alphabet.
#[derive(Debug, Clone)]
pub struct Hmm {
    num_states: usize,
    num_observations: usize,
    /// Initial state distribution.
    initial: Vec<f64>,
    /// `transition[i][j]` = P(state j | state i).
    transition: Vec<Vec<f64>>,
    /// `emission[i][k]` = P(symbol k | state i).
    emission: Vec<Vec<f64>>,
    /// `transition_t[j][i] == transition[i][j]`; refreshed after every change
    /// to `transition`.
    transition_t: Vec<Vec<f64>>,
    scratch_depth: usize,
}

#[allow(clippy::needless_range_loop)]
impl Hmm {
    /// Randomly initialized model with `num_states` states and
    /// `num_observations` symbols.
    pub fn new(
        num_states: usize,
        num_observations: usize,
        rng: &mut DeterministicRng,
    ) -> Result<Self, AugurError> {
        if num_states == 0 || num_observations == 0 {
            return Err(AugurError::InvalidParameter(format!(
                "hmm needs at least one state and one symbol, got {num_states}x{num_observations}"
            )));
        }

        let mut hmm = Self {
            num_states,
            num_observations,
            initial: vec![0.0; num_states],
            transition: vec![vec![0.0; num_states]; num_states],
            emission: vec![vec![0.0; num_observations]; num_states],
            transition_t: vec![vec![0.0; num_states]; num_states],
            scratch_depth: DEFAULT_SCRATCH_DEPTH,
        };
        hmm.initialize(rng);
        Ok(hmm)
    }

    /// Model with explicit parameters. Rows are normalized; shapes, signs and
    /// non-zero row sums are checked.
    pub fn from_parameters(
        initial: Vec<f64>,
        transition: Vec<Vec<f64>>,
        emission: Vec<Vec<f64>>,
    ) -> Result<Self, AugurError> {
        let n = initial.len();
        let m = emission.first().map_or(0, Vec::len);
        if n == 0 || m == 0 {
            return Err(AugurError::InvalidParameter(
                "hmm needs at least one state and one symbol".to_string(),
            ));
        }
        if transition.len() != n || transition.iter().any(|row| row.len() != n) {
            return Err(AugurError::InvalidParameter(format!(
                "transition matrix must be {n}x{n}"
            )));
        }
        if emission.len() != n || emission.iter().any(|row| row.len() != m) {
            return Err(AugurError::InvalidParameter(format!(
                "emission matrix must be {n}x{m}"
            )));
        }

        let mut initial = initial;
        let mut transition = transition;
        let mut emission = emission;
        check_distribution("initial", &mut initial)?;
        for (i, row) in transition.iter_mut().enumerate() {
            check_distribution(&format!("transition row {i}"), row)?;
        }
        for (i, row) in emission.iter_mut().enumerate() {
            check_distribution(&format!("emission row {i}"), row)?;
        }

        let mut hmm = Self {
            num_states: n,
            num_observations: m,
            initial,
            transition,
            emission,
            transition_t: vec![vec![0.0; n]; n],
            scratch_depth: DEFAULT_SCRATCH_DEPTH,
        };
        hmm.refresh_transpose();
        Ok(hmm)
    }

    /// Cap on idle scratch buffers kept per tensor size during training.
    pub fn with_scratch_depth(mut self, depth: usize) -> Self {
        self.scratch_depth = depth;
        self
    }

    /// Refill every parameter with positive random weights and normalize.
    pub fn initialize(&mut self, rng: &mut DeterministicRng) {
        fill_random_distribution(&mut self.initial, rng);
        for row in &mut self.transition {
            fill_random_distribution(row, rng);
        }
        for row in &mut self.emission {
            fill_random_distribution(row, rng);
        }
        self.refresh_transpose();
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations
    }

    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    pub fn transition(&self) -> &[Vec<f64>] {
        &self.transition
    }

    pub fn emission(&self) -> &[Vec<f64>] {
        &self.emission
    }

    /// Fit the model to `seq` with at most `max_iterations` Baum-Welch rounds.
    ///
    /// Sequences shorter than two positions leave the model untouched. A
    /// forward pass whose normalizer is not positive ends training early with
    /// the parameters from the last completed round.
    pub fn train(
        &mut self,
        seq: &[Option<usize>],
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<TrainReport, AugurError> {
        let mut report = TrainReport::default();
        if seq.len() < 2 {
            return Ok(report);
        }
        self.validate(seq)?;

        let mut pool = ScratchPool::new(self.scratch_depth);
        let mut prev_ll = f64::NEG_INFINITY;

        for iteration in 0..max_iterations {
            let check = iteration > 0 && tolerance > 0.0;
            match self.em_round(seq, &mut pool, check.then_some((prev_ll, tolerance))) {
                Round::Updated(ll) => {
                    report.iterations += 1;
                    report.log_likelihood = Some(ll);
                    prev_ll = ll;
                }
                Round::Converged(ll) => {
                    report.iterations += 1;
                    report.log_likelihood = Some(ll);
                    report.converged = true;
                    break;
                }
                Round::Collapsed => {
                    report.collapsed = true;
                    debug!(
                        "hmm: forward pass collapsed after {} rounds, keeping last parameters",
                        report.iterations
                    );
                    break;
                }
            }
        }

        let pool_stats = pool.stats();
        debug!(
            "hmm: trained on {} positions, {} rounds, logL={:?}, scratch hits={} misses={}",
            seq.len(),
            report.iterations,
            report.log_likelihood,
            pool_stats.hits,
            pool_stats.misses
        );
        Ok(report)
    }

    /// Observation distributions for the next `steps` positions after `seq`.
    pub fn predict_steps(
        &self,
        seq: &[Option<usize>],
        steps: usize,
    ) -> Result<Vec<Vec<f64>>, AugurError> {
        self.validate(seq)?;
        let n = self.num_states;

        let mut state = if seq.is_empty() {
            self.initial.clone()
        } else {
            let mut alpha = vec![0.0; seq.len() * n];
            match self.forward(seq, &mut alpha) {
                Some(_) => alpha[(seq.len() - 1) * n..].to_vec(),
                None => vec![0.0; n],
            }
        };
        let sum: f64 = state.iter().sum();
        if sum > 0.0 {
            state.iter_mut().for_each(|s| *s /= sum);
        } else {
            state.fill(1.0 / n as f64);
        }

        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let next: Vec<f64> = self
                .transition_t
                .iter()
                .map(|col| col.iter().zip(&state).map(|(a, s)| a * s).sum())
                .collect();

            let mut obs = vec![0.0; self.num_observations];
            for (s, row) in next.iter().zip(&self.emission) {
                for (o, b) in obs.iter_mut().zip(row) {
                    *o += s * b;
                }
            }

            out.push(obs);
            state = next;
        }
        Ok(out)
    }

    /// Observation distribution `steps` positions after `seq`.
    pub fn predict_next(
        &self,
        seq: &[Option<usize>],
        steps: usize,
    ) -> Result<Option<Vec<f64>>, AugurError> {
        Ok(self.predict_steps(seq, steps)?.pop())
    }

    /// Scaled forward log-likelihood of `seq`; `None` if the pass collapses
    /// or `seq` is empty.
    pub fn log_likelihood(&self, seq: &[Option<usize>]) -> Result<Option<f64>, AugurError> {
        self.validate(seq)?;
        if seq.is_empty() {
            return Ok(None);
        }
        let mut alpha = vec![0.0; seq.len() * self.num_states];
        Ok(self.forward(seq, &mut alpha))
    }

    fn validate(&self, seq: &[Option<usize>]) -> Result<(), AugurError> {
        for (position, obs) in seq.iter().enumerate() {
            if let Some(symbol) = *obs {
                if symbol >= self.num_observations {
                    return Err(AugurError::InvalidObservation {
                        position,
                        symbol,
                        alphabet: self.num_observations,
                    });
                }
            }
        }
        Ok(())
    }

    fn em_round(
        &mut self,
        seq: &[Option<usize>],
        pool: &mut ScratchPool,
        convergence: Option<(f64, f64)>,
    ) -> Round {
        let t_len = seq.len();
        let n = self.num_states;

        let mut alpha = pool.take(t_len * n);
        let Some(ll) = self.forward(seq, &mut alpha) else {
            pool.give(alpha);
            return Round::Collapsed;
        };
        if let Some((prev_ll, tolerance)) = convergence {
            if (ll - prev_ll).abs() < tolerance {
                pool.give(alpha);
                return Round::Converged(ll);
            }
        }

        let mut beta = pool.take(t_len * n);
        let mut gamma = pool.take(t_len * n);
        let mut xi = pool.take((t_len - 1) * n * n);

        self.backward(seq, &mut beta);
        self.expectations(seq, &alpha, &beta, &mut gamma, &mut xi);
        self.maximize(seq, &gamma, &xi);

        pool.give(alpha);
        pool.give(beta);
        pool.give(gamma);
        pool.give(xi);
        Round::Updated(ll)
    }

    #[inline]
    fn emit(&self, state: usize, obs: Option<usize>) -> f64 {
        match obs {
            Some(k) => self.emission[state][k],
            None => 1.0,
        }
    }

    /// Scaled forward pass into `alpha` (T×N, row-major). Returns the summed
    /// log of the per-step normalizers, or `None` at the first normalizer
    /// that is not positive.
    fn forward(&self, seq: &[Option<usize>], alpha: &mut [f64]) -> Option<f64> {
        let n = self.num_states;

        for i in 0..n {
            alpha[i] = self.initial[i] * self.emit(i, seq[0]);
        }
        let scale = scale_row(&mut alpha[..n]);
        if scale <= 0.0 || scale.is_nan() {
            return None;
        }
        let mut log_likelihood = scale.ln();

        for t in 1..seq.len() {
            let (done, rest) = alpha.split_at_mut(t * n);
            let prev = &done[(t - 1) * n..];
            let cur = &mut rest[..n];
            for j in 0..n {
                let into_j: f64 = self.transition_t[j]
                    .iter()
                    .zip(prev)
                    .map(|(a, p)| a * p)
                    .sum();
                cur[j] = into_j * self.emit(j, seq[t]);
            }
            let scale = scale_row(cur);
            if scale <= 0.0 || scale.is_nan() {
                return None;
            }
            log_likelihood += scale.ln();
        }

        Some(log_likelihood)
    }

    /// Scaled backward pass into `beta` (T×N, row-major).
    fn backward(&self, seq: &[Option<usize>], beta: &mut [f64]) {
        let n = self.num_states;
        let t_len = seq.len();

        beta[(t_len - 1) * n..].fill(1.0);
        for t in (0..t_len - 1).rev() {
            let (head, tail) = beta.split_at_mut((t + 1) * n);
            let cur = &mut head[t * n..];
            let next = &tail[..n];
            for i in 0..n {
                let row = &self.transition[i];
                let mut acc = 0.0;
                for j in 0..n {
                    acc += row[j] * self.emit(j, seq[t + 1]) * next[j];
                }
                cur[i] = acc;
            }
            scale_row(cur);
        }
    }

    /// Gamma (T×N) and xi ((T-1)×N×N), each normalized per time step.
    fn expectations(
        &self,
        seq: &[Option<usize>],
        alpha: &[f64],
        beta: &[f64],
        gamma: &mut [f64],
        xi: &mut [f64],
    ) {
        let n = self.num_states;
        let t_len = seq.len();

        for t in 0..t_len {
            let row = &mut gamma[t * n..(t + 1) * n];
            for i in 0..n {
                row[i] = alpha[t * n + i] * beta[t * n + i];
            }
            scale_row(row);
        }

        for t in 0..t_len - 1 {
            let block = &mut xi[t * n * n..(t + 1) * n * n];
            let next_beta = &beta[(t + 1) * n..(t + 2) * n];
            for i in 0..n {
                let a_ti = alpha[t * n + i];
                for j in 0..n {
                    block[i * n + j] = a_ti
                        * self.transition[i][j]
                        * self.emit(j, seq[t + 1])
                        * next_beta[j];
                }
            }
            scale_row(block);
        }
    }

    /// Re-estimate pi, A and B from the expectations.
    fn maximize(&mut self, seq: &[Option<usize>], gamma: &[f64], xi: &[f64]) {
        let n = self.num_states;
        let t_len = seq.len();

        let first = gamma[..n].to_vec();
        replace_distribution(&mut self.initial, first);

        for i in 0..n {
            let mut leaving = 0.0;
            for t in 0..t_len - 1 {
                leaving += gamma[t * n + i];
            }
            let denom = positive_or_epsilon(leaving);

            let mut row = vec![0.0; n];
            for t in 0..t_len - 1 {
                let block = &xi[t * n * n + i * n..t * n * n + (i + 1) * n];
                for (r, x) in row.iter_mut().zip(block) {
                    *r += x;
                }
            }
            row.iter_mut().for_each(|r| *r /= denom);
            replace_distribution(&mut self.transition[i], row);
        }

        let tally = accumulate_emissions(seq, gamma, n, self.num_observations);
        for i in 0..n {
            let denom = positive_or_epsilon(tally.totals[i]);
            let row: Vec<f64> = tally.counts[i].iter().map(|c| c / denom).collect();
            replace_distribution(&mut self.emission[i], row);
        }

        self.refresh_transpose();
    }

    fn refresh_transpose(&mut self) {
        for i in 0..self.num_states {
            for j in 0..self.num_states {
                self.transition_t[j][i] = self.transition[i][j];
            }
        }
    }
}

/// Expected emission counts gathered from gamma over resolved positions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EmissionTally {
    /// `counts[i][k]`: summed gamma of state i where symbol k was observed.
    pub counts: Vec<Vec<f64>>,
    /// `totals[i]`: summed gamma of state i over all resolved positions.
    pub totals: Vec<f64>,
}

pub(crate) fn accumulate_emissions(
    seq: &[Option<usize>],
    gamma: &[f64],
    n: usize,
    m: usize,
) -> EmissionTally {
    let mut counts = vec![vec![0.0; m]; n];
    let mut totals = vec![0.0; n];
    for (t, obs) in seq.iter().enumerate() {
        let Some(k) = *obs else { continue };
        for i in 0..n {
            let g = gamma[t * n + i];
            counts[i][k] += g;
            totals[i] += g;
        }
    }
    EmissionTally { counts, totals }
}

/// Divide `row` by its sum (or by [`EPSILON`] if the sum is not positive) and
/// return the raw sum.
fn scale_row(row: &mut [f64]) -> f64 {
    let sum: f64 = row.iter().sum();
    let divisor = positive_or_epsilon(sum);
    row.iter_mut().for_each(|v| *v /= divisor);
    sum
}

#[inline]
fn positive_or_epsilon(value: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        EPSILON
    }
}

/// Overwrite `target` with `candidate` normalized, unless the candidate has no
/// mass, in which case `target` keeps its previous values.
fn replace_distribution(target: &mut [f64], mut candidate: Vec<f64>) {
    let sum: f64 = candidate.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return;
    }
    candidate.iter_mut().for_each(|v| *v /= sum);
    target.copy_from_slice(&candidate);
}

fn fill_random_distribution(row: &mut [f64], rng: &mut DeterministicRng) {
    for v in row.iter_mut() {
        *v = rng.next_f64().max(INIT_FLOOR);
    }
    let sum: f64 = row.iter().sum();
    row.iter_mut().for_each(|v| *v /= sum);
}

fn check_distribution(name: &str, row: &mut [f64]) -> Result<(), AugurError> {
    if row.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(AugurError::InvalidParameter(format!(
            "{name} must hold finite non-negative weights"
        )));
    }
    let sum: f64 = row.iter().sum();
    if sum <= 0.0 || sum.is_nan() {
        return Err(AugurError::InvalidParameter(format!(
            "{name} has no probability mass"
        )));
    }
    row.iter_mut().for_each(|v| *v /= sum);
    Ok(())
}
