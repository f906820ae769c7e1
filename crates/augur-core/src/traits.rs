//! Seams to the collaborators that live outside the forecasting core:
//! outcome records, running frequency statistics, and the decision function.

/// A resolved (or not yet resolved) outcome record.
pub trait Outcome {
    /// Observation code for the record, `None` while the outcome is unresolved.
    fn observation_code(&self) -> Option<usize>;
}

impl Outcome for Option<usize> {
    fn observation_code(&self) -> Option<usize> {
        *self
    }
}

/// Running statistics folded forward as outcomes are revealed.
pub trait RunningStats<R> {
    /// Fold one revealed record into the statistics.
    fn observe(&mut self, record: &R);
}

/// No statistics at all.
impl<R> RunningStats<R> for () {
    fn observe(&mut self, _record: &R) {}
}

/// Turns an aggregated observation distribution into a bet for one record.
pub trait Decision<S> {
    /// Whatever the decision produces (a set of symbols, a stake table, ...).
    type Bet;

    /// Decide on a single record given the ensemble's probability vector.
    fn decide(&mut self, probabilities: &[f64], stats: &S) -> Self::Bet;
}
