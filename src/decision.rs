//! Reference collaborators for the `backtest` command.

use augur_core::traits::{Decision, Outcome, RunningStats};

/// How often each symbol has been revealed so far.
#[derive(Debug, Clone)]
pub struct SymbolCounts {
    counts: Vec<u64>,
    unresolved: u64,
}

impl SymbolCounts {
    pub fn new(alphabet: usize) -> Self {
        Self {
            counts: vec![0; alphabet],
            unresolved: 0,
        }
    }

    pub fn count(&self, symbol: usize) -> u64 {
        self.counts.get(symbol).copied().unwrap_or(0)
    }

    pub fn unresolved(&self) -> u64 {
        self.unresolved
    }
}

impl<R: Outcome> RunningStats<R> for SymbolCounts {
    fn observe(&mut self, record: &R) {
        match record.observation_code() {
            Some(symbol) => {
                if let Some(slot) = self.counts.get_mut(symbol) {
                    *slot += 1;
                }
            }
            None => self.unresolved += 1,
        }
    }
}

/// Bet on the `k` most probable symbols. Ties go to the symbol seen more
/// often, then to the lower code.
#[derive(Debug, Clone, Copy)]
pub struct TopK {
    pub k: usize,
}

impl Decision<SymbolCounts> for TopK {
    type Bet = Vec<usize>;

    fn decide(&mut self, probabilities: &[f64], stats: &SymbolCounts) -> Vec<usize> {
        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| {
            probabilities[b]
                .total_cmp(&probabilities[a])
                .then_with(|| stats.count(b).cmp(&stats.count(a)))
                .then_with(|| a.cmp(&b))
        });
        order.truncate(self.k);
        order
    }
}
