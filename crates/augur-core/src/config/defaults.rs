use super::FailurePolicy;

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_hmm_states() -> usize {
    4
}

pub(super) fn default_hmm_observations() -> usize {
    6
}

pub(super) fn default_training_iterations() -> usize {
    100
}

pub(super) fn default_convergence_tolerance() -> f64 {
    1e-4
}

pub(super) fn default_scratch_max_per_size() -> usize {
    4
}

pub(super) fn default_ensemble_size() -> usize {
    8
}

pub(super) fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub(super) fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Abort
}

pub(super) fn default_chunk_size() -> usize {
    20
}
