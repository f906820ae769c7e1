use super::*;
use augur_core::config::FailurePolicy;

/// Minimal outcome record: a winning slot plus a payout the core ignores.
#[derive(Debug, Clone, PartialEq)]
struct Race {
    winner: Option<usize>,
    payout: f64,
}

impl Outcome for Race {
    fn observation_code(&self) -> Option<usize> {
        self.winner
    }
}

fn race(winner: Option<usize>) -> Race {
    Race {
        winner,
        payout: 1.5,
    }
}

#[derive(Debug, Default)]
struct Tally {
    seen: usize,
    payouts: f64,
}

impl RunningStats<Race> for Tally {
    fn observe(&mut self, record: &Race) {
        self.seen += 1;
        self.payouts += record.payout;
    }
}

/// Bets on the most probable symbol and remembers what it was shown.
#[derive(Default)]
struct TopPick {
    stats_seen: Vec<usize>,
    vectors: Vec<Vec<f64>>,
}

impl Decision<Tally> for TopPick {
    type Bet = usize;

    fn decide(&mut self, probabilities: &[f64], stats: &Tally) -> usize {
        self.stats_seen.push(stats.seen);
        self.vectors.push(probabilities.to_vec());
        probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

fn config(chunk_size: usize, ensemble_size: usize, seed: u64) -> Config {
    let mut cfg = Config::default();
    cfg.model.hmm_states = 2;
    cfg.model.hmm_observations = 3;
    cfg.model.training_iterations = 25;
    cfg.walk_forward.chunk_size = chunk_size;
    cfg.ensemble.ensemble_size = ensemble_size;
    cfg.ensemble.worker_pool_size = 2;
    cfg.ensemble.seed = Some(seed);
    cfg
}

fn races(winners: &[usize]) -> Vec<Race> {
    winners.iter().map(|&w| race(Some(w))).collect()
}

#[tokio::test]
async fn test_two_chunks_submit_k_tasks_each() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut wf = WalkForward::new(config(3, 4, 1), Arc::clone(&pool), Tally::default()).unwrap();

    let records = races(&[0, 1, 2, 0, 1, 2]);

    let first = wf.forecast_chunk(3).await.unwrap();
    assert_eq!(pool.submitted(), 4);
    assert_eq!(first.members, 4);
    assert_eq!(first.steps.len(), 3);
    for r in records[..3].iter().cloned() {
        wf.reveal(r).unwrap();
    }
    assert_eq!(wf.sequence().len(), 3);

    wf.forecast_chunk(3).await.unwrap();
    assert_eq!(pool.submitted(), 8);
    for r in records[3..].iter().cloned() {
        wf.reveal(r).unwrap();
    }
    assert_eq!(wf.sequence().len(), 6);
    assert_eq!(wf.chunks(), 2);
}

#[tokio::test]
async fn test_run_end_to_end() {
    let pool = Arc::new(TaskPool::new(3).unwrap());
    let mut wf = WalkForward::new(config(3, 4, 2), Arc::clone(&pool), Tally::default()).unwrap();
    let mut decision = TopPick::default();

    let report = wf
        .run(races(&[0, 1, 2, 0, 1, 2]), &mut decision)
        .await
        .unwrap();

    assert_eq!(pool.submitted(), 8);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.tasks, 8);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.steps.len(), 6);
    assert_eq!(wf.sequence().len(), 6);
    assert_eq!(wf.history().len(), 6);
    assert_eq!(wf.stats().seen, 6);
    assert!((wf.stats().payouts - 9.0).abs() < 1e-12);

    let indices: Vec<usize> = report.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    let observed: Vec<Option<usize>> = report.steps.iter().map(|s| s.observed).collect();
    assert_eq!(observed, vec![Some(0), Some(1), Some(2), Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn test_decisions_see_only_revealed_outcomes() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut wf = WalkForward::new(config(2, 2, 3), pool, Tally::default())
        .unwrap()
        .with_history(races(&[1, 1]))
        .unwrap();
    let mut decision = TopPick::default();

    wf.run(races(&[0, 2, 1, 0, 2]), &mut decision)
        .await
        .unwrap();

    // Stats advance by exactly one reveal between consecutive decisions.
    assert_eq!(decision.stats_seen, vec![2, 3, 4, 5, 6]);
    for v in &decision.vectors {
        assert_eq!(v.len(), 3);
        assert!((v.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_short_final_chunk() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut wf = WalkForward::new(config(3, 2, 4), Arc::clone(&pool), Tally::default()).unwrap();
    let mut decision = TopPick::default();

    let report = wf
        .run(races(&[0, 1, 2, 0, 1, 2, 0]), &mut decision)
        .await
        .unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(report.steps.len(), 7);
    assert_eq!(pool.submitted(), 6);
}

#[tokio::test]
async fn test_unresolved_records_enter_sequence_as_sentinels() {
    let pool = Arc::new(TaskPool::new(1).unwrap());
    let mut wf = WalkForward::new(config(2, 1, 5), pool, Tally::default())
        .unwrap()
        .with_history(vec![race(Some(0)), race(None), race(Some(2))])
        .unwrap();
    assert_eq!(wf.sequence(), &[Some(0), None, Some(2)]);

    let mut decision = TopPick::default();
    let report = wf
        .run(vec![race(None), race(Some(1))], &mut decision)
        .await
        .unwrap();

    assert_eq!(wf.sequence(), &[Some(0), None, Some(2), None, Some(1)]);
    assert_eq!(report.steps[0].observed, None);
    assert_eq!(report.hit_rate(|bet, symbol| *bet == symbol).map(|r| r <= 1.0), Some(true));
}

#[tokio::test]
async fn test_same_seed_same_forecasts() {
    let winners = [0, 0, 1, 2, 1, 0, 2, 2, 1, 0];

    let mut vectors = Vec::new();
    for _ in 0..2 {
        let pool = Arc::new(TaskPool::new(2).unwrap());
        let mut wf = WalkForward::new(config(4, 3, 77), pool, Tally::default())
            .unwrap()
            .with_history(races(&winners))
            .unwrap();
        let mut decision = TopPick::default();
        wf.run(races(&[1, 2, 0, 1, 2]), &mut decision).await.unwrap();
        vectors.push(decision.vectors);
    }
    assert_eq!(vectors[0], vectors[1]);
}

#[tokio::test]
async fn test_failed_chunk_aborts_without_revealing() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut wf = WalkForward::new(config(3, 4, 6), Arc::clone(&pool), Tally::default())
        .unwrap()
        .with_history(races(&[0, 1]))
        .unwrap();
    // Every member is refused by a stopped pool.
    pool.shutdown();
    let mut decision = TopPick::default();

    let err = wf.run(races(&[0, 1, 2]), &mut decision).await.unwrap_err();
    assert!(matches!(err, AugurError::EnsembleFailed { chunk: 0, failed: 4, members: 4, .. }));
    assert_eq!(wf.history().len(), 2);
    assert_eq!(wf.sequence(), &[Some(0), Some(1)]);
    assert_eq!(wf.stats().seen, 2);
    assert_eq!(wf.chunks(), 0);
    assert!(decision.vectors.is_empty());
}

#[tokio::test]
async fn test_drop_failed_policy_still_fails_without_survivors() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut cfg = config(3, 2, 6);
    cfg.ensemble.failure_policy = FailurePolicy::DropFailed;
    let mut wf = WalkForward::new(cfg, Arc::clone(&pool), Tally::default())
        .unwrap()
        .with_history(races(&[2, 0]))
        .unwrap();
    pool.shutdown();
    let mut decision = TopPick::default();

    assert!(wf.run(races(&[0]), &mut decision).await.is_err());
    assert_eq!(wf.history().len(), 2);
}

#[test]
fn test_reveal_rejects_out_of_range_code() {
    let pool = Arc::new(TaskPool::new(1).unwrap());
    let mut wf = WalkForward::new(config(3, 2, 1), pool, Tally::default())
        .unwrap()
        .with_history(races(&[0, 2]))
        .unwrap();

    let err = wf.reveal(race(Some(3))).unwrap_err();
    assert!(matches!(
        err,
        AugurError::InvalidObservation { position: 2, symbol: 3, alphabet: 3 }
    ));
    assert_eq!(wf.history().len(), 2);
    assert_eq!(wf.sequence(), &[Some(0), Some(2)]);
    assert_eq!(wf.stats().seen, 2);

    // Unresolved records are never out of range.
    wf.reveal(race(None)).unwrap();
    assert_eq!(wf.sequence().len(), 3);
}

#[test]
fn test_with_history_rejects_out_of_range_code() {
    let pool = Arc::new(TaskPool::new(1).unwrap());
    let result = WalkForward::new(config(3, 2, 1), pool, Tally::default())
        .unwrap()
        .with_history(races(&[0, 9, 1]));
    assert!(matches!(
        result,
        Err(AugurError::InvalidObservation { position: 1, symbol: 9, .. })
    ));
}

#[tokio::test]
async fn test_bad_record_stops_run_and_controller_recovers() {
    let pool = Arc::new(TaskPool::new(2).unwrap());
    let mut wf = WalkForward::new(config(2, 2, 8), pool, Tally::default()).unwrap();
    let mut decision = TopPick::default();

    let err = wf.run(races(&[0, 7, 1]), &mut decision).await.unwrap_err();
    assert!(
        matches!(err, AugurError::InvalidObservation { position: 1, symbol: 7, alphabet: 3 }),
        "expected the bad record itself to be reported, got {err}"
    );
    // The record before the bad one was decided and revealed; the bad one was not.
    assert_eq!(decision.vectors.len(), 1);
    assert_eq!(wf.sequence(), &[Some(0)]);
    assert_eq!(wf.history().len(), 1);
    assert_eq!(wf.stats().seen, 1);

    let report = wf.run(races(&[1, 2]), &mut decision).await.unwrap();
    assert_eq!(report.steps.len(), 2);
    assert_eq!(wf.sequence(), &[Some(0), Some(1), Some(2)]);
}

#[test]
fn test_invalid_config_is_rejected() {
    let pool = Arc::new(TaskPool::new(1).unwrap());
    let mut cfg = config(3, 2, 1);
    cfg.ensemble.ensemble_size = 0;
    assert!(WalkForward::<Race, Tally>::new(cfg, pool, Tally::default()).is_err());
}

#[test]
fn test_hit_rate() {
    let report = WalkForwardReport {
        steps: vec![
            StepRecord {
                index: 0,
                probabilities: vec![0.6, 0.4],
                bet: 0usize,
                observed: Some(0),
            },
            StepRecord {
                index: 1,
                probabilities: vec![0.6, 0.4],
                bet: 0,
                observed: Some(1),
            },
            StepRecord {
                index: 2,
                probabilities: vec![0.6, 0.4],
                bet: 0,
                observed: None,
            },
        ],
        chunks: 1,
        tasks: 1,
        dropped: 0,
    };
    assert_eq!(report.hit_rate(|bet, symbol| *bet == symbol), Some(0.5));
    assert_eq!(
        WalkForwardReport::<usize>::new().hit_rate(|bet, symbol| *bet == symbol),
        None
    );
}

#[test]
fn test_report_serializes_to_json() {
    let mut report = WalkForwardReport::<Vec<usize>>::new();
    report.steps.push(StepRecord {
        index: 4,
        probabilities: vec![0.25, 0.75],
        bet: vec![1],
        observed: Some(1),
    });
    report.chunks = 1;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["chunks"], 1);
    assert_eq!(json["steps"][0]["index"], 4);
    assert_eq!(json["steps"][0]["bet"][0], 1);
    assert_eq!(json["steps"][0]["observed"], 1);
}
