use super::*;

#[test]
fn test_model_config_default() {
    let model = ModelConfig::default();
    assert_eq!(model.hmm_states, 4);
    assert_eq!(model.hmm_observations, 6);
    assert_eq!(model.training_iterations, 100);
    assert!((model.convergence_tolerance - 1e-4).abs() < 1e-12);
}

#[test]
fn test_partial_toml_fills_defaults() {
    let toml_str = r#"
        [model]
        hmm_states = 3

        [ensemble]
        ensemble_size = 12
        seed = 7
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.model.hmm_states, 3);
    assert_eq!(cfg.model.hmm_observations, 6);
    assert_eq!(cfg.ensemble.ensemble_size, 12);
    assert_eq!(cfg.ensemble.seed, Some(7));
    assert_eq!(cfg.ensemble.failure_policy, FailurePolicy::Abort);
    assert_eq!(cfg.walk_forward.chunk_size, 20);
    assert_eq!(cfg.augur.log_level, "info");
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_failure_policy_from_toml() {
    let toml_str = r#"
        [ensemble]
        failure_policy = "drop_failed"
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.ensemble.failure_policy, FailurePolicy::DropFailed);
}

#[test]
fn test_validate_rejects_zero_chunk() {
    let mut cfg = Config::default();
    cfg.walk_forward.chunk_size = 0;
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("walk_forward.chunk_size"), "{err}");
}

#[test]
fn test_validate_rejects_negative_tolerance() {
    let mut cfg = Config::default();
    cfg.model.convergence_tolerance = -1.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = load("/nonexistent/__augur_config__.toml").unwrap();
    assert_eq!(cfg.ensemble.ensemble_size, 8);
    assert!(cfg.ensemble.worker_pool_size >= 1);
}

#[test]
fn test_load_reads_file() {
    let tmp = std::env::temp_dir().join("__augur_test_config__.toml");
    std::fs::write(
        &tmp,
        "[walk_forward]\nchunk_size = 3\n\n[ensemble]\nensemble_size = 4\nworker_pool_size = 2\n",
    )
    .unwrap();

    let cfg = load(tmp.to_str().unwrap()).unwrap();
    assert_eq!(cfg.walk_forward.chunk_size, 3);
    assert_eq!(cfg.ensemble.ensemble_size, 4);
    assert_eq!(cfg.ensemble.worker_pool_size, 2);

    let _ = std::fs::remove_file(&tmp);
}

#[test]
fn test_load_rejects_invalid_file() {
    let tmp = std::env::temp_dir().join("__augur_test_bad_config__.toml");
    std::fs::write(&tmp, "[model]\nhmm_states = 0\n").unwrap();

    assert!(load(tmp.to_str().unwrap()).is_err());

    let _ = std::fs::remove_file(&tmp);
}
