mod decision;
mod symbols;

use std::path::PathBuf;
use std::sync::Arc;

use augur_backtest::{ensemble, TaskPool, WalkForward};
use augur_core::config::{self, Config};
use augur_hmm::rng::{derive_seed, entropy_seed};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

use decision::{SymbolCounts, TopK};

#[derive(Parser)]
#[command(
    name = "augur",
    version,
    about = "Ensemble HMM forecasts for discrete symbol series"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast the next symbols after the whole file.
    Forecast {
        /// Symbol file.
        file: PathBuf,
        /// Steps to forecast.
        #[arg(short, long, default_value_t = 1)]
        steps: usize,
    },
    /// Walk forward over the file, retraining every chunk.
    Backtest {
        /// Symbol file.
        file: PathBuf,
        /// Leading records revealed before the first forecast.
        #[arg(short, long, default_value_t = 0)]
        warmup: usize,
        /// Symbols bet on per record.
        #[arg(short, long, default_value_t = 1)]
        top: usize,
    },
}

#[derive(Serialize)]
struct ForecastLine<'a> {
    step: usize,
    probabilities: &'a [f64],
}

#[derive(Serialize)]
struct Summary {
    records: usize,
    chunks: usize,
    tasks: usize,
    dropped: usize,
    unresolved: u64,
    hit_rate: Option<f64>,
    seed: u64,
}

/// Swap in the configured log level once the config is known.
fn apply_log_level<S>(handle: &reload::Handle<EnvFilter, S>, level: &str) -> anyhow::Result<()> {
    handle.modify(|filter| *filter = EnvFilter::new(level))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load(&cli.config)?;
    if !from_env {
        apply_log_level(&filter_handle, &cfg.augur.log_level)?;
    }

    let pool = Arc::new(TaskPool::new(cfg.ensemble.worker_pool_size)?);

    match cli.command {
        Commands::Forecast { file, steps } => {
            let codes = symbols::read(&file, cfg.model.hmm_observations)?;
            run_forecast(&cfg, &pool, codes, steps).await?;
        }
        Commands::Backtest { file, warmup, top } => {
            if top == 0 {
                anyhow::bail!("--top must be at least 1");
            }
            let codes = symbols::read(&file, cfg.model.hmm_observations)?;
            run_backtest(cfg, pool, codes, warmup, top).await?;
        }
    }

    Ok(())
}

async fn run_forecast(
    cfg: &Config,
    pool: &TaskPool,
    codes: Vec<Option<usize>>,
    steps: usize,
) -> anyhow::Result<()> {
    let base = cfg.ensemble.seed.unwrap_or_else(entropy_seed);
    let seeds: Vec<u64> = (0..cfg.ensemble.ensemble_size as u64)
        .map(|member| derive_seed(base, 0, member))
        .collect();

    info!(
        "forecast: {} records, {} steps, K={} seed={}",
        codes.len(),
        steps,
        seeds.len(),
        base
    );
    let forecast = ensemble::forecast(
        pool,
        &cfg.model,
        Arc::new(codes),
        steps,
        &seeds,
        cfg.ensemble.failure_policy,
        0,
    )
    .await?;

    for (i, probabilities) in forecast.steps.iter().enumerate() {
        let line = ForecastLine {
            step: i + 1,
            probabilities,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

async fn run_backtest(
    cfg: Config,
    pool: Arc<TaskPool>,
    mut codes: Vec<Option<usize>>,
    warmup: usize,
    top: usize,
) -> anyhow::Result<()> {
    let alphabet = cfg.model.hmm_observations;
    let pending = codes.split_off(warmup.min(codes.len()));

    let mut wf = WalkForward::new(cfg, pool, SymbolCounts::new(alphabet))?.with_history(codes)?;
    let mut decision = TopK { k: top };
    let report = wf.run(pending, &mut decision).await?;

    for step in &report.steps {
        println!("{}", serde_json::to_string(step)?);
    }

    let summary = Summary {
        records: report.steps.len(),
        chunks: report.chunks,
        tasks: report.tasks,
        dropped: report.dropped,
        unresolved: wf.stats().unresolved(),
        hit_rate: report.hit_rate(|bet: &Vec<usize>, symbol| bet.contains(&symbol)),
        seed: wf.base_seed(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_apply_log_level_replaces_startup_filter() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        apply_log_level(&handle, "debug").unwrap();
        let current = handle.with_current(|f| f.to_string()).unwrap();
        assert_eq!(current, "debug");
    }
}
