//! mrq: thin command-line wrapper around the mean-reversion research
//! engine. Parses arguments, loads `.env`, wires the SQL-backed stores to
//! the library crates, and maps results to process exit codes. Contains no
//! algorithmic logic of its own — everything here delegates to `mrq-core`,
//! `mrq-ingest`, `mrq-backtest`, and `mrq-optimizer`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use mrq_backtest::SimConfig;
use mrq_core::config::EngineConfig;
use mrq_core::types::{Objective, OptimizerMode, ParameterSet};
use mrq_ingest::{DownloadSpec, HttpKlineSource, IngestProgressFile};
use mrq_optimizer::{OptimizeRequest, PoolConfig, Stores};
use mrq_store::{init_schema, SqlCandleStore, SqlMetricsStore, SqlRatingStore, SqlRunStore, SqlTradeStore};

#[derive(Parser)]
#[command(name = "mrq", about = "Mean-reversion crypto research engine")]
struct Cli {
    /// Path to the TOML config file (defaults applied for anything absent).
    #[arg(long, global = true, default_value = "mrq.toml")]
    config: PathBuf,

    /// Database connection string understood by `sqlx::AnyPool`.
    #[arg(long, global = true, default_value = "sqlite://mrq.db?mode=rwc")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch historical candles for one or more symbols into the candle store.
    Ingest {
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// RFC-3339 timestamp, e.g. 2024-01-01T00:00:00Z
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "https://api.binance.com")]
        base_url: String,
        #[arg(long)]
        resume: bool,
        #[arg(long, default_value = "ingest-progress.json")]
        progress_file: PathBuf,
    },
    /// Run a single walk-forward backtest for one symbol and parameter set.
    Backtest {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        base: String,
        #[arg(long)]
        quote: String,
        /// RFC-3339 timestamp, e.g. 2024-01-01T00:00:00Z
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        z: f64,
        #[arg(long)]
        ma: usize,
        #[arg(long)]
        profit: f64,
        #[arg(long)]
        stop: f64,
    },
    /// Search the parameter space for one symbol via grid or EDA sampling.
    Optimize {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        base: String,
        #[arg(long)]
        quote: String,
        /// RFC-3339 timestamp, e.g. 2024-01-01T00:00:00Z
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, value_enum, default_value_t = CliMode::Grid)]
        mode: CliMode,
        #[arg(long, value_enum, default_value_t = CliObjective::Alpha)]
        objective: CliObjective,
        /// Re-evaluate parameter sets the metrics store already has a result for.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Seeds the EDA sampler's RNG for a reproducible run (ignored in grid mode).
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Grid,
    Eda,
}

impl From<CliMode> for OptimizerMode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::Grid => OptimizerMode::Grid,
            CliMode::Eda => OptimizerMode::Eda,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliObjective {
    Alpha,
    Sharpe,
    AnnualizedReturn,
}

impl From<CliObjective> for Objective {
    fn from(o: CliObjective) -> Self {
        match o {
            CliObjective::Alpha => Objective::Alpha,
            CliObjective::Sharpe => Objective::Sharpe,
            CliObjective::AnnualizedReturn => Objective::AnnualizedReturn,
        }
    }
}

/// Invalid-argument (exit 2), internal/process (1), and SIGINT (130) all
/// need a distinct path out of `main`, so errors are tagged before unwinding.
enum CliError {
    InvalidArgs(String),
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Fatal(e)
    }
}

impl From<mrq_core::error::Error> for CliError {
    fn from(e: mrq_core::error::Error) -> Self {
        match e {
            mrq_core::error::Error::InvalidInput(msg) => CliError::InvalidArgs(msg),
            other => CliError::Fatal(other.into()),
        }
    }
}

fn parse_ts(label: &str, raw: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CliError::InvalidArgs(format!("--{label} {raw:?} is not a valid RFC-3339 timestamp: {e}")))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "mrq=info".into()))
        .init();

    let cli = Cli::parse();

    let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_for_signal.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(CliError::InvalidArgs(msg)) => {
            eprintln!("invalid arguments: {msg}");
            std::process::exit(2);
        }
        Err(CliError::Fatal(e)) => {
            if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                tracing::warn!("interrupted by SIGINT, progress flushed");
                std::process::exit(130);
            }
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = EngineConfig::load_from_path(&cli.config)?;

    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .connect(&cli.db)
        .await
        .map_err(|e| CliError::Fatal(e.into()))?;
    init_schema(&pool).await.map_err(|e| CliError::Fatal(e.into()))?;

    let candle_store = Arc::new(SqlCandleStore::new(pool.clone()));
    let rating_store = Arc::new(SqlRatingStore::new(pool.clone()));
    let run_store = Arc::new(SqlRunStore::new(pool.clone()));
    let trade_store = Arc::new(SqlTradeStore::new(pool.clone()));
    let metrics_store = Arc::new(SqlMetricsStore::new(pool.clone()));

    match cli.command {
        Command::Ingest { symbols, start, end, base_url, resume, progress_file } => {
            if symbols.is_empty() {
                return Err(CliError::InvalidArgs("at least one --symbols entry is required".into()));
            }
            let start = parse_ts("start", &start)?;
            let end = parse_ts("end", &end)?;
            if end <= start {
                return Err(CliError::InvalidArgs(format!("--end {end} must be after --start {start}")));
            }

            let source = Arc::new(HttpKlineSource::new(base_url));
            let progress = Arc::new(IngestProgressFile::new(progress_file));
            let spec = DownloadSpec { symbols, start, end, resume };

            let report = mrq_ingest::run_ingest(source, candle_store, progress, config.ingest, config.ratelimit, spec).await;

            tracing::info!(
                inserted = report.total_inserted,
                failed_chunks = report.failed_chunks.len(),
                "ingest complete"
            );
            for f in &report.failed_chunks {
                tracing::warn!(symbol = %f.symbol, reason = %f.reason, "chunk failed");
            }
            Ok(())
        }

        Command::Backtest { symbol, base, quote, start, end, z, ma, profit, stop } => {
            let start = parse_ts("start", &start)?;
            let end = parse_ts("end", &end)?;
            if end <= start {
                return Err(CliError::InvalidArgs(format!("--end {end} must be after --start {start}")));
            }
            let params = ParameterSet { z_score_threshold: z, ma_period: ma, profit_pct: profit, stop_loss_pct: stop };
            let sim_cfg = SimConfig::default();

            let metrics = mrq_backtest::run_walk_forward(
                candle_store.as_ref(),
                rating_store.as_ref(),
                run_store.as_ref(),
                trade_store.as_ref(),
                metrics_store.as_ref(),
                &symbol,
                &base,
                &quote,
                &params,
                start,
                end,
                config.walk_forward.window_months,
                config.walk_forward.step_months,
                &sim_cfg,
            )
            .await?;

            tracing::info!(
                alpha = metrics.mean.alpha,
                sharpe = metrics.mean.sharpe,
                annualized_return = metrics.mean.annualized_return,
                positive_window_ratio = metrics.positive_window_ratio,
                "backtest complete"
            );
            Ok(())
        }

        Command::Optimize { symbol, base, quote, start, end, mode, objective, force, top, seed } => {
            let start = parse_ts("start", &start)?;
            let end = parse_ts("end", &end)?;
            if end <= start {
                return Err(CliError::InvalidArgs(format!("--end {end} must be after --start {start}")));
            }

            let stores = Stores {
                candle: candle_store,
                rating: rating_store,
                run: run_store,
                trade: trade_store,
                metrics: metrics_store,
            };

            let req = OptimizeRequest {
                symbol,
                base,
                quote,
                start,
                end,
                window_months: config.walk_forward.window_months,
                step_months: config.walk_forward.step_months,
                sim_cfg: SimConfig::default(),
                objective: Objective::from(objective),
                ranges: config.optimizer.ranges,
                pool: PoolConfig {
                    slots: config.optimizer.concurrency,
                    task_timeout: Duration::from_secs(config.optimizer.task_timeout_secs),
                    max_retries: config.optimizer.max_retries,
                    shutdown_grace: Duration::from_secs(30),
                },
                force,
                eda_seed: seed.or(config.optimizer.eda.seed),
            };

            let report = match OptimizerMode::from(mode) {
                OptimizerMode::Grid => mrq_optimizer::run_grid(&req, &stores).await?,
                OptimizerMode::Eda => {
                    mrq_optimizer::run_eda(
                        &req,
                        &stores,
                        config.optimizer.eda.phase1_samples,
                        config.optimizer.eda.phase2_samples,
                    )
                    .await?
                }
            };

            tracing::info!(
                dispatched = report.dispatched,
                skipped_duplicates = report.skipped_duplicates,
                ranked = report.ranked.len(),
                failed = report.failures.len(),
                "optimizer run complete"
            );
            for r in report.ranked.iter().take(top) {
                tracing::info!(fingerprint = %r.params.fingerprint(), objective_value = r.objective_value, "ranked result");
            }
            for f in report.failures.iter().take(top) {
                tracing::warn!(dimension = %f.dimension, reason = %f.reason, count = f.count, "failure group");
            }
            Ok(())
        }
    }
}
