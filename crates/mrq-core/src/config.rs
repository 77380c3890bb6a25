use serde::{Deserialize, Serialize};

use crate::types::{Objective, OptimizerMode};

/// One tunable dimension of the parameter search space
/// (`optimizer.ranges.{z,ma,profit,stop}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeConfig {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// The four search-space ranges the optimizer draws parameter sets from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizerRanges {
    pub z: RangeConfig,
    pub ma: RangeConfig,
    pub profit: RangeConfig,
    pub stop: RangeConfig,
}

impl Default for OptimizerRanges {
    fn default() -> Self {
        Self {
            z: RangeConfig { min: 1.5, max: 4.5, step: 0.1 },
            ma: RangeConfig { min: 2.0, max: 20.0, step: 2.0 },
            profit: RangeConfig { min: 1.0, max: 15.0, step: 0.5 },
            stop: RangeConfig { min: 1.0, max: 10.0, step: 0.5 },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdaConfig {
    pub phase1_samples: usize,
    pub phase2_samples: usize,
    /// Fixes the RNG seed for both sampling phases when set, making the
    /// whole two-phase run reproducible. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EdaConfig {
    fn default() -> Self {
        Self { phase1_samples: 20, phase2_samples: 10, seed: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub mode: OptimizerMode,
    pub objective: Objective,
    pub eda: EdaConfig,
    pub ranges: OptimizerRanges,
    pub concurrency: usize,
    pub task_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            mode: OptimizerMode::Grid,
            objective: Objective::Alpha,
            eda: EdaConfig::default(),
            ranges: OptimizerRanges::default(),
            concurrency: default_worker_slots(),
            task_timeout_secs: 600,
            max_retries: 2,
        }
    }
}

/// Default worker pool size: number of logical cores, capped at
/// 8, falling back to 4 if the platform can't report parallelism.
pub fn default_worker_slots() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: u32,
    pub chunk_days: i64,
    pub max_concurrent_symbols: usize,
    pub max_concurrent_chunks: usize,
    pub flush_batch: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            chunk_days: 30,
            max_concurrent_symbols: 3,
            max_concurrent_chunks: 2,
            flush_batch: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub window_ms: u64,
    pub max_requests_per_window: u32,
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            window_ms: 60_000,
            max_requests_per_window: 1200,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub window_months: u32,
    pub step_months: u32,
    pub interval_minutes: i64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self { window_months: 6, step_months: 3, interval_minutes: 5 }
    }
}

/// The full set of recognized configuration options, loaded from
/// a TOML file with environment-variable overlay. Constructed once in
/// `mrq-cli::main` and passed down by reference; never a hidden global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub ratelimit: RateLimitConfig,
    pub optimizer: OptimizerConfig,
    pub walk_forward: WalkForwardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            ratelimit: RateLimitConfig::default(),
            optimizer: OptimizerConfig::default(),
            walk_forward: WalkForwardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads from a TOML file if present, else returns defaults. Callers
    /// apply environment-variable overrides afterward for any single knob
    /// that needs one (e.g. a rate-limit override read directly by
    /// `mrq-ingest`).
    pub fn load_from_path(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::error::Error::InvalidInput(e.to_string()))
    }
}
