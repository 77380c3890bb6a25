//! Optimizer scheduler: grid and EDA search over the mean-reversion
//! strategy's four-dimensional parameter space, dispatched across a bounded
//! worker pool against the walk-forward driver.

pub mod dashboard;
pub mod eda;
pub mod grid;
pub mod pool;
pub mod scheduler;

pub use dashboard::{Dashboard, DashboardSnapshot, SlotState};
pub use pool::{PoolConfig, PoolOutcome, WorkerPool};
pub use scheduler::{run_eda, run_grid, FailureGroup, OptimizeRequest, RankedResult, SchedulerReport, Stores};
