//! Live progress tracking for a scheduler run: per-slot state plus global
//! counters, following the ingest downloader's `Mutex<HashMap>` progress
//! pattern but keyed by worker slot and backed by `dashmap` for lock-free
//! concurrent updates from every worker task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use mrq_core::types::ParameterSet;

/// What one worker slot is doing right now, for display purposes only.
#[derive(Debug, Clone)]
pub enum SlotState {
    Idle,
    Running { params: ParameterSet, since: Instant },
}

/// A point-in-time snapshot suitable for a periodic ticker log line.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub insufficient_data: u64,
    pub total: u64,
    pub elapsed_secs: f64,
    pub throughput_per_min: f64,
    pub eta_secs: Option<f64>,
    pub best_objective: Option<f64>,
    pub best_params: Option<ParameterSet>,
}

/// Shared live state for one scheduler run. Cheap to clone (`Arc` internally
/// via `DashMap`'s own sharding); share one instance across all worker tasks.
pub struct Dashboard {
    started_at: Instant,
    total: u64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    insufficient_data: AtomicU64,
    slots: DashMap<usize, SlotState>,
    best: DashMap<(), (f64, ParameterSet)>,
}

impl Dashboard {
    pub fn new(total: u64, slot_count: usize) -> Self {
        let slots = DashMap::with_capacity(slot_count);
        for i in 0..slot_count {
            slots.insert(i, SlotState::Idle);
        }
        Self {
            started_at: Instant::now(),
            total,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            insufficient_data: AtomicU64::new(0),
            slots,
            best: DashMap::new(),
        }
    }

    pub fn mark_running(&self, slot: usize, params: ParameterSet) {
        self.slots.insert(slot, SlotState::Running { params, since: Instant::now() });
    }

    pub fn mark_idle(&self, slot: usize) {
        self.slots.insert(slot, SlotState::Idle);
    }

    pub fn record_success(&self, params: ParameterSet, objective_value: f64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.best
            .entry(())
            .and_modify(|(best_v, best_p)| {
                if objective_value > *best_v {
                    *best_v = objective_value;
                    *best_p = params;
                }
            })
            .or_insert((objective_value, params));
    }

    pub fn record_insufficient_data(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.insufficient_data.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let elapsed_secs = self.started_at.elapsed().as_secs_f64().max(1e-6);
        let throughput_per_min = completed as f64 / elapsed_secs * 60.0;
        let remaining = self.total.saturating_sub(completed);
        let eta_secs = if throughput_per_min > 0.0 {
            Some(remaining as f64 / throughput_per_min * 60.0)
        } else {
            None
        };
        let (best_objective, best_params) = self
            .best
            .get(&())
            .map(|entry| (Some(entry.0), Some(entry.1)))
            .unwrap_or((None, None));

        DashboardSnapshot {
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            insufficient_data: self.insufficient_data.load(Ordering::Relaxed),
            total: self.total,
            elapsed_secs,
            throughput_per_min,
            eta_secs,
            best_objective,
            best_params,
        }
    }

    /// Emits a single `tracing::info!` ticker line summarizing current progress.
    pub fn log_tick(&self) {
        let snap = self.snapshot();
        tracing::info!(
            completed = snap.completed,
            total = snap.total,
            failed = snap.failed,
            timed_out = snap.timed_out,
            throughput_per_min = snap.throughput_per_min,
            eta_secs = snap.eta_secs,
            best_objective = snap.best_objective,
            "optimizer progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_tracks_highest_objective_seen() {
        let dash = Dashboard::new(10, 2);
        let p1 = ParameterSet { z_score_threshold: 2.0, ma_period: 10, profit_pct: 5.0, stop_loss_pct: 2.0 };
        let p2 = ParameterSet { z_score_threshold: 2.5, ma_period: 12, profit_pct: 6.0, stop_loss_pct: 2.5 };

        dash.record_success(p1, 1.2);
        dash.record_success(p2, 0.8);
        let snap = dash.snapshot();
        assert_eq!(snap.best_objective, Some(1.2));
        assert_eq!(snap.best_params.unwrap().fingerprint(), p1.fingerprint());

        dash.record_success(p2, 2.0);
        let snap = dash.snapshot();
        assert_eq!(snap.best_objective, Some(2.0));
        assert_eq!(snap.best_params.unwrap().fingerprint(), p2.fingerprint());
    }

    #[test]
    fn counts_partition_by_outcome_kind() {
        let dash = Dashboard::new(4, 1);
        dash.record_success(ParameterSet { z_score_threshold: 2.0, ma_period: 10, profit_pct: 5.0, stop_loss_pct: 2.0 }, 1.0);
        dash.record_timeout();
        dash.record_failure();
        dash.record_insufficient_data();
        let snap = dash.snapshot();
        assert_eq!(snap.completed, 4);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.insufficient_data, 1);
    }
}
