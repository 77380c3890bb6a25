//! Fixed-size async worker pool: a bounded semaphore gates
//! concurrency, each task runs under a timeout with bounded retries, and a
//! SIGINT watcher drives a graceful-then-forced shutdown exactly as
//! `mrq-ingest`'s downloader gates its own concurrent fetches.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use mrq_core::error::Error;

/// A unit of dispatched work: an opaque label plus a boxed future factory so
/// the pool never needs to know what a backtest task actually does.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskOutput, Error>> + Send>>;

/// What one task call produces on success, opaque to the pool itself.
pub type TaskOutput = Box<dyn std::any::Any + Send>;

pub struct PoolConfig {
    pub slots: usize,
    pub task_timeout: Duration,
    pub max_retries: u32,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: mrq_core::config::default_worker_slots(),
            task_timeout: Duration::from_secs(600),
            max_retries: 2,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// The result of running one task through the pool: either its final
/// `TaskOutput`, or the reason it never produced one.
pub enum PoolOutcome {
    Completed(TaskOutput),
    TimedOut,
    Failed(Error),
    Cancelled,
}

/// Bounded-concurrency executor with retrying, timeout, and SIGINT-aware
/// cancellation. One instance is created per scheduler run.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    cfg: PoolConfig,
    shutting_down: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cfg.slots)),
            cfg,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn slots(&self) -> usize {
        self.cfg.slots
    }

    /// Signals that the pool should stop accepting new tasks. Already
    /// in-flight tasks keep running until the caller awaits them out with
    /// `run` or it hits its own timeout.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.cfg.shutdown_grace
    }

    /// Acquires a slot, then runs `make_task` (a factory so each retry gets a
    /// fresh future — futures can't be polled twice) up to `max_retries + 1`
    /// times, bounding each attempt at `task_timeout`.
    pub async fn run<F>(&self, make_task: F) -> PoolOutcome
    where
        F: Fn() -> TaskFuture,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return PoolOutcome::Cancelled;
        }

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return PoolOutcome::Cancelled,
        };

        let mut attempt = 0u32;
        loop {
            let handle = tokio::spawn(make_task());
            let mut handle = handle;
            let outcome = tokio::select! {
                res = &mut handle => {
                    match res {
                        Ok(Ok(output)) => Some(PoolOutcome::Completed(output)),
                        Ok(Err(e)) => Some(PoolOutcome::Failed(e)),
                        Err(_join_err) => Some(PoolOutcome::Cancelled),
                    }
                }
                _ = tokio::time::sleep(self.cfg.task_timeout) => {
                    handle.abort();
                    None
                }
            };

            match outcome {
                Some(PoolOutcome::Failed(_)) if attempt < self.cfg.max_retries => {
                    attempt += 1;
                    continue;
                }
                Some(result) => {
                    drop(permit);
                    return result;
                }
                None if attempt < self.cfg.max_retries => {
                    attempt += 1;
                    continue;
                }
                None => {
                    drop(permit);
                    return PoolOutcome::TimedOut;
                }
            }
        }
    }

    /// Waits up to `shutdown_grace`, then reports whether callers should
    /// force-abort remaining work. Intended to be raced against the pool's
    /// outstanding task handles by the scheduler.
    pub async fn grace_deadline(&self) {
        tokio::time::sleep(self.cfg.shutdown_grace).await;
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }
}

/// Spawns a task that resolves once SIGINT is received and flips
/// `shutting_down`, giving in-flight work a grace period before abort.
pub fn spawn_sigint_watcher(pool_shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received SIGINT, beginning graceful shutdown");
            pool_shutdown.store(true, Ordering::SeqCst);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_task() -> TaskFuture {
        Box::pin(async { Ok::<TaskOutput, Error>(Box::new(42i32) as TaskOutput) })
    }

    fn failing_task(attempts: Arc<std::sync::atomic::AtomicU32>) -> TaskFuture {
        let attempts = attempts.clone();
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidInput("boom".into()))
        })
    }

    #[tokio::test]
    async fn successful_task_completes_without_retry() {
        let pool = WorkerPool::new(PoolConfig { slots: 1, ..PoolConfig::default() });
        let outcome = pool.run(ok_task).await;
        assert!(matches!(outcome, PoolOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn failed_task_retries_up_to_max_retries_then_fails() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let pool = WorkerPool::new(PoolConfig { slots: 1, max_retries: 2, ..PoolConfig::default() });
        let a = attempts.clone();
        let outcome = pool.run(move || failing_task(a.clone())).await;
        assert!(matches!(outcome, PoolOutcome::Failed(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // 1 initial + 2 retries
    }

    #[tokio::test]
    async fn shutting_down_pool_rejects_new_tasks() {
        let pool = WorkerPool::new(PoolConfig { slots: 1, ..PoolConfig::default() });
        pool.begin_shutdown();
        let outcome = pool.run(ok_task).await;
        assert!(matches!(outcome, PoolOutcome::Cancelled));
    }

    #[tokio::test]
    async fn slow_task_times_out_and_retries() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let a = attempts.clone();
        let pool = WorkerPool::new(PoolConfig {
            slots: 1,
            task_timeout: Duration::from_millis(20),
            max_retries: 1,
            ..PoolConfig::default()
        });
        let outcome = pool
            .run(move || {
                let a = a.clone();
                Box::pin(async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<TaskOutput, Error>(Box::new(1i32) as TaskOutput)
                })
            })
            .await;
        assert!(matches!(outcome, PoolOutcome::TimedOut));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
