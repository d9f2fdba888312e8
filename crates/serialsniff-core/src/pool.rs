//! Bounded worker pool.
//!
//! Workers are spawned on demand up to `max_threads`. A worker that finished
//! its job waits for the next one and exits after `idle_timeout_ms` unless
//! that would drop the pool below `min_threads`. Submitting a job while every
//! worker is busy and the pool is at its maximum fails instead of queueing,
//! since all jobs here are long-running loops.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::PoolConfig;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool exhausted ({max} threads busy)")]
    Exhausted { max: usize },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Job {
    label: String,
    run: Box<dyn FnOnce() + Send + 'static>,
}

#[derive(Default)]
struct Counters {
    threads: usize,
    /// Waiting workers not yet reserved for a submitted job.
    idle: usize,
    next_id: usize,
}

struct Shared {
    config: PoolConfig,
    counters: Mutex<Counters>,
    jobs: Receiver<Job>,
}

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: Sender<Job>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (sender, jobs) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                config,
                counters: Mutex::new(Counters::default()),
                jobs,
            }),
            sender,
        }
    }

    /// Run `job` on a pool thread.
    pub fn execute<F>(&self, label: &str, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job {
            label: label.to_string(),
            run: Box::new(job),
        };
        let mut counters = self.shared.counters.lock();
        if counters.idle > 0 {
            counters.idle -= 1;
            drop(counters);
            // The receiver lives in `shared`, so the channel cannot be closed.
            let _ = self.sender.send(job);
            return Ok(());
        }
        if counters.threads >= self.shared.config.max_threads {
            return Err(PoolError::Exhausted {
                max: self.shared.config.max_threads,
            });
        }
        counters.threads += 1;
        let id = counters.next_id;
        counters.next_id += 1;
        drop(counters);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("serialsniff-worker-{id}"))
            .spawn(move || worker_loop(shared, job));
        if let Err(err) = spawned {
            self.shared.counters.lock().threads -= 1;
            return Err(PoolError::Spawn(err));
        }
        log::debug!("spawned worker {id}");
        Ok(())
    }

    /// Number of live worker threads.
    pub fn threads(&self) -> usize {
        self.shared.counters.lock().threads
    }

    pub fn idle_threads(&self) -> usize {
        self.shared.counters.lock().idle
    }
}

fn worker_loop(shared: Arc<Shared>, first: Job) {
    let idle_timeout = Duration::from_millis(shared.config.idle_timeout_ms);
    let mut job = first;
    loop {
        run_job(job);
        shared.counters.lock().idle += 1;
        job = loop {
            match shared.jobs.recv_timeout(idle_timeout) {
                Ok(next) => break next,
                Err(RecvTimeoutError::Timeout) => {
                    let mut counters = shared.counters.lock();
                    if counters.idle > 0 && counters.threads > shared.config.min_threads {
                        counters.idle -= 1;
                        counters.threads -= 1;
                        log::debug!("idle worker exiting");
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let mut counters = shared.counters.lock();
                    counters.idle = counters.idle.saturating_sub(1);
                    counters.threads -= 1;
                    return;
                }
            }
        };
    }
}

fn run_job(job: Job) {
    let Job { label, run } = job;
    log::trace!("job {label} started");
    if panic::catch_unwind(AssertUnwindSafe(run)).is_err() {
        log::error!("job {label} panicked");
    } else {
        log::trace!("job {label} finished");
    }
}
