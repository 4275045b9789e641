use crate::error::{ResonarError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queued jobs per worker before submissions start running inline.
const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// Fixed set of worker threads fed from one bounded queue.
///
/// Dropping the pool closes the queue, lets the workers drain what is
/// already queued and joins them.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(ResonarError::ThreadPool(
                "Thread pool needs at least one worker".to_string(),
            ));
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Job>(threads * QUEUE_DEPTH_PER_WORKER);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("resonar-dsp-{}", index))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| ResonarError::ThreadPool(format!("Failed to spawn worker: {}", e)))?;
            workers.push(worker);
        }

        log::info!("Thread pool started with {} workers", threads);

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `task` and returns a handle to its result.
    ///
    /// When the queue is full the task runs on the calling thread before
    /// this returns, so submission never blocks and never fails.
    pub fn submit<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(task());
        });

        let rejected = match &self.sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => None,
                Err(TrySendError::Full(job)) => {
                    log::warn!("Thread pool queue is full, running task inline");
                    Some(job)
                }
                Err(TrySendError::Disconnected(job)) => {
                    log::warn!("Thread pool workers are gone, running task inline");
                    Some(job)
                }
            },
            None => Some(job),
        };
        if let Some(job) = rejected {
            run_job(job);
        }

        TaskHandle {
            receiver: result_rx,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Thread pool worker panicked during shutdown");
            }
        }
        log::debug!("Thread pool stopped");
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        run_job(job);
    }
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("Thread pool task panicked");
    }
}

/// Future result of a submitted task.
pub struct TaskHandle<R> {
    receiver: Receiver<R>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task finished.
    pub fn get(self) -> Result<R> {
        self.receiver
            .recv()
            .map_err(|_| ResonarError::ThreadPool("Task panicked before producing a result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_results_come_back() {
        let pool = ThreadPool::new(2).unwrap();
        let handles: Vec<_> = (0..10).map(|i| pool.submit(move || i * i)).collect();
        let results: Vec<i32> = handles.into_iter().map(|h| h.get().unwrap()).collect();
        assert_eq!(results, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_threads_is_an_error() {
        assert!(matches!(ThreadPool::new(0), Err(ResonarError::ThreadPool(_))));
    }

    #[test]
    fn test_overflow_runs_inline() {
        let pool = ThreadPool::new(1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let blocker = pool.submit(move || {
            let _ = gate_rx.recv();
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..QUEUE_DEPTH_PER_WORKER * 2)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || counter.fetch_add(1, Ordering::SeqCst))
            })
            .collect();

        // The worker is blocked, so everything past the queue ran inline already.
        assert!(counter.load(Ordering::SeqCst) >= QUEUE_DEPTH_PER_WORKER - 1);

        drop(gate_tx);
        blocker.get().unwrap();
        for handle in handles {
            handle.get().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), QUEUE_DEPTH_PER_WORKER * 2);
    }

    #[test]
    fn test_panicking_task_reports_error_and_pool_survives() {
        let pool = ThreadPool::new(1).unwrap();
        let failed = pool.submit(|| -> i32 { panic!("boom") });
        assert!(failed.get().is_err());
        assert_eq!(pool.submit(|| 7).get().unwrap(), 7);
    }
}
