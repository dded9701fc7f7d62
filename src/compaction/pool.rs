//! Bounded worker pool for partition compaction tasks.
//!
//! A fixed set of named threads drains a shared queue. Each submitted task
//! returns a [`TaskHandle`] the orchestrator joins after fan-out; dropping
//! the pool shuts the workers down and joins them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<VecDeque<Job>>,
    cond: Condvar,
    shutdown: AtomicBool,
}

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with the given number of worker threads.
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("mobstore-compaction-{}", i))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn compaction worker")
            })
            .collect();

        Self { shared, workers }
    }

    /// Submit a task, returning a handle to its result.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(task());
        });

        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(job);
        }
        self.shared.cond.notify_one();

        TaskHandle { rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                shared.cond.wait(&mut queue);
            }
        };
        job();
    }
}

/// Handle to the result of a submitted task.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes and return its result.
    pub fn join(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::internal("compaction worker dropped its result"))
    }
}
