//! Worker pool for queued native callbacks.
//!
//! Each worker runs callbacks inside a panic isolation boundary, so a
//! failing callback is logged and the worker keeps serving the queue.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

/// A unit of work handed to a [`CallbackQueue`].
pub type NativeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Event-queueing collaborator that runs callbacks at some later point on
/// some other thread.
pub trait CallbackQueue: Send + Sync {
    /// Queue a callback for later execution.
    fn queue(&self, callback: NativeCallback);
}

/// Errors from creating a worker pool
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker pool needs at least one thread")]
    NoThreads,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Fixed-size pool of named worker threads fed by an unbounded channel.
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<NativeCallback>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool of `size` workers.
    pub fn new(name: &str, size: usize) -> Result<Self, WorkerError> {
        if size == 0 {
            return Err(WorkerError::NoThreads);
        }

        let (sender, receiver) = unbounded::<NativeCallback>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let rx = receiver.clone();
            let worker_name = format!("{}-{}", name, index);
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || {
                    debug!("Worker {} started", worker_name);
                    run_worker_loop(&worker_name, rx);
                    debug!("Worker {} stopped", worker_name);
                })?;
            workers.push(handle);
        }

        info!("Started worker pool '{}' with {} threads", name, size);

        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            workers,
        })
    }

    /// Get the number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Submit a callback. Returns false if the pool is shutting down.
    pub fn submit(&self, callback: NativeCallback) -> bool {
        match &self.sender {
            Some(sender) => sender.send(callback).is_ok(),
            None => false,
        }
    }
}

impl CallbackQueue for WorkerPool {
    fn queue(&self, callback: NativeCallback) {
        if !self.submit(callback) {
            error!("Worker pool '{}' rejected a callback", self.name);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("Worker pool '{}' shut down", self.name);
    }
}

/// Main worker loop with panic isolation.
fn run_worker_loop(worker_name: &str, rx: Receiver<NativeCallback>) {
    while let Ok(callback) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            error!(
                "Worker {} callback panicked: {}",
                worker_name,
                panic_message(payload.as_ref())
            );
        }
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_runs_callbacks() {
        let pool = WorkerPool::new("test-worker", 2).unwrap();
        let (tx, rx) = unbounded();

        for i in 0..4 {
            let tx = tx.clone();
            pool.queue(Box::new(move || tx.send(i).unwrap()));
        }

        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_worker_survives_panic() {
        let pool = WorkerPool::new("test-panic", 1).unwrap();
        let (tx, rx) = unbounded();

        pool.queue(Box::new(|| panic!("callback failure")));
        pool.queue(Box::new(move || tx.send("alive").unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "alive");
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            WorkerPool::new("test-empty", 0),
            Err(WorkerError::NoThreads)
        ));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
