use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;

use crate::engine::{Job, ResultType};

/// Fixed set of named threads draining one job queue.
///
/// Threads can be added while the pool runs but never removed; the pool stops
/// when it is shut down.
pub(crate) struct WorkerPool {
    result_type: ResultType,
    sender: Mutex<Option<Sender<Arc<dyn Job>>>>,
    receiver: Receiver<Arc<dyn Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(result_type: ResultType, threads: usize) -> Self {
        let (sender, receiver) = unbounded();
        let pool = WorkerPool {
            result_type,
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(Vec::new()),
        };
        pool.ensure_minimum(threads.max(1));
        pool
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Grows the pool to at least `threads` workers.
    pub(crate) fn ensure_minimum(&self, threads: usize) {
        let mut workers = self.workers.lock().unwrap();
        while workers.len() < threads {
            let receiver = self.receiver.clone();
            let name = format!("panc-{}-{}", self.result_type, workers.len());
            let spawned = thread::Builder::new().name(name).spawn(move || {
                for job in receiver.iter() {
                    job.run();
                }
            });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    tracing::error!("cannot start {} worker: {err}", self.result_type);
                    break;
                }
            }
        }
        debug!(pool = %self.result_type, size = workers.len(), "worker pool size");
    }

    /// Queues a job. After shutdown the job is interrupted instead.
    pub(crate) fn submit(&self, job: Arc<dyn Job>) {
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(sender) => {
                if let Err(rejected) = sender.send(job) {
                    rejected.into_inner().interrupt();
                }
            }
            None => job.interrupt(),
        }
    }

    /// Stops accepting jobs and interrupts the queued ones. Workers exit once
    /// their current job is done.
    pub(crate) fn close(&self) {
        drop(self.sender.lock().unwrap().take());
        for job in self.receiver.try_iter() {
            job.interrupt();
        }
    }

    /// Closes the pool and joins the workers.
    pub(crate) fn shutdown(&self) {
        self.close();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}
