//! Fixed-size pool of named worker threads fed from one job channel.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool needs at least one thread")]
    NoThreads,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("worker pool is shut down")]
    ShutDown,
}

pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers. Fails on zero threads or when a thread
    /// cannot be spawned; already spawned workers are joined first.
    pub fn initialize(threads: usize) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::NoThreads);
        }
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = Self {
            sender: Some(tx),
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let rx = Arc::clone(&rx);
            let spawned = thread::Builder::new()
                .name(format!("usyn-worker-{index}"))
                .spawn(move || worker_loop(index, rx));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(PoolError::Spawn(e));
                }
            }
        }
        debug!(threads, "worker pool started");
        Ok(pool)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Results travel through whatever channel the job captures.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::ShutDown)?;
        sender.send(Box::new(job)).map_err(|_| PoolError::ShutDown)
    }

    /// Close the job channel and join every worker. Queued jobs still run.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread died outside a job");
            }
        }
        debug!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let Ok(guard) = rx.lock() else {
                break;
            };
            guard.recv()
        };
        let Ok(job) = job else {
            break; // channel closed
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                worker = index,
                panic = panic_message(payload.as_ref()),
                "job panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            WorkerPool::initialize(0),
            Err(PoolError::NoThreads)
        ));
    }

    #[test]
    fn test_jobs_run_and_report() {
        let pool = WorkerPool::initialize(3).unwrap();
        assert_eq!(pool.threads(), 3);
        let (tx, rx) = mpsc::channel();
        for i in 0..20usize {
            let tx = tx.clone();
            pool.submit(move || {
                tx.send(i * i).unwrap();
            })
            .unwrap();
        }
        drop(tx);
        let mut got: Vec<usize> = rx.iter().collect();
        got.sort_unstable();
        assert_eq!(got, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::initialize(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();
        }
        rx.recv().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lost_job_closes_result_channel() {
        let pool = WorkerPool::initialize(2).unwrap();
        let (tx, rx) = mpsc::channel::<usize>();
        let tx2 = tx.clone();
        pool.submit(move || {
            let _keep = tx2;
            panic!("lost");
        })
        .unwrap();
        pool.submit(move || tx.send(7).unwrap()).unwrap();
        let got: Vec<usize> = rx.iter().collect();
        assert_eq!(got, vec![7]);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut pool = WorkerPool::initialize(1).unwrap();
        pool.shutdown();
        assert!(matches!(pool.submit(|| {}), Err(PoolError::ShutDown)));
        pool.shutdown();
    }
}
