//! Fixed-size pool of persistent worker threads.
//!
//! Submitting hands the job straight to an idle worker when there is one and
//! queues it (FIFO) otherwise. A worker that finishes a job resolves that
//! job's handle, then pulls the next queued job or goes back to the idle set.
//! Jobs are CPU-bound model fits, so workers are OS threads; handles are
//! futures so an async caller can wait on a whole batch at once.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread;

use augur_core::error::TaskError;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch state shared between the submitter and the workers.
struct Dispatch {
    queue: VecDeque<Job>,
    idle: Vec<usize>,
    shutdown: bool,
}

struct Shared {
    dispatch: Mutex<Dispatch>,
    submitted: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Dispatch> {
        // Jobs run outside the lock, so a poisoned guard still holds
        // consistent dispatch state.
        self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by worker `id` after finishing a job: the next queued job, or
    /// `None` after marking the worker idle.
    fn next_or_idle(&self, id: usize) -> Option<Job> {
        let mut dispatch = self.lock();
        if dispatch.shutdown {
            return None;
        }
        match dispatch.queue.pop_front() {
            Some(job) => Some(job),
            None => {
                dispatch.idle.push(id);
                None
            }
        }
    }
}

/// Pool of persistent workers executing independent jobs.
pub struct TaskPool {
    shared: Arc<Shared>,
    /// One hand-off channel per worker; emptied on shutdown.
    senders: Mutex<Vec<mpsc::Sender<Job>>>,
    workers: usize,
}

impl TaskPool {
    /// Start `workers` threads (at least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            dispatch: Mutex::new(Dispatch {
                queue: VecDeque::new(),
                idle: (0..workers).rev().collect(),
                shutdown: false,
            }),
            submitted: AtomicUsize::new(0),
        });

        let mut senders = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel::<Job>();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("augur-worker-{id}"))
                .spawn(move || worker_loop(id, rx, shared))?;
            senders.push(tx);
        }

        info!("task pool: started {workers} workers");
        Ok(Self {
            shared,
            senders: Mutex::new(senders),
            workers,
        })
    }

    /// Run `task` on the pool. The handle resolves with its return value, or
    /// with a [`TaskError`] if it panicked, was abandoned, or the pool is shut
    /// down.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                TaskError::Panicked(message)
            });
            // The submitter may have stopped waiting.
            let _ = tx.send(result);
        });

        let mut dispatch = self.shared.lock();
        if dispatch.shutdown {
            return TaskHandle::failed(TaskError::ShutDown);
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        match dispatch.idle.pop() {
            Some(id) => {
                let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(mpsc::SendError(job)) = senders[id].send(job) {
                    warn!("task pool: worker {id} is gone, queueing job");
                    dispatch.queue.push_back(job);
                }
            }
            None => dispatch.queue.push_back(job),
        }

        TaskHandle { rx: Some(rx), failed: None }
    }

    /// Stop accepting work and drop queued jobs. Workers exit once their
    /// current job is done; this does not wait for them.
    pub fn shutdown(&self) {
        let abandoned = {
            let mut dispatch = self.shared.lock();
            if dispatch.shutdown {
                return;
            }
            dispatch.shutdown = true;
            std::mem::take(&mut dispatch.queue)
        };
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if !abandoned.is_empty() {
            warn!("task pool: abandoned {} queued jobs", abandoned.len());
        }
        drop(abandoned);
        info!("task pool: shut down");
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs accepted since the pool started.
    pub fn submitted(&self) -> usize {
        self.shared.submitted.load(Ordering::Relaxed)
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Workers currently waiting for a job.
    pub fn idle(&self) -> usize {
        self.shared.lock().idle.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, rx: mpsc::Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(job) = rx.recv() {
        let mut next = Some(job);
        while let Some(job) = next.take() {
            job();
            next = shared.next_or_idle(id);
        }
    }
    debug!("task pool: worker {id} exiting");
}

/// Future resolving to a pooled task's result.
pub struct TaskHandle<T> {
    rx: Option<oneshot::Receiver<Result<T, TaskError>>>,
    failed: Option<TaskError>,
}

impl<T> TaskHandle<T> {
    fn failed(err: TaskError) -> Self {
        Self {
            rx: None,
            failed: Some(err),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(err) = this.failed.take() {
            return Poll::Ready(Err(err));
        }
        match this.rx.as_mut() {
            Some(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(TaskError::Abandoned))),
            None => Poll::Ready(Err(TaskError::Abandoned)),
        }
    }
}
