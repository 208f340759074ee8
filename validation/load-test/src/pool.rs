//! Fixed-size worker pool fed by a bounded queue.
//!
//! `N` worker tasks share one bounded `mpsc` receiver. Jobs leave the queue
//! in submission order to whichever worker is free first, so at most `N`
//! jobs run at once and at most `queue_capacity` more wait in the queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Errors returned by the pool itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The pool no longer accepts work.
    #[error("worker pool is closed")]
    Closed,

    /// Worker tasks died while processing a job.
    #[error("{0} worker task(s) panicked")]
    WorkerPanicked(usize),
}

/// Processes one job. Implementations record their own outcome.
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J);
}

/// Bounded pool of `size` workers.
pub struct WorkerPool<J> {
    sender: Option<mpsc::Sender<J>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn the workers. Must be called from within a Tokio runtime.
    ///
    /// A `size` or `queue_capacity` of zero is treated as one.
    pub fn new<H>(size: usize, queue_capacity: usize, handler: Arc<H>) -> Self
    where
        H: JobHandler<J>,
    {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    receiver.clone(),
                    handler.clone(),
                    in_flight.clone(),
                ))
            })
            .collect();

        debug!(workers = size, queue_capacity, "Worker pool started");

        Self {
            sender: Some(sender),
            workers,
            size,
            in_flight,
        }
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: J) -> Result<(), DispatchError> {
        let sender = self.sender.as_ref().ok_or(DispatchError::Closed)?;
        sender.send(job).await.map_err(|_| DispatchError::Closed)
    }

    /// Close the queue and wait until every queued and running job is done.
    ///
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), DispatchError> {
        self.sender.take();

        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Worker task panicked");
                    panicked += 1;
                }
            }
        }

        if panicked > 0 {
            return Err(DispatchError::WorkerPanicked(panicked));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently being handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn worker_loop<J, H>(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<J>>>,
    handler: Arc<H>,
    in_flight: Arc<AtomicUsize>,
) where
    H: JobHandler<J>,
{
    let mut handled = 0usize;
    loop {
        // Only idle workers wait on the lock, so holding it across recv is fine.
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else { break };

        let _guard = InFlightGuard::enter(&in_flight);
        handler.handle(job).await;
        handled += 1;
    }
    debug!(worker = id, handled, "Worker finished");
}
