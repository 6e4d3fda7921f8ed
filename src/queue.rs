//! Pending job queue.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// The queue was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl Error for QueueClosed {}

impl Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job queue closed")
    }
}

/// Bounded multi-producer multi-consumer queue of jobs awaiting a worker.
///
/// Whichever consumer is free first takes the next job. Closing the queue wakes every blocked producer
/// and consumer and drops the jobs still queued, which their submitters observe as failed attempts.
/// Cloning yields another handle to the same queue.
pub struct PendingQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    // Dropping the sender disconnects `closed`, which is what blocked callers select on.
    closer: Arc<Mutex<Option<Sender<()>>>>,
    closed: Receiver<()>,
}

impl<T> Clone for PendingQueue<T> {
    fn clone(&self) -> Self {
        PendingQueue {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            closer: Arc::clone(&self.closer),
            closed: self.closed.clone(),
        }
    }
}

impl<T> PendingQueue<T> {
    /// Creates a queue holding at most `capacity` pending jobs.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let (closer, closed) = bounded(0);

        return PendingQueue {
            sender,
            receiver,
            closer: Arc::new(Mutex::new(Some(closer))),
            closed,
        };
    }

    /// Enqueues a job, blocking while the queue is full. On a closed queue the job is dropped.
    pub fn push(&self, job: T) -> Result<(), QueueClosed> {
        if self.is_closed() {
            return Err(QueueClosed);
        }

        select! {
            send(self.sender, job) -> result => result.map_err(|_| QueueClosed)?,
            recv(self.closed) -> _ => return Err(QueueClosed),
        }

        // lost a race with close(): nobody will pop this job any more
        if self.is_closed() {
            self.drain();
        }

        return Ok(());
    }

    /// Takes the next job, blocking until one is available or the queue is closed.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        self.pop_inner(None)?.ok_or(QueueClosed)
    }

    /// Like [`PendingQueue::pop`], but gives up after `timeout` with `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        self.pop_inner(Some(timeout))
    }

    fn pop_inner(&self, timeout: Option<Duration>) -> Result<Option<T>, QueueClosed> {
        if self.is_closed() {
            return Err(QueueClosed);
        }

        let deadline = match timeout {
            Some(timeout) => crossbeam_channel::after(timeout),
            None => never(),
        };

        select! {
            recv(self.receiver) -> job => job.map(Some).map_err(|_| QueueClosed),
            recv(self.closed) -> _ => Err(QueueClosed),
            recv(deadline) -> _ => Ok(None),
        }
    }

    /// Closes the queue and drops every job still waiting in it. Idempotent.
    pub fn close(&self) {
        let closer = match self.closer.lock() {
            Ok(mut closer) => closer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if closer.is_some() {
            drop(closer);
            let dropped = self.drain();
            log::debug!("job queue closed ({} pending jobs dropped)", dropped);
        }
    }

    fn drain(&self) -> usize {
        self.receiver.try_iter().count()
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.closed.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Number of jobs waiting for a worker.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
