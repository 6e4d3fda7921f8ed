//! Coordinator-side dispatch loop, one per connected worker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::job::Job;
use crate::protocol::{Connection, ProtocolError};
use crate::queue::PendingQueue;
use crate::registry::PoolRegistry;

/// Why a dispatch loop stopped.
#[derive(Debug)]
pub enum DispatchExit {
    /// The queue was closed (coordinator shutdown).
    QueueClosed,
    /// The connection failed; the job in flight, if any, was reported as failed.
    ConnectionFailed,
    /// The handler panicked; the job in flight, if any, was dropped.
    Panicked(String),
}

/// Feeds jobs from the shared queue to one worker connection.
///
/// The loop registers the worker, then repeatedly takes a job, sends its batch and waits for the
/// sorted result. The first transport or decoding error fails the job in flight and ends the loop:
/// the loop never retries, that is left to the job's submitter. The worker is deregistered and the
/// connection closed whenever the loop ends.
pub struct DispatchLoop {
    connection: Connection,
    queue: PendingQueue<Job>,
    registry: Arc<PoolRegistry>,
    response_timeout: Option<Duration>,
}

impl DispatchLoop {
    /// # Arguments
    /// * `connection` - Connection to the worker, owned by this loop
    /// * `queue` - Shared pending job queue
    /// * `registry` - Pool registry the worker is counted in while the loop runs
    /// * `response_timeout` - Deadline for a worker's answer. [`None`] waits indefinitely.
    pub fn new(
        connection: Connection,
        queue: PendingQueue<Job>,
        registry: Arc<PoolRegistry>,
        response_timeout: Option<Duration>,
    ) -> Self {
        DispatchLoop {
            connection,
            queue,
            registry,
            response_timeout,
        }
    }

    /// Runs the loop until the queue closes or the connection fails.
    /// Panics raised while serving are caught here and never reach the caller.
    pub fn run(self) -> DispatchExit {
        let peer = self.connection.peer();

        let exit = match panic::catch_unwind(AssertUnwindSafe(move || self.serve())) {
            Ok(exit) => exit,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("connection handler fault (peer: {:?}): {}", peer, reason);
                DispatchExit::Panicked(reason)
            }
        };

        log::debug!("dispatch loop finished (peer: {:?}): {:?}", peer, exit);
        return exit;
    }

    fn serve(mut self) -> DispatchExit {
        let _registration = self.registry.enroll();

        if let Err(err) = self.connection.set_receive_timeout(self.response_timeout) {
            log::warn!("connection setup failed (peer: {:?}): {}", self.connection.peer(), err);
            self.connection.close();
            return DispatchExit::ConnectionFailed;
        }

        let exit = loop {
            let job = match self.queue.pop() {
                Ok(job) => job,
                Err(_) => break DispatchExit::QueueClosed,
            };

            log::debug!(
                "dispatching partition {} (attempt: {}, items: {})",
                job.partition(),
                job.attempt(),
                job.batch_len()
            );

            match round_trip(&mut self.connection, &job) {
                Ok(sorted) => job.complete(sorted),
                Err(err) => {
                    log::warn!(
                        "partition {} attempt {} failed (peer: {:?}): {}",
                        job.partition(),
                        job.attempt(),
                        self.connection.peer(),
                        err
                    );
                    job.fail(err);
                    break DispatchExit::ConnectionFailed;
                }
            }
        };

        self.connection.close();
        return exit;
    }
}

/// Sends a job's batch and reads the sorted result.
pub fn round_trip(connection: &mut Connection, job: &Job) -> Result<Vec<String>, ProtocolError> {
    connection.send_raw(job.payload())?;
    let sorted: Vec<String> = connection.receive()?;

    if sorted.len() != job.batch_len() {
        return Err(ProtocolError::LengthMismatch {
            sent: job.batch_len(),
            received: sorted.len(),
        });
    }

    return Ok(sorted);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_string()
    }
}
