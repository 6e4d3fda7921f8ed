//! Jobs and their per-attempt outcome channels.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::protocol::ProtocolError;

/// One delivery attempt of a partition.
///
/// A job carries the already encoded batch and a pair of single-slot outcome channels that belong to
/// this attempt only. Both [`Job::complete`] and [`Job::fail`] consume the job, so at most one outcome is
/// produced per attempt. Dropping a job without an outcome (a handler that panicked, a queue that was
/// shut down) disconnects both channels, which the submitter observes as a failed attempt.
pub struct Job {
    partition: usize,
    attempt: usize,
    batch_len: usize,
    payload: Arc<[u8]>,
    success: Sender<Vec<String>>,
    failure: Sender<ProtocolError>,
}

/// Submitter side of a single delivery attempt.
pub struct JobHandle {
    partition: usize,
    attempt: usize,
    success: Receiver<Vec<String>>,
    failure: Receiver<ProtocolError>,
}

/// What a submitter observes for one attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The worker returned the sorted batch.
    Sorted(Vec<String>),
    /// The attempt failed. `None` means the job was dropped without an explicit failure.
    Failed(Option<ProtocolError>),
}

impl Job {
    /// Creates a fresh attempt of a partition together with its handle.
    ///
    /// # Arguments
    /// * `partition` - Index of the partition in the input
    /// * `attempt` - Delivery attempt number, starting at 1
    /// * `batch_len` - Number of strings in the encoded batch
    /// * `payload` - Newline-terminated encoded batch
    pub fn new(partition: usize, attempt: usize, batch_len: usize, payload: Arc<[u8]>) -> (Job, JobHandle) {
        let (success_tx, success_rx) = bounded(1);
        let (failure_tx, failure_rx) = bounded(1);

        let job = Job {
            partition,
            attempt,
            batch_len,
            payload,
            success: success_tx,
            failure: failure_tx,
        };
        let handle = JobHandle {
            partition,
            attempt,
            success: success_rx,
            failure: failure_rx,
        };

        return (job, handle);
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Number of strings in the batch; a valid result has the same length.
    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Delivers the sorted batch. A submitter that already gave up on this attempt is not an error.
    pub fn complete(self, sorted: Vec<String>) {
        let _ = self.success.try_send(sorted);
    }

    /// Reports this attempt as failed.
    pub fn fail(self, err: ProtocolError) {
        let _ = self.failure.try_send(err);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("partition", &self.partition)
            .field("attempt", &self.attempt)
            .field("batch_len", &self.batch_len)
            .finish()
    }
}

impl JobHandle {
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Blocks until this attempt produces an outcome.
    pub fn wait(self) -> Outcome {
        select! {
            recv(self.success) -> sorted => match sorted {
                Ok(sorted) => Outcome::Sorted(sorted),
                // the job is gone, but a failure may still be sitting in the other slot
                Err(_) => Outcome::Failed(self.failure.try_recv().ok()),
            },
            recv(self.failure) -> err => match err {
                Ok(err) => Outcome::Failed(Some(err)),
                Err(_) => match self.success.try_recv() {
                    Ok(sorted) => Outcome::Sorted(sorted),
                    Err(_) => Outcome::Failed(None),
                },
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::sync::Arc;
    use std::thread;

    use super::{Job, Outcome};
    use crate::protocol::ProtocolError;

    fn payload() -> Arc<[u8]> {
        Arc::from(&b"[\"b\",\"a\"]\n"[..])
    }

    #[test]
    fn test_success_outcome() {
        let (job, handle) = Job::new(3, 1, 2, payload());
        assert_eq!(job.partition(), 3);
        assert_eq!(job.batch_len(), 2);

        thread::spawn(move || job.complete(vec!["a".into(), "b".into()]));

        match handle.wait() {
            Outcome::Sorted(sorted) => assert_eq!(sorted, vec!["a", "b"]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_failure_outcome() {
        let (job, handle) = Job::new(0, 1, 2, payload());
        job.fail(ProtocolError::IO(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));

        assert!(matches!(handle.wait(), Outcome::Failed(Some(ProtocolError::IO(_)))));
    }

    #[test]
    fn test_dropped_job_is_a_failure() {
        let (job, handle) = Job::new(0, 1, 2, payload());
        drop(job);

        assert!(matches!(handle.wait(), Outcome::Failed(None)));
    }

    #[test]
    fn test_attempts_do_not_share_channels() {
        let (stale, stale_handle) = Job::new(0, 1, 2, payload());
        drop(stale_handle);
        let (fresh, fresh_handle) = Job::new(0, 2, 2, payload());

        // a late answer to the aborted attempt goes nowhere
        stale.complete(vec!["stale".into(), "stale".into()]);
        fresh.fail(ProtocolError::ConnectionClosed);

        assert_eq!(fresh_handle.attempt(), 2);
        assert!(matches!(
            fresh_handle.wait(),
            Outcome::Failed(Some(ProtocolError::ConnectionClosed))
        ));
    }
}
