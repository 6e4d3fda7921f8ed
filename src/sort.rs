//! Distributed sorter: partitions the input across the worker pool and merges the sorted runs.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::ops::Range;
use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::job::{Job, Outcome};
use crate::merger::BinaryHeapMerger;
use crate::protocol::{self, ProtocolError};
use crate::queue::PendingQueue;
use crate::registry::PoolRegistry;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// No worker was registered when partitioning started.
    NoWorkers,
    /// The job queue was closed while a partition was still outstanding.
    Cancelled,
    /// A partition failed on every attempt the retry policy allows.
    RetriesExhausted { partition: usize, attempts: usize },
    /// Partition serialization error.
    SerializationError(ProtocolError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::SerializationError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::NoWorkers => write!(f, "no workers available"),
            SortError::Cancelled => write!(f, "sort cancelled: job queue closed"),
            SortError::RetriesExhausted { partition, attempts } => {
                write!(f, "partition {} failed after {} attempts", partition, attempts)
            }
            SortError::SerializationError(err) => write!(f, "partition serialization error: {}", err),
        }
    }
}

/// Resubmission policy for failed delivery attempts.
///
/// The default policy retries forever without delay: a partition is resubmitted as soon as an attempt
/// fails, for as long as it takes a worker to complete it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum delivery attempts per partition. [`None`] means unlimited.
    max_attempts: Option<usize>,
    /// Delay before a failed partition is resubmitted.
    backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        RetryPolicy::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> RetryPolicy {
        self.max_attempts = Some(max_attempts.max(1));
        return self;
    }

    pub fn with_backoff(mut self, backoff: Duration) -> RetryPolicy {
        self.backoff = backoff;
        return self;
    }

    /// Checks whether another attempt is allowed after `attempts` failed ones.
    pub fn allows_retry(&self, attempts: usize) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

/// Distributed sorter builder. Provides methods for [`DistributedSorter`] initialization.
#[derive(Debug, Clone, Default)]
pub struct DistributedSorterBuilder {
    /// Retry policy for failed partitions.
    retry: RetryPolicy,
}

impl DistributedSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        DistributedSorterBuilder::default()
    }

    /// Builds a [`DistributedSorter`] feeding `queue` and sizing partitions from `registry`.
    pub fn build(self, queue: PendingQueue<Job>, registry: Arc<PoolRegistry>) -> DistributedSorter {
        DistributedSorter {
            queue,
            registry,
            retry: self.retry,
        }
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> DistributedSorterBuilder {
        self.retry = retry;
        return self;
    }

    /// Limits delivery attempts per partition.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> DistributedSorterBuilder {
        self.retry = self.retry.with_max_attempts(max_attempts);
        return self;
    }

    /// Sets the delay before a failed partition is resubmitted.
    pub fn with_backoff(mut self, backoff: Duration) -> DistributedSorterBuilder {
        self.retry = self.retry.with_backoff(backoff);
        return self;
    }
}

/// Distributed sorter.
pub struct DistributedSorter {
    /// Queue the partitions are submitted to.
    queue: PendingQueue<Job>,
    /// Live worker count, used to size partitions.
    registry: Arc<PoolRegistry>,
    /// Retry policy for failed partitions.
    retry: RetryPolicy,
}

impl DistributedSorter {
    /// Creates a sorter with the default (unbounded) retry policy.
    pub fn new(queue: PendingQueue<Job>, registry: Arc<PoolRegistry>) -> Self {
        DistributedSorterBuilder::new().build(queue, registry)
    }

    /// Sorts the input on the worker pool.
    /// Returns an iterator over the sorted data; it yields exactly `input.len()` items.
    ///
    /// The input is split into one contiguous partition per registered worker, every partition is
    /// submitted as a job and resubmitted until a worker returns it sorted, and the sorted runs are
    /// merged. Fails fast with [`SortError::NoWorkers`] if the pool is empty.
    ///
    /// # Arguments
    /// * `input` - Normalized input data
    pub fn sort(&self, input: Vec<String>) -> Result<BinaryHeapMerger<String, Vec<String>>, SortError> {
        let workers = self.registry.current_count();
        if workers == 0 {
            return Err(SortError::NoWorkers);
        }

        let ranges = partition_ranges(input.len(), workers);

        log::info!(
            "starting job distribution (items: {}, partitions: {})",
            input.len(),
            ranges.len()
        );

        let runs = thread::scope(|scope| {
            let submissions: Vec<_> = ranges
                .into_iter()
                .enumerate()
                .map(|(partition, range)| {
                    let batch = &input[range];
                    scope.spawn(move || self.submit(partition, batch))
                })
                .collect();

            log::info!("starting result collection");

            submissions
                .into_iter()
                .map(|submission| match submission.join() {
                    Ok(run) => run,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect::<Result<Vec<Vec<String>>, SortError>>()
        })?;

        log::info!("all {} partitions sorted, merging", runs.len());

        return Ok(BinaryHeapMerger::new(runs));
    }

    /// Submits one partition until a worker returns it sorted or the retry policy gives up.
    /// Every attempt gets a fresh job, so an answer to an abandoned attempt can never be taken for
    /// the answer to the current one.
    fn submit(&self, partition: usize, batch: &[String]) -> Result<Vec<String>, SortError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let payload: Arc<[u8]> = Arc::from(protocol::encode(batch).map_err(SortError::SerializationError)?);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (job, handle) = Job::new(partition, attempt, batch.len(), Arc::clone(&payload));

            self.queue.push(job).map_err(|_| SortError::Cancelled)?;

            match handle.wait() {
                Outcome::Sorted(sorted) => {
                    log::debug!("partition {} sorted (attempt: {})", partition, attempt);
                    return Ok(sorted);
                }
                Outcome::Failed(err) => {
                    let reason = err.map_or_else(|| "job dropped".to_string(), |err| err.to_string());
                    log::warn!(
                        "partition {} attempt {} failed, resubmitting: {}",
                        partition,
                        attempt,
                        reason
                    );
                }
            }

            if !self.retry.allows_retry(attempt) {
                return Err(SortError::RetriesExhausted {
                    partition,
                    attempts: attempt,
                });
            }

            if !self.retry.backoff().is_zero() {
                thread::sleep(self.retry.backoff());
            }
        }
    }
}

/// Splits `len` items into `parts` contiguous ranges of `len / parts` items each; the last range
/// absorbs the remainder. Ranges are returned in index order and cover `0..len` exactly once.
pub fn partition_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }

    let size = len / parts;

    return (0..parts)
        .map(|idx| {
            let start = idx * size;
            let end = if idx == parts - 1 { len } else { start + size };
            start..end
        })
        .collect();
}
