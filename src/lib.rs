//! `dist-sort` is a distributed external sort.
//!
//! A single coordinator splits a sequence of strings into one contiguous partition per connected
//! worker, ships every partition to the pool as a job, and merges the sorted partitions it gets back
//! into one globally sorted sequence. Workers connect over TCP, may come and go at any time, and are
//! interchangeable: a partition whose worker disappears is simply resubmitted to whichever worker is
//! free next.
//!
//! # Overview
//!
//! * **Wire protocol** ([`protocol`]): newline-terminated JSON arrays of strings, strictly
//!   request/response per connection.
//! * **Pool registry** ([`registry`]): live count of connected workers, used to size partitions.
//! * **Job queue** ([`queue`], [`job`]): a bounded multi-consumer queue of jobs, each job carrying
//!   single-use outcome channels for one delivery attempt.
//! * **Dispatch loop** ([`dispatch`], [`server`]): one thread per worker connection, feeding it jobs.
//! * **Sorter** ([`sort`], [`merger`]): partitioning, at-least-once submission and k-way merge.
//! * **Worker** ([`worker`]): the remote executor with its reconnect loop.
//!
//! # Example
//!
//! ```no_run
//! use std::thread;
//! use std::time::Duration;
//!
//! use dist_sort::{DistributedSorter, Server, ServerConfig};
//!
//! fn main() {
//!     let server = Server::bind("0.0.0.0:8100", ServerConfig::new()).unwrap();
//!     let (handle, _accept) = server.spawn().unwrap();
//!
//!     // give workers time to register
//!     thread::sleep(Duration::from_secs(3));
//!
//!     let input = vec!["delta".to_string(), "alpha".to_string(), "charlie".to_string()];
//!     let sorter = DistributedSorter::new(handle.queue(), handle.registry());
//!
//!     for item in sorter.sort(input).unwrap() {
//!         println!("{}", item);
//!     }
//!     handle.shutdown();
//! }
//! ```

pub mod dispatch;
pub mod input;
pub mod job;
pub mod merger;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod sort;
pub mod worker;

pub use dispatch::DispatchLoop;
pub use job::{Job, JobHandle, Outcome};
pub use merger::BinaryHeapMerger;
pub use protocol::{Connection, ProtocolError};
pub use queue::{PendingQueue, QueueClosed};
pub use registry::PoolRegistry;
pub use server::{Server, ServerConfig, ServerHandle};
pub use sort::{DistributedSorter, DistributedSorterBuilder, RetryPolicy, SortError};
pub use worker::{Worker, WorkerConfig, WorkerError};
