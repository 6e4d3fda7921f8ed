//! Worker executor: the remote side that sorts batches for the coordinator.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::slice::ParallelSliceMut;

use crate::protocol::{Connection, ProtocolError};

/// Default coordinator address.
pub const DEFAULT_COORDINATOR: &str = "0.0.0.0:8100";
/// Default delay between connection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Worker initialization error.
#[derive(Debug)]
pub enum WorkerError {
    /// Sorting thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
}

impl Error for WorkerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            WorkerError::ThreadPoolBuildError(err) => Some(err),
        }
    }
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            WorkerError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator address to dial.
    coordinator: String,
    /// Delay between connection attempts.
    reconnect_interval: Duration,
    /// Number of threads used to sort a batch.
    threads_number: Option<usize>,
}

impl WorkerConfig {
    pub fn new(coordinator: impl Into<String>) -> Self {
        WorkerConfig {
            coordinator: coordinator.into(),
            ..WorkerConfig::default()
        }
    }

    /// Sets the delay between connection attempts.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> WorkerConfig {
        self.reconnect_interval = interval;
        return self;
    }

    /// Sets number of threads to be used to sort a batch.
    pub fn with_threads_number(mut self, threads_number: usize) -> WorkerConfig {
        self.threads_number = Some(threads_number);
        return self;
    }

    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            coordinator: DEFAULT_COORDINATOR.to_string(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            threads_number: None,
        }
    }
}

/// Worker executor.
///
/// Dials the coordinator, then sorts every batch it receives and sends it back until the connection
/// fails, at which point it dials again. There is no partial-result reporting: a failure mid-batch
/// simply drops the connection and the coordinator resubmits the batch.
pub struct Worker {
    config: WorkerConfig,
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    stopped: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        return Ok(Worker {
            thread_pool: Self::init_thread_pool(config.threads_number)?,
            config,
            stopped: Arc::new(AtomicBool::new(false)),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, WorkerError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(WorkerError::ThreadPoolBuildError)?;

        return Ok(thread_pool);
    }

    /// Flag that makes [`Worker::run`] return once the current connection ends.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Connects to the coordinator and serves it, reconnecting after every failure.
    /// Runs until the stop flag is raised; there is no retry limit.
    pub fn run(&self) {
        let mut retrying = false;

        while !self.stopped.load(Ordering::SeqCst) {
            match TcpStream::connect(self.config.coordinator.as_str()) {
                Ok(stream) => {
                    retrying = false;
                    log::info!("subscribed to the coordinator at {}", self.config.coordinator);

                    match self.serve(stream) {
                        Ok(jobs) => log::info!("coordinator closed the connection ({} batches sorted)", jobs),
                        Err(err) => log::warn!("connection to the coordinator lost: {}", err),
                    }
                }
                Err(err) if !retrying => {
                    retrying = true;
                    log::warn!("coordinator {} unreachable, retrying: {}", self.config.coordinator, err);
                }
                Err(err) => log::debug!("coordinator {} still unreachable: {}", self.config.coordinator, err),
            }

            if !self.stopped.load(Ordering::SeqCst) {
                thread::sleep(self.config.reconnect_interval);
            }
        }
    }

    /// Serves one connection: receive a batch, sort it, send it back, repeat.
    /// Returns the number of batches sorted if the coordinator closed the connection between batches,
    /// or the error that ended the session.
    pub fn serve(&self, stream: TcpStream) -> Result<usize, ProtocolError> {
        let mut connection = Connection::new(stream)?;
        let mut jobs = 0;

        loop {
            let mut batch: Vec<String> = match connection.receive() {
                Ok(batch) => batch,
                Err(ProtocolError::ConnectionClosed) => return Ok(jobs),
                Err(err) => {
                    connection.close();
                    return Err(err);
                }
            };

            log::debug!("received a batch ({} items)", batch.len());
            self.sort_batch(&mut batch);

            if let Err(err) = connection.send(&batch) {
                connection.close();
                return Err(err);
            }

            jobs += 1;
            log::debug!("sorted batch returned to the coordinator");

            if self.stopped.load(Ordering::SeqCst) {
                connection.close();
                return Ok(jobs);
            }
        }
    }

    /// Sorts a batch in place by the natural string order.
    pub fn sort_batch(&self, batch: &mut Vec<String>) {
        self.thread_pool.install(|| {
            batch.par_sort_unstable();
        });
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::net::TcpListener;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{Worker, WorkerConfig};
    use crate::protocol::{self, ProtocolError};

    #[fixture]
    fn worker() -> Worker {
        Worker::new(WorkerConfig::default().with_threads_number(2)).unwrap()
    }

    #[rstest]
    fn test_sort_batch(worker: Worker) {
        let expected: Vec<String> = (0..1000).map(|i| format!("{:04}", i)).collect();
        let mut batch = expected.clone();
        batch.shuffle(&mut rand::thread_rng());

        worker.sort_batch(&mut batch);

        assert_eq!(batch, expected);
    }

    #[rstest]
    fn test_serve_sorts_batches(worker: Worker) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let coordinator = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = io::BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;

            protocol::write_message(&mut writer, &vec!["delta", "alpha"]).unwrap();
            let first: Vec<String> = protocol::read_message(&mut reader).unwrap();
            protocol::write_message(&mut writer, &Vec::<String>::new()).unwrap();
            let second: Vec<String> = protocol::read_message(&mut reader).unwrap();

            (first, second)
        });

        let stream = std::net::TcpStream::connect(addr).unwrap();
        let served = worker.serve(stream);

        let (first, second) = coordinator.join().unwrap();
        assert_eq!(first, vec!["alpha", "delta"]);
        assert!(second.is_empty());
        assert_eq!(served.unwrap(), 2);
    }

    #[rstest]
    fn test_serve_rejects_malformed_batch(worker: Worker) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let coordinator = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            io::Write::write_all(&mut stream, b"{\"sort\",\"me\"}\n").unwrap();
            stream
        });

        let stream = std::net::TcpStream::connect(addr).unwrap();
        let served = worker.serve(stream);
        let _stream = coordinator.join().unwrap();

        assert!(matches!(served, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_run_reconnects_until_coordinator_appears() {
        // reserve a port, then free it so the first attempts are refused
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let worker = Worker::new(
            WorkerConfig::new(addr.to_string())
                .with_reconnect_interval(Duration::from_millis(20))
                .with_threads_number(1),
        )
        .unwrap();
        let stop = worker.stop_flag();
        let running = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(100));
        let listener = TcpListener::bind(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let mut reader = io::BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        protocol::write_message(&mut writer, &vec!["b", "a"]).unwrap();
        let sorted: Vec<String> = protocol::read_message(&mut reader).unwrap();
        assert_eq!(sorted, vec!["a", "b"]);

        stop.store(true, Ordering::SeqCst);
        drop(writer);
        drop(reader);
        running.join().unwrap();
    }
}
