use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rstest::*;

use dist_sort::{DistributedSorter, Server, ServerConfig, ServerHandle, SortError, Worker, WorkerConfig};

struct Cluster {
    handle: ServerHandle,
    accept: Option<thread::JoinHandle<()>>,
    workers: Vec<(Arc<AtomicBool>, thread::JoinHandle<()>)>,
}

impl Cluster {
    fn start(config: ServerConfig) -> Self {
        let server = Server::bind("127.0.0.1:0", config).unwrap();
        let (handle, accept) = server.spawn().unwrap();

        Cluster {
            handle,
            accept: Some(accept),
            workers: Vec::new(),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    fn add_worker(&mut self) {
        let worker = Worker::new(
            WorkerConfig::new(self.addr().to_string())
                .with_reconnect_interval(Duration::from_millis(50))
                .with_threads_number(1),
        )
        .unwrap();
        let stop = worker.stop_flag();
        let running = thread::spawn(move || worker.run());

        self.workers.push((stop, running));
    }

    fn wait_for_workers(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.handle.registry().current_count() != count {
            assert!(Instant::now() < deadline, "worker count never reached {}", count);
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn sorter(&self) -> DistributedSorter {
        DistributedSorter::new(self.handle.queue(), self.handle.registry())
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.workers.iter().for_each(|(stop, _)| stop.store(true, Ordering::SeqCst));
        self.handle.shutdown();

        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        for (_, running) in self.workers.drain(..) {
            let _ = running.join();
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_two_workers_end_to_end() {
    let mut cluster = Cluster::start(ServerConfig::new());
    cluster.add_worker();
    cluster.add_worker();
    cluster.wait_for_workers(2);

    let sorted: Vec<String> = cluster
        .sorter()
        .sort(strings(&["delta", "alpha", "charlie", "bravo"]))
        .unwrap()
        .collect();

    assert_eq!(sorted, strings(&["alpha", "bravo", "charlie", "delta"]));
}

#[rstest]
#[case(1, 10)]
#[case(3, 1000)]
#[case(4, 3)]
fn test_random_input(#[case] workers: usize, #[case] len: usize) {
    let mut cluster = Cluster::start(ServerConfig::new());
    (0..workers).for_each(|_| cluster.add_worker());
    cluster.wait_for_workers(workers);

    let mut input: Vec<String> = (0..len).map(|i| format!("{:x}", i * 7919 % 1013)).collect();
    input.shuffle(&mut rand::thread_rng());

    let sorted: Vec<String> = cluster.sorter().sort(input.clone()).unwrap().collect();
    input.sort();

    assert_eq!(sorted.len(), len);
    assert_eq!(sorted, input);
}

#[test]
fn test_no_workers() {
    let cluster = Cluster::start(ServerConfig::new());

    let result = cluster.sorter().sort(strings(&["b", "a"]));

    assert!(matches!(result, Err(SortError::NoWorkers)));
}

#[test]
fn test_disconnect_mid_job_is_resubmitted() {
    let mut cluster = Cluster::start(ServerConfig::new());

    // a worker that takes a batch and vanishes without answering
    let flaky = TcpStream::connect(cluster.addr()).unwrap();
    cluster.wait_for_workers(1);

    let sorter = cluster.sorter();
    let sorting = thread::spawn(move || sorter.sort(strings(&["delta", "alpha", "charlie", "bravo"])));

    let mut reader = io::BufReader::new(flaky.try_clone().unwrap());
    let mut batch = String::new();
    reader.read_line(&mut batch).unwrap();
    assert!(batch.ends_with('\n'));
    drop(reader);
    drop(flaky);

    cluster.wait_for_workers(0);
    cluster.add_worker();

    let sorted: Vec<String> = sorting.join().unwrap().unwrap().collect();
    assert_eq!(sorted, strings(&["alpha", "bravo", "charlie", "delta"]));
}

#[test]
fn test_hung_worker_is_abandoned_after_deadline() {
    let mut cluster = Cluster::start(ServerConfig::new().with_response_timeout(Some(Duration::from_millis(200))));

    // reads the batch but never answers
    let mut hung = TcpStream::connect(cluster.addr()).unwrap();
    cluster.wait_for_workers(1);

    let sorter = cluster.sorter();
    let sorting = thread::spawn(move || sorter.sort(strings(&["b", "c", "a"])));

    let mut byte = [0u8; 1];
    hung.read_exact(&mut byte).unwrap();

    cluster.wait_for_workers(0);
    cluster.add_worker();

    let sorted: Vec<String> = sorting.join().unwrap().unwrap().collect();
    assert_eq!(sorted, strings(&["a", "b", "c"]));
}

#[test]
fn test_shutdown_cancels_outstanding_sort() {
    let cluster = Cluster::start(ServerConfig::new().with_response_timeout(None));

    let _silent = TcpStream::connect(cluster.addr()).unwrap();
    cluster.wait_for_workers(1);

    let sorter = cluster.sorter();
    let sorting = thread::spawn(move || sorter.sort(strings(&["b", "a"])));

    thread::sleep(Duration::from_millis(100));
    cluster.handle.shutdown();

    assert!(matches!(sorting.join().unwrap(), Err(SortError::Cancelled)));
    cluster.wait_for_workers(0);
}
