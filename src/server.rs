//! Coordinator TCP listener.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::dispatch::DispatchLoop;
use crate::job::Job;
use crate::protocol::Connection;
use crate::queue::{self, PendingQueue};
use crate::registry::PoolRegistry;

/// Default deadline for a worker's answer to one batch.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for a worker's answer. [`None`] waits indefinitely.
    response_timeout: Option<Duration>,
    /// Pending queue capacity.
    queue_capacity: usize,
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig::default()
    }

    /// Sets the deadline for a worker's answer to one batch.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> ServerConfig {
        self.response_timeout = timeout;
        return self;
    }

    /// Sets the pending queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> ServerConfig {
        self.queue_capacity = capacity;
        return self;
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            queue_capacity: queue::DEFAULT_CAPACITY,
        }
    }
}

/// Coordinator listener. Every accepted connection becomes a pool member running its own
/// [`DispatchLoop`] thread.
pub struct Server {
    listener: TcpListener,
    handle: ServerHandle,
    response_timeout: Option<Duration>,
    next_connection_id: AtomicU64,
}

/// Cloneable handle to a running [`Server`]: shared state access and shutdown.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Shared>,
}

struct Shared {
    local_addr: SocketAddr,
    queue: PendingQueue<Job>,
    registry: Arc<PoolRegistry>,
    connections: Mutex<HashMap<u64, TcpStream>>,
    stopped: AtomicBool,
}

impl Server {
    /// Binds the listener.
    pub fn bind<A: ToSocketAddrs>(addr: A, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        log::info!("coordinator listening on {}", local_addr);

        let handle = ServerHandle {
            inner: Arc::new(Shared {
                local_addr,
                queue: PendingQueue::new(config.queue_capacity),
                registry: Arc::new(PoolRegistry::new()),
                connections: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        };

        return Ok(Server {
            listener,
            handle,
            response_timeout: config.response_timeout,
            next_connection_id: AtomicU64::new(0),
        });
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the accept loop on a background thread.
    pub fn spawn(self) -> io::Result<(ServerHandle, thread::JoinHandle<()>)> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || self.serve())?;

        return Ok((handle, join));
    }

    /// Accepts worker connections until [`ServerHandle::shutdown`] is called.
    pub fn serve(self) {
        for stream in self.listener.incoming() {
            if self.handle.is_stopped() {
                break;
            }

            match stream {
                Ok(stream) => self.accept(stream),
                Err(err) => log::warn!("connection accept error: {}", err),
            }
        }

        log::debug!("accept loop finished");
    }

    fn accept(&self, stream: TcpStream) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let connection = match self.setup(id, stream) {
            Ok(connection) => connection,
            Err(err) => {
                log::warn!("connection setup error: {}", err);
                self.handle.untrack(id);
                return;
            }
        };

        log::debug!("worker connected (peer: {:?})", connection.peer());

        let dispatch = DispatchLoop::new(
            connection,
            self.handle.queue(),
            self.handle.registry(),
            self.response_timeout,
        );
        let handle = self.handle.clone();

        let spawned = thread::Builder::new()
            .name(format!("dispatch-{}", id))
            .spawn(move || {
                dispatch.run();
                handle.untrack(id);
            });

        if let Err(err) = spawned {
            log::error!("dispatch thread spawn error: {}", err);
            self.handle.untrack(id);
        }
    }

    /// Tracks a clone of the stream for shutdown and wraps the stream into a framed connection.
    fn setup(&self, id: u64, stream: TcpStream) -> io::Result<Connection> {
        self.handle.track(id, stream.try_clone()?);
        Connection::new(stream)
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn queue(&self) -> PendingQueue<Job> {
        self.inner.queue.clone()
    }

    pub fn registry(&self) -> Arc<PoolRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Number of worker connections currently open.
    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    /// Closes the queue, every worker connection and the listener.
    /// Blocked dispatch loops and submitters are released through their failure paths.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("coordinator shutting down");
        self.inner.queue.close();

        for (_, stream) in self.connections().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        // wake the accept loop so it can observe the stop flag
        let _ = TcpStream::connect_timeout(&wake_addr(self.inner.local_addr), Duration::from_secs(1));
    }

    fn track(&self, id: u64, stream: TcpStream) {
        if self.is_stopped() {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        self.connections().insert(id, stream);
    }

    fn untrack(&self, id: u64) {
        self.connections().remove(&id);
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TcpStream>> {
        match self.inner.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}
