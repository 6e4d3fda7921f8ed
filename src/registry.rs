//! Worker pool registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of currently connected workers eligible to receive work.
///
/// The count is a lock-free counter; it says nothing about which workers are busy. A snapshot taken
/// by [`PoolRegistry::current_count`] may be stale by the time it is used: workers leaving mid-sort are
/// handled by job retry, not here.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    live: AtomicUsize,
}

impl PoolRegistry {
    pub fn new() -> Self {
        PoolRegistry::default()
    }

    /// Adds one worker to the pool. Returns the updated count.
    pub fn register(&self) -> usize {
        self.live.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Removes one worker from the pool. Returns the updated count.
    /// The count saturates at zero.
    pub fn deregister(&self) -> usize {
        let previous = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| Some(count.saturating_sub(1)))
            .unwrap_or(0);

        previous.saturating_sub(1)
    }

    /// Point-in-time snapshot of the live worker count.
    pub fn current_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Registers a worker for the lifetime of the returned guard.
    pub fn enroll(self: &Arc<Self>) -> Registration {
        let count = self.register();
        log::info!("worker registered (live workers: {})", count);

        return Registration {
            registry: Arc::clone(self),
        };
    }
}

/// Worker slot held by a connection handler. Dropping it deregisters the worker, also while unwinding.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<PoolRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let count = self.registry.deregister();
        log::info!("worker deregistered (live workers: {})", count);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use rstest::*;

    use super::PoolRegistry;

    #[test]
    fn test_register_deregister_pair() {
        let registry = PoolRegistry::new();
        registry.register();
        let before = registry.current_count();

        registry.register();
        registry.deregister();

        assert_eq!(registry.current_count(), before);
    }

    #[test]
    fn test_deregister_never_negative() {
        let registry = PoolRegistry::new();

        assert_eq!(registry.deregister(), 0);
        assert_eq!(registry.current_count(), 0);
    }

    #[rstest]
    #[case(1)]
    #[case(8)]
    #[case(64)]
    fn test_concurrent_registration(#[case] workers: usize) {
        let registry = Arc::new(PoolRegistry::new());

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.register();
                })
            })
            .collect();
        handles.into_iter().for_each(|handle| handle.join().unwrap());

        assert_eq!(registry.current_count(), workers);
    }

    #[test]
    fn test_registration_guard() {
        let registry = Arc::new(PoolRegistry::new());

        let first = registry.enroll();
        let second = registry.enroll();
        assert_eq!(registry.current_count(), 2);

        drop(first);
        assert_eq!(registry.current_count(), 1);
        drop(second);
        assert_eq!(registry.current_count(), 0);
    }

    #[test]
    fn test_registration_released_on_panic() {
        let registry = Arc::new(PoolRegistry::new());

        let cloned = Arc::clone(&registry);
        let result = thread::spawn(move || {
            let _registration = cloned.enroll();
            panic!("handler fault");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(registry.current_count(), 0);
    }
}
