//! Loopback Suppression Registry
//!
//! The gateway writes onto the same bus it reads from, so every frame it
//! injects comes back through its own receive path. Before each bus write,
//! the command path registers the exact (topic, body) rendering the echoed
//! frame will have; the telemetry path consumes the entry when the echo
//! arrives and drops the frame instead of re-publishing it.
//!
//! Matching is exact string equality on both fields — no normalization, no
//! prefix matches, no TTL. Duplicates are legal: a command resubmitted
//! verbatim registers two entries, and each suppresses exactly one echo.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

/// Default maximum number of pending entries
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    topic: String,
    body: String,
}

/// A bounded, mutex-guarded collection of pending echo keys.
///
/// The lock is held only for the scan or mutation, never across I/O. An
/// entry whose echo never arrives (failed or rerouted bus write) would
/// otherwise accumulate forever, so the registry is bounded: registering
/// past capacity evicts the oldest entry.
pub struct SuppressionRegistry {
    entries: Mutex<VecDeque<Entry>>,
    capacity: usize,
}

impl SuppressionRegistry {
    /// Create a registry holding at most `capacity` pending entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Declare that a frame with this exact rendering is about to be
    /// written to the bus; its first echo should be treated as our own.
    ///
    /// Inserts unconditionally — duplicates each suppress one echo.
    pub fn register(&self, topic: &str, body: &str) {
        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = if entries.len() >= self.capacity {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(Entry {
                topic: topic.to_string(),
                body: body.to_string(),
            });
            evicted
        };

        if let Some(entry) = evicted {
            warn!(
                "suppression registry full ({}), evicting stale entry for {}",
                self.capacity, entry.topic
            );
        }
    }

    /// If an entry with this exact key is pending, remove exactly one and
    /// return true; otherwise return false.
    ///
    /// Atomic with respect to concurrent `register` calls: no entry can
    /// satisfy two concurrent `consume` calls.
    pub fn consume(&self, topic: &str, body: &str) -> bool {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries
            .iter()
            .position(|e| e.topic == topic && e.body == body)
        {
            entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are pending
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for SuppressionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_register_then_consume_once() {
        let registry = SuppressionRegistry::default();
        registry.register("can/host/can0/rx/123", "2 aabb");

        assert!(registry.consume("can/host/can0/rx/123", "2 aabb"));
        assert!(!registry.consume("can/host/can0/rx/123", "2 aabb"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_consume_unregistered_key() {
        let registry = SuppressionRegistry::default();
        assert!(!registry.consume("can/host/can0/rx/123", "2 aabb"));
    }

    #[test]
    fn test_isolation_between_keys() {
        let registry = SuppressionRegistry::default();
        registry.register("can/host/can0/rx/1", "1 aa");

        assert!(!registry.consume("can/host/can0/rx/2", "1 aa"));
        assert!(!registry.consume("can/host/can0/rx/1", "1 ab"));
        assert!(registry.consume("can/host/can0/rx/1", "1 aa"));
    }

    #[test]
    fn test_duplicates_each_suppress_one_echo() {
        let registry = SuppressionRegistry::default();
        registry.register("t", "2 aabb");
        registry.register("t", "2 aabb");

        assert!(registry.consume("t", "2 aabb"));
        assert!(registry.consume("t", "2 aabb"));
        assert!(!registry.consume("t", "2 aabb"));
    }

    #[test]
    fn test_reregistration_after_consume() {
        let registry = SuppressionRegistry::default();
        registry.register("t", "0");
        assert!(registry.consume("t", "0"));
        registry.register("t", "0");
        assert!(registry.consume("t", "0"));
    }

    #[test]
    fn test_eviction_at_capacity() {
        let registry = SuppressionRegistry::new(2);
        registry.register("t/1", "0");
        registry.register("t/2", "0");
        registry.register("t/3", "0");

        assert_eq!(registry.len(), 2);
        // The oldest entry was evicted
        assert!(!registry.consume("t/1", "0"));
        assert!(registry.consume("t/2", "0"));
        assert!(registry.consume("t/3", "0"));
    }

    #[test]
    fn test_concurrent_register_and_consume_exactness() {
        const N: usize = 64;

        let registry = Arc::new(SuppressionRegistry::new(N));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.register(&format!("t/{:x}", i), "1 ff");
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Two consumers race for every key; exactly one must win each.
        let consumers: Vec<_> = (0..2 * N)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.consume(&format!("t/{:x}", i % N), "1 ff"))
            })
            .collect();

        let hits = consumers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|hit| *hit)
            .count();

        assert_eq!(hits, N);
        assert!(registry.is_empty());
    }
}
