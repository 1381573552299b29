// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side dedup table: call id -> the one response sent for it.
//!
//! Each call id owns a slot guarded by its own mutex. The first resolver
//! of an id computes the response while holding the slot lock; concurrent
//! resolvers of the same id wait on that lock and then replay the cached
//! bytes. Different ids never contend beyond the map shard lookup.
//!
//! Entries are never evicted, so memory grows with the number of distinct
//! calls served. Long-lived deployments need a bounded variant (per-client
//! sequence windows or time-boxed eviction).

use crate::protocol::CallId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Slot = Arc<Mutex<Option<Arc<[u8]>>>>;

/// How a response was obtained from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First delivery: the response was just computed and stored.
    Fresh(Arc<[u8]>),
    /// Duplicate delivery: the stored response is replayed.
    Replayed(Arc<[u8]>),
}

impl Resolution {
    pub fn bytes(&self) -> &Arc<[u8]> {
        match self {
            Self::Fresh(b) | Self::Replayed(b) => b,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Call id -> cached encoded response.
#[derive(Default)]
pub struct DedupTable {
    entries: DashMap<CallId, Slot>,
    /// Slots holding a response; bumped once per id when it is stored.
    stored: AtomicUsize,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached response for `call_id`, computing it with
    /// `compute` if this is the first time the id is seen.
    ///
    /// `compute` runs at most once per call id for the table's lifetime,
    /// including under concurrent calls with the same id.
    pub fn resolve<F>(&self, call_id: CallId, compute: F) -> Resolution
    where
        F: FnOnce() -> Vec<u8>,
    {
        // Clone the slot out so the shard lock is released before we block.
        let slot: Slot = Arc::clone(self.entries.entry(call_id).or_default().value());

        let mut cached = slot.lock();
        if let Some(bytes) = cached.as_ref() {
            return Resolution::Replayed(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = compute().into();
        *cached = Some(Arc::clone(&bytes));
        self.stored.fetch_add(1, Ordering::Release);
        Resolution::Fresh(bytes)
    }

    /// Cached response for `call_id`, if one has been stored.
    pub fn get(&self, call_id: &CallId) -> Option<Arc<[u8]>> {
        let slot = Arc::clone(self.entries.get(call_id)?.value());
        let cached = slot.lock();
        cached.clone()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.get(call_id).is_some()
    }

    /// Number of call ids with a stored response.
    ///
    /// Never waits on a slot whose response is still being computed.
    pub fn len(&self) -> usize {
        self.stored.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_resolve_is_fresh_then_replayed() {
        let table = DedupTable::new();
        let id = CallId::random();

        let first = table.resolve(id, || b"one".to_vec());
        assert!(!first.is_replay());
        let second = table.resolve(id, || b"two".to_vec());
        assert!(second.is_replay());
        assert_eq!(&**second.bytes(), b"one");
        assert_eq!(table.len(), 1);
        assert!(table.contains(&id));
    }

    #[test]
    fn distinct_ids_are_independent() {
        let table = DedupTable::new();
        let a = CallId::random();
        let b = CallId::random();
        table.resolve(a, || b"a".to_vec());
        table.resolve(b, || b"b".to_vec());
        assert_eq!(table.get(&a).as_deref(), Some(&b"a"[..]));
        assert_eq!(table.get(&b).as_deref(), Some(&b"b"[..]));
        assert!(table.get(&CallId::random()).is_none());
    }

    #[test]
    fn concurrent_duplicates_compute_once() {
        let table = Arc::new(DedupTable::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = CallId::random();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    table.resolve(id, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        b"once".to_vec()
                    })
                })
            })
            .collect();

        let results: Vec<Resolution> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| !r.is_replay()).count(), 1);
        assert!(results.iter().all(|r| &**r.bytes() == b"once"));
    }

    #[test]
    fn len_does_not_wait_for_in_flight_compute() {
        let table = Arc::new(DedupTable::new());
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        let (release_tx, release_rx) = channel::bounded::<()>(1);

        let slow_id = CallId::random();
        let worker = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table.resolve(slow_id, || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    b"slow".to_vec()
                })
            })
        };
        started_rx.recv().unwrap();

        // Neither call may block behind the in-flight slot.
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        let other = table.resolve(CallId::random(), || b"fast".to_vec());
        assert!(!other.is_replay());
        assert_eq!(table.len(), 1);

        release_tx.send(()).unwrap();
        assert!(!worker.join().unwrap().is_replay());
        assert_eq!(table.len(), 2);
    }
}
