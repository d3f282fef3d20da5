//! Subscriber Set (C4): the live set of subscriber sinks for one instance.
//! Grounded in the teacher's `registry::StreamEntry` subscriber map
//! (`RwLock<HashMap<Uuid, Sender<Bytes>>>`), generalized so that
//! mutation (add/remove) and broadcast can run concurrently against a
//! consistent snapshot without a writer ever blocking on a slow reader.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SubscriberId = Uuid;

struct Entry {
    tx: mpsc::UnboundedSender<Bytes>,
    connected_at: Instant,
}

/// Holds one instance's subscriber sinks. Each sink is actually a channel
/// to a per-connection task that performs the real WebSocket write —
/// `broadcast`/`send_to` never touch the socket directly, so a slow or
/// dead subscriber can never stall the fanout task (§4.4, §5).
#[derive(Default)]
pub struct SubscriberSet {
    inner: RwLock<HashMap<SubscriberId, Entry>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: SubscriberId, tx: mpsc::UnboundedSender<Bytes>) {
        let mut guard = self.inner.write().expect("subscriber set lock poisoned");
        guard.insert(
            id,
            Entry {
                tx,
                connected_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, id: SubscriberId) {
        self.inner
            .write()
            .expect("subscriber set lock poisoned")
            .remove(&id);
    }

    pub fn count(&self) -> usize {
        self.inner.read().expect("subscriber set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn ids(&self) -> Vec<SubscriberId> {
        self.inner
            .read()
            .expect("subscriber set lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn connected_at(&self, id: SubscriberId) -> Option<Instant> {
        self.inner
            .read()
            .expect("subscriber set lock poisoned")
            .get(&id)
            .map(|e| e.connected_at)
    }

    /// Iterates a snapshot of current subscribers and attempts to send;
    /// on failure the subscriber is removed (§4.4: "SubscriberSendFailure
    /// ... the subscriber is silently removed; never propagated upward").
    pub fn broadcast(&self, bytes: Bytes) {
        let snapshot: Vec<(SubscriberId, mpsc::UnboundedSender<Bytes>)> = {
            let guard = self.inner.read().expect("subscriber set lock poisoned");
            guard.iter().map(|(id, e)| (*id, e.tx.clone())).collect()
        };

        let mut failed = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(bytes.clone()).is_err() {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut guard = self.inner.write().expect("subscriber set lock poisoned");
            for id in failed {
                guard.remove(&id);
            }
        }
    }

    /// Targeted send used for initial-replay delivery (§4.4). Sent through
    /// the same channel subsequent `broadcast` calls use, so enqueuing the
    /// initial replay before registering the subscriber in the set (see
    /// `crate::api::ws`) guarantees it is flushed before any live frame.
    pub fn send_to(&self, id: SubscriberId, bytes: Bytes) -> bool {
        let tx = {
            let guard = self.inner.read().expect("subscriber set lock poisoned");
            guard.get(&id).map(|e| e.tx.clone())
        };
        match tx {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_broadcast_delivers_to_the_subscriber() {
        let set = SubscriberSet::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        set.add(id, tx);
        set.broadcast(Bytes::from_static(b"hello"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn broadcast_removes_subscribers_whose_receiver_is_dropped() {
        let set = SubscriberSet::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        set.add(id, tx);
        drop(rx);
        set.broadcast(Bytes::from_static(b"hello"));
        assert!(set.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_live_subscriber() {
        let set = SubscriberSet::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        set.add(Uuid::new_v4(), tx1);
        set.add(Uuid::new_v4(), tx2);
        set.broadcast(Bytes::from_static(b"x"));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn send_to_targets_one_subscriber_only() {
        let set = SubscriberSet::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = Uuid::new_v4();
        set.add(id1, tx1);
        set.add(Uuid::new_v4(), tx2);
        assert!(set.send_to(id1, Bytes::from_static(b"only-for-1")));
        assert_eq!(rx1.try_recv().unwrap(), Bytes::from_static(b"only-for-1"));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn count_and_ids_reflect_current_membership() {
        let set = SubscriberSet::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        set.add(id, tx);
        assert_eq!(set.count(), 1);
        assert_eq!(set.ids(), vec![id]);
        set.remove(id);
        assert!(set.is_empty());
    }
}
