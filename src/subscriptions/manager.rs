//! Subscriber registry and change broadcasting for a single feature.

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::types::{
    ChangeEvent, ChangeStream, DropReason, ListenerId, StateChange, Subscriber, SubscriberId,
};

/// Default buffer for change streams.
pub const DEFAULT_STREAM_BUFFER: usize = 1000;

type Listener<S> = Arc<dyn Fn(&StateChange<S>) + Send + Sync>;

/// Weakly-held observers, in registration order.
///
/// Entries whose observer has been dropped are pruned during the next
/// notification pass. There is no separate sweep.
pub struct SubscriberRegistry {
    entries: Mutex<BTreeMap<SubscriberId, Weak<dyn Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `observer` weakly and return its id.
    pub fn subscribe(&self, observer: &Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().insert(id, Arc::downgrade(observer));
        id
    }

    /// Remove a registration. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Remove every registration of `observer`.
    pub fn unsubscribe_observer(&self, observer: &Arc<dyn Subscriber>) -> bool {
        let target = Arc::as_ptr(observer) as *const ();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, weak| weak.as_ptr() as *const () != target);
        entries.len() != before
    }

    /// Number of registrations, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no registrations remain, pruned or not.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Notify live observers in registration order, pruning dead ones.
    ///
    /// Observers are upgraded under the lock and invoked after it is
    /// released, so they may subscribe or unsubscribe from the callback.
    pub fn notify(&self, feature: &str) -> usize {
        let live: Vec<Arc<dyn Subscriber>> = {
            let mut entries = self.entries.lock();
            let mut live = Vec::with_capacity(entries.len());
            let mut pruned = 0usize;
            entries.retain(|_, weak| match weak.upgrade() {
                Some(observer) => {
                    live.push(observer);
                    true
                }
                None => {
                    pruned += 1;
                    false
                }
            });
            if pruned > 0 {
                debug!(feature, pruned, "pruned expired subscribers");
            }
            live
        };

        for observer in &live {
            observer.state_changed(feature);
        }
        live.len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Multicast of committed changes to listener closures and change streams.
///
/// Changes go through `enqueue` + `flush` so they are published in commit
/// order even when several threads commit back to back.
pub struct ChangeNotifier<S> {
    listeners: RwLock<BTreeMap<ListenerId, Listener<S>>>,
    streams: RwLock<BTreeMap<ListenerId, Sender<ChangeEvent<S>>>>,
    next_id: AtomicU64,
    /// Committed changes not yet published, oldest first.
    pending: Mutex<VecDeque<StateChange<S>>>,
    /// Set while one thread is draining `pending`.
    publishing: AtomicBool,
}

impl<S> ChangeNotifier<S> {
    /// Create a notifier with no listeners or streams.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            streams: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            publishing: AtomicBool::new(false),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a listener closure.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange<S>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners.write().insert(id, Arc::new(listener));
        id
    }

    /// Returns false if `id` is not a registered listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Open a live stream of changes.
    pub fn open_stream(&self, buffer_size: usize) -> ChangeStream<S> {
        let id = self.next_id();
        let (sender, receiver) = bounded(buffer_size.max(1));
        self.streams.write().insert(id, sender);
        ChangeStream { id, receiver }
    }

    /// Close a stream. The receiver gets a final `Dropped` event if it has room.
    pub fn close_stream(&self, id: ListenerId) -> bool {
        match self.streams.write().remove(&id) {
            Some(sender) => {
                let _ = sender.try_send(ChangeEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                true
            }
            None => false,
        }
    }

    /// Number of listener closures.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Number of open streams.
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Queue a committed change. Call while holding the lock that orders
    /// commits, then `flush` after releasing it.
    pub fn enqueue(&self, change: StateChange<S>) {
        self.pending.lock().push_back(change);
    }

    /// Publish queued changes in order.
    ///
    /// Only one thread drains at a time. If another thread is already
    /// draining, it also delivers whatever this caller queued, so a listener
    /// that dispatches back into the feature does not deadlock.
    pub fn flush(&self) {
        loop {
            if self
                .publishing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                let next = self.pending.lock().pop_front();
                match next {
                    Some(change) => self.publish(&change),
                    None => break,
                }
            }

            self.publishing.store(false, Ordering::Release);
            // A change queued between the last pop and the store above
            // would otherwise be stranded.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    /// Fire listeners, then push to streams. Streams that are full or
    /// disconnected are removed.
    pub fn publish(&self, change: &StateChange<S>) {
        let listeners: Vec<Listener<S>> = self.listeners.read().values().cloned().collect();
        for listener in &listeners {
            listener(change);
        }

        let mut to_remove = Vec::new();
        {
            let streams = self.streams.read();
            for (id, sender) in streams.iter() {
                if sender
                    .try_send(ChangeEvent::Changed(change.clone()))
                    .is_err()
                {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut streams = self.streams.write();
            for id in to_remove {
                if let Some(sender) = streams.remove(&id) {
                    debug!(feature = %change.feature, stream = id.0, "dropping change stream");
                    let _ = sender.try_send(ChangeEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
        trace!(feature = %change.feature, version = change.version.0, "published change");
    }
}

impl<S> Default for ChangeNotifier<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counter(AtomicUsize);

    impl Subscriber for Counter {
        fn state_changed(&self, _feature: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn change(version: u64) -> StateChange<u32> {
        StateChange {
            feature: Arc::from("counter"),
            version: Version(version),
            state: Arc::new(version as u32),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let observer: Arc<dyn Subscriber> = counter.clone();

        let id = registry.subscribe(&observer);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.notify("counter"), 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.notify("counter"), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_observer_is_pruned_on_notify() {
        let registry = SubscriberRegistry::new();
        let observer: Arc<dyn Subscriber> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.subscribe(&observer);
        drop(observer);

        // Still counted until the next notification pass
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.notify("counter"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_by_observer() {
        let registry = SubscriberRegistry::new();
        let a: Arc<dyn Subscriber> = Arc::new(Counter(AtomicUsize::new(0)));
        let b: Arc<dyn Subscriber> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.subscribe(&a);
        registry.subscribe(&b);

        assert!(registry.unsubscribe_observer(&a));
        assert!(!registry.unsubscribe_observer(&a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_notify_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let observers: Vec<Arc<dyn Subscriber>> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                Arc::new(move |_: &str| order.lock().push(i)) as Arc<dyn Subscriber>
            })
            .collect();
        for observer in &observers {
            registry.subscribe(observer);
        }

        registry.notify("counter");
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_listener_add_remove() {
        let notifier = ChangeNotifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = notifier.add_listener(move |c: &StateChange<u32>| sink.lock().push(*c.state));

        notifier.publish(&change(1));
        assert!(notifier.remove_listener(id));
        notifier.publish(&change(2));

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_stream_receives_changes() {
        let notifier = ChangeNotifier::<u32>::new();
        let stream = notifier.open_stream(DEFAULT_STREAM_BUFFER);

        notifier.publish(&change(1));
        match stream.recv_timeout(Duration::from_millis(100)).unwrap() {
            ChangeEvent::Changed(c) => assert_eq!(c.version, Version(1)),
            other => panic!("Expected Changed event, got {:?}", other),
        }
    }

    #[test]
    fn test_flush_publishes_in_enqueue_order() {
        let notifier = ChangeNotifier::<u32>::new();
        let stream = notifier.open_stream(DEFAULT_STREAM_BUFFER);

        notifier.enqueue(change(1));
        notifier.enqueue(change(2));
        assert!(stream.try_recv().is_err());
        notifier.flush();

        let versions: Vec<u64> = stream
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                ChangeEvent::Changed(c) => Some(c.version.0),
                ChangeEvent::Dropped { .. } => None,
            })
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_drop_slow_stream() {
        let notifier = ChangeNotifier::<u32>::new();
        let _stream = notifier.open_stream(2);

        for i in 0..10 {
            notifier.publish(&change(i));
        }

        assert_eq!(notifier.stream_count(), 0);
    }

    #[test]
    fn test_disconnected_stream_is_removed() {
        let notifier = ChangeNotifier::<u32>::new();
        let stream = notifier.open_stream(4);
        drop(stream);

        notifier.publish(&change(1));
        assert_eq!(notifier.stream_count(), 0);
    }

    #[test]
    fn test_close_stream_sends_dropped() {
        let notifier = ChangeNotifier::<u32>::new();
        let stream = notifier.open_stream(4);

        assert!(notifier.close_stream(stream.id));
        assert!(!notifier.close_stream(stream.id));
        assert!(matches!(
            stream.try_recv().unwrap(),
            ChangeEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }
}
