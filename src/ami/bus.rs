//! Name-keyed event bus.
//!
//! Listeners register under a lowercase event name and are invoked
//! synchronously, in subscription order, for every event whose type
//! lowercases to that name. Listeners for other names never see it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::event::AmiEvent;

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&AmiEvent) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Maps lowercase event names to ordered listener lists.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events named `name` (case-insensitive).
    pub fn on(&self, name: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(name.to_lowercase())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener. Others for the same name are untouched.
    ///
    /// Returns false if it was not registered.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&name.to_lowercase()) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    /// Number of listeners registered for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .read()
            .get(&name.to_lowercase())
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener for its lowercase type.
    ///
    /// Returns the number of listeners invoked. Events without a type are
    /// not delivered. Listeners run outside the registry lock, so they may
    /// subscribe or unsubscribe while handling an event.
    pub fn publish(&self, event: &AmiEvent) -> usize {
        let Some(key) = event.key() else {
            return 0;
        };
        let snapshot: Vec<Listener> = match self.listeners.read().get(&key) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return 0,
        };

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    /// Collect every event named `name` until the collection is stopped.
    pub fn subscribe(self: &Arc<Self>, name: &str) -> EventCollection {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let id = self.on(
            name,
            Arc::new(move |event: &AmiEvent| sink.lock().push(event.clone())),
        );

        EventCollection {
            bus: Arc::clone(self),
            name: name.to_lowercase(),
            id,
            events,
            stopped: AtomicBool::new(false),
        }
    }
}

/// Accumulating list of events for one name.
///
/// Detaches from the bus on [`EventCollection::stop`] or drop; events
/// gathered so far stay readable.
pub struct EventCollection {
    bus: Arc<EventBus>,
    name: String,
    id: ListenerId,
    events: Arc<Mutex<Vec<AmiEvent>>>,
    stopped: AtomicBool,
}

impl fmt::Debug for EventCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollection")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventCollection {
    /// Snapshot of the events collected so far, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<AmiEvent> {
        self.events.lock().clone()
    }

    /// Number of events collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach from the bus. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.bus.off(&self.name, self.id);
        }
    }
}

impl Drop for EventCollection {
    fn drop(&mut self) {
        self.stop();
    }
}
