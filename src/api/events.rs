//! Synchronous named-event dispatch.
//!
//! Backs `vault.on`, `workspace.on` and `metadataCache.on`. Handlers run in
//! registration order; the subscriber list is snapshotted before any handler
//! runs, so handlers may subscribe or unsubscribe while being called.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

/// A payload that can be delivered through [`Events`].
pub trait Event {
    /// Event name handlers subscribe to.
    fn name(&self) -> &str;

    /// Handler arguments as a JSON array, for script subscribers.
    fn args(&self) -> Value;
}

/// Handle returned by [`Events::on`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventRef {
    /// Which emitter produced this ref (`vault`, `workspace`, `metadataCache`).
    pub source: &'static str,
    pub name: String,
    pub id: u64,
}

type Handler<E> = Rc<dyn Fn(&E)>;

struct Subscription<E> {
    id: u64,
    name: String,
    handler: Handler<E>,
}

/// Ordered set of named subscriptions.
pub struct Events<E> {
    source: &'static str,
    next_id: Cell<u64>,
    subscriptions: RefCell<Vec<Subscription<E>>>,
}

impl<E> fmt::Debug for Events<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("source", &self.source)
            .field("subscriptions", &self.subscriptions.borrow().len())
            .finish()
    }
}

impl<E: Event> Events<E> {
    /// Create an emitter identified as `source` in its refs.
    pub fn new(source: &'static str) -> Self {
        Self { source, next_id: Cell::new(1), subscriptions: RefCell::new(Vec::new()) }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Subscribe to `name`.
    pub fn on(&self, name: &str, handler: impl Fn(&E) + 'static) -> EventRef {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            name: name.to_string(),
            handler: Rc::new(handler),
        });
        EventRef { source: self.source, name: name.to_string(), id }
    }

    /// Remove a subscription. Returns whether it was still present; calling
    /// it again is harmless.
    pub fn offref(&self, event_ref: &EventRef) -> bool {
        if event_ref.source != self.source {
            return false;
        }
        self.remove_id(event_ref.id)
    }

    /// Remove a subscription by id.
    pub fn remove_id(&self, id: u64) -> bool {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver an event to every current subscriber of its name.
    pub fn trigger(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| s.name == event.name())
            .map(|s| Rc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of subscribers for `name`.
    pub fn count(&self, name: &str) -> usize {
        self.subscriptions.borrow().iter().filter(|s| s.name == name).count()
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Ping(&'static str, u32);

    impl Event for Ping {
        fn name(&self) -> &str {
            self.0
        }

        fn args(&self) -> Value {
            json!([self.1])
        }
    }

    #[test]
    fn test_registration_order() {
        let events: Events<Ping> = Events::new("test");
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            events.on("ping", move |p| log.borrow_mut().push(format!("{}:{}", tag, p.1)));
        }
        events.trigger(&Ping("ping", 7));
        events.trigger(&Ping("other", 1));
        assert_eq!(*log.borrow(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn test_offref_idempotent() {
        let events: Events<Ping> = Events::new("test");
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let r = events.on("ping", move |_| counter.set(counter.get() + 1));
        events.trigger(&Ping("ping", 0));
        assert!(events.offref(&r));
        assert!(!events.offref(&r));
        events.trigger(&Ping("ping", 0));
        assert_eq!(hits.get(), 1);
        assert!(events.is_empty());
    }

    #[test]
    fn test_offref_wrong_source() {
        let a: Events<Ping> = Events::new("a");
        let b: Events<Ping> = Events::new("b");
        let r = a.on("ping", |_| {});
        assert!(!b.offref(&r));
        assert_eq!(a.count("ping"), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_trigger() {
        let events = Rc::new(Events::<Ping>::new("test"));
        let slot: Rc<RefCell<Option<EventRef>>> = Rc::new(RefCell::new(None));
        let hits = Rc::new(Cell::new(0));
        let (ev, s, h) = (Rc::clone(&events), Rc::clone(&slot), Rc::clone(&hits));
        let r = events.on("ping", move |_| {
            h.set(h.get() + 1);
            if let Some(r) = s.borrow().as_ref() {
                ev.offref(r);
            }
        });
        *slot.borrow_mut() = Some(r);
        events.trigger(&Ping("ping", 0));
        events.trigger(&Ping("ping", 0));
        assert_eq!(hits.get(), 1);
    }
}
