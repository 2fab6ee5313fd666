//! Bookkeeping for DOM listeners registered by plugins.
//!
//! The listener functions themselves live on the script side; this table
//! records which element, event type and plugin each one belongs to so the
//! loader can remove them all when the plugin unloads.

use std::cell::{Cell, RefCell};

/// One registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomListener {
    pub id: u32,
    pub owner: String,
    pub element: u32,
    pub event_type: String,
}

/// Live listener table.
#[derive(Debug, Default)]
pub struct DomListeners {
    next_id: Cell<u32>,
    listeners: RefCell<Vec<DomListener>>,
}

impl DomListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a listener and return its id.
    pub fn add(&self, owner: &str, element: u32, event_type: &str) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.listeners.borrow_mut().push(DomListener {
            id,
            owner: owner.to_string(),
            element,
            event_type: event_type.to_string(),
        });
        id
    }

    pub fn remove(&self, id: u32) -> Option<DomListener> {
        let mut listeners = self.listeners.borrow_mut();
        let idx = listeners.iter().position(|l| l.id == id)?;
        Some(listeners.remove(idx))
    }

    /// Remove every listener of a plugin, returning the removed ids.
    pub fn remove_owned_by(&self, owner: &str) -> Vec<u32> {
        let mut removed = Vec::new();
        self.listeners.borrow_mut().retain(|l| {
            if l.owner == owner {
                removed.push(l.id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Live listeners of a plugin.
    pub fn count_for(&self, owner: &str) -> usize {
        self.listeners.borrow().iter().filter(|l| l.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_sweep() {
        let dom = DomListeners::new();
        let a1 = dom.add("a", 1, "click");
        dom.add("b", 2, "keydown");
        let a2 = dom.add("a", 3, "input");
        assert_eq!(dom.count_for("a"), 2);
        assert_eq!(dom.remove_owned_by("a"), vec![a1, a2]);
        assert_eq!(dom.count_for("a"), 0);
        assert_eq!(dom.len(), 1);
        assert!(dom.remove(a1).is_none());
    }
}
