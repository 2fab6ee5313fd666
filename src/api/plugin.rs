//! Per-plugin contribution ledger.
//!
//! Every registration a plugin makes is appended here under its id, so that
//! unloading can reverse exactly what loading did, including the partial
//! registrations of a load that failed halfway.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::Serialize;

use super::events::EventRef;

/// Everything one plugin has registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributions {
    pub commands: Vec<String>,
    pub setting_tabs: Vec<u32>,
    pub ribbon_icons: Vec<u32>,
    pub events: Vec<EventRef>,
    pub post_processors: Vec<u32>,
    pub stylesheets: Vec<String>,
    pub status_bar_items: Vec<u32>,
    pub intervals: Vec<u32>,
    pub dom_events: Vec<u32>,
    pub views: Vec<String>,
    pub editor_extensions: Vec<u32>,
}

impl Contributions {
    /// Total number of recorded registrations.
    pub fn total(&self) -> usize {
        self.commands.len()
            + self.setting_tabs.len()
            + self.ribbon_icons.len()
            + self.events.len()
            + self.post_processors.len()
            + self.stylesheets.len()
            + self.status_bar_items.len()
            + self.intervals.len()
            + self.dom_events.len()
            + self.views.len()
            + self.editor_extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Contribution ledgers of every plugin with a live or partial load.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: RefCell<BTreeMap<String, Contributions>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh ledger for a plugin.
    pub fn open(&self, plugin_id: &str) {
        self.entries.borrow_mut().insert(plugin_id.to_string(), Contributions::default());
    }

    /// Append to a plugin's ledger, opening it if needed.
    pub fn record(&self, plugin_id: &str, f: impl FnOnce(&mut Contributions)) {
        let mut entries = self.entries.borrow_mut();
        f(entries.entry(plugin_id.to_string()).or_default());
    }

    pub fn get(&self, plugin_id: &str) -> Option<Contributions> {
        self.entries.borrow().get(plugin_id).cloned()
    }

    /// Remove and return a plugin's ledger.
    pub fn take(&self, plugin_id: &str) -> Contributions {
        self.entries.borrow_mut().remove(plugin_id).unwrap_or_default()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.entries.borrow().contains_key(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_record_and_take() {
        let ledger = Ledger::new();
        ledger.open("a");
        ledger.record("a", |c| c.commands.push("a:one".into()));
        ledger.record("a", |c| c.intervals.push(4));
        ledger.record("b", |c| c.stylesheets.push("plugin-style-b".into()));
        assert_eq!(ledger.get("a").unwrap().total(), 2);
        let taken = ledger.take("a");
        assert_eq!(taken.commands, vec!["a:one"]);
        assert!(!ledger.contains("a"));
        assert!(ledger.take("a").is_empty());
        assert!(ledger.contains("b"));
    }
}
