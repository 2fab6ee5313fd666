//! User-visible notices.

use std::cell::{Cell, RefCell};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Default display time of a notice, in milliseconds.
pub const DEFAULT_NOTICE_TIMEOUT_MS: u64 = 5000;

/// One notice shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u32,
    pub message: String,
    pub timeout_ms: u64,
    pub created_at: DateTime<Local>,
    /// Plugin the notice is about, when raised by the loader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub hidden: bool,
}

/// Ordered log of every notice raised this session.
#[derive(Debug, Default)]
pub struct NoticeCenter {
    next_id: Cell<u32>,
    notices: RefCell<Vec<Notice>>,
}

impl NoticeCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a notice.
    pub fn show(&self, message: impl Into<String>, timeout_ms: Option<u64>, plugin_id: Option<&str>) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let message = message.into();
        tracing::info!(notice = id, plugin = plugin_id.unwrap_or("-"), "{}", message);
        self.notices.borrow_mut().push(Notice {
            id,
            message,
            timeout_ms: timeout_ms.unwrap_or(DEFAULT_NOTICE_TIMEOUT_MS),
            created_at: Local::now(),
            plugin_id: plugin_id.map(str::to_string),
            hidden: false,
        });
        id
    }

    pub fn set_message(&self, id: u32, message: impl Into<String>) -> bool {
        match self.notices.borrow_mut().iter_mut().find(|n| n.id == id) {
            Some(notice) => {
                notice.message = message.into();
                true
            }
            None => false,
        }
    }

    pub fn hide(&self, id: u32) -> bool {
        match self.notices.borrow_mut().iter_mut().find(|n| n.id == id) {
            Some(notice) => {
                notice.hidden = true;
                true
            }
            None => false,
        }
    }

    /// Every notice, oldest first.
    pub fn all(&self) -> Vec<Notice> {
        self.notices.borrow().clone()
    }

    /// Notices raised about one plugin.
    pub fn for_plugin(&self, plugin_id: &str) -> Vec<Notice> {
        self.notices.borrow().iter().filter(|n| n.plugin_id.as_deref() == Some(plugin_id)).cloned().collect()
    }

    /// Notices still visible `now`.
    pub fn visible(&self, now: DateTime<Local>) -> Vec<Notice> {
        self.notices
            .borrow()
            .iter()
            .filter(|n| {
                !n.hidden
                    && (n.timeout_ms == 0
                        || now.signed_duration_since(n.created_at).num_milliseconds() < n.timeout_ms as i64)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.notices.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_lifecycle() {
        let center = NoticeCenter::new();
        let id = center.show("Saved", None, None);
        center.show("Plugin failed", Some(0), Some("calendar"));
        assert_eq!(center.len(), 2);
        assert!(center.set_message(id, "Saved!"));
        assert_eq!(center.all()[0].message, "Saved!");
        assert_eq!(center.for_plugin("calendar").len(), 1);
        assert!(center.hide(id));
        assert_eq!(center.visible(Local::now()).len(), 1);
        assert!(!center.hide(99));
    }

    #[test]
    fn test_notice_expiry() {
        let center = NoticeCenter::new();
        center.show("brief", Some(10), None);
        let later = Local::now() + chrono::Duration::seconds(1);
        assert!(center.visible(later).is_empty());
    }
}
