//! Plugin stylesheets, tagged by plugin id so unload can remove them.

use std::cell::RefCell;

/// One injected stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheet {
    pub tag: String,
    pub css: String,
}

/// Stylesheets currently applied to the document.
#[derive(Debug, Default)]
pub struct StyleSheets {
    sheets: RefCell<Vec<StyleSheet>>,
}

impl StyleSheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a stylesheet, replacing any with the same tag.
    pub fn inject(&self, tag: &str, css: &str) {
        let mut sheets = self.sheets.borrow_mut();
        sheets.retain(|s| s.tag != tag);
        sheets.push(StyleSheet { tag: tag.to_string(), css: css.to_string() });
    }

    /// Remove the stylesheet with this tag. Returns whether one was present.
    pub fn remove(&self, tag: &str) -> bool {
        let mut sheets = self.sheets.borrow_mut();
        let before = sheets.len();
        sheets.retain(|s| s.tag != tag);
        before != sheets.len()
    }

    pub fn get(&self, tag: &str) -> Option<StyleSheet> {
        self.sheets.borrow().iter().find(|s| s.tag == tag).cloned()
    }

    pub fn tags(&self) -> Vec<String> {
        self.sheets.borrow().iter().map(|s| s.tag.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sheets.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tag used for a plugin's stylesheet.
pub fn plugin_style_tag(plugin_id: &str) -> String {
    format!("plugin-style-{}", plugin_id)
}
