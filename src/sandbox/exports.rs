//! Picking the plugin class out of a module's exports.

use serde::{Deserialize, Serialize};

/// What a module left in `module.exports`, as reported by the prelude.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportShape {
    /// `module.exports` itself is a function.
    pub module_is_function: bool,
    /// `module.exports.default` is a function.
    pub default_is_function: bool,
    /// Function-typed own keys of `module.exports`, in definition order.
    #[serde(default)]
    pub function_keys: Vec<String>,
}

/// Which export holds the plugin class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportChoice {
    Module,
    Default,
    Named { name: String },
}

/// Choose the export to instantiate.
///
/// In order: `module.exports` as a function, `exports.default`, the only
/// function export, then the first function export.
pub fn resolve_export(shape: &ExportShape) -> Option<ExportChoice> {
    if shape.module_is_function {
        return Some(ExportChoice::Module);
    }
    if shape.default_is_function {
        return Some(ExportChoice::Default);
    }
    shape.function_keys.first().map(|name| ExportChoice::Named { name: name.clone() })
}
