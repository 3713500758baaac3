//! Import configuration.

use serde::{Deserialize, Serialize};

/// Settings for one model import.
///
/// Missing fields take their defaults, so a host can embed this in its own
/// configuration and only spell out what it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Prefix of the final dimension names (`d` gives `d0`, `d1`, ...)
    pub dimension_prefix: String,
    /// Evaluate context-independent operations once at import time
    pub fold_constants: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            dimension_prefix: "d".to_string(),
            fold_constants: true,
        }
    }
}

impl ImportConfig {
    pub fn with_dimension_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dimension_prefix = prefix.into();
        self
    }

    pub fn with_fold_constants(mut self, fold: bool) -> Self {
        self.fold_constants = fold;
        self
    }
}
