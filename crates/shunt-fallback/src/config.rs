//! Fallback configuration, loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use shunt_core::UnaryOp;

use crate::{FallbackError, Result};

/// Which ops to redirect to the host, and how to report it.
///
/// ```json
/// { "ops": ["lgamma"], "announce": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    /// Ops whose accelerator inputs are computed on the host.
    pub ops: Vec<UnaryOp>,

    /// Print a line to stdout when installed globally.
    pub announce: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            ops: vec![UnaryOp::Lgamma],
            announce: true,
        }
    }
}

impl FallbackConfig {
    /// Redirect exactly `ops`.
    pub fn for_ops(ops: impl IntoIterator<Item = UnaryOp>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: FallbackConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FallbackError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Reject empty op lists.
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(FallbackError::Config("`ops` must name at least one op".into()));
        }
        Ok(())
    }

    /// Configured ops, sorted and deduplicated.
    pub fn unique_ops(&self) -> Vec<UnaryOp> {
        let mut ops = self.ops.clone();
        ops.sort();
        ops.dedup();
        ops
    }
}
