//! Compilation options for the lowering pipeline.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options controlling [`crate::pipeline::compile_kernel`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Lower multi-level continue/break before building the CFG
    pub structure_exits: bool,
    /// Log the IR after each pass
    pub print_ir: bool,
    /// Log the CFG as DOT after it is built
    pub print_cfg: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            structure_exits: true,
            print_ir: false,
            print_cfg: false,
        }
    }
}

impl CompileConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a config file; missing keys take their default value
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CompileConfig::from_json_str(r#"{ "print_ir": true }"#).unwrap();
        assert!(config.structure_exits);
        assert!(config.print_ir);
        assert!(!config.print_cfg);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(CompileConfig::from_json_str(r#"{ "structure_exits": "yes" }"#).is_err());
    }
}
