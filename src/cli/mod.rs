//! Command-line interface module
//!
//! This module contains the implementations for the CLI subcommands.

use crate::config::CompileConfig;
use crate::error::Result as KernelCfgResult;
use std::path::Path;

pub mod cfg;
pub mod dump;
pub mod normalize;

/// Load the config file if one was given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> KernelCfgResult<CompileConfig> {
    match path {
        Some(path) => CompileConfig::from_json_file(path),
        None => Ok(CompileConfig::default()),
    }
}

/// Write `text` to `output`, or to stdout when no path is given
pub(crate) fn emit(output: Option<&Path>, text: &str) -> KernelCfgResult<()> {
    match output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{}", text),
    }
    Ok(())
}
