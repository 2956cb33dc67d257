//! kernel-cfg: control-flow graphs and structured exit lowering for kernel IR
//!
//! This library builds explicit control-flow graphs from nested kernel IR trees
//! and rewrites multi-level continue/break statements into the single-level
//! exits that structured backends accept.

pub mod cfg;
pub mod cli;
pub mod config;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod transforms;

pub use error::{Error as KernelCfgError, Result as KernelCfgResult};

// Re-export commonly used types
pub use cfg::{build_cfg, CfgBuilder, CfgNode, CfgRoot, ControlFlowGraph, EdgeKind};
pub use config::CompileConfig;
pub use ir::{IrBuilder, IrTree, StmtId, StmtKind};
pub use pipeline::{compile_kernel, Kernel};
pub use transforms::structure_exits;
