//! Kernel compilation driver: exit lowering followed by CFG construction.

use crate::cfg::{build_cfg, ControlFlowGraph};
use crate::config::CompileConfig;
use crate::error::Result;
use crate::ir::IrTree;
use crate::transforms::structure_exits;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A named kernel body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    pub ir: IrTree,
}

/// Input file contents: one kernel or a list of kernels
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KernelFile {
    Many(Vec<Kernel>),
    One(Kernel),
}

/// Result of compiling one kernel
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub name: String,
    /// Whether exit lowering rewrote the tree
    pub modified: bool,
    pub cfg: ControlFlowGraph,
}

pub fn parse_kernels(text: &str) -> Result<Vec<Kernel>> {
    let kernels = match serde_json::from_str::<KernelFile>(text)? {
        KernelFile::Many(kernels) => kernels,
        KernelFile::One(kernel) => vec![kernel],
    };
    for kernel in &kernels {
        kernel.ir.validate()?;
    }
    Ok(kernels)
}

/// Read and validate the kernels of a JSON file
pub fn load_kernels(path: &Path) -> Result<Vec<Kernel>> {
    let text = std::fs::read_to_string(path)?;
    parse_kernels(&text)
}

/// Lower the exits of a kernel (if enabled) and build its CFG
pub fn compile_kernel(kernel: &mut Kernel, config: &CompileConfig) -> Result<CompiledKernel> {
    log::debug!("[pipeline] compiling kernel {}", kernel.name);
    if config.print_ir {
        log::info!("[pipeline] {} before lowering:\n{}", kernel.name, kernel.ir);
    }

    let modified = if config.structure_exits {
        structure_exits(&mut kernel.ir, config)?
    } else {
        false
    };

    let cfg = build_cfg(&kernel.ir)?;
    log::debug!(
        "[pipeline] {}: {} nodes, {} edges, {} warnings",
        kernel.name,
        cfg.size(),
        cfg.edge_count(),
        cfg.warnings().len()
    );
    if config.print_cfg {
        log::info!("[pipeline] {} CFG:\n{}", kernel.name, cfg.to_dot(&kernel.ir));
    }

    Ok(CompiledKernel {
        name: kernel.name.clone(),
        modified,
        cfg,
    })
}

/// Compile independent kernels in parallel, keeping input order
pub fn compile_all(kernels: &mut [Kernel], config: &CompileConfig) -> Vec<Result<CompiledKernel>> {
    kernels
        .par_iter_mut()
        .map(|kernel| compile_kernel(kernel, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, OffloadedTaskType};

    fn kernel(name: &str) -> Kernel {
        let mut b = IrBuilder::new();
        b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
            b.while_loop(|b, _| {
                b.func_return_cont(task, 2);
            });
        });
        Kernel {
            name: name.to_string(),
            ir: b.finish(),
        }
    }

    #[test]
    fn test_compile_all_keeps_order() {
        let mut kernels = vec![kernel("a"), kernel("b"), kernel("c")];
        let results = compile_all(&mut kernels, &CompileConfig::default());
        let names: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| r.as_ref().unwrap().modified));
    }

    #[test]
    fn test_lowering_can_be_disabled() {
        let mut k = kernel("k");
        let config = CompileConfig {
            structure_exits: false,
            ..CompileConfig::default()
        };
        let before = k.ir.clone();
        let compiled = compile_kernel(&mut k, &config).unwrap();
        assert!(!compiled.modified);
        assert_eq!(k.ir, before);
        assert!(!compiled.cfg.warnings().is_empty());
    }

    #[test]
    fn test_parse_single_and_many() {
        let one = serde_json::to_string(&kernel("one")).unwrap();
        assert_eq!(parse_kernels(&one).unwrap().len(), 1);
        let many = serde_json::to_string(&vec![kernel("x"), kernel("y")]).unwrap();
        assert_eq!(parse_kernels(&many).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_root_owned_by_its_own_loop() {
        let text = r#"{
            "name": "cyclic",
            "ir": {
                "stmts": [
                    { "kind": { "op": "loop", "kind": "while", "body": 1 }, "parent": 0 },
                    { "kind": { "op": "continue", "levels_up": 3 }, "parent": 1 }
                ],
                "blocks": [
                    { "statements": [0], "parent_stmt": 0 },
                    { "statements": [1], "parent_stmt": 0 }
                ],
                "root": 0
            }
        }"#;
        assert!(matches!(
            parse_kernels(text),
            Err(crate::error::Error::MalformedTree { .. })
        ));
    }
}
