use crate::cfg::analysis;
use crate::cfg::EdgeKind;
use crate::cli::{emit, load_config};
use crate::error::{Error as KernelCfgError, Result as KernelCfgResult};
use crate::pipeline::{compile_all, load_kernels, CompiledKernel, Kernel};
use serde::Serialize;
use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

/// Output format of the cfg subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CfgFormat {
    Text,
    Json,
}

/// Arguments of the cfg subcommand
#[derive(Debug, Clone)]
pub struct CfgArgs {
    pub input_path: PathBuf,
    pub config_path: Option<PathBuf>,
    /// Output DOT file; one file per kernel when the input holds several
    pub dot_path: Option<PathBuf>,
    pub format: CfgFormat,
    /// Skip exit lowering regardless of the config
    pub no_normalize: bool,
}

#[derive(Serialize)]
struct NodeReport {
    index: usize,
    block: Option<u32>,
    begin: usize,
    end: usize,
    is_parallel_executed: bool,
}

#[derive(Serialize)]
struct EdgeReport {
    from: usize,
    to: usize,
    kind: EdgeKind,
}

#[derive(Serialize)]
struct CfgReport {
    name: String,
    modified: bool,
    start_node: usize,
    final_node: usize,
    nodes: Vec<NodeReport>,
    edges: Vec<EdgeReport>,
    warnings: Vec<String>,
}

impl CfgReport {
    fn new(compiled: &CompiledKernel) -> Self {
        let cfg = &compiled.cfg;
        Self {
            name: compiled.name.clone(),
            modified: compiled.modified,
            start_node: cfg.start_node().index(),
            final_node: cfg.final_node().index(),
            nodes: cfg
                .nodes()
                .map(|(index, node)| NodeReport {
                    index: index.index(),
                    block: node.block.map(|b| b.0),
                    begin: node.begin,
                    end: node.end,
                    is_parallel_executed: node.is_parallel_executed,
                })
                .collect(),
            edges: cfg
                .edges()
                .into_iter()
                .map(|(from, to, kind)| EdgeReport {
                    from: from.index(),
                    to: to.index(),
                    kind,
                })
                .collect(),
            warnings: cfg.warnings().iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Build and report control flow graphs for every kernel of the input
pub fn cfg(args: &CfgArgs) -> KernelCfgResult<()> {
    let mut config = load_config(args.config_path.as_deref())?;
    if args.no_normalize {
        config.structure_exits = false;
    }
    let mut kernels = load_kernels(&args.input_path)?;
    let compiled = compile_all(&mut kernels, &config)
        .into_iter()
        .collect::<KernelCfgResult<Vec<_>>>()?;

    if let Some(dot_path) = &args.dot_path {
        write_dot_files(dot_path, &kernels, &compiled)?;
    }

    let out = match args.format {
        CfgFormat::Json => {
            let reports: Vec<_> = compiled.iter().map(CfgReport::new).collect();
            serde_json::to_string_pretty(&reports).map_err(KernelCfgError::from)? + "\n"
        }
        CfgFormat::Text => {
            let mut out = String::new();
            for (kernel, result) in kernels.iter().zip(&compiled) {
                text_report(&mut out, kernel, result)
                    .map_err(|e| KernelCfgError::internal(e.to_string()))?;
            }
            out
        }
    };
    emit(None, &out)
}

fn write_dot_files(
    dot_path: &Path,
    kernels: &[Kernel],
    compiled: &[CompiledKernel],
) -> KernelCfgResult<()> {
    if let [kernel] = kernels {
        std::fs::write(dot_path, compiled[0].cfg.to_dot(&kernel.ir))?;
        eprintln!("DOT file written to: {}", dot_path.display());
        return Ok(());
    }
    let stem = dot_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "cfg".to_string());
    for (kernel, result) in kernels.iter().zip(compiled) {
        let path = dot_path.with_file_name(format!("{}.{}.dot", stem, kernel.name));
        std::fs::write(&path, result.cfg.to_dot(&kernel.ir))?;
        eprintln!("DOT file written to: {}", path.display());
    }
    Ok(())
}

fn text_report(out: &mut String, kernel: &Kernel, compiled: &CompiledKernel) -> fmt::Result {
    let cfg = &compiled.cfg;
    writeln!(out, "Kernel {}", compiled.name)?;
    if compiled.modified {
        writeln!(out, "  Lowered non-local exits")?;
    }
    writeln!(out, "  Nodes: {}", cfg.size())?;
    writeln!(out, "  Edges: {}", cfg.edge_count())?;
    for (index, node) in cfg.nodes() {
        let mut line = match node.block {
            Some(block) => format!(
                "    Node {}: block {} [{}, {}) ({} statements)",
                index.index(),
                block.0,
                node.begin,
                node.end,
                node.len()
            ),
            None => format!("    Node {}: empty", index.index()),
        };
        if index == cfg.start_node() {
            line.push_str(" start");
        }
        if index == cfg.final_node() {
            line.push_str(" final");
        }
        if node.is_parallel_executed {
            line.push_str(" parallel");
        }
        writeln!(out, "{}", line)?;
        for &stmt in node.statements(&kernel.ir) {
            writeln!(out, "      {}", kernel.ir.stmt_summary(stmt))?;
        }
    }
    for (from, to, kind) in cfg.edges() {
        writeln!(out, "    {} -> {} ({:?})", from.index(), to.index(), kind)?;
    }

    let loops = analysis::find_natural_loops(cfg);
    if !loops.loops.is_empty() {
        writeln!(out, "  Natural loops: {} found", loops.loops.len())?;
        for l in &loops.loops {
            writeln!(
                out,
                "    Loop: header {} ({} nodes)",
                l.header.index(),
                l.body_nodes.len()
            )?;
        }
    }
    let dead_ends = analysis::dead_ends(cfg);
    if !dead_ends.is_empty() {
        let list: Vec<_> = dead_ends.iter().map(|n| n.index().to_string()).collect();
        writeln!(out, "  Dead ends: {}", list.join(", "))?;
    }
    for warning in cfg.warnings() {
        writeln!(out, "  Warning: {}", warning)?;
    }
    Ok(())
}
