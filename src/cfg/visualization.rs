//! CFG visualization module
//!
//! This module contains visualization utilities for CFGs.

use crate::cfg::{CfgNode, ControlFlowGraph, EdgeKind};
use crate::ir::IrTree;

/// DOT generation options
#[derive(Debug, Clone)]
pub struct DotOptions {
    /// Include edge labels
    pub include_labels: bool,
    /// Include edge colors
    pub include_colors: bool,
    /// List the statements of each node (needs the tree)
    pub include_node_details: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            include_labels: true,
            include_colors: true,
            include_node_details: true,
        }
    }
}

/// Generate DOT representation of a CFG
pub fn generate_dot(cfg: &ControlFlowGraph, tree: Option<&IrTree>, options: &DotOptions) -> String {
    let mut dot = String::new();
    dot.push_str("digraph CFG {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, fontname=\"monospace\"];\n\n");

    for (index, node) in cfg.nodes() {
        let label = format_node_label(cfg, index.index(), node, tree, options);
        let mut attributes = vec![format!("label=\"{}\"", label)];
        if node.is_parallel_executed {
            attributes.push("style=dashed".to_string());
        }
        if index == cfg.start_node() || index == cfg.final_node() {
            attributes.push("shape=ellipse".to_string());
        }
        dot.push_str(&format!("  {} [{}];\n", index.index(), attributes.join(", ")));
    }

    dot.push('\n');

    for (from, to, kind) in cfg.edges() {
        let mut edge_str = format!("  {} -> {}", from.index(), to.index());
        let mut attributes = Vec::new();

        if options.include_labels {
            if let Some(label) = get_edge_label(&kind) {
                attributes.push(format!("label=\"{}\"", label));
            }
        }

        if options.include_colors {
            attributes.push(format!("color=\"{}\"", get_edge_color(&kind)));
        }

        if !attributes.is_empty() {
            edge_str.push_str(&format!(" [{}]", attributes.join(", ")));
        }

        edge_str.push_str(";\n");
        dot.push_str(&edge_str);
    }

    dot.push_str("}\n");
    dot
}

fn format_node_label(
    cfg: &ControlFlowGraph,
    index: usize,
    node: &CfgNode,
    tree: Option<&IrTree>,
    options: &DotOptions,
) -> String {
    let title = if index == cfg.start_node().index() {
        "start".to_string()
    } else if index == cfg.final_node().index() {
        "final".to_string()
    } else {
        match node.block {
            Some(block) => format!("#{} block {} [{}, {})", index, block.0, node.begin, node.end),
            None => format!("#{}", index),
        }
    };
    let Some(tree) = tree.filter(|_| options.include_node_details) else {
        return title;
    };
    let mut label = title;
    for &stmt in node.statements(tree) {
        label.push_str("\\l");
        label.push_str(&escape(&tree.stmt_summary(stmt)));
    }
    if !node.is_empty() {
        label.push_str("\\l");
    }
    label
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Get edge label for DOT
fn get_edge_label(edge_kind: &EdgeKind) -> Option<&'static str> {
    match edge_kind {
        EdgeKind::True => Some("T"),
        EdgeKind::False => Some("F"),
        EdgeKind::LoopEntry => Some("entry"),
        EdgeKind::BackEdge => Some("back"),
        EdgeKind::LoopExit => Some("exit"),
        EdgeKind::Break => Some("break"),
        EdgeKind::Continue => Some("continue"),
        EdgeKind::Unwind => Some("unwind"),
        EdgeKind::Phase => Some("phase"),
        EdgeKind::Fall => None, // No label for sequential flow
    }
}

/// Get edge color for DOT
fn get_edge_color(edge_kind: &EdgeKind) -> &'static str {
    match edge_kind {
        EdgeKind::True => "green",
        EdgeKind::False => "red",
        EdgeKind::LoopEntry => "blue",
        EdgeKind::BackEdge => "blue",
        EdgeKind::LoopExit => "orange",
        EdgeKind::Break => "orange",
        EdgeKind::Continue => "purple",
        EdgeKind::Unwind => "gray",
        EdgeKind::Phase => "cyan",
        EdgeKind::Fall => "black",
    }
}
