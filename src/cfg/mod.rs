//! Control Flow Graph (CFG) module
//!
//! This module handles building and analyzing control flow graphs from kernel IR trees.

pub mod analysis;
pub mod builder;
pub mod node;
pub mod visualization;

use crate::ir::{IrTree, StmtId};
use miette::Diagnostic;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use thiserror::Error;

pub use builder::{build_cfg, CfgBuilder, CfgRoot};
pub use node::CfgNode;

/// Edge kind in the control flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Sequential flow into the next node
    Fall,
    /// Into the true branch of an `If`, or past an `If` lacking a false branch
    True,
    /// Into the false branch of an `If`, or past an `If` lacking a true branch
    False,
    /// From the node before a loop into its first body node
    LoopEntry,
    /// From the last body node back to the first
    BackEdge,
    /// Normal loop exit into the node after the loop
    LoopExit,
    /// `Break` or `WhileControl` exit into the node after the loop
    Break,
    /// `Continue` into the loop-begin node of its target
    Continue,
    /// Conservative or unresolved exit into the final node
    Unwind,
    /// Between the phases of an offloaded task
    Phase,
}

/// Resolution ambiguity recorded while building a CFG.
///
/// The edge is still emitted (to the final node); the warning only makes the
/// over-approximation auditable.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum CfgWarning {
    #[error("{stmt} has levels_up={levels_up} but only {depth} enclosing loops; connected to the final node")]
    #[diagnostic(code(kernel_cfg::levels_up_out_of_range), severity(Warning))]
    LevelsUpOutOfRange {
        stmt: StmtId,
        levels_up: u32,
        depth: usize,
    },

    #[error("{stmt} targets {scope}, which has no loop-begin node in this graph; connected to the final node")]
    #[diagnostic(code(kernel_cfg::scope_not_built), severity(Warning))]
    ScopeNotBuilt { stmt: StmtId, scope: StmtId },

    #[error("function-return unwind {stmt} (scope {scope}) conservatively connected to the final node")]
    #[diagnostic(code(kernel_cfg::conservative_unwind), severity(Advice))]
    ConservativeUnwind { stmt: StmtId, scope: StmtId },
}

impl CfgWarning {
    /// The exit statement the warning is about
    pub fn stmt(&self) -> StmtId {
        match self {
            CfgWarning::LevelsUpOutOfRange { stmt, .. }
            | CfgWarning::ScopeNotBuilt { stmt, .. }
            | CfgWarning::ConservativeUnwind { stmt, .. } => *stmt,
        }
    }
}

/// Control flow graph over an [`IrTree`].
///
/// Node indices follow materialization order and nodes are never removed.
/// Node 0 is the empty start node; the final node is always empty too.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    graph: DiGraph<CfgNode, EdgeKind>,
    start_node: NodeIndex,
    final_node: NodeIndex,
    warnings: Vec<CfgWarning>,
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlowGraph {
    /// Create a graph holding only the empty start node
    pub fn new() -> Self {
        let mut graph = DiGraph::new();
        let start_node = graph.add_node(CfgNode::empty());
        Self {
            graph,
            start_node,
            final_node: start_node,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn push_node(&mut self, node: CfgNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Add `from -> to` unless that edge already exists
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> bool {
        if self.graph.find_edge(from, to).is_some() {
            return false;
        }
        self.graph.add_edge(from, to, kind);
        true
    }

    pub(crate) fn set_final_node(&mut self, node: NodeIndex) {
        self.final_node = node;
    }

    pub(crate) fn push_warning(&mut self, warning: CfgWarning) {
        self.warnings.push(warning);
    }

    /// Get the underlying graph
    pub fn graph(&self) -> &DiGraph<CfgNode, EdgeKind> {
        &self.graph
    }

    pub fn size(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, index: NodeIndex) -> &CfgNode {
        &self.graph[index]
    }

    /// Nodes in materialization order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &CfgNode)> + '_ {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    /// Most recently materialized node
    pub fn back(&self) -> NodeIndex {
        NodeIndex::new(self.graph.node_count() - 1)
    }

    pub fn start_node(&self) -> NodeIndex {
        self.start_node
    }

    pub fn final_node(&self) -> NodeIndex {
        self.final_node
    }

    /// Successors sorted by index
    pub fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// Predecessors sorted by index
    pub fn predecessors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(node, Direction::Incoming)
    }

    fn neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<_> = self.graph.neighbors_directed(node, direction).collect();
        neighbors.sort();
        neighbors
    }

    pub fn edge_kind(&self, from: NodeIndex, to: NodeIndex) -> Option<EdgeKind> {
        self.graph
            .find_edge(from, to)
            .and_then(|edge| self.graph.edge_weight(edge))
            .copied()
    }

    /// All edges sorted by `(from, to)`
    pub fn edges(&self) -> Vec<(NodeIndex, NodeIndex, EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), *edge.weight()))
            .collect();
        edges.sort_by_key(|&(from, to, _)| (from, to));
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Resolution ambiguities recorded during the build
    pub fn warnings(&self) -> &[CfgWarning] {
        &self.warnings
    }

    /// Export CFG to DOT format
    pub fn to_dot(&self, tree: &IrTree) -> String {
        visualization::generate_dot(self, Some(tree), &visualization::DotOptions::default())
    }
}
