//! CFG analysis module
//!
//! Queries over a built [`ControlFlowGraph`]: reachability, dominators, natural
//! loops and the mapping between statements and the nodes that cover them.

use crate::cfg::ControlFlowGraph;
use crate::error::{Error, Result};
use crate::ir::{BlockId, IrTree, StmtId};
use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Natural loop information
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: NodeIndex,
    pub body_nodes: HashSet<NodeIndex>,
    pub back_edges: Vec<(NodeIndex, NodeIndex)>, // (tail, header) pairs
}

/// Loop analysis results
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    pub loops: Vec<Loop>,
    pub node_to_loops: HashMap<NodeIndex, Vec<usize>>, // node -> loop indices
}

impl LoopAnalysis {
    /// Get all loops containing a specific node
    pub fn get_loops_containing_node(&self, node: NodeIndex) -> &[usize] {
        self.node_to_loops
            .get(&node)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_node_in_loop(&self, node: NodeIndex) -> bool {
        self.node_to_loops.contains_key(&node)
    }

    /// Get the innermost (smallest) loop containing a node
    pub fn get_innermost_loop(&self, node: NodeIndex) -> Option<&Loop> {
        self.get_loops_containing_node(node)
            .iter()
            .map(|&index| &self.loops[index])
            .min_by_key(|l| l.body_nodes.len())
    }
}

/// Nodes reachable from the start node
pub fn reachable_from_start(cfg: &ControlFlowGraph) -> BTreeSet<NodeIndex> {
    let mut reachable = BTreeSet::new();
    let mut dfs = Dfs::new(cfg.graph(), cfg.start_node());
    while let Some(node) = dfs.next(cfg.graph()) {
        reachable.insert(node);
    }
    reachable
}

/// Nodes from which the final node can be reached
pub fn nodes_reaching_final(cfg: &ControlFlowGraph) -> BTreeSet<NodeIndex> {
    let reversed = Reversed(cfg.graph());
    let mut reaching = BTreeSet::new();
    let mut dfs = Dfs::new(reversed, cfg.final_node());
    while let Some(node) = dfs.next(reversed) {
        reaching.insert(node);
    }
    reaching
}

/// Reachable nodes without successors, other than the final node.
///
/// A well-formed graph has none: every exit path ends at the final node.
pub fn dead_ends(cfg: &ControlFlowGraph) -> Vec<NodeIndex> {
    reachable_from_start(cfg)
        .into_iter()
        .filter(|&node| node != cfg.final_node() && cfg.successors(node).is_empty())
        .collect()
}

/// Dominator tree rooted at the start node
pub fn dominators(cfg: &ControlFlowGraph) -> Dominators<NodeIndex> {
    dominators::simple_fast(cfg.graph(), cfg.start_node())
}

/// Edges whose target dominates their source
pub fn back_edges(cfg: &ControlFlowGraph) -> Vec<(NodeIndex, NodeIndex)> {
    let doms = dominators(cfg);
    cfg.edges()
        .into_iter()
        .filter(|&(from, to, _)| {
            doms.dominators(from)
                .map(|mut chain| chain.any(|d| d == to))
                .unwrap_or(false)
        })
        .map(|(from, to, _)| (from, to))
        .collect()
}

/// Natural loops keyed by their header, built from the dominator back edges
pub fn find_natural_loops(cfg: &ControlFlowGraph) -> LoopAnalysis {
    let mut by_header: HashMap<NodeIndex, Loop> = HashMap::new();
    for (tail, header) in back_edges(cfg) {
        let entry = by_header.entry(header).or_insert_with(|| Loop {
            header,
            body_nodes: HashSet::from([header]),
            back_edges: Vec::new(),
        });
        entry.back_edges.push((tail, header));
        // Walk predecessors from the tail until the header.
        let mut stack = vec![tail];
        while let Some(node) = stack.pop() {
            if entry.body_nodes.insert(node) {
                stack.extend(cfg.predecessors(node));
            }
        }
    }

    let mut headers: Vec<_> = by_header.keys().copied().collect();
    headers.sort();
    let mut analysis = LoopAnalysis::default();
    for header in headers {
        if let Some(l) = by_header.remove(&header) {
            let index = analysis.loops.len();
            for &node in &l.body_nodes {
                analysis.node_to_loops.entry(node).or_default().push(index);
            }
            analysis.loops.push(l);
        }
    }
    analysis
}

/// Node covering `stmt`, if the statement sits inside a node at all
pub fn node_of_statement(
    cfg: &ControlFlowGraph,
    tree: &IrTree,
    stmt: StmtId,
) -> Result<Option<NodeIndex>> {
    let (block, pos) = tree.position(stmt)?;
    Ok(cfg
        .nodes()
        .find(|(_, node)| node.contains(block, pos))
        .map(|(index, _)| index))
}

/// Map every covered statement to its node.
///
/// Fails when two nodes claim the same statement.
pub fn statement_owners(
    cfg: &ControlFlowGraph,
    tree: &IrTree,
) -> Result<HashMap<StmtId, NodeIndex>> {
    let mut owners = HashMap::new();
    for (index, node) in cfg.nodes() {
        for &stmt in node.statements(tree) {
            if let Some(previous) = owners.insert(stmt, index) {
                return Err(Error::InvariantViolation {
                    block: node.block,
                    message: format!(
                        "{} is covered by nodes {} and {}",
                        stmt,
                        previous.index(),
                        index.index()
                    ),
                });
            }
        }
    }
    Ok(owners)
}

/// First node materialized for `block`
pub fn block_entry_node(cfg: &ControlFlowGraph, block: BlockId) -> Option<NodeIndex> {
    cfg.nodes()
        .find(|(_, node)| node.block == Some(block) && node.prev_node_in_same_block.is_none())
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::IrBuilder;

    #[test]
    fn test_loop_body_forms_natural_loop() {
        let mut b = IrBuilder::new();
        b.range_for(|b, _| {
            b.op("work", vec![]);
        });
        let tree = b.finish();
        let cfg = build_cfg(&tree).unwrap();
        let loops = find_natural_loops(&cfg);
        assert_eq!(loops.loops.len(), 1);
        let body = NodeIndex::new(2);
        assert_eq!(loops.loops[0].header, body);
        assert!(loops.is_node_in_loop(body));
        assert!(dead_ends(&cfg).is_empty());
    }

    #[test]
    fn test_innermost_loop_of_nested_body() {
        let mut b = IrBuilder::new();
        b.range_for(|b, _| {
            b.op("outer", vec![]);
            b.range_for(|b, _| {
                b.op("inner", vec![]);
            });
        });
        let tree = b.finish();
        let cfg = build_cfg(&tree).unwrap();
        let loops = find_natural_loops(&cfg);
        assert_eq!(loops.loops.len(), 2);

        let inner_stmt = tree.preorder(tree.root())[3];
        let inner_node = node_of_statement(&cfg, &tree, inner_stmt).unwrap().unwrap();
        assert_eq!(loops.get_loops_containing_node(inner_node).len(), 2);
        let innermost = loops.get_innermost_loop(inner_node).unwrap();
        assert_eq!(innermost.header, inner_node);
        assert!(innermost.body_nodes.len() < loops.loops[0].body_nodes.len());
        assert!(loops.get_innermost_loop(cfg.start_node()).is_none());
    }

    #[test]
    fn test_every_statement_has_one_owner() {
        let mut b = IrBuilder::new();
        let c = b.const_bool(true);
        b.if_else(
            c,
            |b| {
                b.op("a", vec![]);
            },
            |b| {
                b.op("b", vec![]);
            },
        );
        b.op("after", vec![]);
        let tree = b.finish();
        let cfg = build_cfg(&tree).unwrap();
        let owners = statement_owners(&cfg, &tree).unwrap();
        // Every non-container statement is owned, the `if` itself is not.
        assert_eq!(owners.len(), tree.stmt_count() - 1);
        for (index, node) in cfg.nodes() {
            if let Some(block) = node.block {
                if node.prev_node_in_same_block.is_none() {
                    assert_eq!(block_entry_node(&cfg, block), Some(index));
                }
            }
        }
    }
}
