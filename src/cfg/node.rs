//! CFG node module
//!
//! This module contains the CfgNode struct and related functionality.

use crate::ir::{BlockId, IrTree, StmtId};
use petgraph::graph::NodeIndex;

/// Straight-line run `[begin, end)` of statements within one IR block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgNode {
    /// Block the range refers to; `None` only for synthetic empty nodes
    pub block: Option<BlockId>,
    /// Position of the first statement
    pub begin: usize,
    /// Position one past the last statement
    pub end: usize,
    /// Whether the statements run once per parallel-for index
    pub is_parallel_executed: bool,
    /// The node materialized just before this one in the same block
    pub prev_node_in_same_block: Option<NodeIndex>,
}

impl CfgNode {
    /// Create a node covering `[begin, end)` of `block`
    pub fn new(
        block: BlockId,
        begin: usize,
        end: usize,
        is_parallel_executed: bool,
        prev_node_in_same_block: Option<NodeIndex>,
    ) -> Self {
        Self {
            block: Some(block),
            begin,
            end,
            is_parallel_executed,
            prev_node_in_same_block,
        }
    }

    /// Synthetic node without statements (start and final nodes)
    pub fn empty() -> Self {
        Self {
            block: None,
            begin: 0,
            end: 0,
            is_parallel_executed: false,
            prev_node_in_same_block: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Get the number of statements in this node
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub fn contains(&self, block: BlockId, pos: usize) -> bool {
        self.block == Some(block) && pos >= self.begin && pos < self.end
    }

    /// Statements covered by this node
    pub fn statements<'t>(&self, tree: &'t IrTree) -> &'t [StmtId] {
        match self.block {
            Some(block) if !self.is_empty() => &tree.block(block).statements[self.begin..self.end],
            _ => &[],
        }
    }
}
