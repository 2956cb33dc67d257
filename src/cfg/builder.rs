//! CFG builder module
//!
//! Projects a nested IR tree onto a [`ControlFlowGraph`]. The builder walks the
//! tree once; nodes are materialized lazily when a control-flow boundary is hit,
//! so node numbering is exactly materialization order.
//!
//! Notation used below: `node... -> a, b` means the node gets edges to `a` and
//! `b`; `(next node)` is a node not yet created when the construct is visited.
//!
//! ```text
//! node_before_if { ... } -> node_true_begin, node_false_begin;
//! if (...) { node_true_begin ... node_true_end } -> (next node)
//! else     { node_false_begin ... node_false_end } -> (next node)
//!
//! node_before_loop { ... } -> node_loop_begin, [(next node) unless while-true];
//! loop { node_loop_begin ... node_loop_end } -> node_loop_begin, [(next node) unless while-true]
//! ```

use crate::cfg::{CfgNode, CfgWarning, ControlFlowGraph, EdgeKind};
use crate::error::{Error, Result};
use crate::ir::{BlockId, ExitKind, IrTree, OffloadBlocks, OffloadPhase, OffloadedTaskType, StmtId, StmtKind};
use petgraph::graph::NodeIndex;
use std::collections::HashMap;

/// Where the traversal starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgRoot {
    Block(BlockId),
    /// A single statement (typically an offloaded task) inside its parent block
    Stmt(StmtId),
}

/// Exits collected for one loop scope while its body is visited
struct LoopFrame {
    scope: StmtId,
    exits: Vec<(NodeIndex, EdgeKind)>,
}

/// Exit statement whose edge is resolved after the traversal
struct UnwindEntry {
    node: NodeIndex,
    stmt: StmtId,
    /// Snapshot of the loop-scope stack, outermost first
    enclosing_loops: Vec<StmtId>,
}

/// CFG builder; all scratch state lives here and is dropped with the builder
pub struct CfgBuilder<'a> {
    tree: &'a IrTree,
    graph: ControlFlowGraph,
    current_block: Option<BlockId>,
    last_node_in_current_block: Option<NodeIndex>,
    current_stmt_pos: usize,
    /// Position of the first statement of the node being accumulated, or
    /// `None` when no node is open
    begin_location: Option<usize>,
    /// Nodes whose edge into the next materialized node is pending
    prev_nodes: Vec<(NodeIndex, EdgeKind)>,
    current_offload: Option<StmtId>,
    in_parallel_for: bool,
    loop_frames: Vec<LoopFrame>,
    loop_begin_nodes: HashMap<StmtId, NodeIndex>,
    unwinds: Vec<UnwindEntry>,
}

/// Build a CFG for the whole tree
pub fn build_cfg(tree: &IrTree) -> Result<ControlFlowGraph> {
    CfgBuilder::run(tree, CfgRoot::Block(tree.root()))
}

impl<'a> CfgBuilder<'a> {
    fn new(tree: &'a IrTree) -> Self {
        let graph = ControlFlowGraph::new();
        let start_node = graph.start_node();
        Self {
            tree,
            graph,
            current_block: None,
            last_node_in_current_block: None,
            current_stmt_pos: 0,
            begin_location: None,
            prev_nodes: vec![(start_node, EdgeKind::Fall)],
            current_offload: None,
            in_parallel_for: false,
            loop_frames: Vec::new(),
            loop_begin_nodes: HashMap::new(),
            unwinds: Vec::new(),
        }
    }

    /// Build the CFG rooted at `root`
    pub fn run(tree: &'a IrTree, root: CfgRoot) -> Result<ControlFlowGraph> {
        let mut builder = CfgBuilder::new(tree);
        match root {
            CfgRoot::Block(block) => {
                builder.visit_block(block)?;
            }
            CfgRoot::Stmt(stmt) => builder.visit_root_stmt(stmt)?,
        }
        builder.finish()
    }

    fn invariant(&self, message: impl Into<String>) -> Error {
        Error::InvariantViolation {
            block: self.current_block,
            message: message.into(),
        }
    }

    /// Materialize the open node as `[begin_location, end)` and connect the
    /// pending predecessors to it.
    ///
    /// `next_begin` is the position of the first statement of the following
    /// node if it lives in the same block, `None` otherwise.
    fn new_node_until(&mut self, end: usize, next_begin: Option<usize>) -> Result<NodeIndex> {
        let block = self
            .current_block
            .ok_or_else(|| self.invariant("node requested outside of any block"))?;
        let begin = self.begin_location.ok_or_else(|| {
            self.invariant(format!("no open node at position {}", self.current_stmt_pos))
        })?;
        if begin > end {
            return Err(self.invariant(format!("node range [{}, {}) is inverted", begin, end)));
        }
        let node = self.graph.push_node(CfgNode::new(
            block,
            begin,
            end,
            self.in_parallel_for,
            self.last_node_in_current_block,
        ));
        for (prev, kind) in std::mem::take(&mut self.prev_nodes) {
            self.graph.add_edge(prev, node, kind);
        }
        self.begin_location = next_begin;
        self.last_node_in_current_block = Some(node);
        Ok(node)
    }

    /// Close the open node before the current statement
    fn new_node(&mut self, next_begin: Option<usize>) -> Result<NodeIndex> {
        self.new_node_until(self.current_stmt_pos, next_begin)
    }

    /// Close the open node including the current (exit) statement
    fn close_with_current(&mut self) -> Result<NodeIndex> {
        let after = self.current_stmt_pos + 1;
        self.new_node_until(after, Some(after))
    }

    /// Visit a block and return its (always materialized) exit node
    fn visit_block(&mut self, block: BlockId) -> Result<NodeIndex> {
        if self.begin_location.is_some() {
            return Err(self.invariant(format!(
                "entering block {:?} while a node is still open",
                block
            )));
        }
        if !self.prev_nodes.is_empty() && self.graph.size() != 1 {
            return Err(self.invariant(format!(
                "entering block {:?} with {} dangling predecessors",
                block,
                self.prev_nodes.len()
            )));
        }
        let saved_block = self.current_block;
        let saved_last_node = self.last_node_in_current_block;
        let saved_pos = self.current_stmt_pos;
        self.current_block = Some(block);
        self.last_node_in_current_block = None;
        self.begin_location = Some(0);

        let tree = self.tree;
        let statements = &tree.block(block).statements;
        for (pos, &stmt) in statements.iter().enumerate() {
            self.current_stmt_pos = pos;
            self.visit_stmt(stmt)?;
        }
        self.current_stmt_pos = statements.len();
        // Each block has a deterministic last node.
        let last = self.new_node(None)?;
        self.graph.set_final_node(last);

        self.current_block = saved_block;
        self.last_node_in_current_block = saved_last_node;
        self.current_stmt_pos = saved_pos;
        Ok(last)
    }

    fn visit_root_stmt(&mut self, stmt: StmtId) -> Result<()> {
        let (block, pos) = self.tree.position(stmt)?;
        self.current_block = Some(block);
        self.current_stmt_pos = pos;
        self.begin_location = Some(pos);
        self.visit_stmt(stmt)?;
        self.current_stmt_pos = pos + 1;
        let last = self.new_node(None)?;
        self.graph.set_final_node(last);
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: StmtId) -> Result<()> {
        let tree = self.tree;
        match tree.kind(stmt) {
            StmtKind::Alloca { .. }
            | StmtKind::Const { .. }
            | StmtKind::LocalLoad { .. }
            | StmtKind::LocalStore { .. }
            | StmtKind::Op { .. } => {}
            StmtKind::Continue { .. } => {
                // Statements after the continue are unreachable through this path.
                let node = self.close_with_current()?;
                self.record_unwind(node, stmt);
            }
            StmtKind::Break {
                scope,
                from_function_return,
            } => {
                let node = self.close_with_current()?;
                if *from_function_return {
                    self.record_unwind(node, stmt);
                } else {
                    let target = scope.or_else(|| self.loop_frames.last().map(|f| f.scope));
                    let frame = target.and_then(|target| {
                        self.loop_frames.iter().rposition(|f| f.scope == target)
                    });
                    match frame {
                        Some(index) => self.loop_frames[index].exits.push((node, EdgeKind::Break)),
                        None => self.record_unwind(node, stmt),
                    }
                }
            }
            StmtKind::WhileControl { .. } => {
                let node = self.close_with_current()?;
                if let Some(frame) = self.loop_frames.last_mut() {
                    frame.exits.push((node, EdgeKind::Break));
                }
                self.prev_nodes.push((node, EdgeKind::Fall));
            }
            StmtKind::If {
                true_block,
                false_block,
                ..
            } => self.visit_if(*true_block, *false_block)?,
            StmtKind::Loop { kind, body } => {
                let before_loop = self.new_node(None)?;
                let saved = self.in_parallel_for;
                if kind.is_for() && self.current_offload.is_none() {
                    self.in_parallel_for = true;
                }
                self.visit_loop(stmt, *body, before_loop, kind.is_while_true())?;
                self.in_parallel_for = saved;
            }
            StmtKind::Offloaded { task_type, blocks } => {
                self.visit_offloaded(stmt, *task_type, blocks)?
            }
        }
        Ok(())
    }

    fn record_unwind(&mut self, node: NodeIndex, stmt: StmtId) {
        self.unwinds.push(UnwindEntry {
            node,
            stmt,
            enclosing_loops: self.loop_frames.iter().map(|f| f.scope).collect(),
        });
    }

    fn visit_if(&mut self, true_block: Option<BlockId>, false_block: Option<BlockId>) -> Result<()> {
        let before_if = self.new_node(None)?;
        let if_pos = self.current_stmt_pos;

        let mut true_end = None;
        if let Some(block) = true_block {
            let begin_index = self.graph.size();
            true_end = Some(self.visit_block(block)?);
            self.graph
                .add_edge(before_if, NodeIndex::new(begin_index), EdgeKind::True);
        }
        let mut false_end = None;
        if let Some(block) = false_block {
            let begin_index = self.graph.size();
            false_end = Some(self.visit_block(block)?);
            self.graph
                .add_edge(before_if, NodeIndex::new(begin_index), EdgeKind::False);
        }

        if !self.prev_nodes.is_empty() {
            return Err(self.invariant("pending predecessors left after visiting if branches"));
        }
        if let Some(end) = true_end {
            self.prev_nodes.push((end, EdgeKind::Fall));
        }
        if let Some(end) = false_end {
            self.prev_nodes.push((end, EdgeKind::Fall));
        }
        match (true_end, false_end) {
            (Some(_), None) => self.prev_nodes.push((before_if, EdgeKind::False)),
            (None, Some(_)) => self.prev_nodes.push((before_if, EdgeKind::True)),
            (None, None) => self.prev_nodes.push((before_if, EdgeKind::Fall)),
            (Some(_), Some(_)) => {}
        }
        // Container statements don't belong to any CFGNodes.
        self.begin_location = Some(if_pos + 1);
        Ok(())
    }

    fn visit_loop(
        &mut self,
        loop_stmt: StmtId,
        body: BlockId,
        before_loop: NodeIndex,
        is_while_true: bool,
    ) -> Result<()> {
        let loop_pos = self.current_stmt_pos;
        self.loop_frames.push(LoopFrame {
            scope: loop_stmt,
            exits: Vec::new(),
        });

        let begin_index = self.graph.size();
        let loop_end = self.visit_block(body)?;
        let loop_begin = NodeIndex::new(begin_index);
        self.graph
            .add_edge(before_loop, loop_begin, EdgeKind::LoopEntry);
        self.graph.add_edge(loop_end, loop_begin, EdgeKind::BackEdge);
        if !is_while_true {
            self.prev_nodes.push((before_loop, EdgeKind::LoopExit));
            self.prev_nodes.push((loop_end, EdgeKind::LoopExit));
        }

        let frame = self
            .loop_frames
            .pop()
            .ok_or_else(|| Error::internal("loop frame stack underflow"))?;
        self.prev_nodes.extend(frame.exits);
        self.loop_begin_nodes.insert(loop_stmt, loop_begin);

        self.begin_location = Some(loop_pos + 1);
        Ok(())
    }

    /// Phases are chained in order:
    ///
    /// ```text
    /// node_before_offload -> tls_prologue -> mesh_prologue -> bls_prologue
    ///     -> body -> bls_epilogue -> tls_epilogue -> (next node)
    /// ```
    ///
    /// A loop-shaped body is visited like a loop scoped to the task itself.
    fn visit_offloaded(
        &mut self,
        offload: StmtId,
        task_type: OffloadedTaskType,
        blocks: &OffloadBlocks,
    ) -> Result<()> {
        let offload_pos = self.current_stmt_pos;
        let saved_offload = self.current_offload.replace(offload);
        let phases = blocks.phases();

        if phases.is_empty() {
            let node = self.new_node(Some(offload_pos + 1))?;
            self.prev_nodes.push((node, EdgeKind::Fall));
        }
        for (phase, block) in phases {
            let before_phase = self.new_node(None)?;
            if phase == OffloadPhase::Body && task_type.is_loop_shaped() {
                let saved = self.in_parallel_for;
                self.in_parallel_for = true;
                self.visit_loop(offload, block, before_phase, false)?;
                self.in_parallel_for = saved;
            } else {
                let begin_index = self.graph.size();
                let end = self.visit_block(block)?;
                self.graph
                    .add_edge(before_phase, NodeIndex::new(begin_index), EdgeKind::Phase);
                self.prev_nodes.push((end, EdgeKind::Phase));
            }
            // The next phase starts with an empty node at the task position.
            self.begin_location = Some(offload_pos);
        }

        // Container statements don't belong to any CFGNodes.
        self.begin_location = Some(offload_pos + 1);
        self.current_offload = saved_offload;
        Ok(())
    }

    fn finish(mut self) -> Result<ControlFlowGraph> {
        let final_node = self.graph.final_node();
        if !self.graph.node(final_node).is_empty() {
            // Make the final node empty (by adding an empty final node).
            let empty = self.graph.push_node(CfgNode::empty());
            self.graph.add_edge(final_node, empty, EdgeKind::Fall);
            self.graph.set_final_node(empty);
        }

        for entry in std::mem::take(&mut self.unwinds) {
            let (target, kind) = self.resolve_unwind(&entry)?;
            self.graph.add_edge(entry.node, target, kind);
        }
        Ok(self.graph)
    }

    /// Pick the target of a deferred exit:
    /// 1. explicit scope, else `levels_up` counted on the recorded loop stack;
    /// 2. function-return unwinds go to the final node;
    /// 3. plain continues go to the loop-begin node of their scope;
    /// 4. anything unresolvable goes to the final node with a warning.
    fn resolve_unwind(&mut self, entry: &UnwindEntry) -> Result<(NodeIndex, EdgeKind)> {
        let final_node = self.graph.final_node();
        let (kind, scope, levels_up, from_function_return) = self
            .tree
            .kind(entry.stmt)
            .as_exit()
            .ok_or_else(|| Error::internal(format!("{} is not an exit statement", entry.stmt)))?;

        let depth = entry.enclosing_loops.len();
        let target_scope = match scope {
            Some(scope) => Some(scope),
            None => {
                let levels = levels_up.max(1) as usize;
                if levels <= depth {
                    Some(entry.enclosing_loops[depth - levels])
                } else {
                    log::warn!(
                        "[CFG] {} has levels_up={} but only {} enclosing loops; targeting final node",
                        entry.stmt,
                        levels_up,
                        depth
                    );
                    self.graph.push_warning(CfgWarning::LevelsUpOutOfRange {
                        stmt: entry.stmt,
                        levels_up,
                        depth,
                    });
                    None
                }
            }
        };

        let Some(target_scope) = target_scope else {
            return Ok((final_node, EdgeKind::Unwind));
        };

        if from_function_return {
            log::debug!(
                "[CFG] function return unwind {} (scope {}) to final node {}",
                entry.stmt,
                target_scope,
                final_node.index()
            );
            self.graph.push_warning(CfgWarning::ConservativeUnwind {
                stmt: entry.stmt,
                scope: target_scope,
            });
            return Ok((final_node, EdgeKind::Unwind));
        }

        if kind == ExitKind::Continue {
            if let Some(&begin) = self.loop_begin_nodes.get(&target_scope) {
                log::debug!(
                    "[CFG] continue {} to loop begin node {} of {}",
                    entry.stmt,
                    begin.index(),
                    target_scope
                );
                return Ok((begin, EdgeKind::Continue));
            }
        }

        log::warn!(
            "[CFG] {} targets {} but no node was recorded for it; targeting final node",
            entry.stmt,
            target_scope
        );
        self.graph.push_warning(CfgWarning::ScopeNotBuilt {
            stmt: entry.stmt,
            scope: target_scope,
        });
        Ok((final_node, EdgeKind::Unwind))
    }
}
