//! IrBuilder - helper for constructing kernel IR trees.

use super::{
    BlockId, ConstValue, DataType, IrTree, LoopKind, OffloadBlocks, OffloadPhase,
    OffloadedTaskType, StmtId, StmtKind,
};
use crate::error::Result;

pub struct IrBuilder {
    tree: IrTree,
    insert_points: Vec<BlockId>,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::from_tree(IrTree::new())
    }

    /// Continue building an existing tree, appending to its root block
    pub fn from_tree(tree: IrTree) -> Self {
        let root = tree.root();
        Self {
            tree,
            insert_points: vec![root],
        }
    }

    pub fn tree(&self) -> &IrTree {
        &self.tree
    }

    pub fn current_block(&self) -> BlockId {
        // The root insertion point is never popped.
        self.insert_points[self.insert_points.len() - 1]
    }

    pub fn push(&mut self, kind: StmtKind) -> StmtId {
        let block = self.current_block();
        self.tree.push(block, kind)
    }

    /// Run `f` with the insertion point moved to `block`
    pub fn with_block<R>(&mut self, block: BlockId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.insert_points.push(block);
        let result = f(self);
        self.insert_points.pop();
        result
    }

    pub fn alloca(&mut self, ty: DataType) -> StmtId {
        self.push(StmtKind::Alloca { ty })
    }

    pub fn const_bool(&mut self, value: bool) -> StmtId {
        self.push(StmtKind::Const {
            value: ConstValue::Bool(value),
        })
    }

    pub fn const_int(&mut self, value: i64) -> StmtId {
        self.push(StmtKind::Const {
            value: ConstValue::Int(value),
        })
    }

    pub fn load(&mut self, src: StmtId) -> StmtId {
        self.push(StmtKind::LocalLoad { src })
    }

    pub fn store(&mut self, dest: StmtId, value: StmtId) -> StmtId {
        self.push(StmtKind::LocalStore { dest, value })
    }

    pub fn op(&mut self, name: &str, operands: Vec<StmtId>) -> StmtId {
        self.push(StmtKind::Op {
            name: name.to_string(),
            operands,
        })
    }

    /// Plain continue of `scope`
    pub fn cont(&mut self, scope: StmtId) -> StmtId {
        self.push(StmtKind::Continue {
            scope: Some(scope),
            levels_up: 1,
            from_function_return: false,
        })
    }

    /// Continue without an explicit scope, resolved by counting loops outward
    pub fn cont_levels(&mut self, levels_up: u32, from_function_return: bool) -> StmtId {
        self.push(StmtKind::Continue {
            scope: None,
            levels_up,
            from_function_return,
        })
    }

    /// Unwind produced by inlining an early return, scoped to `scope`
    pub fn func_return_cont(&mut self, scope: StmtId, levels_up: u32) -> StmtId {
        self.push(StmtKind::Continue {
            scope: Some(scope),
            levels_up,
            from_function_return: true,
        })
    }

    /// Break of `scope`, or of the innermost loop when `None`
    pub fn brk(&mut self, scope: Option<StmtId>) -> StmtId {
        self.push(StmtKind::Break {
            scope,
            from_function_return: false,
        })
    }

    pub fn func_return_brk(&mut self, scope: StmtId) -> StmtId {
        self.push(StmtKind::Break {
            scope: Some(scope),
            from_function_return: true,
        })
    }

    pub fn while_control(&mut self, cond: StmtId) -> StmtId {
        self.push(StmtKind::WhileControl { mask: None, cond })
    }

    /// Append a loop; `f` fills its body and receives the loop handle
    pub fn loop_stmt(&mut self, kind: LoopKind, f: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        let body = self.tree.new_block();
        let stmt = self.push(StmtKind::Loop { kind, body });
        self.with_block(body, |b| f(b, stmt));
        stmt
    }

    pub fn range_for(&mut self, f: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        self.loop_stmt(LoopKind::RangeFor, f)
    }

    pub fn struct_for(&mut self, f: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        self.loop_stmt(LoopKind::StructFor, f)
    }

    pub fn mesh_for(&mut self, f: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        self.loop_stmt(LoopKind::MeshFor, f)
    }

    pub fn while_loop(&mut self, f: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        self.loop_stmt(LoopKind::While, f)
    }

    /// `if cond { ... }` without an else branch
    pub fn if_then(&mut self, cond: StmtId, then: impl FnOnce(&mut Self)) -> StmtId {
        let true_block = self.tree.new_block();
        let stmt = self.push(StmtKind::If {
            cond,
            true_block: Some(true_block),
            false_block: None,
        });
        self.with_block(true_block, then);
        stmt
    }

    pub fn if_else(
        &mut self,
        cond: StmtId,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> StmtId {
        let true_block = self.tree.new_block();
        let false_block = self.tree.new_block();
        let stmt = self.push(StmtKind::If {
            cond,
            true_block: Some(true_block),
            false_block: Some(false_block),
        });
        self.with_block(true_block, then);
        self.with_block(false_block, otherwise);
        stmt
    }

    /// Append an offloaded task with a body; `f` fills the body
    pub fn offloaded(
        &mut self,
        task_type: OffloadedTaskType,
        f: impl FnOnce(&mut Self, StmtId),
    ) -> StmtId {
        let body = self.tree.new_block();
        let stmt = self.push(StmtKind::Offloaded {
            task_type,
            blocks: OffloadBlocks {
                body: Some(body),
                ..OffloadBlocks::default()
            },
        });
        self.with_block(body, |b| f(b, stmt));
        stmt
    }

    /// Attach a (new) phase block to an offloaded task and fill it
    pub fn offload_phase(
        &mut self,
        offload: StmtId,
        phase: OffloadPhase,
        f: impl FnOnce(&mut Self),
    ) -> Result<BlockId> {
        let block = self.tree.new_block();
        self.tree.set_offload_phase(offload, phase, block)?;
        self.with_block(block, f);
        Ok(block)
    }

    pub fn finish(self) -> IrTree {
        self.tree
    }
}
