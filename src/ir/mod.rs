//! Kernel IR module
//!
//! Statements and blocks live in one arena owned by [`IrTree`]. Ownership is
//! strictly top-down (a block lists its statements, a container statement names
//! its sub-blocks); the `parent` links pointing upward are plain handles used for
//! traversal only. Handles stay valid across insertion and erasure, so passes can
//! keep `StmtId`s around while they rewrite the tree.

pub mod builder;
pub mod display;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use builder::IrBuilder;

/// Handle of a statement in an [`IrTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StmtId(pub u32);

/// Handle of a block in an [`IrTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Primitive element types used by local allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    U1,
    I32,
    I64,
    F32,
}

/// Constant operand value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
}

/// Loop statement flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    RangeFor,
    StructFor,
    MeshFor,
    /// `while true`; only left through `Break` or `WhileControl`
    While,
}

impl LoopKind {
    /// Whether the loop has no normal exit path
    pub fn is_while_true(self) -> bool {
        matches!(self, LoopKind::While)
    }

    /// Parallel-for flavours (everything except `While`)
    pub fn is_for(self) -> bool {
        !self.is_while_true()
    }
}

/// Offloaded task type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadedTaskType {
    Serial,
    RangeFor,
    StructFor,
    MeshFor,
    Listgen,
    Gc,
    GcRc,
}

impl OffloadedTaskType {
    /// Whether the task body is executed once per loop index
    pub fn is_loop_shaped(self) -> bool {
        matches!(
            self,
            OffloadedTaskType::RangeFor | OffloadedTaskType::StructFor | OffloadedTaskType::MeshFor
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            OffloadedTaskType::Serial => "serial",
            OffloadedTaskType::RangeFor => "range_for",
            OffloadedTaskType::StructFor => "struct_for",
            OffloadedTaskType::MeshFor => "mesh_for",
            OffloadedTaskType::Listgen => "listgen",
            OffloadedTaskType::Gc => "gc",
            OffloadedTaskType::GcRc => "gc_rc",
        }
    }
}

/// Phases of an offloaded task, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadPhase {
    TlsPrologue,
    MeshPrologue,
    BlsPrologue,
    Body,
    BlsEpilogue,
    TlsEpilogue,
}

impl OffloadPhase {
    pub const ALL: [OffloadPhase; 6] = [
        OffloadPhase::TlsPrologue,
        OffloadPhase::MeshPrologue,
        OffloadPhase::BlsPrologue,
        OffloadPhase::Body,
        OffloadPhase::BlsEpilogue,
        OffloadPhase::TlsEpilogue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OffloadPhase::TlsPrologue => "tls_prologue",
            OffloadPhase::MeshPrologue => "mesh_prologue",
            OffloadPhase::BlsPrologue => "bls_prologue",
            OffloadPhase::Body => "body",
            OffloadPhase::BlsEpilogue => "bls_epilogue",
            OffloadPhase::TlsEpilogue => "tls_epilogue",
        }
    }
}

/// Sub-blocks of an offloaded task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadBlocks {
    pub tls_prologue: Option<BlockId>,
    pub mesh_prologue: Option<BlockId>,
    pub bls_prologue: Option<BlockId>,
    pub body: Option<BlockId>,
    pub bls_epilogue: Option<BlockId>,
    pub tls_epilogue: Option<BlockId>,
}

impl OffloadBlocks {
    pub fn get(&self, phase: OffloadPhase) -> Option<BlockId> {
        match phase {
            OffloadPhase::TlsPrologue => self.tls_prologue,
            OffloadPhase::MeshPrologue => self.mesh_prologue,
            OffloadPhase::BlsPrologue => self.bls_prologue,
            OffloadPhase::Body => self.body,
            OffloadPhase::BlsEpilogue => self.bls_epilogue,
            OffloadPhase::TlsEpilogue => self.tls_epilogue,
        }
    }

    pub fn set(&mut self, phase: OffloadPhase, block: Option<BlockId>) {
        let slot = match phase {
            OffloadPhase::TlsPrologue => &mut self.tls_prologue,
            OffloadPhase::MeshPrologue => &mut self.mesh_prologue,
            OffloadPhase::BlsPrologue => &mut self.bls_prologue,
            OffloadPhase::Body => &mut self.body,
            OffloadPhase::BlsEpilogue => &mut self.bls_epilogue,
            OffloadPhase::TlsEpilogue => &mut self.tls_epilogue,
        };
        *slot = block;
    }

    /// Present phases in execution order
    pub fn phases(&self) -> Vec<(OffloadPhase, BlockId)> {
        OffloadPhase::ALL
            .iter()
            .filter_map(|&phase| self.get(phase).map(|block| (phase, block)))
            .collect()
    }
}

/// Kind of a non-local exit statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    Continue,
    Break,
}

/// Statement payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StmtKind {
    Alloca {
        ty: DataType,
    },
    Const {
        value: ConstValue,
    },
    LocalLoad {
        src: StmtId,
    },
    LocalStore {
        dest: StmtId,
        value: StmtId,
    },
    /// Any statement outside the control-flow core
    Op {
        name: String,
        #[serde(default)]
        operands: Vec<StmtId>,
    },
    Continue {
        #[serde(default)]
        scope: Option<StmtId>,
        #[serde(default = "default_levels_up")]
        levels_up: u32,
        #[serde(default)]
        from_function_return: bool,
    },
    Break {
        #[serde(default)]
        scope: Option<StmtId>,
        #[serde(default)]
        from_function_return: bool,
    },
    /// Conditional exit of the enclosing `While`
    WhileControl {
        #[serde(default)]
        mask: Option<StmtId>,
        cond: StmtId,
    },
    If {
        cond: StmtId,
        #[serde(default)]
        true_block: Option<BlockId>,
        #[serde(default)]
        false_block: Option<BlockId>,
    },
    Loop {
        kind: LoopKind,
        body: BlockId,
    },
    Offloaded {
        task_type: OffloadedTaskType,
        #[serde(default)]
        blocks: OffloadBlocks,
    },
}

fn default_levels_up() -> u32 {
    1
}

impl StmtKind {
    /// Container statements own sub-blocks and never sit inside a CFG node
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            StmtKind::If { .. } | StmtKind::Loop { .. } | StmtKind::Offloaded { .. }
        )
    }

    pub fn is_offloaded(&self) -> bool {
        matches!(self, StmtKind::Offloaded { .. })
    }

    /// Kind, scope and `levels_up` of an exit statement
    pub fn as_exit(&self) -> Option<(ExitKind, Option<StmtId>, u32, bool)> {
        match *self {
            StmtKind::Continue {
                scope,
                levels_up,
                from_function_return,
            } => Some((ExitKind::Continue, scope, levels_up, from_function_return)),
            StmtKind::Break {
                scope,
                from_function_return,
            } => Some((ExitKind::Break, scope, 1, from_function_return)),
            _ => None,
        }
    }

    /// Build a structured exit of the given kind scoped to `scope`
    pub fn exit(kind: ExitKind, scope: StmtId) -> Self {
        match kind {
            ExitKind::Continue => StmtKind::Continue {
                scope: Some(scope),
                levels_up: 1,
                from_function_return: false,
            },
            ExitKind::Break => StmtKind::Break {
                scope: Some(scope),
                from_function_return: false,
            },
        }
    }

    /// Sub-blocks in visiting order
    pub fn sub_blocks(&self) -> Vec<BlockId> {
        match self {
            StmtKind::If {
                true_block,
                false_block,
                ..
            } => true_block.iter().chain(false_block.iter()).copied().collect(),
            StmtKind::Loop { body, .. } => vec![*body],
            StmtKind::Offloaded { blocks, .. } => {
                blocks.phases().into_iter().map(|(_, block)| block).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Short mnemonic used by the IR printer and DOT labels
    pub fn name(&self) -> &str {
        match self {
            StmtKind::Alloca { .. } => "alloca",
            StmtKind::Const { .. } => "const",
            StmtKind::LocalLoad { .. } => "local load",
            StmtKind::LocalStore { .. } => "local store",
            StmtKind::Op { name, .. } => name,
            StmtKind::Continue { .. } => "continue",
            StmtKind::Break { .. } => "break",
            StmtKind::WhileControl { .. } => "while control",
            StmtKind::If { .. } => "if",
            StmtKind::Loop { kind, .. } => match kind {
                LoopKind::RangeFor => "range_for",
                LoopKind::StructFor => "struct_for",
                LoopKind::MeshFor => "mesh_for",
                LoopKind::While => "while",
            },
            StmtKind::Offloaded { .. } => "offloaded",
        }
    }
}

/// A statement together with its enclosing-block back reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    /// Enclosing block; `None` once the statement is erased
    #[serde(default)]
    pub parent: Option<BlockId>,
}

/// Ordered sequence of statements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<StmtId>,
    /// Container statement owning this block; `None` for the root
    #[serde(default)]
    pub parent_stmt: Option<StmtId>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// One loop or offloaded-task ancestor of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnclosingScope {
    pub stmt: StmtId,
    /// Whether the statement is inside the iterated part of this scope (a loop
    /// body, or the body of a loop-shaped offloaded task)
    pub is_loop: bool,
}

/// Arena-backed IR tree
///
/// Erased statements stay in the arena with `parent == None`; handles are
/// never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrTree {
    stmts: Vec<Stmt>,
    blocks: Vec<Block>,
    root: BlockId,
}

impl Default for IrTree {
    fn default() -> Self {
        Self::new()
    }
}

impl IrTree {
    /// Create a tree holding an empty root block
    pub fn new() -> Self {
        Self {
            stmts: Vec::new(),
            blocks: vec![Block::default()],
            root: BlockId(0),
        }
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn kind(&self, id: StmtId) -> &StmtKind {
        &self.stmts[id.index()].kind
    }

    pub fn kind_mut(&mut self, id: StmtId) -> &mut StmtKind {
        &mut self.stmts[id.index()].kind
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Statement at `pos` of `block`
    pub fn stmt_at(&self, block: BlockId, pos: usize) -> Option<StmtId> {
        self.block(block).statements.get(pos).copied()
    }

    /// Allocate a detached block
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Append a statement to `block`
    pub fn push(&mut self, block: BlockId, kind: StmtKind) -> StmtId {
        let pos = self.block(block).len();
        self.insert_at(block, pos, kind)
    }

    /// Insert a statement at `pos` of `block`, shifting later statements
    pub fn insert_at(&mut self, block: BlockId, pos: usize, kind: StmtKind) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        let sub_blocks = kind.sub_blocks();
        self.stmts.push(Stmt {
            kind,
            parent: Some(block),
        });
        for sub in sub_blocks {
            self.blocks[sub.index()].parent_stmt = Some(id);
        }
        self.blocks[block.index()].statements.insert(pos, id);
        id
    }

    /// Position of a statement inside its enclosing block
    pub fn position(&self, stmt: StmtId) -> Result<(BlockId, usize)> {
        let block = self.stmt(stmt).parent.ok_or(Error::Detached { stmt })?;
        let pos = self
            .block(block)
            .statements
            .iter()
            .position(|&s| s == stmt)
            .ok_or_else(|| {
                Error::malformed(format!(
                    "{} names block {:?} as parent but is not listed in it",
                    stmt, block
                ))
            })?;
        Ok((block, pos))
    }

    pub fn insert_before(&mut self, anchor: StmtId, kind: StmtKind) -> Result<StmtId> {
        let (block, pos) = self.position(anchor)?;
        Ok(self.insert_at(block, pos, kind))
    }

    pub fn insert_after(&mut self, anchor: StmtId, kind: StmtKind) -> Result<StmtId> {
        let (block, pos) = self.position(anchor)?;
        Ok(self.insert_at(block, pos + 1, kind))
    }

    /// Replace a statement by a sequence of new ones, returning their handles
    pub fn replace_with(&mut self, stmt: StmtId, kinds: Vec<StmtKind>) -> Result<Vec<StmtId>> {
        let (block, pos) = self.position(stmt)?;
        self.blocks[block.index()].statements.remove(pos);
        self.stmts[stmt.index()].parent = None;
        Ok(kinds
            .into_iter()
            .enumerate()
            .map(|(offset, kind)| self.insert_at(block, pos + offset, kind))
            .collect())
    }

    /// Detach a statement from its block
    pub fn erase(&mut self, stmt: StmtId) -> Result<()> {
        let (block, pos) = self.position(stmt)?;
        self.blocks[block.index()].statements.remove(pos);
        self.stmts[stmt.index()].parent = None;
        Ok(())
    }

    /// Set or replace a phase block of an offloaded task
    pub fn set_offload_phase(
        &mut self,
        offload: StmtId,
        phase: OffloadPhase,
        block: BlockId,
    ) -> Result<()> {
        match &mut self.stmts[offload.index()].kind {
            StmtKind::Offloaded { blocks, .. } => blocks.set(phase, Some(block)),
            other => {
                return Err(Error::malformed(format!(
                    "{} is a {}, not an offloaded task",
                    offload,
                    other.name()
                )))
            }
        }
        self.blocks[block.index()].parent_stmt = Some(offload);
        Ok(())
    }

    /// Loop and offloaded-task ancestors of `stmt`, innermost first.
    ///
    /// The walk stops at the first offloaded task, which is the outermost
    /// structured scope.
    pub fn enclosing_scopes(&self, stmt: StmtId) -> Vec<EnclosingScope> {
        let mut scopes = Vec::new();
        let mut block = self.stmt(stmt).parent;
        while let Some(current) = block {
            let Some(owner) = self.block(current).parent_stmt else {
                break;
            };
            match self.kind(owner) {
                StmtKind::Loop { .. } => scopes.push(EnclosingScope {
                    stmt: owner,
                    is_loop: true,
                }),
                StmtKind::Offloaded { task_type, blocks } => {
                    scopes.push(EnclosingScope {
                        stmt: owner,
                        is_loop: task_type.is_loop_shaped() && blocks.body == Some(current),
                    });
                    break;
                }
                _ => {}
            }
            block = self.stmt(owner).parent;
        }
        scopes
    }

    /// Whether `ancestor` (transitively) contains `stmt`
    pub fn is_ancestor(&self, ancestor: StmtId, stmt: StmtId) -> bool {
        let mut block = self.stmt(stmt).parent;
        while let Some(current) = block {
            match self.block(current).parent_stmt {
                Some(owner) if owner == ancestor => return true,
                Some(owner) => block = self.stmt(owner).parent,
                None => return false,
            }
        }
        false
    }

    /// Statements below `block` in pre-order (containers before their contents)
    pub fn preorder(&self, block: BlockId) -> Vec<StmtId> {
        let mut out = Vec::new();
        self.collect_preorder(block, &mut out);
        out
    }

    fn collect_preorder(&self, block: BlockId, out: &mut Vec<StmtId>) {
        for &stmt in &self.block(block).statements {
            out.push(stmt);
            for sub in self.kind(stmt).sub_blocks() {
                self.collect_preorder(sub, out);
            }
        }
    }

    /// Statements below `root` (inclusive) matching `pred`, in pre-order
    pub fn gather(&self, root: StmtId, pred: impl Fn(StmtId, &StmtKind) -> bool) -> Vec<StmtId> {
        let mut all = vec![root];
        for sub in self.kind(root).sub_blocks() {
            self.collect_preorder(sub, &mut all);
        }
        all.into_iter()
            .filter(|&stmt| pred(stmt, self.kind(stmt)))
            .collect()
    }

    /// Check handle ranges and parent links of a deserialized tree.
    ///
    /// Besides ranges, the parent links must describe a tree: the root has no
    /// owner, every owned block is a sub-block of its owner, every statement is
    /// listed at most once, and walking upward from any attached statement
    /// reaches a block without owner.
    pub fn validate(&self) -> Result<()> {
        let stmt_ok = |id: StmtId| id.index() < self.stmts.len();
        let block_ok = |id: BlockId| id.index() < self.blocks.len();
        if !block_ok(self.root) {
            return Err(Error::malformed("root block out of range"));
        }
        if let Some(owner) = self.block(self.root).parent_stmt {
            return Err(Error::malformed(format!(
                "root block {:?} names {} as its owner",
                self.root, owner
            )));
        }
        let mut listed = vec![false; self.stmts.len()];
        for (index, block) in self.blocks.iter().enumerate() {
            let block_id = BlockId(index as u32);
            for &stmt in &block.statements {
                if !stmt_ok(stmt) {
                    return Err(Error::malformed(format!(
                        "block {:?} lists unknown statement {}",
                        block_id, stmt
                    )));
                }
                if std::mem::replace(&mut listed[stmt.index()], true) {
                    return Err(Error::malformed(format!("{} is listed more than once", stmt)));
                }
                if self.stmt(stmt).parent != Some(block_id) {
                    return Err(Error::malformed(format!(
                        "{} is listed in block {:?} but its parent is {:?}",
                        stmt,
                        block_id,
                        self.stmt(stmt).parent
                    )));
                }
            }
            if let Some(owner) = block.parent_stmt {
                if !stmt_ok(owner) {
                    return Err(Error::malformed(format!(
                        "block {:?} names unknown owner {}",
                        block_id, owner
                    )));
                }
                if !self.kind(owner).sub_blocks().contains(&block_id) {
                    return Err(Error::malformed(format!(
                        "block {:?} names {} as owner but {} does not own it",
                        block_id, owner, owner
                    )));
                }
            }
        }
        for (index, stmt) in self.stmts.iter().enumerate() {
            let id = StmtId(index as u32);
            if let Some(parent) = stmt.parent {
                if !block_ok(parent) || !listed[index] {
                    return Err(Error::malformed(format!(
                        "{} names block {:?} as parent but is not listed in it",
                        id, parent
                    )));
                }
            }
            let operands: Vec<StmtId> = match &stmt.kind {
                StmtKind::LocalLoad { src } => vec![*src],
                StmtKind::LocalStore { dest, value } => vec![*dest, *value],
                StmtKind::Op { operands, .. } => operands.clone(),
                StmtKind::Continue { scope, .. } | StmtKind::Break { scope, .. } => {
                    scope.iter().copied().collect()
                }
                StmtKind::WhileControl { mask, cond } => {
                    mask.iter().copied().chain(Some(*cond)).collect()
                }
                StmtKind::If { cond, .. } => vec![*cond],
                _ => Vec::new(),
            };
            if let Some(bad) = operands.into_iter().find(|&op| !stmt_ok(op)) {
                return Err(Error::malformed(format!(
                    "{} refers to unknown statement {}",
                    id, bad
                )));
            }
            for sub in stmt.kind.sub_blocks() {
                if !block_ok(sub) {
                    return Err(Error::malformed(format!(
                        "{} owns unknown block {:?}",
                        id, sub
                    )));
                }
                if stmt.parent.is_some() && self.block(sub).parent_stmt != Some(id) {
                    return Err(Error::malformed(format!(
                        "block {:?} is owned by {} but names {:?} as parent",
                        sub,
                        id,
                        self.block(sub).parent_stmt
                    )));
                }
            }
        }
        // Every upward step enters a different block unless the links cycle.
        for index in 0..self.stmts.len() {
            let id = StmtId(index as u32);
            let mut block = self.stmt(id).parent;
            let mut steps = 0;
            while let Some(current) = block {
                if steps > self.blocks.len() {
                    return Err(Error::malformed(format!(
                        "parent links above {} form a cycle",
                        id
                    )));
                }
                steps += 1;
                block = self
                    .block(current)
                    .parent_stmt
                    .and_then(|owner| self.stmt(owner).parent);
            }
        }
        Ok(())
    }
}
