//! Structured continue/break lowering
//!
//! Structured backends only accept exits of the innermost enclosing loop. An
//! exit whose target lies further out (typically an early `return` inlined
//! inside nested loops) is rewritten into a flag protocol:
//!
//! ```text
//! $f = alloca u1                    // first statements of the block that
//! $z = const false                  // holds the inner loop, so the flag is
//! store [$f <- $z]                  // reset before every run of the loop
//! while true {
//!   $g = local load [$f]            // continues only: leave the inner loop on
//!   if $g { break scope=inner }     // the iteration after the flag was set
//!   ...
//!   $t = const true
//!   store [$f <- $t]
//!   continue scope=inner            // was: continue scope=outer
//! }
//! $l = local load [$f]
//! if $l { continue scope=outer }
//! ```
//!
//! The exit emitted after the loop may still be non-local; the pass repeats
//! until every exit targets its innermost loop, moving one loop outward per
//! round.

use crate::config::CompileConfig;
use crate::error::{Error, Result};
use crate::ir::{ConstValue, DataType, ExitKind, IrTree, StmtId, StmtKind};
use std::collections::BTreeMap;

/// One exit statement whose target is not its innermost enclosing loop
#[derive(Debug, Clone, Copy)]
struct IllegalExit {
    stmt: StmtId,
    kind: ExitKind,
    inner: StmtId,
    target: StmtId,
}

/// Exits sharing one flag: same inner loop, same kind, same target
type GroupKey = (StmtId, ExitKind, StmtId);

/// Lower every non-local exit of the tree. Returns whether the tree changed.
pub fn structure_exits(tree: &mut IrTree, config: &CompileConfig) -> Result<bool> {
    let root = tree.root();
    run(tree, config, |tree| tree.preorder(root))
}

/// Lower the non-local exits below one statement (usually an offloaded task)
pub fn structure_exits_in(tree: &mut IrTree, root: StmtId, config: &CompileConfig) -> Result<bool> {
    if tree.stmt(root).parent.is_none() {
        return Err(Error::Detached { stmt: root });
    }
    run(tree, config, |tree| tree.gather(root, |_, _| true))
}

fn run(
    tree: &mut IrTree,
    config: &CompileConfig,
    scan: impl Fn(&IrTree) -> Vec<StmtId>,
) -> Result<bool> {
    let mut modified = false;
    // Every round moves each group one loop outward.
    let max_rounds = tree.stmt_count() + 1;
    for round in 0.. {
        let illegal = collect_illegal_exits(tree, &scan(tree))?;
        if illegal.is_empty() {
            break;
        }
        if round >= max_rounds {
            return Err(Error::internal(format!(
                "exit lowering did not converge after {} rounds ({} exits left)",
                round,
                illegal.len()
            )));
        }

        let mut groups: BTreeMap<GroupKey, Vec<StmtId>> = BTreeMap::new();
        for exit in &illegal {
            groups
                .entry((exit.inner, exit.kind, exit.target))
                .or_default()
                .push(exit.stmt);
        }

        // Deepest inner loops first so that exits re-emitted after a loop can
        // share the flag of the loop around it in the next round.
        let depths: BTreeMap<StmtId, usize> = groups
            .keys()
            .map(|&(inner, _, _)| (inner, tree.enclosing_scopes(inner).len()))
            .collect();
        let max_depth = depths.values().copied().max().unwrap_or(0);

        for ((inner, kind, target), exits) in groups {
            if depths.get(&inner).copied() != Some(max_depth) {
                continue;
            }
            log::debug!(
                "[structure_exits] round {}: {} {:?} exit(s) in {} target {}",
                round,
                exits.len(),
                kind,
                inner,
                target
            );
            lower_group(tree, inner, kind, target, &exits)?;
            modified = true;
        }
    }

    if modified && config.print_ir {
        log::info!("[structure_exits] after lowering:\n{}", tree);
    }
    Ok(modified)
}

fn collect_illegal_exits(tree: &IrTree, stmts: &[StmtId]) -> Result<Vec<IllegalExit>> {
    let mut illegal = Vec::new();
    for &stmt in stmts {
        if let Some(exit) = classify_exit(tree, stmt)? {
            illegal.push(exit);
        }
    }
    Ok(illegal)
}

/// Resolve the target of an exit and report it when it is non-local.
fn classify_exit(tree: &IrTree, stmt: StmtId) -> Result<Option<IllegalExit>> {
    let Some((kind, scope, levels_up, _)) = tree.kind(stmt).as_exit() else {
        return Ok(None);
    };
    let chain = tree.enclosing_scopes(stmt);

    let target = match scope {
        Some(scope) => {
            if !chain.iter().any(|s| s.stmt == scope) {
                return Err(Error::InvalidScope { stmt, scope });
            }
            scope
        }
        None => {
            let loops: Vec<StmtId> = chain.iter().filter(|s| s.is_loop).map(|s| s.stmt).collect();
            let levels = levels_up.max(1) as usize;
            match loops.get(levels - 1) {
                Some(&target) => target,
                None => match chain.last().filter(|s| tree.kind(s.stmt).is_offloaded()) {
                    Some(task) => {
                        log::warn!(
                            "[structure_exits] {} has levels_up={} but only {} enclosing loops; targeting task {}",
                            stmt,
                            levels_up,
                            loops.len(),
                            task.stmt
                        );
                        task.stmt
                    }
                    None => {
                        log::warn!(
                            "[structure_exits] {} has levels_up={} but only {} enclosing loops and no task; left as is",
                            stmt,
                            levels_up,
                            loops.len()
                        );
                        return Ok(None);
                    }
                },
            }
        }
    };

    match chain.iter().find(|s| s.is_loop) {
        Some(inner) if inner.stmt != target => Ok(Some(IllegalExit {
            stmt,
            kind,
            inner: inner.stmt,
            target,
        })),
        _ => Ok(None),
    }
}

fn lower_group(
    tree: &mut IrTree,
    inner: StmtId,
    kind: ExitKind,
    target: StmtId,
    exits: &[StmtId],
) -> Result<()> {
    let body = match tree.kind(inner) {
        StmtKind::Loop { body, .. } => *body,
        other => {
            return Err(Error::internal(format!(
                "{} is a {}, not a loop",
                inner,
                other.name()
            )))
        }
    };
    let (enclosing, _) = tree.position(inner)?;

    let flag = tree.insert_at(enclosing, 0, StmtKind::Alloca { ty: DataType::U1 });
    let init = tree.insert_at(enclosing, 1, bool_const(false));
    tree.insert_at(
        enclosing,
        2,
        StmtKind::LocalStore {
            dest: flag,
            value: init,
        },
    );

    for &exit in exits {
        let set = tree.insert_before(exit, bool_const(true))?;
        tree.insert_before(
            exit,
            StmtKind::LocalStore {
                dest: flag,
                value: set,
            },
        )?;
        *tree.kind_mut(exit) = StmtKind::exit(kind, inner);
    }

    if kind == ExitKind::Continue {
        let guard = tree.insert_at(body, 0, StmtKind::LocalLoad { src: flag });
        let guard_block = tree.new_block();
        tree.insert_at(
            body,
            1,
            StmtKind::If {
                cond: guard,
                true_block: Some(guard_block),
                false_block: None,
            },
        );
        tree.push(guard_block, StmtKind::exit(ExitKind::Break, inner));
    }

    let check = tree.insert_after(inner, StmtKind::LocalLoad { src: flag })?;
    let propagate = tree.new_block();
    tree.insert_after(
        check,
        StmtKind::If {
            cond: check,
            true_block: Some(propagate),
            false_block: None,
        },
    )?;
    tree.push(propagate, StmtKind::exit(kind, target));
    Ok(())
}

fn bool_const(value: bool) -> StmtKind {
    StmtKind::Const {
        value: ConstValue::Bool(value),
    }
}
