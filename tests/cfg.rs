use kernel_cfg::cfg::analysis::{
    dead_ends, nodes_reaching_final, reachable_from_start, statement_owners,
};
use kernel_cfg::cfg::{build_cfg, CfgBuilder, CfgRoot, CfgWarning, ControlFlowGraph, EdgeKind};
use kernel_cfg::error::Error;
use kernel_cfg::ir::{IrBuilder, IrTree, OffloadPhase, OffloadedTaskType, StmtId, StmtKind};
use petgraph::graph::NodeIndex;

fn n(index: usize) -> NodeIndex {
    NodeIndex::new(index)
}

/// Start/final emptiness and exactly-once coverage of non-container statements
fn assert_well_formed(tree: &IrTree, cfg: &ControlFlowGraph) {
    assert_eq!(cfg.start_node(), n(0));
    assert!(cfg.node(cfg.start_node()).is_empty());
    assert!(cfg.predecessors(cfg.start_node()).is_empty());
    assert!(cfg.node(cfg.final_node()).is_empty());

    let reaching = nodes_reaching_final(cfg);
    for node in reachable_from_start(cfg) {
        assert!(reaching.contains(&node), "node {} never reaches final", node.index());
    }

    let owners = statement_owners(cfg, tree).unwrap();
    for stmt in tree.preorder(tree.root()) {
        let kind = tree.kind(stmt);
        assert_eq!(
            owners.contains_key(&stmt),
            !kind.is_container(),
            "coverage of {} ({})",
            stmt,
            kind.name()
        );
    }
}

#[test]
fn test_empty_tree() {
    let tree = IrTree::new();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);
    assert_eq!(cfg.size(), 2);
    assert_eq!(cfg.edges(), vec![(n(0), n(1), EdgeKind::Fall)]);
}

#[test]
fn test_range_for_back_edge_and_exits() {
    let mut b = IrBuilder::new();
    b.op("pre", vec![]);
    b.range_for(|b, _| {
        b.op("a", vec![]);
        b.op("b", vec![]);
    });
    b.op("post", vec![]);
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 0 start, 1 [pre], 2 body, 3 [post], 4 final
    assert_eq!(cfg.size(), 5);
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::LoopEntry));
    assert_eq!(cfg.edge_kind(n(2), n(2)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.edge_kind(n(1), n(3)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.edge_kind(n(2), n(3)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.edge_kind(n(3), n(4)), Some(EdgeKind::Fall));
    assert_eq!(cfg.final_node(), n(4));

    // Top-level for loops run in parallel, the code around them does not.
    assert!(cfg.node(n(2)).is_parallel_executed);
    assert!(!cfg.node(n(1)).is_parallel_executed);
    assert!(!cfg.node(n(3)).is_parallel_executed);
}

#[test]
fn test_back_edge_goes_from_last_to_first_body_node() {
    let mut b = IrBuilder::new();
    b.range_for(|b, _| {
        let c = b.const_bool(true);
        b.if_then(c, |b| {
            b.op("then", vec![]);
        });
        b.op("tail", vec![]);
    });
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before loop, 2 [c], 3 [then], 4 [tail], 5 after loop
    assert_eq!(cfg.edge_kind(n(4), n(2)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::LoopEntry));
    assert_eq!(cfg.edge_kind(n(4), n(5)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.edge_kind(n(1), n(5)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.node(n(4)).prev_node_in_same_block, Some(n(2)));
}

#[test]
fn test_if_without_else_falls_through() {
    let mut b = IrBuilder::new();
    let c = b.const_bool(true);
    b.if_then(c, |b| {
        b.op("then", vec![]);
    });
    b.op("after", vec![]);
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::True));
    assert_eq!(cfg.edge_kind(n(2), n(3)), Some(EdgeKind::Fall));
    assert_eq!(cfg.edge_kind(n(1), n(3)), Some(EdgeKind::False));
    assert_eq!(cfg.predecessors(n(3)), vec![n(1), n(2)]);
}

#[test]
fn test_if_with_only_false_branch() {
    let mut tree = IrTree::new();
    let root = tree.root();
    let cond = tree.push(
        root,
        StmtKind::Const {
            value: kernel_cfg::ir::ConstValue::Bool(false),
        },
    );
    let otherwise = tree.new_block();
    tree.push(
        root,
        StmtKind::If {
            cond,
            true_block: None,
            false_block: Some(otherwise),
        },
    );
    tree.push(
        otherwise,
        StmtKind::Op {
            name: "else".into(),
            operands: vec![],
        },
    );
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::False));
    assert_eq!(cfg.edge_kind(n(1), n(3)), Some(EdgeKind::True));
}

#[test]
fn test_while_true_only_exits_through_while_control() {
    let mut b = IrBuilder::new();
    b.while_loop(|b, _| {
        let c = b.const_bool(true);
        b.while_control(c);
        b.op("work", vec![]);
    });
    b.op("after", vec![]);
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before loop, 2 [c, while control], 3 [work], 4 [after]
    assert_eq!(cfg.edge_kind(n(2), n(3)), Some(EdgeKind::Fall));
    assert_eq!(cfg.edge_kind(n(3), n(2)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.edge_kind(n(2), n(4)), Some(EdgeKind::Break));
    assert_eq!(cfg.edge_kind(n(1), n(4)), None);
    assert_eq!(cfg.edge_kind(n(3), n(4)), None);
    assert!(!cfg.node(n(2)).is_parallel_executed);
}

#[test]
fn test_break_targets_successor_of_its_loop() {
    let mut b = IrBuilder::new();
    b.while_loop(|b, outer| {
        b.while_loop(|b, _| {
            b.brk(Some(outer));
        });
    });
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before outer, 2 before inner, 3 [break], 4 inner end, 5 outer end, 6 after
    assert_eq!(cfg.edge_kind(n(3), n(6)), Some(EdgeKind::Break));
    assert!(cfg.warnings().is_empty());
    assert!(dead_ends(&cfg).is_empty());
}

#[test]
fn test_continue_resolves_to_task_loop_begin() {
    let mut b = IrBuilder::new();
    b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        let c = b.const_bool(true);
        b.if_then(c, |b| {
            b.cont(task);
        });
        b.op("work", vec![]);
    });
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before body, 2 [c], 3 [continue], 4 after continue, 5 [work], 6 final
    assert_eq!(cfg.edge_kind(n(3), n(2)), Some(EdgeKind::Continue));
    assert!(cfg.predecessors(n(4)).is_empty());
    assert_eq!(cfg.edge_kind(n(5), n(2)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.final_node(), n(6));
    for index in 2..=5 {
        assert!(cfg.node(n(index)).is_parallel_executed);
    }
    assert!(!cfg.node(n(1)).is_parallel_executed);
    assert!(cfg.warnings().is_empty());
}

#[test]
fn test_levels_up_beyond_recorded_loops_targets_final() {
    let mut b = IrBuilder::new();
    let mut exit = None;
    b.offloaded(OffloadedTaskType::Serial, |b, _| {
        b.while_loop(|b, _| {
            exit = Some(b.cont_levels(2, true));
        });
    });
    let tree = b.finish();
    let exit = exit.unwrap();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    let exit_node = n(3);
    assert_eq!(cfg.node(exit_node).statements(&tree), &[exit][..]);
    assert_eq!(
        cfg.edge_kind(exit_node, cfg.final_node()),
        Some(EdgeKind::Unwind)
    );
    assert_eq!(
        cfg.warnings(),
        &[CfgWarning::LevelsUpOutOfRange {
            stmt: exit,
            levels_up: 2,
            depth: 1
        }]
    );
}

#[test]
fn test_function_return_unwind_is_conservative() {
    let mut b = IrBuilder::new();
    let mut exit = None;
    let task = b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        b.while_loop(|b, _| {
            exit = Some(b.func_return_cont(task, 2));
        });
    });
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();

    let exit = exit.unwrap();
    let owner = statement_owners(&cfg, &tree).unwrap()[&exit];
    assert_eq!(cfg.edge_kind(owner, cfg.final_node()), Some(EdgeKind::Unwind));
    assert_eq!(
        cfg.warnings(),
        &[CfgWarning::ConservativeUnwind {
            stmt: exit,
            scope: task
        }]
    );
}

#[test]
fn test_offload_phases_are_chained() {
    let mut b = IrBuilder::new();
    let task = b.offloaded(OffloadedTaskType::RangeFor, |b, _| {
        b.op("body", vec![]);
    });
    b.offload_phase(task, OffloadPhase::TlsPrologue, |b| {
        b.op("tls_init", vec![]);
    })
    .unwrap();
    b.offload_phase(task, OffloadPhase::TlsEpilogue, |b| {
        b.op("tls_reduce", vec![]);
    })
    .unwrap();
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before prologue, 2 [tls_init], 3 before body, 4 [body],
    // 5 before epilogue, 6 [tls_reduce], 7 after task
    assert_eq!(cfg.size(), 8);
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(2), n(3)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(3), n(4)), Some(EdgeKind::LoopEntry));
    assert_eq!(cfg.edge_kind(n(4), n(4)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.edge_kind(n(4), n(5)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.edge_kind(n(3), n(5)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.edge_kind(n(5), n(6)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(6), n(7)), Some(EdgeKind::Phase));
    assert!(cfg.node(n(4)).is_parallel_executed);
    assert!(!cfg.node(n(2)).is_parallel_executed);
    assert!(!cfg.node(n(6)).is_parallel_executed);
    assert!(cfg.node(n(3)).is_empty());
    assert!(cfg.node(n(5)).is_empty());
}

#[test]
fn test_offloaded_statement_as_root() {
    let mut b = IrBuilder::new();
    b.op("host", vec![]);
    let task = b.offloaded(OffloadedTaskType::StructFor, |b, task| {
        b.op("work", vec![]);
        b.cont(task);
    });
    let tree = b.finish();
    let cfg = CfgBuilder::run(&tree, CfgRoot::Stmt(task)).unwrap();

    // The host statement in front of the task is not part of the graph.
    let owners = statement_owners(&cfg, &tree).unwrap();
    assert!(!owners.contains_key(&StmtId(0)));
    assert_eq!(owners.len(), 2);
    assert!(cfg.node(cfg.final_node()).is_empty());
    assert!(cfg.warnings().is_empty());
}

#[test]
fn test_detached_root_statement_is_rejected() {
    let mut b = IrBuilder::new();
    let op = b.op("gone", vec![]);
    let mut tree = b.finish();
    tree.erase(op).unwrap();
    assert_eq!(
        CfgBuilder::run(&tree, CfgRoot::Stmt(op)).unwrap_err(),
        Error::Detached { stmt: op }
    );
}

#[test]
fn test_build_is_deterministic() {
    let mut b = IrBuilder::new();
    b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        b.while_loop(|b, inner| {
            let c = b.const_bool(true);
            b.if_else(
                c,
                |b| {
                    b.func_return_cont(task, 2);
                },
                |b| {
                    b.brk(Some(inner));
                },
            );
        });
    });
    let tree = b.finish();
    let first = build_cfg(&tree).unwrap();
    let second = build_cfg(&tree).unwrap();
    assert_eq!(first.size(), second.size());
    assert_eq!(first.edges(), second.edges());
    let ranges = |cfg: &ControlFlowGraph| {
        cfg.nodes()
            .map(|(_, node)| (node.block, node.begin, node.end))
            .collect::<Vec<_>>()
    };
    assert_eq!(ranges(&first), ranges(&second));
}

#[test]
fn test_function_return_break_targets_final() {
    let mut b = IrBuilder::new();
    let mut exit = None;
    let task = b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        b.while_loop(|b, _| {
            exit = Some(b.func_return_brk(task));
        });
    });
    let tree = b.finish();
    let exit = exit.unwrap();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before task, 2 before while, 3 [break], 4 while end, 5 task end, 6 final
    assert_eq!(cfg.final_node(), n(6));
    assert_eq!(cfg.node(n(3)).statements(&tree), &[exit][..]);
    assert_eq!(cfg.edge_kind(n(3), n(6)), Some(EdgeKind::Unwind));
    assert_eq!(cfg.successors(n(3)), vec![n(6)]);
    assert_eq!(
        cfg.warnings(),
        &[CfgWarning::ConservativeUnwind {
            stmt: exit,
            scope: task
        }]
    );
}

#[test]
fn test_continue_of_serial_task_has_no_loop_begin() {
    let mut b = IrBuilder::new();
    let mut exit = None;
    let task = b.offloaded(OffloadedTaskType::Serial, |b, task| {
        exit = Some(b.cont(task));
    });
    let tree = b.finish();
    let exit = exit.unwrap();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before task, 2 [continue], 3 body end, 4 after task
    assert_eq!(cfg.final_node(), n(4));
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(2), n(4)), Some(EdgeKind::Unwind));
    assert_eq!(
        cfg.warnings(),
        &[CfgWarning::ScopeNotBuilt {
            stmt: exit,
            scope: task
        }]
    );
}

#[test]
fn test_serial_body_is_chained_as_a_phase() {
    let mut b = IrBuilder::new();
    let task = b.offloaded(OffloadedTaskType::Serial, |b, _| {
        b.op("body", vec![]);
    });
    b.offload_phase(task, OffloadPhase::TlsPrologue, |b| {
        b.op("tls_init", vec![]);
    })
    .unwrap();
    let tree = b.finish();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before prologue, 2 [tls_init], 3 before body, 4 [body], 5 after task
    assert_eq!(cfg.size(), 6);
    assert_eq!(cfg.edge_count(), 5);
    assert_eq!(cfg.edge_kind(n(1), n(2)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(2), n(3)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(3), n(4)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(4), n(5)), Some(EdgeKind::Phase));
    assert_eq!(cfg.edge_kind(n(4), n(4)), None);
    assert!(cfg.nodes().all(|(_, node)| !node.is_parallel_executed));
}

#[test]
fn test_break_of_loop_shaped_task_leaves_the_task() {
    let mut b = IrBuilder::new();
    let mut exit = None;
    b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        let c = b.const_bool(true);
        b.if_then(c, |b| {
            exit = Some(b.brk(Some(task)));
        });
        b.op("work", vec![]);
    });
    let tree = b.finish();
    let exit = exit.unwrap();
    let cfg = build_cfg(&tree).unwrap();
    assert_well_formed(&tree, &cfg);

    // 1 before task, 2 [c], 3 [break], 4 after break, 5 [work], 6 after task
    assert_eq!(cfg.node(n(3)).statements(&tree), &[exit][..]);
    assert_eq!(cfg.edge_kind(n(3), n(6)), Some(EdgeKind::Break));
    assert_eq!(cfg.edge_kind(n(5), n(2)), Some(EdgeKind::BackEdge));
    assert_eq!(cfg.edge_kind(n(1), n(6)), Some(EdgeKind::LoopExit));
    assert_eq!(cfg.final_node(), n(6));
    assert!(cfg.node(n(3)).is_parallel_executed);
    assert!(cfg.warnings().is_empty());
}
