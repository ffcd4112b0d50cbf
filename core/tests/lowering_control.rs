mod common;

use common::*;
use kiln_core::ast::NodeKind;
use kiln_core::ir::op::IROp;
use kiln_core::ir::operand::{Label, Operand};
use kiln_core::ir::scope::ScopeFlag;

/// The label breaks land on: the last one directly after the `nil` loop
/// result.
fn loop_end_label(instrs: &[IROp]) -> Label {
    let at = (1..instrs.len() - 1)
        .rev()
        .find(|&i| {
            matches!(instrs[i], IROp::Copy { value: Operand::Nil, .. })
                && matches!(instrs[i - 1], IROp::Label { .. })
                && matches!(instrs[i + 1], IROp::Label { .. })
        })
        .expect("no loop result in scope");
    match instrs[at + 1] {
        IROp::Label { label } => label,
        _ => unreachable!(),
    }
}

fn counting_loop(evaluate_at_start: bool) -> kiln_core::AstNode {
    // i = 0; while i < 5; i += 1; next if i == 3; record(i); end; record(:done)
    root(
        vec![
            lasgn("i", 0, int(0)),
            while_loop(
                call(lvar("i", 0), "<", vec![int(5)]),
                vec![
                    lasgn("i", 0, call(lvar("i", 0), "+", vec![int(1)])),
                    if_node(call(lvar("i", 0), "==", vec![int(3)]), Some(next(None)), None),
                    record(lvar("i", 0)),
                ],
                evaluate_at_start,
            ),
            record(sym("done")),
        ],
        &["i"],
    )
}

#[test]
fn pre_test_loop_polls_once_per_iteration_with_next() {
    let module = lower(&counting_loop(true));
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");

    assert_eq!(interp.polls, 5, "IR:\n{}", module);
    assert_eq!(
        interp.trace,
        vec![Value::Int(1), Value::Int(2), Value::Int(4), Value::Int(5), Value::sym("done")],
        "IR:\n{}",
        module
    );
    let end = loop_end_label(&module.root_scope().instrs);
    assert_eq!(interp.hits(&module.root_scope().name, end), 1, "IR:\n{}", module);
}

#[test]
fn post_test_loop_polls_once_per_iteration_with_next() {
    let module = lower(&counting_loop(false));
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");

    assert_eq!(interp.polls, 5, "IR:\n{}", module);
    let end = loop_end_label(&module.root_scope().instrs);
    assert_eq!(interp.hits(&module.root_scope().name, end), 1, "IR:\n{}", module);
}

#[test]
fn loop_marks_scope_and_places_checkpoint_after_iteration_start() {
    let module = lower(&counting_loop(true));
    let root = module.root_scope();
    assert!(root.has_flag(ScopeFlag::HasLoops));

    let polls: Vec<usize> = root
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, IROp::ThreadPoll { on_back_edge: true }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(polls.len(), 1, "IR:\n{}", module);
    assert!(matches!(root.instrs[polls[0] - 1], IROp::Label { .. }), "IR:\n{}", module);
}

#[test]
fn never_entered_loop_lowers_to_nil_without_scaffolding() {
    let ast = root(vec![record(while_loop(n(NodeKind::False), vec![record(int(1))], true))], &[]);
    let module = lower(&ast);
    let root = module.root_scope();

    assert!(!root.has_flag(ScopeFlag::HasLoops));
    assert!(!root.instrs.iter().any(|op| matches!(op, IROp::ThreadPoll { .. })), "IR:\n{}", module);
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(interp.trace, vec![Value::Nil]);
}

#[test]
fn break_value_becomes_loop_result() {
    // record(while true; break 7; end)
    let ast = root(vec![record(while_loop(n(NodeKind::True), vec![brk(Some(int(7)))], true))], &[]);
    let module = lower(&ast);
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(interp.trace, vec![Value::Int(7)], "IR:\n{}", module);
}

#[test]
fn if_with_both_arms_returning_is_unreachable() {
    // def m(x); if x; return 1; else; return 2; end; record(:after); end
    let body = vec![
        if_node(lvar("x", 0), Some(ret(Some(int(1)))), Some(ret(Some(int(2))))),
        record(sym("after")),
    ];
    let module = lower(&root(vec![defn("m", args_pre(&["x"]), body, &["x"])], &[]));
    let m = instrs_of(&module, "m");

    assert!(
        !m.iter().any(|op| matches!(op, IROp::Call { name, .. } if name == "record")),
        "dead code emitted:\n{}",
        module
    );
    assert_eq!(m.iter().filter(|op| matches!(op, IROp::Return { .. })).count(), 2, "IR:\n{}", module);
}

fn case_over(x: i64, literal: bool) -> kiln_core::AstNode {
    let g = |v: i64| if literal { int(v) } else { fcall("guard", vec![int(v)]) };
    root(
        vec![
            lasgn("x", 0, int(x)),
            record(case(
                lvar("x", 0),
                vec![(vec![g(1), g(2)], sym("a")), (vec![g(3)], sym("b"))],
                Some(sym("c")),
            )),
        ],
        &["x"],
    )
}

#[test]
fn case_literal_guards_compare_scrutinee_first() {
    let module = lower(&case_over(2, true));
    let tests: Vec<&IROp> = module.root_scope().instrs.iter().filter(|op| matches!(op, IROp::BEq { .. })).collect();

    assert_eq!(tests.len(), 3, "IR:\n{}", module);
    for (op, literal) in tests.iter().zip([1, 2, 3]) {
        match op {
            IROp::BEq { a, b, .. } => {
                assert!(matches!(a, Operand::Var(_)), "scrutinee must be the left operand:\n{}", module);
                assert_eq!(*b, Operand::Fixnum(literal));
            }
            _ => unreachable!(),
        }
    }
}

#[test]
fn case_first_match_wins_and_later_guards_are_skipped() {
    let module = lower(&case_over(2, false));
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(
        interp.trace,
        vec![Value::str("guard 1"), Value::str("guard 2"), Value::sym("a")],
        "IR:\n{}",
        module
    );
}

#[test]
fn case_without_match_evaluates_every_guard_in_order() {
    let module = lower(&case_over(5, false));
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(
        interp.trace,
        vec![Value::str("guard 1"), Value::str("guard 2"), Value::str("guard 3"), Value::sym("c")],
        "IR:\n{}",
        module
    );
}

#[test]
fn case_with_literal_guards_picks_the_matching_clause() {
    for (x, expected) in [(2, "a"), (3, "b"), (5, "c")] {
        let module = lower(&case_over(x, true));
        let mut interp = Interpreter::new(&module);
        interp.run().expect("script raised");
        assert_eq!(interp.trace, vec![Value::sym(expected)], "x = {}, IR:\n{}", x, module);
    }
}

#[test]
fn flip_flop_holds_state_between_iterations() {
    // i = 0; while i < 6; i += 1; record(i) if (i == 2)..(i == 4); end
    let flip = n(NodeKind::Flip {
        begin: call(lvar("i", 0), "==", vec![int(2)]).boxed(),
        end: call(lvar("i", 0), "==", vec![int(4)]).boxed(),
        exclusive: false,
    });
    let ast = root(
        vec![
            lasgn("i", 0, int(0)),
            while_loop(
                call(lvar("i", 0), "<", vec![int(6)]),
                vec![
                    lasgn("i", 0, call(lvar("i", 0), "+", vec![int(1)])),
                    if_node(flip, Some(record(lvar("i", 0))), None),
                ],
                true,
            ),
        ],
        &["i"],
    );
    let module = lower(&ast);
    // state initialised once, ahead of everything else in the owning scope
    assert!(
        matches!(&module.root_scope().instrs[0], IROp::Copy { value: Operand::Fixnum(1), .. }),
        "IR:\n{}",
        module
    );

    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(interp.trace, vec![Value::Int(2), Value::Int(3), Value::Int(4)], "IR:\n{}", module);
}

#[test]
fn exclusive_flip_flop_does_not_test_the_end_on_the_firing_iteration() {
    // i = 0; while i < 5; i += 1; record(i) if (i == 2)..(i > 1); end   (and `...`)
    for (exclusive, expected) in [(false, vec![Value::Int(2)]), (true, vec![Value::Int(2), Value::Int(3)])] {
        let flip = n(NodeKind::Flip {
            begin: call(lvar("i", 0), "==", vec![int(2)]).boxed(),
            end: call(lvar("i", 0), ">", vec![int(1)]).boxed(),
            exclusive,
        });
        let ast = root(
            vec![
                lasgn("i", 0, int(0)),
                while_loop(
                    call(lvar("i", 0), "<", vec![int(5)]),
                    vec![
                        lasgn("i", 0, call(lvar("i", 0), "+", vec![int(1)])),
                        if_node(flip, Some(record(lvar("i", 0))), None),
                    ],
                    true,
                ),
            ],
            &["i"],
        );
        let module = lower(&ast);
        let mut interp = Interpreter::new(&module);
        interp.run().expect("script raised");
        assert_eq!(interp.trace, expected, "exclusive = {}, IR:\n{}", exclusive, module);
    }
}

#[test]
fn redo_restarts_the_iteration_without_testing_the_condition() {
    // i = 0; r = 0
    // while i < 1
    //   i += 1; record(i)
    //   if r == 0; r = 1; redo; end
    // end
    let again = block(vec![lasgn("r", 0, int(1)), n(NodeKind::Redo)]);
    let ast = root(
        vec![
            lasgn("i", 0, int(0)),
            lasgn("r", 0, int(0)),
            while_loop(
                call(lvar("i", 0), "<", vec![int(1)]),
                vec![
                    lasgn("i", 0, call(lvar("i", 0), "+", vec![int(1)])),
                    record(lvar("i", 0)),
                    if_node(call(lvar("r", 0), "==", vec![int(0)]), Some(again), None),
                ],
                true,
            ),
        ],
        &["i", "r"],
    );
    let module = lower(&ast);
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");

    assert_eq!(interp.trace, vec![Value::Int(1), Value::Int(2)], "IR:\n{}", module);
    assert_eq!(interp.polls, 2, "the redone iteration passes the checkpoint again:\n{}", module);
    let end = loop_end_label(&module.root_scope().instrs);
    assert_eq!(interp.hits(&module.root_scope().name, end), 1, "IR:\n{}", module);
}

#[test]
fn and_with_truthy_literal_skips_the_branch() {
    // record(1 && record(2))
    let and = n(NodeKind::And { first: int(1).boxed(), second: record(int(2)).boxed() });
    let module = lower(&root(vec![record(and)], &[]));

    assert!(
        !module.root_scope().instrs.iter().any(|op| op.jump_target().is_some()),
        "IR:\n{}",
        module
    );
    let mut interp = Interpreter::new(&module);
    interp.run().expect("script raised");
    assert_eq!(interp.trace, vec![Value::Int(2), Value::Int(2)]);
}
