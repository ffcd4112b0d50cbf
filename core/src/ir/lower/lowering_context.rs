//! file: core/src/ir/lower/lowering_context.rs
//! description: control-transfer state of one scope being lowered.
//!
//! `LoweringContext` holds the stacks of active loops, rescue regions and
//! ensure regions, plus the side buffers ensure templates are built into.
//! Every scope gets a fresh context; nested scopes never see the stacks of
//! the scope that contains them.

use std::ops::Range;

use crate::ast::NodeId;
use crate::ir::op::IROp;
use crate::ir::operand::{Label, Variable};

#[derive(Debug, Clone)]
pub struct LoopContext {
    pub id: u32,
    pub loop_start: Label,
    /// `redo` target; the preemption checkpoint sits right after it.
    pub iter_start: Label,
    /// `next` target.
    pub iter_end: Label,
    /// `break` target.
    pub loop_end: Label,
    pub result: Variable,
}

#[derive(Debug, Clone)]
pub struct RescueContext {
    pub node: NodeId,
    /// `retry` target.
    pub entry: Label,
    /// `$!` as it was when the region was entered.
    pub saved_exception: Variable,
    pub innermost_loop: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct EnsureContext {
    pub region_start: Label,
    /// Label the template is replayed under.
    pub start: Label,
    pub end: Label,
    /// Catch-all handler running the ensure body on the exceptional path.
    pub dummy_rescue: Label,
    pub saved_exception: Option<Variable>,
    pub innermost_loop: Option<u32>,
    /// Set when the protected body is itself a `begin/rescue`.
    pub matching_rescue: Option<NodeId>,
    /// Handler active where the ensure was written; replays run under it.
    pub body_rescuer: Option<Label>,
    pub instrs: Vec<IROp>,
    /// Temporaries allocated while the template was built.
    pub temps: Range<u32>,
}

#[derive(Debug, Default)]
pub struct LoweringContext {
    pub loops: Vec<LoopContext>,
    pub rescues: Vec<RescueContext>,
    pub ensures: Vec<EnsureContext>,
    /// Instruction sinks for ensure templates under construction.
    pub ensure_builds: Vec<Vec<IROp>>,
    /// Exception-region handlers, innermost last. `None` is "unrescued".
    pub rescuers: Vec<Option<Label>>,
    pub last_line: Option<usize>,
    next_loop_id: u32,
}

impl LoweringContext {
    pub fn new() -> Self {
        LoweringContext::default()
    }

    pub fn push_loop(&mut self, loop_start: Label, iter_start: Label, iter_end: Label, loop_end: Label, result: Variable) -> u32 {
        let id = self.next_loop_id;
        self.next_loop_id += 1;
        self.loops.push(LoopContext { id, loop_start, iter_start, iter_end, loop_end, result });
        id
    }

    pub fn pop_loop(&mut self) -> Option<LoopContext> {
        self.loops.pop()
    }

    pub fn current_loop(&self) -> Option<&LoopContext> {
        self.loops.last()
    }

    pub fn current_loop_id(&self) -> Option<u32> {
        self.loops.last().map(|l| l.id)
    }

    pub fn push_rescue(&mut self, ctx: RescueContext) {
        self.rescues.push(ctx);
    }

    pub fn pop_rescue(&mut self) -> Option<RescueContext> {
        self.rescues.pop()
    }

    pub fn current_rescue(&self) -> Option<&RescueContext> {
        self.rescues.last()
    }

    pub fn push_ensure(&mut self, ctx: EnsureContext) {
        self.ensures.push(ctx);
    }

    pub fn pop_ensure(&mut self) -> Option<EnsureContext> {
        self.ensures.pop()
    }

    pub fn current_rescuer(&self) -> Option<Label> {
        self.rescuers.last().copied().flatten()
    }

    pub fn push_rescuer(&mut self, label: Label) {
        self.rescuers.push(Some(label));
    }

    pub fn pop_rescuer(&mut self) {
        self.rescuers.pop();
    }

    pub fn begin_ensure_build(&mut self) {
        self.ensure_builds.push(Vec::new());
    }

    pub fn end_ensure_build(&mut self) -> Vec<IROp> {
        self.ensure_builds.pop().unwrap_or_default()
    }

    /// Where emitted instructions currently go, if not the scope itself.
    pub fn active_sink(&mut self) -> Option<&mut Vec<IROp>> {
        self.ensure_builds.last_mut()
    }
}
