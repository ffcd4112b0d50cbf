//! file: core/src/ir/clone.rs
//! description: structural cloning of instruction templates.
//!
//! Ensure bodies are built once into a side buffer and replayed at every
//! exit of the protected region. Each replay goes through a `CloneMap`
//! that gives every label defined by the template a fresh label, and
//! every temporary the template allocated a fresh temporary, so the
//! replayed copies never share a jump target or a definition.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use super::op::{IROp, OpVisitorMut};
use super::operand::{Label, Operand, Variable};
use super::scope::Scope;

#[derive(Debug, Default)]
pub struct CloneMap {
    labels: BTreeMap<Label, Label>,
    temps: BTreeMap<u32, u32>,
}

struct Collector<'a> {
    temp_range: &'a Range<u32>,
    labels: BTreeSet<Label>,
    temps: BTreeSet<u32>,
}

impl OpVisitorMut for Collector<'_> {
    fn result(&mut self, var: &mut Variable) {
        if let Variable::Temp(n) = var {
            if self.temp_range.contains(n) {
                self.temps.insert(*n);
            }
        }
    }

    fn operand(&mut self, op: &mut Operand) {
        let range = self.temp_range;
        let temps = &mut self.temps;
        op.for_each_var_mut(&mut |v| {
            if let Variable::Temp(n) = v {
                if range.contains(n) {
                    temps.insert(*n);
                }
            }
        });
    }
}

impl<'a> Collector<'a> {
    fn scan(&mut self, op: &IROp) {
        if let IROp::Label { label } = op {
            self.labels.insert(*label);
        }
        let mut copy = op.clone();
        copy.visit_mut(self);
    }
}

impl CloneMap {
    /// Map for replaying `template` into `scope`. `extra_labels` are renamed
    /// even though the template itself does not define them (the ensure
    /// start label is emitted by the replay, not stored in the template).
    pub fn for_template(template: &[IROp], extra_labels: &[Label], temp_range: &Range<u32>, scope: &mut Scope) -> Self {
        let mut collector = Collector { temp_range, labels: BTreeSet::new(), temps: BTreeSet::new() };
        for op in template {
            collector.scan(op);
        }
        collector.labels.extend(extra_labels.iter().copied());

        let mut map = CloneMap::default();
        for l in collector.labels {
            map.labels.insert(l, scope.new_label());
        }
        for t in collector.temps {
            if let Variable::Temp(n) = scope.new_temp() {
                map.temps.insert(t, n);
            }
        }
        map
    }

    pub fn renamed_label(&self, label: Label) -> Label {
        self.labels.get(&label).copied().unwrap_or(label)
    }

    fn rename_var(&self, var: &mut Variable) {
        if let Variable::Temp(n) = var {
            if let Some(&fresh) = self.temps.get(n) {
                *n = fresh;
            }
        }
    }

    pub fn clone_op(&self, op: &IROp) -> IROp {
        let mut copy = op.clone();
        copy.visit_mut(&mut Renamer { map: self });
        copy
    }

    pub fn clone_all(&self, template: &[IROp]) -> Vec<IROp> {
        template.iter().map(|op| self.clone_op(op)).collect()
    }
}

struct Renamer<'a> {
    map: &'a CloneMap,
}

impl OpVisitorMut for Renamer<'_> {
    fn label(&mut self, label: &mut Label) {
        *label = self.map.renamed_label(*label);
    }

    fn result(&mut self, var: &mut Variable) {
        self.map.rename_var(var);
    }

    fn operand(&mut self, op: &mut Operand) {
        let map = self.map;
        op.for_each_var_mut(&mut |v| map.rename_var(v));
    }
}
