//! Labels and goto validation
//!
//! A goto may jump backward or forward to a label in its own scope or an
//! enclosing one. Jumping into a block that does not enclose the goto, or
//! forward past a variable declaration that is still visible at the label,
//! is rejected.

use std::collections::HashMap;

use super::error::CompileErrorKind;
use super::scope::{Local, Scopes};

/// Most labels a single function may define
pub const MAX_LABELS: usize = 256;

#[derive(Debug, Clone)]
struct Label {
    offset: usize,
    depth: u32,
    scope_id: u32,
    /// Locals visible at the label (id, name)
    visible: Vec<(u32, String)>,
}

/// A forward goto waiting for its label
#[derive(Debug, Clone)]
pub struct PendingGoto {
    pub label: String,
    /// Placeholder that becomes `CLOSE_UPVALS` or `NOP`
    pub cleanup_offset: usize,
    pub jump_offset: usize,
    pub line: u32,
    scope_chain: Vec<u32>,
    /// First local id declared after the goto
    next_local_id: u32,
    /// (depth, register) of every local live at the goto
    live: Vec<(u32, u8)>,
}

/// How to finish a resolved goto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotoPatch {
    pub cleanup_offset: usize,
    pub jump_offset: usize,
    pub target: usize,
    /// Close upvalues from this register before jumping
    pub close_from: Option<u8>,
}

/// A backward goto ready to be emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardGoto {
    pub target: usize,
    pub close_from: Option<u8>,
}

#[derive(Debug, Default)]
pub struct LabelTable {
    labels: HashMap<String, Label>,
    pending: Vec<PendingGoto>,
}

fn live_locals(locals: &[Local]) -> Vec<(u32, u8)> {
    locals.iter().map(|l| (l.depth, l.register)).collect()
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name` at `offset`, resolving every pending goto to it
    pub fn define(
        &mut self,
        name: &str,
        offset: usize,
        scopes: &Scopes,
    ) -> Result<Vec<Result<GotoPatch, (u32, CompileErrorKind)>>, CompileErrorKind> {
        if self.labels.contains_key(name) {
            return Err(CompileErrorKind::DuplicateLabel(name.to_string()));
        }
        if self.labels.len() >= MAX_LABELS {
            return Err(CompileErrorKind::TooManyLabels);
        }
        let label = Label {
            offset,
            depth: scopes.depth(),
            scope_id: scopes.scope_id(),
            visible: scopes
                .locals()
                .iter()
                .map(|l| (l.id, l.name.clone()))
                .collect(),
        };

        let (waiting, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|g| g.label == name);
        self.pending = rest;

        let resolved = waiting
            .into_iter()
            .map(|goto| Self::resolve_forward(&label, name, &goto))
            .collect();
        self.labels.insert(name.to_string(), label);
        Ok(resolved)
    }

    fn resolve_forward(
        label: &Label,
        name: &str,
        goto: &PendingGoto,
    ) -> Result<GotoPatch, (u32, CompileErrorKind)> {
        if !goto.scope_chain.contains(&label.scope_id) {
            return Err((goto.line, CompileErrorKind::GotoIntoScope(name.to_string())));
        }
        if let Some((_, variable)) = label
            .visible
            .iter()
            .find(|(id, _)| *id >= goto.next_local_id)
        {
            return Err((
                goto.line,
                CompileErrorKind::GotoSkipsDeclaration {
                    label: name.to_string(),
                    variable: variable.clone(),
                },
            ));
        }
        let close_from = goto
            .live
            .iter()
            .filter(|(depth, _)| *depth > label.depth)
            .map(|(_, register)| *register)
            .min();
        Ok(GotoPatch {
            cleanup_offset: goto.cleanup_offset,
            jump_offset: goto.jump_offset,
            target: label.offset,
            close_from,
        })
    }

    /// A goto to an already defined label
    pub fn backward(
        &self,
        name: &str,
        scopes: &Scopes,
    ) -> Option<Result<BackwardGoto, CompileErrorKind>> {
        let label = self.labels.get(name)?;
        if !scopes.scope_chain().contains(&label.scope_id) {
            return Some(Err(CompileErrorKind::GotoIntoScope(name.to_string())));
        }
        // Locals declared after the label get a fresh binding on the next pass
        let close_from = scopes
            .locals()
            .iter()
            .filter(|l| l.depth > label.depth || !label.visible.iter().any(|(id, _)| *id == l.id))
            .map(|l| l.register)
            .min();
        Some(Ok(BackwardGoto {
            target: label.offset,
            close_from,
        }))
    }

    /// Record a forward goto whose placeholder words were just emitted
    pub fn add_pending(
        &mut self,
        name: &str,
        cleanup_offset: usize,
        jump_offset: usize,
        line: u32,
        scopes: &Scopes,
    ) {
        self.pending.push(PendingGoto {
            label: name.to_string(),
            cleanup_offset,
            jump_offset,
            line,
            scope_chain: scopes.scope_chain(),
            next_local_id: scopes.next_local_id(),
            live: live_locals(scopes.locals()),
        });
    }

    /// Gotos whose label never appeared
    pub fn take_unresolved(&mut self) -> Vec<PendingGoto> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::scope::BindingInfo;

    fn declare(scopes: &mut Scopes, name: &str) -> u8 {
        let r = scopes.alloc().unwrap();
        scopes.declare(name, r, BindingInfo::default()).unwrap();
        r
    }

    #[test]
    fn forward_goto_over_declaration_is_rejected() {
        let mut scopes = Scopes::new();
        let mut labels = LabelTable::new();
        scopes.begin_scope();
        labels.add_pending("end", 0, 1, 3, &scopes);
        declare(&mut scopes, "x");
        let resolved = labels.define("end", 10, &scopes).unwrap();
        assert!(matches!(
            &resolved[0],
            Err((3, CompileErrorKind::GotoSkipsDeclaration { variable, .. })) if variable == "x"
        ));
    }

    #[test]
    fn goto_out_of_nested_scope_closes_its_locals() {
        let mut scopes = Scopes::new();
        let mut labels = LabelTable::new();
        scopes.begin_scope();
        declare(&mut scopes, "outer");
        scopes.begin_scope();
        let inner = declare(&mut scopes, "inner");
        labels.add_pending("out", 4, 5, 1, &scopes);
        scopes.end_scope();
        let resolved = labels.define("out", 9, &scopes).unwrap();
        assert_eq!(
            resolved[0],
            Ok(GotoPatch {
                cleanup_offset: 4,
                jump_offset: 5,
                target: 9,
                close_from: Some(inner),
            })
        );
    }

    #[test]
    fn goto_into_deeper_scope_is_rejected() {
        let mut scopes = Scopes::new();
        let mut labels = LabelTable::new();
        scopes.begin_scope();
        labels.add_pending("inside", 0, 1, 2, &scopes);
        scopes.begin_scope();
        let resolved = labels.define("inside", 5, &scopes).unwrap();
        assert!(matches!(
            resolved[0],
            Err((2, CompileErrorKind::GotoIntoScope(_)))
        ));

        // And backward into a scope that already closed
        scopes.end_scope();
        assert!(matches!(
            labels.backward("inside", &scopes),
            Some(Err(CompileErrorKind::GotoIntoScope(_)))
        ));
    }

    #[test]
    fn duplicate_and_excess_labels() {
        let scopes = Scopes::new();
        let mut labels = LabelTable::new();
        labels.define("a", 0, &scopes).unwrap();
        assert_eq!(
            labels.define("a", 1, &scopes).unwrap_err(),
            CompileErrorKind::DuplicateLabel("a".into())
        );
        for i in 1..MAX_LABELS {
            labels.define(&format!("l{i}"), i, &scopes).unwrap();
        }
        assert_eq!(
            labels.define("overflow", 0, &scopes).unwrap_err(),
            CompileErrorKind::TooManyLabels
        );
    }

    #[test]
    fn backward_goto_in_same_scope() {
        let mut scopes = Scopes::new();
        let mut labels = LabelTable::new();
        scopes.begin_scope();
        let before = declare(&mut scopes, "before");
        labels.define("top", 2, &scopes).unwrap();
        let x = declare(&mut scopes, "x");
        assert!(x > before);
        assert_eq!(
            labels.backward("top", &scopes),
            Some(Ok(BackwardGoto {
                target: 2,
                close_from: Some(x)
            }))
        );
    }
}
