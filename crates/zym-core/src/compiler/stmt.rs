//! Statement lowering

use std::rc::Rc;

use crate::ast::{
    Block, Expr, ExprKind, ExprQualifier, FunctionDecl, Ident, Stmt, StmtKind, VarBinding,
};
use crate::bytecode::{Instruction, OpCode};
use crate::config::TcoMode;
use crate::value::Value;

use super::error::CompileErrorKind;
use super::scope::{mangle, BindingInfo, LocalKind};
use super::{Compiler, GlobalBinding, LoopState, Resolved};

impl Compiler<'_> {
    /// Compile a statement list; with `tail` set the last statement is in
    /// tail position
    pub(super) fn statements(&mut self, stmts: &[Stmt], tail: bool) {
        let last = stmts.len().saturating_sub(1);
        for (i, stmt) in stmts.iter().enumerate() {
            self.statement(stmt, tail && i == last);
        }
    }

    fn statement(&mut self, stmt: &Stmt, tail: bool) {
        self.set_line(stmt.span);
        let saved = self.temp_top();
        match &stmt.kind {
            StmtKind::Var(bindings) => {
                for binding in bindings {
                    self.var_binding(binding);
                }
            }
            StmtKind::Ref { name, target } => self.ref_declaration(name, target),
            StmtKind::Slot { name, target } => self.slot_declaration(name, target),
            StmtKind::Function(decl) => self.function_declaration(decl),
            // Declared by hoisting
            StmtKind::Struct { .. } | StmtKind::Enum { .. } => {}
            StmtKind::Tco(mode) => {
                tracing::debug!(mode = %mode, "tail-call mode changed");
                self.state_mut().tco = *mode;
            }
            StmtKind::Block(block) => self.block(block, tail),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_jump = self.condition_jump(cond);
                self.body(then_branch, tail);
                match else_branch {
                    Some(else_branch) => {
                        let end = self.emit_jump(OpCode::Jump, 0);
                        self.patch_jump(else_jump);
                        self.body(else_branch, tail);
                        self.patch_jump(end);
                    }
                    None => self.patch_jump(else_jump),
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.current_offset();
                let exit = self.condition_jump(cond);
                self.push_loop(Some(start));
                self.body(body, false);
                self.emit_loop(OpCode::Jump, 0, start);
                self.patch_jump(exit);
                self.pop_loop(start);
            }
            StmtKind::DoWhile { body, cond } => {
                let start = self.current_offset();
                self.push_loop(None);
                self.body(body, false);
                let continue_target = self.current_offset();
                let saved = self.temp_top();
                let register = self.expr_any(cond);
                self.emit_loop(OpCode::JumpIfTrue, register, start);
                self.restore_temps(saved);
                self.pop_loop(continue_target);
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body),
            StmtKind::Break => self.break_statement(),
            StmtKind::Continue => self.continue_statement(),
            StmtKind::Return(value) => self.return_statement(value.as_ref()),
            StmtKind::Goto(label) => self.goto(label),
            StmtKind::Label(label) => self.label(label),
            StmtKind::Expr(expr) => self.expression_statement(expr, tail),
        }
        self.restore_temps(saved);
    }

    fn block(&mut self, block: &Block, tail: bool) {
        let tco = self.state().tco;
        self.begin_scope();
        self.hoist(&block.stmts);
        self.statements(&block.stmts, tail);
        self.end_scope();
        self.state_mut().tco = tco;
    }

    /// Compile the body of a branch or loop in its own scope
    fn body(&mut self, stmt: &Stmt, tail: bool) {
        if let StmtKind::Block(block) = &stmt.kind {
            self.block(block, tail);
            return;
        }
        self.begin_scope();
        self.hoist(std::slice::from_ref(stmt));
        self.statement(stmt, tail);
        self.end_scope();
    }

    fn expression_statement(&mut self, expr: &Expr, tail: bool) {
        match &expr.kind {
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value, None),
            ExprKind::Call { callee, args }
                if tail && !self.state().is_script && self.state().tco == TcoMode::Aggressive =>
            {
                self.call(callee, args, 0, true);
            }
            _ => {
                let register = self.alloc_reg();
                self.expr_to(expr, register);
            }
        }
    }

    fn return_statement(&mut self, value: Option<&Expr>) {
        let Some(value) = value else {
            self.emit_abc(OpCode::ReturnNull, 0, 0, 0);
            return;
        };
        if let ExprKind::Call { callee, args } = &value.kind {
            if !self.state().is_script {
                self.call(callee, args, 0, true);
                return;
            }
        }
        let register = self.expr_any(value);
        self.emit_abc(OpCode::Return, register, 0, 0);
    }

    // ===== Declarations =====

    /// What is known statically about a variable initialized with `init`
    fn infer_binding(&mut self, init: Option<&Expr>) -> BindingInfo {
        let Some(init) = init else {
            return BindingInfo::default();
        };
        match &init.kind {
            ExprKind::Qualified {
                qualifier: ExprQualifier::Ref,
                ..
            } => BindingInfo::of_kind(LocalKind::Reference),
            ExprKind::Function(decl) => BindingInfo {
                signature: Some(decl.qualifiers().into()),
                ..BindingInfo::default()
            },
            ExprKind::Struct { .. } => BindingInfo {
                struct_type: self.static_struct_type(init),
                ..BindingInfo::default()
            },
            ExprKind::Ident(ident) => self
                .resolve_name(&ident.name, None)
                .info()
                .filter(|info| !info.kind.is_indirect())
                .cloned()
                .unwrap_or_default(),
            _ => BindingInfo::default(),
        }
    }

    fn var_binding(&mut self, binding: &VarBinding) {
        let name = &binding.name;
        let info = self.infer_binding(binding.init.as_ref());
        if self.at_top_level() {
            let slot = self.global_slot(&name.name);
            let saved = self.temp_top();
            let register = self.alloc_reg();
            match &binding.init {
                Some(init) => self.expr_to(init, register),
                None => {
                    self.emit_abc(OpCode::LoadNull, register, 0, 0);
                }
            }
            self.set_line(name.span);
            self.emit_abx(OpCode::DefineGlobal, register, slot);
            self.restore_temps(saved);
            self.globals
                .insert(name.name.clone(), GlobalBinding { slot, info });
        } else {
            let register = self.alloc_reg();
            match &binding.init {
                Some(init) => self.expr_to(init, register),
                None => {
                    self.emit_abc(OpCode::LoadNull, register, 0, 0);
                }
            }
            self.declare_local(name, register, info);
        }
    }

    /// Bind `name` to a reference to `target`
    fn bind_reference(
        &mut self,
        name: &Ident,
        target: &Expr,
        kind: LocalKind,
        error: CompileErrorKind,
    ) {
        let info = BindingInfo::of_kind(kind);
        if self.at_top_level() {
            let slot = self.global_slot(&name.name);
            let saved = self.temp_top();
            let register = self.alloc_reg();
            self.reference_to(target, register, error);
            self.emit_abx(OpCode::DefineGlobal, register, slot);
            self.restore_temps(saved);
            self.globals
                .insert(name.name.clone(), GlobalBinding { slot, info });
        } else {
            let register = self.alloc_reg();
            self.reference_to(target, register, error);
            self.declare_local(name, register, info);
        }
    }

    fn ref_declaration(&mut self, name: &Ident, target: &Expr) {
        self.bind_reference(name, target, LocalKind::Reference, CompileErrorKind::RefToTemporary);
    }

    /// `slot s = target` rebinds an existing slot binding, otherwise it
    /// declares one
    fn slot_declaration(&mut self, name: &Ident, target: &Expr) {
        let existing = match self.resolve_name(&name.name, None) {
            r @ (Resolved::Local { .. } | Resolved::Upvalue { .. } | Resolved::Global { .. })
                if r.info().map(|i| i.kind) == Some(LocalKind::Slot) =>
            {
                Some(r)
            }
            _ => None,
        };
        let Some(existing) = existing else {
            self.bind_reference(name, target, LocalKind::Slot, CompileErrorKind::SlotToTemporary);
            return;
        };

        let saved = self.temp_top();
        let register = self.alloc_reg();
        self.reference_to(target, register, CompileErrorKind::SlotToTemporary);
        match existing {
            Resolved::Local { register: slot, .. } => self.emit_move(slot, register),
            Resolved::Upvalue { slot, .. } => {
                self.emit_abc(OpCode::SetUpval, register, slot, 0);
            }
            Resolved::Global { slot, .. } => {
                self.emit_abx(OpCode::SetGlobal, register, slot);
            }
            _ => {}
        }
        self.restore_temps(saved);
    }

    fn function_declaration(&mut self, decl: &Rc<FunctionDecl>) {
        let Some(name) = &decl.name else {
            return;
        };
        if self.at_top_level() {
            let symbol = self.overloads.symbol(&name.name, decl.arity());
            let slot = match self.globals.get(&symbol) {
                Some(global) => global.slot,
                None => self.global_slot(&symbol),
            };
            let function = self.function(decl, Some(&name.name));
            let index = self.make_constant(Value::object(function));
            self.set_line(name.span);
            let register = self.alloc_reg();
            self.emit_abx(OpCode::Closure, register, index);
            self.emit_abx(OpCode::DefineGlobal, register, slot);
        } else {
            let symbol = mangle(&name.name, decl.arity());
            let register = self.state().scopes.resolve(&symbol).map(|l| l.register);
            let function = self.function(decl, Some(&name.name));
            let index = self.make_constant(Value::object(function));
            self.set_line(name.span);
            match register {
                Some(register) => {
                    self.emit_abx(OpCode::Closure, register, index);
                }
                None => {
                    // Hoisting failed and already reported
                    let register = self.alloc_reg();
                    self.emit_abx(OpCode::Closure, register, index);
                }
            }
        }
    }

    // ===== Loops =====

    fn push_loop(&mut self, start: Option<usize>) {
        let depth = self.state().scopes.depth();
        self.state_mut().loops.push(LoopState {
            start,
            depth,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// Close the innermost loop: breaks jump here, pending continues to
    /// `continue_target`
    fn pop_loop(&mut self, continue_target: usize) {
        let Some(state) = self.state_mut().loops.pop() else {
            return;
        };
        for jump in state.continues {
            self.patch_jump_to(jump, continue_target);
        }
        for jump in state.breaks {
            self.patch_jump(jump);
        }
    }

    fn for_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) {
        self.begin_scope();
        if let Some(init) = init {
            self.statement(init, false);
        }
        let start = self.current_offset();
        let exit = cond.map(|cond| self.condition_jump(cond));
        self.push_loop(if step.is_some() { None } else { Some(start) });
        self.body(body, false);

        let continue_target = self.current_offset();
        if let Some(step) = step {
            let saved = self.temp_top();
            self.expression_statement(step, false);
            self.restore_temps(saved);
        }
        self.emit_loop(OpCode::Jump, 0, start);
        if let Some(exit) = exit {
            self.patch_jump(exit);
        }
        self.pop_loop(continue_target);
        self.end_scope();
    }

    /// Close upvalues of every local declared inside the innermost loop
    fn close_loop_locals(&mut self, depth: u32) {
        if let Some(register) = self.state().scopes.lowest_register_below(depth) {
            self.emit_abc(OpCode::CloseUpvals, register, 0, 0);
        }
    }

    fn break_statement(&mut self) {
        let Some(depth) = self.state().loops.last().map(|l| l.depth) else {
            self.error(CompileErrorKind::BreakOutsideLoop);
            return;
        };
        self.close_loop_locals(depth);
        let jump = self.emit_jump(OpCode::Jump, 0);
        if let Some(innermost) = self.state_mut().loops.last_mut() {
            innermost.breaks.push(jump);
        }
    }

    fn continue_statement(&mut self) {
        let Some((depth, start)) = self.state().loops.last().map(|l| (l.depth, l.start)) else {
            self.error(CompileErrorKind::ContinueOutsideLoop);
            return;
        };
        self.close_loop_locals(depth);
        match start {
            Some(start) => self.emit_loop(OpCode::Jump, 0, start),
            None => {
                let jump = self.emit_jump(OpCode::Jump, 0);
                if let Some(innermost) = self.state_mut().loops.last_mut() {
                    innermost.continues.push(jump);
                }
            }
        }
    }

    // ===== Goto =====

    fn goto(&mut self, label: &Ident) {
        let backward = {
            let state = self.state();
            state.labels.backward(&label.name, &state.scopes)
        };
        match backward {
            Some(Ok(target)) => {
                if let Some(register) = target.close_from {
                    self.emit_abc(OpCode::CloseUpvals, register, 0, 0);
                }
                self.emit_loop(OpCode::Jump, 0, target.target);
            }
            Some(Err(kind)) => self.error(kind),
            None => {
                // Becomes CLOSE_UPVALS once the label shows which scopes the
                // jump leaves
                let cleanup = self.emit_abc(OpCode::Nop, 0, 0, 0);
                let jump = self.emit_jump(OpCode::Jump, 0);
                let line = self.line;
                let state = self.state_mut();
                state
                    .labels
                    .add_pending(&label.name, cleanup, jump, line, &state.scopes);
            }
        }
    }

    fn label(&mut self, label: &Ident) {
        let offset = self.current_offset();
        let resolved = {
            let state = self.state_mut();
            state.labels.define(&label.name, offset, &state.scopes)
        };
        let patches = match resolved {
            Ok(patches) => patches,
            Err(kind) => {
                self.error(kind);
                return;
            }
        };
        for patch in patches {
            match patch {
                Ok(patch) => {
                    if let Some(register) = patch.close_from {
                        let close = Instruction::abc(OpCode::CloseUpvals, register, 0, 0);
                        self.state_mut().chunk.patch(patch.cleanup_offset, close);
                    }
                    self.patch_jump_to(patch.jump_offset, patch.target);
                }
                Err((line, kind)) => self.error_on_line(line, kind),
            }
        }
    }
}
