//! Call lowering and tail-call selection
//!
//! A call needs the window `[callee, arg0, arg1, ...]` in consecutive
//! registers. The window starts at the destination register when nothing
//! above it is live, which saves the move of the result.
//!
//! In tail position the instruction depends on the active mode:
//!
//! | mode       | self call                  | other call        |
//! |------------|----------------------------|-------------------|
//! | off        | `CALL`                     | `CALL`            |
//! | safe       | `TAIL_CALL` if no captures | `CALL`            |
//! | smart      | `TAIL_CALL` if no captures | `SMART_TAIL_CALL` |
//! | aggressive | `TAIL_CALL`                | `TAIL_CALL`       |
//!
//! Whether a function captures anything is only known once its body is
//! compiled, so self tail calls are recorded and demoted in
//! `finish_function` when needed.
//!
//! No close is emitted here. Arguments may still write through this
//! frame's open cells, and the VM closes them once the window is copied.

use std::rc::Rc;

use crate::ast::{Expr, ExprKind};
use crate::bytecode::OpCode;
use crate::config::TcoMode;
use crate::object::Qualifier;

use super::error::CompileErrorKind;
use super::{Compiler, Resolved};

/// What to turn a recorded self tail call into if the function captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PendingTailCall {
    pub offset: usize,
    pub fallback: OpCode,
}

/// Instruction for a call, and the demotion to record for it
fn select_call(mode: TcoMode, tail: bool, self_call: bool) -> (OpCode, Option<OpCode>) {
    if !tail {
        return (OpCode::Call, None);
    }
    match (mode, self_call) {
        (TcoMode::Off, _) | (TcoMode::Safe, false) => (OpCode::Call, None),
        (TcoMode::Safe, true) => (OpCode::TailCall, Some(OpCode::Call)),
        (TcoMode::Smart, true) => (OpCode::TailCall, Some(OpCode::SmartTailCall)),
        (TcoMode::Smart, false) => (OpCode::SmartTailCall, None),
        (TcoMode::Aggressive, _) => (OpCode::TailCall, None),
    }
}

impl Compiler<'_> {
    /// Compile a call into `dst`. In tail position the call also returns
    /// its result from the current function and `dst` is unused.
    pub(super) fn call(&mut self, callee: &Expr, args: &[Expr], dst: u8, tail: bool) {
        self.set_line(callee.span);
        if args.len() > usize::from(u8::MAX) {
            self.error(CompileErrorKind::TooManyArguments);
            return;
        }
        let argc = args.len() as u8;

        let resolved = match &callee.kind {
            ExprKind::Ident(ident) => Some((
                ident.name.clone(),
                self.resolve_name(&ident.name, Some(args.len())),
            )),
            _ => None,
        };
        let self_call = matches!(resolved, Some((_, Resolved::SelfRef)));
        let signature: Option<Rc<[Qualifier]>> = match &resolved {
            Some((_, Resolved::SelfRef)) => Some(self.state().qualifiers.clone().into()),
            Some((_, r)) => r.info().and_then(|info| info.signature.clone()),
            None => None,
        };

        let (op, fallback) = select_call(self.state().tco, tail, self_call);
        if tail {
            tracing::trace!(
                mode = %self.state().tco,
                self_call,
                op = %op,
                "call in tail position"
            );
        }
        let saved = self.temp_top();
        let base = if !tail && self.is_window_start(dst) {
            dst
        } else {
            self.alloc_reg()
        };
        match resolved {
            Some((name, resolved)) => self.load_resolved(&name, resolved, base),
            None => self.expr_to(callee, base),
        }

        let last = usize::from(base) + args.len();
        if last >= usize::from(super::scope::MAX_REGISTER) {
            self.error(CompileErrorKind::TooManyRegisters);
            self.restore_temps(saved);
            return;
        }
        self.reserve_through(last as u8);
        let window_top = self.temp_top();

        for (i, arg) in args.iter().enumerate() {
            let register = base + 1 + i as u8;
            let qualifier = signature
                .as_ref()
                .and_then(|s| s.get(i).copied())
                .unwrap_or_default();
            if qualifier.needs_lvalue() {
                let function = match &callee.kind {
                    ExprKind::Ident(ident) => ident.name.clone(),
                    _ => "<function>".to_string(),
                };
                let error = CompileErrorKind::QualifiedArgument {
                    function,
                    index: i + 1,
                    qualifier: qualifier.keyword(),
                };
                self.reference_to(arg, register, error);
            } else {
                self.expr_to(arg, register);
            }
            self.restore_temps(window_top);
        }

        self.set_line(callee.span);
        let offset = self.emit_abc(op, base, argc, 0);
        if let Some(fallback) = fallback {
            self.state_mut()
                .safe_tail_calls
                .push(PendingTailCall { offset, fallback });
        }
        if tail {
            self.emit_abc(OpCode::Return, base, 0, 0);
        }
        self.restore_temps(saved);
        if !tail {
            self.emit_move(dst, base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table() {
        use OpCode::{Call, SmartTailCall, TailCall};
        assert_eq!(select_call(TcoMode::Aggressive, false, true), (Call, None));
        assert_eq!(select_call(TcoMode::Off, true, true), (Call, None));
        assert_eq!(select_call(TcoMode::Safe, true, false), (Call, None));
        assert_eq!(select_call(TcoMode::Safe, true, true), (TailCall, Some(Call)));
        assert_eq!(
            select_call(TcoMode::Smart, true, true),
            (TailCall, Some(SmartTailCall))
        );
        assert_eq!(select_call(TcoMode::Smart, true, false), (SmartTailCall, None));
        assert_eq!(select_call(TcoMode::Aggressive, true, false), (TailCall, None));
    }
}
