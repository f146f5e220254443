//! L-value lowering: references and assignment
//!
//! A reference is created for a local register, an upvalue, a global, a
//! container element or a field. Taking a reference to a binding that
//! already holds one copies that reference instead of nesting it.
//!
//! Assigning to a `ref` or `slot` binding writes through the whole chain
//! (`SET_DEREF`); only a `slot` declaration rebinds the slot itself.

use crate::ast::{BinOp, Expr, ExprKind, ExprQualifier};
use crate::bytecode::OpCode;
use crate::value::Value;

use super::error::CompileErrorKind;
use super::expr::op_forms;
use super::Compiler;
use super::Resolved;

impl Compiler<'_> {
    /// Compile a reference to the location `expr` names into `dst`.
    /// `error` is reported when `expr` is not a location.
    pub(super) fn reference_to(&mut self, expr: &Expr, dst: u8, error: CompileErrorKind) {
        self.set_line(expr.span);
        match &expr.kind {
            ExprKind::Ident(ident) => match self.resolve_name(&ident.name, None) {
                Resolved::Local { register, info } => {
                    if info.kind.is_indirect() {
                        self.emit_move(dst, register);
                    } else {
                        self.state_mut().scopes.mark_captured(register);
                        self.emit_abc(OpCode::RefLocal, dst, register, 0);
                    }
                }
                Resolved::Upvalue { slot, info } => {
                    let op = if info.kind.is_indirect() {
                        OpCode::GetUpval
                    } else {
                        OpCode::RefUpval
                    };
                    self.emit_abc(op, dst, slot, 0);
                }
                Resolved::Global { slot, info } => {
                    let op = if info.kind.is_indirect() {
                        OpCode::GetGlobal
                    } else {
                        OpCode::RefGlobal
                    };
                    self.emit_abx(op, dst, slot);
                }
                Resolved::Overloads(_) => {
                    self.error(CompileErrorKind::AmbiguousOverload(ident.name.clone()));
                }
                Resolved::SelfRef | Resolved::Type(_) => self.error(error),
            },
            ExprKind::Index { object, index } => {
                let saved = self.temp_top();
                let object = self.expr_any(object);
                let index = self.expr_any(index);
                self.emit_abc(OpCode::RefIndex, dst, object, index);
                self.restore_temps(saved);
            }
            ExprKind::Field { object, field } => {
                let saved = self.temp_top();
                let object = self.expr_any(object);
                let key = self.string_constant(&field.name);
                match u8::try_from(key) {
                    Ok(key) => {
                        self.emit_abc(OpCode::RefField, dst, object, key);
                    }
                    Err(_) => {
                        let key_register = self.alloc_reg();
                        self.emit_abx(OpCode::LoadK, key_register, key);
                        self.emit_abc(OpCode::RefIndex, dst, object, key_register);
                    }
                }
                self.restore_temps(saved);
            }
            ExprKind::Qualified {
                qualifier: ExprQualifier::Ref,
                expr,
            } => self.reference_to(expr, dst, error),
            _ => self.error(error),
        }
    }

    /// Compile `target = value` (or `target op= value`). The assigned value
    /// ends up in `dst` when one is given.
    pub(super) fn assign(
        &mut self,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
        dst: Option<u8>,
    ) {
        match &target.kind {
            ExprKind::Ident(ident) => {
                let combined;
                let value = match op {
                    Some(op) => {
                        combined = Expr::new(
                            ExprKind::Binary {
                                op,
                                lhs: Box::new(target.clone()),
                                rhs: Box::new(value.clone()),
                            },
                            value.span,
                        );
                        &combined
                    }
                    None => value,
                };
                self.assign_name(&ident.name, value, dst);
            }
            ExprKind::Index { object, index } => {
                let saved = self.temp_top();
                let object = self.expr_any(object);
                let index = self.expr_any(index);
                let result = self.compound_value(op, value, dst, |c, scratch| {
                    c.emit_abc(OpCode::GetIndex, scratch, object, index);
                });
                self.emit_abc(OpCode::SetIndex, object, index, result);
                self.restore_temps(saved);
                self.finish_assignment(result, dst);
            }
            ExprKind::Field { object, field } => {
                let saved = self.temp_top();
                let schema = self.static_struct_type(object);
                let object = self.expr_any(object);
                let indexed =
                    schema.and_then(|s| self.schema_field_index(s, &field.name).map(|i| (s, i)));
                match indexed {
                    Some((schema, index)) => {
                        let schema_index = self.make_constant(Value::object(schema));
                        let result = self.compound_value(op, value, dst, |c, scratch| {
                            c.emit_abc(OpCode::GetFieldIdx, scratch, object, index);
                            c.emit_word(u32::from(schema_index));
                        });
                        self.emit_abc(OpCode::SetFieldIdx, object, index, result);
                        self.emit_word(u32::from(schema_index));
                        self.restore_temps(saved);
                        self.finish_assignment(result, dst);
                    }
                    None => {
                        let key = self.string_constant(&field.name);
                        if let Ok(key) = u8::try_from(key) {
                            let result = self.compound_value(op, value, dst, |c, scratch| {
                                c.emit_abc(OpCode::GetField, scratch, object, key);
                            });
                            self.emit_abc(OpCode::SetField, object, key, result);
                            self.restore_temps(saved);
                            self.finish_assignment(result, dst);
                        } else {
                            let key_register = self.alloc_reg();
                            self.emit_abx(OpCode::LoadK, key_register, key);
                            let result = self.compound_value(op, value, dst, |c, scratch| {
                                c.emit_abc(OpCode::GetIndex, scratch, object, key_register);
                            });
                            self.emit_abc(OpCode::SetIndex, object, key_register, result);
                            self.restore_temps(saved);
                            self.finish_assignment(result, dst);
                        }
                    }
                }
            }
            // The parser only produces assignable targets
            _ => self.error(CompileErrorKind::RefToTemporary),
        }
    }

    /// Value to store for an element or field assignment. For compound
    /// assignment `load` reads the current value into the given register.
    fn compound_value(
        &mut self,
        op: Option<BinOp>,
        value: &Expr,
        dst: Option<u8>,
        load: impl FnOnce(&mut Self, u8),
    ) -> u8 {
        let Some(op) = op else {
            return match dst {
                Some(dst) if !self.state().scopes.is_local_register(dst) => {
                    self.expr_to(value, dst);
                    dst
                }
                _ => self.expr_any(value),
            };
        };
        let current = self.alloc_reg();
        load(self, current);
        let rhs = self.expr_any(value);
        let general = op_forms(op).map_or(OpCode::Add, |f| f.general);
        self.emit_abc(general, current, current, rhs);
        current
    }

    fn finish_assignment(&mut self, result: u8, dst: Option<u8>) {
        if let Some(dst) = dst {
            self.emit_move(dst, result);
        }
    }

    fn assign_name(&mut self, name: &str, value: &Expr, dst: Option<u8>) {
        match self.resolve_name(name, None) {
            Resolved::Local { register, info } if !info.kind.is_indirect() => {
                let in_place = !value.contains_call()
                    && (!value.mentions(name) || Self::is_self_update(name, value));
                if in_place {
                    self.expr_to(value, register);
                    if let Some(dst) = dst {
                        self.emit_move(dst, register);
                    }
                } else {
                    let saved = self.temp_top();
                    let result = match dst {
                        Some(dst) => dst,
                        None => self.alloc_reg(),
                    };
                    self.expr_to(value, result);
                    self.emit_move(register, result);
                    self.restore_temps(saved);
                }
            }
            Resolved::Local { register, .. } => {
                let saved = self.temp_top();
                let result = self.value_register(value, dst);
                self.emit_abc(OpCode::SetDeref, register, result, 0);
                self.restore_temps(saved);
            }
            Resolved::Upvalue { slot, info } => {
                let saved = self.temp_top();
                let result = self.value_register(value, dst);
                if info.kind.is_indirect() {
                    let cell = self.alloc_reg();
                    self.emit_abc(OpCode::GetUpval, cell, slot, 0);
                    self.emit_abc(OpCode::SetDeref, cell, result, 0);
                } else {
                    self.emit_abc(OpCode::SetUpval, result, slot, 0);
                }
                self.restore_temps(saved);
            }
            Resolved::Global { slot, info } => {
                let saved = self.temp_top();
                let result = self.value_register(value, dst);
                if info.kind.is_indirect() {
                    let cell = self.alloc_reg();
                    self.emit_abx(OpCode::GetGlobal, cell, slot);
                    self.emit_abc(OpCode::SetDeref, cell, result, 0);
                } else {
                    self.emit_abx(OpCode::SetGlobal, result, slot);
                }
                self.restore_temps(saved);
            }
            Resolved::Overloads(_) => {
                self.error(CompileErrorKind::AmbiguousOverload(name.to_string()));
            }
            Resolved::Type(_) | Resolved::SelfRef => {
                self.error(CompileErrorKind::AssignToType(name.to_string()));
            }
        }
    }

    /// `name = name op e` where `e` does not read `name`
    fn is_self_update(name: &str, value: &Expr) -> bool {
        match &value.kind {
            ExprKind::Binary { op, lhs, rhs } => {
                op_forms(*op).is_some()
                    && matches!(&lhs.kind, ExprKind::Ident(i) if i.name == name)
                    && !rhs.mentions(name)
            }
            _ => false,
        }
    }

    /// Evaluate `value` into `dst` when given, else anywhere
    fn value_register(&mut self, value: &Expr, dst: Option<u8>) -> u8 {
        match dst {
            Some(dst) => {
                self.expr_to(value, dst);
                dst
            }
            None => self.expr_any(value),
        }
    }
}
