//! Expression lowering
//!
//! Every expression compiles into a caller-chosen destination register.
//! Operands that are plain locals are read in place; anything else is
//! evaluated into the destination or a fresh temporary.

use crate::ast::{
    BinOp, Expr, ExprKind, ExprQualifier, FunctionDecl, Ident, StructFields, UnaryOp,
};
use crate::bytecode::OpCode;
use crate::object::ObjRef;
use crate::value::Value;

use super::error::CompileErrorKind;
use super::{Compiler, Resolved, TypeDef};

/// Encodings available for a binary operator
#[derive(Debug, Clone, Copy)]
pub(super) struct OpForms {
    pub general: OpCode,
    /// `R[A] = R[A] op sBx`
    pub immediate: Option<OpCode>,
    /// `R[A] = R[B] op literal`
    pub literal: Option<OpCode>,
}

/// Opcodes for `op`, or `None` for the short-circuit operators
pub(super) fn op_forms(op: BinOp) -> Option<OpForms> {
    use OpCode as O;
    let (general, immediate, literal) = match op {
        BinOp::Add => (O::Add, Some(O::AddI), Some(O::AddL)),
        BinOp::Sub => (O::Sub, Some(O::SubI), Some(O::SubL)),
        BinOp::Mul => (O::Mul, Some(O::MulI), Some(O::MulL)),
        BinOp::Div => (O::Div, Some(O::DivI), Some(O::DivL)),
        BinOp::Mod => (O::Mod, Some(O::ModI), Some(O::ModL)),
        BinOp::Eq => (O::Eq, Some(O::EqI), Some(O::EqL)),
        BinOp::Ne => (O::Ne, Some(O::NeI), Some(O::NeL)),
        BinOp::Lt => (O::Lt, Some(O::LtI), Some(O::LtL)),
        BinOp::Le => (O::Le, Some(O::LeI), Some(O::LeL)),
        BinOp::Gt => (O::Gt, Some(O::GtI), Some(O::GtL)),
        BinOp::Ge => (O::Ge, Some(O::GeI), Some(O::GeL)),
        BinOp::BitAnd => (O::BAnd, None, None),
        BinOp::BitOr => (O::BOr, None, None),
        BinOp::BitXor => (O::BXor, None, None),
        BinOp::Shl => (O::Shl, None, None),
        BinOp::Shr => (O::Shr, None, None),
        BinOp::And | BinOp::Or => return None,
    };
    Some(OpForms {
        general,
        immediate,
        literal,
    })
}

/// `n` as a 16-bit immediate, when it is one exactly
pub(super) fn small_int(n: f64) -> Option<i16> {
    if n.fract() != 0.0 || (n == 0.0 && n.is_sign_negative()) {
        return None;
    }
    if n < f64::from(i16::MIN) || n > f64::from(i16::MAX) {
        return None;
    }
    Some(n as i16)
}

fn number_literal(expr: &Expr) -> Option<f64> {
    match expr.kind {
        ExprKind::Number(n) => Some(n),
        _ => None,
    }
}

/// Whether evaluating `expr` can neither write a variable nor run user code
fn is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Number(_)
        | ExprKind::String(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::Ident(_) => true,
        ExprKind::Binary { lhs, rhs, .. } => is_pure(lhs) && is_pure(rhs),
        ExprKind::Unary { operand, .. } => is_pure(operand),
        ExprKind::Index { object, index } => is_pure(object) && is_pure(index),
        ExprKind::Field { object, .. } => is_pure(object),
        _ => false,
    }
}

impl Compiler<'_> {
    /// Compile `expr` into `dst`
    pub(super) fn expr_to(&mut self, expr: &Expr, dst: u8) {
        self.set_line(expr.span);
        match &expr.kind {
            ExprKind::Number(n) => self.load_number(*n, dst),
            ExprKind::String(text) => {
                let index = self.string_constant(text);
                self.emit_abx(OpCode::LoadK, dst, index);
            }
            ExprKind::Bool(true) => {
                self.emit_abc(OpCode::LoadTrue, dst, 0, 0);
            }
            ExprKind::Bool(false) => {
                self.emit_abc(OpCode::LoadFalse, dst, 0, 0);
            }
            ExprKind::Null => {
                self.emit_abc(OpCode::LoadNull, dst, 0, 0);
            }
            ExprKind::Ident(ident) => {
                let resolved = self.resolve_name(&ident.name, None);
                self.load_resolved(&ident.name, resolved, dst);
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, dst),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, dst),
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value, Some(dst)),
            ExprKind::Call { callee, args } => self.call(callee, args, dst, false),
            ExprKind::Index { object, index } => {
                let saved = self.temp_top();
                let object = self.operand(object, dst);
                let index = self.expr_any(index);
                self.emit_abc(OpCode::GetIndex, dst, object, index);
                self.restore_temps(saved);
            }
            ExprKind::Field { object, field } => self.field_get(object, field, dst),
            ExprKind::List(items) => self.list_literal(items, dst),
            ExprKind::Map(entries) => self.map_literal(entries, dst),
            ExprKind::Struct { name, fields } => self.struct_literal(name, fields, dst),
            ExprKind::Qualified { qualifier, expr } => self.qualified(*qualifier, expr, dst),
            ExprKind::Function(decl) => self.closure(decl, dst),
        }
    }

    /// Register holding the value of `expr`. Plain locals are returned in
    /// place and must not be written through the result.
    pub(super) fn expr_any(&mut self, expr: &Expr) -> u8 {
        if let Some(register) = self.plain_local(expr) {
            return register;
        }
        let register = self.alloc_reg();
        self.expr_to(expr, register);
        register
    }

    /// Like [`Self::expr_any`], but evaluates into `scratch` instead of a
    /// new temporary
    fn operand(&mut self, expr: &Expr, scratch: u8) -> u8 {
        if let Some(register) = self.plain_local(expr) {
            return register;
        }
        self.expr_to(expr, scratch);
        scratch
    }

    /// Register of `expr` when it names a plain local of this function
    pub(super) fn plain_local(&self, expr: &Expr) -> Option<u8> {
        let ExprKind::Ident(ident) = &expr.kind else {
            return None;
        };
        self.state()
            .scopes
            .resolve(&ident.name)
            .filter(|l| !l.info.kind.is_indirect())
            .map(|l| l.register)
    }

    fn load_number(&mut self, n: f64, dst: u8) {
        match small_int(n) {
            Some(imm) => {
                self.emit_asbx(OpCode::LoadI, dst, imm);
            }
            None => self.load_constant(dst, Value::number(n)),
        }
    }

    /// Load a resolved name into `dst`, dereferencing indirect bindings
    pub(super) fn load_resolved(&mut self, name: &str, resolved: Resolved, dst: u8) {
        match resolved {
            Resolved::Local { register, info } => {
                if info.kind.is_indirect() {
                    self.emit_abc(OpCode::Deref, dst, register, 0);
                } else {
                    self.emit_move(dst, register);
                }
            }
            Resolved::Upvalue { slot, info } => {
                self.emit_abc(OpCode::GetUpval, dst, slot, 0);
                if info.kind.is_indirect() {
                    self.emit_abc(OpCode::Deref, dst, dst, 0);
                }
            }
            Resolved::SelfRef => self.emit_move(dst, 0),
            Resolved::Type(def) => self.load_constant(dst, Value::object(def.schema())),
            Resolved::Global { slot, info } => {
                self.emit_abx(OpCode::GetGlobal, dst, slot);
                if info.kind.is_indirect() {
                    self.emit_abc(OpCode::Deref, dst, dst, 0);
                }
            }
            Resolved::Overloads(candidates) => self.dispatcher(name, &candidates, dst),
        }
    }

    /// Build a dispatcher over every overload of `name`
    fn dispatcher(&mut self, name: &str, candidates: &[Resolved], dst: u8) {
        tracing::trace!(name, overloads = candidates.len(), "dispatcher reference");
        let saved = self.temp_top();
        let mut base = None;
        for candidate in candidates {
            let register = self.alloc_reg();
            base.get_or_insert(register);
            self.load_resolved(name, candidate.clone(), register);
        }
        let count = candidates.len() as u8;
        self.emit_abc(OpCode::MakeDispatcher, dst, base.unwrap_or(dst), count);
        self.restore_temps(saved);
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8) {
        let Some(forms) = op_forms(op) else {
            self.logical(op, lhs, rhs, dst);
            return;
        };
        let saved = self.temp_top();

        if let (Some(literal), Some(immediate), Some(with_literal)) =
            (number_literal(rhs), forms.immediate, forms.literal)
        {
            // A local outside dst is read in place by the literal form
            // rather than moved into dst for the immediate form
            let local = self.plain_local(lhs).filter(|r| *r != dst);
            match (small_int(literal), local) {
                (Some(imm), None) => {
                    self.expr_to(lhs, dst);
                    self.emit_asbx(immediate, dst, imm);
                }
                _ => {
                    let src = match local {
                        Some(register) => register,
                        None => {
                            self.expr_to(lhs, dst);
                            dst
                        }
                    };
                    self.emit_abc(with_literal, dst, src, 0);
                    self.emit_literal(literal);
                }
            }
            self.restore_temps(saved);
            return;
        }

        let left = match self.plain_local(lhs) {
            Some(register) if is_pure(rhs) => register,
            _ => {
                self.expr_to(lhs, dst);
                dst
            }
        };
        let right = self.expr_any(rhs);
        self.emit_abc(forms.general, dst, left, right);
        self.restore_temps(saved);
    }

    /// `and` / `or`, yielding the deciding operand
    fn logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8) {
        self.expr_to(lhs, dst);
        let jump_op = if op == BinOp::And {
            OpCode::JumpIfFalse
        } else {
            OpCode::JumpIfTrue
        };
        let jump = self.emit_jump(jump_op, dst);
        self.expr_to(rhs, dst);
        self.patch_jump(jump);
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, dst: u8) {
        let saved = self.temp_top();
        let src = self.operand(operand, dst);
        let opcode = match op {
            UnaryOp::Neg => OpCode::Neg,
            UnaryOp::Not => OpCode::Not,
            UnaryOp::BitNot => OpCode::BNot,
        };
        self.emit_abc(opcode, dst, src, 0);
        self.restore_temps(saved);
    }

    /// Evaluate a condition and emit a jump taken when it is falsy
    pub(super) fn condition_jump(&mut self, cond: &Expr) -> usize {
        let saved = self.temp_top();
        let register = self.expr_any(cond);
        let jump = self.emit_jump(OpCode::JumpIfFalse, register);
        self.restore_temps(saved);
        jump
    }

    fn closure(&mut self, decl: &FunctionDecl, dst: u8) {
        let name = decl.name.as_ref().map(|n| n.name.clone());
        let function = self.function(decl, name.as_deref());
        let index = self.make_constant(Value::object(function));
        self.emit_abx(OpCode::Closure, dst, index);
    }

    fn qualified(&mut self, qualifier: ExprQualifier, expr: &Expr, dst: u8) {
        match qualifier {
            ExprQualifier::Ref => self.reference_to(expr, dst, CompileErrorKind::RefToTemporary),
            ExprQualifier::Val | ExprQualifier::Clone => {
                let saved = self.temp_top();
                let src = self.operand(expr, dst);
                let op = if qualifier == ExprQualifier::Val {
                    OpCode::CloneValue
                } else {
                    OpCode::DeepClone
                };
                self.emit_abc(op, dst, src, 0);
                self.restore_temps(saved);
            }
        }
    }

    // ===== Fields =====

    /// `Enum.Variant` as a constant, when `object` names an enum type
    fn enum_variant(&mut self, object: &Expr, field: &Ident) -> Option<Value> {
        let ExprKind::Ident(ident) = &object.kind else {
            return None;
        };
        if self.state().scopes.resolve(&ident.name).is_some() {
            return None;
        }
        let TypeDef::Enum(schema) = self.lookup_type(&ident.name)? else {
            return None;
        };
        let variant = self.intern(&field.name);
        let found = self
            .vm
            .heap()
            .as_enum_schema(schema)
            .map(|s| (s.type_id, s.variant_index(variant)));
        match found {
            Some((type_id, Some(index))) => Some(Value::enum_variant(type_id, index)),
            _ => {
                self.set_line(field.span);
                self.error(CompileErrorKind::UndefinedVariant {
                    name: ident.name.clone(),
                    variant: field.name.clone(),
                });
                Some(Value::NULL)
            }
        }
    }

    /// Struct schema known for the value of `expr` at compile time
    pub(super) fn static_struct_type(&mut self, expr: &Expr) -> Option<ObjRef> {
        match &expr.kind {
            ExprKind::Struct { name, .. } => match self.lookup_type(&name.name) {
                Some(TypeDef::Struct(schema)) => Some(schema),
                _ => None,
            },
            ExprKind::Ident(ident) => {
                let resolved = self.resolve_name(&ident.name, None);
                resolved
                    .info()
                    .filter(|info| !info.kind.is_indirect())
                    .and_then(|info| info.struct_type)
            }
            _ => None,
        }
    }

    /// Index of `field` in a struct schema, when it fits an operand
    pub(super) fn schema_field_index(&mut self, schema: ObjRef, field: &str) -> Option<u8> {
        let name = self.intern(field);
        let index = self.vm.heap().as_struct_schema(schema)?.field_index(name)?;
        u8::try_from(index).ok()
    }

    fn field_get(&mut self, object: &Expr, field: &Ident, dst: u8) {
        if let Some(variant) = self.enum_variant(object, field) {
            self.load_constant(dst, variant);
            return;
        }
        let saved = self.temp_top();
        let schema = self.static_struct_type(object);
        let src = self.operand(object, dst);
        let index = schema.and_then(|s| self.schema_field_index(s, &field.name).map(|i| (s, i)));
        match index {
            Some((schema, index)) => {
                let schema_index = self.make_constant(Value::object(schema));
                self.emit_abc(OpCode::GetFieldIdx, dst, src, index);
                self.emit_word(u32::from(schema_index));
            }
            None => {
                let key = self.string_constant(&field.name);
                match u8::try_from(key) {
                    Ok(key) => {
                        self.emit_abc(OpCode::GetField, dst, src, key);
                    }
                    Err(_) => {
                        let key_register = self.alloc_reg();
                        self.emit_abx(OpCode::LoadK, key_register, key);
                        self.emit_abc(OpCode::GetIndex, dst, src, key_register);
                    }
                }
            }
        }
        self.restore_temps(saved);
    }

    // ===== Literals =====

    fn list_literal(&mut self, items: &[Expr], dst: u8) {
        let capacity = u16::try_from(items.len()).unwrap_or(u16::MAX);
        self.emit_abx(OpCode::NewList, dst, capacity);
        for item in items {
            let saved = self.temp_top();
            let register = self.expr_any(item);
            self.emit_abc(OpCode::ListAppend, dst, register, 0);
            self.restore_temps(saved);
        }
    }

    fn map_literal(&mut self, entries: &[(String, Expr)], dst: u8) {
        self.emit_abc(OpCode::NewMap, dst, 0, 0);
        for (key, value) in entries {
            let saved = self.temp_top();
            let register = self.expr_any(value);
            let key = self.string_constant(key);
            match u8::try_from(key) {
                Ok(key) => {
                    self.emit_abc(OpCode::SetField, dst, key, register);
                }
                Err(_) => {
                    let key_register = self.alloc_reg();
                    self.emit_abx(OpCode::LoadK, key_register, key);
                    self.emit_abc(OpCode::SetIndex, dst, key_register, register);
                }
            }
            self.restore_temps(saved);
        }
    }

    fn struct_literal(&mut self, name: &Ident, fields: &StructFields, dst: u8) {
        let Some(TypeDef::Struct(schema)) = self.lookup_type(&name.name) else {
            self.set_line(name.span);
            self.error(CompileErrorKind::UndefinedStruct(name.name.clone()));
            return;
        };
        let field_names: Vec<String> = {
            let heap = self.vm.heap();
            heap.as_struct_schema(schema)
                .map(|s| {
                    s.fields
                        .iter()
                        .map(|f| heap.as_str(*f).unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default()
        };
        let count = field_names.len();

        let saved = self.temp_top();
        let base = if self.is_window_start(dst) {
            dst
        } else {
            self.alloc_reg()
        };
        let last = usize::from(base) + count;
        if last >= usize::from(super::scope::MAX_REGISTER) {
            self.error(CompileErrorKind::TooManyRegisters);
            self.restore_temps(saved);
            return;
        }
        self.reserve_through(last as u8);
        let window_top = self.temp_top();
        let slot = |i: usize| base + 1 + i as u8;

        match fields {
            StructFields::Positional(values) => {
                if values.len() != count {
                    self.error(CompileErrorKind::StructArity {
                        name: name.name.clone(),
                        expected: count,
                        found: values.len(),
                    });
                }
                for (i, value) in values.iter().take(count).enumerate() {
                    self.expr_to(value, slot(i));
                    self.restore_temps(window_top);
                }
                for i in values.len()..count {
                    self.emit_abc(OpCode::LoadNull, slot(i), 0, 0);
                }
            }
            StructFields::Named(values) => {
                let mut initialized = vec![false; count];
                for (field, value) in values {
                    let Some(i) = field_names.iter().position(|f| *f == field.name) else {
                        self.set_line(field.span);
                        self.error(CompileErrorKind::UndefinedField {
                            name: name.name.clone(),
                            field: field.name.clone(),
                        });
                        continue;
                    };
                    if initialized[i] {
                        self.set_line(field.span);
                        self.error(CompileErrorKind::DuplicateField {
                            name: name.name.clone(),
                            field: field.name.clone(),
                        });
                        continue;
                    }
                    initialized[i] = true;
                    self.expr_to(value, slot(i));
                    self.restore_temps(window_top);
                }
                for (i, done) in initialized.iter().enumerate() {
                    if !done {
                        self.emit_abc(OpCode::LoadNull, slot(i), 0, 0);
                    }
                }
            }
        }

        let schema_index = self.make_constant(Value::object(schema));
        self.emit_abx(OpCode::NewStruct, base, schema_index);
        self.restore_temps(saved);
        self.emit_move(dst, base);
    }
}
