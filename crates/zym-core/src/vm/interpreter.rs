//! Instruction dispatch loop

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::Ordering;

use crate::bytecode::{literal_from_words, Instruction, OpCode};
use crate::error::{fatal, FatalError};
use crate::object::{Dispatcher, List, Map, Obj, ObjRef, StructInstance, MAX_DISPATCH_CANDIDATES};
use crate::value::Value;

use super::{CallFrame, ExecutionState, OpResult, RuntimeErrorKind, RuntimeResult, Vm};

/// What the loop does after an instruction
pub(super) enum Flow {
    Continue,
    /// The outermost frame returned
    Done(Value),
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Arith {
    fn of(op: OpCode) -> Self {
        match op {
            OpCode::Sub | OpCode::SubI | OpCode::SubL => Arith::Sub,
            OpCode::Mul | OpCode::MulI | OpCode::MulL => Arith::Mul,
            OpCode::Div | OpCode::DivI | OpCode::DivL => Arith::Div,
            OpCode::Mod | OpCode::ModI | OpCode::ModL => Arith::Mod,
            _ => Arith::Add,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    fn of(op: OpCode) -> Self {
        match op {
            OpCode::Ne | OpCode::NeI | OpCode::NeL => Compare::Ne,
            OpCode::Lt | OpCode::LtI | OpCode::LtL => Compare::Lt,
            OpCode::Le | OpCode::LeI | OpCode::LeL => Compare::Le,
            OpCode::Gt | OpCode::GtI | OpCode::GtL => Compare::Gt,
            OpCode::Ge | OpCode::GeI | OpCode::GeL => Compare::Ge,
            _ => Compare::Eq,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Compare::Eq => "==",
            Compare::Ne => "!=",
            Compare::Lt => "<",
            Compare::Le => "<=",
            Compare::Gt => ">",
            Compare::Ge => ">=",
        }
    }
}

/// Equality as the language sees it: numbers by value, everything else by
/// identity. Strings are interned, so identity is content equality.
pub(super) fn values_equal(lhs: Value, rhs: Value) -> bool {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => lhs == rhs,
    }
}

impl Vm {
    /// Run until the program completes, fails, or the budget runs out
    pub(super) fn execute(&mut self, budget: Option<u64>) -> RuntimeResult<ExecutionState> {
        let mut remaining = budget;
        loop {
            if let Some(left) = remaining.as_mut() {
                if *left == 0 || self.preempt.swap(false, Ordering::Relaxed) {
                    tracing::trace!(frames = self.frames.len(), "execution suspended");
                    return Ok(ExecutionState::Suspended);
                }
                *left -= 1;
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done(value)) => return Ok(ExecutionState::Completed(value)),
                Err(kind) => {
                    let error = self.runtime_error(kind);
                    tracing::debug!(
                        error = %error.kind,
                        frames = self.frames.len(),
                        "runtime error"
                    );
                    self.reset();
                    return Err(error);
                }
            }
        }
    }

    // ===== Frame access =====

    pub(super) fn frame(&self) -> &CallFrame {
        match self.frames.last() {
            Some(frame) => frame,
            None => fatal(FatalError::Internal("no active frame".into())),
        }
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => fatal(FatalError::Internal("no active frame".into())),
        }
    }

    #[inline]
    pub(super) fn reg(&self, register: u8) -> Value {
        self.stack[self.frame().base + usize::from(register)]
    }

    #[inline]
    pub(super) fn set_reg(&mut self, register: u8, value: Value) {
        let slot = self.frame().base + usize::from(register);
        self.stack[slot] = value;
    }

    pub(super) fn constant(&self, index: u16) -> OpResult<Value> {
        self.frame()
            .chunk
            .get_constant(index)
            .ok_or_else(|| RuntimeErrorKind::Internal(format!("bad constant index {index}")))
    }

    fn read_word(&mut self) -> OpResult<u32> {
        let frame = self.frame_mut();
        let word = frame
            .chunk
            .word(frame.ip)
            .ok_or_else(|| RuntimeErrorKind::Internal("unexpected end of bytecode".into()))?;
        frame.ip += 1;
        Ok(word)
    }

    fn read_literal(&mut self) -> OpResult<f64> {
        let low = self.read_word()?;
        let high = self.read_word()?;
        Ok(literal_from_words(low, high))
    }

    fn jump(&mut self, offset: i16) {
        let frame = self.frame_mut();
        frame.ip = frame.ip.wrapping_add_signed(isize::from(offset));
    }

    // ===== Dispatch =====

    fn step(&mut self) -> OpResult<Flow> {
        let instruction = Instruction::from_bits(self.read_word()?);
        let op = instruction
            .opcode()
            .map_err(RuntimeErrorKind::InvalidOpcode)?;
        self.stats.instructions += 1;
        let a = instruction.a();
        let b = instruction.b();
        let c = instruction.c();

        match op {
            OpCode::Move => self.set_reg(a, self.reg(b)),
            OpCode::LoadK => {
                let value = self.constant(instruction.bx())?;
                self.set_reg(a, value);
            }
            OpCode::LoadI => self.set_reg(a, Value::number(f64::from(instruction.sbx()))),
            OpCode::LoadNull => self.set_reg(a, Value::NULL),
            OpCode::LoadTrue => self.set_reg(a, Value::TRUE),
            OpCode::LoadFalse => self.set_reg(a, Value::FALSE),

            OpCode::GetGlobal => {
                let slot = instruction.bx();
                match self.globals.values.get(usize::from(slot)).copied().flatten() {
                    Some(value) => self.set_reg(a, value),
                    None => {
                        return Err(RuntimeErrorKind::UndefinedVariable(self.global_name(slot)))
                    }
                }
            }
            OpCode::SetGlobal => {
                let slot = usize::from(instruction.bx());
                let value = self.reg(a);
                match self.globals.values.get_mut(slot) {
                    Some(Some(current)) => *current = value,
                    _ => {
                        return Err(RuntimeErrorKind::UndefinedVariable(
                            self.global_name(instruction.bx()),
                        ))
                    }
                }
            }
            OpCode::DefineGlobal => {
                let slot = usize::from(instruction.bx());
                let value = self.reg(a);
                match self.globals.values.get_mut(slot) {
                    Some(entry) => *entry = Some(value),
                    None => {
                        return Err(RuntimeErrorKind::Internal(format!(
                            "global slot {slot} was never assigned"
                        )))
                    }
                }
            }

            OpCode::GetUpval => {
                let value = self.upvalue_get(b)?;
                self.set_reg(a, value);
            }
            OpCode::SetUpval => self.upvalue_set(b, self.reg(a))?,
            OpCode::CloseUpvals => {
                let from = self.frame().base + usize::from(a);
                self.close_upvalues(from);
            }
            OpCode::Closure => self.make_closure(a, instruction.bx())?,

            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                let value = self.arith(Arith::of(op), self.reg(b), self.reg(c))?;
                self.set_reg(a, value);
            }
            OpCode::AddI | OpCode::SubI | OpCode::MulI | OpCode::DivI | OpCode::ModI => {
                let rhs = Value::number(f64::from(instruction.sbx()));
                let value = self.arith(Arith::of(op), self.reg(a), rhs)?;
                self.set_reg(a, value);
            }
            OpCode::AddL | OpCode::SubL | OpCode::MulL | OpCode::DivL | OpCode::ModL => {
                let rhs = Value::number(self.read_literal()?);
                let value = self.arith(Arith::of(op), self.reg(b), rhs)?;
                self.set_reg(a, value);
            }

            OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                let result = self.compare(Compare::of(op), self.reg(b), self.reg(c))?;
                self.set_reg(a, Value::bool(result));
            }
            OpCode::EqI | OpCode::NeI | OpCode::LtI | OpCode::LeI | OpCode::GtI | OpCode::GeI => {
                let rhs = Value::number(f64::from(instruction.sbx()));
                let result = self.compare(Compare::of(op), self.reg(a), rhs)?;
                self.set_reg(a, Value::bool(result));
            }
            OpCode::EqL | OpCode::NeL | OpCode::LtL | OpCode::LeL | OpCode::GtL | OpCode::GeL => {
                let rhs = Value::number(self.read_literal()?);
                let result = self.compare(Compare::of(op), self.reg(b), rhs)?;
                self.set_reg(a, Value::bool(result));
            }

            OpCode::BAnd | OpCode::BOr | OpCode::BXor | OpCode::Shl | OpCode::Shr => {
                let value = self.bitwise(op, self.reg(b), self.reg(c))?;
                self.set_reg(a, value);
            }
            OpCode::Neg => {
                let operand = self.reg(b);
                let Some(n) = operand.as_number() else {
                    return Err(self.type_error("number", operand, "unary -"));
                };
                self.set_reg(a, Value::number(-n));
            }
            OpCode::Not => self.set_reg(a, Value::bool(!self.reg(b).is_truthy())),
            OpCode::BNot => {
                let n = self.integer(self.reg(b), "~")?;
                self.set_reg(a, Value::number(!n as f64));
            }

            OpCode::Jump => self.jump(instruction.sbx()),
            OpCode::JumpIfFalse => {
                if !self.reg(a).is_truthy() {
                    self.jump(instruction.sbx());
                }
            }
            OpCode::JumpIfTrue => {
                if self.reg(a).is_truthy() {
                    self.jump(instruction.sbx());
                }
            }

            OpCode::Call => {
                let slot = self.frame().base + usize::from(a);
                self.call_value(slot, b)?;
            }
            OpCode::TailCall => self.tail_call(a, b, false)?,
            OpCode::SmartTailCall => self.tail_call(a, b, true)?,
            OpCode::Return => return Ok(self.return_from_frame(self.reg(a))),
            OpCode::ReturnNull => return Ok(self.return_from_frame(Value::NULL)),

            OpCode::NewList => {
                let list = self.alloc(Obj::List(List {
                    items: Vec::with_capacity(usize::from(instruction.bx())),
                }));
                self.set_reg(a, Value::object(list));
            }
            OpCode::ListAppend => {
                let target = self.reg(a);
                let item = self.reg(b);
                let list = target
                    .as_object()
                    .filter(|r| self.heap.as_list(*r).is_some())
                    .ok_or_else(|| self.type_error("list", target, "append"))?;
                if let Some(l) = self.heap.as_list_mut(list) {
                    l.items.push(item);
                }
                self.heap.refresh_size(list);
            }
            OpCode::NewMap => {
                let map = self.alloc(Obj::Map(Map::default()));
                self.set_reg(a, Value::object(map));
            }
            OpCode::GetIndex => {
                let value = self.index_get(self.reg(b), self.reg(c))?;
                self.set_reg(a, value);
            }
            OpCode::SetIndex => self.index_set(self.reg(a), self.reg(b), self.reg(c))?,
            OpCode::GetField => {
                let key = self.constant_key(u16::from(c))?;
                let value = self.field_get(self.reg(b), key)?;
                self.set_reg(a, value);
            }
            OpCode::SetField => {
                let key = self.constant_key(u16::from(b))?;
                self.field_set(self.reg(a), key, self.reg(c))?;
            }
            OpCode::GetFieldIdx => {
                let schema = self.constant_schema()?;
                let value = self.field_get_indexed(self.reg(b), c, schema)?;
                self.set_reg(a, value);
            }
            OpCode::SetFieldIdx => {
                let schema = self.constant_schema()?;
                self.field_set_indexed(self.reg(a), b, schema, self.reg(c))?;
            }
            OpCode::NewStruct => self.new_struct(a, instruction.bx())?,

            OpCode::RefLocal => {
                let value = self.ref_local(b);
                self.set_reg(a, value);
            }
            OpCode::RefUpval => {
                let value = self.ref_upvalue(b)?;
                self.set_reg(a, value);
            }
            OpCode::RefGlobal => {
                let value = self.ref_global(instruction.bx());
                self.set_reg(a, value);
            }
            OpCode::RefIndex => {
                let value = self.ref_index(self.reg(b), self.reg(c))?;
                self.set_reg(a, value);
            }
            OpCode::RefField => {
                let key = self.constant_key(u16::from(c))?;
                let value = self.ref_field(self.reg(b), key)?;
                self.set_reg(a, value);
            }
            OpCode::Deref => {
                let value = self.deref(self.reg(b))?;
                self.set_reg(a, value);
            }
            OpCode::SetDeref => self.set_deref(a, self.reg(b))?,

            OpCode::CloneValue => {
                let value = self.shallow_clone(self.reg(b));
                self.set_reg(a, value);
            }
            OpCode::DeepClone => {
                let value = self.deep_clone(self.reg(b));
                self.set_reg(a, value);
            }
            OpCode::MakeDispatcher => self.make_dispatcher(a, b, c)?,

            OpCode::Nop => {}
        }
        Ok(Flow::Continue)
    }

    // ===== Operand helpers =====

    pub(super) fn type_error(
        &self,
        expected: &'static str,
        got: Value,
        operation: &'static str,
    ) -> RuntimeErrorKind {
        RuntimeErrorKind::TypeError {
            expected,
            got: self.heap.type_name(got),
            operation,
        }
    }

    /// Interned string constant used as a field key
    fn constant_key(&self, index: u16) -> OpResult<ObjRef> {
        self.constant(index)?
            .as_object()
            .filter(|r| self.heap.as_str(*r).is_some())
            .ok_or_else(|| RuntimeErrorKind::Internal("field name is not a string".into()))
    }

    /// Schema constant named by the extension word of a field instruction
    fn constant_schema(&mut self) -> OpResult<ObjRef> {
        let word = self.read_word()?;
        let index = u16::try_from(word)
            .map_err(|_| RuntimeErrorKind::Internal("schema index out of range".into()))?;
        self.constant(index)?
            .as_object()
            .filter(|r| self.heap.as_struct_schema(*r).is_some())
            .ok_or_else(|| RuntimeErrorKind::Internal("expected a struct schema".into()))
    }

    fn integer(&self, value: Value, operation: &'static str) -> OpResult<i64> {
        match value.as_number() {
            Some(n) => Ok(n as i64),
            None => Err(self.type_error("number", value, operation)),
        }
    }

    // ===== Operators =====

    fn arith(&mut self, op: Arith, lhs: Value, rhs: Value) -> OpResult<Value> {
        if let (Some(x), Some(y)) = (lhs.as_number(), rhs.as_number()) {
            let result = match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
                Arith::Div | Arith::Mod if y == 0.0 => {
                    return Err(RuntimeErrorKind::DivisionByZero)
                }
                Arith::Div => x / y,
                Arith::Mod => x % y,
            };
            return Ok(Value::number(result));
        }
        let is_string = |v: Value| self.heap.value_as_str(v).is_some();
        if matches!(op, Arith::Add) && (is_string(lhs) || is_string(rhs)) {
            let text = format!("{}{}", self.format_value(lhs), self.format_value(rhs));
            return Ok(Value::object(self.intern(&text)));
        }
        let offender = if lhs.is_double() { rhs } else { lhs };
        Err(self.type_error("number", offender, op.symbol()))
    }

    fn compare(&self, op: Compare, lhs: Value, rhs: Value) -> OpResult<bool> {
        let ordering = match op {
            Compare::Eq => return Ok(values_equal(lhs, rhs)),
            Compare::Ne => return Ok(!values_equal(lhs, rhs)),
            _ => self.order(op, lhs, rhs)?,
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            Compare::Lt => ordering == CmpOrdering::Less,
            Compare::Le => ordering != CmpOrdering::Greater,
            Compare::Gt => ordering == CmpOrdering::Greater,
            _ => ordering != CmpOrdering::Less,
        })
    }

    /// Ordering of two numbers or two strings; `None` when a NaN is involved
    fn order(&self, op: Compare, lhs: Value, rhs: Value) -> OpResult<Option<CmpOrdering>> {
        if let (Some(x), Some(y)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(x.partial_cmp(&y));
        }
        if let (Some(x), Some(y)) = (self.heap.value_as_str(lhs), self.heap.value_as_str(rhs)) {
            return Ok(Some(x.cmp(y)));
        }
        let offender = if lhs.is_double() || self.heap.value_as_str(lhs).is_some() {
            rhs
        } else {
            lhs
        };
        Err(self.type_error("number or string", offender, op.symbol()))
    }

    fn bitwise(&self, op: OpCode, lhs: Value, rhs: Value) -> OpResult<Value> {
        let symbol = match op {
            OpCode::BAnd => "&",
            OpCode::BOr => "|",
            OpCode::BXor => "^",
            OpCode::Shl => "<<",
            _ => ">>",
        };
        let x = self.integer(lhs, symbol)?;
        let y = self.integer(rhs, symbol)?;
        let result = match op {
            OpCode::BAnd => x & y,
            OpCode::BOr => x | y,
            OpCode::BXor => x ^ y,
            OpCode::Shl => x.wrapping_shl((y & 63) as u32),
            _ => x.wrapping_shr((y & 63) as u32),
        };
        Ok(Value::number(result as f64))
    }

    // ===== Aggregates =====

    fn new_struct(&mut self, a: u8, schema_index: u16) -> OpResult<()> {
        let schema = self
            .constant(schema_index)?
            .as_object()
            .filter(|r| self.heap.as_struct_schema(*r).is_some())
            .ok_or_else(|| RuntimeErrorKind::Internal("NEWSTRUCT without a schema".into()))?;
        let count = self.heap.as_struct_schema(schema).map_or(0, |s| s.fields.len());
        let first = self.frame().base + usize::from(a) + 1;
        let fields = self.stack[first..first + count].to_vec();
        let instance = self.alloc(Obj::StructInstance(StructInstance { schema, fields }));
        self.set_reg(a, Value::object(instance));
        Ok(())
    }

    fn make_dispatcher(&mut self, a: u8, first: u8, count: u8) -> OpResult<()> {
        if usize::from(count) > MAX_DISPATCH_CANDIDATES {
            return Err(RuntimeErrorKind::Internal("too many overloads".into()));
        }
        let mut candidates = Vec::with_capacity(usize::from(count));
        for register in first..first.saturating_add(count) {
            let value = self.reg(register);
            match value.as_object() {
                Some(r) if self.is_callable(r) => candidates.push(r),
                _ => return Err(self.type_error("function", value, "overload set")),
            }
        }
        let name = match candidates.first() {
            Some(first) => self.callable_name(*first),
            None => None,
        };
        let dispatcher = self.alloc(Obj::Dispatcher(Dispatcher { name, candidates }));
        self.set_reg(a, Value::object(dispatcher));
        Ok(())
    }
}
