//! Calls, returns, tail calls and upvalue cells

use std::rc::Rc;

use crate::bytecode::Chunk;
use crate::error::{fatal, FatalError};
use crate::object::{Closure, NativeKind, Obj, ObjRef, Upvalue};
use crate::value::Value;

use super::interpreter::Flow;
use super::{CallFrame, OpResult, RuntimeErrorKind, Vm};

impl Vm {
    /// Call the value in `stack[slot]` with the `argc` values above it.
    /// Closures push a frame; natives run to completion and leave their
    /// result in `stack[slot]`.
    pub(super) fn call_value(&mut self, slot: usize, argc: u8) -> OpResult<()> {
        let callee = self.resolve_callee(slot, argc)?;
        match self.heap.get(callee) {
            Obj::Closure(_) => self.call_closure(callee, slot, argc),
            Obj::Native(native) => {
                let (name, arity, kind) = (native.name, native.arity, native.kind);
                check_native_arity(arity, argc)?;
                match kind {
                    NativeKind::Plain(function) => {
                        let args = self.arguments(slot, argc);
                        let result = function(self, &args)
                            .map_err(|message| RuntimeErrorKind::Native { name, message })?;
                        self.stack[slot] = result;
                        Ok(())
                    }
                    NativeKind::Control(op) => self.control(op, slot, argc),
                }
            }
            Obj::NativeClosure(native) => {
                let (name, arity, function, context) =
                    (native.name, native.arity, native.function, native.context);
                check_native_arity(arity, argc)?;
                let args = self.arguments(slot, argc);
                let result = function(self, context, &args)
                    .map_err(|message| RuntimeErrorKind::Native { name, message })?;
                self.stack[slot] = result;
                Ok(())
            }
            other => Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
    }

    fn arguments(&self, slot: usize, argc: u8) -> Vec<Value> {
        self.stack[slot + 1..=slot + usize::from(argc)].to_vec()
    }

    /// The object that will run for `stack[slot]`. A dispatcher is replaced
    /// in place by the overload taking `argc` arguments.
    fn resolve_callee(&mut self, slot: usize, argc: u8) -> OpResult<ObjRef> {
        let value = self.stack[slot];
        let Some(callee) = value.as_object() else {
            return Err(RuntimeErrorKind::NotCallable(self.heap.type_name(value)));
        };
        let Some(dispatcher) = self.heap.as_dispatcher(callee) else {
            return Ok(callee);
        };
        let chosen = dispatcher
            .candidates
            .iter()
            .copied()
            .find(|candidate| self.accepts(*candidate, argc));
        match chosen {
            Some(chosen) => {
                self.stack[slot] = Value::object(chosen);
                Ok(chosen)
            }
            None => {
                let name = dispatcher
                    .name
                    .and_then(|n| self.heap.as_str(n))
                    .unwrap_or("<anonymous>")
                    .to_string();
                Err(RuntimeErrorKind::NoMatchingOverload { name, arity: argc })
            }
        }
    }

    fn accepts(&self, callee: ObjRef, argc: u8) -> bool {
        match self.heap.get(callee) {
            Obj::Closure(closure) => self
                .heap
                .as_function(closure.function)
                .is_some_and(|f| f.arity == argc),
            Obj::Native(native) => native.arity.map_or(true, |a| a == argc),
            Obj::NativeClosure(native) => native.arity.map_or(true, |a| a == argc),
            _ => false,
        }
    }

    pub(super) fn is_callable(&self, callee: ObjRef) -> bool {
        matches!(
            self.heap.get(callee),
            Obj::Closure(_) | Obj::Native(_) | Obj::NativeClosure(_)
        )
    }

    /// Declared name of a closure, used to label dispatchers
    pub(super) fn callable_name(&self, callee: ObjRef) -> Option<ObjRef> {
        let closure = self.heap.as_closure(callee)?;
        self.heap.as_function(closure.function)?.name
    }

    /// Arity, frame size and code of a closure
    fn closure_layout(&self, closure: ObjRef, argc: u8) -> OpResult<(usize, Rc<Chunk>)> {
        let function = self
            .heap
            .as_closure(closure)
            .and_then(|c| self.heap.as_function(c.function))
            .ok_or_else(|| RuntimeErrorKind::Internal("closure without a function".into()))?;
        if function.arity != argc {
            return Err(RuntimeErrorKind::ArityMismatch {
                expected: function.arity,
                got: argc,
            });
        }
        let registers = usize::from(function.max_registers).max(usize::from(argc) + 1);
        Ok((registers, Rc::clone(&function.chunk)))
    }

    fn call_closure(&mut self, closure: ObjRef, slot: usize, argc: u8) -> OpResult<()> {
        let (registers, chunk) = self.closure_layout(closure, argc)?;
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        let top = slot + registers;
        if self.stack.len() < top {
            self.stack.resize(top, Value::NULL);
        }
        for register in &mut self.stack[slot + 1 + usize::from(argc)..top] {
            *register = Value::NULL;
        }
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: slot,
            registers,
        });
        self.stats.calls += 1;
        self.stats.max_frame_depth = self.stats.max_frame_depth.max(self.frames.len());
        Ok(())
    }

    /// Replace the running frame with a call to `R[a]`. When the callee
    /// cannot reuse the frame this is an ordinary call, and the `RETURN`
    /// that follows hands its result back.
    pub(super) fn tail_call(&mut self, a: u8, argc: u8, smart: bool) -> OpResult<()> {
        let base = self.frame().base;
        let slot = base + usize::from(a);
        let callee = self.resolve_callee(slot, argc)?;
        let reusable = self
            .heap
            .as_closure(callee)
            .is_some_and(|c| !smart || c.upvalues.is_empty());
        if !reusable {
            return self.call_value(slot, argc);
        }

        let (registers, chunk) = self.closure_layout(callee, argc)?;
        let window = self.stack[slot..=slot + usize::from(argc)].to_vec();
        self.close_upvalues(base);
        self.stack.truncate(base);
        self.stack.extend_from_slice(&window);
        self.stack.resize(base + registers, Value::NULL);

        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => fatal(FatalError::Internal("tail call without a frame".into())),
        };
        frame.closure = callee;
        frame.chunk = chunk;
        frame.ip = 0;
        frame.registers = registers;
        self.stats.tail_calls += 1;
        Ok(())
    }

    /// Pop the running frame and deliver `value` to its caller
    pub(super) fn return_from_frame(&mut self, value: Value) -> Flow {
        let Some(frame) = self.frames.pop() else {
            fatal(FatalError::Internal("return without a frame".into()));
        };
        self.close_upvalues(frame.base);
        let depth = self.frames.len();
        while self.prompts.last().is_some_and(|p| p.frame_depth >= depth) {
            self.prompts.pop();
        }

        let Some(caller) = self.frames.last() else {
            self.stack.clear();
            return Flow::Done(value);
        };
        let top = caller.top();
        self.stack[frame.base] = value;
        self.stack.resize(top, Value::NULL);
        Flow::Continue
    }

    // ===== Upvalues =====

    /// Close every open upvalue aliasing a slot at or above `from`
    pub(super) fn close_upvalues(&mut self, from: usize) {
        let closing = self.open_upvalues.split_off(&from);
        for (slot, cell) in closing {
            let value = self.stack.get(slot).copied().unwrap_or(Value::NULL);
            if let Some(upvalue) = self.heap.as_upvalue_mut(cell) {
                *upvalue = Upvalue::Closed(value);
            }
        }
    }

    /// The open cell aliasing `slot`, created on first capture
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        if let Some(cell) = self.open_upvalues.get(&slot) {
            return *cell;
        }
        let cell = self.alloc(Obj::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(slot, cell);
        cell
    }

    pub(super) fn read_cell(&self, cell: ObjRef) -> Value {
        match self.heap.as_upvalue(cell) {
            Some(Upvalue::Open(slot)) => self.stack.get(*slot).copied().unwrap_or(Value::NULL),
            Some(Upvalue::Closed(value)) => *value,
            None => Value::NULL,
        }
    }

    pub(super) fn write_cell(&mut self, cell: ObjRef, value: Value) {
        match self.heap.as_upvalue_mut(cell) {
            Some(Upvalue::Open(slot)) => {
                let slot = *slot;
                if let Some(target) = self.stack.get_mut(slot) {
                    *target = value;
                }
            }
            Some(Upvalue::Closed(current)) => *current = value,
            None => {}
        }
    }

    /// Cell behind upvalue `index` of the running closure
    pub(super) fn upvalue_cell(&self, index: u8) -> OpResult<ObjRef> {
        self.heap
            .as_closure(self.frame().closure)
            .and_then(|c| c.upvalues.get(usize::from(index)))
            .copied()
            .ok_or_else(|| RuntimeErrorKind::Internal(format!("no upvalue {index}")))
    }

    pub(super) fn upvalue_get(&self, index: u8) -> OpResult<Value> {
        Ok(self.read_cell(self.upvalue_cell(index)?))
    }

    pub(super) fn upvalue_set(&mut self, index: u8, value: Value) -> OpResult<()> {
        let cell = self.upvalue_cell(index)?;
        self.write_cell(cell, value);
        Ok(())
    }

    /// `CLOSURE A Bx`: instantiate the function constant `K[Bx]`
    pub(super) fn make_closure(&mut self, a: u8, index: u16) -> OpResult<()> {
        let function = self
            .constant(index)?
            .as_object()
            .filter(|r| self.heap.as_function(*r).is_some())
            .ok_or_else(|| RuntimeErrorKind::Internal("CLOSURE of a non-function".into()))?;
        let descriptors = self
            .heap
            .as_function(function)
            .map(|f| f.upvalues.clone())
            .unwrap_or_default();
        let base = self.frame().base;
        let mut upvalues = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            let cell = if desc.is_local {
                self.capture_upvalue(base + usize::from(desc.index))
            } else {
                self.upvalue_cell(desc.index)?
            };
            upvalues.push(cell);
        }
        let closure = self.alloc(Obj::Closure(Closure { function, upvalues }));
        self.set_reg(a, Value::object(closure));
        Ok(())
    }
}

fn check_native_arity(arity: Option<u8>, argc: u8) -> OpResult<()> {
    match arity {
        Some(expected) if expected != argc => Err(RuntimeErrorKind::ArityMismatch {
            expected,
            got: argc,
        }),
        _ => Ok(()),
    }
}
