//! Virtual machine for the Zym language
//!
//! A register machine: every call frame owns a window of the value stack,
//! `R0` holding the running closure and the parameters following it. The
//! VM owns the object heap; everything the collector must keep alive is
//! reachable from the stack, the globals, the open upvalues, the frames,
//! the active prompts, or a temporary root.
//!
//! Execution can run to completion ([`Vm::run`]) or in bounded slices
//! ([`Vm::run_slice`] / [`Vm::resume`]); a frame stores everything needed to
//! pick up where a slice stopped.

mod call;
mod clone;
mod continuation;
mod error;
mod format;
mod interpreter;
mod natives;
mod output;
mod reference;

pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
pub use format::format_value;
pub use output::{with_output_capture, OutputCapture};

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bytecode::Chunk;
use crate::config::VmConfig;
use crate::gc::{CollectionReport, GcRoots, Heap, Marker, PendingObject};
use crate::object::{
    Closure, EnumSchema, NativeClosure, NativeClosureFn, NativeFn, NativeFunction, NativeKind,
    Obj, ObjRef, Qualifier,
};
use crate::value::Value;

/// Result of a single operation; the caller attaches the stack trace
type OpResult<T> = Result<T, RuntimeErrorKind>;

/// A call frame
#[derive(Debug, Clone)]
struct CallFrame {
    closure: ObjRef,
    chunk: Rc<Chunk>,
    ip: usize,
    /// Absolute stack slot of R0
    base: usize,
    /// Size of the register window
    registers: usize,
}

impl CallFrame {
    fn top(&self) -> usize {
        self.base + self.registers
    }
}

/// A `withPrompt` boundary
#[derive(Debug, Clone, Copy)]
struct Prompt {
    tag: ObjRef,
    /// Frame count below the prompt body
    frame_depth: usize,
    /// Stack slot that receives the prompt's result
    slot: usize,
}

/// Outcome of a bounded run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Out of budget or preempted; [`Vm::resume`] continues
    Suspended,
    Completed(Value),
}

/// Interpreter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub instructions: u64,
    pub calls: u64,
    pub tail_calls: u64,
    /// Highest number of frames live at once
    pub max_frame_depth: usize,
}

/// Global variable table. Slots are handed out to the compiler by name and
/// stay stable for the life of the VM.
#[derive(Debug, Default)]
struct Globals {
    values: Vec<Option<Value>>,
    names: Vec<ObjRef>,
    index: HashMap<ObjRef, u16>,
}

/// The Zym virtual machine
pub struct Vm {
    heap: Heap,
    config: VmConfig,

    stack: Vec<Value>,
    frames: Vec<CallFrame>,

    /// Open upvalues by the absolute stack slot they alias
    open_upvalues: BTreeMap<usize, ObjRef>,

    globals: Globals,

    /// Enum schemas by type id
    enums: Vec<ObjRef>,

    prompts: Vec<Prompt>,
    next_prompt_id: u32,

    /// Values kept alive across allocations by host code
    temp_roots: Vec<Value>,

    preempt: Arc<AtomicBool>,
    stats: VmStats,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    /// Create a VM with the built-in natives registered
    #[must_use]
    pub fn new(config: VmConfig) -> Self {
        let mut vm = Self {
            heap: Heap::new(config.gc),
            config,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            open_upvalues: BTreeMap::new(),
            globals: Globals::default(),
            enums: Vec::new(),
            prompts: Vec::new(),
            next_prompt_id: 0,
            temp_roots: Vec::new(),
            preempt: Arc::new(AtomicBool::new(false)),
            stats: VmStats::default(),
        };
        vm.register_natives();
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn stats(&self) -> VmStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = VmStats::default();
    }

    /// Flag that makes a running slice suspend at the next instruction
    pub fn preempt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.preempt)
    }

    /// Whether a program is loaded and not yet finished
    pub fn is_running(&self) -> bool {
        !self.frames.is_empty()
    }

    // ===== Allocation =====

    /// Allocate, collecting first when the threshold is reached. `extra`
    /// roots anything the caller holds outside the VM.
    pub(crate) fn alloc_with(&mut self, obj: Obj, extra: &[&dyn GcRoots]) -> ObjRef {
        if self.heap.should_collect(obj.size_estimate()) {
            self.collect_with(extra, Some(&obj));
        }
        self.heap.insert(obj)
    }

    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.alloc_with(obj, &[])
    }

    pub(crate) fn intern_with(&mut self, text: &str, extra: &[&dyn GcRoots]) -> ObjRef {
        if let Some(existing) = self.heap.find_interned(text) {
            return existing;
        }
        if self
            .heap
            .should_collect(std::mem::size_of::<Obj>() + text.len())
        {
            self.collect_with(extra, None);
        }
        self.heap.insert_string(text)
    }

    /// Intern a string
    pub fn intern(&mut self, text: &str) -> ObjRef {
        self.intern_with(text, &[])
    }

    /// Keep `value` alive until the matching [`Vm::pop_temp_roots`]
    pub fn push_temp_root(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    pub fn pop_temp_roots(&mut self, count: usize) {
        let len = self.temp_roots.len().saturating_sub(count);
        self.temp_roots.truncate(len);
    }

    /// Run a full collection now
    pub fn collect_garbage(&mut self) -> CollectionReport {
        self.collect_with(&[], None)
    }

    fn collect_with(
        &mut self,
        extra: &[&dyn GcRoots],
        pending: Option<&Obj>,
    ) -> CollectionReport {
        let roots = VmRoots {
            stack: &self.stack,
            frames: &self.frames,
            open_upvalues: &self.open_upvalues,
            globals: &self.globals,
            enums: &self.enums,
            prompts: &self.prompts,
            temp_roots: &self.temp_roots,
        };
        let pending = pending.map(PendingObject);
        let mut sources: Vec<&dyn GcRoots> = Vec::with_capacity(extra.len() + 2);
        sources.push(&roots);
        sources.extend_from_slice(extra);
        if let Some(pending) = &pending {
            sources.push(pending);
        }
        self.heap.collect(&sources)
    }

    // ===== Globals =====

    /// Slot for the global `name`, assigning a new one on first use.
    /// `None` once every 16-bit slot is taken.
    pub(crate) fn global_slot(&mut self, name: ObjRef) -> Option<u16> {
        if let Some(slot) = self.globals.index.get(&name) {
            return Some(*slot);
        }
        let slot = u16::try_from(self.globals.values.len()).ok()?;
        self.globals.values.push(None);
        self.globals.names.push(name);
        self.globals.index.insert(name, slot);
        Some(slot)
    }

    /// Define or redefine a global by name
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.push_temp_root(value);
        let name = self.intern(name);
        self.pop_temp_roots(1);
        match self.global_slot(name) {
            Some(slot) => self.globals.values[usize::from(slot)] = Some(value),
            None => tracing::warn!(name = ?name, "global table full"),
        }
    }

    /// Current value of a defined global
    pub fn global(&self, name: &str) -> Option<Value> {
        let name = self.heap.find_interned(name)?;
        let slot = self.globals.index.get(&name)?;
        self.globals.values[usize::from(*slot)]
    }

    fn global_name(&self, slot: u16) -> String {
        self.globals
            .names
            .get(usize::from(slot))
            .and_then(|r| self.heap.as_str(*r))
            .unwrap_or("?")
            .to_string()
    }

    // ===== Natives =====

    /// Register a native function as a global
    pub fn define_native(
        &mut self,
        name: &'static str,
        arity: Option<u8>,
        function: NativeFn,
    ) {
        self.define_native_kind(name, arity, Vec::new(), NativeKind::Plain(function));
    }

    fn define_native_kind(
        &mut self,
        name: &'static str,
        arity: Option<u8>,
        qualifiers: Vec<Qualifier>,
        kind: NativeKind,
    ) {
        let native = self.alloc(Obj::Native(NativeFunction {
            name,
            arity,
            qualifiers,
            kind,
        }));
        self.define_global(name, Value::object(native));
    }

    /// Register a native bound to a context value
    pub fn define_native_closure(
        &mut self,
        name: &'static str,
        arity: Option<u8>,
        function: NativeClosureFn,
        context: Value,
    ) {
        self.push_temp_root(context);
        let native = self.alloc(Obj::NativeClosure(NativeClosure {
            name,
            arity,
            qualifiers: Vec::new(),
            function,
            context,
        }));
        self.pop_temp_roots(1);
        self.define_global(name, Value::object(native));
    }

    // ===== Enums =====

    /// Allocate a fresh enum type. `None` when every 16-bit type id is used.
    pub(crate) fn new_enum_type(
        &mut self,
        name: ObjRef,
        variants: Vec<ObjRef>,
        extra: &[&dyn GcRoots],
    ) -> Option<ObjRef> {
        let type_id = u16::try_from(self.enums.len()).ok()?;
        let schema = self.alloc_with(
            Obj::EnumSchema(EnumSchema {
                name,
                variants,
                type_id,
            }),
            extra,
        );
        self.enums.push(schema);
        Some(schema)
    }

    /// Schema of the enum type `type_id`
    pub fn enum_schema(&self, type_id: u16) -> Option<ObjRef> {
        self.enums.get(usize::from(type_id)).copied()
    }

    // ===== Entry points =====

    /// Run a compiled script function to completion
    pub fn run(&mut self, function: ObjRef) -> RuntimeResult<Value> {
        self.load(function)?;
        match self.execute(None)? {
            ExecutionState::Completed(value) => Ok(value),
            ExecutionState::Suspended => Err(RuntimeError::new(RuntimeErrorKind::Internal(
                "unbounded run suspended".into(),
            ))),
        }
    }

    /// Prepare a script function for [`Vm::run_slice`]
    pub fn load(&mut self, function: ObjRef) -> RuntimeResult<()> {
        let Some((registers, captures, chunk)) = self.heap.as_function(function).map(|f| {
            (
                usize::from(f.max_registers),
                !f.upvalues.is_empty(),
                Rc::clone(&f.chunk),
            )
        }) else {
            return Err(RuntimeError::new(RuntimeErrorKind::NotCallable(
                self.heap.type_name(Value::object(function)),
            )));
        };
        if captures {
            return Err(RuntimeError::new(RuntimeErrorKind::Internal(
                "script function expects upvalues".into(),
            )));
        }
        self.reset();
        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        let registers = registers.max(1);
        self.stack.resize(registers, Value::NULL);
        self.stack[0] = Value::object(closure);
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: 0,
            registers,
        });
        self.stats.max_frame_depth = self.stats.max_frame_depth.max(1);
        Ok(())
    }

    /// Execute at most `budget` instructions of the loaded program
    pub fn run_slice(&mut self, budget: u64) -> RuntimeResult<ExecutionState> {
        if self.frames.is_empty() {
            return Err(RuntimeError::new(RuntimeErrorKind::Internal(
                "no program loaded".into(),
            )));
        }
        self.execute(Some(budget))
    }

    /// Continue a suspended program for one configured timeslice
    pub fn resume(&mut self) -> RuntimeResult<ExecutionState> {
        self.run_slice(self.config.timeslice.unwrap_or(u64::MAX))
    }

    /// Drop all execution state; globals and the heap stay
    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.prompts.clear();
        self.preempt.store(false, Ordering::Relaxed);
    }

    // ===== Errors =====

    fn runtime_error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| self.trace_frame(frame))
            .collect();
        RuntimeError::new(kind).with_trace(trace)
    }

    fn trace_frame(&self, frame: &CallFrame) -> StackFrame {
        let line = frame.chunk.get_line(frame.ip.saturating_sub(1));
        let function = self
            .heap
            .as_closure(frame.closure)
            .and_then(|c| self.heap.as_function(c.function));
        let name = function
            .and_then(|f| f.name)
            .and_then(|n| self.heap.as_str(n))
            .unwrap_or("<script>");
        let module = function
            .and_then(|f| f.module)
            .and_then(|m| self.heap.as_str(m))
            .unwrap_or("?");
        StackFrame {
            function_name: name.to_string(),
            module: module.to_string(),
            line,
        }
    }
}

/// Everything the VM itself keeps alive
struct VmRoots<'v> {
    stack: &'v [Value],
    frames: &'v [CallFrame],
    open_upvalues: &'v BTreeMap<usize, ObjRef>,
    globals: &'v Globals,
    enums: &'v [ObjRef],
    prompts: &'v [Prompt],
    temp_roots: &'v [Value],
}

impl GcRoots for VmRoots<'_> {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        marker.mark_values(self.stack);
        for frame in self.frames {
            marker.mark_object(frame.closure);
        }
        for upvalue in self.open_upvalues.values() {
            marker.mark_object(*upvalue);
        }
        for value in self.globals.values.iter().flatten() {
            marker.mark_value(*value);
        }
        for name in &self.globals.names {
            marker.mark_object(*name);
        }
        for schema in self.enums {
            marker.mark_object(*schema);
        }
        for prompt in self.prompts {
            marker.mark_object(prompt.tag);
        }
        marker.mark_values(self.temp_roots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::List;

    #[test]
    fn temp_roots_survive_collection() {
        let mut vm = Vm::default();
        let kept = vm.alloc(Obj::List(List::default()));
        let dropped = vm.alloc(Obj::List(List::default()));
        vm.push_temp_root(Value::object(kept));
        vm.collect_garbage();
        assert!(vm.heap().contains(kept));
        assert!(!vm.heap().contains(dropped));
        vm.pop_temp_roots(1);
        vm.collect_garbage();
        assert!(!vm.heap().contains(kept));
    }

    #[test]
    fn global_slots_are_stable() {
        let mut vm = Vm::default();
        let a = vm.intern("alpha");
        let b = vm.intern("beta");
        let slot_a = vm.global_slot(a).unwrap();
        let slot_b = vm.global_slot(b).unwrap();
        assert_ne!(slot_a, slot_b);
        assert_eq!(vm.global_slot(a), Some(slot_a));
    }

    #[test]
    fn natives_are_defined_globals() {
        let vm = Vm::default();
        let print = vm.global("print").and_then(Value::as_object).unwrap();
        assert_eq!(vm.heap().type_name(Value::object(print)), "native");
    }

    #[test]
    fn enum_type_ids_are_sequential() {
        let mut vm = Vm::new(VmConfig {
            gc: GcConfig {
                stress: true,
                ..GcConfig::default()
            },
            ..VmConfig::default()
        });
        let name = vm.intern("Color");
        vm.push_temp_root(Value::object(name));
        let first = vm.new_enum_type(name, Vec::new(), &[]).unwrap();
        let second = vm.new_enum_type(name, Vec::new(), &[]).unwrap();
        vm.pop_temp_roots(1);
        vm.collect_garbage();
        assert_eq!(vm.heap().as_enum_schema(first).unwrap().type_id, 0);
        assert_eq!(vm.heap().as_enum_schema(second).unwrap().type_id, 1);
        assert_eq!(vm.enum_schema(1), Some(second));
    }
}
