//! Delimited continuations
//!
//! `withPrompt(tag, body)` marks a boundary and calls `body`. Inside it,
//! `capture(tag)` copies every frame and stack slot above the boundary into
//! a [`Continuation`] and makes `withPrompt` return that continuation.
//! `resume(k, v)` reinstalls a fresh copy of the slice on top of the caller,
//! with `v` as the result of the original `capture`, so a continuation can
//! be resumed any number of times. `abort(tag, v)` drops the slice and makes
//! `withPrompt` return `v`.

use std::rc::Rc;

use crate::error::{fatal, FatalError};
use crate::object::{Continuation, ControlOp, Obj, ObjRef, PromptTag, SavedFrame};
use crate::value::Value;

use super::{CallFrame, OpResult, Prompt, RuntimeErrorKind, Vm};

impl Vm {
    /// Run a control native called from `stack[slot]`
    pub(super) fn control(&mut self, op: ControlOp, slot: usize, argc: u8) -> OpResult<()> {
        let arg = |vm: &Vm, i: usize| {
            if i < usize::from(argc) {
                vm.stack[slot + 1 + i]
            } else {
                Value::NULL
            }
        };
        match op {
            ControlOp::WithPrompt => {
                let tag = self.prompt_tag(arg(self, 0), "withPrompt")?;
                let body = arg(self, 1);
                self.with_prompt(tag, body, slot)
            }
            ControlOp::Capture => {
                let tag = self.prompt_tag(arg(self, 0), "capture")?;
                self.capture(tag, slot)
            }
            ControlOp::Resume => {
                let k = arg(self, 0);
                let continuation = k
                    .as_object()
                    .filter(|r| self.heap.as_continuation(*r).is_some())
                    .ok_or_else(|| self.type_error("continuation", k, "resume"))?;
                let value = arg(self, 1);
                self.resume_continuation(continuation, value, slot)
            }
            ControlOp::Abort => {
                let tag = self.prompt_tag(arg(self, 0), "abort")?;
                let value = arg(self, 1);
                let index = self.find_prompt(tag)?;
                self.unwind_to(index, value);
                Ok(())
            }
        }
    }

    fn prompt_tag(&self, value: Value, operation: &'static str) -> OpResult<ObjRef> {
        value
            .as_object()
            .filter(|r| self.heap.as_prompt(*r).is_some())
            .ok_or_else(|| self.type_error("prompt tag", value, operation))
    }

    /// Allocate a tag for a new family of prompts
    pub(super) fn new_prompt_tag(&mut self, name: Option<ObjRef>) -> ObjRef {
        let id = self.next_prompt_id;
        self.next_prompt_id = self.next_prompt_id.wrapping_add(1);
        self.alloc(Obj::PromptTag(PromptTag { name, id }))
    }

    fn find_prompt(&self, tag: ObjRef) -> OpResult<usize> {
        self.prompts
            .iter()
            .rposition(|p| p.tag == tag)
            .ok_or(RuntimeErrorKind::MissingPrompt)
    }

    fn with_prompt(&mut self, tag: ObjRef, body: Value, slot: usize) -> OpResult<()> {
        let depth = self.frames.len();
        self.prompts.push(Prompt {
            tag,
            frame_depth: depth,
            slot,
        });
        self.stack[slot] = body;
        self.call_value(slot, 0)?;
        if self.frames.len() == depth {
            // The body was a native and has already returned
            self.prompts.pop();
        }
        Ok(())
    }

    fn capture(&mut self, tag: ObjRef, slot: usize) -> OpResult<()> {
        let index = self.find_prompt(tag)?;
        let prompt = self.prompts[index];
        let frames = self.frames[prompt.frame_depth..]
            .iter()
            .map(|frame| SavedFrame {
                closure: frame.closure,
                ip: frame.ip,
                base: frame.base - prompt.slot,
            })
            .collect::<Vec<_>>();
        let stack = self.stack[prompt.slot..].to_vec();
        tracing::trace!(
            frames = frames.len(),
            slots = stack.len(),
            "continuation captured"
        );
        let continuation = self.alloc(Obj::Continuation(Continuation {
            tag,
            frames,
            stack,
            result_slot: slot - prompt.slot,
        }));
        self.unwind_to(index, Value::object(continuation));
        Ok(())
    }

    /// Discard everything above prompt `index` and deliver `value` as the
    /// result of its `withPrompt` call
    fn unwind_to(&mut self, index: usize, value: Value) {
        let prompt = self.prompts[index];
        self.close_upvalues(prompt.slot);
        self.frames.truncate(prompt.frame_depth);
        self.prompts.truncate(index);
        let Some(top) = self.frames.last().map(CallFrame::top) else {
            fatal(FatalError::Internal("prompt below the outermost frame".into()));
        };
        self.stack[prompt.slot] = value;
        self.stack.resize(top, Value::NULL);
    }

    fn resume_continuation(
        &mut self,
        continuation: ObjRef,
        value: Value,
        slot: usize,
    ) -> OpResult<()> {
        let Some(k) = self.heap.as_continuation(continuation) else {
            return Err(RuntimeErrorKind::Internal("resume of a non-continuation".into()));
        };
        let (tag, saved, mut stack, result_slot) =
            (k.tag, k.frames.clone(), k.stack.clone(), k.result_slot);
        if self.frames.len() + saved.len() > self.config.max_frames {
            return Err(RuntimeErrorKind::StackOverflow);
        }

        let mut frames = Vec::with_capacity(saved.len());
        for frame in &saved {
            let function = self
                .heap
                .as_closure(frame.closure)
                .and_then(|c| self.heap.as_function(c.function))
                .ok_or_else(|| RuntimeErrorKind::Internal("saved frame without code".into()))?;
            frames.push(CallFrame {
                closure: frame.closure,
                chunk: Rc::clone(&function.chunk),
                ip: frame.ip,
                base: slot + frame.base,
                registers: usize::from(function.max_registers).max(1),
            });
        }

        if let Some(result) = stack.get_mut(result_slot) {
            *result = value;
        }
        self.prompts.push(Prompt {
            tag,
            frame_depth: self.frames.len(),
            slot,
        });
        self.stack.truncate(slot);
        self.stack.extend(stack);
        if let Some(top) = frames.iter().map(CallFrame::top).max() {
            if self.stack.len() < top {
                self.stack.resize(top, Value::NULL);
            }
        }
        self.frames.extend(frames);
        self.stats.max_frame_depth = self.stats.max_frame_depth.max(self.frames.len());
        Ok(())
    }
}
