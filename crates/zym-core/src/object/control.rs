//! Delimited-continuation objects

use super::ObjRef;
use crate::value::Value;

/// Identifies a prompt boundary installed by `withPrompt`
#[derive(Debug, Clone, Copy)]
pub struct PromptTag {
    pub name: Option<ObjRef>,
    pub id: u32,
}

/// One frame of a captured continuation. `base` is relative to the start of
/// the captured stack slice.
#[derive(Debug, Clone, Copy)]
pub struct SavedFrame {
    pub closure: ObjRef,
    pub ip: usize,
    pub base: usize,
}

/// A captured frame-and-stack slice up to a prompt boundary
#[derive(Debug, Clone)]
pub struct Continuation {
    pub tag: ObjRef,
    pub frames: Vec<SavedFrame>,
    pub stack: Vec<Value>,
    /// Slot, relative to the slice, that receives the resumed value
    pub result_slot: usize,
}
