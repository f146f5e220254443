//! Captured-variable table of a function being compiled

use crate::object::{ObjRef, UpvalueDesc};

use super::error::CompileErrorKind;
use super::scope::BindingInfo;

/// Most upvalues one function may capture
pub const MAX_UPVALUES: usize = 256;

/// One captured variable
#[derive(Debug, Clone)]
pub struct CapturedVar {
    pub desc: UpvalueDesc,
    pub info: BindingInfo,
}

#[derive(Debug, Default)]
pub struct UpvalueTable {
    entries: Vec<CapturedVar>,
}

impl UpvalueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capture `(index, is_local)`, reusing the slot when the pair is
    /// already captured
    pub fn add(
        &mut self,
        index: u8,
        is_local: bool,
        info: BindingInfo,
    ) -> Result<u8, CompileErrorKind> {
        if let Some(existing) = self
            .entries
            .iter()
            .position(|e| e.desc.index == index && e.desc.is_local == is_local)
        {
            return Ok(existing as u8);
        }
        if self.entries.len() >= MAX_UPVALUES {
            return Err(CompileErrorKind::TooManyUpvalues);
        }
        self.entries.push(CapturedVar {
            desc: UpvalueDesc { index, is_local },
            info,
        });
        Ok((self.entries.len() - 1) as u8)
    }

    pub fn descriptors(&self) -> Vec<UpvalueDesc> {
        self.entries.iter().map(|e| e.desc).collect()
    }

    pub fn struct_types(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.iter().filter_map(|e| e.info.struct_type)
    }
}
