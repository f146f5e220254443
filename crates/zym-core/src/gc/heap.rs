//! Object arena with generational handles and a weak string intern table

use std::collections::HashMap;
use std::rc::Rc;

use super::{GcPhase, GcStats, MIN_NEXT_GC};
use crate::config::GcConfig;
use crate::error::{fatal, FatalError};
use crate::object::{
    Closure, Continuation, Dispatcher, EnumSchema, Function, List, Map, Obj, ObjRef, ObjString,
    PromptTag, Reference, StructInstance, StructSchema, Upvalue,
};
use crate::value::Value;

struct Entry {
    marked: bool,
    size: usize,
    obj: Obj,
}

struct Slot {
    generation: u16,
    entry: Option<Entry>,
}

/// The object heap
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    strings: HashMap<Rc<str>, ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    config: GcConfig,
    pub(super) stats: GcStats,
    pub(super) phase: GcPhase,
    pub(super) gray: Vec<ObjRef>,
    pub(super) scratch: Vec<Value>,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, r: ObjRef) -> Option<&$ty> {
            match self.get(r) {
                Obj::$variant(inner) => Some(inner),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, r: ObjRef) -> Option<&mut $ty> {
            match self.get_mut(r) {
                Obj::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            bytes_allocated: 0,
            next_gc: config.initial_threshold.max(1),
            config,
            stats: GcStats::default(),
            phase: GcPhase::Idle,
            gray: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn set_stress(&mut self, stress: bool) {
        self.config.stress = stress;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            live_objects: self.slots.len() - self.free.len(),
            ..self.stats
        }
    }

    /// Whether allocating `size` more bytes should run a collection first
    pub fn should_collect(&self, size: usize) -> bool {
        self.phase == GcPhase::Idle
            && (self.config.stress || self.bytes_allocated + size > self.next_gc)
    }

    /// Place an object in the arena. Never collects.
    pub fn insert(&mut self, obj: Obj) -> ObjRef {
        if self.phase == GcPhase::Sweeping {
            fatal(FatalError::GcReentrancy);
        }
        let size = obj.size_estimate();
        self.bytes_allocated += size;
        let entry = Entry {
            marked: false,
            size,
            obj,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ObjRef::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len())
                .unwrap_or_else(|_| fatal(FatalError::Internal("heap exhausted".into())));
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ObjRef::new(index, 0)
        }
    }

    /// Intern a string, returning the existing handle when the text is known
    pub fn insert_string(&mut self, text: &str) -> ObjRef {
        if let Some(existing) = self.find_interned(text) {
            return existing;
        }
        let shared: Rc<str> = Rc::from(text);
        let r = self.insert(Obj::Str(ObjString::new(Rc::clone(&shared))));
        self.strings.insert(shared, r);
        r
    }

    pub fn find_interned(&self, text: &str) -> Option<ObjRef> {
        self.strings.get(text).copied()
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.index() as usize)
            .is_some_and(|slot| slot.generation == r.generation() && slot.entry.is_some())
    }

    fn entry(&self, r: ObjRef) -> &Entry {
        match self.slots.get(r.index() as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == r.generation() => entry,
            _ => fatal(FatalError::StaleHandle(r)),
        }
    }

    fn entry_mut(&mut self, r: ObjRef) -> &mut Entry {
        match self.slots.get_mut(r.index() as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == r.generation() => entry,
            _ => fatal(FatalError::StaleHandle(r)),
        }
    }

    /// Borrow a live object. A stale handle is fatal.
    pub fn get(&self, r: ObjRef) -> &Obj {
        &self.entry(r).obj
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        &mut self.entry_mut(r).obj
    }

    /// Re-measure an object after it grew or shrank in place
    pub fn refresh_size(&mut self, r: ObjRef) {
        let entry = self.entry_mut(r);
        let old = entry.size;
        let new = entry.obj.size_estimate();
        entry.size = new;
        self.bytes_allocated = self.bytes_allocated - old + new;
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value.as_object() {
            Some(r) => self.get(r).type_name(),
            None => value.primitive_type_name(),
        }
    }

    pub fn as_str(&self, r: ObjRef) -> Option<&str> {
        match self.get(r) {
            Obj::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn value_as_str(&self, value: Value) -> Option<&str> {
        value.as_object().and_then(|r| self.as_str(r))
    }

    pub fn as_string(&self, r: ObjRef) -> Option<&ObjString> {
        match self.get(r) {
            Obj::Str(s) => Some(s),
            _ => None,
        }
    }

    typed_access!(as_function, as_function_mut, Function, Function);
    typed_access!(as_closure, as_closure_mut, Closure, Closure);
    typed_access!(as_upvalue, as_upvalue_mut, Upvalue, Upvalue);
    typed_access!(as_list, as_list_mut, List, List);
    typed_access!(as_map, as_map_mut, Map, Map);
    typed_access!(as_dispatcher, as_dispatcher_mut, Dispatcher, Dispatcher);
    typed_access!(as_reference, as_reference_mut, Reference, Reference);
    typed_access!(as_struct_schema, as_struct_schema_mut, StructSchema, StructSchema);
    typed_access!(as_instance, as_instance_mut, StructInstance, StructInstance);
    typed_access!(as_enum_schema, as_enum_schema_mut, EnumSchema, EnumSchema);
    typed_access!(as_prompt, as_prompt_mut, PromptTag, PromptTag);
    typed_access!(as_continuation, as_continuation_mut, Continuation, Continuation);

    /// Gray an object if it is not already marked
    pub(super) fn mark(&mut self, r: ObjRef) {
        let entry = self.entry_mut(r);
        if entry.marked {
            return;
        }
        entry.marked = true;
        if !matches!(entry.obj, Obj::Str(_) | Obj::Native(_)) {
            self.gray.push(r);
        }
    }

    pub(super) fn prune_strings(&mut self) -> usize {
        let before = self.strings.len();
        let slots = &self.slots;
        self.strings.retain(|_, r| {
            slots
                .get(r.index() as usize)
                .and_then(|slot| slot.entry.as_ref())
                .is_some_and(|entry| entry.marked)
        });
        before - self.strings.len()
    }

    pub(super) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            if entry.marked {
                entry.marked = false;
                continue;
            }
            self.bytes_allocated -= entry.size;
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }
        freed
    }

    pub(super) fn schedule_next(&mut self) {
        self.next_gc = (self.bytes_allocated * self.config.grow_factor.max(1)).max(MIN_NEXT_GC);
    }

    /// Iterate over every live object
    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &Obj)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (ObjRef::new(index as u32, slot.generation), &entry.obj))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_deduplicated() {
        let mut heap = Heap::new(GcConfig::default());
        let a = heap.insert_string("name");
        let b = heap.insert_string("name");
        let c = heap.insert_string("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.as_str(a), Some("name"));
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn stale_handle_is_fatal() {
        let mut heap = Heap::new(GcConfig::default());
        let r = heap.insert(Obj::List(List::default()));
        heap.collect(&[&super::super::NoRoots]);
        let _ = heap.get(r);
    }

    #[test]
    fn refresh_size_tracks_growth() {
        let mut heap = Heap::new(GcConfig::default());
        let r = heap.insert(Obj::List(List::default()));
        let before = heap.bytes_allocated();
        if let Some(list) = heap.as_list_mut(r) {
            list.items.extend(std::iter::repeat(Value::NULL).take(32));
        }
        heap.refresh_size(r);
        assert!(heap.bytes_allocated() > before);
    }

    #[test]
    fn stress_mode_always_requests_collection() {
        let heap = Heap::new(GcConfig {
            stress: true,
            ..GcConfig::default()
        });
        assert!(heap.should_collect(0));
        let relaxed = Heap::new(GcConfig::default());
        assert!(!relaxed.should_collect(16));
    }
}
