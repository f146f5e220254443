//! Mark-sweep garbage collector over the object arena
//!
//! The heap is an arena of slots addressed by generational [`ObjRef`]
//! handles. A collection is stop-the-world:
//!
//! 1. every [`GcRoots`] source marks what it holds (VM stack, globals,
//!    frames, open upvalues, temp roots, and the compiler chain when a
//!    collection happens mid-compile)
//! 2. gray objects are blackened until the work-list is empty
//! 3. unmarked strings are pruned from the intern table (it holds them weakly)
//! 4. unmarked slots are freed and their generation bumped, marked slots are
//!    cleared for the next cycle
//!
//! Freeing a slot bumps its generation, so any stale handle is detected on
//! its next use instead of silently aliasing a newer object.

mod heap;

pub use heap::Heap;

use crate::error::{fatal, FatalError};
use crate::object::{Obj, ObjRef};
use crate::value::Value;

/// Smallest threshold the collector will schedule the next cycle at
pub const MIN_NEXT_GC: usize = 1024;

/// Statistics about collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of collections performed
    pub collections: usize,
    /// Objects freed across all collections
    pub objects_freed: usize,
    /// Bytes currently attributed to live objects
    pub bytes_allocated: usize,
    /// Threshold that triggers the next collection
    pub next_gc: usize,
    /// Number of live objects
    pub live_objects: usize,
}

/// Outcome of a single collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub freed: usize,
    pub strings_pruned: usize,
}

/// Something that can hand the collector extra roots
pub trait GcRoots {
    fn mark_roots(&self, marker: &mut Marker<'_>);
}

/// No extra roots
pub struct NoRoots;

impl GcRoots for NoRoots {
    fn mark_roots(&self, _marker: &mut Marker<'_>) {}
}

/// Roots made of a plain list of values
impl GcRoots for [Value] {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        marker.mark_values(self);
    }
}

impl<T: GcRoots + ?Sized> GcRoots for &T {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        (**self).mark_roots(marker);
    }
}

/// An object that is about to be inserted. Its children must survive the
/// collection its own allocation triggers.
pub(crate) struct PendingObject<'a>(pub &'a Obj);

impl GcRoots for PendingObject<'_> {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        self.0.for_each_child(|v| marker.mark_value(v));
    }
}

/// Phase the collector is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcPhase {
    Idle,
    Marking,
    Sweeping,
}

/// Marks objects gray during root enumeration
pub struct Marker<'h> {
    heap: &'h mut Heap,
}

impl Marker<'_> {
    pub fn mark_value(&mut self, value: Value) {
        if let Some(obj) = value.as_object() {
            self.mark_object(obj);
        }
    }

    pub fn mark_values(&mut self, values: &[Value]) {
        for value in values {
            self.mark_value(*value);
        }
    }

    pub fn mark_object(&mut self, obj: ObjRef) {
        self.heap.mark(obj);
    }
}

impl Heap {
    /// Run a full collection with the given root sources
    pub fn collect(&mut self, roots: &[&dyn GcRoots]) -> CollectionReport {
        match self.phase {
            GcPhase::Idle => {}
            GcPhase::Sweeping => fatal(FatalError::GcReentrancy),
            GcPhase::Marking => fatal(FatalError::Internal(
                "collection requested while marking".into(),
            )),
        }

        let bytes_before = self.bytes_allocated();
        tracing::debug!(bytes = bytes_before, "gc begin");

        self.phase = GcPhase::Marking;
        {
            let mut marker = Marker { heap: self };
            for source in roots {
                source.mark_roots(&mut marker);
            }
        }
        self.trace_references();

        self.phase = GcPhase::Sweeping;
        let strings_pruned = self.prune_strings();
        let freed = self.sweep();
        self.phase = GcPhase::Idle;

        self.schedule_next();
        self.stats.collections += 1;
        self.stats.objects_freed += freed;

        let report = CollectionReport {
            bytes_before,
            bytes_after: self.bytes_allocated(),
            freed,
            strings_pruned,
        };
        tracing::debug!(
            freed = report.freed,
            strings = report.strings_pruned,
            before = report.bytes_before,
            after = report.bytes_after,
            next = self.next_gc(),
            "gc end"
        );
        report
    }

    /// Blacken gray objects until the work-list is empty
    fn trace_references(&mut self) {
        while let Some(obj) = self.gray.pop() {
            let mut children = std::mem::take(&mut self.scratch);
            self.get(obj).for_each_child(|v| children.push(v));
            for child in children.drain(..) {
                if let Some(r) = child.as_object() {
                    self.mark(r);
                }
            }
            self.scratch = children;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::object::List;

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = heap();
        let kept = heap.insert(Obj::List(List::default()));
        let dropped = heap.insert(Obj::List(List::default()));

        let roots = [Value::object(kept)];
        let report = heap.collect(&[&&roots[..]]);

        assert_eq!(report.freed, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut heap = heap();
        let first = heap.insert(Obj::List(List::default()));
        heap.collect(&[&NoRoots]);
        assert!(!heap.contains(first));

        let second = heap.insert(Obj::List(List::default()));
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(!heap.contains(first));
        assert!(heap.contains(second));

        // A second collection frees the new object exactly once
        let report = heap.collect(&[&NoRoots]);
        assert_eq!(report.freed, 1);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn tracing_follows_containers_and_cycles() {
        let mut heap = heap();
        let a = heap.insert(Obj::List(List::default()));
        let b = heap.insert(Obj::List(List {
            items: vec![Value::object(a)],
        }));
        if let Some(list) = heap.as_list_mut(a) {
            list.items.push(Value::object(b));
        }
        let roots = [Value::object(b)];
        let report = heap.collect(&[&&roots[..]]);
        assert_eq!(report.freed, 0);

        let report = heap.collect(&[&NoRoots]);
        assert_eq!(report.freed, 2);
    }

    #[test]
    fn interned_strings_are_weak() {
        let mut heap = heap();
        let s = heap.insert_string("transient");
        assert_eq!(heap.find_interned("transient"), Some(s));
        let report = heap.collect(&[&NoRoots]);
        assert_eq!(report.strings_pruned, 1);
        assert_eq!(heap.find_interned("transient"), None);
    }

    #[test]
    fn threshold_doubles_live_bytes() {
        let mut heap = Heap::new(GcConfig {
            initial_threshold: 1,
            ..GcConfig::default()
        });
        let mut items = Vec::new();
        for _ in 0..64 {
            items.push(Value::object(heap.insert(Obj::List(List::default()))));
        }
        heap.collect(&[&&items[..]]);
        assert_eq!(heap.next_gc(), (heap.bytes_allocated() * 2).max(MIN_NEXT_GC));
    }
}
