//! Mark-sweep garbage collector
//!
//! Collection is triggered by allocation count: once `threshold` objects
//! have been allocated since the last cycle, the next allocation collects
//! first. Disabling the collector skips every cycle, automatic or forced;
//! allocation continues regardless.

use super::heap::Heap;
use super::roots::RootSet;
use crate::vm::object::HeapObject;
use crate::vm::value::ObjRef;
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Collections requested while the collector was disabled
    pub skipped: usize,
}

impl GcStats {
    fn update(&mut self, pause_time: Duration, marked: usize, freed: usize, live_objects: usize) {
        self.collections += 1;
        self.objects_freed += freed;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.live_objects = live_objects;
    }
}

/// Mark-sweep garbage collector
pub struct GarbageCollector {
    /// Heap (owned by the collector)
    heap: Heap,

    /// Collection switch
    enabled: bool,

    /// Allocations between automatic cycles
    threshold: usize,

    /// Allocations since the last cycle
    allocated_since: usize,

    /// Statistics
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector with the given allocation threshold
    pub fn new(threshold: usize) -> Self {
        Self {
            heap: Heap::new(),
            enabled: true,
            threshold: threshold.max(1),
            allocated_since: 0,
            stats: GcStats::default(),
        }
    }

    /// The heap
    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably
    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Store an object. Never collects; see [`should_collect`](Self::should_collect).
    pub fn allocate(&mut self, object: HeapObject) -> ObjRef {
        self.allocated_since += 1;
        self.heap.allocate(object)
    }

    /// Whether the next allocation should be preceded by a cycle
    pub fn should_collect(&self) -> bool {
        self.enabled && self.allocated_since >= self.threshold
    }

    /// Enable or disable collection; returns the previous setting
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.enabled, enabled)
    }

    /// Whether collection is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the allocation threshold
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold.max(1);
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.heap.live_count()
    }

    /// Statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run a full cycle from `roots`. Returns the number of objects freed,
    /// or `None` if the collector is disabled.
    pub fn collect(&mut self, roots: &RootSet) -> Option<usize> {
        if !self.enabled {
            self.stats.skipped += 1;
            return None;
        }

        let start = Instant::now();
        let marked = self.mark(roots);
        let freed = self.heap.sweep();
        self.allocated_since = 0;

        self.stats
            .update(start.elapsed(), marked, freed, self.heap.live_count());
        Some(freed)
    }

    /// Mark phase: iterative traversal from the roots
    fn mark(&mut self, roots: &RootSet) -> usize {
        let mut worklist: Vec<ObjRef> = roots.iter().map(|v| v.as_pointer()).collect();
        let mut marked = 0;

        while let Some(r) = worklist.pop() {
            if !self.heap.mark(r) {
                continue;
            }
            marked += 1;
            if let Some(object) = self.heap.get(r) {
                object.trace(&mut worklist);
            }
        }

        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::ObjectData;
    use crate::vm::value::{Value, ValueType};

    fn alloc_array(gc: &mut GarbageCollector, items: Vec<Value>) -> ObjRef {
        gc.allocate(HeapObject::new(
            ValueType::Array,
            ObjRef::NULL,
            ObjectData::Array(items),
        ))
    }

    fn alloc_string(gc: &mut GarbageCollector, s: &str) -> ObjRef {
        gc.allocate(HeapObject::new(
            ValueType::String,
            ObjRef::NULL,
            ObjectData::Str(s.into()),
        ))
    }

    #[test]
    fn test_collect_keeps_reachable() {
        let mut gc = GarbageCollector::new(100);
        let s = alloc_string(&mut gc, "child");
        let arr = alloc_array(&mut gc, vec![Value::object(ValueType::String, s)]);
        let garbage = alloc_string(&mut gc, "garbage");

        let mut roots = RootSet::new();
        roots.add(Value::object(ValueType::Array, arr));

        assert_eq!(gc.collect(&roots), Some(1));
        assert!(gc.heap().is_live(arr));
        assert!(gc.heap().is_live(s));
        assert!(!gc.heap().is_live(garbage));
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.stats().last_marked_count, 2);
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut gc = GarbageCollector::new(100);
        let a = alloc_array(&mut gc, Vec::new());
        let b = alloc_array(&mut gc, vec![Value::object(ValueType::Array, a)]);
        if let Some(obj) = gc.heap_mut().get_mut(a) {
            obj.data = ObjectData::Array(vec![Value::object(ValueType::Array, b)]);
        }

        assert_eq!(gc.collect(&RootSet::new()), Some(2));
        assert_eq!(gc.live_count(), 0);
    }

    #[test]
    fn test_disabled_collector_skips() {
        let mut gc = GarbageCollector::new(1);
        let s = alloc_string(&mut gc, "kept");

        assert!(gc.set_enabled(false));
        assert!(!gc.should_collect());
        assert_eq!(gc.collect(&RootSet::new()), None);
        assert!(gc.heap().is_live(s));
        assert_eq!(gc.stats().skipped, 1);

        gc.set_enabled(true);
        assert!(gc.should_collect());
        assert_eq!(gc.collect(&RootSet::new()), Some(1));
    }
}
