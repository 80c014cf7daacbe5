//! Slot heap for GC-managed objects
//!
//! Objects live in a slab of slots. A handle names a slot plus the
//! generation it was issued for; freeing a slot bumps its generation, so a
//! stale handle is recognised without touching freed memory.

use crate::vm::object::HeapObject;
use crate::vm::value::ObjRef;

struct Slot {
    generation: u32,
    marked: bool,
    object: Option<HeapObject>,
}

/// Heap of GC-managed objects
pub struct Heap {
    slots: Vec<Slot>,

    /// Indices of empty slots
    free_list: Vec<u32>,

    /// Number of occupied slots
    live: usize,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Store an object, returning its handle
    pub fn allocate(&mut self, object: HeapObject) -> ObjRef {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return ObjRef::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            object: Some(object),
        });
        ObjRef::new(index, 0)
    }

    fn slot(&self, r: ObjRef) -> Option<&Slot> {
        let slot = self.slots.get(r.index()?)?;
        if slot.generation == r.generation() && slot.object.is_some() {
            Some(slot)
        } else {
            None
        }
    }

    /// Resolve a handle
    #[inline]
    pub fn get(&self, r: ObjRef) -> Option<&HeapObject> {
        self.slot(r).and_then(|slot| slot.object.as_ref())
    }

    /// Resolve a handle mutably
    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(r.index()?)?;
        if slot.generation == r.generation() {
            slot.object.as_mut()
        } else {
            None
        }
    }

    /// Whether the handle names a live object
    #[inline]
    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slot(r).is_some()
    }

    /// Number of live objects
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots, occupied or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Set the mark bit; returns `true` if the object was not yet marked
    pub(super) fn mark(&mut self, r: ObjRef) -> bool {
        let Some(index) = r.index() else {
            return false;
        };
        match self.slots.get_mut(index) {
            Some(slot) if slot.generation == r.generation() && slot.object.is_some() => {
                if slot.marked {
                    false
                } else {
                    slot.marked = true;
                    true
                }
            }
            _ => false,
        }
    }

    /// Free every unmarked object and clear the marks; returns the number freed
    pub(super) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::ObjectData;
    use crate::vm::value::ValueType;

    fn string(s: &str) -> HeapObject {
        HeapObject::new(ValueType::String, ObjRef::NULL, ObjectData::Str(s.into()))
    }

    #[test]
    fn test_allocate_and_get() {
        let mut heap = Heap::new();
        let r = heap.allocate(string("hello"));
        assert!(heap.is_live(r));
        assert_eq!(heap.live_count(), 1);
        match &heap.get(r).unwrap().data {
            ObjectData::Str(s) => assert_eq!(s, "hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sweep_invalidates_stale_handles() {
        let mut heap = Heap::new();
        let kept = heap.allocate(string("kept"));
        let dropped = heap.allocate(string("dropped"));

        assert!(heap.mark(kept));
        assert!(!heap.mark(kept));
        assert_eq!(heap.sweep(), 1);

        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
        assert!(heap.get(dropped).is_none());

        // The slot is reused with a new generation
        let reused = heap.allocate(string("new"));
        assert_eq!(reused.index(), dropped.index());
        assert_ne!(reused, dropped);
        assert!(!heap.is_live(dropped));
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn test_null_handle_is_not_live() {
        let heap = Heap::new();
        assert!(!heap.is_live(ObjRef::NULL));
        assert!(heap.get(ObjRef::new(10, 0)).is_none());
    }
}
