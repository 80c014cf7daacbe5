//! GC control surface

use garnet_engine::{ArenaIndex, Vm};
use std::rc::Rc;
use tracing::debug;

/// Scoped collector pause.
///
/// Disables collection on creation and restores the previous setting when
/// dropped, including when the scope is left by unwinding. Pauses nest.
#[must_use = "collection resumes as soon as the guard is dropped"]
pub struct GcPause {
    vm: Rc<Vm>,
    was_enabled: bool,
}

impl GcPause {
    pub(crate) fn new(vm: Rc<Vm>) -> Self {
        let was_enabled = vm.set_gc_enabled(false);
        debug!(was_enabled, "gc paused");
        Self { vm, was_enabled }
    }
}

impl Drop for GcPause {
    fn drop(&mut self) {
        self.vm.set_gc_enabled(self.was_enabled);
        debug!(enabled = self.was_enabled, "gc pause released");
    }
}

/// Scoped arena position.
///
/// Every protected call leaves its result in the arena, so a host loop
/// that never restores it keeps all of those values alive. The scope
/// releases everything rooted since its creation when dropped.
#[must_use = "the arena is restored as soon as the guard is dropped"]
pub struct ArenaScope {
    vm: Rc<Vm>,
    index: ArenaIndex,
}

impl ArenaScope {
    pub(crate) fn new(vm: Rc<Vm>) -> Self {
        let index = vm.arena_save();
        Self { vm, index }
    }

    /// Arena position the scope restores to
    pub fn index(&self) -> ArenaIndex {
        self.index
    }
}

impl Drop for ArenaScope {
    fn drop(&mut self) {
        self.vm.arena_restore(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_nests_and_restores() {
        let vm = Rc::new(Vm::new());
        {
            let _outer = GcPause::new(vm.clone());
            assert!(!vm.gc_enabled());
            {
                let _inner = GcPause::new(vm.clone());
                assert!(!vm.gc_enabled());
            }
            assert!(!vm.gc_enabled());
        }
        assert!(vm.gc_enabled());
    }

    #[test]
    fn test_pause_restores_on_unwind() {
        let vm = Rc::new(Vm::new());
        let inner = vm.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _pause = GcPause::new(inner);
            panic!("host failure");
        }));
        assert!(result.is_err());
        assert!(vm.gc_enabled());
    }

    #[test]
    fn test_arena_scope_releases_temporaries() {
        let vm = Rc::new(Vm::new());
        let before = vm.arena_save();
        let temp = {
            let scope = ArenaScope::new(vm.clone());
            assert_eq!(scope.index(), before);
            let temp = vm.str_new("temporary");
            assert!(vm.arena_save() > before);
            temp
        };
        assert_eq!(vm.arena_save(), before);
        vm.full_gc();
        assert!(vm.object_dead_p(temp));
    }
}
