//! Default constants for VM configuration.

/// Default number of allocations between automatic GC cycles.
pub const DEFAULT_GC_THRESHOLD: usize = 1024;

/// Default maximum method call depth before `SystemStackError` is raised.
///
/// Block calls count as frames. The interpreter recurses on the Rust
/// stack, so this also bounds native stack usage: reaching the limit needs
/// a few megabytes of stack. Hosts running scripts on small thread stacks
/// (such as the 2 MiB default of spawned threads) should lower it.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Default initial capacity of the GC arena.
pub const DEFAULT_ARENA_CAPACITY: usize = 100;
