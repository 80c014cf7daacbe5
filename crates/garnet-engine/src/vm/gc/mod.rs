//! Garbage collection
//!
//! A non-moving mark-sweep collector over a generation-checked slot heap,
//! plus the arena of temporary roots used while Rust code holds values.

pub mod collector;
pub mod heap;
pub mod roots;

pub use collector::{GarbageCollector, GcStats};
pub use heap::Heap;
pub use roots::{Arena, ArenaIndex, RootSet};
