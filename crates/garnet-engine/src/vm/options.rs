//! VM configuration

use super::defaults::{DEFAULT_ARENA_CAPACITY, DEFAULT_GC_THRESHOLD, DEFAULT_MAX_CALL_DEPTH};

/// VM creation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    /// Allocations between automatic GC cycles
    pub gc_threshold: usize,

    /// Maximum method call depth
    pub max_call_depth: usize,

    /// Initial GC arena capacity
    pub arena_capacity: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            arena_capacity: DEFAULT_ARENA_CAPACITY,
        }
    }
}

/// Options for compiling source text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// File name reported in syntax errors
    pub filename: Option<String>,
}

impl CompileOptions {
    /// Options with a file name
    pub fn with_filename(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
        }
    }
}
