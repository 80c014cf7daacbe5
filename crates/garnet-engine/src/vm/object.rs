//! Object model and class system

use crate::parser::{BlockNode, MethodDef, Program, Symbol};
use crate::vm::state::Vm;
use crate::vm::value::{ObjRef, Value, ValueType};
use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;

/// Native method body: receives the VM and the receiver, reads its
/// arguments through [`Vm::get_args_rest_block`], and returns the result.
/// Failures are reported with [`Vm::raise`].
pub type NativeFn = fn(&Vm, Value) -> Value;

/// Object header shared by every heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RBasic {
    /// Type tag of the object
    pub tt: ValueType,
    /// Class of the object (its singleton class if it has one)
    pub class: ObjRef,
    /// Frozen flag
    pub frozen: bool,
}

/// Heap object: header, instance variables and type-specific data
#[derive(Debug)]
pub struct HeapObject {
    /// Header
    pub basic: RBasic,
    /// Instance variables
    pub ivars: FxHashMap<Symbol, Value>,
    /// Type-specific payload
    pub data: ObjectData,
}

impl HeapObject {
    /// Create an object with no instance variables
    pub fn new(tt: ValueType, class: ObjRef, data: ObjectData) -> Self {
        Self {
            basic: RBasic {
                tt,
                class,
                frozen: false,
            },
            ivars: FxHashMap::default(),
            data,
        }
    }

    /// Push every handle this object references onto `out`
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        fn push(out: &mut Vec<ObjRef>, v: Value) {
            if v.is_heap() {
                out.push(v.as_pointer());
            }
        }

        out.push(self.basic.class);
        for v in self.ivars.values() {
            push(out, *v);
        }

        match &self.data {
            ObjectData::Plain | ObjectData::Str(_) => {}
            ObjectData::Class(class) => {
                out.extend(class.superclass);
                out.extend(class.outer);
                out.extend(class.attached);
                out.extend(class.mixins.iter().copied());
                for v in class.consts.values() {
                    push(out, *v);
                }
                for method in class.methods.values() {
                    if let Method::Script { cref, .. } = method {
                        out.push(*cref);
                    }
                }
            }
            ObjectData::Array(items) => {
                for v in items {
                    push(out, *v);
                }
            }
            ObjectData::Hash(table) => {
                for (_, k, v) in &table.entries {
                    push(out, *k);
                    push(out, *v);
                }
            }
            ObjectData::Proc(proc) => {
                out.extend(proc.env);
                push(out, proc.self_value);
                push(out, proc.block);
                out.push(proc.target_class);
                out.push(proc.cref);
            }
            ObjectData::Env(env) => {
                out.extend(env.parent);
                for v in env.vars.values() {
                    push(out, *v);
                }
            }
        }
    }
}

/// Type-specific object payload
#[derive(Debug)]
pub enum ObjectData {
    /// Plain instance or exception (state lives in ivars)
    Plain,
    /// Class, module or singleton class
    Class(ClassData),
    /// String contents
    Str(String),
    /// Array elements
    Array(Vec<Value>),
    /// Hash entries
    Hash(HashTable),
    /// Closure
    Proc(ProcData),
    /// Captured local variables
    Env(EnvData),
}

// ============================================================================
// Classes and methods
// ============================================================================

/// Class, module or singleton class data
#[derive(Debug, Default)]
pub struct ClassData {
    /// Constant name, `None` for anonymous classes
    pub name: Option<Symbol>,
    /// Superclass (`None` for `Object`'s root and for modules)
    pub superclass: Option<ObjRef>,
    /// Lexically enclosing class or module, used for naming (`A::B`)
    pub outer: Option<ObjRef>,
    /// For singleton classes: the object it is attached to
    pub attached: Option<ObjRef>,
    /// Included modules, most recent last
    pub mixins: Vec<ObjRef>,
    /// Method table
    pub methods: FxHashMap<Symbol, Method>,
    /// Constant table
    pub consts: FxHashMap<Symbol, Value>,
    /// Type tag given to instances created by `new`
    pub instance_tt: Option<ValueType>,
}

/// A method table entry
#[derive(Clone)]
pub enum Method {
    /// Method defined in script code
    Script {
        /// Parsed definition
        def: Rc<MethodDef>,
        /// Lexical class for constant lookup
        cref: ObjRef,
    },
    /// Method implemented in Rust
    Native {
        /// Implementation
        func: NativeFn,
        /// Accepted arguments, checked before `func` runs
        aspec: ArgSpec,
    },
    /// `attr_reader`: returns the named instance variable
    AttrReader(Symbol),
    /// `attr_writer`: assigns the named instance variable
    AttrWriter(Symbol),
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Script { def, .. } => write!(f, "Script({:?})", def.name),
            Method::Native { aspec, .. } => write!(f, "Native({:?})", aspec),
            Method::AttrReader(name) => write!(f, "AttrReader({:?})", name),
            Method::AttrWriter(name) => write!(f, "AttrWriter({:?})", name),
        }
    }
}

/// Argument specification of a native method (the `aspec` of classic
/// embedding APIs). Specs combine with `|`.
///
/// ```ignore
/// let spec = ArgSpec::req(1) | ArgSpec::opt(1) | ArgSpec::block();
/// assert!(spec.accepts(1) && spec.accepts(2) && !spec.accepts(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgSpec {
    /// Required positional arguments
    pub required: u8,
    /// Optional positional arguments
    pub optional: u8,
    /// Accepts any number of additional arguments
    pub rest: bool,
    /// Accepts a block
    pub block: bool,
}

impl ArgSpec {
    /// No arguments
    pub const fn none() -> Self {
        ArgSpec {
            required: 0,
            optional: 0,
            rest: false,
            block: false,
        }
    }

    /// Any number of arguments
    pub const fn any() -> Self {
        ArgSpec {
            required: 0,
            optional: 0,
            rest: true,
            block: false,
        }
    }

    /// `n` required arguments
    pub const fn req(n: u8) -> Self {
        ArgSpec {
            required: n,
            optional: 0,
            rest: false,
            block: false,
        }
    }

    /// `n` optional arguments
    pub const fn opt(n: u8) -> Self {
        ArgSpec {
            required: 0,
            optional: n,
            rest: false,
            block: false,
        }
    }

    /// `required` required and `optional` optional arguments
    pub const fn arg(required: u8, optional: u8) -> Self {
        ArgSpec {
            required,
            optional,
            rest: false,
            block: false,
        }
    }

    /// A block argument
    pub const fn block() -> Self {
        ArgSpec {
            required: 0,
            optional: 0,
            rest: false,
            block: true,
        }
    }

    /// Whether a call with `argc` positional arguments is acceptable
    pub fn accepts(&self, argc: usize) -> bool {
        let min = self.required as usize;
        argc >= min && (self.rest || argc <= min + self.optional as usize)
    }

    /// Human readable expected count, as used in `ArgumentError` messages
    pub fn expected(&self) -> String {
        let min = self.required as usize;
        if self.rest {
            format!("{}+", min)
        } else if self.optional > 0 {
            format!("{}..{}", min, min + self.optional as usize)
        } else {
            min.to_string()
        }
    }
}

impl BitOr for ArgSpec {
    type Output = ArgSpec;

    fn bitor(self, rhs: ArgSpec) -> ArgSpec {
        ArgSpec {
            required: self.required.saturating_add(rhs.required),
            optional: self.optional.saturating_add(rhs.optional),
            rest: self.rest || rhs.rest,
            block: self.block || rhs.block,
        }
    }
}

// ============================================================================
// Procs and environments
// ============================================================================

/// Code a proc runs
#[derive(Debug, Clone)]
pub enum ProcBody {
    /// Literal block
    Block(Rc<BlockNode>),
    /// Compiled top-level program
    Program(Rc<Program>),
}

/// Closure data
#[derive(Debug, Clone)]
pub struct ProcData {
    /// Body
    pub body: ProcBody,
    /// Captured environment (`None` for top-level programs)
    pub env: Option<ObjRef>,
    /// `self` captured at creation
    pub self_value: Value,
    /// Block of the method the closure was created in
    pub block: Value,
    /// Class receiving `def` inside the body
    pub target_class: ObjRef,
    /// Lexical class for constant lookup
    pub cref: ObjRef,
    /// Name of the enclosing method
    pub mid: Option<Symbol>,
    /// Frame id of the enclosing method (target of `return`)
    pub home: u64,
    /// Lambda semantics: strict arity, `return` returns from the proc
    pub lambda: bool,
}

/// Local variable frame
#[derive(Debug, Default)]
pub struct EnvData {
    /// Variables
    pub vars: FxHashMap<Symbol, Value>,
    /// Enclosing environment
    pub parent: Option<ObjRef>,
}

// ============================================================================
// Hash tables
// ============================================================================

/// Lookup key of a hash entry. Strings compare by content, everything else
/// by identity.
#[derive(Debug, Clone, PartialEq)]
pub enum HashKey {
    /// String contents
    Str(String),
    /// Any other value
    Value(Value),
}

/// Insertion-ordered hash table
#[derive(Debug, Default)]
pub struct HashTable {
    /// `(lookup key, original key, value)`
    pub entries: Vec<(HashKey, Value, Value)>,
}

impl HashTable {
    /// Look up a value
    pub fn get(&self, key: &HashKey) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _, _)| k == key)
            .map(|(_, _, v)| *v)
    }

    /// Insert or replace
    pub fn insert(&mut self, key: HashKey, original: Value, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _, _)| *k == key) {
            entry.2 = value;
        } else {
            self.entries.push((key, original, value));
        }
    }

    /// Remove an entry, returning its value
    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _, _)| k == key)?;
        Some(self.entries.remove(pos).2)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argspec_combination() {
        let spec = ArgSpec::req(1) | ArgSpec::opt(2) | ArgSpec::block();
        assert!(!spec.accepts(0));
        assert!(spec.accepts(1));
        assert!(spec.accepts(3));
        assert!(!spec.accepts(4));
        assert!(spec.block);
        assert_eq!(spec.expected(), "1..3");

        assert!(ArgSpec::any().accepts(10));
        assert_eq!(ArgSpec::any().expected(), "0+");
        assert!(ArgSpec::none().accepts(0));
        assert!(!ArgSpec::none().accepts(1));
        assert_eq!(ArgSpec::arg(2, 0), ArgSpec::req(2));
    }

    #[test]
    fn test_hash_table_by_key() {
        let mut table = HashTable::default();
        table.insert(HashKey::Str("a".into()), Value::NIL, Value::fixnum(1));
        table.insert(HashKey::Value(Value::fixnum(2)), Value::fixnum(2), Value::fixnum(3));
        table.insert(HashKey::Str("a".into()), Value::NIL, Value::fixnum(4));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&HashKey::Str("a".into())), Some(Value::fixnum(4)));
        assert_eq!(table.remove(&HashKey::Value(Value::fixnum(2))), Some(Value::fixnum(3)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_trace_reports_children() {
        let class = ObjRef::new(0, 0);
        let item = ObjRef::new(1, 0);
        let obj = HeapObject::new(
            ValueType::Array,
            class,
            ObjectData::Array(vec![Value::fixnum(1), Value::object(ValueType::String, item)]),
        );
        let mut out = Vec::new();
        obj.trace(&mut out);
        assert_eq!(out, vec![class, item]);
    }
}
