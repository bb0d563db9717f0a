//! # Value Representation for the Venom VM
//!
//! This module defines [`Value`], the universal runtime type that lives on
//! the VM's operand stack, in globals, and inside struct properties.
//!
//! ## Supported variants
//! - `Number(f64)` — the only numeric type; every arithmetic/bitwise op
//!   operates on IEEE-754 doubles.
//! - `Bool(bool)` — two-state.
//! - `Null` — unit/absence value.
//! - `Str(Rc<str>)` — immutable, cheaply cloned string.
//! - `Function(Rc<Function>)` — a callable descriptor (entry offset + arity).
//! - `Pointer(Pointer)` — a safe, index-based address produced by `&`.
//! - `Heap(StructRef)` — shared reference to a heap-allocated struct
//!   instance.
//!
//! ## Reference counting
//! `StructRef` is `Rc<RefCell<StructInstance>>`. Cloning a `Value::Heap`
//! bumps the `Rc` strong count; dropping the last clone frees the cell and,
//! transitively, every property it owns. This gives the manual
//! incref/decref protocol described for the source VM "for free" through
//! Rust's ownership and `Drop` — no explicit refcount bookkeeping is needed
//! anywhere in this crate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

/// Shared handle to a heap-allocated struct instance.
pub type StructRef = Rc<RefCell<StructInstance>>;

/// A heap-allocated instance of a struct blueprint.
///
/// Created with `properties` pre-populated from the blueprint's declared
/// property list (defaulted to `Value::Null`), so the invariant
/// `instance.properties.keys() ⊇ blueprint.properties` holds immediately
/// after `STRUCT` runs, even before any `SETATTR` has fired.
pub struct StructInstance {
    pub blueprint: String,
    pub properties: HashMap<String, Value>,
}

/// A callable function or method descriptor.
///
/// For methods, `param_count` includes the implicit `self` receiver bound
/// as local slot 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub entry_offset: usize,
    pub param_count: usize,
}

/// Compile-time/runtime descriptor of a struct type: its declared property
/// order and the methods attached to it via `impl`.
#[derive(Clone, Debug, Default)]
pub struct StructBlueprint {
    pub name: String,
    pub properties: Vec<String>,
    pub methods: HashMap<String, Function>,
}

/// A safe, index-based address produced by `&` and consumed by `*`.
///
/// The source VM models these as raw pointers into the code buffer or value
/// stack; on a memory-safe target we represent the same three addressable
/// locations as plain indices/keys instead, so `DEREF`/`DEREFSET` reduce to
/// ordinary bounds-checked indexing.
#[derive(Clone)]
pub enum Pointer {
    /// Absolute index into the VM's value stack.
    Stack(usize),
    /// A global variable, addressed by name.
    Global(String),
    /// A property slot on a specific struct instance.
    Attr(StructRef, String),
}

/// Runtime value type: every stack slot, global, and struct property holds
/// one of these.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Null,
    Str(Rc<str>),
    Function(Rc<Function>),
    Pointer(Pointer),
    Heap(StructRef),
}

impl Value {
    /// Human-readable tag name, used in type-error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            Value::Pointer(_) => "pointer",
            Value::Heap(_) => "struct",
        }
    }

    /// Unwrap a `Bool`, or fail with a type error. Conditionals (`JZ`) and
    /// logical `NOT` require an actual boolean rather than coercing
    /// truthiness from other types.
    pub fn as_bool(&self) -> Result<bool, crate::error::RuntimeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(crate::error::RuntimeError::TypeError(format!(
                "expected bool, found {}",
                other.type_name()
            ))),
        }
    }

    /// Unwrap a `Number`, or fail with a type error.
    pub fn as_number(&self) -> Result<f64, crate::error::RuntimeError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(crate::error::RuntimeError::TypeError(format!(
                "expected number, found {}",
                other.type_name()
            ))),
        }
    }

    /// Render the value as text for `PRINT` and error messages.
    ///
    /// Struct printing needs the blueprint table to list properties in
    /// declaration order (a `HashMap` alone has no stable order), and cycle
    /// detection by `Rc` pointer identity keeps self-referential structs
    /// from looping forever.
    pub fn display(&self, blueprints: &HashMap<String, StructBlueprint>) -> String {
        let mut seen = HashSet::new();
        display_inner(self, blueprints, &mut seen)
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn display_inner(
    value: &Value,
    blueprints: &HashMap<String, StructBlueprint>,
    seen: &mut HashSet<usize>,
) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Str(s) => s.to_string(),
        Value::Function(f) => format!("<function {}>", f.name),
        Value::Pointer(_) => "<pointer>".to_string(),
        Value::Heap(rc) => {
            let ptr = Rc::as_ptr(rc) as usize;
            if !seen.insert(ptr) {
                return format!("{} {{...}}", rc.borrow().blueprint);
            }
            let inst = rc.borrow();
            let order: &[String] = blueprints
                .get(&inst.blueprint)
                .map(|bp| bp.properties.as_slice())
                .unwrap_or(&[]);
            let mut fields = Vec::with_capacity(order.len());
            for name in order {
                if let Some(v) = inst.properties.get(name) {
                    fields.push(format!("{}: {}", name, display_inner(v, blueprints, seen)));
                }
            }
            format!("{} {{ {} }}", inst.blueprint, fields.join(", "))
        }
    }
}
