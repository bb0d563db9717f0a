//! Struct and pointer opcode handlers: instance creation, attribute
//! access, and the safe address-of/dereference machinery.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{pop, push, read_u32};
use crate::error::RuntimeError;
use crate::value::{Pointer, StructBlueprint, StructInstance, Value};

fn expect_heap(v: Value) -> Result<crate::value::StructRef, RuntimeError> {
    match v {
        Value::Heap(rc) => Ok(rc),
        other => Err(RuntimeError::TypeError(format!(
            "expected struct, found {}",
            other.type_name()
        ))),
    }
}

fn expect_pointer(v: Value) -> Result<Pointer, RuntimeError> {
    match v {
        Value::Pointer(p) => Ok(p),
        other => Err(RuntimeError::TypeError(format!(
            "expected pointer, found {}",
            other.type_name()
        ))),
    }
}

/// `STRUCT`: allocate a new instance with every declared property
/// defaulted to `Null`.
pub(super) fn handle_struct(
    code: &[u8],
    ip: &mut usize,
    sp: &[String],
    stack: &mut Vec<Value>,
    blueprints: &HashMap<String, StructBlueprint>,
) -> Result<(), RuntimeError> {
    let name_idx = read_u32(code, ip);
    let name = &sp[name_idx as usize];
    let bp = blueprints
        .get(name)
        .ok_or_else(|| RuntimeError::UnknownBlueprint(name.clone()))?;
    let mut properties = HashMap::with_capacity(bp.properties.len());
    for prop in &bp.properties {
        properties.insert(prop.clone(), Value::Null);
    }
    let instance = StructInstance {
        blueprint: name.clone(),
        properties,
    };
    push(stack, Value::Heap(Rc::new(RefCell::new(instance))))
}

/// `GETATTR`: pop a struct, push the named property's value.
pub(super) fn handle_get_attr(
    code: &[u8],
    ip: &mut usize,
    sp: &[String],
    stack: &mut Vec<Value>,
) -> Result<(), RuntimeError> {
    let name_idx = read_u32(code, ip);
    let name = &sp[name_idx as usize];
    let rc = expect_heap(pop(stack)?)?;
    let value = rc
        .borrow()
        .properties
        .get(name)
        .cloned()
        .ok_or_else(|| RuntimeError::UndefinedProperty(name.clone()))?;
    push(stack, value)
}

/// `SETATTR`: pop a value then a struct, store the value under the named
/// property, and push the struct back so assignment chains and
/// struct-literal field initialization can keep building on it.
pub(super) fn handle_set_attr(
    code: &[u8],
    ip: &mut usize,
    sp: &[String],
    stack: &mut Vec<Value>,
) -> Result<(), RuntimeError> {
    let name_idx = read_u32(code, ip);
    let name = &sp[name_idx as usize];
    let value = pop(stack)?;
    let rc = expect_heap(pop(stack)?)?;
    rc.borrow_mut().properties.insert(name.clone(), value);
    push(stack, Value::Heap(rc))
}

/// `GETATTR_PTR`: pop a struct, push a pointer to one of its properties.
pub(super) fn handle_get_attr_ptr(
    code: &[u8],
    ip: &mut usize,
    sp: &[String],
    stack: &mut Vec<Value>,
) -> Result<(), RuntimeError> {
    let name_idx = read_u32(code, ip);
    let name = sp[name_idx as usize].clone();
    let rc = expect_heap(pop(stack)?)?;
    push(stack, Value::Pointer(Pointer::Attr(rc, name)))
}

/// `DEREF`: pop a pointer, push the value it addresses.
pub(super) fn handle_deref(
    stack: &mut Vec<Value>,
    globals: &HashMap<String, Value>,
) -> Result<(), RuntimeError> {
    let ptr = expect_pointer(pop(stack)?)?;
    let value = match &ptr {
        Pointer::Stack(idx) => stack
            .get(*idx)
            .cloned()
            .ok_or_else(|| RuntimeError::VmInvariant("dangling stack pointer".to_string()))?,
        Pointer::Global(name) => globals
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedGlobal(name.clone()))?,
        Pointer::Attr(rc, name) => rc
            .borrow()
            .properties
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedProperty(name.clone()))?,
    };
    push(stack, value)
}

/// `DEREFSET`: pop a value then a pointer, store through the pointer.
/// Leaves nothing on the stack; the compiler re-derefs if the assignment's
/// value is needed.
pub(super) fn handle_deref_set(
    stack: &mut Vec<Value>,
    globals: &mut HashMap<String, Value>,
) -> Result<(), RuntimeError> {
    let value = pop(stack)?;
    let ptr = expect_pointer(pop(stack)?)?;
    match ptr {
        Pointer::Stack(idx) => {
            if idx >= stack.len() {
                return Err(RuntimeError::VmInvariant("dangling stack pointer".to_string()));
            }
            stack[idx] = value;
        }
        Pointer::Global(name) => {
            globals.insert(name, value);
        }
        Pointer::Attr(rc, name) => {
            rc.borrow_mut().properties.insert(name, value);
        }
    }
    Ok(())
}
