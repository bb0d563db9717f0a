//! Control-flow opcode handlers: printing, jumps, and the two call
//! conventions (`CALL` for plain functions, `CALL_METHOD` for methods where
//! the receiver becomes local 0 without being removed from the stack).

use std::collections::HashMap;
use std::io::Write;

use super::{pop, push, read_i16, read_u32};
use crate::error::RuntimeError;
use crate::value::{Function, StructBlueprint, Value};

pub(super) fn handle_print(
    stack: &mut Vec<Value>,
    blueprints: &HashMap<String, StructBlueprint>,
    out: &mut dyn Write,
) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    let _ = writeln!(out, "{}", v.display(blueprints));
    Ok(())
}

/// `JZ`: pop a bool, jump if false. The 16-bit operand is relative to the
/// offset immediately after itself (`site + 2`).
pub(super) fn handle_jz(code: &[u8], ip: &mut usize, stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let site = *ip;
    let offset = read_i16(code, ip);
    let cond = pop(stack)?.as_bool()?;
    if !cond {
        *ip = ((site + 2) as i64 + offset as i64) as usize;
    }
    Ok(())
}

/// `JMP`: unconditional jump, same displacement convention as `JZ`.
pub(super) fn handle_jmp(code: &[u8], ip: &mut usize) {
    let site = *ip;
    let offset = read_i16(code, ip);
    *ip = ((site + 2) as i64 + offset as i64) as usize;
}

/// `CALL`: the callee sits below its `argcount` arguments. It is removed
/// from the stack (not left as a phantom local), after which the frame
/// pointer is simply `stack.len() - argcount`.
pub(super) fn handle_call(
    code: &[u8],
    ip: &mut usize,
    stack: &mut Vec<Value>,
    frame_pointers: &mut Vec<usize>,
    ret_stack: &mut Vec<usize>,
) -> Result<(), RuntimeError> {
    let argcount = read_u32(code, ip) as usize;
    if stack.len() < argcount + 1 {
        return Err(RuntimeError::VmInvariant("stack underflow on call".to_string()));
    }
    let callee_idx = stack.len() - argcount - 1;
    let callee = stack.remove(callee_idx);
    let func = match callee {
        Value::Function(f) => f,
        other => {
            return Err(RuntimeError::TypeError(format!(
                "'{}' is not callable",
                other.type_name()
            )))
        }
    };
    if func.param_count != argcount {
        return Err(RuntimeError::ArityMismatch {
            name: func.name.clone(),
            expected: func.param_count,
            got: argcount,
        });
    }
    ret_stack.push(*ip);
    frame_pointers.push(stack.len() - argcount);
    *ip = func.entry_offset;
    Ok(())
}

/// `CALL_METHOD`: unlike `CALL`, the receiver stays on the stack and becomes
/// local 0; `method.param_count` already accounts for it.
pub(super) fn handle_call_method(
    code: &[u8],
    ip: &mut usize,
    sp: &[String],
    stack: &mut Vec<Value>,
    frame_pointers: &mut Vec<usize>,
    ret_stack: &mut Vec<usize>,
    blueprints: &HashMap<String, StructBlueprint>,
) -> Result<(), RuntimeError> {
    let method_idx = read_u32(code, ip);
    let argcount = read_u32(code, ip) as usize;
    let method_name = &sp[method_idx as usize];
    if stack.len() < argcount + 1 {
        return Err(RuntimeError::VmInvariant("stack underflow on method call".to_string()));
    }
    let receiver_idx = stack.len() - argcount - 1;
    let blueprint_name = match &stack[receiver_idx] {
        Value::Heap(rc) => rc.borrow().blueprint.clone(),
        other => {
            return Err(RuntimeError::TypeError(format!(
                "'{}' is not a struct",
                other.type_name()
            )))
        }
    };
    let method: Function = blueprints
        .get(&blueprint_name)
        .ok_or_else(|| RuntimeError::UnknownBlueprint(blueprint_name.clone()))?
        .methods
        .get(method_name)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownMethod(method_name.clone()))?;
    if method.param_count != argcount + 1 {
        return Err(RuntimeError::ArityMismatch {
            name: method.name.clone(),
            expected: method.param_count,
            got: argcount + 1,
        });
    }
    ret_stack.push(*ip);
    frame_pointers.push(receiver_idx);
    *ip = method.entry_offset;
    Ok(())
}

/// `RET`: truncate the stack back to the current frame's base and push the
/// return value. Because `CALL` already removed the callee from below its
/// arguments, this alone restores the caller's exact stack shape.
pub(super) fn handle_ret(
    stack: &mut Vec<Value>,
    frame_pointers: &mut Vec<usize>,
    ret_stack: &mut Vec<usize>,
    ip: &mut usize,
) -> Result<(), RuntimeError> {
    let retval = pop(stack)?;
    let fp = frame_pointers
        .pop()
        .ok_or_else(|| RuntimeError::VmInvariant("frame pointer underflow".to_string()))?;
    stack.truncate(fp);
    push(stack, retval)?;
    *ip = ret_stack
        .pop()
        .ok_or_else(|| RuntimeError::VmInvariant("return address underflow".to_string()))?;
    Ok(())
}
