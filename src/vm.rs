//! # Stack-Based Bytecode Virtual Machine
//!
//! Executes a [`BytecodeChunk`] produced by the compiler. The value stack
//! doubles as the storage for every function's locals: a call doesn't open
//! a separate environment, it just remembers where its region of the shared
//! stack begins (`frame_pointers`) and where to resume the caller
//! (`ret_stack`). `DEEPGET`/`DEEPSET` address `stack[frame_pointer + idx]`.
//!
//! Execution happens in two passes:
//! 1. [`run_prelude`] walks the struct/impl declarations hoisted to the
//!    front of the chunk, registering blueprints and their methods. It
//!    never falls into a method body — each `impl` block's bodies sit
//!    behind a `JMP` straight to its `IMPL` registration instruction.
//! 2. The main loop starts at `chunk.entry_point` and interprets the actual
//!    program, dispatching to `ops_arith`/`ops_control`/`ops_struct` for
//!    everything but the handful of opcodes (literals, globals, locals)
//!    handled inline here.

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use crate::bytecode::{BytecodeChunk, Op, STACK_MAX};
use crate::error::RuntimeError;
use crate::value::{Function, Pointer, StructBlueprint, Value};

mod ops_arith;
mod ops_control;
mod ops_struct;

#[cfg(test)]
mod tests;

fn push(stack: &mut Vec<Value>, v: Value) -> Result<(), RuntimeError> {
    if stack.len() >= STACK_MAX {
        return Err(RuntimeError::VmInvariant("stack overflow".to_string()));
    }
    stack.push(v);
    Ok(())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack
        .pop()
        .ok_or_else(|| RuntimeError::VmInvariant("stack underflow".to_string()))
}

fn read_u32(code: &[u8], ip: &mut usize) -> u32 {
    let bytes: [u8; 4] = code[*ip..*ip + 4].try_into().unwrap();
    *ip += 4;
    u32::from_be_bytes(bytes)
}

fn read_i16(code: &[u8], ip: &mut usize) -> i16 {
    let bytes: [u8; 2] = code[*ip..*ip + 2].try_into().unwrap();
    *ip += 2;
    i16::from_be_bytes(bytes)
}

fn read_f64(code: &[u8], ip: &mut usize) -> f64 {
    let bytes: [u8; 8] = code[*ip..*ip + 8].try_into().unwrap();
    *ip += 8;
    f64::from_be_bytes(bytes)
}

/// Interpret the struct-blueprint/impl prelude, registering every blueprint
/// and method before the real program runs. `JMP` here is not control flow
/// over user code, it's the compiler's way of skipping each `impl` block's
/// method bodies so they aren't executed as top-level statements.
fn run_prelude(
    code: &[u8],
    entry_point: usize,
    sp: &[String],
    blueprints: &mut HashMap<String, StructBlueprint>,
) -> Result<(), RuntimeError> {
    let mut ip = 0;
    while ip < entry_point {
        let opcode = code[ip];
        ip += 1;
        let op = Op::from_u8(opcode)
            .ok_or_else(|| RuntimeError::VmInvariant(format!("unknown opcode {} in prelude", opcode)))?;
        match op {
            Op::StructBlueprint => {
                let name_idx = read_u32(code, &mut ip);
                let propcount = read_u32(code, &mut ip);
                let mut properties = Vec::with_capacity(propcount as usize);
                for _ in 0..propcount {
                    let prop_idx = read_u32(code, &mut ip);
                    let _position = read_u32(code, &mut ip);
                    properties.push(sp[prop_idx as usize].clone());
                }
                let name = sp[name_idx as usize].clone();
                blueprints.insert(
                    name.clone(),
                    StructBlueprint {
                        name,
                        properties,
                        methods: HashMap::new(),
                    },
                );
            }
            Op::Jmp => {
                let site = ip;
                let offset = read_i16(code, &mut ip);
                ip = ((site + 2) as i64 + offset as i64) as usize;
            }
            Op::Impl => {
                let bp_idx = read_u32(code, &mut ip);
                let method_count = read_u32(code, &mut ip);
                let bp_name = sp[bp_idx as usize].clone();
                for _ in 0..method_count {
                    let name_idx = read_u32(code, &mut ip);
                    let paramcount = read_u32(code, &mut ip);
                    let location = read_u32(code, &mut ip);
                    let method_name = sp[name_idx as usize].clone();
                    let func = Function {
                        name: method_name.clone(),
                        entry_offset: location as usize,
                        param_count: paramcount as usize,
                    };
                    blueprints
                        .get_mut(&bp_name)
                        .ok_or_else(|| RuntimeError::UnknownBlueprint(bp_name.clone()))?
                        .methods
                        .insert(method_name, func);
                }
            }
            other => {
                return Err(RuntimeError::VmInvariant(format!(
                    "unexpected {:?} in prelude",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Run a compiled chunk to completion, writing `PRINT` output to stdout.
///
/// `funcs` is preloaded into the VM's globals as `Value::Function`s before
/// the first instruction executes, so top-level functions are callable by
/// name (including recursively and out of declaration order) without any
/// in-stream `SET_GLOBAL`.
pub fn run(chunk: &BytecodeChunk, funcs: &HashMap<String, Function>) -> Result<(), RuntimeError> {
    run_with_output(chunk, funcs, &mut io::stdout())
}

/// Same as [`run`], but `PRINT` writes go to `out` instead of stdout. The
/// REPL uses this to capture a block's output so it can diff against what
/// was already shown and print only the new suffix.
pub fn run_with_output(
    chunk: &BytecodeChunk,
    funcs: &HashMap<String, Function>,
    out: &mut dyn Write,
) -> Result<(), RuntimeError> {
    let code = &chunk.code;
    let mut stack: Vec<Value> = Vec::new();
    let mut globals: HashMap<String, Value> = HashMap::new();
    for (name, f) in funcs {
        globals.insert(name.clone(), Value::Function(Rc::new(f.clone())));
    }
    let mut blueprints: HashMap<String, StructBlueprint> = HashMap::new();
    let mut frame_pointers: Vec<usize> = Vec::new();
    let mut ret_stack: Vec<usize> = Vec::new();

    run_prelude(code, chunk.entry_point, &chunk.sp, &mut blueprints)?;

    let mut ip = chunk.entry_point;
    while ip < code.len() {
        let opcode = code[ip];
        ip += 1;
        let op = Op::from_u8(opcode)
            .ok_or_else(|| RuntimeError::VmInvariant(format!("unknown opcode {}", opcode)))?;
        match op {
            Op::Print => ops_control::handle_print(&mut stack, &blueprints, out)?,
            Op::Add => ops_arith::handle_add(&mut stack)?,
            Op::Sub => ops_arith::handle_sub(&mut stack)?,
            Op::Mul => ops_arith::handle_mul(&mut stack)?,
            Op::Div => ops_arith::handle_div(&mut stack)?,
            Op::Mod => ops_arith::handle_mod(&mut stack)?,
            Op::Eq => ops_arith::handle_eq(&mut stack, &blueprints)?,
            Op::Gt => ops_arith::handle_gt(&mut stack)?,
            Op::Lt => ops_arith::handle_lt(&mut stack)?,
            Op::BitAnd => ops_arith::handle_bitand(&mut stack)?,
            Op::BitOr => ops_arith::handle_bitor(&mut stack)?,
            Op::BitXor => ops_arith::handle_bitxor(&mut stack)?,
            Op::BitNot => ops_arith::handle_bitnot(&mut stack)?,
            Op::BitShl => ops_arith::handle_bitshl(&mut stack)?,
            Op::BitShr => ops_arith::handle_bitshr(&mut stack)?,
            Op::Not => ops_arith::handle_not(&mut stack)?,
            Op::Neg => ops_arith::handle_neg(&mut stack)?,
            Op::True => push(&mut stack, Value::Bool(true))?,
            Op::Null => push(&mut stack, Value::Null)?,
            Op::Const => {
                let v = read_f64(code, &mut ip);
                push(&mut stack, Value::Number(v))?;
            }
            Op::Str => {
                let idx = read_u32(code, &mut ip);
                push(&mut stack, Value::Str(Rc::from(chunk.sp[idx as usize].as_str())))?;
            }
            Op::Strcat => ops_arith::handle_strcat(&mut stack, &blueprints)?,
            Op::Jz => ops_control::handle_jz(code, &mut ip, &mut stack)?,
            Op::Jmp => ops_control::handle_jmp(code, &mut ip),
            Op::SetGlobal => {
                let idx = read_u32(code, &mut ip);
                let name = chunk.sp[idx as usize].clone();
                let v = pop(&mut stack)?;
                globals.insert(name, v);
            }
            Op::GetGlobal => {
                let idx = read_u32(code, &mut ip);
                let name = &chunk.sp[idx as usize];
                let v = globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::UndefinedGlobal(name.clone()))?;
                push(&mut stack, v)?;
            }
            Op::GetGlobalPtr => {
                let idx = read_u32(code, &mut ip);
                let name = chunk.sp[idx as usize].clone();
                push(&mut stack, Value::Pointer(Pointer::Global(name)))?;
            }
            Op::DeepGet => {
                let idx = read_u32(code, &mut ip) as usize;
                let fp = *frame_pointers.last().unwrap_or(&0);
                let v = stack[fp + idx].clone();
                push(&mut stack, v)?;
            }
            Op::DeepSet => {
                let idx = read_u32(code, &mut ip) as usize;
                let fp = *frame_pointers.last().unwrap_or(&0);
                let v = pop(&mut stack)?;
                stack[fp + idx] = v;
            }
            Op::DeepGetPtr => {
                let idx = read_u32(code, &mut ip) as usize;
                let fp = *frame_pointers.last().unwrap_or(&0);
                push(&mut stack, Value::Pointer(Pointer::Stack(fp + idx)))?;
            }
            Op::SetAttr => ops_struct::handle_set_attr(code, &mut ip, &chunk.sp, &mut stack)?,
            Op::GetAttr => ops_struct::handle_get_attr(code, &mut ip, &chunk.sp, &mut stack)?,
            Op::GetAttrPtr => ops_struct::handle_get_attr_ptr(code, &mut ip, &chunk.sp, &mut stack)?,
            Op::Struct => ops_struct::handle_struct(code, &mut ip, &chunk.sp, &mut stack, &blueprints)?,
            Op::Ret => ops_control::handle_ret(&mut stack, &mut frame_pointers, &mut ret_stack, &mut ip)?,
            Op::Pop => {
                pop(&mut stack)?;
            }
            Op::Deref => ops_struct::handle_deref(&mut stack, &globals)?,
            Op::DerefSet => ops_struct::handle_deref_set(&mut stack, &mut globals)?,
            Op::Call => ops_control::handle_call(code, &mut ip, &mut stack, &mut frame_pointers, &mut ret_stack)?,
            Op::CallMethod => ops_control::handle_call_method(
                code,
                &mut ip,
                &chunk.sp,
                &mut stack,
                &mut frame_pointers,
                &mut ret_stack,
                &blueprints,
            )?,
            Op::StructBlueprint | Op::Impl => {
                return Err(RuntimeError::VmInvariant(
                    "struct/impl instruction outside prelude".to_string(),
                ))
            }
        }
    }
    Ok(())
}
