//! Arithmetic, comparison, and bitwise opcode handlers.
//!
//! Every handler pops its operands with the top of stack as the right-hand
//! side, mirroring a left-to-right compiled expression (`compile(lhs);
//! compile(rhs); emit(op)`).

use std::collections::HashMap;
use std::rc::Rc;

use super::{pop, push};
use crate::error::RuntimeError;
use crate::value::{Pointer, StructBlueprint, Value};

fn type_error(op: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "'{}' requires matching numeric operands, got {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

pub(super) fn handle_add(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Number(x + y)),
        _ => Err(type_error("+", &a, &b)),
    }
}

pub(super) fn handle_sub(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Number(x - y)),
        _ => Err(type_error("-", &a, &b)),
    }
}

pub(super) fn handle_mul(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Number(x * y)),
        _ => Err(type_error("*", &a, &b)),
    }
}

/// Division by zero is not a VM error: IEEE-754 yields `inf`/`-inf`/`NaN`,
/// same as the rest of the arithmetic ops.
pub(super) fn handle_div(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Number(x / y)),
        _ => Err(type_error("/", &a, &b)),
    }
}

pub(super) fn handle_mod(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Number(x % y)),
        _ => Err(type_error("%", &a, &b)),
    }
}

pub(super) fn handle_gt(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Bool(x > y)),
        _ => Err(type_error(">", &a, &b)),
    }
}

pub(super) fn handle_lt(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => push(stack, Value::Bool(x < y)),
        _ => Err(type_error("<", &a, &b)),
    }
}

pub(super) fn handle_not(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let a = pop(stack)?;
    let b = a.as_bool()?;
    push(stack, Value::Bool(!b))
}

pub(super) fn handle_neg(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let a = pop(stack)?;
    let n = a.as_number()?;
    push(stack, Value::Number(-n))
}

/// Truncate a double to bits for bitwise ops. `NaN` has no sensible integer
/// representation, so it coerces to zero rather than erroring.
fn to_bits(v: &Value) -> Result<i64, RuntimeError> {
    let n = v.as_number()?;
    Ok(if n.is_nan() { 0 } else { n as i64 })
}

pub(super) fn handle_bitand(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let (x, y) = (to_bits(&a)?, to_bits(&b)?);
    push(stack, Value::Number((x & y) as f64))
}

pub(super) fn handle_bitor(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let (x, y) = (to_bits(&a)?, to_bits(&b)?);
    push(stack, Value::Number((x | y) as f64))
}

pub(super) fn handle_bitxor(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let (x, y) = (to_bits(&a)?, to_bits(&b)?);
    push(stack, Value::Number((x ^ y) as f64))
}

pub(super) fn handle_bitshl(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let (x, y) = (to_bits(&a)?, to_bits(&b)?);
    push(stack, Value::Number(((x << (y & 63)) as f64)))
}

pub(super) fn handle_bitshr(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let (x, y) = (to_bits(&a)?, to_bits(&b)?);
    push(stack, Value::Number(((x >> (y & 63)) as f64)))
}

pub(super) fn handle_bitnot(stack: &mut Vec<Value>) -> Result<(), RuntimeError> {
    let a = pop(stack)?;
    let x = to_bits(&a)?;
    push(stack, Value::Number((!x) as f64))
}

/// `STRCAT`: concatenate the textual form of both operands. Unlike `ADD`,
/// any value displays, not just strings, so `"count: " + n` works.
pub(super) fn handle_strcat(
    stack: &mut Vec<Value>,
    blueprints: &HashMap<String, StructBlueprint>,
) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let joined = format!("{}{}", a.display(blueprints), b.display(blueprints));
    push(stack, Value::Str(Rc::from(joined.as_str())))
}

/// Structural equality. Numbers/bools/strings/null compare by value;
/// functions compare by identity (same name, entry point, arity); structs
/// recurse property-by-property in the left operand's blueprint order, so
/// two instances of different blueprints are a type error rather than
/// silently `false`.
pub(super) fn values_equal(
    a: &Value,
    b: &Value,
    blueprints: &HashMap<String, StructBlueprint>,
) -> Result<bool, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Null, Value::Null) => Ok(true),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Function(x), Value::Function(y)) => Ok(x == y),
        (Value::Pointer(x), Value::Pointer(y)) => Ok(pointers_equal(x, y)),
        (Value::Heap(x), Value::Heap(y)) => {
            let xb = x.borrow();
            let yb = y.borrow();
            if xb.blueprint != yb.blueprint {
                return Err(RuntimeError::TypeError(format!(
                    "cannot compare struct '{}' with struct '{}'",
                    xb.blueprint, yb.blueprint
                )));
            }
            let order: &[String] = blueprints
                .get(&xb.blueprint)
                .map(|bp| bp.properties.as_slice())
                .unwrap_or(&[]);
            for name in order {
                match (xb.properties.get(name), yb.properties.get(name)) {
                    (Some(av), Some(bv)) => {
                        if !values_equal(av, bv, blueprints)? {
                            return Ok(false);
                        }
                    }
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        _ => Err(RuntimeError::TypeError(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn pointers_equal(a: &Pointer, b: &Pointer) -> bool {
    match (a, b) {
        (Pointer::Stack(x), Pointer::Stack(y)) => x == y,
        (Pointer::Global(x), Pointer::Global(y)) => x == y,
        (Pointer::Attr(x, nx), Pointer::Attr(y, ny)) => Rc::ptr_eq(x, y) && nx == ny,
        _ => false,
    }
}

pub(super) fn handle_eq(
    stack: &mut Vec<Value>,
    blueprints: &HashMap<String, StructBlueprint>,
) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let eq = values_equal(&a, &b, blueprints)?;
    push(stack, Value::Bool(eq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_requires_numbers() {
        let mut stack = vec![Value::Str(Rc::from("x")), Value::Number(1.0)];
        assert!(handle_add(&mut stack).is_err());
    }

    #[test]
    fn div_by_zero_yields_infinity() {
        let mut stack = vec![Value::Number(1.0), Value::Number(0.0)];
        handle_div(&mut stack).unwrap();
        match stack.pop().unwrap() {
            Value::Number(n) => assert!(n.is_infinite()),
            _ => panic!("expected number"),
        }
    }

    #[test]
    fn bitand_coerces_nan_to_zero() {
        let mut stack = vec![Value::Number(f64::NAN), Value::Number(5.0)];
        handle_bitand(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap().as_number().unwrap(), 0.0);
    }

    #[test]
    fn eq_rejects_mixed_types() {
        let blueprints = HashMap::new();
        let mut stack = vec![Value::Number(1.0), Value::Str(Rc::from("1"))];
        assert!(handle_eq(&mut stack, &blueprints).is_err());
    }
}
