//! Direct-bytecode-sequence tests: build a chunk by hand with
//! [`ChunkBuilder`] and run it, bypassing the lexer/parser/compiler so each
//! test isolates one VM behavior.

use std::collections::HashMap;

use super::run;
use crate::bytecode::{ChunkBuilder, Op};
use crate::error::RuntimeError;
use crate::value::Function;

#[test]
fn division_by_zero_yields_infinity_not_an_error() {
    let mut cb = ChunkBuilder::new();
    cb.mark_entry_point();
    cb.record_number(1.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(1.0);
    cb.record_number(0.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(0.0);
    cb.emit_op(Op::Div);
    cb.emit_op(Op::Print);
    let chunk = cb.finish();
    assert!(run(&chunk, &HashMap::new()).is_ok());
}

#[test]
fn reading_an_unbound_global_errors() {
    let mut cb = ChunkBuilder::new();
    cb.mark_entry_point();
    let idx = cb.intern("missing");
    cb.emit_op(Op::GetGlobal);
    cb.emit_u32(idx);
    let chunk = cb.finish();
    let err = run(&chunk, &HashMap::new()).unwrap_err();
    assert!(matches!(err, RuntimeError::UndefinedGlobal(name) if name == "missing"));
}

#[test]
fn calling_with_wrong_argcount_errors() {
    let mut cb = ChunkBuilder::new();
    cb.mark_entry_point();
    let idx = cb.intern("double");
    cb.emit_op(Op::GetGlobal);
    cb.emit_u32(idx);
    cb.record_number(5.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(5.0);
    cb.emit_op(Op::Call);
    cb.emit_u32(1);
    let chunk = cb.finish();
    let mut funcs = HashMap::new();
    funcs.insert(
        "double".to_string(),
        Function {
            name: "double".to_string(),
            entry_offset: 0,
            param_count: 2,
        },
    );
    let err = run(&chunk, &funcs).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ArityMismatch { expected: 2, got: 1, .. }
    ));
}

#[test]
fn constructing_an_unregistered_blueprint_errors() {
    let mut cb = ChunkBuilder::new();
    cb.mark_entry_point();
    let idx = cb.intern("Ghost");
    cb.emit_op(Op::Struct);
    cb.emit_u32(idx);
    let chunk = cb.finish();
    let err = run(&chunk, &HashMap::new()).unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownBlueprint(name) if name == "Ghost"));
}

#[test]
fn struct_blueprint_then_setattr_getattr_round_trips() {
    let mut cb = ChunkBuilder::new();
    let name_idx = cb.intern("Point");
    cb.emit_op(Op::StructBlueprint);
    cb.emit_u32(name_idx);
    cb.emit_u32(1);
    let prop_idx = cb.intern("x");
    cb.emit_u32(prop_idx);
    cb.emit_u32(0);
    cb.mark_entry_point();
    cb.emit_op(Op::Struct);
    cb.emit_u32(name_idx);
    cb.record_number(3.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(3.0);
    cb.emit_op(Op::SetAttr);
    cb.emit_u32(prop_idx);
    cb.emit_op(Op::GetAttr);
    cb.emit_u32(prop_idx);
    cb.emit_op(Op::Print);
    let chunk = cb.finish();
    assert!(run(&chunk, &HashMap::new()).is_ok());
}

#[test]
fn call_and_ret_restore_the_caller_stack() {
    let mut cb = ChunkBuilder::new();
    cb.mark_entry_point();
    let name_idx = cb.intern("identity");

    cb.emit_op(Op::Jmp);
    let jmp_site = cb.emit_jump_placeholder();
    let entry_offset = cb.len();
    cb.emit_op(Op::DeepGet);
    cb.emit_u32(0);
    cb.emit_op(Op::Ret);
    let after_body = cb.len();
    cb.patch_jump(jmp_site, after_body).unwrap();

    cb.emit_op(Op::GetGlobal);
    cb.emit_u32(name_idx);
    cb.record_number(7.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(7.0);
    cb.emit_op(Op::Call);
    cb.emit_u32(1);
    cb.emit_op(Op::Pop);
    let chunk = cb.finish();

    let mut funcs = HashMap::new();
    funcs.insert(
        "identity".to_string(),
        Function {
            name: "identity".to_string(),
            entry_offset,
            param_count: 1,
        },
    );
    assert!(run(&chunk, &funcs).is_ok());
}

#[test]
fn call_method_binds_receiver_as_local_zero() {
    let mut cb = ChunkBuilder::new();
    let bp_idx = cb.intern("Counter");
    cb.emit_op(Op::StructBlueprint);
    cb.emit_u32(bp_idx);
    cb.emit_u32(1);
    let prop_idx = cb.intern("n");
    cb.emit_u32(prop_idx);
    cb.emit_u32(0);

    cb.emit_op(Op::Jmp);
    let jmp_site = cb.emit_jump_placeholder();
    let method_offset = cb.len();
    // fn get(self) { return self.n; }
    cb.emit_op(Op::DeepGet);
    cb.emit_u32(0);
    cb.emit_op(Op::GetAttr);
    cb.emit_u32(prop_idx);
    cb.emit_op(Op::Ret);
    let after_body = cb.len();
    cb.patch_jump(jmp_site, after_body).unwrap();

    let method_name_idx = cb.intern("get");
    cb.emit_op(Op::Impl);
    cb.emit_u32(bp_idx);
    cb.emit_u32(1);
    cb.emit_u32(method_name_idx);
    cb.emit_u32(1); // param_count includes self
    cb.emit_u32(method_offset as u32);

    cb.mark_entry_point();
    cb.emit_op(Op::Struct);
    cb.emit_u32(bp_idx);
    cb.record_number(42.0);
    cb.emit_op(Op::Const);
    cb.emit_f64(42.0);
    cb.emit_op(Op::SetAttr);
    cb.emit_u32(prop_idx);
    cb.emit_op(Op::CallMethod);
    cb.emit_u32(method_name_idx);
    cb.emit_u32(0);
    cb.emit_op(Op::Print);
    let chunk = cb.finish();
    assert!(run(&chunk, &HashMap::new()).is_ok());
}
