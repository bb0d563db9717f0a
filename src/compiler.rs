//! # Compiler
//!
//! Lowers the AST into a [`BytecodeChunk`] plus the function table the VM
//! preloads into its globals before execution starts.
//!
//! ## Locals and globals
//! Locals live directly on the VM's value stack; there is no separate
//! environment map. The compiler tracks them as `(name, depth)` pairs in
//! declaration order, so a local's position in that list is exactly its
//! `DEEPGET`/`DEEPSET` slot relative to the current frame pointer. Entering
//! a block bumps `depth`; leaving one pops every local declared at that
//! depth (one `POP` per local) and forgets it.
//!
//! A `let` that occurs at true top level (`depth == 0` and not nested in
//! any function/method body) instead binds a global via `SET_GLOBAL`, so
//! it is visible from inside function bodies compiled later or earlier in
//! the same program. Telling this apart from a function's own outer block
//! — which is also `depth == 0` once the function resets its frame base —
//! needs `function_depth`, a separate counter of how many function/method
//! bodies are currently being compiled.
//!
//! ## Structs and methods
//! `struct`/`impl` declarations are hoisted into a prelude at the front of
//! the chunk: every blueprint is registered first, then every method body is
//! compiled and registered via `IMPL`. Real program execution begins at
//! `chunk.entry_point`, the first byte after the prelude, so method bodies
//! never need a `JMP` around them. Top-level `fn` declarations are *not*
//! hoisted — they compile inline, at the point they occur, behind a `JMP`
//! that skips over the body during normal top-to-bottom execution.
//!
//! ## Expressions always push exactly one value
//! Every `compile_expr` leaves the stack one item taller than it found it,
//! including assignments (`a = e` evaluates to the stored value). A bare
//! expression statement therefore always ends with one extra `POP`.

use std::collections::HashMap;
use std::mem;

use crate::ast::*;
use crate::bytecode::{BytecodeChunk, ChunkBuilder, Op};
use crate::error::CompileError;
use crate::value::{Function, StructBlueprint};

type CResult<T> = Result<T, CompileError>;

pub struct Compiler {
    chunk: ChunkBuilder,
    blueprints: HashMap<String, StructBlueprint>,
    functions: HashMap<String, Function>,
    locals: Vec<(String, usize)>,
    depth: usize,
    /// How many function/method bodies are currently being compiled. Zero
    /// at true top level, where `depth` alone can't tell a bare top-level
    /// `let` apart from one inside a function's own outer block (both are
    /// `depth == 0` once a function resets its frame base).
    function_depth: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            chunk: ChunkBuilder::new(),
            blueprints: HashMap::new(),
            functions: HashMap::new(),
            locals: Vec::new(),
            depth: 0,
            function_depth: 0,
        }
    }

    pub fn compile(mut self, program: &[Stmt]) -> CResult<(BytecodeChunk, HashMap<String, Function>)> {
        for stmt in program {
            if let Stmt::Struct { name, properties } = stmt {
                self.declare_struct(name, properties)?;
            }
        }
        for stmt in program {
            if let Stmt::Impl { target, methods } = stmt {
                self.compile_impl(target, methods)?;
            }
        }
        self.chunk.mark_entry_point();
        for stmt in program {
            match stmt {
                Stmt::Struct { .. } | Stmt::Impl { .. } => {}
                other => self.compile_stmt(other)?,
            }
        }
        Ok((self.chunk.finish(), self.functions))
    }

    fn declare_struct(&mut self, name: &str, properties: &[String]) -> CResult<()> {
        let mut seen = Vec::new();
        for p in properties {
            if seen.contains(p) {
                return Err(CompileError::DuplicateProperty {
                    blueprint: name.to_string(),
                    property: p.clone(),
                });
            }
            seen.push(p.clone());
        }
        self.blueprints.insert(
            name.to_string(),
            StructBlueprint {
                name: name.to_string(),
                properties: properties.to_vec(),
                methods: HashMap::new(),
            },
        );
        let name_idx = self.chunk.intern(name);
        self.chunk.emit_op(Op::StructBlueprint);
        self.chunk.emit_u32(name_idx);
        self.chunk.emit_u32(properties.len() as u32);
        for (pos, prop) in properties.iter().enumerate() {
            let prop_idx = self.chunk.intern(prop);
            self.chunk.emit_u32(prop_idx);
            self.chunk.emit_u32(pos as u32);
        }
        Ok(())
    }

    fn compile_impl(&mut self, target: &str, methods: &[FunctionDecl]) -> CResult<()> {
        if !self.blueprints.contains_key(target) {
            return Err(CompileError::UnknownBlueprint(target.to_string()));
        }
        // Method bodies must never be fallen into while the prelude is being
        // interpreted, so they sit behind a jump straight to the IMPL
        // instruction that follows them.
        let jmp_over = self.emit_jump(Op::Jmp);
        let mut compiled = Vec::with_capacity(methods.len());
        for method in methods {
            let (entry_offset, param_count) =
                self.compile_function_body(&method.params, &method.body, true)?;
            let func = Function {
                name: method.name.clone(),
                entry_offset,
                param_count,
            };
            self.blueprints
                .get_mut(target)
                .unwrap()
                .methods
                .insert(method.name.clone(), func);
            compiled.push((method.name.clone(), param_count, entry_offset));
        }
        let after_bodies = self.chunk.len();
        self.patch_jump(jmp_over, after_bodies)?;
        let bp_idx = self.chunk.intern(target);
        self.chunk.emit_op(Op::Impl);
        self.chunk.emit_u32(bp_idx);
        self.chunk.emit_u32(compiled.len() as u32);
        for (name, param_count, entry_offset) in compiled {
            let name_idx = self.chunk.intern(&name);
            self.chunk.emit_u32(name_idx);
            self.chunk.emit_u32(param_count as u32);
            self.chunk.emit_u32(entry_offset as u32);
        }
        Ok(())
    }

    /// Compile a function/method body in a fresh local scope, appending a
    /// trailing `NULL; RET` so every path returns even if the body falls
    /// through without an explicit `return`.
    fn compile_function_body(
        &mut self,
        params: &[String],
        body: &[Stmt],
        is_method: bool,
    ) -> CResult<(usize, usize)> {
        let saved_locals = mem::take(&mut self.locals);
        let saved_depth = mem::replace(&mut self.depth, 0);
        self.function_depth += 1;

        let mut locals = Vec::with_capacity(params.len() + 1);
        if is_method {
            locals.push(("self".to_string(), 0));
        }
        for p in params {
            locals.push((p.clone(), 0));
        }
        self.locals = locals;

        let entry_offset = self.chunk.len();
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.chunk.emit_op(Op::Null);
        self.chunk.emit_op(Op::Ret);

        self.locals = saved_locals;
        self.depth = saved_depth;
        self.function_depth -= 1;
        Ok((entry_offset, params.len() + if is_method { 1 } else { 0 }))
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.chunk.emit_op(op);
        self.chunk.emit_jump_placeholder()
    }

    fn patch_jump(&mut self, site: usize, target: usize) -> CResult<()> {
        self.chunk
            .patch_jump(site, target)
            .map_err(|_| CompileError::JumpOverflow)
    }

    fn resolve_local(&self, name: &str) -> Option<usize> {
        self.locals.iter().rposition(|(n, _)| n == name)
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match stmt {
            Stmt::Print(e) => {
                self.compile_expr(e)?;
                self.chunk.emit_op(Op::Print);
            }
            Stmt::Let { name, init } => {
                match init {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.chunk.emit_op(Op::Null);
                    }
                }
                if self.function_depth == 0 && self.depth == 0 {
                    let idx = self.chunk.intern(name);
                    self.chunk.emit_op(Op::SetGlobal);
                    self.chunk.emit_u32(idx);
                } else {
                    self.locals.push((name.clone(), self.depth));
                }
            }
            Stmt::Block(stmts) => {
                self.compile_block(stmts)?;
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(cond)?;
                let jz_else = self.emit_jump(Op::Jz);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_stmt) => {
                        let jmp_end = self.emit_jump(Op::Jmp);
                        let else_start = self.chunk.len();
                        self.patch_jump(jz_else, else_start)?;
                        self.compile_stmt(else_stmt)?;
                        let end = self.chunk.len();
                        self.patch_jump(jmp_end, end)?;
                    }
                    None => {
                        let end = self.chunk.len();
                        self.patch_jump(jz_else, end)?;
                    }
                }
            }
            Stmt::While { cond, body } => {
                let loop_start = self.chunk.len();
                self.compile_expr(cond)?;
                let jz_end = self.emit_jump(Op::Jz);
                self.compile_stmt(body)?;
                let back = self.emit_jump(Op::Jmp);
                self.patch_jump(back, loop_start)?;
                let end = self.chunk.len();
                self.patch_jump(jz_end, end)?;
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.chunk.emit_op(Op::Null);
                    }
                }
                self.chunk.emit_op(Op::Ret);
            }
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.chunk.emit_op(Op::Pop);
            }
            Stmt::Function(decl) => {
                self.compile_toplevel_function(decl)?;
            }
            Stmt::Struct { name, properties } => {
                self.declare_struct(name, properties)?;
            }
            Stmt::Impl { target, methods } => {
                self.compile_impl(target, methods)?;
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> CResult<()> {
        self.depth += 1;
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        while let Some((_, d)) = self.locals.last() {
            if *d < self.depth {
                break;
            }
            self.locals.pop();
            self.chunk.emit_op(Op::Pop);
        }
        self.depth -= 1;
        Ok(())
    }

    fn compile_toplevel_function(&mut self, decl: &FunctionDecl) -> CResult<()> {
        let jmp_over = self.emit_jump(Op::Jmp);
        let entry_offset = self.chunk.len();
        self.functions.insert(
            decl.name.clone(),
            Function {
                name: decl.name.clone(),
                entry_offset,
                param_count: decl.params.len(),
            },
        );

        let saved_locals = mem::take(&mut self.locals);
        let saved_depth = mem::replace(&mut self.depth, 0);
        self.function_depth += 1;
        self.locals = decl.params.iter().map(|p| (p.clone(), 0)).collect();
        for stmt in &decl.body {
            self.compile_stmt(stmt)?;
        }
        self.chunk.emit_op(Op::Null);
        self.chunk.emit_op(Op::Ret);
        self.locals = saved_locals;
        self.depth = saved_depth;
        self.function_depth -= 1;

        let after = self.chunk.len();
        self.patch_jump(jmp_over, after)?;
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> CResult<()> {
        match expr {
            Expr::Number(n) => {
                self.chunk.record_number(*n);
                self.chunk.emit_op(Op::Const);
                self.chunk.emit_f64(*n);
            }
            Expr::Str(s) => {
                let idx = self.chunk.intern(s);
                self.chunk.emit_op(Op::Str);
                self.chunk.emit_u32(idx);
            }
            Expr::Bool(true) => {
                self.chunk.emit_op(Op::True);
            }
            Expr::Bool(false) => {
                self.chunk.emit_op(Op::True);
                self.chunk.emit_op(Op::Not);
            }
            Expr::Null => {
                self.chunk.emit_op(Op::Null);
            }
            Expr::Variable(name) => self.compile_variable_read(name),
            Expr::Unary { op, expr } => {
                self.compile_expr(expr)?;
                let opcode = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::BitNot => Op::BitNot,
                };
                self.chunk.emit_op(opcode);
            }
            Expr::Binary { op, lhs, rhs } => self.compile_binary(op, lhs, rhs)?,
            Expr::Logical { op, lhs, rhs } => self.compile_logical(op, lhs, rhs)?,
            Expr::Assign { target, value } => self.compile_assign(target, value)?,
            Expr::Call { callee, args } => {
                let idx = self.chunk.intern(callee);
                self.chunk.emit_op(Op::GetGlobal);
                self.chunk.emit_u32(idx);
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.chunk.emit_op(Op::Call);
                self.chunk.emit_u32(args.len() as u32);
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                self.compile_expr(receiver)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let idx = self.chunk.intern(method);
                self.chunk.emit_op(Op::CallMethod);
                self.chunk.emit_u32(idx);
                self.chunk.emit_u32(args.len() as u32);
            }
            Expr::Attr { base, name } => {
                self.compile_expr(base)?;
                let idx = self.chunk.intern(name);
                self.chunk.emit_op(Op::GetAttr);
                self.chunk.emit_u32(idx);
            }
            Expr::StructInit { name, fields } => {
                let name_idx = self.chunk.intern(name);
                self.chunk.emit_op(Op::Struct);
                self.chunk.emit_u32(name_idx);
                for (field_name, field_value) in fields {
                    self.compile_expr(field_value)?;
                    let idx = self.chunk.intern(field_name);
                    self.chunk.emit_op(Op::SetAttr);
                    self.chunk.emit_u32(idx);
                }
            }
            Expr::AddressOf(inner) => self.compile_address_of(inner)?,
            Expr::Deref(inner) => {
                self.compile_expr(inner)?;
                self.chunk.emit_op(Op::Deref);
            }
        }
        Ok(())
    }

    fn compile_variable_read(&mut self, name: &str) {
        if let Some(slot) = self.resolve_local(name) {
            self.chunk.emit_op(Op::DeepGet);
            self.chunk.emit_u32(slot as u32);
        } else {
            let idx = self.chunk.intern(name);
            self.chunk.emit_op(Op::GetGlobal);
            self.chunk.emit_u32(idx);
        }
    }

    fn compile_binary(&mut self, op: &BinaryOp, lhs: &Expr, rhs: &Expr) -> CResult<()> {
        if matches!(op, BinaryOp::Add) && (is_str_literal(lhs) || is_str_literal(rhs)) {
            self.compile_expr(lhs)?;
            self.compile_expr(rhs)?;
            self.chunk.emit_op(Op::Strcat);
            return Ok(());
        }
        self.compile_expr(lhs)?;
        self.compile_expr(rhs)?;
        match op {
            BinaryOp::Add => self.chunk.emit_op(Op::Add),
            BinaryOp::Sub => self.chunk.emit_op(Op::Sub),
            BinaryOp::Mul => self.chunk.emit_op(Op::Mul),
            BinaryOp::Div => self.chunk.emit_op(Op::Div),
            BinaryOp::Mod => self.chunk.emit_op(Op::Mod),
            BinaryOp::Eq => self.chunk.emit_op(Op::Eq),
            BinaryOp::Ne => {
                self.chunk.emit_op(Op::Eq);
                self.chunk.emit_op(Op::Not);
            }
            BinaryOp::Lt => self.chunk.emit_op(Op::Lt),
            BinaryOp::Le => {
                self.chunk.emit_op(Op::Gt);
                self.chunk.emit_op(Op::Not);
            }
            BinaryOp::Gt => self.chunk.emit_op(Op::Gt),
            BinaryOp::Ge => {
                self.chunk.emit_op(Op::Lt);
                self.chunk.emit_op(Op::Not);
            }
            BinaryOp::BitAnd => self.chunk.emit_op(Op::BitAnd),
            BinaryOp::BitOr => self.chunk.emit_op(Op::BitOr),
            BinaryOp::BitXor => self.chunk.emit_op(Op::BitXor),
            BinaryOp::Shl => self.chunk.emit_op(Op::BitShl),
            BinaryOp::Shr => self.chunk.emit_op(Op::BitShr),
        };
        Ok(())
    }

    fn compile_logical(&mut self, op: &LogicalOp, lhs: &Expr, rhs: &Expr) -> CResult<()> {
        match op {
            LogicalOp::And => {
                self.compile_expr(lhs)?;
                let jz_false = self.emit_jump(Op::Jz);
                self.compile_expr(rhs)?;
                let jmp_end = self.emit_jump(Op::Jmp);
                let false_at = self.chunk.len();
                self.patch_jump(jz_false, false_at)?;
                self.chunk.emit_op(Op::True);
                self.chunk.emit_op(Op::Not);
                let end = self.chunk.len();
                self.patch_jump(jmp_end, end)?;
            }
            LogicalOp::Or => {
                self.compile_expr(lhs)?;
                let jz_rhs = self.emit_jump(Op::Jz);
                self.chunk.emit_op(Op::True);
                let jmp_end = self.emit_jump(Op::Jmp);
                let rhs_at = self.chunk.len();
                self.patch_jump(jz_rhs, rhs_at)?;
                self.compile_expr(rhs)?;
                let end = self.chunk.len();
                self.patch_jump(jmp_end, end)?;
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> CResult<()> {
        match target {
            Expr::Variable(name) => {
                let slot = self
                    .resolve_local(name)
                    .ok_or_else(|| CompileError::UndefinedLocal(name.clone()))?;
                self.compile_expr(value)?;
                self.chunk.emit_op(Op::DeepSet);
                self.chunk.emit_u32(slot as u32);
                self.chunk.emit_op(Op::DeepGet);
                self.chunk.emit_u32(slot as u32);
            }
            Expr::Attr { base, name } => {
                self.compile_expr(base)?;
                self.compile_expr(value)?;
                let idx = self.chunk.intern(name);
                self.chunk.emit_op(Op::SetAttr);
                self.chunk.emit_u32(idx);
                self.chunk.emit_op(Op::GetAttr);
                self.chunk.emit_u32(idx);
            }
            Expr::Deref(inner) => {
                self.compile_expr(inner)?;
                self.compile_expr(value)?;
                self.chunk.emit_op(Op::DerefSet);
                self.compile_expr(inner)?;
                self.chunk.emit_op(Op::Deref);
            }
            _ => return Err(CompileError::InvalidAssignTarget),
        }
        Ok(())
    }

    fn compile_address_of(&mut self, inner: &Expr) -> CResult<()> {
        match inner {
            Expr::Variable(name) => {
                if let Some(slot) = self.resolve_local(name) {
                    self.chunk.emit_op(Op::DeepGetPtr);
                    self.chunk.emit_u32(slot as u32);
                } else {
                    let idx = self.chunk.intern(name);
                    self.chunk.emit_op(Op::GetGlobalPtr);
                    self.chunk.emit_u32(idx);
                }
            }
            Expr::Attr { base, name } => {
                self.compile_expr(base)?;
                let idx = self.chunk.intern(name);
                self.chunk.emit_op(Op::GetAttrPtr);
                self.chunk.emit_u32(idx);
            }
            _ => return Err(CompileError::InvalidAssignTarget),
        }
        Ok(())
    }
}

fn is_str_literal(e: &Expr) -> bool {
    matches!(e, Expr::Str(_))
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compile(program: &[Stmt]) -> CResult<(BytecodeChunk, HashMap<String, Function>)> {
    Compiler::new().compile(program)
}
