//! # Bytecode Format & Chunk Builder
//!
//! This module defines the instruction set ([`Op`]), the compiled unit a
//! program lowers to ([`BytecodeChunk`]), and the append-only writer
//! ([`ChunkBuilder`]) the compiler uses to emit it.
//!
//! ## Binary layout
//! Every instruction is a one-byte opcode followed by a fixed number of
//! operand bytes (0, 2, 4, or 8, except `STRUCT_BLUEPRINT`/`IMPL` which are
//! variable-length and self-describing via an embedded count). All
//! multi-byte operands are **big-endian**; there is no alignment
//! requirement.
//!
//! `JZ`/`JMP` operands are a signed 16-bit displacement computed as
//! `target - (site + 2)`, where `site` is the offset of the first operand
//! byte — so adding the displacement to the cursor position immediately
//! after the two operand bytes lands exactly on `target`.
//!
//! `STACK_MAX` bounds both the value stack and the frame-pointer stack
//! depth, mirroring the fixed-size `double stack[STACK_MAX]` of the source
//! VM.

use std::collections::HashMap;

/// Maximum depth of the VM's value stack and frame-pointer stack.
pub const STACK_MAX: usize = 255;

/// One-byte instruction opcodes. Discriminants are the on-the-wire encoding
/// used by [`ChunkBuilder::emit_op`] and decoded back by [`Op::from_u8`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Print = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Mod = 5,
    Eq = 6,
    Gt = 7,
    Lt = 8,
    BitAnd = 9,
    BitOr = 10,
    BitXor = 11,
    BitNot = 12,
    BitShl = 13,
    BitShr = 14,
    Not = 15,
    Neg = 16,
    True = 17,
    Null = 18,
    Const = 19,
    Str = 20,
    Strcat = 21,
    Jz = 22,
    Jmp = 23,
    SetGlobal = 24,
    GetGlobal = 25,
    GetGlobalPtr = 26,
    DeepSet = 27,
    DeepGet = 28,
    DeepGetPtr = 29,
    SetAttr = 30,
    GetAttr = 31,
    GetAttrPtr = 32,
    Struct = 33,
    Ret = 34,
    Pop = 35,
    Deref = 36,
    DerefSet = 37,
    Call = 38,
    CallMethod = 39,
    Impl = 40,
    StructBlueprint = 41,
}

impl Op {
    pub fn from_u8(byte: u8) -> Option<Op> {
        use Op::*;
        Some(match byte {
            0 => Print,
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => Div,
            5 => Mod,
            6 => Eq,
            7 => Gt,
            8 => Lt,
            9 => BitAnd,
            10 => BitOr,
            11 => BitXor,
            12 => BitNot,
            13 => BitShl,
            14 => BitShr,
            15 => Not,
            16 => Neg,
            17 => True,
            18 => Null,
            19 => Const,
            20 => Str,
            21 => Strcat,
            22 => Jz,
            23 => Jmp,
            24 => SetGlobal,
            25 => GetGlobal,
            26 => GetGlobalPtr,
            27 => DeepSet,
            28 => DeepGet,
            29 => DeepGetPtr,
            30 => SetAttr,
            31 => GetAttr,
            32 => GetAttrPtr,
            33 => Struct,
            34 => Ret,
            35 => Pop,
            36 => Deref,
            37 => DerefSet,
            38 => Call,
            39 => CallMethod,
            40 => Impl,
            41 => StructBlueprint,
            _ => return None,
        })
    }

    /// Mnemonic used by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        use Op::*;
        match self {
            Print => "PRINT",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Eq => "EQ",
            Gt => "GT",
            Lt => "LT",
            BitAnd => "BITAND",
            BitOr => "BITOR",
            BitXor => "BITXOR",
            BitNot => "BITNOT",
            BitShl => "BITSHL",
            BitShr => "BITSHR",
            Not => "NOT",
            Neg => "NEG",
            True => "TRUE",
            Null => "NULL",
            Const => "CONST",
            Str => "STR",
            Strcat => "STRCAT",
            Jz => "JZ",
            Jmp => "JMP",
            SetGlobal => "SET_GLOBAL",
            GetGlobal => "GET_GLOBAL",
            GetGlobalPtr => "GET_GLOBAL_PTR",
            DeepSet => "DEEPSET",
            DeepGet => "DEEPGET",
            DeepGetPtr => "DEEPGET_PTR",
            SetAttr => "SETATTR",
            GetAttr => "GETATTR",
            GetAttrPtr => "GETATTR_PTR",
            Struct => "STRUCT",
            Ret => "RET",
            Pop => "POP",
            Deref => "DEREF",
            DerefSet => "DEREFSET",
            Call => "CALL",
            CallMethod => "CALL_METHOD",
            Impl => "IMPL",
            StructBlueprint => "STRUCT_BLUEPRINT",
        }
    }
}

/// A compiled program: flat instruction bytes plus the two constant pools.
///
/// `cp` is kept for parity with the source data model and as a disassembly
/// aid; `CONST` itself inlines its 8-byte operand rather than indexing into
/// it (see `DESIGN.md` for why the richer, newer instruction set this crate
/// follows does it that way).
#[derive(Clone, Default)]
pub struct BytecodeChunk {
    pub code: Vec<u8>,
    pub cp: Vec<f64>,
    pub sp: Vec<String>,
    /// Offset of the first instruction of the "real" program, i.e. the
    /// first byte after the struct-blueprint/impl prelude. Execution starts
    /// here rather than at 0 so that method bodies registered by `IMPL` can
    /// live earlier in the byte stream without a wasted leading jump.
    pub entry_point: usize,
}

/// Append-only writer used by the compiler to build a [`BytecodeChunk`].
#[derive(Default)]
pub struct ChunkBuilder {
    chunk: BytecodeChunk,
    string_cache: HashMap<String, u32>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunk.code.len()
    }

    pub fn emit_op(&mut self, op: Op) -> usize {
        let at = self.chunk.code.len();
        self.chunk.code.push(op as u8);
        at
    }

    pub fn emit_u8(&mut self, v: u8) {
        self.chunk.code.push(v);
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.chunk.code.extend_from_slice(&v.to_be_bytes());
    }

    pub fn emit_f64(&mut self, v: f64) {
        self.chunk.code.extend_from_slice(&v.to_be_bytes());
    }

    /// Emit a 2-byte placeholder for a later-patched jump offset; returns
    /// the offset of the first placeholder byte (the jump "site").
    pub fn emit_jump_placeholder(&mut self) -> usize {
        let site = self.chunk.code.len();
        self.chunk.code.extend_from_slice(&[0, 0]);
        site
    }

    /// Patch a previously emitted placeholder so it jumps to `target`
    /// (an absolute code offset). Returns `Err` if the displacement
    /// overflows a signed 16-bit value.
    pub fn patch_jump(&mut self, site: usize, target: usize) -> Result<(), ()> {
        let after_operand = site as i64 + 2;
        let disp = target as i64 - after_operand;
        if disp < i16::MIN as i64 || disp > i16::MAX as i64 {
            return Err(());
        }
        let bytes = (disp as i16).to_be_bytes();
        self.chunk.code[site] = bytes[0];
        self.chunk.code[site + 1] = bytes[1];
        Ok(())
    }

    /// Intern a string in the string pool, returning its (possibly reused)
    /// index.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.string_cache.get(s) {
            return *idx;
        }
        let idx = self.chunk.sp.len() as u32;
        self.chunk.sp.push(s.to_string());
        self.string_cache.insert(s.to_string(), idx);
        idx
    }

    /// Record a number literal in the number constant pool. `CONST` does
    /// not reference this by index (the double is inlined), so this exists
    /// purely to keep `cp` populated per the data model.
    pub fn record_number(&mut self, v: f64) {
        self.chunk.cp.push(v);
    }

    pub fn mark_entry_point(&mut self) {
        self.chunk.entry_point = self.chunk.code.len();
    }

    pub fn finish(self) -> BytecodeChunk {
        self.chunk
    }
}

/// Render one instruction at `ip` as `<offset>: MNEMONIC [operand...]`,
/// returning the text and the offset of the next instruction.
///
/// Mirrors the source disassembler's per-opcode formatting: `CONST` shows
/// the literal value, `STR`/`*_GLOBAL`/`GETATTR`/`SETATTR`/`STRUCT`/
/// `CALL_METHOD` show the referenced string, `DEEP*` show the slot index,
/// `JZ`/`JMP` show the signed offset, and `STRUCT_BLUEPRINT`/`IMPL` expand
/// across multiple lines (one per property/method).
pub fn disassemble_one(chunk: &BytecodeChunk, ip: usize) -> (String, usize) {
    let code = &chunk.code;
    let op = match Op::from_u8(code[ip]) {
        Some(op) => op,
        None => return (format!("{}: <bad opcode {}>", ip, code[ip]), ip + 1),
    };
    let mut cursor = ip + 1;
    let mut out = format!("{}: {}", ip, op.mnemonic());
    match op {
        Op::Const => {
            let bytes: [u8; 8] = code[cursor..cursor + 8].try_into().unwrap();
            cursor += 8;
            out.push_str(&format!(" (value: {})", f64::from_be_bytes(bytes)));
        }
        Op::Str | Op::SetGlobal | Op::GetGlobal | Op::GetGlobalPtr => {
            let idx = read_u32_at(code, &mut cursor);
            out.push_str(&format!(" (name: {})", chunk.sp[idx as usize]));
        }
        Op::GetAttr | Op::GetAttrPtr | Op::SetAttr => {
            let idx = read_u32_at(code, &mut cursor);
            out.push_str(&format!(" (property: {})", chunk.sp[idx as usize]));
        }
        Op::Struct => {
            let idx = read_u32_at(code, &mut cursor);
            out.push_str(&format!(" (name: {})", chunk.sp[idx as usize]));
        }
        Op::DeepGet | Op::DeepGetPtr | Op::DeepSet => {
            let idx = read_u32_at(code, &mut cursor);
            out.push_str(&format!(" (index: {})", idx));
        }
        Op::Call => {
            let argcount = read_u32_at(code, &mut cursor);
            out.push_str(&format!(" (argcount: {})", argcount));
        }
        Op::CallMethod => {
            let name_idx = read_u32_at(code, &mut cursor);
            let argcount = read_u32_at(code, &mut cursor);
            out.push_str(&format!(
                " (method: {}, argcount: {})",
                chunk.sp[name_idx as usize], argcount
            ));
        }
        Op::Jz | Op::Jmp => {
            let bytes: [u8; 2] = code[cursor..cursor + 2].try_into().unwrap();
            cursor += 2;
            out.push_str(&format!(" (offset: {})", i16::from_be_bytes(bytes)));
        }
        Op::StructBlueprint => {
            let name_idx = read_u32_at(code, &mut cursor);
            let propcount = read_u32_at(code, &mut cursor);
            out.push_str(&format!(
                " (name: {}, propcount: {})",
                chunk.sp[name_idx as usize], propcount
            ));
            for _ in 0..propcount {
                let prop_idx = read_u32_at(code, &mut cursor);
                let prop_pos = read_u32_at(code, &mut cursor);
                out.push_str(&format!(
                    "\n{}: property: {}, index: {}",
                    ip, chunk.sp[prop_idx as usize], prop_pos
                ));
            }
        }
        Op::Impl => {
            let bp_idx = read_u32_at(code, &mut cursor);
            let method_count = read_u32_at(code, &mut cursor);
            out.push_str(&format!(
                " (blueprint: {}, method count: {})",
                chunk.sp[bp_idx as usize], method_count
            ));
            for _ in 0..method_count {
                let name_idx = read_u32_at(code, &mut cursor);
                let paramcount = read_u32_at(code, &mut cursor);
                let location = read_u32_at(code, &mut cursor);
                out.push_str(&format!(
                    "\n{}: method: {}, paramcount: {}, location: {}",
                    ip, chunk.sp[name_idx as usize], paramcount, location
                ));
            }
        }
        _ => {}
    }
    (out, cursor)
}

fn read_u32_at(code: &[u8], cursor: &mut usize) -> u32 {
    let bytes: [u8; 4] = code[*cursor..*cursor + 4].try_into().unwrap();
    *cursor += 4;
    u32::from_be_bytes(bytes)
}

/// Disassemble an entire chunk, one line (or multi-line block) per
/// instruction, in the order instructions appear in `code`.
pub fn disassemble(chunk: &BytecodeChunk) -> String {
    let mut out = String::new();
    let mut ip = 0;
    while ip < chunk.code.len() {
        let (line, next) = disassemble_one(chunk, ip);
        out.push_str(&line);
        out.push('\n');
        ip = next;
    }
    out
}
