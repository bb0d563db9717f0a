//! # Venom REPL
//!
//! Interactive read-eval-print loop for the Venom language.
//!
//! ## Design
//! - Provides prompts (`>>> ` for fresh input, `... ` for continuation).
//! - Tracks **brace depth** (string/escape-aware) so users can enter
//!   multi-line blocks such as function and struct definitions before
//!   anything runs.
//! - Preserves a running **source history** so new input can build on
//!   previously defined functions and structs.
//! - Runs entirely in-process through [`crate::lexer`], [`crate::parser`],
//!   [`crate::compiler`] and [`crate::vm`] — no subprocess, no temp files.
//! - Exits cleanly on EOF (Ctrl+D) or on `exit`/`quit`.
//!
//! Because every successfully-executed block is recompiled from scratch
//! together with all prior history, functions and structs declared in
//! earlier lines stay visible; a block that fails to compile or run is
//! simply not added to history, leaving the session exactly as it was.
//!
//! Re-running the whole accumulated program also re-runs every `print` that
//! already fired in an earlier block. Rather than suppress that, the REPL
//! keeps the full output of the last successful run (`last_output`) and,
//! once a new block finishes, shows only the suffix beyond it — the same
//! trick the standalone interpreter's REPL plays against its subprocess's
//! stdout, just against an in-process buffer instead of a pipe.

use std::io::{self, Write};

use crate::compiler;
use crate::lexer;
use crate::parser;
use crate::vm;

pub fn repl_run() {
    println!("Venom VM - REPL");
    println!("Type `exit` or `quit` to leave.");

    let mut history = String::new();
    let mut last_output = String::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut brace_depth: i32 = 0;

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        print!("{}", prompt);
        io::stdout().flush().unwrap();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).unwrap() == 0 {
            println!();
            break;
        }

        let trimmed = line.trim();
        if buffer.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            break;
        }

        let mut string_char: Option<char> = None;
        let mut escape = false;
        for ch in line.chars() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' | '\'' => {
                    if string_char == Some(ch) {
                        string_char = None;
                    } else if string_char.is_none() {
                        string_char = Some(ch);
                    }
                }
                '{' if string_char.is_none() => brace_depth += 1,
                '}' if string_char.is_none() => brace_depth -= 1,
                _ => {}
            }
        }

        buffer.push(line);

        if brace_depth > 0 {
            continue;
        }

        let block = buffer.join("");
        let source = format!("{}{}", history, block);

        match run_block(&source) {
            Ok(stdout) => {
                if stdout.starts_with(&last_output) {
                    print!("{}", &stdout[last_output.len()..]);
                } else {
                    print!("{}", stdout);
                }
                io::stdout().flush().unwrap();
                last_output = stdout;
                history.push_str(&block);
            }
            Err(msg) => {
                eprintln!("{}", msg);
            }
        }
        buffer.clear();
        brace_depth = 0;
    }
}

fn run_block(source: &str) -> Result<String, String> {
    let tokens = lexer::lex(source).map_err(|e| e.to_string())?;
    let program = parser::parse(tokens).map_err(|e| e.to_string())?;
    let (chunk, funcs) = compiler::compile(&program).map_err(|e| e.to_string())?;
    let mut out: Vec<u8> = Vec::new();
    vm::run_with_output(&chunk, &funcs, &mut out).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
