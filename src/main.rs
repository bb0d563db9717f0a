//! Venom VM runtime entry point.
//!
//! Behavior summary:
//! - With **no args**, start an interactive REPL.
//! - With `-h`/`--help`, print usage.
//! - With `-v`/`--version`, print version.
//! - With a source file path, compile and run it.

use std::env;
use std::fs;
use std::process;

use venom_vm::repl::repl_run;
use venom_vm::run_source;

const VERSION: &str = "0.1.0";

fn usage() -> String {
    format!(
        r#"Venom VM v{0}

Usage:
    venom <script.vn>

Arguments:
    <script.vn>
        Path to a Venom source file to execute.

Options:
    -h, --help
        Show this help message and exit.
    -v, --version
        Show runtime version."#,
        VERSION
    )
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() == 1 {
        repl_run();
        return;
    }

    if args[1] == "-h" || args[1] == "--help" {
        println!("{}", usage());
        return;
    }

    if args[1] == "-v" || args[1] == "--version" {
        println!("venom-{}-{}: v{}", env::consts::OS, env::consts::ARCH, VERSION);
        return;
    }

    let path = &args[1];
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("could not read '{}': {}", path, e);
            process::exit(1);
        }
    };

    if let Err(e) = run_source(&src) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
