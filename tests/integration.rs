//! End-to-end tests: write a source file, run the compiled binary against
//! it, and check what it printed. Complements the direct-bytecode unit
//! tests in `src/vm/tests.rs`, which exercise the VM in isolation without
//! going through the lexer/parser/compiler.

use std::io::Write;
use std::process::Command;

fn run_source(src: &str) -> (String, String, bool) {
    let mut file = tempfile();
    file.write_all(src.as_bytes()).unwrap();
    let path = file.into_temp_path();

    let output = Command::new(env!("CARGO_BIN_EXE_venom_vm"))
        .arg(&path)
        .output()
        .expect("failed to run venom_vm binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// Minimal stand-in for `tempfile::NamedTempFile`: this crate carries no
/// test-only dependency, so a unique path under the system temp dir is
/// built by hand instead.
struct TempFile {
    path: std::path::PathBuf,
    file: std::fs::File,
}

impl TempFile {
    fn into_temp_path(self) -> std::path::PathBuf {
        self.path
    }
}

impl Write for TempFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn tempfile() -> TempFile {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("venom_vm_test_{}_{}.vn", std::process::id(), n));
    let file = std::fs::File::create(&path).unwrap();
    TempFile { path, file }
}

#[test]
fn arithmetic_and_print() {
    let (stdout, _, ok) = run_source("let x = 2 + 3 * 4; print x;");
    assert!(ok);
    assert_eq!(stdout, "14\n");
}

#[test]
fn recursive_fibonacci() {
    let (stdout, _, ok) = run_source(
        "fn fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);",
    );
    assert!(ok);
    assert_eq!(stdout, "55\n");
}

#[test]
fn struct_field_access() {
    let (stdout, _, ok) =
        run_source("struct P { x; y; } let p = P { x = 1, y = 2 }; print p.x + p.y;");
    assert!(ok);
    assert_eq!(stdout, "3\n");
}

#[test]
fn struct_methods() {
    let (stdout, _, ok) = run_source(
        "struct P { x; y; } \
         impl P { fn sum(self) { return self.x + self.y; } } \
         let p = P { x = 4, y = 5 }; \
         print p.sum();",
    );
    assert!(ok);
    assert_eq!(stdout, "9\n");
}

#[test]
fn while_loop_prints_each_iteration() {
    let (stdout, _, ok) = run_source("let i = 0; while (i < 3) { print i; i = i + 1; }");
    assert!(ok);
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn struct_structural_equality() {
    let (stdout, _, ok) = run_source(
        "struct P { x; y; } \
         let a = P { x = 1, y = 2 }; \
         let b = P { x = 1, y = 2 }; \
         print a == b;",
    );
    assert!(ok);
    assert_eq!(stdout, "true\n");
}

#[test]
fn let_without_initializer_defaults_to_null() {
    let (stdout, _, ok) = run_source("let x; print x;");
    assert!(ok);
    assert_eq!(stdout, "null\n");
}

#[test]
fn let_then_read_is_idempotent() {
    let (stdout, _, ok) = run_source("let x = 2 + 3; print x;");
    assert!(ok);
    assert_eq!(stdout, "5\n");
}

#[test]
fn assignment_is_idempotent() {
    let (stdout, _, ok) = run_source("let x = 1; x = x + 9; x = x; print x;");
    assert!(ok);
    assert_eq!(stdout, "10\n");
}

#[test]
fn division_by_zero_yields_infinity_not_an_error() {
    let (stdout, _, ok) = run_source("print 1 / 0;");
    assert!(ok);
    assert_eq!(stdout, "inf\n");
}

#[test]
fn calling_with_wrong_argcount_is_a_runtime_error() {
    let (_, stderr, ok) = run_source("fn add(a, b) { return a + b; } print add(1);");
    assert!(!ok);
    assert!(stderr.contains("requires 2 arguments"));
}

#[test]
fn comparing_mismatched_tags_is_a_type_error() {
    let (_, stderr, ok) = run_source(r#"print 1 == "one";"#);
    assert!(!ok);
    assert!(stderr.contains("runtime error"));
}

#[test]
fn nested_struct_field() {
    let (stdout, _, ok) = run_source(
        "struct Inner { v; } \
         struct Outer { inner; } \
         let o = Outer { inner = Inner { v = 7 } }; \
         print o.inner.v;",
    );
    assert!(ok);
    assert_eq!(stdout, "7\n");
}

#[test]
fn address_of_and_deref_round_trip() {
    let (stdout, _, ok) = run_source("let x = 41; let p = &x; *p = 42; print x;");
    assert!(ok);
    assert_eq!(stdout, "42\n");
}

#[test]
fn bad_syntax_is_a_parse_error_not_a_panic() {
    let (_, stderr, ok) = run_source("let = ;");
    assert!(!ok);
    assert!(!stderr.is_empty());
}
