use std::io::Write;
use std::process::{Command, Output};

fn quill() -> Command {
    Command::new(env!("CARGO_BIN_EXE_quill"))
}

fn script(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp script");
    file.write_all(source.as_bytes()).expect("write temp script");
    file
}

fn run(source: &str, args: &[&str]) -> Output {
    let file = script(source);
    quill().arg("run").arg(file.path()).args(args).output().expect("failed to run quill")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- run ---

#[test]
fn run_prints() {
    let out = run("main = $() { print(\"sum\", 1 + 2); print(); return 0; };", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "sum 3\n\n");
}

#[test]
fn exit_code_comes_from_main() {
    let out = run("main = $() { return 7; };", &[]);
    assert_eq!(out.status.code(), Some(7));

    let out = run("main = $() { };", &[]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn script_arguments() {
    let src = "main = $(argc, path, first) { print(first); return argc; };";
    let out = run(src, &["hello", "--flag"]);
    assert_eq!(stdout(&out), "hello\n");
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn helpers_and_loops() {
    let src = r#"
@fib = $(n) {
    if (n < 2) { return n; }
    return fib(n - 1) + fib(n - 2);
};
main = $() {
    @i = 0;
    while (i < 6) {
        print(fib(i));
        i = i + 1;
    }
    return 0;
};
"#;
    let out = run(src, &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0\n1\n1\n2\n3\n5\n");
}

#[test]
fn missing_main() {
    let out = run("@a = 1;", &[]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("QUILL-C004"), "stderr: {}", stderr(&out));
}

#[test]
fn missing_file() {
    let out = quill().args(["run", "/nonexistent/script.ql"]).output().expect("failed to run quill");
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Error reading"));
}

// --- diagnostics ---

#[test]
fn compile_error_snippet() {
    let out = run("main = $() {\n  return x;\n};", &[]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("error[QUILL-C004]: identifier 'x' is not defined"), "stderr: {err}");
    assert!(err.contains("--> line 2:10"), "stderr: {err}");
    assert!(!err.contains("\x1b["), "piped stderr should be plain: {err}");
}

#[test]
fn json_errors() {
    let file = script("main = $() { return 1 }; ");
    let out = quill().arg("--json").arg("run").arg(file.path()).output().expect("failed to run quill");
    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("stderr is JSON");
    assert_eq!(v["severity"], "error");
    assert_eq!(v["code"], "QUILL-C001");
    assert_eq!(v["line"], 1);
}

#[test]
fn runtime_error_has_no_snippet() {
    let out = run("main = $() { @n = 1; return n(); };", &[]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("error[QUILL-R003]"), "stderr: {err}");
    assert!(!err.contains('|'), "stderr: {err}");
}

#[test]
fn explain() {
    let out = quill().args(["--explain", "quill-c004"]).output().expect("failed to run quill");
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("## QUILL-C004: undefined identifier"));

    let out = quill().args(["--explain", "QUILL-X999"]).output().expect("failed to run quill");
    assert!(!out.status.success());
}

// --- tooling ---

#[test]
fn tokens_as_json() {
    let file = script("@a = 1;");
    let out = quill().arg("tokens").arg(file.path()).output().expect("failed to run quill");
    assert!(out.status.success());
    let tokens: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("stdout is JSON");
    let kinds: Vec<&str> = tokens.as_array().unwrap().iter().map(|t| t["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["Var", "Identifier", "Assign", "Number", "Semicolon", "Eof"]);
    assert_eq!(tokens[1]["lexeme"], "a");
    assert_eq!(tokens[3]["span"]["start"], 5);
}

#[test]
fn disasm_lists_bytecode() {
    let file = script("main = $(a) { return a + 1; };");
    let out = quill().arg("disasm").arg(file.path()).output().expect("failed to run quill");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let listing = stdout(&out);
    assert!(listing.starts_with("0000 FUNC"), "got:\n{listing}");
    for op in ["GET", "CONST", "ADD", "RETURN", "SET"] {
        assert!(listing.contains(op), "{op} missing from\n{listing}");
    }
}

#[test]
fn no_command_prints_help() {
    let out = quill().output().expect("failed to run quill");
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Usage"));
}
