use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use quill::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use quill::{Args, Callback, Env, Error, ErrorKind, Module, Slot, Str, Value};

#[derive(Parser)]
#[command(name = "quill", version, about = "Compile and run quill scripts")]
struct Cli {
    /// Print the long explanation of an error code (e.g. QUILL-C004)
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    json: bool,

    /// Log to stderr; repeat for per-instruction tracing
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Bytecode buffer size in bytes
    #[arg(long, default_value_t = 64 * 1024, global = true)]
    code_size: usize,

    /// Value stack size in slots
    #[arg(long, default_value_t = 1024, global = true)]
    slots: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script by calling its `main` export with the script arguments
    Run {
        file: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the tokens of a script as JSON
    Tokens { file: PathBuf },
    /// Print the compiled bytecode of a script
    Disasm { file: PathBuf },
}

// ── Logging ─────────────────────────────────────────────────────────

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => return,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// ── Host strings ────────────────────────────────────────────────────

/// Strings handed to scripts, keyed by handle until the VM frees them.
#[derive(Default)]
struct Strings {
    next: u64,
    live: HashMap<u64, Vec<u8>>,
}

thread_local! {
    static STRINGS: RefCell<Strings> = RefCell::new(Strings::default());
}

fn host_string(bytes: Vec<u8>) -> Value {
    STRINGS.with_borrow_mut(|strings| {
        let handle = strings.next;
        strings.next += 1;
        strings.live.insert(handle, bytes);
        Value::host_str(handle)
    })
}

fn release(value: Value) {
    if let Value::Str(Str::Host { handle }) = value {
        STRINGS.with_borrow_mut(|strings| strings.live.remove(&handle));
    }
}

// ── Host callbacks ──────────────────────────────────────────────────

fn write_value(out: &mut impl Write, args: &Args<'_>, i: usize) -> std::io::Result<()> {
    match args.get(i) {
        Value::None => out.write_all(b"NONE"),
        Value::Number(n) => write!(out, "{n}"),
        Value::Str(Str::Host { handle }) => {
            STRINGS.with_borrow(|strings| out.write_all(strings.live.get(&handle).map_or(&[][..], Vec::as_slice)))
        }
        Value::Str(_) => out.write_all(args.bytes(i).unwrap_or_default()),
        other => write!(out, "<{}>", other.type_name()),
    }
}

/// `print(values...)`: space separated, newline terminated.
fn print(args: Args<'_>) -> Result<Value, ErrorKind> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let written = (0..args.len())
        .try_for_each(|i| {
            if i > 0 {
                out.write_all(b" ")?;
            }
            write_value(&mut out, &args, i)
        })
        .and_then(|()| out.write_all(b"\n"));
    written.map_err(|e| ErrorKind::host(format!("print: {e}")))?;
    Ok(Value::None)
}

/// `input()`: a number read from a line of stdin, `NONE` on end of input
/// or anything unparsable.
fn input(_: Args<'_>) -> Result<Value, ErrorKind> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => Ok(Value::None),
        Ok(_) => Ok(line.trim().parse().map_or(Value::None, Value::Number)),
        Err(e) => Err(ErrorKind::host(format!("input: {e}"))),
    }
}

// ── Commands ────────────────────────────────────────────────────────

struct Failure {
    error: Error,
    source: Option<String>,
}

impl Failure {
    fn compile(error: Error, source: &str) -> Self {
        Failure { error, source: Some(source.to_string()) }
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure { error, source: None }
    }
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        ExitCode::FAILURE
    })
}

static GLOBALS: [(&str, Value); 2] =
    [("print", Value::Callback(Callback(print))), ("input", Value::Callback(Callback(input)))];
static EXPORTS: [&str; 1] = ["main"];

fn run(cli: &Cli, path: &Path, source: &str, args: &[String]) -> Result<ExitCode, Failure> {
    let mut code = vec![0u8; cli.code_size];
    let mut slots = vec![Slot::EMPTY; cli.slots];
    let mut module = Module::new(&mut code, &mut slots).with_exports(&EXPORTS);
    let mut free = release;
    let mut env = Env::new().with_globals(&GLOBALS).with_free(&mut free);

    quill::compile_module(source, &mut module, &env).map_err(|e| Failure::compile(e, source))?;
    module.init(&mut env)?;
    module.exec(&mut env)?;

    let main = match module.export("main") {
        Some(main @ Value::Function(_)) => main,
        Some(Value::None) | None => {
            let name = "main".to_string();
            return Err(Error::from(ErrorKind::UndefinedIdentifier { name }).into());
        }
        Some(_) => return Err(Error::from(ErrorKind::CallNonFunction).into()),
    };

    let argv = std::iter::once(path.display().to_string()).chain(args.iter().cloned());
    let argv = argv.map(|arg| host_string(arg.into_bytes()));
    let call: Vec<Value> = std::iter::once(Value::Number((args.len() + 1) as f64)).chain(argv).collect();
    module.init_func(&mut env, main, &call)?;
    let result = module.exec(&mut env)?;
    module.cleanup(&mut env);

    let live = STRINGS.with_borrow(|strings| strings.live.len());
    log::debug!("main returned {result:?}, {live} host strings still live");
    let status = result.as_number().map_or(0, |n| (n as i64 & 0xff) as u8);
    Ok(ExitCode::from(status))
}

fn disasm(cli: &Cli, source: &str) -> Result<ExitCode, Failure> {
    let mut code = vec![0u8; cli.code_size];
    let mut slots = vec![Slot::EMPTY; cli.slots];
    let mut module = Module::new(&mut code, &mut slots).with_exports(&EXPORTS);
    let env = Env::new().with_globals(&GLOBALS);

    quill::compile_module(source, &mut module, &env).map_err(|e| Failure::compile(e, source))?;
    print!("{}", quill::disassemble(module.bytecode()));
    Ok(ExitCode::SUCCESS)
}

fn report(cli: &Cli, failure: &Failure) {
    let mut d = Diagnostic::from(&failure.error);
    if let Some(source) = &failure.source {
        d = d.with_source(source.clone());
    }
    if cli.json {
        eprintln!("{}", json::render(&d));
    } else {
        let use_color = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
        let renderer = AnsiRenderer { use_color };
        eprint!("{}", renderer.render(&d));
    }
}

fn explain(code: &str) -> ExitCode {
    match registry::lookup(&code.to_ascii_uppercase()) {
        Some(entry) => {
            print!("{}", entry.long);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("unknown error code '{code}'");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(code) = &cli.explain {
        return explain(code);
    }

    let Some(command) = &cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    };

    let (file, outcome) = match command {
        Command::Run { file, args } => {
            let source = match read_source(file) {
                Ok(s) => s,
                Err(code) => return code,
            };
            (file, run(&cli, file, &source, args))
        }
        Command::Tokens { file } => {
            let source = match read_source(file) {
                Ok(s) => s,
                Err(code) => return code,
            };
            match serde_json::to_string_pretty(&quill::lexer::tokenize(&source)) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Serialization error: {e}");
                    return ExitCode::FAILURE;
                }
            }
            return ExitCode::SUCCESS;
        }
        Command::Disasm { file } => {
            let source = match read_source(file) {
                Ok(s) => s,
                Err(code) => return code,
            };
            (file, disasm(&cli, &source))
        }
    };

    match outcome {
        Ok(code) => code,
        Err(failure) => {
            log::debug!("{} failed with {}", file.display(), failure.error.code());
            report(&cli, &failure);
            ExitCode::FAILURE
        }
    }
}
