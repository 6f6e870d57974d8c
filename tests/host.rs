use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use quill::{Args, Env, ErrorKind, Module, Slot, Str, Value};

thread_local! {
    static STRINGS: RefCell<HashMap<u64, Vec<u8>>> = RefCell::new(HashMap::new());
    static NEXT: Cell<u64> = const { Cell::new(1) };
}

fn alloc(bytes: Vec<u8>) -> Value {
    let handle = NEXT.get();
    NEXT.set(handle + 1);
    STRINGS.with_borrow_mut(|strings| strings.insert(handle, bytes));
    Value::host_str(handle)
}

fn reclaim(value: Value) {
    if let Value::Str(Str::Host { handle }) = value {
        STRINGS.with_borrow_mut(|strings| strings.remove(&handle));
    }
}

fn live_strings() -> usize {
    STRINGS.with_borrow(HashMap::len)
}

fn text(args: &Args<'_>, i: usize) -> Option<Vec<u8>> {
    match args.str(i)? {
        Str::Host { handle } => STRINGS.with_borrow(|strings| strings.get(&handle).cloned()),
        Str::Literal { .. } => args.bytes(i).map(<[u8]>::to_vec),
    }
}

fn sum(args: Args<'_>) -> Result<Value, ErrorKind> {
    let mut total = 0.0;
    for i in 0..args.len() {
        total += args.number(i).ok_or_else(|| ErrorKind::host("sum takes numbers"))?;
    }
    Ok(Value::Number(total))
}

fn length(args: Args<'_>) -> Result<Value, ErrorKind> {
    let bytes = text(&args, 0).ok_or_else(|| ErrorKind::host("length takes a string"))?;
    Ok(Value::Number(bytes.len() as f64))
}

fn make(args: Args<'_>) -> Result<Value, ErrorKind> {
    let handle = args.number(0).unwrap_or(0.0) as u64;
    Ok(Value::object(1, handle))
}

fn shout(args: Args<'_>) -> Result<Value, ErrorKind> {
    let bytes = text(&args, 0).ok_or_else(|| ErrorKind::host("shout takes a string"))?;
    Ok(alloc(bytes.to_ascii_uppercase()))
}

fn id(args: Args<'_>) -> Result<Value, ErrorKind> {
    Ok(args.get(0))
}

fn globals() -> [(&'static str, Value); 5] {
    [
        ("sum", Value::callback(sum)),
        ("length", Value::callback(length)),
        ("make", Value::callback(make)),
        ("shout", Value::callback(shout)),
        ("id", Value::callback(id)),
    ]
}

fn run(src: &str) -> Result<Value, quill::Error> {
    let globals = globals();
    let mut env = Env::new().with_globals(&globals);
    let mut code = [0u8; 2048];
    let mut slots = [Slot::EMPTY; 64];
    let mut module = Module::new(&mut code, &mut slots);
    quill::compile_block(src, &mut module, &env)?;
    module.init(&mut env)?;
    module.exec(&mut env)
}

#[test]
fn callbacks_receive_arguments() {
    assert_eq!(run("{ return sum(1, 2, 3); }").unwrap(), Value::Number(6.0));
    assert_eq!(run("{ return sum(); }").unwrap(), Value::Number(0.0));
    assert_eq!(run(r#"{ return length("four"); }"#).unwrap(), Value::Number(4.0));
}

#[test]
fn callbacks_read_variables_through_references() {
    assert_eq!(run(r#"{ @s = "abc"; return length(s); }"#).unwrap(), Value::Number(3.0));
}

#[test]
fn callback_errors_surface() {
    let err = run(r#"{ return sum(1, "x"); }"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::host("sum takes numbers"));
    assert_eq!(err.code(), "QUILL-R006");
}

#[test]
fn globals_are_visible_everywhere() {
    assert_eq!(run("{ @f = $(a) { return sum(a, a); }; return f(4); }").unwrap(), Value::Number(8.0));
}

#[test]
fn freed_objects() {
    let freed = RefCell::new(Vec::new());
    let mut free = |v: Value| freed.borrow_mut().push(v);
    let globals = globals();
    let mut env = Env::new().with_globals(&globals).with_free(&mut free);
    let mut code = [0u8; 2048];
    let mut slots = [Slot::EMPTY; 64];
    let mut module = Module::new(&mut code, &mut slots);

    let src = "{ @a = make(1); a = make(2); { @b = make(3); }; make(4); return 0; }";
    quill::compile_block(src, &mut module, &env).unwrap();
    module.init(&mut env).unwrap();
    assert_eq!(module.exec(&mut env).unwrap(), Value::Number(0.0));
    module.cleanup(&mut env);
    drop(env);

    let mut handles: Vec<u64> = freed
        .into_inner()
        .into_iter()
        .map(|v| match v {
            Value::Object(o) => o.handle,
            other => panic!("freed a non-object {other:?}"),
        })
        .collect();
    handles.sort_unstable();
    assert_eq!(handles, vec![1, 2, 3, 4]);
}

#[test]
fn returned_object_is_not_freed() {
    let mut freed = 0;
    let mut free = |_: Value| freed += 1;
    let globals = globals();
    let mut env = Env::new().with_globals(&globals).with_free(&mut free);
    let mut code = [0u8; 1024];
    let mut slots = [Slot::EMPTY; 32];
    let mut module = Module::new(&mut code, &mut slots);

    quill::compile_block("{ @a = make(7); return a; }", &mut module, &env).unwrap();
    module.init(&mut env).unwrap();
    assert_eq!(module.exec(&mut env).unwrap(), Value::object(1, 7));
    drop(env);
    assert_eq!(freed, 0);
}

fn run_freeing(src: &str, free: &mut impl quill::Free) -> Result<Value, quill::Error> {
    let globals = globals();
    let mut env = Env::new().with_globals(&globals).with_free(free);
    let mut code = [0u8; 2048];
    let mut slots = [Slot::EMPTY; 64];
    let mut module = Module::new(&mut code, &mut slots);
    quill::compile_block(src, &mut module, &env)?;
    module.init(&mut env)?;
    let result = module.exec(&mut env);
    module.cleanup(&mut env);
    result
}

#[test]
fn host_strings_are_reclaimed() {
    let mut free = reclaim;
    let first = NEXT.get();
    let src = r#"{ @a = shout("ab"); @b = shout(a); shout("x"); return length(b); }"#;
    assert_eq!(run_freeing(src, &mut free).unwrap(), Value::Number(2.0));
    assert_eq!(NEXT.get() - first, 3);
    assert_eq!(live_strings(), 0);
}

#[test]
fn returned_host_string_stays_with_the_host() {
    let mut free = reclaim;
    let value = run_freeing(r#"{ @s = shout("hi"); return s; }"#, &mut free).unwrap();
    let Value::Str(Str::Host { handle }) = value else {
        panic!("expected a host string, got {value:?}");
    };
    assert_eq!(STRINGS.with_borrow(|strings| strings.get(&handle).cloned()), Some(b"HI".to_vec()));
    reclaim(value);
    assert_eq!(live_strings(), 0);
}

#[test]
fn module_string_reads_literals_only() {
    let globals = globals();
    let mut env = Env::new().with_globals(&globals);
    let mut code = [0u8; 1024];
    let mut slots = [Slot::EMPTY; 32];
    let mut module = Module::new(&mut code, &mut slots);
    quill::compile_expr(r#""hello""#, &mut module, &env).unwrap();
    module.init(&mut env).unwrap();
    let value = module.exec(&mut env).unwrap();
    assert_eq!(module.string(&value), Some(&b"hello"[..]));
    assert_eq!(module.string(&Value::host_str(1)), None);
}

#[test]
fn callback_returning_its_argument_frees_it_once() {
    let freed = RefCell::new(Vec::new());
    let mut free = |v: Value| freed.borrow_mut().push(v);
    let src = r#"{ id("x"); id(make(3)); @o = id(make(4)); return 0; }"#;
    assert_eq!(run_freeing(src, &mut free).unwrap(), Value::Number(0.0));
    let freed = freed.into_inner();
    assert_eq!(freed.len(), 3, "freed {freed:?}");
    assert_eq!(freed.iter().filter(|v| matches!(v, Value::Str(_))).count(), 1);
    assert!(freed.contains(&Value::object(1, 3)));
    assert!(freed.contains(&Value::object(1, 4)));
}

#[test]
fn callback_returning_a_variable_hands_back_a_reference() {
    let freed = RefCell::new(Vec::new());
    let mut free = |v: Value| freed.borrow_mut().push(v);
    let src = "{ @o = make(5); id(o); id(o); return 0; }";
    assert_eq!(run_freeing(src, &mut free).unwrap(), Value::Number(0.0));
    assert_eq!(freed.into_inner(), vec![Value::object(1, 5)]);

    let err = run("{ @o = make(5); @p = id(o); return 0; }").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceMove);

    let mut none = |_: Value| {};
    assert_eq!(run_freeing("{ @o = make(6); return id(o); }", &mut none).unwrap(), Value::object(1, 6));
}

#[test]
fn step_by_step() {
    let mut env = Env::new();
    let mut code = [0u8; 256];
    let mut slots = [Slot::EMPTY; 8];
    let mut module = Module::new(&mut code, &mut slots);
    quill::compile_expr("2 * 21", &mut module, &env).unwrap();
    module.init(&mut env).unwrap();

    let mut steps = 0;
    let result = loop {
        steps += 1;
        if let Some(v) = module.step(&mut env).unwrap() {
            break v;
        }
    };
    assert_eq!(result, Value::Number(42.0));
    assert_eq!(steps, 5);
    assert_eq!(module.pc(), module.bpos());
}

#[test]
fn disassembly_lists_code() {
    let mut code = [0u8; 256];
    let mut slots = [Slot::EMPTY; 8];
    let mut module = Module::new(&mut code, &mut slots);
    quill::compile_block("{ @a = 1; return -a; }", &mut module, &Env::new()).unwrap();
    let listing = quill::disassemble(module.bytecode());
    for op in ["SCOPE", "NONE", "CONST", "SET", "GET", "NEG", "RETURN"] {
        assert!(listing.contains(op), "{op} missing from\n{listing}");
    }
}
