use quill::{Env, Module, Slot, Value};

fn returns(src: &str, expected: &[u8]) {
    let mut code = [0u8; 1024];
    let mut slots = [Slot::EMPTY; 100];
    let mut module = Module::new(&mut code, &mut slots);
    let mut env = Env::new();
    quill::compile_block(src, &mut module, &env).unwrap_or_else(|e| panic!("failed to compile:\n{src}\n{e}"));
    module.init(&mut env).unwrap();
    let value = module.exec(&mut env).unwrap();
    assert!(matches!(value, Value::Str(_)), "expected a string from {src}, got {value:?}");
    assert_eq!(module.string(&value), Some(expected), "{src}");
}

#[test]
fn literals() {
    returns(r#"{ return "Hello"; }"#, b"Hello");
    returns(r#"{ return ""; }"#, b"");
    returns("{ return \"two\nlines\"; }", b"two\nlines");
}

#[test]
fn escapes() {
    returns(r#"{ return "\a"; }"#, b"\x07");
    returns(r#"{ return "\""; }"#, b"\"");
    returns(r#"{ return "\\"; }"#, b"\\");
    returns(r#"{ return "\y"; }"#, b"y");
    returns(r#"{ return "\t\n\r\0"; }"#, b"\t\n\r\0");
    returns(r#"{ return "\b\f\v"; }"#, b"\x08\x0c\x0b");
    returns(r#"{ return "\'\?"; }"#, b"'?");
}

#[test]
fn strings_move_out_of_variables() {
    returns(r#"{ @s = "kept"; return s; }"#, b"kept");
    returns(r#"{ @s = { @t = "inner"; return t; }; return s; }"#, b"inner");
    returns(r#"{ @s = "a"; s = "b"; return s; }"#, b"b");
}

#[test]
fn strings_are_not_numbers() {
    let mut code = [0u8; 1024];
    let mut slots = [Slot::EMPTY; 100];
    let mut module = Module::new(&mut code, &mut slots);
    let err = quill::compile_block(r#"{ return "a" + 1; }"#, &mut module, &Env::new()).unwrap_err();
    assert_eq!(err.kind, quill::ErrorKind::InvalidOperation);
}

#[test]
fn unterminated_string() {
    let mut code = [0u8; 1024];
    let mut slots = [Slot::EMPTY; 100];
    let mut module = Module::new(&mut code, &mut slots);
    let err = quill::compile_block("{ return \"abc; }", &mut module, &Env::new()).unwrap_err();
    assert_eq!(err.kind, quill::ErrorKind::Syntax { message: quill::lexer::UNTERMINATED_STRING });
}
