//! quill: a small embeddable scripting language.
//!
//! Source is compiled in a single pass straight to bytecode, which runs on
//! a stack VM. Both the bytecode and the value stack live in buffers the
//! host supplies, so neither compiling nor running grows memory behind the
//! host's back.
//!
//! ```
//! use quill::{Env, Module, Slot, Value};
//!
//! let mut code = [0u8; 1024];
//! let mut slots = [Slot::EMPTY; 64];
//! let mut module = Module::new(&mut code, &mut slots);
//! let mut env = Env::new();
//!
//! quill::compile_block("{ @a = 20; return a * 2 + 2; }", &mut module, &env).unwrap();
//! module.init(&mut env).unwrap();
//! assert_eq!(module.exec(&mut env).unwrap(), Value::Number(42.0));
//! ```

pub mod compiler;
pub mod diagnostic;
pub mod env;
pub mod error;
pub mod lexer;
pub mod value;
pub mod vm;

pub use compiler::{compile_block, compile_expr, compile_module};
pub use env::{Env, Free};
pub use error::{Error, ErrorKind, Result};
pub use lexer::{Lexer, Span, Token, TokenKind};
pub use value::{Args, Callback, Function, HostFn, Object, Slot, Str, Value};
pub use vm::{Label, Module, disassemble};
