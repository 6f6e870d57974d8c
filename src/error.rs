use crate::lexer::{Span, TokenKind};

/// Every failure the compiler or the VM can report.
///
/// Compilation and execution stop at the first error; there is no recovery.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    // Buffers
    #[error("bytecode buffer overflow")]
    BytecodeOverflow,
    #[error("value buffer overflow")]
    ValueOverflow,
    #[error("value buffer underflow")]
    ValueUnderflow,

    // Compile time
    #[error("unexpected token {found}, expected {}", .expected.map_or("expression", TokenKind::describe))]
    UnexpectedToken { found: TokenKind, expected: Option<TokenKind> },
    #[error("syntax error: {message}")]
    Syntax { message: &'static str },
    #[error("expected expression")]
    ExpectedExpression,
    #[error("identifier '{name}' is not defined")]
    UndefinedIdentifier { name: String },
    #[error("identifier '{name}' is already defined in this block")]
    RedefinedIdentifier { name: String },
    #[error("cannot assign to predefined variable '{name}'")]
    PredefinedAssign { name: String },
    #[error("function literals cannot be nested")]
    ClosureUnsupported,
    #[error("a function cannot be assigned to an upvalue")]
    FunctionToUpvalue,

    // Run time
    #[error("undefined bytecode {byte:#04x}")]
    UndefinedBytecode { byte: u8 },
    #[error("a function cannot be returned")]
    FunctionReturn,
    #[error("attempt to call a non-function value")]
    CallNonFunction,
    #[error("a reference cannot be stored in a variable")]
    ReferenceMove,
    #[error("operation not supported on this value")]
    InvalidOperation,
    #[error("{message}")]
    Host { message: String },
}

impl ErrorKind {
    /// Stable code, listed in the diagnostic registry.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BytecodeOverflow => "QUILL-B001",
            ErrorKind::ValueOverflow => "QUILL-B002",
            ErrorKind::ValueUnderflow => "QUILL-B003",
            ErrorKind::UnexpectedToken { .. } => "QUILL-C001",
            ErrorKind::Syntax { .. } => "QUILL-C002",
            ErrorKind::ExpectedExpression => "QUILL-C003",
            ErrorKind::UndefinedIdentifier { .. } => "QUILL-C004",
            ErrorKind::RedefinedIdentifier { .. } => "QUILL-C005",
            ErrorKind::PredefinedAssign { .. } => "QUILL-C006",
            ErrorKind::ClosureUnsupported => "QUILL-C007",
            ErrorKind::FunctionToUpvalue => "QUILL-C008",
            ErrorKind::UndefinedBytecode { .. } => "QUILL-R001",
            ErrorKind::FunctionReturn => "QUILL-R002",
            ErrorKind::CallNonFunction => "QUILL-R003",
            ErrorKind::ReferenceMove => "QUILL-R004",
            ErrorKind::InvalidOperation => "QUILL-R005",
            ErrorKind::Host { .. } => "QUILL-R006",
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        ErrorKind::Host { message: message.into() }
    }
}

/// An `ErrorKind` plus where it happened. Compile errors carry the source
/// line (1-based) and, when a token is to blame, its span. Runtime errors
/// carry neither.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    pub line: Option<usize>,
    pub span: Option<Span>,
}

impl Error {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind, line: None, span: None }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
