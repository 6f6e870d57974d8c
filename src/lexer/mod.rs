use logos::Logos;
use serde::Serialize;

/// Byte range of a token within the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    Error,
    Semicolon,
    Comma,
    Number,
    Var,
    Func,
    None,
    String,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Not,
    And,
    Or,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    LParen,
    RParen,
    LCurly,
    RCurly,
    Identifier,
    Return,
    If,
    Else,
    While,
    Eof,
}

impl TokenKind {
    /// How the token is written in source, for diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Error => "invalid token",
            TokenKind::Semicolon => "';'",
            TokenKind::Comma => "','",
            TokenKind::Number => "number",
            TokenKind::Var => "'@'",
            TokenKind::Func => "'$'",
            TokenKind::None => "'NONE'",
            TokenKind::String => "string",
            TokenKind::Assign => "'='",
            TokenKind::Add => "'+'",
            TokenKind::Sub => "'-'",
            TokenKind::Mul => "'*'",
            TokenKind::Div => "'/'",
            TokenKind::Not => "'!'",
            TokenKind::And => "'&&'",
            TokenKind::Or => "'||'",
            TokenKind::Lt => "'<'",
            TokenKind::Lte => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Gte => "'>='",
            TokenKind::Eq => "'=='",
            TokenKind::Neq => "'!='",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LCurly => "'{'",
            TokenKind::RCurly => "'}'",
            TokenKind::Identifier => "identifier",
            TokenKind::Return => "'return'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Eof => "end of file",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

pub const INVALID_NUMBER: &str = "Invalid number";
pub const UNTERMINATED_STRING: &str = "Unexpected EOF while parsing string";
pub const UNEXPECTED_CHARACTER: &str = "Unexpected character";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Token<'src> {
    pub kind: TokenKind,
    /// Source text of the token. For `TokenKind::Error` this is the
    /// diagnostic message instead.
    pub lexeme: &'src str,
    pub span: Span,
    pub line: usize,
}

impl Token<'_> {
    /// Diagnostic carried by an error token.
    pub fn message(&self) -> Option<&'static str> {
        if self.kind != TokenKind::Error {
            return None;
        }
        [INVALID_NUMBER, UNTERMINATED_STRING, UNEXPECTED_CHARACTER].into_iter().find(|m| *m == self.lexeme)
    }
}

// ── Raw logos tokens ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Complete,
    Invalid,
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(extras = usize)]
#[logos(skip r"[ \t\r]+")]
enum Raw {
    #[regex(r"\n", newline)]
    Newline,

    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token("@")]
    Var,
    #[token("$")]
    Func,
    #[token("=")]
    Assign,
    #[token("+")]
    Add,
    #[token("-")]
    Sub,
    #[token("*")]
    Mul,
    #[token("/")]
    Div,
    #[token("!")]
    Not,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("<")]
    Lt,
    #[token("<=")]
    Lte,
    #[token(">")]
    Gt,
    #[token(">=")]
    Gte,
    #[token("==")]
    Eq,
    #[token("!=")]
    Neq,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LCurly,
    #[token("}")]
    RCurly,

    // Keywords
    #[token("NONE")]
    NoneLit,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,

    #[regex(r"[0-9]+", number)]
    Number(Scan),

    #[token("\"", string)]
    String(Scan),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,
}

fn newline(lex: &mut logos::Lexer<Raw>) -> logos::Skip {
    lex.extras += 1;
    logos::Skip
}

/// Continues a numeric literal past its leading digits: at most one `.`,
/// and no letters or second `.` glued onto it.
fn number(lex: &mut logos::Lexer<Raw>) -> Scan {
    let rest = lex.remainder().as_bytes();
    let mut len = 0;
    let mut dot = false;
    let mut scan = Scan::Complete;
    while let Some(&c) = rest.get(len) {
        match c {
            b'0'..=b'9' => len += 1,
            b'.' if !dot => {
                dot = true;
                len += 1;
            }
            b'.' => {
                scan = Scan::Invalid;
                len += 1;
                break;
            }
            c if c.is_ascii_alphabetic() => {
                scan = Scan::Invalid;
                len += 1;
                break;
            }
            _ => break,
        }
    }
    lex.bump(len);
    scan
}

/// Scans to the closing quote. A backslash swallows the next byte
/// without interpreting it; escapes are decoded by the compiler.
fn string(lex: &mut logos::Lexer<Raw>) -> Scan {
    let rest = lex.remainder();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                lex.extras += bytes[..i].iter().filter(|&&b| b == b'\n').count();
                lex.bump(i + 1);
                return Scan::Complete;
            }
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    lex.extras += bytes.iter().filter(|&&b| b == b'\n').count();
    lex.bump(rest.len());
    Scan::Invalid
}

// ── Lexer ───────────────────────────────────────────────────────────

/// Pull-based tokenizer with one token of lookahead.
///
/// End of input is sticky: once `Eof` has been produced every further call
/// produces it again.
#[derive(Clone)]
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, Raw>,
    current: Token<'src>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            inner: Raw::lexer(source),
            current: Token { kind: TokenKind::Eof, lexeme: "", span: Span::default(), line: 1 },
        }
    }

    /// The token most recently returned by `next`.
    pub fn current(&self) -> Token<'src> {
        self.current
    }

    pub fn line(&self) -> usize {
        self.inner.extras + 1
    }

    pub fn next(&mut self) -> Token<'src> {
        let token = self.scan();
        self.current = token;
        token
    }

    /// Looks at the next token without advancing.
    pub fn peek(&self) -> Token<'src> {
        self.clone().scan()
    }

    fn scan(&mut self) -> Token<'src> {
        let raw = self.inner.next();
        let span = Span::from(self.inner.span());
        let lexeme = self.inner.slice();
        // Strings may span lines; report the line they start on.
        let line = self.line() - lexeme.bytes().filter(|&b| b == b'\n').count();

        let (kind, lexeme) = match raw {
            None => {
                let end = self.inner.source().len();
                return Token { kind: TokenKind::Eof, lexeme: "", span: Span { start: end, end }, line };
            }
            Some(Err(())) => (TokenKind::Error, UNEXPECTED_CHARACTER),
            Some(Ok(raw)) => match raw {
                Raw::Newline => return self.scan(),
                Raw::Semicolon => (TokenKind::Semicolon, lexeme),
                Raw::Comma => (TokenKind::Comma, lexeme),
                Raw::Var => (TokenKind::Var, lexeme),
                Raw::Func => (TokenKind::Func, lexeme),
                Raw::Assign => (TokenKind::Assign, lexeme),
                Raw::Add => (TokenKind::Add, lexeme),
                Raw::Sub => (TokenKind::Sub, lexeme),
                Raw::Mul => (TokenKind::Mul, lexeme),
                Raw::Div => (TokenKind::Div, lexeme),
                Raw::Not => (TokenKind::Not, lexeme),
                Raw::And => (TokenKind::And, lexeme),
                Raw::Or => (TokenKind::Or, lexeme),
                Raw::Lt => (TokenKind::Lt, lexeme),
                Raw::Lte => (TokenKind::Lte, lexeme),
                Raw::Gt => (TokenKind::Gt, lexeme),
                Raw::Gte => (TokenKind::Gte, lexeme),
                Raw::Eq => (TokenKind::Eq, lexeme),
                Raw::Neq => (TokenKind::Neq, lexeme),
                Raw::LParen => (TokenKind::LParen, lexeme),
                Raw::RParen => (TokenKind::RParen, lexeme),
                Raw::LCurly => (TokenKind::LCurly, lexeme),
                Raw::RCurly => (TokenKind::RCurly, lexeme),
                Raw::NoneLit => (TokenKind::None, lexeme),
                Raw::Return => (TokenKind::Return, lexeme),
                Raw::If => (TokenKind::If, lexeme),
                Raw::Else => (TokenKind::Else, lexeme),
                Raw::While => (TokenKind::While, lexeme),
                Raw::Identifier => (TokenKind::Identifier, lexeme),
                Raw::Number(Scan::Complete) => (TokenKind::Number, lexeme),
                Raw::Number(Scan::Invalid) => (TokenKind::Error, INVALID_NUMBER),
                Raw::String(Scan::Complete) => (TokenKind::String, lexeme),
                Raw::String(Scan::Invalid) => (TokenKind::Error, UNTERMINATED_STRING),
            },
        };
        Token { kind, lexeme, span, line }
    }
}

/// Lexes the whole source, stopping after the first `Eof`.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next();
        tokens.push(token);
        if token.kind == TokenKind::Eof {
            return tokens;
        }
    }
}

/// Decodes a numeric lexeme by plain digit accumulation. Long literals
/// overflow to infinity rather than failing.
pub fn decode_number(lexeme: &str) -> f64 {
    let (int, frac) = lexeme.split_once('.').unwrap_or((lexeme, ""));
    let mut value = 0.0;
    for d in int.bytes() {
        value = value * 10.0 + f64::from(d - b'0');
    }
    let mut factor = 10.0;
    for d in frac.bytes() {
        value += f64::from(d - b'0') / factor;
        factor *= 10.0;
    }
    value
}
