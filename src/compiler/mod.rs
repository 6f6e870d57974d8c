//! Single-pass compiler: tokens go straight to bytecode, with a Pratt parser
//! for expressions and a symbol table that mirrors the runtime stack.

use crate::env::Env;
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::{Lexer, Token, TokenKind, decode_number};
use crate::vm::{
    Label, Module, OP_ADD, OP_CALL, OP_CONST, OP_DIV, OP_EQ, OP_FUNC, OP_GET, OP_GET_UP, OP_GT, OP_GTE, OP_JUMP,
    OP_JUMPIF, OP_LT, OP_LTE, OP_MUL, OP_NEG, OP_NEQ, OP_NONE, OP_NOT, OP_POP, OP_RETURN, OP_SCOPE, OP_SET,
    OP_SET_UP, OP_STR, OP_SUB,
};

mod symbols;

use symbols::{Reach, Symbol, Symbols, Ty};

/// Compiles a module: a sequence of `@name [= expr];` declarations and
/// `name = expr;` assignments.
pub fn compile_module(source: &str, module: &mut Module<'_>, env: &Env<'_>) -> Result<()> {
    compile(source, module, env, Compiler::module_items)
}

/// Compiles a single `{ ... }` block whose value is the execution result.
pub fn compile_block(source: &str, module: &mut Module<'_>, env: &Env<'_>) -> Result<()> {
    compile(source, module, env, Compiler::top_block)
}

/// Compiles one expression; empty input evaluates to `None`.
pub fn compile_expr(source: &str, module: &mut Module<'_>, env: &Env<'_>) -> Result<()> {
    compile(source, module, env, Compiler::top_expression)
}

fn compile<'a, 'm>(
    source: &'a str,
    module: &'a mut Module<'m>,
    env: &'a Env<'_>,
    production: fn(&mut Compiler<'a, 'm>) -> Result<()>,
) -> Result<()> {
    let start = module.bpos();
    let mut compiler = Compiler::new(source, module);
    let result = compiler.seed(env).and_then(|()| production(&mut compiler));
    compiler.finish(start, result)
}

// ── Precedence ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assign,
    Expr,
    Or,
    And,
    Rel,
    RelEq,
    Term,
    Factor,
    Unary,
    Call,
}

impl Prec {
    fn of(kind: TokenKind) -> Prec {
        match kind {
            TokenKind::Number
            | TokenKind::Var
            | TokenKind::Func
            | TokenKind::None
            | TokenKind::String
            | TokenKind::Assign
            | TokenKind::Identifier => Prec::Assign,
            TokenKind::Or => Prec::Or,
            TokenKind::And => Prec::And,
            TokenKind::Lt | TokenKind::Lte | TokenKind::Gt | TokenKind::Gte => Prec::Rel,
            TokenKind::Eq | TokenKind::Neq => Prec::RelEq,
            TokenKind::Add | TokenKind::Sub | TokenKind::Not => Prec::Term,
            TokenKind::Mul | TokenKind::Div => Prec::Factor,
            TokenKind::LParen | TokenKind::If | TokenKind::Else | TokenKind::While => Prec::Call,
            _ => Prec::None,
        }
    }

    fn next(self) -> Prec {
        match self {
            Prec::None => Prec::Assign,
            Prec::Assign => Prec::Expr,
            Prec::Expr => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Rel,
            Prec::Rel => Prec::RelEq,
            Prec::RelEq => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Unary,
            Prec::Unary | Prec::Call => Prec::Call,
        }
    }
}

fn has_infix(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Add
            | TokenKind::Sub
            | TokenKind::Mul
            | TokenKind::Div
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Lt
            | TokenKind::Lte
            | TokenKind::Gt
            | TokenKind::Gte
            | TokenKind::Eq
            | TokenKind::Neq
            | TokenKind::LParen
    )
}

fn binary_op(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Add => OP_ADD,
        TokenKind::Sub => OP_SUB,
        TokenKind::Mul => OP_MUL,
        TokenKind::Div => OP_DIV,
        TokenKind::Lt => OP_LT,
        TokenKind::Lte => OP_LTE,
        TokenKind::Gt => OP_GT,
        TokenKind::Gte => OP_GTE,
        TokenKind::Eq => OP_EQ,
        TokenKind::Neq => OP_NEQ,
        _ => return None,
    })
}

fn unescape(c: u8) -> u8 {
    match c {
        b'n' => b'\n',
        b't' => b'\t',
        b'r' => b'\r',
        b'b' => 0x08,
        b'f' => 0x0c,
        b'v' => 0x0b,
        b'a' => 0x07,
        b'0' => 0,
        c => c,
    }
}

// ── Control flow bookkeeping ────────────────────────────────────────

/// What a compiled block left behind for its enclosing construct.
#[derive(Debug, Clone, Copy)]
struct BlockExit {
    /// Operand of the block's SCOPE: where a RETURN out of it resumes.
    scope: Label,
    /// Offset of the implicit `NONE RETURN`, when there is one.
    tail: usize,
    /// Slots the block holds at its end: the sentinel plus its locals.
    frame: usize,
    /// The block ends in its own `return`.
    returned: bool,
    /// A statement inside may return through the block.
    nested: bool,
}

impl BlockExit {
    fn propagates(&self) -> bool {
        self.returned || self.nested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Return,
    /// A return nested inside may leave the enclosing block.
    Propagate,
}

// ── Compiler ────────────────────────────────────────────────────────

struct Compiler<'a, 'm> {
    lexer: Lexer<'a>,
    module: &'a mut Module<'m>,
    symbols: Symbols<'a>,
    predef: usize,
    in_function: bool,
    /// Reach of the variable whose assignment is being compiled.
    assign: Option<Reach>,
}

impl<'a, 'm> Compiler<'a, 'm> {
    fn new(source: &'a str, module: &'a mut Module<'m>) -> Self {
        let capacity = module.slot_capacity();
        Compiler {
            lexer: Lexer::new(source),
            module,
            symbols: Symbols::new(capacity),
            predef: 0,
            in_function: false,
            assign: None,
        }
    }

    /// Globals and exports occupy the bottom slots, in that order.
    fn seed(&mut self, env: &'a Env<'_>) -> Result<()> {
        for (name, value) in env.globals() {
            self.symbols.push(Symbol::Local { name: *name, ty: Ty::of(value) })?;
        }
        self.predef = env.predef_len();
        let exports = self.module.exports();
        for name in exports {
            self.symbols.push(Symbol::Local { name: *name, ty: Ty::None })?;
        }
        Ok(())
    }

    fn finish(self, start: usize, result: Result<()>) -> Result<()> {
        let line = self.lexer.line();
        self.module.reset_values();
        match result {
            Ok(()) => {
                log::debug!(
                    "compiled {} bytes, peak of {} slots",
                    self.module.bpos() - start,
                    self.symbols.peak()
                );
                Ok(())
            }
            Err(mut e) => {
                self.module.rewind(start);
                e.line.get_or_insert(line);
                log::debug!("compile error on line {}: {}", e.line.unwrap_or(line), e);
                Err(e)
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn error(&self, kind: ErrorKind, token: Token<'_>) -> Error {
        Error::from(kind).at(token.line).with_span(token.span)
    }

    /// Error tokens report the lexer's message instead.
    fn unexpected(&self, found: Token<'_>, expected: Option<TokenKind>) -> Error {
        let kind = match found.message() {
            Some(message) => ErrorKind::Syntax { message },
            None => ErrorKind::UnexpectedToken { found: found.kind, expected },
        };
        self.error(kind, found)
    }

    /// Advances and requires the new token to be `kind`.
    fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>> {
        self.lexer.next();
        self.expect_current(kind)
    }

    fn expect_current(&self, kind: TokenKind) -> Result<Token<'a>> {
        let token = self.lexer.current();
        if token.kind != kind {
            return Err(self.unexpected(token, Some(kind)));
        }
        Ok(token)
    }

    fn emit(&mut self, op: u8) -> Result<()> {
        self.module.emit_op(op)?;
        Ok(())
    }

    fn emit_sized(&mut self, op: u8, n: usize) -> Result<()> {
        self.module.emit_op(op)?;
        self.module.emit_size(n)?;
        Ok(())
    }

    fn emit_number(&mut self, n: f64) -> Result<()> {
        self.module.emit_op(OP_CONST)?;
        self.module.emit_number(n)?;
        Ok(())
    }

    fn emit_jump(&mut self, op: u8) -> Result<Label> {
        self.module.emit_op(op)?;
        self.module.emit_label()
    }

    /// Pops an operand of `op` produced above `floor` and checks that it may
    /// be numeric.
    fn operand(&mut self, floor: usize, op: Token<'_>) -> Result<Ty> {
        if self.symbols.len() <= floor {
            return Err(self.error(ErrorKind::ExpectedExpression, op));
        }
        let ty = self.symbols.pop()?;
        if !ty.is_numeric() {
            return Err(self.error(ErrorKind::InvalidOperation, op));
        }
        Ok(ty)
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expression(&mut self) -> Result<()> {
        self.parse(Prec::Expr)
    }

    fn parse(&mut self, prec: Prec) -> Result<()> {
        let base = self.symbols.len();
        let token = self.lexer.current();
        self.prefix(token)?;

        loop {
            let next = self.lexer.peek();
            if prec > Prec::of(next.kind) {
                return Ok(());
            }
            if !has_infix(next.kind) {
                return Err(self.unexpected(next, None));
            }
            if self.symbols.len() <= base {
                return Err(self.error(ErrorKind::ExpectedExpression, next));
            }
            self.lexer.next();
            self.infix(next)?;
        }
    }

    fn prefix(&mut self, token: Token<'a>) -> Result<()> {
        match token.kind {
            TokenKind::Number => self.number(token),
            TokenKind::String => self.string(token),
            TokenKind::None => {
                self.emit(OP_NONE)?;
                Ok(self.symbols.temp(Ty::None)?)
            }
            TokenKind::Var => self.declaration(),
            TokenKind::Func => self.function(token),
            TokenKind::Identifier => self.identifier(token),
            TokenKind::Add | TokenKind::Sub | TokenKind::Not => self.unary(token),
            TokenKind::LParen => self.grouping(),
            TokenKind::LCurly => self.block().map(drop),
            _ => Err(self.unexpected(token, None)),
        }
    }

    fn infix(&mut self, token: Token<'a>) -> Result<()> {
        match token.kind {
            TokenKind::And => self.and(token).map(drop),
            TokenKind::Or => self.or(token).map(drop),
            TokenKind::LParen => self.call(),
            _ => self.binary(token),
        }
    }

    fn number(&mut self, token: Token<'a>) -> Result<()> {
        self.emit_number(decode_number(token.lexeme))?;
        Ok(self.symbols.temp(Ty::Number)?)
    }

    /// Writes the decoded bytes after a length operand.
    fn string(&mut self, token: Token<'a>) -> Result<()> {
        self.emit(OP_STR)?;
        let len = self.module.emit_label()?;

        let raw = token.lexeme.as_bytes();
        let body = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
        let mut bytes = body.iter();
        let mut count = 0;
        while let Some(&b) = bytes.next() {
            let b = if b == b'\\' { bytes.next().map_or(b, |&c| unescape(c)) } else { b };
            self.module.emit_bytes(&[b])?;
            count += 1;
        }
        self.module.resolve(len, count);
        Ok(self.symbols.temp(Ty::Str)?)
    }

    fn unary(&mut self, op: Token<'a>) -> Result<()> {
        let floor = self.symbols.len();
        self.lexer.next();
        self.parse(Prec::Unary)?;
        let ty = self.operand(floor, op)?;

        let ty = match op.kind {
            TokenKind::Sub => {
                self.emit(OP_NEG)?;
                Ty::Number
            }
            TokenKind::Not => {
                self.emit(OP_NOT)?;
                Ty::Number
            }
            _ => ty,
        };
        Ok(self.symbols.temp(ty)?)
    }

    fn binary(&mut self, op: Token<'a>) -> Result<()> {
        let Some(code) = binary_op(op.kind) else {
            return Err(self.unexpected(op, None));
        };
        let floor = self.symbols.len();
        self.lexer.next();
        self.parse(Prec::of(op.kind).next())?;
        self.operand(floor, op)?;
        self.operand(floor.saturating_sub(1), op)?;
        self.emit(code)?;
        Ok(self.symbols.temp(Ty::Number)?)
    }

    /// Compiles `lhs && rhs [&& ...]` to 1 or 0. Returns the offset of the
    /// `CONST 0` every falsy operand jumps to, so outer links of a chain can
    /// share it.
    fn and(&mut self, op: Token<'a>) -> Result<usize> {
        self.operand(self.symbols.len().saturating_sub(1), op)?;
        let skip = self.emit_jump(OP_JUMPIF)?;

        self.lexer.next();
        let floor = self.symbols.len();
        self.parse(Prec::And.next())?;

        let next = self.lexer.peek();
        if next.kind == TokenKind::And {
            self.lexer.next();
            let falsy = self.and(next)?;
            self.module.resolve(skip, falsy);
            return Ok(falsy);
        }

        self.operand(floor, op)?;
        let last = self.emit_jump(OP_JUMPIF)?;
        self.emit_number(1.0)?;
        let done = self.emit_jump(OP_JUMP)?;
        let falsy = self.module.bpos();
        self.module.resolve(skip, falsy);
        self.module.resolve(last, falsy);
        self.emit_number(0.0)?;
        self.module.resolve_here(done);
        self.symbols.temp(Ty::Number)?;
        Ok(falsy)
    }

    /// Compiles `lhs || rhs [|| ...]` to 1 or 0. Returns the offset of the
    /// shared `CONST 1`.
    fn or(&mut self, op: Token<'a>) -> Result<usize> {
        self.operand(self.symbols.len().saturating_sub(1), op)?;
        let next_operand = self.emit_jump(OP_JUMPIF)?;
        let skip = self.emit_jump(OP_JUMP)?;
        self.module.resolve_here(next_operand);

        self.lexer.next();
        let floor = self.symbols.len();
        self.parse(Prec::Or.next())?;

        let next = self.lexer.peek();
        if next.kind == TokenKind::Or {
            self.lexer.next();
            let truthy = self.or(next)?;
            self.module.resolve(skip, truthy);
            return Ok(truthy);
        }

        self.operand(floor, op)?;
        let last = self.emit_jump(OP_JUMPIF)?;
        let truthy = self.module.bpos();
        self.module.resolve(skip, truthy);
        self.emit_number(1.0)?;
        let done = self.emit_jump(OP_JUMP)?;
        self.module.resolve_here(last);
        self.emit_number(0.0)?;
        self.module.resolve_here(done);
        self.symbols.temp(Ty::Number)?;
        Ok(truthy)
    }

    fn identifier(&mut self, token: Token<'a>) -> Result<()> {
        let Some((index, reach)) = self.symbols.resolve(token.lexeme) else {
            let name = token.lexeme.to_string();
            return Err(self.error(ErrorKind::UndefinedIdentifier { name }, token));
        };

        if self.lexer.peek().kind == TokenKind::Assign {
            if index < self.predef {
                let name = token.lexeme.to_string();
                return Err(self.error(ErrorKind::PredefinedAssign { name }, token));
            }
            self.lexer.next();
            return self.assign(token, index, reach);
        }

        let ty = if reach == Reach::Function {
            self.emit_sized(OP_GET_UP, index)?;
            Ty::Unknown
        } else {
            self.emit_sized(OP_GET, self.symbols.len() - index)?;
            self.symbols.read(index)
        };
        Ok(self.symbols.temp(ty)?)
    }

    /// Compiles the right-hand side of `target = ...` and stores it.
    /// Assignments leave nothing on the stack.
    fn assign(&mut self, target: Token<'a>, index: usize, reach: Reach) -> Result<()> {
        let equals = self.lexer.current();
        self.lexer.next();

        let floor = self.symbols.len();
        let outer = self.assign.replace(reach);
        let rhs = self.expression();
        self.assign = outer;
        rhs?;
        if self.symbols.len() <= floor {
            return Err(self.error(ErrorKind::ExpectedExpression, equals));
        }

        if reach == Reach::Function {
            self.emit_sized(OP_SET_UP, index)?;
        } else {
            self.emit_sized(OP_SET, self.symbols.len() - index)?;
        }

        match self.symbols.pop()? {
            Ty::Reference(source) if source == index => {}
            Ty::Reference(_) => return Err(self.error(ErrorKind::ReferenceMove, target)),
            ty => {
                let ty = match reach {
                    Reach::Local => ty,
                    Reach::Block if ty == self.symbols.stored(index) => ty,
                    _ => Ty::Unknown,
                };
                self.symbols.set_ty(index, ty);
            }
        }
        self.symbols.truncate(floor);
        Ok(())
    }

    /// `@name [= expr]`
    fn declaration(&mut self) -> Result<()> {
        let name = self.expect(TokenKind::Identifier)?;
        if self.symbols.declared_in_block(name.lexeme) {
            let kind = ErrorKind::RedefinedIdentifier { name: name.lexeme.to_string() };
            return Err(self.error(kind, name));
        }

        self.symbols.push(Symbol::Local { name: name.lexeme, ty: Ty::None })?;
        self.emit(OP_NONE)?;

        if self.lexer.peek().kind == TokenKind::Assign {
            let index = self.symbols.len() - 1;
            self.lexer.next();
            self.assign(name, index, Reach::Local)?;
        }
        Ok(())
    }

    /// `$(params) { body }`
    fn function(&mut self, token: Token<'a>) -> Result<()> {
        if self.in_function {
            return Err(self.error(ErrorKind::ClosureUnsupported, token));
        }
        if self.assign.is_some_and(|reach| reach >= Reach::Block) {
            return Err(self.error(ErrorKind::FunctionToUpvalue, token));
        }

        self.emit(OP_FUNC)?;
        let skip = self.module.emit_label()?;
        let arity = self.module.emit_label()?;
        let base = self.symbols.len();
        self.symbols.push(Symbol::Function)?;

        self.expect(TokenKind::LParen)?;
        let count = self.params()?;
        self.module.resolve(arity, count);

        self.lexer.next();
        self.in_function = true;
        let body = self.block();
        self.in_function = false;
        body?;

        self.emit(OP_RETURN)?;
        self.module.resolve_here(skip);
        self.symbols.truncate(base);
        Ok(self.symbols.temp(Ty::Function)?)
    }

    fn params(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.lexer.next().kind != TokenKind::RParen {
            let param = self.expect_current(TokenKind::Identifier)?;
            if self.symbols.declared_in_block(param.lexeme) {
                let kind = ErrorKind::RedefinedIdentifier { name: param.lexeme.to_string() };
                return Err(self.error(kind, param));
            }
            self.symbols.push(Symbol::Local { name: param.lexeme, ty: Ty::Unknown })?;
            count += 1;

            if self.lexer.next().kind == TokenKind::RParen {
                break;
            }
            self.expect_current(TokenKind::Comma)?;
        }
        Ok(count)
    }

    /// Arguments follow the callee on the stack; the result replaces both.
    fn call(&mut self) -> Result<()> {
        let base = self.symbols.len();
        while self.lexer.next().kind != TokenKind::RParen {
            self.expression()?;
            if self.lexer.next().kind == TokenKind::RParen {
                break;
            }
            self.expect_current(TokenKind::Comma)?;
        }

        let argc = self.symbols.len() - base;
        self.emit_sized(OP_CALL, argc)?;
        self.symbols.truncate(base.saturating_sub(1));
        Ok(self.symbols.temp(Ty::Unknown)?)
    }

    /// `( expr )`; `()` produces nothing.
    fn grouping(&mut self) -> Result<()> {
        if self.lexer.next().kind == TokenKind::RParen {
            return Ok(());
        }
        self.expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Flow> {
        let token = self.lexer.current();
        let flow = match token.kind {
            TokenKind::Semicolon => return Ok(Flow::Normal),
            TokenKind::If => return self.if_statement(),
            TokenKind::While => return self.while_statement(),
            TokenKind::Return => {
                self.return_statement()?;
                Flow::Return
            }
            TokenKind::Var => {
                self.declaration()?;
                Flow::Normal
            }
            _ => {
                let floor = self.symbols.len();
                self.expression()?;
                while self.symbols.len() > floor {
                    self.emit(OP_POP)?;
                    self.symbols.pop()?;
                }
                Flow::Normal
            }
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(flow)
    }

    fn return_statement(&mut self) -> Result<()> {
        let floor = self.symbols.len();
        if self.lexer.peek().kind != TokenKind::Semicolon {
            self.lexer.next();
            self.expression()?;
        }
        if self.symbols.len() == floor {
            self.emit(OP_NONE)?;
            self.symbols.temp(Ty::None)?;
        }
        self.emit(OP_RETURN)
    }

    /// `{ stmt* }`, leaving the block's value as one temporary.
    fn block(&mut self) -> Result<BlockExit> {
        self.expect_current(TokenKind::LCurly)?;
        let start = self.symbols.len();
        self.emit(OP_SCOPE)?;
        let scope = self.module.emit_label()?;
        self.symbols.push(Symbol::Scope)?;

        let mut returned = false;
        let mut nested = false;
        let mut token = self.lexer.next();
        while token.kind != TokenKind::RCurly {
            if token.kind == TokenKind::Eof {
                return Err(self.unexpected(token, Some(TokenKind::RCurly)));
            }
            match self.statement()? {
                Flow::Normal => {}
                Flow::Propagate => nested = true,
                Flow::Return => {
                    returned = true;
                    self.skip_unreachable();
                    break;
                }
            }
            token = self.lexer.next();
        }
        self.expect_current(TokenKind::RCurly)?;

        let frame = self.symbols.len() - start;
        let tail = self.module.bpos();
        let value = if returned {
            self.symbols.pop()?
        } else {
            self.emit(OP_NONE)?;
            self.emit(OP_RETURN)?;
            Ty::None
        };
        // A reference into the unwound frame is resolved by RETURN.
        let value = match value {
            Ty::Reference(i) if i >= start => self.symbols.stored(i),
            ty => ty,
        };
        self.symbols.truncate(start);
        self.symbols.temp(value)?;
        self.module.resolve_here(scope);

        Ok(BlockExit { scope, tail, frame, returned, nested })
    }

    /// Skips what follows a `return` up to the block's closing brace.
    fn skip_unreachable(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.lexer.next().kind {
                TokenKind::LCurly => depth += 1,
                TokenKind::RCurly if depth == 0 => return,
                TokenKind::RCurly => depth -= 1,
                TokenKind::Eof => return,
                _ => {}
            }
        }
    }

    /// `( expr )` of an `if` or `while`, consumed by the JUMPIF that follows.
    fn condition(&mut self) -> Result<()> {
        let keyword = self.lexer.current();
        self.expect(TokenKind::LParen)?;
        let floor = self.symbols.len();
        self.grouping()?;
        if self.symbols.len() <= floor {
            return Err(self.error(ErrorKind::ExpectedExpression, keyword));
        }
        if !self.symbols.pop()?.is_numeric() {
            return Err(self.error(ErrorKind::InvalidOperation, keyword));
        }
        Ok(())
    }

    /// Replaces a block's implicit `NONE RETURN` with pops of its frame, so
    /// falling off its end leaves the stack as it was before the block.
    fn fall_through(&mut self, exit: BlockExit) -> Result<()> {
        self.module.rewind(exit.tail);
        for _ in 0..exit.frame {
            self.emit(OP_POP)?;
        }
        Ok(())
    }

    /// Points the block's SCOPE at a RETURN, so a return from inside the
    /// block continues out of the enclosing one.
    fn propagate(&mut self, exit: BlockExit) -> Result<()> {
        self.module.resolve_here(exit.scope);
        self.emit(OP_RETURN)
    }

    /// Code after an `if`/`else` arm. Returns the jump that must land after
    /// the whole conditional, if one was emitted.
    fn arm(&mut self, exit: BlockExit, jump_over: bool) -> Result<Option<Label>> {
        self.symbols.pop()?;
        if exit.returned {
            self.emit(OP_RETURN)?;
            return Ok(None);
        }
        if exit.nested {
            self.fall_through(exit)?;
            let end = self.emit_jump(OP_JUMP)?;
            self.propagate(exit)?;
            return Ok(Some(end));
        }
        self.emit(OP_POP)?;
        if jump_over {
            return Ok(Some(self.emit_jump(OP_JUMP)?));
        }
        Ok(None)
    }

    fn if_statement(&mut self) -> Result<Flow> {
        self.condition()?;
        let skip = self.emit_jump(OP_JUMPIF)?;

        self.lexer.next();
        let then = self.block()?;
        let has_else = self.lexer.peek().kind == TokenKind::Else;
        let end = self.arm(then, has_else)?;
        self.module.resolve_here(skip);

        let mut propagates = then.propagates();
        if has_else {
            self.lexer.next();
            if self.lexer.next().kind == TokenKind::If {
                propagates |= self.if_statement()? == Flow::Propagate;
            } else {
                let other = self.block()?;
                if let Some(other_end) = self.arm(other, false)? {
                    self.module.resolve_here(other_end);
                }
                propagates |= other.propagates();
            }
        }
        if let Some(end) = end {
            self.module.resolve_here(end);
        }

        Ok(if propagates { Flow::Propagate } else { Flow::Normal })
    }

    /// A false condition jumps past the whole loop, including the RETURN
    /// that forwards returns from the body.
    fn while_statement(&mut self) -> Result<Flow> {
        let start = self.module.bpos();
        self.condition()?;
        let exit = self.emit_jump(OP_JUMPIF)?;

        self.lexer.next();
        let body = self.block()?;
        self.symbols.pop()?;
        if body.returned {
            self.emit(OP_RETURN)?;
        } else if body.nested {
            self.fall_through(body)?;
            self.emit_sized(OP_JUMP, start)?;
            self.propagate(body)?;
        } else {
            self.emit(OP_POP)?;
            self.emit_sized(OP_JUMP, start)?;
        }
        self.module.resolve_here(exit);

        Ok(if body.propagates() { Flow::Propagate } else { Flow::Normal })
    }

    // ── Entry productions ───────────────────────────────────────────

    fn module_items(&mut self) -> Result<()> {
        let mut token = self.lexer.next();
        while token.kind != TokenKind::Eof {
            if token.kind == TokenKind::Identifier && self.lexer.peek().kind == TokenKind::Assign {
                self.identifier(token)?;
            } else {
                self.expect_current(TokenKind::Var)?;
                self.declaration()?;
            }
            self.expect(TokenKind::Semicolon)?;
            token = self.lexer.next();
        }
        Ok(())
    }

    fn top_block(&mut self) -> Result<()> {
        self.lexer.next();
        self.block()?;
        self.expect(TokenKind::Eof)?;
        Ok(())
    }

    fn top_expression(&mut self) -> Result<()> {
        self.emit(OP_SCOPE)?;
        let scope = self.module.emit_label()?;
        self.symbols.push(Symbol::Scope)?;

        let floor = self.symbols.len();
        if self.lexer.next().kind != TokenKind::Eof {
            self.expression()?;
        }
        if self.symbols.len() == floor {
            self.emit(OP_NONE)?;
        }
        self.emit(OP_RETURN)?;
        self.module.resolve_here(scope);
        self.expect(TokenKind::Eof)?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
