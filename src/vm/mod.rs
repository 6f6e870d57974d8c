use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::value::{self, Args, Function, Slot, SlotKind, Str, Value};

pub mod disasm;

pub use disasm::disassemble;

// ── Opcodes ─────────────────────────────────────────────────────────
//
// One opcode byte followed by its operands. Size operands are native-endian
// `usize`, constants are native-endian `f64`, and STR carries a length
// followed by the raw string bytes.

pub(crate) const OP_RETURN: u8 = 0;
pub(crate) const OP_JUMP: u8 = 1; // target
pub(crate) const OP_JUMPIF: u8 = 2; // target, taken when the popped value is falsy
pub(crate) const OP_CALL: u8 = 3; // argc
pub(crate) const OP_POP: u8 = 4;
pub(crate) const OP_SET: u8 = 5; // distance from top
pub(crate) const OP_GET: u8 = 6; // distance from top
pub(crate) const OP_SET_UP: u8 = 7; // absolute slot
pub(crate) const OP_GET_UP: u8 = 8; // absolute slot
pub(crate) const OP_NONE: u8 = 9;
pub(crate) const OP_CONST: u8 = 10; // f64
pub(crate) const OP_STR: u8 = 11; // len, bytes
pub(crate) const OP_SCOPE: u8 = 12; // resume target
pub(crate) const OP_FUNC: u8 = 13; // skip target, arity
pub(crate) const OP_NEG: u8 = 14;
pub(crate) const OP_ADD: u8 = 15;
pub(crate) const OP_SUB: u8 = 16;
pub(crate) const OP_MUL: u8 = 17;
pub(crate) const OP_DIV: u8 = 18;
pub(crate) const OP_NOT: u8 = 19;
pub(crate) const OP_LT: u8 = 20;
pub(crate) const OP_LTE: u8 = 21;
pub(crate) const OP_GT: u8 = 22;
pub(crate) const OP_GTE: u8 = 23;
pub(crate) const OP_EQ: u8 = 24;
pub(crate) const OP_NEQ: u8 = 25;

pub(crate) const SIZE: usize = std::mem::size_of::<usize>();
pub(crate) const NUMBER: usize = std::mem::size_of::<f64>();

pub(crate) fn op_name(op: u8) -> Option<&'static str> {
    Some(match op {
        OP_RETURN => "RETURN",
        OP_JUMP => "JUMP",
        OP_JUMPIF => "JUMPIF",
        OP_CALL => "CALL",
        OP_POP => "POP",
        OP_SET => "SET",
        OP_GET => "GET",
        OP_SET_UP => "SET_UP",
        OP_GET_UP => "GET_UP",
        OP_NONE => "NONE",
        OP_CONST => "CONST",
        OP_STR => "STR",
        OP_SCOPE => "SCOPE",
        OP_FUNC => "FUNC",
        OP_NEG => "NEG",
        OP_ADD => "ADD",
        OP_SUB => "SUB",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_NOT => "NOT",
        OP_LT => "LT",
        OP_LTE => "LTE",
        OP_GT => "GT",
        OP_GTE => "GTE",
        OP_EQ => "EQ",
        OP_NEQ => "NEQ",
        _ => return None,
    })
}

pub(crate) fn read_size(code: &[u8], at: usize) -> Option<usize> {
    let bytes = code.get(at..at.checked_add(SIZE)?)?;
    Some(usize::from_ne_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_number(code: &[u8], at: usize) -> Option<f64> {
    let bytes = code.get(at..at.checked_add(NUMBER)?)?;
    Some(f64::from_ne_bytes(bytes.try_into().ok()?))
}

/// A size operand written before its value is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Label(usize);

impl Label {
    pub fn offset(self) -> usize {
        self.0
    }
}

// ── Module ──────────────────────────────────────────────────────────

/// Compiled code plus the runtime value stack, both living in buffers the
/// host owns. Nothing here ever allocates: running out of room is an
/// ordinary error.
pub struct Module<'m> {
    code: &'m mut [u8],
    bpos: usize,
    slots: &'m mut [Slot],
    vpos: usize,
    exports: &'m [&'m str],
    predef: usize,
    pc: usize,
}

impl<'m> Module<'m> {
    pub fn new(code: &'m mut [u8], slots: &'m mut [Slot]) -> Self {
        Module { code, bpos: 0, slots, vpos: 0, exports: &[], predef: 0, pc: 0 }
    }

    /// Declares the module-scope names the host wants to read back.
    pub fn with_exports(mut self, exports: &'m [&'m str]) -> Self {
        self.exports = exports;
        self
    }

    pub fn exports(&self) -> &'m [&'m str] {
        self.exports
    }

    /// The bytecode written so far.
    pub fn bytecode(&self) -> &[u8] {
        &self.code[..self.bpos]
    }

    pub fn bpos(&self) -> usize {
        self.bpos
    }

    pub fn vpos(&self) -> usize {
        self.vpos
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn code_capacity(&self) -> usize {
        self.code.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    /// A live slot's value. Sentinels and references read as `None`.
    pub fn slot(&self, index: usize) -> Option<Value> {
        self.slots[..self.vpos].get(index)?.value()
    }

    /// Bytes of a string literal produced by this module. Host strings read
    /// as `None`; their bytes stay with the host.
    pub fn string(&self, value: &Value) -> Option<&[u8]> {
        match value {
            Value::Str(s) => value::str_bytes(self.bytecode(), *s),
            _ => None,
        }
    }

    // ── Emitting ────────────────────────────────────────────────────

    pub fn emit_op(&mut self, op: u8) -> Result<usize> {
        self.emit_bytes(&[op])
    }

    pub fn emit_size(&mut self, n: usize) -> Result<usize> {
        self.emit_bytes(&n.to_ne_bytes())
    }

    pub fn emit_number(&mut self, n: f64) -> Result<usize> {
        self.emit_bytes(&n.to_ne_bytes())
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let at = self.bpos;
        let end = at.checked_add(bytes.len()).ok_or(ErrorKind::BytecodeOverflow)?;
        let dst = self.code.get_mut(at..end).ok_or(ErrorKind::BytecodeOverflow)?;
        dst.copy_from_slice(bytes);
        self.bpos = end;
        Ok(at)
    }

    /// Writes a placeholder size operand to be filled in by `resolve`.
    pub fn emit_label(&mut self) -> Result<Label> {
        self.emit_size(0).map(Label)
    }

    pub fn resolve(&mut self, label: Label, target: usize) {
        let Some(end) = label.0.checked_add(SIZE) else {
            return;
        };
        if let Some(dst) = self.code.get_mut(label.0..end) {
            dst.copy_from_slice(&target.to_ne_bytes());
        }
    }

    /// Points `label` at the next instruction to be written.
    pub fn resolve_here(&mut self, label: Label) {
        self.resolve(label, self.bpos);
    }

    pub(crate) fn rewind(&mut self, bpos: usize) {
        self.bpos = bpos.min(self.bpos);
    }

    pub(crate) fn reset_values(&mut self) {
        self.vpos = 0;
    }

    // ── Value stack ─────────────────────────────────────────────────

    fn push(&mut self, slot: Slot) -> Result<()> {
        let dst = self.slots.get_mut(self.vpos).ok_or(ErrorKind::ValueOverflow)?;
        *dst = slot;
        self.vpos += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Slot> {
        if self.vpos <= self.predef {
            return Err(ErrorKind::ValueUnderflow.into());
        }
        self.vpos -= 1;
        Ok(self.slots[self.vpos])
    }

    /// Pops and retires the top value.
    fn pop_free(&mut self, env: &mut Env<'_>) -> Result<()> {
        if let SlotKind::Value(v) = self.pop()?.0 {
            env.release(v);
        }
        Ok(())
    }

    fn top(&self) -> Result<Slot> {
        match self.vpos.checked_sub(1) {
            Some(i) if i >= self.predef => Ok(self.slots[i]),
            _ => Err(ErrorKind::ValueUnderflow.into()),
        }
    }

    /// Index of the slot `distance` below the stack top.
    fn relative(&self, distance: usize) -> Result<usize> {
        match self.vpos.checked_sub(distance) {
            Some(i) if i < self.vpos => Ok(i),
            _ => Err(ErrorKind::ValueUnderflow.into()),
        }
    }

    fn absolute(&self, index: usize) -> Result<usize> {
        if index < self.vpos {
            Ok(index)
        } else {
            Err(ErrorKind::ValueUnderflow.into())
        }
    }

    fn number(&self, slot: Slot) -> Result<f64> {
        let value = match slot.0 {
            SlotKind::Value(v) => Some(v),
            SlotKind::Reference(target) => value::load(self.slots, target),
            SlotKind::Scope { .. } => None,
        };
        match value {
            Some(Value::Number(n)) => Ok(n),
            _ => Err(ErrorKind::InvalidOperation.into()),
        }
    }

    /// `None` and `0` are false; any other number is true.
    fn truthy(&self, slot: Slot) -> Result<bool> {
        match slot.0 {
            SlotKind::Value(Value::None) => Ok(false),
            _ => self.number(slot).map(|n| n != 0.0),
        }
    }

    fn read_size(&mut self, op: u8) -> Result<usize> {
        let n = read_size(self.bytecode(), self.pc).ok_or(ErrorKind::UndefinedBytecode { byte: op })?;
        self.pc += SIZE;
        Ok(n)
    }

    fn read_number(&mut self, op: u8) -> Result<f64> {
        let n = read_number(self.bytecode(), self.pc).ok_or(ErrorKind::UndefinedBytecode { byte: op })?;
        self.pc += NUMBER;
        Ok(n)
    }

    /// Pads missing arguments with `None` and retires extra ones.
    fn reconcile(&mut self, given: usize, arity: usize, env: &mut Env<'_>) -> Result<()> {
        for _ in arity..given {
            self.pop_free(env)?;
        }
        for _ in given..arity {
            self.push(Value::None.into())?;
        }
        Ok(())
    }

    fn store(&mut self, index: usize, env: &mut Env<'_>) -> Result<()> {
        let top = self.top()?;
        match top.0 {
            // Assigning a variable to itself.
            SlotKind::Reference(target) if target == index => {
                self.vpos -= 1;
                Ok(())
            }
            SlotKind::Reference(_) => Err(ErrorKind::ReferenceMove.into()),
            SlotKind::Scope { .. } => Err(ErrorKind::InvalidOperation.into()),
            SlotKind::Value(v) => {
                if let SlotKind::Value(old) = self.slots[index].0 {
                    env.release(old);
                }
                self.slots[index] = Slot::from(v);
                self.vpos -= 1;
                Ok(())
            }
        }
    }

    /// Pushes a slot's value, or a reference to it when it holds an object.
    fn load(&mut self, index: usize) -> Result<()> {
        let slot = self.slots[index];
        match slot.0 {
            SlotKind::Value(v) if v.is_object() => self.push(Slot::reference(index)),
            SlotKind::Scope { .. } => Err(ErrorKind::InvalidOperation.into()),
            _ => self.push(slot),
        }
    }

    fn unary(&mut self, f: impl FnOnce(f64) -> f64) -> Result<()> {
        let v = self.pop()?;
        let n = self.number(v)?;
        self.push(Value::Number(f(n)).into())
    }

    fn binary(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (a, b) = (self.number(lhs)?, self.number(rhs)?);
        self.push(Value::Number(f(a, b)).into())
    }

    fn compare(&mut self, f: impl FnOnce(f64, f64) -> bool) -> Result<()> {
        self.binary(|a, b| if f(a, b) { 1.0 } else { 0.0 })
    }

    fn call(&mut self, argc: usize, env: &mut Env<'_>) -> Result<()> {
        let callee = argc
            .checked_add(1)
            .and_then(|n| self.vpos.checked_sub(n))
            .filter(|&i| i >= self.predef)
            .ok_or(ErrorKind::ValueUnderflow)?;
        match self.slots[callee].0 {
            SlotKind::Value(Value::Callback(cb)) => {
                let args = Args::new(&self.slots[..self.vpos], callee + 1, argc, &self.code[..self.bpos]);
                let result = (cb.0)(args)?;
                let out = self.retire_args(argc, result, env)?;
                self.vpos -= 1;
                self.push(out)
            }
            SlotKind::Value(Value::Function(f)) => {
                self.slots[callee] = Slot::scope(self.pc);
                self.pc = f.entry;
                self.reconcile(argc, f.arity, env)
            }
            _ => Err(ErrorKind::CallNonFunction.into()),
        }
    }

    /// Pops a callback's arguments. An object the callback handed back is not
    /// freed: an owned argument moves into the result, and a borrowed one
    /// comes back as a reference to the variable it was read from.
    fn retire_args(&mut self, argc: usize, result: Value, env: &mut Env<'_>) -> Result<Slot> {
        let mut out = Slot::from(result);
        let mut moved = !result.is_object();
        for _ in 0..argc {
            match self.pop()?.0 {
                SlotKind::Value(v) if !moved && v == result => moved = true,
                SlotKind::Value(v) => env.release(v),
                SlotKind::Reference(target) if !moved && value::load(self.slots, target) == Some(result) => {
                    out = Slot::reference(target);
                    moved = true;
                }
                SlotKind::Reference(_) | SlotKind::Scope { .. } => {}
            }
        }
        Ok(out)
    }

    /// Pops the return value, unwinds to the nearest scope sentinel, and
    /// either resumes at the sentinel's target or, when that target is past
    /// the end of the code, finishes execution with the value.
    fn ret(&mut self, env: &mut Env<'_>) -> Result<Option<Value>> {
        let mut retv = self.pop()?;
        if let SlotKind::Value(Value::Function(_)) = retv.0 {
            return Err(ErrorKind::FunctionReturn.into());
        }

        let target = loop {
            let index = self.vpos.wrapping_sub(1);
            let slot = self.pop()?;
            match slot.0 {
                SlotKind::Scope { target } => break target,
                // The value escapes the unwound region instead of being freed.
                SlotKind::Value(_) if retv.0 == SlotKind::Reference(index) => retv = slot,
                SlotKind::Value(v) => env.release(v),
                SlotKind::Reference(_) => {}
            }
        };

        if target >= self.bpos {
            self.pc = self.bpos;
            let value = match retv.0 {
                SlotKind::Value(v) => v,
                SlotKind::Reference(i) => value::load(self.slots, i).unwrap_or_default(),
                SlotKind::Scope { .. } => Value::None,
            };
            return Ok(Some(value));
        }
        self.push(retv)?;
        self.pc = target;
        Ok(None)
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Executes one instruction. Returns the result once a RETURN leaves
    /// the outermost scope.
    pub fn step(&mut self, env: &mut Env<'_>) -> Result<Option<Value>> {
        self.predef = env.predef_len();
        let Some(&op) = self.bytecode().get(self.pc) else {
            return Ok(None);
        };
        log::trace!("{:04} {} vpos={}", self.pc, op_name(op).unwrap_or("?"), self.vpos);
        self.pc += 1;

        match op {
            OP_RETURN => return self.ret(env),
            OP_JUMP => self.pc = self.read_size(op)?,
            OP_JUMPIF => {
                let target = self.read_size(op)?;
                let cond = self.top()?;
                let truthy = self.truthy(cond)?;
                self.pop_free(env)?;
                if !truthy {
                    self.pc = target;
                }
            }
            OP_CALL => {
                let argc = self.read_size(op)?;
                self.call(argc, env)?;
            }
            OP_POP => self.pop_free(env)?,
            OP_SET => {
                let distance = self.read_size(op)?;
                let index = self.relative(distance)?;
                self.store(index, env)?;
            }
            OP_GET => {
                let distance = self.read_size(op)?;
                let index = self.relative(distance)?;
                self.load(index)?;
            }
            OP_SET_UP => {
                let index = self.read_size(op)?;
                let index = self.absolute(index)?;
                self.store(index, env)?;
            }
            OP_GET_UP => {
                let index = self.read_size(op)?;
                let index = self.absolute(index)?;
                self.load(index)?;
            }
            OP_NONE => self.push(Value::None.into())?,
            OP_CONST => {
                let n = self.read_number(op)?;
                self.push(Value::Number(n).into())?;
            }
            OP_STR => {
                let len = self.read_size(op)?;
                let offset = self.pc;
                let end = offset.checked_add(len).filter(|&end| end <= self.bpos);
                let Some(end) = end else {
                    return Err(ErrorKind::UndefinedBytecode { byte: op }.into());
                };
                self.push(Value::Str(Str::Literal { offset, len }).into())?;
                self.pc = end;
            }
            OP_SCOPE => {
                let target = self.read_size(op)?;
                self.push(Slot::scope(target))?;
            }
            OP_FUNC => {
                let skip = self.read_size(op)?;
                let arity = self.read_size(op)?;
                self.push(Value::Function(Function { entry: self.pc, arity }).into())?;
                self.pc = skip;
            }
            OP_NEG => self.unary(|n| -n)?,
            OP_NOT => self.unary(|n| if n == 0.0 { 1.0 } else { 0.0 })?,
            OP_ADD => self.binary(|a, b| a + b)?,
            OP_SUB => self.binary(|a, b| a - b)?,
            OP_MUL => self.binary(|a, b| a * b)?,
            OP_DIV => self.binary(|a, b| a / b)?,
            OP_LT => self.compare(|a, b| a < b)?,
            OP_LTE => self.compare(|a, b| a <= b)?,
            OP_GT => self.compare(|a, b| a > b)?,
            OP_GTE => self.compare(|a, b| a >= b)?,
            OP_EQ => self.compare(|a, b| a == b)?,
            OP_NEQ => self.compare(|a, b| a != b)?,
            byte => return Err(ErrorKind::UndefinedBytecode { byte }.into()),
        }
        Ok(None)
    }

    /// Runs until the program counter reaches the end of the code.
    pub fn exec(&mut self, env: &mut Env<'_>) -> Result<Value> {
        let mut result = Value::None;
        while self.pc < self.bpos {
            match self.step(env) {
                Ok(Some(v)) => result = v,
                Ok(None) => {}
                Err(e) => {
                    log::debug!("runtime error at pc {}: {}", self.pc, e);
                    return Err(e);
                }
            }
        }
        Ok(result)
    }

    /// Prepares the value stack for execution: globals first, then one
    /// `None` slot per export. Execution restarts from the first instruction.
    pub fn init(&mut self, env: &mut Env<'_>) -> Result<()> {
        self.vpos = 0;
        self.pc = 0;
        self.predef = 0;
        for (_, value) in env.globals() {
            self.push((*value).into())?;
        }
        for _ in self.exports {
            self.push(Value::None.into())?;
        }
        self.predef = env.predef_len();
        Ok(())
    }

    /// Sets up a call to a script function so the next `exec` runs it and
    /// returns its result.
    pub fn init_func(&mut self, env: &mut Env<'_>, func: Value, args: &[Value]) -> Result<()> {
        let Value::Function(f) = func else {
            return Err(ErrorKind::CallNonFunction.into());
        };
        self.predef = env.predef_len();
        self.pc = f.entry;
        self.push(Slot::scope(self.bpos))?;
        for arg in args {
            self.push((*arg).into())?;
        }
        self.reconcile(args.len(), f.arity, env)
    }

    /// Current value of an exported name.
    pub fn export(&self, name: &str) -> Option<Value> {
        let i = self.exports.iter().position(|e| *e == name)?;
        self.slot(self.predef + i)
    }

    /// Retires every object above the globals and empties the value stack
    /// down to them.
    pub fn cleanup(&mut self, env: &mut Env<'_>) {
        self.predef = env.predef_len();
        while self.vpos > self.predef {
            self.vpos -= 1;
            if let SlotKind::Value(v) = self.slots[self.vpos].0 {
                env.release(v);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
