use crate::error::ErrorKind;
use crate::value::Value;

/// Best-effort static type of a stack entry. `Unknown` is assumed to be
/// anything and is only checked at run time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Ty {
    None,
    Number,
    Str,
    Function,
    Callback,
    Object,
    /// Alias to the object held by the symbol at this index.
    Reference(usize),
    Unknown,
}

impl Ty {
    pub(crate) fn of(value: &Value) -> Ty {
        match value {
            Value::None => Ty::None,
            Value::Number(_) => Ty::Number,
            Value::Str(_) => Ty::Str,
            Value::Function(_) => Ty::Function,
            Value::Callback(_) => Ty::Callback,
            Value::Object(_) => Ty::Object,
        }
    }

    /// Operands of arithmetic, comparison and conditions.
    pub(crate) fn is_numeric(self) -> bool {
        matches!(self, Ty::Number | Ty::Unknown)
    }
}

/// How far a name resolution had to climb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Reach {
    Local,
    /// Declared in an enclosing block of the same function.
    Block,
    /// Declared outside the function being compiled.
    Function,
}

/// Compile-time mirror of one runtime stack slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Symbol<'a> {
    Local { name: &'a str, ty: Ty },
    Temp { ty: Ty },
    Scope,
    Function,
}

/// Symbol table laid out exactly like the value stack will be at run time,
/// so a symbol's index is the slot it will occupy. Bounded by the module's
/// slot capacity.
pub(crate) struct Symbols<'a> {
    entries: Vec<Symbol<'a>>,
    capacity: usize,
    peak: usize,
}

impl<'a> Symbols<'a> {
    pub(crate) fn new(capacity: usize) -> Self {
        Symbols { entries: Vec::with_capacity(capacity), capacity, peak: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak
    }

    pub(crate) fn push(&mut self, symbol: Symbol<'a>) -> Result<(), ErrorKind> {
        if self.entries.len() >= self.capacity {
            return Err(ErrorKind::ValueOverflow);
        }
        self.entries.push(symbol);
        self.peak = self.peak.max(self.entries.len());
        Ok(())
    }

    pub(crate) fn temp(&mut self, ty: Ty) -> Result<(), ErrorKind> {
        self.push(Symbol::Temp { ty })
    }

    /// Pops the top entry and returns the type of the value it held.
    pub(crate) fn pop(&mut self) -> Result<Ty, ErrorKind> {
        match self.entries.pop() {
            Some(Symbol::Temp { ty } | Symbol::Local { ty, .. }) => Ok(ty),
            Some(Symbol::Scope | Symbol::Function) => Ok(Ty::Unknown),
            None => Err(ErrorKind::ValueUnderflow),
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Type of the value stored at `index`.
    pub(crate) fn stored(&self, index: usize) -> Ty {
        match self.entries.get(index) {
            Some(Symbol::Local { ty, .. } | Symbol::Temp { ty }) => *ty,
            _ => Ty::Unknown,
        }
    }

    /// Type pushed by reading the variable at `index`: object kinds are
    /// read by reference.
    pub(crate) fn read(&self, index: usize) -> Ty {
        match self.stored(index) {
            Ty::Str | Ty::Object => Ty::Reference(index),
            ty => ty,
        }
    }

    pub(crate) fn set_ty(&mut self, index: usize, new: Ty) {
        if let Some(Symbol::Local { ty, .. }) = self.entries.get_mut(index) {
            *ty = new;
        }
    }

    /// Finds the newest local called `name`, noting the widest boundary
    /// crossed on the way.
    pub(crate) fn resolve(&self, name: &str) -> Option<(usize, Reach)> {
        let mut reach = Reach::Local;
        for (index, symbol) in self.entries.iter().enumerate().rev() {
            match symbol {
                Symbol::Scope => reach = reach.max(Reach::Block),
                Symbol::Function => reach = Reach::Function,
                Symbol::Local { name: n, .. } if *n == name => return Some((index, reach)),
                _ => {}
            }
        }
        None
    }

    /// Whether `name` is already declared in the innermost block.
    pub(crate) fn declared_in_block(&self, name: &str) -> bool {
        for symbol in self.entries.iter().rev() {
            match symbol {
                Symbol::Scope | Symbol::Function => return false,
                Symbol::Local { name: n, .. } if *n == name => return true,
                _ => {}
            }
        }
        false
    }
}
