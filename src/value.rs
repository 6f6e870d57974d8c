use crate::error::ErrorKind;

/// Native function callable from script code.
///
/// Arguments are retired once the callback returns. Handing one of them
/// back as the result is allowed: an owned argument is moved into the
/// result instead of being freed.
pub type HostFn = fn(Args<'_>) -> Result<Value, ErrorKind>;

#[derive(Clone, Copy)]
pub struct Callback(pub HostFn);

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.0, other.0)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({:p})", self.0 as *const ())
    }
}

/// String payload. Literals alias their bytes inside the module's code
/// buffer, so they are only meaningful alongside the module that produced
/// them. Host strings are owned by the host, which keeps their bytes and
/// reclaims them when the free capability hands the handle back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Str {
    Literal { offset: usize, len: usize },
    Host { handle: u64 },
}

/// Opaque host-managed object. The tag lets a host tell its kinds apart;
/// the handle is whatever the host uses to find the object again.
///
/// Every tag is available to the host: strings and the other built-in kinds
/// are separate `Value` variants, so no range of tags is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object {
    pub tag: u32,
    pub handle: u64,
}

/// A script function: where its body starts and how many parameters it
/// declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub(crate) entry: usize,
    pub(crate) arity: usize,
}

impl Function {
    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Number(f64),
    Str(Str),
    Function(Function),
    Callback(Callback),
    Object(Object),
}

impl Value {
    pub fn callback(f: HostFn) -> Self {
        Value::Callback(Callback(f))
    }

    pub fn host_str(handle: u64) -> Self {
        Value::Str(Str::Host { handle })
    }

    pub fn object(tag: u32, handle: u64) -> Self {
        Value::Object(Object { tag, handle })
    }

    /// Object kinds are handed to the free callback when they are retired.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Object(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            Value::Callback(_) => "callback",
            Value::Object(_) => "object",
        }
    }
}

pub(crate) fn str_bytes(code: &[u8], s: Str) -> Option<&[u8]> {
    match s {
        Str::Literal { offset, len } => code.get(offset..offset.checked_add(len)?),
        Str::Host { .. } => None,
    }
}

// ── Slots ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SlotKind {
    Value(Value),
    /// Block or call boundary; RETURN resumes at `target`.
    Scope { target: usize },
    /// Transient alias to another slot, pushed by GET for object values.
    Reference(usize),
}

/// One cell of the value buffer.
///
/// Hosts allocate these (`[Slot::EMPTY; N]`) but only ever read plain
/// values out of them: scope sentinels and references are internal to the VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot(pub(crate) SlotKind);

impl Slot {
    pub const EMPTY: Slot = Slot(SlotKind::Value(Value::None));

    pub(crate) fn scope(target: usize) -> Self {
        Slot(SlotKind::Scope { target })
    }

    pub(crate) fn reference(index: usize) -> Self {
        Slot(SlotKind::Reference(index))
    }

    pub fn value(&self) -> Option<Value> {
        match self.0 {
            SlotKind::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.0, SlotKind::Scope { .. })
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::EMPTY
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot(SlotKind::Value(v))
    }
}

/// Reads a slot, following a reference to the slot it aliases.
pub(crate) fn load(slots: &[Slot], index: usize) -> Option<Value> {
    match slots.get(index)?.0 {
        SlotKind::Value(v) => Some(v),
        SlotKind::Reference(target) => slots.get(target)?.value(),
        SlotKind::Scope { .. } => None,
    }
}

// ── Host call arguments ─────────────────────────────────────────────

/// Arguments of a host callback: a window onto the value buffer.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    slots: &'a [Slot],
    start: usize,
    len: usize,
    code: &'a [u8],
}

impl<'a> Args<'a> {
    pub(crate) fn new(slots: &'a [Slot], start: usize, len: usize, code: &'a [u8]) -> Self {
        Args { slots, start, len, code }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `i`th argument; missing arguments read as `None`.
    pub fn get(&self, i: usize) -> Value {
        if i >= self.len {
            return Value::None;
        }
        load(self.slots, self.start + i).unwrap_or(Value::None)
    }

    pub fn number(&self, i: usize) -> Option<f64> {
        self.get(i).as_number()
    }

    /// The string payload of an argument, literal or host-owned.
    pub fn str(&self, i: usize) -> Option<Str> {
        match self.get(i) {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes of a string literal argument. Host strings are resolved by the
    /// host through `str`.
    pub fn bytes(&self, i: usize) -> Option<&'a [u8]> {
        match self.get(i) {
            Value::Str(s) => str_bytes(self.code, s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len).map(|i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing(_: Args<'_>) -> Result<Value, ErrorKind> {
        Ok(Value::None)
    }

    fn one(_: Args<'_>) -> Result<Value, ErrorKind> {
        Ok(Value::Number(1.0))
    }

    #[test]
    fn object_kinds() {
        assert!(!Value::None.is_object());
        assert!(!Value::Number(3.14).is_object());
        assert!(Value::host_str(3).is_object());
        assert!(Value::object(7, 42).is_object());
        assert!(!Value::callback(nothing).is_object());
    }

    #[test]
    fn callbacks_compare_by_address() {
        assert_eq!(Value::callback(nothing), Value::callback(nothing));
        assert_ne!(Value::callback(nothing), Value::callback(one));
    }

    #[test]
    fn slots_hide_internal_kinds() {
        assert_eq!(Slot::EMPTY.value(), Some(Value::None));
        assert_eq!(Slot::scope(10).value(), None);
        assert!(Slot::scope(10).is_sentinel());
        assert_eq!(Slot::reference(0).value(), None);
        assert_eq!(Slot::from(Value::Number(2.0)).value(), Some(Value::Number(2.0)));
    }

    #[test]
    fn args_follow_references() {
        let code = b"xhiy";
        let slots = [
            Slot::from(Value::Str(Str::Literal { offset: 1, len: 2 })),
            Slot::from(Value::Number(5.0)),
            Slot::reference(0),
        ];
        let args = Args::new(&slots, 1, 2, code);
        assert_eq!(args.len(), 2);
        assert_eq!(args.number(0), Some(5.0));
        assert_eq!(args.bytes(1), Some(&b"hi"[..]));
        assert_eq!(args.get(2), Value::None);
        assert_eq!(args.iter().count(), 2);
    }

    #[test]
    fn literal_out_of_range_is_none() {
        assert_eq!(str_bytes(b"ab", Str::Literal { offset: 1, len: 5 }), None);
        assert_eq!(str_bytes(b"ok", Str::Host { handle: 0 }), None);
    }

    #[test]
    fn object_tags_are_unrestricted() {
        for tag in [0, 1, u32::MAX] {
            let value = Value::object(tag, 5);
            assert!(value.is_object());
            assert_eq!(value, Value::Object(Object { tag, handle: 5 }));
        }
    }

    #[test]
    fn args_expose_host_strings() {
        let slots = [
            Slot::from(Value::host_str(42)),
            Slot::from(Value::Str(Str::Literal { offset: 0, len: 2 })),
            Slot::reference(0),
        ];
        let args = Args::new(&slots, 0, 3, b"hi");
        assert_eq!(args.str(0), Some(Str::Host { handle: 42 }));
        assert_eq!(args.bytes(0), None);
        assert_eq!(args.str(1), Some(Str::Literal { offset: 0, len: 2 }));
        assert_eq!(args.str(2), Some(Str::Host { handle: 42 }));
        assert_eq!(args.str(3), None);
    }
}
