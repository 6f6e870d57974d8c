/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,
    pub long: &'static str,
}

/// All stable error codes. `B` codes are buffer limits, `C` codes are
/// compile errors and `R` codes are runtime errors.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Buffers ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "QUILL-B001",
        short: "bytecode buffer overflow",
        long: r#"## QUILL-B001: bytecode buffer overflow

The compiled program does not fit in the code buffer supplied by the
host. Nothing is written past the end of the buffer; the compile is
abandoned and the buffer is left as it was before compiling.

From the command line, raise the limit with `--code-size`.
"#,
    },
    ErrorEntry {
        code: "QUILL-B002",
        short: "value buffer overflow",
        long: r#"## QUILL-B002: value buffer overflow

The value stack ran out of slots. At compile time this means the
program declares more live variables and temporaries than there are
slots; at run time it usually means unbounded recursion.

**Example:**

    @f = $(n) { return f(n + 1); };

From the command line, raise the limit with `--slots`.
"#,
    },
    ErrorEntry {
        code: "QUILL-B003",
        short: "value buffer underflow",
        long: r#"## QUILL-B003: value buffer underflow

An instruction needed more values than the stack held above the
globals. Compiled programs never do this; it points at bytecode that
was built by hand or corrupted.
"#,
    },
    // ── Compile ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "QUILL-C001",
        short: "unexpected token",
        long: r#"## QUILL-C001: unexpected token

The parser found a token that cannot appear at this point.

**Example:**

    { @a = 1 }

Every statement except `if` and `while` ends with `;`:

    { @a = 1; }
"#,
    },
    ErrorEntry {
        code: "QUILL-C002",
        short: "malformed token",
        long: r#"## QUILL-C002: malformed token

The lexer could not make sense of the input: a number with letters or
a second `.` glued on, a string with no closing quote, or a character
that is not part of the language.

**Example:**

    { @n = 12ab; }
"#,
    },
    ErrorEntry {
        code: "QUILL-C003",
        short: "expected expression",
        long: r#"## QUILL-C003: expected expression

A value was required but the construct produced none, for example an
empty condition or the right-hand side of an assignment.

**Example:**

    { if () { } }
"#,
    },
    ErrorEntry {
        code: "QUILL-C004",
        short: "undefined identifier",
        long: r#"## QUILL-C004: undefined identifier

A name was used that is not a global, an export or a variable declared
in an enclosing block.

**Example:**

    { x = 1; }

**Fix:**

    { @x = 1; }
"#,
    },
    ErrorEntry {
        code: "QUILL-C005",
        short: "identifier already defined",
        long: r#"## QUILL-C005: identifier already defined

A name was declared twice in the same block, or a function lists the
same parameter twice. Inner blocks may shadow outer names.

**Example:**

    { @a = 1; @a = 2; }
"#,
    },
    ErrorEntry {
        code: "QUILL-C006",
        short: "assignment to predefined variable",
        long: r#"## QUILL-C006: assignment to predefined variable

Globals supplied by the host are read-only.

**Example:**

    { print = 1; }
"#,
    },
    ErrorEntry {
        code: "QUILL-C007",
        short: "nested function literal",
        long: r#"## QUILL-C007: nested function literal

Function literals cannot appear inside another function body. There
are no closures; define the inner function at module or block level
and pass what it needs as arguments.
"#,
    },
    ErrorEntry {
        code: "QUILL-C008",
        short: "function assigned to an upvalue",
        long: r#"## QUILL-C008: function assigned to an upvalue

A function literal may only be stored in a variable of the block that
is being compiled, not in one declared further out.

**Example:**

    { @f; { f = $() { }; }; }
"#,
    },
    // ── Runtime ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "QUILL-R001",
        short: "undefined bytecode",
        long: r#"## QUILL-R001: undefined bytecode

The VM met a byte that is not an opcode, or an operand that runs past
the end of the code. This indicates corrupted bytecode.
"#,
    },
    ErrorEntry {
        code: "QUILL-R002",
        short: "function returned",
        long: r#"## QUILL-R002: function returned

Function values cannot leave the scope that created them by `return`.

**Example:**

    { return $() { }; }
"#,
    },
    ErrorEntry {
        code: "QUILL-R003",
        short: "call of a non-function",
        long: r#"## QUILL-R003: call of a non-function

Only script functions and host callbacks can be called.

**Example:**

    { @n = 1; n(); }
"#,
    },
    ErrorEntry {
        code: "QUILL-R004",
        short: "reference stored in a variable",
        long: r#"## QUILL-R004: reference stored in a variable

Strings and host objects are owned by exactly one variable. Reading
one produces a reference, and a reference cannot be stored in another
variable.

**Example:**

    { @s = "text"; @t = s; }
"#,
    },
    ErrorEntry {
        code: "QUILL-R005",
        short: "invalid operation",
        long: r#"## QUILL-R005: invalid operation

Arithmetic, comparison, negation and conditions only accept numbers.
`NONE` in a condition counts as false.

**Example:**

    { return "a" + 1; }
"#,
    },
    ErrorEntry {
        code: "QUILL-R006",
        short: "host callback failed",
        long: r#"## QUILL-R006: host callback failed

A callback supplied by the host reported an error. The message comes
from the host.
"#,
    },
];

/// Look up an error entry by code (e.g. `"QUILL-C004"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let e = lookup("QUILL-R004").expect("QUILL-R004 should be in registry");
        assert_eq!(e.short, "reference stored in a variable");
        assert!(e.long.contains("QUILL-R004"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("QUILL-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn every_long_text_names_its_code() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}:", entry.code)), "{} heading", entry.code);
        }
    }
}
