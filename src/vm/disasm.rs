use std::fmt::Write;

use super::{NUMBER, OP_CALL, OP_CONST, OP_FUNC, OP_GET, OP_GET_UP, OP_JUMP, OP_JUMPIF, OP_SCOPE, OP_SET, OP_SET_UP, OP_STR, SIZE};
use super::{op_name, read_number, read_size};

/// Renders bytecode as one instruction per line, prefixed by its offset.
/// Undefined opcodes are listed as raw bytes; a truncated operand ends the
/// listing.
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();
    let mut pc = 0;
    while let Some(&op) = code.get(pc) {
        let _ = write!(out, "{pc:04} ");
        let Some(name) = op_name(op) else {
            let _ = writeln!(out, "?? {op:#04x}");
            pc += 1;
            continue;
        };
        out.push_str(name);
        pc += 1;

        match operands(code, op, pc) {
            Some((text, len)) => {
                if !text.is_empty() {
                    out.push(' ');
                    out.push_str(&text);
                }
                out.push('\n');
                pc += len;
            }
            None => {
                out.push_str(" <truncated>\n");
                break;
            }
        }
    }
    out
}

fn operands(code: &[u8], op: u8, at: usize) -> Option<(String, usize)> {
    Some(match op {
        OP_JUMP | OP_JUMPIF | OP_SCOPE => (format!("-> {:04}", read_size(code, at)?), SIZE),
        OP_CALL | OP_SET | OP_GET | OP_SET_UP | OP_GET_UP => (read_size(code, at)?.to_string(), SIZE),
        OP_CONST => (read_number(code, at)?.to_string(), NUMBER),
        OP_STR => {
            let len = read_size(code, at)?;
            let start = at + SIZE;
            let bytes = code.get(start..start.checked_add(len)?)?;
            (format!("{:?}", String::from_utf8_lossy(bytes)), SIZE + len)
        }
        OP_FUNC => {
            let skip = read_size(code, at)?;
            let arity = read_size(code, at + SIZE)?;
            (format!("-> {skip:04} arity {arity}"), 2 * SIZE)
        }
        _ => (String::new(), 0),
    })
}
