//! Symbolic error attribution (spec §4.7 "Error attribution"): name
//! the register a type error happened on by scanning backward for its
//! most recent writer.

use crate::chunk::opcode::*;
use crate::chunk::{OpCode, Prototype};
use crate::gc::Heap;
use crate::value::LuaValue;

/// Scan `[0, pc)` backward for the most recent instruction that wrote
/// `reg`, and name it the way the spec's three known shapes do. `None`
/// if no writer is found (a block argument or an untracked case).
pub fn describe_register(heap: &Heap, proto: &Prototype, pc: usize, reg: u32) -> Option<String> {
    for i in (0..pc).rev() {
        let instr = proto.instructions[i];
        let op = get_opcode(instr);
        let a = get_a(instr);
        let writes_reg = match op {
            OpCode::LoadNil => a <= reg && reg <= get_b(instr),
            _ => a == reg,
        };
        if !writes_reg {
            continue;
        }
        if let Some(local) = proto
            .locals
            .iter()
            .find(|l| l.slot as u32 == reg && i >= l.start_pc && i < l.end_pc)
        {
            return Some(format!("local '{}'", local.name));
        }
        return match op {
            OpCode::GetGlobal => {
                let name = proto.constants[get_bx(instr) as usize];
                Some(format!("global '{}'", display_constant(heap, name)))
            }
            OpCode::GetTable => {
                let c = get_c(instr);
                Some(format!("field '{}'", rk_name(heap, proto, c)))
            }
            OpCode::SelfOp => {
                let c = get_c(instr);
                Some(format!("method '{}'", rk_name(heap, proto, c)))
            }
            _ => None,
        };
    }
    None
}

fn rk_name(heap: &Heap, proto: &Prototype, x: u32) -> String {
    if is_rk(x) {
        display_constant(heap, proto.constants[rk_as_constant(x) as usize])
    } else {
        "?".to_string()
    }
}

fn display_constant(heap: &Heap, v: LuaValue) -> String {
    match v {
        LuaValue::String(id) => heap.strings.get(id.0).data.as_str().to_string(),
        other => other.literal_to_string().unwrap_or_else(|| "?".to_string()),
    }
}
