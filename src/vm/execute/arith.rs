//! Direct (non-metamethod) arithmetic (spec §4.7 "Arithmetic fallback").

use crate::chunk::OpCode;
use crate::gc::Heap;
use crate::value::{string_to_number, LuaValue};

/// Numeric coercion used by arithmetic: a number as-is, or a string
/// that parses as one (spec's "numeric strings").
pub fn coerce_number(heap: &Heap, v: &LuaValue) -> Option<f64> {
    match v {
        LuaValue::Number(n) => Some(*n),
        LuaValue::String(id) => {
            let s = heap.strings.get(id.0).data.as_str();
            string_to_number(s)
        }
        _ => None,
    }
}

/// Evaluate `op` directly when both operands coerce to numbers.
/// Returns `None` when either operand does not, leaving metamethod
/// fallback to the caller.
pub fn apply(heap: &Heap, op: OpCode, lhs: &LuaValue, rhs: &LuaValue) -> Option<LuaValue> {
    let a = coerce_number(heap, lhs)?;
    let b = coerce_number(heap, rhs)?;
    let result = match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Mod => a - (a / b).floor() * b,
        OpCode::Pow => a.powf(b),
        _ => unreachable!("apply called with non-arithmetic opcode"),
    };
    Some(LuaValue::Number(result))
}

/// `__add`/`__sub`/... tag name for a binary arithmetic opcode.
pub fn metamethod_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "__add",
        OpCode::Sub => "__sub",
        OpCode::Mul => "__mul",
        OpCode::Div => "__div",
        OpCode::Mod => "__mod",
        OpCode::Pow => "__pow",
        _ => unreachable!("metamethod_name called with non-arithmetic opcode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;

    #[test]
    fn add_coerces_numeric_strings() {
        let mut heap = Heap::new(GcConfig::default());
        let s = LuaValue::String(heap.intern_str("10"));
        let n = LuaValue::Number(5.0);
        let v = apply(&heap, OpCode::Add, &s, &n).unwrap();
        assert_eq!(v.as_number(), Some(15.0));
    }

    #[test]
    fn mod_matches_lua_floor_semantics() {
        let heap = Heap::new(GcConfig::default());
        let v = apply(&heap, OpCode::Mod, &LuaValue::Number(-5.0), &LuaValue::Number(3.0)).unwrap();
        assert_eq!(v.as_number(), Some(1.0));
    }
}
