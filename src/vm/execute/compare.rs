//! Direct (non-metamethod) comparisons (spec §4.7 "Comparisons").

use crate::gc::Heap;
use crate::value::LuaValue;

/// `EQ` works across any pair of types (spec). Strings compare by id
/// since every string is interned; numbers by value.
pub fn values_equal(heap: &Heap, a: &LuaValue, b: &LuaValue) -> bool {
    let _ = heap;
    a.raw_eq(b)
}

/// Whether `a`/`b` are a pair `LT`/`LE` can evaluate directly: both
/// numbers, or both strings.
pub fn comparable(a: &LuaValue, b: &LuaValue) -> Option<()> {
    match (a, b) {
        (LuaValue::Number(_), LuaValue::Number(_)) => Some(()),
        (LuaValue::String(_), LuaValue::String(_)) => Some(()),
        _ => None,
    }
}

pub fn less_than(heap: &Heap, a: &LuaValue, b: &LuaValue) -> Option<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Some(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            let sx = heap.strings.get(x.0).data.as_bytes();
            let sy = heap.strings.get(y.0).data.as_bytes();
            Some(sx < sy)
        }
        _ => None,
    }
}

pub fn less_equal(heap: &Heap, a: &LuaValue, b: &LuaValue) -> Option<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Some(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            let sx = heap.strings.get(x.0).data.as_bytes();
            let sy = heap.strings.get(y.0).data.as_bytes();
            Some(sx <= sy)
        }
        _ => None,
    }
}
