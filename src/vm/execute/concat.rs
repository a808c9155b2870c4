//! String concatenation (spec §4.7 "Concatenation").

use crate::value::LuaValue;
use crate::vm::LuaVM;

/// Render a number/string operand for `..`, or name the type that
/// can't participate so the caller can report or fall back to
/// `__concat`.
fn piece(vm: &LuaVM, v: &LuaValue) -> Result<String, &'static str> {
    match v {
        LuaValue::Number(_) => Ok(vm.tostring(v)),
        LuaValue::String(id) => Ok(vm.global.heap.strings.get(id.0).data.as_str().to_string()),
        other => Err(other.type_name()),
    }
}

/// Concatenate a contiguous register range right-to-left into one
/// interned string. On failure, returns the index into `values` of
/// the first non-convertible operand and its type name, so the caller
/// can attempt `__concat` on that pair.
pub fn concat_range(vm: &mut LuaVM, values: &[LuaValue]) -> Result<LuaValue, (usize, &'static str)> {
    let mut out = String::new();
    for (i, v) in values.iter().enumerate() {
        match piece(vm, v) {
            Ok(s) => out.push_str(&s),
            Err(name) => return Err((i, name)),
        }
    }
    Ok(LuaValue::String(vm.intern(&out)))
}
