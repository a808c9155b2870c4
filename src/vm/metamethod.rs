//! Metatable lookup for the handful of tags the executor consults
//! directly: arithmetic, `__lt`/`__le`, `__concat` (spec §4.7).

use crate::gc::Heap;
use crate::value::LuaValue;
use crate::vm::execute::call_value;
use crate::vm::{LuaVM, RuntimeError};

/// Only tables carry a metatable in this implementation (spec §3
/// "Table"); every other type falls straight through to the raise.
fn metatable_of(heap: &Heap, v: &LuaValue) -> Option<crate::gc::TableId> {
    match v {
        LuaValue::Table(id) => heap.tables.get(id.0).data.metatable,
        _ => None,
    }
}

fn lookup(heap: &Heap, v: &LuaValue, name: &str) -> Option<LuaValue> {
    let mt = metatable_of(heap, v)?;
    let key = find_interned(heap, name)?;
    let entry = heap.tables.get(mt.0).data.get(&LuaValue::String(key));
    if entry.is_nil() {
        None
    } else {
        Some(entry)
    }
}

/// Metamethod names are looked up without interning a fresh copy on
/// every miss; if the name was never interned, no table can hold it.
fn find_interned(heap: &Heap, name: &str) -> Option<crate::gc::StringId> {
    let hash = crate::gc::string_hash(name.as_bytes());
    heap.interner
        .find(hash, |id| heap.strings.get(id.0).data.as_str() == name)
}

/// Try `lhs`'s metatable first, then `rhs`'s (spec: "look up `__add`
/// etc. on the left then right operand's metatable").
pub fn binary(
    vm: &mut LuaVM,
    name: &str,
    lhs: LuaValue,
    rhs: LuaValue,
) -> Result<Option<LuaValue>, RuntimeError> {
    let handler = lookup(&vm.global.heap, &lhs, name).or_else(|| lookup(&vm.global.heap, &rhs, name));
    match handler {
        Some(f) => {
            let mut results = call_value(vm, f, vec![lhs, rhs], Some(1))?;
            Ok(Some(results.pop().unwrap_or(LuaValue::Nil)))
        }
        None => Ok(None),
    }
}
