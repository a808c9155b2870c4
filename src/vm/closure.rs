//! Closures and upvalues (spec §3 "Closure", "Upvalue").

use crate::gc::{PrototypeId, UpvalueId};
use crate::value::LuaValue;
use crate::vm::{LuaVM, RuntimeError};

/// Host function pointer registered through the embedding API. Runs to
/// completion synchronously (spec §4.7 "for C callees, invoke the
/// callback synchronously") and returns its result values directly
/// rather than through the register window a Lua call frame uses.
pub type CFunction = fn(&mut LuaVM, args: &[LuaValue]) -> Result<Vec<LuaValue>, RuntimeError>;

/// Two shapes sharing one concept: a callable value. A Lua closure
/// pairs a prototype with resolved upvalue ids; a native closure pairs
/// a callback with values it captured inline when it was created.
pub enum Closure {
    Lua {
        prototype: PrototypeId,
        upvalues: Vec<UpvalueId>,
    },
    Native {
        func: CFunction,
        upvalues: Vec<LuaValue>,
        name: &'static str,
    },
}

/// A reference to a variable from an enclosing scope. Open while the
/// frame that owns the slot is alive; closed (value copied out)
/// thereafter.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { stack_index: usize },
    Closed(LuaValue),
}
