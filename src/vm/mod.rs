//! Embedding handle, call frames and the bytecode executor (spec §3, §4.7).

mod attribution;
mod closure;
mod error;
pub mod execute;
mod metamethod;
mod state;
mod upvalues;

pub use attribution::describe_register;

pub use closure::{CFunction, Closure, Upvalue};
pub use error::{LuaError, RuntimeError};
pub use execute::{call_function, call_value};
pub use state::{CallFrame, Global, LuaState, LuaVM, MAX_CALL_DEPTH};

pub type LuaResult<T> = Result<T, RuntimeError>;
