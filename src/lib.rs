//! A single-pass compiler and register-based virtual machine for Lua 5.1.

#[cfg(test)]
mod test;

pub mod api;
pub mod chunk;
pub mod compiler;
pub mod gc;
pub mod lexer;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::{OpCode, Prototype};
pub use gc::Heap;
pub use value::LuaValue;
pub use vm::{call_function, LuaVM, RuntimeError};

/// Compiles and runs `source` as a fresh chunk in a new VM, returning
/// every value the chunk's implicit top-level return produced.
pub fn execute(source: &str) -> Result<Vec<LuaValue>, RuntimeError> {
    let mut vm = LuaVM::new();
    let results = execute_with_vm(&mut vm, source)?;
    Ok(results)
}

/// Compiles and runs `source` against an existing VM, so natives
/// registered via [`LuaVM::register_native`] are visible to it.
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> Result<Vec<LuaValue>, RuntimeError> {
    let prototype = compiler::compile(vm.heap_mut(), source, "?")?;
    let closure = vm.new_lua_closure(prototype, Vec::new());
    call_function(vm, closure, Vec::new(), None)
}
