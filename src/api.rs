//! Stack-based embedding surface (spec §4.8). A thin index-addressed
//! view over [`LuaVM`]'s own value stack, plus library registration
//! mirroring the teacher's module-table pattern (`lib_registry.rs`)
//! adapted to this crate's [`CFunction`] convention.

use crate::compiler;
use crate::gc::TableId;
use crate::value::LuaValue;
use crate::vm::LuaVM;
use crate::vm::{call_value, CFunction, Closure, RuntimeError};

/// `lua_gettop`/`lua_settop`-style sentinel: "every value, however
/// many there turn out to be". Not a valid slot count, matching §6's
/// "maximum representable operand" convention for MULTRET.
pub const MULTRET: i32 = -1;

/// A native function together with the name it's registered under.
pub struct LibraryEntry {
    pub name: &'static str,
    pub func: CFunction,
}

/// A named group of native functions, installed either as fields of a
/// module table (`string.format`, ...) or, for `"_G"`, directly as
/// globals (`print`, ...).
pub struct Library {
    pub name: &'static str,
    pub entries: Vec<LibraryEntry>,
}

impl Library {
    pub fn new(name: &'static str) -> Self {
        Library { name, entries: Vec::new() }
    }

    pub fn with_fn(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push(LibraryEntry { name, func });
        self
    }
}

/// Index-addressed view over one [`LuaVM`]'s stack. Positive indices
/// count from 1 at the current frame's base; negative indices count
/// back from the top (spec §4.8).
pub struct Api<'a> {
    vm: &'a mut LuaVM,
}

impl<'a> Api<'a> {
    pub fn open(vm: &'a mut LuaVM) -> Self {
        Api { vm }
    }

    pub fn vm(&mut self) -> &mut LuaVM {
        self.vm
    }

    fn base(&self) -> usize {
        self.vm.main.frames.last().map(|f| f.base).unwrap_or(0)
    }

    fn abs_index(&self, idx: i32) -> usize {
        if idx > 0 {
            self.base() + (idx as usize - 1)
        } else {
            (self.vm.main.stack.len() as i64 + idx as i64) as usize
        }
    }

    fn at(&self, idx: i32) -> LuaValue {
        let i = self.abs_index(idx);
        self.vm.main.stack.get(i).copied().unwrap_or(LuaValue::Nil)
    }

    // ---- stack shape ---------------------------------------------------

    /// Number of values above the current frame's base.
    pub fn top(&self) -> i32 {
        (self.vm.main.stack.len() - self.base()) as i32
    }

    /// Grows with nils or truncates so that `top()` becomes `idx`.
    pub fn set_top(&mut self, idx: i32) {
        let base = self.base();
        let want = base + idx.max(0) as usize;
        self.vm.main.ensure_stack(want);
        self.vm.main.stack.truncate(want);
    }

    pub fn pop(&mut self, n: usize) {
        let new_len = self.vm.main.stack.len().saturating_sub(n);
        self.vm.main.stack.truncate(new_len);
    }

    // ---- pushing --------------------------------------------------------

    pub fn push_nil(&mut self) {
        self.vm.main.stack.push(LuaValue::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.vm.main.stack.push(LuaValue::Boolean(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.vm.main.stack.push(LuaValue::Number(n));
    }

    /// Lua 5.1 has one number type; "integer" pushes are a convenience
    /// for hosts that already have an `i64` in hand.
    pub fn push_integer(&mut self, n: i64) {
        self.push_number(n as f64);
    }

    pub fn push_string(&mut self, s: &str) {
        let id = self.vm.intern(s);
        self.vm.main.stack.push(LuaValue::String(id));
    }

    pub fn push_value(&mut self, idx: i32) {
        let v = self.at(idx);
        self.vm.main.stack.push(v);
    }

    // ---- stack surgery ----------------------------------------------------

    pub fn remove(&mut self, idx: i32) {
        let i = self.abs_index(idx);
        self.vm.main.stack.remove(i);
    }

    /// Moves the top value into slot `idx`, shifting the rest up.
    pub fn insert(&mut self, idx: i32) {
        let v = self.vm.main.stack.pop().expect("insert on empty stack");
        let i = self.abs_index(idx);
        self.vm.main.stack.insert(i, v);
    }

    /// Pops the top value into slot `idx`, overwriting what was there.
    pub fn replace(&mut self, idx: i32) {
        let v = self.vm.main.stack.pop().expect("replace on empty stack");
        let i = self.abs_index(idx);
        self.vm.main.stack[i] = v;
    }

    // ---- type queries / conversions --------------------------------------

    pub fn type_name(&self, idx: i32) -> &'static str {
        self.at(idx).type_name()
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.at(idx).is_nil()
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.at(idx).is_table()
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.at(idx).is_function()
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.at(idx).is_truthy()
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.at(idx).as_number()
    }

    pub fn to_string(&self, idx: i32) -> String {
        let v = self.at(idx);
        self.vm.tostring(&v)
    }

    // ---- tables -----------------------------------------------------------

    fn table_id(&self, idx: i32) -> TableId {
        self.at(idx).as_table_id().expect("not a table")
    }

    pub fn new_table(&mut self) {
        let id = self.vm.heap_mut().new_table();
        self.vm.main.stack.push(LuaValue::Table(id));
        self.vm.collect_if_due();
    }

    /// Pops a key, pushes `t[key]` (raw, no metamethod dispatch — the
    /// executor's own `GET_TABLE` handler owns `__index` fallback).
    pub fn raw_get(&mut self, idx: i32) {
        let table = self.table_id(idx);
        let key = self.vm.main.stack.pop().expect("raw_get on empty stack");
        let v = self.vm.heap().tables.get(table.0).data.get(&key);
        self.vm.main.stack.push(v);
    }

    /// Pops value then key, sets `t[key] = value` (raw).
    pub fn raw_set(&mut self, idx: i32) {
        let table = self.table_id(idx);
        let value = self.vm.main.stack.pop().expect("raw_set value");
        let key = self.vm.main.stack.pop().expect("raw_set key");
        self.vm.heap_mut().tables.get_mut(table.0).data.set(key, value);
    }

    pub fn get_field(&mut self, idx: i32, name: &str) {
        let table = self.table_id(idx);
        let key = LuaValue::String(self.vm.intern(name));
        let v = self.vm.heap().tables.get(table.0).data.get(&key);
        self.vm.main.stack.push(v);
    }

    pub fn set_field(&mut self, idx: i32, name: &str) {
        let table = self.table_id(idx);
        let value = self.vm.main.stack.pop().expect("set_field value");
        let key = LuaValue::String(self.vm.intern(name));
        self.vm.heap_mut().tables.get_mut(table.0).data.set(key, value);
    }

    pub fn get_index(&mut self, idx: i32, n: i64) {
        let table = self.table_id(idx);
        let v = self.vm.heap().tables.get(table.0).data.get(&LuaValue::Number(n as f64));
        self.vm.main.stack.push(v);
    }

    pub fn set_index(&mut self, idx: i32, n: i64) {
        let table = self.table_id(idx);
        let value = self.vm.main.stack.pop().expect("set_index value");
        self.vm
            .heap_mut()
            .tables
            .get_mut(table.0)
            .data
            .set(LuaValue::Number(n as f64), value);
    }

    /// Table length (`#t`, the border rule of spec §4.3).
    pub fn len(&self, idx: i32) -> usize {
        self.vm.heap().tables.get(self.table_id(idx).0).data.len()
    }

    /// `next(t, key)` iteration primitive: pops `key`, and on success
    /// pushes the following `key, value` pair and returns `true`; on
    /// exhaustion pushes nothing and returns `false`.
    pub fn next(&mut self, idx: i32) -> Result<bool, RuntimeError> {
        let table = self.table_id(idx);
        let key = self.vm.main.stack.pop().expect("next on empty stack");
        match self.vm.heap().tables.get(table.0).data.next(&key) {
            Ok(Some((k, v))) => {
                self.vm.main.stack.push(k);
                self.vm.main.stack.push(v);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(()) => Err(self.vm.error_at(0, "invalid key to 'next'".to_string())),
        }
    }

    // ---- calls --------------------------------------------------------

    /// Unprotected call: pops the function and `nargs` arguments (in
    /// push order), pushes up to `nresults` return values (`MULTRET`
    /// pushes every value the callee produced). Propagates errors to
    /// the caller rather than catching them — see [`Self::pcall`].
    pub fn call(&mut self, nargs: usize, nresults: i32) -> Result<(), RuntimeError> {
        let top = self.vm.main.stack.len();
        let args = self.vm.main.stack.split_off(top - nargs);
        let func = self.vm.main.stack.pop().expect("call: missing function");
        let wanted = if nresults == MULTRET { None } else { Some(nresults as usize) };
        let mut results = call_value(self.vm, func, args, wanted)?;
        if let Some(want) = wanted {
            results.resize(want, LuaValue::Nil);
        }
        self.vm.main.stack.extend(results);
        Ok(())
    }

    /// Protected call: like [`Self::call`], but catches a `RuntimeError`
    /// and reports it instead of propagating — the stack is rolled back
    /// to its pre-call depth and the error message is pushed in place of
    /// results (spec §4.7 "Protected execution"). Returns `None` on
    /// success; `Some(error)` on failure, with the message already on
    /// the stack as the sole "result" (matching `lua_pcall`'s contract).
    pub fn pcall(&mut self, nargs: usize, nresults: i32) -> Option<RuntimeError> {
        let depth = self.vm.main.stack.len() - nargs - 1;
        match self.call(nargs, nresults) {
            Ok(()) => None,
            Err(e) => {
                self.vm.main.stack.truncate(depth);
                self.push_string(&e.message);
                Some(e)
            }
        }
    }

    /// Protected call of a bare native function, bypassing the normal
    /// Lua call-frame setup (spec §4.8 "cpcall").
    pub fn cpcall(&mut self, func: CFunction, args: &[LuaValue]) -> Result<Vec<LuaValue>, RuntimeError> {
        func(self.vm, args)
    }

    pub fn raise_error(&self, message: String) -> RuntimeError {
        let line = self.current_location().map(|(_, l)| l).unwrap_or(0);
        self.vm.error_at(line, message)
    }

    // ---- loading & registration -----------------------------------------

    /// Parses `source` and pushes the resulting top-level closure,
    /// ready to be called (spec §4.8 "load (streaming parse)").
    pub fn load(&mut self, source: &str, chunk_name: &str) -> Result<(), RuntimeError> {
        let prototype = compiler::compile(self.vm.heap_mut(), source, chunk_name)?;
        let function = self.vm.new_lua_closure(prototype, Vec::new());
        self.vm.main.stack.push(LuaValue::Function(function));
        Ok(())
    }

    /// Parses source delivered through a reader callback and pushes
    /// the resulting top-level closure, matching §6's loader protocol:
    /// `reader` is called repeatedly for the next chunk of source
    /// bytes, with an empty chunk signalling end of input. The lexer
    /// itself (`lexer::Lexer`) lexes from one assembled `&str` rather
    /// than pulling lookahead through the callback a byte at a time,
    /// so this drains the reader into one buffer up front; the
    /// `reader`-per-chunk shape of the protocol is still honored, only
    /// the point at which the bytes are copied moves earlier.
    pub fn load_with_reader(
        &mut self,
        mut reader: impl FnMut() -> Option<Vec<u8>>,
        chunk_name: &str,
    ) -> Result<(), RuntimeError> {
        let mut buf = Vec::new();
        while let Some(chunk) = reader() {
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let source = String::from_utf8(buf).map_err(|_| {
            self.vm.error_at(0, "source is not valid UTF-8".to_string())
        })?;
        self.load(&source, chunk_name)
    }

    /// Installs a [`Library`] as a global table (or, for `"_G"`,
    /// directly as top-level globals).
    pub fn register_library(&mut self, lib: &Library) {
        if lib.name == "_G" {
            for entry in &lib.entries {
                self.vm.register_native(entry.name, entry.func);
            }
            return;
        }
        self.new_table();
        let table_val = self.vm.main.stack.last().copied().unwrap();
        let table = table_val.as_table_id().unwrap();
        for entry in &lib.entries {
            let closure = self.vm.heap_mut().closures.insert(crate::gc::GcFunction {
                header: crate::gc::GcHeader::new(),
                data: Closure::Native { func: entry.func, upvalues: Vec::new(), name: entry.name },
            });
            let key = LuaValue::String(self.vm.intern(entry.name));
            self.vm
                .heap_mut()
                .tables
                .get_mut(table.0)
                .data
                .set(key, LuaValue::Function(crate::gc::FunctionId(closure)));
        }
        self.vm.main.stack.pop();
        self.vm.set_global(lib.name, LuaValue::Table(table));
    }

    // ---- debug ----------------------------------------------------------

    /// Source name and currently-executing line of the innermost frame,
    /// the minimal slice of `get_info`/`get_stack` (spec §4.8) a host
    /// needs to format a traceback entry.
    pub fn current_location(&self) -> Option<(String, u32)> {
        let frame = self.vm.main.frames.last()?;
        let proto_id = match &self.vm.heap().closures.get(frame.function.0).data {
            Closure::Lua { prototype, .. } => *prototype,
            Closure::Native { .. } => return None,
        };
        let proto = &self.vm.heap().prototypes.get(proto_id.0).data;
        let line = proto.line_at(frame.saved_ip.saturating_sub(1));
        Some((proto.source_name.clone(), line))
    }
}
