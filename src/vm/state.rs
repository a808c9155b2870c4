//! VM state (spec §3 "VM state", §5).

use crate::chunk::Prototype;
use crate::gc::{FunctionId, GcConfig, GcRoots, Heap, PrototypeId, StringId, TableId, UpvalueId};
use crate::value::LuaValue;
use crate::vm::closure::{CFunction, Closure, Upvalue};
use crate::vm::RuntimeError;

pub const MAX_CALL_DEPTH: usize = 200;

/// Per-invocation record (spec §3 "Call frame").
pub struct CallFrame {
    pub function: FunctionId,
    /// R(0) of this frame's window, an index into `LuaState::stack`.
    pub base: usize,
    pub saved_ip: usize,
    /// `None` means MULTRET: the caller wants every returned value.
    pub expected_results: Option<usize>,
    /// Extra arguments beyond the declared parameter list, for a
    /// vararg function's `...` expression.
    pub varargs: Vec<LuaValue>,
}

/// Shared state: the heap, the global table, and the handful of
/// pre-interned names every VM needs (spec §3 "One Global").
pub struct Global {
    pub heap: Heap,
    pub globals: TableId,
    pub source_root_name: String,
}

impl Global {
    pub fn new(config: GcConfig) -> Self {
        let mut heap = Heap::new(config);
        let globals = heap.new_table();
        Global {
            heap,
            globals,
            source_root_name: "?".to_string(),
        }
    }
}

/// Per-thread execution state (spec §3 "one per-thread execution
/// state"). Coroutines are out of scope (spec §1 Non-goals), so there
/// is exactly one of these per [`LuaVM`].
pub struct LuaState {
    pub stack: Vec<LuaValue>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues, sorted by descending stack address (invariant I3).
    pub open_upvalues: Vec<UpvalueId>,
}

impl LuaState {
    pub fn new() -> Self {
        LuaState {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
        }
    }

    pub fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    pub fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    pub fn ensure_stack(&mut self, top: usize) {
        if self.stack.len() < top {
            self.stack.resize(top, LuaValue::Nil);
        }
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level embedding handle: one `Global` plus the (only) thread.
pub struct LuaVM {
    pub global: Global,
    pub main: LuaState,
}

impl LuaVM {
    pub fn new() -> Self {
        LuaVM::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        LuaVM {
            global: Global::new(config),
            main: LuaState::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.global.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.global.heap
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        let id = self.global.heap.intern_str(s);
        self.collect_if_due();
        id
    }

    pub fn globals_table(&self) -> TableId {
        self.global.globals
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.intern(name);
        let globals = self.global.globals;
        self.global
            .heap
            .tables
            .get_mut(globals.0)
            .data
            .set(LuaValue::String(key), value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.intern(name);
        let globals = self.global.globals;
        self.global
            .heap
            .tables
            .get(globals.0)
            .data
            .get(&LuaValue::String(key))
    }

    pub fn register_native(&mut self, name: &'static str, func: CFunction) {
        let idx = self.global.heap.closures.insert(crate::gc::GcFunction {
            header: crate::gc::GcHeader::new(),
            data: Closure::Native {
                func,
                upvalues: Vec::new(),
                name,
            },
        });
        self.set_global(name, LuaValue::Function(FunctionId(idx)));
    }

    pub fn new_lua_closure(&mut self, prototype: PrototypeId, upvalues: Vec<UpvalueId>) -> FunctionId {
        let idx = self.global.heap.closures.insert(crate::gc::GcFunction {
            header: crate::gc::GcHeader::new(),
            data: Closure::Lua { prototype, upvalues },
        });
        FunctionId(idx)
    }

    pub fn register_prototype(&mut self, proto: Prototype) -> PrototypeId {
        let id = self.global.heap.new_prototype(proto);
        self.collect_if_due();
        id
    }

    /// Tostring for any value; strings/tables/functions need heap access,
    /// which is why this lives on `LuaVM` rather than `LuaValue`.
    pub fn tostring(&self, v: &LuaValue) -> String {
        if let Some(s) = v.literal_to_string() {
            return s;
        }
        match v {
            LuaValue::String(id) => self.global.heap.strings.get(id.0).data.as_str().to_string(),
            LuaValue::Table(id) => format!("table: 0x{:08x}", id.0),
            LuaValue::Function(id) => format!("function: 0x{:08x}", id.0),
            LuaValue::Prototype(id) => format!("function: 0x{:08x}", id.0),
            LuaValue::LightUserdata(p) => format!("userdata: 0x{:08x}", p),
            LuaValue::Nil | LuaValue::Boolean(_) | LuaValue::Number(_) => unreachable!(),
        }
    }

    /// Runs a collection if the heap has accumulated enough debt (or
    /// `stress-gc` forces every allocation to check) since the last
    /// one, using this call's own stack/frames/open-upvalues as roots.
    /// Every allocation made while a [`LuaVM`] (and so a root set) is
    /// in hand should route through this rather than calling a `Heap`
    /// allocator directly, so the spec's "every growing allocation
    /// exceeding the threshold triggers a full collection" actually
    /// holds at runtime rather than only via an explicit host call.
    pub fn collect_if_due(&mut self) {
        if self.global.heap.gc_pending {
            self.collect_garbage();
        }
    }

    /// Run a full GC cycle using the current stack/frames/upvalues as
    /// roots (spec §4.1).
    pub fn collect_garbage(&mut self) -> usize {
        let frame_functions: Vec<FunctionId> =
            self.main.frames.iter().map(|f| f.function).collect();
        let roots = GcRoots {
            stack: &self.main.stack,
            globals: self.global.globals,
            open_upvalues: &self.main.open_upvalues,
            frame_functions: &frame_functions,
        };
        self.global.heap.collect(&roots)
    }

    pub fn error_at(&self, line: u32, message: String) -> RuntimeError {
        RuntimeError::runtime(&self.global.source_root_name, line, message)
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        Self::new()
    }
}
