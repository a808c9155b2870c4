//! Allocation bookkeeping and the tri-color mark-sweep collector.
//!
//! Collectable objects (strings, tables, prototypes, closures, open
//! upvalues) never live behind `Rc`/`Box` owned by the values that
//! reference them. They live in one arena per kind, owned exclusively
//! by [`Heap`], and are referenced elsewhere by small `Copy` ids. This
//! keeps the ownership graph a single pool with index edges instead of
//! a cycle of owning pointers, which is what makes mark-sweep
//! terminate.

mod arena;
mod collector;
mod object;
mod string_interner;

pub use arena::{Arena, FunctionId, PrototypeId, StringId, TableId, UpvalueId};
pub use collector::{Collector, GcConfig, GcRoots};
pub use object::{Color, GcHeader};
pub use string_interner::{fnv1a as string_hash, StringInterner};

use crate::chunk::Prototype;
use crate::table::LuaTable;
use crate::value::{LuaString, LuaValue};
use crate::vm::{Closure, Upvalue};

/// Owns every collectable object and the bookkeeping the collector needs.
pub struct Heap {
    pub strings: Arena<GcString>,
    pub tables: Arena<GcTable>,
    pub prototypes: Arena<GcPrototype>,
    pub closures: Arena<GcFunction>,
    pub upvalues: Arena<GcUpvalue>,

    pub interner: StringInterner,

    pub bytes_allocated: usize,
    pub gc_threshold: usize,
    pub config: GcConfig,

    /// Set by [`Heap::note_alloc`] once growth has crossed the
    /// threshold (or `stress` is on); consumed by the first caller
    /// that can supply [`GcRoots`] and actually run a collection
    /// (spec §4.1 "every growing allocation ... exceeding [the
    /// threshold] triggers a full collection cycle"). A `Heap` on its
    /// own never holds the stack/globals/open-upvalues a sweep needs,
    /// so the debt just accumulates here until a caller with that
    /// context (see [`crate::vm::LuaVM::collect_if_due`]) checks it.
    pub gc_pending: bool,
}

pub struct GcString {
    pub header: GcHeader,
    pub data: LuaString,
}

pub struct GcTable {
    pub header: GcHeader,
    pub data: LuaTable,
}

pub struct GcPrototype {
    pub header: GcHeader,
    pub data: Prototype,
}

pub struct GcFunction {
    pub header: GcHeader,
    pub data: Closure,
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub data: Upvalue,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Heap {
            strings: Arena::new(),
            tables: Arena::new(),
            prototypes: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            interner: StringInterner::new(),
            bytes_allocated: 0,
            gc_threshold: 1 << 20,
            config,
            gc_pending: false,
        }
    }

    /// Record growth and report whether a collection should run before
    /// the next allocation-heavy operation. Also latches [`Self::gc_pending`]
    /// so a later caller that does have roots can act on it even if this
    /// one doesn't.
    pub fn note_alloc(&mut self, bytes: usize) -> bool {
        self.bytes_allocated += bytes;
        let due = self.config.stress || self.bytes_allocated > self.gc_threshold;
        self.gc_pending |= due;
        due
    }

    pub fn grow_threshold(&mut self) {
        self.gc_threshold =
            (self.bytes_allocated as f64 * self.config.grow_factor) as usize;
    }

    /// Run a full mark-sweep cycle now and re-arm the threshold.
    pub fn collect(&mut self, roots: &GcRoots) -> usize {
        let freed = Collector::run(self, roots);
        self.grow_threshold();
        self.gc_pending = false;
        freed
    }

    /// Intern a byte string, returning its canonical id. Strings with
    /// equal bytes always return the same id (invariant I1).
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = string_interner::fnv1a(bytes);
        if let Some(id) = self.interner.find(hash, |id| self.strings.get(id.0).data.bytes.as_ref() == bytes) {
            return id;
        }
        let size = bytes.len() + std::mem::size_of::<LuaString>();
        self.note_alloc(size);
        let lua_string = LuaString::new(bytes.to_vec(), hash);
        let idx = self.strings.insert(GcString {
            header: GcHeader::new(),
            data: lua_string,
        });
        let id = StringId(idx);
        self.interner.insert(hash, id);
        id
    }

    pub fn intern_str(&mut self, s: &str) -> StringId {
        self.intern(s.as_bytes())
    }

    pub fn new_table(&mut self) -> TableId {
        self.new_table_with_hints(0, 0)
    }

    pub fn new_table_with_hints(&mut self, array_hint: usize, hash_hint: usize) -> TableId {
        self.note_alloc(std::mem::size_of::<LuaTable>());
        let idx = self.tables.insert(GcTable {
            header: GcHeader::new(),
            data: LuaTable::with_hints(array_hint, hash_hint),
        });
        TableId(idx)
    }

    pub fn new_prototype(&mut self, proto: Prototype) -> PrototypeId {
        let size = proto.instructions.len() * 4 + proto.constants.len() * std::mem::size_of::<LuaValue>();
        self.note_alloc(size);
        let idx = self.prototypes.insert(GcPrototype {
            header: GcHeader::new(),
            data: proto,
        });
        PrototypeId(idx)
    }
}
