//! Compiled function bodies (spec §3 "Prototype (Chunk)", §4.4).

pub mod opcode;

pub use opcode::OpCode;

use crate::gc::PrototypeId;
use crate::value::LuaValue;

/// Where an upvalue captured by a closure made from this prototype
/// comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalSource {
    /// Capture an enclosing function's local register.
    ParentLocal(u8),
    /// Copy an enclosing function's own upvalue slot.
    ParentUpvalue(u8),
}

#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: String,
    pub source: UpvalSource,
}

/// Declaration-order descriptor for a local variable's live range,
/// used for debug info and symbolic error attribution (spec §4.7).
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: String,
    pub slot: u8,
    pub start_pc: usize,
    pub end_pc: usize,
}

/// Run-length encoded `(line, start_pc, end_pc)` record. Exactly one
/// record covers any given pc (invariant I5).
#[derive(Debug, Clone, Copy)]
pub struct LineRecord {
    pub line: u32,
    pub start_pc: usize,
    pub end_pc: usize,
}

pub struct Prototype {
    pub instructions: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub children: Vec<PrototypeId>,
    pub locals: Vec<LocalVar>,
    pub upvalues: Vec<UpvalDesc>,
    pub lines: Vec<LineRecord>,

    pub source_name: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub max_stack_size: u8,
    pub is_vararg: bool,
}

impl Prototype {
    pub fn new(source_name: String) -> Self {
        Prototype {
            instructions: Vec::new(),
            constants: Vec::new(),
            children: Vec::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            lines: Vec::new(),
            source_name,
            line_defined: 0,
            last_line_defined: 0,
            num_params: 0,
            max_stack_size: 2,
            is_vararg: false,
        }
    }

    /// Binary-search the line-info runs for the line covering `pc`
    /// (invariant I5).
    pub fn line_at(&self, pc: usize) -> u32 {
        match self
            .lines
            .binary_search_by(|r| {
                if pc < r.start_pc {
                    std::cmp::Ordering::Greater
                } else if pc > r.end_pc {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            }) {
            Ok(idx) => self.lines[idx].line,
            Err(_) => self.lines.last().map(|r| r.line).unwrap_or(0),
        }
    }
}
