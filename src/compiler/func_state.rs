//! Per-function compiler state: register allocation, scope/local
//! bookkeeping, jump-list patching and upvalue resolution (spec §4.6
//! "Locals & scope", "Upvalue resolution").

use crate::chunk::opcode::*;
use crate::chunk::{LineRecord, LocalVar, OpCode, Prototype, UpvalDesc, UpvalSource};
use crate::value::LuaValue;

/// A local variable not yet visible to name resolution (pushed) vs.
/// one that is (started). See spec's two-step local creation.
struct ActiveLocal {
    name: String,
    slot: u8,
    start_pc: usize,
}

struct Block {
    n_locals: usize,
    breakable: bool,
    has_upvalue: bool,
    break_jumps: Vec<usize>,
}

/// Where a name resolves to, from the function currently being compiled.
pub enum VarRef {
    Local(u8),
    Upvalue(u32),
    Global,
}

pub struct FuncState {
    pub proto: Prototype,
    pub free_reg: u8,
    active: Vec<ActiveLocal>,
    blocks: Vec<Block>,
    current_line: u32,
}

impl FuncState {
    pub fn new(source_name: String) -> Self {
        FuncState {
            proto: Prototype::new(source_name),
            free_reg: 0,
            active: Vec::new(),
            blocks: vec![Block {
                n_locals: 0,
                breakable: false,
                has_upvalue: false,
                break_jumps: Vec::new(),
            }],
            current_line: 0,
        }
    }

    pub fn set_line(&mut self, line: u32) {
        if self.current_line == line {
            return;
        }
        self.current_line = line;
        let pc = self.proto.instructions.len();
        if let Some(last) = self.proto.lines.last_mut() {
            if last.line == line {
                last.end_pc = pc;
                return;
            }
            last.end_pc = pc - 1;
        }
        self.proto.lines.push(LineRecord {
            line,
            start_pc: pc,
            end_pc: pc,
        });
    }

    pub fn pc(&self) -> usize {
        self.proto.instructions.len()
    }

    fn emit(&mut self, instr: u32) -> usize {
        let pc = self.pc();
        self.proto.instructions.push(instr);
        if let Some(last) = self.proto.lines.last_mut() {
            last.end_pc = pc;
        }
        pc
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(encode_abc(op, a, b, c))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(encode_abx(op, a, bx))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(encode_asbx(op, a, sbx))
    }

    /// Emits with a placeholder offset; patch later via [`Self::patch_jump_to`].
    pub fn emit_jump(&mut self) -> usize {
        self.emit_asbx(OpCode::Jump, 0, 0)
    }

    /// Rewrites an AsBx instruction's offset, preserving whatever opcode
    /// and `A` it already carries (`JUMP`, but also `FOR_PREP`/`FOR_LOOP`).
    pub fn patch_jump_to(&mut self, jump_pc: usize, target_pc: usize) {
        let sbx = target_pc as i64 - (jump_pc as i64 + 1);
        let instr = self.proto.instructions[jump_pc];
        let op = get_opcode(instr);
        let a = get_a(instr);
        self.proto.instructions[jump_pc] = encode_asbx(op, a, sbx as i32);
    }

    pub fn patch_list_to_here(&mut self, list: &[usize]) {
        let here = self.pc();
        for &pc in list {
            self.patch_jump_to(pc, here);
        }
    }

    pub fn add_constant(&mut self, v: LuaValue) -> u32 {
        for (i, existing) in self.proto.constants.iter().enumerate() {
            if existing.raw_eq(&v) && same_number_sign(existing, &v) {
                return i as u32;
            }
        }
        self.proto.constants.push(v);
        (self.proto.constants.len() - 1) as u32
    }

    pub fn reserve_reg(&mut self) -> u8 {
        let r = self.free_reg;
        self.free_reg += 1;
        self.proto.max_stack_size = self.proto.max_stack_size.max(self.free_reg);
        r
    }

    pub fn reserve_regs(&mut self, n: u8) -> u8 {
        let base = self.free_reg;
        self.free_reg += n;
        self.proto.max_stack_size = self.proto.max_stack_size.max(self.free_reg);
        base
    }

    pub fn free_to(&mut self, reg: u8) {
        self.free_reg = reg;
    }

    /// Step 1 of local creation: reserve a descriptor, not yet visible
    /// to name resolution.
    pub fn push_local(&mut self, name: String) -> u8 {
        let slot = self.reserve_reg();
        self.active.push(ActiveLocal {
            name,
            slot,
            start_pc: self.pc(),
        });
        slot
    }

    /// Step 2: the most recently pushed local becomes visible.
    pub fn start_local(&mut self) {
        let pc = self.pc();
        if let Some(local) = self.active.last_mut() {
            local.start_pc = pc;
        }
    }

    pub fn active_local_count(&self) -> usize {
        self.active.len()
    }

    pub fn last_local_slot(&self) -> u8 {
        self.active.last().expect("no active local").slot
    }

    pub fn resolve_local(&self, name: &str) -> Option<u8> {
        self.active.iter().rev().find(|l| l.name == name).map(|l| l.slot)
    }

    pub fn add_upvalue(&mut self, name: &str, source: UpvalSource) -> u32 {
        for (i, up) in self.proto.upvalues.iter().enumerate() {
            if up.source == source {
                return i as u32;
            }
        }
        self.proto.upvalues.push(UpvalDesc {
            name: name.to_string(),
            source,
        });
        (self.proto.upvalues.len() - 1) as u32
    }

    pub fn enter_block(&mut self, breakable: bool) {
        self.blocks.push(Block {
            n_locals: self.active.len(),
            breakable,
            has_upvalue: false,
            break_jumps: Vec::new(),
        });
    }

    /// Mark the innermost block owning `reg` as captured, so it emits
    /// a `CLOSE` on exit.
    pub fn mark_captured(&mut self, reg: u8) {
        for block in self.blocks.iter_mut().rev() {
            if (reg as usize) >= block.n_locals {
                block.has_upvalue = true;
                return;
            }
        }
    }

    /// `break` chains into the enclosing breakable block's jump list;
    /// a block captured by a closure gets a `CLOSE` first (spec §4.6).
    pub fn emit_break(&mut self) -> Result<(), ()> {
        let target = self
            .blocks
            .iter()
            .rev()
            .find(|b| b.breakable)
            .map(|b| (b.n_locals, b.has_upvalue))
            .ok_or(())?;
        let (n_locals, has_upvalue) = target;
        if has_upvalue {
            self.emit_abc(OpCode::Close, n_locals as u32, 0, 0);
        }
        let pc = self.emit_jump();
        self.blocks
            .iter_mut()
            .rev()
            .find(|b| b.breakable)
            .unwrap()
            .break_jumps
            .push(pc);
        Ok(())
    }

    pub fn leave_block(&mut self) {
        let block = self.blocks.pop().expect("block stack underflow");
        let end_pc = self.pc();
        while self.active.len() > block.n_locals {
            let local = self.active.pop().unwrap();
            self.proto.locals.push(LocalVar {
                name: local.name,
                slot: local.slot,
                start_pc: local.start_pc,
                end_pc,
            });
        }
        if block.has_upvalue {
            self.emit_abc(OpCode::Close, block.n_locals as u32, 0, 0);
        }
        self.patch_list_to_here(&block.break_jumps);
        self.free_reg = block.n_locals as u8;
    }

    pub fn finish(mut self, last_line: u32) -> Prototype {
        self.proto.last_line_defined = last_line;
        if let Some(last) = self.proto.lines.last_mut() {
            last.end_pc = self.proto.instructions.len().saturating_sub(1);
        }
        // Every chunk/function implicitly returns at the end.
        self.emit_abc(OpCode::Return, 0, 1, 0);
        if let Some(last) = self.proto.lines.last_mut() {
            last.end_pc = self.proto.instructions.len() - 1;
        }
        self.proto
    }
}

fn same_number_sign(a: &LuaValue, b: &LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => x.to_bits() == y.to_bits(),
        _ => true,
    }
}
