//! Expression descriptors and register discharge (spec §4.6).
//!
//! Mirrors the shape of a traditional single-pass Lua compiler's
//! `expdesc`: most expressions stay undischarged (a constant index, an
//! unallocated register, a pending jump) until the surrounding context
//! forces them into a concrete register, which is what lets constant
//! folding and short-circuit jump-list merging work without a second pass.

use crate::chunk::opcode::*;
use crate::chunk::OpCode;
use crate::compiler::func_state::FuncState;
use crate::value::LuaValue;

#[derive(Clone)]
pub enum ExprDesc {
    Nil,
    True,
    False,
    Number(f64),
    /// Already-resolved constant pool index.
    Const(u32),
    Local(u8),
    Upvalue(u32),
    /// Constant pool index of the global's name.
    Global(u32),
    /// `table[key]`, not yet emitted as `GET_TABLE`.
    Indexed { table: u32, key: u32 },
    /// pc of a `CALL`/`VARARG` instruction whose result count (`C`)
    /// hasn't been fixed yet.
    MultiRet(usize),
    /// Value already resides in a fixed register.
    NonReloc(u8),
    /// pc of an instruction whose destination register (`A`) is not
    /// yet assigned.
    Relocable(usize),
    /// A boolean produced only through jump-list patching (relational
    /// ops, `and`/`or` chains): `true_jumps`/`false_jumps` still need
    /// a landing pad picked by the consumer.
    Jump {
        true_jumps: Vec<usize>,
        false_jumps: Vec<usize>,
    },
}

impl ExprDesc {
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, ExprDesc::MultiRet(_))
    }
}

/// Force `e` into a caller-chosen register, emitting whatever load
/// instruction the shape needs.
pub fn discharge_to_reg(fs: &mut FuncState, e: ExprDesc, reg: u8) {
    match e {
        ExprDesc::Nil => {
            fs.emit_abc(OpCode::LoadNil, reg as u32, reg as u32, 0);
        }
        ExprDesc::True => {
            fs.emit_abc(OpCode::LoadBool, reg as u32, 1, 0);
        }
        ExprDesc::False => {
            fs.emit_abc(OpCode::LoadBool, reg as u32, 0, 0);
        }
        ExprDesc::Number(n) => {
            let k = fs.add_constant(LuaValue::Number(n));
            fs.emit_abx(OpCode::LoadConstant, reg as u32, k);
        }
        ExprDesc::Const(k) => {
            fs.emit_abx(OpCode::LoadConstant, reg as u32, k);
        }
        ExprDesc::Local(src) => {
            if src != reg {
                fs.emit_abc(OpCode::Move, reg as u32, src as u32, 0);
            }
        }
        ExprDesc::NonReloc(src) => {
            if src != reg {
                fs.emit_abc(OpCode::Move, reg as u32, src as u32, 0);
            }
        }
        ExprDesc::Upvalue(idx) => {
            fs.emit_abc(OpCode::GetUpval, reg as u32, idx, 0);
        }
        ExprDesc::Global(k) => {
            fs.emit_abx(OpCode::GetGlobal, reg as u32, k);
        }
        ExprDesc::Indexed { table, key } => {
            fs.emit_abc(OpCode::GetTable, reg as u32, table, key);
        }
        ExprDesc::MultiRet(pc) => {
            patch_result_count(fs, pc, 2); // exactly one value
            let src = get_a(fs_instr(fs, pc));
            if src != reg as u32 {
                fs.emit_abc(OpCode::Move, reg as u32, src, 0);
            }
        }
        ExprDesc::Relocable(pc) => {
            set_dest_reg(fs, pc, reg);
        }
        ExprDesc::Jump { true_jumps, false_jumps } => {
            discharge_jump_to_reg(fs, true_jumps, false_jumps, reg);
        }
    }
}

fn fs_instr(fs: &FuncState, pc: usize) -> u32 {
    fs.proto.instructions[pc]
}

/// Rewrite a relocable instruction's `A` operand now that its
/// destination register is known.
fn set_dest_reg(fs: &mut FuncState, pc: usize, reg: u8) {
    let instr = fs.proto.instructions[pc];
    let op = get_opcode(instr);
    let rewritten = match op {
        OpCode::GetGlobal | OpCode::Closure | OpCode::LoadConstant => {
            encode_abx(op, reg as u32, get_bx(instr))
        }
        _ => encode_abc(op, reg as u32, get_b(instr), get_c(instr)),
    };
    fs.proto.instructions[pc] = rewritten;
}

/// A `CALL`/`VARARG` left as MULTRET gets its `C`/`B` operand fixed to
/// `n+1` once the surrounding context knows how many results it wants.
fn patch_result_count(fs: &mut FuncState, pc: usize, n_plus_one: u32) {
    let instr = fs.proto.instructions[pc];
    let op = get_opcode(instr);
    let a = get_a(instr);
    let rewritten = match op {
        OpCode::Call => encode_abc(op, a, get_b(instr), n_plus_one),
        OpCode::Vararg => encode_abc(op, a, n_plus_one, 0),
        _ => unreachable!("patch_result_count on non multi-value instruction"),
    };
    fs.proto.instructions[pc] = rewritten;
}

pub fn set_multi_ret_count(fs: &mut FuncState, pc: usize, count: u32) {
    patch_result_count(fs, pc, count + 1);
}

/// `LOAD_BOOL ..., skip-next` pair that materializes a jump-based
/// boolean into a concrete register: the false-branch loads `false`
/// and skips the next instr; the true-branch loads `true`.
fn discharge_jump_to_reg(fs: &mut FuncState, true_jumps: Vec<usize>, false_jumps: Vec<usize>, reg: u8) {
    let false_label = fs.emit_abc(OpCode::LoadBool, reg as u32, 0, 1);
    let true_label = fs.emit_abc(OpCode::LoadBool, reg as u32, 1, 0);
    for pc in false_jumps {
        fs.patch_jump_to(pc, false_label);
    }
    for pc in true_jumps {
        fs.patch_jump_to(pc, true_label);
    }
}

/// Jump pcs taken when `e` is falsy; execution falls through when
/// truthy (used by `if`/`while`/`repeat` conditions).
pub fn condition_false_jumps(fs: &mut FuncState, e: ExprDesc) -> Vec<usize> {
    match e {
        ExprDesc::Jump { true_jumps, false_jumps } => {
            fs.patch_list_to_here(&true_jumps);
            false_jumps
        }
        other => {
            let reg = discharge_to_any_reg(fs, other);
            fs.emit_abc(OpCode::Test, reg as u32, 0, 1);
            vec![fs.emit_jump()]
        }
    }
}

pub fn discharge_to_any_reg(fs: &mut FuncState, e: ExprDesc) -> u8 {
    match e {
        ExprDesc::Local(r) | ExprDesc::NonReloc(r) => r,
        other => {
            let reg = fs.reserve_reg();
            discharge_to_reg(fs, other, reg);
            reg
        }
    }
}

pub fn discharge_to_next_reg(fs: &mut FuncState, e: ExprDesc) -> u8 {
    let reg = fs.reserve_reg();
    discharge_to_reg(fs, e, reg);
    reg
}

/// RK-encode for use as a `B`/`C` operand: constants pass through
/// directly (if they fit); everything else is discharged to a register.
pub fn expr_to_rk(fs: &mut FuncState, e: ExprDesc) -> u32 {
    match e {
        ExprDesc::Const(k) if k <= MAX_RK => rk_constant(k),
        ExprDesc::Nil => rk_constant(fs.add_constant(LuaValue::Nil)),
        ExprDesc::True => rk_constant(fs.add_constant(LuaValue::Boolean(true))),
        ExprDesc::False => rk_constant(fs.add_constant(LuaValue::Boolean(false))),
        ExprDesc::Number(n) => {
            let k = fs.add_constant(LuaValue::Number(n));
            if k <= MAX_RK {
                rk_constant(k)
            } else {
                discharge_to_any_reg(fs, ExprDesc::Number(n)) as u32
            }
        }
        other => discharge_to_any_reg(fs, other) as u32,
    }
}
