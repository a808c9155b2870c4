//! Bytecode dispatch (spec §4.7).

mod arith;
mod compare;
mod concat;

use crate::chunk::opcode::*;
use crate::chunk::OpCode;
use crate::gc::{FunctionId, PrototypeId};
use crate::value::LuaValue;
use crate::vm::closure::Closure;
use crate::vm::state::{CallFrame, MAX_CALL_DEPTH};
use crate::vm::{attribution, metamethod, upvalues, LuaVM, RuntimeError};

/// Call any callable value. `nresults` mirrors the CALL/RETURN
/// `C`/`B` "to top" convention: `None` means take every value the
/// callee produced.
pub fn call_value(
    vm: &mut LuaVM,
    func: LuaValue,
    args: Vec<LuaValue>,
    nresults: Option<usize>,
) -> Result<Vec<LuaValue>, RuntimeError> {
    let function_id = match func {
        LuaValue::Function(id) => id,
        other => {
            return Err(vm.error_at(0, format!("attempt to call a {} value", other.type_name())));
        }
    };
    call_function(vm, function_id, args, nresults)
}

pub fn call_function(
    vm: &mut LuaVM,
    function_id: FunctionId,
    args: Vec<LuaValue>,
    nresults: Option<usize>,
) -> Result<Vec<LuaValue>, RuntimeError> {
    if vm.main.frames.len() >= MAX_CALL_DEPTH {
        return Err(vm.error_at(0, "stack overflow".to_string()));
    }

    let closure_kind_is_native = matches!(
        vm.global.heap.closures.get(function_id.0).data,
        Closure::Native { .. }
    );

    let mut results = if closure_kind_is_native {
        let (func, _name) = match &vm.global.heap.closures.get(function_id.0).data {
            Closure::Native { func, name, .. } => (*func, *name),
            _ => unreachable!(),
        };
        func(vm, &args)?
    } else {
        call_lua_closure(vm, function_id, args)?
    };

    if let Some(n) = nresults {
        results.resize(n, LuaValue::Nil);
    }
    Ok(results)
}

fn call_lua_closure(
    vm: &mut LuaVM,
    function_id: FunctionId,
    mut args: Vec<LuaValue>,
) -> Result<Vec<LuaValue>, RuntimeError> {
    let prototype_id = match vm.global.heap.closures.get(function_id.0).data {
        Closure::Lua { prototype, .. } => prototype,
        _ => unreachable!(),
    };
    let (num_params, max_stack, is_vararg) = {
        let p = &vm.global.heap.prototypes.get(prototype_id.0).data;
        (p.num_params as usize, p.max_stack_size as usize, p.is_vararg)
    };

    let varargs = if is_vararg && args.len() > num_params {
        args.split_off(num_params)
    } else {
        Vec::new()
    };
    args.resize(num_params.max(args.len()), LuaValue::Nil);
    args.truncate(num_params);

    let base = vm.main.stack.len();
    vm.main.stack.extend(args);
    vm.main.ensure_stack(base + max_stack);

    vm.main.frames.push(CallFrame {
        function: function_id,
        base,
        saved_ip: 0,
        expected_results: None,
        varargs,
    });

    let result = run_frame(vm, prototype_id);

    // Unwind this frame's window regardless of success; upvalues still
    // open over it must be closed first so later reads see the
    // snapshotted value rather than a reused slot.
    upvalues::close_from(
        &mut vm.global.heap,
        &mut vm.main.open_upvalues,
        &vm.main.stack,
        base,
    );
    vm.main.frames.pop();
    vm.main.stack.truncate(base);

    result
}

/// Register reads/writes tolerate a stack shorter than the frame's
/// declared window: a "to top" CALL or VARARG can shrink `stack.len()`
/// below `base + max_stack_size` until the next fixed-arity op touches
/// a register past the new top.
fn r(vm: &LuaVM, base: usize, i: u32) -> LuaValue {
    vm.main.stack.get(base + i as usize).copied().unwrap_or(LuaValue::Nil)
}

fn set_r(vm: &mut LuaVM, base: usize, i: u32, v: LuaValue) {
    let idx = base + i as usize;
    vm.main.ensure_stack(idx + 1);
    vm.main.stack[idx] = v;
}

fn k(vm: &LuaVM, prototype: PrototypeId, i: u32) -> LuaValue {
    vm.global.heap.prototypes.get(prototype.0).data.constants[i as usize]
}

fn describe_arith_error(
    vm: &LuaVM,
    prototype: PrototypeId,
    pc: usize,
    rk_operand: u32,
    culprit: &LuaValue,
) -> String {
    if is_rk(rk_operand) {
        return format!("attempt to perform arithmetic on a {} value", culprit.type_name());
    }
    let proto = &vm.global.heap.prototypes.get(prototype.0).data;
    match attribution::describe_register(&vm.global.heap, proto, pc, rk_operand) {
        Some(name) => format!(
            "attempt to perform arithmetic on {} (a {} value)",
            name,
            culprit.type_name()
        ),
        None => format!("attempt to perform arithmetic on a {} value", culprit.type_name()),
    }
}

fn describe_index_error(
    vm: &LuaVM,
    prototype: PrototypeId,
    pc: usize,
    reg: u32,
    culprit: &LuaValue,
) -> String {
    let proto = &vm.global.heap.prototypes.get(prototype.0).data;
    match attribution::describe_register(&vm.global.heap, proto, pc, reg) {
        Some(name) => format!("attempt to index {} (a {} value)", name, culprit.type_name()),
        None => format!("attempt to index a {} value", culprit.type_name()),
    }
}

fn rk(vm: &LuaVM, base: usize, prototype: PrototypeId, x: u32) -> LuaValue {
    if is_rk(x) {
        k(vm, prototype, rk_as_constant(x))
    } else {
        r(vm, base, x)
    }
}

/// Run one Lua call frame's instructions until RETURN. This is the
/// re-entrant step spec §4.7 describes: a nested Lua CALL recurses
/// into `call_lua_closure`/`run_frame` rather than looping in place.
fn run_frame(vm: &mut LuaVM, prototype: PrototypeId) -> Result<Vec<LuaValue>, RuntimeError> {
    loop {
        let base = vm.main.current_frame().base;
        let ip = vm.main.current_frame().saved_ip;
        let instr = vm.global.heap.prototypes.get(prototype.0).data.instructions[ip];
        vm.main.current_frame_mut().saved_ip = ip + 1;
        let op = get_opcode(instr);
        let a = get_a(instr);
        let b = get_b(instr);
        let c = get_c(instr);

        macro_rules! bail {
            ($msg:expr) => {{
                let line = vm.global.heap.prototypes.get(prototype.0).data.line_at(ip);
                return Err(vm.error_at(line, $msg));
            }};
        }

        match op {
            OpCode::Move => {
                let v = r(vm, base, b);
                set_r(vm, base, a, v);
            }
            OpCode::LoadConstant => {
                let bx = get_bx(instr);
                let v = k(vm, prototype, bx);
                set_r(vm, base, a, v);
            }
            OpCode::LoadNil => {
                for i in a..=b {
                    set_r(vm, base, i, LuaValue::Nil);
                }
            }
            OpCode::LoadBool => {
                set_r(vm, base, a, LuaValue::Boolean(b != 0));
                if c != 0 {
                    vm.main.current_frame_mut().saved_ip += 1;
                }
            }
            OpCode::GetGlobal => {
                let bx = get_bx(instr);
                let name = k(vm, prototype, bx);
                let globals = vm.global.globals;
                let v = vm.global.heap.tables.get(globals.0).data.get(&name);
                set_r(vm, base, a, v);
            }
            OpCode::SetGlobal => {
                let bx = get_bx(instr);
                let name = k(vm, prototype, bx);
                let v = r(vm, base, a);
                let globals = vm.global.globals;
                vm.global.heap.tables.get_mut(globals.0).data.set(name, v);
            }
            OpCode::NewTable => {
                let array_hint = decode_floating_byte(c as u8) as usize;
                let hash_hint = decode_floating_byte(b as u8) as usize;
                let id = vm.global.heap.new_table_with_hints(array_hint, hash_hint);
                set_r(vm, base, a, LuaValue::Table(id));
                vm.collect_if_due();
            }
            OpCode::GetTable => {
                let tbl = r(vm, base, b);
                let key = rk(vm, base, prototype, c);
                match tbl {
                    LuaValue::Table(id) => {
                        let v = vm.global.heap.tables.get(id.0).data.get(&key);
                        set_r(vm, base, a, v);
                    }
                    _ => bail!(describe_index_error(vm, prototype, ip, b, &tbl)),
                }
            }
            OpCode::SetTable => {
                let tbl = r(vm, base, a);
                let key = rk(vm, base, prototype, b);
                let val = rk(vm, base, prototype, c);
                match tbl {
                    LuaValue::Table(id) => {
                        vm.global.heap.tables.get_mut(id.0).data.set(key, val);
                    }
                    _ => bail!(describe_index_error(vm, prototype, ip, a, &tbl)),
                }
            }
            OpCode::SetArray => {
                let tbl = r(vm, base, a);
                let id = match tbl {
                    LuaValue::Table(id) => id,
                    _ => bail!("attempt to index a non-table value".to_string()),
                };
                let count = if b == 0 {
                    (vm.main.stack.len() - base) as u32 - a - 1
                } else {
                    b
                };
                const FIELDS_PER_FLUSH: u32 = 50;
                let start = c * FIELDS_PER_FLUSH;
                for i in 1..=count {
                    let v = r(vm, base, a + i);
                    vm.global
                        .heap
                        .tables
                        .get_mut(id.0)
                        .data
                        .set(LuaValue::Number((start + i) as f64), v);
                }
            }
            OpCode::GetUpval => {
                let func_id = vm.main.current_frame().function;
                let uv = match &vm.global.heap.closures.get(func_id.0).data {
                    Closure::Lua { upvalues, .. } => upvalues[b as usize],
                    _ => unreachable!(),
                };
                let v = upvalues::read(&vm.global.heap, &vm.main.stack, uv);
                set_r(vm, base, a, v);
            }
            OpCode::SetUpval => {
                let func_id = vm.main.current_frame().function;
                let uv = match &vm.global.heap.closures.get(func_id.0).data {
                    Closure::Lua { upvalues, .. } => upvalues[b as usize],
                    _ => unreachable!(),
                };
                let v = r(vm, base, a);
                upvalues::write(&mut vm.global.heap, &mut vm.main.stack, uv, v);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                let lhs = rk(vm, base, prototype, b);
                let rhs = rk(vm, base, prototype, c);
                if let Some(v) = arith::apply(&vm.global.heap, op, &lhs, &rhs) {
                    set_r(vm, base, a, v);
                } else {
                    let name = arith::metamethod_name(op);
                    match metamethod::binary(vm, name, lhs, rhs)? {
                        Some(v) => set_r(vm, base, a, v),
                        None => {
                            let (culprit, reg) = if arith::coerce_number(&vm.global.heap, &lhs).is_none() {
                                (lhs, b)
                            } else {
                                (rhs, c)
                            };
                            bail!(describe_arith_error(vm, prototype, ip, reg, &culprit));
                        }
                    }
                }
            }
            OpCode::Unm => {
                let v = r(vm, base, b);
                match arith::coerce_number(&vm.global.heap, &v) {
                    Some(n) => set_r(vm, base, a, LuaValue::Number(-n)),
                    None => match metamethod::binary(vm, "__unm", v, v)? {
                        Some(result) => set_r(vm, base, a, result),
                        None => bail!(format!("attempt to perform arithmetic on a {} value", v.type_name())),
                    },
                }
            }
            OpCode::Not => {
                let v = r(vm, base, b);
                set_r(vm, base, a, LuaValue::Boolean(!v.is_truthy()));
            }
            OpCode::Len => {
                let v = r(vm, base, b);
                match v {
                    LuaValue::Table(id) => {
                        let n = vm.global.heap.tables.get(id.0).data.len();
                        set_r(vm, base, a, LuaValue::Number(n as f64));
                    }
                    LuaValue::String(id) => {
                        let n = vm.global.heap.strings.get(id.0).data.len();
                        set_r(vm, base, a, LuaValue::Number(n as f64));
                    }
                    _ => bail!(format!("attempt to get length of a {} value", v.type_name())),
                }
            }
            OpCode::Concat => {
                let vals: Vec<LuaValue> = (b..=c).map(|i| r(vm, base, i)).collect();
                match concat::concat_range(vm, &vals) {
                    Ok(v) => set_r(vm, base, a, v),
                    Err((idx, bad)) => {
                        let lhs = vals[idx];
                        let rhs = vals.get(idx + 1).copied().unwrap_or(LuaValue::Nil);
                        match metamethod::binary(vm, "__concat", lhs, rhs)? {
                            Some(v) => set_r(vm, base, a, v),
                            None => bail!(format!("attempt to concatenate a {} value", bad)),
                        }
                    }
                }
            }
            OpCode::Eq => {
                let lhs = rk(vm, base, prototype, b);
                let rhs = rk(vm, base, prototype, c);
                let result = compare::values_equal(&vm.global.heap, &lhs, &rhs);
                if result == (a != 0) {
                    vm.main.current_frame_mut().saved_ip += 1;
                }
            }
            OpCode::Lt | OpCode::Le => {
                let lhs = rk(vm, base, prototype, b);
                let rhs = rk(vm, base, prototype, c);
                let result = if compare::comparable(&lhs, &rhs).is_some() {
                    if op == OpCode::Lt {
                        compare::less_than(&vm.global.heap, &lhs, &rhs).unwrap()
                    } else {
                        compare::less_equal(&vm.global.heap, &lhs, &rhs).unwrap()
                    }
                } else {
                    let name = if op == OpCode::Lt { "__lt" } else { "__le" };
                    match metamethod::binary(vm, name, lhs, rhs)? {
                        Some(v) => v.is_truthy(),
                        None => bail!(format!(
                            "attempt to compare {} with {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )),
                    }
                };
                if result == (a != 0) {
                    vm.main.current_frame_mut().saved_ip += 1;
                }
            }
            OpCode::Test => {
                let v = r(vm, base, a);
                if v.is_truthy() == (c != 0) {
                    vm.main.current_frame_mut().saved_ip += 1;
                }
            }
            OpCode::TestSet => {
                let v = r(vm, base, b);
                if v.is_truthy() == (c != 0) {
                    set_r(vm, base, a, v);
                    vm.main.current_frame_mut().saved_ip += 1;
                }
            }
            OpCode::Jump => {
                let sbx = get_sbx(instr);
                let ip = vm.main.current_frame().saved_ip;
                vm.main.current_frame_mut().saved_ip = (ip as i64 + sbx as i64) as usize;
            }
            OpCode::ForPrep => {
                let init = r(vm, base, a).as_number();
                let limit = r(vm, base, a + 1).as_number();
                let step = r(vm, base, a + 2).as_number();
                let (init, limit, step) = match (init, limit, step) {
                    (Some(i), Some(l), Some(s)) => (i, l, s),
                    _ => bail!("'for' initial value must be a number".to_string()),
                };
                if step == 0.0 {
                    bail!("'for' step is zero".to_string());
                }
                let _ = limit;
                set_r(vm, base, a, LuaValue::Number(init - step));
                let sbx = get_sbx(instr);
                let ip = vm.main.current_frame().saved_ip;
                vm.main.current_frame_mut().saved_ip = (ip as i64 + sbx as i64) as usize;
            }
            OpCode::ForLoop => {
                let idx = r(vm, base, a).as_number().unwrap();
                let limit = r(vm, base, a + 1).as_number().unwrap();
                let step = r(vm, base, a + 2).as_number().unwrap();
                let next = idx + step;
                let within = if step > 0.0 { next <= limit } else { next >= limit };
                if within {
                    set_r(vm, base, a, LuaValue::Number(next));
                    set_r(vm, base, a + 3, LuaValue::Number(next));
                    let sbx = get_sbx(instr);
                    let ip = vm.main.current_frame().saved_ip;
                    vm.main.current_frame_mut().saved_ip = (ip as i64 + sbx as i64) as usize;
                }
            }
            OpCode::ForIn => {
                let generator = r(vm, base, a);
                let state = r(vm, base, a + 1);
                let control = r(vm, base, a + 2);
                let results = call_value(vm, generator, vec![state, control], Some(c as usize))?;
                let first_nil = results.first().map(|v| v.is_nil()).unwrap_or(true);
                for (i, v) in results.into_iter().enumerate() {
                    set_r(vm, base, a + 3 + i as u32, v);
                }
                if !first_nil {
                    let first = r(vm, base, a + 3);
                    set_r(vm, base, a + 2, first);
                    // continue straight into the following JUMP
                } else {
                    vm.main.current_frame_mut().saved_ip += 1; // skip the trailing JUMP, fall out of the loop
                }
            }
            OpCode::Call => {
                let func = r(vm, base, a);
                let nargs = if b == 0 {
                    vm.main.stack.len() - base - a as usize - 1
                } else {
                    (b - 1) as usize
                };
                let args: Vec<LuaValue> = (1..=nargs as u32).map(|i| r(vm, base, a + i)).collect();
                let nresults = if c == 0 { None } else { Some((c - 1) as usize) };
                let results = call_value(vm, func, args, nresults)?;
                if c == 0 {
                    vm.main.stack.truncate(base + a as usize);
                    vm.main.stack.extend(results);
                } else {
                    for (i, v) in results.into_iter().enumerate() {
                        set_r(vm, base, a + i as u32, v);
                    }
                }
            }
            OpCode::SelfOp => {
                let tbl = r(vm, base, b);
                let key = rk(vm, base, prototype, c);
                set_r(vm, base, a + 1, tbl);
                match tbl {
                    LuaValue::Table(id) => {
                        let v = vm.global.heap.tables.get(id.0).data.get(&key);
                        set_r(vm, base, a, v);
                    }
                    _ => bail!(describe_index_error(vm, prototype, ip, b, &tbl)),
                }
            }
            OpCode::Closure => {
                let bx = get_bx(instr);
                let child_id = vm.global.heap.prototypes.get(prototype.0).data.children[bx as usize];
                let nups = vm.global.heap.prototypes.get(child_id.0).data.upvalues.len();
                let ip = vm.main.current_frame().saved_ip;
                let cur_func = vm.main.current_frame().function;
                vm.main.current_frame_mut().saved_ip = ip + nups;

                // Allocate with no upvalues yet and root it via R(A)
                // before resolving any of them: `find_or_create` below
                // can itself allocate, and a collection in the middle
                // of this loop must still see the closure as reachable
                // (spec §4.7 "Closure creation").
                let closure_id = vm.new_lua_closure(child_id, Vec::with_capacity(nups));
                set_r(vm, base, a, LuaValue::Function(closure_id));

                for i in 0..nups {
                    let pseudo = vm.global.heap.prototypes.get(prototype.0).data.instructions[ip + i];
                    let pop = get_opcode(pseudo);
                    let operand_b = get_b(pseudo);
                    let id = match pop {
                        OpCode::Move => {
                            upvalues::find_or_create(
                                &mut vm.global.heap,
                                &mut vm.main.open_upvalues,
                                base + operand_b as usize,
                            )
                        }
                        OpCode::GetUpval => match &vm.global.heap.closures.get(cur_func.0).data {
                            Closure::Lua { upvalues, .. } => upvalues[operand_b as usize],
                            _ => unreachable!(),
                        },
                        _ => unreachable!("malformed CLOSURE upvalue sequence"),
                    };
                    match &mut vm.global.heap.closures.get_mut(closure_id.0).data {
                        Closure::Lua { upvalues, .. } => upvalues.push(id),
                        _ => unreachable!(),
                    }
                }
            }
            OpCode::Close => {
                upvalues::close_from(
                    &mut vm.global.heap,
                    &mut vm.main.open_upvalues,
                    &vm.main.stack,
                    base + a as usize,
                );
            }
            OpCode::Vararg => {
                let varargs = vm.main.current_frame().varargs.clone();
                let count = if b == 0 { varargs.len() } else { (b - 1) as usize };
                vm.main.ensure_stack(base + a as usize + count);
                for i in 0..count {
                    let v = varargs.get(i).copied().unwrap_or(LuaValue::Nil);
                    set_r(vm, base, a + i as u32, v);
                }
                if b == 0 {
                    vm.main.stack.truncate(base + a as usize + count);
                }
            }
            OpCode::Return => {
                upvalues::close_from(
                    &mut vm.global.heap,
                    &mut vm.main.open_upvalues,
                    &vm.main.stack,
                    base,
                );
                let count = if b == 0 {
                    vm.main.stack.len() - base - a as usize
                } else {
                    (b - 1) as usize
                };
                let values: Vec<LuaValue> = (0..count as u32).map(|i| r(vm, base, a + i)).collect();
                return Ok(values);
            }
        }
    }
}
