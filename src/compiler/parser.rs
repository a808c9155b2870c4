//! Recursive-descent parser with a precedence-climbing expression core
//! (spec §4.6). Ties [`FuncState`] and [`ExprDesc`] together: tokens
//! flow in, bytecode flows out, one prototype per Lua function.

use crate::chunk::opcode::*;
use crate::chunk::{OpCode, UpvalSource};
use crate::compiler::expr::{self, ExprDesc};
use crate::compiler::func_state::{FuncState, VarRef};
use crate::gc::{Heap, PrototypeId};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::LuaValue;
use crate::vm::RuntimeError;

const UNARY_PRIORITY: u8 = 7;
const PARSER_MAX_RECURSE: u32 = 200;
const FIELDS_PER_FLUSH: u32 = 50;

/// Where an already-parsed expression may be stored into.
#[derive(Clone)]
enum AssignTarget {
    Local(u8),
    Upvalue(u32),
    Global(u32),
    Indexed { table: u32, key: u32 },
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    lookahead: Option<Token>,
    heap: &'a mut Heap,
    funcs: Vec<FuncState>,
    depth: u32,
    source_name: String,
}

pub fn compile(heap: &mut Heap, source: &str, source_name: &str) -> Result<PrototypeId, RuntimeError> {
    let mut lexer = Lexer::new(source, source_name.to_string());
    let current = lexer.next_token()?;
    let mut parser = Parser {
        lexer,
        current,
        lookahead: None,
        heap,
        funcs: Vec::new(),
        depth: 0,
        source_name: source_name.to_string(),
    };
    parser.funcs.push(FuncState::new(source_name.to_string()));
    parser.fs_mut().proto.is_vararg = true;
    let body = parser.parse_block()?;
    let _ = body;
    parser.expect(TokenKind::Eof)?;
    let last_line = parser.current.line;
    let fs = parser.funcs.pop().unwrap();
    let proto = fs.finish(last_line);
    Ok(parser.heap.new_prototype(proto))
}

impl<'a> Parser<'a> {
    fn fs(&self) -> &FuncState {
        self.funcs.last().unwrap()
    }

    fn fs_mut(&mut self) -> &mut FuncState {
        self.funcs.last_mut().unwrap()
    }

    fn error(&self, msg: impl Into<String>) -> RuntimeError {
        RuntimeError::syntax(&self.source_name, self.current.line, format!("{} near '{}'", msg.into(), self.current_lexeme()))
    }

    fn current_lexeme(&self) -> String {
        match self.current.kind {
            TokenKind::Eof => "<eof>".to_string(),
            TokenKind::Name | TokenKind::String => self.current.text.clone(),
            TokenKind::Number => self.current.text.clone(),
            other => format!("{:?}", other),
        }
    }

    fn advance(&mut self) -> Result<Token, RuntimeError> {
        let next = match self.lookahead.take() {
            Some(t) => t,
            None => self.lexer.next_token()?,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn peek_ahead(&mut self) -> Result<&Token, RuntimeError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        Ok(self.lookahead.as_ref().unwrap())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> Result<bool, RuntimeError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, RuntimeError> {
        if !self.check(kind) {
            return Err(self.error(format!("'{:?}' expected", kind)));
        }
        self.advance()
    }

    fn expect_name(&mut self) -> Result<String, RuntimeError> {
        if !self.check(TokenKind::Name) {
            return Err(self.error("<name> expected"));
        }
        Ok(self.advance()?.text)
    }

    fn enter_recursion(&mut self) -> Result<(), RuntimeError> {
        self.depth += 1;
        if self.depth > PARSER_MAX_RECURSE {
            return Err(self.error("chunk has too many syntax levels"));
        }
        Ok(())
    }

    fn leave_recursion(&mut self) {
        self.depth -= 1;
    }

    // ---- names / variables -------------------------------------------------

    fn resolve_var(&mut self, level: usize, name: &str) -> VarRef {
        if let Some(reg) = self.funcs[level].resolve_local(name) {
            return VarRef::Local(reg);
        }
        if level == 0 {
            return VarRef::Global;
        }
        match self.resolve_var(level - 1, name) {
            VarRef::Local(reg) => {
                self.funcs[level - 1].mark_captured(reg);
                let idx = self.funcs[level].add_upvalue(name, UpvalSource::ParentLocal(reg));
                VarRef::Upvalue(idx)
            }
            VarRef::Upvalue(parent_idx) => {
                let idx = self.funcs[level].add_upvalue(name, UpvalSource::ParentUpvalue(parent_idx as u8));
                VarRef::Upvalue(idx)
            }
            VarRef::Global => VarRef::Global,
        }
    }

    fn name_expr(&mut self, name: &str) -> ExprDesc {
        let level = self.funcs.len() - 1;
        match self.resolve_var(level, name) {
            VarRef::Local(r) => ExprDesc::Local(r),
            VarRef::Upvalue(i) => ExprDesc::Upvalue(i),
            VarRef::Global => {
                let sid = self.heap.intern_str(name);
                let k = self.fs_mut().add_constant(LuaValue::String(sid));
                ExprDesc::Global(k)
            }
        }
    }

    fn expr_to_target(&mut self, e: ExprDesc) -> Result<AssignTarget, RuntimeError> {
        match e {
            ExprDesc::Local(r) => Ok(AssignTarget::Local(r)),
            ExprDesc::Upvalue(i) => Ok(AssignTarget::Upvalue(i)),
            ExprDesc::Global(k) => Ok(AssignTarget::Global(k)),
            ExprDesc::Indexed { table, key } => Ok(AssignTarget::Indexed { table, key }),
            _ => Err(self.error("syntax error")),
        }
    }

    fn store(&mut self, target: AssignTarget, value: ExprDesc) {
        match target {
            AssignTarget::Local(r) => expr::discharge_to_reg(self.fs_mut(), value, r),
            AssignTarget::Upvalue(i) => {
                let reg = expr::discharge_to_any_reg(self.fs_mut(), value);
                self.fs_mut().emit_abc(OpCode::SetUpval, reg as u32, i, 0);
            }
            AssignTarget::Global(k) => {
                let reg = expr::discharge_to_any_reg(self.fs_mut(), value);
                self.fs_mut().emit_abx(OpCode::SetGlobal, reg as u32, k);
            }
            AssignTarget::Indexed { table, key } => {
                let value_rk = expr::expr_to_rk(self.fs_mut(), value);
                self.fs_mut().emit_abc(OpCode::SetTable, table, key, value_rk);
            }
        }
    }

    // ---- blocks & statements ------------------------------------------------

    fn block_follow(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Eof | TokenKind::End | TokenKind::Else | TokenKind::Elseif | TokenKind::Until
        )
    }

    fn parse_block(&mut self) -> Result<(), RuntimeError> {
        while !self.block_follow() {
            if self.check(TokenKind::Return) {
                self.parse_return_stat()?;
                break;
            }
            self.parse_statement()?;
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), RuntimeError> {
        self.enter_recursion()?;
        let line = self.current.line;
        self.fs_mut().set_line(line);
        let r = match self.current.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            TokenKind::If => self.parse_if_stat(),
            TokenKind::While => self.parse_while_stat(),
            TokenKind::Do => {
                self.advance()?;
                self.fs_mut().enter_block(false);
                self.parse_block()?;
                self.fs_mut().leave_block();
                self.expect(TokenKind::End)?;
                Ok(())
            }
            TokenKind::For => self.parse_for_stat(),
            TokenKind::Repeat => self.parse_repeat_stat(),
            TokenKind::Function => self.parse_function_stat(),
            TokenKind::Local => self.parse_local_stat(),
            TokenKind::Break => {
                self.advance()?;
                self.fs_mut().emit_break().map_err(|_| self.error("no loop to break"))
            }
            _ => self.parse_expr_stat(),
        };
        self.leave_recursion();
        r
    }

    fn parse_return_stat(&mut self) -> Result<(), RuntimeError> {
        let line = self.current.line;
        self.advance()?;
        let parsed = if self.block_follow() || self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr_list()?)
        };
        self.accept(TokenKind::Semicolon)?;
        self.fs_mut().set_line(line);
        let (base, last) = match parsed {
            Some(pair) => pair,
            None => {
                self.fs_mut().emit_abc(OpCode::Return, 0, 1, 0);
                return Ok(());
            }
        };
        let (base, count) = self.finish_list(base, last, None);
        let b = count.map(|n| n as u32 + 1).unwrap_or(0);
        self.fs_mut().emit_abc(OpCode::Return, base as u32, b, 0);
        Ok(())
    }

    fn parse_if_stat(&mut self) -> Result<(), RuntimeError> {
        let mut end_jumps = Vec::new();
        self.advance()?; // if
        let cond = self.parse_expr()?;
        let mut false_jumps = expr::condition_false_jumps(self.fs_mut(), cond);
        self.expect(TokenKind::Then)?;
        self.fs_mut().enter_block(false);
        self.parse_block()?;
        self.fs_mut().leave_block();
        loop {
            match self.current.kind {
                TokenKind::Elseif => {
                    end_jumps.push(self.fs_mut().emit_jump());
                    self.fs_mut().patch_list_to_here(&false_jumps);
                    self.advance()?;
                    let cond = self.parse_expr()?;
                    false_jumps = expr::condition_false_jumps(self.fs_mut(), cond);
                    self.expect(TokenKind::Then)?;
                    self.fs_mut().enter_block(false);
                    self.parse_block()?;
                    self.fs_mut().leave_block();
                }
                TokenKind::Else => {
                    end_jumps.push(self.fs_mut().emit_jump());
                    self.fs_mut().patch_list_to_here(&false_jumps);
                    self.advance()?;
                    self.fs_mut().enter_block(false);
                    self.parse_block()?;
                    self.fs_mut().leave_block();
                    break;
                }
                _ => {
                    self.fs_mut().patch_list_to_here(&false_jumps);
                    break;
                }
            }
        }
        self.expect(TokenKind::End)?;
        self.fs_mut().patch_list_to_here(&end_jumps);
        Ok(())
    }

    fn parse_while_stat(&mut self) -> Result<(), RuntimeError> {
        self.advance()?;
        let init_pc = self.fs().pc();
        let cond = self.parse_expr()?;
        let false_jumps = expr::condition_false_jumps(self.fs_mut(), cond);
        self.expect(TokenKind::Do)?;
        self.fs_mut().enter_block(true);
        self.parse_block()?;
        self.fs_mut().leave_block();
        let back = self.fs_mut().emit_jump();
        self.fs_mut().patch_jump_to(back, init_pc);
        self.fs_mut().patch_list_to_here(&false_jumps);
        self.expect(TokenKind::End)?;
        Ok(())
    }

    fn parse_repeat_stat(&mut self) -> Result<(), RuntimeError> {
        self.advance()?;
        let init_pc = self.fs().pc();
        self.fs_mut().enter_block(true);
        self.parse_block()?;
        self.expect(TokenKind::Until)?;
        // locals from the body are still visible while the condition is parsed.
        let cond = self.parse_expr()?;
        let false_jumps = expr::condition_false_jumps(self.fs_mut(), cond);
        self.fs_mut().leave_block();
        // Falsy means "keep repeating"; truthy falls through and exits.
        for pc in false_jumps {
            self.fs_mut().patch_jump_to(pc, init_pc);
        }
        Ok(())
    }

    fn parse_for_stat(&mut self) -> Result<(), RuntimeError> {
        self.advance()?; // for
        let first_name = self.expect_name()?;
        if self.check(TokenKind::Assign) {
            self.parse_numeric_for(first_name)
        } else {
            self.parse_generic_for(first_name)
        }
    }

    fn parse_numeric_for(&mut self, var_name: String) -> Result<(), RuntimeError> {
        self.advance()?; // =
        let init = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let limit = self.parse_expr()?;
        let step = if self.accept(TokenKind::Comma)? {
            self.parse_expr()?
        } else {
            ExprDesc::Number(1.0)
        };
        self.fs_mut().enter_block(true);
        let base = self.fs_mut().reserve_regs(3);
        expr::discharge_to_reg(self.fs_mut(), init, base);
        expr::discharge_to_reg(self.fs_mut(), limit, base + 1);
        expr::discharge_to_reg(self.fs_mut(), step, base + 2);
        let prep_pc = self.fs_mut().emit_asbx(OpCode::ForPrep, base as u32, 0);
        self.expect(TokenKind::Do)?;
        self.fs_mut().push_local(var_name);
        self.fs_mut().start_local();
        let body_start = self.fs().pc();
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        let loop_pc = self.fs_mut().emit_asbx(OpCode::ForLoop, base as u32, 0);
        self.fs_mut().patch_jump_to(prep_pc, loop_pc);
        self.fs_mut().patch_jump_to(loop_pc, body_start);
        self.fs_mut().leave_block();
        Ok(())
    }

    fn parse_generic_for(&mut self, first_name: String) -> Result<(), RuntimeError> {
        let mut names = vec![first_name];
        while self.accept(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In)?;
        let parsed = self.parse_expr_list()?;
        self.fs_mut().enter_block(true);
        let regs = self.adjust_list(Some(parsed), 3);
        let base = regs[0];
        self.expect(TokenKind::Do)?;
        for name in &names {
            self.fs_mut().push_local(name.clone());
        }
        for _ in 0..names.len() {
            self.fs_mut().start_local();
        }
        // An initial forward jump lets the generator run once (via the
        // FOR_IN check below) before the body's first execution.
        let init_jump = self.fs_mut().emit_jump();
        let loop_start = self.fs().pc();
        self.parse_block()?;
        self.expect(TokenKind::End)?;
        let check_pc = self.fs().pc();
        self.fs_mut().patch_jump_to(init_jump, check_pc);
        self.fs_mut()
            .emit_abc(OpCode::ForIn, base as u32, 0, names.len() as u32);
        let back = self.fs_mut().emit_jump();
        self.fs_mut().patch_jump_to(back, loop_start);
        self.fs_mut().leave_block();
        Ok(())
    }

    fn parse_function_stat(&mut self) -> Result<(), RuntimeError> {
        self.advance()?; // function
        let first = self.expect_name()?;
        let mut target_expr = self.name_expr(&first);
        let mut is_method = false;
        let mut last_name = first;
        loop {
            if self.accept(TokenKind::Dot)? {
                let field = self.expect_name()?;
                last_name = field.clone();
                target_expr = self.index_field(target_expr, &field)?;
            } else if self.accept(TokenKind::Colon)? {
                let field = self.expect_name()?;
                last_name = field.clone();
                target_expr = self.index_field(target_expr, &field)?;
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let _ = last_name;
        let target = self.expr_to_target(target_expr)?;
        let closure = self.parse_function_body(is_method)?;
        self.store(target, closure);
        Ok(())
    }

    fn parse_local_stat(&mut self) -> Result<(), RuntimeError> {
        self.advance()?; // local
        if self.accept(TokenKind::Function)? {
            let name = self.expect_name()?;
            self.fs_mut().push_local(name);
            self.fs_mut().start_local();
            let reg = self.fs().last_local_slot();
            let closure = self.parse_function_body(false)?;
            expr::discharge_to_reg(self.fs_mut(), closure, reg);
            return Ok(());
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        let parsed = if self.accept(TokenKind::Assign)? {
            Some(self.parse_expr_list()?)
        } else {
            None
        };
        let n = names.len();
        // Values already sit in registers base..base+n; re-claim them as
        // the locals' own slots instead of allocating fresh ones.
        let regs = self.adjust_list(parsed, n);
        self.fs_mut().free_to(regs[0]);
        for name in names {
            self.fs_mut().push_local(name);
        }
        for _ in 0..n {
            self.fs_mut().start_local();
        }
        Ok(())
    }

    fn parse_expr_stat(&mut self) -> Result<(), RuntimeError> {
        let first = self.parse_suffixed_expr()?;
        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![self.expr_to_target(first)?];
            while self.accept(TokenKind::Comma)? {
                let e = self.parse_suffixed_expr()?;
                targets.push(self.expr_to_target(e)?);
            }
            self.expect(TokenKind::Assign)?;
            let parsed = self.parse_expr_list()?;
            let regs = self.adjust_list(Some(parsed), targets.len());
            for i in (0..targets.len()).rev() {
                let target = targets[i].clone();
                self.store(target, ExprDesc::NonReloc(regs[i]));
            }
            Ok(())
        } else {
            match first {
                ExprDesc::MultiRet(pc) => {
                    // A bare call statement discards every result.
                    expr::set_multi_ret_count(self.fs_mut(), pc, 0);
                }
                _ => return Err(self.error("syntax error")),
            }
            Ok(())
        }
    }

    // ---- function literals --------------------------------------------------

    fn parse_function_body(&mut self, is_method: bool) -> Result<ExprDesc, RuntimeError> {
        let line = self.current.line;
        self.funcs.push(FuncState::new(self.source_name.clone()));
        self.fs_mut().proto.line_defined = line;
        if is_method {
            self.fs_mut().push_local("self".to_string());
            self.fs_mut().start_local();
        }
        self.expect(TokenKind::LParen)?;
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.accept(TokenKind::Ellipsis)? {
                    is_vararg = true;
                    break;
                }
                let name = self.expect_name()?;
                self.fs_mut().push_local(name);
                self.fs_mut().start_local();
                if !self.accept(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.fs_mut().proto.is_vararg = is_vararg;
        self.fs_mut().proto.num_params = self.fs().active_local_count() as u8;
        self.parse_block()?;
        let last_line = self.current.line;
        self.expect(TokenKind::End)?;
        let child_fs = self.funcs.pop().unwrap();
        let child_proto = child_fs.finish(last_line);
        let upvalues = child_proto.upvalues.clone();
        let child_id = self.heap.new_prototype(child_proto);
        let children_idx = self.fs().proto.children.len() as u32;
        self.fs_mut().proto.children.push(child_id);
        let pc = self.fs_mut().emit_abx(OpCode::Closure, 0, children_idx);
        for up in upvalues {
            match up.source {
                UpvalSource::ParentLocal(reg) => {
                    self.fs_mut().emit_abc(OpCode::Move, 0, reg as u32, 0);
                }
                UpvalSource::ParentUpvalue(idx) => {
                    self.fs_mut().emit_abc(OpCode::GetUpval, 0, idx as u32, 0);
                }
            }
        }
        Ok(ExprDesc::Relocable(pc))
    }

    fn index_field(&mut self, table: ExprDesc, field: &str) -> Result<ExprDesc, RuntimeError> {
        let treg = expr::discharge_to_any_reg(self.fs_mut(), table);
        let sid = self.heap.intern_str(field);
        let k = self.fs_mut().add_constant(LuaValue::String(sid));
        let key_rk = rk_constant(k);
        Ok(ExprDesc::Indexed { table: treg as u32, key: key_rk })
    }

    // ---- expression lists & multi-value adjustment ---------------------------

    /// Parses a comma-separated expression list. Every element except the
    /// last is discharged into the next free register as soon as it is
    /// parsed, so that a later element's own temporaries (a nested call's
    /// argument window, say) can't be handed registers earlier elements
    /// were still waiting to land in. The last element is left live,
    /// since the caller decides how many values it should expand to.
    fn parse_expr_list(&mut self) -> Result<(u8, ExprDesc), RuntimeError> {
        let base = self.fs().free_reg;
        let mut e = self.parse_expr()?;
        while self.accept(TokenKind::Comma)? {
            expr::discharge_to_next_reg(self.fs_mut(), e);
            e = self.parse_expr()?;
        }
        Ok((base, e))
    }

    /// Finishes a list produced by [`Self::parse_expr_list`]: expands a
    /// trailing call/vararg to fill `want` slots (`None` means "to top",
    /// i.e. MULTRET), or discharges it as a single value otherwise.
    fn finish_list(&mut self, base: u8, last: ExprDesc, want: Option<usize>) -> (u8, Option<usize>) {
        let fixed_before = (self.fs().free_reg - base) as usize;
        match (last, want) {
            (ExprDesc::MultiRet(pc), None) => {
                expr::set_multi_ret_count(self.fs_mut(), pc, 0);
                (base, None)
            }
            (ExprDesc::MultiRet(pc), Some(want)) => {
                let extra = want.saturating_sub(fixed_before).max(1);
                if extra > 1 {
                    self.fs_mut().reserve_regs((extra - 1) as u8);
                }
                expr::set_multi_ret_count(self.fs_mut(), pc, extra as u32);
                (base, Some(fixed_before + extra))
            }
            (other, _) => {
                expr::discharge_to_next_reg(self.fs_mut(), other);
                (base, Some(fixed_before + 1))
            }
        }
    }

    /// Adjusts an already-parsed (or absent) explist to exactly `want`
    /// values in fresh consecutive registers, padding with nil or
    /// discarding extras as needed.
    fn adjust_list(&mut self, parsed: Option<(u8, ExprDesc)>, want: usize) -> Vec<u8> {
        let (base, got) = match parsed {
            Some((base, last)) => self.finish_list(base, last, Some(want)),
            None => (self.fs().free_reg, Some(0)),
        };
        let got = got.unwrap_or(want);
        for i in got..want {
            let r = self.fs_mut().reserve_reg();
            self.fs_mut().emit_abc(OpCode::LoadNil, r as u32, r as u32, 0);
        }
        self.fs_mut().free_to(base + want as u8);
        (0..want).map(|i| base + i as u8).collect()
    }

    // ---- expressions ----------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprDesc, RuntimeError> {
        self.parse_subexpr(0)
    }

    fn parse_subexpr(&mut self, limit: u8) -> Result<ExprDesc, RuntimeError> {
        self.enter_recursion()?;
        let mut e = if let Some(op) = unary_op(self.current.kind) {
            self.advance()?;
            let operand = self.parse_subexpr(UNARY_PRIORITY)?;
            self.apply_unary(op, operand)?
        } else {
            self.parse_simple_expr()?
        };
        loop {
            let Some((op, left_prio, right_prio)) = binary_op(self.current.kind) else {
                break;
            };
            if left_prio <= limit {
                break;
            }
            self.advance()?;
            e = match op {
                // 'and'/'or' must emit their skip-jump *before* the rhs is
                // parsed, or there is nothing left to jump over.
                BinOp::And => self.parse_and_tail(e, right_prio)?,
                BinOp::Or => self.parse_or_tail(e, right_prio)?,
                _ => {
                    let rhs = self.parse_subexpr(right_prio)?;
                    self.apply_binary(op, e, rhs)?
                }
            };
        }
        self.leave_recursion();
        Ok(e)
    }

    fn parse_and_tail(&mut self, lhs: ExprDesc, right_prio: u8) -> Result<ExprDesc, RuntimeError> {
        let reg = self.fs_mut().reserve_reg();
        expr::discharge_to_reg(self.fs_mut(), lhs, reg);
        self.fs_mut().free_to(reg + 1);
        self.fs_mut().emit_abc(OpCode::Test, reg as u32, 0, 1);
        let skip = self.fs_mut().emit_jump();
        let rhs = self.parse_subexpr(right_prio)?;
        expr::discharge_to_reg(self.fs_mut(), rhs, reg);
        self.fs_mut().patch_list_to_here(&[skip]);
        Ok(ExprDesc::NonReloc(reg))
    }

    fn parse_or_tail(&mut self, lhs: ExprDesc, right_prio: u8) -> Result<ExprDesc, RuntimeError> {
        let reg = self.fs_mut().reserve_reg();
        expr::discharge_to_reg(self.fs_mut(), lhs, reg);
        self.fs_mut().free_to(reg + 1);
        self.fs_mut().emit_abc(OpCode::Test, reg as u32, 0, 0);
        let skip = self.fs_mut().emit_jump();
        let rhs = self.parse_subexpr(right_prio)?;
        expr::discharge_to_reg(self.fs_mut(), rhs, reg);
        self.fs_mut().patch_list_to_here(&[skip]);
        Ok(ExprDesc::NonReloc(reg))
    }

    fn parse_simple_expr(&mut self) -> Result<ExprDesc, RuntimeError> {
        match self.current.kind {
            TokenKind::Nil => {
                self.advance()?;
                Ok(ExprDesc::Nil)
            }
            TokenKind::True => {
                self.advance()?;
                Ok(ExprDesc::True)
            }
            TokenKind::False => {
                self.advance()?;
                Ok(ExprDesc::False)
            }
            TokenKind::Number => {
                let n = self.advance()?.number;
                Ok(ExprDesc::Number(n))
            }
            TokenKind::String => {
                let text = self.advance()?.text;
                let sid = self.heap.intern_str(&text);
                let k = self.fs_mut().add_constant(LuaValue::String(sid));
                Ok(ExprDesc::Const(k))
            }
            TokenKind::Ellipsis => {
                self.advance()?;
                if !self.fs().proto.is_vararg {
                    return Err(self.error("cannot use '...' outside a vararg function"));
                }
                let a = self.fs_mut().reserve_reg();
                let pc = self.fs_mut().emit_abc(OpCode::Vararg, a as u32, 0, 0);
                Ok(ExprDesc::MultiRet(pc))
            }
            TokenKind::Function => {
                self.advance()?;
                self.parse_function_body(false)
            }
            TokenKind::LBrace => self.parse_table_constructor(),
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<ExprDesc, RuntimeError> {
        match self.current.kind {
            TokenKind::LParen => {
                self.advance()?;
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                // Parens truncate a multi-value expression to exactly one.
                Ok(match e {
                    ExprDesc::MultiRet(pc) => {
                        let reg = expr::discharge_to_any_reg(self.fs_mut(), ExprDesc::MultiRet(pc));
                        ExprDesc::NonReloc(reg)
                    }
                    other => other,
                })
            }
            TokenKind::Name => {
                let name = self.advance()?.text;
                Ok(self.name_expr(&name))
            }
            _ => Err(self.error("unexpected symbol")),
        }
    }

    fn parse_suffixed_expr(&mut self) -> Result<ExprDesc, RuntimeError> {
        let mut e = self.parse_primary_expr()?;
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let field = self.expect_name()?;
                    e = self.index_field(e, &field)?;
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let treg = expr::discharge_to_any_reg(self.fs_mut(), e);
                    let key_rk = expr::expr_to_rk(self.fs_mut(), key);
                    e = ExprDesc::Indexed { table: treg as u32, key: key_rk };
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let treg = expr::discharge_to_any_reg(self.fs_mut(), e);
                    let sid = self.heap.intern_str(&method);
                    let k = self.fs_mut().add_constant(LuaValue::String(sid));
                    let base = self.fs_mut().reserve_regs(2);
                    self.fs_mut().emit_abc(OpCode::SelfOp, base as u32, treg as u32, rk_constant(k));
                    e = self.parse_call_args(base, 2)?;
                }
                TokenKind::LParen | TokenKind::String | TokenKind::LBrace => {
                    let freg = expr::discharge_to_next_reg(self.fs_mut(), e);
                    e = self.parse_call_args(freg, 1)?;
                }
                _ => break,
            }
        }
        Ok(e)
    }

    /// Parses the argument list of a call whose function (and, for
    /// method calls, implicit `self`) already occupies `nfixed`
    /// consecutive registers starting at `base`.
    fn parse_call_args(&mut self, base: u8, nfixed: u8) -> Result<ExprDesc, RuntimeError> {
        self.fs_mut().free_to(base + nfixed);
        let parsed = match self.current.kind {
            TokenKind::LParen => {
                self.advance()?;
                let parsed = if self.check(TokenKind::RParen) {
                    None
                } else {
                    Some(self.parse_expr_list()?)
                };
                self.expect(TokenKind::RParen)?;
                parsed
            }
            TokenKind::String => {
                let text = self.advance()?.text;
                let sid = self.heap.intern_str(&text);
                let k = self.fs_mut().add_constant(LuaValue::String(sid));
                Some((self.fs().free_reg, ExprDesc::Const(k)))
            }
            TokenKind::LBrace => {
                let list_base = self.fs().free_reg;
                let e = self.parse_table_constructor()?;
                Some((list_base, e))
            }
            _ => return Err(self.error("function arguments expected")),
        };
        let (_, count) = match parsed {
            Some((list_base, last)) => self.finish_list(list_base, last, None),
            None => (self.fs().free_reg, Some(0)),
        };
        let b = count.map(|n| n as u32 + 1).unwrap_or(0);
        let pc = self.fs_mut().emit_abc(OpCode::Call, base as u32, b, 0);
        self.fs_mut().free_to(base + 1);
        Ok(ExprDesc::MultiRet(pc))
    }

    fn parse_table_constructor(&mut self) -> Result<ExprDesc, RuntimeError> {
        self.expect(TokenKind::LBrace)?;
        let table_pc = self.fs_mut().emit_abc(OpCode::NewTable, 0, 0, 0);
        let table_reg = self.fs_mut().reserve_reg();
        let mut n_array = 0u32;
        let mut n_hash = 0u32;
        let mut pending_array = 0u32;
        let mut flushed_batches = 0u32;
        let batch_base = table_reg + 1;
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::LBracket) {
                self.advance()?;
                let key = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                let key_rk = expr::expr_to_rk(self.fs_mut(), key);
                let value_rk = expr::expr_to_rk(self.fs_mut(), value);
                self.fs_mut().emit_abc(OpCode::SetTable, table_reg as u32, key_rk, value_rk);
                n_hash += 1;
            } else if self.check(TokenKind::Name) && *self.peek_ahead()?.kind_ref() == TokenKind::Assign {
                let name = self.expect_name()?;
                self.advance()?; // =
                let value = self.parse_expr()?;
                let sid = self.heap.intern_str(&name);
                let k = self.fs_mut().add_constant(LuaValue::String(sid));
                let value_rk = expr::expr_to_rk(self.fs_mut(), value);
                self.fs_mut()
                    .emit_abc(OpCode::SetTable, table_reg as u32, rk_constant(k), value_rk);
                n_hash += 1;
            } else {
                let is_last_field = {
                    let e = self.parse_expr()?;
                    let at_end = self.check(TokenKind::RBrace);
                    if at_end {
                        if let ExprDesc::MultiRet(pc) = e {
                            self.fs_mut().free_to(batch_base + pending_array as u8);
                            expr::set_multi_ret_count(self.fs_mut(), pc, 0);
                            n_array += 1;
                            true
                        } else {
                            let r = self.fs_mut().reserve_reg();
                            expr::discharge_to_reg(self.fs_mut(), e, r);
                            pending_array += 1;
                            n_array += 1;
                            false
                        }
                    } else {
                        let r = self.fs_mut().reserve_reg();
                        expr::discharge_to_reg(self.fs_mut(), e, r);
                        pending_array += 1;
                        n_array += 1;
                        false
                    }
                };
                if is_last_field {
                    self.fs_mut()
                        .emit_abc(OpCode::SetArray, table_reg as u32, 0, flushed_batches);
                    pending_array = 0;
                } else if pending_array >= FIELDS_PER_FLUSH {
                    self.fs_mut()
                        .emit_abc(OpCode::SetArray, table_reg as u32, pending_array, flushed_batches);
                    self.fs_mut().free_to(batch_base);
                    flushed_batches += 1;
                    pending_array = 0;
                }
            }
            if !self.accept(TokenKind::Comma)? && !self.accept(TokenKind::Semicolon)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        if pending_array > 0 {
            self.fs_mut()
                .emit_abc(OpCode::SetArray, table_reg as u32, pending_array, flushed_batches);
        }
        self.fs_mut().free_to(table_reg + 1);
        let array_hint = encode_floating_byte(n_array);
        let hash_hint = encode_floating_byte(n_hash);
        self.fs_mut().proto.instructions[table_pc] =
            encode_abc(OpCode::NewTable, table_reg as u32, hash_hint as u32, array_hint as u32);
        Ok(ExprDesc::NonReloc(table_reg))
    }

    // ---- operators --------------------------------------------------------

    fn apply_unary(&mut self, op: UnOp, e: ExprDesc) -> Result<ExprDesc, RuntimeError> {
        if let (UnOp::Minus, ExprDesc::Number(n)) = (op, &e) {
            return Ok(ExprDesc::Number(-n));
        }
        let reg = expr::discharge_to_any_reg(self.fs_mut(), e);
        let code = match op {
            UnOp::Minus => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        let r = self.fs_mut().reserve_reg();
        self.fs_mut().emit_abc(code, r as u32, reg as u32, 0);
        Ok(ExprDesc::NonReloc(r))
    }

    fn apply_binary(&mut self, op: BinOp, lhs: ExprDesc, rhs: ExprDesc) -> Result<ExprDesc, RuntimeError> {
        match op {
            BinOp::And | BinOp::Or => unreachable!("short-circuit ops resolved in parse_subexpr"),
            BinOp::Concat => Ok(self.compile_concat(lhs, rhs)),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                Ok(self.compile_arith(op, lhs, rhs))
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                Ok(self.compile_compare(op, lhs, rhs))
            }
        }
    }

    fn compile_concat(&mut self, lhs: ExprDesc, rhs: ExprDesc) -> ExprDesc {
        let l = expr::discharge_to_next_reg(self.fs_mut(), lhs);
        let r = expr::discharge_to_next_reg(self.fs_mut(), rhs);
        self.fs_mut().free_to(l + 1);
        let dest = self.fs_mut().reserve_reg();
        self.fs_mut().emit_abc(OpCode::Concat, dest as u32, l as u32, r as u32);
        ExprDesc::NonReloc(dest)
    }

    fn compile_arith(&mut self, op: BinOp, lhs: ExprDesc, rhs: ExprDesc) -> ExprDesc {
        if let (ExprDesc::Number(a), ExprDesc::Number(b)) = (&lhs, &rhs) {
            if let Some(folded) = fold_arith(op, *a, *b) {
                return ExprDesc::Number(folded);
            }
        }
        let b = expr::expr_to_rk(self.fs_mut(), lhs);
        let c = expr::expr_to_rk(self.fs_mut(), rhs);
        let code = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            _ => unreachable!(),
        };
        let r = self.fs_mut().reserve_reg();
        self.fs_mut().emit_abc(code, r as u32, b, c);
        ExprDesc::NonReloc(r)
    }

    fn compile_compare(&mut self, op: BinOp, lhs: ExprDesc, rhs: ExprDesc) -> ExprDesc {
        // '>' / '>=' invert by swapping operands and reusing LT/LE.
        let (code, a_bool, lhs, rhs) = match op {
            BinOp::Eq => (OpCode::Eq, 1u32, lhs, rhs),
            BinOp::Ne => (OpCode::Eq, 0u32, lhs, rhs),
            BinOp::Lt => (OpCode::Lt, 1u32, lhs, rhs),
            BinOp::Le => (OpCode::Le, 1u32, lhs, rhs),
            BinOp::Gt => (OpCode::Lt, 1u32, rhs, lhs),
            BinOp::Ge => (OpCode::Le, 1u32, rhs, lhs),
            _ => unreachable!(),
        };
        let b = expr::expr_to_rk(self.fs_mut(), lhs);
        let c = expr::expr_to_rk(self.fs_mut(), rhs);
        self.fs_mut().emit_abc(code, a_bool, b, c);
        let jump = self.fs_mut().emit_jump();
        ExprDesc::Jump {
            true_jumps: Vec::new(),
            false_jumps: vec![jump],
        }
    }
}

trait TokenKindRef {
    fn kind_ref(&self) -> &TokenKind;
}

impl TokenKindRef for Token {
    fn kind_ref(&self) -> &TokenKind {
        &self.kind
    }
}

#[derive(Clone, Copy)]
enum UnOp {
    Minus,
    Not,
    Len,
}

#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

fn unary_op(kind: TokenKind) -> Option<UnOp> {
    match kind {
        TokenKind::Minus => Some(UnOp::Minus),
        TokenKind::Not => Some(UnOp::Not),
        TokenKind::Hash => Some(UnOp::Len),
        _ => None,
    }
}

/// `(op, left_priority, right_priority)`; right < left means
/// right-associative.
fn binary_op(kind: TokenKind) -> Option<(BinOp, u8, u8)> {
    use TokenKind::*;
    Some(match kind {
        Or => (BinOp::Or, 1, 1),
        And => (BinOp::And, 2, 2),
        Lt => (BinOp::Lt, 3, 3),
        Gt => (BinOp::Gt, 3, 3),
        Le => (BinOp::Le, 3, 3),
        Ge => (BinOp::Ge, 3, 3),
        Ne => (BinOp::Ne, 3, 3),
        Eq => (BinOp::Eq, 3, 3),
        Concat => (BinOp::Concat, 5, 4),
        Plus => (BinOp::Add, 6, 6),
        Minus => (BinOp::Sub, 6, 6),
        Star => (BinOp::Mul, 7, 7),
        Slash => (BinOp::Div, 7, 7),
        Percent => (BinOp::Mod, 7, 7),
        Caret => (BinOp::Pow, 10, 9),
        _ => return None,
    })
}

fn fold_arith(op: BinOp, a: f64, b: f64) -> Option<f64> {
    match op {
        BinOp::Add => Some(a + b),
        BinOp::Sub => Some(a - b),
        BinOp::Mul => Some(a * b),
        BinOp::Div if b != 0.0 => Some(a / b),
        BinOp::Mod if b != 0.0 => Some(a - (a / b).floor() * b),
        BinOp::Pow => Some(a.powf(b)),
        _ => None,
    }
}
