//! The fused statement/expression parser + code generator (C6): one
//! recursive-descent pass from tokens straight to a [`Proto`] tree, no
//! intermediate AST.
//!
//! Grounded on the overall register-stack discipline demonstrated by
//! `luars::compiler::expdesc_example` (`exp_to_next_reg`, "delay codegen
//! until the target register is known"), simplified here to a more direct
//! scheme since this crate's opcode set has no `GETTABUP`/`_ENV` upvalue to
//! thread through: expressions are compiled eagerly into registers rather
//! than carried as a lazy `ExpDesc` until use. Conditions in `if`/`while`/
//! `repeat` always materialize a genuine boolean into a register and
//! `TEST` it, rather than real Lua's direct comparison-to-jump fusion —
//! correct, a few extra instructions, much simpler to get right without a
//! compiler to check the work against (documented in `DESIGN.md`).

use std::rc::Rc;

use crate::compiler::func_state::{self, Attrib, FuncState};
use crate::compiler::lexer::{Lexer, Token};
use crate::value::{Proto, StringInterner, UpvalueDesc, Value};
use crate::vm::error::{ErrorKind, LuaError};
use crate::vm::instruction::{self};
use crate::vm::opcode::OpCode;

const MAX_FUNC_DEPTH: usize = 200;

/// What an expression compiled to, before it's consumed by whatever needs
/// its value (an RK operand, a fresh register, an assignment target, ...).
enum ExprVal {
    Const(Value),
    Local(u8, Attrib),
    Upvalue(u8),
    /// Constant-pool index of the global's name.
    Global(u8),
    Reg(u8),
    /// A table index not yet read (`obj` already in a register, `key`
    /// already RK-encoded) — rvalue contexts turn this into a `GETTABLE`;
    /// lvalue contexts leave it as the assignment target.
    Index { obj: u8, key: u32 },
    /// A `CALL`/`VARARG` left open (`C` field still `0`, meaning "all
    /// results") at instruction `pc`, first result landing in `reg`.
    Open { pc: usize, reg: u8 },
    Vararg,
}

pub fn compile_chunk(source: &str, chunk_name: &str, strings: &mut StringInterner) -> Result<Rc<Proto>, LuaError> {
    let mut parser = Parser::new(source, chunk_name, strings)?;
    parser.parse_main_chunk()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    cur_token: Token,
    cur_line: u32,
    funcs: Vec<FuncState>,
    strings: &'a mut StringInterner,
    chunk_name: String,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, chunk_name: &str, strings: &'a mut StringInterner) -> Result<Self, LuaError> {
        let mut lexer = Lexer::new(source, chunk_name);
        let first = lexer.next_lexeme().map_err(|e| e)?;
        Ok(Parser {
            lexer,
            cur_token: first.token,
            cur_line: first.line,
            funcs: Vec::new(),
            strings,
            chunk_name: chunk_name.to_string(),
        })
    }

    // ---- token stream helpers --------------------------------------------

    fn err(&self, msg: impl Into<String>) -> LuaError {
        LuaError::new(ErrorKind::SyntaxError, format!("{}:{}: {}", self.chunk_name, self.cur_line, msg.into()))
    }

    fn advance(&mut self) -> Result<(), LuaError> {
        let lex = self.lexer.next_lexeme()?;
        self.cur_token = lex.token;
        self.cur_line = lex.line;
        Ok(())
    }

    fn check(&self, tok: &Token) -> bool {
        &self.cur_token == tok
    }

    fn accept(&mut self, tok: &Token) -> Result<bool, LuaError> {
        if self.check(tok) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), LuaError> {
        if self.check(&tok) {
            self.advance()
        } else {
            Err(self.err(format!("'{}' expected near {}", what, self.cur_token.describe())))
        }
    }

    fn expect_name(&mut self) -> Result<String, LuaError> {
        match self.cur_token.clone() {
            Token::Name(n) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.err(format!("<name> expected near {}", self.cur_token.describe()))),
        }
    }

    fn block_follows(&self) -> bool {
        matches!(self.cur_token, Token::Eof | Token::End | Token::Else | Token::Elseif | Token::Until)
    }

    fn suffix_follows(&self) -> bool {
        matches!(self.cur_token, Token::Dot | Token::LBracket | Token::Colon | Token::LParen | Token::LBrace | Token::Str(_))
    }

    // ---- func-state stack --------------------------------------------------

    fn fs(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("no active function")
    }

    fn fs_ref(&self) -> &FuncState {
        self.funcs.last().expect("no active function")
    }

    fn level(&self) -> usize {
        self.funcs.len() - 1
    }

    // ---- chunk / function entry ------------------------------------------

    fn parse_main_chunk(&mut self) -> Result<Rc<Proto>, LuaError> {
        let mut main = FuncState::new(self.chunk_name.clone(), self.chunk_name.clone());
        main.proto.is_vararg = true;
        main.proto.line_defined = 0;
        self.funcs.push(main);
        self.fs().enter_block(false);
        self.parse_block()?;
        if !self.check(&Token::Eof) {
            return Err(self.err(format!("'<eof>' expected near {}", self.cur_token.describe())));
        }
        self.close_block_checked()?;
        self.fs().emit_abc(OpCode::Return, 0, 1, 0);
        self.fs().sync_max_stack();
        let mut func = self.funcs.pop().unwrap();
        func.proto.last_line_defined = self.cur_line;
        Ok(Rc::new(func.proto))
    }

    /// Pops the innermost block, re-raising any `goto` that didn't resolve
    /// inside it against the next-enclosing block, or erroring if there is
    /// none (spec §4.2 "Structural validity": "no visible label").
    fn close_block_checked(&mut self) -> Result<(), LuaError> {
        let leftover = self.fs().leave_block()?;
        if leftover.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.fs().blocks.last_mut() {
            parent.gotos.extend(leftover);
            Ok(())
        } else {
            let name = &leftover[0].name;
            Err(self.err(format!("no visible label '{name}' for goto")))
        }
    }

    // ---- blocks / statements -----------------------------------------------

    fn parse_block(&mut self) -> Result<(), LuaError> {
        while !self.block_follows() {
            if self.check(&Token::Return) {
                self.parse_return_statement()?;
                break;
            }
            self.parse_statement()?;
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), LuaError> {
        match self.cur_token.clone() {
            Token::Semi => self.advance(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Do => {
                self.advance()?;
                self.fs().enter_block(false);
                self.parse_block()?;
                self.expect(Token::End, "end")?;
                self.close_block_checked()
            }
            Token::For => self.parse_for(),
            Token::Repeat => self.parse_repeat(),
            Token::Function => self.parse_function_stat(),
            Token::Local => self.parse_local(),
            Token::DColon => self.parse_label(),
            Token::Break => self.parse_break(),
            Token::Goto => self.parse_goto(),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_return_statement(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let base = self.fs().free_reg;
        let count = if self.block_follows() || self.check(&Token::Semi) {
            0
        } else {
            self.compile_expr_list(-1)?
        };
        self.accept(&Token::Semi)?;
        let b = if count == u32::MAX { 0 } else { count as u32 + 1 };
        self.fs().emit_abc(OpCode::Return, base as u32, b, 0);
        Ok(())
    }

    fn parse_break(&mut self) -> Result<(), LuaError> {
        let line = self.cur_line;
        self.advance()?;
        let loop_first_reg = self.fs().blocks.iter().rev().find(|b| b.is_loop).map(|b| b.first_reg);
        let Some(first_reg) = loop_first_reg else {
            return Err(LuaError::new(ErrorKind::SyntaxError, format!("{}:{}: break outside a loop", self.chunk_name, line)));
        };
        // mode=2 closes both upvalues and <close> locals in scopes at or
        // above the loop's own, per spec §4.7.
        self.fs().emit_abc(OpCode::Close, first_reg as u32, 2, 0);
        let jmp = self.fs().emit_jmp();
        for block in self.fs().blocks.iter_mut().rev() {
            if block.is_loop {
                block.break_jumps.push(jmp);
                break;
            }
        }
        Ok(())
    }

    fn parse_goto(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let name = self.expect_name()?;
        let line = self.cur_line;
        if let Some((label, _depth)) = self.fs_ref().find_label(&name) {
            // Backward goto: close (and invoke __close on) every local
            // declared since the label, so upvalues captured in this pass
            // get a fresh identity next time around (spec §4.7).
            let current_active = self.fs().num_active_locals();
            if current_active > label.num_active_locals {
                if let Some(reg) = self.fs().register_at_local_index(label.num_active_locals) {
                    self.fs().emit_abc(OpCode::Close, reg as u32, 2, 0);
                }
            }
            self.fs().emit_asbx(OpCode::Jmp, 0, 0);
            let pc = self.fs().here() - 1;
            self.fs().patch_jump_to(pc, label.pc as usize);
            return Ok(());
        }
        // Forward goto: the label hasn't been seen yet, so the exact set of
        // locals it will cross isn't known. Conservatively close anything
        // declared in the innermost enclosing block — covers a goto leaving
        // its own block; one leaving several nested blocks at once only
        // gets the innermost closed here.
        if let Some(reg) = self.fs().blocks.last().map(|b| b.first_reg) {
            self.fs().emit_abc(OpCode::Close, reg as u32, 2, 0);
        }
        let jmp_pc = self.fs().emit_jmp();
        let active = self.fs().num_active_locals();
        self.fs().blocks.last_mut().expect("goto outside any block").gotos.push(func_state::GotoUse {
            name,
            jmp_pc,
            num_active_locals: active,
            line,
        });
        Ok(())
    }

    fn parse_label(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let name = self.expect_name()?;
        self.expect(Token::DColon, "::")?;
        let line = self.cur_line;
        self.fs().declare_label(name.clone(), line)?;
        let here = self.fs().here() as u32;
        let label_active = self.fs().num_active_locals();
        let pending = std::mem::take(&mut self.fs().blocks.last_mut().unwrap().gotos);
        let mut remaining = Vec::new();
        for g in pending {
            if g.name == name {
                if label_active > g.num_active_locals {
                    return Err(LuaError::new(
                        ErrorKind::GotoScope,
                        format!("{}:{}: <goto {}> jumps into the scope of a local variable", self.chunk_name, g.line, g.name),
                    ));
                }
                self.fs().patch_jump_to(g.jmp_pc, here as usize);
            } else {
                remaining.push(g);
            }
        }
        self.fs().blocks.last_mut().unwrap().gotos = remaining;
        Ok(())
    }

    fn parse_if(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let mut end_jumps = Vec::new();
        let mut false_jumps = self.parse_cond_materialized()?;
        self.expect(Token::Then, "then")?;
        self.fs().enter_block(false);
        self.parse_block()?;
        self.close_block_checked()?;
        while self.check(&Token::Elseif) {
            end_jumps.push(self.fs().emit_jmp());
            let here = self.fs().here();
            for pc in false_jumps.drain(..) {
                self.fs().patch_jump_to(pc, here);
            }
            self.advance()?;
            false_jumps = self.parse_cond_materialized()?;
            self.expect(Token::Then, "then")?;
            self.fs().enter_block(false);
            self.parse_block()?;
            self.close_block_checked()?;
        }
        if self.check(&Token::Else) {
            end_jumps.push(self.fs().emit_jmp());
            let here = self.fs().here();
            for pc in false_jumps.drain(..) {
                self.fs().patch_jump_to(pc, here);
            }
            self.advance()?;
            self.fs().enter_block(false);
            self.parse_block()?;
            self.close_block_checked()?;
        } else {
            let here = self.fs().here();
            for pc in false_jumps.drain(..) {
                self.fs().patch_jump_to(pc, here);
            }
        }
        self.expect(Token::End, "end")?;
        let here = self.fs().here();
        for pc in end_jumps {
            self.fs().patch_jump_to(pc, here);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let loop_start = self.fs().here();
        let false_jumps = self.parse_cond_materialized()?;
        self.expect(Token::Do, "do")?;
        self.fs().enter_block(true);
        self.parse_block()?;
        self.expect(Token::End, "end")?;
        let first_local = self.fs().blocks.last().unwrap().first_local;
        if let Some(reg) = self.fs().min_captured_register_from(first_local) {
            self.fs().emit_abc(OpCode::Close, reg as u32, 0, 0);
        }
        self.fs().emit_asbx(OpCode::Jmp, 0, (loop_start as i64 - self.fs().here() as i64 - 1) as i32);
        let block_break_jumps = {
            let b = self.fs().blocks.last().unwrap();
            b.break_jumps.clone()
        };
        self.close_block_checked()?;
        let here = self.fs().here();
        for pc in false_jumps {
            self.fs().patch_jump_to(pc, here);
        }
        for pc in block_break_jumps {
            self.fs().patch_jump_to(pc, here);
        }
        Ok(())
    }

    fn parse_repeat(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let loop_start = self.fs().here();
        self.fs().enter_block(true);
        self.parse_block()?;
        self.expect(Token::Until, "until")?;
        // The until-condition is evaluated inside the body's own scope
        // (spec §4.2: "the `until` condition ... including any locals
        // declared in [the body]") — don't close the block until after.
        let false_jumps = self.parse_cond_materialized()?;
        // On each false (still-looping) pass, close this iteration's
        // captured locals before jumping back so the next pass gets fresh
        // upvalues (spec §4.7). The true (exit) branch just falls through
        // into close_block_checked's own exit-time CLOSE below.
        let first_local = self.fs().blocks.last().unwrap().first_local;
        let continue_target = self.fs().here();
        if let Some(reg) = self.fs().min_captured_register_from(first_local) {
            self.fs().emit_abc(OpCode::Close, reg as u32, 0, 0);
        }
        self.fs().emit_asbx(OpCode::Jmp, 0, (loop_start as i64 - self.fs().here() as i64 - 1) as i32);
        for pc in false_jumps {
            self.fs().patch_jump_to(pc, continue_target);
        }
        let block_break_jumps = self.fs().blocks.last().unwrap().break_jumps.clone();
        self.close_block_checked()?;
        let end = self.fs().here();
        for pc in block_break_jumps {
            self.fs().patch_jump_to(pc, end);
        }
        Ok(())
    }

    fn parse_for(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let name1 = self.expect_name()?;
        if self.check(&Token::Assign) {
            self.parse_numeric_for(name1)
        } else {
            self.parse_generic_for(name1)
        }
    }

    fn parse_numeric_for(&mut self, name: String) -> Result<(), LuaError> {
        self.advance()?; // '='
        let init = self.parse_expr()?;
        let init_reg = self.to_next_reg(init)?;
        self.expect(Token::Comma, ",")?;
        let limit = self.parse_expr()?;
        self.to_reg(limit, init_reg + 1)?;
        let step_reg = if self.accept(&Token::Comma)? {
            let step = self.parse_expr()?;
            self.to_reg(step, init_reg + 2)?;
            init_reg + 2
        } else {
            self.fs().emit_abc(OpCode::LoadI, (init_reg + 2) as u32, 1, 0);
            init_reg + 2
        };
        let _ = step_reg;
        self.fs().reserve_regs(1)?; // control var slot (a+3)
        self.expect(Token::Do, "do")?;
        let prep_pc = self.fs().emit_asbx(OpCode::ForPrep, init_reg as u32, 0);
        self.fs().enter_block(true);
        self.fs().declare_local(name, Attrib::None)?;
        // The loop variable occupies a+3; declare_local allocated a fresh
        // register for it, which by construction is exactly init_reg+3
        // since nothing else has been reserved in between.
        self.parse_block()?;
        self.expect(Token::End, "end")?;
        let first_local = self.fs().blocks.last().unwrap().first_local;
        if let Some(reg) = self.fs().min_captured_register_from(first_local) {
            self.fs().emit_abc(OpCode::Close, reg as u32, 0, 0);
        }
        let loop_pc = self.fs().emit_asbx(OpCode::ForLoop, init_reg as u32, 0);
        // FORLOOP continues by jumping back to the body's first instruction;
        // FORPREP, on a loop that never runs once, skips straight past FORLOOP.
        self.fs().patch_jump_to(loop_pc, prep_pc + 1);
        self.fs().patch_jump_to(prep_pc, loop_pc + 1);
        let break_jumps = self.fs().blocks.last().unwrap().break_jumps.clone();
        self.close_block_checked()?;
        let here = self.fs().here();
        for pc in break_jumps {
            self.fs().patch_jump_to(pc, here);
        }
        Ok(())
    }

    fn parse_generic_for(&mut self, name1: String) -> Result<(), LuaError> {
        let mut names = vec![name1];
        while self.accept(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(Token::In, "in")?;
        let base = self.fs().free_reg;
        self.compile_expr_list_exact(3)?;
        self.expect(Token::Do, "do")?;
        let nvars = names.len() as u32;
        let jmp_to_test = self.fs().emit_jmp();
        self.fs().enter_block(true);
        let loop_body_start = self.fs().here();
        for n in names {
            self.fs().declare_local(n, Attrib::None)?;
        }
        self.parse_block()?;
        self.expect(Token::End, "end")?;
        let first_local = self.fs().blocks.last().unwrap().first_local;
        if let Some(reg) = self.fs().min_captured_register_from(first_local) {
            self.fs().emit_abc(OpCode::Close, reg as u32, 0, 0);
        }
        let test_pc = self.fs().here();
        self.fs().patch_jump_here(jmp_to_test);
        self.fs().emit_abc(OpCode::TForCall, base as u32, 0, nvars);
        let tforloop_pc = self.fs().emit_asbx(OpCode::TForLoop, base as u32, 0);
        self.fs().patch_jump_to(tforloop_pc, loop_body_start);
        let _ = test_pc;
        let break_jumps = self.fs().blocks.last().unwrap().break_jumps.clone();
        self.close_block_checked()?;
        let here = self.fs().here();
        for pc in break_jumps {
            self.fs().patch_jump_to(pc, here);
        }
        Ok(())
    }

    /// Parses one assignment or call statement: a comma-separated list of
    /// suffixed expressions, either `=`-followed (assignment) or a lone
    /// call (expression statement — spec §6.1 "a bare call is the only
    /// expression legal as a statement").
    fn parse_expr_statement(&mut self) -> Result<(), LuaError> {
        let first = self.parse_suffixed(true)?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![self.expr_to_lvalue(first)?];
            while self.accept(&Token::Comma)? {
                let e = self.parse_suffixed(true)?;
                targets.push(self.expr_to_lvalue(e)?);
            }
            self.expect(Token::Assign, "=")?;
            let base = self.fs().free_reg;
            let mark = base;
            self.compile_expr_list_exact(targets.len())?;
            for (i, target) in targets.into_iter().enumerate() {
                self.store_lvalue(target, mark + i as u8)?;
            }
            self.fs().free_to(mark);
            Ok(())
        } else {
            match first {
                ExprVal::Open { .. } => Ok(()),
                _ => Err(self.err("syntax error (expression statement must be a call)")),
            }
        }
    }

    fn parse_function_stat(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        let base_name = self.expect_name()?;
        let mut target = self.resolve_name(&base_name);
        let mut path = Vec::new();
        let mut is_method = false;
        loop {
            if self.accept(&Token::Dot)? {
                path.push(self.expect_name()?);
            } else if self.accept(&Token::Colon)? {
                path.push(self.expect_name()?);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let display_name = std::iter::once(base_name.clone()).chain(path.iter().cloned()).collect::<Vec<_>>().join(if is_method { ":" } else { "." });
        let closure = self.parse_function_body(is_method, &display_name)?;
        if path.is_empty() {
            let lv = self.expr_to_lvalue(target)?;
            let reg = self.to_next_reg(closure)?;
            self.store_lvalue(lv, reg)?;
            self.fs().free_to(reg);
            return Ok(());
        }
        let mut obj_reg = self.to_next_reg(target)?;
        for (i, field) in path.iter().enumerate() {
            let key = instruction::encode_rk_constant(self.fs().add_string_constant(field, self.strings));
            if i + 1 == path.len() {
                let val_reg = self.to_next_reg(closure)?;
                self.fs().emit_abc(OpCode::SetTable, obj_reg as u32, key, instruction::encode_rk_register(val_reg));
                self.fs().free_to(obj_reg);
                return Ok(());
            }
            let next_reg = self.fs().reserve_one()?;
            self.fs().emit_abc(OpCode::GetTable, next_reg as u32, obj_reg as u32, key);
            self.fs().free_to(next_reg);
            obj_reg = next_reg;
        }
        let _ = &mut target;
        unreachable!("path non-empty loop always returns");
    }

    fn parse_local(&mut self) -> Result<(), LuaError> {
        self.advance()?;
        if self.accept(&Token::Function)? {
            let name = self.expect_name()?;
            let reg = self.fs().declare_local(name.clone(), Attrib::None)?;
            let closure = self.parse_function_body(false, &name)?;
            self.to_reg(closure, reg)?;
            return Ok(());
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.accept(&Token::Lt)? {
                let attr_name = self.expect_name()?;
                self.expect(Token::Gt, ">")?;
                match attr_name.as_str() {
                    "const" => Attrib::Const,
                    "close" => Attrib::Close,
                    other => return Err(self.err(format!("unknown attribute '{other}'"))),
                }
            } else {
                Attrib::None
            };
            names.push((name, attrib));
            if !self.accept(&Token::Comma)? {
                break;
            }
        }
        let base = self.fs().free_reg;
        if self.accept(&Token::Assign)? {
            self.compile_expr_list_exact(names.len())?;
        } else {
            self.fs().reserve_regs(names.len() as u8)?;
            for i in 0..names.len() {
                self.fs().emit_abc(OpCode::LoadNil, (base + i as u8) as u32, (base + i as u8) as u32, 0);
            }
        }
        for (i, (name, attrib)) in names.into_iter().enumerate() {
            let reg = base + i as u8;
            self.fs().locals.push(func_state::LocalVar { name: name.clone(), register: reg, attrib, start_pc: self.fs().here() as u32, is_captured: false });
            self.fs().proto.locals.push(crate::value::proto::LocalVarInfo {
                name,
                register: reg,
                start_pc: self.fs().here() as u32,
                end_pc: u32::MAX,
                is_const: attrib == Attrib::Const,
                is_close: attrib == Attrib::Close,
            });
            if attrib == Attrib::Close {
                self.fs().emit_abc(OpCode::Close, reg as u32, 1, 0);
            }
        }
        Ok(())
    }

    // ---- expression lists ---------------------------------------------------

    /// Compiles a comma-separated expression list, the last one left open
    /// (all results kept) when `want == -1`, otherwise closed down to
    /// exactly `want` values (nil-padded / truncated). Returns the number
    /// of source expressions written when `want == -1` (caller derives the
    /// `RETURN`/`CALL` `B`/`C` field from it), or `u32::MAX` to signal "no
    /// expressions at all".
    fn compile_expr_list(&mut self, want: i32) -> Result<u32, LuaError> {
        let mut n = 0u32;
        let mut last_open: Option<(usize, u8)> = None;
        loop {
            let ev = self.parse_expr()?;
            match ev {
                ExprVal::Open { pc, reg } => {
                    last_open = Some((pc, reg));
                }
                other => {
                    self.to_next_reg(other)?;
                    last_open = None;
                }
            }
            n += 1;
            if !self.accept(&Token::Comma)? {
                break;
            }
            if let Some((pc, _)) = last_open.take() {
                self.fs().patch_c_field(pc, 2);
            }
        }
        if want == -1 {
            if let Some((pc, _)) = last_open {
                self.fs().patch_c_field(pc, 0);
            }
            return Ok(n);
        }
        let want = want as u32;
        if let Some((pc, reg)) = last_open {
            let produced_before_last = n - 1;
            let remaining = want.saturating_sub(produced_before_last);
            self.fs().patch_c_field(pc, remaining + 1);
            let target_top = reg as u32 + remaining;
            self.fs().free_reg = target_top.min(255) as u8;
        }
        if n < want {
            let base = self.fs().free_reg;
            let extra = want - n;
            self.fs().reserve_regs(extra as u8)?;
            for i in 0..extra {
                self.fs().emit_abc(OpCode::LoadNil, (base as u32 + i) as u32, (base as u32 + i) as u32, 0);
            }
        }
        Ok(n)
    }

    fn compile_expr_list_exact(&mut self, want: usize) -> Result<(), LuaError> {
        if want == 0 {
            // still need side effects of at least one expr if present; a
            // bare `in`/`=` with zero names never reaches here in practice.
            return Ok(());
        }
        self.compile_expr_list(want as i32).map(|_| ())
    }

    // ---- lvalues -------------------------------------------------------------

    fn expr_to_lvalue(&mut self, ev: ExprVal) -> Result<LValue, LuaError> {
        match ev {
            ExprVal::Local(r, attrib) => {
                if attrib != Attrib::None {
                    let name = self.fs_ref().locals.iter().rev().find(|l| l.register == r).map(|l| l.name.clone()).unwrap_or_default();
                    return Err(LuaError::const_assign(&name));
                }
                Ok(LValue::Local(r))
            }
            ExprVal::Upvalue(i) => Ok(LValue::Upvalue(i)),
            ExprVal::Global(k) => Ok(LValue::Global(k)),
            ExprVal::Index { obj, key } => Ok(LValue::Index(obj, key)),
            _ => Err(self.err("cannot assign to this expression")),
        }
    }

    fn store_lvalue(&mut self, target: LValue, value_reg: u8) -> Result<(), LuaError> {
        match target {
            LValue::Local(r) => {
                if r != value_reg {
                    self.fs().emit_abc(OpCode::Move, r as u32, value_reg as u32, 0);
                }
            }
            LValue::Upvalue(idx) => {
                self.fs().emit_abc(OpCode::SetUpval, value_reg as u32, idx as u32, 0);
            }
            LValue::Global(k) => {
                self.fs().emit_abc(OpCode::SetGlobal, value_reg as u32, k as u32, 0);
            }
            LValue::Index(obj, key) => {
                self.fs().emit_abc(OpCode::SetTable, obj as u32, key, instruction::encode_rk_register(value_reg));
            }
        }
        Ok(())
    }

    // ---- name resolution -------------------------------------------------

    fn resolve_name(&mut self, name: &str) -> ExprVal {
        let level = self.level();
        if let Some((reg, attrib)) = self.funcs[level].find_local(name) {
            return ExprVal::Local(reg, attrib);
        }
        if let Some(idx) = func_state::resolve_upvalue(&mut self.funcs, level, name) {
            return ExprVal::Upvalue(idx);
        }
        let k = self.fs().add_string_constant(name, self.strings);
        ExprVal::Global(k)
    }

    // ---- materialization helpers -------------------------------------------

    fn to_next_reg(&mut self, ev: ExprVal) -> Result<u8, LuaError> {
        match ev {
            ExprVal::Reg(r) => Ok(r),
            ExprVal::Open { pc, reg } => {
                self.fs().patch_c_field(pc, 2);
                Ok(reg)
            }
            ExprVal::Const(v) => {
                let reg = self.fs().reserve_one()?;
                self.load_const(reg, v);
                Ok(reg)
            }
            ExprVal::Local(src, _) => {
                let reg = self.fs().reserve_one()?;
                self.fs().emit_abc(OpCode::Move, reg as u32, src as u32, 0);
                Ok(reg)
            }
            ExprVal::Upvalue(idx) => {
                let reg = self.fs().reserve_one()?;
                self.fs().emit_abc(OpCode::GetUpval, reg as u32, idx as u32, 0);
                Ok(reg)
            }
            ExprVal::Global(k) => {
                let reg = self.fs().reserve_one()?;
                self.fs().emit_abc(OpCode::GetGlobal, reg as u32, k as u32, 0);
                Ok(reg)
            }
            ExprVal::Index { obj, key } => {
                let reg = self.fs().reserve_one()?;
                self.fs().emit_abc(OpCode::GetTable, reg as u32, obj as u32, key);
                Ok(reg)
            }
            ExprVal::Vararg => {
                let reg = self.fs().reserve_one()?;
                self.fs().emit_abc(OpCode::Vararg, reg as u32, 0, 2);
                Ok(reg)
            }
        }
    }

    fn to_reg(&mut self, ev: ExprVal, target: u8) -> Result<(), LuaError> {
        let mark = self.fs().free_reg;
        let produced = self.to_next_reg(ev)?;
        if produced != target {
            self.fs().emit_abc(OpCode::Move, target as u32, produced as u32, 0);
        }
        self.fs().free_to(mark.max(target + 1));
        Ok(())
    }

    fn load_const(&mut self, reg: u8, v: Value) {
        match &v {
            Value::Nil => {
                self.fs().emit_abc(OpCode::LoadNil, reg as u32, reg as u32, 0);
            }
            Value::Bool(b) => {
                self.fs().emit_abc(OpCode::LoadBool, reg as u32, *b as u32, 0);
            }
            Value::Integer(i) if *i >= 0 && *i <= 511 => {
                self.fs().emit_abc(OpCode::LoadI, reg as u32, *i as u32, 0);
            }
            _ => {
                let k = self.fs().add_constant(v);
                self.fs().emit_abc(OpCode::LoadK, reg as u32, k as u32, 0);
            }
        }
    }

    /// Converts `ev` to an RK-encoded operand, avoiding a temp register for
    /// plain locals/constants (spec §3's RK convention exists exactly so
    /// operands like these don't need one).
    fn as_rk(&mut self, ev: ExprVal) -> Result<u32, LuaError> {
        match ev {
            ExprVal::Local(r, _) => Ok(instruction::encode_rk_register(r)),
            ExprVal::Reg(r) => Ok(instruction::encode_rk_register(r)),
            ExprVal::Const(v) => {
                let k = self.fs().add_constant(v);
                Ok(instruction::encode_rk_constant(k))
            }
            other => {
                let r = self.to_next_reg(other)?;
                Ok(instruction::encode_rk_register(r))
            }
        }
    }

    // ---- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprVal, LuaError> {
        self.parse_binexpr(0)
    }

    fn unary_prec() -> u8 {
        12
    }

    fn binop_prec(tok: &Token) -> Option<(u8, u8)> {
        use Token::*;
        Some(match tok {
            Or => (1, 1),
            And => (2, 2),
            Lt | Gt | Le | Ge | Ne | Eq => (3, 3),
            Pipe => (4, 4),
            Tilde => (5, 5),
            Amp => (6, 6),
            Shl | Shr => (7, 7),
            Concat => (9, 8),
            Plus | Minus => (10, 10),
            Star | Slash | DSlash | Percent => (11, 11),
            Caret => (14, 13),
            _ => return None,
        })
    }

    fn parse_binexpr(&mut self, limit: u8) -> Result<ExprVal, LuaError> {
        let mut lhs = if let Some(op) = self.unary_op() {
            self.advance()?;
            let operand = self.parse_binexpr(Self::unary_prec())?;
            self.emit_unary(op, operand)?
        } else {
            self.parse_simple_expr()?
        };
        while let Some((left_prec, right_prec)) = Self::binop_prec(&self.cur_token) {
            if left_prec <= limit {
                break;
            }
            let op = self.cur_token.clone();
            self.advance()?;
            lhs = if op == Token::Concat {
                self.emit_concat_chain(lhs)?
            } else {
                self.emit_binop(op, lhs, right_prec)?
            };
        }
        Ok(lhs)
    }

    /// `CONCAT a,b,c` operates on the whole inclusive register range
    /// `b..=c`, so a chain `w..x..y..z` must land in adjacent registers
    /// rather than being folded pairwise right-to-left the way every other
    /// operator is — recursing through the generic binary-op path would
    /// compile the tail of the chain (and thus allocate its registers)
    /// before the head, leaving them non-adjacent. This collects the whole
    /// `..`-chain iteratively instead. Entered with the `..` that follows
    /// `lhs` already consumed.
    fn emit_concat_chain(&mut self, lhs: ExprVal) -> Result<ExprVal, LuaError> {
        let base = self.to_next_reg(lhs)?;
        loop {
            let operand = self.parse_binexpr(9)?;
            self.to_next_reg(operand)?;
            if self.check(&Token::Concat) {
                self.advance()?;
            } else {
                break;
            }
        }
        let top = self.fs().free_reg;
        self.fs().free_to(base);
        let dst = self.fs().reserve_one()?;
        self.fs().emit_abc(OpCode::Concat, dst as u32, base as u32, (top - 1) as u32);
        Ok(ExprVal::Reg(dst))
    }

    fn unary_op(&self) -> Option<UnOp> {
        match self.cur_token {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            Token::Tilde => Some(UnOp::BNot),
            _ => None,
        }
    }

    fn emit_unary(&mut self, op: UnOp, operand: ExprVal) -> Result<ExprVal, LuaError> {
        if let (UnOp::Neg, ExprVal::Const(Value::Integer(i))) = (op, &operand) {
            return Ok(ExprVal::Const(Value::Integer(i.wrapping_neg())));
        }
        if let (UnOp::Neg, ExprVal::Const(Value::Float(f))) = (op, &operand) {
            return Ok(ExprVal::Const(Value::Float(-f)));
        }
        let src = self.to_next_reg(operand)?;
        let mark = src;
        let opcode = match op {
            UnOp::Not => OpCode::Not,
            UnOp::Neg => OpCode::Unm,
            UnOp::Len => OpCode::Len,
            UnOp::BNot => OpCode::Bnot,
        };
        self.fs().free_to(mark);
        let dst = self.fs().reserve_one()?;
        self.fs().emit_abc(opcode, dst as u32, src as u32, 0);
        Ok(ExprVal::Reg(dst))
    }

    fn emit_binop(&mut self, op: Token, lhs: ExprVal, right_prec: u8) -> Result<ExprVal, LuaError> {
        match op {
            Token::And => {
                let reg = self.to_next_reg(lhs)?;
                let mark = reg;
                self.fs().emit_abc(OpCode::Test, reg as u32, 0, 0);
                let jmp = self.fs().emit_jmp();
                self.fs().free_to(mark);
                let rhs = self.parse_binexpr(right_prec)?;
                self.to_reg(rhs, reg)?;
                self.fs().patch_jump_here(jmp);
                return Ok(ExprVal::Reg(reg));
            }
            Token::Or => {
                let reg = self.to_next_reg(lhs)?;
                let mark = reg;
                self.fs().emit_abc(OpCode::Test, reg as u32, 0, 1);
                let jmp = self.fs().emit_jmp();
                self.fs().free_to(mark);
                let rhs = self.parse_binexpr(right_prec)?;
                self.to_reg(rhs, reg)?;
                self.fs().patch_jump_here(jmp);
                return Ok(ExprVal::Reg(reg));
            }
            _ => {}
        }
        // constant-folding for the common numeric-literal case keeps small
        // arithmetic chains (`1 + 2 + 3`) from burning registers.
        if let Some(folded) = self.try_fold_const(&op, &lhs) {
            let mark = self.fs().free_reg;
            let rhs = self.parse_binexpr(right_prec)?;
            if let ExprVal::Const(rv) = &rhs {
                if let Some(v) = fold_arith(&op, &folded, rv) {
                    return Ok(ExprVal::Const(v));
                }
            }
            self.fs().free_to(mark);
            return self.emit_value_binop(op, ExprVal::Const(folded), rhs);
        }
        let lhs_mark = self.first_reg_of(&lhs);
        let rhs = self.parse_binexpr(right_prec)?;
        self.emit_value_binop_at(op, lhs, rhs, lhs_mark)
    }

    fn first_reg_of(&self, ev: &ExprVal) -> u8 {
        match ev {
            ExprVal::Reg(r) | ExprVal::Open { reg: r, .. } | ExprVal::Local(r, _) => *r,
            _ => self.fs_ref().free_reg,
        }
    }

    fn try_fold_const(&self, _op: &Token, ev: &ExprVal) -> Option<Value> {
        match ev {
            ExprVal::Const(v @ (Value::Integer(_) | Value::Float(_))) => Some(v.clone()),
            _ => None,
        }
    }

    fn emit_value_binop(&mut self, op: Token, lhs: ExprVal, rhs: ExprVal) -> Result<ExprVal, LuaError> {
        let mark = self.fs().free_reg;
        self.emit_value_binop_at(op, lhs, rhs, mark)
    }

    fn emit_value_binop_at(&mut self, op: Token, lhs: ExprVal, rhs: ExprVal, mark: u8) -> Result<ExprVal, LuaError> {
        if matches!(op, Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge) {
            return self.emit_compare_value(op, lhs, rhs, mark);
        }
        let lhs_rk = self.as_rk(lhs)?;
        let rhs_rk = self.as_rk(rhs)?;
        self.fs().free_to(mark);
        let dst = self.fs().reserve_one()?;
        let opcode = match op {
            Token::Plus => OpCode::Add,
            Token::Minus => OpCode::Sub,
            Token::Star => OpCode::Mul,
            Token::Slash => OpCode::Div,
            Token::DSlash => OpCode::IDiv,
            Token::Percent => OpCode::Mod,
            Token::Caret => OpCode::Pow,
            Token::Amp => OpCode::Band,
            Token::Pipe => OpCode::Bor,
            Token::Tilde => OpCode::Bxor,
            Token::Shl => OpCode::Shl,
            Token::Shr => OpCode::Shr,
            _ => return Err(self.err("unsupported binary operator")),
        };
        self.fs().emit_abc(opcode, dst as u32, lhs_rk, rhs_rk);
        Ok(ExprVal::Reg(dst))
    }

    /// `==`/`~=`/`<`/`<=`/`>`/`>=` as a *value* (not a control condition):
    /// materializes a genuine boolean via the classic compare+`LOADBOOL`
    /// pair (spec §6.3's `LOADBOOL`: "`C != 0` skips the next instruction").
    fn emit_compare_value(&mut self, op: Token, lhs: ExprVal, rhs: ExprVal, mark: u8) -> Result<ExprVal, LuaError> {
        let (opcode, want_true, swap) = compare_shape(&op);
        let (lhs, rhs) = if swap { (rhs, lhs) } else { (lhs, rhs) };
        let lhs_rk = self.as_rk(lhs)?;
        let rhs_rk = self.as_rk(rhs)?;
        self.fs().free_to(mark);
        let dst = self.fs().reserve_one()?;
        let a = cond_skip_a(opcode, want_true);
        self.fs().emit_abc(opcode, a, lhs_rk, rhs_rk);
        self.fs().emit_abc(OpCode::LoadBool, dst as u32, 0, 1);
        self.fs().emit_abc(OpCode::LoadBool, dst as u32, 1, 0);
        Ok(ExprVal::Reg(dst))
    }

    /// Compiles `cond` for `if`/`while`/`repeat-until` use: materializes it
    /// to a register, `TEST`s it, and returns the single false-branch jump
    /// pc for the caller to patch.
    fn parse_cond_materialized(&mut self) -> Result<Vec<usize>, LuaError> {
        let ev = self.parse_expr()?;
        let mark = self.fs().free_reg.min(self.first_reg_of(&ev));
        let reg = self.to_next_reg(ev)?;
        // c=0: TEST skips the next instruction (this JMP) when the value is
        // truthy, so the JMP itself only fires on the false branch.
        self.fs().emit_abc(OpCode::Test, reg as u32, 0, 0);
        let jmp = self.fs().emit_jmp();
        self.fs().free_to(mark);
        Ok(vec![jmp])
    }

    // ---- primary / suffixed expressions -------------------------------------

    fn parse_simple_expr(&mut self) -> Result<ExprVal, LuaError> {
        match self.cur_token.clone() {
            Token::Nil => {
                self.advance()?;
                Ok(ExprVal::Const(Value::Nil))
            }
            Token::True => {
                self.advance()?;
                Ok(ExprVal::Const(Value::Bool(true)))
            }
            Token::False => {
                self.advance()?;
                Ok(ExprVal::Const(Value::Bool(false)))
            }
            Token::Int(i) => {
                self.advance()?;
                Ok(ExprVal::Const(Value::Integer(i)))
            }
            Token::Float(f) => {
                self.advance()?;
                Ok(ExprVal::Const(Value::Float(f)))
            }
            Token::Str(s) => {
                self.advance()?;
                let interned = self.strings.intern(&s);
                Ok(ExprVal::Const(Value::Str(interned)))
            }
            Token::Ellipsis => {
                self.advance()?;
                if !self.fs_ref().proto.is_vararg {
                    return Err(self.err("cannot use '...' outside a vararg function"));
                }
                Ok(ExprVal::Vararg)
            }
            Token::Function => {
                self.advance()?;
                self.parse_function_body(false, "anonymous")
            }
            Token::LBrace => self.parse_table_constructor(),
            _ => self.parse_suffixed(false),
        }
    }

    fn parse_suffixed(&mut self, as_lvalue: bool) -> Result<ExprVal, LuaError> {
        let mut base = self.parse_primary()?;
        loop {
            match self.cur_token.clone() {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let final_step = as_lvalue && !self.suffix_follows();
                    let obj = self.to_next_reg(base)?;
                    let key = instruction::encode_rk_constant(self.fs().add_string_constant(&name, self.strings));
                    if final_step {
                        return Ok(ExprVal::Index { obj, key });
                    }
                    self.fs().free_to(obj);
                    let dst = self.fs().reserve_one()?;
                    self.fs().emit_abc(OpCode::GetTable, dst as u32, obj as u32, key);
                    base = ExprVal::Reg(dst);
                }
                Token::LBracket => {
                    self.advance()?;
                    let key_expr = self.parse_expr()?;
                    self.expect(Token::RBracket, "]")?;
                    let final_step = as_lvalue && !self.suffix_follows();
                    let obj = self.to_next_reg(base)?;
                    let key = self.as_rk(key_expr)?;
                    if final_step {
                        return Ok(ExprVal::Index { obj, key });
                    }
                    self.fs().free_to(obj);
                    let dst = self.fs().reserve_one()?;
                    self.fs().emit_abc(OpCode::GetTable, dst as u32, obj as u32, key);
                    base = ExprVal::Reg(dst);
                }
                Token::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let obj = self.to_next_reg(base)?;
                    let key = instruction::encode_rk_constant(self.fs().add_string_constant(&method, self.strings));
                    self.fs().free_to(obj);
                    let a = self.fs().reserve_regs(2)?;
                    self.fs().emit_abc(OpCode::SelfOp, a as u32, obj as u32, key);
                    let nargs = self.parse_call_args()?;
                    let pc = self.fs().emit_abc(OpCode::Call, a as u32, if nargs == u32::MAX { 0 } else { nargs + 1 + 1 }, 0);
                    base = ExprVal::Open { pc, reg: a };
                }
                Token::LParen | Token::LBrace | Token::Str(_) => {
                    let func = self.to_next_reg(base)?;
                    let mark = func;
                    let nargs = self.parse_call_args()?;
                    self.fs().free_to(mark + 1);
                    let b = if nargs == u32::MAX { 0 } else { nargs + 1 };
                    let pc = self.fs().emit_abc(OpCode::Call, func as u32, b, 0);
                    base = ExprVal::Open { pc, reg: func };
                }
                _ => break,
            }
        }
        Ok(base)
    }

    /// Parses a call's argument list (`(exprlist)`, a single table
    /// constructor, or a single string literal). Returns the number of
    /// arguments, or `u32::MAX` if the last one was left open (multret).
    fn parse_call_args(&mut self) -> Result<u32, LuaError> {
        match self.cur_token.clone() {
            Token::LParen => {
                self.advance()?;
                if self.check(&Token::RParen) {
                    self.advance()?;
                    return Ok(0);
                }
                let n = self.compile_expr_list(-1)?;
                self.expect(Token::RParen, ")")?;
                let ends_open = matches!(self.fs_ref().proto.instructions.last(), Some(_)) && self.last_emitted_is_open();
                Ok(if ends_open { u32::MAX } else { n })
            }
            Token::LBrace => {
                let ev = self.parse_table_constructor()?;
                self.to_next_reg(ev)?;
                Ok(1)
            }
            Token::Str(s) => {
                self.advance()?;
                let interned = self.strings.intern(&s);
                let ev = ExprVal::Const(Value::Str(interned));
                self.to_next_reg(ev)?;
                Ok(1)
            }
            _ => Err(self.err("function arguments expected")),
        }
    }

    /// Whether the most recent instruction is a `CALL`/`VARARG` still
    /// carrying `C == 0` (open/multret) — used right after
    /// `compile_expr_list(-1)` to decide the enclosing call's own arg count.
    fn last_emitted_is_open(&self) -> bool {
        let Some(&instr) = self.fs_ref().proto.instructions.last() else { return false };
        let op = instruction::opcode_of(instr);
        (op == OpCode::Call as u8 || op == OpCode::Vararg as u8) && instruction::c_of(instr) == 0
    }

    fn parse_primary(&mut self) -> Result<ExprVal, LuaError> {
        match self.cur_token.clone() {
            Token::Name(n) => {
                self.advance()?;
                Ok(self.resolve_name(&n))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, ")")?;
                // Parenthesizing truncates a multret expression to exactly
                // one value (spec §4.5's TCO exclusion: "a parenthesized
                // call is never a tail call" follows from this same rule).
                let reg = self.to_next_reg(inner)?;
                Ok(ExprVal::Reg(reg))
            }
            _ => Err(self.err(format!("unexpected symbol near {}", self.cur_token.describe()))),
        }
    }

    fn parse_table_constructor(&mut self) -> Result<ExprVal, LuaError> {
        self.expect(Token::LBrace, "{")?;
        let table_reg = self.fs().reserve_one()?;
        self.fs().emit_abc(OpCode::NewTable, table_reg as u32, 0, 0);
        let array_base = self.fs().free_reg;
        let mut array_count: u32 = 0;
        while !self.check(&Token::RBrace) {
            if self.check(&Token::LBracket) {
                self.advance()?;
                let key = self.parse_expr()?;
                self.expect(Token::RBracket, "]")?;
                self.expect(Token::Assign, "=")?;
                let mark = self.fs().free_reg;
                let key_rk = self.as_rk(key)?;
                let val = self.parse_expr()?;
                let val_rk = self.as_rk(val)?;
                self.fs().emit_abc(OpCode::SetTable, table_reg as u32, key_rk, val_rk);
                self.fs().free_to(mark);
            } else if matches!(self.cur_token, Token::Name(_)) && self.peek_is_field_assign() {
                let name = self.expect_name()?;
                self.expect(Token::Assign, "=")?;
                let mark = self.fs().free_reg;
                let key = instruction::encode_rk_constant(self.fs().add_string_constant(&name, self.strings));
                let val = self.parse_expr()?;
                let val_rk = self.as_rk(val)?;
                self.fs().emit_abc(OpCode::SetTable, table_reg as u32, key, val_rk);
                self.fs().free_to(mark);
            } else {
                let val = self.parse_expr()?;
                // SETLIST here always takes a fixed count, so even a
                // trailing call/vararg field closes down to one value
                // rather than spreading.
                self.to_next_reg(val)?;
                array_count += 1;
            }
            if !self.accept(&Token::Comma)? && !self.accept(&Token::Semi)? {
                break;
            }
        }
        self.expect(Token::RBrace, "}")?;
        if array_count > 0 {
            self.fs().emit_abc(OpCode::SetList, table_reg as u32, array_count, 0);
        }
        self.fs().free_to(array_base.min(table_reg + 1));
        self.fs().free_to(table_reg + 1);
        Ok(ExprVal::Reg(table_reg))
    }

    /// Disambiguates `{ name = expr }` from `{ name }` / `{ name.x }` /
    /// `{ name() }` without consuming tokens (single-token lookahead is not
    /// enough on its own, so this peeks two tokens ahead via the lexer's
    /// own position — acceptable since `Name` can't itself start a
    /// multi-token construct that's also immediately followed by `=`).
    fn peek_is_field_assign(&mut self) -> bool {
        // A name followed directly by '=' in this lexer's one-token
        // lookahead model requires a speculative save/restore.
        let saved_pos = self.lexer_pos_snapshot();
        let saved_tok = self.cur_token.clone();
        let saved_line = self.cur_line;
        let _ = self.advance();
        let is_assign = matches!(self.cur_token, Token::Assign);
        self.restore_lexer(saved_pos, saved_tok, saved_line);
        is_assign
    }

    fn lexer_pos_snapshot(&self) -> (usize, u32) {
        self.lexer.snapshot()
    }

    fn restore_lexer(&mut self, snapshot: (usize, u32), tok: Token, line: u32) {
        self.lexer.restore(snapshot);
        self.cur_token = tok;
        self.cur_line = line;
    }

    // ---- function literals -------------------------------------------------

    fn parse_function_body(&mut self, implicit_self: bool, name_hint: &str) -> Result<ExprVal, LuaError> {
        if self.funcs.len() >= MAX_FUNC_DEPTH {
            return Err(self.err("function nesting too deep"));
        }
        let line_defined = self.cur_line;
        let mut fs = FuncState::new(self.chunk_name.clone(), self.chunk_name.clone());
        fs.proto.line_defined = line_defined;
        self.funcs.push(fs);
        self.fs().enter_block(false);
        if implicit_self {
            self.fs().declare_local("self".to_string(), Attrib::None)?;
        }
        self.expect(Token::LParen, "(")?;
        if !self.check(&Token::RParen) {
            loop {
                if self.check(&Token::Ellipsis) {
                    self.advance()?;
                    self.fs().proto.is_vararg = true;
                    break;
                }
                let pname = self.expect_name()?;
                self.fs().declare_local(pname, Attrib::None)?;
                if !self.accept(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen, ")")?;
        self.fs().proto.num_params = self.fs().locals.len() as u8;
        self.parse_block()?;
        let end_line = self.cur_line;
        self.expect(Token::End, "end")?;
        self.close_block_checked()?;
        self.fs().emit_abc(OpCode::Return, 0, 1, 0);
        self.fs().sync_max_stack();
        let mut finished = self.funcs.pop().unwrap();
        finished.proto.last_line_defined = end_line;
        let proto = Rc::new(finished.proto);
        let _ = name_hint;
        let nested_idx = {
            let parent = self.fs();
            parent.proto.nested.push(proto);
            (parent.proto.nested.len() - 1) as u32
        };
        let reg = self.fs().reserve_one()?;
        self.fs().emit_abc(OpCode::Closure, reg as u32, nested_idx, 0);
        Ok(ExprVal::Reg(reg))
    }
}

#[derive(Clone, Copy)]
enum UnOp {
    Not,
    Neg,
    Len,
    BNot,
}

enum LValue {
    Local(u8),
    Upvalue(u8),
    Global(u8),
    Index(u8, u32),
}

fn fold_arith(op: &Token, a: &Value, b: &Value) -> Option<Value> {
    use Token::*;
    let (af, bf) = (as_f64(a), as_f64(b));
    let both_int = matches!((a, b), (Value::Integer(_), Value::Integer(_)));
    match op {
        Plus if both_int => Some(Value::Integer(as_i64(a).wrapping_add(as_i64(b)))),
        Plus => Some(Value::Float(af + bf)),
        Minus if both_int => Some(Value::Integer(as_i64(a).wrapping_sub(as_i64(b)))),
        Minus => Some(Value::Float(af - bf)),
        Star if both_int => Some(Value::Integer(as_i64(a).wrapping_mul(as_i64(b)))),
        Star => Some(Value::Float(af * bf)),
        _ => None,
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Integer(i) => *i,
        Value::Float(f) => *f as i64,
        _ => 0,
    }
}

/// Which opcode (`Eq`/`Lt`/`Le`, this VM has no dedicated `Gt`/`Ge`), and
/// whether the operands must swap, to realize each of the six relational
/// operators (`a > b` compiles as `b < a`).
fn compare_shape(op: &Token) -> (OpCode, bool, bool) {
    match op {
        Token::Eq => (OpCode::Eq, true, false),
        Token::Ne => (OpCode::Eq, false, false),
        Token::Lt => (OpCode::Lt, true, false),
        Token::Le => (OpCode::Le, true, false),
        Token::Gt => (OpCode::Lt, true, true),
        Token::Ge => (OpCode::Le, true, true),
        _ => unreachable!("not a comparison operator"),
    }
}

/// The `A` operand that makes `EQ`/`LT`/`LE` skip the instruction right
/// after it exactly when the comparison equals `want_true` — derived from
/// the executor's actual semantics (`vm::exec::mod`'s `Eq` arm skips when
/// `raw == (a != 0)`; its `Lt`/`Le` arm skips when `raw != (a != 0)`, the
/// opposite sense).
fn cond_skip_a(opcode: OpCode, want_true: bool) -> u32 {
    match opcode {
        OpCode::Eq => want_true as u32,
        _ => (!want_true) as u32,
    }
}
