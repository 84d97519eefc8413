//! Statement and Function-Body Code Generation
//!
//! Every statement runs inside its own temp frame: owned temporaries
//! created while evaluating its expressions are released when the
//! statement completes. Control flow keeps the ARC ledger balanced on
//! every exit path:
//!
//! - scope exit releases the scope's reference locals in reverse
//!   declaration order
//! - `break`/`continue` release scopes down to (and including) the
//!   enclosing loop's body scope; temporaries owned by the loop
//!   statement itself (the iterated list, a `keys()` snapshot) are
//!   released after the loop, where both exits land
//! - `return` materializes its value, then releases every live
//!   temporary and every scope before returning
//! - static locals are lifted to file scope with a first-hit guard and
//!   never released on function exit; program termination releases them
//!
//! `if`/`elif` chains lower to nested `else { if ... }` blocks so each
//! condition only evaluates when the previous one failed.

use super::{c_safe_name, CodeGen, CodeGenError, EmitScope};
use crate::ast::{BinOp, Decl, Expr, ForIter, FuncDecl, Stmt};
use crate::diag::Pos;
use crate::types::Type;
use std::collections::HashMap;
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    // ------------------------------------------------------------------
    // Top-level function walk
    // ------------------------------------------------------------------

    pub(super) fn emit_functions(&mut self) -> Result<(), CodeGenError> {
        let checked = self.checked;
        for decl in &checked.decls {
            match decl {
                Decl::Func(f) if !f.is_generic() => {
                    let Some(info) = checked.funcs.get(&f.name) else {
                        continue;
                    };
                    let c_name = format!("bm_{}", f.name);
                    self.emit_user_fn(f, &info.params, &info.ret, &c_name, None)?;
                }
                Decl::Class(c) => {
                    let Some(info) = checked.classes.get(&c.name) else {
                        continue;
                    };
                    self.emit_class_dtor(&c.name)?;
                    for m in &c.methods {
                        if m.name == "init" {
                            self.emit_ctor(&c.name, m, &info.init_params)?;
                        } else if let Some(sig) = info.methods.get(&m.name) {
                            let c_name = format!("bm_{}_{}", c.name, c_safe_name(&m.name));
                            let self_decl = format!("bm_{}* self", c.name);
                            self.emit_user_fn(m, &sig.params, &sig.ret, &c_name, Some(self_decl))?;
                        }
                    }
                    for iface in &info.interfaces.clone() {
                        self.emit_vtable(&c.name, iface)?;
                    }
                }
                Decl::Struct(s) => {
                    let Some(info) = checked.structs.get(&s.name) else {
                        continue;
                    };
                    for m in &s.methods {
                        if let Some(sig) = info.methods.get(&m.name) {
                            let c_name = format!("bm_{}_{}", s.name, c_safe_name(&m.name));
                            let self_decl = format!("bm_{} self", s.name);
                            self.emit_user_fn(m, &sig.params, &sig.ret, &c_name, Some(self_decl))?;
                        }
                    }
                }
                _ => {}
            }
        }
        for mono in &checked.monos {
            let c_name = format!("bm_{}", mono.mangled);
            self.emit_user_fn(&mono.decl, &mono.params, &mono.ret, &c_name, None)?;
        }
        Ok(())
    }

    fn emit_user_fn(
        &mut self,
        f: &FuncDecl,
        params: &[Type],
        ret: &Type,
        c_name: &str,
        self_decl: Option<String>,
    ) -> Result<(), CodeGenError> {
        let mut parts: Vec<String> = Vec::new();
        let mut bindings: Vec<(String, String)> = Vec::new();
        if let Some(sd) = &self_decl {
            parts.push(sd.clone());
            bindings.push(("self".to_string(), "self".to_string()));
        }
        for (p, t) in f.params.iter().zip(params.iter()) {
            let cn = c_safe_name(&p.name);
            parts.push(format!("{} {}", self.c_type(t), cn));
            bindings.push((p.name.clone(), cn));
        }
        let params_c = if parts.is_empty() {
            "void".to_string()
        } else {
            parts.join(", ")
        };
        let sig = format!("static {} {}({})", self.c_type(ret), c_name, params_c);

        self.begin_fn(c_name, ret.clone(), false);
        for (bname, cn) in bindings {
            self.bind_param(&bname, &cn);
        }
        for stmt in &f.body {
            self.emit_stmt(stmt)?;
        }
        self.finish_body(ret, &f.body, &f.pos)?;
        self.write_fn(&sig)
    }

    fn emit_ctor(
        &mut self,
        class: &str,
        init: &FuncDecl,
        params: &[Type],
    ) -> Result<(), CodeGenError> {
        let mut parts: Vec<String> = Vec::new();
        let mut bindings: Vec<(String, String)> = Vec::new();
        for (p, t) in init.params.iter().zip(params.iter()) {
            let cn = c_safe_name(&p.name);
            parts.push(format!("{} {}", self.c_type(t), cn));
            bindings.push((p.name.clone(), cn));
        }
        parts.push("BmPos pos".to_string());
        let sig = format!("static bm_{0}* bm_{0}_new({1})", class, parts.join(", "));

        self.begin_fn(&format!("bm_{}_new", class), Type::Class(class.to_string()), true);
        self.line(&format!(
            "bm_{0}* self = (bm_{0}*)bm_alloc(sizeof(bm_{0}), pos);",
            class
        ));
        self.line("self->rc.rc = 1;");
        self.bind_param("self", "self");
        for (bname, cn) in bindings {
            self.bind_param(&bname, &cn);
        }
        for stmt in &init.body {
            self.emit_stmt(stmt)?;
        }
        // Fall off the end of init: release locals, hand out the object.
        self.release_scopes_from(0)?;
        self.line("return self;");
        self.write_fn(&sig)
    }

    // ------------------------------------------------------------------
    // Function-body plumbing
    // ------------------------------------------------------------------

    pub(super) fn begin_fn(&mut self, c_name: &str, ret: Type, in_ctor: bool) {
        self.body.clear();
        self.indent = 1;
        self.tmp = 0;
        self.temps.clear();
        self.scopes.clear();
        self.scopes.push(EmitScope {
            names: HashMap::new(),
            ref_locals: Vec::new(),
            is_loop: false,
        });
        self.in_ctor = in_ctor;
        self.fn_ret = ret;
        self.current_fn = c_name.trim_start_matches("bm_").to_string();
    }

    fn bind_param(&mut self, name: &str, c_name: &str) {
        self.scopes
            .last_mut()
            .expect("function scope")
            .names
            .insert(name.to_string(), c_name.to_string());
    }

    /// Close the body: handle falling off the end.
    fn finish_body(&mut self, ret: &Type, body: &[Stmt], pos: &Pos) -> Result<(), CodeGenError> {
        let ends_with_return = matches!(body.last(), Some(Stmt::Return { .. }));
        if ret.is_void() {
            if !ends_with_return {
                self.release_scopes_from(0)?;
            }
        } else if !ends_with_return {
            // Sound even when unreachable: a non-void body whose last
            // statement is control flow still needs a terminator.
            let p = self.pos_lit(pos);
            self.line(&format!("bm_panic({}, \"missing return\");", p));
        }
        Ok(())
    }

    pub(super) fn write_fn(&mut self, sig: &str) -> Result<(), CodeGenError> {
        writeln!(self.buf_protos, "{};", sig)?;
        writeln!(self.buf_fns, "{} {{", sig)?;
        self.buf_fns.push_str(&self.body.clone());
        writeln!(self.buf_fns, "}}")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn push_scope(&mut self, is_loop: bool) {
        self.scopes.push(EmitScope {
            names: HashMap::new(),
            ref_locals: Vec::new(),
            is_loop,
        });
    }

    /// Emit releases for one scope's reference locals (reverse order).
    fn release_scope_locals(&mut self, idx: usize) -> Result<(), CodeGenError> {
        let locals: Vec<(String, Type)> = self.scopes[idx].ref_locals.iter().rev().cloned().collect();
        for (name, ty) in locals {
            self.arc_release(&name, &ty)?;
        }
        Ok(())
    }

    fn pop_scope(&mut self) -> Result<(), CodeGenError> {
        self.release_scope_locals(self.scopes.len() - 1)?;
        self.scopes.pop();
        Ok(())
    }

    /// Releases for every scope at `from` and deeper (innermost first),
    /// without popping. Used by `return` and constructor exits.
    fn release_scopes_from(&mut self, from: usize) -> Result<(), CodeGenError> {
        for idx in (from..self.scopes.len()).rev() {
            self.release_scope_locals(idx)?;
        }
        Ok(())
    }

    /// Releases for `break`/`continue`: down to and including the
    /// innermost loop scope.
    fn release_to_loop(&mut self) -> Result<(), CodeGenError> {
        let Some(loop_idx) = self.scopes.iter().rposition(|s| s.is_loop) else {
            return Err("break outside loop reached emission".into());
        };
        self.release_scopes_from(loop_idx)
    }

    /// Releases for every live temporary in every open frame, innermost
    /// first, without consuming. Only `return` paths need this.
    fn release_all_temps(&mut self) -> Result<(), CodeGenError> {
        let pending: Vec<(String, Type)> = self
            .temps
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .filter(|slot| !slot.consumed)
            .map(|slot| (slot.name.clone(), slot.ty.clone()))
            .collect();
        for (name, ty) in pending {
            self.arc_release(&name, &ty)?;
        }
        Ok(())
    }

    fn declare_local(&mut self, name: &str, c_name: &str, ty: &Type, is_static: bool) {
        let scope = self.scopes.last_mut().expect("scope");
        scope.names.insert(name.to_string(), c_name.to_string());
        if !is_static && self.checked_needs_drop(ty) {
            let scope = self.scopes.last_mut().expect("scope");
            scope.ref_locals.push((c_name.to_string(), ty.clone()));
        }
    }

    fn checked_needs_drop(&self, ty: &Type) -> bool {
        self.needs_drop(ty)
    }

    /// A fresh C name for a local, shadow-safe within the C block
    /// structure because Bismut scopes map onto C blocks.
    fn local_c_name(&self, name: &str) -> String {
        c_safe_name(name)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(super) fn emit_block(&mut self, stmts: &[Stmt], is_loop: bool) -> Result<(), CodeGenError> {
        self.push_scope(is_loop);
        for s in stmts {
            self.emit_stmt(s)?;
        }
        self.pop_scope()
    }

    pub(super) fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::VarDecl {
                names,
                init,
                is_static,
                ..
            } => {
                self.push_temp_frame();
                if *is_static {
                    self.emit_static_decl(names, init)?;
                } else if names.len() > 1 {
                    self.emit_destructure(names, init)?;
                } else {
                    self.emit_single_decl(&names[0], init)?;
                }
                self.pop_temp_frame()
            }
            Stmt::Assign {
                target, op, value, ..
            } => {
                self.push_temp_frame();
                self.emit_assign(target, *op, value)?;
                self.pop_temp_frame()
            }
            Stmt::If {
                arms, else_body, ..
            } => {
                let mut closes = 0;
                for (i, arm) in arms.iter().enumerate() {
                    let c = self.emit_cond(&arm.cond)?;
                    self.open_block(&format!("if ({}) {{", c));
                    self.emit_block(&arm.body, false)?;
                    let has_more = i + 1 < arms.len() || else_body.is_some();
                    if has_more {
                        self.indent -= 1;
                        self.line("} else {");
                        self.indent += 1;
                        closes += 1;
                    } else {
                        self.close_block();
                    }
                }
                if let Some(eb) = else_body {
                    self.emit_block(eb, false)?;
                }
                for _ in 0..closes {
                    self.close_block();
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                self.open_block("for (;;) {");
                let c = self.emit_cond(cond)?;
                self.line(&format!("if (!{}) break;", c));
                self.emit_block(body, true)?;
                self.close_block();
                Ok(())
            }
            Stmt::For {
                var,
                iter,
                body,
                pos,
                ..
            } => self.emit_for(var, iter, body, pos),
            Stmt::Break { .. } => {
                self.release_to_loop()?;
                self.line("break;");
                Ok(())
            }
            Stmt::Continue { .. } => {
                self.release_to_loop()?;
                self.line("continue;");
                Ok(())
            }
            Stmt::Return { value, .. } => self.emit_return(value.as_ref()),
            Stmt::Expr(e) => {
                self.push_temp_frame();
                let _ = self.emit_expr(e)?;
                self.pop_temp_frame()
            }
        }
    }

    fn emit_single_decl(&mut self, name: &str, init: &Expr) -> Result<(), CodeGenError> {
        let v = self.emit_expr(init)?;
        let ty = self.ty_of(init)?.clone();
        let c_name = self.local_c_name(name);
        self.line(&format!("{} {} = {};", self.c_type(&ty), c_name, v.code));
        if self.needs_drop(&ty) {
            if v.temp.is_some() {
                self.consume(&v);
            } else {
                self.arc_retain(&c_name, &ty)?;
            }
        }
        self.declare_local(name, &c_name, &ty, false);
        Ok(())
    }

    fn emit_destructure(&mut self, names: &[String], init: &Expr) -> Result<(), CodeGenError> {
        let v = self.emit_expr(init)?;
        let Type::Tuple(items) = self.ty_of(init)?.clone() else {
            return Err("destructure of non-tuple reached emission".into());
        };
        let moved = v.temp.is_some();
        if moved {
            // Element ownership transfers from the temporary to the new
            // bindings; the tuple itself is never released.
            self.consume(&v);
        }
        for (i, (name, ty)) in names.iter().zip(items.iter()).enumerate() {
            let c_name = self.local_c_name(name);
            self.line(&format!(
                "{} {} = {}._{};",
                self.c_type(ty),
                c_name,
                v.code,
                i
            ));
            if self.needs_drop(ty) && !moved {
                self.arc_retain(&c_name, ty)?;
            }
            self.declare_local(name, &c_name, ty, false);
        }
        Ok(())
    }

    fn emit_static_decl(&mut self, names: &[String], init: &Expr) -> Result<(), CodeGenError> {
        if names.len() != 1 {
            return Err("static declarations bind a single name".into());
        }
        let name = &names[0];
        let ty = self.ty_of(init)?.clone();

        // File-scope slot with a per-function unique suffix.
        let base = format!("bm_static_{}_{}", self.current_fn, c_safe_name(name));
        let mut c_name = base.clone();
        let mut k = 1;
        while !self.statics_names.insert(c_name.clone()) {
            c_name = format!("{}_{}", base, k);
            k += 1;
        }
        writeln!(self.buf_globals, "static {} {};", self.c_type(&ty), c_name)?;
        writeln!(self.buf_globals, "static bool {}_init = false;", c_name)?;

        self.open_block(&format!("if (!{}_init) {{", c_name));
        self.line(&format!("{}_init = true;", c_name));
        self.push_temp_frame();
        let v = self.emit_expr(init)?;
        self.line(&format!("{} = {};", c_name, v.code));
        if self.needs_drop(&ty) {
            if v.temp.is_some() {
                self.consume(&v);
            } else {
                self.arc_retain(&c_name, &ty)?;
            }
        }
        self.pop_temp_frame()?;
        self.close_block();

        self.declare_local(name, &c_name, &ty, true);
        if self.needs_drop(&ty) {
            self.ref_statics.push((c_name, ty));
        }
        Ok(())
    }

    fn emit_assign(
        &mut self,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        // Subscript targets route through the container's set operation,
        // which does its own retain/release on the stored slot.
        if let crate::ast::ExprKind::Index { object, index } = &target.kind {
            let obj = self.emit_expr(object)?;
            let idx = self.emit_expr(index)?;
            let ot = self.ty_of(object)?.clone();
            let tag = ot.tag();
            let pos = self.pos_lit(&target.pos);
            match op {
                None => {
                    let v = self.emit_expr(value)?;
                    self.line(&format!(
                        "{}_set({}, {}, {}, {});",
                        tag, obj.code, idx.code, v.code, pos
                    ));
                }
                Some(op) => {
                    let elem = self.ty_of(target)?.clone();
                    let cur = self.fresh_tmp("t");
                    self.line(&format!(
                        "{} {} = {}_get({}, {}, {});",
                        self.c_type(&elem),
                        cur,
                        tag,
                        obj.code,
                        idx.code,
                        pos
                    ));
                    let nv = self.compound_value(&cur, op, value, &elem, &target.pos)?;
                    self.line(&format!(
                        "{}_set({}, {}, {}, {});",
                        tag, obj.code, idx.code, nv, pos
                    ));
                }
            }
            return Ok(());
        }

        let lv = self.emit_expr(target)?;
        let ty = self.ty_of(target)?.clone();

        match op {
            None => {
                let v = self.emit_expr(value)?;
                if !self.needs_drop(&ty) {
                    self.line(&format!("{} = {};", lv.code, v.code));
                    return Ok(());
                }
                // Alias-safe: hold the new value (+1) before the old one
                // is released, so `x = x` and friends stay sound.
                if v.temp.is_some() {
                    self.consume(&v);
                    self.arc_release(&lv.code, &ty)?;
                    self.line(&format!("{} = {};", lv.code, v.code));
                } else {
                    let nv = self.fresh_tmp("t");
                    self.line(&format!("{} {} = {};", self.c_type(&ty), nv, v.code));
                    self.arc_retain(&nv, &ty)?;
                    self.arc_release(&lv.code, &ty)?;
                    self.line(&format!("{} = {};", lv.code, nv));
                }
            }
            Some(op) => {
                let nv = self.compound_value(&lv.code, op, value, &ty, &target.pos)?;
                if matches!(ty, Type::Str) {
                    // The concat result is owned; swap it in.
                    self.arc_release(&lv.code, &ty)?;
                    self.line(&format!("{} = {};", lv.code, nv));
                } else {
                    self.line(&format!("{} = {};", lv.code, nv));
                }
            }
        }
        Ok(())
    }

    /// The C expression for `cur op rhs` in a compound assignment.
    /// String `+=` concatenates (owned, consumed by the caller).
    fn compound_value(
        &mut self,
        cur: &str,
        op: BinOp,
        rhs: &Expr,
        ty: &Type,
        pos: &Pos,
    ) -> Result<String, CodeGenError> {
        let r = self.emit_expr(rhs)?;
        if matches!(ty, Type::Str) {
            let p = self.pos_lit(pos);
            let v = self.new_owned_temp(&Type::Str, &format!("bm_str_concat({}, {}, {})", cur, r.code, p));
            self.consume(&v);
            return Ok(v.code);
        }
        let sym = match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            other => return Err(format!("compound operator {}", other).into()),
        };
        Ok(format!("(({}) {} ({}))", cur, sym, r.code))
    }

    fn emit_for(
        &mut self,
        var: &str,
        iter: &ForIter,
        body: &[Stmt],
        pos: &Pos,
    ) -> Result<(), CodeGenError> {
        self.push_temp_frame();
        match iter {
            ForIter::Range { start, stop } => {
                let sv = self.emit_expr(start)?;
                let tv = self.emit_expr(stop)?;
                let ty = self.ty_of(start)?.clone();
                let c = self.c_type(&ty);
                let ivar = self.local_c_name(var);
                let stop_var = self.fresh_tmp("stop");
                // Braces keep repeated loop-variable names apart in C.
                self.open_block("{");
                self.line(&format!("{} {} = {};", c, ivar, sv.code));
                self.line(&format!("{} {} = {};", c, stop_var, tv.code));
                self.open_block(&format!(
                    "for (; {} < {}; {}++) {{",
                    ivar, stop_var, ivar
                ));
                self.push_scope(true);
                self.scopes
                    .last_mut()
                    .expect("scope")
                    .names
                    .insert(var.to_string(), ivar);
                for s in body {
                    self.emit_stmt(s)?;
                }
                self.pop_scope()?;
                self.close_block();
                self.close_block();
            }
            ForIter::Each(seq) => {
                let sv = self.emit_expr(seq)?;
                let st = self.ty_of(seq)?.clone();
                let p = self.pos_lit(pos);
                match &st {
                    Type::List(elem) => {
                        self.emit_each_list(var, &sv.code, &st.tag(), elem, body, &p)?;
                    }
                    Type::Dict(k, _) => {
                        // Iterate a keys() snapshot; it lives in this
                        // statement's temp frame.
                        let key_list = Type::List(k.clone());
                        let keys = self
                            .new_owned_temp(&key_list, &format!("{}_keys({}, {})", st.tag(), sv.code, p));
                        let keys_code = keys.code.clone();
                        self.emit_each_list(var, &keys_code, &key_list.tag(), k, body, &p)?;
                    }
                    other => return Err(format!("cannot iterate {}", other).into()),
                }
            }
        }
        self.pop_temp_frame()
    }

    /// Shared list-walking loop for the list and dict-keys forms. The
    /// loop variable borrows the element; it is never released here.
    fn emit_each_list(
        &mut self,
        var: &str,
        seq_code: &str,
        tag: &str,
        elem: &Type,
        body: &[Stmt],
        pos: &str,
    ) -> Result<(), CodeGenError> {
        let idx = self.fresh_tmp("i");
        self.open_block(&format!(
            "for (int64_t {idx} = 0; {idx} < {tag}_len({seq}, {pos}); {idx}++) {{",
            idx = idx,
            tag = tag,
            seq = seq_code,
            pos = pos
        ));
        let vvar = self.local_c_name(var);
        self.line(&format!(
            "{} {} = {}_get({}, {}, {});",
            self.c_type(elem),
            vvar,
            tag,
            seq_code,
            idx,
            pos
        ));
        self.push_scope(true);
        self.scopes
            .last_mut()
            .expect("scope")
            .names
            .insert(var.to_string(), vvar);
        for s in body {
            self.emit_stmt(s)?;
        }
        self.pop_scope()?;
        self.close_block();
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Expr>) -> Result<(), CodeGenError> {
        self.push_temp_frame();
        match value {
            None => {
                self.release_all_temps()?;
                self.release_scopes_from(0)?;
                if self.in_ctor {
                    self.line("return self;");
                } else {
                    self.line("return;");
                }
            }
            Some(e) => {
                let v = self.emit_expr(e)?;
                let ty = self.fn_ret.clone();
                // Materialize before the scope dies under it.
                let ret = self.fresh_tmp("ret");
                self.line(&format!("{} {} = {};", self.c_type(&ty), ret, v.code));
                if self.needs_drop(&ty) {
                    if v.temp.is_some() {
                        self.consume(&v);
                    } else {
                        self.arc_retain(&ret, &ty)?;
                    }
                }
                self.release_all_temps()?;
                self.release_scopes_from(0)?;
                self.line(&format!("return {};", ret));
            }
        }
        self.temps.pop();
        Ok(())
    }
}
