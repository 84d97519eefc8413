//! String Interning, Globals and Program Entry
//!
//! Identical string literals share one emitted static `Str` carrying the
//! immortal refcount sentinel, so retain/release on them are no-ops and
//! they are never freed.
//!
//! Globals whose initializer is a plain numeric/bool literal become C
//! static initializers; everything else is lifted into `bm_init_globals`
//! in declaration order. Reference-kind globals (and lifted static
//! locals) are released in reverse order by `bm_exit_globals`. `main`
//! stores argv for the runtime, runs the init, the user's top-level
//! statements, the teardown, and (in debug builds) the leak report.

use super::{escape_c, CodeGen, CodeGenError};
use crate::ast::{Decl, Expr, ExprKind, GlobalDecl};
use crate::types::{Prim, Type};
use std::collections::HashMap;
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    /// Get or create the interned static for a string literal.
    pub(super) fn intern_str(&mut self, text: &str) -> Result<String, CodeGenError> {
        if let Some(id) = self.str_ids.get(text) {
            return Ok(format!("bm_strlit_{}", id));
        }
        let id = self.str_order.len();
        self.str_ids.insert(text.to_string(), id);
        self.str_order.push(text.to_string());
        writeln!(
            self.buf_strings,
            "static Str bm_strlit_{} = {{ {{ BM_RC_IMMORTAL }}, {}, \"{}\" }};",
            id,
            text.len(),
            escape_c(text)
        )?;
        Ok(format!("bm_strlit_{}", id))
    }

    pub(super) fn emit_globals_and_main(&mut self) -> Result<(), CodeGenError> {
        let checked = self.checked;
        let types: HashMap<&str, &Type> = checked
            .globals
            .iter()
            .map(|g| (g.name.as_str(), &g.ty))
            .collect();

        // Definitions; literal initializers stay static.
        let mut lifted: Vec<&GlobalDecl> = Vec::new();
        for decl in &checked.decls {
            let Decl::Global(g) = decl else { continue };
            let Some(ty) = types.get(g.name.as_str()).copied() else {
                continue;
            };
            match self.static_initializer(&g.init, ty) {
                Some(init) => {
                    writeln!(
                        self.buf_globals,
                        "static {} bm_{} = {};",
                        self.c_type(ty),
                        g.name,
                        init
                    )?;
                }
                None => {
                    writeln!(self.buf_globals, "static {} bm_{};", self.c_type(ty), g.name)?;
                    lifted.push(g);
                }
            }
        }

        // bm_init_globals: lifted initializers, declaration order.
        self.begin_fn("bm_init_globals", Type::VOID, false);
        for g in &lifted {
            let ty = (*types.get(g.name.as_str()).expect("lifted global has a type")).clone();
            self.push_temp_frame();
            let v = self.emit_expr(&g.init)?;
            self.line(&format!("bm_{} = {};", g.name, v.code));
            if self.needs_drop(&ty) {
                if v.temp.is_some() {
                    self.consume(&v);
                } else {
                    self.arc_retain(&format!("bm_{}", g.name), &ty)?;
                }
            }
            self.pop_temp_frame()?;
        }
        self.write_fn("static void bm_init_globals(void)")?;

        // bm_toplevel: the root file's top-level statements.
        self.begin_fn("bm_toplevel", Type::VOID, false);
        for decl in &checked.decls {
            if let Decl::Stmt(stmt) = decl {
                self.emit_stmt(stmt)?;
            }
        }
        let scope_refs: Vec<(String, Type)> = self
            .scopes
            .last()
            .map(|s| s.ref_locals.iter().rev().cloned().collect())
            .unwrap_or_default();
        for (name, ty) in scope_refs {
            self.arc_release(&name, &ty)?;
        }
        self.write_fn("static void bm_toplevel(void)")?;

        // bm_exit_globals: statics first (created later), then globals,
        // both in reverse order.
        self.begin_fn("bm_exit_globals", Type::VOID, false);
        let statics: Vec<(String, Type)> = self.ref_statics.iter().rev().cloned().collect();
        for (name, ty) in statics {
            self.arc_release(&name, &ty)?;
        }
        let ref_globals: Vec<(String, Type)> = checked
            .globals
            .iter()
            .rev()
            .filter(|g| self.needs_drop(&g.ty))
            .map(|g| (format!("bm_{}", g.name), g.ty.clone()))
            .collect();
        for (name, ty) in ref_globals {
            self.arc_release(&name, &ty)?;
        }
        self.write_fn("static void bm_exit_globals(void)")?;

        writeln!(self.buf_fns, "int main(int argc, char** argv) {{")?;
        writeln!(self.buf_fns, "    bm_argc = argc;")?;
        writeln!(self.buf_fns, "    bm_argv = argv;")?;
        writeln!(self.buf_fns, "    bm_init_globals();")?;
        writeln!(self.buf_fns, "    bm_toplevel();")?;
        writeln!(self.buf_fns, "    bm_exit_globals();")?;
        writeln!(self.buf_fns, "#ifdef BM_DEBUG_LEAKS")?;
        writeln!(self.buf_fns, "    bm_leak_report();")?;
        writeln!(self.buf_fns, "#endif")?;
        writeln!(self.buf_fns, "    return 0;")?;
        writeln!(self.buf_fns, "}}")?;
        Ok(())
    }

    /// A C static initializer for plain literal globals; `None` means
    /// the global is lifted into `bm_init_globals`.
    fn static_initializer(&self, init: &Expr, ty: &Type) -> Option<String> {
        if let Some(v) = self.checked.folded.get(&init.id) {
            let prim = match ty {
                Type::Prim(p) => *p,
                Type::Enum(_) => Prim::I64,
                _ => return None,
            };
            return Some(super::int_literal(prim, *v));
        }
        match (&init.kind, ty) {
            (ExprKind::Int { value, .. }, Type::Prim(p)) if p.is_integer() => {
                Some(super::int_literal(*p, *value))
            }
            (ExprKind::CharLit(code), Type::Prim(p)) if p.is_integer() => {
                Some(super::int_literal(*p, *code))
            }
            (ExprKind::Float { text }, Type::Prim(Prim::F32)) => Some(format!("{}f", text)),
            (ExprKind::Float { text }, Type::Prim(Prim::F64)) => Some(text.clone()),
            (ExprKind::Bool(b), Type::Prim(Prim::Bool)) => {
                Some(if *b { "true" } else { "false" }.to_string())
            }
            _ => None,
        }
    }
}
