//! Expression Code Generation
//!
//! Expressions emit into the current function body as a mix of hoisted
//! prelude lines (calls, collection literals, short-circuit lowering)
//! and a final C expression string. Hoisting every call into a named
//! temporary fixes evaluation order left-to-right, which C alone would
//! not guarantee.
//!
//! Ownership: [`CVal::temp`] marks a value this statement owns (+1
//! refcount). Statement ends release all unconsumed temporaries in
//! reverse creation order; a binding or store that keeps the value
//! "consumes" the temporary instead of retaining a borrowed reference.
//! `and`/`or` lower to explicit control flow so their right-hand side
//! only evaluates (and only creates temporaries) when reached.

use super::{c_prim, int_literal, CodeGen, CodeGenError, TempSlot};
use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::typecheck::{Builtin, CallTarget, Coercion};
use crate::types::{Prim, Type};

/// An emitted expression: C code plus, when this statement owns the
/// value, the index of its temp slot.
pub(super) struct CVal {
    pub code: String,
    pub temp: Option<(usize, usize)>,
}

impl CVal {
    fn borrowed(code: impl Into<String>) -> Self {
        CVal {
            code: code.into(),
            temp: None,
        }
    }
}

impl<'a> CodeGen<'a> {
    // ------------------------------------------------------------------
    // Temp frames
    // ------------------------------------------------------------------

    pub(super) fn push_temp_frame(&mut self) {
        self.temps.push(Vec::new());
    }

    /// Release every unconsumed temporary of the innermost frame, in
    /// reverse creation order.
    pub(super) fn pop_temp_frame(&mut self) -> Result<(), CodeGenError> {
        let frame = self.temps.pop().expect("temp frame underflow");
        for slot in frame.iter().rev() {
            if !slot.consumed {
                self.arc_release(&slot.name.clone(), &slot.ty.clone())?;
            }
        }
        Ok(())
    }

    /// Declare an owned temporary holding `init` and register it for
    /// release at the end of the statement.
    pub(super) fn new_owned_temp(&mut self, ty: &Type, init: &str) -> CVal {
        let name = self.fresh_tmp("t");
        self.line(&format!("{} {} = {};", self.c_type(ty), name, init));
        let frame_idx = self.temps.len() - 1;
        let frame = self.temps.last_mut().expect("temp frame underflow");
        frame.push(TempSlot {
            name: name.clone(),
            ty: ty.clone(),
            consumed: false,
        });
        CVal {
            code: name,
            temp: Some((frame_idx, frame.len() - 1)),
        }
    }

    /// Hoist a value-kind result into a named local (evaluation order).
    fn new_plain_temp(&mut self, ty: &Type, init: &str) -> CVal {
        let name = self.fresh_tmp("t");
        self.line(&format!("{} {} = {};", self.c_type(ty), name, init));
        CVal::borrowed(name)
    }

    /// Mark an owned temporary as moved into a binding or store.
    pub(super) fn consume(&mut self, val: &CVal) {
        if let Some((f, i)) = val.temp {
            self.temps[f][i].consumed = true;
        }
    }

    // ------------------------------------------------------------------
    // ARC helpers
    // ------------------------------------------------------------------

    /// Retain one value (element-wise for tuples); no-op for pure value
    /// kinds.
    pub(super) fn arc_retain(&mut self, expr: &str, ty: &Type) -> Result<(), CodeGenError> {
        match ty {
            Type::Tuple(items) => {
                for (i, it) in items.iter().enumerate() {
                    if self.needs_drop(it) {
                        self.arc_retain(&format!("{}._{}", expr, i), it)?;
                    }
                }
            }
            t if t.is_ref_kind() => {
                self.line(&format!("bm_retain((void*)({}));", expr));
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn arc_release(&mut self, expr: &str, ty: &Type) -> Result<(), CodeGenError> {
        match ty {
            Type::Tuple(items) => {
                for (i, it) in items.iter().enumerate().rev() {
                    if self.needs_drop(it) {
                        self.arc_release(&format!("{}._{}", expr, i), it)?;
                    }
                }
            }
            t if t.is_ref_kind() => {
                let dtor = self
                    .drop_fn(t)
                    .ok_or_else(|| format!("no destructor for {}", t))?;
                self.line(&format!("bm_release((void*)({}), {});", expr, dtor));
            }
            _ => {}
        }
        Ok(())
    }

    /// Truthiness conversion for condition positions.
    pub(super) fn truthy(&self, code: &str, ty: &Type) -> String {
        match ty {
            Type::Prim(Prim::Bool) => code.to_string(),
            Type::Prim(_) | Type::Enum(_) => format!("(({}) != 0)", code),
            _ => format!("(({}) != NULL)", code),
        }
    }

    /// Lower a condition expression to a named bool, releasing any
    /// temporaries it created before the branch uses the bool.
    pub(super) fn emit_cond(&mut self, e: &Expr) -> Result<String, CodeGenError> {
        self.push_temp_frame();
        let val = self.emit_expr(e)?;
        let ty = self.ty_of(e)?.clone();
        let name = self.fresh_tmp("c");
        let conv = self.truthy(&val.code, &ty);
        self.line(&format!("bool {} = {};", name, conv));
        self.pop_temp_frame()?;
        Ok(name)
    }

    pub(super) fn ty_of(&self, e: &Expr) -> Result<&Type, CodeGenError> {
        self.checked
            .expr_types
            .get(&e.id)
            .ok_or_else(|| CodeGenError::Logic(format!("untyped expression at {}", e.pos)))
    }

    // ------------------------------------------------------------------
    // Expression dispatch
    // ------------------------------------------------------------------

    pub(super) fn emit_expr(&mut self, e: &Expr) -> Result<CVal, CodeGenError> {
        // Constant-folded subtrees (adapted literals, enum variants)
        if let Some(v) = self.checked.folded.get(&e.id) {
            let ty = self.ty_of(e)?;
            let prim = match ty {
                Type::Prim(p) => *p,
                Type::Enum(_) => Prim::I64,
                other => {
                    return Err(format!("folded constant of type {}", other).into());
                }
            };
            return Ok(CVal::borrowed(int_literal(prim, *v)));
        }
        // Compile-time decided `is`
        if let Some(b) = self.checked.is_folds.get(&e.id) {
            return Ok(CVal::borrowed(if *b { "true" } else { "false" }));
        }

        let base = match &e.kind {
            ExprKind::Int { value, .. } => {
                let prim = match self.ty_of(e)? {
                    Type::Prim(p) => *p,
                    _ => Prim::I64,
                };
                CVal::borrowed(int_literal(prim, *value))
            }
            ExprKind::CharLit(code) => CVal::borrowed(int_literal(Prim::I64, *code)),
            ExprKind::Float { text } => {
                let suffix = match self.ty_of(e)? {
                    Type::Prim(Prim::F32) => "f",
                    _ => "",
                };
                CVal::borrowed(format!("{}{}", text, suffix))
            }
            ExprKind::Str(text) => {
                let name = self.intern_str(text)?;
                CVal::borrowed(format!("(&{})", name))
            }
            ExprKind::Bool(b) => CVal::borrowed(if *b { "true" } else { "false" }),
            ExprKind::NoneLit => CVal::borrowed("NULL"),
            ExprKind::Ident(name) => self.emit_ident(e, name)?,
            ExprKind::Member { object, field } => self.emit_member(e, object, field)?,
            ExprKind::Index { object, index } => self.emit_index(e, object, index)?,
            ExprKind::Call { callee, args, .. } => self.emit_call(e, callee, args)?,
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand)?,
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(e, *op, lhs, rhs)?,
            ExprKind::Is { value, ty } => self.emit_is(value, ty)?,
            ExprKind::As { value, .. } => self.emit_as(e, value)?,
            ExprKind::TupleLit(items) => self.emit_tuple_lit(e, items)?,
            ExprKind::ListLit { items, .. } => self.emit_list_lit(e, items)?,
            ExprKind::DictLit { entries, .. } => self.emit_dict_lit(e, entries)?,
        };

        // Class value entering an interface context: box it.
        if let Some(Coercion::WrapIface { class, iface }) = self.checked.coercions.get(&e.id) {
            let (class, iface) = (class.clone(), iface.clone());
            let pos = self.pos_lit(&e.pos);
            let init = format!(
                "bm_{0}_make((void*)({1}), &bm_{2}_{0}_vtbl, {3})",
                iface, base.code, class, pos
            );
            let boxed = self.new_owned_temp(&Type::Interface(iface), &init);
            return Ok(boxed);
        }
        Ok(base)
    }

    fn emit_ident(&mut self, e: &Expr, name: &str) -> Result<CVal, CodeGenError> {
        if let Some(cname) = self.lookup_scope_name(name) {
            return Ok(CVal::borrowed(cname));
        }
        if self.global_names.contains_key(name) {
            return Ok(CVal::borrowed(format!("bm_{}", name)));
        }
        if self.checked.funcs.contains_key(name) {
            return Ok(CVal::borrowed(format!("bm_{}", name)));
        }
        if let Some((ty, value)) = self.checked.extern_consts.get(name) {
            let c = self.c_type(ty);
            return Ok(CVal::borrowed(format!("(({})({}))", c, value)));
        }
        Err(format!("unresolved identifier '{}' at {}", name, e.pos).into())
    }

    pub(super) fn lookup_scope_name(&self, name: &str) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.names.get(name))
            .cloned()
    }

    fn emit_member(&mut self, e: &Expr, object: &Expr, field: &str) -> Result<CVal, CodeGenError> {
        let obj = self.emit_expr(object)?;
        let ot = self.ty_of(object)?.clone();
        let field_c = super::c_safe_name(field);
        let code = match &ot {
            Type::Class(class) => {
                if matches!(&object.kind, ExprKind::Ident(n) if n == "self") {
                    format!("{}->{}", obj.code, field_c)
                } else {
                    let pos = self.pos_lit(&e.pos);
                    format!(
                        "((bm_{}*)bm_nil_check((void*)({}), {}))->{}",
                        class, obj.code, pos, field_c
                    )
                }
            }
            Type::Struct(_) => format!("({}).{}", obj.code, field_c),
            other => {
                return Err(format!("member access on {} at {}", other, e.pos).into());
            }
        };
        Ok(CVal::borrowed(code))
    }

    fn emit_index(&mut self, e: &Expr, object: &Expr, index: &Expr) -> Result<CVal, CodeGenError> {
        let obj = self.emit_expr(object)?;
        let idx = self.emit_expr(index)?;
        let ot = self.ty_of(object)?.clone();
        let pos = self.pos_lit(&e.pos);
        let code = format!("{}_get({}, {}, {})", ot.tag(), obj.code, idx.code, pos);
        // Subscript reads borrow from the container.
        Ok(CVal::borrowed(code))
    }

    fn emit_unary(&mut self, op: UnOp, operand: &Expr) -> Result<CVal, CodeGenError> {
        let v = self.emit_expr(operand)?;
        let ty = self.ty_of(operand)?.clone();
        let code = match op {
            UnOp::Not => format!("(!{})", self.truthy(&v.code, &ty)),
            UnOp::Neg => format!("(-({}))", v.code),
            UnOp::BitNot => format!("(~({}))", v.code),
        };
        Ok(CVal::borrowed(code))
    }

    fn emit_binary(
        &mut self,
        e: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<CVal, CodeGenError> {
        match op {
            BinOp::And | BinOp::Or => return self.emit_short_circuit(op, lhs, rhs),
            BinOp::Eq | BinOp::Ne => {
                let neg = op == BinOp::Ne;
                // Null tests against None
                if matches!(rhs.kind, ExprKind::NoneLit) {
                    let l = self.emit_expr(lhs)?;
                    let cmp = if neg { "!=" } else { "==" };
                    return Ok(CVal::borrowed(format!("(({}) {} NULL)", l.code, cmp)));
                }
                if matches!(lhs.kind, ExprKind::NoneLit) {
                    let r = self.emit_expr(rhs)?;
                    let cmp = if neg { "!=" } else { "==" };
                    return Ok(CVal::borrowed(format!("(({}) {} NULL)", r.code, cmp)));
                }
                // String equality is byte equality
                if matches!(self.ty_of(lhs)?, Type::Str) {
                    let l = self.emit_expr(lhs)?;
                    let r = self.emit_expr(rhs)?;
                    let bang = if neg { "!" } else { "" };
                    return Ok(CVal::borrowed(format!(
                        "({}bm_str_eq({}, {}))",
                        bang, l.code, r.code
                    )));
                }
            }
            BinOp::Add => {
                if matches!(self.ty_of(e)?, Type::Str) {
                    let l = self.emit_expr(lhs)?;
                    let r = self.emit_expr(rhs)?;
                    let pos = self.pos_lit(&e.pos);
                    let init = format!("bm_str_concat({}, {}, {})", l.code, r.code, pos);
                    return Ok(self.new_owned_temp(&Type::Str, &init));
                }
            }
            _ => {}
        }

        let l = self.emit_expr(lhs)?;
        let r = self.emit_expr(rhs)?;
        let sym = match op {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::And | BinOp::Or => unreachable!("lowered above"),
        };
        Ok(CVal::borrowed(format!("(({}) {} ({}))", l.code, sym, r.code)))
    }

    /// `and`/`or` lower to control flow so the right side only runs (and
    /// only allocates temporaries) when the left side demands it.
    fn emit_short_circuit(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<CVal, CodeGenError> {
        let out = self.fresh_tmp("b");
        let l = self.emit_expr(lhs)?;
        let lt = self.ty_of(lhs)?.clone();
        let conv = self.truthy(&l.code, &lt);
        self.line(&format!("bool {} = {};", out, conv));
        let guard = match op {
            BinOp::And => format!("if ({}) {{", out),
            _ => format!("if (!{}) {{", out),
        };
        self.open_block(&guard);
        self.push_temp_frame();
        let r = self.emit_expr(rhs)?;
        let rt = self.ty_of(rhs)?.clone();
        let rconv = self.truthy(&r.code, &rt);
        self.line(&format!("{} = {};", out, rconv));
        self.pop_temp_frame()?;
        self.close_block();
        Ok(CVal::borrowed(out))
    }

    fn emit_is(&mut self, value: &Expr, ty: &crate::ast::TypeExpr) -> Result<CVal, CodeGenError> {
        let v = self.emit_expr(value)?;
        // `x is None` — anything else reaching here is an interface LHS
        // against a class (the checker folded every concrete case).
        if matches!(ty, crate::ast::TypeExpr::Name { name, .. } if name == "None") {
            return Ok(CVal::borrowed(format!("(({}) == NULL)", v.code)));
        }
        let Type::Interface(iface) = self.ty_of(value)?.clone() else {
            return Err(format!("runtime 'is' on non-interface at {}", value.pos).into());
        };
        let class = match ty {
            crate::ast::TypeExpr::Name { name, .. } => name.clone(),
            _ => return Err("malformed 'is' target".into()),
        };
        let tv = self.new_plain_temp(&Type::Interface(iface.clone()), &v.code);
        Ok(CVal::borrowed(format!(
            "(({0} != NULL) && ({0}->vtbl == &bm_{1}_{2}_vtbl))",
            tv.code, class, iface
        )))
    }

    fn emit_as(&mut self, e: &Expr, value: &Expr) -> Result<CVal, CodeGenError> {
        let v = self.emit_expr(value)?;
        let Type::Interface(iface) = self.ty_of(value)?.clone() else {
            return Err(format!("'as' on non-interface at {}", value.pos).into());
        };
        let Type::Class(class) = self.ty_of(e)?.clone() else {
            return Err("'as' target is not a class".into());
        };
        let pos = self.pos_lit(&e.pos);
        // Downcast results are borrowed from the interface box.
        Ok(CVal::borrowed(format!(
            "((bm_{0}*)bm_{1}_as({2}, &bm_{0}_{1}_vtbl, {3}))",
            class, iface, v.code, pos
        )))
    }

    fn emit_tuple_lit(&mut self, e: &Expr, items: &[Expr]) -> Result<CVal, CodeGenError> {
        let ty = self.ty_of(e)?.clone();
        let Type::Tuple(elem_types) = &ty else {
            return Err("tuple literal without tuple type".into());
        };
        let mut vals = Vec::new();
        for item in items {
            vals.push(self.emit_expr(item)?);
        }
        let init = format!(
            "{{ {} }}",
            vals.iter().map(|v| v.code.clone()).collect::<Vec<_>>().join(", ")
        );
        if !self.needs_drop(&ty) {
            let name = self.fresh_tmp("t");
            self.line(&format!("{} {} = {};", self.c_type(&ty), name, init));
            return Ok(CVal::borrowed(name));
        }
        // The tuple owns its reference elements: consume owned element
        // temporaries, retain borrowed ones.
        let tup = self.new_owned_temp(&ty, &init);
        let elem_types = elem_types.clone();
        for (idx, (item_val, it)) in vals.iter().zip(elem_types.iter()).enumerate() {
            if !self.needs_drop(it) {
                continue;
            }
            if item_val.temp.is_some() {
                self.consume(item_val);
            } else {
                let expr = format!("{}._{}", tup.code, idx);
                self.arc_retain(&expr, it)?;
            }
        }
        Ok(tup)
    }

    fn emit_list_lit(&mut self, e: &Expr, items: &[Expr]) -> Result<CVal, CodeGenError> {
        let ty = self.ty_of(e)?.clone();
        let tag = ty.tag();
        let pos = self.pos_lit(&e.pos);
        let lst = self.new_owned_temp(&ty, &format!("{}_new({})", tag, pos));
        for item in items {
            let v = self.emit_expr(item)?;
            let ipos = self.pos_lit(&item.pos);
            self.line(&format!("{}_push({}, {}, {});", tag, lst.code, v.code, ipos));
        }
        Ok(lst)
    }

    fn emit_dict_lit(&mut self, e: &Expr, entries: &[(Expr, Expr)]) -> Result<CVal, CodeGenError> {
        let ty = self.ty_of(e)?.clone();
        let tag = ty.tag();
        let pos = self.pos_lit(&e.pos);
        let dict = self.new_owned_temp(&ty, &format!("{}_new({})", tag, pos));
        for (k, v) in entries {
            let kv = self.emit_expr(k)?;
            let vv = self.emit_expr(v)?;
            let epos = self.pos_lit(&k.pos);
            self.line(&format!(
                "{}_set({}, {}, {}, {});",
                tag, dict.code, kv.code, vv.code, epos
            ));
        }
        Ok(dict)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn emit_call(&mut self, e: &Expr, callee: &Expr, args: &[Expr]) -> Result<CVal, CodeGenError> {
        let target = self
            .checked
            .calls
            .get(&e.id)
            .cloned()
            .ok_or_else(|| CodeGenError::Logic(format!("unresolved call at {}", e.pos)))?;
        let pos = self.pos_lit(&e.pos);

        match target {
            CallTarget::Builtin(b) => self.emit_builtin(e, b, callee, args),
            CallTarget::Cast(p) => {
                let v = self.emit_expr(&args[0])?;
                Ok(CVal::borrowed(format!("(({})({}))", c_prim(p), v.code)))
            }
            CallTarget::Func { name } | CallTarget::Mono { mangled: name } => {
                let argv = self.emit_args(args)?;
                let call = format!("bm_{}({})", name, argv.join(", "));
                self.finish_call(e, call)
            }
            CallTarget::Ctor { class } => {
                let mut argv = self.emit_args(args)?;
                argv.push(pos);
                let call = format!("bm_{}_new({})", class, argv.join(", "));
                self.finish_call(e, call)
            }
            CallTarget::Method { recv, name } => {
                let ExprKind::Member { object, .. } = &callee.kind else {
                    return Err("method call without receiver".into());
                };
                let obj = self.emit_expr(object)?;
                let recv_code = match &recv {
                    Type::Class(class) => {
                        if matches!(&object.kind, ExprKind::Ident(n) if n == "self") {
                            obj.code
                        } else {
                            format!(
                                "((bm_{}*)bm_nil_check((void*)({}), {}))",
                                class, obj.code, pos
                            )
                        }
                    }
                    Type::Struct(_) => obj.code,
                    other => return Err(format!("method receiver of type {}", other).into()),
                };
                let recv_name = match &recv {
                    Type::Class(n) | Type::Struct(n) => n.clone(),
                    _ => unreachable!(),
                };
                let mut argv = vec![recv_code];
                argv.extend(self.emit_args(args)?);
                let call = format!(
                    "bm_{}_{}({})",
                    recv_name,
                    super::c_safe_name(&name),
                    argv.join(", ")
                );
                self.finish_call(e, call)
            }
            CallTarget::IfaceMethod { iface, name } => {
                let ExprKind::Member { object, .. } = &callee.kind else {
                    return Err("interface call without receiver".into());
                };
                let obj = self.emit_expr(object)?;
                let mut argv = vec![obj.code];
                argv.extend(self.emit_args(args)?);
                argv.push(pos);
                let call = format!(
                    "bm_{}_{}_dyn({})",
                    iface,
                    super::c_safe_name(&name),
                    argv.join(", ")
                );
                self.finish_call(e, call)
            }
            CallTarget::ExternFunc { name } => {
                let info = self.checked.extern_funcs[&name].clone();
                let mut argv = Vec::new();
                for (arg, pty) in args.iter().zip(info.params.iter()) {
                    let v = self.emit_expr(arg)?;
                    match pty {
                        Type::Extern { .. } => {
                            let apos = self.pos_lit(&arg.pos);
                            argv.push(format!("bm_extern_handle({}, {})", v.code, apos));
                        }
                        _ => argv.push(v.code),
                    }
                }
                let call = format!("{}({})", info.c_name, argv.join(", "));
                match &info.ret {
                    Type::Extern { name: tname, .. } => {
                        let dtor = self
                            .checked
                            .extern_types
                            .get(tname)
                            .and_then(|t| t.dtor.clone())
                            .map(|d| format!("(void (*)(void*)){}", d))
                            .unwrap_or_else(|| "NULL".to_string());
                        let init = format!("bm_extern_wrap({}, {}, {})", call, dtor, pos);
                        Ok(self.new_owned_temp(&info.ret.clone(), &init))
                    }
                    _ => self.finish_call(e, call),
                }
            }
            CallTarget::FnPtr => {
                let f = self.emit_expr(callee)?;
                let argv = self.emit_args(args)?;
                let call = format!("({})({})", f.code, argv.join(", "));
                self.finish_call(e, call)
            }
        }
    }

    fn emit_args(&mut self, args: &[Expr]) -> Result<Vec<String>, CodeGenError> {
        let mut out = Vec::new();
        for arg in args {
            out.push(self.emit_expr(arg)?.code);
        }
        Ok(out)
    }

    /// Hoist a call's result; reference results are owned temporaries.
    fn finish_call(&mut self, e: &Expr, call: String) -> Result<CVal, CodeGenError> {
        let ret = self.ty_of(e)?.clone();
        if ret.is_void() {
            self.line(&format!("{};", call));
            return Ok(CVal::borrowed(""));
        }
        if self.needs_drop(&ret) {
            Ok(self.new_owned_temp(&ret, &call))
        } else {
            Ok(self.new_plain_temp(&ret, &call))
        }
    }

    fn emit_builtin(
        &mut self,
        e: &Expr,
        b: Builtin,
        callee: &Expr,
        args: &[Expr],
    ) -> Result<CVal, CodeGenError> {
        let pos = self.pos_lit(&e.pos);
        let receiver = || -> Result<&Expr, CodeGenError> {
            match &callee.kind {
                ExprKind::Member { object, .. } => Ok(object),
                _ => Err("builtin method without receiver".into()),
            }
        };

        match b {
            Builtin::Print => {
                let v = self.emit_expr(&args[0])?;
                let ty = self.ty_of(&args[0])?.clone();
                let call = self.print_call(&v.code, &ty)?;
                self.line(&format!("{};", call));
                Ok(CVal::borrowed(""))
            }
            Builtin::PrintFmt => {
                let fmt = self.emit_expr(&args[0])?;
                let mut ctors = Vec::new();
                for arg in &args[1..] {
                    let v = self.emit_expr(arg)?;
                    let ty = self.ty_of(arg)?.clone();
                    ctors.push(self.fmt_arg(&v.code, &ty)?);
                }
                let arr = self.fresh_tmp("fa");
                self.line(&format!("FmtArg {}[] = {{ {} }};", arr, ctors.join(", ")));
                self.line(&format!(
                    "bm_print_fmt({}, {}, {}, {});",
                    fmt.code,
                    arr,
                    ctors.len(),
                    pos
                ));
                Ok(CVal::borrowed(""))
            }
            Builtin::Assert => {
                let v = self.emit_expr(&args[0])?;
                let ty = self.ty_of(&args[0])?.clone();
                let conv = self.truthy(&v.code, &ty);
                self.line(&format!("bm_assert({}, {});", conv, pos));
                Ok(CVal::borrowed(""))
            }
            Builtin::Panic => {
                let v = self.emit_expr(&args[0])?;
                self.line(&format!("bm_panic({}, bm_str_cstr({}));", pos, v.code));
                Ok(CVal::borrowed(""))
            }
            Builtin::StrLen => {
                let obj = receiver()?.clone();
                let v = self.emit_expr(&obj)?;
                let call = format!(
                    "bm_str_len((Str*)bm_nil_check((void*)({}), {}))",
                    v.code, pos
                );
                Ok(self.new_plain_temp(&Type::I64, &call))
            }
            Builtin::ListPush
            | Builtin::ListPop
            | Builtin::ListLen
            | Builtin::ListClear
            | Builtin::DictLen
            | Builtin::DictHas
            | Builtin::DictRemove
            | Builtin::DictKeys => {
                let obj = receiver()?.clone();
                let recv = self.emit_expr(&obj)?;
                let rt = self.ty_of(&obj)?.clone();
                let tag = rt.tag();
                match b {
                    Builtin::ListPush => {
                        let v = self.emit_expr(&args[0])?;
                        self.line(&format!("{}_push({}, {}, {});", tag, recv.code, v.code, pos));
                        Ok(CVal::borrowed(""))
                    }
                    Builtin::ListPop => {
                        let Type::List(elem) = &rt else {
                            return Err("pop on non-list".into());
                        };
                        let call = format!("{}_pop({}, {})", tag, recv.code, pos);
                        let elem = (**elem).clone();
                        if self.needs_drop(&elem) {
                            Ok(self.new_owned_temp(&elem, &call))
                        } else {
                            Ok(self.new_plain_temp(&elem, &call))
                        }
                    }
                    Builtin::ListLen | Builtin::DictLen => {
                        let call = format!("{}_len({}, {})", tag, recv.code, pos);
                        Ok(self.new_plain_temp(&Type::I64, &call))
                    }
                    Builtin::ListClear => {
                        self.line(&format!("{}_clear({}, {});", tag, recv.code, pos));
                        Ok(CVal::borrowed(""))
                    }
                    Builtin::DictHas => {
                        let k = self.emit_expr(&args[0])?;
                        let call = format!("{}_has({}, {}, {})", tag, recv.code, k.code, pos);
                        Ok(self.new_plain_temp(&Type::BOOL, &call))
                    }
                    Builtin::DictRemove => {
                        let k = self.emit_expr(&args[0])?;
                        self.line(&format!(
                            "{}_remove({}, {}, {});",
                            tag, recv.code, k.code, pos
                        ));
                        Ok(CVal::borrowed(""))
                    }
                    Builtin::DictKeys => {
                        let Type::Dict(k, _) = &rt else {
                            return Err("keys on non-dict".into());
                        };
                        let list_ty = Type::List(k.clone());
                        let call = format!("{}_keys({}, {})", tag, recv.code, pos);
                        Ok(self.new_owned_temp(&list_ty, &call))
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    fn print_call(&mut self, code: &str, ty: &Type) -> Result<String, CodeGenError> {
        Ok(match ty {
            Type::Prim(p) if p.is_integer() && p.is_signed() => {
                format!("bm_print_i64((int64_t)({}))", code)
            }
            Type::Prim(p) if p.is_integer() => {
                format!("bm_print_u64((uint64_t)({}))", code)
            }
            Type::Prim(p) if p.is_float() => format!("bm_print_f64((double)({}))", code),
            Type::Prim(Prim::Bool) => format!("bm_print_bool({})", code),
            Type::Enum(_) => format!("bm_print_i64({})", code),
            Type::Str => format!("bm_print_str({})", code),
            other => return Err(format!("unprintable type {}", other).into()),
        })
    }

    fn fmt_arg(&mut self, code: &str, ty: &Type) -> Result<String, CodeGenError> {
        Ok(match ty {
            Type::Prim(p) if p.is_integer() && p.is_signed() => {
                format!("bm_fmt_i64((int64_t)({}))", code)
            }
            Type::Prim(p) if p.is_integer() => format!("bm_fmt_u64((uint64_t)({}))", code),
            Type::Prim(p) if p.is_float() => format!("bm_fmt_f64((double)({}))", code),
            Type::Prim(Prim::Bool) => format!("bm_fmt_bool({})", code),
            Type::Enum(_) => format!("bm_fmt_i64({})", code),
            Type::Str => format!("bm_fmt_str({})", code),
            other => return Err(format!("unformattable type {}", other).into()),
        })
    }
}
