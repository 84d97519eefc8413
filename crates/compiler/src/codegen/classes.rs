//! Classes, Structs and Interface Dispatch
//!
//! For each class: a C struct with the `Rc` header first, a constructor
//! that zero-allocates, sets rc = 1 and runs the `init` body, a
//! destructor that releases reference-kind fields, and plain functions
//! for methods (`self` is the class pointer).
//!
//! For each interface: a vtable struct whose first slots are the class
//! name (for diagnostics) and the object destructor, a heap-allocated
//! fat-pointer box `{ Rc rc; void* obj; const Vtbl* vtbl; }`, and three
//! helpers — `_make` (boxing, retains the object), `_as` (checked
//! downcast, borrowed result) and one `_dyn` trampoline per method (nil
//! check + dispatch through the vtable). For every implementing
//! (class, interface) pair a static vtable is emitted with one thunk per
//! method adapting `void* self` to the concrete class pointer.

use super::{c_safe_name, CodeGen, CodeGenError};
use crate::typecheck::MethodSig;
use crate::types::Type;
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    /// Vtable, interface-box and class struct definitions, plus the
    /// interface helper functions.
    pub(super) fn emit_class_defs(&mut self) -> Result<(), CodeGenError> {
        let interfaces: Vec<_> = self.checked.interfaces.values().cloned().collect();
        for iface in &interfaces {
            writeln!(self.buf_classdefs, "struct bm_{}_vtbl {{", iface.name)?;
            writeln!(self.buf_classdefs, "    const char* name;")?;
            writeln!(self.buf_classdefs, "    void (*drop_obj)(void*);")?;
            for (mname, sig) in &iface.methods {
                let params = self.thunk_params(sig);
                writeln!(
                    self.buf_classdefs,
                    "    {} (*{})({});",
                    self.c_type(&sig.ret),
                    c_safe_name(mname),
                    params
                )?;
            }
            writeln!(self.buf_classdefs, "}};")?;
            writeln!(
                self.buf_classdefs,
                "struct bm_{0} {{ Rc rc; void* obj; const bm_{0}_vtbl* vtbl; }};",
                iface.name
            )?;
        }

        let classes: Vec<_> = self.checked.classes.values().cloned().collect();
        for class in &classes {
            writeln!(self.buf_classdefs, "struct bm_{} {{", class.name)?;
            writeln!(self.buf_classdefs, "    Rc rc;")?;
            for (fname, ft) in &class.fields {
                writeln!(
                    self.buf_classdefs,
                    "    {} {};",
                    self.c_type(ft),
                    c_safe_name(fname)
                )?;
            }
            writeln!(self.buf_classdefs, "}};")?;
        }

        for iface in &interfaces {
            self.emit_iface_helpers(&iface.name, &iface.methods)?;
        }
        Ok(())
    }

    fn thunk_params(&self, sig: &MethodSig) -> String {
        let mut parts = vec!["void* self".to_string()];
        for (i, p) in sig.params.iter().enumerate() {
            parts.push(format!("{} a{}", self.c_type(p), i));
        }
        parts.join(", ")
    }

    fn emit_iface_helpers(
        &mut self,
        name: &str,
        methods: &[(String, MethodSig)],
    ) -> Result<(), CodeGenError> {
        // drop: release the boxed object through its vtable slot
        writeln!(self.buf_protos, "static void bm_{}_drop(void* p);", name)?;
        writeln!(self.buf_fns, "static void bm_{}_drop(void* p) {{", name)?;
        writeln!(self.buf_fns, "    bm_{0}* it = (bm_{0}*)p;", name)?;
        writeln!(
            self.buf_fns,
            "    if (it->obj) bm_release(it->obj, it->vtbl->drop_obj);"
        )?;
        writeln!(self.buf_fns, "}}")?;

        // make: box an object pointer with its vtable; None stays None
        writeln!(
            self.buf_protos,
            "static bm_{0}* bm_{0}_make(void* obj, const bm_{0}_vtbl* vtbl, BmPos pos);",
            name
        )?;
        writeln!(
            self.buf_fns,
            "static bm_{0}* bm_{0}_make(void* obj, const bm_{0}_vtbl* vtbl, BmPos pos) {{",
            name
        )?;
        writeln!(self.buf_fns, "    if (!obj) return NULL;")?;
        writeln!(
            self.buf_fns,
            "    bm_{0}* it = (bm_{0}*)bm_alloc(sizeof(bm_{0}), pos);",
            name
        )?;
        writeln!(self.buf_fns, "    it->rc.rc = 1;")?;
        writeln!(self.buf_fns, "    bm_retain(obj);")?;
        writeln!(self.buf_fns, "    it->obj = obj;")?;
        writeln!(self.buf_fns, "    it->vtbl = vtbl;")?;
        writeln!(self.buf_fns, "    return it;")?;
        writeln!(self.buf_fns, "}}")?;

        // as: checked downcast; the result is borrowed from the box
        writeln!(
            self.buf_protos,
            "static void* bm_{0}_as(bm_{0}* it, const bm_{0}_vtbl* want, BmPos pos);",
            name
        )?;
        writeln!(
            self.buf_fns,
            "static void* bm_{0}_as(bm_{0}* it, const bm_{0}_vtbl* want, BmPos pos) {{",
            name
        )?;
        writeln!(self.buf_fns, "    if (!it || it->vtbl != want) bm_panic_cast(pos);")?;
        writeln!(self.buf_fns, "    return it->obj;")?;
        writeln!(self.buf_fns, "}}")?;

        // one dynamic-dispatch trampoline per method (nil check + call)
        for (mname, sig) in methods {
            let mut params = vec![format!("bm_{}* it", name)];
            let mut args = Vec::new();
            for (i, p) in sig.params.iter().enumerate() {
                params.push(format!("{} a{}", self.c_type(p), i));
                args.push(format!("a{}", i));
            }
            params.push("BmPos pos".to_string());
            let sig_text = format!(
                "static {} bm_{}_{}_dyn({})",
                self.c_type(&sig.ret),
                name,
                c_safe_name(mname),
                params.join(", ")
            );
            writeln!(self.buf_protos, "{};", sig_text)?;
            writeln!(self.buf_fns, "{} {{", sig_text)?;
            writeln!(self.buf_fns, "    if (!it) bm_panic_nil(pos);")?;
            let call = format!(
                "it->vtbl->{}({})",
                c_safe_name(mname),
                std::iter::once("it->obj".to_string())
                    .chain(args)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if sig.ret.is_void() {
                writeln!(self.buf_fns, "    {};", call)?;
            } else {
                writeln!(self.buf_fns, "    return {};", call)?;
            }
            writeln!(self.buf_fns, "}}")?;
        }
        Ok(())
    }

    /// Thunks and the static vtable for one (class, interface) pair.
    pub(super) fn emit_vtable(&mut self, class: &str, iface: &str) -> Result<(), CodeGenError> {
        let methods = self.checked.interfaces[iface].methods.clone();
        let mut slots = vec![
            format!("\"{}\"", super::escape_c(class)),
            format!("bm_{}_drop", class),
        ];
        for (mname, sig) in &methods {
            let thunk = format!("bm_{}_{}_{}", class, iface, c_safe_name(mname));
            let mut params = vec!["void* self".to_string()];
            let mut args = vec![format!("(bm_{}*)self", class)];
            for (i, p) in sig.params.iter().enumerate() {
                params.push(format!("{} a{}", self.c_type(p), i));
                args.push(format!("a{}", i));
            }
            let sig_text = format!(
                "static {} {}({})",
                self.c_type(&sig.ret),
                thunk,
                params.join(", ")
            );
            writeln!(self.buf_protos, "{};", sig_text)?;
            writeln!(self.buf_fns, "{} {{", sig_text)?;
            let call = format!("bm_{}_{}({})", class, c_safe_name(mname), args.join(", "));
            if sig.ret.is_void() {
                writeln!(self.buf_fns, "    {};", call)?;
            } else {
                writeln!(self.buf_fns, "    return {};", call)?;
            }
            writeln!(self.buf_fns, "}}")?;
            slots.push(thunk);
        }
        writeln!(
            self.buf_vtables,
            "static const bm_{0}_vtbl bm_{1}_{0}_vtbl = {{ {2} }};",
            iface,
            class,
            slots.join(", ")
        )?;
        Ok(())
    }

    /// Destructor: release reference-kind fields (tuples element-wise).
    pub(super) fn emit_class_dtor(&mut self, class: &str) -> Result<(), CodeGenError> {
        let fields = self.checked.classes[class].fields.clone();
        writeln!(self.buf_protos, "static void bm_{}_drop(void* p);", class)?;
        writeln!(self.buf_fns, "static void bm_{}_drop(void* p) {{", class)?;
        let mut any = false;
        let mut lines = String::new();
        for (fname, ft) in &fields {
            if self.needs_drop(ft) {
                any = true;
                self.write_release_lines(
                    &format!("it->{}", c_safe_name(fname)),
                    ft,
                    &mut lines,
                )?;
            }
        }
        if any {
            writeln!(self.buf_fns, "    bm_{0}* it = (bm_{0}*)p;", class)?;
            self.buf_fns.push_str(&lines);
        } else {
            writeln!(self.buf_fns, "    (void)p;")?;
        }
        writeln!(self.buf_fns, "}}")?;
        Ok(())
    }

    /// Release lines for a field expression, recursing into tuples.
    fn write_release_lines(
        &mut self,
        expr: &str,
        t: &Type,
        out: &mut String,
    ) -> Result<(), CodeGenError> {
        match t {
            Type::Tuple(items) => {
                for (i, it) in items.iter().enumerate() {
                    if self.needs_drop(it) {
                        self.write_release_lines(&format!("{}._{}", expr, i), it, out)?;
                    }
                }
            }
            t => {
                let dtor = self
                    .drop_fn(t)
                    .ok_or_else(|| format!("no destructor for {}", t))?;
                writeln!(out, "    bm_release((void*)({}), {});", expr, dtor)?;
            }
        }
        Ok(())
    }
}
