//! Container Template Instantiation
//!
//! Emits the typedefs and macro expansions for every distinct `List[T]`,
//! `Dict[K, V]`, tuple type and function-pointer type the unit uses.
//! Tags are deterministic fingerprints of the element types, so a fixed
//! input yields byte-identical instantiations.
//!
//! Each container expansion receives a RETAIN and a RELEASE hook chosen
//! by the element's kind: `BM_NOP` for value kinds, `BM_RETAIN_OBJ` plus
//! a generated `BM_REL_<tag>` macro for reference kinds, and generated
//! per-tuple helper functions for tuples that carry reference elements.
//! Dicts use the string-keyed template when the key is `str` and the
//! integer-keyed template otherwise (enums and bool are integer-repr).
//! Every dict also gets its `keys()` expansion against the matching list
//! type.

use super::{c_prim, CodeGen, CodeGenError};
use crate::types::{Prim, Type};
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    /// Forward typedefs for every aggregate, then fn-pointer typedefs.
    pub(super) fn emit_typedefs(&mut self) -> Result<(), CodeGenError> {
        for name in self.checked.structs.keys() {
            writeln!(self.buf_typedefs, "typedef struct bm_{0} bm_{0};", name)?;
        }
        for tag in self.tuples.keys() {
            writeln!(self.buf_typedefs, "typedef struct {0} {0};", tag)?;
        }
        for name in self.checked.classes.keys() {
            writeln!(self.buf_typedefs, "typedef struct bm_{0} bm_{0};", name)?;
        }
        for name in self.checked.interfaces.keys() {
            writeln!(self.buf_typedefs, "typedef struct bm_{0}_vtbl bm_{0}_vtbl;", name)?;
            writeln!(self.buf_typedefs, "typedef struct bm_{0} bm_{0};", name)?;
        }
        for tag in self.lists.keys().chain(self.dicts.keys()) {
            writeln!(self.buf_typedefs, "typedef struct {0} {0};", tag)?;
        }

        let fnptrs = self.fnptrs.clone();
        for (tag, (params, ret)) in &fnptrs {
            let params_c = if params.is_empty() {
                "void".to_string()
            } else {
                params
                    .iter()
                    .map(|p| self.c_type(p))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            writeln!(
                self.buf_fnptrs,
                "typedef {} (*{})({});",
                self.c_type(ret),
                tag,
                params_c
            )?;
        }
        Ok(())
    }

    /// Full definitions for structs and tuples, dependency order: a
    /// value type embedding another value type needs it complete first.
    pub(super) fn emit_value_defs(&mut self) -> Result<(), CodeGenError> {
        let mut done: Vec<String> = Vec::new();
        let struct_names: Vec<String> = self.checked.structs.keys().cloned().collect();
        let tuple_tags: Vec<String> = self.tuples.keys().cloned().collect();
        for name in &struct_names {
            self.emit_value_def(&Type::Struct(name.clone()), &mut done)?;
        }
        for tag in &tuple_tags {
            let items = self.tuples[tag].clone();
            self.emit_value_def(&Type::Tuple(items), &mut done)?;
        }
        Ok(())
    }

    fn emit_value_def(&mut self, t: &Type, done: &mut Vec<String>) -> Result<(), CodeGenError> {
        let key = t.tag();
        if done.contains(&key) {
            return Ok(());
        }
        done.push(key);

        match t {
            Type::Struct(name) => {
                let fields = self.checked.structs[name].fields.clone();
                for (_, ft) in &fields {
                    if matches!(ft, Type::Struct(_) | Type::Tuple(_)) {
                        self.emit_value_def(ft, done)?;
                    }
                }
                writeln!(self.buf_valuedefs, "struct bm_{} {{", name)?;
                for (fname, ft) in &fields {
                    writeln!(
                        self.buf_valuedefs,
                        "    {} {};",
                        self.c_type(ft),
                        super::c_safe_name(fname)
                    )?;
                }
                writeln!(self.buf_valuedefs, "}};")?;
            }
            Type::Tuple(items) => {
                for it in items {
                    if matches!(it, Type::Struct(_) | Type::Tuple(_)) {
                        self.emit_value_def(it, done)?;
                    }
                }
                writeln!(self.buf_valuedefs, "struct {} {{", t.tag())?;
                for (i, it) in items.iter().enumerate() {
                    writeln!(self.buf_valuedefs, "    {} _{};", self.c_type(it), i)?;
                }
                writeln!(self.buf_valuedefs, "}};")?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The RETAIN/RELEASE hook macro names for an element type, emitting
    /// the per-tag definitions on first use.
    fn elem_hooks(&mut self, elem: &Type) -> Result<(String, String), CodeGenError> {
        if !self.needs_drop(elem) {
            return Ok(("BM_NOP".to_string(), "BM_NOP".to_string()));
        }
        let tag = elem.tag();

        if let Type::Tuple(items) = elem {
            if !self.hooks_emitted.insert(tag.clone()) {
                return Ok((format!("BM_RET_{}", tag), format!("BM_REL_{}", tag)));
            }
            // Inner tuples first, so their helpers exist.
            let items = items.clone();
            for it in &items {
                if self.needs_drop(it) {
                    self.elem_hooks(it)?;
                }
            }
            writeln!(
                self.buf_containers,
                "static inline void {}_retain({} v) {{",
                tag, tag
            )?;
            let mut retain_body = String::new();
            let mut release_body = String::new();
            for (i, it) in items.iter().enumerate() {
                self.write_value_arc(&format!("v._{}", i), it, &mut retain_body, &mut release_body)?;
            }
            self.buf_containers.push_str(&retain_body);
            writeln!(self.buf_containers, "}}")?;
            writeln!(
                self.buf_containers,
                "static inline void {}_release({} v) {{",
                tag, tag
            )?;
            self.buf_containers.push_str(&release_body);
            writeln!(self.buf_containers, "}}")?;
            writeln!(self.buf_containers, "#define BM_RET_{0}(x) {0}_retain(x)", tag)?;
            writeln!(self.buf_containers, "#define BM_REL_{0}(x) {0}_release(x)", tag)?;
            return Ok((format!("BM_RET_{}", tag), format!("BM_REL_{}", tag)));
        }

        // Plain reference element.
        if self.hooks_emitted.insert(tag.clone()) {
            let dtor = self
                .drop_fn(elem)
                .ok_or_else(|| format!("no destructor for element type {}", elem))?;
            writeln!(
                self.buf_containers,
                "#define BM_REL_{}(x) bm_release((void*)(x), {})",
                tag, dtor
            )?;
        }
        Ok(("BM_RETAIN_OBJ".to_string(), format!("BM_REL_{}", tag)))
    }

    /// Retain/release lines for one value expression, element-wise for
    /// nested tuples.
    fn write_value_arc(
        &mut self,
        expr: &str,
        t: &Type,
        retain_out: &mut String,
        release_out: &mut String,
    ) -> Result<(), CodeGenError> {
        match t {
            Type::Tuple(items) => {
                for (i, it) in items.iter().enumerate() {
                    self.write_value_arc(&format!("{}._{}", expr, i), it, retain_out, release_out)?;
                }
            }
            t if t.is_ref_kind() => {
                let dtor = self
                    .drop_fn(t)
                    .ok_or_else(|| format!("no destructor for {}", t))?;
                writeln!(retain_out, "    bm_retain((void*)({}));", expr)?;
                writeln!(release_out, "    bm_release((void*)({}), {});", expr, dtor)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Emit all container instantiations, inner expansions first.
    pub(super) fn emit_container_impls(&mut self) -> Result<(), CodeGenError> {
        let mut order: Vec<(usize, String, bool)> = Vec::new();
        for (tag, elem) in &self.lists {
            order.push((Self::type_depth(&Type::List(Box::new(elem.clone()))), tag.clone(), true));
        }
        for (tag, (k, v)) in &self.dicts {
            let depth = Self::type_depth(&Type::Dict(Box::new(k.clone()), Box::new(v.clone())));
            order.push((depth, tag.clone(), false));
        }
        order.sort();

        for (_, tag, is_list) in order {
            if is_list {
                let elem = self.lists[&tag].clone();
                let (retain, release) = self.elem_hooks(&elem)?;
                writeln!(
                    self.buf_containers,
                    "BM_LIST_IMPL({}, {}, {}, {})",
                    tag,
                    self.c_type(&elem),
                    retain,
                    release
                )?;
            } else {
                let (k, v) = self.dicts[&tag].clone();
                let (retain, release) = self.elem_hooks(&v)?;
                let keylist = Type::List(Box::new(k.clone())).tag();
                if matches!(k, Type::Str) {
                    writeln!(
                        self.buf_containers,
                        "BM_DICT_STR_IMPL({}, {}, {}, {})",
                        tag,
                        self.c_type(&v),
                        retain,
                        release
                    )?;
                    writeln!(
                        self.buf_containers,
                        "BM_DICT_STR_KEYS_IMPL({}, {})",
                        tag, keylist
                    )?;
                } else {
                    writeln!(
                        self.buf_containers,
                        "BM_DICT_IMPL({}, {}, {}, {}, {})",
                        tag,
                        self.dict_key_c_type(&k),
                        self.c_type(&v),
                        retain,
                        release
                    )?;
                    writeln!(
                        self.buf_containers,
                        "BM_DICT_KEYS_IMPL({}, {})",
                        tag, keylist
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Integer-keyed dicts store their key by value; enums are i64.
    fn dict_key_c_type(&self, k: &Type) -> String {
        match k {
            Type::Enum(_) => c_prim(Prim::I64).to_string(),
            other => self.c_type(other),
        }
    }
}
