//! C99 Code Generation
//!
//! Produces one self-contained C99 translation unit from the checker's
//! decorated output. All emission is `writeln!` into string buffers that
//! are assembled in a fixed order, so output is byte-identical for a
//! fixed input:
//!
//! 1. `#include "bismut_rt.h"`
//! 2. forward typedefs for every named/instantiated aggregate
//! 3. function-pointer typedefs
//! 4. value-type definitions (structs and tuples, dependency order)
//! 5. class, vtable and interface-box definitions
//! 6. function prototypes (user functions, methods, ctors, dtors,
//!    interface helpers, thunks, monomorphizations)
//! 7. container template instantiations (inner types first)
//! 8. interned string literals (immortal)
//! 9. globals and lifted static locals
//! 10. static vtables per (class, interface) pair
//! 11. function definitions
//! 12. `main`
//!
//! # Reference counting
//!
//! Reference-kind values are owned pointers with an `Rc` header. The
//! emitter enforces the ownership discipline:
//! - expression temporaries that own a reference (call results,
//!   collection literals, string concatenation, interface boxing) are
//!   hoisted into named locals and released at the end of the statement
//!   unless ownership is consumed by a binding or store
//! - assignment to a reference lvalue is alias-safe: the new value is
//!   retained (or its temporary consumed) before the old value is
//!   released
//! - function parameters are borrowed; scope exit releases a scope's
//!   locals in reverse declaration order; `return` materializes its
//!   value first
//! - tuples own their reference elements element-wise
//!
//! # Module structure
//!
//! - `containers.rs`: List/Dict/tuple/fn-pointer instantiation
//! - `classes.rs`: classes, structs, interfaces, vtables
//! - `exprs.rs`: expression emission and ownership tracking
//! - `stmts.rs`: statements, ARC stores, scope releases
//! - `globals.rs`: string interning, globals, `main`
//! - `error.rs`: error type

mod classes;
mod containers;
mod error;
mod exprs;
mod globals;
mod stmts;

pub use error::CodeGenError;

use crate::diag::Pos;
use crate::typecheck::Checked;
use crate::types::{Prim, Type};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

/// A hoisted expression temporary that owns its value until the end of
/// the statement (or until a binding consumes it).
struct TempSlot {
    name: String,
    ty: Type,
    consumed: bool,
}

/// One emitted scope: name mapping plus the reference-kind locals to
/// release when the scope dies.
struct EmitScope {
    names: HashMap<String, String>,
    ref_locals: Vec<(String, Type)>,
    /// True for the scope a `break`/`continue` unwinds to
    is_loop: bool,
}

pub struct CodeGen<'a> {
    checked: &'a Checked,

    buf_typedefs: String,
    buf_fnptrs: String,
    buf_valuedefs: String,
    buf_classdefs: String,
    buf_protos: String,
    buf_containers: String,
    buf_strings: String,
    buf_globals: String,
    buf_vtables: String,
    buf_fns: String,

    // interned string literals, in first-use order
    str_ids: HashMap<String, usize>,
    str_order: Vec<String>,

    // instantiation sets keyed by fingerprint tag
    lists: BTreeMap<String, Type>,
    dicts: BTreeMap<String, (Type, Type)>,
    tuples: BTreeMap<String, Vec<Type>>,
    fnptrs: BTreeMap<String, (Vec<Type>, Type)>,

    // element hook macros already emitted, by element tag
    hooks_emitted: HashSet<String>,
    // fast global-name lookup for identifier resolution
    global_names: HashMap<String, Type>,

    // per-function emission state
    body: String,
    indent: usize,
    tmp: usize,
    temps: Vec<Vec<TempSlot>>,
    scopes: Vec<EmitScope>,
    /// Inside a constructor: bare `return` yields `self`
    in_ctor: bool,
    current_fn: String,
    fn_ret: Type,
    statics_names: HashSet<String>,
    /// File-scope statics of reference kind, released at termination
    ref_statics: Vec<(String, Type)>,
}

impl<'a> CodeGen<'a> {
    pub fn new(checked: &'a Checked) -> Self {
        let global_names = checked
            .globals
            .iter()
            .map(|g| (g.name.clone(), g.ty.clone()))
            .collect();
        CodeGen {
            checked,
            global_names,
            buf_typedefs: String::new(),
            buf_fnptrs: String::new(),
            buf_valuedefs: String::new(),
            buf_classdefs: String::new(),
            buf_protos: String::new(),
            buf_containers: String::new(),
            buf_strings: String::new(),
            buf_globals: String::new(),
            buf_vtables: String::new(),
            buf_fns: String::new(),
            str_ids: HashMap::new(),
            str_order: Vec::new(),
            lists: BTreeMap::new(),
            dicts: BTreeMap::new(),
            tuples: BTreeMap::new(),
            fnptrs: BTreeMap::new(),
            hooks_emitted: HashSet::new(),
            body: String::new(),
            indent: 0,
            tmp: 0,
            temps: Vec::new(),
            scopes: Vec::new(),
            in_ctor: false,
            current_fn: String::new(),
            fn_ret: Type::VOID,
            statics_names: HashSet::new(),
            ref_statics: Vec::new(),
        }
    }

    /// Generate the complete translation unit.
    pub fn emit_program(mut self) -> Result<String, CodeGenError> {
        self.collect_instantiations();
        self.emit_typedefs()?;
        self.emit_value_defs()?;
        self.emit_class_defs()?;
        self.emit_container_impls()?;
        self.emit_functions()?;
        self.emit_globals_and_main()?;

        let mut out = String::with_capacity(64 * 1024);
        writeln!(out, "/* generated by bismut; do not edit */")?;
        writeln!(out, "#include \"bismut_rt.h\"")?;
        writeln!(out)?;
        for buf in [
            &self.buf_typedefs,
            &self.buf_fnptrs,
            &self.buf_valuedefs,
            &self.buf_classdefs,
            &self.buf_protos,
            &self.buf_containers,
            &self.buf_strings,
            &self.buf_globals,
            &self.buf_vtables,
            &self.buf_fns,
        ] {
            if !buf.is_empty() {
                out.push_str(buf);
                out.push('\n');
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Naming and type mapping
    // ------------------------------------------------------------------

    /// C spelling of a Bismut type.
    fn c_type(&self, t: &Type) -> String {
        match t {
            Type::Prim(p) => c_prim(*p).to_string(),
            Type::Str => "Str*".to_string(),
            Type::List(_) | Type::Dict(_, _) => format!("{}*", t.tag()),
            Type::Tuple(_) | Type::FnPtr { .. } => t.tag(),
            Type::Class(n) | Type::Interface(n) => format!("bm_{}*", n),
            Type::Struct(n) => format!("bm_{}", n),
            Type::Enum(_) => "int64_t".to_string(),
            Type::Extern { .. } => "BmExtern*".to_string(),
            Type::None => "void*".to_string(),
            Type::Generic(g) => {
                // The checker substitutes every generic before emission.
                debug_assert!(false, "unsubstituted generic {}", g);
                "void*".to_string()
            }
        }
    }

    /// Destructor passed to `bm_release` for a reference-kind type.
    fn drop_fn(&self, t: &Type) -> Option<String> {
        match t {
            Type::Str => Some("bm_str_drop".to_string()),
            Type::List(_) | Type::Dict(_, _) => Some(format!("{}_drop", t.tag())),
            Type::Class(n) | Type::Interface(n) => Some(format!("bm_{}_drop", n)),
            Type::Extern { .. } => Some("bm_extern_drop".to_string()),
            _ => None,
        }
    }

    /// Whether scope exit / overwrite must do ARC work for this type.
    fn needs_drop(&self, t: &Type) -> bool {
        match t {
            Type::Tuple(items) => items.iter().any(|t| self.needs_drop(t)),
            t => t.is_ref_kind(),
        }
    }

    /// `BM_POS(...)` literal for runtime calls that can fail.
    fn pos_lit(&self, pos: &Pos) -> String {
        format!(
            "BM_POS(\"{}\", {}, {})",
            escape_c(&pos.file),
            pos.line,
            pos.col
        )
    }

    fn fresh_tmp(&mut self, prefix: &str) -> String {
        let name = format!("{}{}", prefix, self.tmp);
        self.tmp += 1;
        name
    }

    // ------------------------------------------------------------------
    // Body-line helpers
    // ------------------------------------------------------------------

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.body.push_str("    ");
        }
        self.body.push_str(text);
        self.body.push('\n');
    }

    fn open_block(&mut self, head: &str) {
        self.line(head);
        self.indent += 1;
    }

    fn close_block(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    // ------------------------------------------------------------------
    // Instantiation collection
    // ------------------------------------------------------------------

    /// Walk every type the checker recorded and register the container,
    /// tuple and fn-pointer instantiations the unit needs.
    fn collect_instantiations(&mut self) {
        let mut types: Vec<Type> = Vec::new();
        types.extend(self.checked.expr_types.values().cloned());
        for g in &self.checked.globals {
            types.push(g.ty.clone());
        }
        for f in self.checked.funcs.values() {
            // Generic templates never emit; their instantiations carry
            // the substituted types.
            if f.generics.is_empty() {
                types.extend(f.params.iter().cloned());
                types.push(f.ret.clone());
            }
        }
        for m in &self.checked.monos {
            types.extend(m.params.iter().cloned());
            types.push(m.ret.clone());
        }
        for c in self.checked.classes.values() {
            types.extend(c.fields.iter().map(|(_, t)| t.clone()));
            types.extend(c.init_params.iter().cloned());
            for sig in c.methods.values() {
                types.extend(sig.params.iter().cloned());
                types.push(sig.ret.clone());
            }
        }
        for s in self.checked.structs.values() {
            types.extend(s.fields.iter().map(|(_, t)| t.clone()));
            for sig in s.methods.values() {
                types.extend(sig.params.iter().cloned());
                types.push(sig.ret.clone());
            }
        }
        for i in self.checked.interfaces.values() {
            for (_, sig) in &i.methods {
                types.extend(sig.params.iter().cloned());
                types.push(sig.ret.clone());
            }
        }
        for t in types {
            if !t.has_generic() {
                self.register_type(&t);
            }
        }
    }

    fn register_type(&mut self, t: &Type) {
        match t {
            Type::List(elem) => {
                self.register_type(elem);
                self.lists.insert(t.tag(), (**elem).clone());
            }
            Type::Dict(k, v) => {
                self.register_type(k);
                self.register_type(v);
                // keys() specializes the matching list type
                self.register_type(&Type::List(k.clone()));
                self.dicts.insert(t.tag(), ((**k).clone(), (**v).clone()));
            }
            Type::Tuple(items) => {
                for item in items {
                    self.register_type(item);
                }
                self.tuples.insert(t.tag(), items.clone());
            }
            Type::FnPtr { params, ret } => {
                for p in params {
                    self.register_type(p);
                }
                self.register_type(ret);
                self.fnptrs
                    .insert(t.tag(), (params.clone(), (**ret).clone()));
            }
            _ => {}
        }
    }

    /// Nesting depth orders instantiations so inner expansions precede
    /// the outer ones that reference their drop functions.
    fn type_depth(t: &Type) -> usize {
        match t {
            Type::List(e) => 1 + Self::type_depth(e),
            Type::Dict(k, v) => 1 + Self::type_depth(k).max(Self::type_depth(v)),
            Type::Tuple(items) | Type::FnPtr { params: items, .. } => {
                1 + items.iter().map(Self::type_depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// C spelling of a primitive.
fn c_prim(p: Prim) -> &'static str {
    match p {
        Prim::I8 => "int8_t",
        Prim::I16 => "int16_t",
        Prim::I32 => "int32_t",
        Prim::I64 => "int64_t",
        Prim::U8 => "uint8_t",
        Prim::U16 => "uint16_t",
        Prim::U32 => "uint32_t",
        Prim::U64 => "uint64_t",
        Prim::F32 => "float",
        Prim::F64 => "double",
        Prim::Bool => "bool",
        Prim::Void => "void",
    }
}

/// Escape text for a C string literal.
fn escape_c(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                for b in c.to_string().as_bytes() {
                    out.push_str(&format!("\\x{:02x}", b));
                }
            }
        }
    }
    out
}

/// C keywords and runtime names a user identifier must not collide with.
fn c_safe_name(name: &str) -> String {
    const RESERVED: &[&str] = &[
        "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
        "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
        "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
        "union", "unsigned", "void", "volatile", "while", "main", "argc", "argv",
    ];
    if RESERVED.contains(&name) || name.starts_with("bm_") || name.starts_with("__") {
        format!("{}_v", name)
    } else {
        name.to_string()
    }
}

/// Emit an integer literal of the given primitive type.
fn int_literal(p: Prim, value: i64) -> String {
    match p {
        Prim::I64 => {
            if value == i64::MIN {
                "INT64_MIN".to_string()
            } else {
                format!("INT64_C({})", value)
            }
        }
        Prim::U64 => format!("UINT64_C({})", value as u64),
        _ => format!("{}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_c() {
        assert_eq!(escape_c("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_c("plain"), "plain");
    }

    #[test]
    fn test_c_safe_name() {
        assert_eq!(c_safe_name("x"), "x");
        assert_eq!(c_safe_name("int"), "int_v");
        assert_eq!(c_safe_name("bm_tricky"), "bm_tricky_v");
    }

    #[test]
    fn test_int_literal_forms() {
        assert_eq!(int_literal(Prim::I8, -5), "-5");
        assert_eq!(int_literal(Prim::I64, 7), "INT64_C(7)");
        assert_eq!(int_literal(Prim::U64, -1), "UINT64_C(18446744073709551615)");
        assert_eq!(int_literal(Prim::I64, i64::MIN), "INT64_MIN");
    }

    #[test]
    fn test_type_depth_orders_nesting() {
        let inner = Type::List(Box::new(Type::I64));
        let outer = Type::List(Box::new(inner.clone()));
        assert!(CodeGen::type_depth(&outer) > CodeGen::type_depth(&inner));
    }
}
