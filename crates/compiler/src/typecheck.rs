//! Type checker and semantic resolver for Bismut
//!
//! Runs in two passes over the flat, import-resolved declaration list:
//!
//! *Pass 1 — declaration collection.* Registers every top-level name and
//! kind, then resolves signatures: enum variant values, interface method
//! signatures, class fields/methods/implemented interfaces, struct
//! fields (value kind only), function signatures, extern manifests, and
//! finally global variables in declaration order (their initializers are
//! checked here so later globals and all function bodies can see their
//! types). Interface satisfaction and the class-field reference-cycle
//! warning also run in this pass.
//!
//! *Pass 2 — body checking.* Walks every function, method, constructor
//! and top-level statement with a lexical scope stack.
//!
//! The checker never aborts: it accumulates diagnostics and keeps going
//! statement by statement. The driver refuses to emit when any error was
//! recorded.
//!
//! Generic functions are monomorphized here: every distinct type-argument
//! tuple clones the declaration, renumbers its expression ids, and is
//! checked under the parameter substitution, so the decorated side tables
//! (`expr_types`, `calls`, `folded`, ...) are per-instantiation. The
//! emitter consumes those tables and never resolves a name again.

use crate::ast::*;
use crate::diag::{Diagnostics, Pos};
use crate::mutlib::ExternManifest;
use crate::types::{Prim, Type};
use std::collections::{BTreeMap, HashMap, HashSet};

// ======================================================================
// Decorated output
// ======================================================================

/// Checker-resolved builtin operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    PrintFmt,
    Assert,
    Panic,
    StrLen,
    ListPush,
    ListPop,
    ListLen,
    ListClear,
    DictLen,
    DictHas,
    DictRemove,
    DictKeys,
}

/// What a call expression resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Plain user function, by flat (module-mangled) name
    Func { name: String },
    /// Monomorphized generic instantiation, by mangled name
    Mono { mangled: String },
    /// Class constructor
    Ctor { class: String },
    /// Statically dispatched class or struct method
    Method { recv: Type, name: String },
    /// Dynamically dispatched interface method
    IfaceMethod { iface: String, name: String },
    Builtin(Builtin),
    /// Explicit primitive cast like `i32(x)`
    Cast(Prim),
    /// Function from an extern manifest
    ExternFunc { name: String },
    /// Call through a function-pointer value
    FnPtr,
}

/// An implicit representation change the emitter must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Wrap a class reference into an interface fat-pointer box
    WrapIface { class: String, iface: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub methods: BTreeMap<String, MethodSig>,
    pub interfaces: Vec<String>,
    pub init_params: Vec<Type>,
    pub decl_index: usize,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub methods: BTreeMap<String, MethodSig>,
    pub decl_index: usize,
}

#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub name: String,
    /// Variants with their computed i64 values, in declaration order
    pub variants: Vec<(String, i64)>,
}

#[derive(Debug, Clone)]
pub struct IfaceInfo {
    pub name: String,
    /// Method order fixes the vtable slot order
    pub methods: Vec<(String, MethodSig)>,
}

#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    pub generics: Vec<String>,
    pub params: Vec<Type>,
    pub ret: Type,
    pub decl_index: usize,
}

#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub name: String,
    pub ty: Type,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct ExternTypeInfo {
    pub lib: String,
    pub name: String,
    pub c_type: String,
    /// C destructor symbol from the manifest's `[dtor]` entry
    pub dtor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternFuncInfo {
    pub lib: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub c_name: String,
}

/// One monomorphized instantiation of a generic function.
#[derive(Debug, Clone)]
pub struct MonoFunc {
    pub mangled: String,
    /// Cloned declaration with fresh expression ids
    pub decl: FuncDecl,
    /// Substituted parameter types
    pub params: Vec<Type>,
    pub ret: Type,
    pub bindings: HashMap<String, Type>,
}

/// Everything the emitter needs, produced by [`TypeChecker::check`].
pub struct Checked {
    pub decls: Vec<Decl>,
    pub expr_types: HashMap<ExprId, Type>,
    pub calls: HashMap<ExprId, CallTarget>,
    /// Integer literal subtrees folded during width adaptation
    pub folded: HashMap<ExprId, i64>,
    /// `is` expressions decided at compile time
    pub is_folds: HashMap<ExprId, bool>,
    pub coercions: HashMap<ExprId, Coercion>,
    pub monos: Vec<MonoFunc>,
    pub classes: BTreeMap<String, ClassInfo>,
    pub structs: BTreeMap<String, StructInfo>,
    pub enums: BTreeMap<String, EnumInfo>,
    pub interfaces: BTreeMap<String, IfaceInfo>,
    pub funcs: BTreeMap<String, FuncInfo>,
    /// Globals in declaration order (also their init order)
    pub globals: Vec<GlobalInfo>,
    pub extern_types: BTreeMap<String, ExternTypeInfo>,
    pub extern_funcs: BTreeMap<String, ExternFuncInfo>,
    pub extern_consts: BTreeMap<String, (Type, String)>,
}

// ======================================================================
// Checker
// ======================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Class,
    Struct,
    Enum,
    Interface,
    ExternType,
}

#[derive(Debug, Clone)]
struct Local {
    ty: Type,
    is_const: bool,
}

pub struct TypeChecker<'a> {
    diags: &'a mut Diagnostics,
    decls: Vec<Decl>,

    kinds: HashMap<String, NameKind>,
    classes: BTreeMap<String, ClassInfo>,
    structs: BTreeMap<String, StructInfo>,
    enums: BTreeMap<String, EnumInfo>,
    interfaces: BTreeMap<String, IfaceInfo>,
    funcs: BTreeMap<String, FuncInfo>,
    globals: HashMap<String, GlobalInfo>,
    global_order: Vec<String>,
    extern_types: BTreeMap<String, ExternTypeInfo>,
    extern_funcs: BTreeMap<String, ExternFuncInfo>,
    extern_consts: BTreeMap<String, (Type, String)>,

    expr_types: HashMap<ExprId, Type>,
    calls: HashMap<ExprId, CallTarget>,
    folded: HashMap<ExprId, i64>,
    is_folds: HashMap<ExprId, bool>,
    coercions: HashMap<ExprId, Coercion>,

    monos: Vec<MonoFunc>,
    mono_seen: HashSet<String>,

    scopes: Vec<HashMap<String, Local>>,
    current_ret: Type,
    /// Generic parameter names of the function whose *signature* is being
    /// resolved (they resolve to `Type::Generic`)
    declared_generics: Vec<String>,
    /// Substitution active while a monomorphized body is checked
    generic_bindings: HashMap<String, Type>,
    next_expr_id: ExprId,
}

/// Hard ceiling on instantiations; a recursive generic that keeps
/// producing new type arguments would otherwise never terminate.
const MAX_MONO_INSTANTIATIONS: usize = 1024;

impl<'a> TypeChecker<'a> {
    pub fn check(
        decls: Vec<Decl>,
        externs: &[ExternManifest],
        next_expr_id: ExprId,
        diags: &'a mut Diagnostics,
    ) -> Checked {
        let mut checker = TypeChecker {
            diags,
            decls,
            kinds: HashMap::new(),
            classes: BTreeMap::new(),
            structs: BTreeMap::new(),
            enums: BTreeMap::new(),
            interfaces: BTreeMap::new(),
            funcs: BTreeMap::new(),
            globals: HashMap::new(),
            global_order: Vec::new(),
            extern_types: BTreeMap::new(),
            extern_funcs: BTreeMap::new(),
            extern_consts: BTreeMap::new(),
            expr_types: HashMap::new(),
            calls: HashMap::new(),
            folded: HashMap::new(),
            is_folds: HashMap::new(),
            coercions: HashMap::new(),
            monos: Vec::new(),
            mono_seen: HashSet::new(),
            scopes: Vec::new(),
            current_ret: Type::VOID,
            declared_generics: Vec::new(),
            generic_bindings: HashMap::new(),
            next_expr_id,
        };

        checker.collect_names(externs);
        checker.collect_signatures();
        checker.check_interface_satisfaction();
        checker.warn_field_cycles();
        checker.collect_globals();
        checker.check_bodies();
        checker.check_mono_bodies();

        let global_infos = checker
            .global_order
            .iter()
            .map(|n| checker.globals[n].clone())
            .collect();

        Checked {
            decls: checker.decls,
            expr_types: checker.expr_types,
            calls: checker.calls,
            folded: checker.folded,
            is_folds: checker.is_folds,
            coercions: checker.coercions,
            monos: checker.monos,
            classes: checker.classes,
            structs: checker.structs,
            enums: checker.enums,
            interfaces: checker.interfaces,
            funcs: checker.funcs,
            globals: global_infos,
            extern_types: checker.extern_types,
            extern_funcs: checker.extern_funcs,
            extern_consts: checker.extern_consts,
        }
    }

    // ------------------------------------------------------------------
    // Pass 1a: name registration
    // ------------------------------------------------------------------

    fn collect_names(&mut self, externs: &[ExternManifest]) {
        for decl in &self.decls {
            match decl {
                Decl::Class(c) => {
                    self.kinds.insert(c.name.clone(), NameKind::Class);
                }
                Decl::Struct(s) => {
                    self.kinds.insert(s.name.clone(), NameKind::Struct);
                }
                Decl::Enum(e) => {
                    self.kinds.insert(e.name.clone(), NameKind::Enum);
                }
                Decl::Interface(i) => {
                    self.kinds.insert(i.name.clone(), NameKind::Interface);
                }
                _ => {}
            }
        }
        for manifest in externs {
            for ty in &manifest.types {
                self.kinds.insert(ty.name.clone(), NameKind::ExternType);
                self.extern_types.insert(
                    ty.name.clone(),
                    ExternTypeInfo {
                        lib: manifest.lib.clone(),
                        name: ty.name.clone(),
                        c_type: ty.c_type.clone(),
                        dtor: manifest.dtor_for(&ty.name).map(String::from),
                    },
                );
            }
        }
        // Manifest functions and constants; types may reference any
        // manifest's [types] entries, so this runs after the loop above.
        for manifest in externs {
            for f in &manifest.functions {
                let mut params = Vec::new();
                let mut ok = true;
                for (_, ty_name) in &f.params {
                    match self.extern_type_by_name(ty_name) {
                        Some(t) => params.push(t),
                        None => {
                            self.extern_manifest_error(manifest, f.line, ty_name);
                            ok = false;
                        }
                    }
                }
                let ret = match &f.ret {
                    Some(name) => match self.extern_type_by_name(name) {
                        Some(t) => t,
                        None => {
                            self.extern_manifest_error(manifest, f.line, name);
                            ok = false;
                            Type::VOID
                        }
                    },
                    None => Type::VOID,
                };
                if ok {
                    self.extern_funcs.insert(
                        f.name.clone(),
                        ExternFuncInfo {
                            lib: manifest.lib.clone(),
                            params,
                            ret,
                            c_name: f.c_name.clone(),
                        },
                    );
                }
            }
            for c in &manifest.constants {
                if let Some(t) = self.extern_type_by_name(&c.ty) {
                    if matches!(t, Type::Prim(_)) {
                        self.extern_consts
                            .insert(c.name.clone(), (t, c.value.clone()));
                        continue;
                    }
                }
                self.diags.error(
                    &Pos::builtin(),
                    1,
                    format!(
                        "extern library '{}': constant '{}' must have a primitive type",
                        manifest.lib, c.name
                    ),
                );
            }
        }
    }

    fn extern_manifest_error(&mut self, manifest: &ExternManifest, line: u32, ty: &str) {
        self.diags.error(
            &Pos::new(std::rc::Rc::from(format!("{}.mutlib", manifest.lib)), line, 1),
            ty.len() as u32,
            format!("unknown type '{}' in extern manifest", ty),
        );
    }

    /// Type names usable inside extern manifests: primitives, `str`, and
    /// declared extern-opaque types.
    fn extern_type_by_name(&self, name: &str) -> Option<Type> {
        if let Some(p) = Prim::from_name(name) {
            return Some(Type::Prim(p));
        }
        if name == "str" {
            return Some(Type::Str);
        }
        self.extern_types.get(name).map(|t| Type::Extern {
            lib: t.lib.clone(),
            name: t.name.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Pass 1b: signature resolution
    // ------------------------------------------------------------------

    fn collect_signatures(&mut self) {
        let decls = std::mem::take(&mut self.decls);

        for (index, decl) in decls.iter().enumerate() {
            match decl {
                Decl::Enum(e) => self.collect_enum(e),
                Decl::Interface(i) => self.collect_interface(i),
                _ => {
                    let _ = index;
                }
            }
        }
        for (index, decl) in decls.iter().enumerate() {
            match decl {
                Decl::Class(c) => self.collect_class(c, index),
                Decl::Struct(s) => self.collect_struct(s, index),
                Decl::Func(f) => self.collect_func(f, index),
                _ => {}
            }
        }

        self.decls = decls;
    }

    fn collect_enum(&mut self, e: &EnumDecl) {
        let mut variants = Vec::new();
        let mut next = 0i64;
        let mut seen = HashSet::new();
        for v in &e.variants {
            if !seen.insert(v.name.clone()) {
                self.diags.error(
                    &v.pos,
                    v.name.len() as u32,
                    format!("duplicate enum variant '{}'", v.name),
                );
                continue;
            }
            if let Some(explicit) = v.value {
                next = explicit;
            }
            variants.push((v.name.clone(), next));
            next += 1;
        }
        self.enums.insert(
            e.name.clone(),
            EnumInfo {
                name: e.name.clone(),
                variants,
            },
        );
    }

    fn collect_interface(&mut self, i: &InterfaceDecl) {
        let mut methods = Vec::new();
        let mut seen = HashSet::new();
        for sig in &i.methods {
            if !seen.insert(sig.name.clone()) {
                self.diags.error(
                    &sig.pos,
                    sig.name.len() as u32,
                    format!("duplicate interface method '{}'", sig.name),
                );
                continue;
            }
            let params = sig
                .params
                .iter()
                .filter_map(|p| self.resolve_type(&p.ty))
                .collect();
            let ret = sig
                .ret
                .as_ref()
                .and_then(|t| self.resolve_type(t))
                .unwrap_or(Type::VOID);
            methods.push((sig.name.clone(), MethodSig { params, ret }));
        }
        self.interfaces.insert(
            i.name.clone(),
            IfaceInfo {
                name: i.name.clone(),
                methods,
            },
        );
    }

    fn collect_class(&mut self, c: &ClassDecl, index: usize) {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        for f in &c.fields {
            if !seen.insert(f.name.clone()) {
                self.diags.error(
                    &f.pos,
                    f.name.len() as u32,
                    format!("duplicate field '{}'", f.name),
                );
                continue;
            }
            if let Some(t) = self.resolve_type(&f.ty) {
                fields.push((f.name.clone(), t));
            }
        }

        let mut methods = BTreeMap::new();
        let mut init_params = Vec::new();
        let mut has_init = false;
        for m in &c.methods {
            if m.name == "init" {
                has_init = true;
                if m.ret.is_some() {
                    self.diags.error(
                        &m.pos,
                        4,
                        "'init' does not declare a return type",
                    );
                }
                init_params = m
                    .params
                    .iter()
                    .filter_map(|p| self.resolve_type(&p.ty))
                    .collect();
                continue;
            }
            if seen.contains(&m.name) || methods.contains_key(&m.name) {
                self.diags.error(
                    &m.pos,
                    m.name.len() as u32,
                    format!("duplicate member '{}'", m.name),
                );
                continue;
            }
            let sig = self.method_sig(m);
            methods.insert(m.name.clone(), sig);
        }
        if !has_init {
            self.diags.error(
                &c.pos,
                c.name.len() as u32,
                format!("class '{}' is missing an 'init' method", c.name),
            );
        }

        let mut interfaces = Vec::new();
        for (iface, ipos) in &c.interfaces {
            if self.interfaces.contains_key(iface) {
                interfaces.push(iface.clone());
            } else {
                self.diags.error(
                    ipos,
                    iface.len() as u32,
                    format!("unknown interface '{}'", iface),
                );
            }
        }

        self.classes.insert(
            c.name.clone(),
            ClassInfo {
                name: c.name.clone(),
                fields,
                methods,
                interfaces,
                init_params,
                decl_index: index,
                pos: c.pos.clone(),
            },
        );
    }

    fn collect_struct(&mut self, s: &StructDecl, index: usize) {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        for f in &s.fields {
            if !seen.insert(f.name.clone()) {
                self.diags.error(
                    &f.pos,
                    f.name.len() as u32,
                    format!("duplicate field '{}'", f.name),
                );
                continue;
            }
            if let Some(t) = self.resolve_type(&f.ty) {
                if t.is_ref_kind() {
                    self.diags.error(
                        &f.pos,
                        f.name.len() as u32,
                        format!(
                            "struct field '{}' has reference type {}; struct fields must be value types",
                            f.name, t
                        ),
                    );
                    continue;
                }
                fields.push((f.name.clone(), t));
            }
        }
        let mut methods = BTreeMap::new();
        for m in &s.methods {
            if m.name == "init" {
                self.diags
                    .error(&m.pos, 4, "structs cannot define an 'init' method");
                continue;
            }
            let sig = self.method_sig(m);
            methods.insert(m.name.clone(), sig);
        }
        self.structs.insert(
            s.name.clone(),
            StructInfo {
                name: s.name.clone(),
                fields,
                methods,
                decl_index: index,
            },
        );
    }

    fn method_sig(&mut self, m: &FuncDecl) -> MethodSig {
        let params = m
            .params
            .iter()
            .filter_map(|p| self.resolve_type(&p.ty))
            .collect();
        let ret = m
            .ret
            .as_ref()
            .and_then(|t| self.resolve_type(t))
            .unwrap_or(Type::VOID);
        MethodSig { params, ret }
    }

    fn collect_func(&mut self, f: &FuncDecl, index: usize) {
        if matches!(f.name.as_str(), "print" | "assert" | "panic" | "range") {
            self.diags.error(
                &f.pos,
                f.name.len() as u32,
                format!("'{}' redefines a builtin", f.name),
            );
            return;
        }
        self.declared_generics = f.generics.clone();
        let params = f
            .params
            .iter()
            .filter_map(|p| self.resolve_type(&p.ty))
            .collect();
        let ret = f
            .ret
            .as_ref()
            .and_then(|t| self.resolve_type(t))
            .unwrap_or(Type::VOID);
        self.declared_generics.clear();
        self.funcs.insert(
            f.name.clone(),
            FuncInfo {
                name: f.name.clone(),
                generics: f.generics.clone(),
                params,
                ret,
                decl_index: index,
            },
        );
    }

    fn check_interface_satisfaction(&mut self) {
        let mut errors = Vec::new();
        for class in self.classes.values() {
            for iface_name in &class.interfaces {
                let iface = &self.interfaces[iface_name];
                for (mname, msig) in &iface.methods {
                    match class.methods.get(mname) {
                        None => errors.push((
                            class.pos.clone(),
                            class.name.len() as u32,
                            format!(
                                "class '{}' does not implement method '{}' of interface '{}'",
                                class.name, mname, iface_name
                            ),
                        )),
                        Some(have) if have != msig => errors.push((
                            class.pos.clone(),
                            class.name.len() as u32,
                            format!(
                                "method '{}' of class '{}' does not match the signature declared by interface '{}'",
                                mname, class.name, iface_name
                            ),
                        )),
                        Some(_) => {}
                    }
                }
            }
        }
        for (pos, span, msg) in errors {
            self.diags.error(&pos, span, msg);
        }
    }

    /// Warn when class fields (looked through containers and tuples) can
    /// form a reference cycle; pure reference counting cannot reclaim it.
    fn warn_field_cycles(&mut self) {
        fn class_edges(ty: &Type, out: &mut Vec<String>) {
            match ty {
                Type::Class(c) => out.push(c.clone()),
                Type::List(t) => class_edges(t, out),
                Type::Dict(_, v) => class_edges(v, out),
                Type::Tuple(items) => {
                    for t in items {
                        class_edges(t, out);
                    }
                }
                _ => {}
            }
        }

        let mut graph: HashMap<&str, Vec<String>> = HashMap::new();
        for class in self.classes.values() {
            let mut edges = Vec::new();
            for (_, ty) in &class.fields {
                class_edges(ty, &mut edges);
            }
            graph.insert(class.name.as_str(), edges);
        }

        let mut warnings = Vec::new();
        for class in self.classes.values() {
            // DFS from each class looking for a path back to itself.
            let mut stack: Vec<&str> = graph
                .get(class.name.as_str())
                .map(|v| v.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let mut visited: HashSet<&str> = HashSet::new();
            let mut cyclic = false;
            while let Some(node) = stack.pop() {
                if node == class.name {
                    cyclic = true;
                    break;
                }
                if !visited.insert(node) {
                    continue;
                }
                if let Some(next) = graph.get(node) {
                    stack.extend(next.iter().map(String::as_str));
                }
            }
            if cyclic {
                warnings.push((
                    class.pos.clone(),
                    class.name.len() as u32,
                    format!(
                        "class '{}' can form a reference cycle through its fields; the runtime cannot reclaim cycles",
                        class.name
                    ),
                ));
            }
        }
        for (pos, span, msg) in warnings {
            self.diags.warning(&pos, span, msg);
        }
    }

    // ------------------------------------------------------------------
    // Pass 1c: globals, in declaration order
    // ------------------------------------------------------------------

    fn collect_globals(&mut self) {
        let decls = std::mem::take(&mut self.decls);
        for decl in &decls {
            if let Decl::Global(g) = decl {
                self.scopes.clear();
                let ty = match &g.ty {
                    Some(te) => {
                        let Some(t) = self.resolve_type(te) else { continue };
                        let got = self.check_expr(&g.init, Some(&t));
                        if let Ok(got) = got {
                            self.require_type(&t, &got, &g.init.pos, "initializer");
                        }
                        t
                    }
                    None => match self.check_expr(&g.init, None) {
                        Ok(t) => match self.validate_inferred(&t, &g.init.pos) {
                            Some(t) => t,
                            None => continue,
                        },
                        Err(()) => continue,
                    },
                };
                if self.globals.contains_key(&g.name) {
                    continue; // duplicate reported by the resolver
                }
                self.globals.insert(
                    g.name.clone(),
                    GlobalInfo {
                        name: g.name.clone(),
                        ty,
                        is_const: g.is_const,
                    },
                );
                self.global_order.push(g.name.clone());
            }
        }
        self.decls = decls;
    }

    fn validate_inferred(&mut self, t: &Type, pos: &Pos) -> Option<Type> {
        match t {
            Type::None => {
                self.diags
                    .error(pos, 4, "cannot infer a type from 'None'; annotate the variable");
                None
            }
            Type::Prim(Prim::Void) => {
                self.diags.error(pos, 1, "cannot assign a void expression");
                None
            }
            _ => Some(t.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Pass 2: bodies
    // ------------------------------------------------------------------

    fn check_bodies(&mut self) {
        let decls = std::mem::take(&mut self.decls);

        for decl in &decls {
            match decl {
                Decl::Func(f) if !f.is_generic() => {
                    let info = self.funcs.get(&f.name).cloned();
                    if let Some(info) = info {
                        self.check_func_body(f, &info.params, &info.ret, None);
                    }
                }
                Decl::Class(c) => {
                    let recv = Type::Class(c.name.clone());
                    for m in &c.methods {
                        let (params, ret) = if m.name == "init" {
                            let p = self
                                .classes
                                .get(&c.name)
                                .map(|ci| ci.init_params.clone())
                                .unwrap_or_default();
                            (p, Type::VOID)
                        } else {
                            match self.classes.get(&c.name).and_then(|ci| ci.methods.get(&m.name))
                            {
                                Some(sig) => (sig.params.clone(), sig.ret.clone()),
                                None => continue,
                            }
                        };
                        self.check_func_body(m, &params, &ret, Some(recv.clone()));
                    }
                }
                Decl::Struct(s) => {
                    let recv = Type::Struct(s.name.clone());
                    for m in &s.methods {
                        let sig = self
                            .structs
                            .get(&s.name)
                            .and_then(|si| si.methods.get(&m.name))
                            .cloned();
                        if let Some(sig) = sig {
                            self.check_func_body(m, &sig.params, &sig.ret, Some(recv.clone()));
                        }
                    }
                }
                _ => {}
            }
        }

        // Top-level statements share one scope, in source order.
        self.scopes.clear();
        self.scopes.push(HashMap::new());
        self.current_ret = Type::VOID;
        for decl in &decls {
            if let Decl::Stmt(stmt) = decl {
                let _ = self.check_stmt(stmt);
            }
        }
        self.scopes.clear();

        self.decls = decls;
    }

    fn check_func_body(
        &mut self,
        f: &FuncDecl,
        params: &[Type],
        ret: &Type,
        self_ty: Option<Type>,
    ) {
        self.scopes.clear();
        self.scopes.push(HashMap::new());
        // Parameters are borrowed and immutable; reassigning one would
        // unbalance the caller's reference.
        for (p, t) in f.params.iter().zip(params.iter()) {
            self.bind(&p.name, t.clone(), true, &p.pos);
        }
        if let Some(st) = self_ty {
            self.bind("self", st, true, &f.pos);
        }
        self.current_ret = ret.clone();
        for stmt in &f.body {
            let _ = self.check_stmt(stmt);
        }
        self.scopes.clear();
    }

    fn check_mono_bodies(&mut self) {
        let mut i = 0;
        while i < self.monos.len() {
            let mono = self.monos[i].clone();
            self.generic_bindings = mono.bindings.clone();
            self.check_func_body(&mono.decl, &mono.params, &mono.ret, None);
            self.generic_bindings.clear();
            i += 1;
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn resolve_type(&mut self, te: &TypeExpr) -> Option<Type> {
        match te {
            TypeExpr::Name { name, pos } => self.resolve_type_name(name, pos),
            TypeExpr::Qualified { alias, name, pos } => {
                self.diags.error(
                    pos,
                    (alias.len() + name.len() + 1) as u32,
                    format!("unknown module alias '{}'", alias),
                );
                None
            }
            TypeExpr::List { elem, .. } => {
                let e = self.resolve_type(elem)?;
                Some(Type::List(Box::new(e)))
            }
            TypeExpr::Dict { key, value, pos } => {
                let k = self.resolve_type(key)?;
                let v = self.resolve_type(value)?;
                if !k.is_dict_key() && !matches!(k, Type::Generic(_)) {
                    self.diags.error(
                        pos,
                        4,
                        format!(
                            "type {} cannot be a dict key; keys must be integers, str, bool or enums",
                            k
                        ),
                    );
                    return None;
                }
                Some(Type::Dict(Box::new(k), Box::new(v)))
            }
            TypeExpr::Tuple { items, .. } => {
                let mut resolved = Vec::new();
                for t in items {
                    resolved.push(self.resolve_type(t)?);
                }
                Some(Type::Tuple(resolved))
            }
            TypeExpr::Fn { params, ret, .. } => {
                let mut ps = Vec::new();
                for t in params {
                    ps.push(self.resolve_type(t)?);
                }
                let r = self.resolve_type(ret)?;
                Some(Type::FnPtr {
                    params: ps,
                    ret: Box::new(r),
                })
            }
        }
    }

    fn resolve_type_name(&mut self, name: &str, pos: &Pos) -> Option<Type> {
        if let Some(p) = Prim::from_name(name) {
            return Some(Type::Prim(p));
        }
        if name == "str" {
            return Some(Type::Str);
        }
        if name == "None" {
            return Some(Type::None);
        }
        if let Some(bound) = self.generic_bindings.get(name) {
            return Some(bound.clone());
        }
        if self.declared_generics.iter().any(|g| g == name) {
            return Some(Type::Generic(name.to_string()));
        }
        match self.kinds.get(name) {
            Some(NameKind::Class) => Some(Type::Class(name.to_string())),
            Some(NameKind::Struct) => Some(Type::Struct(name.to_string())),
            Some(NameKind::Enum) => Some(Type::Enum(name.to_string())),
            Some(NameKind::Interface) => Some(Type::Interface(name.to_string())),
            Some(NameKind::ExternType) => {
                let info = &self.extern_types[name];
                Some(Type::Extern {
                    lib: info.lib.clone(),
                    name: info.name.clone(),
                })
            }
            None => {
                self.diags
                    .error(pos, name.len() as u32, format!("unknown type '{}'", name));
                None
            }
        }
    }

    fn class_implements(&self, class: &str, iface: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.interfaces.iter().any(|i| i == iface))
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn bind(&mut self, name: &str, ty: Type, is_const: bool, pos: &Pos) {
        let top = self.scopes.last_mut().expect("scope stack is never empty");
        if top.contains_key(name) {
            self.diags.error(
                pos,
                name.len() as u32,
                format!("'{}' is already declared in this scope", name),
            );
            return;
        }
        top.insert(name.to_string(), Local { ty, is_const });
    }

    fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), ()> {
        match stmt {
            Stmt::VarDecl {
                names,
                ty,
                init,
                is_const,
                is_static,
                pos,
            } => self.check_var_decl(names, ty.as_ref(), init, *is_const, *is_static, pos),
            Stmt::Assign {
                target,
                op,
                value,
                pos,
            } => self.check_assign(target, *op, value, pos),
            Stmt::If {
                arms, else_body, ..
            } => {
                for arm in arms {
                    if let Ok(t) = self.check_expr(&arm.cond, None) {
                        self.require_truthy(&t, &arm.cond.pos);
                    }
                    self.scopes.push(HashMap::new());
                    for s in &arm.body {
                        let _ = self.check_stmt(s);
                    }
                    self.scopes.pop();
                }
                if let Some(body) = else_body {
                    self.scopes.push(HashMap::new());
                    for s in body {
                        let _ = self.check_stmt(s);
                    }
                    self.scopes.pop();
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                if let Ok(t) = self.check_expr(cond, None) {
                    self.require_truthy(&t, &cond.pos);
                }
                self.scopes.push(HashMap::new());
                for s in body {
                    let _ = self.check_stmt(s);
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::For {
                var,
                var_ty,
                iter,
                body,
                pos,
            } => {
                let vt = self.resolve_type(var_ty).ok_or(())?;
                match iter {
                    ForIter::Range { start, stop } => {
                        if !vt.is_integer() {
                            self.diags.error(
                                pos,
                                3,
                                format!("range loops need an integer loop variable, not {}", vt),
                            );
                        }
                        for bound in [start, stop] {
                            if let Ok(t) = self.check_expr(bound, Some(&vt)) {
                                self.require_type(&vt, &t, &bound.pos, "range bound");
                            }
                        }
                    }
                    ForIter::Each(e) => {
                        let it = self.check_expr(e, None)?;
                        match &it {
                            Type::List(elem) => {
                                self.require_type(&vt, elem, &e.pos, "loop variable");
                            }
                            Type::Dict(k, _) => {
                                self.require_type(&vt, k, &e.pos, "loop variable");
                            }
                            other => {
                                self.diags.error(
                                    &e.pos,
                                    1,
                                    format!("cannot iterate a value of type {}", other),
                                );
                            }
                        }
                    }
                }
                self.scopes.push(HashMap::new());
                self.bind(var, vt, true, pos);
                for s in body {
                    let _ = self.check_stmt(s);
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
            Stmt::Return { value, pos } => {
                match (value, self.current_ret.is_void()) {
                    (None, true) => {}
                    (None, false) => {
                        self.diags.error(
                            pos,
                            6,
                            format!("this function must return a value of type {}", self.current_ret),
                        );
                    }
                    (Some(e), true) => {
                        let _ = self.check_expr(e, None);
                        self.diags
                            .error(pos, 6, "this function does not return a value");
                    }
                    (Some(e), false) => {
                        let expected = self.current_ret.clone();
                        if let Ok(t) = self.check_expr(e, Some(&expected)) {
                            self.require_type(&expected, &t, &e.pos, "return value");
                        }
                    }
                }
                Ok(())
            }
            Stmt::Expr(e) => {
                let _ = self.check_expr(e, None)?;
                Ok(())
            }
        }
    }

    fn check_var_decl(
        &mut self,
        names: &[String],
        ty: Option<&TypeExpr>,
        init: &Expr,
        is_const: bool,
        is_static: bool,
        pos: &Pos,
    ) -> Result<(), ()> {
        if names.len() > 1 {
            // Destructuring demands a tuple RHS of matching arity.
            let t = self.check_expr(init, None)?;
            match t {
                Type::Tuple(items) if items.len() == names.len() => {
                    for (name, item) in names.iter().zip(items.into_iter()) {
                        self.bind(name, item, is_const, pos);
                    }
                }
                Type::Tuple(items) => {
                    self.diags.error(
                        pos,
                        1,
                        format!(
                            "cannot destructure a {}-element tuple into {} names",
                            items.len(),
                            names.len()
                        ),
                    );
                    return Err(());
                }
                other => {
                    self.diags.error(
                        &init.pos,
                        1,
                        format!("destructuring needs a tuple value, found {}", other),
                    );
                    return Err(());
                }
            }
            return Ok(());
        }

        let ty = match ty {
            Some(te) => {
                let t = self.resolve_type(te).ok_or(())?;
                if t.is_void() {
                    self.diags.error(pos, 1, "variables cannot have type void");
                    return Err(());
                }
                let got = self.check_expr(init, Some(&t))?;
                self.require_type(&t, &got, &init.pos, "initializer");
                t
            }
            None => {
                let t = self.check_expr(init, None)?;
                self.validate_inferred(&t, &init.pos).ok_or(())?
            }
        };
        if is_static && ty.has_generic() {
            self.diags
                .error(pos, 6, "static locals are not allowed in generic functions");
        }
        self.bind(&names[0], ty, is_const, pos);
        Ok(())
    }

    fn check_assign(
        &mut self,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
        pos: &Pos,
    ) -> Result<(), ()> {
        let (target_ty, is_const) = self.check_lvalue(target)?;
        if is_const {
            self.diags
                .error(pos, 1, "cannot assign to a const binding");
            return Err(());
        }
        match op {
            None => {
                let got = self.check_expr(value, Some(&target_ty))?;
                self.require_type(&target_ty, &got, &value.pos, "assignment");
            }
            Some(op) => {
                let got = self.check_expr(value, Some(&target_ty))?;
                let result = self.binary_result(op, &target_ty, &got, value, pos)?;
                self.require_type(&target_ty, &result, pos, "compound assignment");
            }
        }
        Ok(())
    }

    /// Type an assignment target and decide whether it is writable.
    fn check_lvalue(&mut self, e: &Expr) -> Result<(Type, bool), ()> {
        match &e.kind {
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup_local(name) {
                    let (ty, c) = (local.ty.clone(), local.is_const);
                    self.expr_types.insert(e.id, ty.clone());
                    return Ok((ty, c));
                }
                if let Some(g) = self.globals.get(name) {
                    let (ty, c) = (g.ty.clone(), g.is_const);
                    self.expr_types.insert(e.id, ty.clone());
                    return Ok((ty, c));
                }
                self.diags.error(
                    &e.pos,
                    name.len() as u32,
                    format!("unknown variable '{}'", name),
                );
                Err(())
            }
            ExprKind::Member { .. } => {
                let t = self.check_expr(e, None)?;
                // A const struct binding keeps its fields frozen too; the
                // copy semantics would otherwise silently discard writes.
                let root_const = self.lvalue_root_const(e);
                Ok((t, root_const))
            }
            ExprKind::Index { object, index } => {
                let ot = self.check_expr(object, None)?;
                match ot {
                    Type::List(elem) => {
                        if let Ok(t) = self.check_expr(index, Some(&Type::I64)) {
                            self.require_type(&Type::I64, &t, &index.pos, "list index");
                        }
                        self.expr_types.insert(e.id, (*elem).clone());
                        Ok(((*elem).clone(), false))
                    }
                    Type::Dict(k, v) => {
                        if let Ok(t) = self.check_expr(index, Some(&k)) {
                            self.require_type(&k, &t, &index.pos, "dict key");
                        }
                        self.expr_types.insert(e.id, (*v).clone());
                        Ok(((*v).clone(), false))
                    }
                    other => {
                        self.diags.error(
                            &e.pos,
                            1,
                            format!("cannot subscript a value of type {}", other),
                        );
                        Err(())
                    }
                }
            }
            _ => {
                self.diags.error(&e.pos, 1, "invalid assignment target");
                Err(())
            }
        }
    }

    /// Whether the root binding of a member chain is a const struct.
    fn lvalue_root_const(&self, e: &Expr) -> bool {
        match &e.kind {
            ExprKind::Member { object, .. } => self.lvalue_root_const(object),
            ExprKind::Ident(name) => self
                .lookup_local(name)
                .map(|l| l.is_const && matches!(l.ty, Type::Struct(_) | Type::Tuple(_)))
                .unwrap_or(false),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn require_type(&mut self, expected: &Type, got: &Type, pos: &Pos, what: &str) {
        if expected != got {
            self.diags.error(
                pos,
                1,
                format!("{} has type {}, expected {}", what, got, expected),
            );
        }
    }

    fn require_truthy(&mut self, t: &Type, pos: &Pos) {
        if !t.is_truthy() {
            self.diags.error(
                pos,
                1,
                format!(
                    "type {} cannot be used as a condition; conditions take bool, integers, enums or references",
                    t
                ),
            );
        }
    }

    fn record(&mut self, e: &Expr, ty: Type) -> Result<Type, ()> {
        self.expr_types.insert(e.id, ty.clone());
        Ok(ty)
    }

    /// Check an expression. `expected` is a hint, not a requirement: it
    /// drives integer-literal width adaptation, gives `None` its type,
    /// and inserts class→interface coercions. Callers still compare the
    /// returned type against their expectation.
    fn check_expr(&mut self, e: &Expr, expected: Option<&Type>) -> Result<Type, ()> {
        // Literal-only integer arithmetic folds when a width is expected,
        // so `x: i8 = 2 + 3` adapts the folded 5 rather than defaulting
        // the operands to i64.
        if let Some(Type::Prim(p)) = expected {
            if p.is_integer() && !matches!(e.kind, ExprKind::Int { .. } | ExprKind::CharLit(_)) {
                if let Some(v) = fold_int(e) {
                    if !p.fits_literal(v, 10) {
                        self.diags.error(
                            &e.pos,
                            1,
                            format!("constant {} does not fit in {}", v, p.name()),
                        );
                        return Err(());
                    }
                    self.folded.insert(e.id, v);
                    return self.record(e, Type::Prim(*p));
                }
            }
        }

        let t = match &e.kind {
            ExprKind::Int { value, radix } => {
                self.adapt_int_literal(e, *value, *radix, expected)?
            }
            ExprKind::CharLit(code) => self.adapt_int_literal(e, *code, 10, expected)?,
            ExprKind::Float { .. } => match expected {
                Some(Type::Prim(Prim::F32)) => Type::Prim(Prim::F32),
                _ => Type::F64,
            },
            ExprKind::Str(_) => Type::Str,
            ExprKind::Bool(_) => Type::BOOL,
            ExprKind::NoneLit => match expected {
                Some(t) if t.is_ref_kind() => t.clone(),
                Some(t) => {
                    self.diags.error(
                        &e.pos,
                        4,
                        format!("'None' is not a value of type {}", t),
                    );
                    return Err(());
                }
                None => Type::None,
            },
            ExprKind::Ident(name) => self.check_ident(e, name)?,
            ExprKind::Member { object, field } => self.check_member(e, object, field)?,
            ExprKind::Index { object, index } => {
                let ot = self.check_expr(object, None)?;
                match ot {
                    Type::List(elem) => {
                        if let Ok(t) = self.check_expr(index, Some(&Type::I64)) {
                            self.require_type(&Type::I64, &t, &index.pos, "list index");
                        }
                        (*elem).clone()
                    }
                    Type::Dict(k, v) => {
                        if let Ok(t) = self.check_expr(index, Some(&k)) {
                            self.require_type(&k, &t, &index.pos, "dict key");
                        }
                        (*v).clone()
                    }
                    other => {
                        self.diags.error(
                            &e.pos,
                            1,
                            format!("cannot subscript a value of type {}", other),
                        );
                        return Err(());
                    }
                }
            }
            ExprKind::Call {
                callee,
                type_args,
                args,
            } => self.check_call(e, callee, type_args, args)?,
            ExprKind::Unary { op, operand } => match op {
                UnOp::Not => {
                    let t = self.check_expr(operand, None)?;
                    self.require_truthy(&t, &operand.pos);
                    Type::BOOL
                }
                UnOp::Neg => {
                    let t = self.check_expr(operand, expected)?;
                    match &t {
                        Type::Prim(p) if p.is_float() || (p.is_integer() && p.is_signed()) => t,
                        Type::Prim(p) if p.is_integer() => {
                            self.diags.error(
                                &e.pos,
                                1,
                                format!("cannot negate unsigned type {}", p.name()),
                            );
                            return Err(());
                        }
                        other => {
                            self.diags.error(
                                &e.pos,
                                1,
                                format!("cannot negate a value of type {}", other),
                            );
                            return Err(());
                        }
                    }
                }
                UnOp::BitNot => {
                    let t = self.check_expr(operand, expected)?;
                    if !t.is_integer() {
                        self.diags.error(
                            &e.pos,
                            1,
                            format!("'~' needs an integer operand, found {}", t),
                        );
                        return Err(());
                    }
                    t
                }
            },
            ExprKind::Binary { op, lhs, rhs } => {
                self.check_binary(e, *op, lhs, rhs, expected)?
            }
            ExprKind::Is { value, ty } => self.check_is(e, value, ty)?,
            ExprKind::As { value, ty } => self.check_as(e, value, ty)?,
            ExprKind::TupleLit(items) => {
                let expected_items: Option<&Vec<Type>> = match expected {
                    Some(Type::Tuple(ts)) if ts.len() == items.len() => Some(ts),
                    _ => None,
                };
                let mut types = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let hint = expected_items.map(|ts| &ts[i]);
                    let t = self.check_expr(item, hint)?;
                    if t.is_void() || matches!(t, Type::None) {
                        self.diags.error(
                            &item.pos,
                            1,
                            "tuple elements must have concrete value or reference types",
                        );
                        return Err(());
                    }
                    types.push(t);
                }
                Type::Tuple(types)
            }
            ExprKind::ListLit { elem, items } => {
                let et = self.resolve_type(elem).ok_or(())?;
                for item in items {
                    let t = self.check_expr(item, Some(&et))?;
                    self.require_type(&et, &t, &item.pos, "list element");
                }
                Type::List(Box::new(et))
            }
            ExprKind::DictLit {
                key,
                value,
                entries,
            } => {
                let kt = self.resolve_type(key).ok_or(())?;
                let vt = self.resolve_type(value).ok_or(())?;
                for (k, v) in entries {
                    let t = self.check_expr(k, Some(&kt))?;
                    self.require_type(&kt, &t, &k.pos, "dict key");
                    let t = self.check_expr(v, Some(&vt))?;
                    self.require_type(&vt, &t, &v.pos, "dict value");
                }
                Type::Dict(Box::new(kt), Box::new(vt))
            }
        };

        // Class value flowing into an interface context: legal when the
        // class implements the interface; the emitter wraps at this seam.
        if let (Some(Type::Interface(iface)), Type::Class(class)) = (expected, &t) {
            if self.class_implements(class, iface) {
                self.coercions.insert(
                    e.id,
                    Coercion::WrapIface {
                        class: class.clone(),
                        iface: iface.clone(),
                    },
                );
                self.expr_types.insert(e.id, t.clone());
                return Ok(Type::Interface(iface.clone()));
            }
        }

        self.record(e, t)
    }

    fn adapt_int_literal(
        &mut self,
        e: &Expr,
        value: i64,
        radix: u32,
        expected: Option<&Type>,
    ) -> Result<Type, ()> {
        match expected {
            Some(Type::Prim(p)) if p.is_integer() => {
                if !p.fits_literal(value, radix) {
                    self.diags.error(
                        &e.pos,
                        1,
                        format!("literal {} does not fit in {}", value, p.name()),
                    );
                    return Err(());
                }
                self.folded.insert(e.id, value);
                Ok(Type::Prim(*p))
            }
            _ => Ok(Type::I64),
        }
    }

    fn check_ident(&mut self, e: &Expr, name: &str) -> Result<Type, ()> {
        if let Some(local) = self.lookup_local(name) {
            return Ok(local.ty.clone());
        }
        if let Some(g) = self.globals.get(name) {
            return Ok(g.ty.clone());
        }
        if let Some((t, _)) = self.extern_consts.get(name) {
            return Ok(t.clone());
        }
        if let Some(f) = self.funcs.get(name) {
            if !f.generics.is_empty() {
                self.diags.error(
                    &e.pos,
                    name.len() as u32,
                    format!("generic function '{}' cannot be used as a value", name),
                );
                return Err(());
            }
            return Ok(Type::FnPtr {
                params: f.params.clone(),
                ret: Box::new(f.ret.clone()),
            });
        }
        match self.kinds.get(name) {
            Some(NameKind::Enum) => {
                self.diags.error(
                    &e.pos,
                    name.len() as u32,
                    format!("enum '{}' is a type; access a variant like {}.VARIANT", name, name),
                );
                Err(())
            }
            Some(_) => {
                self.diags.error(
                    &e.pos,
                    name.len() as u32,
                    format!("type '{}' cannot be used as a value", name),
                );
                Err(())
            }
            None => {
                self.diags.error(
                    &e.pos,
                    name.len() as u32,
                    format!("unknown name '{}'", name),
                );
                Err(())
            }
        }
    }

    fn check_member(&mut self, e: &Expr, object: &Expr, field: &str) -> Result<Type, ()> {
        // Enum variant access (`Color.RED`) unless a local shadows the
        // enum name.
        if let ExprKind::Ident(name) = &object.kind {
            if self.lookup_local(name).is_none() && self.globals.get(name).is_none() {
                if let Some(info) = self.enums.get(name) {
                    match info.variants.iter().find(|(v, _)| v == field) {
                        Some((_, value)) => {
                            self.folded.insert(e.id, *value);
                            let t = Type::Enum(name.clone());
                            self.expr_types.insert(object.id, t.clone());
                            return Ok(t);
                        }
                        None => {
                            self.diags.error(
                                &e.pos,
                                field.len() as u32,
                                format!("enum '{}' has no variant '{}'", name, field),
                            );
                            return Err(());
                        }
                    }
                }
            }
        }

        let ot = self.check_expr(object, None)?;
        match &ot {
            Type::Class(c) => {
                let info = self.classes.get(c).ok_or(())?;
                match info.fields.iter().find(|(n, _)| n == field) {
                    Some((_, t)) => Ok(t.clone()),
                    None => {
                        self.diags.error(
                            &e.pos,
                            field.len() as u32,
                            format!("class '{}' has no field '{}'", c, field),
                        );
                        Err(())
                    }
                }
            }
            Type::Struct(s) => {
                let info = self.structs.get(s).ok_or(())?;
                match info.fields.iter().find(|(n, _)| n == field) {
                    Some((_, t)) => Ok(t.clone()),
                    None => {
                        self.diags.error(
                            &e.pos,
                            field.len() as u32,
                            format!("struct '{}' has no field '{}'", s, field),
                        );
                        Err(())
                    }
                }
            }
            other => {
                self.diags.error(
                    &e.pos,
                    field.len() as u32,
                    format!("type {} has no field '{}'", other, field),
                );
                Err(())
            }
        }
    }

    fn check_is(&mut self, e: &Expr, value: &Expr, ty: &TypeExpr) -> Result<Type, ()> {
        let vt = self.check_expr(value, None)?;
        let tt = self.resolve_type(ty).ok_or(())?;

        if matches!(tt, Type::None) {
            if !vt.is_ref_kind() {
                self.diags.error(
                    &e.pos,
                    2,
                    format!("'is None' needs a reference value, found {}", vt),
                );
                return Err(());
            }
            return Ok(Type::BOOL);
        }

        match (&vt, &tt) {
            (Type::Interface(iface), Type::Class(class)) => {
                if !self.class_implements(class, iface) {
                    self.diags.error(
                        &e.pos,
                        2,
                        format!("class '{}' does not implement interface '{}'", class, iface),
                    );
                    return Err(());
                }
                // runtime vtable comparison
                Ok(Type::BOOL)
            }
            (Type::Interface(_), _) => {
                self.diags.error(
                    &e.pos,
                    2,
                    "an interface value can only be tested against a class or None",
                );
                Err(())
            }
            // Concrete LHS folds at compile time; there is no
            // class-to-class runtime path.
            (Type::Class(class), Type::Interface(iface)) => {
                self.is_folds
                    .insert(e.id, self.class_implements(class, iface));
                Ok(Type::BOOL)
            }
            _ => {
                self.is_folds.insert(e.id, vt == tt);
                Ok(Type::BOOL)
            }
        }
    }

    fn check_as(&mut self, e: &Expr, value: &Expr, ty: &TypeExpr) -> Result<Type, ()> {
        let vt = self.check_expr(value, None)?;
        let tt = self.resolve_type(ty).ok_or(())?;
        let Type::Interface(iface) = &vt else {
            self.diags.error(
                &e.pos,
                2,
                format!("'as' needs an interface value on the left, found {}", vt),
            );
            return Err(());
        };
        let Type::Class(class) = &tt else {
            self.diags.error(
                &e.pos,
                2,
                format!("'as' needs a class on the right, found {}", tt),
            );
            return Err(());
        };
        if !self.class_implements(class, iface) {
            self.diags.error(
                &e.pos,
                2,
                format!("class '{}' does not implement interface '{}'", class, iface),
            );
            return Err(());
        }
        Ok(tt)
    }

    fn check_binary(
        &mut self,
        e: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        expected: Option<&Type>,
    ) -> Result<Type, ()> {
        match op {
            BinOp::And | BinOp::Or => {
                for side in [lhs, rhs] {
                    if let Ok(t) = self.check_expr(side, None) {
                        self.require_truthy(&t, &side.pos);
                    }
                }
                return Ok(Type::BOOL);
            }
            BinOp::Eq | BinOp::Ne => {
                // `x == None` / `None == x` is a null test on any ref.
                if matches!(rhs.kind, ExprKind::NoneLit) {
                    let lt = self.check_expr(lhs, None)?;
                    if !lt.is_ref_kind() {
                        self.diags.error(
                            &e.pos,
                            2,
                            format!("cannot compare {} against None", lt),
                        );
                        return Err(());
                    }
                    let _ = self.check_expr(rhs, Some(&lt))?;
                    return Ok(Type::BOOL);
                }
                if matches!(lhs.kind, ExprKind::NoneLit) {
                    let rt = self.check_expr(rhs, None)?;
                    if !rt.is_ref_kind() {
                        self.diags.error(
                            &e.pos,
                            2,
                            format!("cannot compare {} against None", rt),
                        );
                        return Err(());
                    }
                    let _ = self.check_expr(lhs, Some(&rt))?;
                    return Ok(Type::BOOL);
                }
            }
            _ => {}
        }

        // Check the non-literal side first so a polymorphic literal on
        // the other side adapts to it (`x + 1` as well as `1 + x`).
        let (lt, rt) = if fold_int(lhs).is_some() && fold_int(rhs).is_none() {
            let rt = self.check_expr(rhs, expected.filter(|t| t.is_numeric()))?;
            let lt = self.check_expr(lhs, Some(&rt))?;
            (lt, rt)
        } else {
            let lt = self.check_expr(lhs, expected.filter(|t| t.is_numeric()))?;
            let rt = self.check_expr(rhs, Some(&lt))?;
            (lt, rt)
        };

        self.binary_result(op, &lt, &rt, rhs, &e.pos)
    }

    /// Result type of a binary operator over already-typed operands.
    /// `rhs_expr` only feeds error positions.
    fn binary_result(
        &mut self,
        op: BinOp,
        lt: &Type,
        rt: &Type,
        _rhs_expr: &Expr,
        pos: &Pos,
    ) -> Result<Type, ()> {
        let mismatch = |chk: &mut Self| {
            chk.diags.error(
                pos,
                op.symbol().len() as u32,
                format!(
                    "operator '{}' needs matching operand types, found {} and {} (insert an explicit cast)",
                    op, lt, rt
                ),
            );
            Err(())
        };

        match op {
            BinOp::Add => {
                if lt == rt && lt.is_numeric() {
                    return Ok(lt.clone());
                }
                if matches!((lt, rt), (Type::Str, Type::Str)) {
                    return Ok(Type::Str);
                }
                mismatch(self)
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if lt == rt && lt.is_numeric() {
                    return Ok(lt.clone());
                }
                mismatch(self)
            }
            BinOp::Mod | BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => {
                if lt == rt && lt.is_integer() {
                    return Ok(lt.clone());
                }
                if lt == rt {
                    self.diags.error(
                        pos,
                        op.symbol().len() as u32,
                        format!("operator '{}' needs integer operands, found {}", op, lt),
                    );
                    return Err(());
                }
                mismatch(self)
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if lt == rt && lt.is_numeric() {
                    return Ok(Type::BOOL);
                }
                mismatch(self)
            }
            BinOp::Eq | BinOp::Ne => {
                let comparable = lt == rt
                    && (lt.is_numeric()
                        || lt.is_bool()
                        || matches!(lt, Type::Str | Type::Enum(_)));
                if comparable {
                    return Ok(Type::BOOL);
                }
                self.diags.error(
                    pos,
                    op.symbol().len() as u32,
                    format!(
                        "operator '{}' cannot compare {} and {}; references compare only against None",
                        op, lt, rt
                    ),
                );
                Err(())
            }
            BinOp::And | BinOp::Or => unreachable!("handled in check_binary"),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn check_call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        type_args: &[TypeExpr],
        args: &[Expr],
    ) -> Result<Type, ()> {
        // Method call: receiver.method(args)
        if let ExprKind::Member { object, field } = &callee.kind {
            // ...unless the "receiver" is an enum type name.
            let is_enum_variant = matches!(&object.kind, ExprKind::Ident(n)
                if self.lookup_local(n).is_none() && self.enums.contains_key(n));
            if !is_enum_variant {
                return self.check_method_call(e, object, field, args);
            }
        }

        if let ExprKind::Ident(name) = &callee.kind {
            // Locals (and only locals) shadow functions and builtins.
            if self.lookup_local(name).is_some() {
                return self.check_fnptr_call(e, callee, args);
            }
            match name.as_str() {
                "print" => return self.check_print(e, args),
                "assert" => {
                    self.check_arity(e, "assert", 1, args.len())?;
                    let t = self.check_expr(&args[0], None)?;
                    self.require_truthy(&t, &args[0].pos);
                    self.calls.insert(e.id, CallTarget::Builtin(Builtin::Assert));
                    return Ok(Type::VOID);
                }
                "panic" => {
                    self.check_arity(e, "panic", 1, args.len())?;
                    let t = self.check_expr(&args[0], None)?;
                    self.require_type(&Type::Str, &t, &args[0].pos, "panic message");
                    self.calls.insert(e.id, CallTarget::Builtin(Builtin::Panic));
                    return Ok(Type::VOID);
                }
                "range" => {
                    self.diags.error(
                        &e.pos,
                        5,
                        "'range' is only valid as the iterable of a for loop",
                    );
                    return Err(());
                }
                _ => {}
            }
            if let Some(p) = Prim::from_name(name) {
                return self.check_cast(e, p, args);
            }
            if self.classes.contains_key(name) {
                return self.check_ctor(e, name, args);
            }
            if let Some(info) = self.funcs.get(name).cloned() {
                return if info.generics.is_empty() {
                    self.check_plain_call(e, &info, args)
                } else {
                    self.check_generic_call(e, &info, type_args, args)
                };
            }
            if let Some(info) = self.extern_funcs.get(name).cloned() {
                self.check_args_against(e, name, &info.params, args)?;
                self.calls
                    .insert(e.id, CallTarget::ExternFunc { name: name.clone() });
                return Ok(info.ret);
            }
            if self.globals.contains_key(name) {
                return self.check_fnptr_call(e, callee, args);
            }
            self.diags.error(
                &e.pos,
                name.len() as u32,
                format!("unknown function '{}'", name),
            );
            return Err(());
        }

        self.check_fnptr_call(e, callee, args)
    }

    fn check_arity(&mut self, e: &Expr, what: &str, want: usize, got: usize) -> Result<(), ()> {
        if want != got {
            self.diags.error(
                &e.pos,
                1,
                format!("'{}' takes {} argument(s), found {}", what, want, got),
            );
            return Err(());
        }
        Ok(())
    }

    fn check_args_against(
        &mut self,
        e: &Expr,
        what: &str,
        params: &[Type],
        args: &[Expr],
    ) -> Result<(), ()> {
        self.check_arity(e, what, params.len(), args.len())?;
        for (i, (arg, param)) in args.iter().zip(params.iter()).enumerate() {
            let t = self.check_expr(arg, Some(param))?;
            if t != *param {
                self.diags.error(
                    &arg.pos,
                    1,
                    format!(
                        "argument {} of '{}' has type {}, expected {}",
                        i + 1,
                        what,
                        t,
                        param
                    ),
                );
            }
        }
        Ok(())
    }

    fn check_print(&mut self, e: &Expr, args: &[Expr]) -> Result<Type, ()> {
        if args.is_empty() {
            self.diags.error(&e.pos, 5, "'print' needs at least one argument");
            return Err(());
        }
        if args.len() == 1 {
            let t = self.check_expr(&args[0], None)?;
            if !printable(&t) {
                self.diags.error(
                    &args[0].pos,
                    1,
                    format!("cannot print a value of type {}", t),
                );
                return Err(());
            }
            self.calls.insert(e.id, CallTarget::Builtin(Builtin::Print));
            return Ok(Type::VOID);
        }
        // Format form: the first argument is the format string; every {}
        // hole consumes one following argument.
        let ft = self.check_expr(&args[0], None)?;
        self.require_type(&Type::Str, &ft, &args[0].pos, "format string");
        if let ExprKind::Str(text) = &args[0].kind {
            let holes = count_format_holes(text);
            if holes != args.len() - 1 {
                self.diags.error(
                    &args[0].pos,
                    1,
                    format!(
                        "format string has {} placeholder(s) but {} argument(s) follow",
                        holes,
                        args.len() - 1
                    ),
                );
            }
        }
        for arg in &args[1..] {
            let t = self.check_expr(arg, None)?;
            if !printable(&t) {
                self.diags.error(
                    &arg.pos,
                    1,
                    format!("cannot format a value of type {}", t),
                );
            }
        }
        self.calls.insert(e.id, CallTarget::Builtin(Builtin::PrintFmt));
        Ok(Type::VOID)
    }

    fn check_cast(&mut self, e: &Expr, target: Prim, args: &[Expr]) -> Result<Type, ()> {
        self.check_arity(e, target.name(), 1, args.len())?;
        let t = self.check_expr(&args[0], None)?;
        let ok = t.is_numeric() || matches!(t, Type::Enum(_)) && target.is_integer();
        if !ok {
            self.diags.error(
                &args[0].pos,
                1,
                format!("cannot cast {} to {}", t, target.name()),
            );
            return Err(());
        }
        self.calls.insert(e.id, CallTarget::Cast(target));
        Ok(Type::Prim(target))
    }

    fn check_ctor(&mut self, e: &Expr, class: &str, args: &[Expr]) -> Result<Type, ()> {
        let params = self.classes[class].init_params.clone();
        self.check_args_against(e, class, &params, args)?;
        self.calls
            .insert(e.id, CallTarget::Ctor { class: class.to_string() });
        Ok(Type::Class(class.to_string()))
    }

    fn check_plain_call(&mut self, e: &Expr, info: &FuncInfo, args: &[Expr]) -> Result<Type, ()> {
        self.check_args_against(e, &info.name, &info.params, args)?;
        self.calls
            .insert(e.id, CallTarget::Func { name: info.name.clone() });
        Ok(info.ret.clone())
    }

    fn check_generic_call(
        &mut self,
        e: &Expr,
        info: &FuncInfo,
        type_args: &[TypeExpr],
        args: &[Expr],
    ) -> Result<Type, ()> {
        let mut bindings: HashMap<String, Type> = HashMap::new();

        if !type_args.is_empty() {
            if type_args.len() != info.generics.len() {
                self.diags.error(
                    &e.pos,
                    1,
                    format!(
                        "'{}' takes {} type argument(s), found {}",
                        info.name,
                        info.generics.len(),
                        type_args.len()
                    ),
                );
                return Err(());
            }
            for (g, te) in info.generics.iter().zip(type_args.iter()) {
                let t = self.resolve_type(te).ok_or(())?;
                bindings.insert(g.clone(), t);
            }
            self.check_arity(e, &info.name, info.params.len(), args.len())?;
            for (i, (arg, param)) in args.iter().zip(info.params.iter()).enumerate() {
                let want = param.substitute(&bindings);
                let t = self.check_expr(arg, Some(&want))?;
                if t != want {
                    self.diags.error(
                        &arg.pos,
                        1,
                        format!(
                            "argument {} of '{}' has type {}, expected {}",
                            i + 1,
                            info.name,
                            t,
                            want
                        ),
                    );
                }
            }
        } else {
            // Infer by unifying declared parameter types against actuals.
            self.check_arity(e, &info.name, info.params.len(), args.len())?;
            let mut actuals = Vec::new();
            for arg in args {
                actuals.push(self.check_expr(arg, None)?);
            }
            for (param, actual) in info.params.iter().zip(actuals.iter()) {
                if !unify(param, actual, &mut bindings) {
                    self.diags.error(
                        &e.pos,
                        1,
                        format!(
                            "cannot unify argument types for '{}': {} vs {}",
                            info.name, param, actual
                        ),
                    );
                    return Err(());
                }
            }
            for g in &info.generics {
                if !bindings.contains_key(g) {
                    self.diags.error(
                        &e.pos,
                        1,
                        format!(
                            "cannot infer type parameter '{}' of '{}'; use explicit [..] arguments",
                            g, info.name
                        ),
                    );
                    return Err(());
                }
            }
        }

        if bindings.values().any(|t| matches!(t, Type::None)) {
            self.diags.error(
                &e.pos,
                1,
                "cannot instantiate a generic function with None; annotate the argument",
            );
            return Err(());
        }

        let ordered: Vec<Type> = info
            .generics
            .iter()
            .map(|g| bindings[g].clone())
            .collect();
        let mangled = mangle_mono(&info.name, &ordered);
        self.instantiate(info, &bindings, &mangled, &e.pos);
        self.calls.insert(
            e.id,
            CallTarget::Mono {
                mangled: mangled.clone(),
            },
        );
        Ok(info.ret.substitute(&bindings))
    }

    /// Record a monomorphization: clone the declaration, renumber its
    /// expressions, and queue the clone for body checking.
    fn instantiate(
        &mut self,
        info: &FuncInfo,
        bindings: &HashMap<String, Type>,
        mangled: &str,
        pos: &Pos,
    ) {
        if self.mono_seen.contains(mangled) {
            return;
        }
        if self.monos.len() >= MAX_MONO_INSTANTIATIONS {
            self.diags.error(
                pos,
                1,
                "too many generic instantiations; is a generic function recursing with new type arguments?",
            );
            return;
        }
        self.mono_seen.insert(mangled.to_string());

        let Decl::Func(decl) = &self.decls[info.decl_index] else {
            return;
        };
        let mut clone = decl.clone();
        renumber_func(&mut clone, &mut self.next_expr_id);
        self.monos.push(MonoFunc {
            mangled: mangled.to_string(),
            decl: clone,
            params: info
                .params
                .iter()
                .map(|p| p.substitute(bindings))
                .collect(),
            ret: info.ret.substitute(bindings),
            bindings: bindings.clone(),
        });
    }

    fn check_method_call(
        &mut self,
        e: &Expr,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<Type, ()> {
        let ot = self.check_expr(object, None)?;
        match &ot {
            Type::Class(c) => {
                let Some(sig) = self.classes[c].methods.get(method).cloned() else {
                    self.diags.error(
                        &e.pos,
                        method.len() as u32,
                        format!("class '{}' has no method '{}'", c, method),
                    );
                    return Err(());
                };
                self.check_args_against(e, method, &sig.params, args)?;
                self.calls.insert(
                    e.id,
                    CallTarget::Method {
                        recv: ot.clone(),
                        name: method.to_string(),
                    },
                );
                Ok(sig.ret)
            }
            Type::Struct(s) => {
                let Some(sig) = self.structs[s].methods.get(method).cloned() else {
                    self.diags.error(
                        &e.pos,
                        method.len() as u32,
                        format!("struct '{}' has no method '{}'", s, method),
                    );
                    return Err(());
                };
                self.check_args_against(e, method, &sig.params, args)?;
                self.calls.insert(
                    e.id,
                    CallTarget::Method {
                        recv: ot.clone(),
                        name: method.to_string(),
                    },
                );
                Ok(sig.ret)
            }
            Type::Interface(i) => {
                let Some((_, sig)) = self.interfaces[i]
                    .methods
                    .iter()
                    .find(|(n, _)| n == method)
                    .cloned()
                else {
                    self.diags.error(
                        &e.pos,
                        method.len() as u32,
                        format!("interface '{}' has no method '{}'", i, method),
                    );
                    return Err(());
                };
                self.check_args_against(e, method, &sig.params, args)?;
                self.calls.insert(
                    e.id,
                    CallTarget::IfaceMethod {
                        iface: i.clone(),
                        name: method.to_string(),
                    },
                );
                Ok(sig.ret)
            }
            Type::Str => match method {
                "len" => {
                    self.check_arity(e, "len", 0, args.len())?;
                    self.calls.insert(e.id, CallTarget::Builtin(Builtin::StrLen));
                    Ok(Type::I64)
                }
                _ => {
                    self.diags.error(
                        &e.pos,
                        method.len() as u32,
                        format!("str has no method '{}'", method),
                    );
                    Err(())
                }
            },
            Type::List(elem) => {
                let elem = (**elem).clone();
                match method {
                    "push" => {
                        self.check_args_against(e, "push", &[elem], args)?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::ListPush));
                        Ok(Type::VOID)
                    }
                    "pop" => {
                        self.check_arity(e, "pop", 0, args.len())?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::ListPop));
                        Ok(elem)
                    }
                    "len" => {
                        self.check_arity(e, "len", 0, args.len())?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::ListLen));
                        Ok(Type::I64)
                    }
                    "clear" => {
                        self.check_arity(e, "clear", 0, args.len())?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::ListClear));
                        Ok(Type::VOID)
                    }
                    _ => {
                        self.diags.error(
                            &e.pos,
                            method.len() as u32,
                            format!("List has no method '{}'", method),
                        );
                        Err(())
                    }
                }
            }
            Type::Dict(k, _v) => {
                let k = (**k).clone();
                match method {
                    "len" => {
                        self.check_arity(e, "len", 0, args.len())?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::DictLen));
                        Ok(Type::I64)
                    }
                    "has" => {
                        self.check_args_against(e, "has", &[k], args)?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::DictHas));
                        Ok(Type::BOOL)
                    }
                    "remove" => {
                        self.check_args_against(e, "remove", &[k], args)?;
                        self.calls
                            .insert(e.id, CallTarget::Builtin(Builtin::DictRemove));
                        Ok(Type::VOID)
                    }
                    "keys" => {
                        self.check_arity(e, "keys", 0, args.len())?;
                        self.calls.insert(e.id, CallTarget::Builtin(Builtin::DictKeys));
                        Ok(Type::List(Box::new(k)))
                    }
                    _ => {
                        self.diags.error(
                            &e.pos,
                            method.len() as u32,
                            format!("Dict has no method '{}'", method),
                        );
                        Err(())
                    }
                }
            }
            other => {
                self.diags.error(
                    &e.pos,
                    method.len() as u32,
                    format!("type {} has no methods", other),
                );
                Err(())
            }
        }
    }

    fn check_fnptr_call(&mut self, e: &Expr, callee: &Expr, args: &[Expr]) -> Result<Type, ()> {
        let ct = self.check_expr(callee, None)?;
        let Type::FnPtr { params, ret } = ct else {
            self.diags.error(
                &callee.pos,
                1,
                format!("cannot call a value of type {}", ct),
            );
            return Err(());
        };
        self.check_args_against(e, "function pointer", &params, args)?;
        self.calls.insert(e.id, CallTarget::FnPtr);
        Ok(*ret)
    }
}

// ======================================================================
// Free helpers
// ======================================================================

fn printable(t: &Type) -> bool {
    match t {
        Type::Prim(p) => p.is_integer() || p.is_float() || *p == Prim::Bool,
        Type::Str | Type::Enum(_) => true,
        _ => false,
    }
}

/// `{}` holes in a format string; `{{` and `}}` escape.
pub fn count_format_holes(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                i += 2;
                continue;
            }
            if i + 1 < bytes.len() && bytes[i + 1] == b'}' {
                count += 1;
                i += 2;
                continue;
            }
        }
        if bytes[i] == b'}' && i + 1 < bytes.len() && bytes[i + 1] == b'}' {
            i += 2;
            continue;
        }
        i += 1;
    }
    count
}

/// Fold a literal-only integer subtree to its value.
fn fold_int(e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::Int { value, .. } => Some(*value),
        ExprKind::CharLit(code) => Some(*code),
        ExprKind::Unary { op, operand } => {
            let v = fold_int(operand)?;
            match op {
                UnOp::Neg => v.checked_neg(),
                UnOp::BitNot => Some(!v),
                UnOp::Not => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = fold_int(lhs)?;
            let b = fold_int(rhs)?;
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Mod => a.checked_rem(b),
                BinOp::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
                BinOp::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
                BinOp::BitAnd => Some(a & b),
                BinOp::BitOr => Some(a | b),
                BinOp::BitXor => Some(a ^ b),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Structural unification of a declared (possibly generic) type against
/// an actual argument type.
fn unify(decl: &Type, actual: &Type, bindings: &mut HashMap<String, Type>) -> bool {
    match (decl, actual) {
        (Type::Generic(name), _) => match bindings.get(name) {
            Some(bound) => bound == actual,
            None => {
                bindings.insert(name.clone(), actual.clone());
                true
            }
        },
        (Type::List(a), Type::List(b)) => unify(a, b, bindings),
        (Type::Dict(ak, av), Type::Dict(bk, bv)) => {
            unify(ak, bk, bindings) && unify(av, bv, bindings)
        }
        (Type::Tuple(a), Type::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| unify(x, y, bindings))
        }
        (
            Type::FnPtr { params: ap, ret: ar },
            Type::FnPtr { params: bp, ret: br },
        ) => {
            ap.len() == bp.len()
                && ap.iter().zip(bp).all(|(x, y)| unify(x, y, bindings))
                && unify(ar, br, bindings)
        }
        _ => decl == actual,
    }
}

/// Mangled name of a monomorphized instantiation, deterministic from the
/// ordered type arguments.
pub fn mangle_mono(name: &str, args: &[Type]) -> String {
    let tags: Vec<String> = args.iter().map(Type::tag).collect();
    format!("{}__{}", name, tags.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::rc::Rc;

    fn check_source(source: &str) -> (Checked, Vec<String>, Vec<String>) {
        let mut diags = Diagnostics::new();
        let tokens = Lexer::new(source, Rc::from("t.mut"), &mut diags)
            .lex()
            .expect("lex failed");
        let (module, next) = Parser::new(tokens, 0, &mut diags)
            .parse_module()
            .expect("parse failed");
        let checked = TypeChecker::check(module.decls, &[], next, &mut diags);
        let errors = diags
            .diagnostics()
            .iter()
            .filter(|d| d.severity == crate::diag::Severity::Error)
            .map(|d| d.message.clone())
            .collect();
        let warnings = diags
            .diagnostics()
            .iter()
            .filter(|d| d.severity == crate::diag::Severity::Warning)
            .map(|d| d.message.clone())
            .collect();
        (checked, errors, warnings)
    }

    fn errors_of(source: &str) -> Vec<String> {
        check_source(source).1
    }

    fn assert_clean(source: &str) -> Checked {
        let (checked, errors, _) = check_source(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        checked
    }

    #[test]
    fn test_simple_function() {
        assert_clean("def add(a: i64, b: i64) -> i64\n    return a + b\nend\n");
    }

    #[test]
    fn test_infer_defaults() {
        let checked = assert_clean("def f()\n    x := 5\n    y := 2.5\nend\n");
        assert!(checked
            .expr_types
            .values()
            .any(|t| *t == Type::F64));
    }

    #[test]
    fn test_literal_adaptation() {
        assert_clean("def f()\n    x: i8 = 100\n    y: u16 = 60000\n    c: u8 = 'A'\nend\n");
        let errs = errors_of("def f()\n    x: i8 = 300\nend\n");
        assert!(errs[0].contains("does not fit"), "{:?}", errs);
    }

    #[test]
    fn test_folded_adaptation() {
        let checked = assert_clean("def f()\n    x: i8 = 2 + 3\nend\n");
        assert!(checked.folded.values().any(|v| *v == 5));
    }

    #[test]
    fn test_mixed_widths_rejected() {
        let errs = errors_of(
            "def f()\n    x: i32 = 1\n    y: i64 = 2\n    z := x + y\nend\n",
        );
        assert!(errs[0].contains("matching operand types"), "{:?}", errs);
    }

    #[test]
    fn test_mixed_floats_rejected() {
        let errs = errors_of(
            "def f()\n    x: f32 = 1.0\n    y: f64 = 2.0\n    z := x + y\nend\n",
        );
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_explicit_cast_heals_mix() {
        assert_clean(
            "def f()\n    x: i32 = 1\n    y: i64 = 2\n    z := i64(x) + y\nend\n",
        );
    }

    #[test]
    fn test_truthiness() {
        assert_clean("def f(s: str, n: i64, b: bool)\n    if s\n    end\n    if n\n    end\n    if b\n    end\nend\n");
        let errs = errors_of("def f(x: f64)\n    if x\n    end\nend\n");
        assert!(errs[0].contains("condition"), "{:?}", errs);
    }

    #[test]
    fn test_and_or_yield_bool() {
        let checked = assert_clean("def f(a: i64, b: i64) -> bool\n    return a and b\nend\n");
        assert!(!checked.expr_types.is_empty());
    }

    #[test]
    fn test_const_rejects_assignment() {
        let errs = errors_of("def f()\n    const x := 1\n    x = 2\nend\n");
        assert!(errs[0].contains("const"), "{:?}", errs);
    }

    #[test]
    fn test_param_is_immutable() {
        let errs = errors_of("def f(x: i64)\n    x = 2\nend\n");
        assert!(errs[0].contains("const"), "{:?}", errs);
    }

    #[test]
    fn test_none_assignable_to_refs_only() {
        assert_clean(
            "class C\n    def init()\n    end\nend\n\ndef f()\n    c: C = None\nend\n",
        );
        let errs = errors_of("def f()\n    x: i64 = None\nend\n");
        assert!(errs[0].contains("None"), "{:?}", errs);
    }

    #[test]
    fn test_tuple_destructure() {
        let checked = assert_clean(
            "def pair() -> (i64, str)\n    return (42, \"hi\")\nend\n\ndef f()\n    a, b := pair()\n    c: i64 = a\n    d: str = b\nend\n",
        );
        assert!(checked
            .expr_types
            .values()
            .any(|t| matches!(t, Type::Tuple(_))));
    }

    #[test]
    fn test_destructure_arity_mismatch() {
        let errs = errors_of(
            "def pair() -> (i64, str)\n    return (1, \"x\")\nend\n\ndef f()\n    a, b, c := pair()\nend\n",
        );
        assert!(errs[0].contains("destructure"), "{:?}", errs);
    }

    #[test]
    fn test_generic_monomorphization() {
        let checked = assert_clean(
            "def id[T](x: T) -> T\n    return x\nend\n\ndef f()\n    a := id[i64](7)\n    b := id(\"abc\")\nend\n",
        );
        let mut names: Vec<&str> = checked.monos.iter().map(|m| m.mangled.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["id__i64", "id__str"]);
        assert!(checked
            .calls
            .values()
            .any(|c| matches!(c, CallTarget::Mono { mangled } if mangled == "id__i64")));
    }

    #[test]
    fn test_generic_instantiated_once_per_type() {
        let checked = assert_clean(
            "def id[T](x: T) -> T\n    return x\nend\n\ndef f()\n    a := id(1)\n    b := id(2)\nend\n",
        );
        assert_eq!(checked.monos.len(), 1);
    }

    #[test]
    fn test_generic_inference_conflict() {
        let errs = errors_of(
            "def pick[T](a: T, b: T) -> T\n    return a\nend\n\ndef f()\n    x := pick(1, \"a\")\nend\n",
        );
        assert!(errs[0].contains("unify"), "{:?}", errs);
    }

    #[test]
    fn test_interface_satisfaction() {
        let errs = errors_of(
            "interface IShape\n    def area() -> f64\nend\n\nclass Circle : IShape\n    r: f64\n    def init(r: f64)\n        self.r = r\n    end\nend\n",
        );
        assert!(errs[0].contains("does not implement"), "{:?}", errs);
    }

    #[test]
    fn test_interface_dispatch_and_coercion() {
        let checked = assert_clean(
            "interface IShape\n    def area() -> f64\nend\n\nclass Circle : IShape\n    r: f64\n    def init(r: f64)\n        self.r = r\n    end\n    def area() -> f64\n        return self.r * self.r * 3.14159\n    end\nend\n\ndef f()\n    shapes := List[IShape]() { Circle(1.0) }\n    s: IShape = Circle(2.0)\n    a := s.area()\nend\n",
        );
        assert!(checked
            .coercions
            .values()
            .any(|c| matches!(c, Coercion::WrapIface { .. })));
        assert!(checked
            .calls
            .values()
            .any(|c| matches!(c, CallTarget::IfaceMethod { .. })));
    }

    #[test]
    fn test_struct_fields_value_kind_only() {
        let errs = errors_of("struct P\n    name: str\nend\n");
        assert!(errs[0].contains("value types"), "{:?}", errs);
    }

    #[test]
    fn test_class_requires_init() {
        let errs = errors_of("class C\n    x: i64\nend\n");
        assert!(errs[0].contains("init"), "{:?}", errs);
    }

    #[test]
    fn test_enum_values_and_access() {
        let checked = assert_clean(
            "enum Color\n    RED\n    GREEN = 5\n    BLUE\nend\n\ndef f()\n    c := Color.BLUE\nend\n",
        );
        let info = &checked.enums["Color"];
        assert_eq!(info.variants, vec![
            ("RED".to_string(), 0),
            ("GREEN".to_string(), 5),
            ("BLUE".to_string(), 6),
        ]);
        assert!(checked.folded.values().any(|v| *v == 6));
    }

    #[test]
    fn test_dict_key_legality() {
        assert_clean("def f()\n    d := Dict[str, i64]()\nend\n");
        let errs = errors_of("def f()\n    d := Dict[f64, i64]()\nend\n");
        assert!(errs[0].contains("dict key"), "{:?}", errs);
    }

    #[test]
    fn test_is_folding_and_runtime() {
        let checked = assert_clean(
            "interface I\n    def m() -> i64\nend\n\nclass A : I\n    def init()\n    end\n    def m() -> i64\n        return 1\n    end\nend\n\ndef f(x: I, a: A) -> bool\n    c1 := a is A\n    c2 := x is A\n    c3 := x is None\n    return c1\nend\n",
        );
        // `a is A` folds; `x is A` stays a runtime vtable comparison.
        assert_eq!(checked.is_folds.len(), 1);
        assert!(checked.is_folds.values().all(|v| *v));
    }

    #[test]
    fn test_as_downcast() {
        assert_clean(
            "interface I\n    def m() -> i64\nend\n\nclass A : I\n    def init()\n    end\n    def m() -> i64\n        return 1\n    end\nend\n\ndef f(x: I) -> A\n    return x as A\nend\n",
        );
        let errs = errors_of(
            "class B\n    def init()\n    end\nend\n\ndef f(b: B)\n    x := b as B\nend\n",
        );
        assert!(errs[0].contains("interface"), "{:?}", errs);
    }

    #[test]
    fn test_cycle_warning() {
        let (_, errors, warnings) = check_source(
            "class A\n    other: B\n    def init()\n    end\nend\n\nclass B\n    other: A\n    def init()\n    end\nend\n",
        );
        assert!(errors.iter().all(|e| !e.contains("cycle")));
        assert!(
            warnings.iter().any(|w| w.contains("reference cycle")),
            "{:?}",
            warnings
        );
    }

    #[test]
    fn test_cycle_through_list_warns() {
        let (_, _, warnings) = check_source(
            "class Node\n    children: List[Node]\n    def init()\n    end\nend\n",
        );
        assert!(warnings.iter().any(|w| w.contains("reference cycle")));
    }

    #[test]
    fn test_no_cycle_no_warning() {
        let (_, _, warnings) = check_source(
            "class Leaf\n    x: i64\n    def init()\n    end\nend\n\nclass Tree\n    l: Leaf\n    def init()\n    end\nend\n",
        );
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_globals_in_order() {
        assert_clean("a: i64 = 1\nb := a + 1\n");
        let errs = errors_of("b := a + 1\na: i64 = 1\n");
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_print_format_holes() {
        assert_clean("def f(x: i64)\n    print(\"x = {}\", x)\nend\n");
        let errs = errors_of("def f(x: i64)\n    print(\"x = {} {}\", x)\nend\n");
        assert!(errs[0].contains("placeholder"), "{:?}", errs);
        assert_eq!(count_format_holes("a {} b {{literal}} {}"), 2);
    }

    #[test]
    fn test_for_loop_forms() {
        assert_clean(
            "def f(xs: List[str], d: Dict[i64, str])\n    for i: i64 in range(0, 10)\n        print(i)\n    end\n    for s: str in xs\n        print(s)\n    end\n    for k: i64 in d\n        print(k)\n    end\nend\n",
        );
        let errs = errors_of("def f(xs: List[str])\n    for i: i64 in xs\n    end\nend\n");
        assert!(errs[0].contains("loop variable"), "{:?}", errs);
    }

    #[test]
    fn test_str_concat_and_eq() {
        assert_clean(
            "def f(a: str, b: str) -> bool\n    c := a + b\n    return a == b\nend\n",
        );
        let errs = errors_of("def f(a: str, n: i64)\n    c := a + n\nend\n");
        assert!(!errs.is_empty());
    }

    #[test]
    fn test_fnptr_value_and_call() {
        assert_clean(
            "def double(x: i64) -> i64\n    return x * 2\nend\n\ndef apply(f: def(i64) -> i64, x: i64) -> i64\n    return f(x)\nend\n\ndef g()\n    h := double\n    y := apply(h, 3)\nend\n",
        );
    }

    #[test]
    fn test_fizzbuzz_checks() {
        assert_clean(
            "def main()\n    for i: i64 in range(1, 101)\n        if i % 15 == 0\n            print(\"FizzBuzz\")\n        elif i % 3 == 0\n            print(\"Fizz\")\n        elif i % 5 == 0\n            print(\"Buzz\")\n        else\n            print(i)\n        end\n    end\nend\n\nmain()\n",
        );
    }
}
