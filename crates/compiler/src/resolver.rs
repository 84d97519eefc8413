//! Import resolver for Bismut
//!
//! Resolves `import a.b.c` statements: loads `a/b/c.mut` relative to the
//! importing file first, then relative to the compiler's module
//! directory, runs the loaded text through the same preprocess → lex →
//! parse front half, and merges everything into one flat declaration
//! list.
//!
//! Resolution is a DFS with an in-progress set: revisiting a module that
//! is still being resolved is a circular-import error. Fully parsed
//! modules are cached by canonical path so diamond imports parse once.
//!
//! Every top-level name inside an imported module is renamed to
//! `alias__Name`, and references inside that module's bodies are
//! rewritten to match (shadow-aware: a local binding hides a top-level
//! name). `alias.name` member accesses collapse to `alias__name`.
//! Downstream stages never see modules — only the merged unit.

use crate::ast::*;
use crate::diag::{Diagnostics, Fatal, Pos};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::preprocess::preprocess;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Result of resolving a compilation's imports.
#[derive(Debug)]
pub struct ResolveResult {
    /// All declarations, dependencies first, root file last
    pub decls: Vec<Decl>,
    /// `extern` libraries named anywhere in the unit, in first-seen order
    pub extern_libs: Vec<(String, Pos)>,
    /// Continuation of the shared expression-id counter
    pub next_expr_id: ExprId,
}

pub struct Resolver<'a> {
    diags: &'a mut Diagnostics,
    defines: &'a HashSet<String>,
    module_dir: Option<PathBuf>,
    /// Parsed modules by canonical path (cache for diamond imports)
    cache: HashMap<PathBuf, Module>,
    /// Canonical path -> alias it was merged under
    merged: HashMap<PathBuf, String>,
    /// DFS stack for cycle detection (canonical path, display name)
    in_progress: Vec<(PathBuf, String)>,
    next_expr_id: ExprId,
    out: Vec<Decl>,
    extern_libs: Vec<(String, Pos)>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        module_dir: Option<PathBuf>,
        defines: &'a HashSet<String>,
        diags: &'a mut Diagnostics,
    ) -> Self {
        Resolver {
            diags,
            defines,
            module_dir,
            cache: HashMap::new(),
            merged: HashMap::new(),
            in_progress: Vec::new(),
            next_expr_id: 0,
            out: Vec::new(),
            extern_libs: Vec::new(),
        }
    }

    /// Resolve the root module's imports and merge everything.
    pub fn resolve(
        mut self,
        root_path: &Path,
        root: Module,
        next_expr_id: ExprId,
    ) -> Result<ResolveResult, Fatal> {
        self.next_expr_id = next_expr_id;
        let root_dir = root_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        if let Ok(canonical) = root_path.canonicalize() {
            self.in_progress
                .push((canonical, root_path.display().to_string()));
        }

        let mut aliases = HashSet::new();
        for import in &root.imports {
            self.resolve_import(import, &root_dir)?;
            aliases.insert(import.alias.clone());
        }
        self.in_progress.pop();

        let mut decls = root.decls;
        let top_names = collect_top_names(&decls);
        let mut renamer = Renamer {
            prefix: None,
            top_names,
            aliases,
        };
        for decl in &mut decls {
            renamer.rewrite_decl(decl);
        }
        self.collect_externs(&decls);
        self.out.append(&mut decls);

        self.check_name_clashes()?;

        Ok(ResolveResult {
            decls: self.out,
            extern_libs: self.extern_libs,
            next_expr_id: self.next_expr_id,
        })
    }

    fn resolve_import(&mut self, import: &Import, importer_dir: &Path) -> Result<(), Fatal> {
        let rel: PathBuf = {
            let mut p = PathBuf::new();
            for seg in &import.path {
                p.push(seg);
            }
            p.set_extension("mut");
            p
        };

        let mut candidates = vec![importer_dir.join(&rel)];
        if let Some(dir) = &self.module_dir {
            candidates.push(dir.join(&rel));
        }
        let found = candidates.iter().find(|p| p.is_file());
        let path = match found {
            Some(p) => p.clone(),
            None => {
                return Err(self.diags.fatal(
                    &import.pos,
                    import.path.join(".").len() as u32,
                    format!(
                        "cannot find module '{}' (looked for {})",
                        import.path.join("."),
                        rel.display()
                    ),
                ));
            }
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());

        // Cycle check before touching the cache: a module on the DFS
        // stack is being imported by one of its own (transitive) imports.
        if self.in_progress.iter().any(|(p, _)| *p == canonical) {
            let mut chain: Vec<String> = self
                .in_progress
                .iter()
                .map(|(_, name)| name.clone())
                .collect();
            chain.push(path.display().to_string());
            return Err(self.diags.fatal(
                &import.pos,
                import.path.join(".").len() as u32,
                format!("circular import: {}", chain.join(" -> ")),
            ));
        }

        if let Some(prev_alias) = self.merged.get(&canonical) {
            if *prev_alias != import.alias {
                return Err(self.diags.fatal(
                    &import.pos,
                    import.path.join(".").len() as u32,
                    format!(
                        "module '{}' is already imported as '{}'",
                        import.path.join("."),
                        prev_alias
                    ),
                ));
            }
            return Ok(()); // already merged under this alias
        }

        let module = match self.cache.get(&canonical) {
            Some(m) => m.clone(),
            None => {
                let module = self.load_module(&path, &import.pos)?;
                self.cache.insert(canonical.clone(), module.clone());
                module
            }
        };

        // Resolve this module's own imports first (DFS), so dependencies
        // land in the output before their dependents.
        self.in_progress
            .push((canonical.clone(), path.display().to_string()));
        let module_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut aliases = HashSet::new();
        for inner in &module.imports {
            self.resolve_import(inner, &module_dir)?;
            aliases.insert(inner.alias.clone());
        }
        self.in_progress.pop();
        self.merged.insert(canonical, import.alias.clone());

        let mut decls = module.decls;
        for decl in &decls {
            if let Decl::Stmt(stmt) = decl {
                return Err(self.diags.fatal(
                    stmt_pos(stmt),
                    1,
                    "top-level statements are only allowed in the main file",
                ));
            }
        }

        let top_names = collect_top_names(&decls);
        let mut renamer = Renamer {
            prefix: Some(import.alias.clone()),
            top_names,
            aliases,
        };
        for decl in &mut decls {
            renamer.rewrite_decl(decl);
        }
        self.collect_externs(&decls);
        self.out.append(&mut decls);
        Ok(())
    }

    fn load_module(&mut self, path: &Path, import_pos: &Pos) -> Result<Module, Fatal> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            self.diags.fatal(
                import_pos,
                1,
                format!("failed to read module {}: {}", path.display(), e),
            )
        })?;
        let file: Rc<str> = Rc::from(path.display().to_string());
        let text = preprocess(&source, &file, self.defines, self.diags)?;
        let tokens = Lexer::new(&text, file, self.diags).lex()?;
        let (module, next) = Parser::new(tokens, self.next_expr_id, self.diags).parse_module()?;
        self.next_expr_id = next;
        Ok(module)
    }

    fn collect_externs(&mut self, decls: &[Decl]) {
        for decl in decls {
            if let Decl::ExternLib { name, pos } = decl {
                if !self.extern_libs.iter().any(|(n, _)| n == name) {
                    self.extern_libs.push((name.clone(), pos.clone()));
                }
            }
        }
    }

    /// Mangled names must stay injective: two distinct declarations may
    /// not share a top-level name in the merged unit.
    fn check_name_clashes(&mut self) -> Result<(), Fatal> {
        let mut seen: HashMap<String, Pos> = HashMap::new();
        for decl in &self.out {
            let (name, pos) = match decl {
                Decl::Global(g) => (&g.name, &g.pos),
                Decl::Func(f) => (&f.name, &f.pos),
                Decl::Class(c) => (&c.name, &c.pos),
                Decl::Struct(s) => (&s.name, &s.pos),
                Decl::Enum(e) => (&e.name, &e.pos),
                Decl::Interface(i) => (&i.name, &i.pos),
                Decl::ExternLib { .. } | Decl::Stmt(_) => continue,
            };
            if let Some(first) = seen.get(name) {
                let msg = format!(
                    "duplicate top-level name '{}' (first declared at {})",
                    name, first
                );
                let pos = pos.clone();
                return Err(self.diags.fatal(&pos, name.len() as u32, msg));
            }
            seen.insert(name.clone(), pos.clone());
        }
        Ok(())
    }
}

fn stmt_pos(stmt: &Stmt) -> &Pos {
    match stmt {
        Stmt::VarDecl { pos, .. }
        | Stmt::Assign { pos, .. }
        | Stmt::If { pos, .. }
        | Stmt::While { pos, .. }
        | Stmt::For { pos, .. }
        | Stmt::Break { pos }
        | Stmt::Continue { pos }
        | Stmt::Return { pos, .. } => pos,
        Stmt::Expr(e) => &e.pos,
    }
}

fn collect_top_names(decls: &[Decl]) -> HashSet<String> {
    let mut names = HashSet::new();
    for decl in decls {
        match decl {
            Decl::Global(g) => {
                names.insert(g.name.clone());
            }
            Decl::Func(f) => {
                names.insert(f.name.clone());
            }
            Decl::Class(c) => {
                names.insert(c.name.clone());
            }
            Decl::Struct(s) => {
                names.insert(s.name.clone());
            }
            Decl::Enum(e) => {
                names.insert(e.name.clone());
            }
            Decl::Interface(i) => {
                names.insert(i.name.clone());
            }
            Decl::ExternLib { .. } | Decl::Stmt(_) => {}
        }
    }
    names
}

/// Rewrites one module's declarations: renames its top-level names with
/// the module prefix and fixes every reference, tracking local bindings
/// so shadowed names are left alone.
struct Renamer {
    /// `Some(alias)` for imported modules, `None` for the root file
    prefix: Option<String>,
    /// The module's own top-level names (pre-rename)
    top_names: HashSet<String>,
    /// Aliases this module's imports are bound to
    aliases: HashSet<String>,
}

impl Renamer {
    fn mangle(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{}__{}", p, name),
            None => name.to_string(),
        }
    }

    fn rewrite_decl(&mut self, decl: &mut Decl) {
        match decl {
            Decl::Global(g) => {
                g.name = self.mangle(&g.name);
                if let Some(ty) = &mut g.ty {
                    self.rewrite_type(ty);
                }
                let mut scope = ScopeStack::new();
                self.rewrite_expr(&mut g.init, &mut scope);
            }
            Decl::Func(f) => self.rewrite_func(f, true, false),
            Decl::Class(c) => {
                c.name = self.mangle(&c.name);
                for (iface, _) in &mut c.interfaces {
                    *iface = self.rewrite_plain_name(iface);
                }
                for field in &mut c.fields {
                    self.rewrite_type(&mut field.ty);
                }
                for m in &mut c.methods {
                    self.rewrite_func(m, false, true);
                }
            }
            Decl::Struct(s) => {
                s.name = self.mangle(&s.name);
                for field in &mut s.fields {
                    self.rewrite_type(&mut field.ty);
                }
                for m in &mut s.methods {
                    self.rewrite_func(m, false, true);
                }
            }
            Decl::Enum(e) => {
                e.name = self.mangle(&e.name);
            }
            Decl::Interface(i) => {
                i.name = self.mangle(&i.name);
                for sig in &mut i.methods {
                    for p in &mut sig.params {
                        self.rewrite_type(&mut p.ty);
                    }
                    if let Some(r) = &mut sig.ret {
                        self.rewrite_type(r);
                    }
                }
            }
            Decl::ExternLib { .. } => {}
            Decl::Stmt(stmt) => {
                let mut scope = ScopeStack::new();
                self.rewrite_stmt(stmt, &mut scope);
            }
        }
    }

    /// A bare name used where only a type can appear (class interface
    /// lists). Dotted spellings (`geo.IShape`) were stored joined.
    fn rewrite_plain_name(&self, name: &str) -> String {
        if let Some((alias, rest)) = name.split_once('.') {
            if self.aliases.contains(alias) {
                return format!("{}__{}", alias, rest);
            }
            return name.to_string();
        }
        if self.top_names.contains(name) {
            return self.mangle(name);
        }
        name.to_string()
    }

    fn rewrite_func(&mut self, f: &mut FuncDecl, rename_self: bool, is_method: bool) {
        if rename_self {
            f.name = self.mangle(&f.name);
        }
        for p in &mut f.params {
            self.rewrite_type(&mut p.ty);
        }
        if let Some(r) = &mut f.ret {
            self.rewrite_type(r);
        }
        let mut scope = ScopeStack::new();
        scope.push();
        for p in &f.params {
            scope.bind(&p.name);
        }
        for g in &f.generics {
            scope.bind(g);
        }
        if is_method {
            scope.bind("self");
        }
        for stmt in &mut f.body {
            self.rewrite_stmt(stmt, &mut scope);
        }
        scope.pop();
    }

    fn rewrite_type(&mut self, ty: &mut TypeExpr) {
        match ty {
            TypeExpr::Name { name, .. } => {
                if self.top_names.contains(name.as_str()) {
                    *name = self.mangle(name);
                }
            }
            TypeExpr::Qualified { alias, name, pos } => {
                if self.aliases.contains(alias.as_str()) {
                    *ty = TypeExpr::Name {
                        name: format!("{}__{}", alias, name),
                        pos: pos.clone(),
                    };
                }
            }
            TypeExpr::List { elem, .. } => self.rewrite_type(elem),
            TypeExpr::Dict { key, value, .. } => {
                self.rewrite_type(key);
                self.rewrite_type(value);
            }
            TypeExpr::Tuple { items, .. } => {
                for t in items {
                    self.rewrite_type(t);
                }
            }
            TypeExpr::Fn { params, ret, .. } => {
                for t in params {
                    self.rewrite_type(t);
                }
                self.rewrite_type(ret);
            }
        }
    }

    fn rewrite_stmt(&mut self, stmt: &mut Stmt, scope: &mut ScopeStack) {
        match stmt {
            Stmt::VarDecl { names, ty, init, .. } => {
                if let Some(ty) = ty {
                    self.rewrite_type(ty);
                }
                // The initializer is evaluated before the names bind.
                self.rewrite_expr(init, scope);
                for name in names.iter() {
                    scope.bind(name);
                }
            }
            Stmt::Assign { target, value, .. } => {
                self.rewrite_expr(target, scope);
                self.rewrite_expr(value, scope);
            }
            Stmt::If {
                arms, else_body, ..
            } => {
                for arm in arms {
                    self.rewrite_expr(&mut arm.cond, scope);
                    scope.push();
                    for s in &mut arm.body {
                        self.rewrite_stmt(s, scope);
                    }
                    scope.pop();
                }
                if let Some(body) = else_body {
                    scope.push();
                    for s in body {
                        self.rewrite_stmt(s, scope);
                    }
                    scope.pop();
                }
            }
            Stmt::While { cond, body, .. } => {
                self.rewrite_expr(cond, scope);
                scope.push();
                for s in body {
                    self.rewrite_stmt(s, scope);
                }
                scope.pop();
            }
            Stmt::For {
                var,
                var_ty,
                iter,
                body,
                ..
            } => {
                self.rewrite_type(var_ty);
                match iter {
                    ForIter::Range { start, stop } => {
                        self.rewrite_expr(start, scope);
                        self.rewrite_expr(stop, scope);
                    }
                    ForIter::Each(e) => self.rewrite_expr(e, scope),
                }
                scope.push();
                scope.bind(var);
                for s in body {
                    self.rewrite_stmt(s, scope);
                }
                scope.pop();
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    self.rewrite_expr(e, scope);
                }
            }
            Stmt::Expr(e) => self.rewrite_expr(e, scope),
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
        }
    }

    fn rewrite_expr(&mut self, expr: &mut Expr, scope: &mut ScopeStack) {
        // `alias.name` collapses to the mangled flat name when the alias
        // is an import binding that no local shadows.
        if let ExprKind::Member { object, field } = &expr.kind {
            if let ExprKind::Ident(alias) = &object.kind {
                if self.aliases.contains(alias.as_str()) && !scope.is_bound(alias) {
                    let flat = format!("{}__{}", alias, field);
                    expr.kind = ExprKind::Ident(flat);
                    return;
                }
            }
        }
        match &mut expr.kind {
            ExprKind::Ident(name) => {
                if self.top_names.contains(name.as_str()) && !scope.is_bound(name) {
                    *name = self.mangle(name);
                }
            }
            ExprKind::Member { object, .. } => {
                self.rewrite_expr(object, scope);
            }
            ExprKind::Index { object, index } => {
                self.rewrite_expr(object, scope);
                self.rewrite_expr(index, scope);
            }
            ExprKind::Call {
                callee,
                type_args,
                args,
            } => {
                self.rewrite_expr(callee, scope);
                for t in type_args {
                    self.rewrite_type(t);
                }
                for a in args {
                    self.rewrite_expr(a, scope);
                }
            }
            ExprKind::Unary { operand, .. } => self.rewrite_expr(operand, scope),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.rewrite_expr(lhs, scope);
                self.rewrite_expr(rhs, scope);
            }
            ExprKind::Is { value, ty } | ExprKind::As { value, ty } => {
                self.rewrite_expr(value, scope);
                self.rewrite_type(ty);
            }
            ExprKind::TupleLit(items) => {
                for e in items {
                    self.rewrite_expr(e, scope);
                }
            }
            ExprKind::ListLit { elem, items } => {
                self.rewrite_type(elem);
                for e in items {
                    self.rewrite_expr(e, scope);
                }
            }
            ExprKind::DictLit {
                key,
                value,
                entries,
            } => {
                self.rewrite_type(key);
                self.rewrite_type(value);
                for (k, v) in entries {
                    self.rewrite_expr(k, scope);
                    self.rewrite_expr(v, scope);
                }
            }
            ExprKind::Int { .. }
            | ExprKind::Float { .. }
            | ExprKind::Str(_)
            | ExprKind::CharLit(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit => {}
        }
    }
}

struct ScopeStack {
    scopes: Vec<HashSet<String>>,
}

impl ScopeStack {
    fn new() -> Self {
        ScopeStack {
            scopes: vec![HashSet::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashSet::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str) {
        if let Some(top) = self.scopes.last_mut() {
            top.insert(name.to_string());
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse_str(source: &str, file: &str, next_id: ExprId, diags: &mut Diagnostics) -> (Module, ExprId) {
        let tokens = Lexer::new(source, Rc::from(file), diags).lex().unwrap();
        Parser::new(tokens, next_id, diags).parse_module().unwrap()
    }

    fn resolve_dir(root_name: &str, files: &[(&str, &str)]) -> Result<ResolveResult, String> {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let root_path = dir.path().join(root_name);
        let source = fs::read_to_string(&root_path).unwrap();
        let mut diags = Diagnostics::new();
        let (module, next) = parse_str(&source, root_name, 0, &mut diags);
        let defines = HashSet::new();
        let resolver = Resolver::new(None, &defines, &mut diags);
        match resolver.resolve(&root_path, module, next) {
            Ok(r) => Ok(r),
            Err(_) => Err(diags.diagnostics()[0].message.clone()),
        }
    }

    fn decl_names(decls: &[Decl]) -> Vec<String> {
        decls
            .iter()
            .filter_map(|d| match d {
                Decl::Func(f) => Some(f.name.clone()),
                Decl::Global(g) => Some(g.name.clone()),
                Decl::Enum(e) => Some(e.name.clone()),
                Decl::Class(c) => Some(c.name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_import_mangles_and_merges() {
        let result = resolve_dir(
            "main.mut",
            &[
                ("main.mut", "import util\n\ndef main()\n    util.helper()\nend\nmain()\n"),
                ("util.mut", "def helper()\n    other()\nend\n\ndef other()\nend\n"),
            ],
        )
        .unwrap();
        let names = decl_names(&result.decls);
        assert!(names.contains(&"util__helper".to_string()));
        assert!(names.contains(&"util__other".to_string()));
        assert!(names.contains(&"main".to_string()));

        // util.helper() in main became a flat call to util__helper, and
        // helper's body call to other() became util__other.
        let main_fn = result.decls.iter().find_map(|d| match d {
            Decl::Func(f) if f.name == "main" => Some(f),
            _ => None,
        });
        match &main_fn.unwrap().body[0] {
            Stmt::Expr(e) => match &e.kind {
                ExprKind::Call { callee, .. } => {
                    assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "util__helper"))
                }
                _ => panic!("expected call"),
            },
            _ => panic!("expected expr stmt"),
        }
        let helper = result.decls.iter().find_map(|d| match d {
            Decl::Func(f) if f.name == "util__helper" => Some(f),
            _ => None,
        });
        match &helper.unwrap().body[0] {
            Stmt::Expr(e) => match &e.kind {
                ExprKind::Call { callee, .. } => {
                    assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "util__other"))
                }
                _ => panic!("expected call"),
            },
            _ => panic!("expected expr stmt"),
        }
    }

    #[test]
    fn test_local_shadowing_blocks_rename() {
        let result = resolve_dir(
            "main.mut",
            &[
                ("main.mut", "import util\n"),
                (
                    "util.mut",
                    "counter: i64 = 0\n\ndef f() -> i64\n    counter := 5\n    return counter\nend\n",
                ),
            ],
        )
        .unwrap();
        let f = result.decls.iter().find_map(|d| match d {
            Decl::Func(f) if f.name == "util__f" => Some(f),
            _ => None,
        });
        // The local `counter` shadows the module global; the return
        // refers to the local, so it must NOT be mangled.
        match &f.unwrap().body[1] {
            Stmt::Return { value: Some(e), .. } => {
                assert!(matches!(&e.kind, ExprKind::Ident(n) if n == "counter"));
            }
            _ => panic!("expected return"),
        }
    }

    #[test]
    fn test_circular_import_detected() {
        let err = resolve_dir(
            "a.mut",
            &[
                ("a.mut", "import b\n"),
                ("b.mut", "import a\n"),
            ],
        )
        .unwrap_err();
        assert!(err.contains("circular import"), "{}", err);
    }

    #[test]
    fn test_diamond_import_merges_once() {
        let result = resolve_dir(
            "main.mut",
            &[
                ("main.mut", "import a\nimport b\n"),
                ("a.mut", "import shared\ndef fa()\nend\n"),
                ("b.mut", "import shared\ndef fb()\nend\n"),
                ("shared.mut", "def s()\nend\n"),
            ],
        )
        .unwrap();
        let names = decl_names(&result.decls);
        assert_eq!(
            names.iter().filter(|n| n.as_str() == "shared__s").count(),
            1
        );
    }

    #[test]
    fn test_unknown_module() {
        let err = resolve_dir("main.mut", &[("main.mut", "import nope\n")]).unwrap_err();
        assert!(err.contains("cannot find module"), "{}", err);
    }

    #[test]
    fn test_name_clash_detected() {
        let err = resolve_dir(
            "main.mut",
            &[("main.mut", "def f()\nend\n\ndef f()\nend\n")],
        )
        .unwrap_err();
        assert!(err.contains("duplicate top-level name"), "{}", err);
    }

    #[test]
    fn test_top_level_stmt_in_import_rejected() {
        let err = resolve_dir(
            "main.mut",
            &[
                ("main.mut", "import util\n"),
                ("util.mut", "print(1)\n"),
            ],
        )
        .unwrap_err();
        assert!(err.contains("only allowed in the main file"), "{}", err);
    }

    #[test]
    fn test_nested_module_path() {
        let result = resolve_dir(
            "main.mut",
            &[
                ("main.mut", "import a.b.c as abc\n\ndef main()\n    abc.f()\nend\n"),
                ("a/b/c.mut", "def f()\nend\n"),
            ],
        )
        .unwrap();
        assert!(decl_names(&result.decls).contains(&"abc__f".to_string()));
    }

    #[test]
    fn test_qualified_type_and_enum_variant() {
        let result = resolve_dir(
            "main.mut",
            &[
                (
                    "main.mut",
                    "import geo\n\ndef f(p: geo.Point) -> i64\n    c := geo.Color.RED\n    return 0\nend\n",
                ),
                (
                    "geo.mut",
                    "class Point\n    x: i64\nend\n\nenum Color\n    RED\nend\n",
                ),
            ],
        )
        .unwrap();
        let f = result.decls.iter().find_map(|d| match d {
            Decl::Func(f) if f.name == "f" => Some(f),
            _ => None,
        }).unwrap();
        assert!(
            matches!(&f.params[0].ty, TypeExpr::Name { name, .. } if name == "geo__Point")
        );
        // geo.Color.RED -> Member { Ident(geo__Color), RED }
        match &f.body[0] {
            Stmt::VarDecl { init, .. } => match &init.kind {
                ExprKind::Member { object, field } => {
                    assert_eq!(field, "RED");
                    assert!(matches!(&object.kind, ExprKind::Ident(n) if n == "geo__Color"));
                }
                _ => panic!("expected member access"),
            },
            _ => panic!("expected var decl"),
        }
    }
}
