//! Abstract syntax tree for Bismut
//!
//! The tree is built by the parser, rewritten in place by the import
//! resolver (name mangling), decorated by the type checker, and walked by
//! the C emitter. Nodes are plain tagged enums so every consumer can match
//! exhaustively.
//!
//! Every expression carries a unique `id` assigned at parse time. The type
//! checker keys its side tables (resolved types, call targets, folded
//! constants) on those ids, which is also why monomorphized clones of
//! generic bodies must be renumbered (see [`renumber_func`]).

use crate::diag::Pos;
use std::fmt;

pub type ExprId = usize;

/// A syntactic type annotation. Resolved to a semantic `Type` by the
/// checker; the resolver only rewrites `alias.Name` qualifications.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `i64`, `str`, `MyClass`, `T`
    Name { name: String, pos: Pos },
    /// `alias.Type` — collapsed to `alias__Type` by the import resolver
    Qualified { alias: String, name: String, pos: Pos },
    /// `List[T]`
    List { elem: Box<TypeExpr>, pos: Pos },
    /// `Dict[K, V]`
    Dict {
        key: Box<TypeExpr>,
        value: Box<TypeExpr>,
        pos: Pos,
    },
    /// `(T1, T2, ...)` with two or more elements
    Tuple { items: Vec<TypeExpr>, pos: Pos },
    /// `def(T1, T2) -> R` — pointer to a top-level function
    Fn {
        params: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
        pos: Pos,
    },
}

impl TypeExpr {
    pub fn pos(&self) -> &Pos {
        match self {
            TypeExpr::Name { pos, .. }
            | TypeExpr::Qualified { pos, .. }
            | TypeExpr::List { pos, .. }
            | TypeExpr::Dict { pos, .. }
            | TypeExpr::Tuple { pos, .. }
            | TypeExpr::Fn { pos, .. } => pos,
        }
    }
}

/// One parsed source file, before import resolution.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }
}

/// `import a.b.c` or `import a.b.c as x`
#[derive(Debug, Clone)]
pub struct Import {
    /// Dotted path segments (`["a", "b", "c"]`)
    pub path: Vec<String>,
    /// Binding name: last segment unless overridden with `as`
    pub alias: String,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Global(GlobalDecl),
    Func(FuncDecl),
    Class(ClassDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Interface(InterfaceDecl),
    /// `extern name` — load `name.mutlib`
    ExternLib { name: String, pos: Pos },
    /// Top-level statement; legal in the root file only. These run in
    /// source order inside the generated `main`.
    Stmt(Stmt),
}

/// Global `x: T = e` / `x := e`, optionally `const`.
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub init: Expr,
    pub is_const: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub pos: Pos,
}

/// A function or method definition. Methods are stored inside their
/// class/struct declaration; `init` is the constructor body for classes.
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    /// Generic type parameters: `def id[T](x: T) -> T`
    pub generics: Vec<String>,
    pub params: Vec<Param>,
    /// `None` means void
    pub ret: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

impl FuncDecl {
    pub fn is_generic(&self) -> bool {
        !self.generics.is_empty()
    }
}

/// A method signature inside an `interface` block (no body).
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeExpr,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    /// Interfaces the class declares it implements
    pub interfaces: Vec<(String, Pos)>,
    pub fields: Vec<Field>,
    pub methods: Vec<FuncDecl>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Field>,
    pub methods: Vec<FuncDecl>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub name: String,
    /// Explicit `= N` resets the running counter
    pub value: Option<i64>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<FuncSig>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `x: T = e`, `x := e`, `a, b := e`, with `const`/`static` modifiers.
    /// Multiple names destructure a tuple RHS.
    VarDecl {
        names: Vec<String>,
        ty: Option<TypeExpr>,
        init: Expr,
        is_const: bool,
        is_static: bool,
        pos: Pos,
    },
    /// `lv = e` or compound `lv += e` (op carries the arithmetic part)
    Assign {
        target: Expr,
        op: Option<BinOp>,
        value: Expr,
        pos: Pos,
    },
    If {
        arms: Vec<IfArm>,
        else_body: Option<Vec<Stmt>>,
        pos: Pos,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        pos: Pos,
    },
    For {
        var: String,
        var_ty: TypeExpr,
        iter: ForIter,
        body: Vec<Stmt>,
        pos: Pos,
    },
    Break {
        pos: Pos,
    },
    Continue {
        pos: Pos,
    },
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    Expr(Expr),
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

/// The iterable of a `for` loop.
#[derive(Debug, Clone)]
pub enum ForIter {
    /// `range(start, stop)` — recognized syntactically in the header
    Range { start: Expr, stop: Expr },
    /// A `List[T]` (elements) or `Dict[K, V]` (keys) expression
    Each(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    BitNot,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "not"),
            UnOp::Neg => write!(f, "-"),
            UnOp::BitNot => write!(f, "~"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    /// Source-level spelling, used in diagnostics.
    pub fn symbol(&self) -> &'static str {
        match self {
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
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
    pub id: ExprId,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal; polymorphic until placed in a typed context.
    /// The radix is remembered for diagnostics.
    Int { value: i64, radix: u32 },
    /// Float literal; original spelling kept so emission is byte-stable.
    Float { text: String },
    Str(String),
    /// Char literal, ASCII code as i64; adapts like an integer literal
    CharLit(i64),
    Bool(bool),
    NoneLit,
    Ident(String),
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        /// Explicit generic arguments: `id[i64](7)`
        type_args: Vec<TypeExpr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Is {
        value: Box<Expr>,
        ty: TypeExpr,
    },
    As {
        value: Box<Expr>,
        ty: TypeExpr,
    },
    /// `(e1, e2, ...)` with two or more elements
    TupleLit(Vec<Expr>),
    /// `List[T]() { e, e, ... }` (braces optional when empty)
    ListLit {
        elem: TypeExpr,
        items: Vec<Expr>,
    },
    /// `Dict[K, V]() { k: v, ... }`
    DictLit {
        key: TypeExpr,
        value: TypeExpr,
        entries: Vec<(Expr, Expr)>,
    },
}

/// Re-assign fresh expression ids to a whole function body.
///
/// Used when a generic function is monomorphized: each instantiation is a
/// clone of the declaration whose expressions must not collide with the
/// original's ids in the checker's side tables.
pub fn renumber_func(func: &mut FuncDecl, next_id: &mut ExprId) {
    for stmt in &mut func.body {
        renumber_stmt(stmt, next_id);
    }
}

fn renumber_stmt(stmt: &mut Stmt, next_id: &mut ExprId) {
    match stmt {
        Stmt::VarDecl { init, .. } => renumber_expr(init, next_id),
        Stmt::Assign { target, value, .. } => {
            renumber_expr(target, next_id);
            renumber_expr(value, next_id);
        }
        Stmt::If {
            arms, else_body, ..
        } => {
            for arm in arms {
                renumber_expr(&mut arm.cond, next_id);
                for s in &mut arm.body {
                    renumber_stmt(s, next_id);
                }
            }
            if let Some(body) = else_body {
                for s in body {
                    renumber_stmt(s, next_id);
                }
            }
        }
        Stmt::While { cond, body, .. } => {
            renumber_expr(cond, next_id);
            for s in body {
                renumber_stmt(s, next_id);
            }
        }
        Stmt::For { iter, body, .. } => {
            match iter {
                ForIter::Range { start, stop } => {
                    renumber_expr(start, next_id);
                    renumber_expr(stop, next_id);
                }
                ForIter::Each(e) => renumber_expr(e, next_id),
            }
            for s in body {
                renumber_stmt(s, next_id);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(e) = value {
                renumber_expr(e, next_id);
            }
        }
        Stmt::Expr(e) => renumber_expr(e, next_id),
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
    }
}

fn renumber_expr(expr: &mut Expr, next_id: &mut ExprId) {
    expr.id = *next_id;
    *next_id += 1;
    match &mut expr.kind {
        ExprKind::Member { object, .. } => renumber_expr(object, next_id),
        ExprKind::Index { object, index } => {
            renumber_expr(object, next_id);
            renumber_expr(index, next_id);
        }
        ExprKind::Call { callee, args, .. } => {
            renumber_expr(callee, next_id);
            for a in args {
                renumber_expr(a, next_id);
            }
        }
        ExprKind::Unary { operand, .. } => renumber_expr(operand, next_id),
        ExprKind::Binary { lhs, rhs, .. } => {
            renumber_expr(lhs, next_id);
            renumber_expr(rhs, next_id);
        }
        ExprKind::Is { value, .. } | ExprKind::As { value, .. } => {
            renumber_expr(value, next_id);
        }
        ExprKind::TupleLit(items) | ExprKind::ListLit { items, .. } => {
            for e in items {
                renumber_expr(e, next_id);
            }
        }
        ExprKind::DictLit { entries, .. } => {
            for (k, v) in entries {
                renumber_expr(k, next_id);
                renumber_expr(v, next_id);
            }
        }
        ExprKind::Int { .. }
        | ExprKind::Float { .. }
        | ExprKind::Str(_)
        | ExprKind::CharLit(_)
        | ExprKind::Bool(_)
        | ExprKind::NoneLit
        | ExprKind::Ident(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn pos() -> Pos {
        Pos::new(Rc::from("t.mut"), 1, 1)
    }

    fn int(id: ExprId, v: i64) -> Expr {
        Expr {
            kind: ExprKind::Int {
                value: v,
                radix: 10,
            },
            pos: pos(),
            id,
        }
    }

    #[test]
    fn test_renumber_assigns_fresh_ids() {
        let mut func = FuncDecl {
            name: "f".to_string(),
            generics: vec![],
            params: vec![],
            ret: None,
            body: vec![Stmt::Expr(Expr {
                kind: ExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(int(0, 1)),
                    rhs: Box::new(int(1, 2)),
                },
                pos: pos(),
                id: 2,
            })],
            pos: pos(),
        };
        let mut next = 100;
        renumber_func(&mut func, &mut next);
        assert_eq!(next, 103);
        match &func.body[0] {
            Stmt::Expr(e) => {
                assert_eq!(e.id, 100);
                match &e.kind {
                    ExprKind::Binary { lhs, rhs, .. } => {
                        assert_eq!(lhs.id, 101);
                        assert_eq!(rhs.id, 102);
                    }
                    _ => panic!("expected Binary"),
                }
            }
            _ => panic!("expected Expr statement"),
        }
    }

    #[test]
    fn test_binop_symbols() {
        assert_eq!(BinOp::Shl.symbol(), "<<");
        assert_eq!(BinOp::And.symbol(), "and");
        assert_eq!(format!("{}", BinOp::Ne), "!=");
    }
}
