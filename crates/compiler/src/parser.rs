//! Recursive-descent parser for Bismut
//!
//! Consumes the lexer's token vector by index. Statements are terminated
//! by newline tokens (the lexer already suppressed newlines inside
//! brackets); a statement may also end where its enclosing block does, so
//! one-line forms like `def f()  return 1  end` parse.
//!
//! Expression parsing is precedence climbing over the table (high → low):
//! unary `not - ~`; `* / %`; `+ -`; `<< >>`; `< <= > >= is as`; `== !=`;
//! `&`; `^`; `|`; `and`; `or`. All binary operators are left-associative.
//!
//! `name[T](...)` is a generic call, distinguished from subscripting by
//! the `(` that follows the closing `]`. `List[T]() { ... }` and
//! `Dict[K, V]() { k: v, ... }` are collection literals and require the
//! constructor call to have zero arguments.

use crate::ast::*;
use crate::diag::{Diagnostics, Fatal, Pos};
use crate::lexer::{Keyword, Punct, Token, TokenKind};

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    diags: &'a mut Diagnostics,
    next_expr_id: ExprId,
    loop_depth: u32,
}

impl<'a> Parser<'a> {
    /// `next_expr_id` continues a shared counter so expression ids stay
    /// unique across all modules of a compilation.
    pub fn new(tokens: Vec<Token>, next_expr_id: ExprId, diags: &'a mut Diagnostics) -> Self {
        Parser {
            tokens,
            pos: 0,
            diags,
            next_expr_id,
            loop_depth: 0,
        }
    }

    pub fn parse_module(mut self) -> Result<(Module, ExprId), Fatal> {
        let mut module = Module::new();
        self.skip_newlines();

        while self.at_key(Keyword::Import) {
            module.imports.push(self.parse_import()?);
            self.skip_newlines();
        }

        while !self.at_eof() {
            if self.at_key(Keyword::Import) {
                let pos = self.peek_pos();
                return Err(self.diags.fatal(
                    &pos,
                    6,
                    "imports must precede all other top-level declarations",
                ));
            }
            let decl = self.parse_top_decl()?;
            module.decls.push(decl);
            self.skip_newlines();
        }
        Ok((module, self.next_expr_id))
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn peek_pos(&self) -> Pos {
        self.peek().pos.clone()
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn at_key(&self, kw: Keyword) -> bool {
        matches!(&self.peek().kind, TokenKind::Key(k) if *k == kw)
    }

    fn at_punct(&self, p: Punct) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(q) if *q == p)
    }

    fn eat_key(&mut self, kw: Keyword) -> bool {
        if self.at_key(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_key(&mut self, kw: Keyword) -> Result<Token, Fatal> {
        if self.at_key(kw) {
            Ok(self.bump())
        } else {
            let found = self.peek().describe();
            let pos = self.peek_pos();
            let span = self.peek().span.max(1);
            Err(self
                .diags
                .fatal(&pos, span, format!("expected '{}', found {}", kw.name(), found)))
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<Token, Fatal> {
        if self.at_punct(p) {
            Ok(self.bump())
        } else {
            let found = self.peek().describe();
            let pos = self.peek_pos();
            let span = self.peek().span.max(1);
            Err(self
                .diags
                .fatal(&pos, span, format!("expected '{}', found {}", p.symbol(), found)))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Pos), Fatal> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let pos = self.peek_pos();
                self.bump();
                Ok((name, pos))
            }
            _ => {
                let found = self.peek().describe();
                let pos = self.peek_pos();
                let span = self.peek().span.max(1);
                Err(self
                    .diags
                    .fatal(&pos, span, format!("expected identifier, found {}", found)))
            }
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.bump();
        }
    }

    /// A statement ends at a newline, or right before the token that
    /// closes its enclosing block (`end` / `elif` / `else` / EOF).
    fn expect_terminator(&mut self) -> Result<(), Fatal> {
        match &self.peek().kind {
            TokenKind::Newline => {
                self.skip_newlines();
                Ok(())
            }
            TokenKind::Eof
            | TokenKind::Key(Keyword::End)
            | TokenKind::Key(Keyword::Elif)
            | TokenKind::Key(Keyword::Else) => Ok(()),
            _ => {
                let found = self.peek().describe();
                let pos = self.peek_pos();
                let span = self.peek().span.max(1);
                Err(self
                    .diags
                    .fatal(&pos, span, format!("expected end of statement, found {}", found)))
            }
        }
    }

    fn new_expr(&mut self, kind: ExprKind, pos: Pos) -> Expr {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        Expr { kind, pos, id }
    }

    // ------------------------------------------------------------------
    // Top-level declarations
    // ------------------------------------------------------------------

    fn parse_import(&mut self) -> Result<Import, Fatal> {
        let pos = self.expect_key(Keyword::Import)?.pos;
        let (first, _) = self.expect_ident()?;
        let mut path = vec![first];
        while self.eat_punct(Punct::Dot) {
            let (seg, _) = self.expect_ident()?;
            path.push(seg);
        }
        let alias = if self.eat_key(Keyword::As) {
            self.expect_ident()?.0
        } else {
            path.last().expect("path has at least one segment").clone()
        };
        self.expect_terminator()?;
        Ok(Import { path, alias, pos })
    }

    fn parse_top_decl(&mut self) -> Result<Decl, Fatal> {
        match &self.peek().kind {
            TokenKind::Key(Keyword::Def) => Ok(Decl::Func(self.parse_func(true)?)),
            TokenKind::Key(Keyword::Class) => self.parse_class(),
            TokenKind::Key(Keyword::Struct) => self.parse_struct(),
            TokenKind::Key(Keyword::Enum) => self.parse_enum(),
            TokenKind::Key(Keyword::Interface) => self.parse_interface(),
            TokenKind::Key(Keyword::Extern) => {
                let pos = self.bump().pos;
                let (name, _) = self.expect_ident()?;
                self.expect_terminator()?;
                Ok(Decl::ExternLib { name, pos })
            }
            TokenKind::Key(Keyword::Const) => {
                self.bump();
                Ok(Decl::Global(self.parse_global(true)?))
            }
            TokenKind::Key(Keyword::Static) => {
                let pos = self.peek_pos();
                Err(self
                    .diags
                    .fatal(&pos, 6, "'static' is only valid inside a function"))
            }
            TokenKind::Ident(_)
                if matches!(
                    self.peek_at(1),
                    Some(TokenKind::Punct(Punct::Colon)) | Some(TokenKind::Punct(Punct::ColonAssign))
                ) && !self.looks_like_multi_assign() =>
            {
                Ok(Decl::Global(self.parse_global(false)?))
            }
            _ => Ok(Decl::Stmt(self.parse_stmt()?)),
        }
    }

    fn parse_global(&mut self, is_const: bool) -> Result<GlobalDecl, Fatal> {
        let (name, pos) = self.expect_ident()?;
        let (ty, init) = if self.eat_punct(Punct::ColonAssign) {
            (None, self.parse_expr()?)
        } else {
            self.expect_punct(Punct::Colon)?;
            let ty = self.parse_type()?;
            self.expect_punct(Punct::Assign)?;
            (Some(ty), self.parse_expr()?)
        };
        self.expect_terminator()?;
        Ok(GlobalDecl {
            name,
            ty,
            init,
            is_const,
            pos,
        })
    }

    /// Parse `def name[T](params) -> ret ... end`. With `allow_generics`
    /// false (interface/struct/class methods do not declare their own
    /// type parameters) a `[` after the name is rejected.
    fn parse_func(&mut self, allow_generics: bool) -> Result<FuncDecl, Fatal> {
        let def_pos = self.expect_key(Keyword::Def)?.pos;
        let (name, pos) = self.expect_ident()?;

        let mut generics = Vec::new();
        if self.at_punct(Punct::LBracket) {
            if !allow_generics {
                let p = self.peek_pos();
                return Err(self
                    .diags
                    .fatal(&p, 1, "methods cannot declare generic parameters"));
            }
            self.bump();
            loop {
                let (g, _) = self.expect_ident()?;
                generics.push(g);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::RBracket)?;
        }

        self.expect_punct(Punct::LParen)?;
        let params = self.parse_params()?;
        self.expect_punct(Punct::RParen)?;

        let ret = if self.eat_punct(Punct::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block("def", &def_pos, false)?;
        self.expect_key(Keyword::End)?;
        Ok(FuncDecl {
            name,
            generics,
            params,
            ret,
            body,
            pos,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, Fatal> {
        let mut params = Vec::new();
        if self.at_punct(Punct::RParen) {
            return Ok(params);
        }
        loop {
            let (name, pos) = self.expect_ident()?;
            self.expect_punct(Punct::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param { name, ty, pos });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_class(&mut self) -> Result<Decl, Fatal> {
        let class_pos = self.expect_key(Keyword::Class)?.pos;
        let (name, pos) = self.expect_ident()?;
        let mut interfaces = Vec::new();
        if self.eat_punct(Punct::Colon) {
            loop {
                let (mut iface, ipos) = self.expect_ident()?;
                // Imported interfaces may be written `alias.IName`; the
                // resolver splits the joined spelling back apart.
                if self.eat_punct(Punct::Dot) {
                    let (rest, _) = self.expect_ident()?;
                    iface = format!("{}.{}", iface, rest);
                }
                interfaces.push((iface, ipos));
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_terminator()?;
        let (fields, methods) = self.parse_members(&class_pos)?;
        self.expect_key(Keyword::End)?;
        Ok(Decl::Class(ClassDecl {
            name,
            interfaces,
            fields,
            methods,
            pos,
        }))
    }

    fn parse_struct(&mut self) -> Result<Decl, Fatal> {
        let struct_pos = self.expect_key(Keyword::Struct)?.pos;
        let (name, pos) = self.expect_ident()?;
        self.expect_terminator()?;
        let (fields, methods) = self.parse_members(&struct_pos)?;
        self.expect_key(Keyword::End)?;
        Ok(Decl::Struct(StructDecl {
            name,
            fields,
            methods,
            pos,
        }))
    }

    fn parse_members(&mut self, open_pos: &Pos) -> Result<(Vec<Field>, Vec<FuncDecl>), Fatal> {
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            self.skip_newlines();
            match &self.peek().kind {
                TokenKind::Key(Keyword::End) => break,
                TokenKind::Key(Keyword::Def) => methods.push(self.parse_func(false)?),
                TokenKind::Ident(_) => {
                    let (name, pos) = self.expect_ident()?;
                    self.expect_punct(Punct::Colon)?;
                    let ty = self.parse_type()?;
                    self.expect_terminator()?;
                    fields.push(Field { name, ty, pos });
                }
                TokenKind::Eof => {
                    return Err(self.diags.fatal(
                        open_pos,
                        1,
                        "missing 'end' to close this declaration",
                    ));
                }
                _ => {
                    let found = self.peek().describe();
                    let pos = self.peek_pos();
                    let span = self.peek().span.max(1);
                    return Err(self.diags.fatal(
                        &pos,
                        span,
                        format!("expected field, method or 'end', found {}", found),
                    ));
                }
            }
        }
        Ok((fields, methods))
    }

    fn parse_enum(&mut self) -> Result<Decl, Fatal> {
        let enum_pos = self.expect_key(Keyword::Enum)?.pos;
        let (name, pos) = self.expect_ident()?;
        self.expect_terminator()?;
        let mut variants = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_key(Keyword::End) {
                break;
            }
            if self.at_eof() {
                return Err(self
                    .diags
                    .fatal(&enum_pos, 4, "missing 'end' to close this enum"));
            }
            let (vname, vpos) = self.expect_ident()?;
            let value = if self.eat_punct(Punct::Assign) {
                let negative = self.eat_punct(Punct::Minus);
                match &self.peek().kind {
                    TokenKind::Int { value, .. } => {
                        let v = if negative { -*value } else { *value };
                        self.bump();
                        Some(v)
                    }
                    _ => {
                        let found = self.peek().describe();
                        let p = self.peek_pos();
                        let span = self.peek().span.max(1);
                        return Err(self.diags.fatal(
                            &p,
                            span,
                            format!("expected integer enum value, found {}", found),
                        ));
                    }
                }
            } else {
                None
            };
            self.expect_terminator()?;
            variants.push(EnumVariant {
                name: vname,
                value,
                pos: vpos,
            });
        }
        Ok(Decl::Enum(EnumDecl { name, variants, pos }))
    }

    fn parse_interface(&mut self) -> Result<Decl, Fatal> {
        let iface_pos = self.expect_key(Keyword::Interface)?.pos;
        let (name, pos) = self.expect_ident()?;
        self.expect_terminator()?;
        let mut methods = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_key(Keyword::End) {
                break;
            }
            if self.at_eof() {
                return Err(self
                    .diags
                    .fatal(&iface_pos, 9, "missing 'end' to close this interface"));
            }
            self.expect_key(Keyword::Def)?;
            let (mname, mpos) = self.expect_ident()?;
            self.expect_punct(Punct::LParen)?;
            let params = self.parse_params()?;
            self.expect_punct(Punct::RParen)?;
            let ret = if self.eat_punct(Punct::Arrow) {
                Some(self.parse_type()?)
            } else {
                None
            };
            self.expect_terminator()?;
            methods.push(FuncSig {
                name: mname,
                params,
                ret,
                pos: mpos,
            });
        }
        Ok(Decl::Interface(InterfaceDecl { name, methods, pos }))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse statements until the block's closing token. With
    /// `stop_at_elif`, `elif`/`else` also end the block (if-arms).
    fn parse_block(
        &mut self,
        what: &str,
        open_pos: &Pos,
        stop_at_elif: bool,
    ) -> Result<Vec<Stmt>, Fatal> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            match &self.peek().kind {
                TokenKind::Key(Keyword::End) => break,
                TokenKind::Key(Keyword::Elif) | TokenKind::Key(Keyword::Else) if stop_at_elif => {
                    break
                }
                TokenKind::Eof => {
                    return Err(self.diags.fatal(
                        open_pos,
                        1,
                        format!("missing 'end' to close this '{}'", what),
                    ));
                }
                _ => stmts.push(self.parse_stmt()?),
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Fatal> {
        match &self.peek().kind {
            TokenKind::Key(Keyword::If) => self.parse_if(),
            TokenKind::Key(Keyword::While) => self.parse_while(),
            TokenKind::Key(Keyword::For) => self.parse_for(),
            TokenKind::Key(Keyword::Break) => {
                let pos = self.bump().pos;
                if self.loop_depth == 0 {
                    return Err(self.diags.fatal(&pos, 5, "'break' outside of a loop"));
                }
                self.expect_terminator()?;
                Ok(Stmt::Break { pos })
            }
            TokenKind::Key(Keyword::Continue) => {
                let pos = self.bump().pos;
                if self.loop_depth == 0 {
                    return Err(self.diags.fatal(&pos, 8, "'continue' outside of a loop"));
                }
                self.expect_terminator()?;
                Ok(Stmt::Continue { pos })
            }
            TokenKind::Key(Keyword::Return) => {
                let pos = self.bump().pos;
                let value = if matches!(
                    self.peek().kind,
                    TokenKind::Newline
                        | TokenKind::Eof
                        | TokenKind::Key(Keyword::End)
                        | TokenKind::Key(Keyword::Elif)
                        | TokenKind::Key(Keyword::Else)
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_terminator()?;
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::Key(Keyword::Static) => {
                self.bump();
                let is_const = self.eat_key(Keyword::Const);
                self.parse_var_decl(is_const, true)
            }
            TokenKind::Key(Keyword::Const) => {
                self.bump();
                self.parse_var_decl(true, false)
            }
            TokenKind::Ident(_) if self.looks_like_multi_assign() => {
                self.parse_var_decl(false, false)
            }
            TokenKind::Ident(_)
                if matches!(
                    self.peek_at(1),
                    Some(TokenKind::Punct(Punct::ColonAssign))
                ) =>
            {
                self.parse_var_decl(false, false)
            }
            TokenKind::Ident(_)
                if matches!(self.peek_at(1), Some(TokenKind::Punct(Punct::Colon))) =>
            {
                self.parse_var_decl(false, false)
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    /// `Ident (',' Ident)+ ':='` — lookahead only, nothing consumed.
    fn looks_like_multi_assign(&self) -> bool {
        let mut i = self.pos;
        let mut names = 0;
        loop {
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Ident(_)) => i += 1,
                _ => return false,
            }
            names += 1;
            match self.tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Punct(Punct::Comma)) => i += 1,
                Some(TokenKind::Punct(Punct::ColonAssign)) => return names >= 2,
                _ => return false,
            }
        }
    }

    fn parse_var_decl(&mut self, is_const: bool, is_static: bool) -> Result<Stmt, Fatal> {
        let (first, pos) = self.expect_ident()?;
        let mut names = vec![first];
        while self.eat_punct(Punct::Comma) {
            names.push(self.expect_ident()?.0);
        }

        let (ty, init) = if self.eat_punct(Punct::ColonAssign) {
            (None, self.parse_expr()?)
        } else {
            if names.len() > 1 {
                let p = self.peek_pos();
                return Err(self.diags.fatal(
                    &p,
                    1,
                    "destructuring declarations must use ':='",
                ));
            }
            self.expect_punct(Punct::Colon)?;
            let ty = self.parse_type()?;
            self.expect_punct(Punct::Assign)?;
            (Some(ty), self.parse_expr()?)
        };
        self.expect_terminator()?;
        Ok(Stmt::VarDecl {
            names,
            ty,
            init,
            is_const,
            is_static,
            pos,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Fatal> {
        let if_pos = self.expect_key(Keyword::If)?.pos;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        let body = self.parse_block("if", &if_pos, true)?;
        arms.push(IfArm { cond, body });
        let mut else_body = None;
        loop {
            if self.eat_key(Keyword::Elif) {
                let cond = self.parse_expr()?;
                let body = self.parse_block("elif", &if_pos, true)?;
                arms.push(IfArm { cond, body });
            } else if self.eat_key(Keyword::Else) {
                else_body = Some(self.parse_block("else", &if_pos, false)?);
                break;
            } else {
                break;
            }
        }
        self.expect_key(Keyword::End)?;
        self.expect_terminator()?;
        Ok(Stmt::If {
            arms,
            else_body,
            pos: if_pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Fatal> {
        let pos = self.expect_key(Keyword::While)?.pos;
        let cond = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block("while", &pos, false);
        self.loop_depth -= 1;
        let body = body?;
        self.expect_key(Keyword::End)?;
        self.expect_terminator()?;
        Ok(Stmt::While { cond, body, pos })
    }

    fn parse_for(&mut self) -> Result<Stmt, Fatal> {
        let pos = self.expect_key(Keyword::For)?.pos;
        let (var, _) = self.expect_ident()?;
        self.expect_punct(Punct::Colon)?;
        let var_ty = self.parse_type()?;
        self.expect_key(Keyword::In)?;

        // `range(a, b)` is part of the for-header grammar, not a call.
        let iter = if matches!(&self.peek().kind, TokenKind::Ident(name) if name == "range")
            && matches!(self.peek_at(1), Some(TokenKind::Punct(Punct::LParen)))
        {
            self.bump();
            self.expect_punct(Punct::LParen)?;
            let start = self.parse_expr()?;
            self.expect_punct(Punct::Comma)?;
            let stop = self.parse_expr()?;
            self.expect_punct(Punct::RParen)?;
            ForIter::Range { start, stop }
        } else {
            ForIter::Each(self.parse_expr()?)
        };

        self.loop_depth += 1;
        let body = self.parse_block("for", &pos, false);
        self.loop_depth -= 1;
        let body = body?;
        self.expect_key(Keyword::End)?;
        self.expect_terminator()?;
        Ok(Stmt::For {
            var,
            var_ty,
            iter,
            body,
            pos,
        })
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt, Fatal> {
        let expr = self.parse_expr()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(Punct::Assign) => Some(None),
            TokenKind::Punct(Punct::PlusAssign) => Some(Some(BinOp::Add)),
            TokenKind::Punct(Punct::MinusAssign) => Some(Some(BinOp::Sub)),
            TokenKind::Punct(Punct::StarAssign) => Some(Some(BinOp::Mul)),
            TokenKind::Punct(Punct::SlashAssign) => Some(Some(BinOp::Div)),
            TokenKind::Punct(Punct::PercentAssign) => Some(Some(BinOp::Mod)),
            _ => None,
        };
        match op {
            Some(compound) => {
                let pos = self.bump().pos;
                if !matches!(
                    expr.kind,
                    ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
                ) {
                    return Err(self.diags.fatal(&expr.pos, 1, "invalid assignment target"));
                }
                let value = self.parse_expr()?;
                self.expect_terminator()?;
                Ok(Stmt::Assign {
                    target: expr,
                    op: compound,
                    value,
                    pos,
                })
            }
            None => {
                self.expect_terminator()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, Fatal> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_and()?;
        while self.at_key(Keyword::Or) {
            let pos = self.bump().pos;
            let rhs = self.parse_and()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op: BinOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_bitor()?;
        while self.at_key(Keyword::And) {
            let pos = self.bump().pos;
            let rhs = self.parse_bitor()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op: BinOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_bitxor()?;
        while self.at_punct(Punct::Pipe) {
            let pos = self.bump().pos;
            let rhs = self.parse_bitxor()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op: BinOp::BitOr,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_bitand()?;
        while self.at_punct(Punct::Caret) {
            let pos = self.bump().pos;
            let rhs = self.parse_bitand()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op: BinOp::BitXor,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_equality()?;
        while self.at_punct(Punct::Amp) {
            let pos = self.bump().pos;
            let rhs = self.parse_equality()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op: BinOp::BitAnd,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::EqEq) => BinOp::Eq,
                TokenKind::Punct(Punct::NotEq) => BinOp::Ne,
                _ => break,
            };
            let pos = self.bump().pos;
            let rhs = self.parse_comparison()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    /// `< <= > >=` plus the type operators `is` / `as` at the same level.
    fn parse_comparison(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_shift()?;
        loop {
            match &self.peek().kind {
                TokenKind::Key(Keyword::Is) => {
                    let pos = self.bump().pos;
                    let ty = self.parse_type()?;
                    lhs = self.new_expr(
                        ExprKind::Is {
                            value: Box::new(lhs),
                            ty,
                        },
                        pos,
                    );
                }
                TokenKind::Key(Keyword::As) => {
                    let pos = self.bump().pos;
                    let ty = self.parse_type()?;
                    lhs = self.new_expr(
                        ExprKind::As {
                            value: Box::new(lhs),
                            ty,
                        },
                        pos,
                    );
                }
                TokenKind::Punct(p) => {
                    let op = match p {
                        Punct::Lt => BinOp::Lt,
                        Punct::LtEq => BinOp::Le,
                        Punct::Gt => BinOp::Gt,
                        Punct::GtEq => BinOp::Ge,
                        _ => break,
                    };
                    let pos = self.bump().pos;
                    let rhs = self.parse_shift()?;
                    lhs = self.new_expr(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        pos,
                    );
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::Shl) => BinOp::Shl,
                TokenKind::Punct(Punct::Shr) => BinOp::Shr,
                _ => break,
            };
            let pos = self.bump().pos;
            let rhs = self.parse_additive()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::Plus) => BinOp::Add,
                TokenKind::Punct(Punct::Minus) => BinOp::Sub,
                _ => break,
            };
            let pos = self.bump().pos;
            let rhs = self.parse_multiplicative()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Fatal> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::Star) => BinOp::Mul,
                TokenKind::Punct(Punct::Slash) => BinOp::Div,
                TokenKind::Punct(Punct::Percent) => BinOp::Mod,
                _ => break,
            };
            let pos = self.bump().pos;
            let rhs = self.parse_unary()?;
            lhs = self.new_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Fatal> {
        let op = match &self.peek().kind {
            TokenKind::Key(Keyword::Not) => Some(UnOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnOp::Neg),
            TokenKind::Punct(Punct::Tilde) => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let pos = self.bump().pos;
            let operand = self.parse_unary()?;
            return Ok(self.new_expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                pos,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Fatal> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::Punct(Punct::LParen) => {
                    let pos = self.peek_pos();
                    let args = self.parse_call_args()?;
                    expr = self.new_expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            type_args: Vec::new(),
                            args,
                        },
                        pos,
                    );
                }
                TokenKind::Punct(Punct::LBracket) => {
                    // `name[T](...)` is a generic call; anything else is a
                    // subscript. The deciding token is the `(` after `]`.
                    if matches!(expr.kind, ExprKind::Ident(_)) && self.bracket_then_call() {
                        let pos = self.peek_pos();
                        self.bump();
                        let mut type_args = Vec::new();
                        loop {
                            type_args.push(self.parse_type()?);
                            if !self.eat_punct(Punct::Comma) {
                                break;
                            }
                        }
                        self.expect_punct(Punct::RBracket)?;
                        let args = self.parse_call_args()?;
                        expr = self.new_expr(
                            ExprKind::Call {
                                callee: Box::new(expr),
                                type_args,
                                args,
                            },
                            pos,
                        );
                    } else {
                        let pos = self.bump().pos;
                        let index = self.parse_expr()?;
                        self.expect_punct(Punct::RBracket)?;
                        expr = self.new_expr(
                            ExprKind::Index {
                                object: Box::new(expr),
                                index: Box::new(index),
                            },
                            pos,
                        );
                    }
                }
                TokenKind::Punct(Punct::Dot) => {
                    let pos = self.bump().pos;
                    let (field, _) = self.expect_ident()?;
                    expr = self.new_expr(
                        ExprKind::Member {
                            object: Box::new(expr),
                            field,
                        },
                        pos,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, Fatal> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
            if self.at_punct(Punct::RParen) {
                break; // trailing comma
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    /// From a `[` at the cursor: does a `(` follow the matching `]`?
    fn bracket_then_call(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some(tok) = self.tokens.get(i) {
            match &tok.kind {
                TokenKind::Punct(Punct::LBracket)
                | TokenKind::Punct(Punct::LParen)
                | TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RBracket)
                | TokenKind::Punct(Punct::RParen)
                | TokenKind::Punct(Punct::RBrace) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Punct(Punct::LParen))
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_primary(&mut self) -> Result<Expr, Fatal> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Int { value, radix } => {
                let (value, radix) = (*value, *radix);
                self.bump();
                Ok(self.new_expr(ExprKind::Int { value, radix }, tok.pos))
            }
            TokenKind::Float { text } => {
                let text = text.clone();
                self.bump();
                Ok(self.new_expr(ExprKind::Float { text }, tok.pos))
            }
            TokenKind::Str { value, .. } => {
                let value = value.clone();
                self.bump();
                Ok(self.new_expr(ExprKind::Str(value), tok.pos))
            }
            TokenKind::Char(code) => {
                let code = *code;
                self.bump();
                Ok(self.new_expr(ExprKind::CharLit(code), tok.pos))
            }
            TokenKind::Key(Keyword::True) => {
                self.bump();
                Ok(self.new_expr(ExprKind::Bool(true), tok.pos))
            }
            TokenKind::Key(Keyword::False) => {
                self.bump();
                Ok(self.new_expr(ExprKind::Bool(false), tok.pos))
            }
            TokenKind::Key(Keyword::None) => {
                self.bump();
                Ok(self.new_expr(ExprKind::NoneLit, tok.pos))
            }
            TokenKind::Key(kw)
                if kw.is_type_name()
                    && !matches!(kw, Keyword::Void | Keyword::Str)
                    && matches!(self.peek_at(1), Some(TokenKind::Punct(Punct::LParen))) =>
            {
                // Explicit cast: i32(x), f64(n), ...
                let name = kw.name().to_string();
                self.bump();
                let pos = self.peek_pos();
                let args = self.parse_call_args()?;
                let callee = self.new_expr(ExprKind::Ident(name), tok.pos);
                Ok(self.new_expr(
                    ExprKind::Call {
                        callee: Box::new(callee),
                        type_args: Vec::new(),
                        args,
                    },
                    pos,
                ))
            }
            TokenKind::Ident(name) if name == "List" || name == "Dict" => {
                self.parse_collection_literal()
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Ok(self.new_expr(ExprKind::Ident(name), tok.pos))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                let first = self.parse_expr()?;
                if self.eat_punct(Punct::Comma) {
                    let mut items = vec![first];
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                        if self.at_punct(Punct::RParen) {
                            break;
                        }
                    }
                    self.expect_punct(Punct::RParen)?;
                    Ok(self.new_expr(ExprKind::TupleLit(items), tok.pos))
                } else {
                    self.expect_punct(Punct::RParen)?;
                    Ok(first)
                }
            }
            _ => {
                let found = tok.describe();
                let span = tok.span.max(1);
                Err(self
                    .diags
                    .fatal(&tok.pos, span, format!("expected expression, found {}", found)))
            }
        }
    }

    /// `List[T]() { e, ... }` / `Dict[K, V]() { k: v, ... }`. The
    /// constructor call must have zero positional arguments; the brace
    /// block is optional.
    fn parse_collection_literal(&mut self) -> Result<Expr, Fatal> {
        let head = self.bump();
        let is_list = matches!(&head.kind, TokenKind::Ident(n) if n == "List");
        let pos = head.pos.clone();

        self.expect_punct(Punct::LBracket)?;
        let first_ty = self.parse_type()?;
        let second_ty = if !is_list {
            self.expect_punct(Punct::Comma)?;
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect_punct(Punct::RBracket)?;

        self.expect_punct(Punct::LParen)?;
        if !self.at_punct(Punct::RParen) {
            let p = self.peek_pos();
            return Err(self.diags.fatal(
                &p,
                1,
                "collection constructors take no arguments; use the { ... } initializer",
            ));
        }
        self.bump();

        if is_list {
            let mut items = Vec::new();
            if self.eat_punct(Punct::LBrace) {
                while !self.at_punct(Punct::RBrace) {
                    items.push(self.parse_expr()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBrace)?;
            }
            Ok(self.new_expr(
                ExprKind::ListLit {
                    elem: first_ty,
                    items,
                },
                pos,
            ))
        } else {
            let mut entries = Vec::new();
            if self.eat_punct(Punct::LBrace) {
                while !self.at_punct(Punct::RBrace) {
                    let k = self.parse_expr()?;
                    self.expect_punct(Punct::Colon)?;
                    let v = self.parse_expr()?;
                    entries.push((k, v));
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBrace)?;
            }
            Ok(self.new_expr(
                ExprKind::DictLit {
                    key: first_ty,
                    value: second_ty.expect("dict has a value type"),
                    entries,
                },
                pos,
            ))
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn parse_type(&mut self) -> Result<TypeExpr, Fatal> {
        let tok = self.peek().clone();
        match &tok.kind {
            // `x is None` names the None bottom in type position
            TokenKind::Key(Keyword::None) => {
                self.bump();
                Ok(TypeExpr::Name {
                    name: "None".to_string(),
                    pos: tok.pos,
                })
            }
            TokenKind::Key(kw) if kw.is_type_name() => {
                self.bump();
                Ok(TypeExpr::Name {
                    name: kw.name().to_string(),
                    pos: tok.pos,
                })
            }
            TokenKind::Key(Keyword::Def) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let mut params = Vec::new();
                if !self.at_punct(Punct::RParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RParen)?;
                self.expect_punct(Punct::Arrow)?;
                let ret = self.parse_type()?;
                Ok(TypeExpr::Fn {
                    params,
                    ret: Box::new(ret),
                    pos: tok.pos,
                })
            }
            TokenKind::Ident(name) if name == "List" => {
                self.bump();
                self.expect_punct(Punct::LBracket)?;
                let elem = self.parse_type()?;
                self.expect_punct(Punct::RBracket)?;
                Ok(TypeExpr::List {
                    elem: Box::new(elem),
                    pos: tok.pos,
                })
            }
            TokenKind::Ident(name) if name == "Dict" => {
                self.bump();
                self.expect_punct(Punct::LBracket)?;
                let key = self.parse_type()?;
                self.expect_punct(Punct::Comma)?;
                let value = self.parse_type()?;
                self.expect_punct(Punct::RBracket)?;
                Ok(TypeExpr::Dict {
                    key: Box::new(key),
                    value: Box::new(value),
                    pos: tok.pos,
                })
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                if self.at_punct(Punct::Dot) {
                    self.bump();
                    let (inner, _) = self.expect_ident()?;
                    Ok(TypeExpr::Qualified {
                        alias: name,
                        name: inner,
                        pos: tok.pos,
                    })
                } else {
                    Ok(TypeExpr::Name { name, pos: tok.pos })
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                let mut items = vec![self.parse_type()?];
                while self.eat_punct(Punct::Comma) {
                    items.push(self.parse_type()?);
                }
                self.expect_punct(Punct::RParen)?;
                if items.len() < 2 {
                    return Err(self.diags.fatal(
                        &tok.pos,
                        1,
                        "tuple types need at least two elements",
                    ));
                }
                Ok(TypeExpr::Tuple {
                    items,
                    pos: tok.pos,
                })
            }
            _ => {
                let found = tok.describe();
                let span = tok.span.max(1);
                Err(self
                    .diags
                    .fatal(&tok.pos, span, format!("expected type, found {}", found)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use std::rc::Rc;

    fn parse(source: &str) -> Module {
        let mut diags = Diagnostics::new();
        let tokens = Lexer::new(source, Rc::from("t.mut"), &mut diags)
            .lex()
            .expect("lex failed");
        let (module, _) = Parser::new(tokens, 0, &mut diags)
            .parse_module()
            .unwrap_or_else(|_| panic!("parse failed: {:?}", diags.diagnostics()));
        module
    }

    fn parse_err(source: &str) -> String {
        let mut diags = Diagnostics::new();
        let tokens = match Lexer::new(source, Rc::from("t.mut"), &mut diags).lex() {
            Ok(t) => t,
            Err(_) => return diags.diagnostics()[0].message.clone(),
        };
        let res = Parser::new(tokens, 0, &mut diags).parse_module();
        assert!(res.is_err(), "expected parse error");
        diags.diagnostics()[0].message.clone()
    }

    #[test]
    fn test_parse_function() {
        let m = parse("def add(a: i64, b: i64) -> i64\n    return a + b\nend\n");
        assert_eq!(m.decls.len(), 1);
        match &m.decls[0] {
            Decl::Func(f) => {
                assert_eq!(f.name, "add");
                assert_eq!(f.params.len(), 2);
                assert!(f.ret.is_some());
                assert_eq!(f.body.len(), 1);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_one_line_function() {
        let m = parse("def pair() -> (i64, str)  return (42, \"hi\")  end\n");
        match &m.decls[0] {
            Decl::Func(f) => {
                assert!(matches!(f.ret, Some(TypeExpr::Tuple { .. })));
                assert_eq!(f.body.len(), 1);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_generic_function_header() {
        let m = parse("def id[T](x: T) -> T\n    return x\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => assert_eq!(f.generics, vec!["T".to_string()]),
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_imports_first() {
        let m = parse("import a.b.c\nimport x.y as z\n\ndef main()\nend\n");
        assert_eq!(m.imports.len(), 2);
        assert_eq!(m.imports[0].path, vec!["a", "b", "c"]);
        assert_eq!(m.imports[0].alias, "c");
        assert_eq!(m.imports[1].alias, "z");
        assert!(parse_err("def main()\nend\nimport a\n").contains("precede"));
    }

    #[test]
    fn test_class_with_interfaces() {
        let m = parse(
            "class Circle : IShape\n    r: f64\n    def init(r: f64)\n        self.r = r\n    end\n    def area() -> f64\n        return self.r * self.r * 3.14159\n    end\nend\n",
        );
        match &m.decls[0] {
            Decl::Class(c) => {
                assert_eq!(c.name, "Circle");
                assert_eq!(c.interfaces[0].0, "IShape");
                assert_eq!(c.fields.len(), 1);
                assert_eq!(c.methods.len(), 2);
            }
            _ => panic!("expected class"),
        }
    }

    #[test]
    fn test_enum_with_explicit_value() {
        let m = parse("enum Color\n    RED\n    GREEN = 5\n    BLUE\nend\n");
        match &m.decls[0] {
            Decl::Enum(e) => {
                assert_eq!(e.variants.len(), 3);
                assert_eq!(e.variants[1].value, Some(5));
                assert_eq!(e.variants[2].value, None);
            }
            _ => panic!("expected enum"),
        }
    }

    #[test]
    fn test_interface_signatures() {
        let m = parse("interface IShape\n    def area() -> f64\nend\n");
        match &m.decls[0] {
            Decl::Interface(i) => {
                assert_eq!(i.methods.len(), 1);
                assert_eq!(i.methods[0].name, "area");
            }
            _ => panic!("expected interface"),
        }
    }

    #[test]
    fn test_multi_assign_destructure() {
        let m = parse("a, b := pair()\n");
        match &m.decls[0] {
            Decl::Stmt(Stmt::VarDecl { names, ty, .. }) => {
                assert_eq!(names, &vec!["a".to_string(), "b".to_string()]);
                assert!(ty.is_none());
            }
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn test_single_decl_at_top_level_is_global() {
        let m = parse("x := 3\nconst PI: f64 = 3.14\n");
        assert!(matches!(&m.decls[0], Decl::Global(g) if !g.is_const));
        assert!(matches!(&m.decls[1], Decl::Global(g) if g.is_const));
    }

    #[test]
    fn test_precedence() {
        let m = parse("x := 1 + 2 * 3\n");
        match &m.decls[0] {
            Decl::Global(g) => match &g.init.kind {
                ExprKind::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(
                        matches!(&rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }),
                        "* binds tighter than +"
                    );
                }
                _ => panic!("expected binary"),
            },
            _ => panic!("expected global"),
        }
    }

    #[test]
    fn test_comparison_tighter_than_equality() {
        // a < b == c < d parses as (a < b) == (c < d)
        let m = parse("x := a < b == c < d\n");
        match &m.decls[0] {
            Decl::Global(g) => match &g.init.kind {
                ExprKind::Binary { op, lhs, rhs } => {
                    assert_eq!(*op, BinOp::Eq);
                    assert!(matches!(&lhs.kind, ExprKind::Binary { op: BinOp::Lt, .. }));
                    assert!(matches!(&rhs.kind, ExprKind::Binary { op: BinOp::Lt, .. }));
                }
                _ => panic!("expected binary"),
            },
            _ => panic!("expected global"),
        }
    }

    #[test]
    fn test_generic_call_vs_subscript() {
        let m = parse("def f()\n    x := id[i64](7)\n    y := xs[0]\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => {
                match &f.body[0] {
                    Stmt::VarDecl { init, .. } => match &init.kind {
                        ExprKind::Call { type_args, .. } => assert_eq!(type_args.len(), 1),
                        _ => panic!("expected generic call"),
                    },
                    _ => panic!(),
                }
                match &f.body[1] {
                    Stmt::VarDecl { init, .. } => {
                        assert!(matches!(&init.kind, ExprKind::Index { .. }))
                    }
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_collection_literals() {
        let m = parse("xs := List[i64]() { 1, 2, 3, }\nd := Dict[str, i64]() { \"a\": 1 }\n");
        match &m.decls[0] {
            Decl::Global(g) => match &g.init.kind {
                ExprKind::ListLit { items, .. } => assert_eq!(items.len(), 3),
                _ => panic!("expected list literal"),
            },
            _ => panic!(),
        }
        match &m.decls[1] {
            Decl::Global(g) => match &g.init.kind {
                ExprKind::DictLit { entries, .. } => assert_eq!(entries.len(), 1),
                _ => panic!("expected dict literal"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_collection_ctor_rejects_args() {
        assert!(parse_err("xs := List[i64](3)\n").contains("no arguments"));
    }

    #[test]
    fn test_for_forms() {
        let m = parse(
            "def f(xs: List[i64])\n    for i: i64 in range(0, 10)\n        print(i)\n    end\n    for x: i64 in xs\n        print(x)\n    end\nend\n",
        );
        match &m.decls[0] {
            Decl::Func(f) => {
                assert!(matches!(
                    &f.body[0],
                    Stmt::For { iter: ForIter::Range { .. }, .. }
                ));
                assert!(matches!(
                    &f.body[1],
                    Stmt::For { iter: ForIter::Each(_), .. }
                ));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let m = parse(
            "def f(x: i64)\n    if x > 1\n        print(1)\n    elif x > 0\n        print(2)\n    else\n        print(3)\n    end\nend\n",
        );
        match &m.decls[0] {
            Decl::Func(f) => match &f.body[0] {
                Stmt::If { arms, else_body, .. } => {
                    assert_eq!(arms.len(), 2);
                    assert!(else_body.is_some());
                }
                _ => panic!("expected if"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        assert!(parse_err("def f()\n    break\nend\n").contains("outside"));
    }

    #[test]
    fn test_break_inside_loop_ok() {
        let m = parse("def f()\n    while True\n        break\n    end\nend\n");
        assert!(matches!(&m.decls[0], Decl::Func(_)));
    }

    #[test]
    fn test_missing_end() {
        assert!(parse_err("def f()\n    x := 1\n").contains("missing 'end'"));
    }

    #[test]
    fn test_compound_assign() {
        let m = parse("def f()\n    x := 0\n    x += 2\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => {
                assert!(matches!(
                    &f.body[1],
                    Stmt::Assign { op: Some(BinOp::Add), .. }
                ));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_cast_call() {
        let m = parse("def f(x: i64)\n    y := i32(x)\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => match &f.body[0] {
                Stmt::VarDecl { init, .. } => match &init.kind {
                    ExprKind::Call { callee, .. } => {
                        assert!(matches!(&callee.kind, ExprKind::Ident(n) if n == "i32"))
                    }
                    _ => panic!("expected cast call"),
                },
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_is_as_take_types() {
        let m = parse("def f(s: IShape)\n    if s is Circle\n        c := s as Circle\n    end\nend\n");
        assert!(matches!(&m.decls[0], Decl::Func(_)));
    }

    #[test]
    fn test_fnptr_type() {
        let m = parse("def apply(f: def(i64) -> i64, x: i64) -> i64\n    return f(x)\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => assert!(matches!(&f.params[0].ty, TypeExpr::Fn { .. })),
            _ => panic!(),
        }
    }

    #[test]
    fn test_qualified_type() {
        let m = parse("def f(p: geo.Point)\nend\n");
        match &m.decls[0] {
            Decl::Func(f) => assert!(
                matches!(&f.params[0].ty, TypeExpr::Qualified { alias, name, .. } if alias == "geo" && name == "Point")
            ),
            _ => panic!(),
        }
    }

    #[test]
    fn test_tuple_expr_vs_paren() {
        let m = parse("x := (1 + 2)\ny := (1, 2)\n");
        match (&m.decls[0], &m.decls[1]) {
            (Decl::Global(a), Decl::Global(b)) => {
                assert!(matches!(&a.init.kind, ExprKind::Binary { .. }));
                assert!(matches!(&b.init.kind, ExprKind::TupleLit(items) if items.len() == 2));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_statements_on_one_line() {
        let m = parse("a, b := pair(); print(a); print(b)\n");
        assert_eq!(m.decls.len(), 3);
    }
}
