mod ty;
mod expr;
mod stmt;
mod decl;
pub(crate) use decl::StructCtx;
mod tmpl;

use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    Linkage, Node, NodeId, ScopeKind, SemaError, SemaResult, StaticAssertDecl,
};

use crate::tpl::SubstMap;
use crate::{Session, Token, Tokens};

/// The declaration parser
///
/// Owns the token stream and drives every registry on the session. The
/// template instantiation engine is implemented as methods on this type
/// (`crate::tpl`), because instantiation re-parses deferred bodies through
/// the same machinery.
pub struct Parser<'s> {
    pub sess: &'s mut Session,
    pub toks: Tokens,
    /// Template parameter pack names currently in scope
    pub(crate) packs: Vec<StrId>,
    /// Structs currently being defined, innermost last:
    /// (source-level name, registered name)
    pub(crate) struct_stack: Vec<(StrId, StrId)>,
    /// Nonzero while parsing a context whose function bodies must be
    /// deferred (template declarations)
    pub(crate) defer_bodies: u32,
    /// Nonzero while `>` must close a template argument list instead of
    /// acting as an operator
    pub(crate) no_gt_depth: u32,
}

impl<'s> Parser<'s> {
    pub fn new(sess: &'s mut Session, tokens: Vec<Token>) -> Self {
        Self {
            sess,
            toks: Tokens::new(tokens),
            packs: vec![],
            struct_stack: vec![],
            defer_bodies: 0,
            no_gt_depth: 0,
        }
    }

    /// Parse the whole translation unit. Syntax errors are recorded and
    /// recovery skips to the next declaration so diagnostics keep coverage.
    pub fn parse_translation_unit(&mut self) -> cu::Result<()> {
        while !self.toks.at_eof() {
            if let Err(e) = self.parse_top_decl() {
                self.sess.diags.error(e.to_string());
                self.recover_to_decl_boundary();
            }
        }
        cu::debug!(
            "translation unit parsed: {} nodes, {} types, {} errors",
            self.sess.nodes.len(),
            self.sess.types.len(),
            self.sess.diags.error_count()
        );
        Ok(())
    }

    pub(crate) fn parse_top_decl(&mut self) -> SemaResult<()> {
        let t = self.peek();
        if t.is(";") {
            self.toks.advance();
            return Ok(());
        }
        if t.is_kw("namespace") {
            return self.parse_namespace();
        }
        if t.is_kw("template") {
            return self.parse_template_decl();
        }
        if t.is_kw("static_assert") {
            let node = self.parse_static_assert()?;
            self.check_static_assert(node);
            return Ok(());
        }
        if t.is_kw("using") {
            return self.parse_using();
        }
        if t.is_kw("typedef") {
            return self.parse_typedef();
        }
        if t.is_kw("enum") {
            let node = self.parse_enum_decl()?;
            self.sess.top_level.push(node);
            return Ok(());
        }
        if t.is_kw("extern") && self.toks.peek_ahead(1).kind == crate::TokenKind::Literal {
            return self.parse_linkage_block();
        }
        if t.is_kw("struct") || t.is_kw("class") || t.is_kw("union") {
            // distinguish a type definition from `struct S x;`
            let after_name = self.toks.peek_ahead(2);
            if after_name.is("{") || after_name.is(":") || after_name.is(";") {
                let node = self.parse_struct_decl(None)?;
                self.sess.top_level.push(node);
                return Ok(());
            }
        }
        let node = self.parse_func_or_var()?;
        self.sess.top_level.push(node);
        Ok(())
    }

    fn parse_namespace(&mut self) -> SemaResult<()> {
        self.expect_kw("namespace")?;
        let name_tok = self.bump();
        if !name_tok.is_ident() {
            return Err(self.err_at(&name_tok, "expected namespace name"));
        }
        let name = self.intern(name_tok.text.as_ref());
        self.expect("{")?;
        self.sess.symbols.enter_scope(ScopeKind::Namespace(name));
        while !self.at("}") && !self.toks.at_eof() {
            if let Err(e) = self.parse_top_decl() {
                self.sess.diags.error(e.to_string());
                self.recover_to_decl_boundary();
            }
        }
        self.sess.symbols.exit_scope();
        self.expect("}")?;
        Ok(())
    }

    fn parse_linkage_block(&mut self) -> SemaResult<()> {
        self.expect_kw("extern")?;
        let lang = self.bump();
        let linkage = match lang.text.as_ref() {
            "\"C\"" => Linkage::C,
            "\"C++\"" => Linkage::Cpp,
            other => {
                return Err(self.err_at(&lang, format!("unknown linkage string {other}")));
            }
        };
        if self.eat("{") {
            while !self.at("}") && !self.toks.at_eof() {
                let node = self.parse_func_or_var_with_linkage(linkage)?;
                self.sess.top_level.push(node);
            }
            self.expect("}")?;
        } else {
            let node = self.parse_func_or_var_with_linkage(linkage)?;
            self.sess.top_level.push(node);
        }
        Ok(())
    }

    pub(crate) fn parse_static_assert(&mut self) -> SemaResult<NodeId> {
        self.expect_kw("static_assert")?;
        self.expect("(")?;
        let cond = self.parse_expr_no_comma()?;
        let message = if self.eat(",") {
            let m = self.bump();
            Some(m.text.clone())
        } else {
            None
        };
        self.expect(")")?;
        self.expect(";")?;
        Ok(self
            .sess
            .nodes
            .alloc(Node::StaticAssert(StaticAssertDecl { cond, message })))
    }

    /// Evaluate a static_assert in a non-dependent context. Failures are
    /// reported and compilation continues.
    pub(crate) fn check_static_assert(&mut self, node: NodeId) {
        let Some(sa) = self.sess.nodes.static_assert(node).cloned() else {
            return;
        };
        let map = SubstMap::default();
        match self.eval_const(sa.cond, &map) {
            Ok(v) if v != 0 => {}
            Ok(_) => {
                let msg = sa
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "static assertion failed".to_string());
                self.sess.diags.error(format!("static_assert failed: {msg}"));
            }
            Err(e) => {
                // dependent condition outside a template is already an
                // error elsewhere; keep this advisory
                self.sess
                    .diags
                    .warn(format!("static_assert not evaluated: {e}"));
            }
        }
    }

    // -- token helpers ------------------------------------------------------

    pub(crate) fn peek(&self) -> &Token {
        self.toks.peek()
    }

    pub(crate) fn at(&self, s: &str) -> bool {
        self.toks.peek().is(s)
    }

    pub(crate) fn at_kw(&self, s: &str) -> bool {
        self.toks.peek().is_kw(s)
    }

    pub(crate) fn at_ident(&self) -> bool {
        self.toks.peek().is_ident()
    }

    pub(crate) fn bump(&mut self) -> Token {
        let t = self.toks.peek().clone();
        self.toks.advance();
        t
    }

    pub(crate) fn eat(&mut self, s: &str) -> bool {
        if self.at(s) {
            self.toks.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_kw(&mut self, s: &str) -> bool {
        if self.at_kw(s) {
            self.toks.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, s: &str) -> SemaResult<Token> {
        if self.at(s) {
            Ok(self.bump())
        } else {
            let t = self.peek().clone();
            Err(self.err_at(&t, format!("expected '{s}', found '{}'", t.text)))
        }
    }

    pub(crate) fn expect_kw(&mut self, s: &str) -> SemaResult<Token> {
        if self.at_kw(s) {
            Ok(self.bump())
        } else {
            let t = self.peek().clone();
            Err(self.err_at(&t, format!("expected '{s}', found '{}'", t.text)))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> SemaResult<Token> {
        let t = self.peek().clone();
        if t.is_ident() {
            Ok(self.bump())
        } else {
            Err(self.err_at(&t, format!("expected identifier, found '{}'", t.text)))
        }
    }

    pub(crate) fn intern(&mut self, s: &str) -> StrId {
        self.sess.strings.intern(s)
    }

    pub(crate) fn err_here(&self, msg: impl Into<String>) -> SemaError {
        let t = self.peek();
        SemaError::parse(msg, t.line, t.col)
    }

    pub(crate) fn err_at(&self, t: &Token, msg: impl Into<String>) -> SemaError {
        SemaError::parse(msg, t.line, t.col)
    }

    /// Skip a balanced token run starting at `open`
    pub(crate) fn skip_balanced(&mut self, open: &str, close: &str) -> SemaResult<()> {
        self.expect(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.toks.at_eof() {
                return Err(self.err_here(format!("unbalanced '{open}'")));
            }
            if self.at(open) {
                depth += 1;
            } else if self.at(close) {
                depth -= 1;
            }
            self.toks.advance();
        }
        Ok(())
    }

    /// Skip forward to the next plausible declaration boundary
    pub(crate) fn recover_to_decl_boundary(&mut self) {
        let mut depth = 0usize;
        while !self.toks.at_eof() {
            if self.at("{") {
                depth += 1;
            } else if self.at("}") {
                if depth == 0 {
                    self.toks.advance();
                    return;
                }
                depth -= 1;
            } else if self.at(";") && depth == 0 {
                self.toks.advance();
                return;
            }
            self.toks.advance();
        }
    }

    // -- speculation and scoped substitution --------------------------------

    /// Run a parse attempt that may be discarded. On error the token
    /// position, speculative type registrations and scopes are rolled
    /// back; AST nodes created during the attempt are preserved
    /// (lexer-only restore semantics).
    pub(crate) fn speculate<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> SemaResult<T>,
    ) -> SemaResult<T> {
        let pos = self.toks.pos();
        let ty_mark = self.sess.types.mark();
        let sym_depth = self.sess.symbols.depth();
        match f(self) {
            Ok(x) => Ok(x),
            Err(e) => {
                self.toks.set_pos(pos);
                self.sess.types.rollback(ty_mark);
                self.sess.symbols.truncate(sym_depth);
                Err(e)
            }
        }
    }

    /// Run `f` with a template-parameter scope active. The scope is removed
    /// on all paths, including errors.
    pub(crate) fn with_subst<T>(
        &mut self,
        map: SubstMap,
        f: impl FnOnce(&mut Self) -> SemaResult<T>,
    ) -> SemaResult<T> {
        let pack_mark = self.packs.len();
        for name in map.pack_names() {
            self.packs.push(name);
        }
        self.sess.subst_stack.push(map);
        let r = f(self);
        self.sess.subst_stack.pop();
        self.packs.truncate(pack_mark);
        r
    }

    pub(crate) fn is_pack_name(&self, name: StrId) -> bool {
        self.packs.contains(&name)
    }
}
