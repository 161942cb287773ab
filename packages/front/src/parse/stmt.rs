use cu::pre::*;
use embercc_sema::{
    AliasDecl, Block, ForStmt, IfStmt, Node, NodeId, ReturnStmt, ScopeKind, SemaResult,
    StorageOpts, VarDecl, WhileStmt,
};

use crate::parse::Parser;

/// Statement parsing, used both for function bodies parsed in place and
/// for deferred template bodies re-parsed per instantiation
impl<'s> Parser<'s> {
    /// Parse a `{ ... }` block in its own scope
    pub fn parse_block(&mut self) -> SemaResult<NodeId> {
        self.expect("{")?;
        self.sess.symbols.enter_scope(ScopeKind::Block);
        let mut stmts = vec![];
        let result = loop {
            if self.at("}") {
                break Ok(());
            }
            if self.toks.at_eof() {
                break Err(self.err_here("unterminated block"));
            }
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(e) => break Err(e),
            }
        };
        self.sess.symbols.exit_scope();
        result?;
        self.expect("}")?;
        Ok(self.sess.nodes.alloc(Node::Block(Block { stmts })))
    }

    pub fn parse_stmt(&mut self) -> SemaResult<NodeId> {
        if self.at("{") {
            return self.parse_block();
        }
        if self.at(";") {
            self.toks.advance();
            return Ok(self.sess.nodes.alloc(Node::Empty));
        }
        if self.at_kw("return") {
            self.toks.advance();
            let value = if self.at(";") {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(";")?;
            if let Some(v) = value {
                self.typecheck_statement_expr(v);
            }
            return Ok(self.sess.nodes.alloc(Node::Return(ReturnStmt { value })));
        }
        if self.at_kw("if") {
            self.toks.advance();
            let is_constexpr = self.eat_kw("constexpr");
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            let then_branch = self.parse_stmt()?;
            let else_branch = if self.eat_kw("else") {
                Some(self.parse_stmt()?)
            } else {
                None
            };
            return Ok(self.sess.nodes.alloc(Node::If(IfStmt {
                cond,
                then_branch,
                else_branch,
                is_constexpr,
            })));
        }
        if self.at_kw("while") {
            self.toks.advance();
            self.expect("(")?;
            let cond = self.parse_expr()?;
            self.expect(")")?;
            let body = self.parse_stmt()?;
            return Ok(self.sess.nodes.alloc(Node::While(WhileStmt { cond, body })));
        }
        if self.at_kw("for") {
            self.toks.advance();
            self.expect("(")?;
            self.sess.symbols.enter_scope(ScopeKind::Block);
            let result = self.parse_for_tail();
            self.sess.symbols.exit_scope();
            return result;
        }
        if self.at_kw("static_assert") {
            let node = self.parse_static_assert()?;
            self.check_static_assert(node);
            return Ok(node);
        }
        if self.at_kw("using") {
            self.expect_kw("using")?;
            let name_tok = self.expect_ident()?;
            let name = self.intern(name_tok.text.as_ref());
            self.expect("=")?;
            let target = self.parse_type_specifier()?;
            self.expect(";")?;
            if target.index.is_valid() {
                self.sess.types.add_alias(name, target.index);
            }
            return Ok(self.sess.nodes.alloc(Node::Alias(AliasDecl { name, target })));
        }
        if self.at_kw("break") || self.at_kw("continue") {
            self.toks.advance();
            self.expect(";")?;
            return Ok(self.sess.nodes.alloc(Node::Empty));
        }

        // declaration or expression statement; a declaration must parse a
        // type followed by a name
        let as_decl = self.speculate(|p| p.parse_local_var());
        if let Ok(node) = as_decl {
            return Ok(node);
        }
        let e = self.parse_expr_statement_full()?;
        self.expect(";")?;
        self.typecheck_statement_expr(e);
        Ok(self.sess.nodes.alloc(Node::ExprStmt(e)))
    }

    fn parse_for_tail(&mut self) -> SemaResult<NodeId> {
        let init = if self.at(";") {
            self.toks.advance();
            None
        } else {
            Some(self.parse_stmt()?)
        };
        let cond = if self.at(";") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(";")?;
        let step = if self.at(")") {
            None
        } else {
            Some(self.parse_expr_statement_full()?)
        };
        self.expect(")")?;
        let body = self.parse_stmt()?;
        Ok(self.sess.nodes.alloc(Node::For(ForStmt {
            init,
            cond,
            step,
            body,
        })))
    }

    fn parse_local_var(&mut self) -> SemaResult<NodeId> {
        let mut storage = StorageOpts::default();
        loop {
            if self.eat_kw("static") {
                storage.is_static = true;
            } else if self.eat_kw("constexpr") {
                storage.is_constexpr = true;
            } else {
                break;
            }
        }
        let mut ty = self.parse_type_specifier()?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        if self.at("[") {
            self.toks.advance();
            ty.is_array = true;
            if !self.at("]") {
                let len = self.parse_expr()?;
                let empty = crate::tpl::SubstMap::default();
                match self.eval_const(len, &empty) {
                    Ok(v) if v >= 0 => ty.array_len = Some(v as u64),
                    _ => ty.array_len_expr = Some(len),
                }
            }
            self.expect("]")?;
        }
        let init = if self.eat("=") {
            Some(self.parse_expr_no_comma()?)
        } else if self.at("(") {
            // direct initialization keeps only the first argument's value
            let args = self.parse_call_args()?;
            args.first().copied()
        } else if self.at("{") {
            self.toks.advance();
            let e = if self.at("}") { None } else { Some(self.parse_expr_no_comma()?) };
            self.expect("}")?;
            e
        } else {
            None
        };
        self.expect(";")?;
        if let Some(i) = init {
            self.typecheck_statement_expr(i);
        }
        let node = self.sess.nodes.alloc(Node::Var(VarDecl {
            name,
            ty,
            init,
            storage,
            namespace: vec![],
        }));
        self.sess.symbols.insert(name, node);
        Ok(node)
    }

    /// Expression including comma chaining (statement position)
    pub(crate) fn parse_comma_expr(&mut self) -> SemaResult<NodeId> {
        self.parse_expr_statement_full()
    }

    fn parse_expr_statement_full(&mut self) -> SemaResult<NodeId> {
        let mut e = self.parse_expr()?;
        while self.eat(",") {
            let rhs = self.parse_expr()?;
            e = self.sess.nodes.alloc_expr(embercc_sema::Expr::Binary {
                op: embercc_sema::BinOp::Comma,
                lhs: e,
                rhs,
            });
        }
        Ok(e)
    }
}
