use cu::pre::*;
use embercc_sema::{
    BaseType, BinOp, CastKind, Expr, NodeId, Param, QualSeg, Requirement, RequiresExpr, SemaError,
    SemaResult, TypeTrait, UnOp,
};

use crate::TokenKind;
use crate::parse::Parser;

/// Binary operator precedence (higher binds tighter)
fn binop_prec(op: BinOp) -> u8 {
    match op {
        BinOp::Assign | BinOp::AddAssign | BinOp::SubAssign => 1,
        BinOp::Or => 3,
        BinOp::And => 4,
        BinOp::BitOr => 5,
        BinOp::BitXor => 6,
        BinOp::BitAnd => 7,
        BinOp::Eq | BinOp::Ne => 8,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 9,
        BinOp::Shl | BinOp::Shr => 10,
        BinOp::Add | BinOp::Sub => 11,
        BinOp::Mul | BinOp::Div | BinOp::Rem => 12,
        BinOp::Comma => 0,
    }
}

/// Expression parsing by precedence climbing
impl<'s> Parser<'s> {
    pub fn parse_expr(&mut self) -> SemaResult<NodeId> {
        self.parse_expr_no_comma()
    }

    pub fn parse_expr_no_comma(&mut self) -> SemaResult<NodeId> {
        let lhs = self.parse_binary(0)?;
        self.parse_ternary_tail(lhs)
    }

    fn parse_ternary_tail(&mut self, cond: NodeId) -> SemaResult<NodeId> {
        if !self.eat("?") {
            return Ok(cond);
        }
        let then_e = self.parse_expr_no_comma()?;
        self.expect(":")?;
        let else_e = self.parse_expr_no_comma()?;
        Ok(self.sess.nodes.alloc_expr(Expr::Ternary {
            cond,
            then_e,
            else_e,
        }))
    }

    fn parse_binary(&mut self, min_prec: u8) -> SemaResult<NodeId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((op, tokens)) = self.peek_binop() else {
                break;
            };
            let prec = binop_prec(op);
            if prec < min_prec.max(1) {
                break;
            }
            for _ in 0..tokens {
                self.toks.advance();
            }
            let right_assoc = matches!(op, BinOp::Assign | BinOp::AddAssign | BinOp::SubAssign);
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_binary(next_min)?;
            lhs = self.sess.nodes.alloc_expr(Expr::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    /// Identify the binary operator at the cursor. Adjacent `>` `>`
    /// tokens merge into a shift unless a template argument list is being
    /// parsed.
    fn peek_binop(&self) -> Option<(BinOp, usize)> {
        let t = self.peek();
        if t.kind != TokenKind::Op {
            return None;
        }
        let text = t.text.as_ref();
        if text == ">" {
            if self.no_gt_depth > 0 {
                return None;
            }
            let next = self.toks.peek_ahead(1);
            if next.is(">") && next.line == t.line && next.col == t.col + 1 {
                return Some((BinOp::Shr, 2));
            }
            return Some((BinOp::Gt, 1));
        }
        if text == "?" {
            return None;
        }
        BinOp::from_str(text).map(|op| (op, 1))
    }

    fn parse_unary(&mut self) -> SemaResult<NodeId> {
        let t = self.peek().clone();
        let op = match t.text.as_ref() {
            "!" => Some(UnOp::Not),
            "~" => Some(UnOp::BitNot),
            "-" => Some(UnOp::Neg),
            "+" => Some(UnOp::Plus),
            "*" => Some(UnOp::Deref),
            "&" => Some(UnOp::AddrOf),
            "++" => Some(UnOp::PreInc),
            "--" => Some(UnOp::PreDec),
            _ => None,
        };
        if let Some(op) = op
            && t.kind == TokenKind::Op
        {
            self.toks.advance();
            let operand = self.parse_unary()?;
            return Ok(self.sess.nodes.alloc_expr(Expr::Unary { op, operand }));
        }
        let mut e = self.parse_primary()?;
        // postfix
        loop {
            if self.at("(") {
                let args = self.parse_call_args()?;
                e = self.sess.nodes.alloc_expr(Expr::Call { callee: e, args });
            } else if self.at("[") {
                self.toks.advance();
                let index = self.parse_expr()?;
                self.expect("]")?;
                e = self.sess.nodes.alloc_expr(Expr::Index { base: e, index });
            } else if self.at(".") || self.at("->") {
                let arrow = self.at("->");
                self.toks.advance();
                let m = self.expect_ident()?;
                let name = self.intern(m.text.as_ref());
                e = self.sess.nodes.alloc_expr(Expr::Member {
                    base: e,
                    name,
                    arrow,
                });
            } else if self.at("++") {
                self.toks.advance();
                e = self.sess.nodes.alloc_expr(Expr::Unary {
                    op: UnOp::PostInc,
                    operand: e,
                });
            } else if self.at("--") {
                self.toks.advance();
                e = self.sess.nodes.alloc_expr(Expr::Unary {
                    op: UnOp::PostDec,
                    operand: e,
                });
            } else if self.at("...") && !self.at_fold_context() {
                self.toks.advance();
                e = self.sess.nodes.alloc_expr(Expr::PackExpansion(e));
            } else {
                break;
            }
        }
        Ok(e)
    }

    /// `...` directly before `)` or `,` is an argument pack expansion;
    /// before an operator it belongs to a fold
    fn at_fold_context(&self) -> bool {
        let next = self.toks.peek_ahead(1);
        next.kind == TokenKind::Op
    }

    pub(crate) fn parse_call_args(&mut self) -> SemaResult<Vec<NodeId>> {
        self.expect("(")?;
        let mut args = vec![];
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr_no_comma()?);
            if self.eat(",") {
                continue;
            }
            self.expect(")")?;
            break;
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> SemaResult<NodeId> {
        let t = self.peek().clone();
        match t.kind {
            TokenKind::Literal => {
                self.toks.advance();
                let e = parse_literal(t.text.as_ref())
                    .ok_or_else(|| self.err_at(&t, format!("malformed literal '{}'", t.text)))?;
                Ok(self.sess.nodes.alloc_expr(e))
            }
            TokenKind::Keyword => self.parse_keyword_primary(&t),
            TokenKind::Punct if t.is("(") => self.parse_paren_or_fold(),
            TokenKind::Ident => self.parse_ident_primary(&t),
            _ => Err(self.err_at(&t, format!("unexpected token '{}'", t.text))),
        }
    }

    fn parse_keyword_primary(&mut self, t: &crate::Token) -> SemaResult<NodeId> {
        match t.text.as_ref() {
            "true" => {
                self.toks.advance();
                Ok(self.sess.nodes.alloc_expr(Expr::BoolLit(true)))
            }
            "false" => {
                self.toks.advance();
                Ok(self.sess.nodes.alloc_expr(Expr::BoolLit(false)))
            }
            "nullptr" => {
                self.toks.advance();
                Ok(self.sess.nodes.alloc_expr(Expr::NullptrLit))
            }
            "this" => {
                self.toks.advance();
                let name = self.intern("this");
                Ok(self.sess.nodes.alloc_expr(Expr::Ident(name)))
            }
            "sizeof" => self.parse_sizeof(),
            "decltype" => {
                self.toks.advance();
                self.expect("(")?;
                let e = self.parse_comma_expr()?;
                self.expect(")")?;
                Ok(self.sess.nodes.alloc_expr(Expr::Decltype(e)))
            }
            "requires" => self.parse_requires_expr(),
            "static_cast" | "reinterpret_cast" | "const_cast" | "dynamic_cast" => {
                let kind = match t.text.as_ref() {
                    "static_cast" => CastKind::Static,
                    "reinterpret_cast" => CastKind::Reinterpret,
                    "const_cast" => CastKind::Const,
                    _ => CastKind::Dynamic,
                };
                self.toks.advance();
                self.expect("<")?;
                self.no_gt_depth += 1;
                let ty = self.parse_type_specifier();
                self.no_gt_depth -= 1;
                let ty = ty?;
                self.expect(">")?;
                self.expect("(")?;
                let operand = self.parse_expr()?;
                self.expect(")")?;
                Ok(self.sess.nodes.alloc_expr(Expr::Cast { kind, ty, operand }))
            }
            "void" | "bool" | "char" | "short" | "int" | "long" | "float" | "double"
            | "unsigned" | "signed" => {
                // functional cast on a fundamental type: `int(x)`, `void()`
                let ty = self.parse_type_specifier()?;
                let args = if self.at("(") {
                    self.parse_call_args()?
                } else {
                    vec![]
                };
                Ok(self.sess.nodes.alloc_expr(Expr::CtorCall { ty, args }))
            }
            other => Err(self.err_at(t, format!("unexpected keyword '{other}' in expression"))),
        }
    }

    fn parse_sizeof(&mut self) -> SemaResult<NodeId> {
        self.expect_kw("sizeof")?;
        if self.eat("...") {
            self.expect("(")?;
            let name_tok = self.expect_ident()?;
            self.expect(")")?;
            let name = self.intern(name_tok.text.as_ref());
            return Ok(self.sess.nodes.alloc_expr(Expr::SizeofPack(name)));
        }
        self.expect("(")?;
        // type first, falling back to an expression operand
        let as_type = self.speculate(|p| {
            let t = p.parse_type_specifier()?;
            if p.at(")") {
                Ok(t)
            } else {
                Err(p.err_here("not a type operand"))
            }
        });
        let e = match as_type {
            Ok(t) => Expr::SizeofType(t),
            Err(_) => Expr::SizeofExpr(self.parse_expr()?),
        };
        self.expect(")")?;
        Ok(self.sess.nodes.alloc_expr(e))
    }

    fn parse_requires_expr(&mut self) -> SemaResult<NodeId> {
        self.expect_kw("requires")?;
        let mut params = vec![];
        if self.at("(") {
            self.toks.advance();
            while !self.at(")") {
                let ty = self.parse_type_specifier()?;
                let name = if self.at_ident() {
                    let n = self.bump();
                    self.intern(n.text.as_ref())
                } else {
                    embercc_arena::StrId::INVALID
                };
                params.push(Param {
                    name,
                    ty,
                    default: None,
                    is_pack: false,
                });
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(")")?;
        }
        self.expect("{")?;
        let mut requirements = vec![];
        while !self.at("}") && !self.toks.at_eof() {
            if self.eat_kw("typename") {
                let ty = self.parse_type_specifier()?;
                self.expect(";")?;
                requirements.push(Requirement::Type(ty));
                continue;
            }
            if self.at("{") {
                self.toks.advance();
                let e = self.parse_expr()?;
                self.expect("}")?;
                let constraint = if self.eat("->") {
                    let c = self.expect_ident()?;
                    let cname = self.intern(c.text.as_ref());
                    let args = if self.at("<") {
                        self.no_gt_depth += 1;
                        let a = self.parse_template_args();
                        self.no_gt_depth -= 1;
                        a?
                    } else {
                        vec![]
                    };
                    Some((cname, args))
                } else {
                    None
                };
                self.expect(";")?;
                requirements.push(Requirement::Compound { expr: e, constraint });
                continue;
            }
            let e = self.parse_expr()?;
            self.expect(";")?;
            requirements.push(Requirement::Expr(e));
        }
        self.expect("}")?;
        Ok(self
            .sess
            .nodes
            .alloc_expr(Expr::Requires(RequiresExpr {
                params,
                requirements,
            })))
    }

    /// A parenthesized expression, or a fold over a parameter pack
    fn parse_paren_or_fold(&mut self) -> SemaResult<NodeId> {
        self.expect("(")?;
        // `(... op pack)` left unary fold
        if self.at("...") {
            self.toks.advance();
            let op_tok = self.bump();
            let op = BinOp::from_str(op_tok.text.as_ref())
                .ok_or_else(|| self.err_at(&op_tok, "expected a fold operator"))?;
            let pack_tok = self.expect_ident()?;
            let pack = self.intern(pack_tok.text.as_ref());
            self.expect(")")?;
            return Ok(self.sess.nodes.alloc_expr(Expr::Fold {
                op,
                pack,
                init: None,
                right_fold: false,
            }));
        }
        // ordinary parenthesized expression
        let as_expr = self.speculate(|p| {
            let e = p.parse_expr()?;
            if p.at(")") {
                Ok(e)
            } else {
                Err(p.err_here("not a plain parenthesized expression"))
            }
        });
        if let Ok(e) = as_expr {
            self.expect(")")?;
            return Ok(e);
        }
        // fold with the `...` inside: `(pack op ...)`, `(pack op ... op init)`
        // or `(init op ... op pack)`
        let first = self.parse_unary()?;
        let op_tok = self.bump();
        let op = BinOp::from_str(op_tok.text.as_ref())
            .ok_or_else(|| self.err_at(&op_tok, "expected a fold operator"))?;
        self.expect("...")?;
        if self.eat(")") {
            let pack = self.expr_as_pack_name(first)?;
            return Ok(self.sess.nodes.alloc_expr(Expr::Fold {
                op,
                pack,
                init: None,
                right_fold: true,
            }));
        }
        let op2_tok = self.bump();
        let op2 = BinOp::from_str(op2_tok.text.as_ref());
        if op2 != Some(op) {
            return Err(self.err_at(&op2_tok, "fold operators must match"));
        }
        let second = self.parse_expr_no_comma()?;
        self.expect(")")?;
        // which side names the pack decides the direction
        if let Ok(pack) = self.expr_as_pack_name(first) {
            Ok(self.sess.nodes.alloc_expr(Expr::Fold {
                op,
                pack,
                init: Some(second),
                right_fold: true,
            }))
        } else {
            let pack = self.expr_as_pack_name(second)?;
            Ok(self.sess.nodes.alloc_expr(Expr::Fold {
                op,
                pack,
                init: Some(first),
                right_fold: false,
            }))
        }
    }

    fn expr_as_pack_name(&self, e: NodeId) -> SemaResult<embercc_arena::StrId> {
        match self.sess.nodes.expr(e) {
            Some(Expr::Ident(n)) | Some(Expr::TemplateParamRef(n)) => Ok(*n),
            _ => Err(SemaError::subst("fold operand is not a parameter pack")),
        }
    }

    fn parse_ident_primary(&mut self, t: &crate::Token) -> SemaResult<NodeId> {
        // builtin type traits
        if let Some(trait_) = TypeTrait::from_str(t.text.as_ref()) {
            self.toks.advance();
            self.expect("(")?;
            let mut args = vec![];
            loop {
                args.push(self.parse_type_specifier()?);
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(")")?;
            return Ok(self
                .sess
                .nodes
                .alloc_expr(Expr::TypeTraitCall { which: trait_, args }));
        }

        self.toks.advance();
        let name = self.intern(t.text.as_ref());

        // qualified path in expression position
        if self.at("::") {
            let mut segs = vec![QualSeg { name, args: None }];
            while self.eat("::") {
                let seg_tok = self.expect_ident()?;
                let seg_name = self.intern(seg_tok.text.as_ref());
                let args = if self.at("<") && self.known_template_or_concept(seg_name) {
                    Some(self.parse_template_args_guarded()?)
                } else {
                    None
                };
                segs.push(QualSeg {
                    name: seg_name,
                    args,
                });
            }
            return Ok(self.sess.nodes.alloc_expr(Expr::Qualified { segs }));
        }

        // `name<args>`: a template-id when the name is a template or
        // concept and the argument list parses; plain comparison otherwise
        if self.at("<") && self.known_template_or_concept(name) {
            let args = self.speculate(|p| p.parse_template_args_guarded());
            if let Ok(args) = args {
                if self.at("::") {
                    // Class<Args>::member in expression position
                    let mut segs = vec![QualSeg {
                        name,
                        args: Some(args),
                    }];
                    while self.eat("::") {
                        let seg_tok = self.expect_ident()?;
                        let seg_name = self.intern(seg_tok.text.as_ref());
                        segs.push(QualSeg {
                            name: seg_name,
                            args: None,
                        });
                    }
                    return Ok(self.sess.nodes.alloc_expr(Expr::Qualified { segs }));
                }
                return Ok(self.sess.nodes.alloc_expr(Expr::TemplateId { name, args }));
            }
        }

        // `T(args)` functional cast on a known type name
        if self.at("(")
            && (self.sess.types.lookup(name).is_some()
                || matches!(
                    self.sess.subst_lookup(name),
                    Some(embercc_sema::TplArg::Type(_))
                ))
        {
            let ty = match self.sess.types.lookup(name) {
                Some(tid) => {
                    let base = self.sess.types.get(tid).map(|i| i.base).unwrap_or(BaseType::Struct);
                    embercc_sema::TypeSpecifier::named(base, name, tid)
                }
                None => match self.sess.subst_lookup(name).cloned() {
                    Some(embercc_sema::TplArg::Type(t)) => t,
                    _ => embercc_sema::TypeSpecifier::named(
                        BaseType::UserDefined,
                        name,
                        embercc_sema::TypeId::INVALID,
                    ),
                },
            };
            let args = self.parse_call_args()?;
            return Ok(self.sess.nodes.alloc_expr(Expr::CtorCall { ty, args }));
        }

        Ok(self.sess.nodes.alloc_expr(Expr::Ident(name)))
    }

    pub(crate) fn parse_template_args_guarded(&mut self) -> SemaResult<Vec<embercc_sema::TplArg>> {
        self.no_gt_depth += 1;
        let r = self.parse_template_args();
        self.no_gt_depth -= 1;
        r
    }

    fn known_template_or_concept(&mut self, name: embercc_arena::StrId) -> bool {
        self.sess.concepts.contains(name) || self.lookup_template_name(name).is_some()
    }
}

/// Parse a literal token's text into an expression
fn parse_literal(text: &str) -> Option<Expr> {
    if let Some(inner) = text.strip_prefix('\'') {
        let inner = inner.strip_suffix('\'')?;
        let c = unescape_char(inner)?;
        return Some(Expr::CharLit(c));
    }
    if text.starts_with('"') {
        let inner = text.get(1..text.len().checked_sub(1)?)?;
        return Some(Expr::StrLit(inner.into()));
    }
    // numeric
    let lower = text.to_ascii_lowercase();
    let is_float = !lower.starts_with("0x")
        && (lower.contains('.') || (lower.contains('e') && !lower.starts_with("0b")));
    if is_float {
        let trimmed = lower.trim_end_matches(['f', 'l']);
        let value: f64 = trimmed.parse().ok()?;
        let ty = if lower.ends_with('f') {
            BaseType::Float
        } else {
            BaseType::Double
        };
        return Some(Expr::FloatLit { value, ty });
    }
    let mut digits = lower.as_str();
    let mut unsigned = false;
    let mut longs = 0;
    while let Some(stripped) = digits
        .strip_suffix('u')
        .map(|s| (s, true))
        .or_else(|| digits.strip_suffix('l').map(|s| (s, false)))
    {
        if stripped.1 {
            unsigned = true;
        } else {
            longs += 1;
        }
        digits = stripped.0;
    }
    let digits = digits.replace('\'', "");
    let value = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        digits.parse().ok()?
    };
    let ty = match (unsigned, longs) {
        (false, 0) => BaseType::Int,
        (true, 0) => BaseType::UnsignedInt,
        (false, 1) => BaseType::Long,
        (true, 1) => BaseType::UnsignedLong,
        (false, _) => BaseType::LongLong,
        (true, _) => BaseType::UnsignedLongLong,
    };
    Some(Expr::IntLit { value, ty })
}

fn unescape_char(inner: &str) -> Option<char> {
    let mut chars = inner.chars();
    let first = chars.next()?;
    if first != '\\' {
        return Some(first);
    }
    Some(match chars.next()? {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_ints() {
        assert!(matches!(
            parse_literal("42"),
            Some(Expr::IntLit {
                value: 42,
                ty: BaseType::Int
            })
        ));
        assert!(matches!(
            parse_literal("0x1f"),
            Some(Expr::IntLit { value: 31, .. })
        ));
        assert!(matches!(
            parse_literal("7ull"),
            Some(Expr::IntLit {
                value: 7,
                ty: BaseType::UnsignedLongLong
            })
        ));
    }

    #[test]
    fn test_parse_literal_floats_and_chars() {
        assert!(matches!(
            parse_literal("3.14"),
            Some(Expr::FloatLit { ty: BaseType::Double, .. })
        ));
        assert!(matches!(
            parse_literal("2.0f"),
            Some(Expr::FloatLit { ty: BaseType::Float, .. })
        ));
        assert!(matches!(parse_literal("'a'"), Some(Expr::CharLit('a'))));
        assert!(matches!(parse_literal("'\\n'"), Some(Expr::CharLit('\n'))));
    }
}
