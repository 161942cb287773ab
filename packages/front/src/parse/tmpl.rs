use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    ConceptDecl, FuncQuals, Node, NodeId, SemaResult, TemplateAliasDecl, TemplateClassDecl,
    TemplateFuncDecl, TemplateParam, TemplateParamKind, TplArg, TypeSpecifier,
};

use crate::parse::Parser;
use crate::tpl::{OutOfLineDef, SubstMap, TemplateKind, args_key};

/// Template declarations: class/function/alias templates, concepts,
/// specializations and out-of-line member definitions.
///
/// Headers (parameter lists, requires clauses, signatures) are parsed
/// eagerly; bodies are deferred behind saved cursors and re-parsed per
/// instantiation.
impl<'s> Parser<'s> {
    pub(crate) fn parse_template_decl(&mut self) -> SemaResult<()> {
        self.parse_template_decl_impl(None)
    }

    pub(crate) fn parse_template_decl_in_class(&mut self, class: StrId) -> SemaResult<()> {
        self.parse_template_decl_impl(Some(class))
    }

    fn parse_template_decl_impl(&mut self, member_of: Option<StrId>) -> SemaResult<()> {
        self.expect_kw("template")?;
        let (tparams, scope) = self.parse_template_params()?;

        self.defer_bodies += 1;
        let result = self.with_subst(scope, |p| {
            let requires_clause = if p.eat_kw("requires") {
                Some(p.parse_expr_no_comma()?)
            } else {
                None
            };
            p.parse_templated_entity(member_of, tparams, requires_clause)
        });
        self.defer_bodies -= 1;
        result
    }

    /// Parse `<...>` template parameters. Earlier parameters are visible
    /// to later ones (non-type parameters typed by a type parameter), so
    /// the working scope builds up as parameters are parsed.
    fn parse_template_params(&mut self) -> SemaResult<(Vec<TemplateParam>, SubstMap)> {
        self.expect("<")?;
        self.sess.subst_stack.push(SubstMap::default());
        let result = self.parse_template_params_inner();
        let scope = self.sess.subst_stack.pop().unwrap_or_default();
        let tparams = result?;
        Ok((tparams, scope))
    }

    fn parse_template_params_inner(&mut self) -> SemaResult<Vec<TemplateParam>> {
        let mut tparams = vec![];
        if self.eat(">") {
            return Ok(tparams);
        }
        loop {
            let param = self.parse_one_template_param()?;
            let binding = if param.is_pack {
                TplArg::Pack(vec![TplArg::Type(TypeSpecifier::template_param(param.name))])
            } else {
                TplArg::Type(TypeSpecifier::template_param(param.name))
            };
            if let Some(top) = self.sess.subst_stack.last_mut() {
                top.insert(param.name, binding);
            }
            tparams.push(param);
            if self.eat(",") {
                continue;
            }
            self.expect(">")?;
            break;
        }
        Ok(tparams)
    }

    fn parse_one_template_param(&mut self) -> SemaResult<TemplateParam> {
        // template-template parameter
        if self.at_kw("template") {
            self.toks.advance();
            self.expect("<")?;
            let mut depth = 1usize;
            while depth > 0 && !self.toks.at_eof() {
                if self.at("<") {
                    depth += 1;
                } else if self.at(">") {
                    depth -= 1;
                }
                self.toks.advance();
            }
            if !self.eat_kw("class") {
                self.eat_kw("typename");
            }
            let is_pack = self.eat("...");
            let name = self.param_name_or_anon()?;
            return Ok(TemplateParam {
                name,
                kind: TemplateParamKind::Template,
                is_pack,
                concept_constraint: None,
            });
        }
        // type parameter
        if self.at_kw("typename") || self.at_kw("class") {
            self.toks.advance();
            let is_pack = self.eat("...");
            let name = self.param_name_or_anon()?;
            let default = if self.eat("=") {
                Some(self.parse_type_specifier()?)
            } else {
                None
            };
            return Ok(TemplateParam {
                name,
                kind: TemplateParamKind::Type { default },
                is_pack,
                concept_constraint: None,
            });
        }
        // constrained type parameter: `Concept T` / `Concept<Args> T`
        if self.at_ident() {
            let first = self.intern(self.peek().text.to_string().as_str());
            if self.sess.concepts.contains(first) {
                self.toks.advance();
                let extra = if self.at("<") {
                    self.parse_template_args_guarded()?
                } else {
                    vec![]
                };
                let is_pack = self.eat("...");
                let name = self.param_name_or_anon()?;
                let default = if self.eat("=") {
                    Some(self.parse_type_specifier()?)
                } else {
                    None
                };
                return Ok(TemplateParam {
                    name,
                    kind: TemplateParamKind::Type { default },
                    is_pack,
                    concept_constraint: Some((first, extra)),
                });
            }
        }
        // non-type parameter
        let ty = self.parse_type_specifier()?;
        let is_pack = self.eat("...");
        let name = self.param_name_or_anon()?;
        let default = if self.eat("=") {
            Some(self.parse_expr_no_comma()?)
        } else {
            None
        };
        Ok(TemplateParam {
            name,
            kind: TemplateParamKind::NonType { ty, default },
            is_pack,
            concept_constraint: None,
        })
    }

    fn param_name_or_anon(&mut self) -> SemaResult<StrId> {
        if self.at_ident() {
            let t = self.bump();
            Ok(self.intern(t.text.as_ref()))
        } else {
            let unique = format!("__anon_type_{}", self.sess.nodes.len());
            Ok(self.sess.strings.create_unique(&unique))
        }
    }

    fn parse_templated_entity(
        &mut self,
        member_of: Option<StrId>,
        tparams: Vec<TemplateParam>,
        requires_clause: Option<NodeId>,
    ) -> SemaResult<()> {
        if self.at_kw("concept") {
            return self.parse_concept_decl(tparams);
        }
        if self.at_kw("struct") || self.at_kw("class") || self.at_kw("union") {
            // `template<...> class X` may still be a template-template
            // parameter context; here it is a declaration
            return self.parse_class_template(member_of, tparams, requires_clause);
        }
        if self.at_kw("using") {
            return self.parse_alias_template(member_of, tparams);
        }
        if let Some((class_name, is_static)) = self.peek_out_of_line() {
            return self.parse_out_of_line_decl(class_name, tparams, is_static);
        }
        self.parse_function_template(member_of, tparams, requires_clause)
    }

    fn parse_concept_decl(&mut self, tparams: Vec<TemplateParam>) -> SemaResult<()> {
        self.expect_kw("concept")?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        self.expect("=")?;
        let expr = self.parse_expr_no_comma()?;
        self.expect(";")?;
        let node = self.sess.nodes.alloc(Node::Concept(ConceptDecl {
            name,
            tparams,
            expr,
        }));
        self.sess.concepts.register(name, node);
        self.sess.symbols.insert(name, node);
        Ok(())
    }

    fn parse_class_template(
        &mut self,
        member_of: Option<StrId>,
        tparams: Vec<TemplateParam>,
        requires_clause: Option<NodeId>,
    ) -> SemaResult<()> {
        let kw = self.bump();
        let is_union = kw.is_kw("union");
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        let decl_start = self.toks.save_cursor();

        // specialization pattern
        let pattern = if self.at("<") {
            Some(self.parse_template_args_guarded()?)
        } else {
            None
        };

        let reg_name = self.template_reg_name(member_of, name);
        let ns = self.sess.symbols.current_namespace_path();

        if self.at(";") {
            self.toks.advance();
            let node = self.sess.nodes.alloc(Node::TemplateClass(TemplateClassDecl {
                name,
                tparams,
                requires_clause,
                decl_start,
                body_start: None,
                is_union,
                pattern,
                namespace: ns,
            }));
            self.sess.templates.declare_primary(reg_name, node, TemplateKind::Class);
            self.sess.symbols.insert(name, node);
            return Ok(());
        }

        // the body cursor sits before the base-clause so instantiation
        // re-parses bases and members in one pass
        let body_start = self.toks.save_cursor();
        while !self.at("{") && !self.toks.at_eof() {
            self.toks.advance();
        }
        self.skip_balanced("{", "}")?;
        self.eat(";");

        let node = self.sess.nodes.alloc(Node::TemplateClass(TemplateClassDecl {
            name,
            tparams: tparams.clone(),
            requires_clause,
            decl_start,
            body_start: Some(body_start),
            is_union,
            pattern: pattern.clone(),
            namespace: ns,
        }));
        match pattern {
            None => {
                self.sess.templates.declare_primary(reg_name, node, TemplateKind::Class);
            }
            Some(args) => {
                if tparams.is_empty() {
                    let key = args_key(&args, &self.sess.strings);
                    self.sess.templates.declare_full(reg_name, key, node);
                } else {
                    self.sess.templates.declare_partial(reg_name, node);
                }
            }
        }
        self.sess.symbols.insert(name, node);
        Ok(())
    }

    fn parse_alias_template(
        &mut self,
        member_of: Option<StrId>,
        tparams: Vec<TemplateParam>,
    ) -> SemaResult<()> {
        self.expect_kw("using")?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        self.expect("=")?;
        let target = self.parse_type_specifier()?;
        self.expect(";")?;
        let ns = self.sess.symbols.current_namespace_path();
        let node = self.sess.nodes.alloc(Node::TemplateAlias(TemplateAliasDecl {
            name,
            tparams,
            target,
            namespace: ns,
        }));
        let reg_name = self.template_reg_name(member_of, name);
        self.sess.templates.declare_primary(reg_name, node, TemplateKind::Alias);
        self.sess.symbols.insert(name, node);
        Ok(())
    }

    /// Look ahead for `Type Class<...>::member`, the shape of an
    /// out-of-line member definition. Returns the class name and whether
    /// the member is a static data member.
    fn peek_out_of_line(&mut self) -> Option<(StrId, bool)> {
        // scan: skip one type-ish token run, find `ident < ... > ::`
        let mut i = 0usize;
        // skip leading type tokens conservatively
        while i < 64 {
            let t = self.toks.peek_ahead(i);
            if t.kind == crate::TokenKind::Eof {
                return None;
            }
            if t.is_ident() && self.toks.peek_ahead(i + 1).is("<") {
                // find the matching '>' then check for '::'
                let mut depth = 1usize;
                let mut j = i + 2;
                while depth > 0 && j < i + 128 {
                    let u = self.toks.peek_ahead(j);
                    if u.kind == crate::TokenKind::Eof {
                        return None;
                    }
                    if u.is("<") {
                        depth += 1;
                    } else if u.is(">") {
                        depth -= 1;
                    }
                    j += 1;
                }
                if depth == 0 && self.toks.peek_ahead(j).is("::") {
                    let class = self.intern(self.toks.peek_ahead(i).text.to_string().as_str());
                    // a '(' after the member name means a function
                    let is_static = !self.toks.peek_ahead(j + 2).is("(");
                    // only treat it as out-of-line when the class is a
                    // known class template
                    if self.sess.templates.kind_of(class) == Some(TemplateKind::Class)
                        || self
                            .lookup_template_name(class)
                            .is_some_and(|r| self.sess.templates.kind_of(r) == Some(TemplateKind::Class))
                    {
                        return Some((class, is_static));
                    }
                    return None;
                }
                return None;
            }
            if t.is("(") || t.is("{") || t.is(";") || t.is("=") {
                return None;
            }
            i += 1;
        }
        None
    }

    fn parse_out_of_line_decl(
        &mut self,
        class_name: StrId,
        tparams: Vec<TemplateParam>,
        is_static: bool,
    ) -> SemaResult<()> {
        // the whole definition re-parses at instantiation time from this
        // cursor; here it is only skipped
        let body_start = self.toks.save_cursor();
        if is_static {
            while !self.at(";") && !self.toks.at_eof() {
                self.toks.advance();
            }
            self.expect(";")?;
        } else {
            while !self.at("{") && !self.at(";") && !self.toks.at_eof() {
                self.toks.advance();
            }
            if self.at("{") {
                self.skip_balanced("{", "}")?;
            } else {
                self.expect(";")?;
            }
        }
        // recover the member name from the saved region for bookkeeping
        let member_name = self.sess.strings.intern("__out_of_line");
        let reg_name = self
            .lookup_template_name(class_name)
            .unwrap_or(class_name);
        self.sess.templates.add_out_of_line(
            reg_name,
            OutOfLineDef {
                member_name,
                tparams,
                body_start,
                is_static_member: is_static,
                quals: FuncQuals::default(),
            },
        );
        Ok(())
    }

    fn parse_function_template(
        &mut self,
        member_of: Option<StrId>,
        tparams: Vec<TemplateParam>,
        mut requires_clause: Option<NodeId>,
    ) -> SemaResult<()> {
        let decl_start = self.toks.save_cursor();
        let ret = self.parse_type_specifier()?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        let (params, _variadic, concept_autos) = self.parse_param_list()?;

        let mut quals = FuncQuals::default();
        if self.eat_kw("noexcept") {
            if self.at("(") {
                self.toks.advance();
                let e = self.parse_expr()?;
                self.expect(")")?;
                quals.noexcept = Some(Some(e));
            } else {
                quals.noexcept = Some(None);
            }
        }
        // trailing requires-clause
        if self.eat_kw("requires") {
            requires_clause = Some(self.parse_expr_no_comma()?);
        }

        let mut trailing_return_start = None;
        if self.eat("->") {
            trailing_return_start = Some(self.toks.save_cursor());
            // move past the trailing type; parse failures here are not
            // errors at declaration time, the tokens are skipped instead
            let save = self.toks.pos();
            if self.speculate(|p| p.parse_type_specifier()).is_err() {
                self.toks.set_pos(save);
                while !self.at("{") && !self.at(";") && !self.toks.at_eof() {
                    self.toks.advance();
                }
            }
        }

        let body_start = if self.at("{") {
            let c = self.toks.save_cursor();
            self.skip_balanced("{", "}")?;
            Some(c)
        } else {
            self.expect(";")?;
            None
        };

        let ns = self.sess.symbols.current_namespace_path();
        let node = self.sess.nodes.alloc(Node::TemplateFunc(TemplateFuncDecl {
            name,
            tparams,
            requires_clause,
            decl_start,
            body_start,
            trailing_return_start,
            params,
            ret,
            has_trailing_return: trailing_return_start.is_some(),
            quals,
            namespace: ns,
            class_name: member_of,
            param_concepts: concept_autos,
        }));
        let reg_name = self.template_reg_name(member_of, name);
        self.sess.templates.declare_primary(reg_name, node, TemplateKind::Function);
        if self.sess.symbols.lookup(name).is_none() {
            self.sess.symbols.insert(name, node);
        }
        Ok(())
    }

    /// The registry key for a template: class-qualified for member
    /// templates, namespace-qualified inside namespaces, plain otherwise
    pub(crate) fn template_reg_name(&mut self, member_of: Option<StrId>, name: StrId) -> StrId {
        if let Some(class) = member_of {
            let qualified = format!("{}::{}", self.sess.view(class), self.sess.view(name));
            return self.sess.strings.intern(&qualified);
        }
        let ns = self.sess.symbols.current_namespace_path();
        if ns.is_empty() {
            return name;
        }
        let mut path = ns;
        path.push(name);
        let qualified = self.qualified_name_string(&path);
        self.sess.strings.intern(&qualified)
    }

    pub(crate) fn register_template_primary(
        &mut self,
        name: StrId,
        _ns: &[StrId],
        node: NodeId,
        kind: TemplateKind,
    ) {
        let reg = self.template_reg_name(None, name);
        self.sess.templates.declare_primary(reg, node, kind);
    }
}
