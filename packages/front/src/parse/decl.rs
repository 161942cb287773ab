use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    AccessSpec, AliasDecl, BaseClass, BaseSpecAst, BaseType, CtorDecl, DtorDecl, EnumDecl,
    EnumInfo, Enumerator, FieldDecl, FuncDecl, FuncQuals, Linkage, Member, Node, NodeId,
    Param, RefQual, ScopeKind, SemaError, SemaResult, StaticMember, StorageOpts, StructDecl,
    StructTypeInfo, TplArg, TypeId, TypeSpecifier, VarDecl, VtableSlot, layout,
};

use crate::parse::Parser;
use crate::session::LazyMemberFunction;
use crate::tpl::SubstMap;

/// Context for parsing a struct body, shared between source-level
/// declarations and template instantiation re-parses
#[derive(Debug, Clone, Copy)]
pub(crate) struct StructCtx {
    /// Pre-allocated registry slot
    pub type_id: TypeId,
    /// Name the type is registered under (instantiated internal name for
    /// template instantiations)
    pub reg_name: StrId,
    /// Source-level name, for constructor/destructor recognition
    pub written_name: StrId,
    pub is_union: bool,
    pub is_class: bool,
    /// Member function bodies are registered for lazy realization
    pub lazy: bool,
}

/// Declarations: structs, functions, variables, enums, aliases
impl<'s> Parser<'s> {
    /// Parse a struct/class/union declaration starting at its keyword
    pub(crate) fn parse_struct_decl(&mut self, ctx: Option<StructCtx>) -> SemaResult<NodeId> {
        let ctx = match ctx {
            Some(c) => c,
            None => {
                let kw = self.bump();
                let is_union = kw.is_kw("union");
                let is_class = kw.is_kw("class");
                let name = if self.at_ident() {
                    let t = self.bump();
                    self.intern(t.text.as_ref())
                } else {
                    let unique = format!("__anon_type_{}", self.sess.types.len());
                    self.sess.strings.create_unique(&unique)
                };
                // reuse a forward declaration's slot when one exists
                let type_id = match self.sess.types.lookup(name) {
                    Some(id) if self.sess.types.get(id).is_some_and(|i| i.incomplete) => id,
                    _ => self.sess.types.add_named(
                        name,
                        if is_union { BaseType::Union } else { BaseType::Struct },
                    ),
                };
                // qualified binding for namespace-scoped lookup
                let ns = self.sess.symbols.current_namespace_path();
                if !ns.is_empty() {
                    let mut path = ns;
                    path.push(name);
                    let qualified = self.qualified_name_string(&path);
                    let qid = self.sess.strings.intern(&qualified);
                    self.sess.types.add_alias(qid, type_id);
                }
                StructCtx {
                    type_id,
                    reg_name: name,
                    written_name: name,
                    is_union,
                    is_class,
                    lazy: false,
                }
            }
        };

        if self.at(";") {
            self.toks.advance();
            // forward declaration
            return Ok(self.sess.nodes.alloc(Node::Struct(StructDecl {
                name: ctx.reg_name,
                is_union: ctx.is_union,
                is_class: ctx.is_class,
                is_final: false,
                bases: vec![],
                fields: vec![],
                methods: vec![],
                ctors: vec![],
                dtor: None,
                nested: vec![],
                aliases: vec![],
                static_asserts: vec![],
                pack_alignment: None,
                type_index: ctx.type_id,
            })));
        }
        self.parse_struct_tail(ctx)
    }

    /// Parse from `[final] [: bases] { members } ;`, build the
    /// StructTypeInfo and compute the layout
    pub(crate) fn parse_struct_tail(&mut self, ctx: StructCtx) -> SemaResult<NodeId> {
        let mut decl = StructDecl {
            name: ctx.reg_name,
            is_union: ctx.is_union,
            is_class: ctx.is_class,
            is_final: false,
            bases: vec![],
            fields: vec![],
            methods: vec![],
            ctors: vec![],
            dtor: None,
            nested: vec![],
            aliases: vec![],
            static_asserts: vec![],
            pack_alignment: None,
            type_index: ctx.type_id,
        };
        if self.at_ident() && self.peek().is("final") {
            self.toks.advance();
            decl.is_final = true;
        }
        if self.eat(":") {
            self.parse_base_list(&ctx, &mut decl)?;
        }
        self.expect("{")?;
        self.sess.symbols.enter_scope(ScopeKind::Struct(ctx.type_id));
        self.struct_stack.push((ctx.written_name, ctx.reg_name));
        let body = self.parse_struct_members(&ctx, &mut decl);
        self.struct_stack.pop();
        self.sess.symbols.exit_scope();
        body?;
        self.expect("}")?;
        self.eat(";");

        self.build_struct_info(&ctx, &mut decl)?;
        let node = self.sess.nodes.alloc(Node::Struct(decl));
        self.sess.symbols.insert(ctx.reg_name, node);
        Ok(node)
    }

    fn parse_base_list(&mut self, ctx: &StructCtx, decl: &mut StructDecl) -> SemaResult<()> {
        loop {
            let mut access = if ctx.is_class {
                AccessSpec::Private
            } else {
                AccessSpec::Public
            };
            let mut is_virtual = false;
            loop {
                if self.eat_kw("virtual") {
                    is_virtual = true;
                } else if self.eat_kw("public") {
                    access = AccessSpec::Public;
                } else if self.eat_kw("protected") {
                    access = AccessSpec::Protected;
                } else if self.eat_kw("private") {
                    access = AccessSpec::Private;
                } else {
                    break;
                }
            }
            // a pack-expanded base expands right here when the pack is
            // bound, or defers when the body is being declared
            if self.at_ident() {
                let name = self.intern(self.peek().text.to_string().as_str());
                if self.is_pack_name(name) && self.toks.peek_ahead(1).is("...") {
                    self.toks.advance();
                    self.toks.advance();
                    if let Some(TplArg::Pack(elems)) = self.sess.subst_lookup(name).cloned() {
                        for e in &elems {
                            let TplArg::Type(t) = e else {
                                return Err(SemaError::subst("non-type base in a base pack"));
                            };
                            decl.bases.push(BaseSpecAst {
                                spec: t.clone(),
                                access,
                                is_virtual,
                                is_pack: false,
                            });
                        }
                    } else {
                        decl.bases.push(BaseSpecAst {
                            spec: TypeSpecifier::template_param(name),
                            access,
                            is_virtual,
                            is_pack: true,
                        });
                    }
                    if self.eat(",") {
                        continue;
                    }
                    break;
                }
            }
            let spec = self.parse_type_specifier()?;
            let is_pack = self.eat("...");
            decl.bases.push(BaseSpecAst {
                spec,
                access,
                is_virtual,
                is_pack,
            });
            if !self.eat(",") {
                break;
            }
        }
        Ok(())
    }

    fn parse_struct_members(&mut self, ctx: &StructCtx, decl: &mut StructDecl) -> SemaResult<()> {
        let mut access = if ctx.is_class && !ctx.is_union {
            AccessSpec::Private
        } else {
            AccessSpec::Public
        };
        while !self.at("}") && !self.toks.at_eof() {
            if self.eat_kw("public") {
                self.expect(":")?;
                access = AccessSpec::Public;
                continue;
            }
            if self.eat_kw("protected") {
                self.expect(":")?;
                access = AccessSpec::Protected;
                continue;
            }
            if self.eat_kw("private") {
                self.expect(":")?;
                access = AccessSpec::Private;
                continue;
            }
            if self.at(";") {
                self.toks.advance();
                continue;
            }
            if self.at_kw("static_assert") {
                let node = self.parse_static_assert()?;
                decl.static_asserts.push(node);
                // deferred asserts re-evaluate under the active
                // substitution; every failure is reported
                self.check_static_assert(node);
                continue;
            }
            if self.at_kw("using") || self.at_kw("typedef") {
                let alias = self.parse_member_alias(ctx)?;
                decl.aliases.push(alias);
                continue;
            }
            if self.at_kw("friend") {
                while !self.at(";") && !self.toks.at_eof() {
                    self.toks.advance();
                }
                self.expect(";")?;
                continue;
            }
            if self.at_kw("template") {
                self.parse_template_decl_in_class(ctx.reg_name)?;
                continue;
            }
            if self.at_kw("enum") {
                let nested = self.parse_enum_decl()?;
                decl.nested.push(nested);
                continue;
            }
            if (self.at_kw("struct") || self.at_kw("class") || self.at_kw("union"))
                && (self.toks.peek_ahead(2).is("{")
                    || self.toks.peek_ahead(2).is(":")
                    || self.toks.peek_ahead(1).is("{"))
            {
                let nested = self.parse_nested_struct(ctx)?;
                decl.nested.push(nested);
                continue;
            }
            if self.at("~") {
                let dtor = self.parse_dtor(ctx, access, false)?;
                decl.dtor = Some(dtor);
                continue;
            }
            if self.at_kw("virtual") && self.toks.peek_ahead(1).is("~") {
                self.toks.advance();
                let dtor = self.parse_dtor(ctx, access, true)?;
                decl.dtor = Some(dtor);
                continue;
            }
            // constructor: the written class name followed by '('
            if self.at_ident()
                && self.peek().is(self.sess.view(ctx.written_name).to_string().as_str())
                && self.toks.peek_ahead(1).is("(")
            {
                let ctor = self.parse_ctor(ctx, access)?;
                decl.ctors.push(ctor);
                continue;
            }
            self.parse_field_or_method(ctx, decl, access)?;
        }
        Ok(())
    }

    fn parse_member_alias(&mut self, ctx: &StructCtx) -> SemaResult<AliasDecl> {
        let (name, target) = if self.eat_kw("using") {
            let name_tok = self.expect_ident()?;
            let name = self.intern(name_tok.text.as_ref());
            self.expect("=")?;
            let target = self.parse_type_specifier()?;
            self.expect(";")?;
            (name, target)
        } else {
            self.expect_kw("typedef")?;
            let target = self.parse_type_specifier()?;
            let name_tok = self.expect_ident()?;
            let name = self.intern(name_tok.text.as_ref());
            self.expect(";")?;
            (name, target)
        };
        // register under the qualified name and in the member-alias
        // registry used by dependent `Outer<T>::name` resolution
        if target.index.is_valid() {
            let qualified = format!(
                "{}::{}",
                self.sess.view(ctx.reg_name),
                self.sess.view(name)
            );
            let qid = self.sess.strings.intern(&qualified);
            self.sess.types.add_alias(qid, target.index);
        }
        self.sess
            .templates
            .bind_member_alias(ctx.reg_name, name, target.clone());
        Ok(AliasDecl { name, target })
    }

    fn parse_nested_struct(&mut self, outer: &StructCtx) -> SemaResult<NodeId> {
        let kw = self.bump();
        let is_union = kw.is_kw("union");
        let is_class = kw.is_kw("class");
        let name_tok = self.expect_ident()?;
        let written = self.intern(name_tok.text.as_ref());
        let qualified = format!(
            "{}::{}",
            self.sess.view(outer.reg_name),
            self.sess.view(written)
        );
        let qid = self.sess.strings.intern(&qualified);
        let type_id = self.sess.types.add_named(
            qid,
            if is_union { BaseType::Union } else { BaseType::Struct },
        );
        let ctx = StructCtx {
            type_id,
            reg_name: qid,
            written_name: written,
            is_union,
            is_class,
            lazy: outer.lazy,
        };
        let node = self.parse_struct_tail(ctx)?;
        // the inner name also resolves unqualified inside the enclosing
        // class body
        self.sess
            .templates
            .bind_member_alias(outer.reg_name, written, TypeSpecifier::named(
                if is_union { BaseType::Union } else { BaseType::Struct },
                qid,
                type_id,
            ));
        Ok(node)
    }

    fn parse_ctor(&mut self, ctx: &StructCtx, access: AccessSpec) -> SemaResult<NodeId> {
        self.toks.advance(); // class name
        let (params, _, _) = self.parse_param_list()?;
        let mut is_defaulted = false;
        let mut is_deleted = false;
        let mut inits = vec![];
        self.eat_kw("noexcept");
        if self.eat("=") {
            if self.eat_kw("default") {
                is_defaulted = true;
            } else if self.eat_kw("delete") {
                is_deleted = true;
            }
            self.expect(";")?;
        } else {
            if self.eat(":") {
                loop {
                    let m = self.expect_ident()?;
                    let mname = self.intern(m.text.as_ref());
                    let args = if self.at("(") {
                        self.parse_call_args()?
                    } else {
                        self.expect("{")?;
                        let mut args = vec![];
                        while !self.at("}") {
                            args.push(self.parse_expr_no_comma()?);
                            if !self.eat(",") {
                                break;
                            }
                        }
                        self.expect("}")?;
                        args
                    };
                    inits.push((mname, args));
                    if !self.eat(",") {
                        break;
                    }
                }
            }
            if self.at("{") {
                // constructors are always materialized eagerly
                let body = self.parse_function_body(&params, ctx.type_id)?;
                let node = self.sess.nodes.alloc(Node::Ctor(CtorDecl {
                    class_name: ctx.reg_name,
                    params,
                    inits,
                    body: Some(body),
                    access,
                    is_explicit: false,
                    is_defaulted: false,
                    is_deleted: false,
                    mangled: None,
                }));
                return Ok(node);
            }
            self.expect(";")?;
        }
        Ok(self.sess.nodes.alloc(Node::Ctor(CtorDecl {
            class_name: ctx.reg_name,
            params,
            inits,
            body: None,
            access,
            is_explicit: false,
            is_defaulted,
            is_deleted,
            mangled: None,
        })))
    }

    fn parse_dtor(
        &mut self,
        ctx: &StructCtx,
        access: AccessSpec,
        is_virtual: bool,
    ) -> SemaResult<NodeId> {
        self.expect("~")?;
        let name_tok = self.expect_ident()?;
        if !name_tok.is(self.sess.view(ctx.written_name).to_string().as_str()) {
            return Err(self.err_at(&name_tok, "destructor name does not match the class"));
        }
        self.expect("(")?;
        self.expect(")")?;
        let mut is_defaulted = false;
        let mut is_deleted = false;
        self.eat_kw("noexcept");
        while self.at_ident() && (self.peek().is("override") || self.peek().is("final")) {
            self.toks.advance();
        }
        let body = if self.eat("=") {
            if self.eat_kw("default") {
                is_defaulted = true;
            } else if self.eat_kw("delete") {
                is_deleted = true;
            }
            self.expect(";")?;
            None
        } else if self.at("{") {
            Some(self.parse_function_body(&[], ctx.type_id)?)
        } else {
            self.expect(";")?;
            None
        };
        Ok(self.sess.nodes.alloc(Node::Dtor(DtorDecl {
            class_name: ctx.reg_name,
            body,
            is_virtual,
            is_defaulted,
            is_deleted,
            access,
            mangled: None,
        })))
    }

    fn parse_field_or_method(
        &mut self,
        ctx: &StructCtx,
        decl: &mut StructDecl,
        access: AccessSpec,
    ) -> SemaResult<()> {
        let mut quals = FuncQuals::default();
        loop {
            if self.eat_kw("static") {
                quals.storage.is_static = true;
            } else if self.eat_kw("inline") {
                quals.storage.is_inline = true;
            } else if self.eat_kw("constexpr") {
                quals.storage.is_constexpr = true;
            } else if self.eat_kw("consteval") {
                quals.storage.is_consteval = true;
            } else if self.eat_kw("virtual") {
                quals.is_virtual = true;
            } else if self.eat_kw("explicit") {
                // recorded on constructors only; harmless elsewhere
            } else {
                break;
            }
        }
        let ty = self.parse_type_specifier()?;

        // operator overload
        if self.at_kw("operator") {
            let node = self.parse_operator_overload(ctx, ty, quals, access)?;
            decl.methods.push(node);
            return Ok(());
        }

        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());

        if self.at("(") {
            let node = self.parse_member_function(ctx, ty, name, quals, access, None)?;
            decl.methods.push(node);
            return Ok(());
        }

        // data member(s)
        let mut member_ty = ty.clone();
        let mut member_name = name;
        loop {
            if self.at("[") {
                self.toks.advance();
                member_ty.is_array = true;
                if !self.at("]") {
                    let len = self.parse_expr()?;
                    let empty = SubstMap::default();
                    match self.eval_const(len, &empty) {
                        Ok(v) if v >= 0 => member_ty.array_len = Some(v as u64),
                        _ => member_ty.array_len_expr = Some(len),
                    }
                }
                self.expect("]")?;
            }
            let bitfield_width = if self.eat(":") {
                Some(self.parse_expr_no_comma()?)
            } else {
                None
            };
            let default_init = if self.eat("=") {
                Some(self.parse_expr_no_comma()?)
            } else if self.at("{") {
                self.toks.advance();
                let e = if self.at("}") {
                    None
                } else {
                    Some(self.parse_expr_no_comma()?)
                };
                self.expect("}")?;
                e
            } else {
                None
            };
            decl.fields.push(FieldDecl {
                name: member_name,
                ty: member_ty.clone(),
                access,
                default_init,
                bitfield_width,
                is_static: quals.storage.is_static,
                is_const: member_ty.cv.is_const,
                is_constexpr: quals.storage.is_constexpr,
            });
            if self.eat(",") {
                let t = self.expect_ident()?;
                member_name = self.intern(t.text.as_ref());
                member_ty = ty.clone();
                continue;
            }
            break;
        }
        self.expect(";")?;
        Ok(())
    }

    fn parse_operator_overload(
        &mut self,
        ctx: &StructCtx,
        ret: TypeSpecifier,
        quals: FuncQuals,
        access: AccessSpec,
    ) -> SemaResult<NodeId> {
        self.expect_kw("operator")?;
        let mut op_text = String::new();
        if self.at("(") && self.toks.peek_ahead(1).is(")") {
            self.toks.advance();
            self.toks.advance();
            op_text.push_str("()");
        } else if self.at("[") {
            self.toks.advance();
            self.expect("]")?;
            op_text.push_str("[]");
        } else {
            let t = self.bump();
            op_text.push_str(t.text.as_ref());
            // composite operators lex as two tokens
            if self.peek().kind == crate::TokenKind::Op && self.peek().is("=") && op_text != "=" {
                op_text.push('=');
                self.toks.advance();
            }
        }
        let name = self.sess.strings.intern(&format!("operator{op_text}"));
        self.parse_member_function(ctx, ret, name, quals, access, Some(op_text.into()))
    }

    fn parse_member_function(
        &mut self,
        ctx: &StructCtx,
        mut ret: TypeSpecifier,
        name: StrId,
        mut quals: FuncQuals,
        access: AccessSpec,
        operator: Option<embercc_arena::ArcStr>,
    ) -> SemaResult<NodeId> {
        let (params, is_variadic, _) = self.parse_param_list()?;
        if self.eat_kw("const") {
            quals.is_const = true;
        }
        if self.eat("&") {
            quals.ref_qual = RefQual::LValue;
        } else if self.eat("&&") {
            quals.ref_qual = RefQual::RValue;
        }
        if self.eat_kw("noexcept") {
            quals.noexcept = if self.at("(") {
                self.toks.advance();
                let e = self.parse_expr()?;
                self.expect(")")?;
                Some(Some(e))
            } else {
                Some(None)
            };
        }
        while self.at_ident() && (self.peek().is("override") || self.peek().is("final")) {
            if self.peek().is("override") {
                quals.is_override = true;
            } else {
                quals.is_final = true;
            }
            self.toks.advance();
        }
        if self.eat("->") {
            ret = self.parse_type_specifier()?;
        }

        let mut body = None;
        let mut lazy_cursor = None;
        if self.eat("=") {
            if self.eat_kw("default") {
                quals.is_defaulted = true;
            } else if self.eat_kw("delete") {
                quals.is_deleted = true;
            } else {
                let zero = self.bump();
                if zero.is("0") {
                    quals.is_pure = true;
                    quals.is_virtual = true;
                } else {
                    return Err(self.err_at(&zero, "expected 'default', 'delete' or '0'"));
                }
            }
            self.expect(";")?;
        } else if self.at("{") {
            if ctx.lazy {
                // signature registered now, body realized on first call
                lazy_cursor = Some(self.toks.save_cursor());
                self.skip_balanced("{", "}")?;
            } else {
                body = Some(self.parse_function_body(&params, ctx.type_id)?);
            }
        } else {
            self.expect(";")?;
        }

        let class_str = self.sess.view(ctx.reg_name).to_string();
        let fn_str = self.sess.view(name).to_string();
        let param_types: Vec<TypeSpecifier> = params.iter().map(|p| p.ty.clone()).collect();
        let mangled = if ret.is_dependent() || param_types.iter().any(|t| t.is_dependent()) {
            None
        } else {
            Some(crate::mangle_function(
                self.sess,
                &fn_str,
                &[class_str],
                &param_types,
                &ret,
            ))
        };

        let node = self.sess.nodes.alloc(Node::Func(FuncDecl {
            name,
            ret,
            params,
            body,
            quals,
            access,
            class_name: Some(ctx.reg_name),
            operator,
            namespace: vec![],
            mangled: mangled.map(|m| m.as_str().into()),
            inline_always: false,
            is_variadic,
        }));
        if let Some(cursor) = lazy_cursor {
            let map = self.sess.subst_stack.last().cloned().unwrap_or_default();
            self.sess.lazy_methods.push(LazyMemberFunction {
                class_index: ctx.type_id,
                class_name: ctx.reg_name,
                member: name,
                decl: node,
                body_start: Some(cursor),
                original: node,
                map,
                realized: false,
            });
        }
        Ok(node)
    }

    /// Parse a `{...}` body under a fresh function scope with the
    /// parameters and the enclosing struct in scope
    pub(crate) fn parse_function_body(
        &mut self,
        params: &[Param],
        _class: TypeId,
    ) -> SemaResult<NodeId> {
        self.sess.symbols.enter_scope(ScopeKind::Function);
        for p in params {
            if !p.name.is_valid() {
                continue;
            }
            let var = self.sess.nodes.alloc(Node::Var(VarDecl {
                name: p.name,
                ty: p.ty.clone(),
                init: None,
                storage: StorageOpts::default(),
                namespace: vec![],
            }));
            self.sess.symbols.insert(p.name, var);
        }
        let body = self.parse_block();
        self.sess.symbols.exit_scope();
        body
    }

    /// Parse `( params )`, recording C-style variadics, pack parameters
    /// and abbreviated-template concept constraints
    pub(crate) fn parse_param_list(
        &mut self,
    ) -> SemaResult<(Vec<Param>, bool, Vec<(usize, StrId, Vec<TplArg>)>)> {
        self.expect("(")?;
        let mut params = vec![];
        let mut variadic = false;
        let mut concept_autos = vec![];
        if self.eat(")") {
            return Ok((params, variadic, concept_autos));
        }
        loop {
            if self.eat("...") {
                variadic = true;
                break;
            }
            // `Concept auto name` abbreviated template parameter
            if self.at_ident() {
                let first = self.intern(self.peek().text.to_string().as_str());
                if self.sess.concepts.contains(first) {
                    let save = self.toks.pos();
                    self.toks.advance();
                    let extra = if self.at("<") {
                        self.parse_template_args_guarded()?
                    } else {
                        vec![]
                    };
                    if self.at_kw("auto") {
                        self.toks.advance();
                        let pname = if self.at_ident() {
                            let t = self.bump();
                            self.intern(t.text.as_ref())
                        } else {
                            StrId::INVALID
                        };
                        concept_autos.push((params.len(), first, extra));
                        params.push(Param {
                            name: pname,
                            ty: TypeSpecifier::prim(BaseType::Auto),
                            default: None,
                            is_pack: false,
                        });
                        if self.eat(",") {
                            continue;
                        }
                        break;
                    }
                    self.toks.set_pos(save);
                }
            }
            let ty = self.parse_type_specifier()?;
            let is_pack = self.eat("...");
            let name = if self.at_ident() {
                let t = self.bump();
                self.intern(t.text.as_ref())
            } else {
                StrId::INVALID
            };
            let mut ty = ty;
            if self.at("[") {
                self.toks.advance();
                ty.is_array = true;
                if !self.at("]") {
                    let len = self.parse_expr()?;
                    let empty = SubstMap::default();
                    if let Ok(v) = self.eval_const(len, &empty) {
                        ty.array_len = Some(v.max(0) as u64);
                    } else {
                        ty.array_len_expr = Some(len);
                    }
                }
                self.expect("]")?;
            }
            let default = if self.eat("=") {
                Some(self.parse_expr_no_comma()?)
            } else {
                None
            };
            params.push(Param {
                name,
                ty,
                default,
                is_pack,
            });
            if self.eat(",") {
                continue;
            }
            break;
        }
        self.expect(")")?;
        Ok((params, variadic, concept_autos))
    }

    /// Top-level function or variable declaration
    pub(crate) fn parse_func_or_var(&mut self) -> SemaResult<NodeId> {
        self.parse_func_or_var_with_linkage(Linkage::Cpp)
    }

    pub(crate) fn parse_func_or_var_with_linkage(
        &mut self,
        linkage: Linkage,
    ) -> SemaResult<NodeId> {
        let mut storage = StorageOpts {
            linkage,
            ..Default::default()
        };
        loop {
            if self.eat_kw("static") {
                storage.is_static = true;
            } else if self.eat_kw("inline") {
                storage.is_inline = true;
            } else if self.eat_kw("constexpr") {
                storage.is_constexpr = true;
            } else if self.eat_kw("consteval") {
                storage.is_consteval = true;
            } else if self.eat_kw("constinit") {
                storage.is_constinit = true;
            } else if self.eat_kw("extern") {
                storage.is_extern = true;
            } else {
                break;
            }
        }
        let mut ret = self.parse_type_specifier()?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());

        if self.at("(") {
            let (params, is_variadic, concept_autos) = self.parse_param_list()?;
            if !concept_autos.is_empty() {
                return self.finish_abbreviated_template(
                    name,
                    ret,
                    params,
                    concept_autos,
                    storage,
                );
            }
            let mut quals = FuncQuals {
                storage,
                ..Default::default()
            };
            if self.eat_kw("noexcept") {
                quals.noexcept = if self.at("(") {
                    self.toks.advance();
                    let e = self.parse_expr()?;
                    self.expect(")")?;
                    Some(Some(e))
                } else {
                    Some(None)
                };
            }
            if self.eat("->") {
                ret = self.parse_type_specifier()?;
            }
            let body = if self.at("{") {
                Some(self.parse_function_body(&params, TypeId::INVALID)?)
            } else {
                self.expect(";")?;
                None
            };
            let ns = self.sess.symbols.current_namespace_path();
            let fn_str = self.sess.view(name).to_string();
            let ns_str: Vec<String> = ns.iter().map(|s| self.sess.view(*s).to_string()).collect();
            let param_types: Vec<TypeSpecifier> = params.iter().map(|p| p.ty.clone()).collect();
            let mangled = if fn_str == "main" || storage.linkage == Linkage::C {
                fn_str.clone()
            } else {
                crate::mangle_function(self.sess, &fn_str, &ns_str, &param_types, &ret)
            };
            let node = self.sess.nodes.alloc(Node::Func(FuncDecl {
                name,
                ret,
                params,
                body,
                quals,
                access: AccessSpec::Public,
                class_name: None,
                operator: None,
                namespace: ns,
                mangled: Some(mangled.as_str().into()),
                inline_always: false,
                is_variadic,
            }));
            self.sess.symbols.insert(name, node);
            return Ok(node);
        }

        // variable
        if self.at("[") {
            self.toks.advance();
            ret.is_array = true;
            if !self.at("]") {
                let len = self.parse_expr()?;
                let empty = SubstMap::default();
                match self.eval_const(len, &empty) {
                    Ok(v) if v >= 0 => ret.array_len = Some(v as u64),
                    _ => ret.array_len_expr = Some(len),
                }
            }
            self.expect("]")?;
        }
        let init = if self.eat("=") {
            Some(self.parse_expr_no_comma()?)
        } else if self.at("{") {
            self.toks.advance();
            let e = if self.at("}") {
                None
            } else {
                Some(self.parse_expr_no_comma()?)
            };
            self.expect("}")?;
            e
        } else {
            None
        };
        self.expect(";")?;
        let ns = self.sess.symbols.current_namespace_path();
        let node = self.sess.nodes.alloc(Node::Var(VarDecl {
            name,
            ty: ret,
            init,
            storage,
            namespace: ns,
        }));
        self.sess.symbols.insert(name, node);
        Ok(node)
    }

    pub(crate) fn parse_using(&mut self) -> SemaResult<()> {
        self.expect_kw("using")?;
        if self.at_kw("namespace") {
            // using-directives do not bind names in this front-end
            while !self.at(";") && !self.toks.at_eof() {
                self.toks.advance();
            }
            self.expect(";")?;
            return Ok(());
        }
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        self.expect("=")?;
        let target = self.parse_type_specifier()?;
        self.expect(";")?;
        if target.index.is_valid() {
            self.sess.types.add_alias(name, target.index);
        }
        let node = self.sess.nodes.alloc(Node::Alias(AliasDecl { name, target }));
        self.sess.symbols.insert(name, node);
        Ok(())
    }

    pub(crate) fn parse_typedef(&mut self) -> SemaResult<()> {
        self.expect_kw("typedef")?;
        let target = self.parse_type_specifier()?;
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        self.expect(";")?;
        if target.index.is_valid() {
            self.sess.types.add_alias(name, target.index);
        }
        let node = self.sess.nodes.alloc(Node::Alias(AliasDecl { name, target }));
        self.sess.symbols.insert(name, node);
        Ok(())
    }

    pub(crate) fn parse_enum_decl(&mut self) -> SemaResult<NodeId> {
        self.expect_kw("enum")?;
        let is_scoped = self.eat_kw("class") || self.eat_kw("struct");
        let name_tok = self.expect_ident()?;
        let name = self.intern(name_tok.text.as_ref());
        let underlying = if self.eat(":") {
            self.parse_type_specifier()?.base
        } else {
            BaseType::Int
        };
        let type_id = self.sess.types.add_named(name, BaseType::Enum);
        let mut enumerators = vec![];
        let mut info_enums = vec![];
        self.expect("{")?;
        let mut next_value = 0i64;
        while !self.at("}") {
            let e_tok = self.expect_ident()?;
            let e_name = self.intern(e_tok.text.as_ref());
            let init = if self.eat("=") {
                let e = self.parse_expr_no_comma()?;
                let empty = SubstMap::default();
                if let Ok(v) = self.eval_const(e, &empty) {
                    next_value = v;
                }
                Some(e)
            } else {
                None
            };
            info_enums.push(Enumerator {
                name: e_name,
                value: next_value,
            });
            next_value += 1;
            enumerators.push((e_name, init));
            if !self.eat(",") {
                break;
            }
        }
        self.expect("}")?;
        self.eat(";");
        let byte_size = underlying.byte_size().unwrap_or(4);
        if let Some(info) = self.sess.types.get_mut(type_id) {
            info.size_bits = byte_size * 8;
            info.incomplete = false;
            info.enum_info = Some(EnumInfo {
                underlying,
                byte_size,
                enumerators: info_enums,
            });
        }
        let node = self.sess.nodes.alloc(Node::Enum(EnumDecl {
            name,
            is_scoped,
            underlying,
            enumerators,
            type_index: type_id,
        }));
        self.sess.symbols.insert(name, node);
        Ok(node)
    }

    /// Turn the collected struct declaration into a laid-out
    /// StructTypeInfo on the registry slot
    fn build_struct_info(&mut self, ctx: &StructCtx, decl: &mut StructDecl) -> SemaResult<()> {
        let mut info = StructTypeInfo {
            is_union: ctx.is_union,
            is_final: decl.is_final,
            ..Default::default()
        };

        for b in &decl.bases {
            if b.spec.is_dependent() || !b.spec.index.is_valid() {
                info.deferred_bases.push(embercc_sema::DeferredBase {
                    spec: b.spec.clone(),
                    access: b.access,
                    is_virtual: b.is_virtual,
                    is_pack: b.is_pack,
                });
                continue;
            }
            info.bases.push(BaseClass {
                name: b.spec.name,
                index: b.spec.index,
                access: b.access,
                is_virtual: b.is_virtual,
                offset: 0,
            });
        }

        let active = self.sess.subst_stack.last().cloned().unwrap_or_default();
        for f in &decl.fields {
            let ty = if f.ty.is_dependent() {
                self.subst_type(&f.ty, &active)?
            } else {
                f.ty.clone()
            };
            if f.is_static {
                let value = f
                    .default_init
                    .and_then(|init| {
                        if self.sess.options.lazy_instantiation {
                            None
                        } else {
                            self.subst_expr(init, &active)
                                .and_then(|e| self.eval_const(e, &active))
                                .ok()
                        }
                    });
                if self.sess.options.lazy_instantiation
                    && let Some(init) = f.default_init
                {
                    self.sess.lazy_statics.push(crate::session::LazyStaticMember {
                        class_index: ctx.type_id,
                        member: f.name,
                        init,
                        map: active.clone(),
                    });
                }
                info.static_members.push(StaticMember {
                    name: f.name,
                    ty,
                    init: f.default_init,
                    is_const: f.is_const || f.is_constexpr,
                    value,
                });
                continue;
            }
            let width = match f.bitfield_width {
                Some(w) => match self.eval_const(w, &active) {
                    Ok(v) if v >= 0 => Some(v as u32),
                    _ => {
                        return Err(SemaError::layout("bitfield width is not a constant"));
                    }
                },
                None => None,
            };
            info.members.push(Member {
                name: f.name,
                ty,
                offset: 0,
                size: 0,
                align: 0,
                access: f.access,
                default_init: f.default_init,
                bitfield_width: width,
            });
        }

        // virtual slots from this class's own declarations
        for m in &decl.methods {
            let Some(f) = self.sess.nodes.func(*m) else {
                continue;
            };
            if f.quals.is_virtual || f.quals.is_override || f.quals.is_pure {
                let sig: String = f
                    .params
                    .iter()
                    .map(|p| p.ty.key_string(&self.sess.strings))
                    .collect::<Vec<_>>()
                    .join(",");
                info.vtable.push(VtableSlot {
                    name: f.name,
                    sig: sig.as_str().into(),
                    func: Some(*m),
                    is_pure: f.quals.is_pure,
                    from_final_base: false,
                });
                info.has_vtable = true;
            }
        }
        info.methods = decl.methods.clone();
        info.ctors = decl.ctors.clone();
        info.dtor = decl.dtor;
        info.has_user_ctor = !decl.ctors.is_empty();
        info.has_user_dtor = decl.dtor.is_some();
        for c in &decl.ctors {
            if let Some(ctor) = self.sess.nodes.ctor(*c)
                && ctor.is_deleted
            {
                if ctor.params.is_empty() {
                    info.deleted_default_ctor = true;
                } else {
                    info.deleted_copy_ctor = true;
                }
            }
        }
        info.pack_alignment = decl.pack_alignment;

        layout::finalize(&mut info, &self.sess.types)?;

        let size_bits = info.total_size * 8;
        if let Some(reg) = self.sess.types.get_mut(ctx.type_id) {
            reg.size_bits = size_bits;
            reg.strukt = Some(info);
            reg.incomplete = false;
        }
        Ok(())
    }

    /// Attach an out-of-line member definition to an instantiated class:
    /// re-parses `ret Class<Args>::member ...` from its saved cursor
    pub(crate) fn parse_out_of_line_tail(
        &mut self,
        def: &crate::tpl::OutOfLineDef,
        type_id: TypeId,
        _iname: StrId,
    ) -> SemaResult<()> {
        let ret = self.parse_type_specifier()?;
        let _class_tok = self.expect_ident()?;
        if self.at("<") {
            // skip the pattern argument list; bindings are already active
            let mut depth = 1usize;
            self.toks.advance();
            while depth > 0 && !self.toks.at_eof() {
                if self.at("<") {
                    depth += 1;
                } else if self.at(">") {
                    depth -= 1;
                }
                self.toks.advance();
            }
        }
        self.expect("::")?;
        let member_tok = self.expect_ident()?;
        let member = self.intern(member_tok.text.as_ref());

        if def.is_static_member {
            self.expect("=")?;
            let init = self.parse_expr_no_comma()?;
            self.expect(";")?;
            let active = self.sess.subst_stack.last().cloned().unwrap_or_default();
            let value = self
                .subst_expr(init, &active)
                .and_then(|e| self.eval_const(e, &active))
                .ok();
            if let Some(reg) = self.sess.types.get_mut(type_id)
                && let Some(s) = reg.strukt.as_mut()
                && let Some(sm) = s.static_members.iter_mut().find(|m| m.name == member)
            {
                sm.init = Some(init);
                sm.value = value;
            }
            return Ok(());
        }

        let (params, _, _) = self.parse_param_list()?;
        self.eat_kw("const");
        self.eat_kw("noexcept");
        let _ = ret;
        self.sess.symbols.enter_scope(ScopeKind::Struct(type_id));
        let body = self.parse_function_body(&params, type_id);
        self.sess.symbols.exit_scope();
        let body = body?;

        // attach to the member declared during materialization
        let method = self
            .sess
            .types
            .get(type_id)
            .and_then(|i| i.strukt.as_ref())
            .and_then(|s| {
                s.methods
                    .iter()
                    .copied()
                    .find(|m| self.sess.nodes.func(*m).is_some_and(|f| f.name == member))
            });
        match method {
            Some(m) => {
                if let Some(f) = self.sess.nodes.func_mut(m) {
                    f.body = Some(body);
                }
                Ok(())
            }
            None => Err(SemaError::subst(format!(
                "out-of-line definition for unknown member '{}'",
                self.sess.view(member)
            ))),
        }
    }

    fn finish_abbreviated_template(
        &mut self,
        name: StrId,
        ret: TypeSpecifier,
        mut params: Vec<Param>,
        concept_autos: Vec<(usize, StrId, Vec<TplArg>)>,
        storage: StorageOpts,
    ) -> SemaResult<NodeId> {
        // each `Concept auto` parameter becomes an invented type parameter
        let mut tparams = vec![];
        for (i, (idx, _, _)) in concept_autos.iter().enumerate() {
            let pname = self
                .sess
                .strings
                .create_unique(&format!("__auto_{i}"));
            tparams.push(embercc_sema::TemplateParam {
                name: pname,
                kind: embercc_sema::TemplateParamKind::Type { default: None },
                is_pack: false,
                concept_constraint: None,
            });
            if let Some(p) = params.get_mut(*idx) {
                p.ty = TypeSpecifier::template_param(pname);
            }
        }
        let mut quals = FuncQuals::default();
        quals.storage = storage;
        self.eat_kw("noexcept");
        let decl_start = self.toks.save_cursor();
        let mut trailing = None;
        if self.eat("->") {
            trailing = Some(self.toks.save_cursor());
            let _ = self.parse_type_specifier();
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
        let node = self.sess.nodes.alloc(Node::TemplateFunc(
            embercc_sema::TemplateFuncDecl {
                name,
                tparams,
                requires_clause: None,
                decl_start,
                body_start,
                trailing_return_start: trailing,
                params,
                ret,
                has_trailing_return: trailing.is_some(),
                quals,
                namespace: ns.clone(),
                class_name: None,
                param_concepts: concept_autos,
            },
        ));
        self.register_template_primary(name, &ns, node, crate::tpl::TemplateKind::Function);
        Ok(node)
    }
}
