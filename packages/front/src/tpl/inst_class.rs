use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    BaseType, InstKey, InstMeta, InstState, Node, NodeId, ScopeKind, SemaError, SemaResult,
    StorageOpts, TemplateParam, TemplateParamKind, TplArg, TypeId, TypeSpecifier, VarDecl,
};

use crate::parse::{Parser, StructCtx};
use crate::tpl::{SubstMap, TemplateKind, args_key, mangle_template_name};

/// Class template instantiation: cache and cycle tracking, default
/// argument fill-in, specialization selection, and materialization by
/// re-parsing the deferred body under the bound arguments
impl<'s> Parser<'s> {
    pub fn try_instantiate_class(
        &mut self,
        name: StrId,
        mut args: Vec<TplArg>,
        force_eager: bool,
    ) -> SemaResult<Option<TypeId>> {
        // early rejections: not a class template -> silently none
        let Some(reg_name) = self.lookup_template_name(name) else {
            return Ok(None);
        };
        if self.sess.templates.kind_of(reg_name) != Some(TemplateKind::Class) {
            return Ok(None);
        }

        // dependent arguments: register a placeholder carrying the base
        // template and the argument list, and stop
        if args.iter().any(|a| a.is_dependent()) {
            let placeholder_name = {
                let base = self.sess.view(name).to_string();
                let key = args_key(&args, &self.sess.strings);
                self.sess.strings.create_unique(&format!("{base}<{key}>"))
            };
            let tid = self.sess.types.add_named(placeholder_name, BaseType::UserDefined);
            if let Some(info) = self.sess.types.get_mut(tid) {
                info.inst = Some(InstMeta {
                    base_template: name,
                    args,
                    incomplete_instantiation: true,
                });
            }
            return Ok(None);
        }

        self.sess.class_inst_steps += 1;
        if self.sess.class_inst_steps > self.sess.options.iteration_budget {
            return Err(SemaError::fatal(format!(
                "class template iteration budget exceeded at '{}'",
                self.sess.view(name)
            )));
        }

        // the primary carrying named parameters wins when several
        // declarations exist
        let primaries = self.sess.templates.lookup_all_templates(reg_name).to_vec();
        let primary_id = self.pick_primary(&primaries);
        let Some(primary_id) = primary_id else {
            return Ok(None);
        };
        let Some(primary) = self.sess.nodes.template_class(primary_id).cloned() else {
            return Ok(None);
        };

        // default-argument fill-in for missing trailing arguments
        self.fill_default_args(&primary.tparams, &mut args)?;

        // the primary's associated constraints gate every instantiation
        self.check_class_constraints(&primary, &args)?;

        let key = InstKey::new(reg_name, args_key(&args, &self.sess.strings));
        match self.sess.types.cache_get(&key) {
            Some(InstState::CompleteType(t)) => return Ok(Some(t)),
            // a cycle through the same key proceeds against the
            // incomplete slot (CRTP patterns)
            Some(InstState::InProgress(t)) => return Ok(Some(t)),
            Some(InstState::CompleteNode(_)) => return Ok(None),
            None => {}
        }

        // pre-register the slot so recursive references resolve to it
        let written_base = self.sess.view(name).to_string();
        let internal = mangle_template_name(&written_base, key.args_key.as_ref());
        let iname = self.sess.strings.intern(&internal);
        let type_id = self.sess.types.add_named(iname, BaseType::Struct);
        if let Some(info) = self.sess.types.get_mut(type_id) {
            info.inst = Some(InstMeta {
                base_template: name,
                args: args.clone(),
                incomplete_instantiation: false,
            });
        }
        self.sess.types.cache_put(key.clone(), InstState::InProgress(type_id));

        // specialization selection: exact -> partial pattern -> primary
        let (decl_id, bindings) = self.select_specialization(reg_name, primary_id, &primary, &args, iname)?;

        let result = self.materialize_class(type_id, iname, reg_name, name, decl_id, &bindings, force_eager);
        match result {
            Ok(()) => {
                self.sess.types.cache_put(key, InstState::CompleteType(type_id));
                Ok(Some(type_id))
            }
            Err(e) => {
                self.sess.types.cache_remove(&key);
                Err(e)
            }
        }
    }

    fn pick_primary(&self, primaries: &[NodeId]) -> Option<NodeId> {
        let named = primaries.iter().copied().find(|id| {
            self.sess.nodes.template_class(*id).is_some_and(|d| {
                d.body_start.is_some()
                    && d.tparams
                        .iter()
                        .all(|p| !self.sess.view(p.name).starts_with("__anon_type_"))
            })
        });
        named
            .or_else(|| {
                primaries
                    .iter()
                    .copied()
                    .find(|id| {
                        self.sess
                            .nodes
                            .template_class(*id)
                            .is_some_and(|d| d.body_start.is_some())
                    })
            })
            .or_else(|| primaries.first().copied())
    }

    /// Fill missing trailing arguments from parameter defaults. Dependent
    /// member-alias defaults resolve by instantiating their base template;
    /// non-type defaults re-evaluate under the already-filled arguments.
    /// Unresolvable defaults degrade to a void/zero placeholder with a
    /// warning so later passes still proceed.
    fn fill_default_args(
        &mut self,
        tparams: &[TemplateParam],
        args: &mut Vec<TplArg>,
    ) -> SemaResult<()> {
        let mut map = SubstMap::default();
        for (i, p) in tparams.iter().enumerate() {
            if p.is_pack {
                break;
            }
            if i < args.len() {
                map.insert(p.name, args[i].clone());
                continue;
            }
            match &p.kind {
                TemplateParamKind::Type { default: Some(d) } => {
                    match self.subst_type(&d.clone(), &map) {
                        Ok(t) if !t.is_dependent() => {
                            map.insert(p.name, TplArg::Type(t.clone()));
                            args.push(TplArg::Type(t));
                        }
                        Ok(_) | Err(_) => {
                            cu::warn!(
                                "could not resolve default argument for '{}', using void",
                                self.sess.view(p.name)
                            );
                            let t = TypeSpecifier::prim(BaseType::Void);
                            map.insert(p.name, TplArg::Type(t.clone()));
                            args.push(TplArg::Type(t));
                        }
                    }
                }
                TemplateParamKind::NonType { default: Some(d), .. } => {
                    let value = self
                        .subst_expr(*d, &map)
                        .and_then(|e| self.eval_const(e, &map));
                    match value {
                        Ok(v) => {
                            map.insert(p.name, TplArg::Value(v));
                            args.push(TplArg::Value(v));
                        }
                        Err(_) => {
                            cu::warn!(
                                "could not evaluate default argument for '{}', using zero",
                                self.sess.view(p.name)
                            );
                            map.insert(p.name, TplArg::Value(0));
                            args.push(TplArg::Value(0));
                        }
                    }
                }
                _ => {
                    return Err(SemaError::subst(format!(
                        "missing argument for template parameter '{}'",
                        self.sess.view(p.name)
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_class_constraints(
        &mut self,
        primary: &embercc_sema::TemplateClassDecl,
        args: &[TplArg],
    ) -> SemaResult<()> {
        let map = bind_primary_params(&primary.tparams, args);
        if let Some(rc) = primary.requires_clause {
            let outcome = self.eval_constraint(rc, &map)?;
            if !outcome.satisfied {
                self.sess.diags.error(format!(
                    "constraint '{}' not satisfied: {}",
                    outcome.failed_requirement, outcome.error_message
                ));
                return Err(SemaError::Constraint(embercc_sema::ConstraintViolation {
                    message: outcome.error_message,
                    failed_requirement: outcome.failed_requirement,
                    suggestion: outcome.suggestion,
                    args: args
                        .iter()
                        .map(|a| a.key_string(&self.sess.strings))
                        .collect(),
                }));
            }
        }
        for p in &primary.tparams {
            let Some((concept, extra)) = &p.concept_constraint else {
                continue;
            };
            let Some(arg) = map.get(p.name).cloned() else {
                continue;
            };
            let mut cargs = vec![arg];
            cargs.extend(extra.iter().cloned());
            let outcome = self.eval_concept(*concept, cargs)?;
            if !outcome.satisfied {
                self.sess.diags.error(format!(
                    "constraint '{}' not satisfied: {}",
                    self.sess.view(*concept),
                    outcome.error_message
                ));
                return Err(SemaError::Constraint(embercc_sema::ConstraintViolation {
                    message: outcome.error_message,
                    failed_requirement: self.sess.view(*concept).to_string(),
                    suggestion: outcome.suggestion,
                    args: args
                        .iter()
                        .map(|a| a.key_string(&self.sess.strings))
                        .collect(),
                }));
            }
        }
        Ok(())
    }

    fn select_specialization(
        &mut self,
        reg_name: StrId,
        primary_id: NodeId,
        primary: &embercc_sema::TemplateClassDecl,
        args: &[TplArg],
        iname: StrId,
    ) -> SemaResult<(NodeId, SubstMap)> {
        let key = args_key(args, &self.sess.strings);
        if let Some(full) = self.sess.templates.lookup_exact_specialization(reg_name, &key) {
            return Ok((full, SubstMap::default()));
        }
        let partials: Vec<NodeId> = self
            .sess
            .templates
            .get(reg_name)
            .map(|e| e.partials.clone())
            .unwrap_or_default();
        for pid in partials {
            let Some(p) = self.sess.nodes.template_class(pid).cloned() else {
                continue;
            };
            let Some(pattern) = &p.pattern else {
                continue;
            };
            // the pattern's own parameters bind, not the primary's
            if let Ok(map) = self.match_specialization_pattern(pattern, &p.tparams, args) {
                self.sess.templates.pattern_binding.insert(iname, pid);
                return Ok((pid, map));
            }
        }
        Ok((primary_id, bind_primary_params(&primary.tparams, args)))
    }

    fn materialize_class(
        &mut self,
        type_id: TypeId,
        iname: StrId,
        reg_name: StrId,
        written_name: StrId,
        decl_id: NodeId,
        bindings: &SubstMap,
        force_eager: bool,
    ) -> SemaResult<()> {
        let decl = self
            .sess
            .nodes
            .template_class(decl_id)
            .cloned()
            .ok_or_else(|| SemaError::subst("selected specialization is not a class template"))?;
        let Some(body_start) = decl.body_start else {
            // forward declaration only: the type stays incomplete
            return Ok(());
        };

        let lazy = self.sess.options.lazy_instantiation && !force_eager;
        let here = self.toks.pos();
        self.toks.restore_lexer_only(body_start);
        let ctx = StructCtx {
            type_id,
            reg_name: iname,
            written_name,
            is_union: decl.is_union,
            is_class: false,
            lazy,
        };
        let parsed = self.with_subst(bindings.clone(), |p| p.parse_struct_tail(ctx));
        self.toks.set_pos(here);
        let node = parsed?;

        // out-of-line member-function and static-member definitions
        self.apply_out_of_line(reg_name, type_id, iname, bindings)?;

        self.sess.symbols.insert_global(iname, node);
        self.sess.top_level.push(node);
        cu::debug!("instantiated class '{}'", self.sess.view(iname));
        Ok(())
    }

    /// Re-parse queued out-of-line definitions under this instantiation's
    /// bindings and attach the bodies to the materialized members
    fn apply_out_of_line(
        &mut self,
        reg_name: StrId,
        type_id: TypeId,
        iname: StrId,
        bindings: &SubstMap,
    ) -> SemaResult<()> {
        let defs = self
            .sess
            .templates
            .get(reg_name)
            .map(|e| e.out_of_line.clone())
            .unwrap_or_default();
        for def in defs {
            // bind the definition's own parameter names positionally
            let inst_args = self
                .sess
                .types
                .get(type_id)
                .and_then(|i| i.inst.as_ref())
                .map(|m| m.args.clone())
                .unwrap_or_default();
            let map = bind_positional(&def.tparams, &inst_args, bindings);
            let result = self.apply_one_out_of_line(&def, type_id, iname, &map);
            if let Err(e) = result {
                self.sess.diags.error(format!(
                    "failed to apply out-of-line definition of '{}': {e}",
                    self.sess.view(def.member_name)
                ));
            }
        }
        Ok(())
    }

    fn apply_one_out_of_line(
        &mut self,
        def: &crate::tpl::OutOfLineDef,
        type_id: TypeId,
        iname: StrId,
        map: &SubstMap,
    ) -> SemaResult<()> {
        let here = self.toks.pos();
        self.toks.restore_lexer_only(def.body_start);
        let result = self.with_subst(map.clone(), |p| {
            p.parse_out_of_line_tail(def, type_id, iname)
        });
        self.toks.set_pos(here);
        result
    }

    /// Realize a lazily registered member function body on first call
    pub fn realize_lazy_method(&mut self, class_index: TypeId, name: StrId) -> SemaResult<()> {
        let Some(pos) = self
            .sess
            .lazy_methods
            .iter()
            .position(|m| m.class_index == class_index && m.member == name && !m.realized)
        else {
            return Ok(());
        };
        let entry = self.sess.lazy_methods[pos].clone();
        self.sess.lazy_methods[pos].realized = true;

        let Some(body_start) = entry.body_start else {
            // no cursor: deep-copy the original body under the map
            let original_body = self.sess.nodes.func(entry.original).and_then(|f| f.body);
            if let Some(b) = original_body {
                let copied = self.subst_stmt(b, &entry.map)?;
                if let Some(f) = self.sess.nodes.func_mut(entry.decl) {
                    f.body = Some(copied);
                }
            }
            return Ok(());
        };

        let params = self
            .sess
            .nodes
            .func(entry.decl)
            .map(|f| f.params.clone())
            .unwrap_or_default();
        let here = self.toks.pos();
        self.toks.restore_lexer_only(body_start);
        self.sess.symbols.enter_scope(ScopeKind::Struct(class_index));
        self.sess.symbols.enter_scope(ScopeKind::Function);
        for p in &params {
            let var = self.sess.nodes.alloc(Node::Var(VarDecl {
                name: p.name,
                ty: p.ty.clone(),
                init: None,
                storage: StorageOpts::default(),
                namespace: vec![],
            }));
            self.sess.symbols.insert(p.name, var);
        }
        let parsed = self.with_subst(entry.map.clone(), |p| p.parse_block());
        self.sess.symbols.exit_scope();
        self.sess.symbols.exit_scope();
        self.toks.set_pos(here);
        let body = parsed?;
        let body = self.subst_stmt(body, &entry.map)?;
        if let Some(f) = self.sess.nodes.func_mut(entry.decl) {
            f.body = Some(body);
        }
        cu::debug!(
            "realized lazy member '{}::{}'",
            self.sess.view(entry.class_name),
            self.sess.view(name)
        );
        Ok(())
    }

    /// Resolve a concrete template-id type use: alias templates substitute
    /// their target, class templates instantiate
    pub(crate) fn resolve_template_id_type(
        &mut self,
        spec: TypeSpecifier,
    ) -> SemaResult<TypeSpecifier> {
        let Some(reg_name) = self.lookup_template_name(spec.name) else {
            return Err(SemaError::subst(format!(
                "'{}' is not a template",
                self.sess.view(spec.name)
            )));
        };
        if self.sess.templates.kind_of(reg_name) == Some(TemplateKind::Alias) {
            let alias_id = self.sess.templates.lookup_all_templates(reg_name)[0];
            let alias = self
                .sess
                .nodes
                .template_alias(alias_id)
                .cloned()
                .ok_or_else(|| SemaError::subst("alias registry entry is not an alias"))?;
            let mut map = SubstMap::default();
            let mut ai = spec.template_args.iter();
            for p in &alias.tparams {
                if p.is_pack {
                    let rest: Vec<TplArg> = ai.by_ref().cloned().collect();
                    map.insert(p.name, TplArg::Pack(rest));
                } else if let Some(a) = ai.next() {
                    map.insert(p.name, a.clone());
                }
            }
            let target = self.subst_type(&alias.target.clone(), &map)?;
            let mut shell = spec.clone();
            shell.template_args.clear();
            shell.tparam = None;
            shell.name = StrId::INVALID;
            return Ok(crate::tpl::merge_decorations(&target, &shell));
        }

        match self.try_instantiate_class(spec.name, spec.template_args.clone(), false)? {
            Some(tid) => {
                let (base, resolved_name) = {
                    let info = self
                        .sess
                        .types
                        .get(tid)
                        .ok_or_else(|| SemaError::subst("instantiation lost its registry slot"))?;
                    (info.base, info.name)
                };
                let mut out = spec.clone();
                out.index = tid;
                out.base = base;
                out.name = resolved_name;
                out.template_args.clear();
                out.dependent = false;
                if let Some(m) = out.member.take() {
                    let target = self
                        .sess
                        .templates
                        .member_alias(resolved_name, m)
                        .cloned()
                        .ok_or_else(|| {
                            SemaError::subst(format!(
                                "'{}' has no member type '{}'",
                                self.sess.view(resolved_name),
                                self.sess.view(m)
                            ))
                        })?;
                    out = crate::tpl::merge_decorations(&target, &out);
                }
                Ok(out)
            }
            None => Err(SemaError::subst(format!(
                "could not instantiate '{}'",
                self.sess.view(spec.name)
            ))),
        }
    }
}

/// Bind the primary's parameters positionally; a pack parameter swallows
/// the remaining arguments
fn bind_primary_params(tparams: &[TemplateParam], args: &[TplArg]) -> SubstMap {
    let mut map = SubstMap::default();
    let mut ai = args.iter();
    for p in tparams {
        if p.is_pack {
            let rest: Vec<TplArg> = ai.by_ref().cloned().collect();
            map.insert(p.name, TplArg::Pack(rest));
        } else if let Some(a) = ai.next() {
            map.insert(p.name, a.clone());
        }
    }
    map
}

fn bind_positional(tparams: &[TemplateParam], args: &[TplArg], fallback: &SubstMap) -> SubstMap {
    if tparams.is_empty() {
        return fallback.clone();
    }
    bind_primary_params(tparams, args)
}
