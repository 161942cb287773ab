use std::cell::RefCell;

use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    ConstraintViolation, Expr, FuncDecl, InstKey, InstState, Node, NodeId, Param, ScopeKind,
    SemaError, SemaResult, StorageOpts, TemplateFuncDecl, TplArg, TypeSpecifier, VarDecl,
};
use fxhash::FxHashSet;

use crate::parse::Parser;
use crate::tpl::{SubstMap, args_key};

thread_local! {
    /// Instantiation trials currently on the stack, keyed by
    /// `name(argument print)`. Re-entering the same key unwinds with a
    /// cycle instead of recursing forever (self-referential decltype
    /// return types).
    static IN_PROGRESS: RefCell<FxHashSet<String>> = RefCell::new(FxHashSet::default());
}

struct InProgressGuard {
    key: String,
}

impl InProgressGuard {
    fn enter(key: String) -> Option<Self> {
        let fresh = IN_PROGRESS.with(|s| s.borrow_mut().insert(key.clone()));
        fresh.then_some(Self { key })
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        IN_PROGRESS.with(|s| {
            s.borrow_mut().remove(&self.key);
        });
    }
}

/// Function template instantiation: the per-overload trial loop with
/// SFINAE, then materialization
impl<'s> Parser<'s> {
    /// Implicit deduction from a call site
    pub fn try_instantiate_function(
        &mut self,
        name: StrId,
        arg_types: &[TypeSpecifier],
        call_argc: usize,
    ) -> SemaResult<Option<NodeId>> {
        self.instantiate_function_impl(name, arg_types, &[], call_argc)
    }

    /// Explicit `name<...>(...)` syntax
    pub fn try_instantiate_function_explicit(
        &mut self,
        name: StrId,
        explicit_args: Vec<TplArg>,
        arg_types: &[TypeSpecifier],
        call_argc: usize,
    ) -> SemaResult<Option<NodeId>> {
        self.instantiate_function_impl(name, arg_types, &explicit_args, call_argc)
    }

    fn instantiate_function_impl(
        &mut self,
        name: StrId,
        arg_types: &[TypeSpecifier],
        explicit_args: &[TplArg],
        call_argc: usize,
    ) -> SemaResult<Option<NodeId>> {
        if self.sess.fn_inst_depth >= self.sess.options.recursion_cap {
            return Err(SemaError::fatal(format!(
                "template instantiation depth exceeded {} at '{}'",
                self.sess.options.recursion_cap,
                self.sess.view(name)
            )));
        }

        let Some(reg_name) = self.lookup_template_name(name) else {
            return Ok(None);
        };
        let overloads: Vec<NodeId> = self.sess.templates.lookup_all_templates(reg_name).to_vec();
        if overloads.is_empty() {
            return Ok(None);
        }

        // guard the whole trial against self-recursion through decltype
        let trial_key = format!(
            "{}({})",
            self.sess.view(reg_name),
            arg_types
                .iter()
                .map(|t| t.key_string(&self.sess.strings))
                .collect::<Vec<_>>()
                .join(",")
        );
        let Some(_guard) = InProgressGuard::enter(trial_key) else {
            return Err(SemaError::Cycle);
        };

        self.sess.fn_inst_depth += 1;
        let result = self.run_overload_trials(
            reg_name,
            &overloads,
            arg_types,
            explicit_args,
            call_argc,
        );
        self.sess.fn_inst_depth -= 1;
        result
    }

    fn run_overload_trials(
        &mut self,
        name: StrId,
        overloads: &[NodeId],
        arg_types: &[TypeSpecifier],
        explicit_args: &[TplArg],
        call_argc: usize,
    ) -> SemaResult<Option<NodeId>> {
        // overloads are tried in declaration order; any SFINAE-silent
        // failure moves to the next
        let mut last_violation: Option<ConstraintViolation> = None;
        for decl_id in overloads {
            let Some(decl) = self.sess.nodes.template_func(*decl_id).cloned() else {
                continue;
            };

            // arity gate
            let has_pack = decl.params.iter().any(|p| p.is_pack);
            let non_default = decl
                .params
                .iter()
                .filter(|p| p.default.is_none() && !p.is_pack)
                .count();
            if call_argc > decl.params.len() && !has_pack {
                continue;
            }
            if non_default > call_argc {
                continue;
            }

            let attempt = self.speculate(|p| {
                p.try_one_overload(name, &decl, arg_types, explicit_args)
            });
            match attempt {
                Ok(node) => return Ok(Some(node)),
                Err(SemaError::Constraint(v)) => {
                    last_violation = Some(v);
                    continue;
                }
                Err(e) if e.is_sfinae_silent() => {
                    cu::debug!(
                        "overload of '{}' removed from the set: {e}",
                        self.sess.view(name)
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        // a constraint violation surfaces once the whole set is exhausted
        if let Some(v) = last_violation {
            self.sess.diags.error(format!(
                "constraint '{}' not satisfied for '{}' with arguments ({}): {}",
                v.failed_requirement,
                self.sess.view(name),
                v.args.join(", "),
                v.message
            ));
        }
        Ok(None)
    }

    fn try_one_overload(
        &mut self,
        name: StrId,
        decl: &TemplateFuncDecl,
        arg_types: &[TypeSpecifier],
        explicit_args: &[TplArg],
    ) -> SemaResult<NodeId> {
        // argument deduction
        let map = self.deduce_function_args(&decl.tparams, &decl.params, arg_types, explicit_args)?;

        // requires clause
        if let Some(rc) = decl.requires_clause {
            let outcome = self.eval_constraint(rc, &map)?;
            if !outcome.satisfied {
                return Err(SemaError::Constraint(ConstraintViolation {
                    message: outcome.error_message,
                    failed_requirement: outcome.failed_requirement,
                    suggestion: outcome.suggestion,
                    args: map
                        .args_in_order()
                        .iter()
                        .map(|a| a.key_string(&self.sess.strings))
                        .collect(),
                }));
            }
        }

        // constrained template parameters (`template<Integral T>`)
        for p in &decl.tparams {
            let Some((concept, extra)) = &p.concept_constraint else {
                continue;
            };
            let Some(arg) = map.get(p.name).cloned() else {
                continue;
            };
            let arg = match arg {
                TplArg::Type(t) => TplArg::Type(t.without_ref()),
                other => other,
            };
            let mut cargs = vec![arg];
            cargs.extend(extra.iter().cloned());
            let outcome = self.eval_concept(*concept, cargs)?;
            if !outcome.satisfied {
                return Err(SemaError::Constraint(ConstraintViolation {
                    message: format!(
                        "{} ({})",
                        outcome.error_message, outcome.failed_requirement
                    ),
                    failed_requirement: self.sess.view(*concept).to_string(),
                    suggestion: outcome.suggestion,
                    args: map
                        .args_in_order()
                        .iter()
                        .map(|a| a.key_string(&self.sess.strings))
                        .collect(),
                }));
            }
        }

        // per-parameter concept constraints (abbreviated templates),
        // evaluated with the deduction-added lvalue reference stripped
        for (idx, concept, extra) in &decl.param_concepts {
            let Some(p) = decl.params.get(*idx) else {
                continue;
            };
            let deduced = self.subst_type(&p.ty, &map)?;
            let mut args = vec![TplArg::Type(deduced.without_ref())];
            args.extend(extra.iter().cloned());
            let outcome = self.eval_concept(*concept, args)?;
            if !outcome.satisfied {
                return Err(SemaError::Constraint(ConstraintViolation {
                    message: outcome.error_message,
                    failed_requirement: outcome.failed_requirement,
                    suggestion: outcome.suggestion,
                    args: vec![],
                }));
            }
        }

        // trailing-return-type SFINAE re-parse: the deduced types are
        // temporarily registered under the parameter names, and a parse
        // failure here is a substitution failure, not a compile error
        let ret = if let Some(tr) = decl.trailing_return_start {
            let mut trail_map = map.clone();
            for p in &decl.params {
                if !p.name.is_valid() || p.is_pack {
                    continue;
                }
                let bound = self.subst_type(&p.ty, &map)?;
                trail_map.insert(p.name, TplArg::Type(bound));
            }
            let here = self.toks.pos();
            self.toks.restore_lexer_only(tr);
            let parsed = self.with_subst(trail_map, |p| p.parse_type_specifier());
            self.toks.set_pos(here);
            match parsed {
                Ok(t) => t,
                Err(e) => {
                    return Err(SemaError::subst(format!(
                        "trailing return type substitution failed: {e}"
                    )));
                }
            }
        } else {
            self.subst_type(&decl.ret, &map)?
        };

        // cache hit returns the previously materialized node
        let args = map.args_in_order();
        let key = InstKey::new(name, args_key(&args, &self.sess.strings));
        if let Some(InstState::CompleteNode(n)) = self.sess.types.cache_get(&key) {
            return Ok(n);
        }

        self.materialize_function(name, decl, map, key, ret)
    }

    fn materialize_function(
        &mut self,
        name: StrId,
        decl: &TemplateFuncDecl,
        map: SubstMap,
        key: InstKey,
        ret: TypeSpecifier,
    ) -> SemaResult<NodeId> {
        // parameter substitution; packs expand into one concrete
        // parameter per element, named `base_0, base_1, ...`
        let mut params: Vec<Param> = vec![];
        for p in &decl.params {
            if p.is_pack {
                let pack_name = p.ty.tparam.unwrap_or(StrId::INVALID);
                let Some(TplArg::Pack(elems)) = map.get(pack_name).cloned() else {
                    return Err(SemaError::subst("pack parameter without a pack binding"));
                };
                let base = self.sess.view(p.name).to_string();
                for (i, elem) in elems.iter().enumerate() {
                    let TplArg::Type(ty) = elem else {
                        return Err(SemaError::subst("non-type element in a type pack"));
                    };
                    let expanded = crate::tpl::merge_decorations(ty, &p.ty);
                    params.push(Param {
                        name: self.sess.strings.intern(&format!("{base}_{i}")),
                        ty: expanded,
                        default: None,
                        is_pack: false,
                    });
                }
            } else {
                params.push(Param {
                    name: p.name,
                    ty: self.subst_type(&p.ty, &map)?,
                    default: p.default,
                    is_pack: false,
                });
            }
        }

        let ns_path: Vec<String> = decl
            .namespace
            .iter()
            .map(|s| self.sess.view(*s).to_string())
            .collect();
        let fn_name = self.sess.view(decl.name).to_string();
        let param_types: Vec<TypeSpecifier> = params.iter().map(|p| p.ty.clone()).collect();
        let mangled = crate::mangle_function(self.sess, &fn_name, &ns_path, &param_types, &ret);

        // re-parse the deferred body under a fresh function scope with the
        // parameters bound
        let body = if let Some(bs) = decl.body_start {
            let here = self.toks.pos();
            self.toks.restore_lexer_only(bs);
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
            let parsed = self.with_subst(map.clone(), |p| p.parse_block());
            self.sess.symbols.exit_scope();
            self.toks.set_pos(here);
            match parsed {
                Ok(b) => Some(self.subst_stmt(b, &map)?),
                Err(SemaError::Cycle) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let inline_always = match body {
            None => true,
            Some(b) => self.body_is_pure_forwarding(b),
        };

        let node = self.sess.nodes.alloc(Node::Func(FuncDecl {
            name: decl.name,
            ret,
            params,
            body,
            quals: decl.quals.clone(),
            access: embercc_sema::AccessSpec::Public,
            class_name: decl.class_name,
            operator: None,
            namespace: decl.namespace.clone(),
            mangled: Some(mangled.as_str().into()),
            inline_always,
            is_variadic: false,
        }));

        // register: cache, global scope under the internal instantiation
        // name, and the code generator's top-level list
        self.sess.types.cache_put(key.clone(), InstState::CompleteNode(node));
        let internal =
            crate::tpl::mangle_template_name(&fn_name, key.args_key.as_ref());
        let internal_id = self.sess.strings.intern(&internal);
        self.sess.symbols.insert_global(internal_id, node);
        if self.sess.symbols.lookup(name).is_none() {
            self.sess.symbols.insert_global(name, node);
        }
        self.sess.top_level.push(node);
        cu::debug!("instantiated function '{mangled}'");
        Ok(node)
    }

    /// A body of the shape `{ return x; }` or `{ return (T)x; }` is pure
    /// forwarding and is always inlined at call sites
    fn body_is_pure_forwarding(&self, body: NodeId) -> bool {
        let Some(block) = self.sess.nodes.block(body) else {
            return false;
        };
        let mut ret_value = None;
        for stmt in &block.stmts {
            match self.sess.nodes.get(*stmt) {
                Some(Node::Return(r)) => {
                    if ret_value.is_some() {
                        return false;
                    }
                    ret_value = Some(r.value);
                }
                Some(Node::Alias(_)) | Some(Node::Empty) => {}
                _ => return false,
            }
        }
        match ret_value {
            Some(Some(v)) => {
                matches!(
                    self.sess.nodes.expr(v),
                    Some(Expr::Ident(_))
                        | Some(Expr::Cast { .. })
                        | Some(Expr::IntLit { .. })
                        | Some(Expr::BoolLit(_))
                )
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Resolve which registry key `name` binds: current namespace chain
    /// first, then enclosing structs and their bases (inherited member
    /// templates), then the plain name
    pub(crate) fn lookup_template_name(&mut self, name: StrId) -> Option<StrId> {
        for mut path in self.sess.symbols.namespace_ancestors() {
            if path.is_empty() {
                continue;
            }
            path.push(name);
            let qualified = self.qualified_name_string(&path);
            let qid = self.sess.strings.intern(&qualified);
            if self.sess.templates.get(qid).is_some() {
                return Some(qid);
            }
        }
        for (_, class_reg) in self.struct_stack.clone().iter().rev() {
            let qualified = format!(
                "{}::{}",
                self.sess.view(*class_reg),
                self.sess.view(name)
            );
            let qid = self.sess.strings.intern(&qualified);
            if self.sess.templates.get(qid).is_some() {
                return Some(qid);
            }
            // inherited member templates from bases
            if let Some(id) = self.sess.types.lookup(*class_reg)
                && let Some(s) = self.sess.types.get(id).and_then(|i| i.strukt.clone())
            {
                for base in &s.bases {
                    let qualified = format!(
                        "{}::{}",
                        self.sess.view(base.name),
                        self.sess.view(name)
                    );
                    let qid = self.sess.strings.intern(&qualified);
                    if self.sess.templates.get(qid).is_some() {
                        return Some(qid);
                    }
                }
            }
        }
        if self.sess.templates.get(name).is_some() {
            return Some(name);
        }
        None
    }

    pub(crate) fn qualified_name_string(&self, path: &[StrId]) -> String {
        path.iter()
            .map(|s| self.sess.view(*s))
            .collect::<Vec<_>>()
            .join("::")
    }
}
