use cu::pre::*;
use embercc_arena::{StrId, StrIdMap};
use embercc_sema::{
    BaseType, BinOp, Expr, Node, NodeId, Param, Requirement, ScopeKind, SemaError, SemaResult,
    StorageOpts, TplArg, TypeSpecifier, TypeTrait, UnOp, VarDecl,
};

use crate::parse::Parser;
use crate::tpl::SubstMap;

/// Named constraint expressions
#[derive(Default)]
pub struct ConceptRegistry {
    map: StrIdMap<NodeId>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: StrId, decl: NodeId) {
        self.map.insert(name, decl);
    }

    pub fn lookup(&self, name: StrId) -> Option<NodeId> {
        self.map.get(&name).copied()
    }

    pub fn contains(&self, name: StrId) -> bool {
        self.map.contains_key(&name)
    }
}

/// Result of evaluating a constraint against concrete arguments
#[derive(Debug, Clone, Default)]
pub struct ConceptOutcome {
    pub satisfied: bool,
    pub error_message: String,
    pub failed_requirement: String,
    pub suggestion: String,
}

impl ConceptOutcome {
    pub fn ok() -> Self {
        Self {
            satisfied: true,
            ..Default::default()
        }
    }

    pub fn fail(
        message: impl Into<String>,
        requirement: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            satisfied: false,
            error_message: message.into(),
            failed_requirement: requirement.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl<'s> Parser<'s> {
    /// Evaluate a named concept against an argument list
    pub fn eval_concept(&mut self, name: StrId, args: Vec<TplArg>) -> SemaResult<ConceptOutcome> {
        let Some(decl_node) = self.sess.concepts.lookup(name) else {
            return Err(SemaError::subst(format!(
                "'{}' does not name a concept",
                self.sess.view(name)
            )));
        };
        let decl = self
            .sess
            .nodes
            .concept_decl(decl_node)
            .cloned()
            .ok_or_else(|| SemaError::subst("concept registry entry is not a concept"))?;
        if args.len() > decl.tparams.len() {
            return Ok(ConceptOutcome::fail(
                format!(
                    "concept '{}' takes {} argument(s), {} given",
                    self.sess.view(name),
                    decl.tparams.len(),
                    args.len()
                ),
                self.sess.view(name).to_string(),
                "check the argument list",
            ));
        }
        let mut map = SubstMap::default();
        for (p, a) in decl.tparams.iter().zip(args.iter()) {
            map.insert(p.name, a.clone());
        }
        let mut outcome = self.eval_constraint(decl.expr, &map)?;
        if !outcome.satisfied && outcome.failed_requirement.is_empty() {
            outcome.failed_requirement = self.sess.view(name).to_string();
        }
        Ok(outcome)
    }

    /// Evaluate one constraint expression under a binding map. Logical
    /// combinations short-circuit; requires-expressions check
    /// well-formedness of their operands in SFINAE mode.
    pub fn eval_constraint(&mut self, expr: NodeId, map: &SubstMap) -> SemaResult<ConceptOutcome> {
        let e = self
            .sess
            .nodes
            .expr(expr)
            .cloned()
            .ok_or_else(|| SemaError::subst("constraint is not an expression"))?;
        match e {
            Expr::Binary {
                op: BinOp::And,
                lhs,
                rhs,
            } => {
                let left = self.eval_constraint(lhs, map)?;
                if !left.satisfied {
                    return Ok(left);
                }
                self.eval_constraint(rhs, map)
            }
            Expr::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
            } => {
                let left = self.eval_constraint(lhs, map)?;
                if left.satisfied {
                    return Ok(left);
                }
                let right = self.eval_constraint(rhs, map)?;
                if right.satisfied {
                    return Ok(right);
                }
                Ok(ConceptOutcome::fail(
                    format!(
                        "neither alternative satisfied: {} / {}",
                        left.error_message, right.error_message
                    ),
                    left.failed_requirement,
                    right.suggestion,
                ))
            }
            Expr::Unary {
                op: UnOp::Not,
                operand,
            } => {
                let inner = self.eval_constraint(operand, map)?;
                if inner.satisfied {
                    Ok(ConceptOutcome::fail(
                        "negated constraint was satisfied",
                        "!...",
                        "",
                    ))
                } else {
                    Ok(ConceptOutcome::ok())
                }
            }
            Expr::TypeTraitCall { which, args } => {
                let mut subbed = vec![];
                for t in &args {
                    subbed.push(self.subst_type(t, map)?);
                }
                if self.eval_type_trait(which, &subbed)? {
                    Ok(ConceptOutcome::ok())
                } else {
                    let printed: Vec<String> = subbed
                        .iter()
                        .map(|t| t.key_string(&self.sess.strings))
                        .collect();
                    Ok(ConceptOutcome::fail(
                        format!("{which:?} is false for ({})", printed.join(", ")),
                        format!("{which:?}"),
                        "use a type satisfying the trait",
                    ))
                }
            }
            Expr::TemplateId { name, args } => {
                let mut subbed = vec![];
                for a in &args {
                    subbed.extend(self.subst_tplarg(a, map)?);
                }
                self.eval_concept(name, subbed)
            }
            Expr::Ident(name) if self.sess.concepts.contains(name) => {
                self.eval_concept(name, vec![])
            }
            Expr::Requires(req) => {
                let req = self.clone_requires(&req, map)?;
                self.eval_requires(&req, map)
            }
            _ => {
                // an ordinary boolean constant expression
                match self.eval_const(expr, map) {
                    Ok(v) if v != 0 => Ok(ConceptOutcome::ok()),
                    Ok(_) => Ok(ConceptOutcome::fail(
                        "constraint expression evaluated to false",
                        "boolean constraint",
                        "",
                    )),
                    Err(e) => Ok(ConceptOutcome::fail(
                        format!("constraint could not be evaluated: {e}"),
                        "boolean constraint",
                        "",
                    )),
                }
            }
        }
    }

    fn clone_requires(
        &mut self,
        req: &embercc_sema::RequiresExpr,
        map: &SubstMap,
    ) -> SemaResult<embercc_sema::RequiresExpr> {
        // substitute parameter types up front so the local scope sees
        // concrete types
        let mut params = vec![];
        for p in &req.params {
            params.push(Param {
                name: p.name,
                ty: self.subst_type(&p.ty, map)?,
                default: p.default,
                is_pack: p.is_pack,
            });
        }
        Ok(embercc_sema::RequiresExpr {
            params,
            requirements: req.requirements.clone(),
        })
    }

    fn eval_requires(
        &mut self,
        req: &embercc_sema::RequiresExpr,
        map: &SubstMap,
    ) -> SemaResult<ConceptOutcome> {
        self.sess.symbols.enter_scope(ScopeKind::Block);
        for p in &req.params {
            let var = self.sess.nodes.alloc(Node::Var(VarDecl {
                name: p.name,
                ty: p.ty.clone(),
                init: None,
                storage: StorageOpts::default(),
                namespace: vec![],
            }));
            self.sess.symbols.insert(p.name, var);
        }
        let outcome = self.eval_requirements(&req.requirements, map);
        self.sess.symbols.exit_scope();
        outcome
    }

    fn eval_requirements(
        &mut self,
        requirements: &[Requirement],
        map: &SubstMap,
    ) -> SemaResult<ConceptOutcome> {
        for r in requirements {
            match r {
                Requirement::Expr(e) => {
                    let sub = self.subst_expr(*e, map)?;
                    if let Err(err) = self.type_of_expr(sub) {
                        return Ok(ConceptOutcome::fail(
                            format!("required expression is ill-formed: {err}"),
                            "{ expression }",
                            "provide the required member or operator",
                        ));
                    }
                }
                Requirement::Type(t) => {
                    let sub = self.subst_type(t, map)?;
                    if sub.is_dependent()
                        || (sub.base.is_user_defined() && !sub.index.is_valid())
                    {
                        return Ok(ConceptOutcome::fail(
                            format!(
                                "required type '{}' does not exist",
                                sub.key_string(&self.sess.strings)
                            ),
                            "typename requirement",
                            "provide the nested type",
                        ));
                    }
                }
                Requirement::Compound { expr, constraint } => {
                    let sub = self.subst_expr(*expr, map)?;
                    let ty = match self.type_of_expr(sub) {
                        Ok(t) => t,
                        Err(err) => {
                            return Ok(ConceptOutcome::fail(
                                format!("required expression is ill-formed: {err}"),
                                "{ expression } -> constraint",
                                "provide the required member or operator",
                            ));
                        }
                    };
                    if let Some((concept, extra)) = constraint {
                        let mut args = vec![TplArg::Type(ty.without_ref())];
                        for a in extra {
                            args.extend(self.subst_tplarg(a, map)?);
                        }
                        let outcome = self.eval_concept(*concept, args)?;
                        if !outcome.satisfied {
                            return Ok(outcome);
                        }
                    }
                }
            }
        }
        Ok(ConceptOutcome::ok())
    }

    /// Atomic type-trait evaluation over resolved types
    pub fn eval_type_trait(&mut self, which: TypeTrait, args: &[TypeSpecifier]) -> SemaResult<bool> {
        if args.len() < which.arity() {
            return Err(SemaError::subst(format!(
                "{which:?} expects {} argument(s)",
                which.arity()
            )));
        }
        let t = &args[0];
        Ok(match which {
            TypeTrait::IsIntegral => t.is_integral_value(),
            TypeTrait::IsFloatingPoint => t.ptr.is_empty() && t.base.is_floating(),
            TypeTrait::IsArithmetic => t.ptr.is_empty() && t.base.is_arithmetic(),
            TypeTrait::IsPointer => !t.ptr.is_empty(),
            TypeTrait::IsReference => t.is_reference(),
            TypeTrait::IsLvalueReference => t.ref_qual == embercc_sema::RefQual::LValue,
            TypeTrait::IsRvalueReference => t.ref_qual == embercc_sema::RefQual::RValue,
            TypeTrait::IsVoid => t.is_void(),
            TypeTrait::IsConst => t.cv.is_const,
            TypeTrait::IsClass => {
                t.ptr.is_empty()
                    && matches!(t.base, BaseType::Struct | BaseType::UserDefined)
                    && self
                        .sess
                        .types
                        .get(t.index)
                        .and_then(|i| i.strukt.as_ref())
                        .is_some_and(|s| !s.is_union)
            }
            TypeTrait::IsUnion => {
                t.ptr.is_empty()
                    && self
                        .sess
                        .types
                        .get(t.index)
                        .and_then(|i| i.strukt.as_ref())
                        .is_some_and(|s| s.is_union)
            }
            TypeTrait::IsEnum => t.ptr.is_empty() && t.base == BaseType::Enum,
            // exact comparison: cv and reference qualifiers distinguish
            TypeTrait::IsSame => args[0] == args[1],
            TypeTrait::IsBaseOf => {
                let base = &args[0];
                let derived = &args[1];
                self.is_base_of(base.index, derived.index)
            }
        })
    }

    fn is_base_of(&self, base: embercc_sema::TypeId, derived: embercc_sema::TypeId) -> bool {
        if !base.is_valid() || !derived.is_valid() {
            return false;
        }
        if base == derived {
            return true;
        }
        let Some(info) = self.sess.types.get(derived) else {
            return false;
        };
        let Some(s) = &info.strukt else {
            return false;
        };
        s.bases.iter().any(|b| self.is_base_of(base, b.index))
    }
}
