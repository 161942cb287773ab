use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    BaseType, BinOp, Expr, Node, NodeId, Param, QualSeg, RefQual, Requirement, RequiresExpr,
    SemaError, SemaResult, TplArg, TypeSpecifier,
};
use fxhash::FxHashMap;

use crate::parse::Parser;

/// A binding of one template parameter name
pub type TplBinding = TplArg;

/// Ordered parameter-name -> argument map for one substitution context
///
/// Insertion order is the template parameter order, which is what turns a
/// map back into an argument list for cache keys and mangling.
#[derive(Debug, Clone, Default)]
pub struct SubstMap {
    map: FxHashMap<StrId, TplArg>,
    order: Vec<StrId>,
}

impl SubstMap {
    pub fn insert(&mut self, name: StrId, arg: TplArg) {
        if !self.map.contains_key(&name) {
            self.order.push(name);
        }
        self.map.insert(name, arg);
    }

    pub fn get(&self, name: StrId) -> Option<&TplArg> {
        self.map.get(&name)
    }

    pub fn contains(&self, name: StrId) -> bool {
        self.map.contains_key(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Bound names in template parameter order
    pub fn names(&self) -> &[StrId] {
        &self.order
    }

    /// Arguments in template parameter order
    pub fn args_in_order(&self) -> Vec<TplArg> {
        self.order
            .iter()
            .filter_map(|n| self.map.get(n).cloned())
            .collect()
    }

    /// Names bound to packs
    pub fn pack_names(&self) -> Vec<StrId> {
        self.order
            .iter()
            .filter(|n| matches!(self.map.get(n), Some(TplArg::Pack(_))))
            .copied()
            .collect()
    }
}

impl<'s> Parser<'s> {
    /// Rewrite a type use under a substitution map, preserving CV, pointer
    /// levels and the reference qualifier, with reference collapsing when a
    /// bound reference type flows through a referenced parameter.
    pub fn subst_type(&mut self, spec: &TypeSpecifier, map: &SubstMap) -> SemaResult<TypeSpecifier> {
        // a parameter name resolves to its binding
        if let Some(pname) = spec.tparam {
            let binding = map
                .get(pname)
                .or_else(|| self.sess.subst_lookup(pname))
                .cloned();
            return match binding {
                Some(TplArg::Type(bound)) => {
                    let merged = merge_decorations(&bound, spec);
                    self.resolve_member_tail(merged)
                }
                Some(TplArg::Template(tpl_name)) => {
                    // template-template parameter applied to arguments
                    let mut inner = spec.clone();
                    inner.tparam = None;
                    inner.name = tpl_name;
                    inner.base = BaseType::UserDefined;
                    self.subst_type(&inner, map)
                }
                Some(TplArg::Value(_)) | Some(TplArg::Expr(_)) => Err(SemaError::subst(format!(
                    "non-type argument used in type position for parameter '{}'",
                    self.sess.view(pname)
                ))),
                Some(TplArg::Pack(_)) => Err(SemaError::subst(format!(
                    "parameter pack '{}' used outside an expansion",
                    self.sess.view(pname)
                ))),
                None => Ok(spec.clone()),
            };
        }

        let mut out = spec.clone();

        // dependent array length
        if let Some(len_expr) = spec.array_len_expr {
            match self.eval_const(len_expr, map) {
                Ok(v) if v >= 0 => {
                    out.array_len = Some(v as u64);
                    out.array_len_expr = None;
                }
                Ok(v) => {
                    return Err(SemaError::subst(format!("negative array length {v}")));
                }
                Err(e) => {
                    if !map.is_empty() || !self.sess.subst_stack.is_empty() {
                        return Err(e);
                    }
                }
            }
        }

        // decltype is substituted then type-checked
        if let Some(dex) = spec.decltype_of {
            let sub = self.subst_expr(dex, map)?;
            let mut resolved = self.type_of_expr(sub)?;
            resolved = merge_decorations(&resolved, spec);
            resolved.decltype_of = None;
            return Ok(resolved);
        }

        // template-id: substitute arguments, then instantiate if concrete
        if !spec.template_args.is_empty() {
            let mut args = vec![];
            for a in &spec.template_args {
                args.extend(self.subst_tplarg(a, map)?);
            }
            out.template_args = args;
            if out.template_args.iter().all(|a| !a.is_dependent()) {
                out.dependent = false;
                return self.resolve_template_id_type(out);
            }
            return Ok(out);
        }

        if let Some(member) = spec.member
            && spec.index.is_valid()
        {
            // concrete base, dependent member tail
            let class_name = self
                .sess
                .types
                .get(spec.index)
                .map(|i| i.name)
                .unwrap_or(StrId::INVALID);
            if let Some(target) = self.sess.templates.member_alias(class_name, member).cloned() {
                let mut shell = spec.clone();
                shell.member = None;
                return Ok(merge_decorations(&target, &shell));
            }
        }

        Ok(out)
    }

    /// Substitute one template argument; packs splice into several
    pub fn subst_tplarg(&mut self, arg: &TplArg, map: &SubstMap) -> SemaResult<Vec<TplArg>> {
        match arg {
            TplArg::Type(t) => {
                // a bare pack name in argument position expands in place
                if let Some(pname) = t.tparam
                    && t.ptr.is_empty()
                    && t.ref_qual == RefQual::None
                    && let Some(TplArg::Pack(elems)) =
                        map.get(pname).or_else(|| self.sess.subst_lookup(pname))
                {
                    return Ok(elems.clone());
                }
                Ok(vec![TplArg::Type(self.subst_type(t, map)?)])
            }
            TplArg::Expr(e) => {
                let sub = self.subst_expr(*e, map)?;
                match self.eval_const(sub, map) {
                    Ok(v) => Ok(vec![TplArg::Value(v)]),
                    Err(_) => Ok(vec![TplArg::Expr(sub)]),
                }
            }
            TplArg::Value(v) => Ok(vec![TplArg::Value(*v)]),
            TplArg::Template(name) => {
                if let Some(TplArg::Template(bound)) =
                    map.get(*name).or_else(|| self.sess.subst_lookup(*name))
                {
                    Ok(vec![TplArg::Template(*bound)])
                } else {
                    Ok(vec![TplArg::Template(*name)])
                }
            }
            TplArg::Pack(elems) => {
                let mut out = vec![];
                for e in elems {
                    out.extend(self.subst_tplarg(e, map)?);
                }
                Ok(vec![TplArg::Pack(out)])
            }
        }
    }

    /// Deep-copy an expression subtree with substitutions applied.
    /// Substituting with an empty map is a structure-preserving copy.
    pub fn subst_expr(&mut self, id: NodeId, map: &SubstMap) -> SemaResult<NodeId> {
        let expr = self
            .sess
            .nodes
            .expr(id)
            .cloned()
            .ok_or_else(|| SemaError::subst("substitution target is not an expression"))?;
        let new = match expr {
            Expr::Ident(name) | Expr::TemplateParamRef(name) => {
                match map.get(name).or_else(|| self.sess.subst_lookup(name)).cloned() {
                    Some(TplArg::Value(v)) => Expr::IntLit {
                        value: v,
                        ty: BaseType::LongLong,
                    },
                    Some(TplArg::Type(t)) => {
                        // a type name in expression position stays a name;
                        // rewrite to the concrete type's name when known
                        if t.name.is_valid() {
                            Expr::Ident(t.name)
                        } else {
                            Expr::Ident(name)
                        }
                    }
                    Some(TplArg::Expr(e)) => return self.subst_expr(e, map),
                    _ => Expr::Ident(name),
                }
            }
            Expr::SizeofPack(name) => {
                match map.get(name).or_else(|| self.sess.subst_lookup(name)) {
                    Some(TplArg::Pack(elems)) => Expr::IntLit {
                        value: elems.len() as i64,
                        ty: BaseType::UnsignedLongLong,
                    },
                    _ => Expr::SizeofPack(name),
                }
            }
            Expr::Fold {
                op,
                pack,
                init,
                right_fold,
            } => {
                return self.expand_fold(op, pack, init, right_fold, map);
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: self.subst_expr(operand, map)?,
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: self.subst_expr(lhs, map)?,
                rhs: self.subst_expr(rhs, map)?,
            },
            Expr::Ternary {
                cond,
                then_e,
                else_e,
            } => Expr::Ternary {
                cond: self.subst_expr(cond, map)?,
                then_e: self.subst_expr(then_e, map)?,
                else_e: self.subst_expr(else_e, map)?,
            },
            Expr::Call { callee, args } => {
                let callee = self.subst_expr(callee, map)?;
                let mut new_args = vec![];
                for a in args {
                    // pack expansions in argument lists splice elementwise
                    if let Some(Expr::PackExpansion(inner)) = self.sess.nodes.expr(a).cloned() {
                        new_args.extend(self.expand_pack_args(inner, map)?);
                    } else {
                        new_args.push(self.subst_expr(a, map)?);
                    }
                }
                Expr::Call {
                    callee,
                    args: new_args,
                }
            }
            Expr::Member { base, name, arrow } => Expr::Member {
                base: self.subst_expr(base, map)?,
                name,
                arrow,
            },
            Expr::Index { base, index } => Expr::Index {
                base: self.subst_expr(base, map)?,
                index: self.subst_expr(index, map)?,
            },
            Expr::Cast { kind, ty, operand } => Expr::Cast {
                kind,
                ty: self.subst_type(&ty, map)?,
                operand: self.subst_expr(operand, map)?,
            },
            Expr::CtorCall { ty, args } => {
                let ty = self.subst_type(&ty, map)?;
                let mut new_args = vec![];
                for a in args {
                    new_args.push(self.subst_expr(a, map)?);
                }
                Expr::CtorCall { ty, args: new_args }
            }
            Expr::SizeofType(t) => Expr::SizeofType(self.subst_type(&t, map)?),
            Expr::SizeofExpr(e) => Expr::SizeofExpr(self.subst_expr(e, map)?),
            Expr::TypeTraitCall { which, args } => {
                let mut new_args = vec![];
                for t in &args {
                    new_args.push(self.subst_type(t, map)?);
                }
                Expr::TypeTraitCall {
                    which,
                    args: new_args,
                }
            }
            Expr::Decltype(e) => Expr::Decltype(self.subst_expr(e, map)?),
            Expr::Qualified { segs } => {
                let mut new_segs = vec![];
                for (i, seg) in segs.iter().enumerate() {
                    let mut new_seg = QualSeg {
                        name: seg.name,
                        args: None,
                    };
                    if let Some(args) = &seg.args {
                        let mut new_args = vec![];
                        for a in args {
                            new_args.extend(self.subst_tplarg(a, map)?);
                        }
                        new_seg.args = Some(new_args);
                    }
                    // the head segment may name a bound type parameter
                    if i == 0
                        && let Some(TplArg::Type(t)) =
                            map.get(seg.name).or_else(|| self.sess.subst_lookup(seg.name))
                        && t.name.is_valid()
                    {
                        new_seg.name = t.name;
                    }
                    new_segs.push(new_seg);
                }
                Expr::Qualified { segs: new_segs }
            }
            Expr::TemplateId { name, args } => {
                let mut new_args = vec![];
                for a in &args {
                    new_args.extend(self.subst_tplarg(a, map)?);
                }
                Expr::TemplateId {
                    name,
                    args: new_args,
                }
            }
            Expr::Requires(req) => Expr::Requires(self.subst_requires(&req, map)?),
            Expr::PackExpansion(inner) => Expr::PackExpansion(self.subst_expr(inner, map)?),
            lit @ (Expr::IntLit { .. }
            | Expr::FloatLit { .. }
            | Expr::BoolLit(_)
            | Expr::CharLit(_)
            | Expr::StrLit(_)
            | Expr::NullptrLit) => lit,
        };
        Ok(self.sess.nodes.alloc_expr(new))
    }

    /// Deep-copy a statement subtree with substitutions applied
    pub fn subst_stmt(&mut self, id: NodeId, map: &SubstMap) -> SemaResult<NodeId> {
        let node = self
            .sess
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| SemaError::subst("substitution target is not a node"))?;
        let new = match node {
            Node::Block(b) => {
                let mut stmts = vec![];
                for s in &b.stmts {
                    stmts.push(self.subst_stmt(*s, map)?);
                }
                Node::Block(embercc_sema::Block { stmts })
            }
            Node::Return(r) => Node::Return(embercc_sema::ReturnStmt {
                value: match r.value {
                    Some(v) => Some(self.subst_expr(v, map)?),
                    None => None,
                },
            }),
            Node::If(s) => Node::If(embercc_sema::IfStmt {
                cond: self.subst_expr(s.cond, map)?,
                then_branch: self.subst_stmt(s.then_branch, map)?,
                else_branch: match s.else_branch {
                    Some(e) => Some(self.subst_stmt(e, map)?),
                    None => None,
                },
                is_constexpr: s.is_constexpr,
            }),
            Node::While(s) => Node::While(embercc_sema::WhileStmt {
                cond: self.subst_expr(s.cond, map)?,
                body: self.subst_stmt(s.body, map)?,
            }),
            Node::For(s) => Node::For(embercc_sema::ForStmt {
                init: match s.init {
                    Some(i) => Some(self.subst_stmt(i, map)?),
                    None => None,
                },
                cond: match s.cond {
                    Some(c) => Some(self.subst_expr(c, map)?),
                    None => None,
                },
                step: match s.step {
                    Some(st) => Some(self.subst_expr(st, map)?),
                    None => None,
                },
                body: self.subst_stmt(s.body, map)?,
            }),
            Node::ExprStmt(e) => Node::ExprStmt(self.subst_expr(e, map)?),
            Node::Var(v) => Node::Var(embercc_sema::VarDecl {
                name: v.name,
                ty: self.subst_type(&v.ty, map)?,
                init: match v.init {
                    Some(i) => Some(self.subst_expr(i, map)?),
                    None => None,
                },
                storage: v.storage,
                namespace: v.namespace,
            }),
            Node::Alias(a) => Node::Alias(embercc_sema::AliasDecl {
                name: a.name,
                target: self.subst_type(&a.target, map)?,
            }),
            Node::StaticAssert(sa) => Node::StaticAssert(embercc_sema::StaticAssertDecl {
                cond: self.subst_expr(sa.cond, map)?,
                message: sa.message,
            }),
            Node::Expr(_) => return self.subst_expr(id, map),
            Node::Empty => Node::Empty,
            _ => return Ok(id),
        };
        Ok(self.sess.nodes.alloc(new))
    }

    fn subst_requires(&mut self, req: &RequiresExpr, map: &SubstMap) -> SemaResult<RequiresExpr> {
        let mut params = vec![];
        for p in &req.params {
            params.push(Param {
                name: p.name,
                ty: self.subst_type(&p.ty, map)?,
                default: p.default,
                is_pack: p.is_pack,
            });
        }
        let mut requirements = vec![];
        for r in &req.requirements {
            requirements.push(match r {
                Requirement::Expr(e) => Requirement::Expr(self.subst_expr(*e, map)?),
                Requirement::Type(t) => Requirement::Type(self.subst_type(t, map)?),
                Requirement::Compound { expr, constraint } => Requirement::Compound {
                    expr: self.subst_expr(*expr, map)?,
                    constraint: constraint.clone(),
                },
            });
        }
        Ok(RequiresExpr {
            params,
            requirements,
        })
    }

    /// Expand a fold expression. All-value packs constant-fold to a
    /// literal; anything else becomes an associativity-correct binary
    /// chain.
    fn expand_fold(
        &mut self,
        op: BinOp,
        pack: StrId,
        init: Option<NodeId>,
        right_fold: bool,
        map: &SubstMap,
    ) -> SemaResult<NodeId> {
        let Some(TplArg::Pack(elems)) = map
            .get(pack)
            .or_else(|| self.sess.subst_lookup(pack))
            .cloned()
        else {
            // not bound yet: keep the fold for a later substitution
            let init = match init {
                Some(e) => Some(self.subst_expr(e, map)?),
                None => None,
            };
            return Ok(self.sess.nodes.alloc_expr(Expr::Fold {
                op,
                pack,
                init,
                right_fold,
            }));
        };

        let values: Option<Vec<i64>> = elems
            .iter()
            .map(|e| match e {
                TplArg::Value(v) => Some(*v),
                _ => None,
            })
            .collect();

        if let Some(values) = values
            && init.is_none()
        {
            let folded = crate::tpl::fold_values(op, &values)?;
            return Ok(self.sess.nodes.alloc_expr(Expr::IntLit {
                value: folded,
                ty: if matches!(op, BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne) {
                    BaseType::Bool
                } else {
                    BaseType::LongLong
                },
            }));
        }

        // build the chain out of element expressions
        let mut nodes: Vec<NodeId> = vec![];
        for e in &elems {
            nodes.push(self.tplarg_to_expr(e)?);
        }
        if let Some(init) = init {
            let init = self.subst_expr(init, map)?;
            if right_fold {
                nodes.push(init);
            } else {
                nodes.insert(0, init);
            }
        }
        if nodes.is_empty() {
            let identity = match op {
                BinOp::And => Expr::BoolLit(true),
                BinOp::Or => Expr::BoolLit(false),
                _ => {
                    return Err(SemaError::subst(format!(
                        "empty fold over '{}' has no identity for operator {}",
                        self.sess.view(pack),
                        op.to_str()
                    )));
                }
            };
            return Ok(self.sess.nodes.alloc_expr(identity));
        }
        let chain = if right_fold {
            let mut it = nodes.into_iter().rev();
            let mut acc = it.next().expect("nonempty");
            for lhs in it {
                acc = self.sess.nodes.alloc_expr(Expr::Binary { op, lhs, rhs: acc });
            }
            acc
        } else {
            let mut it = nodes.into_iter();
            let mut acc = it.next().expect("nonempty");
            for rhs in it {
                acc = self.sess.nodes.alloc_expr(Expr::Binary { op, lhs: acc, rhs });
            }
            acc
        };
        Ok(chain)
    }

    fn tplarg_to_expr(&mut self, arg: &TplArg) -> SemaResult<NodeId> {
        let expr = match arg {
            TplArg::Value(v) => Expr::IntLit {
                value: *v,
                ty: BaseType::LongLong,
            },
            TplArg::Expr(e) => return Ok(*e),
            TplArg::Type(t) if t.name.is_valid() => Expr::Ident(t.name),
            other => {
                return Err(SemaError::subst(format!(
                    "pack element {other:?} cannot appear in an expression"
                )));
            }
        };
        Ok(self.sess.nodes.alloc_expr(expr))
    }

    /// Expand `inner...` against the packs bound in `map`
    fn expand_pack_args(&mut self, inner: NodeId, map: &SubstMap) -> SemaResult<Vec<NodeId>> {
        // find the pack referenced inside the expansion
        let Some(pack_name) = self.find_pack_ref(inner, map) else {
            return Ok(vec![self.subst_expr(inner, map)?]);
        };
        let Some(TplArg::Pack(elems)) = map
            .get(pack_name)
            .or_else(|| self.sess.subst_lookup(pack_name))
            .cloned()
        else {
            let kept = self.subst_expr(inner, map)?;
            return Ok(vec![self.sess.nodes.alloc_expr(Expr::PackExpansion(kept))]);
        };
        let mut out = vec![];
        for elem in &elems {
            let mut elem_map = map.clone();
            elem_map.insert(pack_name, elem.clone());
            out.push(self.subst_expr(inner, &elem_map)?);
        }
        Ok(out)
    }

    /// The first identifier inside `id` that is bound to a pack
    fn find_pack_ref(&self, id: NodeId, map: &SubstMap) -> Option<StrId> {
        let expr = self.sess.nodes.expr(id)?;
        let is_pack = |name: StrId| {
            matches!(
                map.get(name).or_else(|| self.sess.subst_lookup(name)),
                Some(TplArg::Pack(_))
            )
            .then_some(name)
        };
        match expr {
            Expr::Ident(n) | Expr::TemplateParamRef(n) => is_pack(*n),
            Expr::Unary { operand, .. } => self.find_pack_ref(*operand, map),
            Expr::Binary { lhs, rhs, .. } => self
                .find_pack_ref(*lhs, map)
                .or_else(|| self.find_pack_ref(*rhs, map)),
            Expr::Call { callee, args } => self.find_pack_ref(*callee, map).or_else(|| {
                args.iter().find_map(|a| self.find_pack_ref(*a, map))
            }),
            Expr::Member { base, .. } => self.find_pack_ref(*base, map),
            Expr::Cast { operand, .. } => self.find_pack_ref(*operand, map),
            _ => None,
        }
    }
}

/// Graft the declared decorations of `decl` (CV, pointer levels, reference,
/// array) onto a bound type, applying reference collapsing
pub(crate) fn merge_decorations(bound: &TypeSpecifier, decl: &TypeSpecifier) -> TypeSpecifier {
    let mut out = bound.clone();
    out.cv.is_const |= decl.cv.is_const;
    out.cv.is_volatile |= decl.cv.is_volatile;
    out.ptr.extend(decl.ptr.iter().copied());
    out.ref_qual = RefQual::collapse(bound.ref_qual, decl.ref_qual);
    if decl.is_array {
        out.is_array = true;
        out.array_len = decl.array_len;
        out.array_len_expr = decl.array_len_expr;
    }
    if decl.member.is_some() {
        out.member = decl.member;
    }
    out.size_bits = None;
    out.line = decl.line;
    out.col = decl.col;
    out
}
