use cu::pre::*;
use embercc_sema::{
    BaseType, BinOp, Cv, Expr, NodeId, RefQual, SemaError, SemaResult, TplArg, TypeSpecifier, UnOp,
};

use crate::parse::Parser;

/// Restricted expression type checking
///
/// This is the "run overload resolution in SFINAE mode" primitive: it
/// resolves call argument types for deduction, types decltype operands, and
/// answers well-formedness questions for requires-expressions. Lvalue
/// expressions come back with an lvalue reference qualifier so forwarding
/// deduction can collapse correctly; prvalues come back unreferenced.
impl<'s> Parser<'s> {
    pub fn type_of_expr(&mut self, id: NodeId) -> SemaResult<TypeSpecifier> {
        let expr = self
            .sess
            .nodes
            .expr(id)
            .cloned()
            .ok_or_else(|| SemaError::subst("type query target is not an expression"))?;
        match expr {
            Expr::IntLit { ty, .. } => Ok(TypeSpecifier::prim(ty)),
            Expr::FloatLit { ty, .. } => Ok(TypeSpecifier::prim(ty)),
            Expr::BoolLit(_) => Ok(TypeSpecifier::prim(BaseType::Bool)),
            Expr::CharLit(_) => Ok(TypeSpecifier::prim(BaseType::Char)),
            Expr::NullptrLit => Ok(TypeSpecifier::prim(BaseType::Nullptr)),
            Expr::StrLit(_) => {
                let mut t = TypeSpecifier::prim(BaseType::Char);
                t.cv = Cv::CONST;
                t.ptr.push(Cv::NONE);
                Ok(t)
            }
            Expr::Ident(name) | Expr::TemplateParamRef(name) => {
                if let Some(binding) = self.sess.subst_lookup(name).cloned() {
                    return match binding {
                        TplArg::Type(t) => Ok(t),
                        TplArg::Value(_) => Ok(TypeSpecifier::prim(BaseType::LongLong)),
                        TplArg::Expr(e) => self.type_of_expr(e),
                        other => Err(SemaError::subst(format!(
                            "cannot type binding {other:?}"
                        ))),
                    };
                }
                let Some(node) = self.sess.symbols.lookup(name) else {
                    // members of the enclosing struct resolve unqualified
                    if let Some(sid) = self.sess.symbols.current_struct()
                        && let Some(s) = self.sess.types.get(sid).and_then(|i| i.strukt.as_ref())
                    {
                        if let Some(m) = s.member(name) {
                            return Ok(m.ty.with_collapsed_ref(RefQual::LValue));
                        }
                        if let Some(sm) = s.static_member(name) {
                            return Ok(sm.ty.with_collapsed_ref(RefQual::LValue));
                        }
                    }
                    return Err(SemaError::subst(format!(
                        "use of undeclared identifier '{}'",
                        self.sess.view(name)
                    )));
                };
                if let Some(var) = self.sess.nodes.var(node) {
                    // named objects are lvalues
                    return Ok(var.ty.with_collapsed_ref(RefQual::LValue));
                }
                if let Some(f) = self.sess.nodes.func(node) {
                    let mut t = TypeSpecifier::prim(BaseType::Function);
                    t.name = f.name;
                    return Ok(t);
                }
                Err(SemaError::subst(format!(
                    "'{}' is not an object or function",
                    self.sess.view(name)
                )))
            }
            Expr::Member { base, name, arrow } => {
                let base_ty = self.type_of_expr(base)?;
                let class_ty = if arrow {
                    if base_ty.ptr.is_empty() {
                        return Err(SemaError::subst("'->' on a non-pointer"));
                    }
                    let mut t = base_ty.clone();
                    t.ptr.pop();
                    t
                } else {
                    base_ty
                };
                let info = self
                    .sess
                    .types
                    .get(class_ty.index)
                    .ok_or_else(|| SemaError::subst("member access on a non-class type"))?;
                let s = info
                    .strukt
                    .as_ref()
                    .ok_or_else(|| SemaError::subst("member access on a non-class type"))?;
                if let Some(m) = s.member(name) {
                    return Ok(m.ty.with_collapsed_ref(RefQual::LValue));
                }
                if let Some(sm) = s.static_member(name) {
                    return Ok(sm.ty.with_collapsed_ref(RefQual::LValue));
                }
                Err(SemaError::subst(format!(
                    "no member '{}' in '{}'",
                    self.sess.view(name),
                    self.sess.view(info.name)
                )))
            }
            Expr::Unary { op, operand } => {
                let t = self.type_of_expr(operand)?;
                match op {
                    UnOp::Deref => {
                        let mut t = t.without_ref();
                        if t.ptr.pop().is_none() {
                            return Err(SemaError::subst("dereference of a non-pointer"));
                        }
                        Ok(t.with_collapsed_ref(RefQual::LValue))
                    }
                    UnOp::AddrOf => {
                        let mut t = t.without_ref();
                        t.ptr.push(Cv::NONE);
                        Ok(t)
                    }
                    UnOp::Not => Ok(TypeSpecifier::prim(BaseType::Bool)),
                    UnOp::PreInc | UnOp::PreDec => Ok(t),
                    UnOp::PostInc | UnOp::PostDec => Ok(t.without_ref()),
                    UnOp::Plus | UnOp::Neg | UnOp::BitNot => Ok(t.without_ref()),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.type_of_expr(lhs)?;
                match op {
                    BinOp::Eq
                    | BinOp::Ne
                    | BinOp::Lt
                    | BinOp::Gt
                    | BinOp::Le
                    | BinOp::Ge
                    | BinOp::And
                    | BinOp::Or => Ok(TypeSpecifier::prim(BaseType::Bool)),
                    BinOp::Assign | BinOp::AddAssign | BinOp::SubAssign => Ok(a),
                    // both operands must be well-formed, the right one
                    // gives the type
                    BinOp::Comma => self.type_of_expr(rhs),
                    _ => {
                        let b = self.type_of_expr(rhs)?;
                        Ok(usual_arithmetic(&a, &b))
                    }
                }
            }
            Expr::Ternary { then_e, .. } => {
                let t = self.type_of_expr(then_e)?;
                Ok(t.without_ref())
            }
            Expr::Call { callee, args } => self.type_of_call(callee, &args),
            Expr::Index { base, index: _ } => {
                let mut t = self.type_of_expr(base)?.without_ref();
                if t.is_array {
                    t.is_array = false;
                    t.array_len = None;
                } else if t.ptr.pop().is_none() {
                    return Err(SemaError::subst("subscript on a non-array, non-pointer"));
                }
                Ok(t.with_collapsed_ref(RefQual::LValue))
            }
            Expr::Cast { ty, .. } => Ok(ty),
            Expr::CtorCall { ty, .. } => Ok(ty),
            Expr::SizeofType(_) | Expr::SizeofExpr(_) | Expr::SizeofPack(_) => {
                Ok(TypeSpecifier::prim(BaseType::UnsignedLongLong))
            }
            Expr::Fold { op, .. } => Ok(TypeSpecifier::prim(match op {
                BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => BaseType::Bool,
                _ => BaseType::LongLong,
            })),
            Expr::TypeTraitCall { .. } | Expr::Requires(_) => {
                Ok(TypeSpecifier::prim(BaseType::Bool))
            }
            Expr::Decltype(e) => self.type_of_expr(e),
            Expr::Qualified { segs } => {
                let Some((last, prefix)) = segs.split_last() else {
                    return Err(SemaError::subst("empty qualified name"));
                };
                if prefix.len() == 1 {
                    let map = crate::tpl::SubstMap::default();
                    let head = self.resolve_qualified_head(&prefix[0], &map)?;
                    let info = self
                        .sess
                        .types
                        .get(head)
                        .ok_or_else(|| SemaError::subst("unresolved qualified head"))?;
                    if let Some(e) = &info.enum_info {
                        if e.enumerators.iter().any(|en| en.name == last.name) {
                            return Ok(TypeSpecifier::named(
                                BaseType::Enum,
                                info.name,
                                info.index,
                            ));
                        }
                    }
                    if let Some(s) = &info.strukt
                        && let Some(sm) = s.static_member(last.name)
                    {
                        return Ok(sm.ty.with_collapsed_ref(RefQual::LValue));
                    }
                }
                let path: Vec<_> = segs.iter().map(|s| s.name).collect();
                if let Some(node) = self.sess.symbols.lookup_qualified(&path)
                    && let Some(var) = self.sess.nodes.var(node)
                {
                    return Ok(var.ty.with_collapsed_ref(RefQual::LValue));
                }
                Err(SemaError::subst("unresolved qualified name"))
            }
            Expr::TemplateId { .. } => Err(SemaError::subst(
                "template name is not an expression by itself",
            )),
            Expr::PackExpansion(_) => Err(SemaError::subst(
                "pack expansion outside an argument list",
            )),
        }
    }

    /// Resolve a call expression to its result type; this is where the
    /// instantiation engine is entered from expression context.
    fn type_of_call(&mut self, callee: NodeId, args: &[NodeId]) -> SemaResult<TypeSpecifier> {
        let mut arg_types = vec![];
        for a in args {
            arg_types.push(self.type_of_expr(*a)?);
        }
        let callee_expr = self
            .sess
            .nodes
            .expr(callee)
            .cloned()
            .ok_or_else(|| SemaError::subst("callee is not an expression"))?;
        match callee_expr {
            Expr::Ident(name) => {
                // concrete functions win over templates
                if let Some(node) = self.sess.symbols.lookup(name)
                    && let Some(f) = self.sess.nodes.func(node)
                {
                    return Ok(f.ret.clone());
                }
                if let Some(f) = self.try_instantiate_function(name, &arg_types, args.len())? {
                    let ret = self
                        .sess
                        .nodes
                        .func(f)
                        .map(|d| d.ret.clone())
                        .ok_or_else(|| SemaError::subst("instantiation produced a non-function"))?;
                    return Ok(ret);
                }
                Err(SemaError::subst(format!(
                    "no matching function for call to '{}'",
                    self.sess.view(name)
                )))
            }
            Expr::TemplateId { name, args: targs } => {
                if let Some(f) =
                    self.try_instantiate_function_explicit(name, targs, &arg_types, args.len())?
                {
                    let ret = self
                        .sess
                        .nodes
                        .func(f)
                        .map(|d| d.ret.clone())
                        .ok_or_else(|| SemaError::subst("instantiation produced a non-function"))?;
                    return Ok(ret);
                }
                Err(SemaError::subst(format!(
                    "no matching function template for '{}'",
                    self.sess.view(name)
                )))
            }
            Expr::Member { base, name, arrow } => {
                let base_ty = self.type_of_expr(base)?;
                let class_ty = if arrow {
                    let mut t = base_ty.clone();
                    if t.ptr.pop().is_none() {
                        return Err(SemaError::subst("'->' on a non-pointer"));
                    }
                    t
                } else {
                    base_ty
                };
                if !class_ty.index.is_valid() {
                    return Err(SemaError::subst("member call on a non-class type"));
                }
                // a lazily registered body is realized on first call
                self.realize_lazy_method(class_ty.index, name)?;
                let info = self
                    .sess
                    .types
                    .get(class_ty.index)
                    .ok_or_else(|| SemaError::subst("member call on an unregistered type"))?;
                let s = info
                    .strukt
                    .as_ref()
                    .ok_or_else(|| SemaError::subst("member call on a non-class type"))?;
                for m in &s.methods {
                    if let Some(f) = self.sess.nodes.func(*m)
                        && f.name == name
                    {
                        return Ok(f.ret.clone());
                    }
                }
                Err(SemaError::subst(format!(
                    "no member function '{}' in '{}'",
                    self.sess.view(name),
                    self.sess.view(info.name)
                )))
            }
            Expr::Qualified { segs } => {
                let path: Vec<_> = segs.iter().map(|s| s.name).collect();
                if let Some(node) = self.sess.symbols.lookup_qualified(&path)
                    && let Some(f) = self.sess.nodes.func(node)
                {
                    return Ok(f.ret.clone());
                }
                // the template registry keys namespace members by their
                // qualified name
                let joined = path
                    .iter()
                    .map(|s| self.sess.view(*s))
                    .collect::<Vec<_>>()
                    .join("::");
                let qid = self.sess.strings.intern(&joined);
                if self.sess.templates.get(qid).is_some()
                    && let Some(f) = self.try_instantiate_function(qid, &arg_types, args.len())?
                    && let Some(d) = self.sess.nodes.func(f)
                {
                    return Ok(d.ret.clone());
                }
                if let Some((last, _)) = path.split_last()
                    && let Some(f) = self.try_instantiate_function(*last, &arg_types, args.len())?
                    && let Some(d) = self.sess.nodes.func(f)
                {
                    return Ok(d.ret.clone());
                }
                Err(SemaError::subst("no matching qualified function"))
            }
            _ => {
                // calling through an expression: function pointers
                let t = self.type_of_expr(callee)?;
                if t.base == BaseType::Function {
                    return Err(SemaError::subst(
                        "cannot type an indirect function call without a signature",
                    ));
                }
                Err(SemaError::subst("called object is not a function"))
            }
        }
    }
}

impl<'s> Parser<'s> {
    /// Type-check a statement-level expression when it contains calls, so
    /// template-ids at call sites enter the instantiation engine during
    /// parsing. Failures surface as diagnostics; parsing continues.
    pub(crate) fn typecheck_statement_expr(&mut self, e: NodeId) {
        if self.in_dependent_context() || !self.expr_contains_call(e) {
            return;
        }
        if let Err(err) = self.type_of_expr(e) {
            self.sess.diags.error(err.to_string());
        }
    }

    fn expr_contains_call(&self, e: NodeId) -> bool {
        let Some(expr) = self.sess.nodes.expr(e) else {
            return false;
        };
        match expr {
            Expr::Call { .. } => true,
            Expr::Unary { operand, .. } => self.expr_contains_call(*operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr_contains_call(*lhs) || self.expr_contains_call(*rhs)
            }
            Expr::Ternary {
                cond,
                then_e,
                else_e,
            } => {
                self.expr_contains_call(*cond)
                    || self.expr_contains_call(*then_e)
                    || self.expr_contains_call(*else_e)
            }
            Expr::Member { base, .. } => self.expr_contains_call(*base),
            Expr::Index { base, index } => {
                self.expr_contains_call(*base) || self.expr_contains_call(*index)
            }
            Expr::Cast { operand, .. } => self.expr_contains_call(*operand),
            Expr::CtorCall { args, .. } => args.iter().any(|a| self.expr_contains_call(*a)),
            _ => false,
        }
    }
}

/// The usual arithmetic conversions, reduced to a rank ladder
fn usual_arithmetic(a: &TypeSpecifier, b: &TypeSpecifier) -> TypeSpecifier {
    if !a.ptr.is_empty() {
        return a.without_ref();
    }
    if !b.ptr.is_empty() {
        return b.without_ref();
    }
    let rank = |t: &TypeSpecifier| match t.base {
        BaseType::LongDouble => 13,
        BaseType::Double => 12,
        BaseType::Float => 11,
        BaseType::UnsignedLongLong => 10,
        BaseType::LongLong => 9,
        BaseType::UnsignedLong => 8,
        BaseType::Long => 7,
        BaseType::UnsignedInt => 6,
        _ => 5,
    };
    let winner = if rank(a) >= rank(b) { a } else { b };
    let mut out = winner.without_ref();
    out.cv = Cv::NONE;
    // everything below int promotes to int
    if out.base.is_integral() && rank(winner) == 5 {
        out = TypeSpecifier::prim(BaseType::Int);
    }
    out
}
