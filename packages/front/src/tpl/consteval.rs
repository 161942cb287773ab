use cu::pre::*;
use embercc_sema::{
    BaseType, BinOp, Expr, NodeId, SemaError, SemaResult, TplArg, TypeId, UnOp,
};

use crate::parse::Parser;
use crate::tpl::SubstMap;

/// Constant-expression evaluation
///
/// Drives non-type template parameter defaults, bitfield widths, array
/// sizes, static_assert conditions and fold results. Anything still
/// dependent under the active substitution reports a substitution failure
/// rather than a hard error, so SFINAE trials can move on.
impl<'s> Parser<'s> {
    pub fn eval_const(&mut self, id: NodeId, map: &SubstMap) -> SemaResult<i64> {
        let expr = self
            .sess
            .nodes
            .expr(id)
            .cloned()
            .ok_or_else(|| SemaError::subst("constant evaluation target is not an expression"))?;
        match expr {
            Expr::IntLit { value, .. } => Ok(value),
            Expr::BoolLit(b) => Ok(b as i64),
            Expr::CharLit(c) => Ok(c as i64),
            Expr::NullptrLit => Ok(0),
            Expr::FloatLit { .. } => Err(SemaError::subst(
                "floating literal in integral constant expression",
            )),
            Expr::Ident(name) | Expr::TemplateParamRef(name) => {
                match map.get(name).or_else(|| self.sess.subst_lookup(name)).cloned() {
                    Some(TplArg::Value(v)) => Ok(v),
                    Some(TplArg::Expr(e)) => self.eval_const(e, map),
                    Some(_) => Err(SemaError::subst(format!(
                        "'{}' is not a value in this context",
                        self.sess.view(name)
                    ))),
                    None => self.eval_named_constant(name, map),
                }
            }
            Expr::Qualified { segs } => self.eval_qualified_constant(&segs, map),
            Expr::Unary { op, operand } => {
                let v = self.eval_const(operand, map)?;
                apply_unop(op, v)
            }
            Expr::Binary { op, lhs, rhs } => {
                // short-circuit forms first
                match op {
                    BinOp::And => {
                        if self.eval_const(lhs, map)? == 0 {
                            return Ok(0);
                        }
                        return Ok((self.eval_const(rhs, map)? != 0) as i64);
                    }
                    BinOp::Or => {
                        if self.eval_const(lhs, map)? != 0 {
                            return Ok(1);
                        }
                        return Ok((self.eval_const(rhs, map)? != 0) as i64);
                    }
                    _ => {}
                }
                let a = self.eval_const(lhs, map)?;
                let b = self.eval_const(rhs, map)?;
                apply_binop(op, a, b)
            }
            Expr::Ternary {
                cond,
                then_e,
                else_e,
            } => {
                if self.eval_const(cond, map)? != 0 {
                    self.eval_const(then_e, map)
                } else {
                    self.eval_const(else_e, map)
                }
            }
            Expr::SizeofType(t) => {
                let t = self.subst_type(&t, map)?;
                if t.is_dependent() {
                    return Err(SemaError::subst("sizeof of a dependent type"));
                }
                Ok(self.sess.types.size_of(&t)? as i64)
            }
            Expr::SizeofExpr(e) => {
                let sub = self.subst_expr(e, map)?;
                let t = self.type_of_expr(sub)?;
                Ok(self.sess.types.size_of(&t)? as i64)
            }
            Expr::SizeofPack(name) => {
                match map.get(name).or_else(|| self.sess.subst_lookup(name)) {
                    Some(TplArg::Pack(elems)) => Ok(elems.len() as i64),
                    _ => Err(SemaError::subst(format!(
                        "sizeof...({}) with unbound pack",
                        self.sess.view(name)
                    ))),
                }
            }
            Expr::Fold { .. } => {
                let expanded = self.subst_expr(id, map)?;
                if matches!(self.sess.nodes.expr(expanded), Some(Expr::Fold { .. })) {
                    return Err(SemaError::subst("fold over an unbound pack"));
                }
                self.eval_const(expanded, map)
            }
            Expr::Cast { operand, .. } => self.eval_const(operand, map),
            Expr::TypeTraitCall { which, args } => {
                let mut subbed = vec![];
                for t in &args {
                    subbed.push(self.subst_type(t, map)?);
                }
                Ok(self.eval_type_trait(which, &subbed)? as i64)
            }
            other => Err(SemaError::subst(format!(
                "expression is not a constant: {other:?}"
            ))),
        }
    }

    /// Enumerators and constexpr variables reachable by unqualified name
    fn eval_named_constant(&mut self, name: embercc_arena::StrId, map: &SubstMap) -> SemaResult<i64> {
        if let Some(node) = self.sess.symbols.lookup(name) {
            if let Some(var) = self.sess.nodes.var(node).cloned()
                && (var.storage.is_constexpr || var.ty.cv.is_const)
                && let Some(init) = var.init
            {
                return self.eval_const(init, map);
            }
        }
        for info in self.sess.types.iter() {
            if let Some(e) = &info.enum_info
                && let Some(v) = e.enumerators.iter().find(|en| en.name == name)
            {
                return Ok(v.value);
            }
        }
        Err(SemaError::subst(format!(
            "'{}' does not name a constant",
            self.sess.view(name)
        )))
    }

    /// `Class::member` / `Class<Args>::member` / `Enum::enumerator`
    fn eval_qualified_constant(
        &mut self,
        segs: &[embercc_sema::QualSeg],
        map: &SubstMap,
    ) -> SemaResult<i64> {
        let Some((last, prefix)) = segs.split_last() else {
            return Err(SemaError::subst("empty qualified name"));
        };
        if prefix.len() != 1 {
            // namespace-qualified constants resolve through the symbol table
            let path: Vec<_> = segs.iter().map(|s| s.name).collect();
            if let Some(node) = self.sess.symbols.lookup_qualified(&path)
                && let Some(var) = self.sess.nodes.var(node).cloned()
                && let Some(init) = var.init
            {
                return self.eval_const(init, map);
            }
            return Err(SemaError::subst("unresolved qualified constant"));
        }
        let head = &prefix[0];
        let class_index = self.resolve_qualified_head(head, map)?;
        let info = self
            .sess
            .types
            .get(class_index)
            .ok_or_else(|| SemaError::subst("unresolved qualified name head"))?;
        if let Some(e) = &info.enum_info {
            if let Some(v) = e.enumerators.iter().find(|en| en.name == last.name) {
                return Ok(v.value);
            }
            return Err(SemaError::subst(format!(
                "enum has no enumerator '{}'",
                self.sess.view(last.name)
            )));
        }
        if let Some(s) = &info.strukt {
            if let Some(sm) = s.static_member(last.name) {
                if let Some(v) = sm.value {
                    return Ok(v);
                }
                let init = sm.init;
                // a lazily registered initializer folds under the
                // substitution it was captured with, on first use
                let lazy = self
                    .sess
                    .lazy_statics
                    .iter()
                    .find(|l| l.class_index == class_index && l.member == last.name)
                    .map(|l| (l.init, l.map.clone()));
                if let Some((init, lazy_map)) = lazy {
                    let v = {
                        let folded = self.subst_expr(init, &lazy_map)?;
                        self.eval_const(folded, &lazy_map)?
                    };
                    if let Some(reg) = self.sess.types.get_mut(class_index)
                        && let Some(strukt) = reg.strukt.as_mut()
                        && let Some(slot) = strukt
                            .static_members
                            .iter_mut()
                            .find(|m| m.name == last.name)
                    {
                        slot.value = Some(v);
                    }
                    return Ok(v);
                }
                if let Some(init) = init {
                    return self.eval_const(init, map);
                }
            }
            return Err(SemaError::subst(format!(
                "no constant static member '{}'",
                self.sess.view(last.name)
            )));
        }
        Err(SemaError::subst("qualified head is not a class or enum"))
    }

    /// Resolve the head of a qualified constant, instantiating a class
    /// template when arguments are present
    pub(crate) fn resolve_qualified_head(
        &mut self,
        head: &embercc_sema::QualSeg,
        map: &SubstMap,
    ) -> SemaResult<TypeId> {
        if let Some(args) = &head.args {
            let mut resolved = vec![];
            for a in args {
                resolved.extend(self.subst_tplarg(a, map)?);
            }
            match self.try_instantiate_class(head.name, resolved, false)? {
                Some(id) => return Ok(id),
                None => {
                    return Err(SemaError::subst(format!(
                        "could not instantiate '{}'",
                        self.sess.view(head.name)
                    )));
                }
            }
        }
        // a bound type parameter as head
        if let Some(TplArg::Type(t)) = map.get(head.name).or_else(|| self.sess.subst_lookup(head.name))
            && t.index.is_valid()
        {
            return Ok(t.index);
        }
        self.sess
            .types
            .lookup(head.name)
            .ok_or_else(|| SemaError::subst(format!("unknown type '{}'", self.sess.view(head.name))))
    }
}

pub(crate) fn apply_unop(op: UnOp, v: i64) -> SemaResult<i64> {
    Ok(match op {
        UnOp::Plus => v,
        UnOp::Neg => v.wrapping_neg(),
        UnOp::Not => (v == 0) as i64,
        UnOp::BitNot => !v,
        _ => {
            return Err(SemaError::subst(format!(
                "operator {op:?} is not a constant operation"
            )));
        }
    })
}

pub(crate) fn apply_binop(op: BinOp, a: i64, b: i64) -> SemaResult<i64> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(SemaError::subst("division by zero in constant expression"));
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(SemaError::subst("remainder by zero in constant expression"));
            }
            a.wrapping_rem(b)
        }
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr => a.wrapping_shr(b as u32),
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::And => ((a != 0) && (b != 0)) as i64,
        BinOp::Or => ((a != 0) || (b != 0)) as i64,
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::Comma => b,
        BinOp::Assign | BinOp::AddAssign | BinOp::SubAssign => {
            return Err(SemaError::subst(
                "assignment is not a constant operation",
            ));
        }
    })
}

/// Fold a value pack with left associativity
pub fn fold_values(op: BinOp, values: &[i64]) -> SemaResult<i64> {
    let mut it = values.iter().copied();
    let Some(first) = it.next() else {
        return match op {
            BinOp::And => Ok(1),
            BinOp::Or => Ok(0),
            _ => Err(SemaError::subst(format!(
                "empty fold has no identity for operator {}",
                op.to_str()
            ))),
        };
    };
    let mut acc = first;
    for v in it {
        acc = apply_binop(op, acc, v)?;
    }
    // logical folds normalize to 0/1
    if matches!(op, BinOp::And | BinOp::Or) {
        acc = (acc != 0) as i64;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_values() {
        assert_eq!(fold_values(BinOp::And, &[1, 1, 0]).unwrap(), 0);
        assert_eq!(fold_values(BinOp::And, &[1, 1]).unwrap(), 1);
        assert_eq!(fold_values(BinOp::Add, &[1, 2, 3]).unwrap(), 6);
        assert_eq!(fold_values(BinOp::And, &[]).unwrap(), 1);
        assert_eq!(fold_values(BinOp::Or, &[]).unwrap(), 0);
        assert!(fold_values(BinOp::Add, &[]).is_err());
    }

    #[test]
    fn test_binop_guards() {
        assert!(apply_binop(BinOp::Div, 1, 0).is_err());
        assert_eq!(apply_binop(BinOp::Sub, 2, 5).unwrap(), -3);
        assert_eq!(apply_binop(BinOp::Le, 2, 2).unwrap(), 1);
    }
}
