use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    Param, RefQual, SemaError, SemaResult, TemplateParam, TemplateParamKind, TplArg, TypeSpecifier,
};
use fxhash::FxHashSet;

use crate::parse::Parser;
use crate::tpl::SubstMap;

/// Template argument deduction and specialization pattern matching
///
/// Both jobs are the same unification: bind the template's own parameter
/// names against a concrete shape, failing softly (substitution failure)
/// on any conflict so the caller's trial loop can move on.
impl<'s> Parser<'s> {
    /// Deduce bindings for `tparams` from a call site. Explicit arguments
    /// fill leading parameters; the rest deduce from the call argument
    /// types pairwise against the declared parameter list.
    pub fn deduce_function_args(
        &mut self,
        tparams: &[TemplateParam],
        fn_params: &[Param],
        arg_types: &[TypeSpecifier],
        explicit_args: &[TplArg],
    ) -> SemaResult<SubstMap> {
        let names: FxHashSet<StrId> = tparams.iter().map(|p| p.name).collect();
        let mut map = SubstMap::default();
        // pack names must be recognizable during unification
        let pack_mark = self.packs.len();
        for p in tparams.iter().filter(|p| p.is_pack) {
            self.packs.push(p.name);
        }
        let result = self.deduce_function_args_inner(
            tparams,
            fn_params,
            arg_types,
            explicit_args,
            &names,
            &mut map,
        );
        self.packs.truncate(pack_mark);
        result?;
        Ok(map)
    }

    #[allow(clippy::too_many_arguments)]
    fn deduce_function_args_inner(
        &mut self,
        tparams: &[TemplateParam],
        fn_params: &[Param],
        arg_types: &[TypeSpecifier],
        explicit_args: &[TplArg],
        names: &FxHashSet<StrId>,
        map: &mut SubstMap,
    ) -> SemaResult<()> {

        // explicit <...> arguments bind positionally first
        for (p, a) in tparams.iter().zip(explicit_args.iter()) {
            let arg = match (&p.kind, a) {
                (TemplateParamKind::Type { .. }, TplArg::Type(_))
                | (TemplateParamKind::NonType { .. }, TplArg::Value(_))
                | (TemplateParamKind::Template, TplArg::Template(_)) => a.clone(),
                (TemplateParamKind::NonType { .. }, TplArg::Expr(e)) => {
                    TplArg::Value(self.eval_const(*e, map)?)
                }
                (TemplateParamKind::Template, TplArg::Type(t)) if t.name.is_valid() => {
                    TplArg::Template(t.name)
                }
                _ => {
                    return Err(SemaError::subst(format!(
                        "explicit argument does not match the kind of parameter '{}'",
                        self.sess.view(p.name)
                    )));
                }
            };
            if p.is_pack {
                map.insert(p.name, TplArg::Pack(vec![arg]));
            } else {
                map.insert(p.name, arg);
            }
        }

        // pairwise deduction from declared parameters against call types
        let mut arg_i = 0usize;
        for fp in fn_params {
            if fp.is_pack {
                // the pack parameter consumes every remaining argument
                let pack_name = fp.ty.tparam.unwrap_or(StrId::INVALID);
                if names.contains(&pack_name) && !map.contains(pack_name) {
                    let mut elems = vec![];
                    while arg_i < arg_types.len() {
                        let stripped = strip_for_binding(&fp.ty, &arg_types[arg_i]);
                        elems.push(TplArg::Type(stripped));
                        arg_i += 1;
                    }
                    map.insert(pack_name, TplArg::Pack(elems));
                }
                continue;
            }
            let Some(arg_ty) = arg_types.get(arg_i) else {
                // missing argument: acceptable only with a default
                if fp.default.is_none() {
                    return Err(SemaError::subst("too few arguments for deduction"));
                }
                continue;
            };
            let arg_ty = arg_ty.clone();
            self.unify_type(&fp.ty.clone(), &arg_ty, names, map)?;
            arg_i += 1;
        }

        // every parameter must end up bound, via deduction or defaults
        for p in tparams {
            if map.contains(p.name) {
                continue;
            }
            match &p.kind {
                TemplateParamKind::Type { default: Some(d) } => {
                    let d = self.subst_type(d, map)?;
                    map.insert(p.name, TplArg::Type(d));
                }
                TemplateParamKind::NonType {
                    default: Some(d), ..
                } => {
                    let sub = self.subst_expr(*d, map)?;
                    let v = self.eval_const(sub, map)?;
                    map.insert(p.name, TplArg::Value(v));
                }
                _ if p.is_pack => {
                    map.insert(p.name, TplArg::Pack(vec![]));
                }
                _ => {
                    return Err(SemaError::subst(format!(
                        "could not deduce template parameter '{}'",
                        self.sess.view(p.name)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Unify one declared parameter type against one call argument type
    pub(crate) fn unify_type(
        &mut self,
        p: &TypeSpecifier,
        a: &TypeSpecifier,
        names: &FxHashSet<StrId>,
        map: &mut SubstMap,
    ) -> SemaResult<()> {
        if let Some(pname) = p.tparam {
            if !names.contains(&pname) {
                // a parameter of an enclosing template: treat as opaque
                return Ok(());
            }
            // template-template parameter: the argument must itself be an
            // instantiation; extract its base template name
            if !p.template_args.is_empty() {
                let inst = self
                    .sess
                    .types
                    .get(a.index)
                    .and_then(|i| i.inst.clone())
                    .ok_or_else(|| {
                        SemaError::subst(
                            "argument for a template-template parameter is not a template instantiation",
                        )
                    })?;
                bind(map, pname, TplArg::Template(inst.base_template))?;
                for (pa, aa) in p.template_args.iter().zip(inst.args.iter()) {
                    self.unify_args(pa, aa, names, map)?;
                }
                return Ok(());
            }
            let bound = strip_for_binding(p, a);
            return bind(map, pname, TplArg::Type(bound));
        }

        // `Name<pattern-args>` against an instantiation of the same template
        if !p.template_args.is_empty() {
            let inst = self
                .sess
                .types
                .get(a.index)
                .and_then(|i| i.inst.clone())
                .ok_or_else(|| SemaError::subst("argument is not a template instantiation"))?;
            if p.name != inst.base_template {
                return Err(SemaError::subst(format!(
                    "argument instantiates '{}', pattern expects '{}'",
                    self.sess.view(inst.base_template),
                    self.sess.view(p.name)
                )));
            }
            let mut ai = inst.args.iter();
            for pa in &p.template_args {
                if let TplArg::Type(pt) = pa
                    && let Some(pack) = pt.tparam.filter(|n| names.contains(n))
                    && self.is_declared_pack(pack, names)
                {
                    let rest: Vec<TplArg> = ai.by_ref().cloned().collect();
                    bind(map, pack, TplArg::Pack(rest))?;
                    break;
                }
                let Some(aa) = ai.next() else {
                    return Err(SemaError::subst("too few arguments in instantiation"));
                };
                self.unify_args(pa, aa, names, map)?;
            }
            return Ok(());
        }

        // concrete parameter type: accept exact or arithmetic conversion
        if p.base == a.base && p.ptr.len() == a.ptr.len() {
            return Ok(());
        }
        if p.base.is_arithmetic() && a.base.is_arithmetic() && p.ptr.is_empty() && a.ptr.is_empty()
        {
            return Ok(());
        }
        Err(SemaError::subst(format!(
            "cannot convert argument '{}' to parameter '{}'",
            a.key_string(&self.sess.strings),
            p.key_string(&self.sess.strings)
        )))
    }

    /// Unify a specialization pattern argument against a concrete argument
    pub(crate) fn unify_args(
        &mut self,
        pattern: &TplArg,
        concrete: &TplArg,
        names: &FxHashSet<StrId>,
        map: &mut SubstMap,
    ) -> SemaResult<()> {
        match (pattern, concrete) {
            (TplArg::Type(pt), TplArg::Type(at)) => self.unify_type(pt, at, names, map),
            (TplArg::Expr(pe), concrete_val) => {
                // a bare non-type parameter name in the pattern binds it
                if let Some(embercc_sema::Expr::Ident(n)) = self.sess.nodes.expr(*pe)
                    && names.contains(n)
                {
                    let n = *n;
                    let v = match concrete_val {
                        TplArg::Value(v) => *v,
                        TplArg::Expr(e) => self.eval_const(*e, map)?,
                        _ => {
                            return Err(SemaError::subst(
                                "non-type pattern against a type argument",
                            ));
                        }
                    };
                    return bind(map, n, TplArg::Value(v));
                }
                let pv = self.eval_const(*pe, map)?;
                let cv = match concrete_val {
                    TplArg::Value(v) => *v,
                    TplArg::Expr(e) => self.eval_const(*e, map)?,
                    _ => return Err(SemaError::subst("value pattern against a type argument")),
                };
                if pv == cv {
                    Ok(())
                } else {
                    Err(SemaError::subst("constant pattern mismatch"))
                }
            }
            (TplArg::Value(pv), TplArg::Value(cv)) => {
                if pv == cv {
                    Ok(())
                } else {
                    Err(SemaError::subst("constant pattern mismatch"))
                }
            }
            (TplArg::Template(pn), TplArg::Template(cn)) => {
                if names.contains(pn) {
                    bind(map, *pn, TplArg::Template(*cn))
                } else if pn == cn {
                    Ok(())
                } else {
                    Err(SemaError::subst("template-template pattern mismatch"))
                }
            }
            (TplArg::Pack(ps), TplArg::Pack(cs)) => {
                for (p, c) in ps.iter().zip(cs.iter()) {
                    self.unify_args(p, c, names, map)?;
                }
                Ok(())
            }
            _ => Err(SemaError::subst("pattern argument kind mismatch")),
        }
    }

    /// Match a partial specialization's pattern against a concrete
    /// argument list, binding the pattern's own template parameters
    pub fn match_specialization_pattern(
        &mut self,
        pattern: &[TplArg],
        pattern_params: &[TemplateParam],
        concrete: &[TplArg],
    ) -> SemaResult<SubstMap> {
        let names: FxHashSet<StrId> = pattern_params.iter().map(|p| p.name).collect();
        let packs: FxHashSet<StrId> = pattern_params
            .iter()
            .filter(|p| p.is_pack)
            .map(|p| p.name)
            .collect();
        let pack_mark = self.packs.len();
        self.packs.extend(packs.iter().copied());
        let result = self.match_pattern_inner(pattern, concrete, &names, &packs);
        self.packs.truncate(pack_mark);
        let mut map = result?;
        // unbound pattern packs match empty
        for p in pattern_params {
            if p.is_pack && !map.contains(p.name) {
                map.insert(p.name, TplArg::Pack(vec![]));
            }
            if !map.contains(p.name) {
                return Err(SemaError::subst(format!(
                    "pattern parameter '{}' was not bound",
                    self.sess.view(p.name)
                )));
            }
        }
        Ok(map)
    }

    fn match_pattern_inner(
        &mut self,
        pattern: &[TplArg],
        concrete: &[TplArg],
        names: &FxHashSet<StrId>,
        packs: &FxHashSet<StrId>,
    ) -> SemaResult<SubstMap> {
        let mut map = SubstMap::default();
        let mut ci = concrete.iter();
        for pa in pattern {
            // a trailing pack pattern swallows the rest
            if let TplArg::Type(pt) = pa
                && let Some(pn) = pt.tparam
                && packs.contains(&pn)
                && pt.ptr.is_empty()
                && pt.ref_qual == RefQual::None
            {
                let rest: Vec<TplArg> = ci.by_ref().cloned().collect();
                bind(&mut map, pn, TplArg::Pack(rest))?;
                continue;
            }
            let Some(ca) = ci.next() else {
                return Err(SemaError::subst("too few arguments for the pattern"));
            };
            self.unify_args(pa, ca, names, &mut map)?;
        }
        if ci.next().is_some() {
            return Err(SemaError::subst("too many arguments for the pattern"));
        }
        Ok(map)
    }

    fn is_declared_pack(&self, name: StrId, _names: &FxHashSet<StrId>) -> bool {
        self.is_pack_name(name)
    }
}

/// Strip the parameter's declared decorations off the argument type to get
/// the binding for the parameter name. Keeps the argument's reference
/// qualification where the forwarding-reference rule wants it.
fn strip_for_binding(p: &TypeSpecifier, a: &TypeSpecifier) -> TypeSpecifier {
    let mut bound = a.clone();
    // remove one declared pointer level per pointer on the parameter
    for _ in 0..p.ptr.len() {
        bound.ptr.pop();
    }
    match p.ref_qual {
        RefQual::None => {
            // by-value parameter: drop references and top-level cv
            bound.ref_qual = RefQual::None;
            bound.cv = embercc_sema::Cv::NONE;
        }
        RefQual::LValue => {
            bound.ref_qual = RefQual::None;
            if p.cv.is_const {
                bound.cv.is_const = false;
            }
        }
        RefQual::RValue => {
            // forwarding reference: an lvalue argument binds T = A&,
            // an rvalue argument binds T = A
            if bound.ref_qual != RefQual::LValue {
                bound.ref_qual = RefQual::None;
            }
        }
    }
    bound.size_bits = None;
    bound
}

fn bind(map: &mut SubstMap, name: StrId, arg: TplArg) -> SemaResult<()> {
    if let Some(existing) = map.get(name) {
        if *existing != arg {
            return Err(SemaError::subst(
                "conflicting deductions for a template parameter",
            ));
        }
        return Ok(());
    }
    map.insert(name, arg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embercc_sema::{BaseType, Cv};

    #[test]
    fn test_strip_by_value() {
        let p = TypeSpecifier::template_param(StrId(1));
        let mut a = TypeSpecifier::prim(BaseType::Int);
        a.cv = Cv::CONST;
        a.ref_qual = RefQual::LValue;
        let bound = strip_for_binding(&p, &a);
        assert_eq!(bound.ref_qual, RefQual::None);
        assert!(!bound.cv.is_const);
    }

    #[test]
    fn test_strip_forwarding_reference() {
        let mut p = TypeSpecifier::template_param(StrId(1));
        p.ref_qual = RefQual::RValue;
        // lvalue argument keeps its lvalue reference (T deduces to A&)
        let mut lv = TypeSpecifier::prim(BaseType::Int);
        lv.ref_qual = RefQual::LValue;
        assert_eq!(strip_for_binding(&p, &lv).ref_qual, RefQual::LValue);
        // rvalue argument deduces to the plain type
        let rv = TypeSpecifier::prim(BaseType::Int);
        assert_eq!(strip_for_binding(&p, &rv).ref_qual, RefQual::None);
    }

    #[test]
    fn test_strip_pointer_level() {
        let mut p = TypeSpecifier::template_param(StrId(1));
        p.ptr.push(Cv::NONE);
        let mut a = TypeSpecifier::prim(BaseType::Char);
        a.ptr.push(Cv::NONE);
        let bound = strip_for_binding(&p, &a);
        assert!(bound.ptr.is_empty());
        assert_eq!(bound.base, BaseType::Char);
    }
}
