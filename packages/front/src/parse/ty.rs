use cu::pre::*;
use embercc_arena::StrId;
use embercc_sema::{
    BaseType, Cv, RefQual, SemaError, SemaResult, TplArg, TypeSpecifier,
};

use crate::TokenKind;
use crate::parse::Parser;

const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "auto",
];

/// Type specifier and declarator parsing
impl<'s> Parser<'s> {
    /// Parse one full type use: CV, base, pointer levels (each with CV),
    /// reference qualifier. Array shapes attach at the declarator.
    pub fn parse_type_specifier(&mut self) -> SemaResult<TypeSpecifier> {
        let start = self.peek().clone();
        let mut cv = Cv::NONE;
        loop {
            if self.eat_kw("const") {
                cv.is_const = true;
            } else if self.eat_kw("volatile") {
                cv.is_volatile = true;
            } else if self.eat_kw("typename") {
                // elaboration only
            } else if self.eat_kw("struct") || self.eat_kw("class") || self.eat_kw("union")
                || self.eat_kw("enum")
            {
                // elaborated type specifier
            } else {
                break;
            }
        }

        let mut spec = self.parse_base_type()?;
        spec.cv.is_const |= cv.is_const;
        spec.cv.is_volatile |= cv.is_volatile;
        spec.line = start.line;
        spec.col = start.col;

        // trailing cv binds to the base type as well
        loop {
            if self.eat_kw("const") {
                spec.cv.is_const = true;
            } else if self.eat_kw("volatile") {
                spec.cv.is_volatile = true;
            } else {
                break;
            }
        }

        // pointer levels, each with its own cv
        loop {
            if self.at("*") {
                self.toks.advance();
                let mut pcv = Cv::NONE;
                loop {
                    if self.eat_kw("const") {
                        pcv.is_const = true;
                    } else if self.eat_kw("volatile") {
                        pcv.is_volatile = true;
                    } else {
                        break;
                    }
                }
                spec.ptr.push(pcv);
            } else if self.at("&&") {
                self.toks.advance();
                spec.ref_qual = RefQual::collapse(spec.ref_qual, RefQual::RValue);
            } else if self.at("&") {
                self.toks.advance();
                spec.ref_qual = RefQual::collapse(spec.ref_qual, RefQual::LValue);
            } else {
                break;
            }
        }
        Ok(spec)
    }

    fn parse_base_type(&mut self) -> SemaResult<TypeSpecifier> {
        let t = self.peek().clone();

        if t.kind == TokenKind::Keyword && TYPE_KEYWORDS.contains(&t.text.as_ref()) {
            return self.parse_builtin_combo();
        }
        if t.is_kw("decltype") {
            return self.parse_decltype_type();
        }
        if !t.is_ident() {
            return Err(self.err_at(&t, format!("expected a type, found '{}'", t.text)));
        }

        // identifier, possibly a qualified path; segments are consumed
        // only while they resolve to registered names, so a dependent
        // `T::member` tail stays behind for the branches below
        self.toks.advance();
        let mut name = self.intern(t.text.as_ref());
        let mut path = vec![name];
        while self.at("::") && self.toks.peek_ahead(1).is_ident() {
            let next_text = self.toks.peek_ahead(1).text.to_string();
            let next_id = self.intern(&next_text);
            let mut joined = path.clone();
            joined.push(next_id);
            let joined_str = self.qualified_name_string(&joined);
            let joined_name = self.intern(&joined_str);
            let seg_known = self.sess.types.lookup(joined_name).is_some()
                || self.sess.templates.get(joined_name).is_some();
            if !seg_known {
                break;
            }
            self.toks.advance();
            self.toks.advance();
            path.push(next_id);
            name = joined_name;
        }

        let mut spec = self.resolve_named_type(name, path.last().copied().unwrap_or(name))?;

        // template arguments; bound packs splice in place
        if self.at("<") {
            let args = self.parse_template_args()?;
            let empty = crate::tpl::SubstMap::default();
            let mut expanded = vec![];
            for a in &args {
                match self.subst_tplarg(a, &empty) {
                    Ok(mut e) => expanded.append(&mut e),
                    Err(_) => expanded.push(a.clone()),
                }
            }
            spec.template_args = expanded;
            spec.index = embercc_sema::TypeId::INVALID;
            // `Base<Args>::member` dependent member tail
            if self.at("::") && self.toks.peek_ahead(1).is_ident() {
                self.toks.advance();
                let m = self.expect_ident()?;
                spec.member = Some(self.intern(m.text.as_ref()));
            }
            if spec.template_args.iter().any(|a| a.is_dependent()) || spec.tparam.is_some() {
                spec.dependent = true;
                return Ok(spec);
            }
            return self.resolve_template_id_type(spec);
        }

        // `T::member` on a template parameter
        if spec.tparam.is_some() && self.at("::") && self.toks.peek_ahead(1).is_ident() {
            self.toks.advance();
            let m = self.expect_ident()?;
            spec.member = Some(self.intern(m.text.as_ref()));
            spec.dependent = true;
        }
        self.resolve_member_tail(spec)
    }

    /// `T::member` resolution once the head is a registered type
    pub(crate) fn resolve_member_tail(
        &mut self,
        spec: TypeSpecifier,
    ) -> SemaResult<TypeSpecifier> {
        let Some(m) = spec.member else {
            return Ok(spec);
        };
        if !spec.index.is_valid() {
            // still dependent; resolved at substitution time
            return Ok(spec);
        }
        let class_name = self
            .sess
            .types
            .get(spec.index)
            .map(|i| i.name)
            .unwrap_or(StrId::INVALID);
        if let Some(target) = self.sess.templates.member_alias(class_name, m).cloned() {
            let mut shell = spec.clone();
            shell.member = None;
            return Ok(crate::tpl::merge_decorations(&target, &shell));
        }
        let qualified = format!("{}::{}", self.sess.view(class_name), self.sess.view(m));
        let qid = self.sess.strings.intern(&qualified);
        if let Some(tid) = self.sess.types.lookup(qid) {
            let base = self.sess.types.get(tid).map(|i| i.base).unwrap_or(BaseType::Struct);
            let mut out = spec.clone();
            out.member = None;
            out.index = tid;
            out.name = qid;
            out.base = base;
            out.dependent = false;
            return Ok(out);
        }
        Err(SemaError::subst(format!(
            "'{}' has no member type '{}'",
            self.sess.view(class_name),
            self.sess.view(m)
        )))
    }

    fn resolve_named_type(&mut self, name: StrId, basename: StrId) -> SemaResult<TypeSpecifier> {
        // active template-parameter scopes first
        if let Some(binding) = self.sess.subst_lookup(basename).cloned() {
            return match binding {
                TplArg::Type(t) => Ok(t),
                TplArg::Template(tpl) => {
                    let mut s = TypeSpecifier::named(BaseType::UserDefined, tpl, embercc_sema::TypeId::INVALID);
                    s.dependent = false;
                    Ok(s)
                }
                TplArg::Pack(_) => Ok(TypeSpecifier::template_param(basename)),
                _ => Err(SemaError::subst(format!(
                    "'{}' does not name a type here",
                    self.sess.view(basename)
                ))),
            };
        }
        // registered types, by the path-resolved then the base name
        for candidate in [name, basename] {
            if let Some(tid) = self.sess.types.lookup(candidate) {
                let info = self
                    .sess
                    .types
                    .get(tid)
                    .ok_or_else(|| SemaError::subst("registry index out of range"))?;
                return Ok(TypeSpecifier::named(info.base, info.name, tid));
            }
        }
        // inside the struct being defined, its own name resolves
        if let Some((written, reg)) = self.struct_stack.last().copied()
            && written == basename
            && let Some(tid) = self.current_struct_type()
        {
            return Ok(TypeSpecifier::named(BaseType::Struct, reg, tid));
        }
        // nested types and member aliases resolve unqualified inside
        // their enclosing classes
        for (_, reg) in self.struct_stack.clone().iter().rev() {
            if let Some(target) = self.sess.templates.member_alias(*reg, basename).cloned() {
                return Ok(target);
            }
        }
        // a known template name without arguments yet, or a dependent name
        for candidate in [name, basename] {
            if self.sess.templates.get(candidate).is_some() {
                let mut s = TypeSpecifier::named(
                    BaseType::UserDefined,
                    candidate,
                    embercc_sema::TypeId::INVALID,
                );
                s.dependent = false;
                return Ok(s);
            }
        }
        if self.in_dependent_context() {
            return Ok(TypeSpecifier::template_param(basename));
        }
        Err(SemaError::subst(format!(
            "unknown type name '{}'",
            self.sess.view(basename)
        )))
    }

    fn parse_builtin_combo(&mut self) -> SemaResult<TypeSpecifier> {
        let mut is_unsigned = false;
        let mut is_signed = false;
        let mut long_count = 0u32;
        let mut short_seen = false;
        let mut word: Option<String> = None;
        loop {
            let t = self.peek().clone();
            if t.kind != TokenKind::Keyword || !TYPE_KEYWORDS.contains(&t.text.as_ref()) {
                break;
            }
            match t.text.as_ref() {
                "unsigned" => is_unsigned = true,
                "signed" => is_signed = true,
                "long" => long_count += 1,
                "short" => short_seen = true,
                other => word = Some(other.to_string()),
            }
            self.toks.advance();
        }
        let base = match word.as_deref() {
            Some("void") => BaseType::Void,
            Some("bool") => BaseType::Bool,
            Some("auto") => BaseType::Auto,
            Some("float") => BaseType::Float,
            Some("double") => {
                if long_count > 0 {
                    BaseType::LongDouble
                } else {
                    BaseType::Double
                }
            }
            Some("char") => {
                if is_unsigned {
                    BaseType::UnsignedChar
                } else {
                    BaseType::Char
                }
            }
            Some("int") | None => {
                if short_seen {
                    if is_unsigned { BaseType::UnsignedShort } else { BaseType::Short }
                } else if long_count >= 2 {
                    if is_unsigned { BaseType::UnsignedLongLong } else { BaseType::LongLong }
                } else if long_count == 1 {
                    if is_unsigned { BaseType::UnsignedLong } else { BaseType::Long }
                } else if is_unsigned {
                    BaseType::UnsignedInt
                } else {
                    let _ = is_signed;
                    BaseType::Int
                }
            }
            Some(other) => {
                return Err(self.err_here(format!("unexpected type keyword '{other}'")));
            }
        };
        Ok(TypeSpecifier::prim(base))
    }

    fn parse_decltype_type(&mut self) -> SemaResult<TypeSpecifier> {
        self.expect_kw("decltype")?;
        self.expect("(")?;
        let expr = self.parse_comma_expr()?;
        self.expect(")")?;
        match self.type_of_expr(expr) {
            Ok(t) => Ok(t),
            Err(e) => {
                if self.in_dependent_context() {
                    let mut s = TypeSpecifier::prim(BaseType::UserDefined);
                    s.decltype_of = Some(expr);
                    s.dependent = true;
                    Ok(s)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Parse a `<...>` template argument list. Each argument is tried as a
    /// type first (speculatively), then as a constant expression.
    pub fn parse_template_args(&mut self) -> SemaResult<Vec<TplArg>> {
        self.expect("<")?;
        let mut args = vec![];
        if self.eat(">") {
            return Ok(args);
        }
        loop {
            let arg = self.parse_one_template_arg()?;
            args.push(arg);
            if self.eat(",") {
                continue;
            }
            self.expect(">")?;
            break;
        }
        Ok(args)
    }

    fn parse_one_template_arg(&mut self) -> SemaResult<TplArg> {
        // type attempt: must end exactly at ',', '>' or '...'
        let as_type = self.speculate(|p| {
            let t = p.parse_type_specifier()?;
            if p.at(",") || p.at(">") || p.at("...") {
                Ok(t)
            } else {
                Err(p.err_here("not a type argument"))
            }
        });
        if let Ok(t) = as_type {
            // pack expansion of a bare pack name stays a bare pack type;
            // substitution splices it
            self.eat("...");
            return Ok(TplArg::Type(t));
        }
        let e = self.parse_expr_no_comma()?;
        self.eat("...");
        let empty = crate::tpl::SubstMap::default();
        match self.eval_const(e, &empty) {
            Ok(v) => Ok(TplArg::Value(v)),
            Err(_) => Ok(TplArg::Expr(e)),
        }
    }

    pub(crate) fn in_dependent_context(&self) -> bool {
        self.sess
            .subst_stack
            .iter()
            .any(|m| m.args_in_order().iter().any(|a| a.is_dependent()))
            || self.defer_bodies > 0
    }

    pub(crate) fn current_struct_type(&self) -> Option<embercc_sema::TypeId> {
        self.sess.symbols.current_struct()
    }
}
