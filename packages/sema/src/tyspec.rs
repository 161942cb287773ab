use cu::pre::*;
use embercc_arena::{StrId, StringTable};

use crate::{BaseType, NodeId, TypeId};

/// Const/volatile qualification
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cv {
    pub is_const: bool,
    pub is_volatile: bool,
}

impl Cv {
    pub const NONE: Self = Self {
        is_const: false,
        is_volatile: false,
    };
    pub const CONST: Self = Self {
        is_const: true,
        is_volatile: false,
    };

    pub const fn is_none(self) -> bool {
        !self.is_const && !self.is_volatile
    }
}

/// Reference qualifier on a type use
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefQual {
    #[default]
    None,
    LValue,
    RValue,
}

impl RefQual {
    /// Reference collapsing: an lvalue reference anywhere wins, otherwise
    /// an rvalue reference survives
    pub const fn collapse(a: RefQual, b: RefQual) -> RefQual {
        match (a, b) {
            (RefQual::LValue, _) | (_, RefQual::LValue) => RefQual::LValue,
            (RefQual::RValue, _) | (_, RefQual::RValue) => RefQual::RValue,
            _ => RefQual::None,
        }
    }
}

/// Member access level
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessSpec {
    #[default]
    Public,
    Protected,
    Private,
}

/// A template argument, parsed or resolved
///
/// The parser produces `Type` and `Expr` arguments; the instantiation
/// engine resolves `Expr` into `Value`, extracts `Template` for
/// template-template parameters, and groups trailing arguments into `Pack`s.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TplArg {
    /// Type argument
    Type(TypeSpecifier),
    /// Unevaluated (possibly dependent) non-type argument
    Expr(NodeId),
    /// Evaluated non-type argument
    Value(i64),
    /// Template-template argument: the base template name
    Template(StrId),
    /// Pack of resolved arguments
    Pack(Vec<TplArg>),
}

impl TplArg {
    pub fn is_dependent(&self) -> bool {
        match self {
            TplArg::Type(t) => t.is_dependent(),
            TplArg::Expr(_) => true,
            TplArg::Value(_) | TplArg::Template(_) => false,
            TplArg::Pack(args) => args.iter().any(|a| a.is_dependent()),
        }
    }

    /// Canonical print used for instantiation-cache keys and hash mangling
    pub fn key_string(&self, strings: &StringTable) -> String {
        match self {
            TplArg::Type(t) => t.key_string(strings),
            TplArg::Expr(n) => format!("?{n}"),
            TplArg::Value(v) => v.to_string(),
            TplArg::Template(name) => format!("#{}", strings.view(*name)),
            TplArg::Pack(args) => {
                let inner: Vec<String> = args.iter().map(|a| a.key_string(strings)).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }
}

/// One type use
///
/// Carries the base type, the registry index for user-defined bases, the
/// pointer-level list (innermost first, each level with its own CV), the
/// reference qualifier, the outermost CV, the array shape, and the
/// template arguments for template-ids. `line`/`col` record the defining
/// token and are excluded from equality, as is the size cache.
#[derive(Debug, Clone)]
pub struct TypeSpecifier {
    pub base: BaseType,
    pub index: TypeId,
    /// Written base name for named types; `StrId::INVALID` for builtins
    pub name: StrId,
    /// Set when the base names a template parameter
    pub tparam: Option<StrId>,
    pub cv: Cv,
    pub ptr: Vec<Cv>,
    pub ref_qual: RefQual,
    pub is_array: bool,
    pub array_len: Option<u64>,
    /// Dependent array length, resolved at substitution time
    pub array_len_expr: Option<NodeId>,
    pub template_args: Vec<TplArg>,
    /// Member type alias of the named base (`Base<Args>::member`), resolved
    /// during substitution
    pub member: Option<StrId>,
    /// `decltype(expr)` whose operand is still dependent; resolved by
    /// substituting then type-checking
    pub decltype_of: Option<NodeId>,
    pub dependent: bool,
    pub size_bits: Option<u32>,
    pub line: u32,
    pub col: u32,
}

impl TypeSpecifier {
    pub fn prim(base: BaseType) -> Self {
        Self {
            base,
            index: TypeId::INVALID,
            name: StrId::INVALID,
            tparam: None,
            cv: Cv::NONE,
            ptr: vec![],
            ref_qual: RefQual::None,
            is_array: false,
            array_len: None,
            array_len_expr: None,
            template_args: vec![],
            member: None,
            decltype_of: None,
            dependent: false,
            size_bits: base.byte_size().map(|b| b * 8),
            line: 0,
            col: 0,
        }
    }

    pub fn named(base: BaseType, name: StrId, index: TypeId) -> Self {
        Self {
            name,
            index,
            ..Self::prim(base)
        }
    }

    /// A placeholder naming a template parameter
    pub fn template_param(name: StrId) -> Self {
        Self {
            tparam: Some(name),
            name,
            dependent: true,
            ..Self::prim(BaseType::Template)
        }
    }

    pub fn invalid() -> Self {
        Self::prim(BaseType::Invalid)
    }

    pub const fn is_void(&self) -> bool {
        matches!(self.base, BaseType::Void) && self.ptr.is_empty() && !self.is_array
    }

    pub fn is_pointer(&self) -> bool {
        !self.ptr.is_empty()
    }

    pub const fn is_reference(&self) -> bool {
        !matches!(self.ref_qual, RefQual::None)
    }

    pub fn is_dependent(&self) -> bool {
        self.dependent
            || self.tparam.is_some()
            || self.template_args.iter().any(|a| a.is_dependent())
            || self.array_len_expr.is_some()
            || self.decltype_of.is_some()
    }

    pub fn has_member_tail(&self) -> bool {
        self.member.is_some()
    }

    /// The scalar value category: integral when it can participate in
    /// constant arithmetic directly
    pub fn is_integral_value(&self) -> bool {
        self.ptr.is_empty() && !self.is_array && self.base.is_integral()
    }

    /// Strip one level of reference, keeping everything else
    pub fn without_ref(&self) -> Self {
        let mut t = self.clone();
        t.ref_qual = RefQual::None;
        t
    }

    /// Strip the outermost CV
    pub fn without_cv(&self) -> Self {
        let mut t = self.clone();
        t.cv = Cv::NONE;
        t
    }

    /// Apply a reference to this type, collapsing with any existing one
    pub fn with_collapsed_ref(&self, applied: RefQual) -> Self {
        let mut t = self.clone();
        t.ref_qual = RefQual::collapse(self.ref_qual, applied);
        t
    }

    /// Canonical print: a pure function of the resolved type, used for
    /// instantiation-cache keys and hash-based mangling
    pub fn key_string(&self, strings: &StringTable) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        if self.cv.is_const {
            s.push_str("const ");
        }
        if self.cv.is_volatile {
            s.push_str("volatile ");
        }
        match self.base {
            BaseType::Enum | BaseType::Union | BaseType::Struct | BaseType::UserDefined => {
                if self.name.is_valid() {
                    s.push_str(strings.view(self.name));
                } else {
                    let _ = write!(s, "{}", self.index);
                }
            }
            BaseType::Template => {
                if let Some(p) = self.tparam {
                    let _ = write!(s, "${}", strings.view(p));
                } else if self.name.is_valid() {
                    s.push_str(strings.view(self.name));
                }
            }
            other => s.push_str(other.to_str()),
        }
        if !self.template_args.is_empty() {
            s.push('<');
            for (i, a) in self.template_args.iter().enumerate() {
                if i > 0 {
                    s.push(',');
                }
                s.push_str(&a.key_string(strings));
            }
            s.push('>');
        }
        if let Some(m) = self.member {
            let _ = write!(s, "::{}", strings.view(m));
        }
        for cv in &self.ptr {
            s.push('*');
            if cv.is_const {
                s.push_str("const");
            }
            if cv.is_volatile {
                s.push_str("volatile");
            }
        }
        if self.is_array {
            match self.array_len {
                Some(n) => {
                    let _ = write!(s, "[{n}]");
                }
                None => s.push_str("[]"),
            }
        }
        match self.ref_qual {
            RefQual::None => {}
            RefQual::LValue => s.push('&'),
            RefQual::RValue => s.push_str("&&"),
        }
        s
    }
}

// equality and hashing ignore the size cache and the defining token
impl PartialEq for TypeSpecifier {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.index == other.index
            && self.name == other.name
            && self.tparam == other.tparam
            && self.cv == other.cv
            && self.ptr == other.ptr
            && self.ref_qual == other.ref_qual
            && self.is_array == other.is_array
            && self.array_len == other.array_len
            && self.array_len_expr == other.array_len_expr
            && self.template_args == other.template_args
            && self.member == other.member
            && self.decltype_of == other.decltype_of
            && self.dependent == other.dependent
    }
}
impl Eq for TypeSpecifier {}
impl std::hash::Hash for TypeSpecifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.index.hash(state);
        self.name.hash(state);
        self.tparam.hash(state);
        self.cv.hash(state);
        self.ptr.hash(state);
        self.ref_qual.hash(state);
        self.is_array.hash(state);
        self.array_len.hash(state);
        self.array_len_expr.hash(state);
        self.template_args.hash(state);
        self.member.hash(state);
        self.decltype_of.hash(state);
        self.dependent.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_collapsing() {
        use RefQual::*;
        // T&& && -> T&&
        assert_eq!(RefQual::collapse(RValue, RValue), RValue);
        // T& && -> T&
        assert_eq!(RefQual::collapse(LValue, RValue), LValue);
        // T && -> T&&
        assert_eq!(RefQual::collapse(None, RValue), RValue);
        // T& & -> T&
        assert_eq!(RefQual::collapse(LValue, LValue), LValue);
        assert_eq!(RefQual::collapse(None, None), None);
    }

    #[test]
    fn test_key_string() {
        let mut strings = StringTable::new();
        let mut t = TypeSpecifier::prim(BaseType::Int);
        t.cv = Cv::CONST;
        t.ptr.push(Cv::NONE);
        t.ref_qual = RefQual::LValue;
        assert_eq!(t.key_string(&strings), "const int*&");

        let name = strings.intern("Vec");
        let mut u = TypeSpecifier::named(BaseType::Struct, name, TypeId(3));
        u.template_args
            .push(TplArg::Type(TypeSpecifier::prim(BaseType::Bool)));
        u.template_args.push(TplArg::Value(4));
        assert_eq!(u.key_string(&strings), "Vec<bool,4>");
    }

    #[test]
    fn test_eq_ignores_location_and_cache() {
        let mut a = TypeSpecifier::prim(BaseType::Int);
        let mut b = TypeSpecifier::prim(BaseType::Int);
        a.line = 10;
        b.line = 99;
        a.size_bits = Some(32);
        b.size_bits = None;
        assert_eq!(a, b);
    }
}
