use cu::pre::*;
use embercc_arena::{ArcStr, Cursor, Pool, StrId};

use crate::{AccessSpec, BaseType, NodeId, RefQual, TplArg, TypeId, TypeSpecifier};

/// Language linkage of a declaration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    #[default]
    Cpp,
    C,
    None,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    #[default]
    Default,
    Cdecl,
    Stdcall,
    Fastcall,
}

/// Storage and linkage options recognized on declarations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageOpts {
    pub is_static: bool,
    pub is_inline: bool,
    pub is_constexpr: bool,
    pub is_consteval: bool,
    pub is_constinit: bool,
    pub is_extern: bool,
    pub linkage: Linkage,
    pub calling_conv: CallingConvention,
}

/// One function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: StrId,
    pub ty: TypeSpecifier,
    pub default: Option<NodeId>,
    /// Declared from a template parameter pack (`Args... rest`)
    pub is_pack: bool,
}

/// Qualifiers recorded on (member) function declarations
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FuncQuals {
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub is_pure: bool,
    pub is_defaulted: bool,
    pub is_deleted: bool,
    pub is_const: bool,
    pub ref_qual: RefQual,
    /// None = unspecified, Some(None) = `noexcept`, Some(Some(e)) = `noexcept(e)`
    pub noexcept: Option<Option<NodeId>>,
    pub storage: StorageOpts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: StrId,
    pub ret: TypeSpecifier,
    pub params: Vec<Param>,
    pub body: Option<NodeId>,
    pub quals: FuncQuals,
    pub access: AccessSpec,
    /// Owning class for member functions (instantiated qualified name)
    pub class_name: Option<StrId>,
    /// Operator token for overloads (`+`, `[]`, ...)
    pub operator: Option<ArcStr>,
    pub namespace: Vec<StrId>,
    pub mangled: Option<ArcStr>,
    /// Body is a pure forwarding expression; always inlined at call sites
    pub inline_always: bool,
    /// C-style trailing `...`
    pub is_variadic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CtorDecl {
    pub class_name: StrId,
    pub params: Vec<Param>,
    /// Member/base initializer list: `name(args...)`
    pub inits: Vec<(StrId, Vec<NodeId>)>,
    pub body: Option<NodeId>,
    pub access: AccessSpec,
    pub is_explicit: bool,
    pub is_defaulted: bool,
    pub is_deleted: bool,
    pub mangled: Option<ArcStr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DtorDecl {
    pub class_name: StrId,
    pub body: Option<NodeId>,
    pub is_virtual: bool,
    pub is_defaulted: bool,
    pub is_deleted: bool,
    pub access: AccessSpec,
    pub mangled: Option<ArcStr>,
}

/// A non-static or static data member as written
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: StrId,
    pub ty: TypeSpecifier,
    pub access: AccessSpec,
    pub default_init: Option<NodeId>,
    /// Unevaluated bitfield width expression
    pub bitfield_width: Option<NodeId>,
    pub is_static: bool,
    pub is_const: bool,
    pub is_constexpr: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseSpecAst {
    pub spec: TypeSpecifier,
    pub access: AccessSpec,
    pub is_virtual: bool,
    /// Pack-expanded base (`Bases...`)
    pub is_pack: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasDecl {
    pub name: StrId,
    pub target: TypeSpecifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: StrId,
    pub is_union: bool,
    pub is_class: bool,
    pub is_final: bool,
    pub bases: Vec<BaseSpecAst>,
    pub fields: Vec<FieldDecl>,
    /// FuncDecl nodes
    pub methods: Vec<NodeId>,
    pub ctors: Vec<NodeId>,
    pub dtor: Option<NodeId>,
    /// Nested StructDecl / EnumDecl / TemplateClassDecl nodes
    pub nested: Vec<NodeId>,
    pub aliases: Vec<AliasDecl>,
    pub static_asserts: Vec<NodeId>,
    pub pack_alignment: Option<u32>,
    /// Registry slot once registered
    pub type_index: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParam {
    pub name: StrId,
    pub kind: TemplateParamKind,
    pub is_pack: bool,
    /// Constraint written in place of `typename` (`Integral T`)
    pub concept_constraint: Option<(StrId, Vec<TplArg>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateParamKind {
    Type { default: Option<TypeSpecifier> },
    NonType {
        ty: TypeSpecifier,
        default: Option<NodeId>,
    },
    Template,
}

impl TemplateParam {
    pub fn has_default(&self) -> bool {
        match &self.kind {
            TemplateParamKind::Type { default } => default.is_some(),
            TemplateParamKind::NonType { default, .. } => default.is_some(),
            TemplateParamKind::Template => false,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, TemplateParamKind::Type { .. })
    }
}

/// A function template: header parsed eagerly, body deferred behind cursors
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateFuncDecl {
    pub name: StrId,
    pub tparams: Vec<TemplateParam>,
    pub requires_clause: Option<NodeId>,
    pub decl_start: Cursor,
    pub body_start: Option<Cursor>,
    pub trailing_return_start: Option<Cursor>,
    /// Header parameter list; types may be dependent
    pub params: Vec<Param>,
    /// Declared return type; `auto` when a trailing return type is used
    pub ret: TypeSpecifier,
    pub has_trailing_return: bool,
    pub quals: FuncQuals,
    pub namespace: Vec<StrId>,
    /// Member template of this class, if any
    pub class_name: Option<StrId>,
    /// Per-parameter concept constraints from abbreviated templates
    /// (`Concept auto x`): (param index, concept, extra args)
    pub param_concepts: Vec<(usize, StrId, Vec<TplArg>)>,
}

/// A class template declaration (primary or specialization pattern)
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateClassDecl {
    pub name: StrId,
    pub tparams: Vec<TemplateParam>,
    pub requires_clause: Option<NodeId>,
    pub decl_start: Cursor,
    /// None for forward declarations
    pub body_start: Option<Cursor>,
    pub is_union: bool,
    /// Pattern argument list: Some for full and partial specializations
    pub pattern: Option<Vec<TplArg>>,
    pub namespace: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAliasDecl {
    pub name: StrId,
    pub tparams: Vec<TemplateParam>,
    pub target: TypeSpecifier,
    pub namespace: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptDecl {
    pub name: StrId,
    pub tparams: Vec<TemplateParam>,
    pub expr: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequiresClause {
    pub expr: NodeId,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IfStmt {
    pub cond: NodeId,
    pub then_branch: NodeId,
    pub else_branch: Option<NodeId>,
    pub is_constexpr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhileStmt {
    pub cond: NodeId,
    pub body: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForStmt {
    pub init: Option<NodeId>,
    pub cond: Option<NodeId>,
    pub step: Option<NodeId>,
    pub body: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: StrId,
    pub ty: TypeSpecifier,
    pub init: Option<NodeId>,
    pub storage: StorageOpts,
    pub namespace: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticAssertDecl {
    pub cond: NodeId,
    pub message: Option<ArcStr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: StrId,
    pub is_scoped: bool,
    pub underlying: BaseType,
    pub enumerators: Vec<(StrId, Option<NodeId>)>,
    pub type_index: TypeId,
}

// -- expressions ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Plus,
    Neg,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Assign,
    AddAssign,
    SubAssign,
    Comma,
}

impl BinOp {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            "<<" => BinOp::Shl,
            ">>" => BinOp::Shr,
            "&" => BinOp::BitAnd,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            "&&" => BinOp::And,
            "||" => BinOp::Or,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            "<" => BinOp::Lt,
            ">" => BinOp::Gt,
            "<=" => BinOp::Le,
            ">=" => BinOp::Ge,
            "=" => BinOp::Assign,
            "+=" => BinOp::AddAssign,
            "-=" => BinOp::SubAssign,
            "," => BinOp::Comma,
            _ => return None,
        })
    }

    pub const fn to_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Assign => "=",
            BinOp::AddAssign => "+=",
            BinOp::SubAssign => "-=",
            BinOp::Comma => ",",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    Static,
    Reinterpret,
    Const,
    Dynamic,
    CStyle,
    Functional,
}

/// Compiler-builtin type trait predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTrait {
    IsIntegral,
    IsFloatingPoint,
    IsArithmetic,
    IsPointer,
    IsReference,
    IsLvalueReference,
    IsRvalueReference,
    IsVoid,
    IsConst,
    IsClass,
    IsUnion,
    IsEnum,
    IsSame,
    IsBaseOf,
}

impl TypeTrait {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "__is_integral" => TypeTrait::IsIntegral,
            "__is_floating_point" => TypeTrait::IsFloatingPoint,
            "__is_arithmetic" => TypeTrait::IsArithmetic,
            "__is_pointer" => TypeTrait::IsPointer,
            "__is_reference" => TypeTrait::IsReference,
            "__is_lvalue_reference" => TypeTrait::IsLvalueReference,
            "__is_rvalue_reference" => TypeTrait::IsRvalueReference,
            "__is_void" => TypeTrait::IsVoid,
            "__is_const" => TypeTrait::IsConst,
            "__is_class" => TypeTrait::IsClass,
            "__is_union" => TypeTrait::IsUnion,
            "__is_enum" => TypeTrait::IsEnum,
            "__is_same" => TypeTrait::IsSame,
            "__is_base_of" => TypeTrait::IsBaseOf,
            _ => return None,
        })
    }

    pub const fn arity(self) -> usize {
        match self {
            TypeTrait::IsSame | TypeTrait::IsBaseOf => 2,
            _ => 1,
        }
    }
}

/// One segment of a qualified name, with optional template arguments
#[derive(Debug, Clone, PartialEq)]
pub struct QualSeg {
    pub name: StrId,
    pub args: Option<Vec<TplArg>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequiresExpr {
    pub params: Vec<Param>,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// `{ expr; }` or `expr;`: the expression must be well-formed
    Expr(NodeId),
    /// `typename T::x;`: the type must exist
    Type(TypeSpecifier),
    /// `{ expr } -> Concept<...>;`
    Compound {
        expr: NodeId,
        constraint: Option<(StrId, Vec<TplArg>)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit { value: i64, ty: BaseType },
    FloatLit { value: f64, ty: BaseType },
    BoolLit(bool),
    CharLit(char),
    StrLit(ArcStr),
    NullptrLit,
    Ident(StrId),
    Qualified { segs: Vec<QualSeg> },
    /// Reference to a template parameter, produced during substitution
    TemplateParamRef(StrId),
    /// `name<args>` in expression position
    TemplateId { name: StrId, args: Vec<TplArg> },
    Unary { op: UnOp, operand: NodeId },
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    Ternary { cond: NodeId, then_e: NodeId, else_e: NodeId },
    Call { callee: NodeId, args: Vec<NodeId> },
    Member { base: NodeId, name: StrId, arrow: bool },
    Index { base: NodeId, index: NodeId },
    Cast { kind: CastKind, ty: TypeSpecifier, operand: NodeId },
    /// `T(args...)` constructor call
    CtorCall { ty: TypeSpecifier, args: Vec<NodeId> },
    SizeofType(TypeSpecifier),
    SizeofExpr(NodeId),
    /// `sizeof...(pack)`
    SizeofPack(StrId),
    /// Unary or binary fold over a parameter pack
    Fold {
        op: BinOp,
        pack: StrId,
        init: Option<NodeId>,
        right_fold: bool,
    },
    TypeTraitCall { which: TypeTrait, args: Vec<TypeSpecifier> },
    Requires(RequiresExpr),
    Decltype(NodeId),
    /// `expr...` in an argument list
    PackExpansion(NodeId),
}

// -- node sum ---------------------------------------------------------------

/// The closed AST node sum. All nodes live in the [`NodeArena`] and
/// reference each other by [`NodeId`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Var(VarDecl),
    Type(TypeSpecifier),
    Func(FuncDecl),
    Ctor(CtorDecl),
    Dtor(DtorDecl),
    Struct(StructDecl),
    TemplateFunc(TemplateFuncDecl),
    TemplateClass(TemplateClassDecl),
    TemplateParam(TemplateParam),
    TemplateAlias(TemplateAliasDecl),
    Concept(ConceptDecl),
    Requires(RequiresClause),
    Block(Block),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    ExprStmt(NodeId),
    StaticAssert(StaticAssertDecl),
    Enum(EnumDecl),
    Alias(AliasDecl),
    Expr(Expr),
    Empty,
}

macro_rules! downcast {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: NodeId) -> Option<&$ty> {
            match self.get(id) {
                Some(Node::$variant(x)) => Some(x),
                _ => None,
            }
        }
        pub fn $get_mut(&mut self, id: NodeId) -> Option<&mut $ty> {
            match self.get_mut(id) {
                Some(Node::$variant(x)) => Some(x),
                _ => None,
            }
        }
    };
}

/// Sequential node storage with stable handles
#[derive(Default)]
pub struct NodeArena {
    pool: Pool<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        NodeId(self.pool.push(node))
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> NodeId {
        self.alloc(Node::Expr(expr))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.pool.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.pool.get_mut(id.0)
    }

    downcast!(expr, expr_mut, Expr, Expr);
    downcast!(func, func_mut, Func, FuncDecl);
    downcast!(ctor, ctor_mut, Ctor, CtorDecl);
    downcast!(dtor, dtor_mut, Dtor, DtorDecl);
    downcast!(strukt, strukt_mut, Struct, StructDecl);
    downcast!(template_func, template_func_mut, TemplateFunc, TemplateFuncDecl);
    downcast!(template_class, template_class_mut, TemplateClass, TemplateClassDecl);
    downcast!(template_alias, template_alias_mut, TemplateAlias, TemplateAliasDecl);
    downcast!(concept_decl, concept_decl_mut, Concept, ConceptDecl);
    downcast!(block, block_mut, Block, Block);
    downcast!(var, var_mut, Var, VarDecl);
    downcast!(enum_decl, enum_decl_mut, Enum, EnumDecl);
    downcast!(static_assert, static_assert_mut, StaticAssert, StaticAssertDecl);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_downcast() {
        let mut arena = NodeArena::new();
        let lit = arena.alloc_expr(Expr::IntLit {
            value: 42,
            ty: BaseType::Int,
        });
        let blk = arena.alloc(Node::Block(Block { stmts: vec![lit] }));
        assert!(matches!(
            arena.expr(lit),
            Some(Expr::IntLit { value: 42, .. })
        ));
        assert_eq!(arena.block(blk).unwrap().stmts, vec![lit]);
        // wrong-variant downcast is None, not a panic
        assert!(arena.func(lit).is_none());
    }
}
