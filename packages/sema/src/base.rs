use cu::pre::*;

/// The closed base-type taxonomy
///
/// Every type use bottoms out in one of these. Compound shapes (pointers,
/// references, arrays, CV) live on [`crate::TypeSpecifier`]; user-defined
/// categories carry a registry index there as well.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    Void,
    Bool,
    Char,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Float,
    Double,
    LongDouble,
    Nullptr,
    Enum,
    Union,
    Struct,
    UserDefined,
    Template,
    Function,
    MemberObjectPointer,
    MemberFunctionPointer,
    Auto,
    Invalid,
}

impl BaseType {
    /// Size of the fundamental type on an LP64 target. None for types whose
    /// size comes from the registry (or that have no size at all).
    pub const fn byte_size(self) -> Option<u32> {
        Some(match self {
            BaseType::Bool | BaseType::Char | BaseType::UnsignedChar => 1,
            BaseType::Short | BaseType::UnsignedShort => 2,
            BaseType::Int | BaseType::UnsignedInt | BaseType::Float => 4,
            BaseType::Long
            | BaseType::UnsignedLong
            | BaseType::LongLong
            | BaseType::UnsignedLongLong
            | BaseType::Double
            | BaseType::Nullptr => 8,
            BaseType::LongDouble => 16,
            BaseType::MemberObjectPointer => 8,
            BaseType::MemberFunctionPointer => 16,
            _ => return None,
        })
    }

    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            BaseType::Bool
                | BaseType::Char
                | BaseType::UnsignedChar
                | BaseType::Short
                | BaseType::UnsignedShort
                | BaseType::Int
                | BaseType::UnsignedInt
                | BaseType::Long
                | BaseType::UnsignedLong
                | BaseType::LongLong
                | BaseType::UnsignedLongLong
        )
    }

    pub const fn is_floating(self) -> bool {
        matches!(self, BaseType::Float | BaseType::Double | BaseType::LongDouble)
    }

    pub const fn is_arithmetic(self) -> bool {
        self.is_integral() || self.is_floating()
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            BaseType::Char | BaseType::Short | BaseType::Int | BaseType::Long | BaseType::LongLong
        )
    }

    /// True for the categories that resolve through the type registry
    pub const fn is_user_defined(self) -> bool {
        matches!(
            self,
            BaseType::Enum | BaseType::Union | BaseType::Struct | BaseType::UserDefined
        )
    }

    /// Convert self to the source-level spelling
    pub const fn to_str(self) -> &'static str {
        match self {
            BaseType::Void => "void",
            BaseType::Bool => "bool",
            BaseType::Char => "char",
            BaseType::UnsignedChar => "unsigned char",
            BaseType::Short => "short",
            BaseType::UnsignedShort => "unsigned short",
            BaseType::Int => "int",
            BaseType::UnsignedInt => "unsigned int",
            BaseType::Long => "long",
            BaseType::UnsignedLong => "unsigned long",
            BaseType::LongLong => "long long",
            BaseType::UnsignedLongLong => "unsigned long long",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::LongDouble => "long double",
            BaseType::Nullptr => "nullptr_t",
            BaseType::Enum => "enum",
            BaseType::Union => "union",
            BaseType::Struct => "struct",
            BaseType::UserDefined => "<user>",
            BaseType::Template => "<template>",
            BaseType::Function => "<function>",
            BaseType::MemberObjectPointer => "<ptr-to-member>",
            BaseType::MemberFunctionPointer => "<ptr-to-member-fn>",
            BaseType::Auto => "auto",
            BaseType::Invalid => "<invalid>",
        }
    }

    /// Parse a single-keyword fundamental type. Multi-keyword forms
    /// (`unsigned long long`, ...) are assembled by the parser.
    pub fn from_keyword(x: &str) -> Option<Self> {
        Some(match x {
            "void" => BaseType::Void,
            "bool" => BaseType::Bool,
            "char" => BaseType::Char,
            "short" => BaseType::Short,
            "int" => BaseType::Int,
            "long" => BaseType::Long,
            "float" => BaseType::Float,
            "double" => BaseType::Double,
            "auto" => BaseType::Auto,
            _ => return None,
        })
    }
}

impl std::fmt::Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_str().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_classification() {
        assert!(BaseType::Int.is_integral());
        assert!(BaseType::UnsignedLongLong.is_integral());
        assert!(!BaseType::Float.is_integral());
        assert!(BaseType::Double.is_floating());
        assert!(!BaseType::Struct.is_arithmetic());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(BaseType::Char.byte_size(), Some(1));
        assert_eq!(BaseType::Int.byte_size(), Some(4));
        assert_eq!(BaseType::LongLong.byte_size(), Some(8));
        assert_eq!(BaseType::Struct.byte_size(), None);
        assert_eq!(BaseType::Void.byte_size(), None);
    }
}
