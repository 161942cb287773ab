use cu::pre::*;

/// Semantic failure kinds that drive control flow
///
/// SFINAE-sensitive paths recover locally from the silent kinds; everything
/// else surfaces as a diagnostic and compilation continues for coverage.
#[derive(Debug, Clone, Display)]
pub enum SemaError {
    /// Syntactic failure at a specific token
    #[display("parse error at {line}:{col}: {msg}")]
    Parse { msg: String, line: u32, col: u32 },

    /// Substitution failed; silent inside a SFINAE trial
    #[display("substitution failure: {msg}")]
    Substitution { msg: String },

    /// A requires-clause or concept was not satisfied
    #[display("constraint not satisfied: {}", _0.message)]
    Constraint(ConstraintViolation),

    /// Struct finalization inconsistency
    #[display("layout error: {reason}")]
    Layout { reason: String },

    /// Unwinding an in-progress instantiation; not an error by itself
    #[display("instantiation cycle")]
    Cycle,

    /// Recursion or iteration cap exceeded
    #[display("fatal: {msg}")]
    Fatal { msg: String },
}

impl SemaError {
    pub fn parse(msg: impl Into<String>, line: u32, col: u32) -> Self {
        Self::Parse {
            msg: msg.into(),
            line,
            col,
        }
    }

    pub fn subst(msg: impl Into<String>) -> Self {
        Self::Substitution { msg: msg.into() }
    }

    pub fn layout(reason: impl Into<String>) -> Self {
        Self::Layout {
            reason: reason.into(),
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal { msg: msg.into() }
    }

    /// Kinds a SFINAE trial swallows before moving to the next overload
    pub fn is_sfinae_silent(&self) -> bool {
        matches!(
            self,
            SemaError::Parse { .. }
                | SemaError::Substitution { .. }
                | SemaError::Constraint(_)
                | SemaError::Cycle
        )
    }
}

impl std::error::Error for SemaError {}

/// Structured payload of a failed constraint, kept for diagnostics
#[derive(Debug, Clone, Default)]
pub struct ConstraintViolation {
    pub message: String,
    pub failed_requirement: String,
    pub suggestion: String,
    /// Printed argument list the constraint was evaluated against
    pub args: Vec<String>,
}

pub type SemaResult<T> = Result<T, SemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfinae_silence() {
        assert!(SemaError::subst("no member foo").is_sfinae_silent());
        assert!(SemaError::Cycle.is_sfinae_silent());
        assert!(!SemaError::layout("misaligned").is_sfinae_silent());
        assert!(!SemaError::fatal("depth").is_sfinae_silent());
    }
}
