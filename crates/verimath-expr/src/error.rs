//! Error types for expression parsing and manipulation

/// Expression error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// Character the lexer does not understand
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// Token in a position the grammar does not allow
    #[error("unexpected '{found}' at {pos}")]
    UnexpectedToken { found: String, pos: usize },

    /// Input ended mid-expression
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Malformed numeric literal
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    /// Nothing to parse
    #[error("empty expression")]
    Empty,

    /// Statement without a relation operator
    #[error("expected a relation in '{0}'")]
    MissingRelation(String),

    /// Variable without a value during evaluation
    #[error("unbound variable '{0}'")]
    UnboundVariable(String),

    /// Expression is not a polynomial
    #[error("not a polynomial: {0}")]
    NotPolynomial(String),

    /// Parentheses, bars, signs or function calls nested past the limit
    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    /// More tokens than an expression may have
    #[error("expression longer than {limit} tokens")]
    TooLong { limit: usize },

    /// Expansion produced a coefficient beyond the exactly representable integers
    #[error("coefficient {0} is too large to represent exactly")]
    CoefficientOverflow(String),
}

impl ExprError {
    /// Whether the error came from reading text (as opposed to manipulating a parsed tree)
    #[inline]
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedChar { .. }
                | Self::UnexpectedToken { .. }
                | Self::UnexpectedEnd
                | Self::InvalidNumber(_)
                | Self::Empty
                | Self::MissingRelation(_)
                | Self::TooDeep { .. }
                | Self::TooLong { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_classification() {
        assert!(ExprError::UnexpectedEnd.is_syntax());
        assert!(ExprError::Empty.is_syntax());
        assert!(!ExprError::UnboundVariable("x".into()).is_syntax());
        assert!(!ExprError::NotPolynomial("sin(x)".into()).is_syntax());
        assert!(ExprError::TooDeep { limit: 256 }.is_syntax());
        assert!(!ExprError::CoefficientOverflow("1e17".into()).is_syntax());
    }

    #[test]
    fn display_mentions_position() {
        let err = ExprError::UnexpectedChar { ch: '#', pos: 3 };
        assert!(err.to_string().contains("'#' at 3"));
    }
}
