//! Recursive-descent parser
//!
//! Grammar (lowest to highest binding):
//!
//! ```text
//! sum     := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary | <implicit> power)*
//! unary   := ("-" | "+") unary | power
//! power   := primary ("^" unary)?
//! primary := number | var | pi | func primary-or-group | "(" sum ")" | "|" sum "|"
//! ```

use crate::ast::{Expr, Func};
use crate::error::ExprError;
use crate::lexer::{tokenize, Spanned, Token};

/// Nesting levels of groups, bars, signs and calls
pub const MAX_DEPTH: usize = 256;
/// Tokens per expression; bounds the depth of operator chains
pub const MAX_TOKENS: usize = 2048;

/// Parse an expression into its canonical tree
///
/// # Errors
/// Any `ExprError` syntax variant.
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ExprError::TooLong { limit: MAX_TOKENS });
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        abs_depth: 0,
        depth: 0,
    };
    let expr = parser.sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(parser.unexpected(tok)),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    abs_depth: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        tok
    }

    fn unexpected(&self, tok: &Token) -> ExprError {
        ExprError::UnexpectedToken {
            found: tok.describe(),
            pos: self.tokens.get(self.pos).map_or(0, |s| s.pos),
        }
    }

    fn expect(&mut self, want: &Token) -> Result<(), ExprError> {
        match self.peek() {
            Some(tok) if tok == want => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => Err(self.unexpected(tok)),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ExprError>) -> Result<T, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn starts_operand(&self) -> bool {
        match self.peek() {
            Some(Token::Num(_) | Token::Var(_) | Token::Func(_) | Token::Pi | Token::LParen) => true,
            Some(Token::Pipe) => self.abs_depth == 0,
            _ => false,
        }
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    lhs = Expr::add(lhs, self.term()?);
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    lhs = Expr::sub(lhs, self.term()?);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    lhs = Expr::mul(lhs, self.unary()?);
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    lhs = Expr::div(lhs, self.unary()?);
                }
                _ if self.starts_operand() => {
                    lhs = Expr::mul(lhs, self.power()?);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::neg(self.nested(Self::unary)?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some(tok) = self.bump() else {
            return Err(ExprError::UnexpectedEnd);
        };
        match tok {
            Token::Num(v) => Ok(Expr::Num(v)),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::Pi => Ok(Expr::Pi),
            Token::LParen => {
                let inner = self.nested(Self::sum)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Pipe => {
                self.abs_depth += 1;
                let inner = self.nested(Self::sum)?;
                self.expect(&Token::Pipe)?;
                self.abs_depth -= 1;
                Ok(Expr::call(Func::Abs, inner))
            }
            Token::Func(func) => {
                // `sin(x)` takes the group, `sin x^2` takes the power
                let arg = if self.peek() == Some(&Token::LParen) {
                    self.nested(Self::primary)?
                } else {
                    self.nested(Self::power)?
                };
                Ok(Expr::call(func, arg))
            }
            other => {
                self.pos -= 1;
                Err(self.unexpected(&other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn canon(s: &str) -> String {
        parse_expr(s).unwrap().to_string()
    }

    #[test]
    fn implicit_multiplication_is_made_explicit() {
        assert_eq!(canon("2x"), "2*x");
        assert_eq!(canon("2 * x"), "2*x");
        assert_eq!(canon("2x^2 - 3x + 1"), "2*x^2 - 3*x + 1");
        assert_eq!(canon("x(x+1)"), "x*(x + 1)");
    }

    #[test]
    fn power_spellings_agree() {
        assert_eq!(canon("x**2"), canon("x ^ 2"));
        assert_eq!(canon("x²-4"), "x^2 - 4");
    }

    #[test]
    fn power_is_right_associative() {
        let e = parse_expr("2^3^2").unwrap();
        assert_eq!(e.constant_value(), Some(512.0));
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        assert_eq!(parse_expr("-x^2").unwrap().eval_at("x", 3.0).unwrap(), -9.0);
        assert_eq!(parse_expr("2^-1").unwrap().constant_value(), Some(0.5));
    }

    #[test]
    fn functions_with_and_without_parentheses() {
        assert_eq!(canon("sin(x)"), "sin(x)");
        assert_eq!(canon("sin x"), "sin(x)");
        assert_eq!(canon("2sqrt(x)"), "2*sqrt(x)");
    }

    #[test]
    fn absolute_value_bars() {
        assert_eq!(canon("|x - 1|"), "abs(x - 1)");
        assert_eq!(parse_expr("2|x|").unwrap().eval_at("x", -3.0).unwrap(), 6.0);
    }

    #[test]
    fn reports_errors() {
        assert_eq!(parse_expr(""), Err(ExprError::Empty));
        assert_eq!(parse_expr("x +"), Err(ExprError::UnexpectedEnd));
        assert!(matches!(parse_expr("(x + 1"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(parse_expr("x + )"), Err(ExprError::UnexpectedToken { .. })));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let deep = format!("{}x{}", "(".repeat(5000), ")".repeat(5000));
        assert_eq!(parse_expr(&deep), Err(ExprError::TooDeep { limit: MAX_DEPTH }));
        let signs = format!("{}x", "-".repeat(1000));
        assert_eq!(parse_expr(&signs), Err(ExprError::TooDeep { limit: MAX_DEPTH }));
        let calls = format!("{}x", "sin ".repeat(1000));
        assert_eq!(parse_expr(&calls), Err(ExprError::TooDeep { limit: MAX_DEPTH }));

        let fine = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(canon(&fine), "x");
    }

    #[test]
    fn long_chains_are_rejected() {
        let long = vec!["x"; 3000].join(" + ");
        assert_eq!(parse_expr(&long), Err(ExprError::TooLong { limit: MAX_TOKENS }));
    }
}
