//! Verimath Expr - the expression language
//!
//! Everything the engine knows about mathematical text lives here:
//! - Lexing and parsing of infix expressions with implicit multiplication
//! - The canonical `Expr` tree and its canonical text form
//! - Equations, inequality constraints and tolerance-aware satisfaction
//! - Simplification, symbolic differentiation and polynomial algebra
//! - Exact rational-root factoring and real root isolation
//!
//! # Example
//!
//! ```rust
//! use verimath_expr::prelude::*;
//!
//! let eq = parse_equation("x^2 - 4 = 0").unwrap();
//! let p = UniPoly::from_expr(&eq.residual(), "x").unwrap();
//! let f = factor(&p).unwrap();
//! assert_eq!(f.to_expr("x").to_string(), "(x - 2)*(x + 2)");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod ast;
pub mod calculus;
pub mod error;
pub mod format;
mod lexer;
pub mod parser;
pub mod poly;
pub mod rational;
pub mod roots;
pub mod statement;
pub mod tolerance;

pub use ast::{Expr, Func};
pub use calculus::{central_difference, differentiate, differentiate_n, simplify};
pub use error::ExprError;
pub use format::{format_answer, format_number};
pub use parser::parse_expr;
pub use poly::{Monomial, Poly, UniPoly};
pub use rational::Rational;
pub use roots::{
    factor, integer_coefficients, quadratic_roots, rational_roots, real_roots, solve_univariate,
    Factorization, IntPoly,
};
pub use statement::{
    parse_constraint, parse_equation, parse_statement, Constraint, Equation, Relation, Statement,
};
pub use tolerance::Tolerance;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with expressions
    pub use crate::{
        differentiate, factor, parse_constraint, parse_equation, parse_expr, parse_statement,
        simplify, Constraint, Equation, Expr, ExprError, Poly, Relation, Statement, Tolerance,
        UniPoly,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
