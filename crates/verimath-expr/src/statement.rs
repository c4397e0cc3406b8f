//! Equations, constraints and the statements a problem is built from

use crate::ast::Expr;
use crate::calculus::simplify;
use crate::error::ExprError;
use crate::parser::parse_expr;
use crate::tolerance::Tolerance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `lhs = rhs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    /// `lhs = rhs`
    #[inline]
    #[must_use]
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }

    /// `lhs - rhs`, simplified; its zeros are the equation's solutions
    #[must_use]
    pub fn residual(&self) -> Expr {
        match self.rhs.as_num() {
            Some(v) if v == 0.0 => simplify(&self.lhs),
            _ => simplify(&Expr::sub(self.lhs.clone(), self.rhs.clone())),
        }
    }

    /// Scale used when judging whether a residual is "zero enough"
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` when `env` misses a variable.
    pub fn magnitude(&self, env: &BTreeMap<String, f64>) -> Result<f64, ExprError> {
        Ok(self.lhs.eval(env)?.abs() + self.rhs.eval(env)?.abs())
    }

    /// Whether `env` satisfies the equation within tolerance
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` when `env` misses a variable.
    pub fn is_satisfied(&self, env: &BTreeMap<String, f64>, tol: &Tolerance) -> Result<bool, ExprError> {
        let residual = self.lhs.eval(env)? - self.rhs.eval(env)?;
        Ok(tol.is_zero_residual(residual, self.magnitude(env)?))
    }

    /// Variables on either side
    #[must_use]
    pub fn variables(&self) -> std::collections::BTreeSet<String> {
        let mut vars = self.lhs.variables();
        vars.extend(self.rhs.variables());
        vars
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

/// Inequality relations allowed in constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl Relation {
    /// Operator as written in canonical text
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Ne => "!=",
        }
    }

    /// Evaluate `a REL b`; non-strict relations accept values within tolerance
    #[must_use]
    pub fn holds(self, a: f64, b: f64, tol: &Tolerance) -> bool {
        let close = tol.is_close(a, b);
        match self {
            Self::Lt => a < b && !close,
            Self::Le => a <= b || close,
            Self::Gt => a > b && !close,
            Self::Ge => a >= b || close,
            Self::Ne => !close,
        }
    }
}

/// `lhs REL rhs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub lhs: Expr,
    pub relation: Relation,
    pub rhs: Expr,
}

impl Constraint {
    /// Whether `env` satisfies the constraint
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` when `env` misses a variable.
    pub fn holds(&self, env: &BTreeMap<String, f64>, tol: &Tolerance) -> Result<bool, ExprError> {
        Ok(self.relation.holds(self.lhs.eval(env)?, self.rhs.eval(env)?, tol))
    }

    /// Single-variable bound `(var, relation, value)` when the constraint has
    /// the shape `x REL c` or `c REL x`.
    #[must_use]
    pub fn as_bound(&self) -> Option<(String, Relation, f64)> {
        match (&self.lhs, self.rhs.constant_value()) {
            (Expr::Var(name), Some(c)) => Some((name.clone(), self.relation, c)),
            _ => match (self.lhs.constant_value(), &self.rhs) {
                (Some(c), Expr::Var(name)) => Some((name.clone(), flip(self.relation), c)),
                _ => None,
            },
        }
    }
}

fn flip(rel: Relation) -> Relation {
    match rel {
        Relation::Lt => Relation::Gt,
        Relation::Le => Relation::Ge,
        Relation::Gt => Relation::Lt,
        Relation::Ge => Relation::Le,
        Relation::Ne => Relation::Ne,
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.relation.symbol(), self.rhs)
    }
}

/// A given fact: an equation to satisfy or an expression to work on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Equation(Equation),
    Expression { expr: Expr },
}

impl Statement {
    /// The equation, if this is one
    #[must_use]
    pub fn as_equation(&self) -> Option<&Equation> {
        match self {
            Self::Equation(eq) => Some(eq),
            Self::Expression { .. } => None,
        }
    }

    /// The bare expression, if this is one
    #[must_use]
    pub fn as_expression(&self) -> Option<&Expr> {
        match self {
            Self::Expression { expr } => Some(expr),
            Self::Equation(_) => None,
        }
    }

    /// Expression whose zeros (or value) the statement is about
    #[must_use]
    pub fn target(&self) -> Expr {
        match self {
            Self::Equation(eq) => eq.residual(),
            Self::Expression { expr } => expr.clone(),
        }
    }

    /// Unknowns mentioned anywhere in the statement
    #[must_use]
    pub fn variables(&self) -> std::collections::BTreeSet<String> {
        match self {
            Self::Equation(eq) => eq.variables(),
            Self::Expression { expr } => expr.variables(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equation(eq) => write!(f, "{eq}"),
            Self::Expression { expr } => write!(f, "{expr}"),
        }
    }
}

/// Parse `lhs = rhs`
///
/// # Errors
/// `ExprError::MissingRelation` without exactly one `=`; syntax errors from either side.
pub fn parse_equation(input: &str) -> Result<Equation, ExprError> {
    let mut sides = input.split('=');
    match (sides.next(), sides.next(), sides.next()) {
        (Some(lhs), Some(rhs), None) => Ok(Equation::new(parse_expr(lhs)?, parse_expr(rhs)?)),
        _ => Err(ExprError::MissingRelation(input.trim().to_string())),
    }
}

/// Parse an inequality such as `x > 0` or `2x + 1 <= y`
///
/// # Errors
/// `ExprError::MissingRelation` when no relation operator is present.
pub fn parse_constraint(input: &str) -> Result<Constraint, ExprError> {
    const RELATIONS: [(&str, Relation); 9] = [
        ("<=", Relation::Le),
        (">=", Relation::Ge),
        ("!=", Relation::Ne),
        ("\u{2264}", Relation::Le),
        ("\u{2265}", Relation::Ge),
        ("\u{2260}", Relation::Ne),
        ("<", Relation::Lt),
        (">", Relation::Gt),
        ("=/=", Relation::Ne),
    ];
    for (symbol, relation) in RELATIONS {
        if let Some(idx) = input.find(symbol) {
            let lhs = parse_expr(&input[..idx])?;
            let rhs = parse_expr(&input[idx + symbol.len()..])?;
            return Ok(Constraint { lhs, relation, rhs });
        }
    }
    Err(ExprError::MissingRelation(input.trim().to_string()))
}

/// Parse either an equation or a bare expression
///
/// # Errors
/// Syntax errors from the underlying parser.
pub fn parse_statement(input: &str) -> Result<Statement, ExprError> {
    if input.contains('=') {
        parse_equation(input).map(Statement::Equation)
    } else {
        parse_expr(input).map(|expr| Statement::Expression { expr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equation_residual_moves_everything_left() {
        let eq = parse_equation("2x + 4 = 10").unwrap();
        assert_eq!(eq.residual().eval_at("x", 3.0).unwrap(), 0.0);
        assert_eq!(eq.to_string(), "2*x + 4 = 10");
    }

    #[test]
    fn satisfied_within_tolerance() {
        let eq = parse_equation("x^2 = 2").unwrap();
        let env = BTreeMap::from([("x".to_string(), std::f64::consts::SQRT_2)]);
        assert!(eq.is_satisfied(&env, &Tolerance::default()).unwrap());
    }

    #[test]
    fn constraint_parsing_prefers_two_char_relations() {
        let c = parse_constraint("x >= 1").unwrap();
        assert_eq!(c.relation, Relation::Ge);
        assert_eq!(c.as_bound(), Some(("x".to_string(), Relation::Ge, 1.0)));
        let flipped = parse_constraint("0 < x").unwrap();
        assert_eq!(flipped.as_bound(), Some(("x".to_string(), Relation::Gt, 0.0)));
    }

    #[test]
    fn strict_relations_reject_boundary() {
        let tol = Tolerance::default();
        assert!(!Relation::Gt.holds(0.0, 0.0, &tol));
        assert!(Relation::Ge.holds(0.0, 1e-12, &tol));
    }

    #[test]
    fn statement_kinds() {
        assert!(parse_statement("x = 1").unwrap().as_equation().is_some());
        assert!(parse_statement("x + 1").unwrap().as_expression().is_some());
        assert!(matches!(
            parse_equation("x = 1 = 2"),
            Err(ExprError::MissingRelation(_))
        ));
    }
}
