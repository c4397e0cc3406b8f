//! Expression tree
//!
//! `Expr` is the single canonical representation every pipeline stage
//! compares against. Its `Display` output is the canonical text form:
//! two inputs that differ only in spacing, implicit multiplication or
//! operator spelling render identically.

use crate::error::ExprError;
use crate::format::format_number;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Elementary functions understood by the parser and evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Log,
    Sqrt,
    Abs,
}

impl Func {
    const ALL: [Func; 8] = [
        Func::Sqrt,
        Func::Sin,
        Func::Cos,
        Func::Tan,
        Func::Exp,
        Func::Log,
        Func::Abs,
        Func::Ln,
    ];

    /// Canonical name
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
        }
    }

    /// Longest function name that prefixes `word`
    #[must_use]
    pub fn longest_prefix(word: &str) -> Option<Func> {
        Self::ALL
            .iter()
            .copied()
            .filter(|f| word.starts_with(f.name()))
            .max_by_key(|f| f.name().len())
    }

    /// Apply to a real argument. Domain errors produce NaN.
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Log => x.log10(),
            Self::Sqrt => x.sqrt(),
            Self::Abs => x.abs(),
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Expr {
    Num(f64),
    Var(String),
    Pi,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    /// Numeric literal
    #[inline]
    #[must_use]
    pub fn num(value: f64) -> Self {
        Self::Num(value)
    }

    /// Variable reference
    #[inline]
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Negation
    #[inline]
    #[must_use]
    pub fn neg(e: Expr) -> Self {
        Self::Neg(Box::new(e))
    }

    /// `a + b`
    #[inline]
    #[must_use]
    pub fn add(a: Expr, b: Expr) -> Self {
        Self::Add(Box::new(a), Box::new(b))
    }

    /// `a - b`
    #[inline]
    #[must_use]
    pub fn sub(a: Expr, b: Expr) -> Self {
        Self::Sub(Box::new(a), Box::new(b))
    }

    /// `a * b`
    #[inline]
    #[must_use]
    pub fn mul(a: Expr, b: Expr) -> Self {
        Self::Mul(Box::new(a), Box::new(b))
    }

    /// `a / b`
    #[inline]
    #[must_use]
    pub fn div(a: Expr, b: Expr) -> Self {
        Self::Div(Box::new(a), Box::new(b))
    }

    /// `a ^ b`
    #[inline]
    #[must_use]
    pub fn pow(a: Expr, b: Expr) -> Self {
        Self::Pow(Box::new(a), Box::new(b))
    }

    /// Function application
    #[inline]
    #[must_use]
    pub fn call(f: Func, arg: Expr) -> Self {
        Self::Call(f, Box::new(arg))
    }

    /// Numeric value if this node is a literal
    #[inline]
    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            _ => None,
        }
    }

    /// Free variables in sorted order
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Num(_) | Self::Pi => {}
            Self::Var(name) => {
                out.insert(name.clone());
            }
            Self::Neg(a) | Self::Call(_, a) => a.collect_vars(out),
            Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Pow(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// True when no variables occur
    #[inline]
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.variables().is_empty()
    }

    /// Whether `name` occurs in the tree
    #[must_use]
    pub fn contains_var(&self, name: &str) -> bool {
        match self {
            Self::Num(_) | Self::Pi => false,
            Self::Var(v) => v == name,
            Self::Neg(a) | Self::Call(_, a) => a.contains_var(name),
            Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Pow(a, b) => a.contains_var(name) || b.contains_var(name),
        }
    }

    /// Evaluate with a lookup function for variables
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` when `lookup` has no value for a variable.
    pub fn eval_with(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, ExprError> {
        Ok(match self {
            Self::Num(v) => *v,
            Self::Pi => std::f64::consts::PI,
            Self::Var(name) => lookup(name).ok_or_else(|| ExprError::UnboundVariable(name.clone()))?,
            Self::Neg(a) => -a.eval_with(lookup)?,
            Self::Add(a, b) => a.eval_with(lookup)? + b.eval_with(lookup)?,
            Self::Sub(a, b) => a.eval_with(lookup)? - b.eval_with(lookup)?,
            Self::Mul(a, b) => a.eval_with(lookup)? * b.eval_with(lookup)?,
            Self::Div(a, b) => a.eval_with(lookup)? / b.eval_with(lookup)?,
            Self::Pow(a, b) => pow_real(a.eval_with(lookup)?, b.eval_with(lookup)?),
            Self::Call(f, a) => f.apply(a.eval_with(lookup)?),
        })
    }

    /// Evaluate against an environment
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` for variables missing from `env`.
    pub fn eval(&self, env: &BTreeMap<String, f64>) -> Result<f64, ExprError> {
        self.eval_with(&|name| env.get(name).copied())
    }

    /// Evaluate with a single variable bound
    ///
    /// # Errors
    /// `ExprError::UnboundVariable` if any other variable occurs.
    pub fn eval_at(&self, var: &str, value: f64) -> Result<f64, ExprError> {
        self.eval_with(&|name| (name == var).then_some(value))
    }

    /// Constant value of a variable-free expression
    #[must_use]
    pub fn constant_value(&self) -> Option<f64> {
        self.eval_with(&|_| None).ok()
    }

    /// Replace every occurrence of `var` with `with`
    #[must_use]
    pub fn substitute(&self, var: &str, with: &Expr) -> Expr {
        match self {
            Self::Var(name) if name == var => with.clone(),
            Self::Num(_) | Self::Pi | Self::Var(_) => self.clone(),
            Self::Neg(a) => Self::neg(a.substitute(var, with)),
            Self::Call(f, a) => Self::call(*f, a.substitute(var, with)),
            Self::Add(a, b) => Self::add(a.substitute(var, with), b.substitute(var, with)),
            Self::Sub(a, b) => Self::sub(a.substitute(var, with), b.substitute(var, with)),
            Self::Mul(a, b) => Self::mul(a.substitute(var, with), b.substitute(var, with)),
            Self::Div(a, b) => Self::div(a.substitute(var, with), b.substitute(var, with)),
            Self::Pow(a, b) => Self::pow(a.substitute(var, with), b.substitute(var, with)),
        }
    }

    /// Render as a Rust `f64` expression over identically named bindings
    #[must_use]
    pub fn to_rust_source(&self) -> String {
        match self {
            Self::Num(v) => format!("{v:?}_f64"),
            Self::Pi => "std::f64::consts::PI".to_string(),
            Self::Var(name) => name.clone(),
            Self::Neg(a) => format!("(-{})", a.to_rust_source()),
            Self::Add(a, b) => format!("({} + {})", a.to_rust_source(), b.to_rust_source()),
            Self::Sub(a, b) => format!("({} - {})", a.to_rust_source(), b.to_rust_source()),
            Self::Mul(a, b) => format!("({} * {})", a.to_rust_source(), b.to_rust_source()),
            Self::Div(a, b) => format!("({} / {})", a.to_rust_source(), b.to_rust_source()),
            Self::Pow(a, b) => match b.as_num() {
                Some(n) if n.fract() == 0.0 && n.abs() <= f64::from(i32::MAX) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let n = n as i32;
                    format!("{}.powi({n})", a.to_rust_source())
                }
                _ => format!("{}.powf({})", a.to_rust_source(), b.to_rust_source()),
            },
            Self::Call(f, a) => {
                let method = match f {
                    Func::Log => "log10",
                    other => other.name(),
                };
                format!("{}.{method}()", a.to_rust_source())
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Add(..) | Self::Sub(..) => 1,
            Self::Mul(..) | Self::Div(..) => 2,
            Self::Neg(_) => 3,
            Self::Num(v) if v.is_sign_negative() && *v != 0.0 => 3,
            Self::Pow(..) => 4,
            Self::Num(_) | Self::Var(_) | Self::Pi | Self::Call(..) => 5,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

/// Real power with integer exponents kept exact for negative bases
fn pow_real(base: f64, exp: f64) -> f64 {
    if exp.fract() == 0.0 && exp.abs() <= f64::from(i32::MAX) {
        #[allow(clippy::cast_possible_truncation)]
        let exp = exp as i32;
        base.powi(exp)
    } else {
        base.powf(exp)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(v) => f.write_str(&format_number(*v)),
            Self::Var(name) => f.write_str(name),
            Self::Pi => f.write_str("pi"),
            Self::Neg(a) => {
                f.write_str("-")?;
                a.fmt_child(f, 3)
            }
            Self::Add(a, b) => {
                a.fmt_child(f, 1)?;
                match b.as_ref() {
                    Self::Num(v) if *v < 0.0 => write!(f, " - {}", format_number(-v)),
                    Self::Neg(inner) => {
                        f.write_str(" - ")?;
                        inner.fmt_child(f, 2)
                    }
                    _ => {
                        f.write_str(" + ")?;
                        b.fmt_child(f, 1)
                    }
                }
            }
            Self::Sub(a, b) => {
                a.fmt_child(f, 1)?;
                f.write_str(" - ")?;
                b.fmt_child(f, 2)
            }
            Self::Mul(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("*")?;
                b.fmt_child(f, 3)
            }
            Self::Div(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("/")?;
                b.fmt_child(f, 3)
            }
            Self::Pow(a, b) => {
                a.fmt_child(f, 5)?;
                f.write_str("^")?;
                b.fmt_child(f, 3)
            }
            Self::Call(func, a) => write!(f, "{}({a})", func.name()),
        }
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_expr(s)
    }
}

impl From<Expr> for String {
    fn from(e: Expr) -> Self {
        e.to_string()
    }
}

impl TryFrom<String> for Expr {
    type Error = ExprError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Expr {
        s.parse().unwrap()
    }

    #[test]
    fn evaluates_with_environment() {
        let e = p("2x^2 + 3y");
        let env = BTreeMap::from([("x".to_string(), 2.0), ("y".to_string(), 1.0)]);
        assert_eq!(e.eval(&env).unwrap(), 11.0);
    }

    #[test]
    fn negative_base_integer_power() {
        assert_eq!(p("x^3").eval_at("x", -2.0).unwrap(), -8.0);
    }

    #[test]
    fn unbound_variable_is_an_error() {
        assert_eq!(
            p("x + y").eval_at("x", 1.0),
            Err(ExprError::UnboundVariable("y".into()))
        );
    }

    #[test]
    fn variables_are_sorted() {
        let vars: Vec<_> = p("z + a*x").variables().into_iter().collect();
        assert_eq!(vars, vec!["a", "x", "z"]);
    }

    #[test]
    fn substitution_replaces_all_occurrences() {
        let e = p("x^2 + x").substitute("x", &Expr::num(3.0));
        assert_eq!(e.constant_value(), Some(12.0));
    }

    #[test]
    fn display_keeps_needed_parentheses() {
        assert_eq!(p("(x + 1)(x - 1)").to_string(), "(x + 1)*(x - 1)");
        assert_eq!(p("x - (y - z)").to_string(), "x - (y - z)");
        assert_eq!(p("(-2)^2").to_string(), "(-2)^2");
        assert_eq!(p("-x^2").to_string(), "-x^2");
    }

    #[test]
    fn serde_uses_canonical_text() {
        let json = serde_json::to_string(&p("2 x ** 2")).unwrap();
        assert_eq!(json, "\"2*x^2\"");
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("2*x^2"));
    }

    #[test]
    fn rust_source_uses_powi_for_integer_exponents() {
        assert_eq!(p("x^2 - 4").to_rust_source(), "(x.powi(2) - 4.0_f64)");
    }
}
