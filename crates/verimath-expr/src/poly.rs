//! Polynomial normal forms
//!
//! `Poly` is a sparse multivariate polynomial with `f64` coefficients, used
//! for expansion, linear-system extraction and identity checks. `UniPoly` is
//! the dense single-variable form the root and factoring algorithms run on.

use crate::ast::Expr;
use crate::error::ExprError;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet};

const DROP_BELOW: f64 = 1e-12;
const MAX_EXPANSION_POWER: f64 = 64.0;
/// 2^53: above this, integer coefficients stop being exact in `f64`
const MAX_EXACT_COEFFICIENT: f64 = 9_007_199_254_740_992.0;

/// Product of variables raised to positive powers, sorted by variable name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Monomial(Vec<(String, u32)>);

impl Monomial {
    /// The empty monomial
    #[must_use]
    pub fn one() -> Self {
        Self(Vec::new())
    }

    /// A single variable to the first power
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self(vec![(name.to_string(), 1)])
    }

    /// Total degree
    #[must_use]
    pub fn degree(&self) -> u32 {
        self.0.iter().map(|(_, e)| e).sum()
    }

    /// Degree in one variable
    #[must_use]
    pub fn degree_in(&self, var: &str) -> u32 {
        self.0.iter().find(|(v, _)| v == var).map_or(0, |(_, e)| *e)
    }

    /// Whether this is the empty monomial
    #[must_use]
    pub fn is_one(&self) -> bool {
        self.0.is_empty()
    }

    fn mul(&self, other: &Monomial) -> Monomial {
        let mut powers: BTreeMap<String, u32> = self.0.iter().cloned().collect();
        for (v, e) in &other.0 {
            *powers.entry(v.clone()).or_insert(0) += e;
        }
        Monomial(powers.into_iter().collect())
    }

    fn factors(&self) -> impl Iterator<Item = Expr> + '_ {
        self.0.iter().map(|(v, e)| {
            if *e == 1 {
                Expr::var(v)
            } else {
                Expr::pow(Expr::var(v), Expr::Num(f64::from(*e)))
            }
        })
    }
}

/// Graded order: higher total degree first, then higher powers of earlier variables
impl Ord for Monomial {
    fn cmp(&self, other: &Self) -> Ordering {
        let key = |m: &Monomial| {
            (
                Reverse(m.degree()),
                m.0.iter().map(|(v, e)| (v.clone(), Reverse(*e))).collect::<Vec<_>>(),
            )
        };
        key(self).cmp(&key(other))
    }
}

impl PartialOrd for Monomial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sparse multivariate polynomial
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Poly {
    terms: BTreeMap<Monomial, f64>,
}

impl Poly {
    /// The zero polynomial
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// A constant polynomial
    #[must_use]
    pub fn constant(c: f64) -> Self {
        let mut p = Self::zero();
        p.add_term(Monomial::one(), c);
        p
    }

    /// A single variable
    #[must_use]
    pub fn var(name: &str) -> Self {
        let mut p = Self::zero();
        p.add_term(Monomial::var(name), 1.0);
        p
    }

    fn add_term(&mut self, m: Monomial, c: f64) {
        let entry = self.terms.entry(m).or_insert(0.0);
        *entry += c;
        if entry.abs() < DROP_BELOW {
            self.terms.retain(|_, c| c.abs() >= DROP_BELOW);
        }
    }

    /// Convert an expression tree into normal form
    ///
    /// # Errors
    /// `ExprError::NotPolynomial` for division by non-constants, symbolic or
    /// fractional exponents and functions of variables;
    /// `ExprError::CoefficientOverflow` when a coefficient passes 2^53.
    pub fn from_expr(expr: &Expr) -> Result<Self, ExprError> {
        let poly = Self::build(expr)?;
        if let Some(c) = poly.terms.values().find(|c| c.abs() > MAX_EXACT_COEFFICIENT) {
            return Err(ExprError::CoefficientOverflow(format!("{c:e}")));
        }
        Ok(poly)
    }

    fn build(expr: &Expr) -> Result<Self, ExprError> {
        let not_poly = || ExprError::NotPolynomial(expr.to_string());
        Ok(match expr {
            Expr::Num(v) => Self::constant(*v),
            Expr::Pi => Self::constant(std::f64::consts::PI),
            Expr::Var(name) => Self::var(name),
            Expr::Neg(a) => Self::from_expr(a)?.scale(-1.0),
            Expr::Add(a, b) => Self::from_expr(a)?.add(&Self::from_expr(b)?),
            Expr::Sub(a, b) => Self::from_expr(a)?.sub(&Self::from_expr(b)?),
            Expr::Mul(a, b) => Self::from_expr(a)?.mul(&Self::from_expr(b)?),
            Expr::Div(a, b) => {
                let divisor = Self::from_expr(b)?.as_constant().ok_or_else(not_poly)?;
                if divisor == 0.0 {
                    return Err(not_poly());
                }
                Self::from_expr(a)?.scale(1.0 / divisor)
            }
            Expr::Pow(base, exp) => {
                let n = exp.constant_value().ok_or_else(not_poly)?;
                if n < 0.0 || n.fract() != 0.0 || n > MAX_EXPANSION_POWER {
                    return Err(not_poly());
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let n = n as u32;
                Self::from_expr(base)?.pow(n)
            }
            Expr::Call(..) => Self::constant(expr.constant_value().ok_or_else(not_poly)?),
        })
    }

    /// Whether every coefficient is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value when the polynomial has no variables
    #[must_use]
    pub fn as_constant(&self) -> Option<f64> {
        match self.terms.len() {
            0 => Some(0.0),
            1 => self.terms.get(&Monomial::one()).copied(),
            _ => None,
        }
    }

    /// Sum
    #[must_use]
    pub fn add(&self, other: &Poly) -> Poly {
        let mut out = self.clone();
        for (m, c) in &other.terms {
            out.add_term(m.clone(), *c);
        }
        out
    }

    /// Difference
    #[must_use]
    pub fn sub(&self, other: &Poly) -> Poly {
        self.add(&other.scale(-1.0))
    }

    /// Multiply every coefficient by `k`
    #[must_use]
    pub fn scale(&self, k: f64) -> Poly {
        let mut out = Poly::zero();
        for (m, c) in &self.terms {
            out.add_term(m.clone(), c * k);
        }
        out
    }

    /// Product
    #[must_use]
    pub fn mul(&self, other: &Poly) -> Poly {
        let mut out = Poly::zero();
        for (ma, ca) in &self.terms {
            for (mb, cb) in &other.terms {
                out.add_term(ma.mul(mb), ca * cb);
            }
        }
        out
    }

    /// `self` raised to `n`
    #[must_use]
    pub fn pow(&self, n: u32) -> Poly {
        (0..n).fold(Poly::constant(1.0), |acc, _| acc.mul(self))
    }

    /// Total degree (0 for constants and the zero polynomial)
    #[must_use]
    pub fn degree(&self) -> u32 {
        self.terms.keys().map(Monomial::degree).max().unwrap_or(0)
    }

    /// Highest power of `var` in any term
    #[must_use]
    pub fn degree_in(&self, var: &str) -> u32 {
        self.terms.keys().map(|m| m.degree_in(var)).max().unwrap_or(0)
    }

    /// Variables with a nonzero term
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        self.terms
            .keys()
            .flat_map(|m| m.0.iter().map(|(v, _)| v.clone()))
            .collect()
    }

    /// Coefficients of a degree-one polynomial: `(per-variable, constant)`
    #[must_use]
    pub fn linear_parts(&self) -> Option<(BTreeMap<String, f64>, f64)> {
        if self.degree() > 1 {
            return None;
        }
        let mut coeffs = BTreeMap::new();
        let mut constant = 0.0;
        for (m, c) in &self.terms {
            match m.0.as_slice() {
                [] => constant = *c,
                [(v, 1)] => {
                    coeffs.insert(v.clone(), *c);
                }
                _ => return None,
            }
        }
        Some((coeffs, constant))
    }

    /// Dense form in `var` when no other variable occurs
    #[must_use]
    pub fn univariate(&self, var: &str) -> Option<UniPoly> {
        if self.variables().iter().any(|v| v != var) {
            return None;
        }
        let degree = self.degree_in(var) as usize;
        let mut coeffs = vec![0.0; degree + 1];
        for (m, c) in &self.terms {
            coeffs[m.degree_in(var) as usize] += c;
        }
        Some(UniPoly::new(coeffs))
    }

    /// Canonical expanded expression
    #[must_use]
    pub fn to_expr(&self) -> Expr {
        let mut out: Option<Expr> = None;
        for (m, c) in &self.terms {
            let magnitude = c.abs();
            // left-nested so `2*x*y` needs no parentheses
            let coefficient =
                (m.0.is_empty() || (magnitude - 1.0).abs() >= DROP_BELOW).then_some(Expr::Num(magnitude));
            let term = coefficient
                .into_iter()
                .chain(m.factors())
                .reduce(Expr::mul)
                .unwrap_or(Expr::Num(magnitude));
            out = Some(match out {
                None if *c < 0.0 => Expr::neg(term),
                None => term,
                Some(acc) if *c < 0.0 => Expr::sub(acc, term),
                Some(acc) => Expr::add(acc, term),
            });
        }
        out.unwrap_or(Expr::Num(0.0))
    }

    /// Coefficient-wise comparison within `tol` (absolute, scaled by the largest coefficient)
    #[must_use]
    pub fn approx_eq(&self, other: &Poly, tol: f64) -> bool {
        let diff = self.sub(other);
        let scale = self
            .terms
            .values()
            .chain(other.terms.values())
            .fold(1.0_f64, |acc, c| acc.max(c.abs()));
        diff.terms.values().all(|c| c.abs() <= tol * scale)
    }
}

/// Dense single-variable polynomial, `coeffs[i]` multiplies `x^i`
#[derive(Debug, Clone, PartialEq)]
pub struct UniPoly {
    coeffs: Vec<f64>,
}

impl UniPoly {
    /// Build from ascending coefficients, trimming zero leading terms
    #[must_use]
    pub fn new(mut coeffs: Vec<f64>) -> Self {
        while coeffs.len() > 1 && coeffs.last().is_some_and(|c| c.abs() < DROP_BELOW) {
            coeffs.pop();
        }
        if coeffs.is_empty() {
            coeffs.push(0.0);
        }
        Self { coeffs }
    }

    /// Parse `expr` as a polynomial in `var` alone
    ///
    /// # Errors
    /// `ExprError::NotPolynomial` when `expr` is not a polynomial in `var` only.
    pub fn from_expr(expr: &Expr, var: &str) -> Result<Self, ExprError> {
        Poly::from_expr(expr)?
            .univariate(var)
            .ok_or_else(|| ExprError::NotPolynomial(expr.to_string()))
    }

    /// Coefficients, constant term first
    #[must_use]
    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// Degree; zero for the zero polynomial
    #[must_use]
    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// Whether every coefficient is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.coeffs.len() == 1 && self.coeffs[0] == 0.0
    }

    /// Coefficient of the highest power
    #[must_use]
    pub fn leading(&self) -> f64 {
        self.coeffs[self.coeffs.len() - 1]
    }

    /// Horner evaluation
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    /// Sum of absolute term magnitudes at `x`, a scale for residual checks
    #[must_use]
    pub fn magnitude_at(&self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x.abs() + c.abs())
    }

    /// Derivative
    #[must_use]
    pub fn derivative(&self) -> UniPoly {
        if self.coeffs.len() == 1 {
            return UniPoly::new(vec![0.0]);
        }
        #[allow(clippy::cast_precision_loss)]
        let coeffs = self
            .coeffs
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, c)| c * i as f64)
            .collect();
        UniPoly::new(coeffs)
    }

    /// Antiderivative with zero constant term
    #[must_use]
    pub fn antiderivative(&self) -> UniPoly {
        #[allow(clippy::cast_precision_loss)]
        let raised = self
            .coeffs
            .iter()
            .enumerate()
            .map(|(i, c)| c / (i as f64 + 1.0));
        UniPoly::new(std::iter::once(0.0).chain(raised).collect())
    }

    /// As a multivariate polynomial in `var`
    #[must_use]
    pub fn to_poly(&self, var: &str) -> Poly {
        let mut p = Poly::zero();
        for (i, c) in self.coeffs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let exp = i as u32;
            let m = if exp == 0 {
                Monomial::one()
            } else {
                Monomial(vec![(var.to_string(), exp)])
            };
            p.add_term(m, *c);
        }
        p
    }

    /// As an expression in `var`
    #[must_use]
    pub fn to_expr(&self, var: &str) -> Expr {
        self.to_poly(var).to_expr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use pretty_assertions::assert_eq;

    fn poly(s: &str) -> Poly {
        Poly::from_expr(&parse_expr(s).unwrap()).unwrap()
    }

    #[test]
    fn expands_products() {
        assert_eq!(poly("(x + 1)^2").to_expr().to_string(), "x^2 + 2*x + 1");
        assert_eq!(poly("(x - 2)(x + 2)").to_expr().to_string(), "x^2 - 4");
        assert_eq!(poly("(x + y)^2").to_expr().to_string(), "x^2 + 2*x*y + y^2");
        assert_eq!(poly("3x*y*z").to_expr().to_string(), "3*x*y*z");
    }

    #[test]
    fn multivariate_text_is_canonical() {
        let text = poly("(x + y)^3").to_expr().to_string();
        assert_eq!(text, "x^3 + 3*x^2*y + 3*x*y^2 + y^3");
        assert_eq!(parse_expr(&text).unwrap().to_string(), text);
    }

    #[test]
    fn inexact_coefficients_are_refused() {
        assert!(Poly::from_expr(&parse_expr("(x + 1)^50").unwrap()).is_ok());
        assert!(matches!(
            Poly::from_expr(&parse_expr("(x + 1)^60").unwrap()),
            Err(ExprError::CoefficientOverflow(_))
        ));
    }

    #[test]
    fn cancellation_yields_zero() {
        assert!(poly("(x + 1)^2 - x^2 - 2x - 1").is_zero());
        assert_eq!(poly("x - x").to_expr().to_string(), "0");
    }

    #[test]
    fn leading_negative_term() {
        assert_eq!(poly("10d - d^2").to_expr().to_string(), "-d^2 + 10*d");
    }

    #[test]
    fn rejects_non_polynomials() {
        for src in ["sin(x)", "1/x", "x^0.5", "2^x"] {
            assert!(Poly::from_expr(&parse_expr(src).unwrap()).is_err(), "{src}");
        }
        assert!(Poly::from_expr(&parse_expr("sqrt(4) x").unwrap()).is_ok());
    }

    #[test]
    fn linear_parts_of_an_equation() {
        let (coeffs, constant) = poly("2x + 3y - 7").linear_parts().unwrap();
        assert_eq!(coeffs.get("x"), Some(&2.0));
        assert_eq!(coeffs.get("y"), Some(&3.0));
        assert_eq!(constant, -7.0);
        assert!(poly("x*y").linear_parts().is_none());
    }

    #[test]
    fn univariate_calculus() {
        let p = UniPoly::from_expr(&parse_expr("x^3 - 2x + 1").unwrap(), "x").unwrap();
        assert_eq!(p.degree(), 3);
        assert_eq!(p.eval(2.0), 5.0);
        assert_eq!(p.derivative().to_expr("x").to_string(), "3*x^2 - 2");
        assert_eq!(
            UniPoly::new(vec![0.0, 0.0, 3.0]).antiderivative().to_expr("x").to_string(),
            "x^3"
        );
    }
}
