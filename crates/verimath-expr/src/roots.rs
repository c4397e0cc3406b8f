//! Real roots and rational factorisation of univariate polynomials
//!
//! Rational roots are found exactly with integer arithmetic (rational root
//! theorem plus exact deflation); whatever remains is isolated numerically
//! by bracketing between the roots of the derivative.

use crate::ast::Expr;
use crate::poly::UniPoly;
use crate::rational::{gcd, Rational};

const MAX_SCALE_EXPONENT: i32 = 6;
const MAX_CANDIDATE_PAIRS: usize = 20_000;
const MAX_EXACT_MAGNITUDE: f64 = 1e12;

/// Integer multiple of a polynomial: `p(x) = factor * A(x)`
#[derive(Debug, Clone, PartialEq)]
pub struct IntPoly {
    coeffs: Vec<i128>,
    factor: f64,
}

impl IntPoly {
    /// Ascending integer coefficients, leading coefficient positive, content removed
    #[must_use]
    pub fn coeffs(&self) -> &[i128] {
        &self.coeffs
    }

    /// Scale such that `p = factor * A`
    #[must_use]
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Whether `r` is an exact root (`None` on arithmetic overflow)
    #[must_use]
    pub fn has_root(&self, r: Rational) -> Option<bool> {
        eval_scaled(&self.coeffs, r.numer(), r.denom()).map(|v| v == 0)
    }
}

/// Scale decimal coefficients to integers. `None` when a coefficient needs
/// more than six decimal places or is too large for exact arithmetic.
#[must_use]
pub fn integer_coefficients(p: &UniPoly) -> Option<IntPoly> {
    if p.is_zero() {
        return None;
    }
    'scales: for k in 0..=MAX_SCALE_EXPONENT {
        let m = 10f64.powi(k);
        let mut ints = Vec::with_capacity(p.coeffs().len());
        for c in p.coeffs() {
            let scaled = c * m;
            let rounded = scaled.round();
            if rounded.abs() > MAX_EXACT_MAGNITUDE || (scaled - rounded).abs() > 1e-9 * rounded.abs().max(1.0) {
                continue 'scales;
            }
            #[allow(clippy::cast_possible_truncation)]
            let int = rounded as i128;
            ints.push(int);
        }
        let mut g = ints.iter().fold(0, |acc, c| gcd(acc, *c));
        if ints.last().is_some_and(|c| *c < 0) {
            g = -g;
        }
        #[allow(clippy::cast_precision_loss)]
        let factor = g as f64 / m;
        return Some(IntPoly {
            coeffs: ints.into_iter().map(|c| c / g).collect(),
            factor,
        });
    }
    None
}

/// `q^n * A(p/q)` with overflow checks
fn eval_scaled(a: &[i128], p: i128, q: i128) -> Option<i128> {
    let n = a.len().checked_sub(1)?;
    let mut acc = a[n];
    let mut q_pow: i128 = 1;
    for i in (0..n).rev() {
        q_pow = q_pow.checked_mul(q)?;
        acc = acc.checked_mul(p)?.checked_add(a[i].checked_mul(q_pow)?)?;
    }
    Some(acc)
}

/// Exact division of `A(x)` by `(q x - p)`
fn deflate(a: &[i128], p: i128, q: i128) -> Option<Vec<i128>> {
    let n = a.len().checked_sub(1)?;
    if n == 0 {
        return None;
    }
    let mut c = vec![0_i128; n];
    if a[n] % q != 0 {
        return None;
    }
    c[n - 1] = a[n] / q;
    for k in (1..n).rev() {
        let num = a[k].checked_add(p.checked_mul(c[k])?)?;
        if num % q != 0 {
            return None;
        }
        c[k - 1] = num / q;
    }
    Some(c)
}

fn divisors(n: i128) -> Option<Vec<i128>> {
    let n = n.abs();
    #[allow(clippy::cast_precision_loss)]
    let magnitude = n as f64;
    if n == 0 || magnitude > MAX_EXACT_MAGNITUDE {
        return None;
    }
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1;
    while d * d <= n {
        if n % d == 0 {
            small.push(d);
            if d * d != n {
                large.push(n / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    Some(small)
}

/// Rational roots with multiplicities plus the deflated integer remainder
#[must_use]
pub fn rational_roots(int: &IntPoly) -> (Vec<(Rational, u32)>, Vec<i128>) {
    let mut a = int.coeffs.clone();
    let mut roots = Vec::new();

    let mut zero_mult = 0;
    while a.len() > 1 && a[0] == 0 {
        a.remove(0);
        zero_mult += 1;
    }
    if zero_mult > 0 {
        roots.push((Rational::from_int(0), zero_mult));
    }
    if a.len() <= 1 {
        return (roots, a);
    }

    let (Some(ps), Some(qs)) = (divisors(a[0]), divisors(a[a.len() - 1])) else {
        return (roots, a);
    };
    if ps.len() * qs.len() > MAX_CANDIDATE_PAIRS {
        return (roots, a);
    }

    for q in &qs {
        for p in &ps {
            if gcd(*p, *q) != 1 {
                continue;
            }
            for candidate in [*p, -*p] {
                let mut multiplicity = 0;
                while a.len() > 1 && eval_scaled(&a, candidate, *q) == Some(0) {
                    match deflate(&a, candidate, *q) {
                        Some(next) => a = next,
                        None => break,
                    }
                    multiplicity += 1;
                }
                if multiplicity > 0 {
                    if let Some(r) = Rational::new(candidate, *q) {
                        roots.push((r, multiplicity));
                    }
                }
            }
        }
    }
    (roots, a)
}

/// Real roots of `a x^2 + b x + c`, ascending
#[must_use]
pub fn quadratic_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a == 0.0 {
        return if b == 0.0 { Vec::new() } else { vec![-c / b] };
    }
    let disc = b * b - 4.0 * a * c;
    let scale = (b * b).max((4.0 * a * c).abs()).max(f64::MIN_POSITIVE);
    if disc < -1e-12 * scale {
        return Vec::new();
    }
    if disc.abs() <= 1e-12 * scale {
        return vec![-b / (2.0 * a)];
    }
    // numerically stable pair
    let sign = if b < 0.0 { -1.0 } else { 1.0 };
    let q = -0.5 * (b + sign * disc.sqrt());
    let mut roots = vec![q / a, c / q];
    roots.sort_by(f64::total_cmp);
    roots
}

fn cauchy_bound(p: &UniPoly) -> f64 {
    let lead = p.leading().abs();
    let c = p.coeffs();
    1.0 + c[..c.len() - 1]
        .iter()
        .map(|a| a.abs() / lead)
        .fold(0.0, f64::max)
}

fn near_zero(p: &UniPoly, x: f64) -> bool {
    p.eval(x).abs() <= 1e-9 * p.magnitude_at(x).max(1.0)
}

fn bisect(p: &UniPoly, mut lo: f64, mut hi: f64) -> f64 {
    let mut f_lo = p.eval(lo);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = p.eval(mid);
        if f_mid == 0.0 || (hi - lo).abs() <= 1e-15 * mid.abs().max(1.0) {
            return mid;
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// All distinct real roots, ascending
#[must_use]
pub fn real_roots(p: &UniPoly) -> Vec<f64> {
    let c = p.coeffs();
    let mut roots = match p.degree() {
        0 => Vec::new(),
        1 => vec![-c[0] / c[1]],
        2 => quadratic_roots(c[2], c[1], c[0]),
        _ => {
            let critical = real_roots(&p.derivative());
            let bound = cauchy_bound(p);
            let mut roots: Vec<f64> = critical.iter().copied().filter(|x| near_zero(p, *x)).collect();
            let mut points = vec![-bound];
            points.extend(critical.iter().copied().filter(|x| x.abs() < bound));
            points.push(bound);
            for w in points.windows(2) {
                let (lo, hi) = (w[0], w[1]);
                if near_zero(p, lo) || near_zero(p, hi) {
                    continue;
                }
                if p.eval(lo).signum() != p.eval(hi).signum() {
                    roots.push(bisect(p, lo, hi));
                }
            }
            roots
        }
    };
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * a.abs().max(1.0));
    roots
}

/// `content * Π (q x - p)^m * remainder`
#[derive(Debug, Clone, PartialEq)]
pub struct Factorization {
    pub content: f64,
    /// Rational roots with multiplicity, descending
    pub linear: Vec<(Rational, u32)>,
    pub remainder: UniPoly,
}

impl Factorization {
    /// Rational roots followed by the real roots of the remainder, deduplicated, descending
    #[must_use]
    pub fn real_roots(&self) -> Vec<f64> {
        let mut roots: Vec<f64> = self.linear.iter().map(|(r, _)| r.to_f64()).collect();
        roots.extend(real_roots(&self.remainder));
        roots.sort_by(|a, b| b.total_cmp(a));
        roots.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * a.abs().max(1.0));
        roots
    }

    /// Linear factor `(q x - p)` as an expression
    #[must_use]
    pub fn linear_factor(var: &str, r: Rational) -> Expr {
        let x = if r.denom() == 1 {
            Expr::var(var)
        } else {
            #[allow(clippy::cast_precision_loss)]
            let q = r.denom() as f64;
            Expr::mul(Expr::Num(q), Expr::var(var))
        };
        #[allow(clippy::cast_precision_loss)]
        let p = r.numer() as f64;
        match p {
            _ if p == 0.0 => x,
            _ if p > 0.0 => Expr::sub(x, Expr::Num(p)),
            _ => Expr::add(x, Expr::Num(-p)),
        }
    }

    /// Each factor expression with its multiplicity, remainder last
    #[must_use]
    pub fn factors(&self, var: &str) -> Vec<(Expr, u32)> {
        let mut out: Vec<(Expr, u32)> = self
            .linear
            .iter()
            .map(|(r, m)| (Self::linear_factor(var, *r), *m))
            .collect();
        if self.remainder.degree() > 0 {
            out.push((self.remainder.to_expr(var), 1));
        }
        out
    }

    /// Factored form as a single expression
    #[must_use]
    pub fn to_expr(&self, var: &str) -> Expr {
        let unit = (self.content.abs() - 1.0).abs() < 1e-12;
        let lead = (!unit).then(|| Expr::Num(self.content));
        let product = lead
            .into_iter()
            .chain(self.factors(var).into_iter().map(|(f, m)| {
                if m == 1 {
                    f
                } else {
                    Expr::pow(f, Expr::Num(f64::from(m)))
                }
            }))
            .reduce(Expr::mul);
        match product {
            None => Expr::Num(self.content),
            Some(p) if unit && self.content < 0.0 => Expr::neg(p),
            Some(p) => p,
        }
    }
}

/// Factor over the rationals. `None` for coefficients that cannot be made integral.
#[must_use]
pub fn factor(p: &UniPoly) -> Option<Factorization> {
    let int = integer_coefficients(p)?;
    let (mut linear, rest) = rational_roots(&int);
    linear.sort_by(|a, b| b.0.to_f64().total_cmp(&a.0.to_f64()));
    #[allow(clippy::cast_precision_loss)]
    let rest_f: Vec<f64> = rest.iter().map(|c| *c as f64).collect();
    let remainder = UniPoly::new(rest_f);
    let (content, remainder) = if remainder.degree() == 0 {
        (int.factor * remainder.coeffs()[0], UniPoly::new(vec![1.0]))
    } else {
        (int.factor, remainder)
    };
    Some(Factorization {
        content,
        linear,
        remainder,
    })
}

/// Distinct real roots, exact where the polynomial allows it, descending
#[must_use]
pub fn solve_univariate(p: &UniPoly) -> Vec<f64> {
    match factor(p) {
        Some(f) => f.real_roots(),
        None => {
            let mut roots = real_roots(p);
            roots.reverse();
            roots
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use pretty_assertions::assert_eq;

    fn uni(s: &str) -> UniPoly {
        UniPoly::from_expr(&parse_expr(s).unwrap(), "x").unwrap()
    }

    #[test]
    fn integer_scaling_removes_decimals_and_content() {
        let int = integer_coefficients(&uni("0.5x^2 - 2")).unwrap();
        assert_eq!(int.coeffs(), &[-4, 0, 1]);
        assert!((int.factor() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn finds_rational_roots_with_multiplicity() {
        let int = integer_coefficients(&uni("(x - 1)^2 (2x + 3)")).unwrap();
        let (roots, rest) = rational_roots(&int);
        assert_eq!(rest.len(), 1);
        assert!(roots.contains(&(Rational::from_int(1), 2)));
        assert!(roots.contains(&(Rational::new(-3, 2).unwrap(), 1)));
    }

    #[test]
    fn factors_difference_of_squares() {
        let f = factor(&uni("x^2 - 4")).unwrap();
        assert_eq!(f.to_expr("x").to_string(), "(x - 2)*(x + 2)");
        assert_eq!(f.real_roots(), vec![2.0, -2.0]);
    }

    #[test]
    fn keeps_irreducible_remainder() {
        let f = factor(&uni("x^3 - 2x")).unwrap();
        assert_eq!(f.to_expr("x").to_string(), "x*(x^2 - 2)");
        let roots = f.real_roots();
        assert_eq!(roots.len(), 3);
        assert!((roots[0] - std::f64::consts::SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn content_is_pulled_out() {
        let f = factor(&uni("2x^2 - 2")).unwrap();
        assert_eq!(f.to_expr("x").to_string(), "2*(x - 1)*(x + 1)");
    }

    #[test]
    fn quadratic_without_real_roots() {
        assert!(quadratic_roots(1.0, 0.0, 1.0).is_empty());
        assert_eq!(quadratic_roots(1.0, -2.0, 1.0), vec![1.0]);
    }

    #[test]
    fn numeric_isolation_of_higher_degree() {
        let roots = real_roots(&uni("x^5 - 3x + 1"));
        assert_eq!(roots.len(), 3);
        for r in roots {
            assert!(uni("x^5 - 3x + 1").eval(r).abs() < 1e-9);
        }
    }

    #[test]
    fn touching_root_is_found() {
        let roots = real_roots(&uni("(x - 1.5)^2 (x + 4)"));
        assert_eq!(roots.len(), 2);
        assert!((roots[1] - 1.5).abs() < 1e-7);
    }

    #[test]
    fn exact_root_certificate() {
        let int = integer_coefficients(&uni("3x - 2")).unwrap();
        assert_eq!(int.has_root(Rational::new(2, 3).unwrap()), Some(true));
        assert_eq!(int.has_root(Rational::new(1, 3).unwrap()), Some(false));
    }
}
