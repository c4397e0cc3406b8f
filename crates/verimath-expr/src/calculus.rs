//! Tree simplification and symbolic differentiation

use crate::ast::{Expr, Func};

/// Bottom-up rewrite: constant folding plus the identities `x+0`, `x*1`,
/// `x*0`, `x^1`, `x^0`, double negation and sign normalisation.
#[must_use]
pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Num(_) | Expr::Var(_) | Expr::Pi => expr.clone(),
        Expr::Neg(a) => simplify_neg(simplify(a)),
        Expr::Add(a, b) => simplify_add(simplify(a), simplify(b)),
        Expr::Sub(a, b) => simplify_sub(simplify(a), simplify(b)),
        Expr::Mul(a, b) => simplify_mul(simplify(a), simplify(b)),
        Expr::Div(a, b) => simplify_div(simplify(a), simplify(b)),
        Expr::Pow(a, b) => simplify_pow(simplify(a), simplify(b)),
        Expr::Call(f, a) => {
            let a = simplify(a);
            match a.as_num() {
                Some(v) => fold(Expr::call(*f, a), f.apply(v)),
                None => Expr::call(*f, a),
            }
        }
    }
}

/// Keep the folded value only when it is a finite number
fn fold(original: Expr, value: f64) -> Expr {
    if value.is_finite() {
        Expr::Num(value)
    } else {
        original
    }
}

fn is_num(e: &Expr, v: f64) -> bool {
    e.as_num() == Some(v)
}

fn simplify_neg(a: Expr) -> Expr {
    match a {
        Expr::Num(v) => Expr::Num(-v),
        Expr::Neg(inner) => *inner,
        Expr::Sub(x, y) => Expr::Sub(y, x),
        other => Expr::neg(other),
    }
}

fn simplify_add(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x + y),
        _ if is_num(&a, 0.0) => b,
        _ if is_num(&b, 0.0) => a,
        (_, Expr::Num(y)) if *y < 0.0 => Expr::sub(a, Expr::Num(-y)),
        (_, Expr::Neg(inner)) => Expr::sub(a, (**inner).clone()),
        (Expr::Neg(inner), _) => Expr::sub(b, (**inner).clone()),
        _ => Expr::add(a, b),
    }
}

fn simplify_sub(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x - y),
        _ if is_num(&b, 0.0) => a,
        _ if is_num(&a, 0.0) => simplify_neg(b),
        _ if a == b => Expr::Num(0.0),
        (_, Expr::Num(y)) if *y < 0.0 => Expr::add(a, Expr::Num(-y)),
        (_, Expr::Neg(inner)) => Expr::add(a, (**inner).clone()),
        _ => Expr::sub(a, b),
    }
}

fn simplify_mul(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x * y),
        _ if is_num(&a, 0.0) || is_num(&b, 0.0) => Expr::Num(0.0),
        _ if is_num(&a, 1.0) => b,
        _ if is_num(&b, 1.0) => a,
        _ if is_num(&a, -1.0) => simplify_neg(b),
        _ if is_num(&b, -1.0) => simplify_neg(a),
        // coefficient first
        (_, Expr::Num(_)) => simplify_mul(b, a),
        (Expr::Num(x), Expr::Mul(inner_a, inner_b)) => match inner_a.as_num() {
            Some(y) => simplify_mul(Expr::Num(x * y), (**inner_b).clone()),
            None => Expr::mul(a, b),
        },
        (Expr::Num(x), Expr::Neg(inner)) => simplify_mul(Expr::Num(-x), (**inner).clone()),
        (Expr::Neg(inner), _) => simplify_neg(simplify_mul((**inner).clone(), b)),
        _ if a == b => Expr::pow(a, Expr::Num(2.0)),
        _ => Expr::mul(a, b),
    }
}

fn simplify_div(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Num(x), Expr::Num(y)) if *y != 0.0 => {
            let q = x / y;
            // keep exact-looking fractions symbolic
            if q.fract() == 0.0 {
                Expr::Num(q)
            } else {
                Expr::div(a, b)
            }
        }
        _ if is_num(&a, 0.0) && !is_num(&b, 0.0) => Expr::Num(0.0),
        _ if is_num(&b, 1.0) => a,
        _ => Expr::div(a, b),
    }
}

fn simplify_pow(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        _ if is_num(&b, 0.0) => Expr::Num(1.0),
        _ if is_num(&b, 1.0) => a,
        (Expr::Num(x), Expr::Num(y)) => {
            let value = if y.fract() == 0.0 && y.abs() < 64.0 {
                #[allow(clippy::cast_possible_truncation)]
                let n = *y as i32;
                x.powi(n)
            } else {
                x.powf(*y)
            };
            fold(Expr::pow(a.clone(), b.clone()), value)
        }
        (Expr::Pow(base, inner), Expr::Num(outer)) => match inner.as_num() {
            Some(n) => simplify_pow((**base).clone(), Expr::Num(n * outer)),
            None => Expr::pow(a, b),
        },
        _ => Expr::pow(a, b),
    }
}

/// `d expr / d var`, simplified
#[must_use]
pub fn differentiate(expr: &Expr, var: &str) -> Expr {
    simplify(&derive(expr, var))
}

/// Derivative of order `n`
#[must_use]
pub fn differentiate_n(expr: &Expr, var: &str, n: u32) -> Expr {
    (0..n).fold(simplify(expr), |acc, _| differentiate(&acc, var))
}

fn derive(expr: &Expr, var: &str) -> Expr {
    if !expr.contains_var(var) {
        return Expr::Num(0.0);
    }
    match expr {
        Expr::Num(_) | Expr::Pi => Expr::Num(0.0),
        Expr::Var(name) => Expr::Num(if name == var { 1.0 } else { 0.0 }),
        Expr::Neg(a) => Expr::neg(derive(a, var)),
        Expr::Add(a, b) => Expr::add(derive(a, var), derive(b, var)),
        Expr::Sub(a, b) => Expr::sub(derive(a, var), derive(b, var)),
        Expr::Mul(a, b) => Expr::add(
            Expr::mul(derive(a, var), (**b).clone()),
            Expr::mul((**a).clone(), derive(b, var)),
        ),
        Expr::Div(a, b) => Expr::div(
            Expr::sub(
                Expr::mul(derive(a, var), (**b).clone()),
                Expr::mul((**a).clone(), derive(b, var)),
            ),
            Expr::pow((**b).clone(), Expr::Num(2.0)),
        ),
        Expr::Pow(base, exp) => derive_pow(base, exp, var),
        Expr::Call(f, a) => Expr::mul(derive_call(*f, a), derive(a, var)),
    }
}

fn derive_pow(base: &Expr, exp: &Expr, var: &str) -> Expr {
    if !exp.contains_var(var) {
        // n * u^(n-1) * u'
        return Expr::mul(
            Expr::mul(
                exp.clone(),
                Expr::pow(base.clone(), simplify(&Expr::sub(exp.clone(), Expr::Num(1.0)))),
            ),
            derive(base, var),
        );
    }
    let power = Expr::pow(base.clone(), exp.clone());
    if !base.contains_var(var) {
        // a^v * ln(a) * v'
        return Expr::mul(
            Expr::mul(power, Expr::call(Func::Ln, base.clone())),
            derive(exp, var),
        );
    }
    // u^v * (v' ln u + v u' / u)
    Expr::mul(
        power,
        Expr::add(
            Expr::mul(derive(exp, var), Expr::call(Func::Ln, base.clone())),
            Expr::div(Expr::mul(exp.clone(), derive(base, var)), base.clone()),
        ),
    )
}

/// Outer derivative f'(u) for the chain rule
fn derive_call(f: Func, u: &Expr) -> Expr {
    let u = u.clone();
    match f {
        Func::Sin => Expr::call(Func::Cos, u),
        Func::Cos => Expr::neg(Expr::call(Func::Sin, u)),
        Func::Tan => Expr::div(
            Expr::Num(1.0),
            Expr::pow(Expr::call(Func::Cos, u), Expr::Num(2.0)),
        ),
        Func::Exp => Expr::call(Func::Exp, u),
        Func::Ln => Expr::div(Expr::Num(1.0), u),
        Func::Log => Expr::div(
            Expr::Num(1.0),
            Expr::mul(u, Expr::call(Func::Ln, Expr::Num(10.0))),
        ),
        Func::Sqrt => Expr::div(
            Expr::Num(1.0),
            Expr::mul(Expr::Num(2.0), Expr::call(Func::Sqrt, u)),
        ),
        Func::Abs => Expr::div(u.clone(), Expr::call(Func::Abs, u)),
    }
}

/// Central finite difference, used to cross-check symbolic derivatives
///
/// # Errors
/// Propagates evaluation errors.
pub fn central_difference(expr: &Expr, var: &str, at: f64) -> Result<f64, crate::ExprError> {
    let h = 1e-5 * at.abs().max(1.0);
    let forward = expr.eval_at(var, at + h)?;
    let backward = expr.eval_at(var, at - h)?;
    Ok((forward - backward) / (2.0 * h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use pretty_assertions::assert_eq;

    fn d(s: &str) -> String {
        differentiate(&parse_expr(s).unwrap(), "x").to_string()
    }

    #[test]
    fn polynomial_rules() {
        assert_eq!(d("x^3 + 2x"), "3*x^2 + 2");
        assert_eq!(d("5"), "0");
        assert_eq!(d("10x - x^2"), "10 - 2*x");
    }

    #[test]
    fn chain_rule() {
        assert_eq!(d("sin(2x)"), "2*cos(2*x)");
        let e = differentiate(&parse_expr("exp(x^2)").unwrap(), "x");
        let expected = 2.0 * 1.5 * (1.5f64 * 1.5).exp();
        assert!((e.eval_at("x", 1.5).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn quotient_rule_matches_finite_difference() {
        let f = parse_expr("(x + 1)/(x^2 + 1)").unwrap();
        let df = differentiate(&f, "x");
        for at in [-2.0, 0.3, 4.0] {
            let numeric = central_difference(&f, "x", at).unwrap();
            assert!((df.eval_at("x", at).unwrap() - numeric).abs() < 1e-6);
        }
    }

    #[test]
    fn second_derivative() {
        let f = parse_expr("x^4").unwrap();
        assert_eq!(differentiate_n(&f, "x", 2).to_string(), "12*x^2");
    }

    #[test]
    fn simplification_identities() {
        let s = |src: &str| simplify(&parse_expr(src).unwrap()).to_string();
        assert_eq!(s("0 + x*1"), "x");
        assert_eq!(s("x^1 + 0*y"), "x");
        assert_eq!(s("2*3*x"), "6*x");
        assert_eq!(s("--x"), "x");
        assert_eq!(s("x - x"), "0");
        assert_eq!(s("(x^2)^3"), "x^6");
    }
}
