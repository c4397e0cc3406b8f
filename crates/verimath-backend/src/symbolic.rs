//! Exact backend: factoring, closed-form roots, Cramer's rule, calculus
//!
//! Everything here is derived from the expression tree. Approximation only
//! enters through the final `f64` evaluation of exact formulas.

use crate::backend::{Backend, BackendRequest, Method};
use crate::error::BackendError;
use crate::linalg::LinearSystem;
use crate::value::Value;
use std::collections::BTreeMap;
use verimath_expr::{
    differentiate, differentiate_n, factor, quadratic_roots, simplify, Equation, Expr, Func, Poly,
    UniPoly,
};

const CAPABILITIES: &[Method] = &[
    Method::Solve,
    Method::LinearSolve,
    Method::Factor,
    Method::ZeroProduct,
    Method::Expand,
    Method::Simplify,
    Method::Differentiate,
    Method::Integrate,
    Method::DefiniteIntegral,
    Method::Gradient,
    Method::Evaluate,
    Method::SelectExtremum,
    Method::FilterConstraints,
];

/// Symbolic computation backend
#[derive(Debug, Clone)]
pub struct SymbolicBackend {
    name: String,
}

impl Default for SymbolicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolicBackend {
    /// Exact polynomial and calculus backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "symbolic".to_string(),
        }
    }

    /// Same backend under a different registry key
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn solve(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let equations = req.find_input(|v| match v {
            Value::FactorEquations { equations, .. } => Some(equations),
            _ => None,
        });
        let roots = match equations {
            Some(equations) => {
                let mut roots = Vec::new();
                for eq in equations {
                    roots.extend(closed_form_roots(&UniPoly::from_expr(&eq.residual(), var)?)?);
                }
                roots
            }
            None => closed_form_roots(&UniPoly::from_expr(&req.working_expr()?, var)?)?,
        };
        let value = Value::roots(var, roots);
        if let Value::Roots { values, .. } = &value {
            req.check_solution_count(values.len())?;
        }
        Ok(value)
    }

    fn factor(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let target = req.working_expr()?;
        let p = UniPoly::from_expr(&target, var)?;
        let f = factor(&p).ok_or_else(|| BackendError::NoClosedForm(format!("cannot factor {target}")))?;
        Ok(Value::Factored {
            expr: f.to_expr(var),
            factors: f.factors(var).into_iter().map(|(e, _)| e).collect(),
        })
    }

    fn zero_product(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let factors = req
            .find_input(|v| match v {
                Value::Factored { factors, .. } => Some(factors),
                _ => None,
            })
            .ok_or_else(|| BackendError::MissingInput("factored form".into()))?;
        Ok(Value::FactorEquations {
            variable: var.to_string(),
            equations: factors
                .iter()
                .map(|f| Equation::new(f.clone(), Expr::Num(0.0)))
                .collect(),
        })
    }

    /// Cramer's rule
    fn linear_solve(req: &BackendRequest) -> Result<Value, BackendError> {
        let system = LinearSystem::from_request(req)?;
        let x = system.cramer()?;
        Ok(Value::Assignment {
            values: system.variables.into_iter().zip(x).collect(),
        })
    }

    fn simplify(req: &BackendRequest) -> Result<Value, BackendError> {
        let target = req.working_expr()?;
        let expr = match Poly::from_expr(&target) {
            Ok(p) => p.to_expr(),
            Err(_) => simplify(&target),
        };
        Ok(Value::expression(expr))
    }

    fn gradient(req: &BackendRequest) -> Result<Value, BackendError> {
        let partials: Vec<Expr> = req
            .inputs
            .iter()
            .filter_map(|v| match v {
                Value::Expression { expr } => Some(expr.clone()),
                _ => None,
            })
            .collect();
        if !partials.is_empty() {
            if partials.len() != req.variables.len() {
                return Err(BackendError::MissingInput(format!(
                    "{} partial derivatives for {} variables",
                    partials.len(),
                    req.variables.len()
                )));
            }
            return Ok(Value::Vector {
                variables: req.variables.clone(),
                components: partials,
            });
        }
        let target = req.target()?;
        let variables: Vec<String> = if req.variables.is_empty() {
            target.variables().into_iter().collect()
        } else {
            req.variables.clone()
        };
        let components = variables.iter().map(|v| differentiate(&target, v)).collect();
        Ok(Value::Vector {
            variables,
            components,
        })
    }

    fn definite_integral(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let (a, b) = req
            .interval
            .ok_or_else(|| BackendError::MissingInput("interval".into()))?;
        let antiderivative = antiderivative(&req.working_expr()?, var)?;
        let value = antiderivative.eval_at(var, b)? - antiderivative.eval_at(var, a)?;
        if !value.is_finite() {
            return Err(BackendError::NoClosedForm("improper integral".into()));
        }
        Ok(Value::scalar(value))
    }

    fn evaluate(req: &BackendRequest) -> Result<Value, BackendError> {
        let target = simplify(&req.working_expr()?);
        Ok(Value::scalar(target.eval(&BTreeMap::new())?))
    }

    /// Second-order condition over critical points, plus interval endpoints
    fn select_extremum(req: &BackendRequest) -> Result<Value, BackendError> {
        let var = req.variable()?;
        let sense = req
            .sense
            .ok_or_else(|| BackendError::MissingInput("optimisation sense".into()))?;
        let objective = req.target()?;
        let critical = req
            .find_input(|v| match v {
                Value::Roots { values, .. } => Some(values.clone()),
                _ => None,
            })
            .ok_or_else(|| BackendError::MissingInput("critical points".into()))?;
        let second = req
            .find_input(Value::as_expr)
            .cloned()
            .unwrap_or_else(|| differentiate_n(&objective, var, 2));

        let mut candidates = Vec::new();
        for c in critical {
            let curvature = second.eval_at(var, c)?;
            let qualifies = match sense {
                crate::Sense::Maximize => curvature < 0.0,
                crate::Sense::Minimize => curvature > 0.0,
            };
            if qualifies {
                candidates.push(c);
            }
        }
        candidates.extend(closed_bounds(req, var));

        let mut best: Option<(f64, f64)> = None;
        for x in candidates {
            let env = BTreeMap::from([(var.to_string(), x)]);
            if !admissible(req, &env)? {
                continue;
            }
            let value = objective.eval(&env)?;
            if !value.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, v)| sense.prefers(value, v)) {
                best = Some((x, value));
            }
        }
        let (x, value) = best.ok_or_else(|| {
            BackendError::NoSolution(format!("no admissible {} of {objective}", sense.noun()))
        })?;
        Ok(Value::Optimum {
            point: BTreeMap::from([(var.to_string(), x)]),
            value,
            sense,
        })
    }

    fn filter_constraints(req: &BackendRequest) -> Result<Value, BackendError> {
        let candidate = req
            .inputs
            .iter()
            .find(|v| !v.solutions().is_empty() || matches!(v, Value::Roots { .. }))
            .ok_or_else(|| BackendError::MissingInput("candidate solutions".into()))?;
        match candidate {
            Value::Roots { variable, values } => {
                let mut kept = Vec::new();
                for v in values {
                    let env = BTreeMap::from([(variable.clone(), *v)]);
                    if admissible(req, &env)? {
                        kept.push(*v);
                    }
                }
                Ok(Value::roots(variable.clone(), kept))
            }
            other => {
                for env in other.solutions() {
                    if !admissible(req, &env)? {
                        return Err(BackendError::NoSolution(format!("{other} violates the constraints")));
                    }
                }
                Ok(other.clone())
            }
        }
    }
}

/// Exact roots of a polynomial whose irreducible part has degree at most two
fn closed_form_roots(p: &UniPoly) -> Result<Vec<f64>, BackendError> {
    let c = p.coeffs();
    match p.degree() {
        0 if p.is_zero() => Err(BackendError::NoClosedForm("identity holds for every value".into())),
        0 => Ok(Vec::new()),
        1 => Ok(vec![-c[0] / c[1]]),
        _ => match factor(p) {
            Some(f) if f.remainder.degree() <= 2 => Ok(f.real_roots()),
            Some(f) => Err(BackendError::NoClosedForm(format!(
                "irreducible factor of degree {}",
                f.remainder.degree()
            ))),
            None if p.degree() == 2 => Ok(quadratic_roots(c[2], c[1], c[0])),
            None => Err(BackendError::NoClosedForm(format!("degree {} with inexact coefficients", p.degree()))),
        },
    }
}

/// Interval endpoints and non-strict bounds on `var`
fn closed_bounds(req: &BackendRequest, var: &str) -> Vec<f64> {
    let mut out: Vec<f64> = req.interval.map(|(a, b)| vec![a, b]).unwrap_or_default();
    for c in &req.constraints {
        if let Some((name, relation, value)) = c.as_bound() {
            if name == var && matches!(relation, verimath_expr::Relation::Le | verimath_expr::Relation::Ge) {
                out.push(value);
            }
        }
    }
    out
}

/// Constraints and interval both hold at `env`
pub(crate) fn admissible(req: &BackendRequest, env: &BTreeMap<String, f64>) -> Result<bool, BackendError> {
    for c in &req.constraints {
        if !c.holds(env, &req.tolerance)? {
            return Ok(false);
        }
    }
    if let (Some((a, b)), Ok(var)) = (req.interval, req.variable()) {
        if let Some(x) = env.get(var) {
            let tol = &req.tolerance;
            let inside = (*x >= a || tol.is_close(*x, a)) && (*x <= b || tol.is_close(*x, b));
            return Ok(inside);
        }
    }
    Ok(true)
}

/// `a` and `b` when `u = a*var + b`
fn linear_coefficient(u: &Expr, var: &str) -> Option<f64> {
    let p = UniPoly::from_expr(u, var).ok()?;
    (p.degree() == 1).then(|| p.coeffs()[1])
}

/// Antiderivative for polynomials and the elementary table, linear arguments only
pub(crate) fn antiderivative(expr: &Expr, var: &str) -> Result<Expr, BackendError> {
    if let Ok(p) = UniPoly::from_expr(expr, var) {
        return Ok(p.antiderivative().to_expr(var));
    }
    let expr = simplify(expr);
    if !expr.contains_var(var) {
        return Ok(simplify(&Expr::mul(expr, Expr::var(var))));
    }
    let integrated = match &expr {
        Expr::Add(a, b) => Expr::add(antiderivative(a, var)?, antiderivative(b, var)?),
        Expr::Sub(a, b) => Expr::sub(antiderivative(a, var)?, antiderivative(b, var)?),
        Expr::Neg(a) => Expr::neg(antiderivative(a, var)?),
        Expr::Mul(k, e) if !k.contains_var(var) => Expr::mul((**k).clone(), antiderivative(e, var)?),
        Expr::Div(k, x) if !k.contains_var(var) && **x == Expr::var(var) => Expr::mul(
            (**k).clone(),
            Expr::call(Func::Ln, Expr::call(Func::Abs, Expr::var(var))),
        ),
        Expr::Call(f, u) => {
            let a = linear_coefficient(u, var)
                .ok_or_else(|| BackendError::NoClosedForm(format!("no antiderivative for {expr}")))?;
            let outer = match f {
                Func::Sin => Expr::neg(Expr::call(Func::Cos, (**u).clone())),
                Func::Cos => Expr::call(Func::Sin, (**u).clone()),
                Func::Exp => Expr::call(Func::Exp, (**u).clone()),
                _ => return Err(BackendError::NoClosedForm(format!("no antiderivative for {expr}"))),
            };
            Expr::div(outer, Expr::Num(a))
        }
        _ => return Err(BackendError::NoClosedForm(format!("no antiderivative for {expr}"))),
    };
    Ok(simplify(&integrated))
}

#[async_trait::async_trait]
impl Backend for SymbolicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Method] {
        CAPABILITIES
    }

    fn can_handle(&self, req: &BackendRequest) -> bool {
        if !CAPABILITIES.contains(&req.method) {
            return false;
        }
        let polynomial_in_var = || match (req.working_expr(), req.variable()) {
            (Ok(expr), Ok(var)) => UniPoly::from_expr(&expr, var).is_ok(),
            _ => false,
        };
        match req.method {
            Method::Solve => {
                req.inputs.iter().any(|v| matches!(v, Value::FactorEquations { .. })) || polynomial_in_var()
            }
            Method::Factor => polynomial_in_var(),
            Method::LinearSolve => LinearSystem::from_request(req).is_ok(),
            Method::Integrate | Method::DefiniteIntegral => match (req.working_expr(), req.variable()) {
                (Ok(expr), Ok(var)) => antiderivative(&expr, var).is_ok(),
                _ => false,
            },
            Method::Evaluate => req.working_expr().is_ok_and(|e| e.is_constant()),
            _ => true,
        }
    }

    async fn execute(&self, req: &BackendRequest) -> Result<Value, BackendError> {
        tracing::debug!(backend = %self.name, method = %req.method, "symbolic execute");
        match req.method {
            Method::Solve => Self::solve(req),
            Method::Factor => Self::factor(req),
            Method::ZeroProduct => Self::zero_product(req),
            Method::LinearSolve => Self::linear_solve(req),
            Method::Expand => {
                let expr = Poly::from_expr(&req.working_expr()?)?.to_expr();
                Ok(Value::expression(expr))
            }
            Method::Simplify => Self::simplify(req),
            Method::Differentiate => {
                let var = req.variable()?;
                Ok(Value::expression(differentiate_n(&req.working_expr()?, var, req.order)))
            }
            Method::Integrate => {
                let var = req.variable()?;
                Ok(Value::expression(antiderivative(&req.working_expr()?, var)?))
            }
            Method::DefiniteIntegral => Self::definite_integral(req),
            Method::Gradient => Self::gradient(req),
            Method::Evaluate => Self::evaluate(req),
            Method::SelectExtremum => Self::select_extremum(req),
            Method::FilterConstraints => Self::filter_constraints(req),
            other => Err(BackendError::Unsupported {
                backend: self.name.clone(),
                method: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Sense;
    use pretty_assertions::assert_eq;
    use verimath_expr::{parse_constraint, parse_statement};

    fn request(method: Method, statement: &str, var: &str) -> BackendRequest {
        BackendRequest::new(method)
            .with_statement(parse_statement(statement).unwrap())
            .with_variable(var)
    }

    #[tokio::test]
    async fn solves_quadratic_exactly() {
        let backend = SymbolicBackend::new();
        let value = backend
            .execute(&request(Method::Solve, "x^2 - 4 = 0", "x"))
            .await
            .unwrap();
        assert_eq!(value.to_string(), "x = 2, x = -2");
    }

    #[tokio::test]
    async fn factor_then_zero_product_then_solve() {
        let backend = SymbolicBackend::new();
        let factored = backend
            .execute(&request(Method::Factor, "x^3 - 6x^2 + 11x - 6 = 0", "x"))
            .await
            .unwrap();
        assert_eq!(factored.to_string(), "(x - 3)*(x - 2)*(x - 1)");

        let split = backend
            .execute(&BackendRequest::new(Method::ZeroProduct).with_variable("x").with_inputs(vec![factored]))
            .await
            .unwrap();
        let solved = backend
            .execute(&BackendRequest::new(Method::Solve).with_variable("x").with_inputs(vec![split]))
            .await
            .unwrap();
        assert_eq!(solved.to_string(), "x = 3, x = 2, x = 1");
    }

    #[tokio::test]
    async fn cramer_rule() {
        let backend = SymbolicBackend::new();
        let req = BackendRequest::new(Method::LinearSolve)
            .with_statements(vec![
                parse_statement("x + y = 3").unwrap(),
                parse_statement("x - y = 1").unwrap(),
            ])
            .with_variables(vec!["x".into(), "y".into()]);
        assert!(backend.can_handle(&req));
        assert_eq!(backend.execute(&req).await.unwrap().to_string(), "x = 2, y = 1");
    }

    #[tokio::test]
    async fn singular_system_is_an_error() {
        let backend = SymbolicBackend::new();
        let req = BackendRequest::new(Method::LinearSolve).with_statements(vec![
            parse_statement("x + y = 3").unwrap(),
            parse_statement("2x + 2y = 6").unwrap(),
        ]);
        assert!(matches!(backend.execute(&req).await, Err(BackendError::Singular(_))));
    }

    #[tokio::test]
    async fn resource_limit_on_too_many_roots() {
        let backend = SymbolicBackend::new();
        let req = request(Method::Solve, "x^2 - 4 = 0", "x").with_max_solutions(1);
        assert!(backend.execute(&req).await.unwrap_err().is_resource_limit());
    }

    #[tokio::test]
    async fn selects_maximum_by_second_derivative() {
        let backend = SymbolicBackend::new();
        let req = request(Method::SelectExtremum, "10d - d^2", "d")
            .with_sense(Some(Sense::Maximize))
            .with_inputs(vec![Value::roots("d", vec![5.0])]);
        assert_eq!(backend.execute(&req).await.unwrap().to_string(), "d = 5, maximum = 25");
    }

    #[tokio::test]
    async fn filters_roots_by_constraint() {
        let backend = SymbolicBackend::new();
        let req = BackendRequest::new(Method::FilterConstraints)
            .with_variable("x")
            .with_constraints(vec![parse_constraint("x > 0").unwrap()])
            .with_inputs(vec![Value::roots("x", vec![2.0, -2.0])]);
        assert_eq!(backend.execute(&req).await.unwrap().to_string(), "x = 2");
    }

    #[tokio::test]
    async fn integrals() {
        let backend = SymbolicBackend::new();
        let indefinite = backend
            .execute(&request(Method::Integrate, "3x^2", "x"))
            .await
            .unwrap();
        assert_eq!(indefinite.to_string(), "x^3");

        let definite = request(Method::DefiniteIntegral, "2x", "x").with_interval(Some((0.0, 3.0)));
        assert_eq!(backend.execute(&definite).await.unwrap().as_scalar(), Some(9.0));

        let trig = antiderivative(&verimath_expr::parse_expr("cos(2x)").unwrap(), "x").unwrap();
        assert!((trig.eval_at("x", 0.3).unwrap() - (0.6f64).sin() / 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn capability_check_rejects_non_polynomials() {
        let backend = SymbolicBackend::new();
        assert!(!backend.can_handle(&request(Method::Solve, "sin(x) = 0.5", "x")));
        assert!(!backend.can_handle(&request(Method::RootFind, "x = 1", "x")));
        assert!(backend.can_handle(&request(Method::Solve, "x^2 = 9", "x")));
    }

    #[tokio::test]
    async fn gradient_assembles_partials() {
        let backend = SymbolicBackend::new();
        let req = request(Method::Gradient, "x^2 + x*y", "x").with_variables(vec!["x".into(), "y".into()]);
        assert_eq!(backend.execute(&req).await.unwrap().to_string(), "(2*x + y, x)");
    }
}
