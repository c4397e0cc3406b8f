//! Backend contract
//!
//! A backend declares the methods it implements and answers a per-request
//! capability query before it is asked to execute. The executor never
//! dispatches a request to a backend whose `can_handle` returned false.

use crate::error::BackendError;
use crate::value::{Sense, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use verimath_expr::{Constraint, Expr, Statement, Tolerance};

/// Computation a subgoal asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Solve,
    SolveSystem,
    LinearSolve,
    Factor,
    ZeroProduct,
    Expand,
    Simplify,
    Differentiate,
    Integrate,
    DefiniteIntegral,
    Gradient,
    Evaluate,
    RootFind,
    Optimize,
    SelectExtremum,
    FilterConstraints,
    Reproduce,
}

impl Method {
    /// Every method, in declaration order
    pub const ALL: [Method; 17] = [
        Method::Solve,
        Method::SolveSystem,
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
        Method::RootFind,
        Method::Optimize,
        Method::SelectExtremum,
        Method::FilterConstraints,
        Method::Reproduce,
    ];

    /// Snake-case name used in plans and logs
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Solve => "solve",
            Self::SolveSystem => "solve_system",
            Self::LinearSolve => "linear_solve",
            Self::Factor => "factor",
            Self::ZeroProduct => "zero_product",
            Self::Expand => "expand",
            Self::Simplify => "simplify",
            Self::Differentiate => "differentiate",
            Self::Integrate => "integrate",
            Self::DefiniteIntegral => "definite_integral",
            Self::Gradient => "gradient",
            Self::Evaluate => "evaluate",
            Self::RootFind => "root_find",
            Self::Optimize => "optimize",
            Self::SelectExtremum => "select_extremum",
            Self::FilterConstraints => "filter_constraints",
            Self::Reproduce => "reproduce",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a backend needs to run one subgoal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub method: Method,
    /// Equations or expressions the method works on
    pub statements: Vec<Statement>,
    /// Unknowns, in the order results should report them
    pub variables: Vec<String>,
    pub constraints: Vec<Constraint>,
    /// Search or integration interval
    pub interval: Option<(f64, f64)>,
    pub sense: Option<Sense>,
    /// Derivative order for `differentiate`
    pub order: u32,
    /// Upper bound on enumerated solutions
    pub max_solutions: usize,
    /// Outputs of the subgoal's dependencies, in dependency order
    pub inputs: Vec<Value>,
    pub tolerance: Tolerance,
}

impl BackendRequest {
    /// Request for `method` with nothing attached
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            statements: Vec::new(),
            variables: Vec::new(),
            constraints: Vec::new(),
            interval: None,
            sense: None,
            order: 1,
            max_solutions: usize::MAX,
            inputs: Vec::new(),
            tolerance: Tolerance::default(),
        }
    }

    /// Add a statement
    #[must_use]
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Replace the statements
    #[must_use]
    pub fn with_statements(mut self, statements: Vec<Statement>) -> Self {
        self.statements = statements;
        self
    }

    /// Add an unknown
    #[must_use]
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variables.push(variable.into());
        self
    }

    /// Replace the unknowns
    #[must_use]
    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }

    /// Constraints the answer must satisfy
    #[must_use]
    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Search or integration interval
    #[must_use]
    pub fn with_interval(mut self, interval: Option<(f64, f64)>) -> Self {
        self.interval = interval;
        self
    }

    /// Optimisation direction
    #[must_use]
    pub fn with_sense(mut self, sense: Option<Sense>) -> Self {
        self.sense = sense;
        self
    }

    /// Derivative order
    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Stop after this many solutions
    #[must_use]
    pub fn with_max_solutions(mut self, max_solutions: usize) -> Self {
        self.max_solutions = max_solutions;
        self
    }

    /// Outputs of earlier steps
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Numeric tolerance
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// First unknown
    ///
    /// # Errors
    /// `BackendError::MissingInput` when no variable was given.
    pub fn variable(&self) -> Result<&str, BackendError> {
        self.variables
            .first()
            .map(String::as_str)
            .ok_or_else(|| BackendError::MissingInput("variable".into()))
    }

    /// Expression the first statement is about (residual for equations)
    ///
    /// # Errors
    /// `BackendError::MissingInput` when there is no statement.
    pub fn target(&self) -> Result<Expr, BackendError> {
        self.statements
            .first()
            .map(Statement::target)
            .ok_or_else(|| BackendError::MissingInput("statement".into()))
    }

    /// Expression produced by a dependency, else the first statement's target
    ///
    /// # Errors
    /// `BackendError::MissingInput` when neither is present.
    pub fn working_expr(&self) -> Result<Expr, BackendError> {
        match self.find_input(Value::as_expr) {
            Some(expr) => Ok(expr.clone()),
            None => self.target(),
        }
    }

    /// First dependency output matching `pick`
    pub fn find_input<'a, T>(&'a self, pick: impl Fn(&'a Value) -> Option<T>) -> Option<T> {
        self.inputs.iter().find_map(pick)
    }

    /// Fail with `ResourceLimit` when `found` exceeds the budget
    ///
    /// # Errors
    /// `BackendError::ResourceLimit`.
    pub fn check_solution_count(&self, found: usize) -> Result<(), BackendError> {
        if found > self.max_solutions {
            return Err(BackendError::ResourceLimit {
                found,
                limit: self.max_solutions,
            });
        }
        Ok(())
    }
}

/// Computation backend
///
/// Implement this trait to plug a new solver into the registry.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// Methods this backend implements
    fn capabilities(&self) -> &[Method];

    /// Whether this backend accepts this particular request
    ///
    /// The default only checks the method; backends narrow it by input shape.
    fn can_handle(&self, request: &BackendRequest) -> bool {
        self.capabilities().contains(&request.method)
    }

    /// Run the request
    async fn execute(&self, request: &BackendRequest) -> Result<Value, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use verimath_expr::parse_statement;

    #[test]
    fn method_names_round_trip_through_serde() {
        for method in Method::ALL {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.name()));
        }
    }

    #[test]
    fn request_accessors() {
        let req = BackendRequest::new(Method::Solve)
            .with_statement(parse_statement("x^2 = 4").unwrap())
            .with_variable("x")
            .with_max_solutions(1);
        assert_eq!(req.variable().unwrap(), "x");
        assert_eq!(req.target().unwrap().to_string(), "x^2 - 4");
        assert!(req.check_solution_count(2).unwrap_err().is_resource_limit());
        assert!(BackendRequest::new(Method::Solve).variable().is_err());
    }
}
