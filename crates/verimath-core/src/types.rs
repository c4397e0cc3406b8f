//! Core types for the engine
//!
//! Defines the values that flow between pipeline stages:
//! - Run identifiers and compute tiers
//! - Intent (detector output) and Problem (parser output)
//! - Subgoals and plans
//! - Step results and per-attempt execution results
//! - Resource budgets

use crate::error::ModeError;
use crate::impact::ImpactCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use ulid::Ulid;
use verimath_backend::{Method, Sense, Value, ValueKind};
use verimath_expr::{Constraint, Statement};

/// Unique identifier of one `process` call (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much compute an attempt may spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTier {
    Light,
    #[default]
    Standard,
    DeepSearch,
}

impl ComputeTier {
    /// Next tier up; `deep_search` stays where it is
    #[inline]
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Self::Light => Self::Standard,
            Self::Standard | Self::DeepSearch => Self::DeepSearch,
        }
    }

    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::DeepSearch => "deep_search",
        }
    }
}

impl fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mathematical domain of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[default]
    Algebra,
    Calculus,
    LinearAlgebra,
    Probability,
    NumberTheory,
    Optimization,
    Statistics,
    DifferentialEquations,
}

impl Domain {
    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Algebra => "algebra",
            Self::Calculus => "calculus",
            Self::LinearAlgebra => "linear_algebra",
            Self::Probability => "probability",
            Self::NumberTheory => "number_theory",
            Self::Optimization => "optimization",
            Self::Statistics => "statistics",
            Self::DifferentialEquations => "differential_equations",
        }
    }
}

/// What the query asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Prove,
    Optimize,
    Gradient,
    Differentiate,
    Integrate,
    Factor,
    Expand,
    Simplify,
    Solve,
    #[default]
    Compute,
}

impl ProblemType {
    /// Snake-case name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Prove => "prove",
            Self::Optimize => "optimize",
            Self::Gradient => "gradient",
            Self::Differentiate => "differentiate",
            Self::Integrate => "integrate",
            Self::Factor => "factor",
            Self::Expand => "expand",
            Self::Simplify => "simplify",
            Self::Solve => "solve",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detector output, produced once per query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub is_math: bool,
    /// In `[0, 1]`
    pub confidence: f64,
    pub problem_type: ProblemType,
    pub domain: Domain,
    pub impact_category: Option<ImpactCategory>,
    pub compute_tier: ComputeTier,
    pub requires_explanation: bool,
    /// `domain:pattern` labels, for the audit trail
    pub keywords_matched: Vec<String>,
    pub raw_query: String,
}

/// Structured problem, immutable once parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Canonical one-line statement of what is asked
    pub goal: String,
    pub goal_type: ProblemType,
    /// Equations, or the expression being operated on
    pub knowns: Vec<Statement>,
    pub unknowns: Vec<String>,
    pub constraints: Vec<Constraint>,
    pub domain: Domain,
    pub interval: Option<(f64, f64)>,
    pub sense: Option<Sense>,
    /// Derivative order for `differentiate`
    pub order: u32,
    pub raw: String,
}

impl Problem {
    /// More than one equation or unknown
    #[inline]
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.knowns.len() > 1 || self.unknowns.len() > 1
    }

    /// First unknown, if any
    #[must_use]
    pub fn primary_unknown(&self) -> Option<&str> {
        self.unknowns.first().map(String::as_str)
    }

    /// First known statement
    #[must_use]
    pub fn primary(&self) -> Option<&Statement> {
        self.knowns.first()
    }

    /// Stable text used for hashing; independent of how the query was phrased
    #[must_use]
    pub fn canonical(&self) -> String {
        let knowns: Vec<String> = self.knowns.iter().map(ToString::to_string).collect();
        let constraints: Vec<String> = self.constraints.iter().map(ToString::to_string).collect();
        let mut text = format!(
            "{}|{}|{}|{}",
            self.goal_type,
            knowns.join("; "),
            self.unknowns.join(","),
            constraints.join("; ")
        );
        if let Some((a, b)) = self.interval {
            text.push_str(&format!("|[{a}, {b}]"));
        }
        if let Some(sense) = self.sense {
            text.push_str(&format!("|{}", sense.noun()));
        }
        if self.order != 1 {
            text.push_str(&format!("|order {}", self.order));
        }
        text
    }
}

/// What a subgoal works on, beyond its dependencies' outputs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubgoalInputs {
    pub statements: Vec<Statement>,
    pub variables: Vec<String>,
    pub constraints: Vec<Constraint>,
    pub interval: Option<(f64, f64)>,
    pub sense: Option<Sense>,
    pub order: u32,
}

/// One node of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgoal {
    pub id: String,
    pub description: String,
    pub method: Method,
    /// Backend names in dispatch order
    pub backend_preference: Vec<String>,
    pub dependencies: BTreeSet<String>,
    pub expected_output_type: ValueKind,
    pub inputs: SubgoalInputs,
}

/// Subgoal DAG with its parallel partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Declared order; also the order of `ExecutionResult::steps`
    pub subgoals: Vec<Subgoal>,
    /// Groups run in order; members of one group may run concurrently
    pub parallel_groups: Vec<BTreeSet<String>>,
    pub search_budget: ResourceBudget,
    /// Template name
    pub approach: String,
    /// Runner-up templates, best first
    pub fallback_approaches: Vec<String>,
    /// Subgoal whose output is the final answer
    pub answer_id: String,
    pub score: f64,
}

impl Plan {
    /// Subgoal by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Subgoal> {
        self.subgoals.iter().find(|s| s.id == id)
    }

    /// Index in declared order
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.subgoals.iter().position(|s| s.id == id)
    }

    /// Group index of a subgoal
    #[must_use]
    pub fn group_of(&self, id: &str) -> Option<usize> {
        self.parallel_groups.iter().position(|g| g.contains(id))
    }

    /// The subgoal producing the final answer
    #[must_use]
    pub fn answer(&self) -> Option<&Subgoal> {
        self.get(&self.answer_id)
    }
}

/// Outcome of one executed subgoal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub subgoal_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub backend_used: Option<String>,
    pub method_used: Method,
    pub duration_ms: u64,
    pub error: Option<ModeError>,
}

/// One attempt's execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Canonical text of the answer
    pub final_answer: Option<String>,
    pub final_answer_value: Option<Value>,
    /// In declared plan order
    pub steps: Vec<StepResult>,
    pub backends_used: Vec<String>,
    /// Failure that stopped the attempt
    pub error: Option<ModeError>,
    pub elapsed_ms: u64,
    pub approach: String,
    /// Most subgoals observed running at once
    pub peak_concurrency: usize,
}

impl ExecutionResult {
    /// Step for a subgoal id
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.subgoal_id == id)
    }
}

/// Limits selected by compute tier at the start of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_wall_time_ms: u64,
    pub max_plan_alternatives: usize,
    pub max_solutions_per_plan: usize,
    pub max_verification_paths: usize,
    pub max_workers: usize,
}

impl ResourceBudget {
    /// Wall-clock limit as a `Duration`
    #[inline]
    #[must_use]
    pub fn max_wall_time(&self) -> Duration {
        Duration::from_millis(self.max_wall_time_ms)
    }

    /// Override the wall-clock limit
    #[inline]
    #[must_use]
    pub fn with_wall_time(mut self, wall_time: Duration) -> Self {
        self.max_wall_time_ms = u64::try_from(wall_time.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Budget for quick checks
    #[must_use]
    pub fn light() -> Self {
        Self {
            max_wall_time_ms: 5_000,
            max_plan_alternatives: 1,
            max_solutions_per_plan: 4,
            max_verification_paths: 2,
            max_workers: 1,
        }
    }

    /// Budget for ordinary problems
    #[must_use]
    pub fn standard() -> Self {
        Self {
            max_wall_time_ms: 30_000,
            max_plan_alternatives: 3,
            max_solutions_per_plan: 8,
            max_verification_paths: 4,
            max_workers: 4,
        }
    }

    /// Budget for searches and retries
    #[must_use]
    pub fn deep_search() -> Self {
        Self {
            max_wall_time_ms: 300_000,
            max_plan_alternatives: 10,
            max_solutions_per_plan: 32,
            max_verification_paths: 8,
            max_workers: 8,
        }
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::standard()
    }
}
