//! Values produced by backend computations
//!
//! Every value has one canonical display, which is what ends up in a
//! result's `final_answer`. Roots are stored sorted descending and
//! deduplicated so equal answers always render identically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use verimath_expr::{format_answer, Equation, Expr};

/// Direction of an optimisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Maximize,
    Minimize,
}

impl Sense {
    /// Whether `candidate` is better than `incumbent` in this direction
    #[inline]
    #[must_use]
    pub fn prefers(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// Word for the extremum, e.g. "maximum"
    #[must_use]
    pub fn noun(self) -> &'static str {
        match self {
            Self::Maximize => "maximum",
            Self::Minimize => "minimum",
        }
    }
}

/// Shape of a value, used to declare a subgoal's expected output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Scalar,
    Expression,
    Roots,
    Assignment,
    Factored,
    FactorEquations,
    Vector,
    Optimum,
    Artifact,
}

/// Output of a backend computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    Scalar {
        value: f64,
    },
    Expression {
        expr: Expr,
    },
    /// Real solutions of a single-variable equation
    Roots {
        variable: String,
        values: Vec<f64>,
    },
    /// Solution of a system
    Assignment {
        values: BTreeMap<String, f64>,
    },
    /// Product form with the individual factors
    Factored {
        expr: Expr,
        factors: Vec<Expr>,
    },
    /// One `factor = 0` equation per factor
    FactorEquations {
        variable: String,
        equations: Vec<Equation>,
    },
    /// Gradient components in variable order
    Vector {
        variables: Vec<String>,
        components: Vec<Expr>,
    },
    Optimum {
        point: BTreeMap<String, f64>,
        value: f64,
        sense: Sense,
    },
    /// Outcome of an external build
    Artifact {
        passed: bool,
        paths: Vec<String>,
    },
}

impl Value {
    /// Roots in canonical order (descending, duplicates within 1e-9 merged)
    #[must_use]
    pub fn roots(variable: impl Into<String>, mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        values.sort_by(|a, b| b.total_cmp(a));
        values.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * a.abs().max(1.0));
        for v in &mut values {
            // -0.0 renders as 0
            if *v == 0.0 {
                *v = 0.0;
            }
        }
        Self::Roots {
            variable: variable.into(),
            values,
        }
    }

    /// A plain number
    #[inline]
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self::Scalar { value }
    }

    /// A symbolic result
    #[inline]
    #[must_use]
    pub fn expression(expr: Expr) -> Self {
        Self::Expression { expr }
    }

    /// Shape of the value
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar { .. } => ValueKind::Scalar,
            Self::Expression { .. } => ValueKind::Expression,
            Self::Roots { .. } => ValueKind::Roots,
            Self::Assignment { .. } => ValueKind::Assignment,
            Self::Factored { .. } => ValueKind::Factored,
            Self::FactorEquations { .. } => ValueKind::FactorEquations,
            Self::Vector { .. } => ValueKind::Vector,
            Self::Optimum { .. } => ValueKind::Optimum,
            Self::Artifact { .. } => ValueKind::Artifact,
        }
    }

    /// The number, if this is a scalar
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar { value } => Some(*value),
            _ => None,
        }
    }

    /// Expression carried by an expression or factored value
    #[must_use]
    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Self::Expression { expr } | Self::Factored { expr, .. } => Some(expr),
            _ => None,
        }
    }

    /// Candidate solutions as variable environments, for substitution checks
    #[must_use]
    pub fn solutions(&self) -> Vec<BTreeMap<String, f64>> {
        match self {
            Self::Roots { variable, values } => values
                .iter()
                .map(|v| BTreeMap::from([(variable.clone(), *v)]))
                .collect(),
            Self::Assignment { values } => vec![values.clone()],
            Self::Optimum { point, .. } => vec![point.clone()],
            _ => Vec::new(),
        }
    }

    /// Plain numbers this value asserts, for sanity checks
    #[must_use]
    pub fn numbers(&self) -> Vec<f64> {
        match self {
            Self::Scalar { value } => vec![*value],
            Self::Roots { values, .. } => values.clone(),
            Self::Assignment { values } => values.values().copied().collect(),
            Self::Optimum { point, value, .. } => {
                point.values().copied().chain(std::iter::once(*value)).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_assignments(values: &BTreeMap<String, f64>) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k} = {}", format_answer(*v)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { value } => f.write_str(&format_answer(*value)),
            Self::Expression { expr } | Self::Factored { expr, .. } => write!(f, "{expr}"),
            Self::Roots { values, .. } if values.is_empty() => f.write_str("no real solutions"),
            Self::Roots { variable, values } => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|v| format!("{variable} = {}", format_answer(*v)))
                    .collect();
                f.write_str(&parts.join(", "))
            }
            Self::Assignment { values } => f.write_str(&join_assignments(values)),
            Self::FactorEquations { equations, .. } => {
                let parts: Vec<String> = equations.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(", "))
            }
            Self::Vector { components, .. } => {
                let parts: Vec<String> = components.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
            Self::Optimum { point, value, sense } => write!(
                f,
                "{}, {} = {}",
                join_assignments(point),
                sense.noun(),
                format_answer(*value)
            ),
            Self::Artifact { passed, paths } => write!(
                f,
                "build {} ({} artifacts)",
                if *passed { "passed" } else { "failed" },
                paths.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn roots_are_canonical() {
        let v = Value::roots("x", vec![-2.0, 2.0, 2.0 + 1e-12]);
        assert_eq!(v.to_string(), "x = 2, x = -2");
        assert_eq!(v.solutions().len(), 2);
    }

    #[test]
    fn empty_roots() {
        assert_eq!(Value::roots("x", vec![]).to_string(), "no real solutions");
    }

    #[test]
    fn optimum_display() {
        let v = Value::Optimum {
            point: BTreeMap::from([("d".to_string(), 5.0)]),
            value: 25.0,
            sense: Sense::Maximize,
        };
        assert_eq!(v.to_string(), "d = 5, maximum = 25");
        assert_eq!(v.numbers(), vec![5.0, 25.0]);
    }

    #[test]
    fn fractions_render_exactly() {
        let v = Value::roots("x", vec![2.0 / 3.0, -0.5]);
        assert_eq!(v.to_string(), "x = 2/3, x = -1/2");
    }

    #[test]
    fn serde_tags_by_kind() {
        let json = serde_json::to_value(Value::scalar(1.5)).unwrap();
        assert_eq!(json["kind"], "scalar");
    }
}
