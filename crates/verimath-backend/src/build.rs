//! Build collaborator boundary
//!
//! Materialising generated artifacts belongs to an external builder. The
//! engine only hands it a `BuildTask` (a self-contained Rust program that
//! re-checks the answer) and reads back a pass/fail report.

use crate::backend::{Backend, BackendRequest, Method};
use crate::error::BackendError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use verimath_expr::Statement;

/// Work order for the external builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTask {
    pub description: String,
    pub generated_code: String,
    pub expected_outputs: Vec<String>,
}

/// What the builder reports back
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub passed: bool,
    pub artifact_paths: Vec<String>,
    pub log: String,
}

/// External builder
#[async_trait::async_trait]
pub trait BuildCollaborator: Send + Sync {
    /// Build and run the task
    async fn build(&self, task: BuildTask) -> Result<BuildReport, BackendError>;
}

/// Rust program asserting that every solution satisfies every equation
#[must_use]
pub fn generate_check_program(statements: &[Statement], solutions: &[BTreeMap<String, f64>]) -> String {
    let mut code = String::from("// generated answer check\n#![allow(unused_variables)]\n\nfn main() {\n");
    for (i, env) in solutions.iter().enumerate() {
        let _ = writeln!(code, "    {{\n        // solution {}", i + 1);
        for (name, value) in env {
            let _ = writeln!(code, "        let {name}: f64 = {value:?};");
        }
        for statement in statements {
            if let Statement::Equation(eq) = statement {
                let _ = writeln!(
                    code,
                    "        let (lhs, rhs) = ({}, {});",
                    eq.lhs.to_rust_source(),
                    eq.rhs.to_rust_source()
                );
                let _ = writeln!(
                    code,
                    "        assert!((lhs - rhs).abs() <= 1e-9 * (1.0 + lhs.abs() + rhs.abs()), \"{eq}\");"
                );
            }
        }
        code.push_str("    }\n");
    }
    code.push_str("    println!(\"check passed\");\n}\n");
    code
}

/// Exposes a `BuildCollaborator` as the backend for `reproduce`
#[derive(Clone)]
pub struct ReproductionBackend {
    collaborator: Arc<dyn BuildCollaborator>,
}

impl std::fmt::Debug for ReproductionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReproductionBackend").finish_non_exhaustive()
    }
}

impl ReproductionBackend {
    /// Reproduction backend delegating to `collaborator`
    #[must_use]
    pub fn new(collaborator: Arc<dyn BuildCollaborator>) -> Self {
        Self { collaborator }
    }
}

#[async_trait::async_trait]
impl Backend for ReproductionBackend {
    fn name(&self) -> &str {
        "reproduction"
    }

    fn capabilities(&self) -> &[Method] {
        &[Method::Reproduce]
    }

    async fn execute(&self, req: &BackendRequest) -> Result<Value, BackendError> {
        let solutions: Vec<BTreeMap<String, f64>> = req.inputs.iter().flat_map(Value::solutions).collect();
        if solutions.is_empty() {
            return Err(BackendError::MissingInput("answer to reproduce".into()));
        }
        let task = BuildTask {
            description: format!(
                "re-check {} solution(s) against {} statement(s)",
                solutions.len(),
                req.statements.len()
            ),
            generated_code: generate_check_program(&req.statements, &solutions),
            expected_outputs: vec!["check passed".to_string()],
        };
        tracing::info!(description = %task.description, "requesting reproduction build");
        let report = self.collaborator.build(task).await?;
        if !report.passed {
            return Err(BackendError::Build(report.log));
        }
        Ok(Value::Artifact {
            passed: true,
            paths: report.artifact_paths,
        })
    }
}
