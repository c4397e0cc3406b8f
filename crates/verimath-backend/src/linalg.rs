//! Dense linear systems shared by the symbolic and numeric backends

use crate::backend::BackendRequest;
use crate::error::BackendError;
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;
use verimath_expr::Poly;

/// Pivots this small relative to the largest entry count as zero
const SINGULAR_RATIO: f64 = 1e-12;

/// `A x = b` over named unknowns
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinearSystem {
    pub(crate) variables: Vec<String>,
    pub(crate) matrix: DMatrix<f64>,
    pub(crate) rhs: DVector<f64>,
}

impl LinearSystem {
    /// Extract a square linear system from the request's equations
    pub(crate) fn from_request(req: &BackendRequest) -> Result<Self, BackendError> {
        let variables: Vec<String> = if req.variables.is_empty() {
            req.statements
                .iter()
                .flat_map(verimath_expr::Statement::variables)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            req.variables.clone()
        };
        let n = variables.len();
        if req.statements.len() != n {
            return Err(BackendError::Singular(format!(
                "{} equations in {} unknowns",
                req.statements.len(),
                n
            )));
        }

        let mut entries = Vec::with_capacity(n * n);
        let mut rhs = Vec::with_capacity(n);
        for statement in &req.statements {
            let residual = statement.target();
            let (coeffs, constant) = Poly::from_expr(&residual)?
                .linear_parts()
                .ok_or_else(|| BackendError::NoClosedForm(format!("{residual} is not linear")))?;
            if let Some(stray) = coeffs.keys().find(|v| !variables.contains(v)) {
                return Err(BackendError::MissingInput(format!("unknown '{stray}' not requested")));
            }
            entries.extend(variables.iter().map(|v| coeffs.get(v).copied().unwrap_or(0.0)));
            rhs.push(-constant);
        }
        Ok(Self {
            variables,
            matrix: DMatrix::from_row_slice(n, n, &entries),
            rhs: DVector::from_vec(rhs),
        })
    }

    /// Largest absolute entry, at least one; the scale for singularity tests
    pub(crate) fn scale(&self) -> f64 {
        scale_of(&self.matrix)
    }

    /// Cramer's rule: each unknown is a ratio of determinants
    pub(crate) fn cramer(&self) -> Result<Vec<f64>, BackendError> {
        let det = self.matrix.determinant();
        if det.abs() <= SINGULAR_RATIO * self.scale() {
            return Err(BackendError::Singular("determinant is zero".into()));
        }
        Ok((0..self.variables.len())
            .map(|i| {
                let mut replaced = self.matrix.clone();
                replaced.set_column(i, &self.rhs);
                replaced.determinant() / det
            })
            .collect())
    }

    /// LU factorisation with partial pivoting
    pub(crate) fn lu_solve(&self) -> Result<Vec<f64>, BackendError> {
        lu_solve(self.matrix.clone(), &self.rhs)
    }
}

pub(crate) fn scale_of(matrix: &DMatrix<f64>) -> f64 {
    matrix.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()))
}

/// Solve `matrix * x = rhs`, rejecting near-singular pivots
pub(crate) fn lu_solve(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<Vec<f64>, BackendError> {
    let scale = scale_of(&matrix);
    let lu = matrix.lu();
    if let Some(col) = lu
        .u()
        .diagonal()
        .iter()
        .position(|pivot| pivot.abs() <= SINGULAR_RATIO * scale)
    {
        return Err(BackendError::Singular(format!("no pivot in column {}", col + 1)));
    }
    lu.solve(rhs)
        .map(|x| x.iter().copied().collect())
        .ok_or_else(|| BackendError::Singular("matrix is not invertible".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinant_with_row_swap() {
        let m = DMatrix::<f64>::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        assert!((m.determinant() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn lu_solves_and_detects_singularity() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, -1.0]);
        let x = lu_solve(a, &DVector::from_vec(vec![3.0, 1.0])).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12 && (x[1] - 1.0).abs() < 1e-12);

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(matches!(
            lu_solve(singular, &DVector::from_vec(vec![1.0, 2.0])),
            Err(BackendError::Singular(_))
        ));
    }

    #[test]
    fn cramer_agrees_with_lu() {
        let system = LinearSystem {
            variables: vec!["x".into(), "y".into(), "z".into()],
            matrix: DMatrix::from_row_slice(3, 3, &[2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0]),
            rhs: DVector::from_vec(vec![8.0, -11.0, -3.0]),
        };
        let by_cramer = system.cramer().unwrap();
        let by_lu = system.lu_solve().unwrap();
        for (a, b) in by_cramer.iter().zip(&by_lu) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!((by_lu[0] - 2.0).abs() < 1e-9);
        assert!((by_lu[1] - 3.0).abs() < 1e-9);
        assert!((by_lu[2] + 1.0).abs() < 1e-9);
    }
}
