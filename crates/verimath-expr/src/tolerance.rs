//! Numeric tolerance shared by backends and the validator

use serde::{Deserialize, Serialize};

/// Absolute/relative comparison thresholds plus a magnitude ceiling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
    pub max_magnitude: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-6,
            max_magnitude: 1e12,
        }
    }
}

impl Tolerance {
    /// Loosen both thresholds by `factor`
    #[inline]
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            absolute: self.absolute * factor,
            relative: self.relative * factor,
            ..self
        }
    }

    /// `a ≈ b`
    #[inline]
    #[must_use]
    pub fn is_close(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        let diff = (a - b).abs();
        diff <= self.absolute || diff <= self.relative * a.abs().max(b.abs())
    }

    /// Residual counts as zero relative to the magnitude of the terms that produced it
    #[inline]
    #[must_use]
    pub fn is_zero_residual(&self, residual: f64, scale: f64) -> bool {
        residual.is_finite() && residual.abs() <= self.absolute * scale.abs().max(1.0)
    }

    /// Finite and within the magnitude ceiling
    #[inline]
    #[must_use]
    pub fn is_sane(&self, value: f64) -> bool {
        value.is_finite() && value.abs() <= self.max_magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closeness_is_symmetric() {
        let tol = Tolerance::default();
        assert!(tol.is_close(1.0, 1.0 + 1e-10));
        assert!(tol.is_close(1e6, 1e6 + 0.5));
        assert!(!tol.is_close(1.0, 1.001));
    }

    #[test]
    fn residuals_scale_with_terms() {
        let tol = Tolerance::default();
        assert!(tol.is_zero_residual(1e-10, 1.0));
        assert!(!tol.is_zero_residual(1e-3, 1.0));
        assert!(!tol.is_zero_residual(f64::NAN, 1.0));
    }

    #[test]
    fn sanity_rejects_huge_values() {
        let tol = Tolerance::default();
        assert!(tol.is_sane(1e11));
        assert!(!tol.is_sane(1e13));
        assert!(!tol.is_sane(f64::INFINITY));
    }
}
