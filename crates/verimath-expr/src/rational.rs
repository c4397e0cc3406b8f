//! Exact rationals over `i128`
//!
//! Used for exact root certificates and for printing answers such as `2/3`
//! instead of `0.6666666667`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduced fraction with a positive denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    num: i128,
    den: i128,
}

impl Rational {
    /// Build a reduced rational. `None` when `den` is zero.
    #[must_use]
    pub fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let g = gcd(num, den).max(1);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 {
            num = -num;
            den = -den;
        }
        Some(Self { num, den })
    }

    /// Integer as a rational
    #[inline]
    #[must_use]
    pub fn from_int(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    /// Numerator in lowest terms
    #[inline]
    #[must_use]
    pub fn numer(&self) -> i128 {
        self.num
    }

    /// Denominator, always positive
    #[inline]
    #[must_use]
    pub fn denom(&self) -> i128 {
        self.den
    }

    /// Whether the denominator is one
    #[inline]
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    /// Nearest `f64`
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Best rational approximation with denominator at most `max_den`,
    /// accepted only when it reproduces `x` to near machine precision.
    #[must_use]
    pub fn approximate(x: f64, max_den: i128) -> Option<Self> {
        if !x.is_finite() || x.abs() > 1e15 {
            return None;
        }
        // continued fraction convergents
        let (mut h0, mut h1) = (0_i128, 1_i128);
        let (mut k0, mut k1) = (1_i128, 0_i128);
        let mut rest = x;
        for _ in 0..64 {
            let a = rest.floor();
            #[allow(clippy::cast_possible_truncation)]
            let a_int = a as i128;
            let h2 = a_int.checked_mul(h1)?.checked_add(h0)?;
            let k2 = a_int.checked_mul(k1)?.checked_add(k0)?;
            if k2 > max_den {
                break;
            }
            (h0, h1, k0, k1) = (h1, h2, k1, k2);
            let candidate = Self::new(h1, k1)?;
            if (candidate.to_f64() - x).abs() <= 1e-12 * x.abs().max(1.0) {
                return Some(candidate);
            }
            let frac = rest - a;
            if frac.abs() < 1e-15 {
                break;
            }
            rest = 1.0 / frac;
        }
        None
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Greatest common divisor, always non-negative
#[must_use]
pub fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
