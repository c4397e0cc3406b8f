//! Number formatting for canonical expressions and final answers

use crate::rational::Rational;

/// Canonical literal text: integers without a fraction part, other values
/// with at most twelve decimals and trailing zeros trimmed.
#[must_use]
pub fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let n = v as i64;
        return n.to_string();
    }
    let text = format!("{v:.12}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Answer text: near-integers snap, small-denominator fractions print as
/// `p/q`, everything else keeps ten significant digits.
#[must_use]
pub fn format_answer(v: f64) -> String {
    if !v.is_finite() {
        return format_number(v);
    }
    let rounded = v.round();
    if (v - rounded).abs() <= 1e-9 * v.abs().max(1.0) && rounded.abs() < 1e15 {
        return format_number(if rounded == 0.0 { 0.0 } else { rounded });
    }
    if let Some(r) = Rational::approximate(v, 1000) {
        return r.to_string();
    }
    let magnitude = v.abs().log10().floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let decimals = (9.0 - magnitude).clamp(0.0, 15.0) as usize;
    let text = format!("{v:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_numbers() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
    }

    #[test]
    fn answers_snap_and_use_fractions() {
        assert_eq!(format_answer(1.999_999_999_99), "2");
        assert_eq!(format_answer(-2.0 / 3.0), "-2/3");
        assert_eq!(format_answer(std::f64::consts::SQRT_2), "1.414213562");
    }
}
