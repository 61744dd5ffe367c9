//! # Quantities
//!
//! Parsing of Kubernetes resource quantities (`100m`, `1Gi`, `1e3`) into numbers,
//! for validation and for comparing quantities the API server may normalize.

use regex::Regex;
use std::sync::LazyLock;

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$")
        .expect("Failed to compile quantity regex - this should never happen")
});

/// Numeric value of a quantity, or `None` if it is not a valid quantity
#[must_use]
pub fn parse(value: &str) -> Option<f64> {
    let caps = QUANTITY.captures(value)?;
    let number: f64 = caps[1].parse().ok()?;
    let multiplier = match &caps[2] {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        suffix if suffix.starts_with(['e', 'E']) => 10f64.powi(suffix[1..].parse().ok()?),
        _ => return None,
    };
    Some(number * multiplier)
}

#[must_use]
pub fn is_valid(value: &str) -> bool {
    parse(value).is_some()
}

/// Whether two quantities denote the same value
///
/// Falls back to string equality when either side does not parse.
#[must_use]
pub fn same_value(a: &str, b: &str) -> bool {
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()).max(1.0),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse("100m"), Some(0.1));
        assert_eq!(parse("2"), Some(2.0));
        assert_eq!(parse("1Ki"), Some(1024.0));
        assert_eq!(parse("1Gi"), Some(1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse("1k"), Some(1000.0));
        assert_eq!(parse("1e3"), Some(1000.0));
        assert_eq!(parse("1E"), Some(1e18));
    }

    #[test]
    fn test_invalid_quantities() {
        for bad in ["", "abc", "1.2.3", "1Qi", "m100", "1 Gi"] {
            assert!(!is_valid(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_same_value_across_notations() {
        assert!(same_value("1000m", "1"));
        assert!(same_value("0.5", "500m"));
        assert!(same_value("1024Mi", "1Gi"));
        assert!(!same_value("1Gi", "1G"));
    }
}
