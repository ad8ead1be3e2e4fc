//! Numeric helpers shared by the engine and the sheet row codec.

/// Permissive numeric parsing for form and sheet fields.
///
/// Blank, unparsable, non-finite and negative inputs all yield `0.0`.
pub fn parse_amount(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Two-decimal rendering without trailing zeros (`100`, `36.4`, `363.64`).
pub fn format_amount(value: f64) -> String {
    let mut s = format!("{:.2}", round2(value));
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
