//! Number conversions shared by the runtime and the embedding API.

/// Formats a number the way scripts observe it when converted to a string.
///
/// Integral values below 1e21 print without a fraction, non-integral values
/// use the shortest round-tripping representation.
///
/// # Examples
///
/// ```
/// use core_types::format_number;
///
/// assert_eq!(format_number(42.0), "42");
/// assert_eq!(format_number(-0.0), "0");
/// assert_eq!(format_number(0.1), "0.1");
/// assert_eq!(format_number(f64::NAN), "NaN");
/// assert_eq!(format_number(1e21), "1e+21");
/// ```
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{:.0}", n);
    }
    let mut buffer = ryu::Buffer::new();
    let formatted = buffer.format_finite(n);
    match formatted.find('e') {
        Some(pos) if !formatted[pos + 1..].starts_with('-') => {
            format!("{}e+{}", &formatted[..pos], &formatted[pos + 1..])
        }
        _ => formatted.to_string(),
    }
}

/// Parses a string the way the runtime's number conversion does.
///
/// Surrounding whitespace is ignored, the empty string is zero, and anything
/// unparsable is NaN.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    if trimmed.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Wrapping conversion to a signed 32-bit integer.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// Wrapping conversion to an unsigned 32-bit integer.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    modulo as u32
}
