//! Number formatting/parsing (spec §4.2, §6 "Numeric formatting").
//!
//! Lua 5.1 numbers are always `double`; `tostring` uses a `%.14g`
//! equivalent, and `tonumber`/arithmetic coercion parses the whole
//! slice, optionally recognizing a `0x`/`0b`/`0o`/`0d` base prefix.

pub const NUMBER_BUFSIZE: usize = 32;

/// Format with 14 significant digits, trimming the way `%.14g` does:
/// integral floats print without a fractional part, and the shortest
/// representation that round-trips at 14 digits is used.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    let formatted = format!("{:.14e}", n);
    // Re-render through the %g algorithm: pick fixed vs scientific
    // based on magnitude, then strip trailing zeros.
    let exp: i32 = formatted
        .split('e')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if (-4..14).contains(&exp) {
        let decimals = (13 - exp).max(0) as usize;
        let mut s = format!("{:.*}", decimals, n);
        if s.contains('.') {
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
        }
        s
    } else {
        let mantissa = n / 10f64.powi(exp);
        let mut mstr = format!("{:.13}", mantissa);
        while mstr.ends_with('0') {
            mstr.pop();
        }
        if mstr.ends_with('.') {
            mstr.pop();
        }
        format!("{}e{}{:02}", mstr, if exp >= 0 { "+" } else { "-" }, exp.abs())
    }
}

/// Parse a full slice (after trimming surrounding whitespace) into a
/// number. Recognizes `0x`/`0X` hex, `0b`/`0B` binary, `0o`/`0O` octal
/// and `0d`/`0D` decimal-with-explicit-prefix integer literals;
/// otherwise falls back to a plain float/integer decimal parse. The
/// entire trimmed slice must be consumed or the parse fails, matching
/// Lua's `tonumber`/coercion contract.
pub fn string_to_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if rest.is_empty() {
        return None;
    }

    if rest.len() > 2 && rest.as_bytes()[0] == b'0' {
        let marker = rest.as_bytes()[1].to_ascii_lowercase();
        let digits = &rest[2..];
        let radix = match marker {
            b'x' => Some(16),
            b'b' => Some(2),
            b'o' => Some(8),
            b'd' => Some(10),
            _ => None,
        };
        if let Some(radix) = radix {
            if digits.is_empty() {
                return None;
            }
            return i64::from_str_radix(digits, radix)
                .ok()
                .map(|v| sign * v as f64)
                .or_else(|| {
                    // Hex floats aren't supported by from_str_radix; Lua
                    // 5.1's `0x` integers are the common case we cover.
                    None
                });
        }
    }

    rest.parse::<f64>().ok().map(|v| sign * v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_integral_floats_without_fraction() {
        assert_eq!(format_number(720.0), "720");
        assert_eq!(format_number(-5.0), "-5");
    }

    #[test]
    fn formats_fractional_values() {
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn parses_hex_prefix() {
        assert_eq!(string_to_number("0x10"), Some(16.0));
    }

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(string_to_number("  42  "), Some(42.0));
        assert_eq!(string_to_number("3.25"), Some(3.25));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert_eq!(string_to_number("42x"), None);
    }
}
