//! Byte-size values such as `"10K"` or `"512M"`.

use serde_yaml::Value;

use crate::error::{Error, Result};

/// Parse a byte size.
///
/// Integers are taken as a byte count. Strings may carry a single `K`,
/// `M` or `G` suffix (binary multiples, case-insensitive).
pub fn parse_size(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::SizeParse(format!("{} is not a non-negative integer", n))),
        Value::String(s) => parse_size_str(s),
        other => Err(Error::SizeParse(format!("unsupported value {:?}", other))),
    }
}

/// Parse a byte size from a string
pub fn parse_size_str(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let count: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::SizeParse(format!("invalid size {:?}", s)))?;

    count
        .checked_mul(multiplier)
        .ok_or_else(|| Error::SizeParse(format!("size {:?} overflows", s)))
}
