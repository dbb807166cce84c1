use std::time::Duration;

use crate::error::KlusterError;

/// Parse a human-readable duration string.
///
/// Accepts a unit-suffixed number like `"24h"`, `"30m"`, `"90s"`, `"1ms"`
/// or `"7d"`, and sequences of them such as `"1h30m"`. A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, KlusterError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(KlusterError::Validation {
            message: "duration cannot be empty".into(),
        });
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return parse_segment(s, "s", s).map(Duration::from_millis);
    }

    let mut total: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        // Each segment is a run of digits followed by a run of unit letters
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (num_str, tail) = rest.split_at(digits);
        let unit_len = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (suffix, next) = tail.split_at(unit_len);

        if suffix.is_empty() {
            return Err(KlusterError::Validation {
                message: format!("missing unit after '{num_str}' in duration '{s}'"),
            });
        }

        let millis = parse_segment(num_str, suffix, s)?;
        total = total.checked_add(millis).ok_or_else(|| overflow(s))?;
        rest = next;
    }

    Ok(Duration::from_millis(total))
}

/// Milliseconds in `num_str` units of `suffix`.
fn parse_segment(num_str: &str, suffix: &str, whole: &str) -> Result<u64, KlusterError> {
    let num: u64 = num_str.parse().map_err(|_| KlusterError::Validation {
        message: format!("invalid duration number: '{num_str}'"),
    })?;

    let millis_per_unit: u64 = match suffix.to_ascii_lowercase().as_str() {
        "ms" => 1,
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        "d" => 24 * 60 * 60 * 1000,
        _ => {
            return Err(KlusterError::Validation {
                message: format!("unknown duration suffix: '{suffix}' (use ms, s, m, h or d)"),
            });
        }
    };

    num.checked_mul(millis_per_unit).ok_or_else(|| overflow(whole))
}

fn overflow(s: &str) -> KlusterError {
    KlusterError::Validation {
        message: format!("duration overflows: '{s}'"),
    }
}
