use std::time::Duration;

use crate::error::{DurationError, DurationResult};

/// Parses a compact duration string such as `1d2h3m4s`.
///
/// Each component is a run of digits followed by one of `s`, `m`, `h` or
/// `d`. Components may appear in any order and are summed. A bare number is
/// read as seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rpmrepo_utils::time::parse_duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
/// ```
pub fn parse_duration(input: &str) -> DurationResult<Duration> {
    let invalid = || DurationError::Invalid {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut chars = trimmed.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().copied() {
            if !c.is_ascii_digit() {
                break;
            }
            number.push(c);
            chars.next();
        }

        if number.is_empty() {
            return Err(invalid());
        }

        let value: u64 = number.parse().map_err(|_| invalid())?;
        let multiplier = match chars.next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 60 * 60,
            Some('d') => 24 * 60 * 60,
            _ => return Err(invalid()),
        };

        total = value
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
    }

    Ok(Duration::from_secs(total))
}

/// Formats a duration back into the compact `1d2h3m4s` form.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}
