//! Duration strings such as `"1h30m"`, `"2s"` or `"500ms"`.

use std::time::Duration;

use crate::error::{JobError, JobResult};

/// Parse a sequence of decimal numbers each followed by a unit
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). `"0"` is accepted alone.
pub fn parse_duration(input: &str) -> JobResult<Duration> {
    let malformed = || JobError::MalformedTrigger(format!("invalid duration {input:?}"));
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(malformed());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(malformed());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| malformed())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1e0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(malformed()),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(malformed());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_errors() {
        for bad in ["", "10", "s", "3days", "1h-2m", "1..2s"] {
            assert!(parse_duration(bad).is_err(), "{bad} should not parse");
        }
    }
}
