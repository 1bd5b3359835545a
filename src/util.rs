//! Small helpers shared across actions, checks, and the retry models.

/// Parses a duration string like `"2s"`, `"500ms"`, `"1m"`, `"1h"`, `"1d"`,
/// `"100us"`/`"100µs"`, `"100ns"`, or a bare number of milliseconds
/// (`"1500"`), returning milliseconds (sub-millisecond units round down).
pub fn parse_duration_ms(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Some(ms);
    }

    let (number, unit) = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|idx| trimmed.split_at(idx))?;

    let value: f64 = number.parse().ok()?;
    let multiplier = match unit {
        "ns" => 1e-6,
        "us" | "µs" => 1e-3,
        "ms" => 1.0,
        "s" => 1000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_milliseconds() {
        assert_eq!(parse_duration_ms("1500"), Some(1500));
    }

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration_ms("2s"), Some(2000));
        assert_eq!(parse_duration_ms("500ms"), Some(500));
        assert_eq!(parse_duration_ms("1.5s"), Some(1500));
        assert_eq!(parse_duration_ms("1m"), Some(60_000));
        assert_eq!(parse_duration_ms("1h"), Some(3_600_000));
    }

    #[test]
    fn rejects_unknown_units() {
        assert_eq!(parse_duration_ms("3 fortnights"), None);
    }

    #[test]
    fn parses_days_and_sub_millisecond_units() {
        assert_eq!(parse_duration_ms("1d"), Some(86_400_000));
        assert_eq!(parse_duration_ms("2000us"), Some(2));
        assert_eq!(parse_duration_ms("2000µs"), Some(2));
        assert_eq!(parse_duration_ms("2_000_000ns"), None);
        assert_eq!(parse_duration_ms("2000000ns"), Some(2));
    }
}
