use std::time::Duration;

/// Parses `1h`, `15m`, `30s`, `500ms`, `2d`, compound forms such as `1h30m`,
/// or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed.as_str();
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in '{}'", raw.trim()))?;
        if digits_end == 0 {
            return Err(format!("expected a number in '{}'", raw.trim()));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("number too large in '{}'", raw.trim()))?;
        rest = &rest[digits_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3_600)),
            "d" => Duration::from_secs(value.saturating_mul(86_400)),
            other => return Err(format!("unknown unit '{}' in '{}'", other, raw.trim())),
        };
        total = total.saturating_add(part);
    }
    Ok(total)
}

/// Rounds up to whole seconds for user-facing hints.
pub fn format_wait(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = (millis + 999) / 1_000;
    format!("{}s", secs)
}
