//! Parsing for operator-supplied values.

use crate::error::{Error, Result};

/// Electricity price used when none (or garbage) is given, in $/kWh.
pub const DEFAULT_COST_PER_KWH: f64 = 0.35;

/// Parse a token count such as `1000`, `1,000,000`, `1 000`, or `1e6`.
///
/// Scientific notation is truncated toward zero (`2.5e0` is 2).
pub fn parse_token_count(input: &str) -> Result<u64> {
    let cleaned: String = input
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let invalid = || Error::InvalidTokenCount(input.trim().to_string());

    if cleaned.is_empty() {
        return Err(invalid());
    }

    if cleaned.contains(['e', 'E']) {
        let value: f64 = cleaned.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 || value > u64::MAX as f64 {
            return Err(invalid());
        }
        return Ok(value as u64);
    }

    cleaned.parse::<u64>().map_err(|_| invalid())
}

/// Parse a cost per kWh, falling back to [`DEFAULT_COST_PER_KWH`].
///
/// Blank input is the default silently. Anything unparseable or negative is
/// the default with a warning.
pub fn parse_cost(input: &str) -> f64 {
    let input = input.trim().trim_start_matches('$');
    if input.is_empty() {
        return DEFAULT_COST_PER_KWH;
    }
    match input.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            log::warn!("invalid kWh cost '{input}', using default of ${DEFAULT_COST_PER_KWH:.2}");
            DEFAULT_COST_PER_KWH
        }
    }
}

/// Append `.csv` to an output name that lacks it.
pub fn ensure_csv_extension(name: &str) -> String {
    let name = name.trim();
    if name.ends_with(".csv") {
        name.to_string()
    } else {
        format!("{name}.csv")
    }
}
