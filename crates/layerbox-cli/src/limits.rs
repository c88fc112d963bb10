//! Parsing of `--memory-limit` and `--cpu-limit` values.

use layerbox_common::constants::DEFAULT_CPU_PERIOD_US;

/// Parses a memory size: plain bytes, or a number with a `k`, `m`, `g`, or
/// `t` suffix in binary units. Suffixes are case-insensitive.
///
/// # Errors
///
/// Returns a message for malformed, zero, or overflowing values.
pub fn parse_memory(input: &str) -> Result<u64, String> {
    let value = input.trim().to_ascii_lowercase();
    let (digits, shift) = match value.as_bytes().last() {
        Some(b'k') => (&value[..value.len() - 1], 10),
        Some(b'm') => (&value[..value.len() - 1], 20),
        Some(b'g') => (&value[..value.len() - 1], 30),
        Some(b't') => (&value[..value.len() - 1], 40),
        _ => (value.as_str(), 0),
    };
    let number: u64 = digits
        .parse()
        .map_err(|_| format!("invalid memory size {input:?}; expected e.g. 512m or 1g"))?;
    if number == 0 {
        return Err(format!("memory size {input:?} must be greater than zero"));
    }
    number
        .checked_mul(1_u64 << shift)
        .ok_or_else(|| format!("memory size {input:?} is too large"))
}

/// Parses a CPU limit `<cores>c` (fractions allowed) into a CFS quota over
/// the default period.
///
/// # Errors
///
/// Returns a message for malformed or non-positive values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn parse_cpu(input: &str) -> Result<u64, String> {
    let value = input.trim().to_ascii_lowercase();
    let cores: f64 = value
        .strip_suffix('c')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| format!("invalid cpu limit {input:?}; expected e.g. 0.5c or 2c"))?;
    if !cores.is_finite() || cores <= 0.0 {
        return Err(format!("cpu limit {input:?} must be a positive number of cores"));
    }
    let quota = (cores * DEFAULT_CPU_PERIOD_US as f64).round();
    if quota < 1.0 || quota > u64::MAX as f64 {
        return Err(format!("cpu limit {input:?} is out of range"));
    }
    Ok(quota as u64)
}
