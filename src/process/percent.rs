// src/process/percent.rs
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Fractional digits carried by every percent-taxable value.
pub const PERCENT_SCALE: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not parse percent value '{0}'")]
pub struct PercentError(pub String);

/// `"8.75%"` → `0.087500`, `"1.0"` → `1.000000`, `""` → `None`.
/// A value with a percent sign is divided by 100; one without is already a
/// fraction.
pub fn parse_percent(text: &str) -> Result<Option<Decimal>, PercentError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let is_percent = trimmed.contains('%');
    let numeric = trimmed.replace('%', "");
    let numeric = numeric.trim();
    let value = Decimal::from_str(numeric)
        .or_else(|_| Decimal::from_scientific(numeric))
        .map_err(|_| PercentError(text.to_string()))?;
    let value = if is_percent {
        value / Decimal::ONE_HUNDRED
    } else {
        value
    };
    Ok(Some(to_scale(value)))
}

/// Round half-to-even to six places and pad to exactly six.
pub fn to_scale(value: Decimal) -> Decimal {
    let mut v = value.round_dp_with_strategy(PERCENT_SCALE, RoundingStrategy::MidpointNearestEven);
    v.rescale(PERCENT_SCALE);
    v
}
