//! Presentation helpers and the run deadline
//!
//! Values are kept at full `Decimal` precision everywhere; rounding to two
//! places (round-half-even) happens only here, when a value is shown or
//! exported.

use rust_decimal::{Decimal, RoundingStrategy};
use std::time::{Duration, Instant};

use crate::error::ExtractionError;

/// Round for presentation: 2 decimal places, round-half-even
///
/// # Examples
/// ```
/// use demonstra::utils::round_presentation;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(round_presentation(dec!(2.345)), dec!(2.34));
/// assert_eq!(round_presentation(dec!(2.355)), dec!(2.36));
/// ```
pub fn round_presentation(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Format a value using Brazilian locale conventions: `.` for thousands and
/// `,` for decimals, two places
///
/// # Examples
/// ```
/// use demonstra::utils::format_decimal_br;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_decimal_br(dec!(1234.56)), "1.234,56");
/// assert_eq!(format_decimal_br(dec!(-30000)), "-30.000,00");
/// ```
pub fn format_decimal_br(value: Decimal) -> String {
    let rounded = round_presentation(value);
    let is_negative = rounded < Decimal::ZERO;

    let formatted = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));

    let with_separators: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec!['.', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    format!("{}{},{}", sign, with_separators, decimal_part)
}

/// Format an optional percentage: "20,00%", or "-" when null
pub fn format_percent(value: Option<Decimal>) -> String {
    match value {
        Some(v) => format!("{}%", format_decimal_br(v)),
        None => "-".to_string(),
    }
}

/// Wall-clock limit of one extraction run, checked cooperatively
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<(), ExtractionError> {
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => {
                Err(ExtractionError::Timeout(limit.as_secs()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_presentation(dec!(0.125)), dec!(0.12));
        assert_eq!(round_presentation(dec!(0.135)), dec!(0.14));
        assert_eq!(round_presentation(dec!(-0.125)), dec!(-0.12));
        assert_eq!(round_presentation(dec!(33.333333)), dec!(33.33));
    }

    #[test]
    fn test_format_decimal_br() {
        assert_eq!(format_decimal_br(dec!(0.99)), "0,99");
        assert_eq!(format_decimal_br(dec!(1000000)), "1.000.000,00");
        assert_eq!(format_decimal_br(dec!(0)), "0,00");
        assert_eq!(format_decimal_br(dec!(-1234.56)), "-1.234,56");
    }

    #[test]
    fn test_format_rounds_half_even() {
        assert_eq!(format_decimal_br(dec!(1.005)), "1,00");
        assert_eq!(format_decimal_br(dec!(1.015)), "1,02");
        // a value that rounds to zero does not keep a minus sign
        assert_eq!(format_decimal_br(dec!(-0.001)), "0,00");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(Some(dec!(20))), "20,00%");
        assert_eq!(format_percent(Some(dec!(-12.3456))), "-12,35%");
        assert_eq!(format_percent(None), "-");
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::unlimited().check().is_ok());
        assert!(Deadline::new(Some(Duration::from_secs(3600))).check().is_ok());
        let expired = Deadline::new(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(expired.check(), Err(ExtractionError::Timeout(0))));
    }
}
