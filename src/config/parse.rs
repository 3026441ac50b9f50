use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ValidationError;

/// Parses `<number>[ms|s|m|h]`; a bare number is seconds.
pub(crate) fn parse_duration_value(value: &str) -> Result<Duration, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }

    let digits_len = value.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|source| ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source,
        })?;

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(
            number
                .checked_mul(60)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        "h" => Duration::from_secs(
            number
                .checked_mul(3600)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        _ => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };

    if duration.is_zero() {
        return Err(ValidationError::DurationZero);
    }
    Ok(duration)
}

pub(crate) fn parse_listen_addr(value: &str) -> Result<SocketAddr, ValidationError> {
    value
        .trim()
        .parse()
        .map_err(|source| ValidationError::InvalidListenAddr {
            value: value.to_owned(),
            source,
        })
}
