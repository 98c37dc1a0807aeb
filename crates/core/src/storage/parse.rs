//! Database value parsing utilities
//!
//! Provides error-safe conversion between stored columns and model types.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;

use crate::models::{AssistantId, ClosedReason, TicketStatus};

/// Timestamps are stored as microseconds since the Unix epoch
pub fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// Parse a stored microsecond timestamp
pub fn parse_micros(col: usize, micros: i64) -> Result<DateTime<Utc>, SqlError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        SqlError::FromSqlConversionFailure(
            col,
            Type::Integer,
            format!("timestamp out of range: {}", micros).into(),
        )
    })
}

/// Parse an optional stored microsecond timestamp
pub fn parse_micros_opt(col: usize, micros: Option<i64>) -> Result<Option<DateTime<Utc>>, SqlError> {
    micros.map(|m| parse_micros(col, m)).transpose()
}

/// Parse a status column
pub fn parse_status(col: usize, s: &str) -> Result<TicketStatus, SqlError> {
    TicketStatus::from_str(s).ok_or_else(|| {
        SqlError::FromSqlConversionFailure(col, Type::Text, format!("unknown status '{}'", s).into())
    })
}

/// Parse an optional closed reason column
pub fn parse_reason_opt(col: usize, s: Option<String>) -> Result<Option<ClosedReason>, SqlError> {
    s.map(|s| {
        ClosedReason::from_str(&s).ok_or_else(|| {
            SqlError::FromSqlConversionFailure(
                col,
                Type::Text,
                format!("unknown closed reason '{}'", s).into(),
            )
        })
    })
    .transpose()
}

/// Wrap an optional assistant id column
pub fn assistant_opt(id: Option<i64>) -> Option<AssistantId> {
    id.map(AssistantId)
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_preserve_sub_second_precision() {
        let now = Utc::now();
        let back = parse_micros(0, to_micros(now)).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_unknown_status_is_a_conversion_error() {
        assert!(parse_status(3, "current").is_err());
        assert_eq!(parse_status(3, "in_progress").unwrap(), TicketStatus::InProgress);
    }

    #[test]
    fn test_optional_reason() {
        assert_eq!(parse_reason_opt(0, None).unwrap(), None);
        assert_eq!(
            parse_reason_opt(0, Some("no_show".into())).unwrap(),
            Some(ClosedReason::NoShow)
        );
        assert!(parse_reason_opt(0, Some("bogus".into())).is_err());
    }
}
