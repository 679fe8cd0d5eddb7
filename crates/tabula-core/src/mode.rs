use serde::{Deserialize, Serialize};
use std::fmt;

/// The active value representation of a column.
///
/// Discriminants are the persisted codes; 2 and 3 are retired and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ColumnMode {
    /// `f64`, invalid sentinel is NaN
    Numeric = 0,
    /// `String`, invalid sentinel is the empty string
    Text = 1,
    /// month of year, stored as a date-time
    Month = 4,
    /// day of week, stored as a date-time
    Day = 5,
    /// any date-time
    DateTime = 6,
    /// `i64`, every value is valid
    Integer = 24,
}

impl ColumnMode {
    pub const ALL: [ColumnMode; 6] = [
        ColumnMode::Numeric,
        ColumnMode::Text,
        ColumnMode::Month,
        ColumnMode::Day,
        ColumnMode::DateTime,
        ColumnMode::Integer,
    ];

    /// Persisted numeric code
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ColumnMode::Numeric),
            1 => Some(ColumnMode::Text),
            4 => Some(ColumnMode::Month),
            5 => Some(ColumnMode::Day),
            6 => Some(ColumnMode::DateTime),
            24 => Some(ColumnMode::Integer),
            _ => None,
        }
    }

    /// Modes whose values live in the date-time representation
    pub fn is_date_time(self) -> bool {
        matches!(self, ColumnMode::Month | ColumnMode::Day | ColumnMode::DateTime)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnMode::Numeric | ColumnMode::Integer)
    }

    pub fn is_plottable(self) -> bool {
        matches!(
            self,
            ColumnMode::Numeric | ColumnMode::Integer | ColumnMode::DateTime
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnMode::Numeric => "numeric",
            ColumnMode::Text => "text",
            ColumnMode::Month => "month",
            ColumnMode::Day => "day",
            ColumnMode::DateTime => "datetime",
            ColumnMode::Integer => "integer",
        }
    }

    /// Parse a mode from its lowercase name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl TryFrom<i32> for ColumnMode {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        ColumnMode::from_code(code).ok_or_else(|| format!("unknown column mode {}", code))
    }
}

impl From<ColumnMode> for i32 {
    fn from(mode: ColumnMode) -> i32 {
        mode.code()
    }
}

impl fmt::Display for ColumnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role hint consumed by plotting code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlotDesignation {
    #[default]
    NoDesignation,
    X,
    Y,
    Z,
    XError,
    XErrorPlus,
    XErrorMinus,
    YError,
    YErrorMinus,
    YErrorPlus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        for mode in ColumnMode::ALL {
            assert_eq!(ColumnMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(ColumnMode::from_code(2), None);
        assert_eq!(ColumnMode::from_code(3), None);
    }

    #[test]
    fn test_mode_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&ColumnMode::Integer).unwrap(), "24");
        let mode: ColumnMode = serde_json::from_str("6").unwrap();
        assert_eq!(mode, ColumnMode::DateTime);
        assert!(serde_json::from_str::<ColumnMode>("7").is_err());
    }

    #[test]
    fn test_mode_classification() {
        assert!(ColumnMode::Integer.is_numeric());
        assert!(!ColumnMode::DateTime.is_numeric());
        assert!(ColumnMode::DateTime.is_plottable());
        assert!(!ColumnMode::Month.is_plottable());
        assert!(ColumnMode::Day.is_date_time());
        assert_eq!(ColumnMode::from_name("DateTime"), Some(ColumnMode::DateTime));
    }
}
