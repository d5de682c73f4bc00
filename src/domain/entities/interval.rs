use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// Candle timeframe. Controls both historical aggregation and the live
/// loop's sleep period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarInterval {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl BarInterval {
    pub const ALL: [BarInterval; 6] = [
        BarInterval::M1,
        BarInterval::M5,
        BarInterval::M15,
        BarInterval::H1,
        BarInterval::H4,
        BarInterval::D1,
    ];

    /// Venue bar string (`1m`, `5m`, `15m`, `1H`, `4H`, `1D`).
    pub fn as_str(&self) -> &'static str {
        match self {
            BarInterval::M1 => "1m",
            BarInterval::M5 => "5m",
            BarInterval::M15 => "15m",
            BarInterval::H1 => "1H",
            BarInterval::H4 => "4H",
            BarInterval::D1 => "1D",
        }
    }

    pub fn as_secs(&self) -> u64 {
        match self {
            BarInterval::M1 => 60,
            BarInterval::M5 => 300,
            BarInterval::M15 => 900,
            BarInterval::H1 => 3600,
            BarInterval::H4 => 14400,
            BarInterval::D1 => 86400,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    pub fn as_millis(&self) -> i64 {
        self.as_secs() as i64 * 1000
    }
}

impl fmt::Display for BarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarInterval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(BarInterval::M1),
            "5m" => Ok(BarInterval::M5),
            "15m" => Ok(BarInterval::M15),
            "1H" => Ok(BarInterval::H1),
            "4H" => Ok(BarInterval::H4),
            "1D" => Ok(BarInterval::D1),
            other => Err(ValidationError::UnknownInterval(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_seconds_mapping() {
        assert_eq!(BarInterval::M1.as_secs(), 60);
        assert_eq!(BarInterval::M5.as_secs(), 300);
        assert_eq!(BarInterval::M15.as_secs(), 900);
        assert_eq!(BarInterval::H1.as_secs(), 3600);
        assert_eq!(BarInterval::H4.as_secs(), 14400);
        assert_eq!(BarInterval::D1.as_secs(), 86400);
    }

    #[test]
    fn test_interval_round_trip() {
        for bar in BarInterval::ALL {
            assert_eq!(bar.as_str().parse::<BarInterval>().unwrap(), bar);
        }
    }

    #[test]
    fn test_interval_unknown() {
        assert!("2H".parse::<BarInterval>().is_err());
        assert!("".parse::<BarInterval>().is_err());
    }
}
