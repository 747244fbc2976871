use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Clone, Copy, Default)]
pub enum TimeUnit {
    #[default]
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "s")]
    Seconds,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 3] = [Self::Hours, Self::Minutes, Self::Seconds];

    /// Amount suggested when no report timeout has been cached yet
    pub fn default_amount(&self) -> u32 {
        match self {
            Self::Hours => 24,
            Self::Minutes => 30,
            Self::Seconds => 120,
        }
    }

    pub fn seconds(&self) -> u64 {
        match self {
            Self::Hours => 60 * 60,
            Self::Minutes => 60,
            Self::Seconds => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Seconds => "seconds",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Hours => "h",
            Self::Minutes => "m",
            Self::Seconds => "s",
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for TimeUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" => Ok(Self::Hours),
            "m" => Ok(Self::Minutes),
            "s" => Ok(Self::Seconds),
            other => bail!("unknown time unit {other:?}, expected one of h, m, s"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ReportInterval {
    pub amount: u32,
    pub unit: TimeUnit,
}

impl ReportInterval {
    pub fn new(amount: u32, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.amount) * self.unit.seconds())
    }
}

impl Display for ReportInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.name())
    }
}

/// Human readable approximation of a duration, e.g. "3 minutes"
pub fn natural_delta(delta: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const MONTH: u64 = 30 * DAY;
    const YEAR: u64 = 365 * DAY;

    let secs = delta.as_secs();
    let (amount, singular, plural) = match secs {
        0 => return "a moment".to_string(),
        s if s < MINUTE => (s, "a second", "seconds"),
        s if s < HOUR => (s / MINUTE, "a minute", "minutes"),
        s if s < DAY => (s / HOUR, "an hour", "hours"),
        s if s < MONTH => (s / DAY, "a day", "days"),
        s if s < YEAR => (s / MONTH, "a month", "months"),
        s => (s / YEAR, "a year", "years"),
    };
    if amount == 1 {
        singular.to_string()
    } else {
        format!("{amount} {plural}")
    }
}
