// src/shared_data.rs

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Discretized traffic density shared by the analyzer, the forecaster and the
/// controller's adaptive timing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl CongestionLevel {
    /// Classifies a vehicle count: <10 low, <25 moderate, <50 high, else critical.
    pub fn classify(vehicle_count: u32) -> Self {
        match vehicle_count {
            0..=9 => Self::Low,
            10..=24 => Self::Moderate,
            25..=49 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Same bands as [`classify`](Self::classify) for a fractional flow.
    pub fn classify_flow(flow: f64) -> Self {
        if flow < 10.0 {
            Self::Low
        } else if flow < 25.0 {
            Self::Moderate
        } else if flow < 50.0 {
            Self::High
        } else {
            Self::Critical
        }
    }

    /// Classifies a [0,1] score at the 0.3 / 0.6 / 0.8 cut points.
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score < 0.6 {
            Self::Moderate
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CongestionLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(EngineError::Validation(format!(
                "unknown congestion level '{other}'"
            ))),
        }
    }
}

/// One vehicle-count observation for an intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub intersection_id: String,
    pub vehicle_count: u32,
    pub timestamp: u64,
    /// Vehicles per hour.
    pub flow_rate: f64,
    pub congestion_level: CongestionLevel,
}

fn utc(timestamp_millis: u64) -> DateTime<Utc> {
    i64::try_from(timestamp_millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

/// Hour of day (0-23, UTC) for an epoch-millisecond timestamp.
pub fn hour_of_day(timestamp_millis: u64) -> usize {
    utc(timestamp_millis).hour() as usize
}

/// Day of week (0 = Sunday .. 6 = Saturday, UTC).
pub fn day_of_week(timestamp_millis: u64) -> usize {
    utc(timestamp_millis).weekday().num_days_from_sunday() as usize
}

/// Month (0 = January .. 11 = December, UTC).
pub fn month_of_year(timestamp_millis: u64) -> usize {
    utc(timestamp_millis).month0() as usize
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
