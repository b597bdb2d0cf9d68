use serde::{Deserialize, Serialize};

use crate::control_system::AdaptationResult;
use crate::flow_analyzer::TrafficInsight;
use crate::shared_data::CongestionLevel;

/// A vehicle count as published on the `traffic_data` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReading {
    pub intersection_id: String,
    pub vehicle_count: u32,
    /// Sender's clock; informational only, the engine stamps with its own.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// A new cycle for one intersection, published on `light_adjustments` and
/// appended to the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightAdjustment {
    pub timestamp: u64,
    pub intersection_id: String,
    pub green_secs: u32,
    pub yellow_secs: u32,
    pub red_secs: u32,
    pub improvement_pct: f64,
    pub confidence: f64,
}

impl LightAdjustment {
    pub fn from_adaptation(adaptation: &AdaptationResult, timestamp: u64) -> Self {
        Self {
            timestamp,
            intersection_id: adaptation.intersection_id.clone(),
            green_secs: adaptation.new_cycle.green,
            yellow_secs: adaptation.new_cycle.yellow,
            red_secs: adaptation.new_cycle.red,
            improvement_pct: adaptation.improvement_pct,
            confidence: adaptation.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CongestionAlert {
    pub timestamp: u64,
    pub intersection_id: String,
    pub congestion_level: CongestionLevel,
    pub message: String,
}

impl CongestionAlert {
    /// One alert per analyzer alert line.
    pub fn from_insight(insight: &TrafficInsight, timestamp: u64) -> Vec<Self> {
        insight
            .alerts
            .iter()
            .map(|message| Self {
                timestamp,
                intersection_id: insight.intersection_id.clone(),
                congestion_level: insight.congestion_level,
                message: message.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_timestamp_is_optional() {
        let reading: TrafficReading =
            serde_json::from_str(r#"{"intersection_id":"main_1st","vehicle_count":12}"#).unwrap();
        assert_eq!(reading.vehicle_count, 12);
        assert!(reading.timestamp.is_none());
    }

    #[test]
    fn alert_level_serializes_as_snake_case() {
        let alert = CongestionAlert {
            timestamp: 1,
            intersection_id: "a".to_string(),
            congestion_level: CongestionLevel::Critical,
            message: "Critical congestion detected".to_string(),
        };
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains(r#""congestion_level":"critical""#));
    }
}
