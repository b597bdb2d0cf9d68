// traffic_analyzer.rs

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::{require_id, EngineError, Result};
use crate::shared_data::{CongestionLevel, TrafficSample};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;
/// Vehicles per cycle the intersections are tuned for.
const OPTIMAL_VEHICLES_PER_CYCLE: u32 = 30;
const BASELINE_GREEN_SECS: i64 = 30;
const BASELINE_RED_SECS: i64 = 45;
const MIN_PHASE_SECS: i64 = 15;
const MAX_GREEN_SECS: i64 = 60;
const TREND_DELTA: i64 = 5;
const HIGH_DENSITY_COUNT: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// What `record` hands back: the latest reading plus a short-term read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficInsight {
    pub intersection_id: String,
    pub current_flow: u32,
    pub flow_rate: f64,
    pub congestion_level: CongestionLevel,
    pub trend: Trend,
    pub efficiency: u32,
    pub alerts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPattern {
    Increasing,
    Decreasing,
    Cyclical,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    pub pattern: FlowPattern,
    pub confidence: f64,
    /// Naive vehicle-count estimate for the next interval.
    pub predicted_next_flow: f64,
    pub recommendations: Vec<String>,
    pub samples_considered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedTimings {
    pub green_secs: u32,
    pub red_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowOptimization {
    pub intersection_id: String,
    pub current_efficiency: u32,
    pub suggested: SuggestedTimings,
    /// Seconds of green gained over the 30 s baseline (negative means shorter).
    pub expected_improvement: i64,
    pub priority: OptimizationPriority,
}

/// Per-intersection bounded sample history.
#[derive(Debug, Clone)]
pub struct FlowAnalyzer {
    pub capacity: usize,
    history: HashMap<String, VecDeque<TrafficSample>>,
}

impl Default for FlowAnalyzer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl FlowAnalyzer {
    /// Create an analyzer keeping at most `capacity` samples per intersection.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: HashMap::new(),
        }
    }

    /// Stores a reading, evicting the oldest once the history is full.
    pub fn record(
        &mut self,
        intersection: &str,
        vehicle_count: u32,
        timestamp: u64,
    ) -> Result<TrafficInsight> {
        require_id("intersection id", intersection)?;

        let deque = self
            .history
            .entry(intersection.to_string())
            .or_insert_with(VecDeque::new);
        let flow_rate = flow_rate(deque.back(), vehicle_count, timestamp);
        if deque.len() == self.capacity {
            deque.pop_front();
        }
        deque.push_back(TrafficSample {
            intersection_id: intersection.to_string(),
            vehicle_count,
            timestamp,
            flow_rate,
            congestion_level: CongestionLevel::classify(vehicle_count),
        });

        let latest = deque.back().cloned().ok_or_else(|| {
            EngineError::intersection_not_found(intersection)
        })?;
        let alerts = alerts_for(&latest);
        for alert in &alerts {
            log::info!("[FlowAnalyzer] {}: {}", intersection, alert);
        }

        Ok(TrafficInsight {
            intersection_id: intersection.to_string(),
            current_flow: latest.vehicle_count,
            flow_rate: latest.flow_rate,
            congestion_level: latest.congestion_level,
            trend: trend_of(deque),
            efficiency: efficiency_of(latest.vehicle_count),
            alerts,
        })
    }

    /// Samples for an intersection, oldest first.
    pub fn history(&self, intersection: &str) -> Vec<TrafficSample> {
        self.history
            .get(intersection)
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, intersection: &str) -> Option<&TrafficSample> {
        self.history.get(intersection).and_then(|deque| deque.back())
    }

    /// Average vehicle count over the stored history, 0 when empty.
    pub fn average_count_for(&self, intersection: &str) -> f64 {
        if let Some(deque) = self.history.get(intersection) {
            if !deque.is_empty() {
                let sum: u64 = deque.iter().map(|s| u64::from(s.vehicle_count)).sum();
                return sum as f64 / deque.len() as f64;
            }
        }
        0.0
    }

    /// Scores the samples recorded within `window_ms` of `now` against four
    /// hypotheses and keeps the best one.
    pub fn detect_patterns(
        &self,
        intersection: &str,
        window_ms: u64,
        now: u64,
    ) -> PatternReport {
        let cutoff = now.saturating_sub(window_ms);
        let counts: Vec<f64> = self
            .history
            .get(intersection)
            .map(|deque| {
                deque
                    .iter()
                    .filter(|s| s.timestamp >= cutoff)
                    .map(|s| f64::from(s.vehicle_count))
                    .collect()
            })
            .unwrap_or_default();

        if counts.len() < 3 {
            return PatternReport {
                pattern: FlowPattern::InsufficientData,
                confidence: 0.0,
                predicted_next_flow: 0.0,
                recommendations: Vec::new(),
                samples_considered: counts.len(),
            };
        }

        let steps = (counts.len() - 1) as f64;
        let increases = counts.windows(2).filter(|w| w[1] > w[0]).count() as f64;
        let decreases = counts.windows(2).filter(|w| w[1] < w[0]).count() as f64;
        let (mean, variance) = mean_and_variance(&counts);

        let scores = [
            (FlowPattern::Increasing, increases / steps),
            (FlowPattern::Decreasing, decreases / steps),
            (
                FlowPattern::Cyclical,
                if variance > 50.0 && variance < 200.0 { 0.8 } else { 0.2 },
            ),
            (FlowPattern::Stable, if variance < 25.0 { 0.9 } else { 0.1 }),
        ];
        // Earlier hypotheses win ties.
        let (pattern, confidence) = scores
            .iter()
            .copied()
            .fold((FlowPattern::Stable, f64::MIN), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });

        let swing = match pattern {
            FlowPattern::Increasing => 10.0,
            FlowPattern::Decreasing => -10.0,
            _ => 0.0,
        };
        let predicted_next_flow = (mean + confidence * swing).max(0.0);

        let mut recommendations = Vec::new();
        if confidence > 0.7 {
            match pattern {
                FlowPattern::Increasing => {
                    recommendations.push("Increase green light duration".to_string());
                    recommendations.push("Activate alternate routes".to_string());
                }
                FlowPattern::Decreasing => {
                    recommendations.push("Reduce green light duration".to_string());
                    recommendations
                        .push("Divert resources to busier intersections".to_string());
                }
                _ => {}
            }
        }

        PatternReport {
            pattern,
            confidence,
            predicted_next_flow,
            recommendations,
            samples_considered: counts.len(),
        }
    }

    /// Suggests timings for the most recent reading.
    pub fn optimize(&self, intersection: &str) -> Result<FlowOptimization> {
        let latest = self
            .latest(intersection)
            .ok_or_else(|| EngineError::NotFound {
                kind: "traffic data for intersection",
                id: intersection.to_string(),
            })?;

        let adjustment = i64::from(latest.vehicle_count / 10) * 5;
        let green = (BASELINE_GREEN_SECS + adjustment).clamp(MIN_PHASE_SECS, MAX_GREEN_SECS);
        let red = (BASELINE_RED_SECS - adjustment).max(MIN_PHASE_SECS);
        let priority = match latest.congestion_level {
            CongestionLevel::Critical => OptimizationPriority::High,
            CongestionLevel::High => OptimizationPriority::Medium,
            _ => OptimizationPriority::Low,
        };

        Ok(FlowOptimization {
            intersection_id: intersection.to_string(),
            current_efficiency: efficiency_of(latest.vehicle_count),
            suggested: SuggestedTimings {
                green_secs: green as u32,
                red_secs: red as u32,
            },
            expected_improvement: green - BASELINE_GREEN_SECS,
            priority,
        })
    }
}

/// Vehicles per hour measured against the previous sample; a first sample (or
/// one that is not newer) is taken as an hourly count.
fn flow_rate(previous: Option<&TrafficSample>, vehicle_count: u32, timestamp: u64) -> f64 {
    match previous {
        Some(prev) if timestamp > prev.timestamp => {
            let elapsed_hours = (timestamp - prev.timestamp) as f64 / MILLIS_PER_HOUR;
            f64::from(vehicle_count) / elapsed_hours
        }
        _ => f64::from(vehicle_count),
    }
}

fn efficiency_of(vehicle_count: u32) -> u32 {
    let off = vehicle_count.abs_diff(OPTIMAL_VEHICLES_PER_CYCLE);
    100u32.saturating_sub(off.saturating_mul(2))
}

fn trend_of(deque: &VecDeque<TrafficSample>) -> Trend {
    if deque.len() < 3 {
        return Trend::Stable;
    }
    let newest = i64::from(deque[deque.len() - 1].vehicle_count);
    let oldest = i64::from(deque[deque.len() - 3].vehicle_count);
    let delta = newest - oldest;
    if delta > TREND_DELTA {
        Trend::Increasing
    } else if delta < -TREND_DELTA {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn alerts_for(sample: &TrafficSample) -> Vec<String> {
    let mut alerts = Vec::new();
    if sample.congestion_level == CongestionLevel::Critical {
        alerts.push("CRITICAL: Severe congestion detected".to_string());
    }
    if sample.vehicle_count > HIGH_DENSITY_COUNT {
        alerts.push("WARNING: High vehicle density".to_string());
    }
    alerts
}

pub(crate) fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}
