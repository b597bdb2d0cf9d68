// congestion_predictor.rs
//
// Multi-interval congestion forecasts. The level for each interval follows a
// diurnal curve (two commute peaks) with a little seeded noise, nudged up by
// whatever weather and event modifiers are on file for the location.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::error::{require_id, EngineError, Result};
use crate::flow_analyzer::traffic_analyzer::mean_and_variance;
use crate::rng::{RandomSource, SeededRandom};
use crate::shared_data::{day_of_week, hour_of_day, month_of_year, round2, TrafficSample};

const PEAK_LEVEL: f64 = 0.8;
const OFF_PEAK_LEVEL: f64 = 0.3;
const MAX_NOISE: f64 = 0.1;
const WEATHER_WEIGHT: f64 = 0.2;
const EVENT_WEIGHT: f64 = 0.3;
const MAX_DENSITY: f64 = 50.0;
const FREE_FLOW_SPEED_KMH: f64 = 60.0;
const MODIFIER_CAP: f64 = 0.9;
/// Vehicle count treated as fully congested when normalizing samples.
const SATURATION_COUNT: f64 = 50.0;
const SUFFICIENT_HISTORY: usize = 10;
const MIN_ANOMALY_SAMPLES: usize = 10;
/// One week of the default 15-minute intervals.
pub const MAX_FORECAST_INTERVALS: u64 = 672;

pub(crate) const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Clear,
    Cloudy,
    Rain,
    HeavyRain,
    Snow,
    Fog,
    #[serde(other)]
    Other,
}

impl WeatherCondition {
    /// Coefficient used for forecast modifiers.
    pub fn traffic_impact(self) -> f64 {
        match self {
            Self::Clear => 0.1,
            Self::Cloudy => 0.2,
            Self::Rain => 0.4,
            Self::HeavyRain => 0.7,
            Self::Snow => 0.8,
            Self::Fog => 0.6,
            Self::Other => 0.3,
        }
    }

    /// Score used by the risk assessment.
    pub fn risk_score(self) -> f64 {
        match self {
            Self::Clear => 0.1,
            Self::Cloudy => 0.2,
            Self::Rain => 0.6,
            Self::HeavyRain => 0.8,
            Self::Snow => 0.9,
            Self::Fog => 0.7,
            Self::Other => 0.3,
        }
    }

    pub fn is_adverse(self) -> bool {
        matches!(self, Self::Rain | Self::HeavyRain | Self::Snow | Self::Fog)
    }
}

impl FromStr for WeatherCondition {
    type Err = EngineError;

    /// Unknown conditions map to `Other` rather than failing.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "clear" => Self::Clear,
            "cloudy" => Self::Cloudy,
            "rain" => Self::Rain,
            "heavy_rain" => Self::HeavyRain,
            "snow" => Self::Snow,
            "fog" => Self::Fog,
            _ => Self::Other,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub conditions: WeatherCondition,
    pub temperature_c: f64,
    pub precipitation_mm: f64,
    pub visibility_km: f64,
}

impl Default for WeatherReport {
    fn default() -> Self {
        Self {
            conditions: WeatherCondition::Clear,
            temperature_c: 20.0,
            precipitation_mm: 0.0,
            visibility_km: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherImpact {
    pub location: String,
    pub report: WeatherReport,
    pub traffic_impact: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub kind: String,
    pub start_time: u64,
    pub end_time: u64,
    pub expected_attendance: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventImpact {
    pub location: String,
    pub report: EventReport,
    pub traffic_impact: f64,
    pub timestamp: u64,
}

impl EventImpact {
    pub fn is_active_at(&self, time: u64) -> bool {
        time >= self.report.start_time && time <= self.report.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastInterval {
    pub timestamp: u64,
    /// In [0, 1].
    pub congestion_level: f64,
    pub vehicle_density: u32,
    pub average_speed_kmh: u32,
}

/// Inputs that shaped a forecast, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastFactors {
    pub historical: f64,
    pub weather: f64,
    pub events: f64,
    pub time_of_day: f64,
    pub day_of_week: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionForecast {
    pub location: String,
    pub horizon_ms: u64,
    pub generated_at: u64,
    pub intervals: Vec<ForecastInterval>,
    pub confidence: f64,
    pub factors: ForecastFactors,
}

impl CongestionForecast {
    pub fn mean_congestion(&self) -> f64 {
        if self.intervals.is_empty() {
            return 0.0;
        }
        self.intervals.iter().map(|i| i.congestion_level).sum::<f64>()
            / self.intervals.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSample {
    pub timestamp: u64,
    pub congestion_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Supervised,
    Unsupervised,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub accuracy: f64,
    pub mode: LearningMode,
    pub training_size: usize,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    /// 24 hourly averages.
    pub hourly: Vec<f64>,
    /// 7 daily averages, Sunday first.
    pub weekly: Vec<f64>,
    /// 12 monthly averages.
    pub monthly: Vec<f64>,
    pub anomalies: Vec<PatternSample>,
    pub model: ModelSummary,
    pub insights: Vec<String>,
}

/// Holds the forecast inputs: per-location history and the latest weather
/// and event modifiers. Forecast and risk reads take `&self` so one instance
/// can serve concurrent readers; only the upserts need `&mut self`.
pub struct CongestionForecaster {
    pub(crate) interval_ms: u64,
    history_capacity: usize,
    history: HashMap<String, VecDeque<PatternSample>>,
    pub(crate) weather: HashMap<String, WeatherImpact>,
    pub(crate) events: HashMap<String, EventImpact>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl Default for CongestionForecaster {
    fn default() -> Self {
        Self::new(900_000, 100, Box::new(SeededRandom::default()))
    }
}

impl CongestionForecaster {
    pub fn new(interval_ms: u64, history_capacity: usize, rng: Box<dyn RandomSource>) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            history_capacity: history_capacity.max(1),
            history: HashMap::new(),
            weather: HashMap::new(),
            events: HashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    pub(crate) fn draw(&self, low: f64, high: f64) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range_f64(low, high)
    }

    /// Adds an analyzer sample to the location's history, normalized to [0, 1].
    pub fn record_history(&mut self, location: &str, sample: &TrafficSample) {
        let level = (f64::from(sample.vehicle_count) / SATURATION_COUNT).min(1.0);
        let deque = self
            .history
            .entry(location.to_string())
            .or_insert_with(VecDeque::new);
        if deque.len() == self.history_capacity {
            deque.pop_front();
        }
        deque.push_back(PatternSample {
            timestamp: sample.timestamp,
            congestion_level: level,
        });
    }

    pub fn history_len(&self, location: &str) -> usize {
        self.history.get(location).map_or(0, VecDeque::len)
    }

    /// Normalized history for a location, oldest first.
    pub fn history_for(&self, location: &str) -> Vec<PatternSample> {
        self.history
            .get(location)
            .map(|deque| deque.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn weather_for(&self, location: &str) -> Option<&WeatherImpact> {
        self.weather.get(location)
    }

    pub fn event_for(&self, location: &str) -> Option<&EventImpact> {
        self.events.get(location)
    }

    /// Forecasts `horizon_ms` ahead in fixed intervals starting at `now`.
    pub fn predict(&self, location: &str, horizon_ms: u64, now: u64) -> Result<CongestionForecast> {
        require_id("location", location)?;
        if horizon_ms == 0 {
            return Err(EngineError::Validation(
                "time horizon must be a positive number of milliseconds".to_string(),
            ));
        }

        let count = horizon_ms.div_ceil(self.interval_ms);
        if count > MAX_FORECAST_INTERVALS {
            return Err(EngineError::Validation(format!(
                "time horizon spans {count} intervals, at most {MAX_FORECAST_INTERVALS} allowed"
            )));
        }
        let weather = self.weather.get(location);
        let event = self.events.get(location);

        let intervals: Vec<ForecastInterval> = (0..count)
            .map(|i| {
                let timestamp = now.saturating_add(i * self.interval_ms);
                let hour = hour_of_day(timestamp);
                let base = if (7..=9).contains(&hour) || (17..=19).contains(&hour) {
                    PEAK_LEVEL
                } else {
                    OFF_PEAK_LEVEL
                };
                let mut level = base + self.draw(-MAX_NOISE, MAX_NOISE);
                if let Some(w) = weather {
                    level += w.traffic_impact * WEATHER_WEIGHT;
                }
                if let Some(e) = event.filter(|e| e.is_active_at(timestamp)) {
                    level += e.traffic_impact * EVENT_WEIGHT;
                }
                let level = level.clamp(0.0, 1.0);
                ForecastInterval {
                    timestamp,
                    congestion_level: level,
                    vehicle_density: (level * MAX_DENSITY).round() as u32,
                    average_speed_kmh: (FREE_FLOW_SPEED_KMH * (1.0 - level)).round() as u32,
                }
            })
            .collect();

        let history_len = self.history_len(location);
        let hour = hour_of_day(now);
        let day = day_of_week(now);
        let factors = ForecastFactors {
            historical: if history_len > SUFFICIENT_HISTORY { 0.8 } else { 0.3 },
            weather: if weather.is_some() { 0.7 } else { 0.2 },
            events: if event.is_some() { 0.6 } else { 0.1 },
            time_of_day: if (6..=22).contains(&hour) { 0.8 } else { 0.4 },
            day_of_week: if (1..=5).contains(&day) { 0.9 } else { 0.6 },
        };

        // Four contributions: history 0.4, weather 0.2, events 0.2, intervals 0.2.
        let history_part = 0.4 * (history_len as f64 / SUFFICIENT_HISTORY as f64).min(1.0);
        let weather_part = if weather.is_some() { 0.2 } else { 0.0 };
        let event_part = if event.is_some() { 0.2 } else { 0.0 };
        let interval_part = 0.2 * (intervals.len() as f64 / 4.0).min(1.0);
        let confidence =
            round2((history_part + weather_part + event_part + interval_part).min(1.0));

        Ok(CongestionForecast {
            location: location.to_string(),
            horizon_ms,
            generated_at: now,
            intervals,
            confidence,
            factors,
        })
    }

    /// Calendar averages, outliers and a nominal accuracy for a sample set.
    pub fn analyze_patterns(
        &self,
        samples: &[PatternSample],
        mode: LearningMode,
    ) -> Result<PatternAnalysis> {
        if samples.is_empty() {
            return Err(EngineError::Validation(
                "traffic data must be a non-empty list".to_string(),
            ));
        }

        let hourly = bucket_averages(samples, 24, |s| hour_of_day(s.timestamp));
        let weekly = bucket_averages(samples, 7, |s| day_of_week(s.timestamp));
        let monthly = bucket_averages(samples, 12, |s| month_of_year(s.timestamp));

        let anomalies = if samples.len() < MIN_ANOMALY_SAMPLES {
            Vec::new()
        } else {
            let values: Vec<f64> = samples.iter().map(|s| s.congestion_level).collect();
            let (mean, variance) = mean_and_variance(&values);
            let threshold = mean + 2.0 * variance.sqrt();
            samples
                .iter()
                .filter(|s| s.congestion_level > threshold)
                .copied()
                .collect()
        };

        let accuracy = round2((0.6 + (samples.len() as f64 / 1000.0) * 0.3).min(0.95));
        let peak_hour = index_of_max(&hourly);
        let peak_day = index_of_max(&weekly);
        let insights = vec![
            format!("Peak congestion typically occurs at {peak_hour}:00"),
            format!("{} is typically the busiest day", DAY_NAMES[peak_day]),
        ];

        Ok(PatternAnalysis {
            hourly,
            weekly,
            monthly,
            anomalies,
            model: ModelSummary {
                accuracy,
                mode,
                training_size: samples.len(),
                features: ["traffic_flow", "time_of_day", "day_of_week", "weather"]
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
            },
            insights,
        })
    }

    /// Replaces the weather modifier for `location`.
    pub fn integrate_weather(
        &mut self,
        location: &str,
        report: WeatherReport,
        now: u64,
    ) -> Result<WeatherImpact> {
        require_id("location", location)?;
        let impact = WeatherImpact {
            location: location.to_string(),
            traffic_impact: report.conditions.traffic_impact().min(MODIFIER_CAP),
            report,
            timestamp: now,
        };
        self.weather.insert(location.to_string(), impact.clone());
        Ok(impact)
    }

    /// Replaces the event modifier for `location`.
    pub fn integrate_event(
        &mut self,
        location: &str,
        report: EventReport,
        now: u64,
    ) -> Result<EventImpact> {
        require_id("location", location)?;
        if report.end_time < report.start_time {
            return Err(EngineError::Validation(
                "event end time precedes its start time".to_string(),
            ));
        }
        let hours = (report.end_time - report.start_time) as f64 / 3_600_000.0;
        let traffic_impact =
            ((f64::from(report.expected_attendance) / 10_000.0) * (hours / 4.0) * 0.5)
                .min(MODIFIER_CAP);
        let impact = EventImpact {
            location: location.to_string(),
            report,
            traffic_impact,
            timestamp: now,
        };
        self.events.insert(location.to_string(), impact.clone());
        Ok(impact)
    }
}

fn bucket_averages(
    samples: &[PatternSample],
    buckets: usize,
    key: impl Fn(&PatternSample) -> usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; buckets];
    let mut counts = vec![0usize; buckets];
    for sample in samples {
        let idx = key(sample).min(buckets - 1);
        sums[idx] += sample.congestion_level;
        counts[idx] += 1;
    }
    sums.iter()
        .zip(&counts)
        .map(|(&sum, &n)| if n > 0 { sum / n as f64 } else { 0.0 })
        .collect()
}

/// First index holding the maximum value.
fn index_of_max(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FixedRandom;
    use crate::shared_data::CongestionLevel;

    /// 2024-01-01T00:00:00Z, a Monday.
    const MIDNIGHT: u64 = 1_704_067_200_000;
    const HOUR: u64 = 3_600_000;

    fn forecaster() -> CongestionForecaster {
        // 0.5 maps to zero noise.
        CongestionForecaster::new(900_000, 100, Box::new(FixedRandom(0.5)))
    }

    #[test]
    fn one_hour_gives_four_intervals() {
        let f = CongestionForecaster::default();
        let forecast = f.predict("downtown", 3_600_000, MIDNIGHT).unwrap();
        assert_eq!(forecast.intervals.len(), 4);
        for interval in &forecast.intervals {
            assert!((0.0..=1.0).contains(&interval.congestion_level));
        }
        assert_eq!(forecast.intervals[1].timestamp - forecast.intervals[0].timestamp, 900_000);
    }

    #[test]
    fn partial_intervals_round_up() {
        let f = forecaster();
        let forecast = f.predict("downtown", 1_000_000, MIDNIGHT).unwrap();
        assert_eq!(forecast.intervals.len(), 2);
    }

    #[test]
    fn peaks_are_busier_than_off_peak() {
        let f = forecaster();
        let morning = f.predict("downtown", 900_000, MIDNIGHT + 8 * HOUR).unwrap();
        let night = f.predict("downtown", 900_000, MIDNIGHT + 2 * HOUR).unwrap();
        let peak = morning.intervals[0];
        let calm = night.intervals[0];
        assert!((peak.congestion_level - 0.8).abs() < 1e-9);
        assert!((calm.congestion_level - 0.3).abs() < 1e-9);
        assert_eq!(peak.vehicle_density, 40);
        assert_eq!(calm.average_speed_kmh, 42);
    }

    #[test]
    fn zero_horizon_and_blank_location_are_rejected() {
        let f = forecaster();
        assert!(matches!(
            f.predict("downtown", 0, MIDNIGHT),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.predict("", 900_000, MIDNIGHT),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn horizon_is_capped() {
        let f = forecaster();
        let week = MAX_FORECAST_INTERVALS * 900_000;
        assert_eq!(
            f.predict("downtown", week, MIDNIGHT).unwrap().intervals.len(),
            MAX_FORECAST_INTERVALS as usize
        );
        for horizon in [week + 1, u64::MAX] {
            assert!(matches!(
                f.predict("downtown", horizon, MIDNIGHT),
                Err(EngineError::Validation(_))
            ));
        }
    }

    #[test]
    fn timestamps_saturate_near_the_end_of_time() {
        let f = forecaster();
        let forecast = f.predict("downtown", 3_600_000, u64::MAX - 1).unwrap();
        assert_eq!(forecast.intervals.len(), 4);
        assert!(forecast.intervals.iter().skip(1).all(|i| i.timestamp == u64::MAX));
    }

    #[test]
    fn confidence_grows_with_inputs() {
        let mut f = forecaster();
        let bare = f.predict("downtown", 3_600_000, MIDNIGHT).unwrap();
        assert!((bare.confidence - 0.2).abs() < 1e-9);

        for i in 0..12u64 {
            let sample = TrafficSample {
                intersection_id: "downtown".to_string(),
                vehicle_count: 20,
                timestamp: MIDNIGHT + i,
                flow_rate: 20.0,
                congestion_level: CongestionLevel::Moderate,
            };
            f.record_history("downtown", &sample);
        }
        f.integrate_weather("downtown", WeatherReport::default(), MIDNIGHT)
            .unwrap();
        f.integrate_event(
            "downtown",
            EventReport {
                kind: "concert".to_string(),
                start_time: MIDNIGHT,
                end_time: MIDNIGHT + 4 * HOUR,
                expected_attendance: 20_000,
            },
            MIDNIGHT,
        )
        .unwrap();
        let full = f.predict("downtown", 3_600_000, MIDNIGHT).unwrap();
        assert_eq!(full.confidence, 1.0);
        assert_eq!(full.factors.historical, 0.8);
    }

    #[test]
    fn active_event_raises_the_level() {
        let mut f = forecaster();
        f.integrate_event(
            "stadium",
            EventReport {
                kind: "match".to_string(),
                start_time: MIDNIGHT + 2 * HOUR,
                end_time: MIDNIGHT + 6 * HOUR,
                expected_attendance: 40_000,
            },
            MIDNIGHT,
        )
        .unwrap();
        let before = f.predict("stadium", 900_000, MIDNIGHT).unwrap();
        let during = f.predict("stadium", 900_000, MIDNIGHT + 3 * HOUR).unwrap();
        assert!(during.intervals[0].congestion_level > before.intervals[0].congestion_level);
    }

    #[test]
    fn weather_upsert_keeps_latest() {
        let mut f = forecaster();
        f.integrate_weather("bridge", WeatherReport::default(), 1).unwrap();
        let snow = WeatherReport {
            conditions: WeatherCondition::Snow,
            ..WeatherReport::default()
        };
        let impact = f.integrate_weather("bridge", snow, 2).unwrap();
        assert_eq!(impact.traffic_impact, 0.8);
        assert_eq!(f.weather_for("bridge").unwrap().timestamp, 2);
        assert_eq!(f.weather.len(), 1);
    }

    #[test]
    fn event_impact_scales_and_caps() {
        let mut f = forecaster();
        let modest = f
            .integrate_event(
                "park",
                EventReport {
                    kind: "fair".to_string(),
                    start_time: 0,
                    end_time: 4 * HOUR,
                    expected_attendance: 10_000,
                },
                0,
            )
            .unwrap();
        assert!((modest.traffic_impact - 0.5).abs() < 1e-9);

        let huge = f
            .integrate_event(
                "park",
                EventReport {
                    kind: "festival".to_string(),
                    start_time: 0,
                    end_time: 12 * HOUR,
                    expected_attendance: 100_000,
                },
                0,
            )
            .unwrap();
        assert_eq!(huge.traffic_impact, 0.9);

        let backwards = EventReport {
            kind: "oops".to_string(),
            start_time: 10,
            end_time: 5,
            expected_attendance: 1,
        };
        assert!(f.integrate_event("park", backwards, 0).is_err());
    }

    #[test]
    fn unknown_weather_parses_as_other() {
        assert_eq!("hail".parse::<WeatherCondition>(), Ok(WeatherCondition::Other));
        assert_eq!(
            "heavy_rain".parse::<WeatherCondition>(),
            Ok(WeatherCondition::HeavyRain)
        );
    }

    #[test]
    fn pattern_analysis_flags_outliers() {
        let f = forecaster();
        let mut samples: Vec<PatternSample> = (0..20u64)
            .map(|i| PatternSample {
                timestamp: MIDNIGHT + 8 * HOUR + i * 60_000,
                congestion_level: 0.3,
            })
            .collect();
        samples.push(PatternSample {
            timestamp: MIDNIGHT + 17 * HOUR,
            congestion_level: 0.95,
        });

        let analysis = f.analyze_patterns(&samples, LearningMode::Supervised).unwrap();
        assert_eq!(analysis.hourly.len(), 24);
        assert_eq!(analysis.weekly.len(), 7);
        assert_eq!(analysis.monthly.len(), 12);
        assert_eq!(analysis.anomalies.len(), 1);
        assert_eq!(analysis.anomalies[0].congestion_level, 0.95);
        assert_eq!(analysis.insights[0], "Peak congestion typically occurs at 17:00");
        assert_eq!(analysis.insights[1], "Monday is typically the busiest day");
        assert!((analysis.model.accuracy - 0.61).abs() < 1e-9);
    }

    #[test]
    fn accuracy_is_capped() {
        let f = forecaster();
        let samples: Vec<PatternSample> = (0..5_000u64)
            .map(|i| PatternSample {
                timestamp: MIDNIGHT + i * 1_000,
                congestion_level: 0.5,
            })
            .collect();
        let analysis = f.analyze_patterns(&samples, LearningMode::Unsupervised).unwrap();
        assert_eq!(analysis.model.accuracy, 0.95);
        assert!(analysis.anomalies.is_empty());
        assert!(f.analyze_patterns(&[], LearningMode::Supervised).is_err());
    }
}
