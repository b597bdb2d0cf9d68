// risk.rs
//
// Real-time risk scoring and forecast-driven route ranking.

use serde::{Deserialize, Serialize};

use crate::error::{require_id, EngineError, Result};
use crate::forecaster::congestion_predictor::{
    CongestionForecast, CongestionForecaster, WeatherCondition,
};
use crate::shared_data::CongestionLevel;

/// Weights of the four risk factors; they sum to 1 so the overall score
/// stays in [0, 1].
pub const TRAFFIC_WEIGHT: f64 = 0.4;
pub const WEATHER_WEIGHT: f64 = 0.3;
pub const EVENT_WEIGHT: f64 = 0.2;
pub const INFRASTRUCTURE_WEIGHT: f64 = 0.1;

const ROUTE_FORECAST_HORIZON_MS: u64 = 1_800_000;
const ROUTE_REFERENCE_FLOW: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConditions {
    /// Vehicles observed, same scale as the flow analyzer's counts.
    pub traffic_flow: f64,
    pub weather: Option<WeatherCondition>,
    /// Time to check event windows against; defaults to the call time.
    pub time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub level: CongestionLevel,
    pub score: f64,
}

impl RiskFactor {
    fn from_score(score: f64) -> Self {
        Self {
            level: CongestionLevel::from_score(score),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub traffic: RiskFactor,
    pub weather: RiskFactor,
    pub events: RiskFactor,
    pub infrastructure: RiskFactor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub location: String,
    pub timestamp: u64,
    pub risk_level: CongestionLevel,
    pub risk_score: f64,
    pub factors: RiskFactors,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConstraints {
    pub adverse_weather: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOption {
    pub destination: String,
    pub estimated_minutes: u32,
    pub forecast: CongestionForecast,
    pub risk_level: CongestionLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOptimization {
    pub origin: String,
    pub optimal: RouteOption,
    pub alternatives: Vec<RouteOption>,
    /// Percent saved by the best route against the worst.
    pub total_optimization: u32,
}

impl CongestionForecaster {
    pub fn assess_risk(
        &self,
        location: &str,
        conditions: &RiskConditions,
        now: u64,
    ) -> Result<RiskAssessment> {
        require_id("location", location)?;
        if !conditions.traffic_flow.is_finite() || conditions.traffic_flow < 0.0 {
            return Err(EngineError::Validation(
                "traffic flow must be a non-negative number".to_string(),
            ));
        }

        let traffic_level = CongestionLevel::classify_flow(conditions.traffic_flow);
        let traffic = RiskFactor {
            level: traffic_level,
            score: match traffic_level {
                CongestionLevel::Low => 0.2,
                CongestionLevel::Moderate => 0.5,
                CongestionLevel::High => 0.7,
                CongestionLevel::Critical => 0.9,
            },
        };
        let weather =
            RiskFactor::from_score(conditions.weather.map_or(0.1, WeatherCondition::risk_score));
        let at = conditions.time.unwrap_or(now);
        let events = RiskFactor::from_score(
            self.events
                .get(location)
                .filter(|e| e.is_active_at(at))
                .map_or(0.1, |e| e.traffic_impact),
        );
        let infrastructure = RiskFactor::from_score(self.draw(0.1, 0.5));

        let factors = RiskFactors {
            traffic,
            weather,
            events,
            infrastructure,
        };
        let risk_score = traffic.score * TRAFFIC_WEIGHT
            + weather.score * WEATHER_WEIGHT
            + events.score * EVENT_WEIGHT
            + infrastructure.score * INFRASTRUCTURE_WEIGHT;

        Ok(RiskAssessment {
            location: location.to_string(),
            timestamp: now,
            risk_level: CongestionLevel::from_score(risk_score),
            risk_score,
            recommendations: risk_recommendations(&factors, risk_score),
            factors,
        })
    }

    /// Ranks destinations by forecast-adjusted travel time.
    pub fn optimize_routes(
        &self,
        origin: &str,
        destinations: &[String],
        constraints: RouteConstraints,
        now: u64,
    ) -> Result<RouteOptimization> {
        require_id("origin", origin)?;
        if destinations.is_empty() {
            return Err(EngineError::Validation(
                "at least one destination is required".to_string(),
            ));
        }

        let reference = RiskConditions {
            traffic_flow: ROUTE_REFERENCE_FLOW,
            weather: None,
            time: Some(now),
        };
        let mut routes = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let forecast = self.predict(destination, ROUTE_FORECAST_HORIZON_MS, now)?;
            let base_minutes = self.draw(15.0, 45.0);
            let weather_multiplier = if constraints.adverse_weather { 1.2 } else { 1.0 };
            let estimated =
                base_minutes * (1.0 + forecast.mean_congestion() * 0.5) * weather_multiplier;
            let risk_level = self.assess_risk(destination, &reference, now)?.risk_level;
            routes.push(RouteOption {
                destination: destination.clone(),
                estimated_minutes: estimated.round() as u32,
                forecast,
                risk_level,
            });
        }
        routes.sort_by_key(|r| r.estimated_minutes);

        let best = routes.first().map_or(0, |r| r.estimated_minutes);
        let worst = routes.last().map_or(0, |r| r.estimated_minutes);
        let total_optimization = if routes.len() < 2 || worst == 0 {
            0
        } else {
            (f64::from(worst - best) / f64::from(worst) * 100.0).round() as u32
        };

        let mut ranked = routes.into_iter();
        let optimal = ranked.next().ok_or_else(|| {
            EngineError::Validation("at least one destination is required".to_string())
        })?;
        let alternatives: Vec<RouteOption> = ranked.take(2).collect();

        log::debug!(
            "[Forecaster] {} -> {}: optimal in {} min, {} alternatives",
            origin,
            optimal.destination,
            optimal.estimated_minutes,
            alternatives.len()
        );

        Ok(RouteOptimization {
            origin: origin.to_string(),
            optimal,
            alternatives,
            total_optimization,
        })
    }
}

fn risk_recommendations(factors: &RiskFactors, overall: f64) -> Vec<String> {
    let mut recommendations = Vec::new();
    if factors.traffic.score > 0.7 {
        recommendations.push("Consider alternative routes".to_string());
        recommendations.push("Delay non-essential travel".to_string());
    }
    if factors.weather.score > 0.6 {
        recommendations.push("Reduce speed and increase following distance".to_string());
        recommendations.push("Allow extra travel time".to_string());
    }
    if overall > 0.8 {
        recommendations.push("HIGH PRIORITY: Activate traffic management protocols".to_string());
        recommendations.push("Deploy additional traffic control resources".to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::congestion_predictor::EventReport;
    use crate::rng::{FixedRandom, SeededRandom};

    const NOW: u64 = 1_704_067_200_000;

    fn conditions(flow: f64, weather: Option<WeatherCondition>) -> RiskConditions {
        RiskConditions {
            traffic_flow: flow,
            weather,
            time: None,
        }
    }

    #[test]
    fn calm_conditions_are_low_risk() {
        let f = CongestionForecaster::new(900_000, 100, Box::new(FixedRandom(0.0)));
        let risk = f
            .assess_risk("suburb", &conditions(5.0, Some(WeatherCondition::Clear)), NOW)
            .unwrap();
        // 0.2*0.4 + 0.1*0.3 + 0.1*0.2 + 0.1*0.1
        assert!((risk.risk_score - 0.14).abs() < 1e-9);
        assert_eq!(risk.risk_level, CongestionLevel::Low);
        assert!(risk.recommendations.is_empty());
    }

    #[test]
    fn heavy_traffic_in_snow_during_event_is_critical() {
        let mut f = CongestionForecaster::new(900_000, 100, Box::new(FixedRandom(1.0)));
        f.integrate_event(
            "arena",
            EventReport {
                kind: "final".to_string(),
                start_time: NOW - 1_000,
                end_time: NOW + 10_800_000,
                expected_attendance: 60_000,
            },
            NOW,
        )
        .unwrap();
        let risk = f
            .assess_risk("arena", &conditions(80.0, Some(WeatherCondition::Snow)), NOW)
            .unwrap();
        assert_eq!(risk.factors.traffic.level, CongestionLevel::Critical);
        assert_eq!(risk.factors.events.score, 0.9);
        assert!(risk.risk_score > 0.8);
        assert_eq!(risk.risk_level, CongestionLevel::Critical);
        assert_eq!(risk.recommendations.len(), 6);
    }

    #[test]
    fn traffic_bands_match_flow_classification() {
        let f = CongestionForecaster::default();
        let score = |flow| {
            f.assess_risk("x", &conditions(flow, None), NOW)
                .unwrap()
                .factors
                .traffic
                .score
        };
        assert_eq!(score(9.0), 0.2);
        assert_eq!(score(24.0), 0.5);
        assert_eq!(score(45.0), 0.7);
        assert_eq!(score(50.0), 0.9);
    }

    #[test]
    fn infrastructure_score_is_bounded() {
        let f = CongestionForecaster::new(900_000, 100, Box::new(SeededRandom::new(3)));
        for _ in 0..50 {
            let risk = f.assess_risk("x", &conditions(10.0, None), NOW).unwrap();
            let s = risk.factors.infrastructure.score;
            assert!((0.1..0.5).contains(&s));
        }
    }

    #[test]
    fn negative_flow_is_rejected() {
        let f = CongestionForecaster::default();
        assert!(matches!(
            f.assess_risk("x", &conditions(-1.0, None), NOW),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn routes_are_sorted_with_two_alternatives() {
        let f = CongestionForecaster::new(900_000, 100, Box::new(SeededRandom::new(11)));
        let destinations: Vec<String> =
            ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let plan = f
            .optimize_routes("depot", &destinations, RouteConstraints::default(), NOW)
            .unwrap();
        assert_eq!(plan.alternatives.len(), 2);
        for alt in &plan.alternatives {
            assert!(plan.optimal.estimated_minutes <= alt.estimated_minutes);
        }
        assert!(plan.total_optimization <= 100);
    }

    #[test]
    fn single_destination_has_no_optimization() {
        let f = CongestionForecaster::default();
        let plan = f
            .optimize_routes("depot", &["a".to_string()], RouteConstraints::default(), NOW)
            .unwrap();
        assert!(plan.alternatives.is_empty());
        assert_eq!(plan.total_optimization, 0);
        assert!(f
            .optimize_routes("depot", &[], RouteConstraints::default(), NOW)
            .is_err());
    }
}
