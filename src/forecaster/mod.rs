pub mod congestion_predictor;
pub mod risk;

pub use congestion_predictor::{
    CongestionForecast, CongestionForecaster, EventImpact, EventReport, ForecastFactors,
    ForecastInterval, LearningMode, PatternAnalysis, PatternSample, WeatherCondition,
    WeatherImpact, WeatherReport,
};
pub use risk::{
    RiskAssessment, RiskConditions, RiskFactor, RiskFactors, RouteConstraints, RouteOptimization,
    RouteOption,
};
