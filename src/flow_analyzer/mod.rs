pub mod traffic_analyzer;

// Re-export the items from traffic_analyzer
pub use traffic_analyzer::{
    FlowAnalyzer, FlowOptimization, FlowPattern, OptimizationPriority, PatternReport,
    SuggestedTimings, TrafficInsight, Trend,
};
