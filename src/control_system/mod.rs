pub mod coordination;
pub mod traffic_light_controller;

pub use coordination::{CoordinationMode, CoordinationPlan, CoordinationStep};
pub use traffic_light_controller::{
    AdaptationResult, AdaptiveInput, Approach, ArrivalAction, Cycle, Health, Intersection,
    IntersectionController, IntersectionMetrics, IntersectionSettings, IntersectionStatus,
    Priority, PriorityArrival, PriorityIntent, Sensors, SignalState, TransitionRecord,
};
