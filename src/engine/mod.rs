pub mod traffic_engine;

pub use traffic_engine::{
    DeferredOutcome, DeferredResult, EmergencyRelease, Ingestion, ScheduledArrival,
    ScheduledCoordination, ScheduledPreemption, TrafficEngine,
};
