pub mod messages;
pub mod rabbitmq;

pub use messages::{CongestionAlert, LightAdjustment, TrafficReading};
pub use rabbitmq::{process_reading, run_signal_engine_service, Outbound, TransportError};
