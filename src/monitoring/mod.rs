pub mod decision_log;

pub use decision_log::DecisionLog;
