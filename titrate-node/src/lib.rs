//! A titrate node: the admission controller for one shared-buffer switch.
//!
//! [`AdmissionController`] is the deterministic core. Callers hand it arrivals, departures and
//! timestamps, and it decides per packet whether to admit or drop. Under the adaptive policy it
//! also runs the [`AdaptiveProbe`], which moves each queue's threshold from live feedback.
//!
//! [`NodeHandle`] runs a controller on a tokio task and feeds it the runtime clock.

mod config;
mod controller;
mod driver;
mod error;
mod probe;
mod stats;

pub use config::{NodeOptions, ProbeOptions, SmoothingOptions};
pub use controller::{AdmissionController, AdmissionDecision, Arrival};
pub use driver::{NodeDriver, NodeHandle};
pub use error::NodeError;
pub use probe::{AdaptiveProbe, Adjustment};
pub use stats::QueueCounters;
