//! Mi Buds Controller
//!
//! Client for the vendor RFCOMM protocol of Xiaomi Mi Buds: battery telemetry
//! and latency mode control, with automatic discovery and reconnection.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use domain::models::{
    BatteryLevel, BatteryStatus, CommandOutcome, ConnectionState, ControllerEvent, Device,
    LatencyMode, MacAddress, MessageSeverity, StatusMessage,
};
pub use infrastructure::bluetooth::{BudsController, ControllerConfig};
