//! Bluetooth Module
//!
//! Provides RFCOMM communication with the Mi Buds earbuds.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BudsController                        │
//! │  (State machine - public API for the application)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ Discovery │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - paired  │  │ - RFCOMM   │  │ - Frames │
//! │   devices │  │ - timeouts │  │ - Parsing│
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       ▼              ▼
//! ┌─────────────────────────┐
//! │ Platform (BlueZ/Winsock)│
//! └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame constants, command builders and telemetry parsing
//! - [`connection`] - RFCOMM channel ownership, send serialization, receive timeouts
//! - [`discovery`] - Connected device lookup
//! - [`platform`] - Host Bluetooth stack adapters
//! - [`service`] - Controller state machine

pub mod connection;
pub mod discovery;
pub mod platform;
pub mod protocol;
pub mod service;

// Re-export main service for convenience
pub use service::{BudsController, ControllerConfig};
