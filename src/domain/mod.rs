//! Platform-independent link core
//!
//! - [`identifiers`] - fixed GATT identity of the tracker
//! - [`position`] - latest position/heading sample
//! - [`adapter`] - radio power and scanning
//! - [`connection`] - connection state machine
//! - [`exchange`] - command writes and telemetry reads
//! - [`dispatcher`] - routes commands and hardware events

pub mod adapter;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod identifiers;
pub mod models;
pub mod position;
pub mod radio;
pub mod settings;
