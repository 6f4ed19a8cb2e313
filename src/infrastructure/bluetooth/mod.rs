//! Windows Bluetooth backend
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      WinRtRadio                          │
//! │   (RadioPort impl - turns WinRT callbacks into events)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌────────────┐
//! │  Scanner  │  │ Connection │  │  Protocol  │
//! │           │  │            │  │            │
//! │ - adverts │  │ - session  │  │ - GUIDs    │
//! │ - filter  │  │ - GATT ops │  │ - buffers  │
//! └───────────┘  └────────────┘  └────────────┘
//! ```
//!
//! - [`protocol`] - conversions between WinRT and link types
//! - [`scanner`] - advertisement watcher
//! - [`connection`] - device sessions and GATT access
//! - [`service`] - the radio port itself

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;

pub use service::WinRtRadio;
