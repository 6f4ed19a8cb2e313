//! BLE central link to the NDRT GPS tracker.
//!
//! The [`domain`] layer holds the connection state machine and everything it
//! needs, free of any platform code. [`infrastructure`] runs it on tokio and
//! provides the Windows radio backend, logging and settings glue.

pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::dispatcher::{EventDispatcher, LinkCommand};
pub use domain::error::LinkError;
pub use domain::identifiers::ServiceIdentity;
pub use domain::models::{ConnectionState, LinkEvent};
pub use domain::position::{PositionSample, PositionStore};
pub use infrastructure::link::{LinkHandle, LinkService};
