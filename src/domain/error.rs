use crate::domain::models::ConnectionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Bluetooth adapter is not powered on")]
    AdapterNotReady,

    #[error("Peripheral does not expose the tracker service")]
    NoMatchingService,

    #[error("Tracker service is missing the command or telemetry characteristic")]
    NoMatchingCharacteristic,

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Command write failed: {0}")]
    WriteFailed(String),

    #[error("Telemetry read failed: {0}")]
    ReadFailed(String),

    #[error("Command payload is not valid UTF-8: {0}")]
    EncodingError(#[from] std::str::Utf8Error),

    #[error("Link is not ready (currently {state})")]
    NotReady { state: ConnectionState },

    #[error("Link task has stopped")]
    Closed,
}

impl LinkError {
    /// Errors that end the current connection attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingService | Self::NoMatchingCharacteristic | Self::ConnectFailed(_)
        )
    }
}
