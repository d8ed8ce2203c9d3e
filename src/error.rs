//! Error types for the Airmar bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial: {0}")]
    Serial(#[from] serialport::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("config: {0}")]
    Config(String),

    #[error("port {0} does not exist")]
    PortNotFound(String),

    #[error("not connected")]
    NotConnected,

    #[error("baud detection failed on {port} after exhausting the attempt budget")]
    BaudDetectionFailed { port: String },

    #[error("baud switch failed: {0}")]
    BaudSwitchFailed(String),

    #[error("{0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
