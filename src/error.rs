//! Error taxonomy for the dispatch subsystem.
//!
//! Mirrors the shape of the teacher's `DockerError`/`AgentError`: one
//! `thiserror` enum per concern, connection-class failures distinguished
//! from semantic ones so the executor can decide what trips a breaker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("host {host}:{port} unavailable: {cause}")]
    HostUnavailable {
        host: String,
        port: u16,
        cause: String,
    },

    #[error("circuit open for {host}:{port}")]
    CircuitOpen { host: String, port: u16 },

    #[error("no host available for task {0}")]
    NoHostAvailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Errors raised by the container-engine client abstraction (`engine` module).
///
/// `Connection` failures are the only ones that trip a breaker or clear an
/// execution binding; everything else is a business-level error the engine
/// returned and propagates unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("engine returned an error: {0}")]
    Other(String),
}

impl EngineError {
    /// Only connection-class failures count against a breaker.
    pub fn is_connection_class(&self) -> bool {
        matches!(self, EngineError::Connection(_))
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as BE;
        match &err {
            // The daemon answered (even if with an error status) — this is a
            // semantic/business-level error, not a connection-class failure.
            BE::DockerResponseServerError { status_code: 404, message } => {
                EngineError::NotFound(message.clone())
            }
            BE::DockerResponseServerError { .. } => EngineError::Other(err.to_string()),
            // Anything else means the client never got a clean response from
            // the daemon: socket/transport/timeout failures.
            _ => EngineError::Connection(err.to_string()),
        }
    }
}
