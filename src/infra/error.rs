use std::net::SocketAddr;

use thiserror::Error;

/// Failures while bringing the process up, before any request is served.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("database unavailable: {0}")]
    Database(#[source] sqlx::Error),
    #[error("migrations failed: {0}")]
    Migration(#[source] sqlx::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
