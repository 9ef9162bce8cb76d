use ucremote_core::{
    SUPPORTED_VERSION, SourceId,
    wire::{DeError, SeError},
};

use crate::http::TransportError;

/// Failure to talk to the server or to understand what it said.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Network(#[from] TransportError),
    #[error("malformed document from {resource}: {source}")]
    Protocol {
        resource: String,
        #[source]
        source: DeError,
    },
}

/// The server speaks a protocol this client cannot use.
#[derive(Debug, thiserror::Error)]
pub enum IncompatibleServerError {
    #[error("server speaks protocol version {found:?}, expected {expected}", expected = SUPPORTED_VERSION)]
    UnsupportedVersion { found: String },
    #[error("server requires a security scheme, which is not supported")]
    SecuritySchemeRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Incompatible(#[from] IncompatibleServerError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("connection attempt was superseded")]
    Cancelled,
}

impl From<TransportError> for ConnectError {
    fn from(error: TransportError) -> Self {
        Self::Client(error.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("not connected to a server")]
    NotConnected,
    #[error("unknown source {0}")]
    UnknownSource(SourceId),
    #[error("volume {0} is outside 0.0..=1.0")]
    VolumeOutOfRange(f32),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] SeError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<TransportError> for ActionError {
    fn from(error: TransportError) -> Self {
        Self::Client(error.into())
    }
}
