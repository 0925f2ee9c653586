use crate::error::{CommandError, QueryError};
use crate::sink::{Sink, StreamRoute};
use async_trait::async_trait;

/// Read-only view of the audio server: which sinks exist and which streams
/// are routed where. Implementations must not mutate server state.
#[async_trait]
pub trait Topology: Send + Sync {
    /// All known sinks, ascending by `ordinal`.
    async fn sinks(&self) -> Result<Vec<Sink>, QueryError>;

    /// All currently active streams. Zero streams is the common case and is
    /// an empty vector, not an error.
    async fn stream_routes(&self) -> Result<Vec<StreamRoute>, QueryError>;
}

/// Mutating commands against the audio server.
#[async_trait]
pub trait Control: Send + Sync {
    /// Make `sink` the default for future streams. Naturally idempotent;
    /// streams already attached elsewhere are untouched.
    async fn set_default_sink(&self, sink: u32) -> Result<(), CommandError>;

    /// Move one live stream onto `sink`. Returns `CommandError::StreamGone`
    /// when the stream ended between enumeration and the move.
    async fn move_stream(&self, stream: u32, sink: u32) -> Result<(), CommandError>;
}
