use thiserror::Error;

/// Failures of the read-only topology queries. Always surfaced to the
/// caller: a corrupted sink list must not be presented as valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("audio server control interface unavailable: {0}")]
    CommandUnavailable(String),

    #[error("inconsistent listing: {records} record markers but {values} value lines")]
    InconsistentTopology { records: usize, values: usize },

    #[error("unparseable control output line: {0:?}")]
    ParseFailure(String),

    #[error("query timed out")]
    Timeout,
}

/// Failures of the mutating commands. A failed default-sink change aborts
/// the enclosing switch; per-stream move failures are collected instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("stream disappeared before it could be moved")]
    StreamGone,

    #[error("command timed out")]
    Timeout,

    #[error("server rejected command: {0}")]
    ServerRejected(String),

    #[error("{0}")]
    Other(String),
}

/// Orchestration-level errors. `NotFound` and `Busy` originate here, never
/// from the audio server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no sink named {0:?}")]
    NotFound(String),

    #[error("another refresh or switch is in progress")]
    Busy,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Command(#[from] CommandError),
}
