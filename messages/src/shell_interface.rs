use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub enum ShellRequest {
    QuerySinks,
    Refresh,
    SwitchTo { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkEntry {
    pub name: String,
    pub ordinal: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationFailure {
    pub stream: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub default_set: bool,
    pub migrated: usize,
    pub failed: Vec<MigrationFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum ShellResponse {
    Sinks(Vec<SinkEntry>),
    Switched(SwitchOutcome),
    Error(ProblemDetails),
}
