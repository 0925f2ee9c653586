use crate::error::RegistryError;
use crate::registry::{SinkRegistry, SwitchResult};
use crate::sink::Sink;
use crate::ws_server::WebSocketHandler;
use log::debug;
use messages::shell_interface::{
    MigrationFailure, ProblemDetails, ShellRequest, ShellResponse, SinkEntry, SwitchOutcome,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::UnboundedSender as Sender;

type Shells = HashMap<uuid::Uuid, Sender<ShellResponse>>;

/// Adapts the registry to the shell protocol. Connected shells are tracked
/// so that a successful refresh reaches every menu, not only the one that
/// asked for it.
pub struct ShellGateway {
    registry: Arc<SinkRegistry>,
    shells: RwLock<Shells>,
}

impl ShellGateway {
    pub fn new(registry: Arc<SinkRegistry>) -> Self {
        Self {
            registry,
            shells: RwLock::new(Shells::new()),
        }
    }

    async fn handle_query_sinks(&self) -> ShellResponse {
        ShellResponse::Sinks(entries(&self.registry.current_sinks().await))
    }

    async fn handle_refresh(&self) -> ShellResponse {
        match self.registry.refresh().await {
            Ok(sinks) => {
                let response = ShellResponse::Sinks(entries(&sinks));
                self.broadcast(&response);
                response
            }
            Err(error) => problem(error),
        }
    }

    async fn handle_switch(&self, name: &str) -> ShellResponse {
        match self.registry.switch_to(name).await {
            Ok(result) => ShellResponse::Switched(outcome(result)),
            Err(error) => problem(error),
        }
    }

    fn broadcast(&self, response: &ShellResponse) {
        for (id, sender) in self.shells.read().unwrap().iter() {
            if sender.send(response.clone()).is_err() {
                debug!("shell {} is gone, skipping broadcast", id);
            }
        }
    }
}

fn entries(sinks: &[Sink]) -> Vec<SinkEntry> {
    sinks
        .iter()
        .map(|sink| SinkEntry {
            name: sink.name.clone(),
            ordinal: sink.ordinal,
        })
        .collect()
}

fn outcome(result: SwitchResult) -> SwitchOutcome {
    SwitchOutcome {
        default_set: result.default_set,
        migrated: result.migrated,
        failed: result
            .failed
            .into_iter()
            .map(|(stream, reason)| MigrationFailure {
                stream,
                reason: reason.to_string(),
            })
            .collect(),
    }
}

fn problem(error: RegistryError) -> ShellResponse {
    ShellResponse::Error(ProblemDetails {
        description: error.to_string(),
    })
}

#[async_trait::async_trait]
impl WebSocketHandler<ShellRequest, ShellResponse> for ShellGateway {
    async fn handle(&self, request: ShellRequest) -> ShellResponse {
        match request {
            ShellRequest::QuerySinks => self.handle_query_sinks().await,
            ShellRequest::Refresh => self.handle_refresh().await,
            ShellRequest::SwitchTo { name } => self.handle_switch(&name).await,
        }
    }

    fn bad_request(&self, error: serde_json::Error) -> ShellResponse {
        ShellResponse::Error(ProblemDetails {
            description: format!("unrecognized request: {}", error),
        })
    }

    fn add_connection(&self, sender: Sender<ShellResponse>) -> uuid::Uuid {
        let id = uuid::Uuid::new_v4();
        debug!("shell {} connected", id);
        self.shells.write().unwrap().insert(id, sender);
        id
    }

    fn remove_connection(&self, id: uuid::Uuid) {
        debug!("shell {} disconnected", id);
        self.shells.write().unwrap().remove(&id);
    }
}
