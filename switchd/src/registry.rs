use crate::backend::{Control, Topology};
use crate::error::{CommandError, QueryError, RegistryError};
use crate::sink::Sink;
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Outcome of one switch operation. `default_set` is true whenever the
/// operation as a whole succeeded; callers wanting per-stream guarantees
/// inspect `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchResult {
    pub default_set: bool,
    pub migrated: usize,
    pub failed: Vec<(u32, CommandError)>,
}

/// Owns the committed view of available sinks and serializes every mutating
/// operation against the audio server. At most one refresh or switch is in
/// flight at a time; a second caller is turned away with `Busy`. Reads of
/// the committed snapshot never wait on an in-flight operation.
pub struct SinkRegistry {
    topology: Arc<dyn Topology>,
    control: Arc<dyn Control>,
    snapshot: RwLock<Arc<Vec<Sink>>>,
    gate: Mutex<()>,
    op_timeout: Duration,
}

impl SinkRegistry {
    pub fn new(
        topology: Arc<dyn Topology>,
        control: Arc<dyn Control>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            topology,
            control,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            gate: Mutex::new(()),
            op_timeout,
        }
    }

    /// The last committed sink list, in ordinal order.
    pub async fn current_sinks(&self) -> Arc<Vec<Sink>> {
        self.snapshot.read().await.clone()
    }

    /// Replaces the committed snapshot wholesale with the server's current
    /// enumeration. On any failure the previous snapshot stays untouched.
    pub async fn refresh(&self) -> Result<Arc<Vec<Sink>>, RegistryError> {
        let _guard = self.gate.try_lock().map_err(|_| RegistryError::Busy)?;

        let sinks = self.query(self.topology.sinks()).await?;
        let committed = Arc::new(dedupe_by_name(sinks));
        *self.snapshot.write().await = committed.clone();
        Ok(committed)
    }

    /// Makes the named sink the default output and migrates every live
    /// stream onto it. The default-sink change gates the rest: if it fails,
    /// no stream is touched. Streams are then migrated independently and
    /// per-stream failures do not stop the remaining migrations.
    pub async fn switch_to(&self, name: &str) -> Result<SwitchResult, RegistryError> {
        let _guard = self.gate.try_lock().map_err(|_| RegistryError::Busy)?;

        let target = {
            let snapshot = self.snapshot.read().await;
            snapshot
                .iter()
                .find(|sink| sink.name == name)
                .map(|sink| sink.id)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
        };

        let streams = self.query(self.topology.stream_routes()).await?;
        self.command(self.control.set_default_sink(target)).await?;

        let mut migrated = 0;
        let mut failed = Vec::new();
        for route in &streams {
            match self.command(self.control.move_stream(route.id, target)).await {
                Ok(()) => migrated += 1,
                Err(reason) => {
                    warn!("stream {} was not migrated: {}", route.id, reason);
                    failed.push((route.id, reason));
                }
            }
        }

        Ok(SwitchResult {
            default_set: true,
            migrated,
            failed,
        })
    }

    async fn query<T>(
        &self,
        operation: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        match tokio::time::timeout(self.op_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout),
        }
    }

    async fn command(
        &self,
        operation: impl Future<Output = Result<(), CommandError>>,
    ) -> Result<(), CommandError> {
        match tokio::time::timeout(self.op_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout),
        }
    }
}

/// Registry ordering rules: unique names (the later enumeration wins, with
/// a warning) and ascending ordinal order.
fn dedupe_by_name(sinks: Vec<Sink>) -> Vec<Sink> {
    let mut by_name: HashMap<String, Sink> = HashMap::new();
    for sink in sinks {
        if let Some(previous) = by_name.insert(sink.name.clone(), sink) {
            warn!(
                "duplicate sink name {:?}; keeping the later enumeration",
                previous.name
            );
        }
    }

    let mut sinks: Vec<Sink> = by_name.into_iter().map(|(_, sink)| sink).collect();
    sinks.sort_by_key(|sink| sink.ordinal);
    sinks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StreamRoute;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Scripted stand-in for the audio server: queued results per
    /// operation, recorded mutating calls, and an optional gate that holds
    /// a sink query open until released.
    #[derive(Default)]
    struct FakeServer {
        sink_results: StdMutex<VecDeque<Result<Vec<Sink>, QueryError>>>,
        route_results: StdMutex<VecDeque<Result<Vec<StreamRoute>, QueryError>>>,
        default_results: StdMutex<VecDeque<Result<(), CommandError>>>,
        move_failures: StdMutex<HashMap<u32, CommandError>>,
        defaults_set: StdMutex<Vec<u32>>,
        moves: StdMutex<Vec<(u32, u32)>>,
        hold_sinks: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl Topology for FakeServer {
        async fn sinks(&self) -> Result<Vec<Sink>, QueryError> {
            if let Some((entered, release)) = &self.hold_sinks {
                entered.notify_one();
                release.notified().await;
            }
            self.sink_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn stream_routes(&self) -> Result<Vec<StreamRoute>, QueryError> {
            self.route_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl Control for FakeServer {
        async fn set_default_sink(&self, sink: u32) -> Result<(), CommandError> {
            self.defaults_set.lock().unwrap().push(sink);
            self.default_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn move_stream(&self, stream: u32, sink: u32) -> Result<(), CommandError> {
            self.moves.lock().unwrap().push((stream, sink));
            match self.move_failures.lock().unwrap().get(&stream) {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            }
        }
    }

    fn sink(id: u32, name: &str) -> Sink {
        Sink {
            id,
            name: name.to_string(),
            ordinal: id,
        }
    }

    fn registry(server: &Arc<FakeServer>) -> SinkRegistry {
        SinkRegistry::new(server.clone(), server.clone(), Duration::from_secs(5))
    }

    async fn populated_registry(server: &Arc<FakeServer>, sinks: Vec<Sink>) -> SinkRegistry {
        server.sink_results.lock().unwrap().push_back(Ok(sinks));
        let registry = registry(server);
        registry.refresh().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn refresh_commits_a_sorted_deduplicated_snapshot() {
        let server = Arc::new(FakeServer::default());
        server.sink_results.lock().unwrap().push_back(Ok(vec![
            sink(5, "Speakers"),
            sink(0, "Headphones"),
            sink(7, "Speakers"),
        ]));

        let registry = registry(&server);
        let committed = registry.refresh().await.unwrap();

        assert_eq!(*committed, vec![sink(0, "Headphones"), sink(7, "Speakers")]);
        assert_eq!(registry.current_sinks().await, committed);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_snapshot() {
        let server = Arc::new(FakeServer::default());
        let registry = populated_registry(&server, vec![sink(0, "Speakers")]).await;
        server
            .sink_results
            .lock()
            .unwrap()
            .push_back(Err(QueryError::CommandUnavailable("gone".to_string())));

        let error = registry.refresh().await.unwrap_err();

        assert_eq!(
            error,
            RegistryError::Query(QueryError::CommandUnavailable("gone".to_string()))
        );
        assert_eq!(*registry.current_sinks().await, vec![sink(0, "Speakers")]);
    }

    #[tokio::test]
    async fn unknown_name_is_rejected_without_server_traffic() {
        let server = Arc::new(FakeServer::default());
        let registry =
            populated_registry(&server, vec![sink(0, "Speakers"), sink(1, "Headphones")]).await;

        let error = registry.switch_to("nonexistent").await.unwrap_err();

        assert_eq!(error, RegistryError::NotFound("nonexistent".to_string()));
        assert!(server.defaults_set.lock().unwrap().is_empty());
        assert_eq!(
            *registry.current_sinks().await,
            vec![sink(0, "Speakers"), sink(1, "Headphones")]
        );
    }

    #[tokio::test]
    async fn switch_sets_the_default_and_migrates_every_stream() {
        let server = Arc::new(FakeServer::default());
        let registry =
            populated_registry(&server, vec![sink(0, "Speakers"), sink(1, "Headphones")]).await;
        server.route_results.lock().unwrap().push_back(Ok(vec![
            StreamRoute { id: 41, sink: 0 },
            StreamRoute { id: 43, sink: 0 },
        ]));

        let result = registry.switch_to("Headphones").await.unwrap();

        assert_eq!(
            result,
            SwitchResult {
                default_set: true,
                migrated: 2,
                failed: vec![],
            }
        );
        assert_eq!(*server.defaults_set.lock().unwrap(), vec![1]);
        assert_eq!(*server.moves.lock().unwrap(), vec![(41, 1), (43, 1)]);
    }

    #[tokio::test]
    async fn switching_twice_with_no_streams_is_idempotent() {
        let server = Arc::new(FakeServer::default());
        let registry = populated_registry(&server, vec![sink(0, "Speakers")]).await;

        for _ in 0..2 {
            let result = registry.switch_to("Speakers").await.unwrap();
            assert!(result.default_set);
            assert!(result.failed.is_empty());
            assert_eq!(result.migrated, 0);
        }

        assert_eq!(*server.defaults_set.lock().unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn stream_query_failure_aborts_before_the_default_changes() {
        let server = Arc::new(FakeServer::default());
        let registry = populated_registry(&server, vec![sink(0, "Speakers")]).await;
        server
            .route_results
            .lock()
            .unwrap()
            .push_back(Err(QueryError::CommandUnavailable("gone".to_string())));

        let error = registry.switch_to("Speakers").await.unwrap_err();

        assert!(matches!(error, RegistryError::Query(_)));
        assert!(server.defaults_set.lock().unwrap().is_empty());
        assert!(server.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_default_change_gates_all_migrations() {
        let server = Arc::new(FakeServer::default());
        let registry = populated_registry(&server, vec![sink(0, "Speakers")]).await;
        server
            .route_results
            .lock()
            .unwrap()
            .push_back(Ok(vec![StreamRoute { id: 41, sink: 1 }]));
        server
            .default_results
            .lock()
            .unwrap()
            .push_back(Err(CommandError::ServerRejected("refused".to_string())));

        let error = registry.switch_to("Speakers").await.unwrap_err();

        assert_eq!(
            error,
            RegistryError::Command(CommandError::ServerRejected("refused".to_string()))
        );
        assert!(server.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_vanished_stream_does_not_stop_the_rest() {
        let server = Arc::new(FakeServer::default());
        let registry = populated_registry(&server, vec![sink(0, "Speakers")]).await;
        server.route_results.lock().unwrap().push_back(Ok(vec![
            StreamRoute { id: 7, sink: 1 },
            StreamRoute { id: 8, sink: 1 },
        ]));
        server
            .move_failures
            .lock()
            .unwrap()
            .insert(7, CommandError::StreamGone);

        let result = registry.switch_to("Speakers").await.unwrap();

        assert_eq!(
            result,
            SwitchResult {
                default_set: true,
                migrated: 1,
                failed: vec![(7, CommandError::StreamGone)],
            }
        );
        assert_eq!(*server.moves.lock().unwrap(), vec![(7, 0), (8, 0)]);
    }

    #[tokio::test]
    async fn concurrent_mutation_is_rejected_while_a_refresh_runs() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let server = Arc::new(FakeServer {
            hold_sinks: Some((entered.clone(), release.clone())),
            ..FakeServer::default()
        });
        server
            .sink_results
            .lock()
            .unwrap()
            .push_back(Ok(vec![sink(0, "Speakers")]));

        let registry = Arc::new(registry(&server));
        let in_flight = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.refresh().await })
        };

        entered.notified().await;
        assert_eq!(
            registry.switch_to("Speakers").await.unwrap_err(),
            RegistryError::Busy
        );
        assert_eq!(registry.refresh().await.unwrap_err(), RegistryError::Busy);
        assert!(registry.current_sinks().await.is_empty());

        release.notify_one();
        let committed = in_flight.await.unwrap().unwrap();
        assert_eq!(*committed, vec![sink(0, "Speakers")]);
        assert_eq!(*registry.current_sinks().await, vec![sink(0, "Speakers")]);
    }

    #[tokio::test]
    async fn a_stalled_query_becomes_a_timeout() {
        struct Stalled;

        #[async_trait]
        impl Topology for Stalled {
            async fn sinks(&self) -> Result<Vec<Sink>, QueryError> {
                futures_util::future::pending().await
            }

            async fn stream_routes(&self) -> Result<Vec<StreamRoute>, QueryError> {
                futures_util::future::pending().await
            }
        }

        let registry = SinkRegistry::new(
            Arc::new(Stalled),
            Arc::new(FakeServer::default()),
            Duration::from_millis(50),
        );

        assert_eq!(
            registry.refresh().await.unwrap_err(),
            RegistryError::Query(QueryError::Timeout)
        );
    }
}
