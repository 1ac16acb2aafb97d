use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::classify::refusal::{RefusalEngine, RefusalReport};
use crate::classify::{ClassifierRules, DeveloperContract, RuntimeVerifier};
use crate::config::Config;
use crate::error::ChronosError;
use crate::ipc::server::{IpcServer, IpcServerConfig};
use crate::metrics::{AgentMetrics, MetricsSnapshot};
use crate::record::recorder::{AdaptiveRecorder, RecordingLevel};
use crate::replay::controller::{ReplayController, ReplayReport};
use crate::replay::divergence::DivergenceRecord;
use crate::replay::sandbox::Sandbox;
use crate::source::{RegistryError, SourceRegistry, StateSource};
use crate::timeline::{RingBuffer, TimelineEvent};

/// The composite runtime the host facade owns: registry, recorder, sandbox,
/// classification pipeline, and IPC credentials in one instance.
///
/// Nothing here is process-global; tests build a fresh runtime per case and
/// a host keeps exactly one.
pub struct ChronosRuntime {
    config: Config,
    metrics: Arc<AgentMetrics>,
    registry: Arc<SourceRegistry>,
    buffer: Arc<RingBuffer>,
    rules: Arc<ClassifierRules>,
    contract: Arc<DeveloperContract>,
    verifier: Arc<RuntimeVerifier>,
    recorder: Arc<AdaptiveRecorder>,
    sandbox: Arc<Sandbox>,
    refusal: Arc<RefusalEngine>,
    replay: Arc<ReplayController>,
    ipc: Option<IpcServer>,
}

impl ChronosRuntime {
    /// One-time construction from host configuration. Recording is a
    /// debug-tool concern; release hosts keep the no-op facade and never
    /// build a runtime.
    pub fn initialize(config: Config) -> Self {
        let config = config.normalized();
        let metrics = Arc::new(AgentMetrics::new());
        let registry = Arc::new(SourceRegistry::new());
        let buffer = Arc::new(RingBuffer::with_capacity(config.buffer_capacity));
        let rules = Arc::new(ClassifierRules::default());
        let contract = Arc::new(DeveloperContract::new());
        let verifier = Arc::new(RuntimeVerifier::new());
        let recorder = Arc::new(
            AdaptiveRecorder::new(buffer.clone(), metrics.clone()).with_verifier(verifier.clone()),
        );
        let sandbox = Arc::new(Sandbox::new(metrics.clone()));
        let refusal = Arc::new(RefusalEngine::new(registry.clone(), rules.clone()));
        let replay = Arc::new(ReplayController::new(
            registry.clone(),
            rules.clone(),
            contract.clone(),
            verifier.clone(),
            refusal.clone(),
            sandbox.clone(),
        ));

        let ipc = config.ipc_socket_path.as_ref().map(|path| {
            let mut ipc_config = IpcServerConfig::new(path.clone());
            ipc_config.max_messages_per_minute = config.ipc_rate_limit_per_minute;
            IpcServer::new(ipc_config, metrics.clone())
        });
        if let Some(server) = &ipc {
            recorder.add_listener(server.timeline_listener());
        }

        Self {
            config,
            metrics,
            registry,
            buffer,
            rules,
            contract,
            verifier,
            recorder,
            sandbox,
            refusal,
            replay,
            ipc,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    pub fn recorder(&self) -> &Arc<AdaptiveRecorder> {
        &self.recorder
    }

    pub fn contract(&self) -> &Arc<DeveloperContract> {
        &self.contract
    }

    pub fn verifier(&self) -> &Arc<RuntimeVerifier> {
        &self.verifier
    }

    pub fn rules(&self) -> &Arc<ClassifierRules> {
        &self.rules
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn replay_controller(&self) -> &Arc<ReplayController> {
        &self.replay
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn register_source(&self, source: Arc<dyn StateSource>) -> Result<(), ChronosError> {
        self.registry.register(source).map_err(|err| match err {
            RegistryError::Conflict(id) => ChronosError::RegistrationConflict(id),
            RegistryError::NotFound(id) => ChronosError::InvalidState(id),
        })
    }

    pub fn unregister_source(&self, source_id: &str) -> Result<(), ChronosError> {
        self.registry
            .unregister(source_id)
            .map_err(|err| ChronosError::InvalidState(err.to_string()))
    }

    pub fn get_registered_sources(&self) -> Vec<String> {
        self.registry.source_ids()
    }

    pub fn set_recording_level(&self, level: RecordingLevel) {
        self.recorder.set_level(level);
    }

    /// Captures every registered source once.
    pub fn record_all(&self) -> usize {
        self.recorder.record_all(&self.registry)
    }

    /// Runs the capture loop until `stop` fires, recording every source
    /// each interval.
    pub fn spawn_recording_loop(&self, mut stop: tokio::sync::watch::Receiver<bool>) -> JoinHandle<()> {
        let recorder = self.recorder.clone();
        let registry = self.registry.clone();
        let interval = std::time::Duration::from_millis(self.config.snapshot_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        recorder.record_all(&registry);
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn get_refusal_report(&self) -> RefusalReport {
        self.refusal.evaluate()
    }

    pub fn get_divergence_report(&self) -> Vec<DivergenceRecord> {
        self.replay.divergence_report()
    }

    pub fn replay(&self, events: &[TimelineEvent]) -> Result<ReplayReport, ChronosError> {
        self.replay.start_replay(events)
    }

    /// The IPC session token. In-process API only; never logged.
    pub fn get_ipc_auth_token(&self) -> Option<&str> {
        self.ipc.as_ref().map(IpcServer::auth_token)
    }

    /// Starts the IPC server configured at initialization, or one bound to
    /// `path` when none was configured.
    pub fn start_ipc_server(&mut self, path: Option<&Path>) -> Result<JoinHandle<()>, ChronosError> {
        if self.ipc.is_none() {
            let path = path.ok_or_else(|| {
                ChronosError::InvalidState("no ipc socket path configured".to_string())
            })?;
            let mut ipc_config = IpcServerConfig::new(path);
            ipc_config.max_messages_per_minute = self.config.ipc_rate_limit_per_minute;
            let server = IpcServer::new(ipc_config, self.metrics.clone());
            self.recorder.add_listener(server.timeline_listener());
            self.ipc = Some(server);
        }
        let server = self.ipc.as_ref().expect("ipc server just ensured");
        server.start().map_err(|err| match err {
            crate::ipc::IpcError::Io(io) => ChronosError::Io(io),
            other => ChronosError::Crypto(other.to_string()),
        })
    }

    /// Stops the IPC server and aborts any running replay.
    pub fn shutdown(&self) {
        if let Some(server) = &self.ipc {
            server.stop();
        }
        self.replay.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::FixedSource;
    use crate::timeline::DeterminismClass;
    use serde_json::json;

    #[test]
    fn register_conflict_maps_to_error() {
        let runtime = ChronosRuntime::initialize(Config::default());
        runtime
            .register_source(Arc::new(FixedSource::guaranteed("a", json!(1))))
            .unwrap();
        let err = runtime
            .register_source(Arc::new(FixedSource::guaranteed("a", json!(1))))
            .unwrap_err();
        assert!(matches!(err, ChronosError::RegistrationConflict(id) if id == "a"));
    }

    #[test]
    fn record_all_and_reports() {
        let runtime = ChronosRuntime::initialize(Config::default());
        runtime
            .register_source(Arc::new(FixedSource::guaranteed("a", json!({"n": 1}))))
            .unwrap();
        runtime
            .register_source(Arc::new(
                FixedSource::guaranteed("b", json!(2)).with_class(DeterminismClass::Verifiable),
            ))
            .unwrap();

        assert_eq!(runtime.record_all(), 2);
        assert_eq!(runtime.buffer().len(), 2);
        assert_eq!(runtime.metrics().events_recorded, 2);

        let report = runtime.get_refusal_report();
        assert!(report.is_allowed);
        assert_eq!(runtime.get_registered_sources(), vec!["a", "b"]);
    }

    #[test]
    fn fresh_runtimes_are_isolated() {
        let a = ChronosRuntime::initialize(Config::default());
        let b = ChronosRuntime::initialize(Config::default());
        a.register_source(Arc::new(FixedSource::guaranteed("only-a", json!(1))))
            .unwrap();
        assert!(b.get_registered_sources().is_empty());
    }

    #[tokio::test]
    async fn recording_loop_captures_periodically() {
        let runtime = ChronosRuntime::initialize(Config {
            snapshot_interval_ms: 5,
            ..Config::default()
        });
        runtime
            .register_source(Arc::new(FixedSource::guaranteed("tick", json!(1))))
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let handle = runtime.spawn_recording_loop(stop_rx);
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        stop_tx.send(true).unwrap();
        let _ = handle.await;

        assert!(runtime.buffer().len() >= 2);
    }
}
