pub mod classify;
pub mod config;
pub mod coord;
pub mod error;
pub mod header;
pub mod ipc;
pub mod metrics;
pub mod record;
pub mod replay;
pub mod runtime;
pub mod source;
pub mod timeline;

pub use classify::{
    BlockingReason, ClassifierRules, ContractDecision, DecisionOrigin, DeterminismScorer,
    DeveloperContract, Mitigation, MitigationEffort, RefusalEngine, RefusalReport, Risk,
    RiskSeverity, RuntimeVerifier, ScoreLevel, SessionScore, SourceScore, TypeAnalysis,
    TypePattern, Verification,
};
pub use config::Config;
pub use coord::{CoordError, CrossProcessEvent, ProcessCoordinator, ProcessState};
pub use error::ChronosError;
pub use header::{Compatibility, FormatVersion, RecordingHeader};
pub use ipc::{IpcError, IpcServer, IpcServerConfig, SessionCrypto};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use record::{
    AdaptiveRecorder, MemoryPressureMonitor, MemorySample, MemorySampler, PressureListener,
    RecordingLevel, TimelineListener,
};
pub use replay::{
    Access, BlockedOperation, Divergence, DivergenceRecord, GuardedOperation, NetworkGuard,
    ReplayController, ReplayReport, ReplayState, Sandbox,
};
pub use runtime::ChronosRuntime;
pub use source::{
    CaptureError, FieldProfile, RegistryError, RegistryListener, SourceRegistry, SourceTag,
    StateSource, TagSet, TypeProfile, TypeShape,
};
pub use timeline::{
    CheckpointEvent, DeterminismClass, GapEvent, LogEvent, LogLevel, Redactor, RingBuffer,
    SnapshotEvent, TimelineEvent,
};
