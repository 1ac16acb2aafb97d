use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::classify::refusal::RefusalEngine;
use crate::classify::scorer::{DeterminismScorer, ELIGIBILITY_THRESHOLD};
use crate::classify::verifier::RuntimeVerifier;
use crate::classify::{ClassifierRules, DeveloperContract};
use crate::error::ChronosError;
use crate::record::recorder::prepare_captured_value;
use crate::replay::divergence::{Divergence, DivergenceRecord};
use crate::replay::sandbox::Sandbox;
use crate::source::SourceRegistry;
use crate::timeline::{DeterminismClass, Redactor, TimelineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    Idle,
    Preflight,
    Replaying,
    Paused,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub success: bool,
    pub events_replayed: u64,
    pub divergences: Vec<DivergenceRecord>,
}

/// Drives a recorded timeline back through the registered sources, inside
/// the sandbox, refusing up front anything the session cannot honor.
pub struct ReplayController {
    registry: Arc<SourceRegistry>,
    rules: Arc<ClassifierRules>,
    contract: Arc<DeveloperContract>,
    verifier: Arc<RuntimeVerifier>,
    refusal: Arc<RefusalEngine>,
    sandbox: Arc<Sandbox>,
    redactor: Redactor,
    state: Mutex<ReplayState>,
    state_changed: Condvar,
    divergences: Mutex<Vec<DivergenceRecord>>,
    acknowledged: Mutex<HashSet<String>>,
}

impl ReplayController {
    pub fn new(
        registry: Arc<SourceRegistry>,
        rules: Arc<ClassifierRules>,
        contract: Arc<DeveloperContract>,
        verifier: Arc<RuntimeVerifier>,
        refusal: Arc<RefusalEngine>,
        sandbox: Arc<Sandbox>,
    ) -> Self {
        Self {
            registry,
            rules,
            contract,
            verifier,
            refusal,
            sandbox,
            redactor: Redactor::new(),
            state: Mutex::new(ReplayState::Idle),
            state_changed: Condvar::new(),
            divergences: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self) -> ReplayState {
        *self.state.lock()
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// Divergences observed in the most recent replay.
    pub fn divergence_report(&self) -> Vec<DivergenceRecord> {
        self.divergences.lock().clone()
    }

    /// Checkpoint ids acknowledged in the most recent replay.
    pub fn acknowledged_checkpoints(&self) -> HashSet<String> {
        self.acknowledged.lock().clone()
    }

    /// Legal only while replaying.
    pub fn pause(&self) -> Result<(), ChronosError> {
        let mut state = self.state.lock();
        if *state != ReplayState::Replaying {
            return Err(ChronosError::InvalidState(format!(
                "cannot pause from {state:?}"
            )));
        }
        *state = ReplayState::Paused;
        self.state_changed.notify_all();
        Ok(())
    }

    /// Legal only while paused.
    pub fn resume(&self) -> Result<(), ChronosError> {
        let mut state = self.state.lock();
        if *state != ReplayState::Paused {
            return Err(ChronosError::InvalidState(format!(
                "cannot resume from {state:?}"
            )));
        }
        *state = ReplayState::Replaying;
        self.state_changed.notify_all();
        Ok(())
    }

    /// Always legal. The iteration loop observes the abort between events;
    /// the sandbox drops with the replay either way.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        *state = ReplayState::Aborted;
        self.state_changed.notify_all();
        drop(state);
        self.sandbox.deactivate();
    }

    /// Replays the given events in order. Preflight refusals surface as
    /// errors; divergences during the run land in the report, a structural
    /// one halting it.
    pub fn start_replay(&self, events: &[TimelineEvent]) -> Result<ReplayReport, ChronosError> {
        {
            let mut state = self.state.lock();
            match *state {
                ReplayState::Idle | ReplayState::Completed | ReplayState::Aborted => {
                    *state = ReplayState::Preflight;
                }
                other => {
                    return Err(ChronosError::InvalidState(format!(
                        "replay already running ({other:?})"
                    )));
                }
            }
        }
        self.divergences.lock().clear();
        self.acknowledged.lock().clear();

        if let Err(err) = self.preflight() {
            *self.state.lock() = ReplayState::Aborted;
            return Err(err);
        }

        let conditional = self
            .registry
            .get_by_class(&[DeterminismClass::Conditional])
            .len();
        if conditional > 0 {
            tracing::warn!(
                count = conditional,
                "conditionally-safe sources registered; replay proceeds under attestation"
            );
        }

        self.sandbox.activate();
        *self.state.lock() = ReplayState::Replaying;

        let mut events_replayed: u64 = 0;
        let mut halted = false;

        for event in events {
            if !self.wait_until_running() {
                halted = true;
                break;
            }

            events_replayed += 1;
            match event {
                TimelineEvent::Snapshot(snapshot) => {
                    if let Some(divergence) = self.replay_snapshot(snapshot) {
                        let halt = divergence.divergence.should_halt();
                        if divergence.divergence.should_warn() {
                            tracing::warn!(sequence_no = divergence.sequence_no, "temporal divergence during replay");
                        }
                        self.divergences.lock().push(divergence);
                        if halt {
                            halted = true;
                            break;
                        }
                    }
                }
                TimelineEvent::Checkpoint(checkpoint) => {
                    self.acknowledged
                        .lock()
                        .insert(checkpoint.checkpoint_id.clone());
                }
                TimelineEvent::Gap(gap) => {
                    tracing::debug!(reason = %gap.reason, "gap event during replay");
                }
                TimelineEvent::Log(_) => {}
            }
        }

        let final_state = if halted {
            ReplayState::Aborted
        } else {
            ReplayState::Completed
        };
        {
            let mut state = self.state.lock();
            // An external abort beats our own conclusion.
            if *state != ReplayState::Aborted {
                *state = final_state;
            }
            halted = halted || *state == ReplayState::Aborted;
        }
        self.sandbox.deactivate();

        Ok(ReplayReport {
            success: !halted,
            events_replayed,
            divergences: self.divergences.lock().clone(),
        })
    }

    /// Refusal evaluation plus runtime assertions. Any failure refuses the
    /// replay before the sandbox comes up.
    fn preflight(&self) -> Result<(), ChronosError> {
        let report = self.refusal.evaluate();
        if !report.is_allowed {
            let mut sources: HashMap<String, String> = report
                .blocking_reasons
                .iter()
                .map(|reason| (reason.source_id.clone(), reason.summary()))
                .collect();
            if sources.is_empty() {
                // No Unsafe source, but the session score fell short. Name
                // every source below the threshold.
                let session = DeterminismScorer::score_session(&self.registry, &self.rules);
                for score in session
                    .source_scores
                    .iter()
                    .filter(|s| s.score < ELIGIBILITY_THRESHOLD)
                {
                    sources.insert(
                        score.source_id.clone(),
                        format!("determinism score {} below replay threshold", score.score),
                    );
                }
            }
            return Err(ChronosError::DeterminismViolation { sources });
        }

        let failed = self.contract.run_assertions();
        if !failed.is_empty() {
            return Err(ChronosError::AssertionsFailed(failed));
        }
        Ok(())
    }

    /// Blocks while paused; returns false when aborted.
    fn wait_until_running(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            match *state {
                ReplayState::Replaying => return true,
                ReplayState::Aborted => return false,
                ReplayState::Paused => self.state_changed.wait(&mut state),
                _ => return false,
            }
        }
    }

    /// Verifies one snapshot against live state. Returns a record when the
    /// replay diverged.
    fn replay_snapshot(
        &self,
        snapshot: &crate::timeline::SnapshotEvent,
    ) -> Option<DivergenceRecord> {
        let Some(source) = self.registry.get(&snapshot.source_id) else {
            return Some(DivergenceRecord {
                sequence_no: snapshot.sequence_no,
                source_id: Some(snapshot.source_id.clone()),
                divergence: Divergence::Structural,
                message: "snapshot references a source that is not registered".to_string(),
            });
        };

        let Some(recorded_hash) = snapshot.checkpoint_hash() else {
            // No verification point; the snapshot replays as-is.
            return None;
        };

        // Seed the verifier from the recording when this process did not
        // create the checkpoint itself.
        if self.verifier.get_checkpoint(snapshot.sequence_no).is_none() {
            self.verifier
                .import_checkpoint(snapshot.sequence_no, &recorded_hash);
        }

        let live = match source.capture_state() {
            Ok(value) => prepare_captured_value(source.as_ref(), value, &self.redactor),
            Err(err) => {
                return Some(DivergenceRecord {
                    sequence_no: snapshot.sequence_no,
                    source_id: Some(snapshot.source_id.clone()),
                    divergence: Divergence::Structural,
                    message: format!("live capture failed during replay: {err}"),
                });
            }
        };

        let verification = self
            .verifier
            .verify_against_checkpoint(snapshot.sequence_no, &live);
        if verification.divergence == Divergence::None {
            None
        } else {
            Some(DivergenceRecord {
                sequence_no: snapshot.sequence_no,
                source_id: Some(snapshot.source_id.clone()),
                divergence: verification.divergence,
                message: verification.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AgentMetrics;
    use crate::source::testing::FixedSource;
    use crate::source::StateSource;
    use crate::timeline::event::SnapshotEvent;
    use serde_json::json;

    fn controller_for(registry: SourceRegistry) -> ReplayController {
        let registry = Arc::new(registry);
        let rules = Arc::new(ClassifierRules::default());
        let refusal = Arc::new(RefusalEngine::new(registry.clone(), rules.clone()));
        ReplayController::new(
            registry,
            rules,
            Arc::new(DeveloperContract::new()),
            Arc::new(RuntimeVerifier::new()),
            refusal,
            Arc::new(Sandbox::new(Arc::new(AgentMetrics::new()))),
        )
    }

    fn snapshot_for(source: &dyn StateSource, seq: u64, hash: Option<&[u8]>) -> TimelineEvent {
        let value = source.capture_state().unwrap();
        let bytes = serde_json::to_vec(&value).unwrap();
        TimelineEvent::Snapshot(SnapshotEvent::new(
            seq,
            seq,
            "test",
            source.source_id(),
            source.determinism_class(),
            source.type_profile().type_name,
            &bytes,
            hash,
        ))
    }

    #[test]
    fn unsafe_source_refuses_before_sandbox() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(
                FixedSource::guaranteed("api", json!(1)).with_class(DeterminismClass::Unsafe),
            ))
            .unwrap();
        let controller = controller_for(registry);

        let err = controller.start_replay(&[]).unwrap_err();
        match err {
            ChronosError::DeterminismViolation { sources } => {
                assert!(sources.contains_key("api"));
                assert!(!sources["api"].is_empty());
            }
            other => panic!("expected determinism violation, got {other}"),
        }
        assert_eq!(controller.state(), ReplayState::Aborted);
        assert!(!controller.sandbox().is_active());
    }

    #[test]
    fn guaranteed_sources_replay_clean() {
        let registry = SourceRegistry::new();
        let source = Arc::new(FixedSource::guaranteed("safe", json!("safe")));
        registry.register(source.clone()).unwrap();
        let controller = controller_for(registry);

        let events = vec![snapshot_for(source.as_ref(), 1, None)];
        let report = controller.start_replay(&events).unwrap();

        assert!(report.success);
        assert_eq!(report.events_replayed, 1);
        assert!(report.divergences.is_empty());
        assert_eq!(controller.state(), ReplayState::Completed);
        assert!(!controller.sandbox().is_active());
    }

    #[test]
    fn missing_source_halts_with_structural_divergence() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(FixedSource::guaranteed("present", json!(1))))
            .unwrap();
        let controller = controller_for(registry);

        let ghost = FixedSource::guaranteed("ghost", json!(1));
        let events = vec![snapshot_for(&ghost, 1, None)];
        // Craft the snapshot by hand: the ghost source is never registered.
        let report = controller.start_replay(&events).unwrap();
        assert!(!report.success);
        assert_eq!(report.divergences.len(), 1);
        assert_eq!(report.divergences[0].divergence, Divergence::Structural);
        assert_eq!(controller.state(), ReplayState::Aborted);
        assert!(!controller.sandbox().is_active());
    }

    #[test]
    fn checkpoint_mismatch_halts() {
        let registry = SourceRegistry::new();
        let source = Arc::new(
            FixedSource::guaranteed("watched", json!({"n": 2}))
                .with_class(DeterminismClass::Verifiable),
        );
        registry.register(source.clone()).unwrap();
        let controller = controller_for(registry);

        // Recorded hash disagrees with what the source produces live.
        let recorded = RuntimeVerifier::hash_value(&json!({"n": 1}));
        let events = vec![snapshot_for(source.as_ref(), 1, Some(&recorded))];
        let report = controller.start_replay(&events).unwrap();

        assert!(!report.success);
        assert_eq!(report.divergences[0].divergence, Divergence::Structural);
    }

    #[test]
    fn checkpoint_match_passes() {
        let registry = SourceRegistry::new();
        let source = Arc::new(
            FixedSource::guaranteed("watched", json!({"n": 2}))
                .with_class(DeterminismClass::Verifiable),
        );
        registry.register(source.clone()).unwrap();
        let controller = controller_for(registry);

        let recorded = RuntimeVerifier::hash_value(&json!({"n": 2}));
        let events = vec![snapshot_for(source.as_ref(), 1, Some(&recorded))];
        let report = controller.start_replay(&events).unwrap();

        assert!(report.success);
        assert!(report.divergences.is_empty());
    }

    #[test]
    fn failed_assertion_refuses_replay() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(FixedSource::guaranteed("safe", json!(1))))
            .unwrap();
        let registry = Arc::new(registry);
        let rules = Arc::new(ClassifierRules::default());
        let contract = Arc::new(DeveloperContract::new());
        contract.register_assertion("cache_warm", None, || false);
        let refusal = Arc::new(RefusalEngine::new(registry.clone(), rules.clone()));
        let controller = ReplayController::new(
            registry,
            rules,
            contract,
            Arc::new(RuntimeVerifier::new()),
            refusal,
            Arc::new(Sandbox::new(Arc::new(AgentMetrics::new()))),
        );

        let err = controller.start_replay(&[]).unwrap_err();
        assert!(matches!(err, ChronosError::AssertionsFailed(names) if names == ["cache_warm"]));
    }

    #[test]
    fn pause_resume_legality() {
        let controller = controller_for(SourceRegistry::new());
        assert!(controller.pause().is_err());
        assert!(controller.resume().is_err());

        // Abort is always legal, even from Idle.
        controller.abort();
        assert_eq!(controller.state(), ReplayState::Aborted);
    }

    #[test]
    fn gap_and_log_events_are_informational() {
        use crate::timeline::event::{GapEvent, LogEvent, LogLevel};

        let registry = SourceRegistry::new();
        let controller = controller_for(registry);
        let events = vec![
            TimelineEvent::Gap(GapEvent::overflow(1, "test")),
            TimelineEvent::Log(LogEvent {
                ts_ms: 2,
                sequence_no: 2,
                thread_name: "test".into(),
                level: LogLevel::Info,
                tag: "app".into(),
                message: "hello".into(),
            }),
        ];
        let report = controller.start_replay(&events).unwrap();
        assert!(report.success);
        assert_eq!(report.events_replayed, 2);
    }
}
