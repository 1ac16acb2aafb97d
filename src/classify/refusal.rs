use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::rules::{ClassifierRules, Risk};
use crate::classify::scorer::DeterminismScorer;
use crate::source::SourceRegistry;
use crate::timeline::DeterminismClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationEffort {
    Low,
    Medium,
    High,
}

/// An opaque remediation hint attached to a refusal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mitigation {
    pub action: String,
    pub effort: MitigationEffort,
}

/// Why one source blocks replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingReason {
    pub source_id: String,
    pub display_name: String,
    pub class: DeterminismClass,
    pub risks: Vec<Risk>,
}

impl BlockingReason {
    /// Short reason string suitable for the determinism-violation error map.
    pub fn summary(&self) -> String {
        if self.risks.is_empty() {
            format!("declared {}", self.class)
        } else {
            self.risks
                .iter()
                .map(|r| r.description.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        }
    }
}

/// The verdict on whether this session may be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusalReport {
    pub is_allowed: bool,
    pub score: u8,
    pub blocking_reasons: Vec<BlockingReason>,
    pub mitigations: Vec<Mitigation>,
}

/// Decides whether replay is allowed and, when it is not, explains why and
/// what would help.
pub struct RefusalEngine {
    registry: Arc<SourceRegistry>,
    rules: Arc<ClassifierRules>,
    last_report: Mutex<Option<RefusalReport>>,
}

impl RefusalEngine {
    pub fn new(registry: Arc<SourceRegistry>, rules: Arc<ClassifierRules>) -> Self {
        Self {
            registry,
            rules,
            last_report: Mutex::new(None),
        }
    }

    /// Evaluates the current session. The log line stays generic; source
    /// identifiers are only available through `get_report`.
    pub fn evaluate(&self) -> RefusalReport {
        let session = DeterminismScorer::score_session(&self.registry, &self.rules);

        let blocking_reasons: Vec<BlockingReason> = self
            .registry
            .get_by_class(&[DeterminismClass::Unsafe])
            .iter()
            .map(|source| {
                let analysis = self.rules.analyze(&source.type_profile());
                BlockingReason {
                    source_id: source.source_id().to_string(),
                    display_name: source.display_name().to_string(),
                    class: source.determinism_class(),
                    risks: analysis.risks,
                }
            })
            .collect();

        let mitigations = Self::suggest_mitigations(&blocking_reasons);
        let report = RefusalReport {
            is_allowed: blocking_reasons.is_empty() && session.replay_eligible,
            score: session.score,
            blocking_reasons,
            mitigations,
        };

        tracing::info!(
            allowed = report.is_allowed,
            score = report.score,
            blocking = report.blocking_reasons.len(),
            "replay preflight evaluated"
        );

        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// The most recent report, with full source detail.
    pub fn get_report(&self) -> Option<RefusalReport> {
        self.last_report.lock().clone()
    }

    fn suggest_mitigations(reasons: &[BlockingReason]) -> Vec<Mitigation> {
        let mut mitigations: Vec<Mitigation> = Vec::new();
        let mut push_unique = |m: Mitigation| {
            if !mitigations.iter().any(|existing| existing.action == m.action) {
                mitigations.push(m);
            }
        };

        for reason in reasons {
            let mut matched = false;
            for risk in &reason.risks {
                let desc = risk.description.to_lowercase();
                if desc.contains("random") {
                    push_unique(Mitigation {
                        action: "Inject a fixed seed for random number generation".into(),
                        effort: MitigationEffort::Medium,
                    });
                    matched = true;
                } else if desc.contains("time") || desc.contains("clock") {
                    push_unique(Mitigation {
                        action: "Inject a controllable time provider".into(),
                        effort: MitigationEffort::Medium,
                    });
                    matched = true;
                } else if desc.contains("network") {
                    push_unique(Mitigation {
                        action: "Exclude the source and replay against cached data".into(),
                        effort: MitigationEffort::Low,
                    });
                    matched = true;
                } else if desc.contains("database") {
                    push_unique(Mitigation {
                        action: "Swap in an in-memory database for replay".into(),
                        effort: MitigationEffort::High,
                    });
                    matched = true;
                }
            }
            if !matched {
                push_unique(Mitigation {
                    action: "Use snapshot mode instead of replay".into(),
                    effort: MitigationEffort::Low,
                });
            }
        }
        mitigations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::FixedSource;
    use crate::source::TypeProfile;
    use serde_json::json;

    fn engine_with(registry: SourceRegistry) -> RefusalEngine {
        RefusalEngine::new(Arc::new(registry), Arc::new(ClassifierRules::default()))
    }

    #[test]
    fn clean_session_is_allowed() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(FixedSource::guaranteed("cart", json!(1))))
            .unwrap();
        let engine = engine_with(registry);
        let report = engine.evaluate();
        assert!(report.is_allowed);
        assert!(report.blocking_reasons.is_empty());
        assert!(report.mitigations.is_empty());
    }

    #[test]
    fn unsafe_source_blocks_with_reason() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(
                FixedSource::guaranteed("api", json!(1))
                    .with_class(DeterminismClass::Unsafe)
                    .with_profile(
                        TypeProfile::opaque("myapp::net::ApiClient")
                            .with_field("stream", "std::net::TcpStream"),
                    ),
            ))
            .unwrap();
        let engine = engine_with(registry);
        let report = engine.evaluate();

        assert!(!report.is_allowed);
        assert_eq!(report.score, 0);
        assert_eq!(report.blocking_reasons.len(), 1);
        let reason = &report.blocking_reasons[0];
        assert_eq!(reason.source_id, "api");
        assert!(reason.summary().contains("network"));
        assert!(report
            .mitigations
            .iter()
            .any(|m| m.action.contains("cached data") && m.effort == MitigationEffort::Low));
    }

    #[test]
    fn mitigations_deduplicate_by_action() {
        let registry = SourceRegistry::new();
        for id in ["rng_a", "rng_b"] {
            registry
                .register(Arc::new(
                    FixedSource::guaranteed(id, json!(1))
                        .with_class(DeterminismClass::Unsafe)
                        .with_profile(
                            TypeProfile::opaque(format!("myapp::{id}::Random"))
                                .with_field("rng", "rand::rngs::ThreadRng"),
                        ),
                ))
                .unwrap();
        }
        let engine = engine_with(registry);
        let report = engine.evaluate();
        let seed_actions = report
            .mitigations
            .iter()
            .filter(|m| m.action.contains("fixed seed"))
            .count();
        assert_eq!(seed_actions, 1);
    }

    #[test]
    fn fallback_mitigation_for_plain_unsafe() {
        let registry = SourceRegistry::new();
        registry
            .register(Arc::new(
                FixedSource::guaranteed("mystery", json!(1))
                    .with_class(DeterminismClass::Unsafe)
                    .with_profile(TypeProfile::pure_data("myapp::Plain")),
            ))
            .unwrap();
        let engine = engine_with(registry);
        let report = engine.evaluate();
        assert!(report
            .mitigations
            .iter()
            .any(|m| m.action.contains("snapshot mode")));
    }

    #[test]
    fn report_is_retrievable_after_evaluate() {
        let registry = SourceRegistry::new();
        let engine = engine_with(registry);
        assert!(engine.get_report().is_none());
        let report = engine.evaluate();
        assert_eq!(engine.get_report(), Some(report));
    }
}
