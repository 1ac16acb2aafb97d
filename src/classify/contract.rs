use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::source::tags::{SourceTag, TagSet};
use crate::timeline::event::now_ms;
use crate::timeline::DeterminismClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    Tag,
    Override,
    Assertion,
    None,
}

/// What the developer contract concluded about a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDecision {
    pub class: Option<DeterminismClass>,
    pub origin: DecisionOrigin,
    pub reason: Option<String>,
}

impl ContractDecision {
    fn none() -> Self {
        Self {
            class: None,
            origin: DecisionOrigin::None,
            reason: None,
        }
    }
}

/// A process-wide acknowledgment that a type's declared class is to be
/// trusted over whatever the tags say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub class_name: String,
    pub declared_class: DeterminismClass,
    pub reason: String,
    pub acknowledged_at_ms: u64,
}

type AssertionFn = Box<dyn Fn() -> bool + Send + Sync>;

struct NamedAssertion {
    name: String,
    class_name: Option<String>,
    predicate: AssertionFn,
}

/// Reads developer tags, holds registered overrides, and evaluates runtime
/// assertions before replay.
#[derive(Default)]
pub struct DeveloperContract {
    overrides: RwLock<HashMap<String, OverrideRecord>>,
    assertions: Mutex<Vec<NamedAssertion>>,
}

impl DeveloperContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an override for a type. Replaces any previous override for
    /// the same class name.
    pub fn register_override(
        &self,
        class_name: impl Into<String>,
        declared_class: DeterminismClass,
        reason: impl Into<String>,
    ) {
        let class_name = class_name.into();
        let record = OverrideRecord {
            class_name: class_name.clone(),
            declared_class,
            reason: reason.into(),
            acknowledged_at_ms: now_ms(),
        };
        self.overrides.write().insert(class_name, record);
    }

    pub fn get_override(&self, class_name: &str) -> Option<OverrideRecord> {
        self.overrides.read().get(class_name).cloned()
    }

    /// Registers a named predicate that must hold before any replay. Scope
    /// it to a type with `class_name`, or leave it global with `None`.
    pub fn register_assertion(
        &self,
        name: impl Into<String>,
        class_name: Option<String>,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) {
        self.assertions.lock().push(NamedAssertion {
            name: name.into(),
            class_name,
            predicate: Box::new(predicate),
        });
    }

    /// Evaluates every registered assertion; returns the names that failed.
    pub fn run_assertions(&self) -> Vec<String> {
        self.assertions
            .lock()
            .iter()
            .filter(|a| !(a.predicate)())
            .map(|a| a.name.clone())
            .collect()
    }

    /// Resolves the declared determinism of a type.
    ///
    /// Overrides win over tags. Tag precedence is explicit `Unsafe`, then
    /// `Deterministic`, then `Verifiable`, then `ConditionalSafe`. A type
    /// with no tags or overrides but a scoped runtime assertion is treated
    /// as Verifiable: its validity is checked at replay time.
    pub fn check_annotations(&self, class_name: &str, tags: &TagSet) -> ContractDecision {
        if let Some(record) = self.get_override(class_name) {
            return ContractDecision {
                class: Some(record.declared_class),
                origin: DecisionOrigin::Override,
                reason: Some(record.reason),
            };
        }

        if let Some(reason) = tags.unsafe_reason() {
            return ContractDecision {
                class: Some(DeterminismClass::Unsafe),
                origin: DecisionOrigin::Tag,
                reason: Some(reason.to_string()),
            };
        }
        if tags.has_deterministic() {
            return ContractDecision {
                class: Some(DeterminismClass::Guaranteed),
                origin: DecisionOrigin::Tag,
                reason: None,
            };
        }
        if tags.has_verifiable() {
            return ContractDecision {
                class: Some(DeterminismClass::Verifiable),
                origin: DecisionOrigin::Tag,
                reason: None,
            };
        }
        if let Some(tag) = tags.iter().find_map(|t| match t {
            SourceTag::ConditionalSafe { reason, author, .. } => {
                Some(format!("{reason} (attested by {author})"))
            }
            _ => None,
        }) {
            return ContractDecision {
                class: Some(DeterminismClass::Conditional),
                origin: DecisionOrigin::Tag,
                reason: Some(tag),
            };
        }

        let scoped = self
            .assertions
            .lock()
            .iter()
            .find(|a| a.class_name.as_deref() == Some(class_name))
            .map(|a| a.name.clone());
        if let Some(name) = scoped {
            return ContractDecision {
                class: Some(DeterminismClass::Verifiable),
                origin: DecisionOrigin::Assertion,
                reason: Some(format!("runtime assertion '{name}' registered")),
            };
        }

        ContractDecision::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_tag_beats_deterministic() {
        let contract = DeveloperContract::new();
        let tags = TagSet::empty()
            .with(SourceTag::Deterministic)
            .with(SourceTag::Unsafe {
                reason: "hidden clock read".into(),
            });
        let decision = contract.check_annotations("myapp::T", &tags);
        assert_eq!(decision.class, Some(DeterminismClass::Unsafe));
        assert_eq!(decision.origin, DecisionOrigin::Tag);
        assert_eq!(decision.reason.as_deref(), Some("hidden clock read"));
    }

    #[test]
    fn deterministic_beats_conditional() {
        let contract = DeveloperContract::new();
        let tags = TagSet::empty()
            .with(SourceTag::ConditionalSafe {
                reason: "isolated".into(),
                author: "dev".into(),
                review_date: "2026-01-10".into(),
            })
            .with(SourceTag::Deterministic);
        let decision = contract.check_annotations("myapp::T", &tags);
        assert_eq!(decision.class, Some(DeterminismClass::Guaranteed));
    }

    #[test]
    fn override_beats_tags() {
        let contract = DeveloperContract::new();
        contract.register_override("myapp::T", DeterminismClass::Conditional, "audited");
        let tags = TagSet::empty().with(SourceTag::Unsafe {
            reason: "legacy".into(),
        });
        let decision = contract.check_annotations("myapp::T", &tags);
        assert_eq!(decision.class, Some(DeterminismClass::Conditional));
        assert_eq!(decision.origin, DecisionOrigin::Override);
        assert!(contract.get_override("myapp::T").is_some());
    }

    #[test]
    fn no_tags_yields_none() {
        let contract = DeveloperContract::new();
        let decision = contract.check_annotations("myapp::T", &TagSet::empty());
        assert_eq!(decision.class, None);
        assert_eq!(decision.origin, DecisionOrigin::None);
    }

    #[test]
    fn scoped_assertion_marks_verifiable() {
        let contract = DeveloperContract::new();
        contract.register_assertion("cache_empty", Some("myapp::Cache".into()), || true);
        let decision = contract.check_annotations("myapp::Cache", &TagSet::empty());
        assert_eq!(decision.class, Some(DeterminismClass::Verifiable));
        assert_eq!(decision.origin, DecisionOrigin::Assertion);
        // Other types are untouched.
        let other = contract.check_annotations("myapp::Other", &TagSet::empty());
        assert_eq!(other.origin, DecisionOrigin::None);
    }

    #[test]
    fn failing_assertions_are_named() {
        let contract = DeveloperContract::new();
        contract.register_assertion("always_true", None, || true);
        contract.register_assertion("always_false", None, || false);
        assert_eq!(contract.run_assertions(), vec!["always_false".to_string()]);
    }
}
