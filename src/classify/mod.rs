//! Determinism classification pipeline: static rules, developer contract,
//! runtime verification, scoring, and the refusal engine that gates replay.

pub mod contract;
pub mod refusal;
pub mod rules;
pub mod scorer;
pub mod verifier;

pub use contract::{ContractDecision, DecisionOrigin, DeveloperContract, OverrideRecord};
pub use refusal::{BlockingReason, Mitigation, MitigationEffort, RefusalEngine, RefusalReport};
pub use rules::{ClassifierRules, Risk, RiskSeverity, TypeAnalysis, TypePattern};
pub use scorer::{DeterminismScorer, ScoreLevel, SessionScore, SourceScore};
pub use verifier::{RuntimeVerifier, Verification};
