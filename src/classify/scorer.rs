use serde::{Deserialize, Serialize};

use crate::classify::rules::ClassifierRules;
use crate::source::{SourceRegistry, StateSource};
use crate::timeline::DeterminismClass;

/// Replay becomes eligible at this score.
pub const ELIGIBILITY_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Perfect,
    High,
    Conditional,
    Unsafe,
}

impl ScoreLevel {
    fn from_score(score: u8) -> Self {
        match score {
            100 => ScoreLevel::Perfect,
            80..=99 => ScoreLevel::High,
            50..=79 => ScoreLevel::Conditional,
            _ => ScoreLevel::Unsafe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceScore {
    pub source_id: String,
    pub class: DeterminismClass,
    pub score: u8,
    pub level: ScoreLevel,
    pub replay_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScore {
    pub score: u8,
    pub replay_eligible: bool,
    pub source_scores: Vec<SourceScore>,
}

/// Combines the declared class, the static analysis, and the developer tags
/// into per-source and per-session determinism scores.
pub struct DeterminismScorer;

impl DeterminismScorer {
    /// Per-source score: the class base weight intersected with the static
    /// analysis score (minimum of the two), plus 10 for an explicit
    /// `Deterministic` tag, clamped to 100.
    pub fn score_source(source: &dyn StateSource, rules: &ClassifierRules) -> SourceScore {
        let class = source.determinism_class();
        let analysis = rules.analyze(&source.type_profile());
        let base = class.base_weight();
        let mut score = base.min(analysis.score);
        if source.tags().has_deterministic() {
            score = score.saturating_add(10).min(100);
        }
        SourceScore {
            source_id: source.source_id().to_string(),
            class,
            score,
            level: ScoreLevel::from_score(score),
            replay_eligible: score >= ELIGIBILITY_THRESHOLD,
        }
    }

    /// Session score across every registered source. Any Unsafe source
    /// zeroes the session; otherwise the score is the mean of the average
    /// static score and the class-weighted average. A session with no
    /// sources has nothing to diverge, so it scores 100.
    pub fn score_session(registry: &SourceRegistry, rules: &ClassifierRules) -> SessionScore {
        let sources = registry.get_all();
        let source_scores: Vec<SourceScore> = sources
            .iter()
            .map(|s| Self::score_source(s.as_ref(), rules))
            .collect();

        if sources.is_empty() {
            return SessionScore {
                score: 100,
                replay_eligible: true,
                source_scores,
            };
        }

        let any_unsafe = sources
            .iter()
            .any(|s| s.determinism_class() == DeterminismClass::Unsafe);
        if any_unsafe {
            return SessionScore {
                score: 0,
                replay_eligible: false,
                source_scores,
            };
        }

        let n = sources.len() as u32;
        let static_sum: u32 = sources
            .iter()
            .map(|s| rules.analyze(&s.type_profile()).score as u32)
            .sum();
        let weight_sum: u32 = sources
            .iter()
            .map(|s| s.determinism_class().base_weight() as u32)
            .sum();
        let avg_static = static_sum / n;
        let class_weighted_avg = weight_sum / n;
        let score = ((avg_static + class_weighted_avg) / 2).min(100) as u8;

        SessionScore {
            score,
            replay_eligible: score >= ELIGIBILITY_THRESHOLD,
            source_scores,
        }
    }
}
