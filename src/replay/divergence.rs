use serde::{Deserialize, Serialize};

/// How a replayed value differed from the recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Recorded and live state agree.
    None,
    /// The state's content or shape differs, or the checkpoint is missing.
    /// Replay cannot continue truthfully.
    Structural,
    /// Same content observed at a different time or order.
    Temporal,
    /// Same content held by a different instance.
    Identity,
}

impl Divergence {
    /// Structural divergences halt replay.
    pub fn should_halt(self) -> bool {
        self == Divergence::Structural
    }

    /// Temporal divergences warn; replay continues.
    pub fn should_warn(self) -> bool {
        self == Divergence::Temporal
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Divergence::None => "none",
            Divergence::Structural => "structural",
            Divergence::Temporal => "temporal",
            Divergence::Identity => "identity",
        }
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One divergence observed during replay, tied back to the event that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub sequence_no: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub divergence: Divergence,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_structural_halts() {
        assert!(Divergence::Structural.should_halt());
        assert!(!Divergence::Temporal.should_halt());
        assert!(!Divergence::Identity.should_halt());
        assert!(!Divergence::None.should_halt());
    }

    #[test]
    fn only_temporal_warns() {
        assert!(Divergence::Temporal.should_warn());
        assert!(!Divergence::Structural.should_warn());
    }
}
