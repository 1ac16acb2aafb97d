use serde::{Deserialize, Serialize};

/// Developer-declared tags attached to a captured type.
///
/// A small closed set: the annotation surface of the host language is reduced
/// to these variants plus associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum SourceTag {
    /// The developer asserts the type is fully deterministic.
    Deterministic,
    /// The value can be checked against a recorded hash at replay time.
    Verifiable,
    /// Attested safe under stated conditions.
    ConditionalSafe {
        reason: String,
        author: String,
        review_date: String,
    },
    /// The developer concedes the type is not replayable.
    Unsafe { reason: String },
    /// Redact this field's value on capture.
    Redact { field: String },
    /// Drop this field entirely on capture.
    Ignore { field: String },
}

/// The set of tags declared for one type, with the queries the
/// classification pipeline needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    tags: Vec<SourceTag>,
}

impl TagSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(tags: Vec<SourceTag>) -> Self {
        Self { tags }
    }

    pub fn with(mut self, tag: SourceTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceTag> {
        self.tags.iter()
    }

    pub fn has_deterministic(&self) -> bool {
        self.tags
            .iter()
            .any(|t| matches!(t, SourceTag::Deterministic))
    }

    pub fn has_verifiable(&self) -> bool {
        self.tags.iter().any(|t| matches!(t, SourceTag::Verifiable))
    }

    pub fn unsafe_reason(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            SourceTag::Unsafe { reason } => Some(reason.as_str()),
            _ => None,
        })
    }

    pub fn conditional_reason(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            SourceTag::ConditionalSafe { reason, .. } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// Fields the developer marked for redaction on capture.
    pub fn redacted_fields(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter_map(|t| match t {
                SourceTag::Redact { field } => Some(field.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Fields the developer marked to drop on capture.
    pub fn ignored_fields(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter_map(|t| match t {
                SourceTag::Ignore { field } => Some(field.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl FromIterator<SourceTag> for TagSet {
    fn from_iter<I: IntoIterator<Item = SourceTag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}
