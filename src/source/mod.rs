//! State sources: the values the host registers for recording.

pub mod registry;
pub mod tags;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::timeline::DeterminismClass;

pub use registry::{RegistryError, RegistryListener, SourceRegistry};
pub use tags::{SourceTag, TagSet};

/// A source's capture operation failed. Counted as a metric; recording
/// continues.
#[derive(Debug, Error)]
#[error("capture failed: {0}")]
pub struct CaptureError(pub String);

impl CaptureError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Structural shape of a captured type, declared by the source itself.
/// Replaces runtime type introspection with explicit capability registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeShape {
    /// Enum-like: a closed set of variants carrying pure data.
    TaggedUnion,
    /// Struct of plain fields with no interior mutability.
    PureData,
    /// Anything the source cannot describe field-by-field.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProfile {
    pub name: String,
    pub type_name: String,
}

/// Declared description of the type a source captures: its qualified name,
/// shape, and member fields. The static classifier consumes this instead of
/// reflecting over live values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProfile {
    pub type_name: String,
    pub shape: TypeShape,
    pub fields: Vec<FieldProfile>,
}

impl TypeProfile {
    pub fn new(type_name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            type_name: type_name.into(),
            shape,
            fields: Vec::new(),
        }
    }

    pub fn pure_data(type_name: impl Into<String>) -> Self {
        Self::new(type_name, TypeShape::PureData)
    }

    pub fn tagged_union(type_name: impl Into<String>) -> Self {
        Self::new(type_name, TypeShape::TaggedUnion)
    }

    pub fn opaque(type_name: impl Into<String>) -> Self {
        Self::new(type_name, TypeShape::Opaque)
    }

    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldProfile {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }
}

/// A named value producer registered with the agent.
///
/// `capture_state` must be side-effect-free for sources declared
/// `Guaranteed` or `Verifiable`; the recorder treats it as fast and
/// non-blocking but wraps it in defensive error handling either way.
pub trait StateSource: Send + Sync {
    /// Unique id. Registering a second source under the same id fails.
    fn source_id(&self) -> &str;

    fn display_name(&self) -> &str {
        self.source_id()
    }

    /// The determinism class the developer declares for this source. The
    /// classification pipeline may judge it more harshly, never more kindly.
    fn determinism_class(&self) -> DeterminismClass;

    /// Produces the current value as structured data.
    fn capture_state(&self) -> Result<Value, CaptureError>;

    /// Declared description of the captured type, for static analysis.
    fn type_profile(&self) -> TypeProfile;

    /// Developer tags attached to the captured type.
    fn tags(&self) -> TagSet {
        TagSet::empty()
    }
}
