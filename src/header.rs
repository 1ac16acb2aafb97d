use serde::{Deserialize, Serialize};

use crate::timeline::event::now_ms;

pub const FORMAT_VERSION: FormatVersion = FormatVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compatibility verdict for a recording header. Errors make the recording
/// unreadable; warnings flag drift worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Identifies a recording: who produced it, with which tool and runtime,
/// and under which format version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub format_version: FormatVersion,
    pub tool_version: String,
    pub platform_version: String,
    pub runtime_version: String,
    pub created_at_ms: u64,
    pub app_id: String,
    pub process_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl RecordingHeader {
    pub fn new(app_id: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            platform_version: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            runtime_version: format!("rust-{}", env!("CARGO_PKG_RUST_VERSION")),
            created_at_ms: now_ms(),
            app_id: app_id.into(),
            process_name: process_name.into(),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Checks whether a recording made under `other` can be read here:
    /// majors must match, minors must stay within one of each other
    /// (drifting minors warn), patches never matter.
    pub fn check_compatibility(&self, other: &RecordingHeader) -> Compatibility {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let ours = self.format_version;
        let theirs = other.format_version;
        if ours.major != theirs.major {
            errors.push(format!(
                "format major version mismatch: recording {theirs}, reader {ours}"
            ));
        } else {
            let drift = ours.minor.abs_diff(theirs.minor);
            if drift > 1 {
                errors.push(format!(
                    "format minor version too far apart: recording {theirs}, reader {ours}"
                ));
            } else if drift == 1 {
                warnings.push(format!(
                    "format minor version differs: recording {theirs}, reader {ours}"
                ));
            }
        }

        if self.tool_version != other.tool_version {
            warnings.push(format!(
                "recorded by tool {}, reading with {}",
                other.tool_version, self.tool_version
            ));
        }
        if let (Some(ours), Some(theirs)) = (&self.checksum, &other.checksum) {
            if ours != theirs {
                warnings.push("recording checksum differs".to_string());
            }
        }

        Compatibility {
            compatible: errors.is_empty(),
            warnings,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(major: u16, minor: u16, patch: u16) -> RecordingHeader {
        let mut header = RecordingHeader::new("com.example.app", "main");
        header.format_version = FormatVersion {
            major,
            minor,
            patch,
        };
        header
    }

    #[test]
    fn same_version_is_compatible() {
        let reader = header_with(1, 2, 3);
        let recording = header_with(1, 2, 9);
        let compat = reader.check_compatibility(&recording);
        assert!(compat.compatible);
        assert!(compat.errors.is_empty());
    }

    #[test]
    fn major_mismatch_is_an_error() {
        let reader = header_with(2, 0, 0);
        let recording = header_with(1, 0, 0);
        let compat = reader.check_compatibility(&recording);
        assert!(!compat.compatible);
        assert_eq!(compat.errors.len(), 1);
    }

    #[test]
    fn adjacent_minor_warns_distant_minor_errors() {
        let reader = header_with(1, 3, 0);

        let near = reader.check_compatibility(&header_with(1, 2, 0));
        assert!(near.compatible);
        assert_eq!(near.warnings.len(), 1);

        let far = reader.check_compatibility(&header_with(1, 1, 0));
        assert!(!far.compatible);
    }

    #[test]
    fn checksum_mismatch_warns() {
        let reader = header_with(1, 0, 0).with_checksum("aaa");
        let recording = header_with(1, 0, 0).with_checksum("bbb");
        let compat = reader.check_compatibility(&recording);
        assert!(compat.compatible);
        assert!(compat
            .warnings
            .iter()
            .any(|w| w.contains("checksum")));
    }

    #[test]
    fn header_serde_roundtrip() {
        let header = RecordingHeader::new("com.example.app", "main").with_checksum("abc");
        let json = serde_json::to_string(&header).unwrap();
        let back: RecordingHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(header, back);
    }
}
