use serde::{Deserialize, Serialize};

use crate::source::{TypeProfile, TypeShape};
use crate::timeline::DeterminismClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Info,
    Warning,
    Critical,
}

/// One classification finding about a type or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Risk {
    pub severity: RiskSeverity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Risk {
    fn critical(description: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            severity: RiskSeverity::Critical,
            description: description.into(),
            field: field.map(str::to_string),
        }
    }

    fn warning(description: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            severity: RiskSeverity::Warning,
            description: description.into(),
            field: field.map(str::to_string),
        }
    }

    fn info(description: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            severity: RiskSeverity::Info,
            description: description.into(),
            field: field.map(str::to_string),
        }
    }
}

/// Result of analyzing one declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAnalysis {
    pub type_name: String,
    pub class: DeterminismClass,
    /// 0..=100. Starts at 100; each risk subtracts by severity.
    pub score: u8,
    pub risks: Vec<Risk>,
}

/// One entry in a pattern table: a lowercase substring to look for in a
/// qualified type name, and what finding it means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypePattern {
    pub needle: String,
    pub description: String,
}

impl TypePattern {
    pub fn new(needle: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            needle: needle.into().to_lowercase(),
            description: description.into(),
        }
    }

    fn matches(&self, type_name_lower: &str) -> bool {
        type_name_lower.contains(&self.needle)
    }
}

/// Pattern-based mapping from declared type names to determinism classes.
///
/// The tables are data: hosts can extend or replace them. Rule order is
/// critical-unsafe, then verifiable, then guaranteed-safe, then structural
/// shape checks, then the Conditional default. Classification never invokes
/// a source's capture operation.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    critical_unsafe: Vec<TypePattern>,
    verifiable: Vec<TypePattern>,
    guaranteed_safe: Vec<TypePattern>,
}

impl ClassifierRules {
    pub fn new(
        critical_unsafe: Vec<TypePattern>,
        verifiable: Vec<TypePattern>,
        guaranteed_safe: Vec<TypePattern>,
    ) -> Self {
        Self {
            critical_unsafe,
            verifiable,
            guaranteed_safe,
        }
    }

    pub fn with_critical_pattern(mut self, pattern: TypePattern) -> Self {
        self.critical_unsafe.push(pattern);
        self
    }

    /// Classifies a qualified type name by pattern tables alone.
    pub fn classify(&self, type_name: &str) -> DeterminismClass {
        let lower = type_name.to_lowercase();
        if self.critical_match(&lower).is_some() {
            return DeterminismClass::Unsafe;
        }
        if self.verifiable.iter().any(|p| p.matches(&lower)) {
            return DeterminismClass::Verifiable;
        }
        if self.guaranteed_safe.iter().any(|p| p.matches(&lower)) {
            return DeterminismClass::Guaranteed;
        }
        DeterminismClass::Conditional
    }

    /// Classifies a full profile, analyzing declared member fields as well.
    ///
    /// Any critical field risk forces the aggregate class to Unsafe; any
    /// warning degrades it to at most Conditional.
    pub fn analyze(&self, profile: &TypeProfile) -> TypeAnalysis {
        let mut risks = Vec::new();
        let own_lower = profile.type_name.to_lowercase();

        let mut class = if let Some(pattern) = self.critical_match(&own_lower) {
            risks.push(Risk::critical(pattern.description.clone(), None));
            DeterminismClass::Unsafe
        } else if self.verifiable.iter().any(|p| p.matches(&own_lower)) {
            DeterminismClass::Verifiable
        } else if self.guaranteed_safe.iter().any(|p| p.matches(&own_lower)) {
            DeterminismClass::Guaranteed
        } else {
            match profile.shape {
                TypeShape::TaggedUnion | TypeShape::PureData => DeterminismClass::Guaranteed,
                TypeShape::Opaque => DeterminismClass::Conditional,
            }
        };

        for field in &profile.fields {
            let field_lower = field.type_name.to_lowercase();
            if let Some(pattern) = self.critical_match(&field_lower) {
                risks.push(Risk::critical(
                    pattern.description.clone(),
                    Some(&field.name),
                ));
            } else if self.verifiable.iter().any(|p| p.matches(&field_lower)) {
                risks.push(Risk::info(
                    "observable state holder; value checked at replay time",
                    Some(&field.name),
                ));
            } else if !self.guaranteed_safe.iter().any(|p| p.matches(&field_lower)) {
                risks.push(Risk::warning(
                    format!("unclassified field type {}", field.type_name),
                    Some(&field.name),
                ));
            }
        }

        if profile.shape == TypeShape::Opaque && class == DeterminismClass::Verifiable {
            // An opaque shape cannot be content-hashed, only name-hashed.
            risks.push(Risk::warning(
                "opaque shape is not content-addressable; verification may misreport divergence",
                None,
            ));
        }

        let worst = risks.iter().map(|r| r.severity).max();
        match worst {
            Some(RiskSeverity::Critical) => class = DeterminismClass::Unsafe,
            Some(RiskSeverity::Warning) => class = class.max(DeterminismClass::Conditional),
            _ => {}
        }

        let mut score: i32 = 100;
        for risk in &risks {
            score -= match risk.severity {
                RiskSeverity::Critical => 50,
                RiskSeverity::Warning => 20,
                RiskSeverity::Info => 5,
            };
        }

        TypeAnalysis {
            type_name: profile.type_name.clone(),
            class,
            score: score.clamp(0, 100) as u8,
            risks,
        }
    }

    fn critical_match(&self, type_name_lower: &str) -> Option<&TypePattern> {
        self.critical_unsafe
            .iter()
            .find(|p| p.matches(type_name_lower))
    }
}

impl Default for ClassifierRules {
    fn default() -> Self {
        let critical_unsafe = vec![
            TypePattern::new("tcpstream", "network I/O"),
            TypePattern::new("udpsocket", "network I/O"),
            TypePattern::new("socket", "network I/O"),
            TypePattern::new("http", "network I/O"),
            TypePattern::new("::net::", "network I/O"),
            TypePattern::new("systemtime", "system time access"),
            TypePattern::new("instant", "system time access"),
            TypePattern::new("clock", "system time access"),
            TypePattern::new("datetime", "system time access"),
            TypePattern::new("random", "random number generation"),
            TypePattern::new("::rng", "random number generation"),
            TypePattern::new("thread_rng", "random number generation"),
            TypePattern::new("::fs::", "file I/O"),
            TypePattern::new("file", "file I/O"),
            TypePattern::new("pathbuf", "file I/O"),
            TypePattern::new("database", "database access"),
            TypePattern::new("sqlite", "database access"),
            TypePattern::new("::sql", "database access"),
            TypePattern::new("preferences", "preference store access"),
            TypePattern::new("keyvaluestore", "preference store access"),
        ];
        let verifiable = vec![
            TypePattern::new("observable", "observable state holder"),
            TypePattern::new("watch::receiver", "observable state holder"),
            TypePattern::new("signal", "observable state holder"),
            TypePattern::new("publisher", "observable state holder"),
            TypePattern::new("stateholder", "observable state holder"),
        ];
        let guaranteed_safe = vec![
            TypePattern::new("::string", "immutable string"),
            TypePattern::new("&str", "immutable string"),
            TypePattern::new("i8", "primitive"),
            TypePattern::new("i16", "primitive"),
            TypePattern::new("i32", "primitive"),
            TypePattern::new("i64", "primitive"),
            TypePattern::new("u8", "primitive"),
            TypePattern::new("u16", "primitive"),
            TypePattern::new("u32", "primitive"),
            TypePattern::new("u64", "primitive"),
            TypePattern::new("f32", "primitive"),
            TypePattern::new("f64", "primitive"),
            TypePattern::new("bool", "primitive"),
            TypePattern::new("char", "primitive"),
            TypePattern::new("usize", "primitive"),
            TypePattern::new("vec<", "owned collection of values"),
            TypePattern::new("btreemap", "ordered collection of values"),
            TypePattern::new("btreeset", "ordered collection of values"),
            TypePattern::new("im::", "immutable collection"),
        ];
        Self::new(critical_unsafe, verifiable, guaranteed_safe)
    }
}
