//! Per-class decision thresholds.
//!
//! The threshold artifact is a JSON object mapping each of the fourteen class names
//! to a cutoff in `[0, 1]`:
//!
//! ```json
//! { "Atelectasis": 0.42, "Cardiomegaly": 0.31, "...": 0.5 }
//! ```
//!
//! A versioned wrapper is also accepted:
//!
//! ```json
//! { "version": "2024-06-tuned", "thresholds": { "Atelectasis": 0.42, "...": 0.5 } }
//! ```
//!
//! Loading fails with a configuration error unless every class has exactly one finite
//! cutoff in range, so a [`ThresholdTable`] in hand is always complete.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use std::fmt;
use std::path::Path;

use crate::core::constants::NUM_CLASSES;
use crate::core::errors::AnalysisError;
use crate::domain::pathology::PathologyClass;

#[derive(Deserialize)]
#[serde(untagged)]
enum ThresholdArtifact {
    Versioned {
        version: String,
        thresholds: ThresholdEntries,
    },
    Flat(ThresholdEntries),
}

/// Object entries in document order, repeated keys included.
struct ThresholdEntries(Vec<(String, f64)>);

impl<'de> Deserialize<'de> for ThresholdEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ThresholdEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping class names to cutoffs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(NUM_CLASSES));
                while let Some(entry) = map.next_entry::<String, f64>()? {
                    entries.push(entry);
                }
                Ok(ThresholdEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl ThresholdEntries {
    fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// Immutable cutoff table indexed by [`PathologyClass`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    cutoffs: [f32; NUM_CLASSES],
    version: Option<String>,
}

impl ThresholdTable {
    /// Builds a table from cutoffs in class order.
    pub fn new(cutoffs: [f32; NUM_CLASSES]) -> Result<Self, AnalysisError> {
        for (class, cutoff) in PathologyClass::ALL.iter().zip(cutoffs) {
            if !cutoff.is_finite() || !(0.0..=1.0).contains(&cutoff) {
                return Err(AnalysisError::config_error_with_context(
                    class.name(),
                    &cutoff.to_string(),
                    "threshold must be a finite value in [0, 1]",
                ));
            }
        }
        Ok(Self {
            cutoffs,
            version: None,
        })
    }

    /// Same cutoff for every class.
    pub fn uniform(cutoff: f32) -> Result<Self, AnalysisError> {
        Self::new([cutoff; NUM_CLASSES])
    }

    /// Tags the table with an artifact version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Builds a table from `(name, cutoff)` entries, requiring every class exactly once.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Self, AnalysisError> {
        let mut cutoffs: [Option<f32>; NUM_CLASSES] = [None; NUM_CLASSES];

        for (name, value) in entries {
            let class: PathologyClass = name.parse()?;
            let slot = &mut cutoffs[class.index()];
            if slot.is_some() {
                return Err(AnalysisError::config_error(format!(
                    "duplicate threshold for {} (key '{}')",
                    class.name(),
                    name
                )));
            }
            *slot = Some(value as f32);
        }

        let missing: Vec<&str> = PathologyClass::ALL
            .iter()
            .filter(|class| cutoffs[class.index()].is_none())
            .map(|class| class.name())
            .collect();
        if !missing.is_empty() {
            return Err(AnalysisError::config_error(format!(
                "threshold table is missing {} class(es): {}",
                missing.len(),
                missing.join(", ")
            )));
        }

        Self::new(cutoffs.map(|c| c.unwrap_or_default()))
    }

    /// Parses a threshold artifact from JSON text.
    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        let artifact: ThresholdArtifact = serde_json::from_str(text).map_err(|e| {
            AnalysisError::config_error_with_source("threshold artifact is not valid JSON", e)
        })?;

        match artifact {
            ThresholdArtifact::Versioned {
                version,
                thresholds,
            } => Ok(Self::from_entries(thresholds.iter())?.with_version(version)),
            ThresholdArtifact::Flat(thresholds) => Self::from_entries(thresholds.iter()),
        }
    }

    /// Loads a threshold artifact from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::config_error_with_source(
                format!("cannot read threshold artifact '{}'", path.display()),
                e,
            )
        })?;
        let table = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            version = table.version.as_deref().unwrap_or("unversioned"),
            "loaded {} class thresholds",
            NUM_CLASSES
        );
        Ok(table)
    }

    /// Cutoff for one class.
    pub fn get(&self, class: PathologyClass) -> f32 {
        self.cutoffs[class.index()]
    }

    /// Cutoffs in class order.
    pub fn as_slice(&self) -> &[f32] {
        &self.cutoffs
    }

    /// Artifact version, if the artifact carried one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl Serialize for ThresholdTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for class in PathologyClass::ALL {
            map.serialize_entry(class.name(), &self.get(class))?;
        }
        map.end()
    }
}
