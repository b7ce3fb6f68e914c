//! Artifact metadata carried as OCI manifest annotations.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Creation timestamp (RFC 3339).
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
/// Source the artifact was built from, e.g. a repository URL.
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
/// Revision of the source, e.g. a commit or tag.
pub const ANNOTATION_REVISION: &str = "org.opencontainers.image.revision";

/// Manifest annotations, ordered for stable serialization.
pub type Annotations = BTreeMap<String, String>;

/// Metadata attached to an artifact on push and recovered on pull.
///
/// Only `created`, `source` and `revision` travel as annotations. `url` and
/// `digest` are filled in by the client after a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl Metadata {
    pub fn new(source: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            revision: revision.into(),
            ..Default::default()
        }
    }

    /// Stamp `created` with the current UTC time at second precision.
    pub fn created_now(mut self) -> Self {
        self.created = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
        self
    }

    fn annotated_fields(&self) -> [(&'static str, &String); 3] {
        [
            (ANNOTATION_CREATED, &self.created),
            (ANNOTATION_SOURCE, &self.source),
            (ANNOTATION_REVISION, &self.revision),
        ]
    }

    fn annotated_fields_mut(&mut self) -> [(&'static str, &mut String); 3] {
        [
            (ANNOTATION_CREATED, &mut self.created),
            (ANNOTATION_SOURCE, &mut self.source),
            (ANNOTATION_REVISION, &mut self.revision),
        ]
    }

    /// Encode the annotated fields. Empty fields are omitted.
    pub fn to_annotations(&self) -> Annotations {
        self.annotated_fields()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    /// Decode metadata from manifest annotations. Unknown keys are ignored
    /// and missing keys leave the field empty.
    pub fn from_annotations(annotations: &Annotations) -> Self {
        let mut meta = Self::default();
        for (key, slot) in meta.annotated_fields_mut() {
            if let Some(value) = annotations.get(key) {
                *slot = value.clone();
            }
        }
        meta
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
