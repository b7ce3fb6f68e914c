use serde::{Deserialize, Serialize};
use void_artifact_tar::LayerType;

use crate::metadata::Annotations;

// ---------------------------------------------------------------------------
// Media type constants
// ---------------------------------------------------------------------------

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Config blob media type for artifacts produced by this crate.
pub const MEDIA_TYPE_ARTIFACT_CONFIG: &str = "application/vnd.cncf.flux.config.v1+json";
/// Layer media type for gzip-compressed tarballs.
pub const MEDIA_TYPE_CONTENT_TARBALL: &str = "application/vnd.cncf.flux.content.v1.tar+gzip";
/// Layer media type for files shipped verbatim.
pub const MEDIA_TYPE_CONTENT_STATIC: &str = "application/octet-stream";

/// Annotation on index entries naming the tag a manifest was pushed under.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Layer media type to record for a given layer type.
pub fn layer_media_type(layer_type: LayerType) -> &'static str {
    match layer_type {
        LayerType::Tarball => MEDIA_TYPE_CONTENT_TARBALL,
        LayerType::Static => MEDIA_TYPE_CONTENT_STATIC,
    }
}

// ---------------------------------------------------------------------------
// OCI Image Manifest
// ---------------------------------------------------------------------------

/// An OCI image manifest carrying a single artifact layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl OciManifest {
    /// A schema 2 OCI manifest for one layer.
    pub fn new(config: Descriptor, layer: Descriptor, annotations: Annotations) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
            config,
            layers: vec![layer],
            annotations,
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A content-addressable descriptor used in manifests and the layout index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: String,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: Annotations::new(),
        }
    }

    /// Layer type declared by this descriptor's media type, if recognised.
    pub fn layer_type(&self) -> Option<LayerType> {
        match self.media_type.as_str() {
            MEDIA_TYPE_CONTENT_TARBALL => Some(LayerType::Tarball),
            MEDIA_TYPE_CONTENT_STATIC => Some(LayerType::Static),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Image Index
// ---------------------------------------------------------------------------

/// The `index.json` of an OCI image layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_INDEX.to_string(),
            manifests: Vec::new(),
        }
    }
}

impl ImageIndex {
    /// Descriptor of the manifest tagged `tag`.
    pub fn find_tag(&self, tag: &str) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| d.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) == Some(tag))
    }

    /// Point `tag` at `descriptor`, replacing any previous entry for the tag.
    pub fn set_tag(&mut self, tag: &str, mut descriptor: Descriptor) {
        self.manifests
            .retain(|d| d.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) != Some(tag));
        descriptor
            .annotations
            .insert(ANNOTATION_REF_NAME.to_string(), tag.to_string());
        self.manifests.push(descriptor);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
