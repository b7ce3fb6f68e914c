//! The registry seam: everything the client needs from an OCI registry.

use std::io::Read;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::manifest::{Descriptor, OciManifest};
use crate::metadata::Annotations;
use crate::reference::ArtifactRef;

/// A blob body. Reads happen on a blocking worker thread.
pub type BlobReader = Box<dyn Read + Send>;

/// A manifest together with the digest it was resolved to.
#[derive(Debug, Clone)]
pub struct PulledManifest {
    pub manifest: OciManifest,
    /// `sha256:<hex>` of the manifest bytes.
    pub digest: String,
}

/// A single artifact layer staged on local disk, ready to upload.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    pub path: PathBuf,
    pub media_type: String,
}

/// Storage backend for artifact manifests and blobs.
///
/// Implementations own addressing, authentication and integrity checks. The
/// client only sees manifests, descriptors and byte streams.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Resolve `reference` (tag or digest) to its manifest.
    async fn fetch_manifest(&self, reference: &ArtifactRef) -> Result<PulledManifest>;

    /// Open the blob described by `descriptor` for streaming.
    async fn open_blob(&self, reference: &ArtifactRef, descriptor: &Descriptor)
        -> Result<BlobReader>;

    /// Upload `layer` with an artifact config and a manifest carrying
    /// `annotations`, tag it as `reference` and return the manifest digest.
    async fn push(
        &self,
        reference: &ArtifactRef,
        layer: &LayerBlob,
        annotations: &Annotations,
    ) -> Result<String>;
}
