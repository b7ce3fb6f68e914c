//! Filesystem registry following the OCI image layout.
//!
//! Each repository lives under `<root>/<registry>/<repository>/` with
//! content-addressed blobs in `blobs/sha256/<hex>` and tags recorded in
//! `index.json`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::{
    Descriptor, ImageIndex, OciManifest, MEDIA_TYPE_ARTIFACT_CONFIG, MEDIA_TYPE_OCI_MANIFEST,
};
use crate::metadata::Annotations;
use crate::reference::ArtifactRef;
use crate::run_blocking;
use crate::transport::{BlobReader, LayerBlob, PulledManifest, RegistryTransport};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";
/// Config blob stored with every artifact.
const EMPTY_CONFIG: &[u8] = b"{}";

/// Content-addressed artifact store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    root: PathBuf,
}

impl LayoutRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Layout directory for the repository named by `reference`.
    pub fn repository_dir(&self, reference: &ArtifactRef) -> PathBuf {
        self.root
            .join(&reference.registry)
            .join(&reference.repository)
    }

    /// Expected path of the blob `digest` within `reference`'s repository.
    pub fn blob_path(&self, reference: &ArtifactRef, digest: &str) -> Result<PathBuf> {
        let hex = blob_hex(digest)?;
        Ok(self.repository_dir(reference).join("blobs").join("sha256").join(hex))
    }

    /// Store `manifest` and tag it as `reference` when the reference is a
    /// tag. Returns the manifest digest.
    pub async fn put_manifest(&self, reference: &ArtifactRef, manifest: &OciManifest) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        let repo = self.repository_dir(reference);
        let reference = reference.clone();
        run_blocking(move || {
            let descriptor = write_blob(&repo, &mut &bytes[..], MEDIA_TYPE_OCI_MANIFEST)?;
            if !reference.is_digest() {
                tag_manifest(&repo, &reference.reference, descriptor.clone())?;
            }
            debug!(digest = %descriptor.digest, "stored manifest");
            Ok(descriptor.digest)
        })
        .await
    }

    async fn resolve(&self, reference: &ArtifactRef) -> Result<String> {
        if reference.is_digest() {
            return Ok(reference.reference.clone());
        }
        let index_path = self.repository_dir(reference).join(INDEX_FILE);
        let data = match tokio::fs::read(&index_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound(reference.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let index: ImageIndex = serde_json::from_slice(&data)?;
        index
            .find_tag(&reference.reference)
            .map(|d| d.digest.clone())
            .ok_or_else(|| Error::ManifestNotFound(reference.to_string()))
    }
}

#[async_trait]
impl RegistryTransport for LayoutRegistry {
    async fn fetch_manifest(&self, reference: &ArtifactRef) -> Result<PulledManifest> {
        let digest = self.resolve(reference).await?;
        let path = self.blob_path(reference, &digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound(reference.with_digest(&digest)))
            }
            Err(e) => return Err(e.into()),
        };

        let actual = sha256_digest(&data);
        if actual != digest {
            return Err(Error::DigestMismatch {
                expected: digest,
                actual,
            });
        }
        let manifest: OciManifest = serde_json::from_slice(&data)?;
        debug!(reference = %reference, digest = %digest, layers = manifest.layers.len(), "resolved manifest");
        Ok(PulledManifest { manifest, digest })
    }

    async fn open_blob(
        &self,
        reference: &ArtifactRef,
        descriptor: &Descriptor,
    ) -> Result<BlobReader> {
        let path = self.blob_path(reference, &descriptor.digest)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::BlobNotFound(reference.with_digest(&descriptor.digest)))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Box::new(VerifyingReader::new(
            BufReader::new(file),
            descriptor.digest.clone(),
            descriptor.size,
        )))
    }

    async fn push(
        &self,
        reference: &ArtifactRef,
        layer: &LayerBlob,
        annotations: &Annotations,
    ) -> Result<String> {
        let repo = self.repository_dir(reference);
        let layer = layer.clone();
        let (config, layer_desc) = run_blocking(move || {
            let config = write_blob(&repo, &mut &EMPTY_CONFIG[..], MEDIA_TYPE_ARTIFACT_CONFIG)?;
            let mut src = BufReader::new(File::open(&layer.path)?);
            let layer_desc = write_blob(&repo, &mut src, &layer.media_type)?;
            Ok((config, layer_desc))
        })
        .await?;

        let layer_digest = layer_desc.digest.clone();
        let layer_size = layer_desc.size;
        let manifest = OciManifest::new(config, layer_desc, annotations.clone());
        let digest = self.put_manifest(reference, &manifest).await?;
        info!(
            reference = %reference,
            digest = %digest,
            layer = %layer_digest,
            size = layer_size,
            "artifact stored"
        );
        Ok(digest)
    }
}

// ---------------------------------------------------------------------------
// Blob storage
// ---------------------------------------------------------------------------

/// Hex part of a `sha256:<hex>` digest. Anything else cannot name a blob in
/// this layout.
fn blob_hex(digest: &str) -> Result<&str> {
    match digest.strip_prefix("sha256:") {
        Some(hex)
            if hex.len() == 64
                && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) =>
        {
            Ok(hex)
        }
        _ => Err(Error::Transport(format!("unsupported digest {:?}", digest))),
    }
}

fn ensure_layout(repo: &Path) -> Result<PathBuf> {
    let blobs = repo.join("blobs").join("sha256");
    fs::create_dir_all(&blobs)?;
    let marker = repo.join(OCI_LAYOUT_FILE);
    if !marker.exists() {
        fs::write(&marker, OCI_LAYOUT_CONTENT)?;
    }
    Ok(blobs)
}

/// Stream `src` into the blob store, hashing as it goes.
fn write_blob(repo: &Path, src: &mut dyn Read, media_type: &str) -> Result<Descriptor> {
    let blobs = ensure_layout(repo)?;
    let tmp = tempfile::Builder::new()
        .prefix(".blob-")
        .tempfile_in(&blobs)?;

    let mut writer = HashingWriter::new(tmp.as_file());
    let size = io::copy(src, &mut writer)?;
    writer.flush()?;
    let digest = writer.digest();
    tmp.as_file().sync_all()?;

    let path = blobs.join(blob_hex(&digest)?);
    tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
    debug!(digest = %digest, size, "stored blob");
    Ok(Descriptor::new(media_type, digest, size))
}

/// Record `tag` in the repository index, replacing the file atomically.
fn tag_manifest(repo: &Path, tag: &str, descriptor: Descriptor) -> Result<()> {
    let index_path = repo.join(INDEX_FILE);
    let mut index: ImageIndex = match fs::read(&index_path) {
        Ok(data) => serde_json::from_slice(&data)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => ImageIndex::default(),
        Err(e) => return Err(e.into()),
    };
    index.set_tag(tag, descriptor);

    let mut tmp = tempfile::Builder::new().prefix(".index-").tempfile_in(repo)?;
    serde_json::to_writer_pretty(&mut tmp, &index)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&index_path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex_encode(&Sha256::digest(data)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn digest(self) -> String {
        format!("sha256:{}", hex_encode(&self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Checks size and digest of a blob as it is read. The mismatch surfaces as
/// an `InvalidData` error at end of stream.
struct VerifyingReader<R> {
    inner: R,
    hasher: Sha256,
    expected: String,
    expected_size: u64,
    read: u64,
    verified: bool,
}

impl<R: Read> VerifyingReader<R> {
    fn new(inner: R, expected: String, expected_size: u64) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            expected_size,
            read: 0,
            verified: false,
        }
    }

    fn verify(&mut self) -> io::Result<()> {
        let actual = format!(
            "sha256:{}",
            hex_encode(&std::mem::take(&mut self.hasher).finalize())
        );
        self.verified = true;
        if self.read != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "blob {} is {} bytes, expected {}",
                    self.expected, self.read, self.expected_size
                ),
            ));
        }
        if actual != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("digest mismatch: expected {}, got {}", self.expected, actual),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() && !self.verified {
                self.verify()?;
            }
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
