//! void-artifact: package files and directories as OCI artifacts
//!
//! An artifact is a single gzip tarball (or a single verbatim file) stored as
//! the only layer of an OCI manifest, with provenance recorded as manifest
//! annotations.
//!
//! # Key Features
//!
//! - **Reproducible builds**: identical trees produce identical archives
//! - **Gitignore-style filtering**: ordered, last-match-wins ignore rules
//! - **Safe extraction**: path-traversal guard, decompression budget and
//!   optional symlink skipping
//! - **Pluggable registries**: any [`RegistryTransport`], with a filesystem
//!   OCI layout store built in
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use void_artifact::{ArtifactClient, ClientConfig, Metadata, PullOptions, PushOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ArtifactClient::local(ClientConfig::default().apply_env()?);
//!
//!     let digest = client
//!         .push(
//!             "oci://localhost/org/manifests:v1",
//!             Path::new("./deploy"),
//!             PushOptions {
//!                 metadata: Metadata::new("https://github.com/org/repo", "main@sha1:abc"),
//!                 ignore_paths: vec!["*.md".into()],
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!     println!("pushed {}", digest);
//!
//!     let meta = client
//!         .pull("oci://localhost/org/manifests:v1", Path::new("/tmp/deploy"), PullOptions::default())
//!         .await?;
//!     println!("pulled {} from {}", meta.digest, meta.source);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod metadata;
pub mod reference;
pub mod transport;

/// Archive building and extraction.
pub use void_artifact_tar as archive;

pub use client::{ArtifactClient, PullOptions, PushOptions};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use layout::LayoutRegistry;
pub use metadata::{Annotations, Metadata};
pub use reference::ArtifactRef;
pub use transport::{BlobReader, LayerBlob, PulledManifest, RegistryTransport};
pub use void_artifact_tar::{CancelFlag, LayerType, SizeLimit};

/// Run blocking filesystem work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(task_error)?
}

pub(crate) fn task_error(e: tokio::task::JoinError) -> Error {
    Error::Task(format!("blocking task panicked: {}", e))
}
