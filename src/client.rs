use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use void_artifact_tar::{
    detect_layer_type, extract, looks_like_gzip, BuildSummary, Builder, CancelFlag,
    ExtractOptions, LayerType, PeekReader, SizeLimit, TarError,
};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::layout::LayoutRegistry;
use crate::manifest::layer_media_type;
use crate::metadata::{Annotations, Metadata};
use crate::reference::ArtifactRef;
use crate::{run_blocking, task_error};
use crate::transport::{LayerBlob, RegistryTransport};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call settings for [`ArtifactClient::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Layer type to publish. When unset, directories and plain files are
    /// packaged as tarballs and gzip files are uploaded unchanged.
    pub layer_type: Option<LayerType>,
    /// Recorded as manifest annotations. An empty `created` is stamped with
    /// the current time.
    pub metadata: Metadata,
    /// Gitignore-style rules applied when packaging a directory.
    pub ignore_paths: Vec<String>,
    pub cancel: CancelFlag,
}

/// Per-call settings for [`ArtifactClient::pull`]. Unset fields fall back to
/// the client's [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Layer type of the artifact. When unset, it is sniffed from the blob.
    pub layer_type: Option<LayerType>,
    pub max_size: Option<SizeLimit>,
    pub skip_symlinks: Option<bool>,
    pub cancel: CancelFlag,
}

// ---------------------------------------------------------------------------
// ArtifactClient
// ---------------------------------------------------------------------------

/// Pushes local files and directories as single-layer OCI artifacts and
/// pulls them back.
///
/// The client holds no per-call state, so concurrent calls for different
/// references and destinations are independent.
#[derive(Clone)]
pub struct ArtifactClient {
    transport: Arc<dyn RegistryTransport>,
    config: ClientConfig,
}

impl ArtifactClient {
    pub fn new(transport: Arc<dyn RegistryTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// A client backed by the OCI layout store at `config.layout_root`.
    pub fn local(config: ClientConfig) -> Self {
        let registry = LayoutRegistry::new(config.layout_root.clone());
        Self::new(Arc::new(registry), config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Package `source` into the gzip tarball `dest`.
    pub async fn build(
        &self,
        dest: &Path,
        source: &Path,
        ignore_paths: &[String],
        cancel: CancelFlag,
    ) -> Result<BuildSummary> {
        let builder = Builder::new()
            .ignore_patterns(ignore_paths)?
            .cancel_flag(cancel.clone());
        let dest = dest.to_path_buf();
        let source = source.to_path_buf();
        let worker =
            spawn_blocking(move || -> Result<BuildSummary> { Ok(builder.build(&dest, &source)?) });
        join_worker(self.deadline(), &cancel, worker).await
    }

    /// Publish `source` as `url` and return the canonical
    /// `registry/repository@sha256:<hex>` reference of the pushed manifest.
    pub async fn push(&self, url: &str, source: &Path, opts: PushOptions) -> Result<String> {
        let reference = ArtifactRef::parse(url)?;
        let deadline = self.deadline();
        let cancel = opts.cancel.clone();

        let plan = within(deadline, &cancel, plan_layer(source, &opts)).await?;

        // Keeps the staged archive alive until the upload finishes.
        let mut _staging = None;
        let layer_path = if plan.needs_build {
            let dir = tempfile::Builder::new().prefix("void-artifact-").tempdir()?;
            let archive = dir.path().join("artifact.tgz");
            let builder = Builder::new()
                .ignore_patterns(&opts.ignore_paths)?
                .cancel_flag(cancel.clone());
            let (src, dst) = (source.to_path_buf(), archive.clone());
            let worker =
                spawn_blocking(move || -> Result<BuildSummary> { Ok(builder.build(&dst, &src)?) });
            let summary = join_worker(deadline, &cancel, worker).await?;
            debug!(entries = summary.entries, size = summary.archive_size, "staged archive");
            _staging = Some(dir);
            archive
        } else {
            source.to_path_buf()
        };
        cancel.check()?;

        let layer = LayerBlob {
            path: layer_path,
            media_type: layer_media_type(plan.layer_type).to_string(),
        };
        info!(reference = %reference, layer_type = %plan.layer_type, "pushing artifact");
        let digest = within(
            deadline,
            &cancel,
            self.transport.push(&reference, &layer, &plan.annotations),
        )
        .await?;

        let digest_ref = reference.with_digest(&digest);
        info!(reference = %reference, digest = %digest_ref, "artifact pushed");
        Ok(digest_ref)
    }

    /// Fetch `url` and materialize its layer at `dest`. Returns the artifact
    /// metadata with `url` and `digest` filled in.
    pub async fn pull(&self, url: &str, dest: &Path, opts: PullOptions) -> Result<Metadata> {
        let reference = ArtifactRef::parse(url)?;
        let deadline = self.deadline();
        let cancel = opts.cancel.clone();

        let (metadata, worker) =
            within(deadline, &cancel, self.start_pull(url, &reference, dest, opts)).await?;
        let layer_type = join_worker(deadline, &cancel, worker).await?;

        info!(
            reference = %reference,
            digest = %metadata.digest,
            layer_type = %layer_type,
            "artifact pulled"
        );
        Ok(metadata)
    }

    /// Resolve the manifest and open the layer, then hand extraction to the
    /// blocking pool.
    async fn start_pull(
        &self,
        url: &str,
        reference: &ArtifactRef,
        dest: &Path,
        opts: PullOptions,
    ) -> Result<(Metadata, JoinHandle<Result<LayerType>>)> {
        info!(reference = %reference, dest = %dest.display(), "pulling artifact");
        let pulled = self.transport.fetch_manifest(reference).await?;
        let layer = match pulled.manifest.layers.as_slice() {
            [] => return Err(Error::NoLayers(url.to_string())),
            [layer] => layer,
            [layer, rest @ ..] => {
                warn!(
                    reference = %reference,
                    ignored = rest.len(),
                    "artifact has more than one layer, using the first"
                );
                layer
            }
        };

        let mut metadata = Metadata::from_annotations(&pulled.manifest.annotations);
        metadata.url = url.to_string();
        metadata.digest = reference.with_digest(&pulled.digest);

        let blob = self.transport.open_blob(reference, layer).await?;
        let extract_opts = ExtractOptions::default()
            .max_size(
                opts.max_size
                    .unwrap_or_else(|| SizeLimit::from(self.config.max_untar_size)),
            )
            .skip_symlinks(opts.skip_symlinks.unwrap_or(self.config.skip_symlinks))
            .cancel_flag(opts.cancel.clone());
        let requested = opts.layer_type;
        let advertised = layer.layer_type();
        let dest: PathBuf = dest.to_path_buf();

        let worker = spawn_blocking(move || -> Result<LayerType> {
            let mut reader = PeekReader::new(blob);
            let layer_type = match requested {
                Some(layer_type) => layer_type,
                None => detect_layer_type(&mut reader)?,
            };
            if advertised.is_some_and(|advertised| advertised != layer_type) {
                warn!(
                    media_type = ?advertised,
                    layer_type = %layer_type,
                    "layer content does not match its media type"
                );
            }
            extract(&dest, reader, layer_type, &extract_opts)?;
            Ok(layer_type)
        });
        Ok((metadata, worker))
    }

    fn deadline(&self) -> Option<Deadline> {
        self.config.timeout().map(|limit| Deadline {
            limit,
            at: Instant::now() + limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Absolute expiry shared by every step of one client call.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    limit: Duration,
    at: Instant,
}

impl Deadline {
    fn expire(&self, cancel: &CancelFlag) -> Error {
        cancel.cancel();
        warn!(timeout = ?self.limit, "operation timed out");
        Error::Timeout(self.limit)
    }
}

/// Await an async step, failing with [`Error::Timeout`] once `deadline`
/// passes. Async steps own no output, so they are simply dropped.
async fn within<T, F>(deadline: Option<Deadline>, cancel: &CancelFlag, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };
    match tokio::time::timeout_at(deadline.at, fut).await {
        Ok(result) => result,
        Err(_) => Err(deadline.expire(cancel)),
    }
}

/// Await a blocking worker. On expiry the cancel flag is raised and the
/// worker is still joined, so it cannot publish output after the caller has
/// seen the timeout. A worker that finished before noticing the flag keeps
/// its result.
async fn join_worker<T>(
    deadline: Option<Deadline>,
    cancel: &CancelFlag,
    mut worker: JoinHandle<Result<T>>,
) -> Result<T> {
    let Some(deadline) = deadline else {
        return worker.await.map_err(task_error)?;
    };
    match tokio::time::timeout_at(deadline.at, &mut worker).await {
        Ok(joined) => joined.map_err(task_error)?,
        Err(_) => {
            let err = deadline.expire(cancel);
            match worker.await.map_err(task_error)? {
                Ok(value) => Ok(value),
                Err(e) => {
                    debug!(error = %e, "worker stopped after timeout");
                    Err(err)
                }
            }
        }
    }
}

/// Resolved push inputs.
struct LayerPlan {
    layer_type: LayerType,
    annotations: Annotations,
    /// `source` has to be packaged before upload.
    needs_build: bool,
}

async fn plan_layer(source: &Path, opts: &PushOptions) -> Result<LayerPlan> {
    let meta = match tokio::fs::metadata(source).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TarError::NotFound(source.to_path_buf()).into())
        }
        Err(e) => return Err(e.into()),
    };
    let layer_type = opts.layer_type.unwrap_or(LayerType::Tarball);
    if meta.is_dir() && layer_type == LayerType::Static {
        return Err(Error::InvalidSource(format!(
            "{} is a directory and cannot be pushed as a static layer",
            source.display()
        )));
    }

    let mut metadata = opts.metadata.clone();
    if metadata.created.is_empty() {
        metadata = metadata.created_now();
    }

    let prebuilt =
        layer_type == LayerType::Tarball && meta.is_file() && is_prebuilt_archive(source).await?;
    if prebuilt {
        debug!(source = %source.display(), "uploading prebuilt archive");
    }
    let needs_build = layer_type == LayerType::Tarball && !prebuilt;

    Ok(LayerPlan {
        layer_type,
        annotations: metadata.to_annotations(),
        needs_build,
    })
}

/// A regular file that already holds gzip data is uploaded as-is.
async fn is_prebuilt_archive(path: &Path) -> Result<bool> {
    let path = path.to_path_buf();
    run_blocking(move || {
        let mut reader = PeekReader::new(BufReader::new(File::open(&path)?));
        Ok(looks_like_gzip(&mut reader)?)
    })
    .await
}
