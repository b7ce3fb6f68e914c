//! Push/pull round trips against the filesystem OCI layout store.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use void_artifact::manifest::{
    Descriptor, OciManifest, MEDIA_TYPE_ARTIFACT_CONFIG, MEDIA_TYPE_CONTENT_STATIC,
    MEDIA_TYPE_CONTENT_TARBALL,
};
use void_artifact::transport::{BlobReader, LayerBlob, PulledManifest, RegistryTransport};
use void_artifact::{
    Annotations, ArtifactClient, ArtifactRef, CancelFlag, ClientConfig, Error, LayerType,
    LayoutRegistry, Metadata, PullOptions, PushOptions, SizeLimit,
};

const URL: &str = "oci://localhost:5000/org/manifests:v1";

fn config(root: &Path) -> ClientConfig {
    ClientConfig {
        layout_root: root.join("oci"),
        ..Default::default()
    }
}

fn client(root: &Path) -> ArtifactClient {
    ArtifactClient::local(config(root))
}

fn push_opts(ignore: &[&str]) -> PushOptions {
    PushOptions {
        metadata: Metadata::new("https://github.com/stefanprodan/podinfo", "6.5.0@sha1:b3b00fe"),
        ignore_paths: ignore.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tarball layers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pull_reproduces_pushed_tree() {
    common::init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());

    let digest = client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();
    assert!(digest.starts_with("localhost:5000/org/manifests@sha256:"));

    let dest = tmp.path().join("out");
    let meta = client.pull(URL, &dest, PullOptions::default()).await.unwrap();

    assert_eq!(
        common::tree_entries(&dest),
        vec![
            "deploy",
            "deploy/repo.yaml",
            "deployment.yaml",
            "ignore-dir",
            "ignore-dir/deployment.yaml",
            "ignore.txt",
            "somedir",
            "somedir/git",
            "somedir/git/repo.yaml",
            "somedir/repo.yaml",
        ]
    );
    for file in ["deployment.yaml", "deploy/repo.yaml", "somedir/git/repo.yaml"] {
        assert_eq!(
            fs::read(dest.join(file)).unwrap(),
            fs::read(common::fixture().join(file)).unwrap(),
            "{file}"
        );
    }

    assert_eq!(meta.source, "https://github.com/stefanprodan/podinfo");
    assert_eq!(meta.revision, "6.5.0@sha1:b3b00fe");
    assert!(!meta.created.is_empty());
    assert_eq!(meta.url, URL);
    assert_eq!(meta.digest, digest);
}

#[tokio::test]
async fn ignored_entries_are_absent_after_pull() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&["ignore.txt", "ignore-dir/"]))
        .await
        .unwrap();

    let dest = tmp.path().join("out");
    client.pull(URL, &dest, PullOptions::default()).await.unwrap();

    let entries = common::tree_entries(&dest);
    assert!(!entries.iter().any(|e| e == "ignore.txt"));
    assert!(!entries.iter().any(|e| e.starts_with("ignore-dir")));
    for expected in ["deploy/repo.yaml", "deployment.yaml", "somedir/git/repo.yaml"] {
        assert!(entries.iter().any(|e| e == expected), "missing {expected}");
    }
}

#[tokio::test]
async fn single_file_defaults_to_tarball() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    let source = common::fixture().join("deployment.yaml");
    client
        .push(URL, &source, push_opts(&["*.yaml"]))
        .await
        .unwrap();

    let dest = tmp.path().join("out");
    client.pull(URL, &dest, PullOptions::default()).await.unwrap();
    assert_eq!(common::tree_entries(&dest), vec!["deployment.yaml"]);
    assert_eq!(fs::read(dest.join("deployment.yaml")).unwrap(), fs::read(&source).unwrap());
}

#[tokio::test]
async fn prebuilt_archive_is_uploaded_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    let archive = tmp.path().join("prebuilt.tgz");
    let summary = client
        .build(&archive, &common::fixture(), &[], CancelFlag::new())
        .await
        .unwrap();

    client.push(URL, &archive, push_opts(&[])).await.unwrap();

    let registry = LayoutRegistry::new(tmp.path().join("oci"));
    let reference = ArtifactRef::parse(URL).unwrap();
    let pulled = registry.fetch_manifest(&reference).await.unwrap();
    let layer = &pulled.manifest.layers[0];
    assert_eq!(layer.media_type, MEDIA_TYPE_CONTENT_TARBALL);
    assert_eq!(layer.size, summary.archive_size);

    let dest = tmp.path().join("out");
    client.pull(URL, &dest, PullOptions::default()).await.unwrap();
    assert!(dest.join("somedir/git/repo.yaml").is_file());
}

// ---------------------------------------------------------------------------
// Static layers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn static_layer_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    let source = common::fixture().join("deploy/repo.yaml");

    client
        .push(
            URL,
            &source,
            PushOptions {
                layer_type: Some(LayerType::Static),
                ..push_opts(&[])
            },
        )
        .await
        .unwrap();

    // No declared layer type: the payload is sniffed as static.
    let dest = tmp.path().join("out").join("repo.yaml");
    client.pull(URL, &dest, PullOptions::default()).await.unwrap();
    assert_eq!(fs::read(&dest).unwrap(), fs::read(&source).unwrap());
}

#[tokio::test]
async fn static_push_of_directory_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let err = client(tmp.path())
        .push(
            URL,
            &common::fixture(),
            PushOptions {
                layer_type: Some(LayerType::Static),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSource(_)), "{err}");
}

// ---------------------------------------------------------------------------
// Metadata and manifest shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_created_is_preserved() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    let mut opts = push_opts(&[]);
    opts.metadata.created = "2023-11-14T21:42:50Z".to_string();
    client.push(URL, &common::fixture(), opts).await.unwrap();

    let meta = client
        .pull(URL, &tmp.path().join("out"), PullOptions::default())
        .await
        .unwrap();
    assert_eq!(meta.created, "2023-11-14T21:42:50Z");
}

#[tokio::test]
async fn manifest_without_annotations_yields_empty_metadata() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let registry = LayoutRegistry::new(tmp.path().join("oci"));
    let tagged = ArtifactRef::parse(URL).unwrap();
    let mut manifest = registry.fetch_manifest(&tagged).await.unwrap().manifest;
    manifest.annotations = Annotations::new();
    let bare = ArtifactRef::parse("localhost:5000/org/manifests:bare").unwrap();
    registry.put_manifest(&bare, &manifest).await.unwrap();

    let meta = client
        .pull("localhost:5000/org/manifests:bare", &tmp.path().join("out"), PullOptions::default())
        .await
        .unwrap();
    assert!(meta.created.is_empty());
    assert!(meta.source.is_empty());
    assert!(meta.revision.is_empty());
    assert_eq!(meta.url, "localhost:5000/org/manifests:bare");
    assert!(meta.digest.starts_with("localhost:5000/org/manifests@sha256:"));
}

#[tokio::test]
async fn manifest_without_layers_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let registry = LayoutRegistry::new(tmp.path().join("oci"));
    let tagged = ArtifactRef::parse(URL).unwrap();
    let mut manifest = registry.fetch_manifest(&tagged).await.unwrap().manifest;
    manifest.layers.clear();
    let empty = ArtifactRef::parse("localhost:5000/org/manifests:empty").unwrap();
    registry.put_manifest(&empty, &manifest).await.unwrap();

    let dest = tmp.path().join("out");
    let err = client
        .pull("localhost:5000/org/manifests:empty", &dest, PullOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoLayers(_)), "{err}");
    assert!(!dest.exists());
}

#[tokio::test]
async fn only_first_layer_is_used() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let registry = LayoutRegistry::new(tmp.path().join("oci"));
    let tagged = ArtifactRef::parse(URL).unwrap();
    let mut manifest: OciManifest = registry.fetch_manifest(&tagged).await.unwrap().manifest;
    manifest.layers.push(Descriptor::new(
        MEDIA_TYPE_CONTENT_TARBALL,
        format!("sha256:{}", "0".repeat(64)),
        1,
    ));
    let multi = ArtifactRef::parse("localhost:5000/org/manifests:multi").unwrap();
    registry.put_manifest(&multi, &manifest).await.unwrap();

    let dest = tmp.path().join("out");
    client
        .pull("localhost:5000/org/manifests:multi", &dest, PullOptions::default())
        .await
        .unwrap();
    assert!(dest.join("deployment.yaml").is_file());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_reference_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    for url in ["oci://", "oci://localhost/Bad Repo:v1"] {
        let err = client
            .pull(url, &tmp.path().join("out"), PullOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference { .. }), "{url}: {err}");
    }
}

#[tokio::test]
async fn unknown_tag_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let err = client(tmp.path())
        .pull(URL, &tmp.path().join("out"), PullOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound(_)), "{err}");
}

#[tokio::test]
async fn push_missing_source_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let err = client(tmp.path())
        .push(URL, &tmp.path().join("missing"), push_opts(&[]))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[tokio::test]
async fn size_limit_leaves_no_output() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let dest = tmp.path().join("out");
    let err = client
        .pull(
            URL,
            &dest,
            PullOptions {
                max_size: Some(SizeLimit::Bytes(64)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_size_limit_exceeded(), "{err}");
    assert!(!dest.exists());
}

#[tokio::test]
async fn configured_size_limit_applies() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ArtifactClient::local(ClientConfig {
        max_untar_size: Some(64),
        ..config(tmp.path())
    });
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let err = client
        .pull(URL, &tmp.path().join("out"), PullOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_size_limit_exceeded(), "{err}");
}

#[tokio::test]
async fn cancelled_pull_leaves_no_output() {
    let tmp = tempfile::tempdir().unwrap();
    let client = client(tmp.path());
    client
        .push(URL, &common::fixture(), push_opts(&[]))
        .await
        .unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let dest = tmp.path().join("out");
    let err = client
        .pull(
            URL,
            &dest,
            PullOptions {
                cancel,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(!dest.exists());
}

// ---------------------------------------------------------------------------
// Custom transports
// ---------------------------------------------------------------------------

/// A registry that never answers.
struct StalledRegistry;

#[async_trait]
impl RegistryTransport for StalledRegistry {
    async fn fetch_manifest(&self, _: &ArtifactRef) -> void_artifact::Result<PulledManifest> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(Error::Transport("unreachable".into()))
    }

    async fn open_blob(&self, _: &ArtifactRef, _: &Descriptor) -> void_artifact::Result<BlobReader> {
        Err(Error::Transport("unreachable".into()))
    }

    async fn push(
        &self,
        _: &ArtifactRef,
        _: &LayerBlob,
        _: &Annotations,
    ) -> void_artifact::Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(Error::Transport("unreachable".into()))
    }
}

#[tokio::test]
async fn deadline_cancels_pull() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ArtifactClient::new(
        Arc::new(StalledRegistry),
        ClientConfig {
            timeout_secs: Some(1),
            ..config(tmp.path())
        },
    );

    let cancel = CancelFlag::new();
    let err = client
        .pull(
            URL,
            &tmp.path().join("out"),
            PullOptions {
                cancel: cancel.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(cancel.is_cancelled());
}

/// Serves a single-layer manifest whose blob stalls on its first read and
/// then delivers the whole payload.
struct SlowBlobRegistry {
    media_type: &'static str,
    payload: Vec<u8>,
}

struct StallThenFinish {
    data: std::io::Cursor<Vec<u8>>,
    stalled: bool,
}

impl std::io::Read for StallThenFinish {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.stalled {
            self.stalled = true;
            std::thread::sleep(Duration::from_secs(2));
        }
        std::io::Read::read(&mut self.data, buf)
    }
}

#[async_trait]
impl RegistryTransport for SlowBlobRegistry {
    async fn fetch_manifest(&self, _: &ArtifactRef) -> void_artifact::Result<PulledManifest> {
        let digest = format!("sha256:{}", "1".repeat(64));
        let layer = Descriptor::new(self.media_type, digest.clone(), self.payload.len() as u64);
        let config = Descriptor::new(MEDIA_TYPE_ARTIFACT_CONFIG, digest.clone(), 2);
        Ok(PulledManifest {
            manifest: OciManifest::new(config, layer, Annotations::new()),
            digest,
        })
    }

    async fn open_blob(&self, _: &ArtifactRef, _: &Descriptor) -> void_artifact::Result<BlobReader> {
        Ok(Box::new(StallThenFinish {
            data: std::io::Cursor::new(self.payload.clone()),
            stalled: false,
        }))
    }

    async fn push(
        &self,
        _: &ArtifactRef,
        _: &LayerBlob,
        _: &Annotations,
    ) -> void_artifact::Result<String> {
        Err(Error::Transport("read only".into()))
    }
}

fn tarball_payload() -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        let data = b"kind: Deployment\n";
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        builder
            .append_data(&mut header, "deployment.yaml", &data[..])
            .unwrap();
        builder.finish().unwrap();
    }
    encoder.finish().unwrap()
}

async fn pull_past_deadline(media_type: &'static str, payload: Vec<u8>) {
    let tmp = tempfile::tempdir().unwrap();
    let client = ArtifactClient::new(
        Arc::new(SlowBlobRegistry {
            media_type,
            payload,
        }),
        ClientConfig {
            timeout_secs: Some(1),
            ..config(tmp.path())
        },
    );

    let dest = tmp.path().join("out");
    let cancel = CancelFlag::new();
    let err = client
        .pull(
            URL,
            &dest,
            PullOptions {
                cancel: cancel.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(cancel.is_cancelled());
    assert!(!dest.exists());

    // Nothing is published late either.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!dest.exists());
    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|name| name != "oci")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn timed_out_static_pull_publishes_nothing() {
    pull_past_deadline(MEDIA_TYPE_CONTENT_STATIC, b"apiVersion: v1\n".to_vec()).await;
}

#[tokio::test]
async fn timed_out_tarball_pull_publishes_nothing() {
    pull_past_deadline(MEDIA_TYPE_CONTENT_TARBALL, tarball_payload()).await;
}
