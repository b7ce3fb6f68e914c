use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info, warn};

use crate::build::CHUNK_SIZE;
use crate::cancel::CancelFlag;
use crate::entry::{ArchiveEntry, EntryKind};
use crate::error::{IoContext, Result, TarError};
use crate::layer::LayerType;

/// Default decompressed-size budget for tarball extraction (100 MiB).
pub const DEFAULT_MAX_UNTAR_SIZE: u64 = 100 << 20;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Upper bound on the cumulative decompressed size of a tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    /// No bound. Only for trusted inputs.
    Unbounded,
    Bytes(u64),
}

impl From<Option<u64>> for SizeLimit {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(SizeLimit::Unbounded, SizeLimit::Bytes)
    }
}

/// Controls for [`extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub max_size: SizeLimit,
    /// Drop symlink entries instead of creating them.
    pub skip_symlinks: bool,
    pub cancel: CancelFlag,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_size: SizeLimit::Bytes(DEFAULT_MAX_UNTAR_SIZE),
            skip_symlinks: false,
            cancel: CancelFlag::default(),
        }
    }
}

impl ExtractOptions {
    pub fn max_size(mut self, limit: SizeLimit) -> Self {
        self.max_size = limit;
        self
    }

    pub fn skip_symlinks(mut self, skip: bool) -> Self {
        self.skip_symlinks = skip;
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }
}

/// Totals for a completed tarball extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub entries: usize,
    pub skipped: usize,
    pub bytes: u64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Materialize a layer blob at `dest` according to `layer_type`.
///
/// Nothing appears at `dest` unless the whole blob was processed
/// successfully.
pub fn extract<R: Read>(
    dest: &Path,
    blob: R,
    layer_type: LayerType,
    opts: &ExtractOptions,
) -> Result<()> {
    match layer_type {
        LayerType::Tarball => untar(blob, dest, opts).map(|_| ()),
        LayerType::Static => copy_static(blob, dest, opts).map(|_| ()),
    }
}

/// Decompress a gzip tar stream into the directory `dest`.
///
/// Entries are first written to a staging directory beside `dest` and moved
/// into place once the stream has been fully consumed. Entries that would
/// land outside `dest` abort the extraction.
pub fn untar<R: Read>(blob: R, dest: &Path, opts: &ExtractOptions) -> Result<UnpackSummary> {
    let parent = parent_dir(dest);
    fs::create_dir_all(parent).io_ctx("create directory", parent)?;
    if dest.exists() && !dest.is_dir() {
        return Err(TarError::Io {
            op: "extract into",
            path: dest.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
        });
    }

    let staging = tempfile::Builder::new()
        .prefix(".untar-")
        .tempdir_in(parent)
        .io_ctx("create staging directory in", parent)?;
    let root = fs::canonicalize(staging.path()).io_ctx("resolve", staging.path())?;

    info!(dest = %dest.display(), limit = ?opts.max_size, "extracting tarball");
    let summary = unpack_entries(blob, &root, opts)?;
    opts.cancel.check()?;

    publish_tree(&root, dest)?;
    info!(
        dest = %dest.display(),
        entries = summary.entries,
        skipped = summary.skipped,
        bytes = summary.bytes,
        "tarball extracted",
    );
    Ok(summary)
}

/// Copy `blob` verbatim to the file `dest`. Returns the number of bytes
/// written.
pub fn copy_static<R: Read>(blob: R, dest: &Path, opts: &ExtractOptions) -> Result<u64> {
    let parent = parent_dir(dest);
    fs::create_dir_all(parent).io_ctx("create directory", parent)?;

    let tmp = tempfile::Builder::new()
        .prefix(".static-")
        .tempfile_in(parent)
        .io_ctx("create temporary file in", parent)?;

    let written = {
        let mut reader = opts.cancel.reader(BufReader::with_capacity(CHUNK_SIZE, blob));
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, tmp.as_file());
        let written = io::copy(&mut reader, &mut writer)
            .map_err(|e| opts.cancel.io_error(e, "copy layer to", dest))?;
        writer.flush().io_ctx("write", dest)?;
        written
    };

    tmp.as_file().sync_all().io_ctx("sync", tmp.path())?;
    opts.cancel.check()?;
    tmp.persist(dest).map_err(|e| TarError::Io {
        op: "rename file to",
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    info!(dest = %dest.display(), bytes = written, "static layer written");
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tarball extraction
// ---------------------------------------------------------------------------

fn unpack_entries<R: Read>(blob: R, root: &Path, opts: &ExtractOptions) -> Result<UnpackSummary> {
    let reader = opts.cancel.reader(BufReader::with_capacity(CHUNK_SIZE, blob));
    let mut archive = Archive::new(GzDecoder::new(reader));
    // Do not preserve permissions bits that could block later access.
    archive.set_preserve_permissions(false);
    archive.set_unpack_xattrs(false);

    let mut summary = UnpackSummary::default();
    let mut links: Vec<PathBuf> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| opts.cancel.io_error(e, "read archive into", root))?;
    for entry_result in entries {
        opts.cancel.check()?;
        let mut entry = entry_result.map_err(|e| opts.cancel.io_error(e, "read archive into", root))?;
        let raw_path = entry
            .path()
            .map_err(|e| opts.cancel.io_error(e, "read entry path in", root))?
            .into_owned();
        let Some(rel) = sanitize(&raw_path)? else {
            // The archive root itself ("./").
            continue;
        };

        let display = rel.to_string_lossy().into_owned();
        let Some(item) = ArchiveEntry::from_tar_type(display, entry.header().entry_type()) else {
            let entry_type = entry.header().entry_type();
            if !matches!(
                entry_type,
                tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
            ) {
                warn!(path = %raw_path.display(), ?entry_type, "skipping unsupported entry type");
            }
            summary.skipped += 1;
            continue;
        };

        summary.bytes += entry.size();
        if let SizeLimit::Bytes(limit) = opts.max_size {
            if summary.bytes > limit {
                return Err(TarError::SizeLimitExceeded {
                    limit,
                    actual: summary.bytes,
                });
            }
        }

        match item.kind {
            EntryKind::Dir => {
                create_dirs_within(root, &rel)?;
            }
            EntryKind::File => {
                let target = prepare_parent(root, &rel)?;
                entry
                    .unpack(&target)
                    .map_err(|e| opts.cancel.io_error(e, "write", &target))?;
            }
            EntryKind::Symlink => {
                if opts.skip_symlinks {
                    debug!(path = %item.path, "skipping symlink");
                    summary.skipped += 1;
                    continue;
                }
                let link_target = entry
                    .link_name()
                    .map_err(|e| opts.cancel.io_error(e, "read link target of", &rel))?
                    .ok_or_else(|| {
                        TarError::UnsafePath(format!("symlink {} has no target", item.path))
                    })?
                    .into_owned();
                check_link_target(&rel, &link_target)?;
                let target = prepare_parent(root, &rel)?;
                entry
                    .unpack(&target)
                    .map_err(|e| opts.cancel.io_error(e, "create symlink", &target))?;
                links.push(target);
            }
        }
        debug!(path = %item.path, kind = ?item.kind, "extracted entry");
        summary.entries += 1;
    }

    // A link created early may resolve outside once later entries exist.
    for link in &links {
        if let Ok(resolved) = fs::canonicalize(link) {
            if !resolved.starts_with(root) {
                return Err(TarError::UnsafePath(format!(
                    "symlink {} resolves outside the destination",
                    link.display()
                )));
            }
        }
    }

    // Drain the compressed remainder so verifying readers underneath observe
    // end of stream. Trailing data is not decompressed.
    let mut raw = archive.into_inner().into_inner();
    io::copy(&mut raw, &mut io::sink())
        .map_err(|e| opts.cancel.io_error(e, "read archive into", root))?;

    Ok(summary)
}

/// Normalize an entry path to a relative path with only normal components.
/// Returns `None` for the archive root and rejects absolute or parent
/// components.
fn sanitize(path: &Path) -> Result<Option<PathBuf>> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TarError::UnsafePath(format!(
                    "entry {} escapes the destination",
                    path.display()
                )));
            }
        }
    }
    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

/// Reject symlink targets that lexically leave the extraction root.
fn check_link_target(link: &Path, target: &Path) -> Result<()> {
    let escape = || {
        TarError::UnsafePath(format!(
            "symlink {} -> {} escapes the destination",
            link.display(),
            target.display()
        ))
    };

    if target.has_root() {
        return Err(escape());
    }

    let mut depth: usize = link.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(())
}

/// Create the parent directories of the entry `rel` and return the path the
/// entry itself should be written to.
fn prepare_parent(root: &Path, rel: &Path) -> Result<PathBuf> {
    let parent = create_dirs_within(root, rel.parent().unwrap_or(Path::new("")))?;
    match rel.file_name() {
        Some(name) => Ok(parent.join(name)),
        None => Err(TarError::UnsafePath(format!(
            "entry {} has no file name",
            rel.display()
        ))),
    }
}

/// Create `rel` below `root` one component at a time and return its resolved
/// path. Existing symlinks are only followed when they resolve to a directory
/// inside `root`, so nothing is ever created outside it.
fn create_dirs_within(root: &Path, rel: &Path) -> Result<PathBuf> {
    let mut current = root.to_path_buf();
    for component in rel.components() {
        let Component::Normal(part) = component else {
            return Err(TarError::UnsafePath(format!(
                "entry {} escapes the destination",
                rel.display()
            )));
        };
        let next = current.join(part);
        match next.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => {
                current = resolve_within(root, &next)?;
            }
            Ok(meta) if meta.is_dir() => current = next,
            Ok(_) => {
                return Err(TarError::Io {
                    op: "create directory",
                    path: next,
                    source: io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&next).io_ctx("create directory", &next)?;
                current = next;
            }
            Err(e) => {
                return Err(TarError::Io {
                    op: "inspect",
                    path: next,
                    source: e,
                })
            }
        }
    }
    Ok(current)
}

/// Resolve the symlink `link` and require a directory inside `root`.
fn resolve_within(root: &Path, link: &Path) -> Result<PathBuf> {
    let outside = || {
        TarError::UnsafePath(format!(
            "{} resolves outside the destination",
            link.display()
        ))
    };
    // Dangling links are refused rather than created through.
    let resolved = fs::canonicalize(link).map_err(|_| outside())?;
    if !resolved.starts_with(root) {
        return Err(outside());
    }
    if !resolved.is_dir() {
        return Err(TarError::Io {
            op: "create directory",
            path: link.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
        });
    }
    Ok(resolved)
}

/// Move the staged tree into `dest`. A missing `dest` is replaced by the
/// staging directory wholesale; an existing one receives each top-level
/// entry, replacing entries of the same name.
fn publish_tree(staged: &Path, dest: &Path) -> Result<()> {
    if !dest.exists() {
        // The staging TempDir then finds nothing left to clean up.
        return fs::rename(staged, dest).io_ctx("rename staging directory to", dest);
    }

    for child in fs::read_dir(staged).io_ctx("read directory", staged)? {
        let child = child.io_ctx("read directory", staged)?;
        let target = dest.join(child.file_name());
        if let Ok(meta) = target.symlink_metadata() {
            if meta.is_dir() {
                fs::remove_dir_all(&target).io_ctx("remove", &target)?;
            } else {
                fs::remove_file(&target).io_ctx("remove", &target)?;
            }
        }
        fs::rename(child.path(), &target).io_ctx("move extracted entry to", &target)?;
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
