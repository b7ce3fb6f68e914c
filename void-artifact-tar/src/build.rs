use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder as TarBuilder, EntryType, Header, HeaderMode};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::entry::{ArchiveEntry, EntryKind};
use crate::error::{IoContext, Result, TarError};
use crate::ignore::{Decision, IgnoreMatcher};

/// Buffer size for reading source files and writing the archive.
pub const CHUNK_SIZE: usize = 64 * 1024;

type ArchiveWriter<'a> = TarBuilder<GzEncoder<BufWriter<&'a File>>>;

/// Result of a successful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    /// Number of entries written to the archive.
    pub entries: usize,
    /// Size of the compressed archive in bytes.
    pub archive_size: u64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Packages a file or directory into a gzip-compressed tar.
///
/// Archives are reproducible: entries are written in file-name order with
/// normalized ownership and timestamps, so identical trees yield identical
/// bytes. The destination is written through a temporary file in the same
/// directory and only appears once the archive is complete.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    ignore: IgnoreMatcher,
    cancel: CancelFlag,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore rules applied when packaging a directory.
    pub fn ignore(mut self, matcher: IgnoreMatcher) -> Self {
        self.ignore = matcher;
        self
    }

    /// Parse and apply gitignore-style patterns.
    pub fn ignore_patterns<I, S>(self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.ignore(IgnoreMatcher::from_patterns(patterns)?))
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Package `source` into `dest`, dispatching on whether it is a file or a
    /// directory.
    pub fn build(&self, dest: &Path, source: &Path) -> Result<BuildSummary> {
        let meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TarError::NotFound(source.to_path_buf()))
            }
            Err(e) => return Err(e).io_ctx("stat", source),
        };

        if meta.is_dir() {
            self.build_dir(dest, source)
        } else {
            self.build_file(dest, source)
        }
    }

    /// Package a single file as the only archive entry, named after its
    /// basename. Ignore rules do not apply.
    pub fn build_file(&self, dest: &Path, file: &Path) -> Result<BuildSummary> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TarError::NotFound(file.to_path_buf()))?;
        let meta = fs::metadata(file).map_err(|e| not_found_or(e, "stat", file))?;

        info!(source = %file.display(), dest = %dest.display(), "packaging file");
        let summary = write_atomic(dest, &self.cancel, |tar, _| {
            let entry = ArchiveEntry {
                path: name,
                kind: EntryKind::File,
            };
            self.append(tar, file, &meta, &entry)?;
            Ok(1)
        })?;
        info!(
            dest = %dest.display(),
            size = summary.archive_size,
            "archive written",
        );
        Ok(summary)
    }

    /// Walk `dir` and package every entry that survives the ignore rules.
    /// Excluded directories are not descended into.
    pub fn build_dir(&self, dest: &Path, dir: &Path) -> Result<BuildSummary> {
        let dir_meta = fs::metadata(dir).map_err(|e| not_found_or(e, "stat", dir))?;
        if !dir_meta.is_dir() {
            return Err(TarError::Io {
                op: "walk",
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let root_abs = fs::canonicalize(dir).io_ctx("resolve", dir)?;

        info!(
            source = %dir.display(),
            dest = %dest.display(),
            rules = self.ignore.rules().len(),
            "packaging directory",
        );
        let summary = write_atomic(dest, &self.cancel, |tar, tmp_path| {
            // An archive written inside the tree must not package itself.
            let own_output: Vec<PathBuf> = [absolute(dest), absolute(tmp_path)]
                .into_iter()
                .flatten()
                .collect();
            let mut written = 0usize;
            let mut walker = WalkDir::new(dir)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();

            while let Some(item) = walker.next() {
                self.cancel.check()?;
                let item = item?;
                let rel = relative_slash_path(dir, item.path());
                let file_type = item.file_type();

                match self.ignore.decide(&rel, file_type.is_dir()) {
                    Decision::Include => {}
                    Decision::Exclude => {
                        debug!(path = %rel, "excluded by ignore rules");
                        continue;
                    }
                    Decision::Prune => {
                        debug!(path = %rel, "directory excluded by ignore rules");
                        walker.skip_current_dir();
                        continue;
                    }
                }

                if file_type.is_file() && own_output.contains(&root_abs.join(&rel)) {
                    continue;
                }

                let Some(entry) = ArchiveEntry::from_file_type(rel, file_type) else {
                    warn!(path = %item.path().display(), "skipping unsupported file type");
                    continue;
                };
                let meta = item
                    .path()
                    .symlink_metadata()
                    .io_ctx("stat", item.path())?;
                self.append(tar, item.path(), &meta, &entry)?;
                written += 1;
            }
            Ok(written)
        })?;

        info!(
            dest = %dest.display(),
            entries = summary.entries,
            size = summary.archive_size,
            "archive written",
        );
        Ok(summary)
    }

    fn append(
        &self,
        tar: &mut ArchiveWriter<'_>,
        src: &Path,
        meta: &fs::Metadata,
        entry: &ArchiveEntry,
    ) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(meta, HeaderMode::Deterministic);
        let name = entry.archive_name();
        debug!(path = %name, kind = ?entry.kind, "adding entry");

        match entry.kind {
            EntryKind::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                tar.append_data(&mut header, &name, io::empty())
                    .map_err(|e| self.cancel.io_error(e, "append directory", src))
            }
            EntryKind::Symlink => {
                let target = fs::read_link(src).io_ctx("read link", src)?;
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                tar.append_link(&mut header, &name, &target)
                    .map_err(|e| self.cancel.io_error(e, "append symlink", src))
            }
            EntryKind::File => {
                let file = File::open(src).io_ctx("open", src)?;
                header.set_entry_type(EntryType::Regular);
                header.set_size(meta.len());
                let reader = self
                    .cancel
                    .reader(BufReader::with_capacity(CHUNK_SIZE, file));
                tar.append_data(&mut header, &name, reader)
                    .map_err(|e| self.cancel.io_error(e, "append file", src))
            }
        }
    }
}

/// Package `source` into `dest`, applying `ignore_paths` when `source` is a
/// directory.
pub fn build<I, S>(dest: &Path, source: &Path, ignore_paths: I) -> Result<BuildSummary>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Builder::new().ignore_patterns(ignore_paths)?.build(dest, source)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stream an archive into a temporary file next to `dest` and rename it into
/// place once `fill` and compression have both succeeded. On failure the
/// temporary file is removed and `dest` is untouched.
fn write_atomic<F>(dest: &Path, cancel: &CancelFlag, fill: F) -> Result<BuildSummary>
where
    F: FnOnce(&mut ArchiveWriter<'_>, &Path) -> Result<usize>,
{
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".artifact-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .io_ctx("create temporary archive in", parent)?;

    let entries = {
        let writer = BufWriter::with_capacity(CHUNK_SIZE, tmp.as_file());
        let mut tar = TarBuilder::new(GzEncoder::new(writer, Compression::default()));
        tar.mode(HeaderMode::Deterministic);
        tar.follow_symlinks(false);

        let entries = fill(&mut tar, tmp.path())?;
        cancel.check()?;

        let encoder = tar.into_inner().io_ctx("finish tar stream", dest)?;
        let mut writer = encoder.finish().io_ctx("finish gzip stream", dest)?;
        writer.flush().io_ctx("write", dest)?;
        entries
    };

    tmp.as_file().sync_all().io_ctx("sync", tmp.path())?;
    let archive_size = tmp.as_file().metadata().io_ctx("stat", tmp.path())?.len();
    tmp.persist(dest).map_err(|e| TarError::Io {
        op: "rename archive to",
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    Ok(BuildSummary {
        entries,
        archive_size,
    })
}

/// Forward-slash path of `path` relative to `root`.
fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn absolute(path: &Path) -> Option<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path.file_name()?;
    fs::canonicalize(parent).ok().map(|p| p.join(name))
}

fn not_found_or(e: io::Error, op: &'static str, path: &Path) -> TarError {
    if e.kind() == io::ErrorKind::NotFound {
        TarError::NotFound(path.to_path_buf())
    } else {
        TarError::Io {
            op,
            path: path.to_path_buf(),
            source: e,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
