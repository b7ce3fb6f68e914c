use std::fs::FileType;

/// Kind of an entry carried in an artifact archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One archive member, identified by its forward-slash path relative to the
/// packaged root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    /// Classify a filesystem entry. Sockets, FIFOs and devices have no
    /// archive representation and yield `None`.
    pub fn from_file_type(path: String, file_type: FileType) -> Option<Self> {
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            return None;
        };
        Some(Self { path, kind })
    }

    /// Classify a tar header type. Hard links, devices, FIFOs and metadata
    /// records yield `None`.
    pub fn from_tar_type(path: String, entry_type: tar::EntryType) -> Option<Self> {
        let kind = match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
            tar::EntryType::Directory => EntryKind::Dir,
            tar::EntryType::Symlink => EntryKind::Symlink,
            _ => return None,
        };
        Some(Self { path, kind })
    }

    /// Name written into the tar header; directories carry a trailing `/`.
    pub fn archive_name(&self) -> String {
        match self.kind {
            EntryKind::Dir if !self.path.ends_with('/') => format!("{}/", self.path),
            _ => self.path.clone(),
        }
    }
}
