//! Packaging and extraction of artifact layers.
//!
//! - [`build`] turns a file or directory into a reproducible `.tar.gz`,
//!   filtered by gitignore-style rules from [`ignore`].
//! - [`unpack`] materializes a layer blob on disk, either as a directory tree
//!   (tarball layers) or as a single file (static layers), guarding against
//!   path traversal, symlink escapes and decompression bombs.
//! - [`sniff`] classifies undeclared layers from their leading bytes.
//!
//! All operations are blocking and stream through fixed-size buffers; run
//! them on a blocking thread from async code.

pub mod build;
pub mod cancel;
pub mod entry;
pub mod error;
pub mod ignore;
pub mod layer;
pub mod sniff;
pub mod unpack;

pub use build::{build, BuildSummary, Builder};
pub use cancel::CancelFlag;
pub use entry::{ArchiveEntry, EntryKind};
pub use error::{Result, TarError};
pub use ignore::{Decision, IgnoreMatcher, IgnoreRule};
pub use layer::LayerType;
pub use sniff::{detect_layer_type, looks_like_gzip, Peek, PeekReader};
pub use unpack::{extract, ExtractOptions, SizeLimit, UnpackSummary};
