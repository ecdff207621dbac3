//! Stream-oriented access to a native, callback-based archive engine.
//!
//! Use [ArchiveReader][ArchiveReader] to walk the entries of an archive and
//! [ArchiveWriter][ArchiveWriter] to build one. Either can work on a path, an
//! in-memory buffer, or any [`std::io::Read`]/[`std::io::Write`] stream.
//!
//! The engine is chosen by type parameter. With the `libarchive` feature,
//! [`Libarchive`] binds the system libarchive.

mod bridge;
pub mod engine;
pub mod entry;
pub mod error;
pub mod handle;
pub mod path;
pub mod reader;
pub mod stream;
pub mod tiered;
pub mod writer;


#[cfg(feature = "libarchive")]
pub use engine::Libarchive;
pub use engine::{versions, ArchiveFormat, Engine, Filter, Versions};
pub use entry::{EntryDescriptor, EntryHeader, EntryKind, ModifiedTime};
pub use error::{Error, ErrorKind, Result};
pub use handle::{Mode, SessionHandle};
pub use path::EntryPath;
pub use reader::{ArchiveReader, Entries, EntryData, ReadOptions};
pub use stream::{ByteSource, Seekable, Unseekable};
pub use tiered::{Strategy, TierConfig, TieredFileWriter};
pub use writer::{AddOptions, AddStats, ArchiveWriter, WriteOptions};
