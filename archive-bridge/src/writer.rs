use std::collections::HashSet;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libc::c_int;

use crate::bridge::{Bridge, Failure, Pinned, WriteBridge};
use crate::engine::{cstring_from_path, ArchiveFormat, Engine, Filter, RawEntry};
use crate::entry::{EntryHeader, EntryKind};
use crate::error::{Error, Result};
use crate::handle::{Mode, SessionHandle};
use crate::path::EntryPath;
use crate::tiered::{DataSink, Strategy, TierConfig, TieredFileWriter};

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub format: ArchiveFormat,
    pub filter: Filter,
    /// Engine option string, e.g. `"compression-level=9"`.
    pub options: Option<String>,
    pub passphrase: Option<String>,
    pub tiers: TierConfig,
}

impl WriteOptions {
    pub fn new(format: ArchiveFormat) -> WriteOptions {
        WriteOptions {
            format,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> WriteOptions {
        self.filter = filter;
        self
    }

    pub fn with_passphrase<S: Into<String>>(mut self, passphrase: S) -> WriteOptions {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()?;

        if let Some(options) = self.options.as_deref() {
            if options.contains('\0') {
                return Err(Error::Config("engine options contain a nul byte".into()));
            }
        }

        if let Some(passphrase) = self.passphrase.as_deref() {
            if !self.format.supports_encryption() {
                return Err(Error::Unsupported(
                    "passphrases require the zip or 7z format",
                ));
            }
            if passphrase.is_empty() || passphrase.contains('\0') {
                return Err(Error::Config(
                    "passphrase must be non-empty and contain no nul bytes".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Options for [`ArchiveWriter::add_tree`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Whether to recurse into directories.
    pub recursive: bool,
    /// Whether to include hidden files.
    pub include_hidden: bool,
    /// Whether to follow symlinks (if false, symlinks are stored as links).
    pub follow_symlinks: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        AddOptions {
            recursive: true,
            include_hidden: true,
            follow_symlinks: false,
        }
    }
}

/// What a batch or tree add put into the archive. `bytes_written` counts
/// entry content, not archive overhead.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AddStats {
    pub files_added: u64,
    pub dirs_added: u64,
    pub links_added: u64,
    pub bytes_written: u64,
}

impl std::ops::AddAssign for AddStats {
    fn add_assign(&mut self, other: Self) {
        self.files_added += other.files_added;
        self.dirs_added += other.dirs_added;
        self.links_added += other.links_added;
        self.bytes_written += other.bytes_written;
    }
}

enum WriteTarget<W> {
    File(CString),
    Stream(Pinned<WriteBridge<W>>),
    Finished,
}

/// One native write session plus the bridge feeding its sink.
///
/// Teardown always runs close, detach, free, deallocate, in that order, so the
/// engine's final flush still reaches a live sink.
struct WriteSession<E: Engine, W: Write> {
    handle: SessionHandle<E>,
    target: WriteTarget<W>,
    closed: bool,
}

impl<E: Engine, W: Write> WriteSession<E, W> {
    fn open(target: WriteTarget<W>, options: &WriteOptions) -> Result<WriteSession<E, W>> {
        let handle = SessionHandle::acquire(Mode::Write)?;
        // From here on `Drop` tears down whatever was set up.
        let mut session = WriteSession {
            handle,
            target,
            closed: false,
        };
        session.configure(options)?;

        let raw = session.handle.raw()?;
        // SAFETY: `raw` is live and the bridge outlives the session.
        let status = unsafe {
            match &session.target {
                WriteTarget::File(path) => E::write_open_filename(raw, path.as_ptr()),
                WriteTarget::Stream(pinned) => WriteBridge::install::<E>(pinned, raw),
                WriteTarget::Finished => return Err(Error::Released),
            }
        };
        session.settle(status)?;

        tracing::debug!(format = ?options.format, filter = ?options.filter, "opened archive for writing");
        Ok(session)
    }

    fn configure(&mut self, options: &WriteOptions) -> Result<()> {
        let raw = self.handle.raw()?;

        // SAFETY: `raw` is live; option strings outlive each call.
        unsafe {
            self.handle
                .check(E::write_set_format(raw, options.format.code()))?;

            if options.filter != Filter::None {
                self.handle
                    .check(E::write_add_filter(raw, options.filter.code()))?;
            }

            if let Some(opts) = options.options.as_deref() {
                self.set_options(opts)?;
            }

            if let Some(passphrase) = options.passphrase.as_deref() {
                match options.format {
                    ArchiveFormat::Zip => self.set_options("zip:encryption=aes256")?,
                    format => {
                        tracing::debug!(?format, "using the engine's default encryption")
                    }
                }
                let passphrase = CString::new(passphrase)
                    .map_err(|_| Error::Config("passphrase contains a nul byte".into()))?;
                self.handle
                    .check(E::write_set_passphrase(raw, passphrase.as_ptr()))?;
            }
        }

        Ok(())
    }

    fn set_options(&mut self, options: &str) -> Result<()> {
        let raw = self.handle.raw()?;
        let options = CString::new(options)
            .map_err(|_| Error::Config("engine options contain a nul byte".into()))?;
        // SAFETY: `raw` is live and `options` outlives the call.
        let status = unsafe { E::write_set_options(raw, options.as_ptr()) };
        self.handle.check(status)?;
        Ok(())
    }

    fn take_failure(&mut self) -> Option<Failure> {
        match &mut self.target {
            // SAFETY: no engine call is in progress.
            WriteTarget::Stream(pinned) => unsafe { pinned.get_mut() }.take_failure(),
            _ => None,
        }
    }

    /// Surfaces a captured stream failure first, then the engine status.
    fn settle(&mut self, status: c_int) -> Result<c_int> {
        if let Some(failure) = self.take_failure() {
            return Err(failure.raise());
        }
        self.handle.check(status)
    }

    fn write_header(&mut self, header: &EntryHeader) -> Result<()> {
        if header.name.is_empty() || header.name.contains('\0') {
            return Err(Error::InvalidName(header.name.clone()));
        }

        let raw = self.handle.raw()?;
        let entry = EntryGuard::<E>::new(raw)?;
        entry.fill(header)?;

        // SAFETY: `raw` and `entry` are live for the call.
        let status = unsafe { E::write_header(raw, entry.as_ptr()) };
        self.settle(status)?;
        tracing::trace!(name = %header.name, kind = ?header.kind, size = header.size, "wrote entry header");
        Ok(())
    }

    fn finish_entry(&mut self) -> Result<()> {
        let raw = self.handle.raw()?;
        // SAFETY: `raw` is live.
        let status = unsafe { E::write_finish_entry(raw) };
        self.settle(status)?;
        Ok(())
    }

    /// Closes the engine once. The final flush runs through the bridge here.
    fn close_engine(&mut self) -> Option<c_int> {
        if self.closed {
            return None;
        }
        self.closed = true;

        let raw = self.handle.raw().ok()?;
        // SAFETY: `raw` is live and the bridge has not been detached yet.
        Some(unsafe { E::write_close(raw) })
    }

    /// Detaches the bridge, frees the handle, then deallocates the bridge.
    fn retire(&mut self) -> (Result<()>, Option<W>) {
        if let WriteTarget::Stream(pinned) = &mut self.target {
            // SAFETY: no engine call is in progress.
            unsafe { pinned.get_mut() }.detach();
        }

        let released = self.handle.release();

        let sink = match std::mem::replace(&mut self.target, WriteTarget::Finished) {
            // SAFETY: the handle is freed, so the engine no longer holds the token.
            WriteTarget::Stream(pinned) => Some(unsafe { pinned.into_inner() }.into_sink()),
            _ => None,
        };

        (released, sink)
    }

    fn finish(&mut self) -> Result<Option<W>> {
        let status = self.close_engine();
        let failure = self.take_failure();
        let closed = match status {
            Some(status) => self.handle.check(status).map(|_| ()),
            None => Ok(()),
        };

        let (released, sink) = self.retire();

        if let Some(failure) = failure {
            return Err(failure.raise());
        }
        closed?;
        released?;
        Ok(sink)
    }
}

impl<E: Engine, W: Write> DataSink for WriteSession<E, W> {
    fn write_data(&mut self, data: &[u8]) -> Result<isize> {
        let raw = self.handle.raw()?;
        // SAFETY: `raw` is live and `data` outlives the call.
        let n = unsafe { E::write_data(raw, data.as_ptr().cast(), data.len()) };

        if let Some(failure) = self.take_failure() {
            return Err(failure.raise());
        }
        if n < 0 {
            return Err(self.handle.protocol_error(n as c_int));
        }
        Ok(n)
    }

    fn stalled(&mut self, written: u64, expected: u64) -> Error {
        if let Some(failure) = self.take_failure() {
            return failure.raise();
        }
        let message = self
            .handle
            .last_error()
            .map(|(_, message)| message)
            .unwrap_or_else(|| "engine accepted no bytes".into());
        Error::ShortWrite {
            written,
            expected,
            message,
        }
    }
}

impl<E: Engine, W: Write> Drop for WriteSession<E, W> {
    fn drop(&mut self) {
        self.close_engine();
        if let Some(failure) = self.take_failure() {
            tracing::warn!(?failure, "stream failed while closing archive");
        }
        let (released, _) = self.retire();
        if let Err(err) = released {
            tracing::warn!(error = %err, "failed to release archive session");
        }
    }
}

/// A native entry header that is freed when dropped.
struct EntryGuard<E: Engine> {
    ptr: NonNull<RawEntry>,
    _engine: PhantomData<fn() -> E>,
}

impl<E: Engine> EntryGuard<E> {
    fn new(raw: *mut crate::engine::RawArchive) -> Result<EntryGuard<E>> {
        // SAFETY: `raw` is a live session.
        let ptr = NonNull::new(unsafe { E::entry_new(raw) }).ok_or(Error::HandleCreation)?;
        Ok(EntryGuard {
            ptr,
            _engine: PhantomData,
        })
    }

    #[inline(always)]
    fn as_ptr(&self) -> *mut RawEntry {
        self.ptr.as_ptr()
    }

    fn fill(&self, header: &EntryHeader) -> Result<()> {
        let name =
            CString::new(header.name.as_str()).map_err(|_| Error::InvalidName(header.name.clone()))?;
        let target = match &header.symlink {
            Some(target) => Some(
                CString::new(target.as_str()).map_err(|_| Error::InvalidName(target.clone()))?,
            ),
            None => None,
        };
        let size = match header.kind {
            EntryKind::File => i64::try_from(header.size)
                .map_err(|_| Error::Config(format!("entry size {} is too large", header.size)))?,
            _ => 0,
        };

        let e = self.as_ptr();
        // SAFETY: `e` is live; the engine copies every string it is given.
        unsafe {
            E::entry_set_pathname(e, name.as_ptr());
            E::entry_set_filetype(e, header.kind.filetype());
            E::entry_set_perm(e, header.permissions & 0o7777);
            E::entry_set_size(e, size);
            E::entry_set_mtime(e, header.modified.secs, i64::from(header.modified.nanos));
            if let Some(target) = &target {
                E::entry_set_symlink(e, target.as_ptr());
            }
        }
        Ok(())
    }
}

impl<E: Engine> Drop for EntryGuard<E> {
    fn drop(&mut self) {
        // SAFETY: allocated by `entry_new` and freed only here.
        unsafe { E::entry_free(self.ptr.as_ptr()) }
    }
}

/// Builds an archive entry by entry.
///
/// Always call [`ArchiveWriter::finish`]: dropping the writer closes and frees
/// the session too, but any error from the final flush is only logged.
pub struct ArchiveWriter<E: Engine, W: Write = io::Sink> {
    session: WriteSession<E, W>,
    tiers: TieredFileWriter,
    entries: u64,
    finished: bool,
}

impl<E: Engine> ArchiveWriter<E> {
    /// Writes the archive to `path` through the engine's own file I/O.
    pub fn create_file<P: AsRef<Path>>(
        path: P,
        options: WriteOptions,
    ) -> Result<ArchiveWriter<E, io::Sink>> {
        let path = cstring_from_path(path.as_ref())?;
        ArchiveWriter::create(WriteTarget::File(path), options)
    }

    /// Collects the archive in memory. [`ArchiveWriter::finish`] returns the bytes.
    pub fn create_memory(options: WriteOptions) -> Result<ArchiveWriter<E, Vec<u8>>> {
        ArchiveWriter::create_stream(Vec::new(), options)
    }
}

impl<E: Engine, W: Write> ArchiveWriter<E, W> {
    /// Writes the archive into any [`Write`] sink.
    pub fn create_stream(sink: W, options: WriteOptions) -> Result<ArchiveWriter<E, W>> {
        let target = WriteTarget::Stream(Pinned::new(WriteBridge::new(sink)));
        Self::create(target, options)
    }

    fn create(target: WriteTarget<W>, options: WriteOptions) -> Result<ArchiveWriter<E, W>> {
        options.validate()?;
        let tiers = TieredFileWriter::new(options.tiers)?;
        let session = WriteSession::open(target, &options)?;

        Ok(ArchiveWriter {
            session,
            tiers,
            entries: 0,
            finished: false,
        })
    }

    /// Number of entries written so far.
    #[inline(always)]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Bytes the sink has accepted so far. Always zero for file targets.
    pub fn bytes_written(&self) -> u64 {
        match &self.session.target {
            // SAFETY: no engine call is in progress.
            WriteTarget::Stream(pinned) => unsafe { pinned.get() }.bytes_written(),
            _ => 0,
        }
    }

    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.add_entry_bytes(&EntryHeader::file(name, data.len() as u64), data)
    }

    /// Writes `header` followed by `data`, which must match its size.
    pub fn add_entry_bytes(&mut self, header: &EntryHeader, data: &[u8]) -> Result<()> {
        if header.kind == EntryKind::File && header.size != data.len() as u64 {
            return Err(Error::Config(format!(
                "entry '{}' declares {} bytes but {} were given",
                header.name,
                header.size,
                data.len()
            )));
        }

        self.session.write_header(header)?;
        self.tiers.write_bytes(&mut self.session, data)?;
        self.finish_entry()
    }

    /// Streams exactly `header.size` bytes from `reader` into a file entry.
    pub fn add_reader<R: Read>(&mut self, header: &EntryHeader, reader: R) -> Result<()> {
        if header.kind != EntryKind::File {
            return Err(Error::Config(format!(
                "entry '{}' is not a regular file",
                header.name
            )));
        }

        self.session.write_header(header)?;
        self.tiers
            .write_reader(&mut self.session, reader, header.size)?;
        self.finish_entry()
    }

    /// Adds a filesystem object under `name`. Regular files are staged by size;
    /// directories and symlinks are written as header-only entries.
    pub fn add_file<P: AsRef<Path>>(&mut self, name: &str, path: P) -> Result<Option<Strategy>> {
        self.add_fs_entry(name, path.as_ref()).map(|(_, strategy)| strategy)
    }

    fn add_fs_entry(&mut self, name: &str, path: &Path) -> Result<(EntryHeader, Option<Strategy>)> {
        let meta = std::fs::symlink_metadata(path)?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            let header = EntryHeader::from_metadata(name, &meta);
            self.write_header_only(&header)?;
            return Ok((header, None));
        }

        if file_type.is_symlink() {
            let target = std::fs::read_link(path)?;
            let target = target
                .to_str()
                .ok_or_else(|| Error::InvalidName(target.display().to_string()))?
                .to_string();
            let mut header = EntryHeader::from_metadata(name, &meta);
            header.symlink = Some(target);
            self.write_header_only(&header)?;
            return Ok((header, None));
        }

        let file = File::open(path)?;
        // Size from the open handle, so the header matches what gets read.
        let meta = file.metadata()?;
        let header = EntryHeader::from_metadata(name, &meta);

        self.session.write_header(&header)?;
        let strategy = self
            .tiers
            .write_file(&mut self.session, &file, header.size)?;
        self.finish_entry()?;
        Ok((header, Some(strategy)))
    }

    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        self.write_header_only(&EntryHeader::directory(name))
    }

    pub fn add_symlink(&mut self, name: &str, target: &str) -> Result<()> {
        self.write_header_only(&EntryHeader::symlink(name, target))
    }

    /// Adds each `(name, path)` pair in order, stopping at the first failure.
    ///
    /// Entries written before the failure stay in the archive.
    pub fn add_files<I, S, P>(&mut self, files: I) -> Result<AddStats>
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: AsRef<Path>,
    {
        let mut stats = AddStats::default();
        for (name, path) in files {
            stats += self.add_path_entry(name.as_ref(), path.as_ref())?;
        }
        Ok(stats)
    }

    /// Adds `root` and everything below it, naming entries relative to the
    /// parent of `root`.
    pub fn add_tree<P: AsRef<Path>>(&mut self, root: P, options: &AddOptions) -> Result<AddStats> {
        let root = std::fs::canonicalize(root.as_ref())?;
        let root = root.as_path();
        let base = root.parent().unwrap_or_else(|| Path::new(""));

        let mut stats = AddStats::default();
        let mut pending = vec![root.to_path_buf()];
        let mut visited = HashSet::new();

        while let Some(path) = pending.pop() {
            if path != root && !options.include_hidden && is_hidden(&path) {
                continue;
            }

            let name = entry_name(base, &path)?;
            let meta = if options.follow_symlinks {
                std::fs::metadata(&path)?
            } else {
                std::fs::symlink_metadata(&path)?
            };

            if meta.is_dir() {
                if options.follow_symlinks && !visited.insert(std::fs::canonicalize(&path)?) {
                    tracing::warn!(path = %path.display(), "skipping directory cycle");
                    continue;
                }
                self.write_header_only(&EntryHeader::from_metadata(name.as_str(), &meta))?;
                stats.dirs_added += 1;

                if path == root || options.recursive {
                    let mut children = std::fs::read_dir(&path)?
                        .map(|entry| entry.map(|entry| entry.path()))
                        .collect::<io::Result<Vec<PathBuf>>>()?;
                    // Reversed so the stack pops them in name order.
                    children.sort_unstable_by(|a, b| b.cmp(a));
                    pending.extend(children);
                }
                continue;
            }

            let path = if options.follow_symlinks {
                std::fs::canonicalize(&path)?
            } else {
                path
            };
            stats += self.add_path_entry(name.as_str(), &path)?;
        }

        tracing::debug!(?stats, root = %root.display(), "added tree");
        Ok(stats)
    }

    fn add_path_entry(&mut self, name: &str, path: &Path) -> Result<AddStats> {
        let mut stats = AddStats::default();
        let (header, _) = self.add_fs_entry(name, path)?;
        match header.kind {
            EntryKind::Directory => stats.dirs_added += 1,
            EntryKind::Symlink => stats.links_added += 1,
            _ => {
                stats.files_added += 1;
                stats.bytes_written = header.size;
            }
        }
        Ok(stats)
    }

    fn write_header_only(&mut self, header: &EntryHeader) -> Result<()> {
        self.session.write_header(header)?;
        self.finish_entry()
    }

    fn finish_entry(&mut self) -> Result<()> {
        self.session.finish_entry()?;
        self.entries += 1;
        Ok(())
    }

    /// Closes the archive and returns the sink for stream and memory targets.
    pub fn finish(mut self) -> Result<Option<W>> {
        self.finished = true;
        let sink = self.session.finish()?;
        tracing::debug!(entries = self.entries, "finished archive");
        Ok(sink)
    }
}

impl<E: Engine> ArchiveWriter<E, Vec<u8>> {
    /// Closes an in-memory archive and returns its bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(self.finish()?.unwrap_or_default())
    }
}

impl<E: Engine, W: Write> Drop for ArchiveWriter<E, W> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(entries = self.entries, "archive writer dropped without finish");
        }
    }
}

fn entry_name(base: &Path, path: &Path) -> Result<EntryPath> {
    let relative = pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf());
    EntryPath::new(&relative).map_err(|e| Error::InvalidPath(e, path.to_path_buf()))
}

#[cfg(unix)]
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_hidden(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 2;

    std::fs::metadata(path)
        .map(|m| (m.file_attributes() & FILE_ATTRIBUTE_HIDDEN) != 0)
        .unwrap_or(false)
}
