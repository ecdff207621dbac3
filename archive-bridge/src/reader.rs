use std::ffi::CString;
use std::io::{self, Read};
use std::path::Path;

use libc::c_int;

use crate::bridge::{Bridge, Failure, Pinned, ReadBridge};
use crate::engine::{cstring_from_path, status, Engine};
use crate::entry::EntryDescriptor;
use crate::error::{Error, Result};
use crate::handle::{Mode, SessionHandle};
use crate::stream::ByteSource;

/// Default size of the pinned read buffer.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Size of the buffer handed to the engine on every read.
    pub block_size: usize,
    /// Tried in order against encrypted entries.
    pub passphrases: Vec<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            passphrases: vec![],
        }
    }
}

impl ReadOptions {
    pub fn with_block_size(mut self, block_size: usize) -> ReadOptions {
        self.block_size = block_size;
        self
    }

    pub fn with_passphrase<S: Into<String>>(mut self, passphrase: S) -> ReadOptions {
        self.passphrases.push(passphrase.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must not be zero".into()));
        }
        if self
            .passphrases
            .iter()
            .any(|p| p.is_empty() || p.contains('\0'))
        {
            return Err(Error::Config(
                "passphrases must be non-empty and contain no nul bytes".into(),
            ));
        }
        Ok(())
    }
}

enum ReadSource<S> {
    File(CString),
    Memory(Box<[u8]>),
    Stream(Pinned<ReadBridge<S>>),
    Released,
}

/// A read session and its entry cursor.
///
/// Entries are visited strictly in order. An [`EntryDescriptor`] returned by
/// [`ArchiveReader::next_entry`] can read data only until the cursor moves on.
pub struct ArchiveReader<E: Engine, S: ByteSource = io::Empty> {
    handle: SessionHandle<E>,
    source: ReadSource<S>,
    options: ReadOptions,
    position: u64,
    exhausted: bool,
}

impl<E: Engine> ArchiveReader<E> {
    /// Reads the archive at `path` through the engine's own file I/O.
    pub fn open_file<P: AsRef<Path>>(
        path: P,
        options: ReadOptions,
    ) -> Result<ArchiveReader<E, io::Empty>> {
        let path = cstring_from_path(path.as_ref())?;
        ArchiveReader::open(ReadSource::File(path), options)
    }

    /// Reads an archive held in memory. The buffer is owned by the session.
    pub fn open_memory<B: Into<Box<[u8]>>>(
        data: B,
        options: ReadOptions,
    ) -> Result<ArchiveReader<E, io::Empty>> {
        ArchiveReader::open(ReadSource::Memory(data.into()), options)
    }
}

impl<E: Engine, S: ByteSource> ArchiveReader<E, S> {
    /// Reads an archive from any [`ByteSource`] through the callback bridge.
    pub fn open_stream(source: S, options: ReadOptions) -> Result<ArchiveReader<E, S>> {
        let bridge = ReadBridge::new(source, options.block_size);
        ArchiveReader::open(ReadSource::Stream(Pinned::new(bridge)), options)
    }

    fn open(source: ReadSource<S>, options: ReadOptions) -> Result<ArchiveReader<E, S>> {
        options.validate()?;
        let handle = SessionHandle::acquire(Mode::Read)?;
        // From here on `Drop` tears down whatever was set up.
        let mut reader = ArchiveReader {
            handle,
            source,
            options,
            position: 0,
            exhausted: false,
        };
        reader.open_native()?;
        Ok(reader)
    }

    fn open_native(&mut self) -> Result<()> {
        let raw = self.handle.raw()?;

        // SAFETY: `raw` is live; strings and buffers outlive each call, and the
        // memory source and bridge live as long as the session.
        let status = unsafe {
            self.handle.check(E::read_support_filter_all(raw))?;
            self.handle.check(E::read_support_format_all(raw))?;

            for passphrase in &self.options.passphrases {
                let passphrase = CString::new(passphrase.as_str())
                    .map_err(|_| Error::Config("passphrase contains a nul byte".into()))?;
                self.handle
                    .check(E::read_add_passphrase(raw, passphrase.as_ptr()))?;
            }

            match &self.source {
                ReadSource::File(path) => {
                    E::read_open_filename(raw, path.as_ptr(), self.options.block_size)
                }
                ReadSource::Memory(data) => E::read_open_memory(raw, data.as_ptr().cast(), data.len()),
                ReadSource::Stream(pinned) => ReadBridge::install::<E>(pinned, raw),
                ReadSource::Released => return Err(Error::Released),
            }
        };
        self.settle(status)?;

        tracing::debug!(
            source = self.source_kind(),
            block_size = self.options.block_size,
            "opened archive for reading"
        );
        Ok(())
    }

    fn source_kind(&self) -> &'static str {
        match &self.source {
            ReadSource::File(_) => "file",
            ReadSource::Memory(_) => "memory",
            ReadSource::Stream(_) => "stream",
            ReadSource::Released => "released",
        }
    }

    fn take_failure(&mut self) -> Option<Failure> {
        match &mut self.source {
            // SAFETY: no engine call is in progress.
            ReadSource::Stream(pinned) => unsafe { pinned.get_mut() }.take_failure(),
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

    /// Whether the stream behind this reader can seek. Path and memory
    /// sources always can.
    pub fn can_seek(&self) -> bool {
        match &self.source {
            // SAFETY: no engine call is in progress.
            ReadSource::Stream(pinned) => unsafe { pinned.get() }.can_seek(),
            ReadSource::Released => false,
            _ => true,
        }
    }

    /// Advances to the next entry. Returns `Ok(None)` once the archive is
    /// exhausted, and keeps doing so.
    pub fn next_entry(&mut self) -> Result<Option<EntryDescriptor>> {
        if self.exhausted {
            return Ok(None);
        }

        let raw = self.handle.raw()?;
        let mut entry = std::ptr::null_mut();
        // SAFETY: `raw` is live and `entry` is a valid out pointer.
        let status = unsafe { E::read_next_header(raw, &mut entry) };
        // Earlier descriptors go stale whatever the outcome.
        self.position += 1;

        if self.settle(status)? == status::EOF {
            tracing::debug!(entries = self.position - 1, "reached end of archive");
            self.exhausted = true;
            return Ok(None);
        }

        if entry.is_null() {
            return Err(Error::Protocol {
                status,
                errno: 0,
                message: "engine returned no entry header".into(),
            });
        }

        // SAFETY: `entry` was just returned by the engine and stays valid until
        // the next call on this session.
        let descriptor = unsafe { EntryDescriptor::from_raw::<E>(entry, self.position) };
        tracing::debug!(
            name = descriptor.name(),
            kind = ?descriptor.kind(),
            size = descriptor.size(),
            position = self.position,
            "advanced to entry"
        );
        Ok(Some(descriptor))
    }

    fn ensure_current(&self, entry: &EntryDescriptor) -> Result<()> {
        if self.exhausted || entry.position != self.position {
            return Err(Error::StaleEntry {
                name: entry.name.clone(),
            });
        }
        Ok(())
    }

    /// Reads the next chunk of `entry`'s data into `buf`. Returns `0` at the end
    /// of the entry.
    pub fn read_data(&mut self, entry: &EntryDescriptor, buf: &mut [u8]) -> Result<usize> {
        self.ensure_current(entry)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let raw = self.handle.raw()?;
        loop {
            // SAFETY: `raw` is live and `buf` is writable for its length.
            let n = unsafe { E::read_data(raw, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                if let Some(failure) = self.take_failure() {
                    return Err(failure.raise());
                }
                return Ok(n as usize);
            }

            let status = n as c_int;
            match status {
                status::RETRY => {
                    tracing::trace!(name = entry.name(), "engine asked to retry data read");
                }
                // The pending block stays queued; the next call returns it.
                status::WARN => {
                    if let Some(failure) = self.take_failure() {
                        return Err(failure.raise());
                    }
                    let message = self.handle.last_error().map(|(_, message)| message);
                    tracing::warn!(name = entry.name(), ?message, "engine warning during data read");
                }
                status => {
                    self.settle(status)?;
                    return Err(self.handle.protocol_error(status));
                }
            }
        }
    }

    /// An [`io::Read`] over `entry`'s data, borrowing the reader.
    pub fn data<'a>(&'a mut self, entry: &'a EntryDescriptor) -> Result<EntryData<'a, E, S>> {
        self.ensure_current(entry)?;
        Ok(EntryData {
            reader: self,
            entry,
        })
    }

    /// Reads the rest of `entry`'s data.
    pub fn read_to_vec(&mut self, entry: &EntryDescriptor) -> Result<Vec<u8>> {
        self.ensure_current(entry)?;

        let mut out = Vec::with_capacity(entry.size().min(DEFAULT_BLOCK_SIZE as u64 * 16) as usize);
        let mut chunk = vec![0u8; DEFAULT_BLOCK_SIZE];
        loop {
            let n = self.read_data(entry, &mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Discards the rest of the current entry's data.
    pub fn skip_data(&mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        let raw = self.handle.raw()?;
        // SAFETY: `raw` is live.
        let status = unsafe { E::read_data_skip(raw) };
        self.settle(status)?;
        Ok(())
    }

    /// Starts over from the first entry with a fresh native session.
    ///
    /// Stream sources must be seekable; otherwise this fails with
    /// [`Error::Unsupported`] and the current session is left untouched.
    pub fn reset(&mut self) -> Result<()> {
        if !self.can_seek() {
            return Err(Error::Unsupported("reset requires a seekable source"));
        }

        let handle = SessionHandle::acquire(Mode::Read)?;
        let mut old = std::mem::replace(&mut self.handle, handle);

        // The old session is freed before the stream is touched again.
        if let ReadSource::Stream(pinned) = &mut self.source {
            // SAFETY: no engine call is in progress.
            unsafe { pinned.get_mut() }.detach();
        }
        if let Err(err) = old.release() {
            tracing::warn!(error = %err, "failed to release archive session during reset");
        }
        if let ReadSource::Stream(pinned) = &mut self.source {
            // SAFETY: the old session is gone and the new one is not open yet.
            unsafe { pinned.get_mut() }.rewind()?;
        }

        self.position += 1;
        self.exhausted = false;
        tracing::debug!(source = self.source_kind(), "resetting archive reader");
        self.open_native()
    }

    /// A lazy iterator over the remaining entries.
    pub fn entries(&mut self) -> Entries<'_, E, S> {
        Entries {
            reader: self,
            failed: false,
        }
    }

    /// Ends the session and gives back the stream, if there was one.
    pub fn close(mut self) -> Result<Option<S>> {
        let failure = self.take_failure();
        let (released, source) = self.retire();
        if let Some(failure) = failure {
            return Err(failure.raise());
        }
        released?;
        Ok(source)
    }

    /// Detaches the bridge, frees the handle, then deallocates the bridge.
    fn retire(&mut self) -> (Result<()>, Option<S>) {
        if let ReadSource::Stream(pinned) = &mut self.source {
            // SAFETY: no engine call is in progress.
            unsafe { pinned.get_mut() }.detach();
        }

        let released = self.handle.release();

        let source = match std::mem::replace(&mut self.source, ReadSource::Released) {
            // SAFETY: the handle is freed, so the engine no longer holds the token.
            ReadSource::Stream(pinned) => Some(unsafe { pinned.into_inner() }.into_source()),
            _ => None,
        };

        (released, source)
    }
}

impl<E: Engine, S: ByteSource> Drop for ArchiveReader<E, S> {
    fn drop(&mut self) {
        if let Some(failure) = self.take_failure() {
            tracing::warn!(?failure, "unreported stream failure at close");
        }
        let (released, _) = self.retire();
        if let Err(err) = released {
            tracing::warn!(error = %err, "failed to release archive session");
        }
    }
}

/// Reads the data of one entry. Errors surface as [`io::Error`]; the typed
/// error is kept as the inner error.
pub struct EntryData<'a, E: Engine, S: ByteSource> {
    reader: &'a mut ArchiveReader<E, S>,
    entry: &'a EntryDescriptor,
}

impl<E: Engine, S: ByteSource> Read for EntryData<'_, E, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader
            .read_data(self.entry, buf)
            .map_err(io::Error::from)
    }
}

/// Iterator returned by [`ArchiveReader::entries`]. Stops after the first error.
pub struct Entries<'a, E: Engine, S: ByteSource> {
    reader: &'a mut ArchiveReader<E, S>,
    failed: bool,
}

impl<E: Engine, S: ByteSource> Entries<'_, E, S> {
    /// The reader, for reading the current entry's data between steps.
    pub fn reader(&mut self) -> &mut ArchiveReader<E, S> {
        &mut *self.reader
    }
}

impl<E: Engine, S: ByteSource> Iterator for Entries<'_, E, S> {
    type Item = Result<EntryDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl<E: Engine, S: ByteSource> std::iter::FusedIterator for Entries<'_, E, S> {}
