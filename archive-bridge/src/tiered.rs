//! Staging of file content on its way into the engine.
//!
//! Small files go through an exactly sized slice of a stack buffer, medium
//! files through a pooled chunk owned by the writer, and large files are
//! memory mapped and handed to the engine straight from the mapping.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use memmap2::MmapOptions;

use crate::error::{Error, Result};

/// Size of the stack buffer used by the inline tier.
pub const INLINE_BUFFER_SIZE: usize = 16 * 1024;

/// How a single file's bytes are staged.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Strategy {
    Inline,
    Pooled,
    Mapped,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TierConfig {
    /// Files smaller than this use the inline tier.
    pub inline_max: u64,
    /// Files at least this large are memory mapped.
    pub mapped_min: u64,
    /// Size of the pooled chunk.
    pub chunk_size: usize,
    /// Upper bound for a single data write handed to the engine.
    pub max_write: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            inline_max: INLINE_BUFFER_SIZE as u64,
            mapped_min: 1024 * 1024,
            chunk_size: 128 * 1024,
            max_write: i32::MAX as usize,
        }
    }
}

impl TierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.inline_max > INLINE_BUFFER_SIZE as u64 {
            return Err(Error::Config(format!(
                "inline_max ({}) exceeds the inline buffer ({})",
                self.inline_max, INLINE_BUFFER_SIZE
            )));
        }
        if self.inline_max > self.mapped_min {
            return Err(Error::Config(format!(
                "inline_max ({}) is larger than mapped_min ({})",
                self.inline_max, self.mapped_min
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must not be zero".into()));
        }
        if self.max_write == 0 {
            return Err(Error::Config("max_write must not be zero".into()));
        }
        Ok(())
    }
}

/// Where staged bytes end up: the data half of an open write session.
pub trait DataSink {
    /// Offers `data` for the current entry and returns the count the engine
    /// reports. A captured stream failure or a negative status is an error.
    fn write_data(&mut self, data: &[u8]) -> Result<isize>;

    /// The error to report when the engine stops accepting bytes.
    fn stalled(&mut self, written: u64, expected: u64) -> Error;
}

/// Writes `data` completely, retrying short writes with the remainder.
///
/// `done` and `total` position `data` within the whole entry and only feed the
/// error report.
pub(crate) fn write_all<S: DataSink + ?Sized>(
    sink: &mut S,
    mut data: &[u8],
    max_write: usize,
    done: u64,
    total: u64,
) -> Result<()> {
    let mut written = done;

    while !data.is_empty() {
        let len = data.len().min(max_write);
        let n = sink.write_data(&data[..len])?;
        if n <= 0 {
            return Err(sink.stalled(written, total));
        }

        let n = (n as usize).min(len);
        if n < len {
            tracing::trace!(offered = len, accepted = n, "short write, retrying remainder");
        }
        data = &data[n..];
        written += n as u64;
    }

    Ok(())
}

/// Picks a staging strategy per file and owns the pooled chunk.
#[derive(Debug)]
pub struct TieredFileWriter {
    config: TierConfig,
    pool: Option<Box<[u8]>>,
}

impl TieredFileWriter {
    pub fn new(config: TierConfig) -> Result<TieredFileWriter> {
        config.validate()?;
        Ok(TieredFileWriter { config, pool: None })
    }

    #[inline(always)]
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn strategy_for(&self, size: u64) -> Strategy {
        if size < self.config.inline_max {
            Strategy::Inline
        } else if size < self.config.mapped_min {
            Strategy::Pooled
        } else {
            Strategy::Mapped
        }
    }

    /// Writes the first `size` bytes of `file`, whatever its cursor position.
    pub fn write_file<S: DataSink + ?Sized>(
        &mut self,
        sink: &mut S,
        file: &File,
        size: u64,
    ) -> Result<Strategy> {
        let strategy = self.strategy_for(size);
        tracing::debug!(size, ?strategy, "writing file data");

        if size == 0 {
            return Ok(strategy);
        }

        // The mapped tier maps from offset zero; the read tiers must agree.
        let mut file = file;
        if strategy != Strategy::Mapped {
            file.seek(SeekFrom::Start(0))?;
        }

        match strategy {
            Strategy::Inline => {
                let mut stack = [0u8; INLINE_BUFFER_SIZE];
                let buf = &mut stack[..size as usize];
                file.read_exact(buf).map_err(|e| truncated(e, size))?;
                write_all(sink, buf, self.config.max_write, 0, size)?;
            }
            Strategy::Pooled => self.write_reader(sink, file, size)?,
            Strategy::Mapped => self.write_mapped(sink, file, size)?,
        }

        Ok(strategy)
    }

    /// Streams exactly `size` bytes from `reader` through the pooled chunk.
    pub fn write_reader<S: DataSink + ?Sized, R: Read>(
        &mut self,
        sink: &mut S,
        mut reader: R,
        size: u64,
    ) -> Result<()> {
        let max_write = self.config.max_write;
        let chunk_size = self.config.chunk_size;
        let chunk = self
            .pool
            .get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());

        let mut done = 0u64;
        while done < size {
            let want = (size - done).min(chunk.len() as u64) as usize;
            let n = loop {
                match reader.read(&mut chunk[..want]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Io(e)),
                }
            };
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", done, size),
                )));
            }

            write_all(sink, &chunk[..n], max_write, done, size)?;
            done += n as u64;
        }

        Ok(())
    }

    /// Writes an in-memory buffer in slices bounded by `max_write`.
    pub fn write_bytes<S: DataSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) -> Result<()> {
        write_all(sink, data, self.config.max_write, 0, data.len() as u64)
    }

    fn write_mapped<S: DataSink + ?Sized>(
        &mut self,
        sink: &mut S,
        file: &File,
        size: u64,
    ) -> Result<()> {
        // Mapping past the end of the file faults on access, so check first.
        let actual = file.metadata()?.len();
        if actual < size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file holds {} of {} bytes", actual, size),
            )));
        }

        let len = usize::try_from(size)
            .map_err(|_| Error::Config(format!("file of {} bytes cannot be mapped", size)))?;
        // SAFETY: the mapping is read-only and dropped before this returns. A
        // concurrent truncation by another process is outside our control.
        let map = unsafe { MmapOptions::new().len(len).map(file)? };

        let max_write = self.config.max_write;
        let mut done = 0u64;
        for slice in map.chunks(max_write) {
            write_all(sink, slice, max_write, done, size)?;
            done += slice.len() as u64;
        }

        Ok(())
    }
}

fn truncated(err: io::Error, size: u64) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file ended before its {} bytes", size),
        ))
    } else {
        Error::Io(err)
    }
}
