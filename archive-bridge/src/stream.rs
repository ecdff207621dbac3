//! Byte sources the reader bridge can pull from.
//!
//! Reading only needs [`std::io::Read`]. Seeking is optional: sources that can
//! reposition themselves report it through [`ByteSource::can_seek`], which lets
//! the engine seek inside seek-dependent formats and lets a reader be reset.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};

/// A readable byte stream with an optional seek capability.
pub trait ByteSource: Read {
    fn can_seek(&self) -> bool {
        false
    }

    fn seek_source(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(not_seekable())
    }

    fn rewind_source(&mut self) -> io::Result<()> {
        self.seek_source(SeekFrom::Start(0)).map(|_| ())
    }
}

#[inline(always)]
fn not_seekable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "source is not seekable")
}

impl<T: AsRef<[u8]>> ByteSource for Cursor<T> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_source(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek(pos)
    }
}

impl ByteSource for File {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_source(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek(pos)
    }
}

impl<R: Read + Seek> ByteSource for BufReader<R> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_source(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek(pos)
    }
}

impl ByteSource for &[u8] {}

impl ByteSource for io::Empty {}

impl ByteSource for io::Stdin {}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }

    fn seek_source(&mut self, pos: SeekFrom) -> io::Result<u64> {
        (**self).seek_source(pos)
    }
}

/// Exposes any `Read + Seek` type as a seekable source.
#[derive(Debug)]
pub struct Seekable<R>(pub R);

impl<R: Read> Read for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> ByteSource for Seekable<R> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_source(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// Hides the seek capability of the wrapped reader, so it behaves like a pipe.
#[derive(Debug)]
pub struct Unseekable<R>(pub R);

impl<R> Unseekable<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read> Read for Unseekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> ByteSource for Unseekable<R> {}
