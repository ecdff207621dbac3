//! In-process engine used by the test suite.
//!
//! It speaks the same callback protocol as libarchive but stores entries in a
//! simple framed format:
//!
//! ```text
//! "LBK\x01" { 0x01 filetype:u32 perm:u32 size:u64 secs:i64 nanos:u32
//!             name_len:u32 name link_len:u32 link data[size] }* 0x00
//! ```
//!
//! All integers are little endian. Output is buffered and flushed through the
//! write callback in blocks, looping over short writes the way libarchive does.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use libc::{c_char, c_int, c_void, size_t};

use super::{
    filetype, status, CloseCallback, Engine, OpenCallback, RawArchive, RawEntry, ReadCallback,
    SeekCallback, WriteCallback,
};

pub(crate) const MAGIC: &[u8; 4] = b"LBK\x01";
const TAG_ENTRY: u8 = 1;
const TAG_END: u8 = 0;
const FIXED_HEADER: usize = 4 + 4 + 8 + 8 + 4 + 4;
const FLUSH_BLOCK: usize = 512;
const FILE_BLOCK: usize = 4096;

thread_local! {
    static FREES: Cell<usize> = Cell::new(0);
    static FAIL_NEXT_NEW: Cell<bool> = Cell::new(false);
    static WRITE_DATA_LIMIT: Cell<usize> = Cell::new(usize::MAX);
    static READ_POINTERS: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    static OPTIONS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static SEEKS: Cell<usize> = Cell::new(0);
    static WARN_NEXT_DATA: Cell<bool> = Cell::new(false);
    static FAIL_NEXT_OPEN: Cell<bool> = Cell::new(false);
}

pub(crate) fn reset_counters() {
    FREES.with(|c| c.set(0));
    FAIL_NEXT_NEW.with(|c| c.set(false));
    WRITE_DATA_LIMIT.with(|c| c.set(usize::MAX));
    READ_POINTERS.with(|c| c.borrow_mut().clear());
    OPTIONS.with(|c| c.borrow_mut().clear());
    SEEKS.with(|c| c.set(0));
    WARN_NEXT_DATA.with(|c| c.set(false));
    FAIL_NEXT_OPEN.with(|c| c.set(false));
}

/// Number of sessions freed on this thread.
pub(crate) fn free_count() -> usize {
    FREES.with(|c| c.get())
}

/// Makes the next `read_new`/`write_new` on this thread return null.
pub(crate) fn fail_next_new() {
    FAIL_NEXT_NEW.with(|c| c.set(true));
}

/// Makes the next `read_data` with bytes pending return `WARN` once, keeping
/// the block for the following call.
pub(crate) fn warn_next_data() {
    WARN_NEXT_DATA.with(|c| c.set(true));
}

/// Makes the next callback open fail after the open callback has run.
pub(crate) fn fail_next_open() {
    FAIL_NEXT_OPEN.with(|c| c.set(true));
}

fn take_flag(flag: &'static std::thread::LocalKey<Cell<bool>>) -> bool {
    flag.with(|c| c.replace(false))
}

/// Caps the byte count accepted by each `write_data` call.
pub(crate) fn set_write_data_limit(limit: usize) {
    WRITE_DATA_LIMIT.with(|c| c.set(limit));
}

/// Buffer addresses handed over by read callbacks, in call order.
pub(crate) fn read_pointers() -> Vec<usize> {
    READ_POINTERS.with(|c| c.borrow().clone())
}

/// Option strings passed to `write_set_options`.
pub(crate) fn options_seen() -> Vec<String> {
    OPTIONS.with(|c| c.borrow().clone())
}

/// Seek callback invocations.
pub(crate) fn seek_count() -> usize {
    SEEKS.with(|c| c.get())
}

/// Serialises entries in the framed format, for building fixtures by hand.
pub(crate) fn encode(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let entries: Vec<(&[u8], &[u8])> = entries.iter().map(|(n, d)| (n.as_bytes(), *d)).collect();
    encode_raw(&entries)
}

/// Like [`encode`], with names as raw bytes in no particular encoding.
pub(crate) fn encode_raw(entries: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    for (name, data) in entries {
        let entry = LoopEntry {
            pathname: CString::new(*name).ok(),
            filetype: filetype::REGULAR,
            perm: 0o644,
            size: data.len() as i64,
            ..Default::default()
        };
        entry.encode(&mut out);
        out.extend_from_slice(data);
    }
    out.push(TAG_END);
    out
}

pub(crate) enum Loopback {}

#[derive(Default)]
struct LoopEntry {
    pathname: Option<CString>,
    symlink: Option<CString>,
    filetype: u32,
    perm: u32,
    size: i64,
    secs: i64,
    nanos: i64,
}

impl LoopEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        let name = self.pathname.as_ref().map(|x| x.as_bytes()).unwrap_or(b"");
        let link = self.symlink.as_ref().map(|x| x.as_bytes()).unwrap_or(b"");

        out.push(TAG_ENTRY);
        // Writes into a Vec cannot fail.
        let _ = out.write_u32::<LittleEndian>(self.filetype);
        let _ = out.write_u32::<LittleEndian>(self.perm);
        let _ = out.write_u64::<LittleEndian>(self.data_size());
        let _ = out.write_i64::<LittleEndian>(self.secs);
        let _ = out.write_u32::<LittleEndian>(self.nanos as u32);
        let _ = out.write_u32::<LittleEndian>(name.len() as u32);
        out.extend_from_slice(name);
        let _ = out.write_u32::<LittleEndian>(link.len() as u32);
        out.extend_from_slice(link);
    }

    fn data_size(&self) -> u64 {
        if self.filetype == filetype::REGULAR {
            self.size.max(0) as u64
        } else {
            0
        }
    }
}

enum Input {
    None,
    Callbacks {
        token: *mut c_void,
        read: ReadCallback,
        close: Option<CloseCallback>,
    },
    Memory {
        ptr: *const u8,
        len: usize,
        pos: usize,
    },
    File(std::fs::File),
}

enum Output {
    None,
    Callbacks {
        token: *mut c_void,
        write: WriteCallback,
        close: Option<CloseCallback>,
    },
    File(std::fs::File),
}

struct Session {
    error: Option<(c_int, CString)>,

    input: Input,
    pending: Vec<u8>,
    input_eof: bool,
    seek: Option<SeekCallback>,
    started: bool,
    finished: bool,
    current: Option<Box<LoopEntry>>,

    output: Output,
    out: Vec<u8>,
    header_open: bool,
    closed: bool,

    remaining: u64,
}

impl Session {
    fn new() -> Session {
        Session {
            error: None,
            input: Input::None,
            pending: vec![],
            input_eof: false,
            seek: None,
            started: false,
            finished: false,
            current: None,
            output: Output::None,
            out: vec![],
            header_open: false,
            closed: false,
            remaining: 0,
        }
    }

    fn fail(&mut self, errno: c_int, message: &str, status: c_int) -> c_int {
        self.error = CString::new(message).ok().map(|m| (errno, m));
        status
    }

    /// Pulls one more block of input. Returns false at end of input.
    unsafe fn pull(&mut self, a: *mut RawArchive) -> Result<bool, c_int> {
        if self.input_eof {
            return Ok(false);
        }

        match &mut self.input {
            Input::None => return Err(self.fail(libc::EINVAL, "archive is not open", status::FATAL)),
            Input::Callbacks { token, read, .. } => {
                let mut out: *const c_void = std::ptr::null();
                let n = (*read)(a, *token, &mut out);
                if n < 0 {
                    return Err(self.fail(libc::EIO, "read callback failed", status::FATAL));
                }
                if n == 0 {
                    self.input_eof = true;
                    return Ok(false);
                }
                READ_POINTERS.with(|c| c.borrow_mut().push(out as usize));
                let block = std::slice::from_raw_parts(out.cast::<u8>(), n as usize);
                self.pending.extend_from_slice(block);
            }
            Input::Memory { ptr, len, pos } => {
                if *pos == *len {
                    self.input_eof = true;
                    return Ok(false);
                }
                let block = std::slice::from_raw_parts(ptr.add(*pos), *len - *pos);
                self.pending.extend_from_slice(block);
                *pos = *len;
            }
            Input::File(file) => {
                let mut block = [0u8; FILE_BLOCK];
                let n = match file.read(&mut block) {
                    Ok(n) => n,
                    Err(e) => {
                        let errno = e.raw_os_error().unwrap_or(libc::EIO);
                        return Err(self.fail(errno, "read failed", status::FATAL));
                    }
                };
                if n == 0 {
                    self.input_eof = true;
                    return Ok(false);
                }
                self.pending.extend_from_slice(&block[..n]);
            }
        }

        Ok(true)
    }

    /// Buffers at least `n` bytes unless the input ends first.
    unsafe fn need(&mut self, a: *mut RawArchive, n: usize) -> Result<bool, c_int> {
        while self.pending.len() < n {
            if !self.pull(a)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    unsafe fn take(&mut self, a: *mut RawArchive, n: usize) -> Result<Vec<u8>, c_int> {
        if !self.need(a, n)? {
            return Err(self.fail(libc::EILSEQ, "truncated archive", status::FATAL));
        }
        Ok(self.pending.drain(..n).collect())
    }

    unsafe fn skip_remaining(&mut self, a: *mut RawArchive) -> Result<(), c_int> {
        while self.remaining > 0 {
            if self.pending.is_empty() && !self.pull(a)? {
                return Err(self.fail(libc::EILSEQ, "truncated entry data", status::FATAL));
            }
            let n = (self.pending.len() as u64).min(self.remaining) as usize;
            self.pending.drain(..n);
            self.remaining -= n as u64;
        }
        Ok(())
    }

    unsafe fn next_header(&mut self, a: *mut RawArchive) -> Result<Option<Box<LoopEntry>>, c_int> {
        if self.finished {
            return Ok(None);
        }

        if !self.started {
            if !self.need(a, 1)? {
                // Empty input is an empty archive.
                self.finished = true;
                return Ok(None);
            }
            let magic = self.take(a, MAGIC.len())?;
            if magic != MAGIC {
                return Err(self.fail(
                    libc::EILSEQ,
                    "Unrecognized archive format",
                    status::FATAL,
                ));
            }
            self.started = true;
        }

        self.skip_remaining(a)?;

        let tag = self.take(a, 1)?;
        match tag[0] {
            TAG_END => {
                self.finished = true;
                return Ok(None);
            }
            TAG_ENTRY => {}
            other => {
                let message = format!("bad frame tag {}", other);
                return Err(self.fail(libc::EILSEQ, &message, status::FATAL));
            }
        }

        let fixed = self.take(a, FIXED_HEADER)?;
        let mut cursor = std::io::Cursor::new(fixed);
        let parse = |cursor: &mut std::io::Cursor<Vec<u8>>| -> std::io::Result<_> {
            Ok((
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u64::<LittleEndian>()?,
                cursor.read_i64::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
            ))
        };
        let (filetype, perm, size, secs, nanos, name_len) = match parse(&mut cursor) {
            Ok(fields) => fields,
            Err(_) => return Err(self.fail(libc::EILSEQ, "bad entry header", status::FATAL)),
        };

        let name = self.take(a, name_len as usize)?;
        let link_len = self.take(a, 4)?;
        let link_len = u32::from_le_bytes([link_len[0], link_len[1], link_len[2], link_len[3]]);
        let link = self.take(a, link_len as usize)?;

        self.remaining = size;
        Ok(Some(Box::new(LoopEntry {
            pathname: CString::new(name).ok(),
            symlink: if link.is_empty() {
                None
            } else {
                CString::new(link).ok()
            },
            filetype,
            perm,
            size: size as i64,
            secs,
            nanos: i64::from(nanos),
        })))
    }

    /// Hands buffered output to the sink, looping over short writes.
    unsafe fn flush(&mut self, a: *mut RawArchive) -> Result<(), c_int> {
        while !self.out.is_empty() {
            let n = match &mut self.output {
                Output::None => {
                    return Err(self.fail(libc::EINVAL, "archive is not open", status::FATAL))
                }
                Output::Callbacks { token, write, .. } => {
                    (*write)(a, *token, self.out.as_ptr().cast(), self.out.len())
                }
                Output::File(file) => match file.write(&self.out) {
                    Ok(n) => n as isize,
                    Err(_) => -1,
                },
            };
            if n <= 0 {
                return Err(self.fail(libc::EIO, "write callback failed", status::FATAL));
            }
            self.out.drain(..(n as usize).min(self.out.len()));
        }
        Ok(())
    }

    unsafe fn maybe_flush(&mut self, a: *mut RawArchive) -> Result<(), c_int> {
        if self.out.len() >= FLUSH_BLOCK {
            self.flush(a)?;
        }
        Ok(())
    }

    fn finish_entry(&mut self) {
        let pad = self.remaining as usize;
        self.out.resize(self.out.len() + pad, 0);
        self.remaining = 0;
        self.header_open = false;
    }

    unsafe fn close(&mut self, a: *mut RawArchive) -> c_int {
        if self.closed {
            return status::OK;
        }
        self.closed = true;

        if matches!(self.output, Output::None) {
            return status::OK;
        }

        if self.header_open {
            self.finish_entry();
        }
        self.out.push(TAG_END);
        let flushed = self.flush(a);

        let closed = match &mut self.output {
            Output::Callbacks {
                token,
                close: Some(close),
                ..
            } => (*close)(a, *token),
            Output::File(file) => match file.flush() {
                Ok(()) => status::OK,
                Err(_) => status::FATAL,
            },
            _ => status::OK,
        };

        match flushed {
            Err(status) => status,
            Ok(()) if closed != status::OK => {
                self.fail(libc::EIO, "close callback failed", status::FATAL)
            }
            Ok(()) => status::OK,
        }
    }
}

#[inline(always)]
unsafe fn session<'a>(a: *mut RawArchive) -> &'a mut Session {
    &mut *a.cast::<Session>()
}

#[inline(always)]
unsafe fn entry<'a>(e: *mut RawEntry) -> &'a mut LoopEntry {
    &mut *e.cast::<LoopEntry>()
}

unsafe fn new_session() -> *mut RawArchive {
    if FAIL_NEXT_NEW.with(|c| c.replace(false)) {
        return std::ptr::null_mut();
    }
    Box::into_raw(Box::new(Session::new())).cast()
}

unsafe fn free_session(a: *mut RawArchive) {
    FREES.with(|c| c.set(c.get() + 1));
    drop(Box::from_raw(a.cast::<Session>()));
}

unsafe fn cstring(ptr: *const c_char) -> Option<CString> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_owned())
    }
}

fn as_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map(|x| x.as_ptr()).unwrap_or(std::ptr::null())
}

unsafe impl Engine for Loopback {
    unsafe fn read_new() -> *mut RawArchive {
        new_session()
    }

    unsafe fn read_support_filter_all(_a: *mut RawArchive) -> c_int {
        status::OK
    }

    unsafe fn read_support_format_all(_a: *mut RawArchive) -> c_int {
        status::OK
    }

    unsafe fn read_add_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int {
        if passphrase.is_null() || *passphrase == 0 {
            return session(a).fail(libc::EINVAL, "Empty passphrase is unacceptable", status::FAILED);
        }
        status::OK
    }

    unsafe fn read_set_seek_callback(a: *mut RawArchive, seek: Option<SeekCallback>) -> c_int {
        session(a).seek = seek;
        status::OK
    }

    unsafe fn read_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        read: Option<ReadCallback>,
        close: Option<CloseCallback>,
    ) -> c_int {
        let s = session(a);
        let read = match read {
            Some(read) => read,
            None => return s.fail(libc::EINVAL, "No reader function provided", status::FATAL),
        };

        if let Some(open) = open {
            if open(a, token) != status::OK {
                return s.fail(libc::EIO, "open callback failed", status::FATAL);
            }
        }

        if take_flag(&FAIL_NEXT_OPEN) {
            return s.fail(libc::EIO, "stream rejected after open", status::FATAL);
        }

        // Probe the size of seekable streams the way seeking format readers do.
        if let Some(seek) = s.seek {
            SEEKS.with(|c| c.set(c.get() + 2));
            if seek(a, token, 0, libc::SEEK_END) < 0 || seek(a, token, 0, libc::SEEK_SET) != 0 {
                return s.fail(libc::EIO, "seek callback failed", status::FATAL);
            }
        }

        s.input = Input::Callbacks { token, read, close };

        // Read ahead for format detection, as libarchive does during open.
        match s.pull(a) {
            Ok(_) => status::OK,
            Err(status) => status,
        }
    }

    unsafe fn read_open_filename(
        a: *mut RawArchive,
        path: *const c_char,
        _block_size: size_t,
    ) -> c_int {
        let s = session(a);
        let path = match CStr::from_ptr(path).to_str() {
            Ok(path) => path,
            Err(_) => return s.fail(libc::EINVAL, "path is not UTF-8", status::FATAL),
        };
        match std::fs::File::open(path) {
            Ok(file) => {
                s.input = Input::File(file);
                status::OK
            }
            Err(e) => {
                let message = format!("Failed to open '{}'", path);
                s.fail(e.raw_os_error().unwrap_or(libc::EIO), &message, status::FATAL)
            }
        }
    }

    unsafe fn read_open_memory(a: *mut RawArchive, buf: *const c_void, len: size_t) -> c_int {
        session(a).input = Input::Memory {
            ptr: buf.cast(),
            len,
            pos: 0,
        };
        status::OK
    }

    unsafe fn read_next_header(a: *mut RawArchive, out: *mut *mut RawEntry) -> c_int {
        let s = session(a);
        match s.next_header(a) {
            Ok(Some(header)) => {
                let header = s.current.insert(header);
                *out = (&mut **header as *mut LoopEntry).cast();
                status::OK
            }
            Ok(None) => status::EOF,
            Err(status) => status,
        }
    }

    unsafe fn read_data(a: *mut RawArchive, buf: *mut c_void, len: size_t) -> isize {
        let s = session(a);
        if s.remaining == 0 || len == 0 {
            return 0;
        }
        if take_flag(&WARN_NEXT_DATA) {
            return s.fail(0, "damaged block, data kept", status::WARN) as isize;
        }
        if s.pending.is_empty() {
            match s.pull(a) {
                Ok(true) => {}
                Ok(false) => {
                    return s.fail(libc::EILSEQ, "truncated entry data", status::FATAL) as isize
                }
                Err(status) => return status as isize,
            }
        }

        let n = (s.pending.len() as u64).min(s.remaining).min(len as u64) as usize;
        std::ptr::copy_nonoverlapping(s.pending.as_ptr(), buf.cast::<u8>(), n);
        s.pending.drain(..n);
        s.remaining -= n as u64;
        n as isize
    }

    unsafe fn read_data_skip(a: *mut RawArchive) -> c_int {
        match session(a).skip_remaining(a) {
            Ok(()) => status::OK,
            Err(status) => status,
        }
    }

    unsafe fn read_free(a: *mut RawArchive) -> c_int {
        let s = session(a);
        if let Input::Callbacks {
            token,
            close: Some(close),
            ..
        } = s.input
        {
            close(a, token);
        }
        free_session(a);
        status::OK
    }

    unsafe fn write_new() -> *mut RawArchive {
        new_session()
    }

    unsafe fn write_set_format(a: *mut RawArchive, code: c_int) -> c_int {
        match code & 0xff0000 {
            0x10000 | 0x30000 | 0x40000 | 0x50000 | 0x90000 | 0xA0000 | 0xE0000 => status::OK,
            _ => session(a).fail(libc::EINVAL, "No such format", status::FATAL),
        }
    }

    unsafe fn write_add_filter(a: *mut RawArchive, code: c_int) -> c_int {
        match code {
            0..=14 => status::OK,
            _ => session(a).fail(libc::EINVAL, "No such filter", status::FATAL),
        }
    }

    unsafe fn write_set_options(a: *mut RawArchive, options: *const c_char) -> c_int {
        match cstring(options).and_then(|x| x.into_string().ok()) {
            Some(options) => {
                OPTIONS.with(|c| c.borrow_mut().push(options));
                status::OK
            }
            None => session(a).fail(libc::EINVAL, "bad option string", status::FAILED),
        }
    }

    unsafe fn write_set_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int {
        if passphrase.is_null() || *passphrase == 0 {
            return session(a).fail(libc::EINVAL, "Empty passphrase is unacceptable", status::FAILED);
        }
        status::OK
    }

    unsafe fn write_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        write: Option<WriteCallback>,
        close: Option<CloseCallback>,
    ) -> c_int {
        let s = session(a);
        let write = match write {
            Some(write) => write,
            None => return s.fail(libc::EINVAL, "No write callback is registered", status::FATAL),
        };

        if let Some(open) = open {
            if open(a, token) != status::OK {
                return s.fail(libc::EIO, "open callback failed", status::FATAL);
            }
        }

        if take_flag(&FAIL_NEXT_OPEN) {
            return s.fail(libc::EIO, "stream rejected after open", status::FATAL);
        }

        s.output = Output::Callbacks { token, write, close };
        s.out.extend_from_slice(MAGIC);
        status::OK
    }

    unsafe fn write_open_filename(a: *mut RawArchive, path: *const c_char) -> c_int {
        let s = session(a);
        let path = match CStr::from_ptr(path).to_str() {
            Ok(path) => path,
            Err(_) => return s.fail(libc::EINVAL, "path is not UTF-8", status::FATAL),
        };
        match std::fs::File::create(path) {
            Ok(file) => {
                s.output = Output::File(file);
                s.out.extend_from_slice(MAGIC);
                status::OK
            }
            Err(e) => {
                let message = format!("Failed to open '{}'", path);
                s.fail(e.raw_os_error().unwrap_or(libc::EIO), &message, status::FATAL)
            }
        }
    }

    unsafe fn write_header(a: *mut RawArchive, e: *mut RawEntry) -> c_int {
        let s = session(a);
        if s.closed || matches!(s.output, Output::None) {
            return s.fail(libc::EINVAL, "archive is not open for writing", status::FATAL);
        }
        if s.header_open {
            s.finish_entry();
        }

        let header = entry(e);
        if header.pathname.is_none() {
            return s.fail(libc::EINVAL, "Can't record entry without a pathname", status::FAILED);
        }
        header.encode(&mut s.out);
        s.remaining = header.data_size();
        s.header_open = true;

        match s.maybe_flush(a) {
            Ok(()) => status::OK,
            Err(status) => status,
        }
    }

    unsafe fn write_data(a: *mut RawArchive, buf: *const c_void, len: size_t) -> isize {
        let s = session(a);
        if !s.header_open {
            return s.fail(libc::EINVAL, "no entry is open", status::FATAL) as isize;
        }

        let limit = WRITE_DATA_LIMIT.with(|c| c.get());
        let n = (len as u64).min(s.remaining).min(limit as u64) as usize;
        let data = std::slice::from_raw_parts(buf.cast::<u8>(), n);
        s.out.extend_from_slice(data);
        s.remaining -= n as u64;

        match s.maybe_flush(a) {
            Ok(()) => n as isize,
            Err(status) => status as isize,
        }
    }

    unsafe fn write_finish_entry(a: *mut RawArchive) -> c_int {
        let s = session(a);
        if s.header_open {
            s.finish_entry();
        }
        match s.maybe_flush(a) {
            Ok(()) => status::OK,
            Err(status) => status,
        }
    }

    unsafe fn write_close(a: *mut RawArchive) -> c_int {
        session(a).close(a)
    }

    unsafe fn write_free(a: *mut RawArchive) -> c_int {
        let status = session(a).close(a);
        free_session(a);
        if status == status::OK {
            status::OK
        } else {
            status::FATAL
        }
    }

    unsafe fn error_string(a: *mut RawArchive) -> *const c_char {
        match &session(a).error {
            Some((_, message)) => message.as_ptr(),
            None => std::ptr::null(),
        }
    }

    unsafe fn errno(a: *mut RawArchive) -> c_int {
        session(a).error.as_ref().map(|(errno, _)| *errno).unwrap_or(0)
    }

    unsafe fn entry_new(_a: *mut RawArchive) -> *mut RawEntry {
        Box::into_raw(Box::<LoopEntry>::default()).cast()
    }

    unsafe fn entry_free(e: *mut RawEntry) {
        drop(Box::from_raw(e.cast::<LoopEntry>()));
    }

    unsafe fn entry_pathname(e: *mut RawEntry) -> *const c_char {
        match &entry(e).pathname {
            Some(name) if name.to_str().is_ok() => name.as_ptr(),
            _ => std::ptr::null(),
        }
    }

    unsafe fn entry_pathname_raw(e: *mut RawEntry) -> *const c_char {
        as_ptr(&entry(e).pathname)
    }

    unsafe fn entry_set_pathname(e: *mut RawEntry, name: *const c_char) {
        entry(e).pathname = cstring(name);
    }

    unsafe fn entry_symlink(e: *mut RawEntry) -> *const c_char {
        as_ptr(&entry(e).symlink)
    }

    unsafe fn entry_set_symlink(e: *mut RawEntry, target: *const c_char) {
        entry(e).symlink = cstring(target);
    }

    unsafe fn entry_filetype(e: *mut RawEntry) -> u32 {
        entry(e).filetype
    }

    unsafe fn entry_set_filetype(e: *mut RawEntry, filetype: u32) {
        entry(e).filetype = filetype;
    }

    unsafe fn entry_perm(e: *mut RawEntry) -> u32 {
        entry(e).perm
    }

    unsafe fn entry_set_perm(e: *mut RawEntry, perm: u32) {
        entry(e).perm = perm;
    }

    unsafe fn entry_size(e: *mut RawEntry) -> i64 {
        entry(e).size
    }

    unsafe fn entry_set_size(e: *mut RawEntry, size: i64) {
        entry(e).size = size;
    }

    unsafe fn entry_mtime(e: *mut RawEntry) -> (i64, i64) {
        let e = entry(e);
        (e.secs, e.nanos)
    }

    unsafe fn entry_set_mtime(e: *mut RawEntry, secs: i64, nanos: i64) {
        let e = entry(e);
        e.secs = secs;
        e.nanos = nanos;
    }

    unsafe fn version_string() -> *const c_char {
        b"loopback 1.0\0".as_ptr().cast()
    }

    unsafe fn zlib_version() -> *const c_char {
        std::ptr::null()
    }

    unsafe fn liblzma_version() -> *const c_char {
        std::ptr::null()
    }

    unsafe fn bzlib_version() -> *const c_char {
        std::ptr::null()
    }

    unsafe fn liblz4_version() -> *const c_char {
        std::ptr::null()
    }

    unsafe fn libzstd_version() -> *const c_char {
        std::ptr::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::versions;

    #[test]
    fn versions_report_missing_codecs() {
        let v = versions::<Loopback>();
        assert_eq!(v.engine.as_deref(), Some("loopback 1.0"));
        assert!(!v.all_codecs_linked());
    }

    #[test]
    fn memory_input_parses_frames() {
        let data = encode(&[("a.txt", b"abc"), ("b.txt", b"")]);
        unsafe {
            let a = Loopback::read_new();
            assert_eq!(
                Loopback::read_open_memory(a, data.as_ptr().cast(), data.len()),
                status::OK
            );
            let mut e = std::ptr::null_mut();
            assert_eq!(Loopback::read_next_header(a, &mut e), status::OK);
            assert_eq!(Loopback::entry_size(e), 3);
            // Skipped implicitly by the next header.
            assert_eq!(Loopback::read_next_header(a, &mut e), status::OK);
            assert_eq!(Loopback::entry_size(e), 0);
            assert_eq!(Loopback::read_next_header(a, &mut e), status::EOF);
            assert_eq!(Loopback::read_free(a), status::OK);
        }
    }

    #[test]
    fn garbage_is_a_fatal_error_with_message() {
        let data = b"not an archive".to_vec();
        unsafe {
            let a = Loopback::read_new();
            Loopback::read_open_memory(a, data.as_ptr().cast(), data.len());
            let mut e = std::ptr::null_mut();
            assert_eq!(Loopback::read_next_header(a, &mut e), status::FATAL);
            let message = CStr::from_ptr(Loopback::error_string(a));
            assert_eq!(message.to_str().unwrap(), "Unrecognized archive format");
            Loopback::read_free(a);
        }
    }
}
