//! The native archive engine surface.
//!
//! Everything the bridges need from the engine is expressed by the [`Engine`]
//! trait, which mirrors the subset of the libarchive C API used by this crate.
//! Methods take and return raw pointers exactly as the C functions do; the safe
//! layer lives in [`crate::handle`], [`crate::reader`] and [`crate::writer`].

use std::ffi::{CStr, CString};

use libc::{c_char, c_int, c_void, size_t};

#[cfg(feature = "libarchive")]
mod libarchive;
#[cfg(test)]
pub(crate) mod loopback;

#[cfg(feature = "libarchive")]
pub use self::libarchive::Libarchive;

/// Status codes returned by engine calls.
pub mod status {
    use libc::c_int;

    pub const OK: c_int = 0;
    pub const EOF: c_int = 1;
    pub const RETRY: c_int = -10;
    pub const WARN: c_int = -20;
    pub const FAILED: c_int = -25;
    pub const FATAL: c_int = -30;
}

/// File type bits as stored in an entry's mode.
pub mod filetype {
    pub const MASK: u32 = 0o170000;
    pub const REGULAR: u32 = 0o100000;
    pub const SYMLINK: u32 = 0o120000;
    pub const SOCKET: u32 = 0o140000;
    pub const CHARACTER: u32 = 0o020000;
    pub const BLOCK: u32 = 0o060000;
    pub const DIRECTORY: u32 = 0o040000;
    pub const FIFO: u32 = 0o010000;
}

/// Opaque native session.
#[repr(C)]
pub struct RawArchive {
    _private: [u8; 0],
}

/// Opaque native entry header.
#[repr(C)]
pub struct RawEntry {
    _private: [u8; 0],
}

pub type OpenCallback = unsafe extern "C" fn(*mut RawArchive, *mut c_void) -> c_int;
pub type CloseCallback = unsafe extern "C" fn(*mut RawArchive, *mut c_void) -> c_int;
pub type ReadCallback =
    unsafe extern "C" fn(*mut RawArchive, *mut c_void, *mut *const c_void) -> isize;
pub type WriteCallback =
    unsafe extern "C" fn(*mut RawArchive, *mut c_void, *const c_void, size_t) -> isize;
pub type SeekCallback = unsafe extern "C" fn(*mut RawArchive, *mut c_void, i64, c_int) -> i64;

/// The native archive engine.
///
/// # Safety
///
/// Implementors must behave like libarchive with respect to the callback ABI:
/// the client token is passed through unchanged, callbacks are invoked
/// synchronously from within the engine call that needs them, and no callback
/// is invoked after `read_free`/`write_free` returns. Entry pointers returned by
/// `read_next_header` stay valid until the next call on the same session.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait Engine: 'static {
    unsafe fn read_new() -> *mut RawArchive;
    unsafe fn read_support_filter_all(a: *mut RawArchive) -> c_int;
    unsafe fn read_support_format_all(a: *mut RawArchive) -> c_int;
    unsafe fn read_add_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int;
    unsafe fn read_set_seek_callback(a: *mut RawArchive, seek: Option<SeekCallback>) -> c_int;
    unsafe fn read_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        read: Option<ReadCallback>,
        close: Option<CloseCallback>,
    ) -> c_int;
    unsafe fn read_open_filename(
        a: *mut RawArchive,
        path: *const c_char,
        block_size: size_t,
    ) -> c_int;
    unsafe fn read_open_memory(a: *mut RawArchive, buf: *const c_void, len: size_t) -> c_int;
    unsafe fn read_next_header(a: *mut RawArchive, entry: *mut *mut RawEntry) -> c_int;
    unsafe fn read_data(a: *mut RawArchive, buf: *mut c_void, len: size_t) -> isize;
    unsafe fn read_data_skip(a: *mut RawArchive) -> c_int;
    unsafe fn read_free(a: *mut RawArchive) -> c_int;

    unsafe fn write_new() -> *mut RawArchive;
    unsafe fn write_set_format(a: *mut RawArchive, code: c_int) -> c_int;
    unsafe fn write_add_filter(a: *mut RawArchive, code: c_int) -> c_int;
    unsafe fn write_set_options(a: *mut RawArchive, options: *const c_char) -> c_int;
    unsafe fn write_set_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int;
    unsafe fn write_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        write: Option<WriteCallback>,
        close: Option<CloseCallback>,
    ) -> c_int;
    unsafe fn write_open_filename(a: *mut RawArchive, path: *const c_char) -> c_int;
    unsafe fn write_header(a: *mut RawArchive, entry: *mut RawEntry) -> c_int;
    unsafe fn write_data(a: *mut RawArchive, buf: *const c_void, len: size_t) -> isize;
    unsafe fn write_finish_entry(a: *mut RawArchive) -> c_int;
    unsafe fn write_close(a: *mut RawArchive) -> c_int;
    unsafe fn write_free(a: *mut RawArchive) -> c_int;

    unsafe fn error_string(a: *mut RawArchive) -> *const c_char;
    unsafe fn errno(a: *mut RawArchive) -> c_int;

    unsafe fn entry_new(a: *mut RawArchive) -> *mut RawEntry;
    unsafe fn entry_free(entry: *mut RawEntry);
    /// The pathname as UTF-8, or null when it has no UTF-8 form.
    unsafe fn entry_pathname(entry: *mut RawEntry) -> *const c_char;
    /// The pathname in whatever encoding the archive stored.
    unsafe fn entry_pathname_raw(entry: *mut RawEntry) -> *const c_char;
    unsafe fn entry_set_pathname(entry: *mut RawEntry, name: *const c_char);
    unsafe fn entry_symlink(entry: *mut RawEntry) -> *const c_char;
    unsafe fn entry_set_symlink(entry: *mut RawEntry, target: *const c_char);
    unsafe fn entry_filetype(entry: *mut RawEntry) -> u32;
    unsafe fn entry_set_filetype(entry: *mut RawEntry, filetype: u32);
    unsafe fn entry_perm(entry: *mut RawEntry) -> u32;
    unsafe fn entry_set_perm(entry: *mut RawEntry, perm: u32);
    unsafe fn entry_size(entry: *mut RawEntry) -> i64;
    unsafe fn entry_set_size(entry: *mut RawEntry, size: i64);
    unsafe fn entry_mtime(entry: *mut RawEntry) -> (i64, i64);
    unsafe fn entry_set_mtime(entry: *mut RawEntry, secs: i64, nanos: i64);

    unsafe fn version_string() -> *const c_char;
    unsafe fn zlib_version() -> *const c_char;
    unsafe fn liblzma_version() -> *const c_char;
    unsafe fn bzlib_version() -> *const c_char;
    unsafe fn liblz4_version() -> *const c_char;
    unsafe fn libzstd_version() -> *const c_char;
}

/// Output formats understood by [`Engine::write_set_format`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ArchiveFormat {
    Tar,
    Ustar,
    PaxRestricted,
    Pax,
    GnuTar,
    Cpio,
    Zip,
    SevenZip,
    Iso9660,
    Xar,
    Raw,
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        ArchiveFormat::PaxRestricted
    }
}

impl ArchiveFormat {
    pub const fn code(self) -> c_int {
        use ArchiveFormat::*;

        match self {
            Tar => 0x30000,
            Ustar => 0x30001,
            Pax => 0x30002,
            PaxRestricted => 0x30003,
            GnuTar => 0x30004,
            Cpio => 0x10001,
            Iso9660 => 0x40000,
            Zip => 0x50000,
            Raw => 0x90000,
            Xar => 0xA0000,
            SevenZip => 0xE0000,
        }
    }

    /// Whether the engine can protect entries of this format with a passphrase.
    pub const fn supports_encryption(self) -> bool {
        matches!(self, ArchiveFormat::Zip | ArchiveFormat::SevenZip)
    }
}

/// Compression filters applied around the whole archive stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Filter {
    None,
    Gzip,
    Bzip2,
    Compress,
    Lzma,
    Xz,
    Lz4,
    Zstd,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::None
    }
}

impl Filter {
    pub const fn code(self) -> c_int {
        use Filter::*;

        match self {
            None => 0,
            Gzip => 1,
            Bzip2 => 2,
            Compress => 3,
            Lzma => 5,
            Xz => 6,
            Lz4 => 13,
            Zstd => 14,
        }
    }
}

/// Versions of the engine and the codec libraries it was built against.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Versions {
    pub engine: Option<String>,
    pub zlib: Option<String>,
    pub liblzma: Option<String>,
    pub bzlib: Option<String>,
    pub liblz4: Option<String>,
    pub libzstd: Option<String>,
}

impl Versions {
    /// True when every codec library reports a version.
    pub fn all_codecs_linked(&self) -> bool {
        self.zlib.is_some()
            && self.liblzma.is_some()
            && self.bzlib.is_some()
            && self.liblz4.is_some()
            && self.libzstd.is_some()
    }
}

pub fn versions<E: Engine>() -> Versions {
    // SAFETY: the version accessors return static strings or null.
    unsafe {
        Versions {
            engine: string_from_ptr(E::version_string()),
            zlib: string_from_ptr(E::zlib_version()),
            liblzma: string_from_ptr(E::liblzma_version()),
            bzlib: string_from_ptr(E::bzlib_version()),
            liblz4: string_from_ptr(E::liblz4_version()),
            libzstd: string_from_ptr(E::libzstd_version()),
        }
    }
}

/// Converts a filesystem path into the nul-terminated form the engine expects.
pub(crate) fn cstring_from_path(path: &std::path::Path) -> crate::Result<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path
        .to_str()
        .ok_or_else(|| crate::Error::Config(format!("path is not UTF-8: {}", path.display())))?
        .as_bytes()
        .to_vec();

    CString::new(bytes)
        .map_err(|_| crate::Error::Config(format!("path contains a nul byte: {}", path.display())))
}

/// Copies a nul-terminated engine string, lossily decoding invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a nul-terminated string valid for the call.
pub(crate) unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}
