use libc::{c_char, c_int, c_long, c_uint, c_void, size_t, time_t};

use super::{
    CloseCallback, Engine, OpenCallback, RawArchive, RawEntry, ReadCallback, SeekCallback,
    WriteCallback,
};

#[cfg(not(windows))]
type LaMode = libc::mode_t;
#[cfg(windows)]
type LaMode = libc::c_ushort;

#[link(name = "archive")]
extern "C" {
    fn archive_read_new() -> *mut RawArchive;
    fn archive_read_support_filter_all(a: *mut RawArchive) -> c_int;
    fn archive_read_support_format_all(a: *mut RawArchive) -> c_int;
    fn archive_read_add_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int;
    fn archive_read_set_seek_callback(a: *mut RawArchive, seek: Option<SeekCallback>) -> c_int;
    fn archive_read_open(
        a: *mut RawArchive,
        client_data: *mut c_void,
        open: Option<OpenCallback>,
        read: Option<ReadCallback>,
        close: Option<CloseCallback>,
    ) -> c_int;
    fn archive_read_open_filename(
        a: *mut RawArchive,
        filename: *const c_char,
        block_size: size_t,
    ) -> c_int;
    fn archive_read_open_memory(a: *mut RawArchive, buf: *const c_void, size: size_t) -> c_int;
    fn archive_read_next_header(a: *mut RawArchive, entry: *mut *mut RawEntry) -> c_int;
    fn archive_read_data(a: *mut RawArchive, buf: *mut c_void, size: size_t) -> isize;
    fn archive_read_data_skip(a: *mut RawArchive) -> c_int;
    fn archive_read_free(a: *mut RawArchive) -> c_int;

    fn archive_write_new() -> *mut RawArchive;
    fn archive_write_set_format(a: *mut RawArchive, code: c_int) -> c_int;
    fn archive_write_add_filter(a: *mut RawArchive, code: c_int) -> c_int;
    fn archive_write_set_options(a: *mut RawArchive, options: *const c_char) -> c_int;
    fn archive_write_set_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int;
    fn archive_write_open(
        a: *mut RawArchive,
        client_data: *mut c_void,
        open: Option<OpenCallback>,
        write: Option<WriteCallback>,
        close: Option<CloseCallback>,
    ) -> c_int;
    fn archive_write_open_filename(a: *mut RawArchive, filename: *const c_char) -> c_int;
    fn archive_write_header(a: *mut RawArchive, entry: *mut RawEntry) -> c_int;
    fn archive_write_data(a: *mut RawArchive, buf: *const c_void, size: size_t) -> isize;
    fn archive_write_finish_entry(a: *mut RawArchive) -> c_int;
    fn archive_write_close(a: *mut RawArchive) -> c_int;
    fn archive_write_free(a: *mut RawArchive) -> c_int;

    fn archive_error_string(a: *mut RawArchive) -> *const c_char;
    fn archive_errno(a: *mut RawArchive) -> c_int;

    fn archive_entry_new2(a: *mut RawArchive) -> *mut RawEntry;
    fn archive_entry_free(entry: *mut RawEntry);
    fn archive_entry_pathname(entry: *mut RawEntry) -> *const c_char;
    fn archive_entry_pathname_utf8(entry: *mut RawEntry) -> *const c_char;
    fn archive_entry_set_pathname_utf8(entry: *mut RawEntry, name: *const c_char);
    fn archive_entry_symlink_utf8(entry: *mut RawEntry) -> *const c_char;
    fn archive_entry_set_symlink_utf8(entry: *mut RawEntry, target: *const c_char);
    fn archive_entry_filetype(entry: *mut RawEntry) -> LaMode;
    fn archive_entry_set_filetype(entry: *mut RawEntry, filetype: c_uint);
    fn archive_entry_perm(entry: *mut RawEntry) -> LaMode;
    fn archive_entry_set_perm(entry: *mut RawEntry, perm: LaMode);
    fn archive_entry_size(entry: *mut RawEntry) -> i64;
    fn archive_entry_set_size(entry: *mut RawEntry, size: i64);
    fn archive_entry_mtime(entry: *mut RawEntry) -> time_t;
    fn archive_entry_mtime_nsec(entry: *mut RawEntry) -> c_long;
    fn archive_entry_set_mtime(entry: *mut RawEntry, secs: time_t, nanos: c_long);

    fn archive_version_string() -> *const c_char;
    fn archive_zlib_version() -> *const c_char;
    fn archive_liblzma_version() -> *const c_char;
    fn archive_bzlib_version() -> *const c_char;
    fn archive_liblz4_version() -> *const c_char;
    fn archive_libzstd_version() -> *const c_char;
}

/// The system libarchive, linked as `-larchive`.
#[derive(Debug, Clone, Copy)]
pub enum Libarchive {}

unsafe impl Engine for Libarchive {
    unsafe fn read_new() -> *mut RawArchive {
        archive_read_new()
    }

    unsafe fn read_support_filter_all(a: *mut RawArchive) -> c_int {
        archive_read_support_filter_all(a)
    }

    unsafe fn read_support_format_all(a: *mut RawArchive) -> c_int {
        archive_read_support_format_all(a)
    }

    unsafe fn read_add_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int {
        archive_read_add_passphrase(a, passphrase)
    }

    unsafe fn read_set_seek_callback(a: *mut RawArchive, seek: Option<SeekCallback>) -> c_int {
        archive_read_set_seek_callback(a, seek)
    }

    unsafe fn read_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        read: Option<ReadCallback>,
        close: Option<CloseCallback>,
    ) -> c_int {
        archive_read_open(a, token, open, read, close)
    }

    unsafe fn read_open_filename(
        a: *mut RawArchive,
        path: *const c_char,
        block_size: size_t,
    ) -> c_int {
        archive_read_open_filename(a, path, block_size)
    }

    unsafe fn read_open_memory(a: *mut RawArchive, buf: *const c_void, len: size_t) -> c_int {
        archive_read_open_memory(a, buf, len)
    }

    unsafe fn read_next_header(a: *mut RawArchive, entry: *mut *mut RawEntry) -> c_int {
        archive_read_next_header(a, entry)
    }

    unsafe fn read_data(a: *mut RawArchive, buf: *mut c_void, len: size_t) -> isize {
        archive_read_data(a, buf, len)
    }

    unsafe fn read_data_skip(a: *mut RawArchive) -> c_int {
        archive_read_data_skip(a)
    }

    unsafe fn read_free(a: *mut RawArchive) -> c_int {
        archive_read_free(a)
    }

    unsafe fn write_new() -> *mut RawArchive {
        archive_write_new()
    }

    unsafe fn write_set_format(a: *mut RawArchive, code: c_int) -> c_int {
        archive_write_set_format(a, code)
    }

    unsafe fn write_add_filter(a: *mut RawArchive, code: c_int) -> c_int {
        archive_write_add_filter(a, code)
    }

    unsafe fn write_set_options(a: *mut RawArchive, options: *const c_char) -> c_int {
        archive_write_set_options(a, options)
    }

    unsafe fn write_set_passphrase(a: *mut RawArchive, passphrase: *const c_char) -> c_int {
        archive_write_set_passphrase(a, passphrase)
    }

    unsafe fn write_open(
        a: *mut RawArchive,
        token: *mut c_void,
        open: Option<OpenCallback>,
        write: Option<WriteCallback>,
        close: Option<CloseCallback>,
    ) -> c_int {
        archive_write_open(a, token, open, write, close)
    }

    unsafe fn write_open_filename(a: *mut RawArchive, path: *const c_char) -> c_int {
        archive_write_open_filename(a, path)
    }

    unsafe fn write_header(a: *mut RawArchive, entry: *mut RawEntry) -> c_int {
        archive_write_header(a, entry)
    }

    unsafe fn write_data(a: *mut RawArchive, buf: *const c_void, len: size_t) -> isize {
        archive_write_data(a, buf, len)
    }

    unsafe fn write_finish_entry(a: *mut RawArchive) -> c_int {
        archive_write_finish_entry(a)
    }

    unsafe fn write_close(a: *mut RawArchive) -> c_int {
        archive_write_close(a)
    }

    unsafe fn write_free(a: *mut RawArchive) -> c_int {
        archive_write_free(a)
    }

    unsafe fn error_string(a: *mut RawArchive) -> *const c_char {
        archive_error_string(a)
    }

    unsafe fn errno(a: *mut RawArchive) -> c_int {
        archive_errno(a)
    }

    unsafe fn entry_new(a: *mut RawArchive) -> *mut RawEntry {
        archive_entry_new2(a)
    }

    unsafe fn entry_free(entry: *mut RawEntry) {
        archive_entry_free(entry)
    }

    unsafe fn entry_pathname(entry: *mut RawEntry) -> *const c_char {
        archive_entry_pathname_utf8(entry)
    }

    unsafe fn entry_pathname_raw(entry: *mut RawEntry) -> *const c_char {
        archive_entry_pathname(entry)
    }

    unsafe fn entry_set_pathname(entry: *mut RawEntry, name: *const c_char) {
        archive_entry_set_pathname_utf8(entry, name)
    }

    unsafe fn entry_symlink(entry: *mut RawEntry) -> *const c_char {
        archive_entry_symlink_utf8(entry)
    }

    unsafe fn entry_set_symlink(entry: *mut RawEntry, target: *const c_char) {
        archive_entry_set_symlink_utf8(entry, target)
    }

    unsafe fn entry_filetype(entry: *mut RawEntry) -> u32 {
        archive_entry_filetype(entry) as u32
    }

    unsafe fn entry_set_filetype(entry: *mut RawEntry, filetype: u32) {
        archive_entry_set_filetype(entry, filetype as c_uint)
    }

    unsafe fn entry_perm(entry: *mut RawEntry) -> u32 {
        archive_entry_perm(entry) as u32
    }

    unsafe fn entry_set_perm(entry: *mut RawEntry, perm: u32) {
        archive_entry_set_perm(entry, perm as LaMode)
    }

    unsafe fn entry_size(entry: *mut RawEntry) -> i64 {
        archive_entry_size(entry)
    }

    unsafe fn entry_set_size(entry: *mut RawEntry, size: i64) {
        archive_entry_set_size(entry, size)
    }

    unsafe fn entry_mtime(entry: *mut RawEntry) -> (i64, i64) {
        (
            archive_entry_mtime(entry) as i64,
            archive_entry_mtime_nsec(entry) as i64,
        )
    }

    unsafe fn entry_set_mtime(entry: *mut RawEntry, secs: i64, nanos: i64) {
        archive_entry_set_mtime(entry, secs as time_t, nanos as c_long)
    }

    unsafe fn version_string() -> *const c_char {
        archive_version_string()
    }

    unsafe fn zlib_version() -> *const c_char {
        archive_zlib_version()
    }

    unsafe fn liblzma_version() -> *const c_char {
        archive_liblzma_version()
    }

    unsafe fn bzlib_version() -> *const c_char {
        archive_bzlib_version()
    }

    unsafe fn liblz4_version() -> *const c_char {
        archive_liblz4_version()
    }

    unsafe fn libzstd_version() -> *const c_char {
        archive_libzstd_version()
    }
}
