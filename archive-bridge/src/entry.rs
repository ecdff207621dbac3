use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::engine::{filetype, string_from_ptr, Engine, RawEntry};

/// Default mode for files (rw-r--r--)
pub const DEFAULT_FILE_PERM: u32 = 0o644;
/// Default mode for directories and links (rwxr-xr-x)
pub const DEFAULT_DIR_PERM: u32 = 0o755;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Any other file type, carrying the raw type bits.
    Other(u32),
}

impl EntryKind {
    pub fn from_filetype(bits: u32) -> EntryKind {
        match bits & filetype::MASK {
            filetype::REGULAR => EntryKind::File,
            filetype::DIRECTORY => EntryKind::Directory,
            filetype::SYMLINK => EntryKind::Symlink,
            other => EntryKind::Other(other),
        }
    }

    pub fn filetype(self) -> u32 {
        match self {
            EntryKind::File => filetype::REGULAR,
            EntryKind::Directory => filetype::DIRECTORY,
            EntryKind::Symlink => filetype::SYMLINK,
            EntryKind::Other(bits) => bits & filetype::MASK,
        }
    }
}

/// Modification time as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ModifiedTime {
    pub secs: i64,
    pub nanos: u32,
}

impl ModifiedTime {
    pub fn new(secs: i64, nanos: u32) -> ModifiedTime {
        ModifiedTime {
            secs: secs.saturating_add(i64::from(nanos / 1_000_000_000)),
            nanos: nanos % 1_000_000_000,
        }
    }

    pub fn now() -> ModifiedTime {
        ModifiedTime::from(SystemTime::now())
    }

    /// `None` when the platform clock cannot represent the time.
    pub fn to_system_time(self) -> Option<SystemTime> {
        let nanos = Duration::from_nanos(u64::from(self.nanos));
        if self.secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_secs(self.secs as u64))?.checked_add(nanos)
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(self.secs.unsigned_abs()))?
                .checked_add(nanos)
        }
    }
}

impl From<SystemTime> for ModifiedTime {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => ModifiedTime::new(since.as_secs() as i64, since.subsec_nanos()),
            Err(err) => {
                let before = err.duration();
                let mut secs = -(before.as_secs() as i64);
                let mut nanos = before.subsec_nanos();
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                ModifiedTime::new(secs, nanos)
            }
        }
    }
}

/// Metadata of the entry under the cursor.
///
/// A descriptor is a snapshot of the header, but its data can only be read
/// while it is still the cursor's current entry.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntryDescriptor {
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
    pub(crate) size: u64,
    pub(crate) permissions: u32,
    pub(crate) modified: ModifiedTime,
    pub(crate) symlink: Option<String>,
    pub(crate) position: u64,
}

impl EntryDescriptor {
    /// # Safety
    /// `entry` must be the live header returned by the engine's last `read_next_header`.
    pub(crate) unsafe fn from_raw<E: Engine>(entry: *mut RawEntry, position: u64) -> EntryDescriptor {
        // The UTF-8 accessor is null when the stored name has no UTF-8 form,
        // common for tar names in a legacy locale.
        let name = match string_from_ptr(E::entry_pathname(entry)) {
            Some(name) => name,
            None => match string_from_ptr(E::entry_pathname_raw(entry)) {
                Some(name) => {
                    tracing::debug!(position, %name, "entry pathname is not UTF-8, decoded lossily");
                    name
                }
                None => {
                    tracing::warn!(position, "entry has no pathname");
                    String::new()
                }
            },
        };
        let kind = EntryKind::from_filetype(E::entry_filetype(entry));
        let (secs, nanos) = E::entry_mtime(entry);
        let symlink = match kind {
            EntryKind::Symlink => string_from_ptr(E::entry_symlink(entry)),
            _ => None,
        };

        EntryDescriptor {
            name,
            kind,
            size: E::entry_size(entry).max(0) as u64,
            permissions: E::entry_perm(entry) & 0o7777,
            modified: ModifiedTime::new(secs, nanos.clamp(0, 999_999_999) as u32),
            symlink,
            position,
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    #[inline(always)]
    pub fn modified(&self) -> ModifiedTime {
        self.modified
    }

    #[inline(always)]
    pub fn symlink_target(&self) -> Option<&str> {
        self.symlink.as_deref()
    }

    #[inline(always)]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    #[inline(always)]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Header of an entry about to be written.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntryHeader {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub permissions: u32,
    pub modified: ModifiedTime,
    pub symlink: Option<String>,
}

impl EntryHeader {
    pub fn file<S: Into<String>>(name: S, size: u64) -> EntryHeader {
        EntryHeader {
            name: name.into(),
            kind: EntryKind::File,
            size,
            permissions: DEFAULT_FILE_PERM,
            modified: ModifiedTime::now(),
            symlink: None,
        }
    }

    pub fn directory<S: Into<String>>(name: S) -> EntryHeader {
        EntryHeader {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
            permissions: DEFAULT_DIR_PERM,
            modified: ModifiedTime::now(),
            symlink: None,
        }
    }

    pub fn symlink<S: Into<String>, T: Into<String>>(name: S, target: T) -> EntryHeader {
        EntryHeader {
            name: name.into(),
            kind: EntryKind::Symlink,
            size: 0,
            permissions: DEFAULT_DIR_PERM,
            modified: ModifiedTime::now(),
            symlink: Some(target.into()),
        }
    }

    /// Builds a header from filesystem metadata. Only the type, size, mode and
    /// modification time are carried over.
    pub fn from_metadata<S: Into<String>>(name: S, meta: &std::fs::Metadata) -> EntryHeader {
        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        EntryHeader {
            name: name.into(),
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            permissions: permissions_of(meta, kind),
            modified: meta.modified().map(ModifiedTime::from).unwrap_or_default(),
            symlink: None,
        }
    }

    pub fn with_permissions(mut self, permissions: u32) -> EntryHeader {
        self.permissions = permissions & 0o7777;
        self
    }

    pub fn with_modified(mut self, modified: ModifiedTime) -> EntryHeader {
        self.modified = modified;
        self
    }
}

#[cfg(unix)]
fn permissions_of(meta: &std::fs::Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions_of(meta: &std::fs::Metadata, kind: EntryKind) -> u32 {
    let base = match kind {
        EntryKind::File => DEFAULT_FILE_PERM,
        _ => DEFAULT_DIR_PERM,
    };
    if meta.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}
