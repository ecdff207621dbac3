use std::fmt;
use std::path::{Component, Path};

use unic_normal::StrNormalForm;
use unic_ucd::GeneralCategory;

/// The separator used between components of an entry name, on every platform.
pub const ENTRY_PATH_SEP: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntoEntryPathError {
    #[error("path component {0:?} cannot be stored as an entry name")]
    BadComponent(String),
    #[error("path has no components left once normalised")]
    EmptyPath,
}

/// A relative, normalised entry name derived from a filesystem path.
///
/// Names never start with a separator, never contain `.` or `..` components,
/// use `/` between components and are NFC-normalised.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntryPath(String);

/// Trims one component and rejects anything a header name can't carry:
/// control characters (NUL included), backslashes, non-space separators.
fn clean_component(raw: &std::ffi::OsStr) -> Result<String, IntoEntryPathError> {
    let bad = || IntoEntryPathError::BadComponent(raw.to_string_lossy().into_owned());
    let text = raw.to_str().ok_or_else(bad)?.trim();

    let forbidden = |c: char| match GeneralCategory::of(c) {
        GeneralCategory::Control => true,
        cat if cat.is_separator() => c != ' ',
        _ => c == '\\',
    };
    if text.is_empty() || text.contains(forbidden) {
        return Err(bad());
    }

    Ok(text.nfc().collect())
}

impl EntryPath {
    /// Resolves `.` and `..` lexically, drops roots and prefixes, and
    /// validates what is left.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<EntryPath, IntoEntryPathError> {
        let mut parts: Vec<String> = Vec::new();

        for component in path.as_ref().components() {
            match component {
                Component::Normal(raw) => parts.push(clean_component(raw)?),
                Component::ParentDir => {
                    parts.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        if parts.is_empty() {
            return Err(IntoEntryPathError::EmptyPath);
        }

        let mut name = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                name.push(ENTRY_PATH_SEP);
            }
            name.push_str(part);
        }
        Ok(EntryPath(name))
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn parent(&self) -> Option<EntryPath> {
        self.0
            .rsplit_once(ENTRY_PATH_SEP)
            .map(|(parent, _)| EntryPath(parent.to_owned()))
    }

    pub fn filename(&self) -> &str {
        self.0
            .rsplit_once(ENTRY_PATH_SEP)
            .map_or(self.0.as_str(), |(_, name)| name)
    }

    /// Number of directories above this entry.
    pub fn depth(&self) -> usize {
        self.0.matches(ENTRY_PATH_SEP).count()
    }

    pub fn join<P: AsRef<Path>>(&self, tail: P) -> Result<EntryPath, IntoEntryPathError> {
        EntryPath::new(Path::new(&self.0).join(tail))
    }
}

impl AsRef<str> for EntryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
