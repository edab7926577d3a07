//! Core type definitions for Tessera.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directory under the system temp dir that holds in-memory identifiers.
pub const IN_MEMORY_DIR: &str = "tessera-memory";

/// Identifier of an open handle.
///
/// Handle IDs are allocated by the runtime and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    /// Creates a new handle ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0)
    }
}

/// Identifier of a registered listener within one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

/// Identifier of a live enumerator within one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumeratorId(pub u64);

impl fmt::Display for EnumeratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enumerator:{}", self.0)
    }
}

/// Canonical path identifying one database file.
///
/// Every registry and cache in the runtime is keyed by `PathKey`, so two
/// spellings of the same file map to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathKey(PathBuf);

impl PathKey {
    /// Resolves `path` to its canonical form.
    ///
    /// Existing paths are canonicalized. For a file that does not exist yet
    /// the parent directory is canonicalized and the file name re-joined;
    /// failing that the path is made absolute against the current directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for an empty path.
    pub fn resolve(path: &Path) -> CoreResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(CoreError::invalid_path(path, "path is empty"));
        }
        if let Ok(canonical) = fs::canonicalize(path) {
            return Ok(Self(canonical));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| CoreError::invalid_path(path, e.to_string()))?
                .join(path)
        };
        if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
            if let Ok(parent) = fs::canonicalize(parent) {
                return Ok(Self(parent.join(name)));
            }
        }
        Ok(Self(absolute))
    }

    /// Path used for the in-memory database called `identifier`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for an empty identifier, or one that is not a
    /// single plain file name (roots, prefixes, separators, `.` and `..`).
    pub fn in_memory(identifier: &str) -> CoreResult<Self> {
        if identifier.is_empty() {
            return Err(CoreError::invalid_path(
                identifier,
                "in-memory identifier is empty",
            ));
        }
        let mut components = Path::new(identifier).components();
        let single_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_name || identifier.contains(['/', '\\']) {
            return Err(CoreError::invalid_path(
                identifier,
                "in-memory identifier must be a single file name",
            ));
        }
        Ok(Self(
            std::env::temp_dir().join(IN_MEMORY_DIR).join(identifier),
        ))
    }

    /// Returns the path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for PathKey {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_rejected() {
        let err = PathKey::resolve(Path::new("")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath { .. }));
    }

    #[test]
    fn existing_paths_are_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.db");
        std::fs::write(&file, b"").unwrap();

        let dotted = dir.path().join(".").join("a.db");
        assert_eq!(
            PathKey::resolve(&dotted).unwrap(),
            PathKey::resolve(&file).unwrap()
        );
    }

    #[test]
    fn missing_file_uses_canonical_parent() {
        let dir = tempfile::tempdir().unwrap();
        let key = PathKey::resolve(&dir.path().join("new.db")).unwrap();
        let parent = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(key.as_path(), parent.join("new.db"));
    }

    #[test]
    fn relative_paths_become_absolute() {
        let key = PathKey::resolve(Path::new("no-such-dir-xyz/file.db")).unwrap();
        assert!(key.as_path().is_absolute());
        assert!(key.as_path().ends_with("no-such-dir-xyz/file.db"));
    }

    #[test]
    fn in_memory_paths_live_under_temp_dir() {
        let key = PathKey::in_memory("scratch").unwrap();
        assert!(key.as_path().starts_with(std::env::temp_dir()));
        assert!(key.as_path().ends_with("tessera-memory/scratch"));
        assert!(PathKey::in_memory("").is_err());
    }

    #[test]
    fn in_memory_identifiers_cannot_name_other_paths() {
        for identifier in ["/etc/app.db", "../app.db", "nested/app.db", "..", ".", "a\\b"] {
            let err = PathKey::in_memory(identifier).unwrap_err();
            assert!(matches!(err, CoreError::InvalidPath { .. }), "{identifier}");
        }

        let disk = PathKey::resolve(Path::new("/etc/app.db")).unwrap();
        let memory = PathKey::in_memory("app.db").unwrap();
        assert_ne!(memory, disk);
        assert_eq!(memory.as_path().file_name().unwrap(), "app.db");
    }

    #[test]
    fn id_display() {
        assert_eq!(HandleId::new(3).to_string(), "handle:3");
        assert_eq!(TokenId(1).to_string(), "token:1");
        assert_eq!(EnumeratorId(9).to_string(), "enumerator:9");
    }
}
