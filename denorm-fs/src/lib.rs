//! Capability-based filesystem helpers built on `cap-std` and `camino`.
//!
//! The denormalizer touches the filesystem in two places: the scratch
//! directory holding the embedded cache, and optional files holding persisted
//! index marks. Both go through these helpers so absolute and relative paths
//! are resolved the same way.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Create `path` and all missing ancestors as directories.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Ensure the parent directory for `path` exists.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if parent != Utf8Path::new("/") => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Resolve an ambient directory for the given path and return the directory with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("target should include a file name"))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Create (or truncate) the file at `path`, creating parent directories first.
pub fn create_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    ensure_parent_dir(path)?;
    let (dir, name) = open_dir_and_file(path)?;
    dir.create(name.as_str())
}

/// Open an existing file for reading.
pub fn open_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.open(name.as_str())
}

/// Remove the file at `path`, reporting whether anything was deleted.
///
/// A missing file, or a missing parent directory, is not an error.
pub fn remove_file_if_exists(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.remove_file(name.as_str()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Split an absolute or relative path into an ambient base directory and a relative suffix.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;

            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;

    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn utf8(dir: &TempDir, tail: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(tail)).expect("utf-8 path")
    }

    #[rstest]
    fn ensure_dir_creates_nested_directories(temp_dir: TempDir) {
        let nested = utf8(&temp_dir, "a/b/c");
        ensure_dir(&nested).expect("create nested dirs");
        assert!(nested.is_dir());
        ensure_dir(&nested).expect("second call is a no-op");
    }

    #[rstest]
    fn create_then_open_round_trips_bytes(temp_dir: TempDir) {
        let path = utf8(&temp_dir, "marks/index.bin");
        let mut file = create_file(&path).expect("create file");
        file.write_all(b"marks").expect("write bytes");
        drop(file);

        let mut contents = Vec::new();
        open_file(&path)
            .expect("open file")
            .read_to_end(&mut contents)
            .expect("read bytes");
        assert_eq!(contents, b"marks");
    }

    #[rstest]
    fn remove_reports_whether_a_file_was_deleted(temp_dir: TempDir) {
        let path = utf8(&temp_dir, "cache.sqlite3");
        assert!(!remove_file_if_exists(&path).expect("missing file is fine"));
        create_file(&path).expect("create file");
        assert!(remove_file_if_exists(&path).expect("remove file"));
        assert!(!path.exists());
    }

    #[rstest]
    fn remove_tolerates_missing_parent(temp_dir: TempDir) {
        let path = utf8(&temp_dir, "absent/cache.sqlite3");
        assert!(!remove_file_if_exists(&path).expect("missing parent is fine"));
    }
}
