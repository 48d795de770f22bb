//! Log file rotation and retention.
//!
//! When the current file outgrows its limit it is renamed to
//! `stem.YYYYMMDDHHMMSS.ext` in place and a fresh file starts on the next
//! flush. The timestamp encoding makes lexicographic order temporal, which
//! is what the retention sweep sorts by.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rename `path` with a timestamp suffix and prune the rotated set.
///
/// Collisions within one second bump the timestamp string, so the name
/// format and its ordering survive rapid rotation.
pub fn rotate(path: &Path, max_old_files: usize) -> io::Result<()> {
    let rotated = rotated_name(path)?;
    fs::rename(path, &rotated)?;

    if max_old_files > 0 {
        enforce_retention(path, max_old_files);
    }
    Ok(())
}

fn rotated_name(path: &Path) -> io::Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut timestamp: u64 = chrono::Local::now()
        .format("%Y%m%d%H%M%S")
        .to_string()
        .parse()
        .expect("timestamp digits");

    for _ in 0..1000 {
        let candidate = parent.join(format!("{stem}.{timestamp}.{extension}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        timestamp += 1;
    }

    Err(io::Error::other("no free rotation slot"))
}

/// Delete the oldest rotated files so at most `max_old_files` remain.
///
/// The rotated set are regular files in the same directory whose name starts
/// with the stem and whose extension matches, excluding the live file.
pub fn enforce_retention(path: &Path, max_old_files: usize) {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(std::ffi::OsStr::to_os_string);

    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };

    let mut rotated: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|candidate| {
            candidate.is_file()
                && *candidate != *path
                && candidate.extension().map(std::ffi::OsStr::to_os_string) == extension
                && candidate
                    .file_stem()
                    .map(|s| s.to_string_lossy().starts_with(&stem))
                    .unwrap_or(false)
        })
        .collect();

    if rotated.len() <= max_old_files {
        return;
    }

    // name encodes the timestamp, so this is oldest-first
    rotated.sort();

    for old in &rotated[..rotated.len() - max_old_files] {
        if let Err(e) = fs::remove_file(old) {
            eprintln!("failed to delete old log file {}: {e}", old.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn rotate_renames_with_timestamp_suffix() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        let mut f = File::create(&log).unwrap();
        writeln!(f, "content").unwrap();
        drop(f);

        rotate(&log, 0).unwrap();
        assert!(!log.exists());

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("app."), "{name}");
        assert!(name.ends_with(".log"), "{name}");
        // app.YYYYMMDDHHMMSS.log
        assert_eq!(name.len(), "app.".len() + 14 + ".log".len(), "{name}");
    }

    #[test]
    fn rapid_rotation_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");

        for i in 0..3 {
            let mut f = File::create(&log).unwrap();
            writeln!(f, "generation {i}").unwrap();
            drop(f);
            rotate(&log, 0).unwrap();
        }

        let count = fs::read_dir(dir.path()).unwrap().flatten().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn retention_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");

        for ts in [
            "20240101120000",
            "20240101120001",
            "20240101120002",
            "20240101120003",
        ] {
            File::create(dir.path().join(format!("app.{ts}.log"))).unwrap();
        }
        // live file and an unrelated neighbour are not part of the set
        File::create(&log).unwrap();
        File::create(dir.path().join("other.log")).unwrap();
        File::create(dir.path().join("app.20240101120004.txt")).unwrap();

        enforce_retention(&log, 2);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "app.20240101120002.log",
                "app.20240101120003.log",
                "app.20240101120004.txt",
                "app.log",
                "other.log",
            ]
        );
    }

    #[test]
    fn retention_is_a_noop_below_the_limit() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        File::create(dir.path().join("app.20240101120000.log")).unwrap();

        enforce_retention(&log, 2);
        assert!(dir.path().join("app.20240101120000.log").exists());
    }
}
