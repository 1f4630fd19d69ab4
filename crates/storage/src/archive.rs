//! Unpacking the worker's result archive.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::names::validate_artifact_name;

/// Extract the entries of `archive` whose names are in `allowed` into
/// `dest`, returning the names written.
///
/// Runs on a blocking thread. Entries with unsafe paths fail the whole
/// extraction; entries not in `allowed` and directories are skipped.
pub async fn extract(
    archive: Vec<u8>,
    dest: PathBuf,
    allowed: Vec<String>,
) -> Result<Vec<String>, StorageError> {
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest, &allowed))
        .await
        .map_err(|e| StorageError::Archive(format!("extraction task failed: {e}")))?
}

fn extract_blocking(
    archive: &[u8],
    dest: &Path,
    allowed: &[String],
) -> Result<Vec<String>, StorageError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    std::fs::create_dir_all(dest)?;

    let mut written = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| StorageError::Archive(format!("unsafe entry name: {raw_name}")))?;
        let Some(name) = enclosed.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };
        if validate_artifact_name(&name).is_err() {
            return Err(StorageError::Archive(format!("unsafe entry name: {raw_name}")));
        }
        if !allowed.iter().any(|a| a == &name) {
            tracing::debug!(entry = %raw_name, "Skipping unexpected archive entry");
            continue;
        }

        let mut out = std::fs::File::create(dest.join(&name))?;
        std::io::copy(&mut entry, &mut out)?;
        written.push(name);
    }

    written.sort();
    written.dedup();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn allowed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn extracts_only_allowed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_zip(&[("a", b"1"), ("b", b"2"), ("debug.log", b"x")]);

        let written = extract(archive, dir.path().to_path_buf(), allowed(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(written, vec!["a", "b"]);
        assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"1");
        assert!(!dir.path().join("debug.log").exists());
    }

    #[tokio::test]
    async fn traversal_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_zip(&[("../escape", b"x")]);

        let err = extract(archive, dir.path().join("out"), allowed(&["escape"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Archive(_)));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn garbage_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract(b"not a zip".to_vec(), dir.path().to_path_buf(), allowed(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Archive(_)));
    }
}
