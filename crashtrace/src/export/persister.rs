// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::{CRASHTRACE_ARTIFACT_EXTENSION, CRASHTRACE_ARTIFACT_PREFIX};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// Successive faults within the same second get a numbered suffix.
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No free artifact name left for timestamp {0} in {1}")]
    NamesExhausted(i64, PathBuf),
}

pub fn artifact_name(unix_timestamp: i64, attempt: u32) -> String {
    if attempt == 0 {
        format!("{CRASHTRACE_ARTIFACT_PREFIX}{unix_timestamp}.{CRASHTRACE_ARTIFACT_EXTENSION}")
    } else {
        format!(
            "{CRASHTRACE_ARTIFACT_PREFIX}{unix_timestamp}_{attempt}.{CRASHTRACE_ARTIFACT_EXTENSION}"
        )
    }
}

/// Writes the text form of a report to `dir/crash_<unix_timestamp>.log`.
/// Best effort: a failure is logged and reported as `None`.
pub fn save(text: &str, dir: &Path, unix_timestamp: i64) -> Option<PathBuf> {
    match try_save(text, dir, unix_timestamp) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "Crash report saved");
            Some(path)
        }
        Err(e) => {
            tracing::warn!("Unable to save crash report: {e}");
            None
        }
    }
}

pub fn try_save(text: &str, dir: &Path, unix_timestamp: i64) -> Result<PathBuf, PersistError> {
    let (path, mut file) = create_unique(dir, unix_timestamp)?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| PersistError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

fn create_unique(dir: &Path, unix_timestamp: i64) -> Result<(PathBuf, File), PersistError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(artifact_name(unix_timestamp, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(PersistError::Create { path, source }),
        }
    }
    Err(PersistError::NamesExhausted(
        unix_timestamp,
        dir.to_path_buf(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name(1700000000, 0), "crash_1700000000.log");
        assert_eq!(artifact_name(1700000000, 2), "crash_1700000000_2.log");
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = save("hello\n", dir.path(), 42).unwrap();
        assert_eq!(path, dir.path().join("crash_42.log"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_save_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = save("first", dir.path(), 7).unwrap();
        let second = save("second", dir.path(), 7).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, dir.path().join("crash_7_1.log"));
        assert_eq!(std::fs::read_to_string(first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(second).unwrap(), "second");
    }

    #[test]
    fn test_save_failure_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does/not/exist");
        assert!(save("text", &missing, 1).is_none());
        let err = try_save("text", &missing, 1).unwrap_err();
        assert!(matches!(err, PersistError::Create { .. }));
    }
}
