//! Atomic JSON file writes

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::error::Result;

/// Serialize `value` as pretty JSON and replace `path` atomically.
///
/// The document is written to a sibling temp file and renamed over the
/// target, so readers see either the old or the new content and concurrent
/// writers end with one complete document.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, &body).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Sibling temp path, unique per call so concurrent writers never share one
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("document"));
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1}))
            .await
            .expect("Failed to write");
        write_json_atomic(&path, &serde_json::json!({"a": 2}))
            .await
            .expect("Failed to overwrite");

        let raw = std::fs::read_to_string(&path).expect("Failed to read back");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("Failed to parse");
        assert_eq!(value["a"], 2);
        assert_eq!(entries(path.parent().expect("parent")), vec!["doc.json"]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_one_complete_document() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("token.json");

        let writes = (0..16).map(|i| {
            let path = path.clone();
            async move {
                let body = serde_json::json!({"writer": i, "padding": "x".repeat(4096 * i)});
                write_json_atomic(&path, &body).await
            }
        });
        for result in futures::future::join_all(writes).await {
            result.expect("Concurrent write failed");
        }

        let raw = std::fs::read_to_string(&path).expect("Failed to read back");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("Document is torn");
        let writer = value["writer"].as_u64().expect("writer missing") as usize;
        assert_eq!(value["padding"].as_str().map(str::len), Some(4096 * writer));
        assert_eq!(entries(dir.path()), vec!["token.json"]);
    }

    #[test]
    fn test_temp_paths_are_unique_siblings() {
        let path = Path::new("/data/servers_config.json");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("Failed to list dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
