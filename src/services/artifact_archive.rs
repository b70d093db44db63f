use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::debug;

/// Writes parsed results next to their raw text under
/// `{root}/{date}/{key}_{timestamp}.json`.
#[derive(Debug, Clone)]
pub struct ArtifactArchive {
    root: PathBuf,
}

#[derive(Debug, Serialize)]
struct ArchivedArtifact<'a, T: Serialize> {
    key: &'a str,
    date: NaiveDate,
    archived_at: DateTime<Utc>,
    result: &'a T,
    raw_text: Option<&'a str>,
}

impl ArtifactArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write<T: Serialize + Sync>(
        &self,
        key: &str,
        date: NaiveDate,
        result: &T,
        raw_text: Option<&str>,
    ) -> Result<PathBuf, std::io::Error> {
        let archived_at = Utc::now();
        let dir = self.root.join(date.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir).await?;

        let file_name = format!(
            "{}_{}.json",
            sanitize_key(key),
            archived_at.format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = dir.join(file_name);

        let artifact = ArchivedArtifact {
            key,
            date,
            archived_at,
            result,
            raw_text,
        };
        let body = serde_json::to_vec_pretty(&artifact)?;
        fs::write(&path, body).await?;

        debug!("Archived {} to {}", key, path.display());
        Ok(path)
    }
}

/// Keys end up in file names; keep them to ticker-safe characters.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "UNKNOWN".to_string()
    } else {
        cleaned
    }
}
