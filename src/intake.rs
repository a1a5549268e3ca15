use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

#[derive(Debug)]
pub struct IntakeError {
    pub message: String,
}

impl std::fmt::Display for IntakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for IntakeError {
    fn from(s: String) -> Self {
        IntakeError { message: s }
    }
}

impl From<std::io::Error> for IntakeError {
    fn from(err: std::io::Error) -> Self {
        IntakeError {
            message: format!("inbox io error: {err}"),
        }
    }
}

/// Source of new record identifiers. `seen` holds every id the queue
/// already knows; implementations return only ids not in it.
#[async_trait]
pub trait IntakeSource: Send + Sync {
    async fn list_new_ids(&self, seen: &HashSet<String>) -> Result<Vec<String>, IntakeError>;
}

/// Scans an inbox directory for `.csv` / `.txt` files of record ids, one
/// per line (first column for csv). Consumed files move to `processed/`,
/// unreadable ones to `failed/`, both with a timestamp suffix so repeated
/// drops of the same filename never collide.
pub struct InboxScanner {
    inbox: PathBuf,
}

impl InboxScanner {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
        }
    }

    fn is_batch_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt"))
    }

    /// Pull record ids out of one file body. The first line is skipped as
    /// a header when its first field carries no digit; real ids always do.
    fn parse_ids(content: &str) -> Vec<String> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut ids = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let field = line
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .trim_matches('"')
                .trim();
            if field.is_empty() {
                continue;
            }
            if index == 0 && !field.bytes().any(|b| b.is_ascii_digit()) {
                continue;
            }
            ids.push(field.to_string());
        }
        ids
    }

    async fn move_to(&self, source: &Path, folder: &str) {
        let destination_dir = self.inbox.join(folder);
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("batch");
        let ext = source
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("txt");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let destination = destination_dir.join(format!("{stem}_{timestamp}.{ext}"));

        if let Err(e) = tokio::fs::rename(source, &destination).await {
            tracing::error!("Failed to move {} to {folder}/: {e}", source.display());
        }
    }
}

#[async_trait]
impl IntakeSource for InboxScanner {
    async fn list_new_ids(&self, seen: &HashSet<String>) -> Result<Vec<String>, IntakeError> {
        tokio::fs::create_dir_all(&self.inbox).await?;
        tokio::fs::create_dir_all(self.inbox.join("processed")).await?;
        tokio::fs::create_dir_all(self.inbox.join("failed")).await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.inbox).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && Self::is_batch_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut new_ids = Vec::new();
        let mut picked: HashSet<String> = HashSet::new();

        for path in &files {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    let ids = Self::parse_ids(&content);
                    let before = new_ids.len();
                    for id in ids {
                        if !seen.contains(&id) && picked.insert(id.clone()) {
                            new_ids.push(id);
                        }
                    }
                    tracing::info!(
                        "Inbox file {}: {} new ids",
                        path.display(),
                        new_ids.len() - before
                    );
                    self.move_to(path, "processed").await;
                }
                Err(e) => {
                    tracing::warn!("Unreadable inbox file {}: {e}", path.display());
                    self.move_to(path, "failed").await;
                }
            }
        }

        Ok(new_ids)
    }
}
