//! Configuration backups
//!
//! Artifacts are named `<host>_<YYYYMMDD_HHMMSS>.cfg` (UTC). A second backup of
//! the same host within the same second gets a numeric suffix instead of
//! replacing the first one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::SessionError;
use crate::models::BackupArtifact;
use crate::session::Session;

/// Suffixes tried before giving up on a same-second collision
const MAX_COLLISION_SUFFIX: u32 = 100;

/// Filesystem-safe form of a host name
pub fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<host>_<YYYYMMDD_HHMMSS>` without extension
pub fn artifact_stem(host: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", sanitize_host(host), at.format("%Y%m%d_%H%M%S"))
}

pub fn artifact_filename(host: &str, at: DateTime<Utc>) -> String {
    format!("{}.cfg", artifact_stem(host, at))
}

/// A backup file found on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupFile {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupService {
    directory: PathBuf,
}

impl BackupService {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Pull the running configuration over `session` and persist it
    pub async fn backup(&self, session: &mut Session) -> Result<BackupArtifact, SessionError> {
        let command = session.platform().running_config_command();
        let config = session.send_command(command).await?;
        let host = session.host().to_string();
        self.store(&host, &config, Utc::now()).await
    }

    /// Write `content` as a new artifact for `host` taken at `at`
    pub async fn store(
        &self,
        host: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<BackupArtifact, SessionError> {
        // create_dir_all tolerates concurrent creators
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| write_error(&self.directory, e))?;

        let stem = artifact_stem(host, at);

        for attempt in 0..=MAX_COLLISION_SUFFIX {
            let filename = if attempt == 0 {
                format!("{}.cfg", stem)
            } else {
                format!("{}_{}.cfg", stem, attempt)
            };
            let path = self.directory.join(&filename);

            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(write_error(&path, e)),
            };

            file.write_all(content.as_bytes())
                .await
                .map_err(|e| write_error(&path, e))?;
            file.flush().await.map_err(|e| write_error(&path, e))?;

            tracing::info!("[Backup] {} -> {}", host, path.display());

            return Ok(BackupArtifact {
                host: host.to_string(),
                filename,
                path,
                size_bytes: content.len() as u64,
                created_at: at,
            });
        }

        Err(SessionError::Write {
            path: self.directory.join(format!("{}.cfg", stem)).display().to_string(),
            detail: format!("more than {} backups in one second", MAX_COLLISION_SUFFIX),
        })
    }

    /// Backup files in the directory, newest first. Creates the directory if
    /// it does not exist yet.
    pub async fn list_backups(&self) -> std::io::Result<Vec<BackupFile>> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.ends_with(".cfg") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(BackupFile {
                filename,
                size_bytes: meta.len(),
                modified,
            });
        }

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(files)
    }
}

fn write_error(path: &Path, err: std::io::Error) -> SessionError {
    SessionError::Write {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}
