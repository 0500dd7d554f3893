//! [`FileGateway`] – upload, download and browse policy enforcement.
//!
//! Policies are resolved by `button_name`, or fall back to the single
//! configured policy of that kind. Every filesystem path built from client
//! input goes through the same containment pipeline:
//!
//! 1. backslashes become `/`, empty and `.` segments are dropped;
//! 2. any `..` segment is refused outright with [`BridgeError::AccessDenied`];
//! 3. the result is joined onto the canonical policy root, canonicalized
//!    (following symlinks) and must still start with that root.
//!
//! Access-denied errors carry a fixed message so no internal path structure
//! reaches the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabbridge_types::{BridgeError, DownloadPolicy, UploadPolicy, file_extension};
use tracing::{debug, info, warn};

use crate::validator::ValidatedConfig;

/// A file received from a client and written to a staging location, not yet
/// checked against any policy.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub path: PathBuf,
    /// Name as supplied by the client (may contain path junk).
    pub file_name: String,
    /// Received byte count.
    pub size: u64,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// A download that passed policy and containment checks.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// One file in a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Immediate children of one browsed directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowseListing {
    /// Root-relative path of the listed directory, `/`-separated.
    pub path: String,
    pub directories: Vec<String>,
    pub files: Vec<FileEntry>,
}

/// Resolves file-transfer policies and performs the checked filesystem work.
#[derive(Debug, Clone)]
pub struct FileGateway {
    config: Arc<ValidatedConfig>,
}

impl FileGateway {
    pub fn new(config: Arc<ValidatedConfig>) -> Self {
        Self { config }
    }

    // -----------------------------------------------------------------------
    // Policy resolution
    // -----------------------------------------------------------------------

    /// Upload policy by name, or the sole configured one.
    pub fn upload_policy(&self, button_name: Option<&str>) -> Result<&UploadPolicy, BridgeError> {
        match button_name {
            Some(name) => self
                .config
                .upload(name)
                .ok_or_else(|| BridgeError::NotFound(format!("upload policy not found: {name}"))),
            None => sole(self.config.config().uploads(), "upload"),
        }
    }

    /// Download/browse policy by name, or the sole configured one.
    pub fn download_policy(
        &self,
        button_name: Option<&str>,
    ) -> Result<&DownloadPolicy, BridgeError> {
        match button_name {
            Some(name) => self
                .config
                .download(name)
                .ok_or_else(|| BridgeError::NotFound(format!("download policy not found: {name}"))),
            None => sole(self.config.config().downloads(), "download"),
        }
    }

    /// The upload directory used by the file listing and delete endpoints:
    /// the first Upload member in configuration order.
    pub fn default_upload_policy(&self) -> Option<&UploadPolicy> {
        self.config.config().uploads().next()
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Check a staged file against its policy and move it into place.
    ///
    /// Extension is checked before size. On any rejection the staged file is
    /// deleted before returning, so rejected uploads never persist.
    pub async fn finalize_upload(
        &self,
        button_name: Option<&str>,
        staged: StagedUpload,
    ) -> Result<StoredFile, BridgeError> {
        match self.check_and_store(button_name, &staged).await {
            Ok(stored) => {
                info!(
                    file = %stored.file_name,
                    size = stored.size,
                    "upload stored"
                );
                Ok(stored)
            }
            Err(e) => {
                discard(&staged.path).await;
                warn!(file = %staged.file_name, error = %e, "upload rejected");
                Err(e)
            }
        }
    }

    async fn check_and_store(
        &self,
        button_name: Option<&str>,
        staged: &StagedUpload,
    ) -> Result<StoredFile, BridgeError> {
        let policy = self.upload_policy(button_name)?;
        let file_name = sanitize_file_name(&staged.file_name)?;

        if !policy.allows(&file_name) {
            return Err(BridgeError::Validation(format!(
                "file type not allowed: {}",
                file_extension(&file_name).unwrap_or_else(|| "(none)".to_string())
            )));
        }
        if let Some(max) = policy.max_file_size
            && staged.size > max
        {
            return Err(BridgeError::Validation(format!(
                "file exceeds maximum size of {max} bytes"
            )));
        }

        let dir = Path::new(&policy.upload_directory);
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(&file_name);
        relocate(&staged.path, &target).await?;

        Ok(StoredFile {
            file_name,
            path: target,
            size: staged.size,
        })
    }

    // -----------------------------------------------------------------------
    // Download / browse
    // -----------------------------------------------------------------------

    /// Resolve a root-relative file path for download.
    ///
    /// The extension allow-list is checked before existence, and a missing
    /// file is always [`BridgeError::NotFound`].
    pub async fn resolve_download(
        &self,
        button_name: Option<&str>,
        requested: &str,
    ) -> Result<DownloadTarget, BridgeError> {
        let policy = self.download_policy(button_name)?;
        let relative = normalize_relative(requested)?;
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BridgeError::Validation("filename is required".to_string()))?;

        if !policy.allows(&file_name) {
            return Err(BridgeError::Validation(format!(
                "file type not allowed: {}",
                file_extension(&file_name).unwrap_or_else(|| "(none)".to_string())
            )));
        }

        let not_found = || BridgeError::NotFound("file not found".to_string());
        let path = contain(Path::new(&policy.root_directory), &relative)
            .await
            .map_err(|e| match e {
                BridgeError::NotFound(_) => not_found(),
                other => other,
            })?;
        let meta = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }

        Ok(DownloadTarget {
            path,
            file_name,
            size: meta.len(),
        })
    }

    /// List the immediate children of a root-relative directory.
    pub async fn browse(
        &self,
        button_name: Option<&str>,
        requested: &str,
    ) -> Result<BrowseListing, BridgeError> {
        let policy = self.download_policy(button_name)?;
        let relative = normalize_relative(requested)?;
        let dir = contain(Path::new(&policy.root_directory), &relative).await?;

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| BridgeError::NotFound("directory not found".to_string()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks; a dangling link is skipped.
            let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            if meta.is_dir() {
                directories.push(name);
            } else if meta.is_file() {
                files.push(entry_from(name, &meta));
            }
        }
        directories.sort();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        debug!(
            policy = %policy.button_name,
            dirs = directories.len(),
            files = files.len(),
            "browse"
        );

        Ok(BrowseListing {
            path: display_path(&relative),
            directories,
            files,
        })
    }

    // -----------------------------------------------------------------------
    // Default upload directory
    // -----------------------------------------------------------------------

    /// Files in the default upload directory. Empty when no upload policy is
    /// configured or the directory does not exist yet.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, BridgeError> {
        let Some(policy) = self.default_upload_policy() else {
            return Ok(Vec::new());
        };
        let mut entries = match tokio::fs::read_dir(&policy.upload_directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push(entry_from(
                    entry.file_name().to_string_lossy().into_owned(),
                    &meta,
                ));
            }
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// Delete one file from the default upload directory.
    pub async fn delete_file(&self, filename: &str) -> Result<(), BridgeError> {
        let policy = self
            .default_upload_policy()
            .ok_or_else(|| BridgeError::NotFound("no upload directory configured".to_string()))?;
        let name = sanitize_file_name(filename)
            .map_err(|_| BridgeError::NotFound("file not found".to_string()))?;
        let path = Path::new(&policy.upload_directory).join(&name);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(BridgeError::NotFound("file not found".to_string())),
        }
        tokio::fs::remove_file(&path).await?;
        info!(file = %name, "file deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sole<'a, P: 'a>(
    mut candidates: impl Iterator<Item = &'a P>,
    kind: &str,
) -> Result<&'a P, BridgeError> {
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(BridgeError::NotFound(format!("no {kind} policy configured"))),
        (Some(_), Some(_)) => Err(BridgeError::Validation(format!(
            "multiple {kind} policies configured; button_name is required"
        ))),
    }
}

/// Reduce a client-supplied name to its final component.
pub fn sanitize_file_name(raw: &str) -> Result<String, BridgeError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(BridgeError::Validation("invalid filename".to_string()));
    }
    Ok(name.to_string())
}

/// Turn an untrusted path into a clean relative path. Refuses `..`.
pub fn normalize_relative(requested: &str) -> Result<PathBuf, BridgeError> {
    let unified = requested.replace('\\', "/");
    let mut relative = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                warn!("path traversal attempt refused");
                return Err(BridgeError::AccessDenied);
            }
            s => relative.push(s),
        }
    }
    Ok(relative)
}

/// Resolve `relative` under `root` and verify the canonical result is still a
/// descendant of the canonical root.
async fn contain(root: &Path, relative: &Path) -> Result<PathBuf, BridgeError> {
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| BridgeError::NotFound("directory not found".to_string()))?;
    let resolved = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|_| BridgeError::NotFound("path not found".to_string()))?;
    if !resolved.starts_with(&root) {
        warn!("resolved path escapes its root; refused");
        return Err(BridgeError::AccessDenied);
    }
    Ok(resolved)
}

fn display_path(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

fn entry_from(filename: String, meta: &std::fs::Metadata) -> FileEntry {
    FileEntry {
        filename,
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

/// Rename into place; across filesystems fall back to copy + remove.
async fn relocate(from: &Path, to: &Path) -> Result<(), BridgeError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(error = %e, "failed to delete rejected upload");
    }
}
