//! High-level storage client.
//!
//! `StorageClient` wraps a `RemoteStore` with token management and retries
//! and exposes the file operations the pipeline needs. Every operation makes
//! sure the access token is valid before touching the remote side.

use chrono::{DateTime, Utc};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use valuestocks_common::{Error, RemotePath, Result};

use crate::auth::{Credentials, TokenManager, TokenSource};
use crate::dropbox::{DropboxApi, DropboxEndpoints, OAuthTokenSource};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::store::{Entry, FileEntry, RemoteStore};

/// Storage client backed by the Dropbox HTTP API.
pub type DropboxStorageClient = StorageClient<DropboxApi, OAuthTokenSource>;

/// Outcome of a folder transfer.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Destination paths written successfully.
    pub transferred: Vec<String>,
    /// Source paths that failed, with the reason.
    pub failed: Vec<(String, Error)>,
}

impl TransferReport {
    /// True when no file failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Remote file operations with token refresh and retries.
pub struct StorageClient<R, S> {
    store: R,
    tokens: TokenManager<S>,
    retry: RetryExecutor,
}

impl StorageClient<DropboxApi, OAuthTokenSource> {
    /// Connect to Dropbox with the given credentials.
    ///
    /// # Errors
    /// - `Error::Authentication` if the initial token exchange fails
    pub async fn connect(credentials: Credentials, policy: RetryPolicy) -> Result<Self> {
        Self::connect_with(credentials, DropboxEndpoints::default(), policy).await
    }

    /// Connect to a Dropbox-compatible API at custom endpoints.
    pub async fn connect_with(
        credentials: Credentials,
        endpoints: DropboxEndpoints,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let source = OAuthTokenSource::with_token_url(credentials, &endpoints.token_url)?;
        let store = DropboxApi::new(endpoints)?;
        Self::new(store, source, policy).await
    }
}

impl<R: RemoteStore, S: TokenSource> StorageClient<R, S> {
    /// Create a client and fetch the first access token.
    ///
    /// # Errors
    /// - `Error::Authentication` if the initial token exchange fails
    pub async fn new(store: R, source: S, policy: RetryPolicy) -> Result<Self> {
        let tokens = TokenManager::initialize(source).await.inspect_err(|e| {
            error!("Failed to initialize {} client: {}", store.name(), e);
        })?;

        info!("{} storage client initialized", store.name());
        Ok(Self {
            store,
            tokens,
            retry: RetryExecutor::new(policy),
        })
    }

    /// The underlying remote store.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// The retry policy applied to remote calls.
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    async fn token(&mut self) -> Result<String> {
        self.tokens.ensure_valid(&self.store).await
    }

    /// Upload a local file, overwriting any existing remote file.
    ///
    /// # Errors
    /// - `Error::Io` if the local file cannot be read (not retried)
    pub async fn upload_file(&mut self, local: &Path, remote: &RemotePath) -> Result<FileEntry> {
        let token = self.token().await?;
        let data = tokio::fs::read(local).await.inspect_err(|e| {
            error!("Failed to read {}: {}", local.display(), e);
        })?;

        let store = &self.store;
        let token = token.as_str();
        let entry = self
            .retry
            .execute(move || {
                let data = data.clone();
                async move { store.upload(token, remote, data).await }
            })
            .await
            .inspect_err(|e| error!("Failed to upload {}: {}", local.display(), e))?;

        info!("File {} uploaded to {}", local.display(), remote);
        Ok(entry)
    }

    /// Download a remote file.
    ///
    /// Without `local`, the file lands in the current directory under its
    /// remote name. Missing parent directories are created.
    pub async fn download_file(
        &mut self,
        remote: &RemotePath,
        local: Option<&Path>,
    ) -> Result<PathBuf> {
        let target = match local {
            Some(path) => path.to_path_buf(),
            None => default_local_path(remote)?,
        };

        let token = self.token().await?;
        let store = &self.store;
        let token = token.as_str();
        let data = self
            .retry
            .execute(move || async move { store.download(token, remote).await })
            .await
            .inspect_err(|e| error!("Failed to download {}: {}", remote, e))?;

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await.inspect_err(|e| {
            error!("Failed to write {}: {}", target.display(), e);
        })?;

        info!("File {} downloaded to {}", remote, target.display());
        Ok(target)
    }

    /// Upload every file below `local_dir`, keeping the relative layout.
    ///
    /// `pattern` is matched against file names. A failed file is recorded in
    /// the report and the walk continues.
    pub async fn upload_folder(
        &mut self,
        local_dir: &Path,
        remote_dir: &RemotePath,
        pattern: Option<&str>,
    ) -> Result<TransferReport> {
        let pattern = compile_pattern(pattern)?;
        let files = walk_local(local_dir).await.inspect_err(|e| {
            error!("Failed to walk {}: {}", local_dir.display(), e);
        })?;

        let mut report = TransferReport::default();
        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !name_matches(pattern.as_ref(), &name) {
                continue;
            }

            let relative = match file.strip_prefix(local_dir) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => continue,
            };

            // Path components come from the OS, so a `\` left in a name is a
            // literal character the remote side cannot store; it is reported.
            let remote = match remote_dir.join_relative(&relative) {
                Ok(remote) => remote,
                Err(e) => {
                    report.failed.push((file.display().to_string(), e));
                    continue;
                }
            };

            match self.upload_file(&file, &remote).await {
                Ok(_) => report.transferred.push(remote.to_string_path()),
                Err(e) => report.failed.push((file.display().to_string(), e)),
            }
        }

        info!(
            "Folder {} uploaded to {}: {} transferred, {} failed",
            local_dir.display(),
            remote_dir,
            report.transferred.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Download every file below `remote_dir`, keeping the relative layout.
    ///
    /// A listing failure aborts the whole operation; a failed file is
    /// recorded in the report.
    pub async fn download_folder(
        &mut self,
        remote_dir: &RemotePath,
        local_dir: &Path,
        pattern: Option<&str>,
    ) -> Result<TransferReport> {
        let pattern = compile_pattern(pattern)?;
        let entries = self
            .list_all(remote_dir, true)
            .await
            .inspect_err(|e| error!("Failed to list {}: {}", remote_dir, e))?;

        let mut report = TransferReport::default();
        for file in entries.into_iter().filter_map(Entry::into_file) {
            if !name_matches(pattern.as_ref(), &file.name) {
                continue;
            }

            let remote = display_path(&file)?;
            let relative = match remote.relative_to(remote_dir) {
                Some(rel) if !rel.is_empty() => rel.to_vec(),
                _ => {
                    warn!("Skipping {}: outside {}", remote, remote_dir);
                    continue;
                }
            };
            let local = relative
                .iter()
                .fold(local_dir.to_path_buf(), |path, part| path.join(part));

            match self.download_file(&remote, Some(&local)).await {
                Ok(path) => report.transferred.push(path.display().to_string()),
                Err(e) => report.failed.push((remote.to_string_path(), e)),
            }
        }

        info!(
            "Folder {} downloaded to {}: {} transferred, {} failed",
            remote_dir,
            local_dir.display(),
            report.transferred.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Names and modification times of the files directly in `folder`.
    pub async fn list_files(
        &mut self,
        folder: &RemotePath,
        pattern: Option<&str>,
    ) -> Result<Vec<(String, DateTime<Utc>)>> {
        let pattern = compile_pattern(pattern)?;
        let entries = self
            .list_all(folder, false)
            .await
            .inspect_err(|e| error!("Failed to list {}: {}", folder, e))?;

        Ok(entries
            .into_iter()
            .filter_map(Entry::into_file)
            .filter(|file| name_matches(pattern.as_ref(), &file.name))
            .map(|file| (file.name, file.server_modified))
            .collect())
    }

    /// Delete a remote file.
    pub async fn remove_file(&mut self, remote: &RemotePath) -> Result<()> {
        let token = self.token().await?;
        let store = &self.store;
        let token = token.as_str();
        self.retry
            .execute(move || async move { store.delete(token, remote).await })
            .await
            .inspect_err(|e| error!("Failed to remove {}: {}", remote, e))?;

        info!("File {} removed", remote);
        Ok(())
    }

    /// Rename a remote file within its folder.
    pub async fn rename_file(&mut self, remote: &RemotePath, new_name: &str) -> Result<RemotePath> {
        let target = remote.with_name(new_name)?;

        let token = self.token().await?;
        let store = &self.store;
        let token = token.as_str();
        let destination = &target;
        self.retry
            .execute(move || async move { store.move_to(token, remote, destination).await })
            .await
            .inspect_err(|e| error!("Failed to rename {}: {}", remote, e))?;

        info!("File {} renamed to {}", remote, target);
        Ok(target)
    }

    /// The file in `folder` with the latest server modification time.
    pub async fn get_most_recent_file(&mut self, folder: &RemotePath) -> Result<Option<RemotePath>> {
        let entries = self
            .list_all(folder, false)
            .await
            .inspect_err(|e| error!("Failed to list {}: {}", folder, e))?;

        let latest = entries
            .into_iter()
            .filter_map(Entry::into_file)
            .max_by_key(|file| file.server_modified);

        match latest {
            Some(file) => {
                let path = display_path(&file)?;
                debug!("Most recent file in {}: {}", folder, path);
                Ok(Some(path))
            }
            None => {
                info!("No files found in {}", folder);
                Ok(None)
            }
        }
    }

    /// Whether a file or folder exists at `remote`.
    ///
    /// # Errors
    /// Failures other than "not found" are returned, not folded into `false`.
    pub async fn file_exists(&mut self, remote: &RemotePath) -> Result<bool> {
        if remote.is_root() {
            return Ok(true);
        }

        let token = self.token().await?;
        let store = &self.store;
        let token = token.as_str();
        let result = self
            .retry
            .execute(move || async move { store.get_metadata(token, remote).await })
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!("{} does not exist", remote);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to check {}: {}", remote, e);
                Err(e)
            }
        }
    }

    /// Every entry of a listing, following continuation cursors.
    async fn list_all(&mut self, folder: &RemotePath, recursive: bool) -> Result<Vec<Entry>> {
        let token = self.token().await?;
        let store = &self.store;
        let token = token.as_str();

        let mut page = self
            .retry
            .execute(move || async move { store.list_folder(token, folder, recursive).await })
            .await?;
        let mut entries = std::mem::take(&mut page.entries);

        while page.has_more {
            let next = std::mem::take(&mut page.cursor);
            let cursor = next.as_str();
            page = self
                .retry
                .execute(move || async move { store.list_folder_continue(token, cursor).await })
                .await?;
            entries.append(&mut page.entries);
        }

        debug!("Listed {} entries in {}", entries.len(), folder);
        Ok(entries)
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Pattern>> {
    pattern
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| Error::InvalidInput(format!("Invalid pattern {}: {}", p, e)))
        })
        .transpose()
}

fn name_matches(pattern: Option<&Pattern>, name: &str) -> bool {
    pattern.map_or(true, |p| p.matches(name))
}

/// Remote path of a listed file in display casing.
fn display_path(file: &FileEntry) -> Result<RemotePath> {
    match file.path_display.as_deref() {
        Some(display) => RemotePath::parse(display),
        None => file.path(),
    }
}

fn default_local_path(remote: &RemotePath) -> Result<PathBuf> {
    let name = remote
        .name()
        .ok_or_else(|| Error::InvalidInput("Cannot download the root folder".to_string()))?;
    Ok(std::env::current_dir()?.join(name))
}

/// All regular files below `root`, sorted.
async fn walk_local(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
