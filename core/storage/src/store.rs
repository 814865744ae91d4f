//! Remote store trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use valuestocks_common::{RemotePath, Result};

/// Metadata for a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Provider-assigned identifier.
    pub id: String,
    /// Last path component, in the casing the user gave it.
    pub name: String,
    /// Lowercased full path.
    #[serde(default)]
    pub path_lower: Option<String>,
    /// Full path in display casing.
    #[serde(default)]
    pub path_display: Option<String>,
    /// When the server last saw this file change.
    pub server_modified: DateTime<Utc>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl FileEntry {
    /// Remote path of this file, preferring the canonical lowercased form.
    pub fn path(&self) -> Result<RemotePath> {
        let raw = self
            .path_lower
            .as_deref()
            .or(self.path_display.as_deref())
            .unwrap_or(&self.name);
        RemotePath::parse(raw)
    }
}

/// Metadata for a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
}

/// Tombstone for a deleted object, reported by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Entry {
    File(FileEntry),
    Folder(FolderEntry),
    Deleted(DeletedEntry),
}

impl Entry {
    /// The file metadata, if this entry is a file.
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(file) => Some(file),
            _ => None,
        }
    }

    /// Take the file metadata, if this entry is a file.
    pub fn into_file(self) -> Option<FileEntry> {
        match self {
            Entry::File(file) => Some(file),
            _ => None,
        }
    }
}

/// One page of a cursor-paginated folder listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub entries: Vec<Entry>,
    /// Opaque continuation token for the next page.
    pub cursor: String,
    pub has_more: bool,
}

/// Path-addressed remote object store.
///
/// Every call carries the bearer token to present. Implementations do not
/// refresh tokens themselves; a rejected token surfaces as
/// `Error::Authentication` and the caller decides what to do.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "dropbox", "memory").
    fn name(&self) -> &str;

    /// Cheap authenticated call used to probe token validity.
    async fn current_account(&self, token: &str) -> Result<()>;

    /// Create or overwrite the file at `path`.
    async fn upload(&self, token: &str, path: &RemotePath, data: Vec<u8>) -> Result<FileEntry>;

    /// Fetch the complete content of the file at `path`.
    ///
    /// # Errors
    /// - `Error::NotFound` if nothing exists at `path`
    async fn download(&self, token: &str, path: &RemotePath) -> Result<Bytes>;

    /// Start listing a folder.
    ///
    /// With `recursive`, entries of all descendant folders are included.
    async fn list_folder(&self, token: &str, path: &RemotePath, recursive: bool) -> Result<ListPage>;

    /// Fetch the page following `cursor`.
    async fn list_folder_continue(&self, token: &str, cursor: &str) -> Result<ListPage>;

    /// Get metadata for a file or folder.
    ///
    /// # Errors
    /// - `Error::NotFound` if nothing exists at `path`
    async fn get_metadata(&self, token: &str, path: &RemotePath) -> Result<Entry>;

    /// Delete the file or folder at `path`.
    async fn delete(&self, token: &str, path: &RemotePath) -> Result<()>;

    /// Move `from` to `to`.
    async fn move_to(&self, token: &str, from: &RemotePath, to: &RemotePath) -> Result<Entry>;
}
