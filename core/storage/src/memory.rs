//! In-memory remote store for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use valuestocks_common::{Error, RemotePath, Result};

use crate::auth::TokenSource;
use crate::store::{Entry, FileEntry, FolderEntry, ListPage, RemoteStore};

#[derive(Debug, Clone)]
struct StoredFile {
    id: String,
    display: String,
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    /// Files keyed by lowercased path.
    files: BTreeMap<String, StoredFile>,
    /// Explicitly created folders, lowercased key to display path.
    folders: BTreeMap<String, String>,
    /// Remaining entries per pagination cursor.
    cursors: HashMap<String, Vec<Entry>>,
    valid_tokens: HashSet<String>,
    issued_tokens: u32,
    reject_new_tokens: bool,
    pending_failures: u32,
    downloads: HashMap<String, u32>,
}

impl State {
    fn authorize(&self, token: &str) -> Result<()> {
        if self.valid_tokens.contains(token) {
            Ok(())
        } else {
            Err(Error::Authentication("invalid_access_token".to_string()))
        }
    }

    fn take_failure(&mut self) -> Result<()> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(Error::Network("injected transient failure".to_string()));
        }
        Ok(())
    }

    /// Every folder, explicit or implied by a file path, keyed lowercase.
    fn all_folders(&self) -> BTreeMap<String, String> {
        let mut folders = self.folders.clone();
        for file in self.files.values() {
            let mut path = RemotePath::parse(&file.display).ok().and_then(|p| p.parent());
            while let Some(parent) = path {
                if parent.is_root() {
                    break;
                }
                folders
                    .entry(parent.to_lowercase().to_string_path())
                    .or_insert_with(|| parent.to_string_path());
                path = parent.parent();
            }
        }
        folders
    }

    fn paginate(&mut self, mut entries: Vec<Entry>, page_size: usize) -> ListPage {
        let rest = if entries.len() > page_size {
            entries.split_off(page_size)
        } else {
            Vec::new()
        };

        let cursor = Uuid::new_v4().to_string();
        let has_more = !rest.is_empty();
        if has_more {
            self.cursors.insert(cursor.clone(), rest);
        }

        ListPage {
            entries,
            cursor,
            has_more,
        }
    }
}

fn file_entry(file: &StoredFile) -> FileEntry {
    FileEntry {
        id: file.id.clone(),
        name: file.display.rsplit('/').next().unwrap_or_default().to_string(),
        path_lower: Some(file.display.to_lowercase()),
        path_display: Some(file.display.clone()),
        server_modified: file.modified,
        size: file.data.len() as u64,
    }
}

fn folder_entry(display: &str) -> FolderEntry {
    FolderEntry {
        id: format!("id:{}", display.to_lowercase()),
        name: display.rsplit('/').next().unwrap_or_default().to_string(),
        path_lower: Some(display.to_lowercase()),
        path_display: Some(display.to_string()),
    }
}

fn key(path: &RemotePath) -> String {
    path.to_lowercase().to_string_path()
}

fn is_child(candidate: &str, folder: &str, recursive: bool) -> bool {
    let prefix = if folder == "/" {
        "/".to_string()
    } else {
        format!("{}/", folder)
    };

    match candidate.strip_prefix(&prefix) {
        Some(rest) if !rest.is_empty() => recursive || !rest.contains('/'),
        _ => false,
    }
}

/// In-memory remote store.
///
/// Useful for testing. Clones share the same contents, so a test can keep a
/// handle for inspection after moving one into a client. Tokens are valid
/// only if they were minted by this store's `token_source`.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    page_size: usize,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            page_size: 100,
        }
    }

    /// Limit how many entries each listing page carries.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// A token source whose tokens this store accepts.
    pub fn token_source(&self) -> MemoryTokenSource {
        MemoryTokenSource {
            state: self.state.clone(),
        }
    }

    /// Number of tokens minted so far.
    pub fn issued_tokens(&self) -> u32 {
        self.state.read().unwrap().issued_tokens
    }

    /// Invalidate every token minted so far.
    pub fn revoke_tokens(&self) {
        self.state.write().unwrap().valid_tokens.clear();
    }

    /// Make newly minted tokens invalid from the start.
    pub fn reject_new_tokens(&self, reject: bool) {
        self.state.write().unwrap().reject_new_tokens = reject;
    }

    /// Fail the next `count` data operations with a transient network error.
    pub fn fail_next(&self, count: u32) {
        self.state.write().unwrap().pending_failures = count;
    }

    /// Store a file directly, bypassing authentication.
    pub fn put_file(&self, path: &str, data: impl Into<Vec<u8>>, modified: DateTime<Utc>) {
        let display = RemotePath::parse(path)
            .map(|p| p.to_string_path())
            .unwrap_or_else(|_| path.to_string());
        let file = StoredFile {
            id: format!("id:{}", Uuid::new_v4()),
            display: display.clone(),
            data: data.into(),
            modified,
        };
        self.state
            .write()
            .unwrap()
            .files
            .insert(display.to_lowercase(), file);
    }

    /// Create an empty folder directly.
    pub fn put_folder(&self, path: &str) {
        let display = RemotePath::parse(path)
            .map(|p| p.to_string_path())
            .unwrap_or_else(|_| path.to_string());
        self.state
            .write()
            .unwrap()
            .folders
            .insert(display.to_lowercase(), display);
    }

    /// Content of a stored file.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .unwrap()
            .files
            .get(&path.to_lowercase())
            .map(|f| f.data.clone())
    }

    /// Display paths of all stored files, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut paths: Vec<String> = state.files.values().map(|f| f.display.clone()).collect();
        paths.sort();
        paths
    }

    /// How many times the file at `path` has been downloaded.
    pub fn download_count(&self, path: &str) -> u32 {
        self.state
            .read()
            .unwrap()
            .downloads
            .get(&path.to_lowercase())
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn current_account(&self, token: &str) -> Result<()> {
        self.state.read().unwrap().authorize(token)
    }

    async fn upload(&self, token: &str, path: &RemotePath, data: Vec<u8>) -> Result<FileEntry> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        if path.is_root() {
            return Err(Error::Api {
                status: 400,
                summary: "path/malformed_path/".to_string(),
            });
        }
        if state.all_folders().contains_key(&key(path)) {
            return Err(Error::Api {
                status: 409,
                summary: "path/conflict/folder/".to_string(),
            });
        }

        let id = state
            .files
            .get(&key(path))
            .map(|f| f.id.clone())
            .unwrap_or_else(|| format!("id:{}", Uuid::new_v4()));
        let file = StoredFile {
            id,
            display: path.to_string_path(),
            data,
            modified: Utc::now(),
        };
        let entry = file_entry(&file);
        state.files.insert(key(path), file);

        Ok(entry)
    }

    async fn download(&self, token: &str, path: &RemotePath) -> Result<Bytes> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        let data = match state.files.get(&key(path)) {
            Some(file) => file.data.clone(),
            None => return Err(Error::NotFound(format!("path/not_found/: {}", path))),
        };
        *state.downloads.entry(key(path)).or_insert(0) += 1;

        Ok(Bytes::from(data))
    }

    async fn list_folder(&self, token: &str, path: &RemotePath, recursive: bool) -> Result<ListPage> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        let folder = key(path);
        let folders = state.all_folders();
        if !path.is_root() && !folders.contains_key(&folder) {
            return Err(Error::NotFound(format!("path/not_found/: {}", path)));
        }

        let mut entries: Vec<Entry> = folders
            .iter()
            .filter(|(lower, _)| is_child(lower, &folder, recursive))
            .map(|(_, display)| Entry::Folder(folder_entry(display)))
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(lower, _)| is_child(lower, &folder, recursive))
                .map(|(_, file)| Entry::File(file_entry(file))),
        );

        let page_size = self.page_size;
        Ok(state.paginate(entries, page_size))
    }

    async fn list_folder_continue(&self, token: &str, cursor: &str) -> Result<ListPage> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        let entries = state.cursors.remove(cursor).ok_or_else(|| Error::Api {
            status: 409,
            summary: "reset/".to_string(),
        })?;

        let page_size = self.page_size;
        Ok(state.paginate(entries, page_size))
    }

    async fn get_metadata(&self, token: &str, path: &RemotePath) -> Result<Entry> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        if path.is_root() {
            return Err(Error::Api {
                status: 400,
                summary: "get_metadata does not support the root folder".to_string(),
            });
        }

        if let Some(file) = state.files.get(&key(path)) {
            return Ok(Entry::File(file_entry(file)));
        }
        match state.all_folders().get(&key(path)) {
            Some(display) => Ok(Entry::Folder(folder_entry(display))),
            None => Err(Error::NotFound(format!("path/not_found/: {}", path))),
        }
    }

    async fn delete(&self, token: &str, path: &RemotePath) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        let target = key(path);
        if state.files.remove(&target).is_some() {
            return Ok(());
        }

        if !state.all_folders().contains_key(&target) {
            return Err(Error::NotFound(format!("path_lookup/not_found/: {}", path)));
        }
        state.files.retain(|lower, _| !is_child(lower, &target, true));
        state
            .folders
            .retain(|lower, _| lower != &target && !is_child(lower, &target, true));
        Ok(())
    }

    async fn move_to(&self, token: &str, from: &RemotePath, to: &RemotePath) -> Result<Entry> {
        let mut state = self.state.write().unwrap();
        state.authorize(token)?;
        state.take_failure()?;

        if state.files.contains_key(&key(to)) || state.all_folders().contains_key(&key(to)) {
            return Err(Error::Api {
                status: 409,
                summary: "to/conflict/file/".to_string(),
            });
        }

        let mut file = state
            .files
            .remove(&key(from))
            .ok_or_else(|| Error::NotFound(format!("from_lookup/not_found/: {}", from)))?;
        file.display = to.to_string_path();
        let entry = file_entry(&file);
        state.files.insert(key(to), file);

        Ok(Entry::File(entry))
    }
}

/// Token source paired with a `MemoryStore`.
pub struct MemoryTokenSource {
    state: Arc<RwLock<State>>,
}

#[async_trait]
impl TokenSource for MemoryTokenSource {
    async fn obtain_token(&self) -> Result<String> {
        let mut state = self.state.write().unwrap();
        state.issued_tokens += 1;
        let token = format!("token-{}", state.issued_tokens);
        if !state.reject_new_tokens {
            state.valid_tokens.insert(token.clone());
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn authorized() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let token = store.token_source().obtain_token().await.unwrap();
        (store, token)
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (store, token) = authorized().await;
        let path = RemotePath::parse("/Reports/a.csv").unwrap();

        let entry = store.upload(&token, &path, b"x,y".to_vec()).await.unwrap();
        assert_eq!(entry.name, "a.csv");
        assert_eq!(entry.path_lower.as_deref(), Some("/reports/a.csv"));

        let data = store.download(&token, &path).await.unwrap();
        assert_eq!(&data[..], b"x,y");
        assert_eq!(store.download_count("/Reports/a.csv"), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let store = MemoryStore::new();
        let result = store.current_account("forged").await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_list_folder_paginates_and_separates_depths() {
        let (store, token) = authorized().await;
        let store = store.with_page_size(2);
        let now = Utc::now();
        store.put_file("/data/a.csv", "a", now);
        store.put_file("/data/b.csv", "b", now);
        store.put_file("/data/nested/c.csv", "c", now);

        let folder = RemotePath::parse("/data").unwrap();
        let first = store.list_folder(&token, &folder, false).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert!(first.has_more);

        let second = store.list_folder_continue(&token, &first.cursor).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(!second.has_more);

        let recursive = store.list_folder(&token, &folder, true).await.unwrap();
        let rest = store
            .list_folder_continue(&token, &recursive.cursor)
            .await
            .unwrap();
        let files = recursive
            .entries
            .iter()
            .chain(rest.entries.iter())
            .filter(|e| e.as_file().is_some())
            .count();
        assert_eq!(files, 3);
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_found() {
        let (store, token) = authorized().await;
        let missing = RemotePath::parse("/nope.csv").unwrap();

        assert!(store.get_metadata(&token, &missing).await.unwrap_err().is_not_found());
        assert!(store.download(&token, &missing).await.unwrap_err().is_not_found());
        assert!(store.delete(&token, &missing).await.unwrap_err().is_not_found());
        assert!(store
            .list_folder(&token, &missing, false)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let (store, token) = authorized().await;
        store.fail_next(1);
        let path = RemotePath::parse("/a.txt").unwrap();

        assert!(matches!(
            store.upload(&token, &path, vec![1]).await,
            Err(Error::Network(_))
        ));
        assert!(store.upload(&token, &path, vec![1]).await.is_ok());
    }
}
