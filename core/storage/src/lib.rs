//! Remote storage access for ValueStocks.
//!
//! This crate provides a trait-based interface to a path-addressed remote
//! object store and a client façade on top of it that handles access tokens
//! and retries.
//!
//! # Layers
//! - `RemoteStore`: one method per remote call, bearer token passed in
//! - `TokenManager`: probes the current token and refreshes it when rejected
//! - `RetryExecutor`: exponential backoff for transient failures
//! - `StorageClient`: file and folder operations used by the pipeline

pub mod auth;
pub mod client;
pub mod dropbox;
pub mod memory;
pub mod retry;
pub mod store;

pub use auth::{CredentialOverrides, Credentials, TokenManager, TokenSource};
pub use client::{DropboxStorageClient, StorageClient, TransferReport};
pub use dropbox::{DropboxApi, DropboxEndpoints, OAuthTokenSource};
pub use memory::{MemoryStore, MemoryTokenSource};
pub use retry::{retry, RetryExecutor, RetryPolicy};
pub use store::{Entry, FileEntry, ListPage, RemoteStore};
