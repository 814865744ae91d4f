//! Dropbox storage backend.
//!
//! This module provides a remote store backed by the Dropbox HTTP API v2:
//! - OAuth2 refresh-token exchange for short-lived bearer tokens
//! - RPC and content endpoints with typed error mapping
//! - Cursor-based folder listing

pub mod api;
pub mod auth;

pub use api::{DropboxApi, DropboxEndpoints};
pub use auth::OAuthTokenSource;
