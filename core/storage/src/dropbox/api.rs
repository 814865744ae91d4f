//! Dropbox HTTP API v2 client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

use valuestocks_common::{Error, RemotePath, Result};

use super::auth::DROPBOX_TOKEN_URL;
use crate::store::{Entry, FileEntry, ListPage, RemoteStore};

/// Base URL for RPC-style endpoints.
pub const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com/2/";
/// Base URL for content upload/download endpoints.
pub const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com/2/";

/// Header carrying the JSON argument of content endpoints.
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
/// Header carrying the JSON result of a download.
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the Dropbox API lives.
#[derive(Debug, Clone)]
pub struct DropboxEndpoints {
    pub api_base: Url,
    pub content_base: Url,
    pub token_url: String,
}

impl DropboxEndpoints {
    /// Create an endpoint set from explicit base URLs.
    ///
    /// # Errors
    /// - `Error::Config` if a base URL does not parse
    pub fn new(api_base: &str, content_base: &str, token_url: &str) -> Result<Self> {
        Ok(Self {
            api_base: parse_base(api_base)?,
            content_base: parse_base(content_base)?,
            token_url: token_url.to_string(),
        })
    }

    /// Serve every endpoint from one host, e.g. a local mock server.
    pub fn from_base(base: &str) -> Result<Self> {
        let base = base.trim_end_matches('/');
        Self::new(
            &format!("{}/2/", base),
            &format!("{}/2/", base),
            &format!("{}/oauth2/token", base),
        )
    }
}

impl Default for DropboxEndpoints {
    fn default() -> Self {
        Self::new(DROPBOX_API_BASE, DROPBOX_CONTENT_BASE, DROPBOX_TOKEN_URL)
            .expect("built-in Dropbox endpoints are valid URLs")
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).map_err(|e| Error::Config(format!("Invalid base URL {}: {}", raw, e)))
}

/// Error body returned by Dropbox endpoints.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_summary: String,
}

/// Wrapper around the metadata returned by mutation endpoints.
#[derive(Debug, Deserialize)]
struct MetadataResult {
    metadata: Entry,
}

#[derive(Debug, Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
    mute: bool,
}

/// Dropbox API client implementing `RemoteStore`.
pub struct DropboxApi {
    http: Client,
    endpoints: DropboxEndpoints,
}

impl DropboxApi {
    /// Create a new Dropbox client.
    pub fn new(endpoints: DropboxEndpoints) -> Result<Self> {
        Self::with_timeout(endpoints, DEFAULT_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(endpoints: DropboxEndpoints, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("valuestocks/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, endpoints })
    }

    /// Get the configured endpoints.
    pub fn endpoints(&self) -> &DropboxEndpoints {
        &self.endpoints
    }

    fn api_url(&self, route: &str) -> Result<Url> {
        self.endpoints
            .api_base
            .join(route)
            .map_err(|e| Error::InvalidInput(format!("Invalid route {}: {}", route, e)))
    }

    fn content_url(&self, route: &str) -> Result<Url> {
        self.endpoints
            .content_base
            .join(route)
            .map_err(|e| Error::InvalidInput(format!("Invalid route {}: {}", route, e)))
    }

    /// Call an RPC endpoint with a JSON argument.
    async fn rpc<T: DeserializeOwned>(
        &self,
        token: &str,
        route: &str,
        arg: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.api_url(route)?)
            .bearer_auth(token)
            .json(&arg)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to call {}: {}", route, e)))?;

        parse_json(check_response(response).await?, route).await
    }
}

/// Decode a successful response body.
///
/// A body that cannot be read is a transport failure; a body that does not
/// decode is a `Serialization` error and is not retried.
async fn parse_json<T: DeserializeOwned>(response: Response, route: &str) -> Result<T> {
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Network(format!("Failed to read {} response: {}", route, e)))?;

    serde_json::from_slice(&body)
        .map_err(|e| Error::Serialization(format!("Unexpected {} response: {}", route, e)))
}

/// Pass successful responses through; map failures onto the error taxonomy.
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(map_error(status, &body))
}

fn map_error(status: StatusCode, body: &str) -> Error {
    let summary = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error_summary)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(summary),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(summary),
        StatusCode::CONFLICT if summary.contains("not_found") => Error::NotFound(summary),
        _ => Error::Api {
            status: status.as_u16(),
            summary,
        },
    }
}

/// Serialize a header argument, escaping non-ASCII as JSON `\u` sequences.
///
/// HTTP header values must be ASCII.
fn api_arg<T: Serialize>(arg: &T) -> Result<String> {
    let json = serde_json::to_string(arg)
        .map_err(|e| Error::Serialization(format!("Failed to encode API argument: {}", e)))?;

    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units).iter() {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}

#[async_trait]
impl RemoteStore for DropboxApi {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn current_account(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.api_url("users/get_current_account")?)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .body("null")
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to probe account: {}", e)))?;

        check_response(response).await.map(|_| ())
    }

    async fn upload(&self, token: &str, path: &RemotePath, data: Vec<u8>) -> Result<FileEntry> {
        let api_path = path.to_api_path();
        let arg = api_arg(&UploadArg {
            path: &api_path,
            mode: "overwrite",
            autorename: false,
            mute: true,
        })?;

        let response = self
            .http
            .post(self.content_url("files/upload")?)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload file: {}", e)))?;

        parse_json(check_response(response).await?, "files/upload").await
    }

    async fn download(&self, token: &str, path: &RemotePath) -> Result<Bytes> {
        let arg = api_arg(&json!({ "path": path.to_api_path() }))?;

        let response = self
            .http
            .post(self.content_url("files/download")?)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download file: {}", e)))?;

        let response = check_response(response).await?;
        if let Some(result) = response.headers().get(API_RESULT_HEADER) {
            tracing::debug!("Download metadata for {}: {:?}", path, result);
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read download response: {}", e)))
    }

    async fn list_folder(&self, token: &str, path: &RemotePath, recursive: bool) -> Result<ListPage> {
        self.rpc(
            token,
            "files/list_folder",
            json!({ "path": path.to_api_path(), "recursive": recursive }),
        )
        .await
    }

    async fn list_folder_continue(&self, token: &str, cursor: &str) -> Result<ListPage> {
        self.rpc(token, "files/list_folder/continue", json!({ "cursor": cursor }))
            .await
    }

    async fn get_metadata(&self, token: &str, path: &RemotePath) -> Result<Entry> {
        self.rpc(token, "files/get_metadata", json!({ "path": path.to_api_path() }))
            .await
    }

    async fn delete(&self, token: &str, path: &RemotePath) -> Result<()> {
        let _: MetadataResult = self
            .rpc(token, "files/delete_v2", json!({ "path": path.to_api_path() }))
            .await?;
        Ok(())
    }

    async fn move_to(&self, token: &str, from: &RemotePath, to: &RemotePath) -> Result<Entry> {
        let result: MetadataResult = self
            .rpc(
                token,
                "files/move_v2",
                json!({
                    "from_path": from.to_api_path(),
                    "to_path": to.to_api_path(),
                    "autorename": false
                }),
            )
            .await?;
        Ok(result.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header as header_is, header_exists, method, path as path_is};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn file_json(name: &str, folder: &str) -> serde_json::Value {
        json!({
            ".tag": "file",
            "name": name,
            "id": format!("id:{}", name),
            "server_modified": "2024-01-12T13:06:26Z",
            "size": 10,
            "path_lower": format!("{}/{}", folder, name.to_lowercase()),
            "path_display": format!("{}/{}", folder, name)
        })
    }

    async fn api(server: &MockServer) -> DropboxApi {
        DropboxApi::new(DropboxEndpoints::from_base(&server.uri()).unwrap()).unwrap()
    }

    #[test]
    fn test_api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/Fundamentals/é😀.csv" })).unwrap();
        assert!(arg.is_ascii());
        assert_eq!(arg, r#"{"path":"/Fundamentals/\u00e9\ud83d\ude00.csv"}"#);

        let decoded: serde_json::Value = serde_json::from_str(&arg).unwrap();
        assert_eq!(decoded["path"], "/Fundamentals/é😀.csv");
    }

    #[test]
    fn test_error_mapping() {
        let not_found = map_error(
            StatusCode::CONFLICT,
            r#"{"error_summary": "path/not_found/..", "error": {".tag": "path"}}"#,
        );
        assert!(matches!(not_found, Error::NotFound(_)));

        let conflict = map_error(
            StatusCode::CONFLICT,
            r#"{"error_summary": "to/conflict/file/..", "error": {}}"#,
        );
        assert!(matches!(conflict, Error::Api { status: 409, .. }));
        assert!(!conflict.is_retryable());

        let expired = map_error(
            StatusCode::UNAUTHORIZED,
            r#"{"error_summary": "expired_access_token/", "error": {}}"#,
        );
        assert!(matches!(expired, Error::Authentication(s) if s == "expired_access_token/"));

        assert!(map_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(map_error(StatusCode::SERVICE_UNAVAILABLE, "upstream").is_retryable());

        let bad_request = map_error(StatusCode::BAD_REQUEST, "Error in call to API function\n");
        assert!(
            matches!(bad_request, Error::Api { status: 400, ref summary } if summary == "Error in call to API function")
        );
    }

    #[test]
    fn test_endpoints_from_base() {
        let endpoints = DropboxEndpoints::from_base("http://127.0.0.1:9000/").unwrap();
        assert_eq!(endpoints.api_base.as_str(), "http://127.0.0.1:9000/2/");
        assert_eq!(endpoints.token_url, "http://127.0.0.1:9000/oauth2/token");
        assert_eq!(
            DropboxEndpoints::default().api_base.as_str(),
            DROPBOX_API_BASE
        );
    }

    #[tokio::test]
    async fn test_list_folder_follows_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_is("/2/files/list_folder"))
            .and(header_is("authorization", "Bearer tok"))
            .and(body_json(json!({ "path": "/reports", "recursive": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [file_json("a.csv", "/reports")],
                "cursor": "cursor-1",
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_is("/2/files/list_folder/continue"))
            .and(body_json(json!({ "cursor": "cursor-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    file_json("b.csv", "/reports"),
                    { ".tag": "folder", "name": "old", "id": "id:old",
                      "path_lower": "/reports/old", "path_display": "/reports/old" }
                ],
                "cursor": "cursor-2",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await;
        let folder = RemotePath::parse("/reports").unwrap();

        let first = api.list_folder("tok", &folder, false).await.unwrap();
        assert!(first.has_more);
        assert_eq!(first.entries[0].as_file().unwrap().name, "a.csv");

        let second = api.list_folder_continue("tok", &first.cursor).await.unwrap();
        assert!(!second.has_more);
        assert_eq!(second.entries.len(), 2);
        assert!(matches!(second.entries[1], Entry::Folder(_)));
    }

    #[tokio::test]
    async fn test_get_metadata_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_is("/2/files/get_metadata"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error_summary": "path/not_found/...",
                "error": { ".tag": "path", "path": { ".tag": "not_found" } }
            })))
            .mount(&server)
            .await;

        let api = api(&server).await;
        let result = api
            .get_metadata("tok", &RemotePath::parse("/missing.csv").unwrap())
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_is("/2/files/list_folder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_is("/2/files/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let api = api(&server).await;
        let listed = api
            .list_folder("tok", &RemotePath::parse("/reports").unwrap(), false)
            .await
            .unwrap_err();
        assert!(matches!(listed, Error::Serialization(_)));
        assert!(!listed.is_retryable());

        let uploaded = api
            .upload("tok", &RemotePath::parse("/a.csv").unwrap(), vec![1])
            .await
            .unwrap_err();
        assert!(matches!(uploaded, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_upload_and_download_use_content_endpoints() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_is("/2/files/upload"))
            .and(header_exists("dropbox-api-arg"))
            .and(header_is("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "a.csv",
                "id": "id:a",
                "server_modified": "2024-01-12T13:06:26Z",
                "size": 3,
                "path_lower": "/reports/a.csv",
                "path_display": "/Reports/a.csv"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_is("/2/files/download"))
            .and(header_exists("dropbox-api-arg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x,y".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await;
        let remote = RemotePath::parse("/Reports/a.csv").unwrap();

        let entry = api.upload("tok", &remote, b"x,y".to_vec()).await.unwrap();
        assert_eq!(entry.size, 3);

        let data = api.download("tok", &remote).await.unwrap();
        assert_eq!(&data[..], b"x,y");
    }

    #[tokio::test]
    async fn test_probe_maps_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_is("/2/users/get_current_account"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error_summary": "invalid_access_token/",
                "error": { ".tag": "invalid_access_token" }
            })))
            .mount(&server)
            .await;

        let api = api(&server).await;
        assert!(matches!(
            api.current_account("stale").await,
            Err(Error::Authentication(_))
        ));
    }
}
