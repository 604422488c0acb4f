//! GitHub remote store over the Git Data API.
//!
//! Reads go through the contents API at the configured branch. Commits are
//! built bottom-up:
//! - one blob per file
//! - a tree layered on the head commit's tree (`base_tree`)
//! - a commit whose single parent is the observed head
//! - a non-forced ref update
//!
//! GitHub refuses that last step with 409/422 when the branch moved after
//! the head was read. That refusal is reported as `StoreError::RefConflict`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ctxpack_core::error::StoreError;
use ctxpack_core::store::{FileContent, FileWrite, RemoteStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("ctxpack/", env!("CARGO_PKG_VERSION"));
const BLOB_MODE: &str = "100644";

/// GitHub repository branch used as the canonical document store.
pub struct GitHubStore {
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GitHubStore {
    /// Create a store for `owner/repo` at `branch`.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let owner = owner.into();
        let repo = repo.into();
        if owner.is_empty() || repo.is_empty() {
            return Err(StoreError::NotConfigured(
                "store.owner and store.repo must be set (or CTXPACK_REPO=owner/repo)".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoreError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            owner,
            repo,
            branch: branch.into(),
            token,
            base_url: DEFAULT_BASE_URL.into(),
            client,
        })
    }

    /// Use a custom API base URL (GitHub Enterprise or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Repository API URL; each segment is percent-encoded on its own.
    fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<reqwest::Url, StoreError> {
        let invalid = |reason: String| {
            StoreError::NotConfigured(format!("api_url '{}': {reason}", self.base_url))
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("not a base URL".into()))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str()])
            .extend(segments);
        Ok(url)
    }

    /// `git/{kind}/heads/{branch}`, keeping slashes in the branch name.
    fn branch_url(&self, kind: &str) -> Result<reqwest::Url, StoreError> {
        self.url(["git", kind, "heads"].into_iter().chain(self.branch.split('/')))
    }

    fn request(&self, method: reqwest::Method, url: reqwest::Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and decode a successful JSON response.
    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, what, body = %body, "GitHub API error");
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(format!("{what}: {e}")))
    }

    async fn create_blob(&self, content: &str) -> Result<String, StoreError> {
        let body = serde_json::json!({ "content": content, "encoding": "utf-8" });
        let blob: ShaResponse = self
            .send(
                self.request(reqwest::Method::POST, self.url(["git", "blobs"])?)
                    .json(&body),
                "create blob",
            )
            .await?;
        Ok(blob.sha)
    }

    async fn update_ref(&self, commit_sha: &str) -> Result<(), StoreError> {
        let url = self.branch_url("refs")?;
        let body = serde_json::json!({ "sha": commit_sha, "force": false });
        let result = self
            .send::<serde_json::Value>(
                self.request(reqwest::Method::PATCH, url).json(&body),
                "update ref",
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(StoreError::Api {
                status_code: 409 | 422,
                message,
            }) => Err(StoreError::RefConflict {
                branch: self.branch.clone(),
                message,
            }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteStore for GitHubStore {
    fn name(&self) -> &str {
        "github"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn head(&self) -> Result<String, StoreError> {
        let url = self.branch_url("ref")?;
        let reference: RefResponse = self
            .send(self.request(reqwest::Method::GET, url), "read ref")
            .await?;
        Ok(reference.object.sha)
    }

    async fn read_file(&self, path: &str) -> Result<Option<FileContent>, StoreError> {
        let url = self.url(["contents"].into_iter().chain(path.split('/')))?;
        debug!(store = "github", path, branch = %self.branch, "Reading file");

        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, path, body = %body, "GitHub contents API error");
            return Err(classify_status(status, &body));
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("contents of {path}: {e}")))?;
        contents.into_file(path).map(Some)
    }

    async fn commit_files(&self, files: &[FileWrite], message: &str) -> Result<String, StoreError> {
        let head = self.head().await?;
        if files.is_empty() {
            return Ok(head);
        }

        let base: CommitResponse = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    self.url(["git", "commits", head.as_str()])?,
                ),
                "read commit",
            )
            .await?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let sha = self.create_blob(&file.content).await?;
            entries.push(TreeEntry::blob(&file.path, sha));
        }

        let tree: ShaResponse = self
            .send(
                self.request(reqwest::Method::POST, self.url(["git", "trees"])?)
                    .json(&serde_json::json!({ "base_tree": base.tree.sha, "tree": entries })),
                "create tree",
            )
            .await?;

        let commit: ShaResponse = self
            .send(
                self.request(reqwest::Method::POST, self.url(["git", "commits"])?)
                    .json(&serde_json::json!({
                        "message": message,
                        "tree": tree.sha,
                        "parents": [head],
                    })),
                "create commit",
            )
            .await?;

        self.update_ref(&commit.sha).await?;

        info!(
            store = "github",
            branch = %self.branch,
            commit = %commit.sha,
            parent = %head,
            files = files.len(),
            "Committed files"
        );
        Ok(commit.sha)
    }
}

/// Map a non-success status to a store error.
fn classify_status(status: u16, body: &str) -> StoreError {
    let message = api_message(body);
    match status {
        401 | 403 => StoreError::AuthenticationFailed(message),
        _ => StoreError::Api {
            status_code: status,
            message,
        },
    }
}

/// GitHub error bodies look like `{"message": "...", "documentation_url": ...}`.
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Decode a base64 contents payload; GitHub wraps it at 60 columns.
fn decode_content(encoded: &str) -> Result<String, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Decode(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Decode(format!("file is not UTF-8: {e}")))
}

// --- API payloads ---

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentsResponse {
    fn into_file(self, path: &str) -> Result<FileContent, StoreError> {
        if self.kind != "file" {
            return Err(StoreError::Decode(format!(
                "{path} is a {}, not a file",
                self.kind
            )));
        }
        let content = match (self.encoding.as_deref(), self.content) {
            (Some("base64"), Some(encoded)) => decode_content(&encoded)?,
            (None, Some(raw)) => raw,
            (encoding, _) => {
                return Err(StoreError::Decode(format!(
                    "{path}: unsupported contents encoding {encoding:?}"
                )));
            }
        };
        Ok(FileContent {
            path: path.to_string(),
            content,
            sha: self.sha,
        })
    }
}

#[derive(Debug, Serialize)]
struct TreeEntry {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: String,
}

impl TreeEntry {
    fn blob(path: &str, sha: String) -> Self {
        Self {
            path: path.to_string(),
            mode: BLOB_MODE,
            kind: "blob",
            sha,
        }
    }
}
