//! GitHub git data API backend.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use arbor_core::types::{BranchName, RepoRef};

use super::{
    CommitInfo, EntryType, NewBlob, ObjectId, RemoteConnector, RemoteEntry, RemoteError,
    RemoteStore,
};

const USER_AGENT: &str = concat!("arbor/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ShaOnly {
    sha: ObjectId,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaOnly,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: ObjectId,
    tree: ShaOnly,
    #[serde(default)]
    parents: Vec<ShaOnly>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<RemoteEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Serialize)]
struct TreeItem<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Shares one HTTP client between every token it connects.
#[derive(Debug, Clone)]
pub struct GithubConnector {
    client: Client,
    base: Url,
}

impl GithubConnector {
    /// `api_base` is `https://api.github.com` or a GitHub Enterprise
    /// `https://host/api/v3`.
    pub fn new(api_base: &str) -> Result<Self, RemoteError> {
        let mut base = api_base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| RemoteError::Decode(format!("invalid API base '{api_base}': {e}")))?;
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, base })
    }
}

impl RemoteConnector for GithubConnector {
    fn connect(&self, credential: &str) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        Ok(Arc::new(GithubStore {
            client: self.client.clone(),
            base: self.base.clone(),
            token: credential.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct GithubStore {
    client: Client,
    base: Url,
    token: String,
}

impl GithubStore {
    fn repo_url(&self, repo: &RepoRef, rest: &str) -> Result<Url, RemoteError> {
        let (owner, name) = repo
            .split()
            .ok_or_else(|| RemoteError::InvalidRepo(repo.to_string()))?;
        self.url(&format!("repos/{owner}/{name}/{rest}"))
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base
            .join(path)
            .map_err(|e| RemoteError::Decode(format!("bad request path '{path}': {e}")))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response, RemoteError> {
        tracing::debug!("{method} {url}");
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }
        check(request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        Ok(self.send::<()>(Method::GET, url, None).await?.json().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, RemoteError> {
        Ok(self.send(Method::POST, url, Some(body)).await?.json().await?)
    }
}

/// Map a non-success response onto [`RemoteError`].
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let message = match response.json::<ApiMessage>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        // 409 is what an empty repository answers for ref and tree reads.
        StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
            RemoteError::NotFound(format!("{url}: {message}"))
        }
        _ => RemoteError::Rejected {
            status: status.as_u16(),
            message,
        },
    })
}

fn decode_blob(blob: BlobResponse) -> Result<Vec<u8>, RemoteError> {
    match blob.encoding.as_str() {
        "base64" => {
            let compact: String = blob.content.split_whitespace().collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| RemoteError::Decode(format!("blob is not valid base64: {e}")))
        }
        "utf-8" | "utf8" => Ok(blob.content.into_bytes()),
        other => Err(RemoteError::Decode(format!("unknown blob encoding '{other}'"))),
    }
}

#[async_trait]
impl RemoteStore for GithubStore {
    async fn get_ref(&self, repo: &RepoRef, branch: &BranchName) -> Result<ObjectId, RemoteError> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{branch}"))?;
        let found: RefResponse = self.get(url).await?;
        Ok(found.object.sha)
    }

    async fn get_commit(&self, repo: &RepoRef, sha: &ObjectId) -> Result<CommitInfo, RemoteError> {
        let url = self.repo_url(repo, &format!("git/commits/{sha}"))?;
        let commit: CommitResponse = self.get(url).await?;
        Ok(CommitInfo {
            sha: commit.sha,
            tree: commit.tree.sha,
            parents: commit.parents.into_iter().map(|p| p.sha).collect(),
            message: commit.message,
        })
    }

    async fn get_tree(
        &self,
        repo: &RepoRef,
        sha: &ObjectId,
        recursive: bool,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut url = self.repo_url(repo, &format!("git/trees/{sha}"))?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }
        let listing: TreeResponse = self.get(url).await?;
        listing_entries(listing, &format!("{repo}@{sha}"))
    }

    async fn get_blob(&self, repo: &RepoRef, sha: &ObjectId) -> Result<Vec<u8>, RemoteError> {
        let url = self.repo_url(repo, &format!("git/blobs/{sha}"))?;
        decode_blob(self.get(url).await?)
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        base: Option<&ObjectId>,
        blobs: &[NewBlob],
    ) -> Result<ObjectId, RemoteError> {
        let url = self.repo_url(repo, "git/trees")?;
        let tree: Vec<TreeItem<'_>> = blobs
            .iter()
            .map(|b| TreeItem {
                path: &b.path,
                mode: "100644",
                kind: "blob",
                content: &b.content,
            })
            .collect();
        let mut body = serde_json::json!({ "tree": tree });
        if let Some(base) = base {
            body["base_tree"] = serde_json::Value::String(base.0.clone());
        }
        let created: ShaOnly = self.post(url, &body).await?;
        Ok(created.sha)
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        message: &str,
        tree: &ObjectId,
        parents: &[ObjectId],
    ) -> Result<ObjectId, RemoteError> {
        let url = self.repo_url(repo, "git/commits")?;
        let body = serde_json::json!({
            "message": message,
            "tree": tree,
            "parents": parents,
        });
        let created: ShaOnly = self.post(url, &body).await?;
        Ok(created.sha)
    }

    async fn update_ref(
        &self,
        repo: &RepoRef,
        branch: &BranchName,
        sha: &ObjectId,
    ) -> Result<(), RemoteError> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{branch}"))?;
        let body = serde_json::json!({ "sha": sha, "force": false });
        match self.send(Method::PATCH, url, Some(&body)).await {
            Ok(_) => Ok(()),
            // A branch without a ref answers 422 ("Reference does not exist").
            Err(RemoteError::NotFound(_))
            | Err(RemoteError::Rejected { status: 422, .. }) => {
                let url = self.repo_url(repo, "git/refs")?;
                let body = serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
                self.send(Method::POST, url, Some(&body)).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_repository(&self, name: &str, private: bool) -> Result<RepoRef, RemoteError> {
        let url = self.url("user/repos")?;
        let body = serde_json::json!({
            "name": name,
            "private": private,
            "auto_init": true,
        });
        match self.post::<_, RepoResponse>(url, &body).await {
            Ok(repo) => Ok(RepoRef::from(repo.full_name)),
            Err(RemoteError::Rejected { status: 422, .. }) => {
                Err(RemoteError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Entries of a listing, refusing partial ones.
fn listing_entries(listing: TreeResponse, what: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
    if listing.truncated {
        return Err(RemoteError::Truncated(what.to_string()));
    }
    Ok(listing
        .tree
        .into_iter()
        .filter(|e| e.entry_type != EntryType::Other)
        .collect())
}
