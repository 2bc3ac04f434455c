pub mod auth;
pub mod types;

pub use auth::InstallationToken;
pub use types::{Comment, PullRequest};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::checkout::RepositoryIdentity;
use crate::config::{Config, GitHubSettings};

/// Listing endpoints are requested with the largest page GitHub allows.
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API returned {status} for {method} {url}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to sign GitHub App JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid GitHub API header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("system clock is set before the Unix epoch")]
    Clock,
}

/// The four REST calls the comment bot makes.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// All open pull requests, in the order GitHub lists them.
    async fn list_open_pull_requests(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Vec<PullRequest>, GitHubError>;

    /// All conversation comments on an issue or pull request, oldest first.
    async fn list_issue_comments(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
    ) -> Result<Vec<Comment>, GitHubError>;

    async fn update_comment(
        &self,
        repo: &RepositoryIdentity,
        comment_id: u64,
        body: &str,
    ) -> Result<Comment, GitHubError>;

    async fn create_comment(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        body: &str,
    ) -> Result<Comment, GitHubError>;
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

/// REST client authenticated as one app installation.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: InstallationToken,
}

/// HTTP client carrying the headers every GitHub call needs.
pub fn build_http_client(settings: &GitHubSettings) -> Result<reqwest::Client, GitHubError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert(
        "x-github-api-version",
        HeaderValue::from_str(&settings.api_version)?,
    );

    Ok(reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .default_headers(headers)
        .build()?)
}

/// Turn a non-2xx response into [`GitHubError::Status`], keeping the body
/// GitHub sends back since it usually says what went wrong.
pub(crate) async fn check_status(
    response: reqwest::Response,
    method: &str,
) -> Result<reqwest::Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(GitHubError::Status {
        method: method.to_string(),
        url,
        status: status.as_u16(),
        body,
    })
}

/// Pull the `rel="next"` target out of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

impl GitHubClient {
    /// Authenticate as the installation registered for `owner`.
    #[instrument(skip(config))]
    pub async fn for_owner(config: &Config, owner: &str) -> Result<Self, ConnectError> {
        let installation_id = config.installation_id(owner)?;
        let http = build_http_client(&config.github)?;
        let token =
            auth::installation_token(&http, &config.github, &config.credentials, installation_id)
                .await?;
        debug!(installation_id, "authenticated as app installation");
        Ok(Self {
            http,
            api_url: config.github.api_url.clone(),
            token,
        })
    }

    /// Client for an already issued token.
    pub fn with_token(
        settings: &GitHubSettings,
        token: InstallationToken,
    ) -> Result<Self, GitHubError> {
        Ok(Self {
            http: build_http_client(settings)?,
            api_url: settings.api_url.clone(),
            token,
        })
    }

    fn repo_url(&self, repo: &RepositoryIdentity, rest: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, repo.owner, repo.repo, rest)
    }

    /// GET `first` and every page after it, following `Link` headers.
    async fn get_all<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next {
            let response = self
                .http
                .get(&url)
                .bearer_auth(self.token.secret())
                .send()
                .await?;
            let response = check_status(response, "GET").await?;
            next = next_page(response.headers());
            let page: Vec<T> = response.json().await?;
            pages += 1;
            items.extend(page);
        }

        debug!(pages, items = items.len(), "fetched listing");
        Ok(items)
    }

    async fn send_comment(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        body: &str,
    ) -> Result<Comment, GitHubError> {
        let response = request
            .bearer_auth(self.token.secret())
            .json(&CommentBody { body })
            .send()
            .await?;
        let response = check_status(response, method).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    #[instrument(skip(self, repo), fields(owner = %repo.owner, repo = %repo.repo))]
    async fn list_open_pull_requests(
        &self,
        repo: &RepositoryIdentity,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let url = self.repo_url(repo, &format!("pulls?state=open&per_page={PAGE_SIZE}"));
        self.get_all(url).await
    }

    #[instrument(skip(self, repo), fields(owner = %repo.owner, repo = %repo.repo))]
    async fn list_issue_comments(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
    ) -> Result<Vec<Comment>, GitHubError> {
        let url = self.repo_url(
            repo,
            &format!("issues/{number}/comments?per_page={PAGE_SIZE}"),
        );
        self.get_all(url).await
    }

    #[instrument(skip(self, repo, body), fields(owner = %repo.owner, repo = %repo.repo))]
    async fn update_comment(
        &self,
        repo: &RepositoryIdentity,
        comment_id: u64,
        body: &str,
    ) -> Result<Comment, GitHubError> {
        let url = self.repo_url(repo, &format!("issues/comments/{comment_id}"));
        self.send_comment(self.http.patch(url), "PATCH", body).await
    }

    #[instrument(skip(self, repo, body), fields(owner = %repo.owner, repo = %repo.repo))]
    async fn create_comment(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        body: &str,
    ) -> Result<Comment, GitHubError> {
        let url = self.repo_url(repo, &format!("issues/{number}/comments"));
        self.send_comment(self.http.post(url), "POST", body).await
    }
}

/// Failure to get an authenticated client: either configuration or the
/// token exchange itself.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> RepositoryIdentity {
        RepositoryIdentity {
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        }
    }

    fn client(server: &MockServer) -> GitHubClient {
        let settings = GitHubSettings {
            api_url: server.uri(),
            ..GitHubSettings::default()
        };
        GitHubClient::with_token(&settings, InstallationToken::new("ghs_test")).unwrap()
    }

    #[test]
    fn test_next_page_from_link_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/repositories/1/pulls?page=2>; rel="next", <https://api.github.com/repositories/1/pulls?page=5>; rel="last""#,
            ),
        );
        assert_eq!(
            next_page(&headers).as_deref(),
            Some("https://api.github.com/repositories/1/pulls?page=2")
        );
    }

    #[test]
    fn test_next_page_absent_on_last_page() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_page(&headers), None);
        headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.github.com/x?page=1>; rel="prev""#),
        );
        assert_eq!(next_page(&headers), None);
    }

    #[tokio::test]
    async fn test_list_open_pull_requests_follows_pages() {
        let server = MockServer::start().await;
        let second = format!("{}/repos/owner/repo/pulls?state=open&per_page=100&page=2", server.uri());

        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .and(query_param("state", "open"))
            .and(query_param("per_page", "100"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"number": 6, "head": {"sha": "def"}}
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .and(query_param("state", "open"))
            .and(header("authorization", "Bearer ghs_test"))
            .and(header("x-github-api-version", "2022-11-28"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", format!("<{second}>; rel=\"next\"").as_str())
                    .set_body_json(serde_json::json!([
                        {"number": 5, "head": {"sha": "abc"}}
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pulls = client(&server)
            .list_open_pull_requests(&identity())
            .await
            .unwrap();
        let numbers: Vec<u64> = pulls.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_list_issue_comments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/issues/6/comments"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "body": "unrelated"},
                {"id": 2, "body": "marker: old text"}
            ])))
            .mount(&server)
            .await;

        let comments = client(&server)
            .list_issue_comments(&identity(), 6)
            .await
            .unwrap();
        assert_eq!(comments.len(), 2);
        assert!(comments[1].body_contains("marker:"));
    }

    #[tokio::test]
    async fn test_update_comment_patches_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/owner/repo/issues/comments/2"))
            .and(body_json(serde_json::json!({"body": "marker: new text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 2, "body": "marker: new text"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let comment = client(&server)
            .update_comment(&identity(), 2, "marker: new text")
            .await
            .unwrap();
        assert_eq!(comment.id, 2);
    }

    #[tokio::test]
    async fn test_create_comment_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/owner/repo/issues/6/comments"))
            .and(body_json(serde_json::json!({"body": "hello"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 99, "body": "hello"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let comment = client(&server)
            .create_comment(&identity(), 6, "hello")
            .await
            .unwrap();
        assert_eq!(comment.id, 99);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Resource not accessible"))
            .mount(&server)
            .await;

        let err = client(&server)
            .update_comment(&identity(), 2, "x")
            .await
            .unwrap_err();
        match err {
            GitHubError::Status {
                method,
                status,
                body,
                ..
            } => {
                assert_eq!(method, "PATCH");
                assert_eq!(status, 403);
                assert_eq!(body, "Resource not accessible");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
