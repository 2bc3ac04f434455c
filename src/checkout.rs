//! Resolve a local checkout to the repository and commit it points at.

use git2::Repository;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

const REMOTE_NAME: &str = "origin";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{path} is not a git checkout: {message}")]
    NotARepository { path: String, message: String },

    #[error("remote '{0}' is not configured")]
    MissingRemote(String),

    #[error("could not parse remote URL: {0}")]
    InvalidRemoteUrl(String),

    #[error("remote {url} does not point at {expected}")]
    UnexpectedHost { url: String, expected: String },

    #[error("failed to resolve HEAD: {0}")]
    Head(String),
}

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIdentity {
    pub owner: String,
    pub repo: String,
}

/// What the comment bot needs to know about a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub identity: RepositoryIdentity,
    /// Full hex SHA of HEAD.
    pub head_sha: String,
}

/// Open the checkout at `path`, parse its push remote and read HEAD.
///
/// The push URL is the remote's `pushurl` when one is set and its fetch
/// `url` otherwise, the same answer `git remote get-url --push origin` gives.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn resolve(path: &Path, host: &str) -> Result<Checkout, CheckoutError> {
    let repo = Repository::open(path).map_err(|e| CheckoutError::NotARepository {
        path: path.display().to_string(),
        message: e.message().to_string(),
    })?;

    let remote = repo
        .find_remote(REMOTE_NAME)
        .map_err(|_| CheckoutError::MissingRemote(REMOTE_NAME.to_string()))?;
    let push_url = remote
        .pushurl()
        .or_else(|| remote.url())
        .ok_or_else(|| CheckoutError::MissingRemote(REMOTE_NAME.to_string()))?
        .to_string();
    debug!(url = %push_url, "found push remote");

    let identity = parse_remote_url(&push_url, host)?;

    let head_sha = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| CheckoutError::Head(e.message().to_string()))?
        .id()
        .to_string();
    debug!(owner = %identity.owner, repo = %identity.repo, sha = %head_sha, "resolved checkout");

    Ok(Checkout { identity, head_sha })
}

/// Parse a git remote URL into owner and repository.
///
/// Accepts `git@host:owner/repo.git`, `ssh://git@host[:port]/owner/repo.git`,
/// `https://host/owner/repo[.git]` and `git://host/owner/repo.git`. The host
/// has to match `expected_host` and the path has to be exactly two segments.
pub fn parse_remote_url(url: &str, expected_host: &str) -> Result<RepositoryIdentity, CheckoutError> {
    let trimmed = url.trim();
    let invalid = || CheckoutError::InvalidRemoteUrl(url.to_string());

    let (host, path) = match split_scp_style(trimmed) {
        Some(parts) => parts,
        None => {
            let parsed = url::Url::parse(trimmed).map_err(|_| invalid())?;
            if !matches!(parsed.scheme(), "https" | "http" | "ssh" | "git") {
                return Err(invalid());
            }
            let host = parsed.host_str().ok_or_else(invalid)?.to_string();
            (host, parsed.path().to_string())
        }
    };

    if !host.eq_ignore_ascii_case(expected_host) {
        return Err(CheckoutError::UnexpectedHost {
            url: url.to_string(),
            expected: expected_host.to_string(),
        });
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let [owner, repo] = segments.as_slice() else {
        return Err(invalid());
    };
    let repo = repo.strip_suffix(".git").unwrap_or(*repo);
    if repo.is_empty() {
        return Err(invalid());
    }

    Ok(RepositoryIdentity {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// Split `user@host:path` into host and path. Returns `None` for anything
/// with a URL scheme.
fn split_scp_style(url: &str) -> Option<(String, String)> {
    if url.contains("://") {
        return None;
    }
    let (user_host, path) = url.split_once(':')?;
    let host = match user_host.split_once('@') {
        Some((_, host)) => host,
        None => user_host,
    };
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some((host.to_string(), path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("git@github.com:mongodb-labs/drivers-evergreen-tools.git")]
    #[case("https://github.com/mongodb-labs/drivers-evergreen-tools.git")]
    #[case("https://github.com/mongodb-labs/drivers-evergreen-tools")]
    #[case("ssh://git@github.com/mongodb-labs/drivers-evergreen-tools.git")]
    #[case("ssh://git@github.com:22/mongodb-labs/drivers-evergreen-tools.git")]
    #[case("git://github.com/mongodb-labs/drivers-evergreen-tools.git")]
    #[case("https://GitHub.com/mongodb-labs/drivers-evergreen-tools/\n")]
    fn test_parse_remote_url_shapes(#[case] url: &str) {
        let identity = parse_remote_url(url, "github.com").unwrap();
        assert_eq!(identity.owner, "mongodb-labs");
        assert_eq!(identity.repo, "drivers-evergreen-tools");
    }

    #[rstest]
    #[case("")]
    #[case("not a url")]
    #[case("https://github.com/only-owner")]
    #[case("https://github.com/owner/repo/tree/main")]
    #[case("https://github.com/owner/.git")]
    #[case("file:///srv/git/owner/repo.git")]
    fn test_parse_remote_url_rejects_unexpected_shapes(#[case] url: &str) {
        assert!(matches!(
            parse_remote_url(url, "github.com"),
            Err(CheckoutError::InvalidRemoteUrl(_))
        ));
    }

    #[test]
    fn test_parse_remote_url_rejects_other_hosts() {
        let err = parse_remote_url("git@gitlab.com:owner/repo.git", "github.com").unwrap_err();
        assert!(matches!(err, CheckoutError::UnexpectedHost { .. }));

        let identity = parse_remote_url("git@ghe.example.com:org/project.git", "ghe.example.com")
            .unwrap();
        assert_eq!(identity.owner, "org");
        assert_eq!(identity.repo, "project");
    }

    fn commit_empty_tree(repo: &Repository) -> git2::Oid {
        let signature = git2::Signature::now("ci", "ci@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
            .unwrap()
    }

    #[test]
    fn test_resolve_prefers_push_url() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://github.com/fetch-owner/fetch-repo.git")
            .unwrap();
        repo.remote_set_pushurl("origin", Some("git@github.com:push-owner/push-repo.git"))
            .unwrap();
        let oid = commit_empty_tree(&repo);

        let checkout = resolve(dir.path(), "github.com").unwrap();
        assert_eq!(checkout.identity.owner, "push-owner");
        assert_eq!(checkout.identity.repo, "push-repo");
        assert_eq!(checkout.head_sha, oid.to_string());
        assert_eq!(checkout.head_sha.len(), 40);
    }

    #[test]
    fn test_resolve_falls_back_to_fetch_url() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://github.com/owner/repo.git").unwrap();
        commit_empty_tree(&repo);

        let checkout = resolve(dir.path(), "github.com").unwrap();
        assert_eq!(checkout.identity.owner, "owner");
        assert_eq!(checkout.identity.repo, "repo");
    }

    #[test]
    fn test_resolve_without_origin() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_empty_tree(&repo);

        assert!(matches!(
            resolve(dir.path(), "github.com"),
            Err(CheckoutError::MissingRemote(_))
        ));
    }

    #[test]
    fn test_resolve_unborn_head() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://github.com/owner/repo.git").unwrap();

        assert!(matches!(
            resolve(dir.path(), "github.com"),
            Err(CheckoutError::Head(_))
        ));
    }

    #[test]
    fn test_resolve_not_a_repository() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            resolve(dir.path(), "github.com"),
            Err(CheckoutError::NotARepository { .. })
        ));
    }
}
