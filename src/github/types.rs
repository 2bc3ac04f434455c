use serde::Deserialize;

/// The subset of a pull request the comment bot reads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub head: Head,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Head {
    pub sha: String,
}

/// An issue comment. Pull request conversation comments are issue comments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    /// GitHub omits the body for some minimized comments.
    #[serde(default)]
    pub body: Option<String>,
}

impl Comment {
    pub fn body_contains(&self, needle: &str) -> bool {
        self.body.as_deref().is_some_and(|body| body.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_ignores_unknown_fields() {
        let json = r#"{"number": 6, "title": "x", "head": {"sha": "def", "ref": "topic"}}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 6);
        assert_eq!(pr.head.sha, "def");
    }

    #[test]
    fn test_comment_body_contains() {
        let comment: Comment = serde_json::from_str(r#"{"id": 2, "body": "marker: old"}"#).unwrap();
        assert!(comment.body_contains("marker:"));
        assert!(!comment.body_contains("other"));

        let empty: Comment = serde_json::from_str(r#"{"id": 3, "body": null}"#).unwrap();
        assert!(!empty.body_contains(""));
    }
}
