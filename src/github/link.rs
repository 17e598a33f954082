use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid PR link format, expected https://github.com/<owner>/<repo>/pull/<number>")]
    InvalidFormat,

    #[error("invalid PR number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// Reference to a single pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrLink {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrLink {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Routing key: "owner/repo".
    pub fn repo_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Parse `https://<host>/<owner>/<repo>/pull/<number>[/...]`.
    pub fn parse(link: &str) -> Result<Self, LinkError> {
        let url = url::Url::parse(link.trim())?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [owner, repo, "pull", number, ..] if !owner.is_empty() && !repo.is_empty() => {
                Ok(Self::new(*owner, *repo, number.parse()?))
            }
            _ => Err(LinkError::InvalidFormat),
        }
    }
}

impl FromStr for PrLink {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical GitHub URL of the pull request.
impl std::fmt::Display for PrLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "https://github.com/{}/{}/pull/{}",
            self.owner, self.repo, self.number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_link() {
        let link = PrLink::parse("https://github.com/clems4ever/lgtm/pull/12").unwrap();
        assert_eq!(link, PrLink::new("clems4ever", "lgtm", 12));
        assert_eq!(link.repo_key(), "clems4ever/lgtm");
    }

    #[test]
    fn test_parse_allows_trailing_segments() {
        let link = PrLink::parse("https://github.com/acme/widgets/pull/7/files").unwrap();
        assert_eq!(link, PrLink::new("acme", "widgets", 7));
    }

    #[test]
    fn test_display_is_canonical_url() {
        let link: PrLink = "https://github.com/acme/widgets/pull/7?diff=split".parse().unwrap();
        assert_eq!(link.to_string(), "https://github.com/acme/widgets/pull/7");
    }

    #[test]
    fn test_parse_rejects_non_pr_paths() {
        assert!(matches!(
            PrLink::parse("https://github.com/acme/widgets/issues/7"),
            Err(LinkError::InvalidFormat)
        ));
        assert!(matches!(
            PrLink::parse("https://github.com/acme"),
            Err(LinkError::InvalidFormat)
        ));
        assert!(matches!(
            PrLink::parse("https://github.com//widgets/pull/7"),
            Err(LinkError::InvalidFormat)
        ));
    }

    #[test]
    fn test_parse_rejects_bad_number_and_url() {
        assert!(matches!(
            PrLink::parse("https://github.com/acme/widgets/pull/seven"),
            Err(LinkError::InvalidNumber(_))
        ));
        assert!(matches!(
            PrLink::parse("not a url"),
            Err(LinkError::InvalidUrl(_))
        ));
    }
}
