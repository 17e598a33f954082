//! Minimal GitHub REST client used by approver agents.
//!
//! Covers exactly what an approver needs: its own login, the repositories
//! it can push to, the author of a pull request, and submitting an
//! `APPROVE` review.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::{ApprovalBackend, PrLink};
use crate::protocol::ApproveOutcome;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    #[serde(default)]
    permissions: RepoPermissions,
}

#[derive(Debug, Default, Deserialize)]
struct RepoPermissions {
    #[serde(default)]
    push: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    user: User,
}

pub struct GithubClient {
    http: Client,
    access_token: String,
    api_base_url: String,
    approval_message: String,
    /// Login of the token owner, resolved on first use.
    login: OnceCell<String>,
}

impl GithubClient {
    pub fn new(access_token: impl Into<String>, api_base_url: Option<&str>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("lgtm-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            access_token: access_token.into(),
            api_base_url: api_base_url
                .unwrap_or(DEFAULT_API_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            approval_message: "lgtm".to_string(),
            login: OnceCell::new(),
        }
    }

    /// Review body posted alongside each approval.
    pub fn with_approval_message(mut self, message: impl Into<String>) -> Self {
        self.approval_message = message.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base_url, path))
            .header("Authorization", format!("token {}", self.access_token))
            .header("Accept", "application/vnd.github+json")
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, GithubError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GithubError::Api { status, body });
        }
        Ok(resp.json().await?)
    }

    /// Login of the authenticated user. Cached after the first call.
    pub async fn authenticated_login(&self) -> Result<String, GithubError> {
        let login = self
            .login
            .get_or_try_init(|| async {
                let user: User = self.send_json(self.request(Method::GET, "/user")).await?;
                Ok::<_, GithubError>(user.login)
            })
            .await?;
        Ok(login.clone())
    }

    /// Repositories ("owner/repo") the user can push to, and thus approve for.
    pub async fn pushable_repos(&self) -> Result<Vec<String>, GithubError> {
        let repos: Vec<Repo> = self
            .send_json(self.request(Method::GET, "/user/repos?per_page=100"))
            .await?;
        Ok(repos
            .into_iter()
            .filter(|r| r.permissions.push)
            .map(|r| r.full_name)
            .collect())
    }

    pub async fn pr_author(&self, link: &PrLink) -> Result<String, GithubError> {
        let path = format!("/repos/{}/{}/pulls/{}", link.owner, link.repo, link.number);
        let pr: PullRequest = self.send_json(self.request(Method::GET, &path)).await?;
        Ok(pr.user.login)
    }

    pub async fn approve_pr(&self, link: &PrLink) -> Result<(), GithubError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            link.owner, link.repo, link.number
        );
        let resp = self
            .request(Method::POST, &path)
            .json(&json!({"event": "APPROVE", "body": self.approval_message}))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(GithubError::Api {
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl ApprovalBackend for GithubClient {
    async fn current_identity(&self) -> Result<String, GithubError> {
        self.authenticated_login().await
    }

    async fn reachable_repositories(&self) -> Result<Vec<String>, GithubError> {
        self.pushable_repos().await
    }

    async fn decide_and_act(&self, link: &PrLink) -> ApproveOutcome {
        let (me, author) = match tokio::try_join!(self.authenticated_login(), self.pr_author(link)) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(pr = %link, error = %e, "failed to look up pull request");
                return ApproveOutcome::failed("error_github_lookup");
            }
        };

        if me.eq_ignore_ascii_case(&author) {
            tracing::info!(pr = %link, author = %author, "refusing to approve own pull request");
            return ApproveOutcome::ErrorSameAuthor;
        }

        match self.approve_pr(link).await {
            Ok(()) => {
                tracing::info!(pr = %link, approver = %me, "pull request approved");
                ApproveOutcome::Success
            }
            Err(e) => {
                tracing::error!(pr = %link, error = %e, "failed to approve pull request");
                ApproveOutcome::failed("error_github_approve")
            }
        }
    }
}
