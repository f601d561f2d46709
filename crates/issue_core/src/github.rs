use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Issue, IssueTarget, Label, Milestone, RepositoryRef, User},
    error::{ApiError, ApiException},
    protocol::{IssueComment, IssueEvent, IssuePatch, NewComment},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::TrackerSettings, IssueTracker};

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";

/// [`IssueTracker`] speaking the GitHub REST v3 issue endpoints.
pub struct HttpIssueTracker {
    http: Client,
    base_url: Url,
    per_page: u32,
    max_pages: usize,
}

impl HttpIssueTracker {
    pub fn new(settings: &TrackerSettings) -> Result<Self> {
        let base_url = crate::config::normalize_api_base_url(&settings.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_GITHUB_JSON));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&settings.user_agent).context("invalid user agent")?,
        );
        if let Some(token) = settings.token.as_deref().filter(|token| !token.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("invalid api token")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url,
            per_page: settings.per_page.clamp(1, 100),
            max_pages: settings.max_pages.max(1),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("api base url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn issue_endpoint(&self, target: &IssueTarget, tail: &[&str]) -> Result<Url> {
        let number = target.number.to_string();
        let mut segments = vec!["repos", target.owner(), target.repo(), "issues", number.as_str()];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    fn repo_endpoint(&self, repository: &RepositoryRef, resource: &str) -> Result<Url> {
        self.endpoint(&["repos", &repository.owner, &repository.name, resource])
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "tracker: GET");
        let response = self.http.get(url.clone()).send().await?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("invalid response body from {url}"))
    }

    /// Collects every page of a list endpoint by following `rel="next"`
    /// links, up to the configured page cap.
    async fn get_all<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        let mut next = Some(url);
        let mut items = Vec::new();
        let mut pages = 0;

        while let Some(mut url) = next.take() {
            if pages == 0 {
                url.query_pairs_mut()
                    .append_pair("per_page", &self.per_page.to_string());
            }
            debug!(%url, page = pages + 1, "tracker: GET page");
            let response = self.http.get(url.clone()).send().await?;
            let response = ensure_success(response).await?;
            next = next_page_link(response.headers());
            let page: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("invalid response body from {url}"))?;
            items.extend(page);

            pages += 1;
            if pages >= self.max_pages {
                if next.is_some() {
                    warn!(pages, "tracker: page cap reached, truncating list");
                }
                break;
            }
        }

        Ok(items)
    }

    /// Posts a new comment; used by composition flows that report back
    /// through `CommentComposition::complete`.
    pub async fn post_comment(&self, target: &IssueTarget, body: &str) -> Result<IssueComment> {
        let url = self.issue_endpoint(target, &["comments"])?;
        let response = self
            .http
            .post(url)
            .json(&NewComment {
                body: body.to_string(),
            })
            .send()
            .await?;
        let comment: IssueComment = ensure_success(response).await?.json().await?;
        info!(issue = %target, comment_id = comment.id.0, "tracker: comment posted");
        Ok(comment)
    }
}

#[async_trait]
impl IssueTracker for HttpIssueTracker {
    async fn fetch_issue(&self, target: &IssueTarget) -> Result<Issue> {
        self.get_json(self.issue_endpoint(target, &[])?).await
    }

    async fn fetch_events(&self, target: &IssueTarget) -> Result<Vec<IssueEvent>> {
        self.get_all(self.issue_endpoint(target, &["events"])?).await
    }

    async fn fetch_comments(&self, target: &IssueTarget) -> Result<Vec<IssueComment>> {
        self.get_all(self.issue_endpoint(target, &["comments"])?)
            .await
    }

    async fn update_issue(&self, target: &IssueTarget, patch: &IssuePatch) -> Result<Issue> {
        let url = self.issue_endpoint(target, &[])?;
        debug!(%url, "tracker: PATCH");
        let response = self.http.patch(url).json(patch).send().await?;
        let issue = ensure_success(response)
            .await?
            .json()
            .await
            .context("invalid issue in update response")?;
        info!(issue = %target, "tracker: issue updated");
        Ok(issue)
    }

    async fn fetch_assignees(&self, repository: &RepositoryRef) -> Result<Vec<User>> {
        self.get_all(self.repo_endpoint(repository, "assignees")?)
            .await
    }

    async fn fetch_labels(&self, repository: &RepositoryRef) -> Result<Vec<Label>> {
        self.get_all(self.repo_endpoint(repository, "labels")?).await
    }

    async fn fetch_milestones(&self, repository: &RepositoryRef) -> Result<Vec<Milestone>> {
        self.get_all(self.repo_endpoint(repository, "milestones")?)
            .await
    }
}

/// Turns a non-success response into an [`ApiException`] carrying the
/// tracker's error message.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ApiError>(&text) {
        return Err(ApiException::from_body(status.as_u16(), body).into());
    }
    let message = if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    };
    Err(ApiException::new(status.as_u16(), message).into())
}

fn next_page_link(headers: &HeaderMap) -> Option<Url> {
    let value = headers.get(header::LINK)?.to_str().ok()?;
    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        if !parts.any(|param| param.trim() == "rel=\"next\"") {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

#[cfg(test)]
#[path = "tests/github_tests.rs"]
mod tests;
