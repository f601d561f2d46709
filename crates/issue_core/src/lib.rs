use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Issue, IssueTarget, Label, Milestone, RepositoryRef, User},
    protocol::{IssueComment, IssueEvent, IssuePatch},
};
use tokio::sync::oneshot;
use tracing::warn;

pub mod config;
pub mod controller;
pub mod error;
pub mod github;
pub mod properties;
mod store;
pub mod sub_resource;
pub mod timeline;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use controller::{
    Command, CommandFailure, CommandKind, CommandOutcome, ControllerEvent, IssueController,
};
pub use error::{IssueError, UpdateAction};
pub use github::HttpIssueTracker;
pub use properties::{DerivedValues, Property};
pub use store::IssueStore;
pub use sub_resource::{
    AssigneeKind, CandidateSource, IssueBinding, LabelKind, MilestoneKind, PatchBuilder,
    RepositoryCandidates, SubResource, SubResourceController,
};
pub use timeline::{Timeline, TimelineItem};

/// Remote issue-tracking API as seen by the controller.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, target: &IssueTarget) -> Result<Issue>;
    async fn fetch_events(&self, target: &IssueTarget) -> Result<Vec<IssueEvent>>;
    async fn fetch_comments(&self, target: &IssueTarget) -> Result<Vec<IssueComment>>;
    async fn update_issue(&self, target: &IssueTarget, patch: &IssuePatch) -> Result<Issue>;
    async fn fetch_assignees(&self, repository: &RepositoryRef) -> Result<Vec<User>>;
    async fn fetch_labels(&self, repository: &RepositoryRef) -> Result<Vec<Label>>;
    async fn fetch_milestones(&self, repository: &RepositoryRef) -> Result<Vec<Milestone>>;
}

pub struct MissingIssueTracker;

#[async_trait]
impl IssueTracker for MissingIssueTracker {
    async fn fetch_issue(&self, target: &IssueTarget) -> Result<Issue> {
        Err(anyhow!("issue tracker unavailable for {target}"))
    }

    async fn fetch_events(&self, target: &IssueTarget) -> Result<Vec<IssueEvent>> {
        Err(anyhow!("issue tracker unavailable for {target}"))
    }

    async fn fetch_comments(&self, target: &IssueTarget) -> Result<Vec<IssueComment>> {
        Err(anyhow!("issue tracker unavailable for {target}"))
    }

    async fn update_issue(&self, target: &IssueTarget, _patch: &IssuePatch) -> Result<Issue> {
        Err(anyhow!("issue tracker unavailable for {target}"))
    }

    async fn fetch_assignees(&self, repository: &RepositoryRef) -> Result<Vec<User>> {
        Err(anyhow!("issue tracker unavailable for {repository}"))
    }

    async fn fetch_labels(&self, repository: &RepositoryRef) -> Result<Vec<Label>> {
        Err(anyhow!("issue tracker unavailable for {repository}"))
    }

    async fn fetch_milestones(&self, repository: &RepositoryRef) -> Result<Vec<Milestone>> {
        Err(anyhow!("issue tracker unavailable for {repository}"))
    }
}

/// Converts issue and comment bodies into display text.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, text: &str) -> String;
}

pub struct PassthroughMarkdown;

impl MarkdownRenderer for PassthroughMarkdown {
    fn render(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Screens the controller can ask the presentation layer to show.
#[derive(Debug)]
pub enum Screen {
    User { login: String },
    Assignees,
    Labels,
    Milestones,
    ComposeComment(CommentComposition),
    Url(String),
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::User { .. } => "user",
            Screen::Assignees => "assignees",
            Screen::Labels => "labels",
            Screen::Milestones => "milestones",
            Screen::ComposeComment(_) => "compose_comment",
            Screen::Url(_) => "url",
        }
    }
}

/// Handed to the comment-composition flow. Completing it appends the posted
/// comment to the timeline; dropping it cancels.
#[derive(Debug)]
pub struct CommentComposition {
    pub target: IssueTarget,
    reply: oneshot::Sender<IssueComment>,
}

impl CommentComposition {
    pub(crate) fn new(target: IssueTarget) -> (Self, oneshot::Receiver<IssueComment>) {
        let (reply, rx) = oneshot::channel();
        (Self { target, reply }, rx)
    }

    /// Reports the comment the flow posted. Returns `false` when the issue
    /// screen has already gone away.
    pub fn complete(self, comment: IssueComment) -> bool {
        self.reply.send(comment).is_ok()
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, screen: Screen);
}

pub struct MissingNavigator;

impl Navigator for MissingNavigator {
    fn navigate(&self, screen: Screen) {
        warn!(screen = screen.name(), "navigation: no navigator attached, dropping request");
    }
}
