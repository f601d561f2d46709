use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CommentId, EventId, IssueState, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Closed,
    Reopened,
    Subscribed,
    Unsubscribed,
    Merged,
    Referenced,
    Mentioned,
    Assigned,
    Unassigned,
    Labeled,
    Unlabeled,
    Milestoned,
    Demilestoned,
    Renamed,
    Locked,
    Unlocked,
    HeadRefDeleted,
    HeadRefRestored,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMilestone {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRename {
    pub from: String,
    pub to: String,
}

/// One entry of `GET /repos/{owner}/{repo}/issues/{number}/events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub id: EventId,
    #[serde(default)]
    pub actor: Option<User>,
    pub event: EventKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<EventLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<EventMilestone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<EventRename>,
}

/// One entry of `GET /repos/{owner}/{repo}/issues/{number}/comments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: CommentId,
    pub user: User,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

/// Partial update sent with `PATCH /repos/{owner}/{repo}/issues/{number}`.
///
/// Absent fields are left alone by the tracker. `assignee: Some(None)` and
/// `milestone: Some(None)` serialize as `null` and clear the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl IssuePatch {
    pub fn state(state: IssueState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn assignee(login: Option<String>) -> Self {
        Self {
            assignee: Some(login),
            ..Self::default()
        }
    }

    pub fn milestone(number: Option<u64>) -> Self {
        Self {
            milestone: Some(number),
            ..Self::default()
        }
    }

    pub fn labels(names: Vec<String>) -> Self {
        Self {
            labels: Some(names),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.assignee.is_none()
            && self.milestone.is_none()
            && self.labels.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub body: String,
}
