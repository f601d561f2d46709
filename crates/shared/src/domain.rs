use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(IssueId);
id_newtype!(LabelId);
id_newtype!(MilestoneId);
id_newtype!(EventId);
id_newtype!(CommentId);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Addresses one issue: `owner/repo#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueTarget {
    pub repository: RepositoryRef,
    pub number: u64,
}

impl IssueTarget {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, number: u64) -> Self {
        Self {
            repository: RepositoryRef::new(owner, name),
            number,
        }
    }

    pub fn owner(&self) -> &str {
        &self.repository.owner
    }

    pub fn repo(&self) -> &str {
        &self.repository.name
    }
}

impl fmt::Display for IssueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn toggled(self) -> Self {
        match self {
            IssueState::Open => IssueState::Closed,
            IssueState::Closed => IssueState::Open,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    /// Six hex digits without the leading `#`, as the tracker reports it.
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Label {
    /// Decodes [`Label::color`] into an RGB triple. Accepts an optional `#`.
    pub fn rgb(&self) -> Option<(u8, u8, u8)> {
        let hex = self.color.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub number: u64,
    pub title: String,
    pub state: MilestoneState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub open_issues: u32,
    #[serde(default)]
    pub closed_issues: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: IssueState,
    pub user: User,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub comments: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

impl Issue {
    pub fn is_closed(&self) -> bool {
        self.state == IssueState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(color: &str) -> Label {
        Label {
            id: LabelId(1),
            name: "bug".into(),
            color: color.into(),
            description: None,
        }
    }

    #[test]
    fn label_rgb_decodes_hex_with_or_without_hash() {
        assert_eq!(label("d73a4a").rgb(), Some((0xd7, 0x3a, 0x4a)));
        assert_eq!(label("#00ff10").rgb(), Some((0, 255, 16)));
    }

    #[test]
    fn label_rgb_rejects_malformed_colors() {
        assert_eq!(label("").rgb(), None);
        assert_eq!(label("fff").rgb(), None);
        assert_eq!(label("zzzzzz").rgb(), None);
    }

    #[test]
    fn issue_target_displays_as_repo_and_number() {
        let target = IssueTarget::new("acme", "widgets", 42);
        assert_eq!(target.to_string(), "acme/widgets#42");
        assert_eq!(target.owner(), "acme");
        assert_eq!(target.repo(), "widgets");
    }

    #[test]
    fn issue_state_toggles_between_open_and_closed() {
        assert_eq!(IssueState::Open.toggled(), IssueState::Closed);
        assert_eq!(IssueState::Closed.toggled(), IssueState::Open);
    }
}
