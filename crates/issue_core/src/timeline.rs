//! Merged chronological feed of tracker events and comments.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use shared::{
    domain::{IssueTarget, User},
    protocol::{EventKind, IssueComment, IssueEvent},
};
use tokio::sync::watch;
use tracing::info;

use crate::{error::IssueError, properties::Property, IssueTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineItem {
    Event(IssueEvent),
    Comment(IssueComment),
}

impl TimelineItem {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TimelineItem::Event(event) => event.created_at,
            TimelineItem::Comment(comment) => comment.created_at,
        }
    }

    pub fn actor(&self) -> Option<&User> {
        match self {
            TimelineItem::Event(event) => event.actor.as_ref(),
            TimelineItem::Comment(comment) => Some(&comment.user),
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, TimelineItem::Comment(_))
    }

    /// One-line text for list rows, e.g. `alice added the bug label`.
    pub fn summary(&self) -> String {
        let actor = self
            .actor()
            .map(|user| user.login.as_str())
            .unwrap_or("someone");
        let event = match self {
            TimelineItem::Comment(comment) => {
                let first_line = comment.body.lines().next().unwrap_or_default();
                return format!("{actor} commented: {first_line}");
            }
            TimelineItem::Event(event) => event,
        };
        let subject = |user: &Option<User>| {
            user.as_ref()
                .map(|user| user.login.clone())
                .unwrap_or_else(|| "someone".to_string())
        };
        match event.event {
            EventKind::Closed => format!("{actor} closed this"),
            EventKind::Reopened => format!("{actor} reopened this"),
            EventKind::Merged => format!("{actor} merged this"),
            EventKind::Referenced => match &event.commit_id {
                Some(commit) => format!(
                    "{actor} referenced this from commit {}",
                    commit.chars().take(7).collect::<String>()
                ),
                None => format!("{actor} referenced this"),
            },
            EventKind::Mentioned => format!("{actor} was mentioned"),
            EventKind::Subscribed => format!("{actor} subscribed"),
            EventKind::Unsubscribed => format!("{actor} unsubscribed"),
            EventKind::Assigned => format!("{actor} assigned {}", subject(&event.assignee)),
            EventKind::Unassigned => format!("{actor} unassigned {}", subject(&event.assignee)),
            EventKind::Labeled => match &event.label {
                Some(label) => format!("{actor} added the {} label", label.name),
                None => format!("{actor} added a label"),
            },
            EventKind::Unlabeled => match &event.label {
                Some(label) => format!("{actor} removed the {} label", label.name),
                None => format!("{actor} removed a label"),
            },
            EventKind::Milestoned => match &event.milestone {
                Some(milestone) => {
                    format!("{actor} added this to the {} milestone", milestone.title)
                }
                None => format!("{actor} added this to a milestone"),
            },
            EventKind::Demilestoned => match &event.milestone {
                Some(milestone) => {
                    format!("{actor} removed this from the {} milestone", milestone.title)
                }
                None => format!("{actor} removed this from a milestone"),
            },
            EventKind::Renamed => match &event.rename {
                Some(rename) => format!(
                    "{actor} changed the title from {} to {}",
                    rename.from, rename.to
                ),
                None => format!("{actor} changed the title"),
            },
            EventKind::Locked => format!("{actor} locked this"),
            EventKind::Unlocked => format!("{actor} unlocked this"),
            EventKind::HeadRefDeleted => format!("{actor} deleted the branch"),
            EventKind::HeadRefRestored => format!("{actor} restored the branch"),
            EventKind::Unknown => format!("{actor} updated this"),
        }
    }
}

/// Concatenates events then comments and sorts stably by creation time, so
/// items with equal timestamps keep their arrival order.
pub fn merge(events: Vec<IssueEvent>, comments: Vec<IssueComment>) -> Vec<TimelineItem> {
    let mut items = Vec::with_capacity(events.len() + comments.len());
    items.extend(events.into_iter().map(TimelineItem::Event));
    items.extend(comments.into_iter().map(TimelineItem::Comment));
    items.sort_by_key(TimelineItem::created_at);
    items
}

pub struct Timeline {
    items: watch::Sender<Arc<[TimelineItem]>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            items: watch::Sender::new(Arc::from(Vec::new())),
        }
    }

    pub fn items(&self) -> Property<Arc<[TimelineItem]>> {
        Property::new(self.items.subscribe())
    }

    pub fn snapshot(&self) -> Arc<[TimelineItem]> {
        self.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches events and comments concurrently and returns them merged,
    /// without touching the published sequence.
    pub async fn fetch(
        tracker: &dyn IssueTracker,
        target: &IssueTarget,
    ) -> Result<Vec<TimelineItem>, IssueError> {
        Self::fetch_merged(tracker, target)
            .await
            .map_err(|source| IssueError::TimelineLoad { source })
    }

    pub(crate) async fn fetch_merged(
        tracker: &dyn IssueTracker,
        target: &IssueTarget,
    ) -> anyhow::Result<Vec<TimelineItem>> {
        let (events, comments) = tokio::try_join!(
            async {
                tracker
                    .fetch_events(target)
                    .await
                    .with_context(|| format!("fetching events for {target}"))
            },
            async {
                tracker
                    .fetch_comments(target)
                    .await
                    .with_context(|| format!("fetching comments for {target}"))
            },
        )?;
        Ok(merge(events, comments))
    }

    /// Fetches and republishes the whole sequence. On failure the
    /// previously published sequence is left as it was.
    pub async fn load(
        &self,
        tracker: &dyn IssueTracker,
        target: &IssueTarget,
    ) -> Result<usize, IssueError> {
        let items = Self::fetch(tracker, target).await?;
        Ok(self.reset(items))
    }

    /// Replaces the published sequence in a single step.
    pub fn reset(&self, items: Vec<TimelineItem>) -> usize {
        let len = items.len();
        self.items.send_replace(Arc::from(items));
        info!(items = len, "timeline: published merged sequence");
        len
    }

    /// Inserts one item after every existing item that is not newer than
    /// it. A newly posted comment therefore lands last, and an out-of-band
    /// older item cannot break the ordering.
    pub fn append(&self, item: TimelineItem) -> usize {
        self.items.send_modify(|items| {
            let created_at = item.created_at();
            let position = items.partition_point(|existing| existing.created_at() <= created_at);
            let mut next = Vec::with_capacity(items.len() + 1);
            next.extend_from_slice(&items[..position]);
            next.push(item);
            next.extend_from_slice(&items[position..]);
            *items = Arc::from(next);
        });
        self.len()
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
