use std::fmt;

use shared::{domain::IssueTarget, error::ApiException};
use thiserror::Error;

/// The write being attempted when a [`IssueError::RemoteUpdate`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Close,
    Reopen,
    Assign,
    SetMilestone,
    SetLabels,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UpdateAction::Close => "close the issue",
            UpdateAction::Reopen => "open the issue",
            UpdateAction::Assign => "change the assignee",
            UpdateAction::SetMilestone => "change the milestone",
            UpdateAction::SetLabels => "change the labels",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("failed to fetch {resource}: {source:#}")]
    RemoteFetch {
        resource: &'static str,
        source: anyhow::Error,
    },
    #[error("unable to {action}: {source:#}")]
    RemoteUpdate {
        action: UpdateAction,
        source: anyhow::Error,
    },
    #[error("failed to load {target}: {source:#}")]
    Load {
        target: IssueTarget,
        source: anyhow::Error,
    },
    #[error("failed to load timeline: {source:#}")]
    TimelineLoad { source: anyhow::Error },
    #[error("issue has not been loaded")]
    NotLoaded,
}

impl IssueError {
    pub fn fetch(resource: &'static str, source: anyhow::Error) -> Self {
        IssueError::RemoteFetch { resource, source }
    }

    pub fn update(action: UpdateAction, source: anyhow::Error) -> Self {
        IssueError::RemoteUpdate { action, source }
    }

    /// Whether re-invoking the failed command may succeed. Validation and
    /// permission failures reported by the tracker are final.
    pub fn is_retryable(&self) -> bool {
        let source = match self {
            IssueError::NotLoaded => return false,
            IssueError::RemoteFetch { source, .. }
            | IssueError::RemoteUpdate { source, .. }
            | IssueError::Load { source, .. }
            | IssueError::TimelineLoad { source } => source,
        };
        match source
            .chain()
            .find_map(|cause| cause.downcast_ref::<ApiException>())
        {
            Some(api) => api.is_retryable(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn toggle_failures_name_the_attempted_transition() {
        let close = IssueError::update(UpdateAction::Close, anyhow!("boom"));
        assert_eq!(close.to_string(), "unable to close the issue: boom");
        let open = IssueError::update(UpdateAction::Reopen, anyhow!("boom"));
        assert!(open.to_string().contains("open"));
    }

    #[test]
    fn validation_failures_are_not_retryable() {
        let err = IssueError::update(
            UpdateAction::SetLabels,
            anyhow::Error::new(ApiException::new(422, "Validation Failed")),
        );
        assert!(!err.is_retryable());

        let err = IssueError::fetch("labels", anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert!(!IssueError::NotLoaded.is_retryable());
    }
}
