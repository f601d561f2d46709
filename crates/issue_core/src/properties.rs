//! Observable values and the projections derived from the loaded issue.
//!
//! Every derived value is recomputed in one explicit publish step when the
//! issue snapshot is replaced; nothing is computed lazily on read.

use std::sync::Arc;

use shared::domain::{Issue, Label, Milestone, User};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::MarkdownRenderer;

/// Read-only view of a value published by the controller.
#[derive(Debug, Clone)]
pub struct Property<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Property<T> {
    pub(crate) fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }

    /// A property whose value never changes.
    pub fn constant(value: T) -> Self {
        let (_tx, rx) = watch::channel(value);
        Self { rx }
    }

    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Receiver that is woken on every change after the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        let mut rx = self.rx.clone();
        rx.mark_unchanged();
        rx
    }
}

impl<T: Clone + Send + Sync + 'static> Property<T> {
    /// Stream yielding the current value first, then every change.
    pub fn stream(&self) -> WatchStream<T> {
        WatchStream::new(self.rx.clone())
    }
}

/// Publishes `value` only when it differs, so observers never wake for a
/// recomputation that produced the same result.
pub(crate) fn publish_if_changed<T: PartialEq>(tx: &watch::Sender<T>, value: T) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

/// All values derived from one issue snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedValues {
    pub has_issue: bool,
    pub assigned_user: Option<User>,
    pub assigned_milestone: Option<Milestone>,
    pub assigned_labels: Arc<[Label]>,
    pub is_closed: bool,
    pub rendered_description: Option<String>,
}

impl DerivedValues {
    pub fn from_issue(issue: Option<&Issue>, renderer: &dyn MarkdownRenderer) -> Self {
        let Some(issue) = issue else {
            return Self::default();
        };
        let rendered_description = issue
            .body
            .as_deref()
            .filter(|body| !body.trim().is_empty())
            .map(|body| renderer.render(body));
        Self {
            has_issue: true,
            assigned_user: issue.assignee.clone(),
            assigned_milestone: issue.milestone.clone(),
            assigned_labels: issue.labels.clone().into(),
            is_closed: issue.is_closed(),
            rendered_description,
        }
    }
}

pub(crate) struct DerivedProperties {
    has_issue: watch::Sender<bool>,
    assigned_user: watch::Sender<Option<User>>,
    assigned_milestone: watch::Sender<Option<Milestone>>,
    assigned_labels: watch::Sender<Arc<[Label]>>,
    is_closed: watch::Sender<bool>,
    rendered_description: watch::Sender<Option<String>>,
}

impl DerivedProperties {
    pub(crate) fn new() -> Self {
        let initial = DerivedValues::default();
        Self {
            has_issue: watch::Sender::new(initial.has_issue),
            assigned_user: watch::Sender::new(initial.assigned_user),
            assigned_milestone: watch::Sender::new(initial.assigned_milestone),
            assigned_labels: watch::Sender::new(initial.assigned_labels),
            is_closed: watch::Sender::new(initial.is_closed),
            rendered_description: watch::Sender::new(initial.rendered_description),
        }
    }

    /// Recomputes every value from `issue` and publishes the ones that
    /// changed. `has_issue` goes last so command gates open only after the
    /// projections they guard are current.
    pub(crate) fn publish(&self, issue: Option<&Issue>, renderer: &dyn MarkdownRenderer) {
        let values = DerivedValues::from_issue(issue, renderer);
        publish_if_changed(&self.assigned_user, values.assigned_user);
        publish_if_changed(&self.assigned_milestone, values.assigned_milestone);
        publish_if_changed(&self.assigned_labels, values.assigned_labels);
        publish_if_changed(&self.is_closed, values.is_closed);
        publish_if_changed(&self.rendered_description, values.rendered_description);
        publish_if_changed(&self.has_issue, values.has_issue);
    }

    pub(crate) fn snapshot(&self) -> DerivedValues {
        DerivedValues {
            has_issue: *self.has_issue.borrow(),
            assigned_user: self.assigned_user.borrow().clone(),
            assigned_milestone: self.assigned_milestone.borrow().clone(),
            assigned_labels: self.assigned_labels.borrow().clone(),
            is_closed: *self.is_closed.borrow(),
            rendered_description: self.rendered_description.borrow().clone(),
        }
    }

    pub(crate) fn has_issue(&self) -> Property<bool> {
        Property::new(self.has_issue.subscribe())
    }

    pub(crate) fn assigned_user(&self) -> Property<Option<User>> {
        Property::new(self.assigned_user.subscribe())
    }

    pub(crate) fn assigned_milestone(&self) -> Property<Option<Milestone>> {
        Property::new(self.assigned_milestone.subscribe())
    }

    pub(crate) fn assigned_labels(&self) -> Property<Arc<[Label]>> {
        Property::new(self.assigned_labels.subscribe())
    }

    pub(crate) fn is_closed(&self) -> Property<bool> {
        Property::new(self.is_closed.subscribe())
    }

    pub(crate) fn rendered_description(&self) -> Property<Option<String>> {
        Property::new(self.rendered_description.subscribe())
    }
}

#[cfg(test)]
#[path = "tests/properties_tests.rs"]
mod tests;
