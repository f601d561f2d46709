//! Selection of assignee, milestone and labels against the shared issue.
//!
//! A [`SubResourceController`] never stores the issue itself. It reads the
//! current selection through an [`IssueBinding`] and persists changes
//! through the same binding, so it cannot drift from its parent.

use std::{collections::HashSet, fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{Issue, Label, Milestone, RepositoryRef, User},
    protocol::IssuePatch,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::{IssueError, UpdateAction},
    properties::Property,
    IssueTracker,
};

/// Derives a patch from the snapshot it is applied to. An empty patch
/// means nothing changes.
pub type PatchBuilder<'a> = Box<dyn FnOnce(&Issue) -> IssuePatch + Send + 'a>;

/// Read and write access to the shared issue.
#[async_trait]
pub trait IssueBinding: Send + Sync {
    fn current(&self) -> Option<Arc<Issue>>;
    /// Runs `build` against the latest snapshot once no other mutation is in
    /// flight, persists the patch remotely and returns the replacement
    /// snapshot. `None` when no issue is loaded.
    async fn apply(&self, build: PatchBuilder<'_>) -> Result<Option<Arc<Issue>>>;
}

#[async_trait]
pub trait CandidateSource<T>: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<T>>;
}

/// Candidate pools of one repository, fetched from the tracker.
pub struct RepositoryCandidates {
    tracker: Arc<dyn IssueTracker>,
    repository: RepositoryRef,
}

impl RepositoryCandidates {
    pub fn new(tracker: Arc<dyn IssueTracker>, repository: RepositoryRef) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            repository,
        })
    }
}

#[async_trait]
impl CandidateSource<User> for RepositoryCandidates {
    async fn fetch_candidates(&self) -> Result<Vec<User>> {
        self.tracker.fetch_assignees(&self.repository).await
    }
}

#[async_trait]
impl CandidateSource<Label> for RepositoryCandidates {
    async fn fetch_candidates(&self) -> Result<Vec<Label>> {
        self.tracker.fetch_labels(&self.repository).await
    }
}

#[async_trait]
impl CandidateSource<Milestone> for RepositoryCandidates {
    async fn fetch_candidates(&self) -> Result<Vec<Milestone>> {
        self.tracker.fetch_milestones(&self.repository).await
    }
}

/// One selectable field of the issue.
pub trait SubResource: Send + Sync + 'static {
    type Candidate: Clone + Debug + PartialEq + Send + Sync + 'static;
    type Selection: Clone + Debug + Default + PartialEq + Send + Sync + 'static;

    const NAME: &'static str;
    const ACTION: UpdateAction;

    fn selection(issue: &Issue) -> Self::Selection;
    fn patch(selection: &Self::Selection) -> IssuePatch;
    fn is_selected(selection: &Self::Selection, item: &Self::Candidate) -> bool;
    fn toggled(selection: &Self::Selection, item: &Self::Candidate) -> Self::Selection;

    fn same_selection(left: &Self::Selection, right: &Self::Selection) -> bool {
        left == right
    }
}

pub struct AssigneeKind;

impl SubResource for AssigneeKind {
    type Candidate = User;
    type Selection = Option<User>;

    const NAME: &'static str = "assignees";
    const ACTION: UpdateAction = UpdateAction::Assign;

    fn selection(issue: &Issue) -> Self::Selection {
        issue.assignee.clone()
    }

    fn patch(selection: &Self::Selection) -> IssuePatch {
        IssuePatch::assignee(selection.as_ref().map(|user| user.login.clone()))
    }

    fn is_selected(selection: &Self::Selection, item: &User) -> bool {
        selection.as_ref().is_some_and(|user| user.login == item.login)
    }

    fn toggled(selection: &Self::Selection, item: &User) -> Self::Selection {
        if Self::is_selected(selection, item) {
            None
        } else {
            Some(item.clone())
        }
    }

    fn same_selection(left: &Self::Selection, right: &Self::Selection) -> bool {
        left.as_ref().map(|user| &user.login) == right.as_ref().map(|user| &user.login)
    }
}

pub struct MilestoneKind;

impl SubResource for MilestoneKind {
    type Candidate = Milestone;
    type Selection = Option<Milestone>;

    const NAME: &'static str = "milestones";
    const ACTION: UpdateAction = UpdateAction::SetMilestone;

    fn selection(issue: &Issue) -> Self::Selection {
        issue.milestone.clone()
    }

    fn patch(selection: &Self::Selection) -> IssuePatch {
        IssuePatch::milestone(selection.as_ref().map(|milestone| milestone.number))
    }

    fn is_selected(selection: &Self::Selection, item: &Milestone) -> bool {
        selection
            .as_ref()
            .is_some_and(|milestone| milestone.number == item.number)
    }

    fn toggled(selection: &Self::Selection, item: &Milestone) -> Self::Selection {
        if Self::is_selected(selection, item) {
            None
        } else {
            Some(item.clone())
        }
    }

    fn same_selection(left: &Self::Selection, right: &Self::Selection) -> bool {
        left.as_ref().map(|milestone| milestone.number)
            == right.as_ref().map(|milestone| milestone.number)
    }
}

pub struct LabelKind;

impl SubResource for LabelKind {
    type Candidate = Label;
    type Selection = Vec<Label>;

    const NAME: &'static str = "labels";
    const ACTION: UpdateAction = UpdateAction::SetLabels;

    fn selection(issue: &Issue) -> Self::Selection {
        issue.labels.clone()
    }

    fn patch(selection: &Self::Selection) -> IssuePatch {
        IssuePatch::labels(selection.iter().map(|label| label.name.clone()).collect())
    }

    fn is_selected(selection: &Self::Selection, item: &Label) -> bool {
        selection.iter().any(|label| label.name == item.name)
    }

    fn toggled(selection: &Self::Selection, item: &Label) -> Self::Selection {
        if Self::is_selected(selection, item) {
            selection
                .iter()
                .filter(|label| label.name != item.name)
                .cloned()
                .collect()
        } else {
            let mut next = selection.clone();
            next.push(item.clone());
            next
        }
    }

    // Labels are a set: order and duplicates do not matter.
    fn same_selection(left: &Self::Selection, right: &Self::Selection) -> bool {
        let names = |labels: &Self::Selection| {
            labels
                .iter()
                .map(|label| label.name.clone())
                .collect::<HashSet<_>>()
        };
        names(left) == names(right)
    }
}

pub struct SubResourceController<K: SubResource> {
    source: Arc<dyn CandidateSource<K::Candidate>>,
    binding: Arc<dyn IssueBinding>,
    candidates: watch::Sender<Arc<[K::Candidate]>>,
    loading: watch::Sender<bool>,
    loaded: watch::Sender<bool>,
}

impl<K: SubResource> SubResourceController<K> {
    pub fn new(
        source: Arc<dyn CandidateSource<K::Candidate>>,
        binding: Arc<dyn IssueBinding>,
    ) -> Self {
        Self {
            source,
            binding,
            candidates: watch::Sender::new(Arc::from(Vec::new())),
            loading: watch::Sender::new(false),
            loaded: watch::Sender::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }

    /// Fetches the candidate pool and replaces the cached one. The issue is
    /// never touched.
    pub async fn load(&self) -> Result<usize, IssueError> {
        self.loading.send_replace(true);
        let result = self.source.fetch_candidates().await;
        self.loading.send_replace(false);

        let candidates = result.map_err(|source| {
            warn!(resource = K::NAME, "sub-resource: candidate fetch failed: {source}");
            IssueError::fetch(K::NAME, source)
        })?;
        let count = candidates.len();
        self.candidates.send_replace(Arc::from(candidates));
        self.loaded.send_replace(true);
        info!(resource = K::NAME, count, "sub-resource: candidates loaded");
        Ok(count)
    }

    pub fn candidates(&self) -> Property<Arc<[K::Candidate]>> {
        Property::new(self.candidates.subscribe())
    }

    pub fn is_loading(&self) -> Property<bool> {
        Property::new(self.loading.subscribe())
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Reads the selection from the live issue; no network call.
    pub fn current_selection(&self) -> K::Selection {
        self.binding
            .current()
            .map(|issue| K::selection(&issue))
            .unwrap_or_default()
    }

    pub fn is_selected(&self, item: &K::Candidate) -> bool {
        K::is_selected(&self.current_selection(), item)
    }

    /// Persists `selection` and returns the selection of the replacement
    /// snapshot. Selecting what is already selected does not reach the
    /// tracker.
    pub async fn select(&self, selection: K::Selection) -> Result<K::Selection, IssueError> {
        self.persist(Box::new(move |issue: &Issue| {
            if K::same_selection(&K::selection(issue), &selection) {
                debug!(resource = K::NAME, "sub-resource: selection unchanged");
                IssuePatch::default()
            } else {
                K::patch(&selection)
            }
        }))
        .await
    }

    /// Flips `item`: labels are added or removed, a single-valued field is
    /// cleared when `item` is the current value and set otherwise. The flip
    /// is computed against the snapshot left by any mutation still running.
    pub async fn toggle(&self, item: &K::Candidate) -> Result<K::Selection, IssueError> {
        self.persist(Box::new(move |issue: &Issue| {
            K::patch(&K::toggled(&K::selection(issue), item))
        }))
        .await
    }

    async fn persist(&self, build: PatchBuilder<'_>) -> Result<K::Selection, IssueError> {
        let issue = self
            .binding
            .apply(build)
            .await
            .map_err(|source| {
                warn!(resource = K::NAME, "sub-resource: update failed: {source}");
                IssueError::update(K::ACTION, source)
            })?
            .ok_or(IssueError::NotLoaded)?;
        info!(resource = K::NAME, "sub-resource: selection applied");
        Ok(K::selection(&issue))
    }
}

#[cfg(test)]
#[path = "tests/sub_resource_tests.rs"]
mod tests;
