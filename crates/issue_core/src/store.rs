use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{Issue, IssueTarget},
    protocol::IssuePatch,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{
    properties::{DerivedProperties, DerivedValues, Property},
    sub_resource::{IssueBinding, PatchBuilder},
    IssueTracker, MarkdownRenderer,
};

/// Owns the single shared copy of the issue under view.
///
/// The issue is only ever replaced by a new `Arc`, never edited in place.
/// Every replacement recomputes the derived values before the root value is
/// published. Remote writes go through one lock, so mutations never
/// interleave.
pub struct IssueStore {
    target: IssueTarget,
    tracker: Arc<dyn IssueTracker>,
    renderer: Arc<dyn MarkdownRenderer>,
    issue: watch::Sender<Option<Arc<Issue>>>,
    derived: DerivedProperties,
    mutation: Mutex<()>,
    disposed: AtomicBool,
}

impl IssueStore {
    pub fn new(
        target: IssueTarget,
        tracker: Arc<dyn IssueTracker>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            tracker,
            renderer,
            issue: watch::Sender::new(None),
            derived: DerivedProperties::new(),
            mutation: Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> &IssueTarget {
        &self.target
    }

    pub(crate) fn tracker(&self) -> &Arc<dyn IssueTracker> {
        &self.tracker
    }

    pub(crate) fn derived(&self) -> &DerivedProperties {
        &self.derived
    }

    pub fn current(&self) -> Option<Arc<Issue>> {
        self.issue.borrow().clone()
    }

    pub fn issue(&self) -> Property<Option<Arc<Issue>>> {
        Property::new(self.issue.subscribe())
    }

    pub fn derived_values(&self) -> DerivedValues {
        self.derived.snapshot()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Publishes `issue` as the new snapshot. After disposal the snapshot is
    /// returned to the caller but nothing is published.
    pub(crate) fn commit(&self, issue: Issue) -> Arc<Issue> {
        let issue = Arc::new(issue);
        if self.is_disposed() {
            debug!(issue = %self.target, "issue: store disposed, discarding snapshot");
            return issue;
        }
        self.derived.publish(Some(&issue), self.renderer.as_ref());
        self.issue.send_replace(Some(Arc::clone(&issue)));
        info!(
            owner = self.target.owner(),
            repo = self.target.repo(),
            number = self.target.number,
            state = issue.state.as_str(),
            "issue: snapshot replaced"
        );
        issue
    }

    /// Blocks every other mutation until the guard is dropped.
    pub(crate) async fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().await
    }

    /// Builds a patch from the snapshot that is current once earlier
    /// mutations have finished, sends it to the tracker and replaces the
    /// snapshot with the tracker's response.
    ///
    /// Returns `None` when no issue is loaded. An empty patch returns the
    /// current snapshot without a remote call. The snapshot is untouched
    /// when the call fails.
    pub async fn update_with<F>(&self, build: F) -> Result<Option<Arc<Issue>>>
    where
        F: FnOnce(&Issue) -> IssuePatch + Send,
    {
        let _guard = self.lock_mutations().await;
        let Some(current) = self.current() else {
            return Ok(None);
        };
        let patch = build(&current);
        if patch.is_empty() {
            debug!(issue = %self.target, "issue: nothing to change, skipping update");
            return Ok(Some(current));
        }
        let updated = self.tracker.update_issue(&self.target, &patch).await?;
        Ok(Some(self.commit(updated)))
    }
}

#[async_trait]
impl IssueBinding for IssueStore {
    fn current(&self) -> Option<Arc<Issue>> {
        IssueStore::current(self)
    }

    async fn apply(&self, build: PatchBuilder<'_>) -> Result<Option<Arc<Issue>>> {
        self.update_with(build).await
    }
}
