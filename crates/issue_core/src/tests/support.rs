use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{
        CommentId, EventId, Issue, IssueId, IssueState, IssueTarget, Label, LabelId, Milestone,
        MilestoneId, MilestoneState, RepositoryRef, User, UserId,
    },
    error::ApiException,
    protocol::{EventKind, EventLabel, IssueComment, IssueEvent, IssuePatch},
};
use tokio::sync::Notify;

use crate::{IssueTracker, Navigator, Screen};

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn target() -> IssueTarget {
    IssueTarget::new("acme", "widgets", 42)
}

pub(crate) fn user(id: i64, login: &str) -> User {
    User {
        id: UserId(id),
        login: login.into(),
        avatar_url: None,
        html_url: None,
    }
}

pub(crate) fn label(id: i64, name: &str) -> Label {
    Label {
        id: LabelId(id),
        name: name.into(),
        color: "d73a4a".into(),
        description: None,
    }
}

pub(crate) fn milestone(number: u64, title: &str) -> Milestone {
    Milestone {
        id: MilestoneId(number as i64 * 100),
        number,
        title: title.into(),
        state: MilestoneState::Open,
        description: None,
        open_issues: 0,
        closed_issues: 0,
        due_on: None,
    }
}

pub(crate) fn issue(state: IssueState) -> Issue {
    Issue {
        id: IssueId(4200),
        number: 42,
        title: "Widgets fall over".into(),
        body: Some("Steps to reproduce".into()),
        state,
        user: user(1, "octo"),
        assignee: None,
        milestone: None,
        labels: Vec::new(),
        comments: 1,
        created_at: ts(0),
        updated_at: ts(0),
        closed_at: None,
        html_url: Some("https://github.com/acme/widgets/issues/42".into()),
    }
}

pub(crate) fn event(id: i64, kind: EventKind, at: i64) -> IssueEvent {
    IssueEvent {
        id: EventId(id),
        actor: Some(user(1, "octo")),
        event: kind,
        created_at: ts(at),
        commit_id: None,
        label: None,
        assignee: None,
        milestone: None,
        rename: None,
    }
}

pub(crate) fn labeled(id: i64, name: &str, at: i64) -> IssueEvent {
    IssueEvent {
        label: Some(EventLabel {
            name: name.into(),
            color: "d73a4a".into(),
        }),
        ..event(id, EventKind::Labeled, at)
    }
}

pub(crate) fn comment(id: i64, body: &str, at: i64) -> IssueComment {
    IssueComment {
        id: CommentId(id),
        user: user(2, "alice"),
        body: body.into(),
        created_at: ts(at),
        updated_at: None,
        html_url: None,
    }
}

/// Which tracker calls fail, and how.
#[derive(Default)]
pub(crate) struct Failures {
    pub issue: Option<String>,
    pub events: Option<String>,
    pub comments: Option<String>,
    pub update_status: Option<u16>,
    pub candidates: Option<String>,
}

pub(crate) struct FakeTracker {
    issue: Mutex<Issue>,
    events: Mutex<Vec<IssueEvent>>,
    comments: Mutex<Vec<IssueComment>>,
    assignees: Vec<User>,
    labels: Vec<Label>,
    milestones: Vec<Milestone>,
    failures: Mutex<Failures>,
    patches: Mutex<Vec<IssuePatch>>,
    gate: Mutex<Option<Arc<Notify>>>,
    update_delay: Mutex<Option<Duration>>,
    issue_fetches: AtomicUsize,
    candidate_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTracker {
    pub(crate) fn new(issue: Issue) -> Arc<Self> {
        Arc::new(Self {
            issue: Mutex::new(issue),
            events: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            assignees: vec![user(2, "alice"), user(3, "bob")],
            labels: vec![label(10, "bug"), label(11, "docs"), label(12, "ui")],
            milestones: vec![milestone(1, "v1.0"), milestone(2, "v2.0")],
            failures: Mutex::new(Failures::default()),
            patches: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            update_delay: Mutex::new(None),
            issue_fetches: AtomicUsize::new(0),
            candidate_fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn with_timeline(
        self: Arc<Self>,
        events: Vec<IssueEvent>,
        comments: Vec<IssueComment>,
    ) -> Arc<Self> {
        *self.events.lock().expect("events lock") = events;
        *self.comments.lock().expect("comments lock") = comments;
        self
    }

    pub(crate) fn fail(&self, configure: impl FnOnce(&mut Failures)) {
        configure(&mut self.failures.lock().expect("failures lock"));
    }

    /// Makes `fetch_issue` and `update_issue` wait until the returned
    /// handle is notified once per call.
    pub(crate) fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock().expect("delay lock") = Some(delay);
    }

    pub(crate) fn set_remote_issue(&self, issue: Issue) {
        *self.issue.lock().expect("issue lock") = issue;
    }

    pub(crate) fn patches(&self) -> Vec<IssuePatch> {
        self.patches.lock().expect("patches lock").clone()
    }

    pub(crate) fn issue_fetches(&self) -> usize {
        self.issue_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn candidate_fetches(&self) -> usize {
        self.candidate_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn candidates_failure(&self) -> Result<()> {
        self.candidate_fetches.fetch_add(1, Ordering::SeqCst);
        match &self.failures.lock().expect("failures lock").candidates {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(()),
        }
    }

    fn apply_patch(&self, patch: &IssuePatch) -> Issue {
        let mut issue = self.issue.lock().expect("issue lock");
        if let Some(state) = patch.state {
            issue.state = state;
            issue.closed_at = (state == IssueState::Closed).then(|| ts(100));
        }
        if let Some(assignee) = &patch.assignee {
            issue.assignee = assignee.as_ref().map(|login| {
                self.assignees
                    .iter()
                    .find(|candidate| &candidate.login == login)
                    .cloned()
                    .unwrap_or_else(|| user(99, login))
            });
        }
        if let Some(number) = &patch.milestone {
            issue.milestone = number.and_then(|number| {
                self.milestones
                    .iter()
                    .find(|candidate| candidate.number == number)
                    .cloned()
            });
        }
        if let Some(names) = &patch.labels {
            issue.labels = names
                .iter()
                .filter_map(|name| self.labels.iter().find(|label| &label.name == name).cloned())
                .collect();
        }
        issue.updated_at = ts(100);
        issue.clone()
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn fetch_issue(&self, _target: &IssueTarget) -> Result<Issue> {
        self.issue_fetches.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate().await;
        if let Some(err) = &self.failures.lock().expect("failures lock").issue {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.issue.lock().expect("issue lock").clone())
    }

    async fn fetch_events(&self, _target: &IssueTarget) -> Result<Vec<IssueEvent>> {
        if let Some(err) = &self.failures.lock().expect("failures lock").events {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.events.lock().expect("events lock").clone())
    }

    async fn fetch_comments(&self, _target: &IssueTarget) -> Result<Vec<IssueComment>> {
        if let Some(err) = &self.failures.lock().expect("failures lock").comments {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.comments.lock().expect("comments lock").clone())
    }

    async fn update_issue(&self, _target: &IssueTarget, patch: &IssuePatch) -> Result<Issue> {
        self.patches
            .lock()
            .expect("patches lock")
            .push(patch.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.wait_for_gate().await;
        let delay = *self.update_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let status = self.failures.lock().expect("failures lock").update_status;
        if let Some(status) = status {
            return Err(ApiException::new(status, "update rejected").into());
        }
        Ok(self.apply_patch(patch))
    }

    async fn fetch_assignees(&self, _repository: &RepositoryRef) -> Result<Vec<User>> {
        self.candidates_failure()?;
        Ok(self.assignees.clone())
    }

    async fn fetch_labels(&self, _repository: &RepositoryRef) -> Result<Vec<Label>> {
        self.candidates_failure()?;
        Ok(self.labels.clone())
    }

    async fn fetch_milestones(&self, _repository: &RepositoryRef) -> Result<Vec<Milestone>> {
        self.candidates_failure()?;
        Ok(self.milestones.clone())
    }
}

/// Records every navigation request; compose requests are kept so tests
/// can complete or drop them.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    screens: Mutex<Vec<&'static str>>,
    users: Mutex<Vec<String>>,
    urls: Mutex<Vec<String>>,
    compositions: Mutex<Vec<crate::CommentComposition>>,
}

impl RecordingNavigator {
    pub(crate) fn screens(&self) -> Vec<&'static str> {
        self.screens.lock().expect("screens lock").clone()
    }

    pub(crate) fn users(&self) -> Vec<String> {
        self.users.lock().expect("users lock").clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls lock").clone()
    }

    pub(crate) fn take_composition(&self) -> Option<crate::CommentComposition> {
        self.compositions.lock().expect("compositions lock").pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, screen: Screen) {
        self.screens
            .lock()
            .expect("screens lock")
            .push(screen.name());
        match screen {
            Screen::User { login } => self.users.lock().expect("users lock").push(login),
            Screen::Url(url) => self.urls.lock().expect("urls lock").push(url),
            Screen::ComposeComment(composition) => self
                .compositions
                .lock()
                .expect("compositions lock")
                .push(composition),
            Screen::Assignees | Screen::Labels | Screen::Milestones => {}
        }
    }
}
