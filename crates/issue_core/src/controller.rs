//! User-triggerable commands for the issue screen.
//!
//! Each command is gated on a `Property<bool>` and never runs twice at once:
//! invoking a gated-off command is a silent no-op (`Disabled`), and invoking
//! one that is still running returns `Busy`.

use std::sync::Arc;

use anyhow::Context;
use shared::{
    domain::{CommentId, Issue, IssueTarget, Label, Milestone, User},
    protocol::{IssueComment, IssuePatch},
};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{IssueError, UpdateAction},
    properties::Property,
    store::IssueStore,
    sub_resource::{
        AssigneeKind, IssueBinding, LabelKind, MilestoneKind, RepositoryCandidates,
        SubResourceController,
    },
    timeline::{Timeline, TimelineItem},
    CommentComposition, IssueTracker, MarkdownRenderer, MissingNavigator, Navigator,
    PassthroughMarkdown, Screen,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Load,
    ToggleState,
    AddComment,
    GoToOwner,
    GoToAssignees,
    GoToLabels,
    GoToMilestones,
    GoToUrl,
}

impl CommandKind {
    pub const ALL: [CommandKind; COMMAND_COUNT] = [
        CommandKind::Load,
        CommandKind::ToggleState,
        CommandKind::AddComment,
        CommandKind::GoToOwner,
        CommandKind::GoToAssignees,
        CommandKind::GoToLabels,
        CommandKind::GoToMilestones,
        CommandKind::GoToUrl,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Load => "load",
            CommandKind::ToggleState => "toggle_state",
            CommandKind::AddComment => "add_comment",
            CommandKind::GoToOwner => "go_to_owner",
            CommandKind::GoToAssignees => "go_to_assignees",
            CommandKind::GoToLabels => "go_to_labels",
            CommandKind::GoToMilestones => "go_to_milestones",
            CommandKind::GoToUrl => "go_to_url",
        }
    }

    pub fn requires_issue(self) -> bool {
        !matches!(self, CommandKind::Load | CommandKind::GoToUrl)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load,
    ToggleState,
    AddComment,
    GoToOwner,
    GoToAssignees,
    GoToLabels,
    GoToMilestones,
    GoToUrl(String),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Load => CommandKind::Load,
            Command::ToggleState => CommandKind::ToggleState,
            Command::AddComment => CommandKind::AddComment,
            Command::GoToOwner => CommandKind::GoToOwner,
            Command::GoToAssignees => CommandKind::GoToAssignees,
            Command::GoToLabels => CommandKind::GoToLabels,
            Command::GoToMilestones => CommandKind::GoToMilestones,
            Command::GoToUrl(_) => CommandKind::GoToUrl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: CommandKind,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Disabled,
    Busy,
    Failed(CommandFailure),
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    CommandFailed(CommandFailure),
    Navigated { screen: &'static str },
    CommentAppended { comment_id: CommentId },
}

pub struct IssueController {
    store: Arc<IssueStore>,
    timeline: Timeline,
    navigator: Arc<dyn Navigator>,
    assignees: SubResourceController<AssigneeKind>,
    labels: SubResourceController<LabelKind>,
    milestones: SubResourceController<MilestoneKind>,
    has_issue: Property<bool>,
    always_enabled: Property<bool>,
    running: [Mutex<()>; COMMAND_COUNT],
    events: broadcast::Sender<ControllerEvent>,
}

/// Enters a command or returns the outcome explaining why it did not run.
macro_rules! enter_command {
    ($controller:expr, $kind:expr) => {
        match $controller.enter($kind) {
            Ok(guard) => guard,
            Err(outcome) => return Ok(outcome),
        }
    };
}

impl IssueController {
    pub fn new(target: IssueTarget, tracker: Arc<dyn IssueTracker>) -> Arc<Self> {
        Self::new_with_dependencies(
            target,
            tracker,
            Arc::new(PassthroughMarkdown),
            Arc::new(MissingNavigator),
        )
    }

    pub fn new_with_dependencies(
        target: IssueTarget,
        tracker: Arc<dyn IssueTracker>,
        renderer: Arc<dyn MarkdownRenderer>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let repository = target.repository.clone();
        let store = IssueStore::new(target, Arc::clone(&tracker), renderer);
        let binding: Arc<dyn IssueBinding> = store.clone();
        let candidates = RepositoryCandidates::new(tracker, repository);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            has_issue: store.derived().has_issue(),
            assignees: SubResourceController::<AssigneeKind>::new(
                candidates.clone(),
                Arc::clone(&binding),
            ),
            labels: SubResourceController::<LabelKind>::new(
                candidates.clone(),
                Arc::clone(&binding),
            ),
            milestones: SubResourceController::<MilestoneKind>::new(candidates, binding),
            store,
            timeline: Timeline::new(),
            navigator,
            always_enabled: Property::constant(true),
            running: std::array::from_fn(|_| Mutex::new(())),
            events,
        })
    }

    pub fn target(&self) -> &IssueTarget {
        self.store.target()
    }

    pub fn current_issue(&self) -> Option<Arc<Issue>> {
        self.store.current()
    }

    pub fn issue(&self) -> Property<Option<Arc<Issue>>> {
        self.store.issue()
    }

    pub fn has_issue(&self) -> Property<bool> {
        self.has_issue.clone()
    }

    pub fn assigned_user(&self) -> Property<Option<User>> {
        self.store.derived().assigned_user()
    }

    pub fn assigned_milestone(&self) -> Property<Option<Milestone>> {
        self.store.derived().assigned_milestone()
    }

    pub fn assigned_labels(&self) -> Property<Arc<[Label]>> {
        self.store.derived().assigned_labels()
    }

    pub fn is_closed(&self) -> Property<bool> {
        self.store.derived().is_closed()
    }

    pub fn rendered_description(&self) -> Property<Option<String>> {
        self.store.derived().rendered_description()
    }

    pub fn timeline(&self) -> Property<Arc<[TimelineItem]>> {
        self.timeline.items()
    }

    pub fn assignees(&self) -> &SubResourceController<AssigneeKind> {
        &self.assignees
    }

    pub fn labels(&self) -> &SubResourceController<LabelKind> {
        &self.labels
    }

    pub fn milestones(&self) -> &SubResourceController<MilestoneKind> {
        &self.milestones
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Enablement gate of `kind`, updated whenever the issue appears.
    pub fn can_execute(&self, kind: CommandKind) -> Property<bool> {
        if kind.requires_issue() {
            self.has_issue.clone()
        } else {
            self.always_enabled.clone()
        }
    }

    pub fn is_enabled(&self, kind: CommandKind) -> bool {
        !kind.requires_issue() || self.has_issue.get()
    }

    /// Tears the screen down. Results of requests still in flight are
    /// discarded when they arrive.
    pub fn dispose(&self) {
        self.store.dispose();
        info!(issue = %self.store.target(), "issue: controller disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }

    fn enter(&self, kind: CommandKind) -> Result<MutexGuard<'_, ()>, CommandOutcome> {
        if !self.is_enabled(kind) {
            debug!(command = kind.name(), "command: disabled, ignoring");
            return Err(CommandOutcome::Disabled);
        }
        self.running[kind.index()].try_lock().map_err(|_| {
            debug!(command = kind.name(), "command: already running, ignoring");
            CommandOutcome::Busy
        })
    }

    fn navigate(&self, screen: Screen) {
        let name = screen.name();
        self.navigator.navigate(screen);
        let _ = self.events.send(ControllerEvent::Navigated { screen: name });
    }

    /// Runs `command` and turns any failure into a [`CommandFailure`] that
    /// is both returned and broadcast to subscribers.
    pub async fn execute(self: &Arc<Self>, command: Command) -> CommandOutcome {
        let kind = command.kind();
        let result = match command {
            Command::Load => self.load().await,
            Command::ToggleState => self.toggle_state().await,
            Command::AddComment => self.add_comment(),
            Command::GoToOwner => self.go_to_owner(),
            Command::GoToAssignees => self.go_to_assignees().await,
            Command::GoToLabels => self.go_to_labels().await,
            Command::GoToMilestones => self.go_to_milestones().await,
            Command::GoToUrl(url) => self.go_to_url(&url),
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let failure = CommandFailure {
                    command: kind,
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                };
                warn!(command = kind.name(), "command: failed: {}", failure.message);
                let _ = self
                    .events
                    .send(ControllerEvent::CommandFailed(failure.clone()));
                CommandOutcome::Failed(failure)
            }
        }
    }

    /// Fetches the issue, its events and its comments concurrently and
    /// publishes the issue and the merged timeline together. Nothing is
    /// published unless all three requests succeed.
    pub async fn load(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::Load);
        let target = self.store.target();
        info!(
            owner = target.owner(),
            repo = target.repo(),
            number = target.number,
            "issue: loading"
        );

        // Updates issued while the fetch is running apply on top of the
        // reloaded snapshot instead of being overwritten by it.
        let _mutation = self.store.lock_mutations().await;
        let tracker = self.store.tracker().as_ref();
        let (issue, items) = tokio::try_join!(
            async {
                tracker
                    .fetch_issue(target)
                    .await
                    .with_context(|| format!("fetching issue {target}"))
            },
            Timeline::fetch_merged(tracker, target),
        )
        .map_err(|source| {
            warn!(issue = %target, "issue: load failed: {source:#}");
            IssueError::Load {
                target: target.clone(),
                source,
            }
        })?;

        if self.store.is_disposed() {
            debug!(issue = %target, "issue: disposed during load, discarding results");
            return Ok(CommandOutcome::Completed);
        }
        self.store.commit(issue);
        self.timeline.reset(items);
        Ok(CommandOutcome::Completed)
    }

    /// Closes an open issue or reopens a closed one.
    pub async fn toggle_state(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::ToggleState);
        let mut action = UpdateAction::Close;
        let result = self
            .store
            .update_with(|issue| {
                if issue.is_closed() {
                    action = UpdateAction::Reopen;
                }
                IssuePatch::state(issue.state.toggled())
            })
            .await;

        match result {
            Ok(Some(_)) => Ok(CommandOutcome::Completed),
            Ok(None) => Err(IssueError::NotLoaded),
            Err(source) => {
                warn!(issue = %self.store.target(), "issue: unable to {action}: {source:#}");
                Err(IssueError::update(action, source))
            }
        }
    }

    /// Opens the comment composer. The posted comment is appended to the
    /// timeline when the composer completes; a cancelled composer changes
    /// nothing.
    pub fn add_comment(self: &Arc<Self>) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::AddComment);
        let (composition, reply) = CommentComposition::new(self.store.target().clone());
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            let Ok(comment) = reply.await else {
                debug!("issue: comment composition cancelled");
                return;
            };
            match controller.upgrade() {
                Some(controller) => {
                    controller.comment_posted(comment);
                }
                None => debug!("issue: controller dropped before comment was posted"),
            }
        });
        self.navigate(Screen::ComposeComment(composition));
        Ok(CommandOutcome::Completed)
    }

    /// Appends a comment posted outside a full reload. Returns `false` when
    /// the controller has been disposed.
    pub fn comment_posted(&self, comment: IssueComment) -> bool {
        if self.store.is_disposed() {
            debug!(comment_id = comment.id.0, "issue: disposed, dropping posted comment");
            return false;
        }
        let comment_id = comment.id;
        let len = self.timeline.append(TimelineItem::Comment(comment));
        info!(comment_id = comment_id.0, items = len, "timeline: comment appended");
        let _ = self
            .events
            .send(ControllerEvent::CommentAppended { comment_id });
        true
    }

    pub fn go_to_owner(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::GoToOwner);
        let issue = self.store.current().ok_or(IssueError::NotLoaded)?;
        self.navigate(Screen::User {
            login: issue.user.login.clone(),
        });
        Ok(CommandOutcome::Completed)
    }

    pub async fn go_to_assignees(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::GoToAssignees);
        self.navigate(Screen::Assignees);
        self.assignees.load().await?;
        Ok(CommandOutcome::Completed)
    }

    pub async fn go_to_labels(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::GoToLabels);
        self.navigate(Screen::Labels);
        self.labels.load().await?;
        Ok(CommandOutcome::Completed)
    }

    pub async fn go_to_milestones(&self) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::GoToMilestones);
        self.navigate(Screen::Milestones);
        self.milestones.load().await?;
        Ok(CommandOutcome::Completed)
    }

    /// Follows a link from the rendered description. Relative links are
    /// resolved against the issue's page.
    pub fn go_to_url(&self, link: &str) -> Result<CommandOutcome, IssueError> {
        let _guard = enter_command!(self, CommandKind::GoToUrl);
        self.navigate(Screen::Url(self.resolve_link(link)));
        Ok(CommandOutcome::Completed)
    }

    fn resolve_link(&self, link: &str) -> String {
        if let Ok(url) = Url::parse(link) {
            return url.to_string();
        }
        self.store
            .current()
            .and_then(|issue| issue.html_url.clone())
            .and_then(|base| Url::parse(&base).ok())
            .and_then(|base| base.join(link).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| link.to_string())
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
