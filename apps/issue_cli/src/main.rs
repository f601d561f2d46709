use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use issue_core::{
    config::load_settings, Command, CommandOutcome, ControllerEvent, HttpIssueTracker,
    IssueController, MarkdownRenderer, Navigator, PassthroughMarkdown, Screen,
};
use shared::domain::{IssueTarget, Label};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Inspect and edit a single tracker issue")]
struct Args {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    repo: String,
    #[arg(long)]
    number: u64,
    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the issue and its timeline.
    Show,
    /// Close an open issue or reopen a closed one.
    Toggle,
    /// Assign a user; omit the login to unassign.
    Assign { login: Option<String> },
    /// Add the label, or remove it when already applied.
    Label { name: String },
    /// Set the milestone by number; omit to clear.
    Milestone { number: Option<u64> },
    /// Post a comment.
    Comment { body: String },
}

/// Prints navigation requests and posts comments handed to the composer.
struct CliNavigator {
    tracker: Arc<HttpIssueTracker>,
    draft: Mutex<Option<String>>,
    posting: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl CliNavigator {
    fn new(tracker: Arc<HttpIssueTracker>) -> Self {
        Self {
            tracker,
            draft: Mutex::new(None),
            posting: Mutex::new(None),
        }
    }

    fn set_draft(&self, body: String) {
        if let Ok(mut draft) = self.draft.lock() {
            *draft = Some(body);
        }
    }

    fn take_posting(&self) -> Option<JoinHandle<Result<()>>> {
        self.posting.lock().ok().and_then(|mut posting| posting.take())
    }
}

impl Navigator for CliNavigator {
    fn navigate(&self, screen: Screen) {
        match screen {
            Screen::ComposeComment(composition) => {
                let Some(body) = self.draft.lock().ok().and_then(|mut draft| draft.take()) else {
                    warn!("cli: no comment body supplied, cancelling composer");
                    return;
                };
                let tracker = Arc::clone(&self.tracker);
                let handle = tokio::spawn(async move {
                    let comment = tracker.post_comment(&composition.target, &body).await?;
                    if !composition.complete(comment) {
                        warn!("cli: issue screen closed before the comment was reported");
                    }
                    Ok(())
                });
                if let Ok(mut posting) = self.posting.lock() {
                    *posting = Some(handle);
                }
            }
            Screen::User { login } => println!("-> user {login}"),
            Screen::Url(url) => println!("-> {url}"),
            other => info!(screen = other.name(), "cli: opening screen"),
        }
    }
}

fn completed(outcome: CommandOutcome) -> Result<()> {
    match outcome {
        CommandOutcome::Completed => Ok(()),
        CommandOutcome::Disabled => bail!("command unavailable until the issue is loaded"),
        CommandOutcome::Busy => bail!("command already running"),
        CommandOutcome::Failed(failure) => Err(anyhow!(failure.message)),
    }
}

fn paint(label: &Label) -> String {
    match label.rgb() {
        Some((r, g, b)) => format!("\x1b[38;2;{r};{g};{b}m{}\x1b[0m", label.name),
        None => label.name.clone(),
    }
}

fn print_issue(controller: &IssueController) -> Result<()> {
    let issue = controller
        .current_issue()
        .context("issue has not been loaded")?;

    println!("{} #{}: {}", controller.target(), issue.number, issue.title);
    println!(
        "state: {}  author: {}  comments: {}",
        issue.state.as_str(),
        issue.user.login,
        issue.comments
    );
    if let Some(assignee) = controller.assigned_user().get() {
        println!("assignee: {}", assignee.login);
    }
    if let Some(milestone) = controller.assigned_milestone().get() {
        println!("milestone: {} (#{})", milestone.title, milestone.number);
    }
    let labels = controller.assigned_labels().get();
    if !labels.is_empty() {
        let names: Vec<String> = labels.iter().map(paint).collect();
        println!("labels: {}", names.join(", "));
    }
    if let Some(description) = controller.rendered_description().get() {
        println!();
        println!("{description}");
    }

    let timeline = controller.timeline().get();
    if !timeline.is_empty() {
        println!();
        for item in timeline.iter() {
            println!(
                "{}  {}",
                item.created_at().format("%Y-%m-%d %H:%M"),
                item.summary()
            );
        }
    }
    Ok(())
}

async fn wait_for_comment(
    events: &mut tokio::sync::broadcast::Receiver<ControllerEvent>,
) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::CommentAppended { comment_id }) => return Ok(comment_id),
                Ok(_) => continue,
                Err(err) => return Err(anyhow!("controller stopped: {err}")),
            }
        }
    };
    let comment_id = tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .context("timed out waiting for the posted comment")??;
    info!(comment_id = comment_id.0, "cli: comment posted");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let settings = load_settings();
    info!(api = %settings.api_base_url, "cli: using tracker");
    let tracker = Arc::new(HttpIssueTracker::new(&settings)?);
    let navigator = Arc::new(CliNavigator::new(Arc::clone(&tracker)));
    let renderer: Arc<dyn MarkdownRenderer> = Arc::new(PassthroughMarkdown);
    let controller = IssueController::new_with_dependencies(
        IssueTarget::new(args.owner, args.repo, args.number),
        tracker,
        renderer,
        navigator.clone(),
    );

    completed(controller.execute(Command::Load).await)?;

    match args.action.unwrap_or(Action::Show) {
        Action::Show => {}
        Action::Toggle => completed(controller.execute(Command::ToggleState).await)?,
        Action::Assign { login } => {
            completed(controller.execute(Command::GoToAssignees).await)?;
            let user = match login {
                Some(login) => Some(
                    controller
                        .assignees()
                        .candidates()
                        .get()
                        .iter()
                        .find(|user| user.login == login)
                        .cloned()
                        .with_context(|| format!("{login} cannot be assigned here"))?,
                ),
                None => None,
            };
            controller.assignees().select(user).await?;
        }
        Action::Label { name } => {
            completed(controller.execute(Command::GoToLabels).await)?;
            let label = controller
                .labels()
                .candidates()
                .get()
                .iter()
                .find(|label| label.name == name)
                .cloned()
                .with_context(|| format!("no label named {name}"))?;
            controller.labels().toggle(&label).await?;
        }
        Action::Milestone { number } => {
            completed(controller.execute(Command::GoToMilestones).await)?;
            let milestone = match number {
                Some(number) => Some(
                    controller
                        .milestones()
                        .candidates()
                        .get()
                        .iter()
                        .find(|milestone| milestone.number == number)
                        .cloned()
                        .with_context(|| format!("no milestone #{number}"))?,
                ),
                None => None,
            };
            controller.milestones().select(milestone).await?;
        }
        Action::Comment { body } => {
            let mut events = controller.subscribe_events();
            navigator.set_draft(body);
            completed(controller.execute(Command::AddComment).await)?;
            let posting = navigator
                .take_posting()
                .context("comment composer did not start")?;
            posting.await.context("comment task panicked")??;
            wait_for_comment(&mut events).await?;
        }
    }

    print_issue(&controller)?;
    controller.dispose();
    Ok(())
}
