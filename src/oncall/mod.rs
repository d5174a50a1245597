//! On-call rotation.
//!
//! Schedules rotate a pool of responders; tasks raised from issues are
//! assigned under the schedule's [`RotationPolicy`] and move through
//! `pending → assigned → acked → completed`. Unacknowledged assignments are
//! escalated by a background sweeper.
//!
//! Events become tasks three ways:
//!
//! - `/oncall page <schedule>` in an issue comment
//! - an issue opened or labeled with a label mapped to a schedule
//! - closing the issue completes its open tasks
//!
//! The rotation logic is split so the pure parts are testable on their own:
//! [`transitions`] and [`rotation`] compute, [`engine`] serializes and
//! persists, and [`OnCallModule`] translates events.

pub mod commands;
pub mod config;
pub mod engine;
pub mod locks;
pub mod model;
pub mod rotation;
pub mod transitions;


use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::app::AppHandle;
use crate::commands::CommandContext;
use crate::modules::{DispatchedEvent, Module, ModuleError, ModuleInitializer, ModuleShutdowner};
use crate::telemetry;
use crate::webhooks::{CommentAction, IssueAction, IssueCommentEvent, IssuesEvent, WebhookEvent};

pub use commands::{COMMAND, CommandError, OnCallCommand, USAGE, parse_oncall_command};
pub use config::{OnCallConfig, ScheduleConfig};
pub use engine::{RotationEngine, RotationError, RotationSettings, SweepReport, TaskCreation};
pub use locks::ScheduleLocks;
pub use model::{
    AssignmentEnd, HistoryChange, Member, NewTask, Responder, RotationPolicy, Schedule, Task,
    TaskAssignment, TaskStatus, UnknownPolicy,
};
pub use transitions::{TaskAction, TransitionError, next_status};

/// Registry name of the on-call module.
pub const MODULE_NAME: &str = "oncall";

/// Everything the module needs once initialized.
struct OnCallState {
    engine: Arc<RotationEngine>,
    config: OnCallConfig,
}

/// The on-call module: handles events, owns the escalation sweeper.
pub struct OnCallModule {
    state: OnceLock<Arc<OnCallState>>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for OnCallModule {
    fn default() -> Self {
        Self::new()
    }
}

impl OnCallModule {
    /// An uninitialized module. Events are ignored until
    /// [`initialize`](ModuleInitializer::initialize) has run.
    pub fn new() -> Self {
        OnCallModule {
            state: OnceLock::new(),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// A ready module around an existing engine, without a sweeper.
    pub fn with_engine(engine: Arc<RotationEngine>, config: OnCallConfig) -> Self {
        let module = Self::new();
        // Freshly created; cannot already be set.
        let _ = module.state.set(Arc::new(OnCallState { engine, config }));
        module
    }

    pub fn engine(&self) -> Option<&Arc<RotationEngine>> {
        self.state.get().map(|s| &s.engine)
    }
}

#[async_trait]
impl Module for OnCallModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    async fn handle_event(&self, event: &DispatchedEvent) -> Result<(), ModuleError> {
        let Some(state) = self.state.get() else {
            debug!(event_type = %event.event_type, "On-call module not initialized; ignoring event");
            return Ok(());
        };
        let now = Utc::now();

        match event.event.as_ref() {
            WebhookEvent::IssueComment(comment) if comment.action == CommentAction::Created => {
                for ctx in CommandContext::from_comment(comment) {
                    if ctx.command != COMMAND {
                        continue;
                    }
                    let span = ctx.log();
                    state
                        .handle_command(&ctx, comment, now)
                        .instrument(span)
                        .await?;
                }
            }
            WebhookEvent::Issues(issue) => state.handle_issue(issue, now).await?,
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ModuleInitializer for OnCallModule {
    async fn initialize(&self, app: &AppHandle) -> Result<(), ModuleError> {
        let config: OnCallConfig = app
            .module_config(MODULE_NAME)
            .map_err(|e| ModuleError::Config(e.to_string()))?;
        config.validate().map_err(ModuleError::Config)?;

        let settings = RotationSettings {
            escalation_window: chrono::Duration::from_std(config.escalation_window())
                .map_err(|e| ModuleError::Config(format!("escalation_window_secs: {e}")))?,
            max_skip: config.max_skip,
        };
        let engine = Arc::new(RotationEngine::new(
            app.storage.clone(),
            app.platform.clone(),
            settings,
        ));

        let now = Utc::now();
        for schedule in &config.schedules {
            engine.sync_schedule(schedule, now).await?;
        }

        let interval = config.sweep_interval();
        let schedules = config.schedules.len();
        let state = Arc::new(OnCallState {
            engine: engine.clone(),
            config,
        });
        if self.state.set(state).is_err() {
            return Err(ModuleError::Other("on-call module initialized twice".into()));
        }

        let handle = spawn_sweeper(engine, interval, self.cancel.clone());
        *self.sweeper.lock().await = Some(handle);

        info!(schedules, sweep_interval = ?interval, "On-call module initialized");
        Ok(())
    }
}

#[async_trait]
impl ModuleShutdowner for OnCallModule {
    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.cancel.cancel();
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| ModuleError::Other(format!("escalation sweeper failed: {e}")))?;
        }
        info!("On-call module stopped");
        Ok(())
    }
}

fn spawn_sweeper(
    engine: Arc<RotationEngine>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Shutdown requested, stopping escalation sweeper");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = engine.escalate_overdue(Utc::now()).await {
                            warn!(error = %e, "Escalation sweep failed");
                            telemetry::record_module_error(MODULE_NAME, "sweep");
                        }
                    }
                }
            }
        }
        .instrument(info_span!("escalation_sweeper")),
    )
}

// ─── Event handling ───

impl OnCallState {
    async fn handle_command(
        &self,
        ctx: &CommandContext,
        comment: &IssueCommentEvent,
        now: DateTime<Utc>,
    ) -> Result<(), ModuleError> {
        let command = match parse_oncall_command(&ctx.args) {
            Ok(command) => command,
            Err(e) => {
                telemetry::record_command(MODULE_NAME, "invalid");
                self.engine
                    .comment(&ctx.repo, ctx.issue, format!("@{} {e}.\n\n{USAGE}", ctx.issuer))
                    .await;
                return Ok(());
            }
        };
        telemetry::record_command(MODULE_NAME, command.label());

        let outcome = match &command {
            OnCallCommand::Page { schedule, title } => {
                let title = title.as_deref().unwrap_or(&comment.issue_title);
                self.page(ctx, schedule, title, now).await
            }
            OnCallCommand::Ack => self.ack(ctx, now).await,
            OnCallCommand::Done => self.done(ctx, now).await,
            OnCallCommand::Escalate => self.escalate(ctx, now).await,
            OnCallCommand::Status => self.status(ctx).await.map(Some),
        };

        match outcome {
            Ok(Some(reply)) => self.engine.comment(&ctx.repo, ctx.issue, reply).await,
            Ok(None) => {}
            Err(e) if is_user_error(&e) => {
                debug!(error = %e, "Rejected on-call command");
                self.engine
                    .comment(&ctx.repo, ctx.issue, format!("@{} {e}.", ctx.issuer))
                    .await;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn page(
        &self,
        ctx: &CommandContext,
        schedule: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, RotationError> {
        let creation = self
            .engine
            .create_task(schedule, &ctx.repo, ctx.issue, title, &ctx.raw_body, now)
            .await?;

        // A successful assignment already notified the responder.
        Ok(match &creation {
            TaskCreation::Existing(task) => Some(format!(
                "An on-call task for this issue is already open on `{schedule}` ({}).",
                task.status
            )),
            TaskCreation::Created(task) if task.status == TaskStatus::Pending => Some(format!(
                "No responder is available on `{schedule}` right now. \
                 The task will be assigned as soon as someone is."
            )),
            TaskCreation::Created(_) => None,
        })
    }

    async fn ack(
        &self,
        ctx: &CommandContext,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, RotationError> {
        let tasks = self.engine.open_tasks_for_issue(&ctx.repo, ctx.issue).await?;

        let mut acked = 0;
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Assigned) {
            match self.engine.acknowledge(task.id, &ctx.issuer, now).await {
                Ok(_) => acked += 1,
                Err(RotationError::NotAssignee { .. } | RotationError::UnknownResponder(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(Some(if acked == 0 {
            format!(
                "@{} nothing on this issue is waiting for your acknowledgement.",
                ctx.issuer
            )
        } else {
            format!("Acknowledged by @{}.", ctx.issuer)
        }))
    }

    async fn done(
        &self,
        ctx: &CommandContext,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, RotationError> {
        let tasks = self.engine.open_tasks_for_issue(&ctx.repo, ctx.issue).await?;
        if tasks.is_empty() {
            return Ok(Some("There are no open on-call tasks on this issue.".into()));
        }

        for task in &tasks {
            self.engine.complete(task.id, now).await?;
        }
        Ok(Some(format!(
            "Completed {} on-call task{}.",
            tasks.len(),
            plural(tasks.len())
        )))
    }

    async fn escalate(
        &self,
        ctx: &CommandContext,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, RotationError> {
        let tasks = self.engine.open_tasks_for_issue(&ctx.repo, ctx.issue).await?;

        let mut moved = 0;
        for task in tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Assigned))
        {
            let updated = self.engine.escalate(task.id, now).await?;
            if updated.assignee != task.assignee {
                moved += 1;
            }
        }

        // Each move already posted its own notice.
        Ok((moved == 0).then(|| {
            "Nothing to escalate: no other responder is available, \
             or the task is already acknowledged."
                .to_string()
        }))
    }

    async fn status(&self, ctx: &CommandContext) -> Result<String, RotationError> {
        let tasks = self.engine.open_tasks_for_issue(&ctx.repo, ctx.issue).await?;
        if tasks.is_empty() {
            return Ok("There are no open on-call tasks on this issue.".into());
        }

        let mut reply = String::from("Open on-call tasks for this issue:\n");
        for task in &tasks {
            let schedule = self.engine.schedule_name(task.schedule_id).await?;
            let line = match self.engine.responder_login(task).await? {
                Some(login) => format!("- `{schedule}`: {}, assigned to @{login}\n", task.status),
                None => format!("- `{schedule}`: {}\n", task.status),
            };
            reply.push_str(&line);
        }
        Ok(reply)
    }

    async fn handle_issue(&self, event: &IssuesEvent, now: DateTime<Utc>) -> Result<(), ModuleError> {
        match &event.action {
            IssueAction::Opened => {
                let labels = event.labels.iter().map(String::as_str);
                if let Some(schedule) = self.config.schedule_for_labels(labels) {
                    self.raise(event, schedule, now).await?;
                }
            }
            IssueAction::Labeled => {
                if let Some(schedule) = self.config.schedule_for_labels(event.label.as_deref()) {
                    self.raise(event, schedule, now).await?;
                }
            }
            IssueAction::Closed => {
                let tasks = self.engine.open_tasks_for_issue(&event.repo, event.issue_number).await?;
                for task in &tasks {
                    self.engine.complete(task.id, now).await?;
                }
                if !tasks.is_empty() {
                    info!(repo = %event.repo, issue = %event.issue_number, count = tasks.len(), "Issue closed; completed on-call tasks");
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn raise(
        &self,
        event: &IssuesEvent,
        schedule: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ModuleError> {
        let creation = self
            .engine
            .create_task(
                schedule,
                &event.repo,
                event.issue_number,
                &event.title,
                &event.body,
                now,
            )
            .await?;
        if creation.is_new() {
            info!(
                repo = %event.repo,
                issue = %event.issue_number,
                schedule,
                "Raised on-call task from issue label"
            );
        }
        Ok(())
    }
}

/// Errors caused by what the commenter asked for, reported back to them.
fn is_user_error(e: &RotationError) -> bool {
    matches!(
        e,
        RotationError::UnknownSchedule(_)
            | RotationError::UnknownResponder(_)
            | RotationError::NotAssignee { .. }
            | RotationError::Transition(_)
    )
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
