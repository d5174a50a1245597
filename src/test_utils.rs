//! Shared test utilities and arbitrary generators for property-based testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;

use crate::app::AppHandle;
use crate::config::AppConfig;
use crate::github::{PlatformClient, PlatformError};
use crate::modules::{DispatchedEvent, Module, ModuleError, ModuleInitializer, ModuleShutdowner};
use crate::oncall::rotation::Candidate;
use crate::oncall::{RotationPolicy, ScheduleConfig};
use crate::storage::Storage;
use crate::types::{IssueNumber, RepoId, ResponderId};
use crate::webhooks::{
    CommentAction, IssueAction, IssueCommentEvent, IssuesEvent, OtherEvent, WebhookEvent,
};

// ─── Modules ───

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    FailHandler,
    PanicHandler,
    SlowHandler(Duration),
    FailInit,
    HangShutdown(Duration),
    FailShutdown,
}

/// A module that records every event it receives and then behaves as
/// configured. Implements all three module capabilities.
pub struct RecordingModule {
    name: String,
    behavior: Behavior,
    events: Mutex<Vec<DispatchedEvent>>,
    initialized: AtomicBool,
    shutdown_started: AtomicBool,
    shutdown_finished: AtomicBool,
}

impl RecordingModule {
    fn with(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(RecordingModule {
            name: name.to_string(),
            behavior,
            events: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            shutdown_finished: AtomicBool::new(false),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::with(name, Behavior::Succeed)
    }

    /// Returns an error from every event.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::with(name, Behavior::FailHandler)
    }

    /// Panics on every event.
    pub fn panicking(name: &str) -> Arc<Self> {
        Self::with(name, Behavior::PanicHandler)
    }

    /// Sleeps for `delay` on every event.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::with(name, Behavior::SlowHandler(delay))
    }

    pub fn failing_init(name: &str) -> Arc<Self> {
        Self::with(name, Behavior::FailInit)
    }

    /// Takes `delay` to shut down.
    pub fn hung_shutdown(name: &str, delay: Duration) -> Arc<Self> {
        Self::with(name, Behavior::HangShutdown(delay))
    }

    pub fn failing_shutdown(name: &str) -> Arc<Self> {
        Self::with(name, Behavior::FailShutdown)
    }

    pub fn events(&self) -> Vec<DispatchedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn shutdown_started(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    pub fn shutdown_finished(&self) -> bool {
        self.shutdown_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_event(&self, event: &DispatchedEvent) -> Result<(), ModuleError> {
        self.events.lock().unwrap().push(event.clone());
        match self.behavior {
            Behavior::FailHandler => Err(ModuleError::Other("handler failed".into())),
            Behavior::PanicHandler => panic!("{} exploded", self.name),
            Behavior::SlowHandler(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ModuleInitializer for RecordingModule {
    async fn initialize(&self, _app: &AppHandle) -> Result<(), ModuleError> {
        if let Behavior::FailInit = self.behavior {
            return Err(ModuleError::Config("refusing to start".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ModuleShutdowner for RecordingModule {
    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.shutdown_started.store(true, Ordering::SeqCst);
        match self.behavior {
            Behavior::HangShutdown(delay) => tokio::time::sleep(delay).await,
            Behavior::FailShutdown => {
                self.shutdown_finished.store(true, Ordering::SeqCst);
                return Err(ModuleError::Other("shutdown failed".into()));
            }
            _ => {}
        }
        self.shutdown_finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Platform ───

/// (repository, issue, comment body or assignee login)
pub type PlatformCall = (RepoId, IssueNumber, String);

/// A platform client that records every call. A failing one records the
/// attempt and then returns an error.
#[derive(Default)]
pub struct RecordingPlatform {
    fail: bool,
    comments: Mutex<Vec<PlatformCall>>,
    assignments: Mutex<Vec<PlatformCall>>,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(RecordingPlatform {
            fail: true,
            ..Self::default()
        })
    }

    pub fn comments(&self) -> Vec<PlatformCall> {
        self.comments.lock().unwrap().clone()
    }

    pub fn assignments(&self) -> Vec<PlatformCall> {
        self.assignments.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), PlatformError> {
        if self.fail {
            Err(PlatformError::permanent("platform unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatform {
    async fn post_comment(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        body: &str,
    ) -> Result<(), PlatformError> {
        self.comments
            .lock()
            .unwrap()
            .push((repo.clone(), issue, body.to_string()));
        self.outcome()
    }

    async fn assign_issue(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        login: &str,
    ) -> Result<(), PlatformError> {
        self.assignments
            .lock()
            .unwrap()
            .push((repo.clone(), issue, login.to_string()));
        self.outcome()
    }
}

// ─── Fixtures ───

pub fn sample_event() -> DispatchedEvent {
    DispatchedEvent::new(
        "star",
        WebhookEvent::Other(OtherEvent {
            action: Some("created".into()),
            repo: Some(RepoId::new("acme", "widgets")),
        }),
        Bytes::from_static(br#"{"action":"created"}"#),
    )
}

/// A comment created on acme/widgets#5 ("Widget is broken").
pub fn comment_event(author: &str, body: &str) -> DispatchedEvent {
    let event = IssueCommentEvent {
        repo: RepoId::new("acme", "widgets"),
        action: CommentAction::Created,
        issue_number: IssueNumber(5),
        issue_title: "Widget is broken".into(),
        is_pull_request: false,
        comment_id: 1,
        body: body.into(),
        author_login: author.into(),
    };
    DispatchedEvent::new("issue_comment", WebhookEvent::IssueComment(event), Bytes::new())
}

/// An `issues` event on acme/widgets#9.
pub fn issues_event(action: IssueAction, labels: &[&str], label: Option<&str>) -> DispatchedEvent {
    let event = IssuesEvent {
        repo: RepoId::new("acme", "widgets"),
        action,
        issue_number: IssueNumber(9),
        title: "Database is down".into(),
        body: "All writes failing".into(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        label: label.map(str::to_string),
        sender_login: "carol".into(),
    };
    DispatchedEvent::new("issues", WebhookEvent::Issues(event), Bytes::new())
}

pub fn schedule_config(name: &str, policy: RotationPolicy, members: &[&str]) -> ScheduleConfig {
    ScheduleConfig {
        name: name.into(),
        policy,
        enabled: true,
        members: members.iter().map(|m| m.to_string()).collect(),
        inactive: Vec::new(),
    }
}

/// An [`AppHandle`] over an in-memory database and a recording platform.
pub async fn app_handle(yaml: &str) -> AppHandle {
    AppHandle {
        config: Arc::new(AppConfig::parse(yaml).unwrap()),
        storage: Storage::connect_in_memory().await.unwrap(),
        platform: RecordingPlatform::new(),
    }
}

// ─── Strategies ───

/// Up to eight members with distinct ids `1..=n` and random availability.
pub fn arb_candidates() -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec(any::<bool>(), 0..8).prop_map(|active| {
        active
            .into_iter()
            .enumerate()
            .map(|(i, active)| Candidate {
                responder: ResponderId(i as i64 + 1),
                active,
            })
            .collect()
    })
}
