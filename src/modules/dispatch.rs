//! Fan-out of verified events to every registered module.
//!
//! Each module gets its own task per event. The HTTP handler never waits for
//! those tasks: [`Dispatcher::dispatch`] returns as soon as they are spawned.
//! A module that errors, panics, or overruns the handler timeout is logged and
//! counted, and nothing else observes it.
//!
//! Tasks are tracked so that shutdown can [`drain`](Dispatcher::drain) them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::telemetry;

use super::{DispatchedEvent, Module, ModuleRegistry};

/// Default per-handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    tracker: TaskTracker,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Dispatcher {
            registry,
            tracker: TaskTracker::new(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Spawns one handler task per registered module and returns how many
    /// were spawned. Does not wait for any of them.
    pub async fn dispatch(&self, event: DispatchedEvent) -> usize {
        let modules = self.registry.snapshot().await;

        for descriptor in &modules {
            let span = info_span!(
                "module_handler",
                module = %descriptor.name,
                event_type = %event.event_type,
            );
            self.tracker.spawn(
                run_handler(descriptor.handler.clone(), event.clone(), self.handler_timeout)
                    .instrument(span),
            );
        }

        debug!(
            event_type = %event.event_type,
            modules = modules.len(),
            "Dispatched event"
        );
        modules.len()
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `timeout` for in-flight handlers to finish.
    ///
    /// Returns `true` if everything finished. Events dispatched after the
    /// drain starts are still spawned and tracked.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Draining in-flight module handlers");
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    timeout_secs = timeout.as_secs(),
                    "Timed out draining module handlers"
                );
                false
            }
        }
    }
}

async fn run_handler(module: Arc<dyn Module>, event: DispatchedEvent, timeout: Duration) {
    let name = module.name().to_string();
    let guarded = AssertUnwindSafe(module.handle_event(&event)).catch_unwind();

    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(()))) => {
            debug!("Module handled event");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "Module failed to handle event");
            telemetry::record_module_error(&name, "handler");
        }
        Ok(Err(payload)) => {
            error!(panic = %panic_message(&*payload), "Module panicked while handling event");
            telemetry::record_module_error(&name, "panic");
        }
        Err(_) => {
            error!(
                timeout_secs = timeout.as_secs(),
                "Module timed out handling event"
            );
            telemetry::record_module_error(&name, "timeout");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleDescriptor;
    use crate::test_utils::{RecordingModule, sample_event};

    async fn registry_with(modules: &[Arc<RecordingModule>]) -> Arc<ModuleRegistry> {
        let registry = Arc::new(ModuleRegistry::new());
        for m in modules {
            registry
                .register(ModuleDescriptor::new(m.clone()))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn every_module_sees_the_same_event_once() {
        let modules: Vec<_> = (0..5)
            .map(|i| RecordingModule::new(&format!("m{i}")))
            .collect();
        let dispatcher = Dispatcher::new(registry_with(&modules).await);

        let event = sample_event();
        assert_eq!(dispatcher.dispatch(event.clone()).await, 5);
        assert!(dispatcher.drain(Duration::from_secs(5)).await);

        for m in &modules {
            let seen = m.events();
            assert_eq!(seen.len(), 1, "module {} call count", m.name());
            assert_eq!(seen[0].event_type, event.event_type);
            assert_eq!(seen[0].raw, event.raw);
            assert_eq!(seen[0].event, event.event);
        }
    }

    #[tokio::test]
    async fn failing_and_panicking_modules_do_not_affect_others() {
        let ok_a = RecordingModule::new("ok-a");
        let failing = RecordingModule::failing("broken");
        let panicking = RecordingModule::panicking("explodes");
        let ok_b = RecordingModule::new("ok-b");
        let dispatcher = Dispatcher::new(
            registry_with(&[ok_a.clone(), failing.clone(), panicking.clone(), ok_b.clone()])
                .await,
        );

        dispatcher.dispatch(sample_event()).await;
        dispatcher.dispatch(sample_event()).await;
        assert!(dispatcher.drain(Duration::from_secs(5)).await);

        assert_eq!(ok_a.events().len(), 2);
        assert_eq!(ok_b.events().len(), 2);
        assert_eq!(failing.events().len(), 2);
        assert_eq!(panicking.events().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_returns_before_slow_handlers_finish() {
        let slow = RecordingModule::slow("slow", Duration::from_secs(30));
        let dispatcher = Dispatcher::new(registry_with(&[slow.clone()]).await);

        let started = tokio::time::Instant::now();
        dispatcher.dispatch(sample_event()).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(dispatcher.in_flight(), 1);
    }

    #[tokio::test]
    async fn handler_timeout_abandons_hung_module() {
        let slow = RecordingModule::slow("hung", Duration::from_secs(3600));
        let dispatcher = Dispatcher::new(registry_with(&[slow]).await)
            .with_handler_timeout(Duration::from_millis(50));

        dispatcher.dispatch(sample_event()).await;
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_gives_up_after_timeout() {
        let slow = RecordingModule::slow("hung", Duration::from_secs(3600));
        let dispatcher = Dispatcher::new(registry_with(&[slow]).await);

        dispatcher.dispatch(sample_event()).await;
        assert!(!dispatcher.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn empty_registry_dispatches_nothing() {
        let dispatcher = Dispatcher::new(Arc::new(ModuleRegistry::new()));
        assert_eq!(dispatcher.dispatch(sample_event()).await, 0);
        assert!(dispatcher.drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn events_after_drain_still_run() {
        let module = RecordingModule::new("late");
        let dispatcher = Dispatcher::new(registry_with(&[module.clone()]).await);

        assert!(dispatcher.drain(Duration::from_millis(10)).await);
        dispatcher.dispatch(sample_event()).await;
        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(module.events().len(), 1);
    }
}
