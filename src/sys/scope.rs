//! Cancellation scopes for work started from an overlay surface.
//!
//! Every shown surface gets its own [`OverlayScope`]. Units of work run as
//! separate tasks so one failing or panicking unit never affects its
//! siblings; cancelling the scope stops all of them.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

new_key_type! {
    pub struct ScopeId;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum UnitOutcome {
    Completed,
    Failed(String),
    Panicked(String),
    Cancelled,
}

impl UnitOutcome {
    pub fn is_failure(&self) -> bool { matches!(self, UnitOutcome::Failed(_) | UnitOutcome::Panicked(_)) }

    fn from_join(joined: Result<anyhow::Result<()>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => UnitOutcome::Completed,
            Ok(Err(err)) => UnitOutcome::Failed(format!("{err:#}")),
            Err(err) if err.is_panic() => UnitOutcome::Panicked(panic_message(&*err.into_panic())),
            Err(_) => UnitOutcome::Cancelled,
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Completed => f.write_str("completed"),
            UnitOutcome::Failed(msg) => write!(f, "failed: {msg}"),
            UnitOutcome::Panicked(msg) => write!(f, "panicked: {msg}"),
            UnitOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[derive(Clone, Debug)]
pub struct OverlayScope {
    id: ScopeId,
    token: CancellationToken,
    tracker: TaskTracker,
    cancelled: Arc<AtomicBool>,
}

impl OverlayScope {
    pub fn id(&self) -> ScopeId { self.id }

    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }

    /// A token that is cancelled together with this scope.
    pub fn child_token(&self) -> CancellationToken { self.token.child_token() }

    /// Units that have not finished yet.
    pub fn live_units(&self) -> usize { self.tracker.len() }

    /// Runs `work` on its own task and hands its outcome to `on_done`.
    ///
    /// Returns false without starting anything once the scope is cancelled.
    pub fn spawn<F, D>(&self, label: &str, work: F, on_done: D) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
        D: FnOnce(UnitOutcome) + Send + 'static,
    {
        if self.is_cancelled() {
            debug!(label, "scope already cancelled; unit not started");
            return false;
        }
        let token = self.token.clone();
        let label = label.to_owned();
        let unit = tokio::spawn(work);
        let abort = unit.abort_handle();
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    abort.abort();
                    UnitOutcome::Cancelled
                }
                joined = unit => UnitOutcome::from_join(joined),
            };
            if outcome.is_failure() {
                warn!(%label, %outcome, "overlay unit failed");
            } else {
                debug!(%label, %outcome, "overlay unit finished");
            }
            on_done(outcome);
        });
        true
    }

    /// Waits for every unit to finish. Only returns once the scope is
    /// cancelled.
    pub async fn wait(&self) { self.tracker.wait().await }

    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tracker.close();
        self.token.cancel();
        true
    }
}

#[derive(Debug, Default)]
pub struct ScopeManager {
    scopes: SlotMap<ScopeId, OverlayScope>,
}

impl ScopeManager {
    pub fn new() -> Self { Self::default() }

    pub fn create_scope(&mut self) -> OverlayScope {
        let id = self.scopes.insert_with_key(|id| OverlayScope {
            id,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            cancelled: Arc::default(),
        });
        self.scopes[id].clone()
    }

    /// Cancels and forgets the scope. Returns false if it was already gone.
    pub fn cancel(&mut self, id: ScopeId) -> bool {
        match self.scopes.remove(id) {
            Some(scope) => scope.cancel(),
            None => false,
        }
    }

    pub fn is_live(&self, id: ScopeId) -> bool { self.scopes.contains_key(id) }

    pub fn live_count(&self) -> usize { self.scopes.len() }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;

    fn outcome_channel() -> (impl FnOnce(UnitOutcome) + Send + 'static, oneshot::Receiver<UnitOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            move |outcome: UnitOutcome| {
                _ = tx.send(outcome);
            },
            rx,
        )
    }

    async fn fails() -> anyhow::Result<()> { anyhow::bail!("boom") }

    async fn panics() -> anyhow::Result<()> { panic!("kaboom") }

    async fn completes() -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        Ok(())
    }

    #[tokio::test]
    async fn failures_and_panics_stay_isolated() {
        let mut scopes = ScopeManager::new();
        let scope = scopes.create_scope();

        let (failed_done, failed) = outcome_channel();
        let (panicked_done, panicked) = outcome_channel();
        let (ok_done, ok) = outcome_channel();
        assert!(scope.spawn("fails", fails(), failed_done));
        assert!(scope.spawn("panics", panics(), panicked_done));
        assert!(scope.spawn("works", completes(), ok_done));

        assert_eq!(failed.await.unwrap(), UnitOutcome::Failed("boom".into()));
        assert_eq!(panicked.await.unwrap(), UnitOutcome::Panicked("kaboom".into()));
        assert_eq!(ok.await.unwrap(), UnitOutcome::Completed);
        assert!(!scope.is_cancelled());
        assert!(scopes.is_live(scope.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pending_units() {
        let mut scopes = ScopeManager::new();
        let scope = scopes.create_scope();
        let (done, outcome) = outcome_channel();
        let child = scope.child_token();
        scope.spawn(
            "sleeps",
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(())
            },
            done,
        );

        assert!(scopes.cancel(scope.id()));
        assert!(!scopes.cancel(scope.id()));
        assert_eq!(outcome.await.unwrap(), UnitOutcome::Cancelled);
        assert!(child.is_cancelled());
        scope.wait().await;
        assert_eq!(scope.live_units(), 0);
        assert_eq!(scopes.live_count(), 0);
    }

    #[tokio::test]
    async fn spawn_after_cancel_is_refused() {
        let mut scopes = ScopeManager::new();
        let scope = scopes.create_scope();
        scopes.cancel(scope.id());
        assert!(!scope.spawn("late", completes(), |_| {}));
    }

    #[test]
    fn scopes_are_independent() {
        let mut scopes = ScopeManager::new();
        let first = scopes.create_scope();
        let second = scopes.create_scope();
        assert_ne!(first.id(), second.id());

        scopes.cancel(first.id());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(scopes.live_count(), 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7u8), "unknown panic payload");
    }
}
