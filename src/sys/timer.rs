use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::trace;

/// Identifies one arming of a [`GestureTimer`]; a fire carrying an older
/// token is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerToken(u64);

#[derive(Debug)]
struct Armed {
    token: TimerToken,
    task: JoinHandle<()>,
}

/// A cancellable one-shot timer with at most one pending fire.
///
/// The fire callback only posts a message; the owner confirms it with
/// [`GestureTimer::claim`] before acting, which discards fires that raced
/// with a cancel.
#[derive(Debug, Default)]
pub struct GestureTimer {
    generation: u64,
    armed: Option<Armed>,
}

impl GestureTimer {
    pub fn new() -> Self { Self::default() }

    /// Must be called inside a tokio runtime. Returns `None` if already armed.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F) -> Option<TimerToken>
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        if self.armed.is_some() {
            trace!("gesture timer already armed");
            return None;
        }
        self.generation = self.generation.wrapping_add(1);
        let token = TimerToken(self.generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token);
        });
        self.armed = Some(Armed { token, task });
        Some(token)
    }

    /// Returns whether a pending fire was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Accepts a fire for the current arming and disarms. Stale tokens are
    /// rejected.
    pub fn claim(&mut self, token: TimerToken) -> bool {
        if self.armed.as_ref().is_some_and(|armed| armed.token == token) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool { self.armed.is_some() }
}

impl Drop for GestureTimer {
    fn drop(&mut self) { self.cancel(); }
}
