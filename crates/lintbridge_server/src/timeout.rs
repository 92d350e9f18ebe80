//! Restartable, cancellable deadline timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle of a [`TimeoutGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Idle,
    Running,
    Fired,
    Stopped,
}

#[derive(Debug)]
struct Timer {
    state: TimeoutState,
    /// Bumped on every start and stop; a sleeping task only fires if its
    /// generation is still current.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Invokes a callback once a delay elapses, unless stopped first.
///
/// At most one timer is armed per guard: `start` while running replaces the
/// previous timer. Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct TimeoutGuard {
    delay: Duration,
    timer: Arc<Mutex<Timer>>,
}

impl TimeoutGuard {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Arc::new(Mutex::new(Timer {
                state: TimeoutState::Idle,
                generation: 0,
                task: None,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> TimeoutState {
        self.timer.lock().state
    }

    /// Arms the timer, replacing any pending one.
    pub fn start<F>(&self, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut timer = self.timer.lock();
        if let Some(task) = timer.task.take() {
            task.abort();
        }
        timer.generation += 1;
        timer.state = TimeoutState::Running;

        let generation = timer.generation;
        let shared = Arc::clone(&self.timer);
        let delay = self.delay;
        timer.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let should_fire = {
                let mut timer = shared.lock();
                let current = timer.generation == generation && timer.state == TimeoutState::Running;
                if current {
                    timer.state = TimeoutState::Fired;
                    timer.task = None;
                }
                current
            };

            if should_fire {
                debug!("Timeout of {}ms fired", delay.as_millis());
                on_timeout();
            }
        }));
    }

    /// Cancels the pending timer. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let mut timer = self.timer.lock();
        if timer.state != TimeoutState::Running {
            return false;
        }
        if let Some(task) = timer.task.take() {
            task.abort();
        }
        timer.generation += 1;
        timer.state = TimeoutState::Stopped;
        true
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
