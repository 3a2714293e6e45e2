//! Cancellable background tasks for the login flow
//!
//! Each running timer is owned through a handle; dropping the handle aborts
//! the task. A response already in flight when a handle is dropped may still
//! be delivered, which the state machine discards by token.

use crate::machine::LoginEvent;
use crate::service::IdentityService;
use scanlogin_core::{Error, StateToken};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Aborts the wrapped task when dropped
#[derive(Debug)]
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Ownership of the running status poll cycle for one token
#[derive(Debug)]
pub struct PollHandle {
    pub token: StateToken,
    pub interval: Duration,
    _guard: TaskGuard,
}

/// Ownership of the running expiry timer for one token
#[derive(Debug)]
pub struct ExpiryHandle {
    pub token: StateToken,
    pub deadline: Instant,
    _guard: TaskGuard,
}

/// Query `token` every `interval` until a terminal status or cancellation
///
/// The first query happens one interval after the call. Queries are
/// sequential, so at most one is outstanding per cycle.
pub fn start_polling<S: IdentityService>(
    service: Arc<S>,
    token: StateToken,
    interval: Duration,
    events: mpsc::Sender<LoginEvent>,
) -> PollHandle {
    let task_token = token.clone();
    let guard = TaskGuard::spawn(async move {
        let token = task_token;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let event = match service.check_status(&token).await {
                Ok(status) => {
                    debug!("Status for {}: {:?}", token, status);
                    let terminal = status.is_terminal();
                    let event = LoginEvent::PollStatus {
                        token: token.clone(),
                        status,
                    };
                    if events.send(event).await.is_err() || terminal {
                        break;
                    }
                    continue;
                }
                Err(Error::Domain(failure)) => LoginEvent::PollRejected {
                    token: token.clone(),
                    failure,
                },
                Err(e) => {
                    warn!("Status query for {} failed, will retry: {}", token, e);
                    continue;
                }
            };

            if events.send(event).await.is_err() {
                break;
            }
        }
        debug!("Poll cycle for {} ended", token);
    });

    PollHandle {
        token,
        interval,
        _guard: guard,
    }
}

/// Fire [`LoginEvent::ExpiryFired`] for `token` once `after` has elapsed
pub fn start_expiry(
    token: StateToken,
    after: Duration,
    events: mpsc::Sender<LoginEvent>,
) -> ExpiryHandle {
    let deadline = Instant::now() + after;
    let task_token = token.clone();
    let guard = TaskGuard::spawn(async move {
        time::sleep_until(deadline).await;
        let _ = events
            .send(LoginEvent::ExpiryFired { token: task_token })
            .await;
    });

    ExpiryHandle {
        token,
        deadline,
        _guard: guard,
    }
}

/// Request a new session and report the result tagged with `attempt`
pub fn spawn_issue<S: IdentityService>(
    service: Arc<S>,
    attempt: u64,
    events: mpsc::Sender<LoginEvent>,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        let result = service.request_session().await;
        let _ = events
            .send(LoginEvent::SessionIssued { attempt, result })
            .await;
    })
}

/// Fire [`LoginEvent::NavigationDue`] for `token` once `after` has elapsed
pub fn schedule_navigation(
    token: StateToken,
    after: Duration,
    events: mpsc::Sender<LoginEvent>,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        time::sleep(after).await;
        let _ = events.send(LoginEvent::NavigationDue { token }).await;
    })
}

/// Every background task the controller currently owns
#[derive(Debug, Default)]
pub struct Timers {
    issue: Option<TaskGuard>,
    poll: Option<PollHandle>,
    expiry: Option<ExpiryHandle>,
    navigation: Option<TaskGuard>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_issue(&mut self, guard: TaskGuard) {
        self.issue = Some(guard);
    }

    pub fn cancel_issue(&mut self) {
        self.issue = None;
    }

    /// Install a poll cycle; the previous one is stopped first
    pub fn set_poll(&mut self, handle: PollHandle) {
        self.stop_polling();
        self.poll = Some(handle);
    }

    pub fn stop_polling(&mut self) {
        if let Some(handle) = self.poll.take() {
            debug!("Stopping poll cycle for {}", handle.token);
        }
    }

    /// Install an expiry timer; the previous one is cancelled first
    pub fn set_expiry(&mut self, handle: ExpiryHandle) {
        self.cancel_expiry();
        self.expiry = Some(handle);
    }

    pub fn cancel_expiry(&mut self) {
        if let Some(handle) = self.expiry.take() {
            debug!("Cancelling expiry timer for {}", handle.token);
        }
    }

    pub fn set_navigation(&mut self, guard: TaskGuard) {
        self.navigation = Some(guard);
    }

    pub fn cancel_navigation(&mut self) {
        self.navigation = None;
    }

    pub fn cancel_all(&mut self) {
        self.cancel_issue();
        self.stop_polling();
        self.cancel_expiry();
        self.cancel_navigation();
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Interval of the running poll cycle
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll.as_ref().map(|p| p.interval)
    }

    pub fn is_expiry_armed(&self) -> bool {
        self.expiry.is_some()
    }

    /// Number of handles still held
    pub fn live_count(&self) -> usize {
        usize::from(self.issue.is_some())
            + usize::from(self.poll.is_some())
            + usize::from(self.expiry.is_some())
            + usize::from(self.navigation.is_some())
    }
}
