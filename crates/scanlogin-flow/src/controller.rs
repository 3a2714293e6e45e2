//! Login controller
//!
//! Runs the [`LoginMachine`] on a single task: commands from the bridge and
//! events from timers are processed one at a time, and the effects each one
//! returns are carried out before the next is read.

use crate::bridge::{create_bridge, FlowBridge, LoginCommand, LoginHandle};
use crate::machine::{Effect, LoginEvent, LoginMachine, LoginUpdate};
use crate::service::IdentityService;
use crate::timers::{self, Timers};
use scanlogin_core::LoginConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns the login state machine and every timer it started
pub struct LoginController<S: IdentityService> {
    service: Arc<S>,
    bridge: FlowBridge,
    machine: LoginMachine,
    events_tx: mpsc::Sender<LoginEvent>,
    events_rx: mpsc::Receiver<LoginEvent>,
    timers: Timers,
}

impl<S: IdentityService> LoginController<S> {
    pub fn new(service: Arc<S>, config: &LoginConfig, bridge: FlowBridge) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            service,
            bridge,
            machine: LoginMachine::new(config),
            events_tx,
            events_rx,
            timers: Timers::new(),
        }
    }

    /// Create a bridge and run a controller on it in the background
    pub fn spawn(service: Arc<S>, config: &LoginConfig) -> (LoginHandle, JoinHandle<()>) {
        let (handle, bridge) = create_bridge();
        let controller = Self::new(service, config, bridge);
        (handle, tokio::spawn(controller.run()))
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Login controller started");
        while self.step().await {}
        info!("Login controller stopped");
    }

    /// Process one command or event; `false` once torn down
    async fn step(&mut self) -> bool {
        let event = tokio::select! {
            command = self.bridge.command_rx.recv() => match command {
                Some(LoginCommand::Start) => LoginEvent::Start,
                Some(LoginCommand::Refresh) => LoginEvent::Refresh,
                Some(LoginCommand::Shutdown) => {
                    info!("Shutdown requested");
                    LoginEvent::Teardown
                }
                None => {
                    debug!("All login handles dropped");
                    LoginEvent::Teardown
                }
            },
            Some(event) = self.events_rx.recv() => event,
        };

        let teardown = matches!(event, LoginEvent::Teardown);
        self.dispatch(event);
        !teardown
    }

    fn dispatch(&mut self, event: LoginEvent) {
        let effects = self.machine.handle(event);

        let mut updates = Vec::new();
        for effect in effects {
            match effect {
                Effect::Notify(update) => updates.push(update),
                other => self.apply(other),
            }
        }

        // Publish the state before the updates so subscribers read it current
        let state = self.machine.state();
        self.bridge.state_tx.send_if_modified(|current| {
            if current == state {
                return false;
            }
            *current = state.clone();
            true
        });

        for update in updates {
            if let LoginUpdate::Navigate { route } = &update {
                info!("Login confirmed, navigating to {}", route);
            }
            // No subscribers is not an error
            let _ = self.bridge.update_tx.send(update);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::IssueSession { attempt } => {
                self.timers.set_issue(timers::spawn_issue(
                    self.service.clone(),
                    attempt,
                    self.events_tx.clone(),
                ));
            }
            Effect::CancelIssue => self.timers.cancel_issue(),
            Effect::StartPolling { token, interval } => {
                debug!("Polling {} every {:?}", token, interval);
                self.timers.set_poll(timers::start_polling(
                    self.service.clone(),
                    token,
                    interval,
                    self.events_tx.clone(),
                ));
            }
            Effect::StopPolling => self.timers.stop_polling(),
            Effect::StartExpiry { token, after } => {
                self.timers
                    .set_expiry(timers::start_expiry(token, after, self.events_tx.clone()));
            }
            Effect::CancelExpiry => self.timers.cancel_expiry(),
            Effect::ScheduleNavigation { token, after } => {
                self.timers.set_navigation(timers::schedule_navigation(
                    token,
                    after,
                    self.events_tx.clone(),
                ));
            }
            Effect::CancelNavigation => self.timers.cancel_navigation(),
            Effect::Notify(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use scanlogin_core::{Error, Phase, PollStatus};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::{self, Instant};

    fn controller(
        service: &Arc<ScriptedService>,
    ) -> (LoginHandle, LoginController<ScriptedService>) {
        let (handle, bridge) = create_bridge();
        let controller = LoginController::new(service.clone(), &LoginConfig::default(), bridge);
        (handle, controller)
    }

    /// Step until `done` holds, failing after a bounded number of events
    async fn drive<F>(controller: &mut LoginController<ScriptedService>, mut done: F)
    where
        F: FnMut(&LoginController<ScriptedService>) -> bool,
    {
        for _ in 0..1000 {
            if done(controller) {
                return;
            }
            assert!(controller.step().await, "controller stopped early");
        }
        panic!("condition not reached");
    }

    fn drain(rx: &mut broadcast::Receiver<LoginUpdate>) -> Vec<LoginUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_and_confirm_navigates_once() {
        let service = Arc::new(ScriptedService::new());
        service.script(
            "tok-1",
            [
                PollStatus::Pending,
                PollStatus::Pending,
                PollStatus::Scanned,
                PollStatus::Confirmed,
            ],
        );
        let (handle, mut controller) = controller(&service);
        let mut updates = handle.subscribe();
        let start = Instant::now();

        handle.start().await;
        drive(&mut controller, |c| {
            c.machine.phase() == Phase::Confirmed && c.timers.live_count() == 0
        })
        .await;

        let offsets: Vec<Duration> = service
            .query_times("tok-1")
            .into_iter()
            .map(|at| at - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6),
                Duration::from_secs(7),
            ]
        );

        let navigations = drain(&mut updates)
            .into_iter()
            .filter(|u| matches!(u, LoginUpdate::Navigate { .. }))
            .count();
        assert_eq!(navigations, 1);
        assert_eq!(handle.state().phase, Phase::Confirmed);

        // Nothing is left running: no further events and no further queries
        let idle = time::timeout(Duration::from_secs(600), controller.step()).await;
        assert!(idle.is_err());
        assert_eq!(service.query_count("tok-1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_lifetime() {
        let service = Arc::new(ScriptedService::new());
        let (handle, mut controller) = controller(&service);
        let start = Instant::now();

        handle.start().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Expired).await;

        assert_eq!(start.elapsed(), Duration::from_secs(300));
        assert_eq!(controller.timers.live_count(), 0);

        // A query racing the expiry may still be delivered; it must not be followed by more
        let queries = service.query_count("tok-1");
        let _ = time::timeout(Duration::from_secs(60), async {
            loop {
                controller.step().await;
            }
        })
        .await;
        assert_eq!(service.query_count("tok-1"), queries);
        assert_eq!(controller.machine.phase(), Phase::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanned_switches_to_fast_interval() {
        let service = Arc::new(ScriptedService::new());
        service.script("tok-1", [PollStatus::Scanned]);
        let (handle, mut controller) = controller(&service);

        handle.start().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanning).await;
        assert_eq!(
            controller.timers.poll_interval(),
            Some(Duration::from_millis(2000))
        );

        drive(&mut controller, |c| c.machine.phase() == Phase::Scanned).await;
        assert_eq!(
            controller.timers.poll_interval(),
            Some(Duration::from_millis(1000))
        );
        assert!(controller.timers.is_expiry_armed());
        // Issue guard released, one poll cycle, one expiry timer
        assert_eq!(controller.timers.live_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_session() {
        let service = Arc::new(ScriptedService::new());
        service.script("tok-1", [PollStatus::Scanned]);
        let (handle, mut controller) = controller(&service);

        handle.start().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanned).await;

        handle.refresh().await;
        drive(&mut controller, |c| {
            c.machine.state().active_token().map(|t| t.as_str()) == Some("tok-2")
        })
        .await;
        assert_eq!(controller.machine.phase(), Phase::Scanning);
        assert_eq!(
            controller.timers.poll_interval(),
            Some(Duration::from_millis(2000))
        );

        let old_queries = service.query_count("tok-1");
        let _ = time::timeout(Duration::from_secs(9), async {
            loop {
                controller.step().await;
            }
        })
        .await;
        assert_eq!(service.query_count("tok-1"), old_queries);
        assert_eq!(service.query_count("tok-2"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_expiry_restarts_cycle() {
        let service = Arc::new(ScriptedService::new());
        service.script("tok-1", [PollStatus::Expired]);
        let (handle, mut controller) = controller(&service);

        handle.start().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Expired).await;
        assert_eq!(controller.timers.live_count(), 0);

        handle.refresh().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanning).await;
        assert_eq!(service.issued_count(), 2);
        assert!(controller.timers.is_polling());
        assert!(controller.timers.is_expiry_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_failure_surfaces_and_allows_retry() {
        let service = Arc::new(ScriptedService::new());
        service.fail_next_issue(Error::network("/wechat_qrcode", "connection refused"));
        let (handle, mut controller) = controller(&service);
        let mut updates = handle.subscribe();

        handle.start().await;
        assert!(controller.step().await);
        assert!(controller.machine.is_issuing());
        assert!(controller.step().await);
        assert!(!controller.machine.is_issuing());
        assert_eq!(controller.timers.live_count(), 0);
        assert_eq!(controller.machine.phase(), Phase::Init);
        assert!(drain(&mut updates)
            .iter()
            .any(|u| matches!(u, LoginUpdate::Failure { .. })));

        handle.refresh().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanning).await;
        assert_eq!(
            controller.machine.state().active_token().map(|t| t.as_str()),
            Some("tok-1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_while_issuing_is_ignored() {
        let service = Arc::new(ScriptedService::new());
        service.set_issue_delay(Duration::from_secs(3));
        let (handle, mut controller) = controller(&service);

        handle.start().await;
        handle.refresh().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanning).await;

        assert_eq!(service.issued_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_tears_down() {
        let service = Arc::new(ScriptedService::new());
        let (handle, mut controller) = controller(&service);

        handle.start().await;
        drive(&mut controller, |c| c.machine.phase() == Phase::Scanning).await;
        drop(handle);

        while controller.step().await {}
        assert_eq!(controller.timers.live_count(), 0);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(service.query_count("tok-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_controller_reaches_confirmed() {
        let service = Arc::new(ScriptedService::new());
        service.script("tok-1", [PollStatus::Scanned, PollStatus::Confirmed]);
        let (handle, task) = LoginController::spawn(service.clone(), &LoginConfig::default());
        let mut updates = handle.subscribe();

        handle.start().await;
        let state = handle.wait_for(|s| s.phase.is_terminal()).await.unwrap();
        assert_eq!(state.phase, Phase::Confirmed);

        loop {
            if let LoginUpdate::Navigate { route } = updates.recv().await.unwrap() {
                assert_eq!(route, "/");
                break;
            }
        }

        handle.shutdown().await;
        task.await.unwrap();
        assert!(!handle.start().await);
    }
}
