//! QR login state machine
//!
//! Pure transition logic: every input is a [`LoginEvent`], every side effect
//! is returned as an [`Effect`] for the controller to carry out. Phases only
//! ever move forward in `Init < Scanning < Scanned < {Confirmed, Expired}`;
//! only a refresh starts over, and it does so with a new session.

use scanlogin_core::{
    DomainFailure, Error, LoginConfig, LoginSession, LoginState, Phase, PollStatus, StateToken,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inputs to the state machine, from the presentation layer or from timers
#[derive(Debug, Clone)]
pub enum LoginEvent {
    /// Begin the first login attempt
    Start,
    /// Discard the current session and issue a new one
    Refresh,
    /// The owning component is going away
    Teardown,
    /// A session request finished
    SessionIssued {
        attempt: u64,
        result: Result<LoginSession, Error>,
    },
    /// The poller received a status for `token`
    PollStatus { token: StateToken, status: PollStatus },
    /// The service rejected a status query for `token`
    PollRejected {
        token: StateToken,
        failure: DomainFailure,
    },
    /// The expiry timer for `token` fired
    ExpiryFired { token: StateToken },
    /// The post-confirmation display delay for `token` elapsed
    NavigationDue { token: StateToken },
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    IssueSession { attempt: u64 },
    CancelIssue,
    /// Start a poll cycle, replacing any running one
    StartPolling { token: StateToken, interval: Duration },
    StopPolling,
    StartExpiry { token: StateToken, after: Duration },
    CancelExpiry,
    ScheduleNavigation { token: StateToken, after: Duration },
    CancelNavigation,
    Notify(LoginUpdate),
}

/// Notifications for observers of the login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginUpdate {
    /// A new QR code is ready to show
    SessionIssued(LoginSession),
    PhaseChanged { from: Phase, to: Phase },
    /// Message to show the user
    Failure { message: String },
    /// Login finished; leave for `route`
    Navigate { route: String },
}

/// Owner of the single active [`LoginState`]
#[derive(Debug)]
pub struct LoginMachine {
    state: LoginState,
    /// Number of the most recent session request
    attempt: u64,
    issuing: bool,
    navigated: bool,
    scan_interval: Duration,
    confirm_interval: Duration,
    session_lifetime: Duration,
    navigation_delay: Duration,
    landing_route: String,
}

impl LoginMachine {
    pub fn new(config: &LoginConfig) -> Self {
        Self {
            state: LoginState::default(),
            attempt: 0,
            issuing: false,
            navigated: false,
            scan_interval: config.scan_poll_interval,
            confirm_interval: config.confirm_poll_interval,
            session_lifetime: config.session_lifetime,
            navigation_delay: config.navigation_delay,
            landing_route: config.landing_route.clone(),
        }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// A session request is outstanding
    pub fn is_issuing(&self) -> bool {
        self.issuing
    }

    /// Apply one event and return the effects it requires
    pub fn handle(&mut self, event: LoginEvent) -> Vec<Effect> {
        match event {
            LoginEvent::Start => {
                if self.state.phase == Phase::Init && self.state.session.is_none() && !self.issuing
                {
                    self.issue()
                } else {
                    debug!("Ignoring start in phase {}", self.state.phase);
                    Vec::new()
                }
            }
            LoginEvent::Refresh => self.refresh(),
            LoginEvent::Teardown => self.teardown(),
            LoginEvent::SessionIssued { attempt, result } => self.on_issued(attempt, result),
            LoginEvent::PollStatus { token, status } => {
                if !self.is_current(&token) {
                    debug!("Discarding stale {:?} status for {}", status, token);
                    return Vec::new();
                }
                self.on_status(token, status)
            }
            LoginEvent::PollRejected { token, failure } => {
                if !self.is_current(&token) || self.state.phase.is_terminal() {
                    return Vec::new();
                }
                warn!("Status query for {} rejected: {}", token, failure);
                vec![Effect::Notify(LoginUpdate::Failure {
                    message: failure.message,
                })]
            }
            LoginEvent::ExpiryFired { token } => {
                if !self.is_current(&token) {
                    debug!("Discarding stale expiry for {}", token);
                    return Vec::new();
                }
                self.on_expiry()
            }
            LoginEvent::NavigationDue { token } => {
                if !self.is_current(&token)
                    || self.state.phase != Phase::Confirmed
                    || self.navigated
                {
                    return Vec::new();
                }
                self.navigated = true;
                vec![
                    Effect::CancelNavigation,
                    Effect::Notify(LoginUpdate::Navigate {
                        route: self.landing_route.clone(),
                    }),
                ]
            }
        }
    }

    fn is_current(&self, token: &StateToken) -> bool {
        self.state.active_token() == Some(token)
    }

    fn issue(&mut self) -> Vec<Effect> {
        self.attempt += 1;
        self.issuing = true;
        debug!("Requesting login session (attempt {})", self.attempt);
        vec![Effect::IssueSession {
            attempt: self.attempt,
        }]
    }

    fn refresh(&mut self) -> Vec<Effect> {
        let from = self.state.phase;
        match from {
            Phase::Confirmed => {
                debug!("Ignoring refresh after confirmation");
                return Vec::new();
            }
            Phase::Init if self.issuing => {
                debug!("Ignoring refresh while a session request is in flight");
                return Vec::new();
            }
            _ => {}
        }

        info!("Refreshing login session");
        let mut effects = vec![Effect::StopPolling, Effect::CancelExpiry];
        self.state.session = None;
        self.state.phase = Phase::Init;
        self.navigated = false;
        if from != Phase::Init {
            effects.push(Effect::Notify(LoginUpdate::PhaseChanged {
                from,
                to: Phase::Init,
            }));
        }
        effects.extend(self.issue());
        effects
    }

    fn teardown(&mut self) -> Vec<Effect> {
        self.issuing = false;
        vec![
            Effect::CancelIssue,
            Effect::StopPolling,
            Effect::CancelExpiry,
            Effect::CancelNavigation,
        ]
    }

    fn on_issued(&mut self, attempt: u64, result: Result<LoginSession, Error>) -> Vec<Effect> {
        if !self.issuing || attempt != self.attempt || self.state.phase != Phase::Init {
            debug!("Discarding stale session request result (attempt {})", attempt);
            return Vec::new();
        }
        self.issuing = false;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to obtain login session: {}", e);
                return vec![
                    Effect::CancelIssue,
                    Effect::Notify(LoginUpdate::Failure {
                        message: e.to_string(),
                    }),
                ];
            }
        };

        let token = session.state_token.clone();
        info!("Login session {} issued", token);
        self.state.session = Some(session.clone());

        let mut effects = vec![
            Effect::CancelIssue,
            Effect::Notify(LoginUpdate::SessionIssued(session)),
        ];
        effects.extend(self.advance(Phase::Scanning));
        effects.push(Effect::StartPolling {
            token: token.clone(),
            interval: self.scan_interval,
        });
        effects.push(Effect::StartExpiry {
            token,
            after: self.session_lifetime,
        });
        effects
    }

    fn on_status(&mut self, token: StateToken, status: PollStatus) -> Vec<Effect> {
        let phase = self.state.phase;
        match (phase, status) {
            (Phase::Scanning, PollStatus::Scanned) => {
                let mut effects = self.advance(Phase::Scanned);
                effects.push(Effect::StartPolling {
                    token,
                    interval: self.confirm_interval,
                });
                effects
            }
            (Phase::Scanning | Phase::Scanned, PollStatus::Confirmed) => {
                let mut effects = self.advance(Phase::Confirmed);
                effects.extend([
                    Effect::StopPolling,
                    Effect::CancelExpiry,
                    Effect::ScheduleNavigation {
                        token,
                        after: self.navigation_delay,
                    },
                ]);
                effects
            }
            (Phase::Scanning | Phase::Scanned, PollStatus::Expired) => {
                let mut effects = self.advance(Phase::Expired);
                effects.extend([Effect::StopPolling, Effect::CancelExpiry]);
                effects
            }
            _ => {
                debug!("No transition for {:?} in phase {}", status, phase);
                Vec::new()
            }
        }
    }

    fn on_expiry(&mut self) -> Vec<Effect> {
        match self.state.phase {
            Phase::Scanning | Phase::Scanned => {
                info!("Login session expired");
                let mut effects = self.advance(Phase::Expired);
                effects.extend([Effect::StopPolling, Effect::CancelExpiry]);
                effects
            }
            _ => Vec::new(),
        }
    }

    /// Move forward to `to`; never moves backward or sideways
    fn advance(&mut self, to: Phase) -> Vec<Effect> {
        let from = self.state.phase;
        if to.rank() <= from.rank() {
            return Vec::new();
        }
        self.state.phase = to;
        debug!("Phase {} -> {}", from, to);
        vec![Effect::Notify(LoginUpdate::PhaseChanged { from, to })]
    }
}
