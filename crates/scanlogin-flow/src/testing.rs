//! Scripted identity service for flow tests

use crate::service::{AccountService, IdentityService};
use scanlogin_core::protocol::{LoginRequest, RegisterRequest};
use scanlogin_core::{Error, LoginSession, PollStatus, Result, StateToken};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{self, Instant};
use url::Url;

/// Issues `tok-1`, `tok-2`, ... and answers status queries from per-token
/// scripts; an exhausted script answers `pending`.
#[derive(Default)]
pub struct ScriptedService {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    issued: u64,
    issue_delay: Option<Duration>,
    issue_failures: VecDeque<Error>,
    statuses: HashMap<String, VecDeque<PollStatus>>,
    status_failures: HashMap<String, VecDeque<Error>>,
    queries: Vec<(String, Instant)>,
    captchas: u64,
    results: HashMap<&'static str, VecDeque<Result<()>>>,
    calls: HashMap<&'static str, usize>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue statuses for `token`
    pub fn script(&self, token: &str, statuses: impl IntoIterator<Item = PollStatus>) {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .entry(token.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Fail the next status query for `token`
    pub fn fail_next(&self, token: &str, error: Error) {
        self.inner
            .lock()
            .unwrap()
            .status_failures
            .entry(token.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail the next session request
    pub fn fail_next_issue(&self, error: Error) {
        self.inner.lock().unwrap().issue_failures.push_back(error);
    }

    /// Make every session request take `delay`
    pub fn set_issue_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().issue_delay = Some(delay);
    }

    pub fn issued_count(&self) -> u64 {
        self.inner.lock().unwrap().issued
    }

    pub fn query_count(&self, token: &str) -> usize {
        self.query_times(token).len()
    }

    pub fn query_times(&self, token: &str) -> Vec<Instant> {
        self.inner
            .lock()
            .unwrap()
            .queries
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Queue the result of the next `method` call on the account side
    pub fn respond(&self, method: &'static str, result: Result<()>) {
        self.inner
            .lock()
            .unwrap()
            .results
            .entry(method)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    fn account_call(&self, method: &'static str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(method).or_default() += 1;
        inner
            .results
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

impl IdentityService for ScriptedService {
    async fn request_session(&self) -> Result<LoginSession> {
        let delay = self.inner.lock().unwrap().issue_delay;
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.issue_failures.pop_front() {
            return Err(error);
        }
        inner.issued += 1;
        let token = format!("tok-{}", inner.issued);
        let qr: Url = format!("http://localhost/api/wechat_qrcode_image?key={}", token)
            .parse()
            .unwrap();
        Ok(LoginSession::new(qr, StateToken::new(token)))
    }

    async fn check_status(&self, token: &StateToken) -> Result<PollStatus> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queries
            .push((token.as_str().to_string(), Instant::now()));

        if let Some(error) = inner
            .status_failures
            .get_mut(token.as_str())
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(inner
            .statuses
            .get_mut(token.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(PollStatus::Pending))
    }
}

impl AccountService for ScriptedService {
    async fn fetch_captcha(&self) -> Result<Url> {
        self.account_call("fetch_captcha")?;
        let n = {
            let mut inner = self.inner.lock().unwrap();
            inner.captchas += 1;
            inner.captchas
        };
        Ok(format!("http://localhost/api/captcha_image?timestamp={}", n)
            .parse()
            .unwrap())
    }

    async fn login(&self, _request: &LoginRequest) -> Result<()> {
        self.account_call("login")
    }

    async fn send_verification(&self, _email: &str) -> Result<()> {
        self.account_call("send_verification")
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<()> {
        self.account_call("register")
    }
}
