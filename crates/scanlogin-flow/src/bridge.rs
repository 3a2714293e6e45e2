//! Presentation/controller communication bridge
//!
//! Commands flow from the presentation layer to the controller over an mpsc
//! channel; updates flow back over a broadcast channel, and the current
//! [`LoginState`] is published through a watch channel.

use crate::machine::LoginUpdate;
use scanlogin_core::LoginState;
use tokio::sync::{broadcast, mpsc, watch};

/// Commands from the presentation layer to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginCommand {
    /// Issue the first session
    Start,
    /// Replace the current session with a new one
    Refresh,
    /// Cancel everything and stop the controller
    Shutdown,
}

/// Presentation-side end of the bridge
///
/// Dropping every clone of the handle tears the controller down.
#[derive(Debug, Clone)]
pub struct LoginHandle {
    command_tx: mpsc::Sender<LoginCommand>,
    update_tx: broadcast::Sender<LoginUpdate>,
    state_rx: watch::Receiver<LoginState>,
}

impl LoginHandle {
    pub async fn start(&self) -> bool {
        self.send(LoginCommand::Start).await
    }

    pub async fn refresh(&self) -> bool {
        self.send(LoginCommand::Refresh).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(LoginCommand::Shutdown).await
    }

    /// Send a command; `false` if the controller has stopped
    pub async fn send(&self, command: LoginCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }

    /// Current state snapshot
    pub fn state(&self) -> LoginState {
        self.state_rx.borrow().clone()
    }

    /// Receive every update published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LoginUpdate> {
        self.update_tx.subscribe()
    }

    /// Watch receiver for state changes
    pub fn watch_state(&self) -> watch::Receiver<LoginState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate`
    ///
    /// Returns `None` if the controller stops first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<LoginState>
    where
        F: FnMut(&LoginState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(|s| predicate(s)).await.ok()?;
        Some(state.clone())
    }
}

/// Controller-side end of the bridge
#[derive(Debug)]
pub struct FlowBridge {
    pub command_rx: mpsc::Receiver<LoginCommand>,
    pub update_tx: broadcast::Sender<LoginUpdate>,
    pub state_tx: watch::Sender<LoginState>,
}

/// Create a connected handle/bridge pair
pub fn create_bridge() -> (LoginHandle, FlowBridge) {
    let (command_tx, command_rx) = mpsc::channel::<LoginCommand>(32);
    let (update_tx, _) = broadcast::channel::<LoginUpdate>(64);
    let (state_tx, state_rx) = watch::channel(LoginState::default());

    let handle = LoginHandle {
        command_tx,
        update_tx: update_tx.clone(),
        state_rx,
    };

    let bridge = FlowBridge {
        command_rx,
        update_tx,
        state_tx,
    };

    (handle, bridge)
}
