//! scanlogin Flow - Login state machine and form flows
//!
//! # QR login
//!
//! 1. [`LoginController::spawn`] starts the event loop and returns a [`LoginHandle`]
//! 2. `handle.start()` requests a session; the phase moves `Init -> Scanning`
//! 3. A status poller (2 s, then 1 s once scanned) and a 300 s expiry timer run
//!    until the session is confirmed or expires
//! 4. On confirmation a single [`LoginUpdate::Navigate`] follows after a short delay
//! 5. `handle.refresh()` replaces the session; dropping the handle tears everything down
//!
//! # Example
//!
//! ```no_run
//! use scanlogin_client::IdentityClient;
//! use scanlogin_core::{LoginConfig, Phase};
//! use scanlogin_flow::LoginController;
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let config = LoginConfig::default();
//!     let client = Arc::new(IdentityClient::new(config.clone()).unwrap());
//!     let (handle, _task) = LoginController::spawn(client, &config);
//!
//!     handle.start().await;
//!     let state = handle.wait_for(|s| s.phase.is_terminal()).await;
//!     if state.map(|s| s.phase) == Some(Phase::Confirmed) {
//!         println!("Signed in");
//!     }
//! }
//! ```

pub mod bridge;
pub mod controller;
pub mod credentials;
pub mod machine;
pub mod navigation;
pub mod registration;
pub mod service;
pub mod timers;

#[cfg(test)]
mod testing;

pub use bridge::{create_bridge, FlowBridge, LoginCommand, LoginHandle};
pub use controller::LoginController;
pub use credentials::CredentialLogin;
pub use machine::{Effect, LoginEvent, LoginMachine, LoginUpdate};
pub use navigation::Navigation;
pub use registration::{Registration, ResendCooldown};
pub use service::{AccountService, IdentityService};
pub use timers::{ExpiryHandle, PollHandle, Timers};
