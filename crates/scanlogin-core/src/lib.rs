//! scanlogin Core - Shared session types and protocol definitions
//!
//! This crate provides the foundational types used by the client, the login
//! flow and the demo identity service.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::LoginConfig;
pub use error::{DomainFailure, DomainFailureKind, Error, Result};
pub use protocol::PollStatus;
pub use session::{LoginSession, LoginState, Phase, StateToken};
