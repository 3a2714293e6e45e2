//! scanlogin Client - HTTP access to the identity service
//!
//! One [`IdentityClient`] keeps a cookie jar, so the server-side session
//! (captcha, signed-in user) follows every call made through it.

mod client;

pub use client::IdentityClient;
