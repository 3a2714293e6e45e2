//! scanlogin demo identity service
//!
//! An axum server speaking the same protocol the client crate talks:
//! QR sessions a second device can scan and confirm, captcha-guarded
//! password login, e-mail verified registration and cookie sessions.

pub mod captcha;
pub mod config;
pub mod error;
pub mod http;
pub mod qr;
pub mod sessions;
pub mod state;
pub mod users;
pub mod verification;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ApiError, ApiResult};
pub use http::create_router;
pub use state::AppState;
pub use users::{StoreError, UserStore};

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve the API on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Identity service listening on http://{}", addr);
    }

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
