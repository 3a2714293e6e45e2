//! HTTP request handlers
//!
//! Every endpoint lives under `/api` and answers with a JSON envelope,
//! except the two image endpoints which return PNG.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use image::ImageFormat;
use qrcode::QrCode;
use scanlogin_core::protocol::{
    ActionResponse, CaptchaResponse, Envelope, LoginRequest,
    LoginStatusResponse, QrCodeResponse, RegisterRequest, SendVerificationRequest,
    UserInfoResponse,
};
use scanlogin_core::DomainFailureKind;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::captcha::Captcha;
use crate::error::{ApiError, ApiResult};
use crate::qr::QrPoll;
use crate::sessions::clear_session_cookie;
use crate::state::AppState;
use crate::users::User;
use crate::verification::is_valid_email;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Credential login
        .route("/captcha", get(captcha_handler))
        .route("/captcha_image", get(captcha_image_handler))
        .route("/login", post(login_handler))
        // Registration
        .route("/send_verification", post(send_verification_handler))
        .route("/register", post(register_handler))
        // Account
        .route("/user_info", get(user_info_handler))
        .route("/logout", post(logout_handler))
        // QR login
        .route("/wechat_qrcode", get(qrcode_handler))
        .route("/wechat_qrcode_image", get(qrcode_image_handler))
        .route("/check_wechat_login/:state", get(check_login_handler))
        // Scanning device
        .route("/wechat_scan/:state", post(scan_handler))
        .route("/wechat_confirm/:state", post(confirm_handler));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn ok(message: &str) -> Json<ActionResponse> {
    Json(ActionResponse {
        envelope: Envelope::ok_with(message),
    })
}

// ============================================================================
// Credential login
// ============================================================================

/// Rotate the session's captcha and return the URL of its image
async fn captcha_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<CaptchaResponse>) {
    let (jar, sid) = state.sessions.resolve(jar).await;
    state.sessions.set_captcha(&sid, Captcha::generate()).await;

    let timestamp = chrono::Utc::now().timestamp_millis();
    let response = CaptchaResponse {
        envelope: Envelope::ok(),
        captcha_url: Some(format!("/api/captcha_image?timestamp={}", timestamp)),
    };
    (jar, Json(response))
}

/// Render the session's captcha, issuing one if it has none
async fn captcha_image_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> ApiResult<Response> {
    let (jar, sid) = state.sessions.resolve(jar).await;
    let captcha = match state.sessions.captcha(&sid).await {
        Some(captcha) => captcha,
        None => {
            let captcha = Captcha::generate();
            state.sessions.set_captcha(&sid, captcha.clone()).await;
            captcha
        }
    };

    let png = captcha
        .render_png()
        .map_err(|e| ApiError::Internal(format!("captcha render failed: {}", e)))?;

    Ok((
        jar,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    )
        .into_response())
}

/// Check captcha, then credentials; the captcha is used up either way
async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<ActionResponse>)> {
    let (jar, sid) = state.sessions.resolve(jar).await;

    let captcha = state.sessions.take_captcha(&sid).await.ok_or_else(|| {
        ApiError::rejected(
            DomainFailureKind::CaptchaMismatch,
            "Captcha expired, please refresh",
        )
    })?;
    captcha.verify(&request.captcha, state.config.captcha_lifetime)?;

    let user = state
        .users
        .authenticate(request.username.trim(), &request.password)
        .await
        .ok_or_else(|| {
            info!("Failed login for {}", request.username);
            ApiError::rejected(
                DomainFailureKind::InvalidCredentials,
                "Invalid username or password",
            )
        })?;

    state.sessions.set_user(&sid, user.id).await;
    info!("User {} signed in with password", user.username);
    Ok((jar, ok("Login successful")))
}

// ============================================================================
// Registration
// ============================================================================

async fn send_verification_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendVerificationRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let email = request.email.trim();
    if !is_valid_email(email) {
        return Err(ApiError::rejected(
            DomainFailureKind::Other,
            "Please enter a valid e-mail address",
        ));
    }
    if state.users.email_registered(email).await {
        return Err(ApiError::rejected(
            DomainFailureKind::AlreadyRegistered,
            "Email already registered",
        ));
    }

    state.verifications.issue(email).await;
    Ok(ok("Verification code sent"))
}

/// Create an account and sign it into the calling session
async fn register_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(CookieJar, Json<ActionResponse>)> {
    let username = request.username.trim();
    let email = request.email.trim();
    if username.is_empty()
        || email.is_empty()
        || request.verification_code.trim().is_empty()
        || request.password.is_empty()
    {
        return Err(ApiError::rejected(
            DomainFailureKind::Other,
            "Please fill in all required fields",
        ));
    }
    if request.password != request.confirm_password {
        return Err(ApiError::rejected(
            DomainFailureKind::Other,
            "Passwords do not match",
        ));
    }
    if state.users.username_taken(username).await {
        return Err(ApiError::rejected(
            DomainFailureKind::AlreadyRegistered,
            "Username already exists",
        ));
    }
    if state.users.email_registered(email).await {
        return Err(ApiError::rejected(
            DomainFailureKind::AlreadyRegistered,
            "Email already registered",
        ));
    }

    state
        .verifications
        .redeem(email, &request.verification_code)
        .await?;
    let user = state
        .users
        .create(username, email, &request.password)
        .await?;

    let (jar, sid) = state.sessions.resolve(jar).await;
    state.sessions.set_user(&sid, user.id).await;
    Ok((jar, ok("Registration successful")))
}

// ============================================================================
// Account
// ============================================================================

async fn user_info_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> ApiResult<Json<UserInfoResponse>> {
    let user = signed_in_user(&state, &jar)
        .await
        .ok_or_else(|| ApiError::Unauthorized("Not signed in".to_string()))?;

    Ok(Json(UserInfoResponse {
        envelope: Envelope::ok(),
        user: Some(user.profile()),
    }))
}

/// User bound to the request's session, if any
async fn signed_in_user(state: &AppState, jar: &CookieJar) -> Option<User> {
    let sid = state.sessions.current(jar).await?;
    let user_id = state.sessions.user(&sid).await?;
    state.users.get(&user_id).await
}

async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<ActionResponse>) {
    if let Some(sid) = state.sessions.current(&jar).await {
        state.sessions.remove(&sid).await;
        debug!("Session {} signed out", sid);
    }
    (jar.remove(clear_session_cookie()), ok("Signed out"))
}

// ============================================================================
// QR login
// ============================================================================

/// Issue a QR login session
///
/// The caller's browser session is created here so the cookie is in place
/// before it starts polling.
async fn qrcode_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<QrCodeResponse>) {
    let (jar, _) = state.sessions.resolve(jar).await;
    let issue = state.qr.issue().await;

    let response = QrCodeResponse {
        envelope: Envelope::ok(),
        qrcode_url: Some(format!("/api/wechat_qrcode_image?key={}", issue.state)),
        state: Some(issue.state),
        expires_in: Some(issue.expires_in),
    };
    (jar, Json(response))
}

/// Query parameters for QR code rendering
#[derive(Debug, Deserialize)]
pub struct QrImageQuery {
    /// State token from `/wechat_qrcode`
    key: String,
    /// QR code size in pixels (default 200)
    #[serde(default = "default_qr_size")]
    size: u32,
}

fn default_qr_size() -> u32 {
    200
}

/// Render the QR code for a live session
///
/// The code encodes the confirm link a scanning device posts to.
async fn qrcode_image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QrImageQuery>,
) -> Result<Response, (StatusCode, String)> {
    if !state.qr.is_live(&query.key).await {
        return Err((StatusCode::NOT_FOUND, "QR session not found".to_string()));
    }

    let confirm_url = format!(
        "{}/api/wechat_confirm/{}",
        state.config.base_url(),
        query.key
    );
    let code = QrCode::new(confirm_url.as_bytes())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let image = code.render::<image::Luma<u8>>().build();
    let size = query.size.clamp(100, 1000);
    let resized =
        image::imageops::resize(&image, size, size, image::imageops::FilterType::Nearest);

    let mut buffer = Cursor::new(Vec::new());
    resized
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        buffer.into_inner(),
    )
        .into_response())
}

/// Report the status of a QR session
///
/// The first read that sees a confirmation signs the confirming user into
/// the polling session and consumes the token.
async fn check_login_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    jar: CookieJar,
) -> (CookieJar, Json<LoginStatusResponse>) {
    let poll = state.qr.poll(&token).await;

    let (jar, message) = match poll {
        QrPoll::Confirmed(user_id) => {
            let (jar, sid) = state.sessions.resolve(jar).await;
            state.sessions.set_user(&sid, user_id).await;
            info!("QR login {} completed", token);
            (jar, "Login confirmed")
        }
        QrPoll::Pending => (jar, "Waiting for scan"),
        QrPoll::Scanned => (jar, "Scanned, waiting for confirmation"),
        QrPoll::Expired => (jar, "QR code expired"),
    };

    let response = LoginStatusResponse {
        envelope: Envelope::ok_with(message),
        status: Some(poll.status()),
        logged_in: None,
    };
    (jar, Json(response))
}

async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Json<ActionResponse>> {
    state.qr.mark_scanned(&token).await?;
    Ok(ok("Scanned"))
}

/// Approve a QR session as the user signed in on the scanning device
async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    jar: CookieJar,
) -> ApiResult<Json<ActionResponse>> {
    let user = signed_in_user(&state, &jar).await.ok_or_else(|| {
        ApiError::rejected(
            DomainFailureKind::NotAuthenticated,
            "Sign in on this device before confirming",
        )
    })?;

    state.qr.confirm(&token, user.id).await?;
    info!("QR login {} approved by {}", token, user.username);
    Ok(ok("Login confirmed"))
}
