//! scanlogin - QR-code and password login from the terminal
//!
//! Talks to an identity service speaking the scanlogin protocol, or runs
//! the bundled demo service with `scanlogin serve`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use reqwest::cookie::{CookieStore, Jar};
use scanlogin_client::IdentityClient;
use scanlogin_core::config::DEFAULT_BASE_URL;
use scanlogin_core::protocol::RegisterRequest;
use scanlogin_core::{LoginConfig, LoginSession, Phase};
use scanlogin_flow::{CredentialLogin, LoginController, LoginUpdate, Navigation, Registration};
use scanlogin_server::{AppState, ServerConfig};
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;
use url::Url;

/// scanlogin - sign in by QR code or password
#[derive(Parser, Debug)]
#[command(name = "scanlogin")]
#[command(version, about, long_about = None)]
struct Args {
    /// Identity service API base URL
    #[arg(long, global = true, env = "SCANLOGIN_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: Url,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo identity service
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        bind: SocketAddr,

        /// Externally reachable URL used in QR confirm links
        #[arg(long)]
        public_url: Option<Url>,

        /// User store file (default: config directory)
        #[arg(long)]
        users: Option<PathBuf>,

        /// QR session lifetime in seconds
        #[arg(long, default_value = "300")]
        qr_lifetime: i64,
    },

    /// Sign in by QR code
    Qr {
        /// Scan and confirm the code from the saved session, playing the
        /// already signed-in phone (demo service only)
        #[arg(long)]
        approve: bool,
    },

    /// Sign in with username, password and captcha
    Login {
        #[arg(short, long)]
        username: String,
    },

    /// Create an account with e-mail verification
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,
    },

    /// Show the signed-in user
    Whoami,

    /// Sign out and forget the saved session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = LoginConfig::new().with_base_url(args.base_url);
    debug!("Using identity service at {}", config.base_url);

    match args.command {
        Command::Serve {
            bind,
            public_url,
            users,
            qr_lifetime,
        } => {
            let mut server_config = ServerConfig::new()
                .with_bind(bind)
                .with_qr_lifetime(chrono::Duration::seconds(qr_lifetime));
            if let Some(url) = public_url {
                server_config = server_config.with_public_url(url);
            }
            if let Some(path) = users {
                server_config = server_config.with_users_path(path);
            }
            run_server(server_config).await
        }
        Command::Qr { approve } => run_qr_login(config, approve).await,
        Command::Login { username } => run_password_login(config, &username).await,
        Command::Register { username, email } => run_register(config, username, email).await,
        Command::Whoami => {
            let (client, _) = session_client(&config)?;
            print_profile(&client).await
        }
        Command::Logout => {
            let (client, _) = session_client(&config)?;
            client.logout().await?;
            forget_session()?;
            println!("Signed out");
            Ok(())
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    info!("scanlogin demo service v{}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let state = AppState::open(config)
        .await
        .context("failed to open user store")?;
    info!("{} registered users", state.users.count().await);

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };
    scanlogin_server::serve(listener, Arc::new(state), shutdown).await?;

    info!("Goodbye!");
    Ok(())
}

async fn run_qr_login(config: LoginConfig, approve: bool) -> Result<()> {
    // The saved session plays the phone, so the login itself starts clean
    let approver = if approve {
        let (phone, _) = session_client(&config)?;
        if phone.user_info().await?.is_none() {
            bail!("--approve needs a signed-in session; run `scanlogin login` first");
        }
        Some(phone)
    } else {
        None
    };

    let jar = Arc::new(Jar::default());
    let client = Arc::new(http_client(&config, jar.clone())?);

    let (handle, task) = LoginController::spawn(client.clone(), &config);
    let mut updates = handle.subscribe();
    handle.start().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let signed_in = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(LoginUpdate::SessionIssued(session)) => {
                    show_session(&config, &session)?;
                    if let Some(phone) = &approver {
                        spawn_approval(phone.clone(), session);
                    }
                }
                Ok(LoginUpdate::PhaseChanged { from, to }) => {
                    info!("Login {} -> {}", from, to);
                    if to == Phase::Expired {
                        warn!("QR code expired, requesting a new one");
                        handle.refresh().await;
                    }
                }
                Ok(LoginUpdate::Failure { message }) => warn!("{}", message),
                Ok(LoginUpdate::Navigate { route }) => {
                    info!("Signed in, continuing to {}", route);
                    break true;
                }
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} login updates", skipped),
                Err(RecvError::Closed) => break false,
            },
            _ = &mut shutdown => {
                info!("Cancelled");
                break false;
            }
        }
    };

    handle.shutdown().await;
    task.await.ok();

    if signed_in {
        save_session(&jar, &config)?;
        print_profile(&client).await?;
    }
    Ok(())
}

/// Print the confirm link as a terminal QR code
fn show_session(config: &LoginConfig, session: &LoginSession) -> Result<()> {
    let confirm = config.endpoint(&format!("wechat_confirm/{}", session.state_token))?;
    display_qr_code(confirm.as_str());
    println!("  Scan to sign in, or open {}", session.qr_image_ref);
    Ok(())
}

fn spawn_approval(scanner: IdentityClient, session: LoginSession) {
    tokio::spawn(async move {
        let token = session.state_token;
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Err(e) = scanner.report_scan(&token).await {
            warn!("Scan report failed: {}", e);
            return;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        match scanner.confirm_scan(&token).await {
            Ok(()) => debug!("Approved {}", token),
            Err(e) => warn!("Confirmation failed: {}", e),
        }
    });
}

async fn run_password_login(config: LoginConfig, username: &str) -> Result<()> {
    let (client, jar) = session_client(&config)?;
    let client = Arc::new(client);
    let mut form = CredentialLogin::open(client.clone(), &config).await?;
    let password = prompt_hidden("Password").await?;

    for _ in 0..3 {
        if let Some(url) = form.captcha_url() {
            println!("Captcha image: {}", url);
        }
        let captcha = prompt("Captcha").await?;

        match form.submit(username, &password, &captcha).await {
            Ok(navigation) => {
                save_session(&jar, &config)?;
                finish(navigation).await;
                return print_profile(&client).await;
            }
            Err(e) if e.domain().is_some() => warn!("{}", e),
            Err(e) => return Err(e.into()),
        }
    }
    bail!("too many failed attempts")
}

async fn run_register(config: LoginConfig, username: String, email: String) -> Result<()> {
    let (client, jar) = session_client(&config)?;
    let client = Arc::new(client);
    let mut registration = Registration::new(client.clone(), &config);

    registration.send_code(&email).await?;
    println!(
        "Verification code sent to {} (resend available in {}s)",
        email,
        registration.cooldown().remaining().as_secs()
    );

    let request = RegisterRequest {
        verification_code: prompt("Verification code").await?,
        password: prompt_hidden("Password").await?,
        confirm_password: prompt_hidden("Confirm password").await?,
        username,
        email,
    };
    let navigation = registration.submit(&request).await?;
    save_session(&jar, &config)?;
    println!("Registration successful");

    finish(navigation).await;
    print_profile(&client).await
}

async fn finish(navigation: Navigation) {
    navigation.wait().await;
    info!("Continuing to {}", navigation.route);
}

async fn print_profile(client: &IdentityClient) -> Result<()> {
    match client.user_info().await? {
        Some(user) => {
            println!("Signed in as {} (id {})", user.username, user.id);
            if let Some(email) = user.email {
                println!("  e-mail: {}", email);
            }
        }
        None => warn!("Service did not report a signed-in user"),
    }
    Ok(())
}

// ============================================================================
// Saved session
// ============================================================================

fn session_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scanlogin").join("session"))
}

/// Client whose cookie jar starts from the saved session, if any
fn session_client(config: &LoginConfig) -> Result<(IdentityClient, Arc<Jar>)> {
    let jar = Arc::new(Jar::default());
    if let Some(saved) = session_path().and_then(|path| std::fs::read_to_string(path).ok()) {
        for cookie in saved.lines().filter(|line| !line.is_empty()) {
            jar.add_cookie_str(cookie, &config.base_url);
        }
    }
    let client = http_client(config, jar.clone())?;
    Ok((client, jar))
}

fn http_client(config: &LoginConfig, jar: Arc<Jar>) -> Result<IdentityClient> {
    let http = reqwest::Client::builder()
        .cookie_provider(jar)
        .timeout(config.request_timeout)
        .build()
        .context("failed to build HTTP client")?;
    Ok(IdentityClient::new(config.clone())?.with_http_client(http))
}

/// Persist the session cookies so later commands act as the same user
fn save_session(jar: &Jar, config: &LoginConfig) -> Result<()> {
    let Some(path) = session_path() else {
        warn!("No config directory, session will not be saved");
        return Ok(());
    };
    let Some(cookies) = jar.cookies(&config.base_url) else {
        return Ok(());
    };
    let cookies = cookies.to_str().context("session cookie is not text")?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, cookies.split("; ").collect::<Vec<_>>().join("\n"))
        .with_context(|| format!("failed to save session to {}", path.display()))?;
    debug!("Saved session to {}", path.display());
    Ok(())
}

fn forget_session() -> Result<()> {
    if let Some(path) = session_path().filter(|path| path.exists()) {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Read one trimmed line from stdin
async fn prompt(label: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}: ", label).as_bytes()).await?;
    stdout.flush().await?;

    // std's stdin is buffered process-wide, so piped input is not lost between prompts
    let (read, line) = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|n| (n, line))
    })
    .await??;
    if read == 0 {
        bail!("input closed");
    }
    Ok(line.trim().to_string())
}

/// Read a secret without echoing it; piped input falls back to [`prompt`]
async fn prompt_hidden(label: &str) -> Result<String> {
    if !std::io::stdin().is_terminal() {
        return prompt(label).await;
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}: ", label).as_bytes()).await?;
    stdout.flush().await?;

    let secret = tokio::task::spawn_blocking(read_hidden).await??;
    println!();
    Ok(secret)
}

/// Disables raw mode when dropped
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to switch the terminal to raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Failed to restore the terminal: {}", e);
        }
    }
}

fn read_hidden() -> Result<String> {
    let _raw = RawMode::enable()?;
    let mut secret = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            match apply_key(&mut secret, key) {
                KeyOutcome::Pending => {}
                KeyOutcome::Done => return Ok(secret),
                KeyOutcome::Cancelled => bail!("cancelled"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Pending,
    Done,
    Cancelled,
}

/// Apply one key press to a hidden input buffer
fn apply_key(buffer: &mut String, key: KeyEvent) -> KeyOutcome {
    if key.kind == KeyEventKind::Release {
        return KeyOutcome::Pending;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => KeyOutcome::Done,
        KeyCode::Esc => KeyOutcome::Cancelled,
        KeyCode::Char('c') | KeyCode::Char('d') if ctrl => KeyOutcome::Cancelled,
        KeyCode::Char('u') if ctrl => {
            buffer.clear();
            KeyOutcome::Pending
        }
        KeyCode::Char(c) if !ctrl => {
            buffer.push(c);
            KeyOutcome::Pending
        }
        KeyCode::Backspace => {
            buffer.pop();
            KeyOutcome::Pending
        }
        _ => KeyOutcome::Pending,
    }
}

/// Display a QR code in the terminal
fn display_qr_code(data: &str) {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to generate QR code: {}", e);
            return;
        }
    };

    // Render as block characters for terminal display
    let string = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build();

    for line in string.lines() {
        println!("  {}", line);
    }
}
