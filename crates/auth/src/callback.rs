//! Receiving the OAuth redirect.
//!
//! [`LoopbackCodeSource`] binds the host/port of an `http://localhost`
//! redirect URI, opens the browser on the authorize URL and waits for the
//! provider to redirect back. [`PastedRedirectSource`] covers registrations
//! with a custom-scheme redirect: the user pastes the final URL into the
//! terminal.

use async_trait::async_trait;
use bcconnect_types::{ApiError, AuthorizationCodeSource, CallbackParams, traits::Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const SUCCESS_HTML: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Signed in to Business Central</h1><p>You may close this tab.</p></body></html>";
const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// `true` for `http://localhost:<port>/...` and `http://127.0.0.1:<port>/...`.
#[must_use]
pub fn is_loopback_redirect(redirect_uri: &str) -> bool {
    loopback_target(redirect_uri).is_ok()
}

/// Split a loopback redirect URI into the bind address and expected path.
fn loopback_target(redirect_uri: &str) -> Result<(String, String)> {
    let url = Url::parse(redirect_uri).map_err(|e| {
        ApiError::InvalidConfiguration(format!("invalid redirect_uri {redirect_uri}: {e}"))
    })?;
    if url.scheme() != "http" || !matches!(url.host_str(), Some("localhost" | "127.0.0.1")) {
        return Err(ApiError::InvalidConfiguration(format!(
            "redirect_uri {redirect_uri} is not an http loopback address"
        )));
    }
    let port = url.port_or_known_default().unwrap_or(80);
    Ok((format!("127.0.0.1:{port}"), url.path().to_string()))
}

/// Opens the system browser and serves the redirect on a local port.
pub struct LoopbackCodeSource {
    redirect_uri: String,
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackCodeSource {
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            timeout: DEFAULT_TIMEOUT,
            open_browser: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Print the URL only, without launching a browser.
    #[must_use]
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }
}

#[async_trait]
impl AuthorizationCodeSource for LoopbackCodeSource {
    async fn authorize(&self, authorize_url: &str) -> Result<CallbackParams> {
        let (addr, path) = loopback_target(&self.redirect_uri)?;
        // Bind before opening the browser so a fast redirect cannot miss us.
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                ApiError::Transport(format!(
                    "redirect port {addr} is already in use; close the other process or change redirect_uri"
                ))
            } else {
                ApiError::Transport(format!("cannot bind redirect listener on {addr}: {e}"))
            }
        })?;

        eprintln!("Sign in to Business Central:\n  {authorize_url}");
        if self.open_browser
            && let Err(e) = open::that(authorize_url)
        {
            tracing::warn!(error = %e, "could not open a browser, use the printed URL");
        }

        tokio::time::timeout(self.timeout, accept_callback(&listener, &path))
            .await
            .map_err(|_| ApiError::unauthenticated("timed out waiting for the sign-in redirect"))?
    }
}

/// Serve connections until one hits `path`, then return its query parameters.
async fn accept_callback(listener: &TcpListener, path: &str) -> Result<CallbackParams> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|e| ApiError::Transport(format!("redirect listener: {e}")))?;

        let mut buf = vec![0u8; 8192];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| ApiError::Transport(format!("redirect listener: {e}")))?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some((req_path, query)) = request_target(&request) else {
            continue;
        };
        if req_path != path {
            // Browsers also ask for /favicon.ico and friends.
            tracing::debug!(%peer, path = req_path, "ignoring request on redirect listener");
            if let Err(e) = stream.write_all(NOT_FOUND).await {
                tracing::debug!(%peer, error = %e, "cannot answer stray request");
            }
            continue;
        }

        let params = parse_query(query)?;
        if let Err(e) = write_and_close(&mut stream, SUCCESS_HTML).await {
            tracing::debug!(%peer, error = %e, "cannot send sign-in confirmation page");
        }
        return Ok(params);
    }
}

async fn write_and_close(stream: &mut TcpStream, page: &[u8]) -> std::io::Result<()> {
    stream.write_all(page).await?;
    stream.shutdown().await
}

/// First line format: `GET /callback?code=...&state=... HTTP/1.1`.
fn request_target(request: &str) -> Option<(&str, &str)> {
    let target = request.lines().next()?.split_ascii_whitespace().nth(1)?;
    Some(target.split_once('?').unwrap_or((target, "")))
}

fn parse_query(query: &str) -> Result<CallbackParams> {
    serde_urlencoded::from_str(query)
        .map_err(|e| ApiError::unauthenticated(format!("invalid redirect query: {e}")))
}

/// Query parameters of a full redirect URL, any scheme
/// (e.g. `ca.example.bc.auth://oauth2redirect?code=..&state=..`).
///
/// # Errors
///
/// Returns [`ApiError::Unauthenticated`] if the URL cannot be parsed.
pub fn params_from_redirect_url(redirect: &str) -> Result<CallbackParams> {
    let url = Url::parse(redirect.trim())
        .map_err(|e| ApiError::unauthenticated(format!("invalid redirect url: {e}")))?;
    Ok(url.query_pairs().into_owned().collect())
}

/// Prints the authorize URL and reads the final redirect URL from stdin.
#[derive(Debug, Default)]
pub struct PastedRedirectSource;

#[async_trait]
impl AuthorizationCodeSource for PastedRedirectSource {
    async fn authorize(&self, authorize_url: &str) -> Result<CallbackParams> {
        eprintln!("Sign in to Business Central:\n  {authorize_url}");
        if let Err(e) = open::that(authorize_url) {
            tracing::warn!(error = %e, "could not open a browser, use the printed URL");
        }
        eprintln!("Paste the URL you were redirected to:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| ApiError::unauthenticated(format!("cannot read redirect url: {e}")))?;
        params_from_redirect_url(&line)
    }
}
