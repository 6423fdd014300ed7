//! One-time OAuth consent for the Google Photos sink.
//!
//! Prints the consent URL, catches the browser redirect on a loopback
//! listener, and trades the authorization code for a refresh token.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::photos::TOKEN_URL;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Upload, plus read and manage albums this app created.
const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/photoslibrary.appendonly",
    "https://www.googleapis.com/auth/photoslibrary.readonly.appcreateddata",
    "https://www.googleapis.com/auth/photoslibrary.edit.appcreateddata",
];

const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_HEAD: usize = 16 * 1024;

const PAGE_SUCCESS: &str = "<html><body><h1>Authorization successful</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const PAGE_FAILED: &str = "<html><body><h1>Authorization failed</h1>\
    <p>See the terminal for details.</p></body></html>";
const PAGE_WAITING: &str = "<html><body>Waiting for authorization...</body></html>";

/// What the browser brought back to the redirect URI.
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code(String),
    Denied { error: String, description: String },
    /// Unrelated request such as `/favicon.ico`.
    Other,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// The consent URL. `access_type=offline` with `prompt=consent` makes Google
/// issue a refresh token even if the user authorized this client before.
fn consent_url(client_id: &str, redirect_uri: &str) -> Result<Url> {
    let scope = SCOPES.join(" ");
    Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .context("Failed to build consent URL")
}

/// Classify a redirect from its request target (`/path?query`).
fn parse_redirect(target: &str) -> Redirect {
    let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(target)) else {
        return Redirect::Other;
    };

    let mut code = None;
    let mut error = None;
    let mut description = String::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = value.into_owned(),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) if !code.is_empty() => Redirect::Code(code),
        (_, Some(error)) => Redirect::Denied { error, description },
        _ => Redirect::Other,
    }
}

/// Read one request head and return its target.
async fn read_request_target(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.len() > MAX_REQUEST_HEAD {
            bail!("Redirect request too large");
        }
    }

    let head = String::from_utf8_lossy(&head);
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_owned)
        .context("Malformed redirect request")
}

async fn respond(stream: &mut TcpStream, status: &str, page: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        page.len(),
        page
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Serve the redirect URI until the browser delivers a code or a denial.
async fn wait_for_code(listener: &TcpListener) -> Result<String> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let target = match read_request_target(&mut stream).await {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable request on redirect listener");
                continue;
            }
        };

        match parse_redirect(&target) {
            Redirect::Code(code) => {
                respond(&mut stream, "200 OK", PAGE_SUCCESS).await?;
                return Ok(code);
            }
            Redirect::Denied { error, description } => {
                respond(&mut stream, "400 Bad Request", PAGE_FAILED).await?;
                bail!("Authorization denied: {} {}", error, description);
            }
            Redirect::Other => respond(&mut stream, "200 OK", PAGE_WAITING).await?,
        }
    }
}

async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<String> {
    let response = client
        .post(token_url)
        .form(&[
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .context("Token exchange request failed")?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Token exchange failed (HTTP {}): {}", status.as_u16(), text);
    }

    let body: CodeExchangeResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;
    body.refresh_token.filter(|t| !t.is_empty()).context(
        "No refresh token in response. Revoke this app's access in your Google \
         account and run photos-auth again",
    )
}

/// Run the consent flow and print the refresh token.
pub async fn run_photos_auth(client_id: &str, client_secret: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Failed to listen on port {}", port))?;
    let redirect_uri = format!("http://localhost:{}", port);
    let url = consent_url(client_id, &redirect_uri)?;

    println!("Make sure {} is an authorized redirect URI of this OAuth client.", redirect_uri);
    println!();
    println!("Open this URL in a browser and grant access:");
    println!();
    println!("{}", url);
    println!();
    println!("Waiting for authorization...");

    let code = tokio::time::timeout(CONSENT_TIMEOUT, wait_for_code(&listener))
        .await
        .context("Timed out waiting for authorization")??;
    tracing::debug!("Authorization code received, exchanging for tokens");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let refresh_token = exchange_code(
        &client,
        TOKEN_URL,
        client_id,
        client_secret,
        &redirect_uri,
        &code,
    )
    .await?;

    println!();
    println!("Refresh token:");
    println!();
    println!("{}", refresh_token);
    println!();
    println!("Set it as GOOGLE_PHOTOS_REFRESH_TOKEN.");
    Ok(())
}
