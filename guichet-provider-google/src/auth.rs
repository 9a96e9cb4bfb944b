//! Interactive OAuth consent flow for connecting a Google account.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use anyhow::{Context, Result};
use google_calendar::Client;

use crate::api::GoogleCalendar;
use crate::app_config::AppConfig;
use crate::session::{Session, SessionData};

pub const REDIRECT_PORT: u16 = 8085;
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

pub fn redirect_uri() -> String {
    format!("http://localhost:{}/callback", REDIRECT_PORT)
}

/// `code` and `state` from the callback request line, e.g.
/// `GET /callback?code=abc&state=xyz HTTP/1.1`.
fn parse_callback(request_line: &str) -> Result<(String, String)> {
    let url_part = request_line
        .split_whitespace()
        .nth(1)
        .context("Invalid request")?;

    let url = url::Url::parse(&format!("http://localhost{}", url_part))?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
    };

    if let Some(error) = param("error") {
        anyhow::bail!("Google denied access: {}", error);
    }

    let code = param("code").context("No code in callback")?;
    let state = param("state").context("No state in callback")?;

    Ok((code, state))
}

/// Block until the browser is redirected back to the local listener.
fn wait_for_callback() -> Result<(String, String)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", REDIRECT_PORT))
        .with_context(|| format!("Failed to bind to port {}", REDIRECT_PORT))?;

    eprintln!("Waiting for OAuth callback on port {}...", REDIRECT_PORT);

    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let result = parse_callback(&request_line);

    let page = match &result {
        Ok(_) => {
            "<h1>Authentication successful!</h1>\
             <p>You can close this window and return to the terminal.</p>"
        }
        Err(_) => "<h1>Authentication failed.</h1><p>Check the terminal for details.</p>",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html\r\n\
         Connection: close\r\n\r\n\
         <html><body>{page}</body></html>"
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    result
}

/// Run the full OAuth flow and store the session. Returns the account email.
pub async fn authenticate() -> Result<String> {
    let app_config = AppConfig::load()?;
    let mut client = Client::new(
        app_config.client_id,
        app_config.client_secret,
        redirect_uri(),
        String::new(),
        String::new(),
    );

    let scopes: Vec<String> = SCOPES.iter().map(|s| s.to_string()).collect();
    let auth_url = client.user_consent_url(&scopes);

    eprintln!("\nOpen this URL in your browser to authenticate:\n");
    eprintln!("{}\n", auth_url);

    if open::that(&auth_url).is_err() {
        eprintln!("(Could not open browser automatically, please copy the URL above)");
    }

    let (code, state) = tokio::task::spawn_blocking(wait_for_callback)
        .await
        .context("OAuth callback listener panicked")??;

    eprintln!("\nReceived authorization code, exchanging for tokens...");

    let tokens = client
        .get_access_token(&code, &state)
        .await
        .context("Failed to exchange code for tokens")?;
    let data = SessionData::from(&tokens);

    // The primary calendar's id is the account email
    let account = GoogleCalendar::new(&tokens.access_token)?
        .primary_calendar_id()
        .await
        .context("Failed to look up the account's primary calendar")?
        .context("Account has no primary calendar")?;

    Session::new(&account, &data).save()?;
    tracing::info!(%account, "Google account connected");

    Ok(account)
}
