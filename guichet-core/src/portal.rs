//! Authenticated session against the student portal.
//!
//! IIS authenticates the connection with NTLM, and the application expects the
//! anti-forgery token from the agenda page on every form submission. A
//! [`PortalSession`] only exists once both are in hand, and every portal call
//! goes through [`PortalSession::request`] so the token is injected in one place.

use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};

use crate::config::PortalConfig;
use crate::error::{SyncError, SyncResult};
use crate::ntlm::{self, Challenge, NtlmIdentity};
use crate::token::{TOKEN_FIELD, extract_verification_token};

/// Page holding the anti-forgery token.
const AGENDA_PATH: &str = "/Agenda";

/// Portal login. Never persisted by the core.
#[derive(Clone)]
pub struct Credentials {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials, splitting a `DOMAIN\user` login when present.
    /// Otherwise `default_domain` is used.
    pub fn new(username: &str, password: &str, default_domain: &str) -> Self {
        let (domain, username) = match username.split_once('\\') {
            Some((domain, user)) => (domain, user),
            None => (default_domain, username),
        };

        Credentials {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn ntlm_identity(&self) -> NtlmIdentity {
        NtlmIdentity {
            domain: self.domain.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            workstation: String::new(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Lifecycle of a portal login, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

/// Form fields of a portal request. Repeated keys encode arrays.
pub type Form = Vec<(String, String)>;

/// An authenticated portal session holding exactly one verification token.
pub struct PortalSession {
    client: Client,
    base_url: String,
    identity: NtlmIdentity,
    token: String,
}

impl PortalSession {
    /// Log in over NTLM, load the agenda page and extract its token.
    pub async fn authenticate(
        config: &PortalConfig,
        credentials: &Credentials,
    ) -> SyncResult<Self> {
        log_state(SessionState::Unauthenticated, credentials);

        let client = Client::builder()
            .cookie_store(true)
            // NTLM authenticates the TCP connection; keep reusing a single one.
            .pool_max_idle_per_host(1)
            .http1_only()
            .build()
            .map_err(|e| SyncError::AuthenticationFailure(e.to_string()))?;

        let mut session = PortalSession {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identity: credentials.ntlm_identity(),
            token: String::new(),
        };

        log_state(SessionState::Authenticating, credentials);
        match session.load_token().await {
            Ok(token) => {
                session.token = token;
                log_state(SessionState::Authenticated, credentials);
                Ok(session)
            }
            Err(e) => {
                log_state(SessionState::Failed, credentials);
                Err(e)
            }
        }
    }

    async fn load_token(&self) -> SyncResult<String> {
        let response = self.send(AGENDA_PATH, &[]).await.map_err(|e| match e {
            SyncError::Http(e) => {
                SyncError::AuthenticationFailure(format!("Could not reach the portal: {e}"))
            }
            other => other,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::AuthenticationFailure(format!(
                "Portal answered {status} for {AGENDA_PATH}"
            )));
        }

        let page = response
            .text()
            .await
            .map_err(|e| SyncError::AuthenticationFailure(e.to_string()))?;

        extract_verification_token(&page)
    }

    /// The verification token bound to this session.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// POST `form` to `path`, adding the verification token unless the caller
    /// supplied one, and return the response body. No retries.
    pub async fn request(&self, path: &str, mut form: Form) -> SyncResult<String> {
        if !form.iter().any(|(key, _)| key == TOKEN_FIELD) {
            form.push((TOKEN_FIELD.to_string(), self.token.clone()));
        }

        let response = self.send(path, &form).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::MalformedResponse(format!(
                "Portal answered {status} for {path}"
            )));
        }

        Ok(response.text().await?)
    }

    /// Send a form POST, running the NTLM handshake when the server asks for it.
    async fn send(&self, path: &str, form: &[(String, String)]) -> SyncResult<Response> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).form(form).send().await?;
        if !wants_ntlm(&response) {
            return Ok(response);
        }
        drain(response).await;

        tracing::debug!(%url, "Portal requested NTLM authentication");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, ntlm::negotiate_header())
            .form(form)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthenticationFailure(format!(
                "Expected an NTLM challenge, got {}",
                response.status()
            )));
        }

        let challenge = challenge_header(&response)
            .ok_or_else(|| {
                SyncError::AuthenticationFailure("Server sent no NTLM challenge".to_string())
            })
            .and_then(|value| Challenge::from_header(&value))?;
        drain(response).await;

        let authorization = ntlm::authenticate_header(&self.identity, &challenge)?;
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .form(form)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthenticationFailure(
                "Portal rejected the NTLM credentials".to_string(),
            ));
        }

        Ok(response)
    }
}

fn wants_ntlm(response: &Response) -> bool {
    response.status() == StatusCode::UNAUTHORIZED
        && response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.trim().eq_ignore_ascii_case(ntlm::SCHEME))
}

fn challenge_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v: &HeaderValue| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{} ", ntlm::SCHEME)))
        .map(str::to_string)
}

/// Read the body so the connection goes back to the pool.
async fn drain(response: Response) {
    let _ = response.bytes().await;
}

fn log_state(state: SessionState, credentials: &Credentials) {
    tracing::debug!(?state, user = %credentials.username, "Portal session");
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use wiremock::matchers::{body_string_contains, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AGENDA_HTML: &str = r#"<html><body>
        <input name="__RequestVerificationToken" type="hidden" value="tok_123" />
    </body></html>"#;

    fn config(server: &MockServer) -> PortalConfig {
        PortalConfig {
            base_url: server.uri(),
            ..PortalConfig::default()
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("student", "secret", "")
    }

    #[test]
    fn test_credentials_split_domain_qualified_login() {
        let creds = Credentials::new("UNI\\jdoe", "pw", "IGNORED");
        assert_eq!(creds.domain, "UNI");
        assert_eq!(creds.username, "jdoe");

        let creds = Credentials::new("jdoe", "pw", "");
        assert_eq!(creds.domain, "");
        assert_eq!(creds.username, "jdoe");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("jdoe", "hunter2", ""));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_authenticate_stores_token_from_agenda() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string(AGENDA_HTML))
            .mount(&server)
            .await;

        let session = PortalSession::authenticate(&config(&server), &credentials())
            .await
            .unwrap();

        assert_eq!(session.token(), "tok_123");
    }

    #[tokio::test]
    async fn test_authenticate_without_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Login</html>"))
            .mount(&server)
            .await;

        let result = PortalSession::authenticate(&config(&server), &credentials()).await;

        assert!(matches!(result, Err(SyncError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_authenticate_error_status_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = PortalSession::authenticate(&config(&server), &credentials()).await;

        assert!(matches!(result, Err(SyncError::AuthenticationFailure(_))));
    }

    #[tokio::test]
    async fn test_request_injects_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string(AGENDA_HTML))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .and(body_string_contains("__RequestVerificationToken=tok_123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let session = PortalSession::authenticate(&config(&server), &credentials())
            .await
            .unwrap();
        let body = session.request("/getStudentFormation", Vec::new()).await.unwrap();

        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_request_keeps_caller_supplied_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string(AGENDA_HTML))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .and(body_string_contains("__RequestVerificationToken=override"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let session = PortalSession::authenticate(&config(&server), &credentials())
            .await
            .unwrap();
        let form = vec![(TOKEN_FIELD.to_string(), "override".to_string())];
        session.request("/getStudentFormation", form).await.unwrap();
    }

    #[tokio::test]
    async fn test_ntlm_handshake_before_agenda() {
        let server = MockServer::start().await;
        let challenge = ntlm::challenge_message([7; 8], &[0, 0, 0, 0]);

        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .and(header_regex("authorization", "^NTLM TlRMTVNTUAADAAAA"))
            .respond_with(ResponseTemplate::new(200).set_body_string(AGENDA_HTML))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .and(header_regex("authorization", "^NTLM TlRMTVNTUAABAAAA"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!("NTLM {}", STANDARD.encode(&challenge)).as_str(),
            ))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "NTLM"))
            .with_priority(10)
            .mount(&server)
            .await;

        let session = PortalSession::authenticate(&config(&server), &credentials())
            .await
            .unwrap();

        assert_eq!(session.token(), "tok_123");
    }

    #[tokio::test]
    async fn test_rejected_ntlm_credentials() {
        let server = MockServer::start().await;
        let challenge = ntlm::challenge_message([7; 8], &[0, 0, 0, 0]);

        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .and(header_regex("authorization", "^NTLM TlRMTVNTUAABAAAA"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!("NTLM {}", STANDARD.encode(&challenge)).as_str(),
            ))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "NTLM"))
            .with_priority(10)
            .mount(&server)
            .await;

        let result = PortalSession::authenticate(&config(&server), &credentials()).await;

        assert!(matches!(result, Err(SyncError::AuthenticationFailure(_))));
    }
}
