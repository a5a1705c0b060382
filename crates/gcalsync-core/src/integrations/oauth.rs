//! OAuth2 Authorization Code flow for a command-line app.
//!
//! 1. Opens the browser at the authorization URL
//! 2. Listens on a localhost port for the redirect
//! 3. Exchanges the code for an access token (+ refresh token)
//!
//! Persisting the tokens is up to the caller; see [`super::credentials`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::OAuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
}

impl OAuthConfig {
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    /// Authorization URL for one attempt, bound to `state` and hinting `account`.
    pub fn auth_url_full(&self, state: &str, account: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}&login_hint={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
            urlencoding::encode(account),
        )
    }
}

/// Run the full flow for `account`: open browser -> wait for callback -> exchange code.
pub async fn authorize(config: &OAuthConfig, account: &str) -> Result<OAuthTokens, OAuthError> {
    let state = random_state()?;

    // Bind before opening the browser so a fast redirect is not lost.
    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .await
        .map_err(|e| {
            OAuthError::AuthorizationFailed(format!(
                "cannot listen on port {}: {e}",
                config.redirect_port
            ))
        })?;

    let auth_url = config.auth_url_full(&state, account);
    info!(account, "opening browser for authorization");
    eprintln!("Authorize gcalsync for '{account}' in your browser. If it does not open, visit:\n{auth_url}");
    if let Err(e) = open::that(&auth_url) {
        debug!(error = %e, "could not launch browser");
    }

    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;
    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;
    let request = String::from_utf8_lossy(&buf[..n]).to_string();

    let outcome = extract_code(&request, &state);
    let page = match &outcome {
        Ok(_) => "<h2>Authorization complete.</h2><p>You can close this tab.</p>",
        Err(_) => "<h2>Authorization failed.</h2><p>Return to the terminal for details.</p>",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body>{page}</body></html>"
    );
    // The browser tab is cosmetic; a failed write does not affect the flow.
    let _ = stream.write_all(response.as_bytes()).await;
    drop(stream);
    drop(listener);

    exchange_code(config, &outcome?).await
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(config: &OAuthConfig, code: &str) -> Result<OAuthTokens, OAuthError> {
    let redirect_uri = config.redirect_uri();
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri.as_str()),
    ];

    let body = post_token_request(&config.token_url, &params)
        .await
        .map_err(OAuthError::TokenExchangeFailed)?;
    tokens_from_body(&body, None).map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token. Google omits the refresh token on refresh, so the
/// old one is carried over.
pub async fn refresh_token(
    config: &OAuthConfig,
    account: &str,
    refresh: &str,
) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];

    let fail = |message: String| OAuthError::TokenRefreshFailed {
        account: account.to_string(),
        message,
    };
    let body = post_token_request(&config.token_url, &params)
        .await
        .map_err(fail)?;
    tokens_from_body(&body, Some(refresh)).map_err(fail)
}

/// Check if tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    match tokens.expires_at {
        Some(exp) => chrono::Utc::now().timestamp() > exp - 60,
        None => false,
    }
}

async fn post_token_request(
    token_url: &str,
    params: &[(&str, &str)],
) -> Result<serde_json::Value, String> {
    let resp = Client::new()
        .post(token_url)
        .form(params)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;

    if let Some(error) = body.get("error") {
        let detail = body["error_description"].as_str().unwrap_or_default();
        return Err(format!("{error} {detail}").trim().to_string());
    }
    if !status.is_success() {
        return Err(format!("token endpoint returned HTTP {}", status.as_u16()));
    }
    Ok(body)
}

fn tokens_from_body(
    body: &serde_json::Value,
    previous_refresh: Option<&str>,
) -> Result<OAuthTokens, String> {
    let access_token = body["access_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or("response carries no access_token")?;

    let expires_in = body.get("expires_in").and_then(|v| v.as_i64());
    let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);

    Ok(OAuthTokens {
        access_token: access_token.to_string(),
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| previous_refresh.map(String::from)),
        expires_at,
        token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    })
}

fn random_state() -> Result<String, OAuthError> {
    let mut bytes = [0u8; 24];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| OAuthError::AuthorizationFailed(format!("no randomness available: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Pull the code out of `GET /callback?code=XXX&state=YYY`.
fn extract_code(request: &str, expected_state: &str) -> Result<String, OAuthError> {
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| OAuthError::InvalidCallback("empty request".into()))?;
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| OAuthError::InvalidCallback(first_line.to_string()))?;
    let url = url::Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
    };

    if let Some(error) = param("error") {
        return Err(OAuthError::AuthorizationFailed(error));
    }
    if param("state").as_deref() != Some(expected_state) {
        return Err(OAuthError::InvalidCallback("state mismatch".into()));
    }
    param("code").ok_or_else(|| OAuthError::InvalidCallback("no code in callback".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "client.apps.googleusercontent.com".into(),
            client_secret: "secret".into(),
            auth_url: "https://accounts.example.com/auth".into(),
            token_url,
            scopes: vec!["https://www.googleapis.com/auth/calendar".into()],
            redirect_port: 8085,
        }
    }

    #[test]
    fn auth_url_carries_state_and_offline_access() {
        let url = config("unused".into()).auth_url_full("abc123", "work");
        assert!(url.starts_with("https://accounts.example.com/auth?"));
        assert!(url.contains("state=abc123"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("login_hint=work"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8085%2Fcallback"));
    }

    #[test]
    fn extract_code_checks_state() {
        let request = "GET /callback?code=4%2Fabc&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(extract_code(request, "s1").unwrap(), "4/abc");
        assert!(matches!(
            extract_code(request, "other"),
            Err(OAuthError::InvalidCallback(_))
        ));
    }

    #[test]
    fn extract_code_reports_denied_consent() {
        let request = "GET /callback?error=access_denied&state=s1 HTTP/1.1\r\n\r\n";
        assert!(matches!(
            extract_code(request, "s1"),
            Err(OAuthError::AuthorizationFailed(ref e)) if e == "access_denied"
        ));
    }

    #[test]
    fn random_state_is_unique() {
        let a = random_state().unwrap();
        let b = random_state().unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_has_a_buffer() {
        let now = chrono::Utc::now().timestamp();
        let mut tokens = OAuthTokens {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(now + 30),
            token_type: "Bearer".into(),
            scope: None,
        };
        assert!(is_expired(&tokens));
        tokens.expires_at = Some(now + 3600);
        assert!(!is_expired(&tokens));
        tokens.expires_at = None;
        assert!(!is_expired(&tokens));
    }

    #[tokio::test]
    async fn exchange_code_parses_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"ya29.x","refresh_token":"1//r","expires_in":3599,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let tokens = exchange_code(&config(format!("{}/token", server.url())), "code")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(tokens.access_token, "ya29.x");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//r"));
        assert!(tokens.expires_at.is_some());
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.new","expires_in":3599}"#)
            .create_async()
            .await;

        let tokens = refresh_token(&config(format!("{}/token", server.url())), "work", "1//r")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "ya29.new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//r"));
    }

    #[tokio::test]
    async fn refresh_error_names_the_account() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#)
            .create_async()
            .await;

        let err = refresh_token(&config(format!("{}/token", server.url())), "work", "1//r")
            .await
            .unwrap_err();
        match err {
            OAuthError::TokenRefreshFailed { account, message } => {
                assert_eq!(account, "work");
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
