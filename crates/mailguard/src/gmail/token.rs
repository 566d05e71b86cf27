//! Token endpoint access and access-token caching
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;

use super::auth::AuthError;
use crate::models::{ClientCredentials, OAuthTokens};

/// Google's token endpoint
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Seconds before expiry at which a cached access token is refreshed
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Token response from Google
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    /// Space-separated scopes actually granted
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Inputs to the `authorization_code` grant
pub struct CodeExchange<'a> {
    pub client: &'a ClientCredentials,
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub redirect_uri: &'a str,
}

/// OAuth2 token endpoint
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code plus PKCE verifier for tokens
    fn exchange_code(&self, request: &CodeExchange<'_>) -> Result<TokenResponse, AuthError>;

    /// Mint a new access token from a refresh token
    fn refresh(&self, tokens: &OAuthTokens) -> Result<TokenResponse, AuthError>;
}

/// Token endpoint reached over HTTPS
#[derive(Debug, Clone)]
pub struct GoogleTokenEndpoint {
    token_url: String,
}

impl Default for GoogleTokenEndpoint {
    fn default() -> Self {
        Self::new(TOKEN_URL)
    }
}

impl GoogleTokenEndpoint {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
        }
    }

    fn post_form<'a>(
        &self,
        grant: &'a str,
        mut form: Vec<(&'a str, &'a str)>,
    ) -> Result<TokenResponse, AuthError> {
        debug!("POST {} (grant_type={})", self.token_url, grant);
        form.push(("grant_type", grant));

        let mut response = ureq::post(&self.token_url)
            .send_form(form)
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => {
                    AuthError::TokenRequest(format!("token endpoint returned HTTP {status}"))
                }
                other => AuthError::TokenRequest(other.to_string()),
            })?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::TokenRequest(format!("failed to parse token response: {e}")))
    }
}

impl TokenEndpoint for GoogleTokenEndpoint {
    fn exchange_code(&self, request: &CodeExchange<'_>) -> Result<TokenResponse, AuthError> {
        self.post_form(
            "authorization_code",
            vec![
                ("client_id", request.client.client_id.as_str()),
                ("client_secret", request.client.client_secret.as_str()),
                ("code", request.code),
                ("code_verifier", request.code_verifier),
                ("redirect_uri", request.redirect_uri),
            ],
        )
    }

    fn refresh(&self, tokens: &OAuthTokens) -> Result<TokenResponse, AuthError> {
        self.post_form(
            "refresh_token",
            vec![
                ("client_id", tokens.client_id.as_str()),
                ("client_secret", tokens.client_secret.as_str()),
                ("refresh_token", tokens.refresh_token.as_str()),
            ],
        )
    }
}

struct TokenState {
    tokens: OAuthTokens,
    access_token: Option<String>,
    expires_at: Option<i64>,
    rotated: bool,
}

/// Access-token manager for one account.
///
/// Refreshes on demand and remembers when Google rotates the refresh token
/// so the caller can persist the new one.
pub struct GmailAuth {
    endpoint: Box<dyn TokenEndpoint>,
    state: Mutex<TokenState>,
}

impl GmailAuth {
    pub fn new(tokens: OAuthTokens, endpoint: Box<dyn TokenEndpoint>) -> Self {
        Self {
            endpoint,
            state: Mutex::new(TokenState {
                tokens,
                // Stored access tokens carry no expiry, so always refresh first
                access_token: None,
                expires_at: None,
                rotated: false,
            }),
        }
    }

    /// Get a valid access token, refreshing as needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("token state lock poisoned"))?;

        if let (Some(token), Some(expires_at)) = (&state.access_token, state.expires_at) {
            let now = chrono::Utc::now().timestamp();
            if expires_at > now + EXPIRY_BUFFER_SECS {
                return Ok(token.clone());
            }
        }

        let response = self
            .endpoint
            .refresh(&state.tokens)
            .context("Failed to refresh access token")?;

        if let Some(new_refresh) = response.refresh_token
            && new_refresh != state.tokens.refresh_token
        {
            info!("Refresh token was rotated by the token endpoint");
            state.tokens.refresh_token = new_refresh;
            state.rotated = true;
        }

        state.expires_at = response
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs as i64);
        state.access_token = Some(response.access_token.clone());
        state.tokens.access_token = Some(response.access_token.clone());

        Ok(response.access_token)
    }

    /// Updated credentials if the refresh token changed since the last call
    pub fn rotated_tokens(&self) -> Option<OAuthTokens> {
        let mut state = self.state.lock().ok()?;
        if !state.rotated {
            return None;
        }
        state.rotated = false;
        Some(state.tokens.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEndpoint {
        calls: Arc<AtomicUsize>,
        rotate_to: Option<String>,
        expires_in: u64,
    }

    impl TokenEndpoint for CountingEndpoint {
        fn exchange_code(&self, _request: &CodeExchange<'_>) -> Result<TokenResponse, AuthError> {
            Err(AuthError::TokenRequest("not used".to_string()))
        }

        fn refresh(&self, _tokens: &OAuthTokens) -> Result<TokenResponse, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenResponse {
                access_token: format!("access-{n}"),
                refresh_token: self.rotate_to.clone(),
                expires_in: Some(self.expires_in),
                scope: None,
                token_type: Some("Bearer".to_string()),
            })
        }
    }

    fn tokens() -> OAuthTokens {
        OAuthTokens {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh-0".to_string(),
            access_token: Some("stale".to_string()),
        }
    }

    #[test]
    fn test_access_token_is_cached_until_near_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let auth = GmailAuth::new(
            tokens(),
            Box::new(CountingEndpoint {
                calls: calls.clone(),
                rotate_to: None,
                expires_in: 3600,
            }),
        );

        assert_eq!(auth.get_access_token().unwrap(), "access-0");
        assert_eq!(auth.get_access_token().unwrap(), "access-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(auth.rotated_tokens().is_none());
    }

    #[test]
    fn test_short_lived_token_refreshes_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let auth = GmailAuth::new(
            tokens(),
            Box::new(CountingEndpoint {
                calls: calls.clone(),
                rotate_to: None,
                expires_in: 60,
            }),
        );

        auth.get_access_token().unwrap();
        auth.get_access_token().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rotated_refresh_token_reported_once() {
        let auth = GmailAuth::new(
            tokens(),
            Box::new(CountingEndpoint {
                calls: Arc::new(AtomicUsize::new(0)),
                rotate_to: Some("refresh-1".to_string()),
                expires_in: 3600,
            }),
        );

        auth.get_access_token().unwrap();
        let rotated = auth.rotated_tokens().unwrap();
        assert_eq!(rotated.refresh_token, "refresh-1");
        assert_eq!(rotated.access_token.as_deref(), Some("access-0"));
        assert!(auth.rotated_tokens().is_none());
    }

    /// Serve one canned token response on a local port; returns the URL and
    /// a handle yielding the form body that was posted
    fn serve_token_response(body: &'static str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut form = vec![0; content_length];
            reader.read_exact(&mut form).unwrap();

            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .unwrap();
            String::from_utf8(form).unwrap()
        });

        (url, handle)
    }

    #[test]
    fn test_refresh_posts_grant_type() {
        let (url, server) =
            serve_token_response(r#"{"access_token":"fresh","expires_in":3599,"token_type":"Bearer"}"#);
        let endpoint = GoogleTokenEndpoint::new(url);

        let response = endpoint.refresh(&tokens()).unwrap();
        let form = server.join().unwrap();

        assert_eq!(response.access_token, "fresh");
        assert_eq!(response.expires_in, Some(3599));
        assert!(form.contains("grant_type=refresh_token"));
        assert!(form.contains("refresh_token=refresh-0"));
    }

    #[test]
    fn test_exchange_posts_code_and_verifier() {
        let (url, server) = serve_token_response(
            r#"{"access_token":"a","refresh_token":"r","scope":"s1 s2","token_type":"Bearer"}"#,
        );
        let endpoint = GoogleTokenEndpoint::new(url);
        let client = ClientCredentials::new("id", "secret");

        let response = endpoint
            .exchange_code(&CodeExchange {
                client: &client,
                code: "the-code",
                code_verifier: "the-verifier",
                redirect_uri: "http://127.0.0.1:1/oauth2callback",
            })
            .unwrap();
        let form = server.join().unwrap();

        assert_eq!(response.refresh_token.as_deref(), Some("r"));
        assert_eq!(response.scope.as_deref(), Some("s1 s2"));
        assert!(form.contains("grant_type=authorization_code"));
        assert!(form.contains("code=the-code"));
        assert!(form.contains("code_verifier=the-verifier"));
    }
}
