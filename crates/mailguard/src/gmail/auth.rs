//! Gmail OAuth2 authorization code flow with PKCE
//!
//! One [`AuthFlow`] attempt generates a fresh `state` and code verifier,
//! sends the user to Google's consent page through a [`CallbackTransport`],
//! validates the callback, and exchanges the code at a [`TokenEndpoint`].
//! The per-attempt session is scrubbed on every exit path.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use super::token::{CodeExchange, TokenEndpoint};
use super::transport::CallbackTransport;
use crate::models::ClientCredentials;

/// Google's authorization endpoint
pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization was denied: {0}")]
    Denied(String),

    #[error("callback did not include an authorization code")]
    MissingCode,

    #[error("callback state does not match this authorization attempt")]
    StateMismatch,

    #[error("no PKCE verifier is held for this authorization attempt")]
    MissingVerifier,

    #[error("timed out after {}s waiting for the authorization callback", .0.as_secs())]
    Timeout(Duration),

    #[error(
        "no refresh token received; revoke the app's access in your Google account \
         and retry with --force-consent"
    )]
    NoRefreshToken,

    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("callback listener failed: {0}")]
    Listener(#[source] io::Error),

    #[error("I/O error during authorization: {0}")]
    Io(#[from] io::Error),

    #[error("token request failed: {0}")]
    TokenRequest(String),

    #[error("invalid authorization URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Knobs for a single authorization attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowOptions {
    /// Ask Google to merge previously granted scopes into this grant
    pub include_granted_scopes: bool,
    /// Force the consent screen so a new refresh token is issued
    pub force_consent: bool,
}

/// Query parameters delivered to the redirect URI
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub scope: Option<String>,
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .field("state", &self.state.as_ref().map(|_| "<redacted>"))
            .field("error", &self.error)
            .field("scope", &self.scope)
            .finish()
    }
}

impl CallbackParams {
    /// Parse a pasted redirect: a full URL or a bare query string
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AuthError::InvalidCallback("empty input".to_string()));
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            let url = Url::parse(input)
                .map_err(|e| AuthError::InvalidCallback(format!("not a valid URL: {e}")))?;
            return Ok(Self::from_url(&url));
        }

        let query = input.strip_prefix('?').unwrap_or(input);
        Ok(Self::from_pairs(url::form_urlencoded::parse(query.as_bytes())))
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(url.query_pairs())
    }

    fn from_pairs<'a>(pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "scope" => params.scope = Some(value),
                _ => {}
            }
        }
        params
    }
}

/// Result of a successful authorization
#[derive(Clone, PartialEq, Eq)]
pub struct Grant {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes the user actually granted
    pub scopes: Vec<String>,
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Per-attempt secrets: CSRF state and PKCE verifier
#[derive(Default)]
struct PkceSession {
    state: Option<String>,
    code_verifier: Option<String>,
}

impl PkceSession {
    fn generate() -> Self {
        Self {
            state: Some(generate_state()),
            code_verifier: Some(generate_code_verifier()),
        }
    }

    fn is_active(&self) -> bool {
        self.state.is_some() || self.code_verifier.is_some()
    }

    fn clear(&mut self) {
        scrub(&mut self.state);
        scrub(&mut self.code_verifier);
    }
}

impl Drop for PkceSession {
    fn drop(&mut self) {
        self.clear();
    }
}

fn scrub(secret: &mut Option<String>) {
    if let Some(mut value) = secret.take() {
        let len = value.len();
        value.replace_range(.., &"0".repeat(len));
    }
}

/// Random CSRF state: 32 bytes, hex encoded
fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// PKCE code verifier: 32 random bytes, base64url without padding (43 chars)
fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// One-shot OAuth2 authorization attempt
pub struct AuthFlow<'a> {
    client: ClientCredentials,
    endpoint: &'a dyn TokenEndpoint,
    authorize_url: String,
    options: FlowOptions,
    session: PkceSession,
}

impl<'a> AuthFlow<'a> {
    pub fn new(client: ClientCredentials, endpoint: &'a dyn TokenEndpoint) -> Self {
        Self {
            client,
            endpoint,
            authorize_url: AUTHORIZE_URL.to_string(),
            options: FlowOptions::default(),
            session: PkceSession::default(),
        }
    }

    pub fn with_options(mut self, options: FlowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    /// Whether secrets from an attempt are still held
    pub fn has_session(&self) -> bool {
        self.session.is_active()
    }

    /// Run a complete attempt through `transport`
    pub fn run<S: AsRef<str>>(
        &mut self,
        scopes: &[S],
        transport: &mut dyn CallbackTransport,
    ) -> Result<Grant, AuthError> {
        let result = self.attempt(scopes, transport);
        transport.shutdown();
        self.session.clear();
        result
    }

    fn attempt<S: AsRef<str>>(
        &mut self,
        scopes: &[S],
        transport: &mut dyn CallbackTransport,
    ) -> Result<Grant, AuthError> {
        let redirect_uri = transport.prepare()?;
        let url = self.begin(scopes, &redirect_uri)?;
        let params = transport.receive(&url)?;
        self.complete(&params, &redirect_uri, scopes)
    }

    /// Start a new attempt and build the consent URL.
    ///
    /// Any previous session is replaced.
    pub fn begin<S: AsRef<str>>(
        &mut self,
        scopes: &[S],
        redirect_uri: &str,
    ) -> Result<Url, AuthError> {
        self.session.clear();
        self.session = PkceSession::generate();

        let (Some(state), Some(verifier)) = (&self.session.state, &self.session.code_verifier)
        else {
            return Err(AuthError::MissingVerifier);
        };

        let scope = scopes
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");

        let mut url = Url::parse(&self.authorize_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &scope)
                .append_pair("access_type", "offline")
                .append_pair("state", state)
                .append_pair("code_challenge", &code_challenge(verifier))
                .append_pair("code_challenge_method", "S256")
                .append_pair(
                    "include_granted_scopes",
                    if self.options.include_granted_scopes {
                        "true"
                    } else {
                        "false"
                    },
                );
            if self.options.force_consent {
                query.append_pair("prompt", "consent");
            }
        }

        debug!("Built authorization URL for scopes [{}]", scope);
        Ok(url)
    }

    /// Validate a callback and exchange its code for tokens.
    ///
    /// The verifier is consumed, so a second completion of the same attempt
    /// fails with [`AuthError::MissingVerifier`].
    pub fn complete<S: AsRef<str>>(
        &mut self,
        params: &CallbackParams,
        redirect_uri: &str,
        requested_scopes: &[S],
    ) -> Result<Grant, AuthError> {
        if let Some(error) = &params.error {
            return Err(AuthError::Denied(error.clone()));
        }
        let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;

        let expected = self.session.state.as_deref();
        match (params.state.as_deref(), expected) {
            (Some(returned), Some(expected)) if returned == expected => {}
            _ => return Err(AuthError::StateMismatch),
        }

        let mut verifier = self.session.code_verifier.take();
        let Some(code_verifier) = verifier.as_deref() else {
            return Err(AuthError::MissingVerifier);
        };

        let response = self.endpoint.exchange_code(&CodeExchange {
            client: &self.client,
            code,
            code_verifier,
            redirect_uri,
        });
        scrub(&mut verifier);
        scrub(&mut self.session.state);
        let response = response?;

        let refresh_token = response.refresh_token.ok_or(AuthError::NoRefreshToken)?;
        let scopes: Vec<String> = match response.scope.as_deref().or(params.scope.as_deref()) {
            Some(granted) if !granted.trim().is_empty() => {
                granted.split_whitespace().map(str::to_string).collect()
            }
            _ => requested_scopes
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        };

        info!("Authorization granted for {} scope(s)", scopes.len());
        Ok(Grant {
            refresh_token,
            access_token: Some(response.access_token),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
            scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::token::TokenResponse;
    use crate::models::OAuthTokens;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const REDIRECT: &str = "http://127.0.0.1:1/oauth2callback";

    #[derive(Default)]
    struct FakeEndpoint {
        exchanges: Mutex<Vec<(String, String)>>,
        omit_refresh_token: bool,
        scope: Option<String>,
    }

    impl TokenEndpoint for FakeEndpoint {
        fn exchange_code(&self, request: &CodeExchange<'_>) -> Result<TokenResponse, AuthError> {
            self.exchanges.lock().unwrap().push((
                request.code.to_string(),
                request.code_verifier.to_string(),
            ));
            Ok(TokenResponse {
                access_token: "access".to_string(),
                refresh_token: (!self.omit_refresh_token).then(|| "refresh".to_string()),
                expires_in: Some(3600),
                scope: self.scope.clone(),
                token_type: Some("Bearer".to_string()),
            })
        }

        fn refresh(&self, _tokens: &OAuthTokens) -> Result<TokenResponse, AuthError> {
            Err(AuthError::TokenRequest("not used".to_string()))
        }
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn credentials() -> ClientCredentials {
        ClientCredentials::new("client-id", "client-secret")
    }

    fn callback_for(url: &Url) -> CallbackParams {
        CallbackParams {
            code: Some("auth-code".to_string()),
            state: query_map(url).get("state").cloned(),
            ..CallbackParams::default()
        }
    }

    #[test]
    fn test_authorization_url_parameters() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["scope-a", "scope-b"], REDIRECT).unwrap();
        let query = query_map(&url);

        assert!(url.as_str().starts_with(AUTHORIZE_URL));
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(query["redirect_uri"], REDIRECT);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "scope-a scope-b");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["include_granted_scopes"], "false");
        assert_eq!(query["state"].len(), 64);
        assert!(!query.contains_key("prompt"));
    }

    #[test]
    fn test_options_control_consent_and_incremental_scopes() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint).with_options(FlowOptions {
            include_granted_scopes: true,
            force_consent: true,
        });
        let query = query_map(&flow.begin(&["s"], REDIRECT).unwrap());

        assert_eq!(query["include_granted_scopes"], "true");
        assert_eq!(query["prompt"], "consent");
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["s"], REDIRECT).unwrap();
        let challenge = query_map(&url)["code_challenge"].clone();

        flow.complete(&callback_for(&url), REDIRECT, &["s"]).unwrap();
        let verifier = endpoint.exchanges.lock().unwrap()[0].1.clone();

        assert_eq!(verifier.len(), 43);
        assert_eq!(code_challenge(&verifier), challenge);
    }

    #[test]
    fn test_known_challenge_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_attempts_use_fresh_values() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let first = query_map(&flow.begin(&["s"], REDIRECT).unwrap());
        let second = query_map(&flow.begin(&["s"], REDIRECT).unwrap());

        assert_ne!(first["state"], second["state"]);
        assert_ne!(first["code_challenge"], second["code_challenge"]);
    }

    #[test]
    fn test_state_mismatch_never_exchanges() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        flow.begin(&["s"], REDIRECT).unwrap();

        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some("forged".to_string()),
            ..CallbackParams::default()
        };
        let err = flow.complete(&params, REDIRECT, &["s"]).unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));

        let missing_state = CallbackParams {
            code: Some("auth-code".to_string()),
            ..CallbackParams::default()
        };
        let err = flow.complete(&missing_state, REDIRECT, &["s"]).unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
        assert!(endpoint.exchanges.lock().unwrap().is_empty());
    }

    #[test]
    fn test_validation_order() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        flow.begin(&["s"], REDIRECT).unwrap();

        let denied = CallbackParams {
            error: Some("access_denied".to_string()),
            state: Some("forged".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            flow.complete(&denied, REDIRECT, &["s"]),
            Err(AuthError::Denied(reason)) if reason == "access_denied"
        ));

        let no_code = CallbackParams {
            state: Some("forged".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            flow.complete(&no_code, REDIRECT, &["s"]),
            Err(AuthError::MissingCode)
        ));
    }

    #[test]
    fn test_replayed_callback_has_no_verifier() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["s"], REDIRECT).unwrap();
        let params = callback_for(&url);

        flow.complete(&params, REDIRECT, &["s"]).unwrap();
        assert!(!flow.has_session());
        // State was scrubbed along with the verifier
        assert!(matches!(
            flow.complete(&params, REDIRECT, &["s"]),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_missing_refresh_token() {
        let endpoint = FakeEndpoint {
            omit_refresh_token: true,
            ..FakeEndpoint::default()
        };
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["s"], REDIRECT).unwrap();

        let err = flow.complete(&callback_for(&url), REDIRECT, &["s"]).unwrap_err();
        assert!(matches!(err, AuthError::NoRefreshToken));
    }

    #[test]
    fn test_granted_scopes_prefer_response() {
        let endpoint = FakeEndpoint {
            scope: Some("granted-a granted-b".to_string()),
            ..FakeEndpoint::default()
        };
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["requested"], REDIRECT).unwrap();

        let grant = flow
            .complete(&callback_for(&url), REDIRECT, &["requested"])
            .unwrap();
        assert_eq!(grant.scopes, vec!["granted-a", "granted-b"]);
        assert_eq!(grant.refresh_token, "refresh");
    }

    #[test]
    fn test_granted_scopes_fall_back_to_requested() {
        let endpoint = FakeEndpoint::default();
        let mut flow = AuthFlow::new(credentials(), &endpoint);
        let url = flow.begin(&["requested"], REDIRECT).unwrap();

        let grant = flow
            .complete(&callback_for(&url), REDIRECT, &["requested"])
            .unwrap();
        assert_eq!(grant.scopes, vec!["requested"]);
    }

    #[test]
    fn test_parse_full_url_and_bare_query() {
        let from_url =
            CallbackParams::parse("http://127.0.0.1:1/oauth2callback?code=abc&state=xyz&scope=a%20b")
                .unwrap();
        assert_eq!(from_url.code.as_deref(), Some("abc"));
        assert_eq!(from_url.state.as_deref(), Some("xyz"));
        assert_eq!(from_url.scope.as_deref(), Some("a b"));

        let bare = CallbackParams::parse("?state=xyz&code=4%2F0abc").unwrap();
        assert_eq!(bare.code.as_deref(), Some("4/0abc"));

        assert!(CallbackParams::parse("   ").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let params = CallbackParams {
            code: Some("secret-code".to_string()),
            state: Some("secret-state".to_string()),
            ..CallbackParams::default()
        };
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("secret-code"));
        assert!(!rendered.contains("secret-state"));
    }
}
