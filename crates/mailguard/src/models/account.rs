//! Account model representing an authorized Gmail account

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::scopes::AccessTier;

/// OAuth2 credential bundle stored with each account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Last minted access token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A registered Gmail account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Email address (unique, lowercase)
    pub email: String,
    pub oauth2: OAuthTokens,
    /// Scopes granted at authorization time. `None` for records that
    /// predate scope tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl Account {
    /// Create a new account with no recorded scopes
    pub fn new(email: impl AsRef<str>, oauth2: OAuthTokens) -> Self {
        Self {
            email: normalize_email(email.as_ref()),
            oauth2,
            scopes: None,
        }
    }

    /// Set the granted scope list
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Recorded scopes, or an empty slice when none were recorded
    pub fn granted_scopes(&self) -> &[String] {
        self.scopes.as_deref().unwrap_or(&[])
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes().iter().any(|s| s == scope)
    }

    /// Access tier derived from the recorded scopes
    pub fn tier(&self) -> AccessTier {
        AccessTier::from_scopes(self.granted_scopes())
    }
}

/// Canonical form of an email address used as the account key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// OAuth client credentials shared by every account in a store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientCredentials>,
    web: Option<ClientCredentials>,
}

impl ClientCredentials {
    /// Environment variables consulted when no credentials file exists
    pub const CLIENT_ID_ENV: &'static str = "MAILGUARD_CLIENT_ID";
    pub const CLIENT_SECRET_ENV: &'static str = "MAILGUARD_CLIENT_SECRET";

    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Load credentials downloaded from the Google Cloud Console
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Desktop ("installed") and "web" client types share a layout
        creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")
    }

    /// Load credentials from environment variables, if both are set
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var(Self::CLIENT_ID_ENV).ok()?;
        let client_secret = std::env::var(Self::CLIENT_SECRET_ENV).ok()?;
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }
        Some(Self::new(client_id, client_secret))
    }
}
