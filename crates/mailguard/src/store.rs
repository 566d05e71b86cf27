//! Local secret store for client credentials, accounts, and defaults
//!
//! Layout under the root directory:
//! ```text
//! <root>/
//!   credentials.json   # OAuth client id/secret
//!   accounts.json      # array of Account records
//!   config.json        # default account pointer
//!   attachments/       # cached attachment bytes
//! ```
//!
//! Every write is staged to a temp file and renamed into place, with
//! owner-only permissions. A malformed `accounts.json` is a hard error;
//! malformed credentials or config files are treated as absent because
//! they can be recreated by re-running setup.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::models::{Account, ClientCredentials, normalize_email};

const CREDENTIALS_FILE: &str = "credentials.json";
const ACCOUNTS_FILE: &str = "accounts.json";
const CONFIG_FILE: &str = "config.json";
const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not determine the mailguard config directory")]
    NoConfigDir,

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("accounts file {} is malformed (expected a JSON array of accounts): {source}", .path.display())]
    MalformedAccounts {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("accounts file {} lists {email} more than once", .path.display())]
    DuplicateAccount { path: PathBuf, email: String },

    #[error("failed to write {}: {cause:#}", .path.display())]
    Write { path: PathBuf, cause: anyhow::Error },

    #[error("no account registered for {0}")]
    UnknownAccount(String),
}

/// Default-account configuration persisted in `config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_account: Option<String>,
}

/// Owner of persisted accounts, credentials, and the default pointer.
///
/// A store opened with [`SecretStore::in_memory`] has no root directory and
/// never touches the filesystem.
#[derive(Debug)]
pub struct SecretStore {
    root: Option<PathBuf>,
    accounts: Vec<Account>,
    credentials: Option<ClientCredentials>,
    settings: Settings,
}

impl SecretStore {
    /// Open the store rooted at `root`, loading whatever files exist.
    ///
    /// Nothing is created until the first write.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let accounts = load_accounts(&root.join(ACCOUNTS_FILE))?;
        let credentials = load_soft(&root.join(CREDENTIALS_FILE));
        let mut settings: Settings = load_soft(&root.join(CONFIG_FILE)).unwrap_or_default();
        settings.default_account = settings.default_account.as_deref().map(normalize_email);

        debug!(
            "Opened secret store at {} ({} accounts)",
            root.display(),
            accounts.len()
        );

        Ok(Self {
            root: Some(root),
            accounts,
            credentials,
            settings,
        })
    }

    /// Open the store in the per-user config directory
    pub fn open_default() -> Result<Self, StoreError> {
        let root = config::config_dir().ok_or(StoreError::NoConfigDir)?;
        Self::open(root)
    }

    /// A store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self {
            root: None,
            accounts: Vec::new(),
            credentials: None,
            settings: Settings::default(),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Create the root directory owner-only if it does not exist
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        match &self.root {
            Some(root) => config::ensure_private_dir(root).map_err(|cause| StoreError::Write {
                path: root.clone(),
                cause,
            }),
            None => Ok(()),
        }
    }

    /// Directory for cached attachments, if this store is on disk
    pub fn attachments_dir(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(ATTACHMENTS_DIR))
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    pub fn list_accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn get_account(&self, email: &str) -> Option<&Account> {
        let email = normalize_email(email);
        self.accounts.iter().find(|a| a.email == email)
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.get_account(email).is_some()
    }

    /// Insert or replace the account with the same email, then persist
    pub fn set_account(&mut self, mut account: Account) -> Result<(), StoreError> {
        account.email = normalize_email(&account.email);
        let mut accounts = self.accounts.clone();
        match accounts.iter_mut().find(|a| a.email == account.email) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
        self.persist(ACCOUNTS_FILE, &accounts)?;
        self.accounts = accounts;
        Ok(())
    }

    /// Remove an account, clearing the default pointer if it named it
    pub fn delete_account(&mut self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = normalize_email(email);
        let Some(index) = self.accounts.iter().position(|a| a.email == email) else {
            return Ok(None);
        };
        let mut accounts = self.accounts.clone();
        let removed = accounts.remove(index);
        self.persist(ACCOUNTS_FILE, &accounts)?;
        self.accounts = accounts;

        if self.settings.default_account.as_deref() == Some(email.as_str()) {
            info!("Clearing default account {} after removal", email);
            self.replace_settings(Settings::default())?;
        }

        Ok(Some(removed))
    }

    // ========================================================================
    // Client credentials
    // ========================================================================

    pub fn credentials(&self) -> Option<&ClientCredentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: ClientCredentials) -> Result<(), StoreError> {
        let credentials = Some(credentials);
        self.persist(CREDENTIALS_FILE, &credentials)?;
        self.credentials = credentials;
        Ok(())
    }

    // ========================================================================
    // Default account
    // ========================================================================

    pub fn default_account(&self) -> Option<&str> {
        self.settings.default_account.as_deref()
    }

    pub fn set_default_account(&mut self, email: &str) -> Result<(), StoreError> {
        let email = normalize_email(email);
        if !self.has_account(&email) {
            return Err(StoreError::UnknownAccount(email));
        }
        self.replace_settings(Settings {
            default_account: Some(email),
        })
    }

    pub fn clear_default_account(&mut self) -> Result<(), StoreError> {
        self.replace_settings(Settings::default())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn replace_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.persist(CONFIG_FILE, &settings)?;
        self.settings = settings;
        Ok(())
    }

    fn persist<T: Serialize>(&self, filename: &str, value: &T) -> Result<(), StoreError> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        self.ensure_root()?;

        let path = root.join(filename);
        config::save_json_file(&path, value).map_err(|cause| StoreError::Write {
            path: path.clone(),
            cause,
        })?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Read the accounts file; missing is empty, malformed is an error.
/// Emails are normalized and must be unique after normalization.
fn load_accounts(path: &Path) -> Result<Vec<Account>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut accounts: Vec<Account> =
        serde_json::from_str(&content).map_err(|source| StoreError::MalformedAccounts {
            path: path.to_path_buf(),
            source,
        })?;

    let mut seen = HashSet::new();
    for account in &mut accounts {
        account.email = normalize_email(&account.email);
        if !seen.insert(account.email.clone()) {
            return Err(StoreError::DuplicateAccount {
                path: path.to_path_buf(),
                email: account.email.clone(),
            });
        }
    }
    Ok(accounts)
}

/// Read a recoverable file, treating missing or corrupt content as absent
fn load_soft<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match config::load_json_file(path) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable {}: {:#}", path.display(), e);
            None
        }
    }
}
