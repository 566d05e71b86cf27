//! MailService facade
//!
//! Single entry point tying the secret store, the authorization flow, the
//! permission policy, and the remote API together. Every mailbox operation
//! passes the dangerous-operation guard and the scope check before a remote
//! call is made.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::attachments::{AttachmentCache, SavedAttachment};
use crate::error::MailError;
use crate::gmail::{
    self, AUTHORIZE_URL, AuthFlow, CallbackTransport, FlowOptions, GoogleTokenEndpoint,
    TokenEndpoint,
};
use crate::models::{
    Account, ClientCredentials, Label, LabelId, LabelUpdate, MessageId, NewLabel, OAuthTokens,
    Thread, ThreadId, ThreadPage, ThreadQuery, normalize_email,
};
use crate::policy::guard::{restricted_delete, restricted_send};
use crate::policy::{AccessMode, AccessTier, Capability, check_label_additions, ensure_capability};
use crate::remote::{ApiConnector, GmailConnector, MailApi};
use crate::store::{SecretStore, StoreError};

/// Account row for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub email: String,
    pub tier: AccessTier,
    pub scopes: Vec<String>,
    pub is_default: bool,
}

/// Label changes applied to a batch of threads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyRequest {
    pub thread_ids: Vec<ThreadId>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// Permit dangerous labels in `add` for this call only
    pub allow_dangerous: bool,
}

/// Per-thread result of a batch modification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadOutcome {
    pub thread_id: ThreadId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Main service object for mail operations
pub struct MailService {
    store: SecretStore,
    connector: Box<dyn ApiConnector>,
    token_endpoint: Box<dyn TokenEndpoint>,
    authorize_url: String,
    /// Connected clients keyed by account email
    clients: HashMap<String, Arc<dyn MailApi>>,
}

impl MailService {
    pub fn new(
        store: SecretStore,
        connector: Box<dyn ApiConnector>,
        token_endpoint: Box<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            store,
            connector,
            token_endpoint,
            authorize_url: AUTHORIZE_URL.to_string(),
            clients: HashMap::new(),
        }
    }

    /// Service talking to the real Gmail and Google OAuth endpoints
    pub fn gmail(store: SecretStore) -> Self {
        Self::new(
            store,
            Box::new(GmailConnector::new()),
            Box::new(GoogleTokenEndpoint::default()),
        )
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    // ========================================================================
    // Client credentials
    // ========================================================================

    pub fn set_credentials(&mut self, credentials: ClientCredentials) -> Result<(), MailError> {
        self.store.set_credentials(credentials)?;
        info!("Saved OAuth client credentials");
        Ok(())
    }

    /// Stored client credentials, falling back to the environment
    pub fn client_credentials(&self) -> Result<ClientCredentials, MailError> {
        self.store
            .credentials()
            .cloned()
            .or_else(ClientCredentials::from_env)
            .ok_or(MailError::MissingCredentials)
    }

    // ========================================================================
    // Account management
    // ========================================================================

    /// Authorize and register a new account
    pub fn add_account(
        &mut self,
        email: &str,
        mode: AccessMode,
        force_consent: bool,
        transport: &mut dyn CallbackTransport,
    ) -> Result<AccountSummary, MailError> {
        let email = validate_email(email)?;
        if self.store.has_account(&email) {
            return Err(MailError::AccountExists(email));
        }
        let credentials = self.client_credentials()?;

        info!("Authorizing {} for {:?} access", email, mode);
        let options = FlowOptions {
            include_granted_scopes: false,
            force_consent,
        };
        let grant = self.authorize(credentials.clone(), options, mode, transport)?;

        let account = Account::new(
            &email,
            OAuthTokens {
                client_id: credentials.client_id,
                client_secret: credentials.client_secret,
                refresh_token: grant.refresh_token,
                access_token: grant.access_token,
            },
        )
        .with_scopes(grant.scopes);

        warn_if_short(&account, mode);
        self.store.set_account(account)?;
        info!("Added account {}", email);

        self.account_summary(&email)
    }

    /// Re-authorize an existing account with live scopes
    pub fn upgrade_account(
        &mut self,
        email: &str,
        transport: &mut dyn CallbackTransport,
    ) -> Result<AccountSummary, MailError> {
        let email = normalize_email(email);
        let mut account = self
            .store
            .get_account(&email)
            .cloned()
            .ok_or_else(|| MailError::AccountNotFound(email.clone()))?;
        let credentials = self.client_credentials()?;

        info!("Upgrading {} from {} access", email, account.tier());
        let options = FlowOptions {
            include_granted_scopes: false,
            force_consent: true,
        };
        let grant = self.authorize(credentials.clone(), options, AccessMode::Live, transport)?;

        account.oauth2 = OAuthTokens {
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            refresh_token: grant.refresh_token,
            access_token: grant.access_token,
        };
        account.scopes = Some(grant.scopes);

        warn_if_short(&account, AccessMode::Live);
        self.store.set_account(account)?;
        self.clients.remove(&email);
        info!("Upgraded account {}", email);

        self.account_summary(&email)
    }

    fn authorize(
        &self,
        credentials: ClientCredentials,
        options: FlowOptions,
        mode: AccessMode,
        transport: &mut dyn CallbackTransport,
    ) -> Result<gmail::Grant, MailError> {
        let mut flow = AuthFlow::new(credentials, self.token_endpoint.as_ref())
            .with_authorize_url(&self.authorize_url)
            .with_options(options);
        Ok(flow.run(mode.scopes(), transport)?)
    }

    /// Forget an account and its cached client
    pub fn remove_account(&mut self, email: &str) -> Result<AccountSummary, MailError> {
        let email = normalize_email(email);
        let summary = self.account_summary(&email)?;
        self.store.delete_account(&email)?;
        self.clients.remove(&email);
        info!("Removed account {}", email);
        Ok(summary)
    }

    pub fn list_accounts(&self) -> Vec<AccountSummary> {
        self.store
            .list_accounts()
            .iter()
            .map(|account| self.summarize(account))
            .collect()
    }

    pub fn default_account(&self) -> Option<&str> {
        self.store.default_account()
    }

    pub fn set_default_account(&mut self, email: &str) -> Result<(), MailError> {
        match self.store.set_default_account(email) {
            Err(StoreError::UnknownAccount(email)) => Err(MailError::AccountNotFound(email)),
            other => Ok(other?),
        }
    }

    pub fn clear_default_account(&mut self) -> Result<(), MailError> {
        Ok(self.store.clear_default_account()?)
    }

    /// The account an operation targets: explicit choice, else the default
    pub fn resolve_account(&self, requested: Option<&str>) -> Result<Account, MailError> {
        let email = match requested {
            Some(email) => normalize_email(email),
            None => self
                .store
                .default_account()
                .map(str::to_string)
                .ok_or(MailError::NoAccountSelected)?,
        };
        self.store
            .get_account(&email)
            .cloned()
            .ok_or(MailError::AccountNotFound(email))
    }

    fn account_summary(&self, email: &str) -> Result<AccountSummary, MailError> {
        self.store
            .get_account(email)
            .map(|account| self.summarize(account))
            .ok_or_else(|| MailError::AccountNotFound(normalize_email(email)))
    }

    fn summarize(&self, account: &Account) -> AccountSummary {
        AccountSummary {
            email: account.email.clone(),
            tier: account.tier(),
            scopes: account.granted_scopes().to_vec(),
            is_default: self.store.default_account() == Some(account.email.as_str()),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn search(
        &mut self,
        account: Option<&str>,
        query: &ThreadQuery,
    ) -> Result<ThreadPage, MailError> {
        let account = self.resolve_account(account)?;
        self.with_client(&account, |client| client.search_threads(query))
    }

    pub fn get_thread(&mut self, account: Option<&str>, id: &ThreadId) -> Result<Thread, MailError> {
        let account = self.resolve_account(account)?;
        self.with_client(&account, |client| client.get_thread(id))
    }

    pub fn list_labels(&mut self, account: Option<&str>) -> Result<Vec<Label>, MailError> {
        let account = self.resolve_account(account)?;
        self.with_client(&account, |client| client.list_labels())
    }

    /// Download an attachment into the cache, or return the cached copy
    pub fn download_attachment(
        &mut self,
        account: Option<&str>,
        message_id: &MessageId,
        attachment_id: &str,
        filename: Option<&str>,
    ) -> Result<SavedAttachment, MailError> {
        if attachment_id.trim().is_empty() {
            return Err(MailError::InvalidArgument(
                "attachment id must not be empty".to_string(),
            ));
        }
        let account = self.resolve_account(account)?;
        let dir = self.store.attachments_dir().ok_or_else(|| {
            MailError::InvalidArgument("attachments need an on-disk config directory".to_string())
        })?;
        let cache = AttachmentCache::new(&dir).map_err(|cause| StoreError::Write {
            path: dir.clone(),
            cause,
        })?;
        let filename = filename.unwrap_or_default();

        if let Some(hit) = cache.get(message_id, attachment_id, filename) {
            info!("Attachment already cached at {}", hit.path.display());
            return Ok(hit);
        }

        let data =
            self.with_client(&account, |client| client.get_attachment(message_id, attachment_id))?;
        let saved = cache
            .put(message_id, attachment_id, filename, &data)
            .map_err(|cause| StoreError::Write {
                path: cache.path_for(message_id, attachment_id, filename),
                cause,
            })?;
        info!("Saved attachment to {}", saved.path.display());
        Ok(saved)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create_label(
        &mut self,
        account: Option<&str>,
        label: &NewLabel,
    ) -> Result<Label, MailError> {
        let account = self.resolve_account(account)?;
        ensure_capability(&account, Capability::ManageLabels)?;
        let created = self.with_client(&account, |client| client.create_label(label))?;
        info!("Created label {} ({})", created.name, created.id.as_str());
        Ok(created)
    }

    pub fn update_label(
        &mut self,
        account: Option<&str>,
        id: &LabelId,
        update: &LabelUpdate,
    ) -> Result<Label, MailError> {
        if update.is_empty() {
            return Err(MailError::InvalidArgument(
                "nothing to change; pass a new name or colors".to_string(),
            ));
        }
        let account = self.resolve_account(account)?;
        ensure_capability(&account, Capability::ManageLabels)?;
        let updated = self.with_client(&account, |client| client.update_label(id, update))?;
        info!("Updated label {}", id.as_str());
        Ok(updated)
    }

    /// Add and remove labels on each thread, collecting per-thread outcomes
    pub fn modify_labels(
        &mut self,
        account: Option<&str>,
        request: &ModifyRequest,
    ) -> Result<Vec<ThreadOutcome>, MailError> {
        if request.thread_ids.is_empty() {
            return Err(MailError::InvalidArgument(
                "at least one thread id is required".to_string(),
            ));
        }
        if request.add.is_empty() && request.remove.is_empty() {
            return Err(MailError::InvalidArgument(
                "nothing to change; pass labels to add or remove".to_string(),
            ));
        }

        check_label_additions(&request.add, request.allow_dangerous)?;
        let account = self.resolve_account(account)?;
        ensure_capability(&account, Capability::ModifyThreads)?;

        if request.allow_dangerous {
            warn!(
                "Dangerous label override in effect for {} thread(s)",
                request.thread_ids.len()
            );
        }

        let outcomes = self.with_client(&account, |client| {
            Ok(request
                .thread_ids
                .iter()
                .map(|id| {
                    match client.modify_thread_labels(id, &request.add, &request.remove) {
                        Ok(()) => ThreadOutcome {
                            thread_id: id.clone(),
                            ok: true,
                            error: None,
                        },
                        Err(e) => {
                            warn!("Failed to modify thread {}: {:#}", id.as_str(), e);
                            ThreadOutcome {
                                thread_id: id.clone(),
                                ok: false,
                                error: Some(format!("{e:#}")),
                            }
                        }
                    }
                })
                .collect::<Vec<_>>())
        })?;

        let failed = outcomes.iter().filter(|o| !o.ok).count();
        info!(
            "Modified {} of {} thread(s)",
            outcomes.len() - failed,
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Remove threads from the inbox
    pub fn archive(
        &mut self,
        account: Option<&str>,
        thread_ids: &[ThreadId],
    ) -> Result<Vec<ThreadOutcome>, MailError> {
        self.modify_labels(
            account,
            &ModifyRequest {
                thread_ids: thread_ids.to_vec(),
                add: Vec::new(),
                remove: vec![LabelId::INBOX.to_string()],
                allow_dangerous: false,
            },
        )
    }

    /// Sending is never performed
    pub fn send(&self, account: Option<&str>) -> Result<(), MailError> {
        let email = self.account_hint(account);
        warn!("Refused send request");
        Err(MailError::Restricted(restricted_send(email.as_deref())))
    }

    /// Deleting is never performed
    pub fn delete(&self, account: Option<&str>, thread_ids: &[ThreadId]) -> Result<(), MailError> {
        let email = self.account_hint(account);
        warn!("Refused delete request for {} thread(s)", thread_ids.len());
        Err(MailError::Restricted(restricted_delete(
            email.as_deref(),
            thread_ids,
        )))
    }

    /// Web links for threads, for handing work to a human
    pub fn web_urls(&self, account: Option<&str>, thread_ids: &[ThreadId]) -> Vec<String> {
        let email = self.account_hint(account);
        thread_ids
            .iter()
            .map(|id| gmail::thread_url(email.as_deref(), id))
            .collect()
    }

    /// Best-effort account email for links; never fails
    fn account_hint(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(normalize_email)
            .or_else(|| self.store.default_account().map(str::to_string))
    }

    // ========================================================================
    // Remote plumbing
    // ========================================================================

    fn client_for(&mut self, account: &Account) -> Result<Arc<dyn MailApi>, MailError> {
        if let Some(client) = self.clients.get(&account.email) {
            return Ok(client.clone());
        }
        let client = self
            .connector
            .connect(account)
            .map_err(MailError::Remote)?;
        self.clients.insert(account.email.clone(), client.clone());
        Ok(client)
    }

    /// Run a remote call, then persist any credentials the client rotated
    fn with_client<T>(
        &mut self,
        account: &Account,
        op: impl FnOnce(&dyn MailApi) -> anyhow::Result<T>,
    ) -> Result<T, MailError> {
        let client = self.client_for(account)?;
        let result = op(client.as_ref());

        if let Some(tokens) = client.rotated_tokens()
            && let Err(e) = self.persist_rotated_tokens(&account.email, tokens)
        {
            if let Err(remote) = &result {
                warn!("Remote call for {} also failed: {:#}", account.email, remote);
            }
            return Err(e);
        }

        result.map_err(MailError::Remote)
    }

    /// A rotated refresh token replaces the old one, so losing it is fatal
    fn persist_rotated_tokens(&mut self, email: &str, tokens: OAuthTokens) -> Result<(), MailError> {
        let Some(mut account) = self.store.get_account(email).cloned() else {
            return Ok(());
        };
        account.oauth2 = tokens;
        self.store.set_account(account)?;
        info!("Persisted rotated credentials for {}", email);
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<String, MailError> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(MailError::InvalidArgument(format!(
            "{email:?} is not an email address"
        ))),
    }
}

fn warn_if_short(account: &Account, requested: AccessMode) {
    let expected = match requested {
        AccessMode::ReadOnly => AccessTier::ReadOnly,
        AccessMode::Live => AccessTier::Live,
    };
    let tier = account.tier();
    if tier != expected {
        warn!(
            "{} was granted {} access (requested {:?}); granted scopes: {}",
            account.email,
            tier,
            requested,
            account.granted_scopes().join(" ")
        );
    }
}
