//! Mailguard - permission-bounded Gmail access for automated agents
//!
//! This crate provides:
//! - A secret store for client credentials and authorized accounts
//! - OAuth2 authorization code flow with PKCE (loopback or manual)
//! - Scope tiers enforced per account before any mutation
//! - A guard that refuses sending, deleting, and dangerous labels
//! - A Gmail API client behind the [`MailApi`] trait
//!
//! [`MailService`] is the entry point; the CLI is a thin layer over it.

pub mod attachments;
pub mod error;
pub mod gmail;
pub mod models;
pub mod policy;
pub mod remote;
pub mod service;
pub mod store;

pub use attachments::{AttachmentCache, SavedAttachment, sanitize_filename};
pub use error::{EXIT_FAILURE, EXIT_POLICY_BLOCKED, MailError};
pub use gmail::{
    AuthError, AuthFlow, CallbackParams, CallbackTransport, FlowOptions, Grant, LoopbackTransport,
    ManualTransport, TokenEndpoint,
};
pub use models::{
    Account, AttachmentRef, ClientCredentials, EmailAddress, Label, LabelColor, LabelId,
    LabelUpdate, Message, MessageId, NewLabel, OAuthTokens, Thread, ThreadId, ThreadPage,
    ThreadQuery, ThreadSummary,
};
pub use policy::{AccessMode, AccessTier, Capability, DANGEROUS_LABELS, RestrictedKind, RestrictedOperation};
pub use remote::{ApiConnector, GmailConnector, MailApi};
pub use service::{AccountSummary, MailService, ModifyRequest, ThreadOutcome};
pub use store::{SecretStore, StoreError};
