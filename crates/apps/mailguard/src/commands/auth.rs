//! `mailguard auth` -- client credentials and account authorization.

use std::path::PathBuf;

use clap::Subcommand;
use mailguard::{
    AccessMode, CallbackTransport, ClientCredentials, LoopbackTransport, MailError, MailService,
    ManualTransport,
};
use serde_json::json;

use super::print_json;

/// Credential and account subcommands.
#[derive(Subcommand)]
pub enum AuthCmd {
    /// Save the OAuth client used for every account.
    Credentials {
        /// Client secret JSON downloaded from the Google Cloud Console
        #[arg(long, conflicts_with_all = ["client_id", "client_secret"])]
        file: Option<PathBuf>,

        /// OAuth client ID
        #[arg(long, requires = "client_secret")]
        client_id: Option<String>,

        /// OAuth client secret
        #[arg(long, requires = "client_id")]
        client_secret: Option<String>,
    },

    /// Authorize a new account.
    Add {
        /// Account email address
        email: String,

        /// Request read-only access instead of label management
        #[arg(long)]
        readonly: bool,

        /// Paste the redirect URL instead of running a local listener
        #[arg(long)]
        manual: bool,

        /// Always show the consent screen
        #[arg(long)]
        force_consent: bool,
    },

    /// Re-authorize an account with live (label-managing) access.
    Upgrade {
        /// Account email address
        email: String,

        /// Paste the redirect URL instead of running a local listener
        #[arg(long)]
        manual: bool,
    },

    /// Forget an account and its tokens.
    Remove {
        /// Account email address
        email: String,
    },

    /// List authorized accounts.
    List,
}

pub fn run(service: &mut MailService, action: AuthCmd) -> anyhow::Result<()> {
    match action {
        AuthCmd::Credentials {
            file,
            client_id,
            client_secret,
        } => {
            let credentials = read_credentials(file, client_id, client_secret)?;
            let client_id = credentials.client_id.clone();
            service.set_credentials(credentials)?;
            print_json(&json!({ "saved": true, "client_id": client_id }))
        }
        AuthCmd::Add {
            email,
            readonly,
            manual,
            force_consent,
        } => {
            let mode = if readonly {
                AccessMode::ReadOnly
            } else {
                AccessMode::Live
            };
            let mut transport = transport(manual);
            let summary = service.add_account(&email, mode, force_consent, transport.as_mut())?;
            print_json(&summary)
        }
        AuthCmd::Upgrade { email, manual } => {
            let mut transport = transport(manual);
            let summary = service.upgrade_account(&email, transport.as_mut())?;
            print_json(&summary)
        }
        AuthCmd::Remove { email } => {
            let removed = service.remove_account(&email)?;
            print_json(&json!({ "removed": removed.email }))
        }
        AuthCmd::List => print_json(&service.list_accounts()),
    }
}

fn read_credentials(
    file: Option<PathBuf>,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> anyhow::Result<ClientCredentials> {
    match (file, client_id, client_secret) {
        (Some(path), _, _) => ClientCredentials::from_file(&path),
        (None, Some(id), Some(secret)) => Ok(ClientCredentials::new(id, secret)),
        _ => Err(MailError::InvalidArgument(
            "pass --file, or --client-id together with --client-secret".to_string(),
        )
        .into()),
    }
}

fn transport(manual: bool) -> Box<dyn CallbackTransport> {
    if manual {
        Box::new(ManualTransport::stdio())
    } else {
        Box::new(LoopbackTransport::new())
    }
}
