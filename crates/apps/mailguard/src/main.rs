//! `mailguard` -- restricted Gmail CLI for automated agents.
//!
//! Provides the following subcommands:
//!
//! - `mailguard auth` -- Client credentials and account authorization.
//! - `mailguard config` -- Default account selection.
//! - `mailguard search` / `thread` / `labels` -- Read the mailbox.
//! - `mailguard modify` / `archive` -- Change labels on threads.
//! - `mailguard attachment` -- Download an attachment into the cache.
//! - `mailguard url` -- Web links for handing a thread to a human.
//! - `mailguard send` / `delete` -- Always refused.
//!
//! Results are printed as JSON on stdout; diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::debug;
use mailguard::{EXIT_FAILURE, MailError, MailService, SecretStore};
use serde_json::json;

mod commands;

use commands::auth::AuthCmd;
use commands::config_cmd::ConfigCmd;
use commands::mail::{AttachmentArgs, LabelsCmd, ModifyArgs, SearchArgs, SendArgs};

/// Restricted Gmail access for automated agents.
#[derive(Parser)]
#[command(name = "mailguard", about = "Restricted Gmail access for automated agents", version)]
struct Cli {
    /// Directory holding credentials and accounts [default: $MAILGUARD_HOME or the user config dir]
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Account to operate on [default: the configured default account]
    #[arg(long, global = true, value_name = "EMAIL")]
    account: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Manage client credentials and authorized accounts.
    Auth {
        #[command(subcommand)]
        action: AuthCmd,
    },

    /// Manage local configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },

    /// Search threads with Gmail query syntax.
    Search(SearchArgs),

    /// Show a thread with every message.
    Thread {
        /// Thread ID
        thread_id: String,
    },

    /// List, create, or edit labels.
    Labels {
        #[command(subcommand)]
        action: LabelsCmd,
    },

    /// Add or remove labels on threads.
    Modify(ModifyArgs),

    /// Remove threads from the inbox.
    Archive {
        /// Thread IDs
        #[arg(required = true)]
        thread_ids: Vec<String>,
    },

    /// Download an attachment into the local cache.
    Attachment(AttachmentArgs),

    /// Print web links for threads.
    Url {
        /// Thread IDs
        #[arg(required = true)]
        thread_ids: Vec<String>,
    },

    /// Sending mail is blocked by policy.
    Send(SendArgs),

    /// Deleting mail is blocked by policy.
    Delete {
        /// Thread IDs
        thread_ids: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(refusal) = policy_refusal(&e)
                && let Err(print_err) = commands::print_json(&refusal)
            {
                eprintln!("error: failed to print refusal: {print_err:#}");
            }
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let store = match &cli.config_dir {
        Some(dir) => SecretStore::open(dir.clone())?,
        None => SecretStore::open_default()?,
    };
    debug!("Using config directory {:?}", store.root());

    let mut service = MailService::gmail(store);
    let account = cli.account.as_deref();

    match cli.command {
        Commands::Auth { action } => commands::auth::run(&mut service, action),
        Commands::Config { action } => commands::config_cmd::run(&mut service, action),
        Commands::Search(args) => commands::mail::search(&mut service, account, args),
        Commands::Thread { thread_id } => commands::mail::thread(&mut service, account, &thread_id),
        Commands::Labels { action } => commands::mail::labels(&mut service, account, action),
        Commands::Modify(args) => commands::mail::modify(&mut service, account, args),
        Commands::Archive { thread_ids } => {
            commands::mail::archive(&mut service, account, &thread_ids)
        }
        Commands::Attachment(args) => commands::mail::attachment(&mut service, account, args),
        Commands::Url { thread_ids } => commands::mail::urls(&service, account, &thread_ids),
        Commands::Send(_) => commands::mail::send(&service, account),
        Commands::Delete { thread_ids } => commands::mail::delete(&service, account, &thread_ids),
    }
}

/// Map an error to the process exit status
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<MailError>()
        .map_or(EXIT_FAILURE, MailError::exit_code)
}

/// JSON body for a policy refusal, so agents reading stdout see why
fn policy_refusal(err: &anyhow::Error) -> Option<serde_json::Value> {
    match err.downcast_ref::<MailError>()? {
        MailError::Restricted(op) => Some(json!({
            "blocked": true,
            "kind": op.kind,
            "guidance": op.guidance,
            "urls": op.urls,
        })),
        MailError::DangerousLabels { labels } => Some(json!({
            "blocked": true,
            "kind": "dangerous_labels",
            "labels": labels,
            "guidance": "Pass --allow-dangerous to apply these labels anyway.",
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use mailguard::policy::guard::restricted_send;
    use mailguard::{EXIT_POLICY_BLOCKED, StoreError};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mailguard",
            "search",
            "is:unread",
            "--account",
            "agent@example.com",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.account.as_deref(), Some("agent@example.com"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Search(_)));
    }

    #[test]
    fn send_accepts_arbitrary_arguments() {
        let cli = Cli::try_parse_from([
            "mailguard",
            "send",
            "--to",
            "someone@example.com",
            "--subject",
            "hi",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Send(_)));
    }

    #[test]
    fn archive_requires_thread_ids() {
        assert!(Cli::try_parse_from(["mailguard", "archive"]).is_err());
    }

    #[test]
    fn policy_errors_exit_with_policy_code() {
        let blocked: anyhow::Error = MailError::Restricted(restricted_send(None)).into();
        assert_eq!(exit_code(&blocked), EXIT_POLICY_BLOCKED);

        let dangerous: anyhow::Error = MailError::DangerousLabels {
            labels: vec!["TRASH".to_string()],
        }
        .into();
        assert_eq!(exit_code(&dangerous), EXIT_POLICY_BLOCKED);
    }

    #[test]
    fn other_errors_exit_with_failure_code() {
        let missing: anyhow::Error = MailError::NoAccountSelected.into();
        assert_eq!(exit_code(&missing), EXIT_FAILURE);

        let store: anyhow::Error = StoreError::NoConfigDir.into();
        assert_eq!(exit_code(&store), EXIT_FAILURE);
    }

    #[test]
    fn restricted_refusal_is_described_as_json() {
        let err: anyhow::Error =
            MailError::Restricted(restricted_send(Some("agent@example.com"))).into();
        let refusal = policy_refusal(&err).unwrap();

        assert_eq!(refusal["blocked"], true);
        assert_eq!(refusal["kind"], "send");
        assert!(refusal["guidance"].as_str().unwrap().contains("Gmail web interface"));
        let url = refusal["urls"][0].as_str().unwrap();
        assert!(url.contains("authuser=agent%40example.com"));
        assert!(url.ends_with("#inbox"));
    }

    #[test]
    fn dangerous_label_refusal_names_labels() {
        let err: anyhow::Error = MailError::DangerousLabels {
            labels: vec!["TRASH".to_string()],
        }
        .into();
        let refusal = policy_refusal(&err).unwrap();

        assert_eq!(refusal["kind"], "dangerous_labels");
        assert_eq!(refusal["labels"], json!(["TRASH"]));
    }

    #[test]
    fn other_errors_have_no_refusal_body() {
        let err: anyhow::Error = MailError::NoAccountSelected.into();
        assert!(policy_refusal(&err).is_none());
    }

    #[test]
    fn send_is_blocked_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "mailguard",
            "--config-dir",
            dir.path().to_str().unwrap(),
            "send",
            "--to",
            "someone@example.com",
        ])
        .unwrap();

        let err = run(cli).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_POLICY_BLOCKED);
        assert!(err.to_string().contains("sending mail is blocked by policy"));
    }
}
