//! `mailguard config` -- local configuration.

use clap::Subcommand;
use mailguard::MailService;
use serde_json::json;

use super::print_json;

/// Configuration subcommands.
#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Show or change the account used when --account is omitted.
    DefaultAccount {
        #[command(subcommand)]
        action: Option<DefaultAccountCmd>,
    },
}

#[derive(Subcommand)]
pub enum DefaultAccountCmd {
    /// Print the default account.
    Get,
    /// Use an existing account by default.
    Set {
        /// Account email address
        email: String,
    },
    /// Forget the default account.
    Clear,
}

pub fn run(service: &mut MailService, action: ConfigCmd) -> anyhow::Result<()> {
    match action {
        ConfigCmd::DefaultAccount { action } => match action.unwrap_or(DefaultAccountCmd::Get) {
            DefaultAccountCmd::Get => {}
            DefaultAccountCmd::Set { email } => service.set_default_account(&email)?,
            DefaultAccountCmd::Clear => service.clear_default_account()?,
        },
    }
    print_json(&json!({ "default_account": service.default_account() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailguard::{MailError, SecretStore};
    use tempfile::tempdir;

    #[test]
    fn setting_unknown_default_fails() {
        let dir = tempdir().unwrap();
        let mut service = MailService::gmail(SecretStore::open(dir.path()).unwrap());

        let err = run(
            &mut service,
            ConfigCmd::DefaultAccount {
                action: Some(DefaultAccountCmd::Set {
                    email: "nobody@example.com".to_string(),
                }),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MailError>(),
            Some(MailError::AccountNotFound(_))
        ));
        assert_eq!(service.default_account(), None);
    }

    #[test]
    fn clear_without_default_succeeds() {
        let dir = tempdir().unwrap();
        let mut service = MailService::gmail(SecretStore::open(dir.path()).unwrap());

        run(
            &mut service,
            ConfigCmd::DefaultAccount {
                action: Some(DefaultAccountCmd::Clear),
            },
        )
        .unwrap();
        run(&mut service, ConfigCmd::DefaultAccount { action: None }).unwrap();
    }
}
