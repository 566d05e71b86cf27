//! Subcommand implementations for the `mailguard` CLI.

pub mod auth;
pub mod config_cmd;
pub mod mail;

use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_json_accepts_unsized_values() {
        let urls = ["https://mail.google.com/mail/#all/t1".to_string()];
        print_json(&urls[..]).unwrap();
    }
}
