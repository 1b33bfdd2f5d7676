//! `enclave users`.

use anyhow::Context;
use clap::Subcommand;
use enclave_core::UserId;
use enclave_pm::PackageManager;

use crate::theme::Theme;

/// User management subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum UserCommands {
    /// List users
    List,
    /// Create a user
    Create {
        /// Display name
        name: String,
    },
    /// Delete a user and every package installed for it
    Delete {
        /// User id
        id: i32,
    },
}

pub(crate) fn run(pm: &PackageManager, command: &UserCommands) -> anyhow::Result<()> {
    match command {
        UserCommands::List => {
            println!("{}", Theme::header("Users"));
            println!("  {:<6} {:<24} CREATED", "ID", "NAME");
            println!("{}", Theme::separator());
            for user in pm.users() {
                let mut line = format!(
                    "  {:<6} {:<24} {}",
                    user.id.to_string(),
                    user.name,
                    Theme::timestamp(&user.created_at)
                );
                if user.flags.primary {
                    line.push_str(&Theme::dimmed(" [primary]"));
                }
                if user.flags.guest {
                    line.push_str(&Theme::dimmed(" [guest]"));
                }
                println!("{line}");
            }
        },
        UserCommands::Create { name } => {
            let user = pm
                .create_user(name)
                .with_context(|| format!("failed to create user '{name}'"))?;
            println!(
                "{}",
                Theme::success(&format!("Created user {} ({})", user.id, user.name))
            );
        },
        UserCommands::Delete { id } => {
            pm.delete_user(UserId(*id))
                .with_context(|| format!("failed to delete user {id}"))?;
            println!("{}", Theme::success(&format!("Deleted user {id}")));
        },
    }
    Ok(())
}
