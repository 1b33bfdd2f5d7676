//! Enclave CLI - drives the guest package registry from the command line.
//!
//! Every invocation loads configuration, sets up logging, opens the registry
//! and runs its startup scan before dispatching the command.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use enclave_core::{EnclaveHome, StorageLayout};
use enclave_telemetry::{LogConfig, setup_logging};

mod commands;
mod context;
mod theme;

use commands::install::InstallArgs;
use commands::resolve::ResolveArgs;
use commands::users::UserCommands;
use commands::{clear, info, install, list, resolve, scan, uninstall, users};

/// Enclave - guest package registry
#[derive(Parser)]
#[command(name = "enclave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registry home directory
    #[arg(long, global = true, env = "ENCLAVE_HOME")]
    home: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package artifact
    Install(InstallArgs),

    /// Uninstall a package
    Uninstall {
        /// Package name
        package: String,
        /// User to uninstall for
        #[arg(short, long, default_value_t = 0, conflicts_with = "all")]
        user: i32,
        /// Uninstall for every user
        #[arg(long)]
        all: bool,
    },

    /// List installed packages
    List {
        /// User to list for
        #[arg(short, long, default_value_t = 0)]
        user: i32,
    },

    /// Show package and application details
    Info {
        /// Package name
        package: String,
        /// User to query
        #[arg(short, long, default_value_t = 0)]
        user: i32,
    },

    /// Resolve a routing request to a component
    Resolve(ResolveArgs),

    /// Manage users
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Run the startup scan and print its report
    Scan,

    /// Clear a package's data for a user
    Clear {
        /// Package name
        package: String,
        /// User whose data is cleared
        #[arg(short, long, default_value_t = 0)]
        user: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = match &cli.home {
        Some(path) => EnclaveHome::from_path(path),
        None => EnclaveHome::resolve().context("cannot locate the Enclave home directory")?,
    };
    home.ensure()
        .with_context(|| format!("cannot create {}", home.root().display()))?;

    let config = enclave_config::load(Some(home.root())).context("failed to load configuration")?;

    let mut log_config = LogConfig::from_config(&config.logging)?;
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    // An explicit home wins over `[storage] root`.
    let root = match (&cli.home, config.storage.root_path()) {
        (Some(path), _) => path.clone(),
        (None, Some(root)) => root,
        (None, None) => home.root().to_path_buf(),
    };
    let session = context::open(&root, &config)?;
    let pm = &session.pm;

    match &cli.command {
        Commands::Install(args) => install::run(pm, args)?,
        Commands::Uninstall { package, user, all } => uninstall::run(pm, package, *user, *all)?,
        Commands::List { user } => list::run(pm, *user)?,
        Commands::Info { package, user } => info::run(pm, package, *user)?,
        Commands::Resolve(args) => resolve::run(pm, args)?,
        Commands::Users { command } => users::run(pm, command)?,
        Commands::Scan => scan::run(&session.report),
        Commands::Clear { package, user } => clear::run(pm, package, *user)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from([
            "enclave", "--home", "/srv/enclave", "install", "notes.pkg", "--user", "2", "--copy",
        ])
        .unwrap();

        assert_eq!(cli.home, Some(PathBuf::from("/srv/enclave")));
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.source, "notes.pkg");
        assert_eq!(args.user, 2);
        assert!(args.copy);
        assert!(!args.system);
    }

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::try_parse_from([
            "enclave",
            "resolve",
            "activity",
            "--action",
            "android.intent.action.VIEW",
            "--category",
            "android.intent.category.DEFAULT",
            "--category",
            "android.intent.category.BROWSABLE",
            "--type",
            "text/plain",
        ])
        .unwrap();

        let Commands::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.kind, enclave_core::ComponentKind::Activity);
        assert_eq!(args.categories.len(), 2);
        assert_eq!(args.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_uninstall_user_conflicts_with_all() {
        let parsed =
            Cli::try_parse_from(["enclave", "uninstall", "com.example.notes", "--user", "1", "--all"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["enclave", "resolve", "widget"]).is_err());
    }
}
