//! Persona Relay - Discord persona proxy
//!
//! This is the main entry point for the persona-relay binary.
//! The relay connects to the Discord gateway, resolves persona triggers in
//! guild messages, and reposts them through channel webhooks.

mod cli;

use std::path::Path;

use clap::Parser;
use tracing::info;

use persona_relay::config::{self, RelayConfig};
use persona_relay::error::{Error, Result};
use persona_relay::logging::{self, LogGuards};
use persona_relay::persona::Roster;
use persona_relay::{runtime, version};

use crate::cli::{Cli, Commands, ConfigSubcommand, RosterSubcommand};

fn main() -> Result<()> {
    // Verbosity flags decide how logging is set up
    let cli = Cli::parse();

    // Short-lived commands log to stderr only
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Roster { subcommand } => {
            logging::init_simple(if cli.verbose > 0 {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            })?;
            return handle_roster_command(subcommand.clone());
        }
        Commands::Run { .. } => {}
    }

    let (config_path, roster_path) = match &cli.command {
        Commands::Run { config, roster } => (config.clone(), roster.clone()),
        _ => (None, None),
    };

    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Dropping the guard stops the file writer
    let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting Persona Relay"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("persona-relay")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    if let Err(e) = runtime.block_on(runtime::run(config, roster_path)) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

fn init_logging_from_config(config: &RelayConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = RelayConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
        ConfigSubcommand::Init { path, force } => {
            let created = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", created.display());
        }
        ConfigSubcommand::Validate { config } => match RelayConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}

/// Handle roster subcommands
fn handle_roster_command(subcommand: RosterSubcommand) -> Result<()> {
    match subcommand {
        RosterSubcommand::Check { path } => {
            let roster = match Roster::load(Path::new(&path), config::DEFAULT_AVATAR_URL) {
                Ok(roster) => roster,
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            };

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
            let report = rt.block_on(runtime::check_roster(&roster))?;

            println!("Roster: {}", path);
            println!("  Personas:   {}", report.personas);
            println!("  Grants:     {}", report.grants);
            println!("  Overrides:  {}", report.overrides);
            println!("  Auto-proxy: {}", report.auto_proxy);

            if report.conflicts.is_empty() {
                println!("No trigger conflicts.");
                return Ok(());
            }

            println!();
            println!("Trigger conflicts ({}):", report.conflict_count());
            for ((operator, guild), conflicts) in &report.conflicts {
                for conflict in conflicts {
                    println!("  user {} in guild {}: '{}'", operator, guild, conflict.key);
                    for (i, claim) in conflict.claims.iter().enumerate() {
                        let marker = if i == 0 { "wins" } else { "shadowed" };
                        println!(
                            "    {} ({}, trigger '{}') {}",
                            claim.display_name, claim.tier, claim.trigger, marker
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
