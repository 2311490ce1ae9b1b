//! Command line for `persona-relay`

use clap::{Parser, Subcommand};

/// Persona Relay - post as your characters on Discord
///
/// Watches guild messages for persona triggers, removes the original, and
/// reposts the text through a channel webhook under the persona's name and
/// avatar.
#[derive(Parser, Debug)]
#[command(name = "persona-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// More log output: -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay (connects to the gateway and proxies messages)
    Run {
        /// Config file (otherwise searched in the usual locations)
        #[arg(short, long, env = "PERSONA_RELAY_CONFIG")]
        config: Option<String>,

        /// Roster file to load instead of the configured one
        #[arg(long)]
        roster: Option<String>,
    },

    /// Print version, commit and target
    Version,

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Persona roster tools
    Roster {
        #[command(subcommand)]
        subcommand: RosterSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration (token redacted)
    Show {
        /// Config file to read
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default config
    Init {
        /// Destination (defaults to ~/.persona-relay/relay.toml)
        #[arg(short, long)]
        path: Option<String>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Parse and validate without connecting
    Validate {
        /// Config file to check
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RosterSubcommand {
    /// Load a roster and report counts and trigger conflicts
    Check {
        /// Roster file path
        path: String,
    },
}
