//! Command-line interface

use clap::{Parser, Subcommand};

/// Installs, verifies and tears down the operator in one namespace.
///
/// Everything except the action comes from the environment or the file
/// named by `DEPLOYER_CONFIG`.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Install the operator and wait until it is ready
    Deploy,
    /// Remove the operator and wait until it is gone
    Undeploy,
    /// Move a running catalog install to another channel and catalog image
    Upgrade {
        /// Subscription channel to move to
        channel: String,
        /// Catalog image serving the new channel
        catalog_image: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Deploy => "deploy",
            Command::Undeploy => "undeploy",
            Command::Upgrade { .. } => "upgrade",
        }
    }

    /// An interrupted run of this command removes what it installed
    pub fn rolls_back_on_interrupt(&self) -> bool {
        !matches!(self, Command::Undeploy)
    }
}
