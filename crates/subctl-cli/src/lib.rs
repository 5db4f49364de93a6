//! subctl CLI library

pub mod commands;
pub mod config;
pub mod error;
pub mod reporter;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// subctl - deploy and troubleshoot Submariner multi-cluster networking
#[derive(Parser, Debug)]
#[command(name = "subctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the broker control point to a cluster
    DeployBroker(commands::deploy_broker::DeployBrokerArgs),
    /// Gather diagnostic data from one or more clusters
    Gather(commands::gather::GatherArgs),
    /// Prepare or clean up cloud gateway infrastructure
    Cloud(commands::cloud::CloudArgs),
}

impl Cli {
    /// Run the CLI command; `cancel` is triggered on interrupt
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        match self.command {
            Commands::DeployBroker(args) => commands::deploy_broker::run(args, cancel).await,
            Commands::Gather(args) => commands::gather::run(args, cancel).await,
            Commands::Cloud(args) => commands::cloud::run(args, cancel).await,
        }
    }
}
