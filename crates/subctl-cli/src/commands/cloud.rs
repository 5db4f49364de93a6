//! Cloud commands: prepare and clean up gateway infrastructure
//!
//! ```text
//! subctl cloud prepare generic --gateways 2
//! subctl cloud prepare rhos --ocp-metadata metadata.json --dedicated-gateway
//! subctl cloud cleanup rhos --infra-id ocp-x7k2p --region regionOne
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use subctl_cloud::rhos::DEFAULT_GATEWAY_INSTANCE_TYPE;
use subctl_cloud::{run_on, CloudAction, CloudPlatform, GatewayDeployInput, RhosConfig};
use subctl_common::Error as SubctlError;
use tokio_util::sync::CancellationToken;

use super::ClusterArgs;
use crate::reporter::CliReporter;
use crate::Result;

/// Prepare or clean up cloud gateway infrastructure
#[derive(Args, Debug, Clone)]
pub struct CloudArgs {
    #[command(subcommand)]
    pub command: CloudCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CloudCommand {
    /// Make sure the cluster has gateway nodes
    Prepare {
        #[command(subcommand)]
        platform: PreparePlatform,
    },
    /// Remove what prepare created
    Cleanup {
        #[command(subcommand)]
        platform: CleanupPlatform,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PreparePlatform {
    /// Label existing worker nodes as gateways
    Generic {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        gateways: GatewayArgs,
    },
    /// OpenShift on Red Hat OpenStack
    Rhos {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        gateways: GatewayArgs,
        #[command(flatten)]
        rhos: RhosArgs,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CleanupPlatform {
    /// Remove gateway labels
    Generic {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Remove the gateway MachineSet and labels
    Rhos {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        rhos: RhosArgs,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct GatewayArgs {
    /// Number of gateway nodes
    #[arg(long, default_value_t = 1)]
    pub gateways: usize,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RhosArgs {
    /// Cluster infra ID
    #[arg(long)]
    pub infra_id: Option<String>,

    /// OpenStack region
    #[arg(long, env = "OS_REGION_NAME")]
    pub region: Option<String>,

    /// OpenStack project ID
    #[arg(long)]
    pub project_id: Option<String>,

    /// OCP installer metadata.json providing infra and project IDs
    #[arg(long = "ocp-metadata", conflicts_with_all = ["infra_id", "project_id"])]
    pub ocp_metadata_file: Option<PathBuf>,

    /// Entry in clouds.yaml (default openstack)
    #[arg(long)]
    pub cloud_entry: Option<String>,

    /// Provision dedicated gateway machines
    #[arg(long)]
    pub dedicated_gateway: bool,

    /// Flavor for dedicated gateways
    #[arg(long, default_value = DEFAULT_GATEWAY_INSTANCE_TYPE)]
    pub gateway_instance_type: String,
}

impl From<&RhosArgs> for RhosConfig {
    fn from(args: &RhosArgs) -> Self {
        RhosConfig {
            dedicated_gateway: args.dedicated_gateway,
            infra_id: args.infra_id.clone(),
            region: args.region.clone(),
            project_id: args.project_id.clone(),
            ocp_metadata_file: args.ocp_metadata_file.clone(),
            cloud_entry: args.cloud_entry.clone(),
            gateway_instance_type: args.gateway_instance_type.clone(),
        }
    }
}

impl CloudCommand {
    /// The cluster selection, platform and action this command stands for
    pub fn plan(&self) -> (&ClusterArgs, CloudPlatform, CloudAction) {
        match self {
            CloudCommand::Prepare { platform } => match platform {
                PreparePlatform::Generic { cluster, gateways } => (
                    cluster,
                    CloudPlatform::Generic,
                    CloudAction::Prepare(GatewayDeployInput {
                        gateways: gateways.gateways,
                    }),
                ),
                PreparePlatform::Rhos {
                    cluster,
                    gateways,
                    rhos,
                } => (
                    cluster,
                    CloudPlatform::Rhos(rhos.into()),
                    CloudAction::Prepare(GatewayDeployInput {
                        gateways: gateways.gateways,
                    }),
                ),
            },
            CloudCommand::Cleanup { platform } => match platform {
                CleanupPlatform::Generic { cluster } => {
                    (cluster, CloudPlatform::Generic, CloudAction::Cleanup)
                }
                CleanupPlatform::Rhos { cluster, rhos } => {
                    (cluster, CloudPlatform::Rhos(rhos.into()), CloudAction::Cleanup)
                }
            },
        }
    }
}

pub async fn run(args: CloudArgs, cancel: CancellationToken) -> Result<()> {
    let (cluster_args, platform, action) = args.command.plan();
    action.validate()?;
    let cluster = cluster_args.resolve_one("cloud").await?;

    let reporter = CliReporter::stdout();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SubctlError::cancelled(format!("cloud {}", platform.as_str())).into()),
        result = run_on(&cluster, &platform, &action, &reporter) => Ok(result?),
    }
}
