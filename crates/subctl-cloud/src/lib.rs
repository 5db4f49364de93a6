//! Cloud gateway preparation for subctl
//!
//! Inter-cluster tunnels terminate on gateway nodes. Preparing a cluster means
//! making sure enough of those exist: on a generic cluster existing workers are
//! labelled, on RHOS (OpenShift on OpenStack) dedicated gateway machines can be
//! provisioned through a `MachineSet`.
//!
//! Each platform is a [`GatewayDeployer`] variant; the variant is picked at the
//! command boundary through [`CloudPlatform`] and driven by [`run_on`].

#![deny(missing_docs)]

pub mod generic;
pub mod rhos;

use async_trait::async_trait;
use subctl_common::kube_utils::{ClusterContext, ClusterHandle};
use subctl_common::reporter::Reporter;
use subctl_common::{Error, Result};
use tracing::info;

pub use generic::{GenericGatewayDeployer, GATEWAY_LABEL};
pub use rhos::{RhosConfig, RhosGatewayDeployer};

/// What a gateway deployment should produce
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayDeployInput {
    /// Number of gateway nodes the cluster should end up with
    pub gateways: usize,
}

/// Provisions and removes gateway infrastructure on one cluster
#[async_trait]
pub trait GatewayDeployer: Send + Sync {
    /// Make sure the cluster has `input.gateways` gateway nodes
    async fn deploy(&self, input: &GatewayDeployInput, reporter: &dyn Reporter) -> Result<()>;

    /// Remove everything `deploy` created
    async fn cleanup(&self, reporter: &dyn Reporter) -> Result<()>;
}

/// Platform variant selected on the command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudPlatform {
    /// Any Kubernetes cluster; gateways are labelled worker nodes
    Generic,
    /// OpenShift on Red Hat OpenStack
    Rhos(RhosConfig),
}

impl CloudPlatform {
    /// Short name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudPlatform::Generic => "generic",
            CloudPlatform::Rhos(_) => "rhos",
        }
    }
}

/// What to do with the deployer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudAction {
    /// Deploy gateways
    Prepare(GatewayDeployInput),
    /// Remove gateways
    Cleanup,
}

impl CloudAction {
    /// Reject inputs that can never succeed
    pub fn validate(&self) -> Result<()> {
        match self {
            CloudAction::Prepare(input) if input.gateways == 0 => Err(
                Error::invalid_configuration("--gateways must be at least 1"),
            ),
            _ => Ok(()),
        }
    }
}

/// Build the deployer for `platform` on `cluster`
///
/// For RHOS this resolves the infra ID, region and cloud credentials first;
/// anything missing fails with `InvalidConfiguration` before the cluster is
/// contacted.
pub fn deployer_for(
    cluster: &ClusterContext,
    platform: &CloudPlatform,
    reporter: &dyn Reporter,
) -> Result<Box<dyn GatewayDeployer>> {
    match platform {
        CloudPlatform::Generic => Ok(Box::new(GenericGatewayDeployer::new(
            cluster.client.clone(),
        ))),
        CloudPlatform::Rhos(config) => {
            let resolved = rhos::resolve(config, reporter)?;
            Ok(Box::new(RhosGatewayDeployer::new(
                cluster.client.clone(),
                resolved,
            )))
        }
    }
}

/// Run `action` through `deployer`
pub async fn perform(
    deployer: &dyn GatewayDeployer,
    action: &CloudAction,
    reporter: &dyn Reporter,
) -> Result<()> {
    action.validate()?;
    match action {
        CloudAction::Prepare(input) => deployer.deploy(input, reporter).await,
        CloudAction::Cleanup => deployer.cleanup(reporter).await,
    }
}

/// Resolve credentials for `platform`, build its deployer and run `action`
pub async fn run_on(
    cluster: &ClusterContext,
    platform: &CloudPlatform,
    action: &CloudAction,
    reporter: &dyn Reporter,
) -> Result<()> {
    action.validate()?;
    info!(cluster = %cluster.name(), platform = platform.as_str(), ?action, "running cloud action");
    let deployer = deployer_for(cluster, platform, reporter)?;
    perform(deployer.as_ref(), action, reporter).await
}
