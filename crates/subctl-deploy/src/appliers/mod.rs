//! Idempotent appliers for the broker deployment steps
//!
//! Each step sits behind an `async_trait` so the pipeline can be exercised
//! without a cluster. The kube-backed implementations create what is missing,
//! reconcile what diverges and leave matching objects alone, reporting which
//! of the three happened as an [`EnsureOutcome`].

use std::future::Future;

use kube::Client;
use subctl_common::retry::{retry, Backoff};
use subctl_common::{Error, Result};

mod broker_cr;
mod globalnet_config;
mod operator;
mod rbac;

pub use broker_cr::{
    broker_action, desired_broker, BrokerAction, BrokerApplier, KubeBrokerApplier,
};
pub use globalnet_config::{GlobalnetConfigApplier, KubeGlobalnetConfigApplier};
pub use operator::{
    deployment_action, operator_args, operator_deployment, DeploymentAction, KubeOperatorApplier,
    OperatorApplier, OperatorDesired, OPERATOR_NAME,
};
pub use rbac::{
    broker_roles, KubeRbacApplier, RbacApplier, RbacDesired, BROKER_ADMIN_NAME, BROKER_CLIENT_NAME,
};

#[cfg(test)]
pub use broker_cr::MockBrokerApplier;
#[cfg(test)]
pub use globalnet_config::MockGlobalnetConfigApplier;
#[cfg(test)]
pub use operator::MockOperatorApplier;
#[cfg(test)]
pub use rbac::MockRbacApplier;

pub use subctl_common::kube_utils::ApplyOutcome as EnsureOutcome;

/// The set of appliers one pipeline run talks to
#[derive(Clone, Copy)]
pub struct Appliers<'a> {
    /// RBAC step
    pub rbac: &'a dyn RbacApplier,
    /// Operator step
    pub operator: &'a dyn OperatorApplier,
    /// Broker object step
    pub broker: &'a dyn BrokerApplier,
    /// Globalnet record step
    pub globalnet: &'a dyn GlobalnetConfigApplier,
}

/// Kube-backed appliers sharing one client
pub struct KubeAppliers {
    rbac: KubeRbacApplier,
    operator: KubeOperatorApplier,
    broker: KubeBrokerApplier,
    globalnet: KubeGlobalnetConfigApplier,
}

impl KubeAppliers {
    /// Build all appliers for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self {
            rbac: KubeRbacApplier::new(client.clone()),
            operator: KubeOperatorApplier::new(client.clone()),
            broker: KubeBrokerApplier::new(client.clone()),
            globalnet: KubeGlobalnetConfigApplier::new(client),
        }
    }

    /// Borrow the appliers as a pipeline bundle
    pub fn appliers(&self) -> Appliers<'_> {
        Appliers {
            rbac: &self.rbac,
            operator: &self.operator,
            broker: &self.broker,
            globalnet: &self.globalnet,
        }
    }
}

/// Repeat a cluster call on transport failures only
///
/// API responses in the 4xx range, including 409 conflicts, are returned on
/// the first attempt.
pub(crate) async fn transient_retry<T, F, Fut>(operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry(&Backoff::default(), operation_name, Error::is_transient, operation).await
}
