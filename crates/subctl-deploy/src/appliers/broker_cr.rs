//! The Broker object

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use subctl_common::crd::{Broker, BrokerSpec, BROKER_NAME};
use subctl_common::{Error, Result};
use tracing::info;

use super::{transient_retry, EnsureOutcome};

const BROKER_LABEL: &str = "Broker/submariner-broker";

/// Ensures the Broker object carries the requested spec
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerApplier: Send + Sync {
    /// Create or update the Broker object in `namespace`
    async fn ensure_broker(&self, namespace: &str, spec: &BrokerSpec) -> Result<EnsureOutcome>;
}

/// What the broker step has to do with the Broker object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerAction {
    /// No Broker exists
    Create,
    /// The stored spec differs
    Update,
    /// The stored spec already matches
    Unchanged,
}

/// Compare an existing Broker against the desired spec
///
/// Specs are compared in normalized form so component order and ignored
/// globalnet fields never cause an update.
pub fn broker_action(existing: Option<&Broker>, desired: &BrokerSpec) -> BrokerAction {
    match existing {
        None => BrokerAction::Create,
        Some(b) if b.spec.normalized() == desired.normalized() => BrokerAction::Unchanged,
        Some(_) => BrokerAction::Update,
    }
}

/// The Broker object to write for `spec`
///
/// An update starts from the stored object's metadata, so its labels,
/// annotations and observed resource version survive and only the spec is
/// swapped. A concurrent writer then surfaces as a conflict.
pub fn desired_broker(existing: Option<&Broker>, namespace: &str, spec: &BrokerSpec) -> Broker {
    let metadata = match existing {
        Some(current) => ObjectMeta {
            managed_fields: None,
            ..current.metadata.clone()
        },
        None => ObjectMeta {
            name: Some(BROKER_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
    };
    Broker {
        metadata,
        spec: spec.normalized(),
    }
}

/// Broker applier talking to a live cluster
pub struct KubeBrokerApplier {
    client: Client,
}

impl KubeBrokerApplier {
    /// Create an applier for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerApplier for KubeBrokerApplier {
    async fn ensure_broker(&self, namespace: &str, spec: &BrokerSpec) -> Result<EnsureOutcome> {
        let brokers: Api<Broker> = Api::namespaced(self.client.clone(), namespace);
        let api = &brokers;

        let existing = transient_retry("get_broker", || async move {
            api.get_opt(BROKER_NAME)
                .await
                .map_err(|e| Error::from_kube(BROKER_LABEL, e))
        })
        .await?;

        let broker = desired_broker(existing.as_ref(), namespace, spec);

        match broker_action(existing.as_ref(), spec) {
            BrokerAction::Create => {
                info!(namespace, "creating Broker");
                let broker = &broker;
                transient_retry("create_broker", || async move {
                    api.create(&PostParams::default(), broker)
                        .await
                        .map_err(|e| Error::from_kube(BROKER_LABEL, e))
                })
                .await?;
                Ok(EnsureOutcome::Created)
            }
            BrokerAction::Update => {
                info!(namespace, "updating Broker spec");
                let broker = &broker;
                transient_retry("replace_broker", || async move {
                    api.replace(BROKER_NAME, &PostParams::default(), broker)
                        .await
                        .map_err(|e| Error::from_kube(BROKER_LABEL, e))
                })
                .await?;
                Ok(EnsureOutcome::Updated)
            }
            BrokerAction::Unchanged => Ok(EnsureOutcome::Unchanged),
        }
    }
}
