//! The broker's globalnet record
//!
//! Member clusters allot their global blocks from the range stored here, so an
//! existing record is only ever extended, never redefined.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use subctl_common::globalnet::{
    check_existing, GlobalnetAction, GlobalnetInfo, GLOBALNET_CONFIGMAP_NAME,
};
use subctl_common::{Error, Result};
use tracing::info;

use super::{transient_retry, EnsureOutcome};

const CONFIGMAP_LABEL: &str = "ConfigMap/submariner-globalnet-info";

/// Validates and writes the globalnet record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GlobalnetConfigApplier: Send + Sync {
    /// Fail with `ConflictingState` if a stored record conflicts with `desired`
    async fn validate_existing(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<()>;

    /// Create the record if absent, or rewrite it while no member has joined
    async fn ensure(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<EnsureOutcome>;
}

/// Globalnet record applier talking to a live cluster
pub struct KubeGlobalnetConfigApplier {
    client: Client,
}

impl KubeGlobalnetConfigApplier {
    /// Create an applier for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn read(&self, api: &Api<ConfigMap>) -> Result<Option<(ConfigMap, GlobalnetInfo)>> {
        let stored = transient_retry("get_globalnet_configmap", || async move {
            api.get_opt(GLOBALNET_CONFIGMAP_NAME)
                .await
                .map_err(|e| Error::from_kube(CONFIGMAP_LABEL, e))
        })
        .await?;

        match stored {
            Some(cm) => {
                let info = GlobalnetInfo::from_config_map(&cm)?;
                Ok(Some((cm, info)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GlobalnetConfigApplier for KubeGlobalnetConfigApplier {
    async fn validate_existing(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let existing = self.read(&api).await?;
        check_existing(existing.as_ref().map(|(_, info)| info), desired, namespace)?;
        Ok(())
    }

    async fn ensure(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<EnsureOutcome> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let existing = self.read(&api).await?;
        let action = check_existing(existing.as_ref().map(|(_, info)| info), desired, namespace)?;
        let api = &api;

        match (action, existing) {
            (GlobalnetAction::Create, _) => {
                info!(namespace, range = %desired.cidr_range, "creating globalnet record");
                let cm = desired.to_config_map(namespace)?;
                let cm = &cm;
                transient_retry("create_globalnet_configmap", || async move {
                    api.create(&PostParams::default(), cm)
                        .await
                        .map_err(|e| Error::from_kube(CONFIGMAP_LABEL, e))
                })
                .await?;
                Ok(EnsureOutcome::Created)
            }
            (GlobalnetAction::Update, Some((stored, current))) => {
                info!(
                    namespace,
                    range = %desired.cidr_range,
                    from = current.cluster_size,
                    to = desired.cluster_size,
                    "updating globalnet record"
                );
                let updated = GlobalnetInfo {
                    clusters: current.clusters,
                    ..desired.clone()
                };
                let mut cm = updated.to_config_map(namespace)?;
                cm.metadata.resource_version = stored.metadata.resource_version;
                let cm = &cm;
                transient_retry("replace_globalnet_configmap", || async move {
                    api.replace(GLOBALNET_CONFIGMAP_NAME, &PostParams::default(), cm)
                        .await
                        .map_err(|e| Error::from_kube(CONFIGMAP_LABEL, e))
                })
                .await?;
                Ok(EnsureOutcome::Updated)
            }
            (GlobalnetAction::Update, None) => Err(Error::internal_with_context(
                "globalnet",
                "update decided without a stored record",
            )),
            (GlobalnetAction::Unchanged, _) => Ok(EnsureOutcome::Unchanged),
        }
    }
}
