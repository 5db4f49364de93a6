//! Broker Custom Resource Definition
//!
//! The Broker CRD is the top-level control object of the shared broker
//! namespace. The operator reconciles it; subctl only creates or updates it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the single Broker object in a broker namespace
pub const BROKER_NAME: &str = "submariner-broker";

/// Desired state of the broker control point
///
/// Field names follow the operator's API so existing objects round-trip.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "submariner.io",
    version = "v1alpha1",
    kind = "Broker",
    plural = "brokers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    /// Requested components (service-discovery, connectivity)
    #[serde(default)]
    pub components: Vec<String>,

    /// Whether globalnet is enabled
    #[serde(default)]
    pub globalnet_enabled: bool,

    /// Cluster-spanning globalnet range
    #[serde(rename = "globalnetCIDRRange", default, skip_serializing_if = "String::is_empty")]
    pub globalnet_cidr_range: String,

    /// Addresses allotted to each joining cluster (0 = compute a default)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub default_globalnet_cluster_size: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl BrokerSpec {
    /// Copy of the spec with globalnet fields cleared when globalnet is disabled,
    /// and components deduplicated in a stable order.
    pub fn normalized(&self) -> Self {
        let mut components = self.components.clone();
        components.sort();
        components.dedup();

        if self.globalnet_enabled {
            Self {
                components,
                ..self.clone()
            }
        } else {
            Self {
                components,
                globalnet_enabled: false,
                globalnet_cidr_range: String::new(),
                default_globalnet_cluster_size: 0,
            }
        }
    }
}
