//! Gateways on any Kubernetes cluster
//!
//! Gateway nodes are ordinary workers carrying [`GATEWAY_LABEL`]`=true`.
//! Nodes that already carry the label count toward the requested total.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use subctl_common::reporter::Reporter;
use subctl_common::{Error, Result};
use tracing::{debug, info};

use crate::{GatewayDeployInput, GatewayDeployer};

/// Label marking a node as a gateway
pub const GATEWAY_LABEL: &str = "submariner.io/gateway";

const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .map(|l| l.contains_key(key))
        .unwrap_or(false)
}

/// Check if a node is already a gateway
pub fn is_gateway_node(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(GATEWAY_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false)
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// Check if a node can be turned into a gateway: a ready, unlabelled worker
pub fn is_gateway_candidate(node: &Node) -> bool {
    !is_gateway_node(node)
        && !CONTROL_PLANE_LABELS.iter().any(|l| has_label(node, l))
        && is_node_ready(node)
}

/// Which nodes to label to reach a gateway count
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewaySelection {
    /// Nodes that are already gateways
    pub existing: Vec<String>,
    /// Nodes to label now
    pub to_label: Vec<String>,
}

/// Pick the nodes to label so the cluster ends up with `wanted` gateways
///
/// Candidates are taken in name order so repeated runs pick the same nodes.
pub fn select_gateway_nodes(nodes: &[Node], wanted: usize) -> Result<GatewaySelection> {
    let mut existing: Vec<String> = nodes
        .iter()
        .filter(|n| is_gateway_node(n))
        .filter_map(|n| n.metadata.name.clone())
        .collect();
    existing.sort();

    let missing = wanted.saturating_sub(existing.len());
    if missing == 0 {
        return Ok(GatewaySelection {
            existing,
            to_label: Vec::new(),
        });
    }

    let mut candidates: Vec<String> = nodes
        .iter()
        .filter(|n| is_gateway_candidate(n))
        .filter_map(|n| n.metadata.name.clone())
        .collect();
    candidates.sort();

    if candidates.len() < missing {
        return Err(Error::internal_with_context(
            "gateway",
            format!(
                "{} gateway(s) requested but only {} exist and {} worker node(s) can be labelled",
                wanted,
                existing.len(),
                candidates.len()
            ),
        ));
    }

    candidates.truncate(missing);
    Ok(GatewaySelection {
        existing,
        to_label: candidates,
    })
}

/// Gateway deployer that labels existing worker nodes
pub struct GenericGatewayDeployer {
    client: Client,
}

impl GenericGatewayDeployer {
    /// Deploy through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn set_label(&self, api: &Api<Node>, node: &str, value: Option<&str>) -> Result<()> {
        let labels = BTreeMap::from([(GATEWAY_LABEL, value)]);
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(format!("Node/{}", node), e))?;
        debug!(node = %node, ?value, "updated gateway label");
        Ok(())
    }
}

#[async_trait]
impl GatewayDeployer for GenericGatewayDeployer {
    async fn deploy(&self, input: &GatewayDeployInput, reporter: &dyn Reporter) -> Result<()> {
        reporter.start(&format!("Labelling {} gateway node(s)", input.gateways));
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube("nodes", e))?;

        let selection = match select_gateway_nodes(&nodes.items, input.gateways) {
            Ok(selection) => selection,
            Err(e) => {
                reporter.failure(&e.to_string());
                return Err(e);
            }
        };

        for node in &selection.to_label {
            if let Err(e) = self.set_label(&api, node, Some("true")).await {
                reporter.failure(&format!("Failed to label node {}: {}", node, e));
                return Err(e);
            }
        }

        info!(
            existing = selection.existing.len(),
            labelled = selection.to_label.len(),
            "gateway nodes ready"
        );
        reporter.success(&format!(
            "{} existing gateway node(s), {} newly labelled",
            selection.existing.len(),
            selection.to_label.len()
        ));
        Ok(())
    }

    async fn cleanup(&self, reporter: &dyn Reporter) -> Result<()> {
        reporter.start("Removing gateway labels");
        let api: Api<Node> = Api::all(self.client.clone());
        let labelled = api
            .list(&ListParams::default().labels(&format!("{}=true", GATEWAY_LABEL)))
            .await
            .map_err(|e| Error::from_kube("nodes", e))?;

        let mut removed = 0;
        for node in labelled.items.iter().filter_map(|n| n.metadata.name.as_deref()) {
            if let Err(e) = self.set_label(&api, node, None).await {
                reporter.failure(&format!("Failed to unlabel node {}: {}", node, e));
                return Err(e);
            }
            removed += 1;
        }

        reporter.success(&format!("Removed the gateway label from {} node(s)", removed));
        Ok(())
    }
}
