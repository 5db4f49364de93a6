//! Broker namespace RBAC
//!
//! Member clusters join through a client service account whose role grants
//! exactly what the deployed components sync through the broker. An admin
//! service account carries the wider role used to manage the broker itself.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::{Client, CustomResourceExt};
#[cfg(test)]
use mockall::automock;
use subctl_common::component::{GLOBALNET, SERVICE_DISCOVERY};
use subctl_common::crd::Broker;
use subctl_common::kube_utils::{apply_with, ensure_namespace};
use subctl_common::Result;
use tracing::debug;

use super::{transient_retry, EnsureOutcome};

/// Service account and role used to administer the broker
pub const BROKER_ADMIN_NAME: &str = "submariner-k8s-broker-admin";

/// Service account member clusters authenticate as
pub const BROKER_CLIENT_NAME: &str = "submariner-k8s-broker-client";

const BROKER_CLUSTER_ROLE: &str = "submariner-k8s-broker-cluster";
const CLIENT_TOKEN_SECRET: &str = "submariner-k8s-broker-client-token";

const SUBMARINER_GROUP: &str = "submariner.io";
const MULTICLUSTER_GROUP: &str = "multicluster.x-k8s.io";
const DISCOVERY_GROUP: &str = "discovery.k8s.io";

const SYNC_VERBS: [&str; 7] = ["create", "get", "list", "watch", "patch", "update", "delete"];

/// Desired RBAC state of the broker namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RbacDesired {
    /// Broker namespace
    pub broker_namespace: String,
    /// Effective component set, including globalnet when enabled
    pub components: BTreeSet<String>,
}

/// Ensures the broker namespace, the Broker CRD and the broker RBAC exist
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RbacApplier: Send + Sync {
    /// Bring the broker RBAC in line with `desired`
    async fn ensure_rbac(&self, desired: &RbacDesired) -> Result<EnsureOutcome>;
}

fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            "app.kubernetes.io/managed-by".to_string(),
            "subctl".to_string(),
        )])),
        ..Default::default()
    }
}

/// Roles of the broker namespace for the given component set
///
/// The admin role is returned first, then the role bound to member clusters.
pub fn broker_roles(namespace: &str, components: &BTreeSet<String>) -> Vec<Role> {
    let mut admin_rules = vec![
        rule(SUBMARINER_GROUP, &["*"], &["*"]),
        rule("", &["secrets", "serviceaccounts", "configmaps"], &["*"]),
        rule("rbac.authorization.k8s.io", &["rolebindings"], &["*"]),
    ];
    let mut cluster_rules = vec![rule(SUBMARINER_GROUP, &["clusters", "endpoints"], &SYNC_VERBS)];

    if components.contains(SERVICE_DISCOVERY) {
        admin_rules.push(rule(MULTICLUSTER_GROUP, &["*"], &["*"]));
        cluster_rules.push(rule(MULTICLUSTER_GROUP, &["serviceimports"], &SYNC_VERBS));
        cluster_rules.push(rule(DISCOVERY_GROUP, &["endpointslices"], &SYNC_VERBS));
    }

    if components.contains(GLOBALNET) {
        cluster_rules.push(rule("", &["configmaps"], &["get", "list", "watch", "update"]));
    }

    vec![
        Role {
            metadata: metadata(BROKER_ADMIN_NAME, namespace),
            rules: Some(admin_rules),
        },
        Role {
            metadata: metadata(BROKER_CLUSTER_ROLE, namespace),
            rules: Some(cluster_rules),
        },
    ]
}

fn service_accounts(namespace: &str) -> Vec<ServiceAccount> {
    [BROKER_ADMIN_NAME, BROKER_CLIENT_NAME]
        .into_iter()
        .map(|name| ServiceAccount {
            metadata: metadata(name, namespace),
            ..Default::default()
        })
        .collect()
}

fn role_bindings(namespace: &str) -> Vec<RoleBinding> {
    [
        (BROKER_ADMIN_NAME, BROKER_ADMIN_NAME),
        (BROKER_CLIENT_NAME, BROKER_CLUSTER_ROLE),
    ]
    .into_iter()
    .map(|(account, role)| RoleBinding {
        metadata: metadata(account, namespace),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    })
    .collect()
}

/// Long-lived token secret for the client service account
fn client_token_secret(namespace: &str) -> Secret {
    let mut meta = metadata(CLIENT_TOKEN_SECRET, namespace);
    meta.annotations = Some(BTreeMap::from([(
        "kubernetes.io/service-account.name".to_string(),
        BROKER_CLIENT_NAME.to_string(),
    )]));
    Secret {
        metadata: meta,
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    }
}

/// RBAC applier backed by server-side apply
pub struct KubeRbacApplier {
    client: Client,
}

impl KubeRbacApplier {
    /// Create an applier for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RbacApplier for KubeRbacApplier {
    async fn ensure_rbac(&self, desired: &RbacDesired) -> Result<EnsureOutcome> {
        let namespace = desired.broker_namespace.as_str();
        let mut outcomes = Vec::new();

        outcomes.push(
            transient_retry("ensure_broker_namespace", || {
                ensure_namespace(&self.client, namespace)
            })
            .await?,
        );

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = Broker::crd();
        outcomes.push(transient_retry("apply_broker_crd", || apply_with(&crds, &crd)).await?);

        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        for account in service_accounts(namespace) {
            outcomes.push(
                transient_retry("apply_service_account", || apply_with(&accounts, &account))
                    .await?,
            );
        }

        let roles: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        for role in broker_roles(namespace, &desired.components) {
            outcomes.push(transient_retry("apply_role", || apply_with(&roles, &role)).await?);
        }

        let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        for binding in role_bindings(namespace) {
            outcomes.push(
                transient_retry("apply_role_binding", || apply_with(&bindings, &binding)).await?,
            );
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let token = client_token_secret(namespace);
        outcomes.push(transient_retry("apply_client_token", || apply_with(&secrets, &token)).await?);

        let outcome = EnsureOutcome::combine(outcomes);
        debug!(namespace, %outcome, "broker RBAC ensured");
        Ok(outcome)
    }
}
