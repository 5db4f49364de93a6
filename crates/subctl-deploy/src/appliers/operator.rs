//! Operator deployment
//!
//! Installs the controller that reconciles the Broker object. The deployment
//! is replaced only when its operator container runs a different image or
//! verbosity than requested.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use subctl_common::kube_utils::{apply_with, ensure_namespace};
use subctl_common::{Error, Result};
use tracing::{debug, info};

use super::{transient_retry, EnsureOutcome};

/// Name shared by the operator's deployment, container, service account and role
pub const OPERATOR_NAME: &str = "submariner-operator";

const DEPLOYMENT_LABEL: &str = "Deployment/submariner-operator";

/// Desired operator installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorDesired {
    /// Namespace the operator runs in
    pub namespace: String,
    /// Fully resolved operator image
    pub image: String,
    /// Run the operator with verbose logging
    pub debug: bool,
}

/// Ensures the operator is installed and running the desired image
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperatorApplier: Send + Sync {
    /// Bring the operator installation in line with `desired`
    async fn ensure_operator(&self, desired: &OperatorDesired) -> Result<EnsureOutcome>;
}

/// Operator command-line arguments
pub fn operator_args(debug: bool) -> Vec<String> {
    vec![if debug { "-v=3" } else { "-v=1" }.to_string()]
}

fn pull_policy(image: &str) -> &'static str {
    if image.ends_with(":devel") || image.ends_with(":latest") {
        "Always"
    } else {
        "IfNotPresent"
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The operator deployment for `desired`
pub fn operator_deployment(desired: &OperatorDesired) -> Deployment {
    let labels = BTreeMap::from([("name".to_string(), OPERATOR_NAME.to_string())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(OPERATOR_NAME.to_string()),
            namespace: Some(desired.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(OPERATOR_NAME.to_string()),
                    containers: vec![Container {
                        name: OPERATOR_NAME.to_string(),
                        image: Some(desired.image.clone()),
                        image_pull_policy: Some(pull_policy(&desired.image).to_string()),
                        command: Some(vec![OPERATOR_NAME.to_string()]),
                        args: Some(operator_args(desired.debug)),
                        env: Some(vec![
                            field_env("WATCH_NAMESPACE", "metadata.namespace"),
                            field_env("POD_NAME", "metadata.name"),
                            EnvVar {
                                name: "OPERATOR_NAME".to_string(),
                                value: Some(OPERATOR_NAME.to_string()),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// What the operator step has to do with the deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentAction {
    /// No deployment exists
    Create,
    /// The deployment runs a different image or arguments
    Update,
    /// The deployment already matches
    Unchanged,
}

/// Compare an existing deployment against the desired operator
pub fn deployment_action(existing: Option<&Deployment>, desired: &OperatorDesired) -> DeploymentAction {
    let Some(existing) = existing else {
        return DeploymentAction::Create;
    };

    let container = existing
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.iter().find(|c| c.name == OPERATOR_NAME));

    match container {
        Some(c)
            if c.image.as_deref() == Some(desired.image.as_str())
                && c.args.as_deref() == Some(operator_args(desired.debug).as_slice()) =>
        {
            DeploymentAction::Unchanged
        }
        _ => DeploymentAction::Update,
    }
}

fn operator_cluster_role() -> ClusterRole {
    let rule = |groups: &[&str], resources: &[&str]| PolicyRule {
        api_groups: Some(groups.iter().map(|g| g.to_string()).collect()),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: vec!["*".to_string()],
        ..Default::default()
    };

    ClusterRole {
        metadata: ObjectMeta {
            name: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            rule(&["submariner.io"], &["*"]),
            rule(&["apps"], &["deployments", "daemonsets", "replicasets"]),
            rule(
                &[""],
                &["pods", "services", "configmaps", "secrets", "serviceaccounts", "namespaces"],
            ),
            rule(
                &["rbac.authorization.k8s.io"],
                &["roles", "rolebindings", "clusterroles", "clusterrolebindings"],
            ),
            rule(&["apiextensions.k8s.io"], &["customresourcedefinitions"]),
            rule(&["multicluster.x-k8s.io"], &["*"]),
            rule(&["discovery.k8s.io"], &["endpointslices"]),
        ]),
        ..Default::default()
    }
}

fn operator_cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: OPERATOR_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: OPERATOR_NAME.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Operator applier talking to a live cluster
pub struct KubeOperatorApplier {
    client: Client,
}

impl KubeOperatorApplier {
    /// Create an applier for the cluster behind `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperatorApplier for KubeOperatorApplier {
    async fn ensure_operator(&self, desired: &OperatorDesired) -> Result<EnsureOutcome> {
        let namespace = desired.namespace.as_str();
        let mut outcomes = Vec::new();

        outcomes.push(
            transient_retry("ensure_operator_namespace", || {
                ensure_namespace(&self.client, namespace)
            })
            .await?,
        );

        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(OPERATOR_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        outcomes.push(
            transient_retry("apply_operator_service_account", || {
                apply_with(&accounts, &account)
            })
            .await?,
        );

        let roles: Api<ClusterRole> = Api::all(self.client.clone());
        let role = operator_cluster_role();
        outcomes.push(transient_retry("apply_operator_role", || apply_with(&roles, &role)).await?);

        let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let binding = operator_cluster_role_binding(namespace);
        outcomes.push(
            transient_retry("apply_operator_role_binding", || {
                apply_with(&bindings, &binding)
            })
            .await?,
        );

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let api = &deployments;
        let existing = transient_retry("get_operator_deployment", || async move {
            api.get_opt(OPERATOR_NAME)
                .await
                .map_err(|e| Error::from_kube(DEPLOYMENT_LABEL, e))
        })
        .await?;

        let mut deployment = operator_deployment(desired);
        let outcome = match deployment_action(existing.as_ref(), desired) {
            DeploymentAction::Create => {
                info!(image = %desired.image, "creating operator deployment");
                let deployment = &deployment;
                transient_retry("create_operator_deployment", || async move {
                    api.create(&PostParams::default(), deployment)
                        .await
                        .map_err(|e| Error::from_kube(DEPLOYMENT_LABEL, e))
                })
                .await?;
                EnsureOutcome::Created
            }
            DeploymentAction::Update => {
                info!(image = %desired.image, "updating operator deployment");
                deployment.metadata.resource_version =
                    existing.and_then(|d| d.metadata.resource_version);
                let deployment = &deployment;
                transient_retry("replace_operator_deployment", || async move {
                    api.replace(OPERATOR_NAME, &PostParams::default(), deployment)
                        .await
                        .map_err(|e| Error::from_kube(DEPLOYMENT_LABEL, e))
                })
                .await?;
                EnsureOutcome::Updated
            }
            DeploymentAction::Unchanged => {
                debug!("operator deployment already up to date");
                EnsureOutcome::Unchanged
            }
        };
        outcomes.push(outcome);

        Ok(EnsureOutcome::combine(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(image: &str, debug: bool) -> OperatorDesired {
        OperatorDesired {
            namespace: "submariner-operator".to_string(),
            image: image.to_string(),
            debug,
        }
    }

    fn container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn debug_flag_selects_verbosity() {
        assert_eq!(operator_args(true), vec!["-v=3"]);
        assert_eq!(operator_args(false), vec!["-v=1"]);
    }

    #[test]
    fn deployment_runs_requested_image_with_service_account() {
        let d = operator_deployment(&desired("quay.io/submariner/submariner-operator:0.18.0", true));
        let c = container(&d);
        assert_eq!(
            c.image.as_deref(),
            Some("quay.io/submariner/submariner-operator:0.18.0")
        );
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(c.args.as_deref(), Some(&["-v=3".to_string()][..]));
        assert_eq!(d.metadata.namespace.as_deref(), Some("submariner-operator"));
        assert_eq!(
            d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().service_account_name.as_deref(),
            Some(OPERATOR_NAME)
        );
    }

    #[test]
    fn moving_tags_are_always_pulled() {
        let d = operator_deployment(&desired("quay.io/submariner/submariner-operator:devel", false));
        assert_eq!(container(&d).image_pull_policy.as_deref(), Some("Always"));
    }

    #[test]
    fn missing_deployment_is_created() {
        assert_eq!(
            deployment_action(None, &desired("img:1", false)),
            DeploymentAction::Create
        );
    }

    /// Story: re-running with the same image leaves the operator alone
    #[test]
    fn matching_deployment_is_unchanged() {
        let want = desired("img:1", false);
        let existing = operator_deployment(&want);
        assert_eq!(
            deployment_action(Some(&existing), &want),
            DeploymentAction::Unchanged
        );
    }

    #[test]
    fn new_image_or_verbosity_triggers_update() {
        let existing = operator_deployment(&desired("img:1", false));
        assert_eq!(
            deployment_action(Some(&existing), &desired("img:2", false)),
            DeploymentAction::Update
        );
        assert_eq!(
            deployment_action(Some(&existing), &desired("img:1", true)),
            DeploymentAction::Update
        );
    }

    #[test]
    fn deployment_without_operator_container_is_updated() {
        let mut existing = operator_deployment(&desired("img:1", false));
        existing
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers[0]
            .name = "other".to_string();
        assert_eq!(
            deployment_action(Some(&existing), &desired("img:1", false)),
            DeploymentAction::Update
        );
    }

    #[test]
    fn cluster_role_binding_targets_operator_account() {
        let binding = operator_cluster_role_binding("ops");
        assert_eq!(binding.role_ref.kind, "ClusterRole");
        let subjects = binding.subjects.unwrap();
        let subject = &subjects[0];
        assert_eq!(subject.name, OPERATOR_NAME);
        assert_eq!(subject.namespace.as_deref(), Some("ops"));
    }
}
