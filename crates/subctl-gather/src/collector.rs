//! Per-cluster data collection
//!
//! [`collect_from`] owns the output layout and redaction; where the data comes
//! from is behind [`ClusterSource`]. Output for one cluster lands in:
//!
//! ```text
//! <dir>/<cluster>/<module>/<pod>_<container>.log
//! <dir>/<cluster>/<module>/<kind>_<name>.yaml
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use subctl_common::crd::Broker;
use subctl_common::kube_utils::{ClusterContext, ClusterHandle};
use subctl_common::reporter::Reporter;
use subctl_common::{Error, Result, DEFAULT_BROKER_NAMESPACE, OPERATOR_NAMESPACE};
use tracing::{debug, warn};

use crate::options::{
    GatherOptions, MODULE_BROKER, MODULE_CONNECTIVITY, MODULE_OPERATOR, MODULE_SERVICE_DISCOVERY,
    TYPE_LOGS, TYPE_RESOURCES,
};
use crate::redact::Redactor;

/// Collects diagnostic data from one cluster
#[async_trait]
pub trait Collector<C: ClusterHandle>: Send + Sync {
    /// Write the requested data for `cluster` below `options.directory`
    async fn collect(&self, cluster: &C, options: &GatherOptions, reporter: &dyn Reporter)
        -> Result<()>;
}

/// Kinds of objects written by the `resources` type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// v1 ConfigMap
    ConfigMap,
    /// v1 Secret
    Secret,
    /// submariner.io Broker
    Broker,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::Broker => "Broker",
        }
    }
}

/// A pod and its container names
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name
    pub name: String,
    /// Container names
    pub containers: Vec<String>,
}

/// Read access to the data a gather needs
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Pods in `namespace` matching the label `selector`
    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>>;

    /// Current log of one container
    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String>;

    /// Every object of `kind` in `namespace`, as JSON
    async fn resources(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<Value>>;
}

struct Module {
    name: &'static str,
    namespace: &'static str,
    selectors: &'static [&'static str],
    kinds: &'static [ResourceKind],
}

static MODULES: [Module; 4] = [
    Module {
        name: MODULE_CONNECTIVITY,
        namespace: OPERATOR_NAMESPACE,
        selectors: &[
            "app=submariner-gateway",
            "app=submariner-routeagent",
            "app=submariner-globalnet",
            "app=submariner-metrics-proxy",
        ],
        kinds: &[ResourceKind::DaemonSet, ResourceKind::ConfigMap],
    },
    Module {
        name: MODULE_SERVICE_DISCOVERY,
        namespace: OPERATOR_NAMESPACE,
        selectors: &[
            "app=submariner-lighthouse-agent",
            "app=submariner-lighthouse-coredns",
        ],
        kinds: &[ResourceKind::Deployment, ResourceKind::ConfigMap],
    },
    Module {
        name: MODULE_BROKER,
        namespace: DEFAULT_BROKER_NAMESPACE,
        selectors: &[],
        kinds: &[
            ResourceKind::Broker,
            ResourceKind::ConfigMap,
            ResourceKind::Secret,
        ],
    },
    Module {
        name: MODULE_OPERATOR,
        namespace: OPERATOR_NAMESPACE,
        selectors: &["name=submariner-operator"],
        kinds: &[ResourceKind::Deployment],
    },
];

/// Make a name safe to use as a single path component
pub(crate) fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn write_file(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(sanitize(file_name));
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

async fn gather_logs<S: ClusterSource + ?Sized>(
    source: &S,
    module: &Module,
    dir: &Path,
    redactor: &Redactor,
    reporter: &dyn Reporter,
) -> Result<usize> {
    let mut written = 0;
    for selector in module.selectors {
        for pod in source.pods(module.namespace, selector).await? {
            for container in &pod.containers {
                match source.logs(module.namespace, &pod.name, container).await {
                    Ok(log) => {
                        let file = format!("{}_{}.log", pod.name, container);
                        write_file(dir, &file, &redactor.redact_log(&log)).await?;
                        written += 1;
                    }
                    Err(e) => {
                        warn!(pod = %pod.name, container = %container, error = %e, "log unavailable");
                        reporter.warning(&format!(
                            "No log for {}/{}: {}",
                            pod.name, container, e
                        ));
                    }
                }
            }
        }
    }
    Ok(written)
}

async fn gather_resources<S: ClusterSource + ?Sized>(
    source: &S,
    module: &Module,
    dir: &Path,
    redactor: &Redactor,
) -> Result<usize> {
    let mut written = 0;
    for kind in module.kinds {
        for mut item in source.resources(module.namespace, *kind).await? {
            if let Some(metadata) = item.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.remove("managedFields");
            }
            redactor.redact_resource(kind.as_str(), &mut item);

            let name = item
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or("unnamed")
                .to_string();
            let yaml = serde_yaml::to_string(&item)
                .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))?;
            let file = format!("{}_{}.yaml", kind.as_str().to_ascii_lowercase(), name);
            write_file(dir, &file, &yaml).await?;
            written += 1;
        }
    }
    Ok(written)
}

/// Gather the requested data for `cluster` from `source`
///
/// Every requested module and type is attempted; failures are collected
/// and reported together once the rest has been written.
pub async fn collect_from<S: ClusterSource + ?Sized>(
    source: &S,
    cluster: &str,
    options: &GatherOptions,
    reporter: &dyn Reporter,
) -> Result<()> {
    let redactor = Redactor::new(options.include_sensitive_data)?;
    let cluster_dir = options.directory.join(sanitize(cluster));
    let mut failures = Vec::new();

    for module in MODULES.iter().filter(|m| options.wants_module(m.name)) {
        let dir = cluster_dir.join(module.name);

        if options.wants_type(TYPE_LOGS) && !module.selectors.is_empty() {
            reporter.start(&format!("Gathering {} logs", module.name));
            match gather_logs(source, module, &dir, &redactor, reporter).await {
                Ok(count) => reporter.success(&format!("Gathered {} {} log(s)", count, module.name)),
                Err(e) => {
                    reporter.failure(&format!("Failed to gather {} logs: {}", module.name, e));
                    failures.push(format!("{} logs: {}", module.name, e));
                }
            }
        }

        if options.wants_type(TYPE_RESOURCES) {
            reporter.start(&format!("Gathering {} resources", module.name));
            match gather_resources(source, module, &dir, &redactor).await {
                Ok(count) => {
                    reporter.success(&format!("Gathered {} {} resource(s)", count, module.name))
                }
                Err(e) => {
                    reporter.failure(&format!(
                        "Failed to gather {} resources: {}",
                        module.name, e
                    ));
                    failures.push(format!("{} resources: {}", module.name, e));
                }
            }
        }
    }

    if failures.is_empty() {
        debug!(cluster, dir = %cluster_dir.display(), "gather complete");
        Ok(())
    } else {
        Err(Error::internal_with_context("gather", failures.join("; ")))
    }
}

/// [`ClusterSource`] reading from a live cluster
pub struct KubeSource {
    client: Client,
}

impl KubeSource {
    /// Read through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list<K>(&self, namespace: &str) -> Result<Vec<Value>>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).to_string();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let items = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            // The kind is not installed on this cluster
            Err(kube::Error::Api(ae)) if ae.code == 404 => Vec::new(),
            Err(e) => return Err(Error::from_kube(format!("{}/{}", namespace, kind), e)),
        };

        items
            .iter()
            .map(|item| {
                serde_json::to_value(item)
                    .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ClusterSource for KubeSource {
    async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::from_kube(format!("{}/pods", namespace), e))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                let containers = pod
                    .spec
                    .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default();
                Some(PodInfo { name, containers })
            })
            .collect())
    }

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        api.logs(pod, &params)
            .await
            .map_err(|e| Error::from_kube(format!("{}/{}", pod, container), e))
    }

    async fn resources(&self, namespace: &str, kind: ResourceKind) -> Result<Vec<Value>> {
        match kind {
            ResourceKind::Deployment => self.list::<Deployment>(namespace).await,
            ResourceKind::DaemonSet => self.list::<DaemonSet>(namespace).await,
            ResourceKind::ConfigMap => self.list::<ConfigMap>(namespace).await,
            ResourceKind::Secret => self.list::<Secret>(namespace).await,
            ResourceKind::Broker => self.list::<Broker>(namespace).await,
        }
    }
}

/// Collector for connected clusters
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeCollector;

#[async_trait]
impl Collector<ClusterContext> for KubeCollector {
    async fn collect(
        &self,
        cluster: &ClusterContext,
        options: &GatherOptions,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let source = KubeSource::new(cluster.client.clone());
        collect_from(&source, cluster.name(), options, reporter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use subctl_common::reporter::TracingReporter;

    struct FakeSource {
        fail_resources: bool,
    }

    #[async_trait]
    impl ClusterSource for FakeSource {
        async fn pods(&self, _namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
            Ok(match selector {
                "app=submariner-gateway" => vec![PodInfo {
                    name: "submariner-gateway-abcde".to_string(),
                    containers: vec!["submariner-gateway".to_string()],
                }],
                "name=submariner-operator" => vec![PodInfo {
                    name: "submariner-operator-xyz".to_string(),
                    containers: vec!["submariner-operator".to_string(), "sidecar".to_string()],
                }],
                _ => Vec::new(),
            })
        }

        async fn logs(&self, _namespace: &str, _pod: &str, container: &str) -> Result<String> {
            match container {
                "sidecar" => Err(Error::internal("container is waiting")),
                _ => Ok("started with psk=hunter2\n".to_string()),
            }
        }

        async fn resources(&self, _namespace: &str, kind: ResourceKind) -> Result<Vec<Value>> {
            if self.fail_resources {
                return Err(Error::internal("apiserver unavailable"));
            }
            Ok(match kind {
                ResourceKind::Secret => vec![json!({
                    "kind": "Secret",
                    "metadata": { "name": "broker-secret", "managedFields": [ {} ] },
                    "data": { "token": "dG9rZW4tdmFsdWU=" }
                })],
                ResourceKind::Deployment => vec![json!({
                    "kind": "Deployment",
                    "metadata": { "name": "submariner-operator" }
                })],
                _ => Vec::new(),
            })
        }
    }

    fn options(dir: &Path, types: &[&str], modules: &[&str], include: bool) -> GatherOptions {
        GatherOptions {
            types: types.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            modules: modules.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            directory: dir.to_path_buf(),
            include_sensitive_data: include,
        }
    }

    #[test]
    fn sanitize_keeps_path_components_flat() {
        assert_eq!(
            sanitize("arn:aws:eks:us-east-1:1234:cluster/east"),
            "arn_aws_eks_us-east-1_1234_cluster_east"
        );
        assert_eq!(sanitize("kind-cluster1"), "kind-cluster1");
    }

    #[tokio::test]
    async fn logs_land_in_cluster_module_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = options(tmp.path(), &["logs"], &["connectivity", "operator"], false);

        collect_from(&FakeSource { fail_resources: false }, "east", &opts, &TracingReporter)
            .await
            .unwrap();

        let gateway = tmp
            .path()
            .join("east/connectivity/submariner-gateway-abcde_submariner-gateway.log");
        let log = std::fs::read_to_string(gateway).unwrap();
        assert!(log.contains("psk=REDACTED"));
        assert!(!log.contains("hunter2"));

        assert!(tmp
            .path()
            .join("east/operator/submariner-operator-xyz_submariner-operator.log")
            .exists());
        // a container without logs is a warning, not a failure
        assert!(!tmp
            .path()
            .join("east/operator/submariner-operator-xyz_sidecar.log")
            .exists());
        assert!(!tmp.path().join("east/broker").exists());
    }

    #[tokio::test]
    async fn secrets_are_redacted_and_managed_fields_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = options(tmp.path(), &["resources"], &["broker"], false);

        collect_from(&FakeSource { fail_resources: false }, "east", &opts, &TracingReporter)
            .await
            .unwrap();

        let yaml = std::fs::read_to_string(tmp.path().join("east/broker/secret_broker-secret.yaml"))
            .unwrap();
        assert!(yaml.contains("REDACTED"));
        assert!(!yaml.contains("dG9rZW4tdmFsdWU="));
        assert!(!yaml.contains("managedFields"));
    }

    #[tokio::test]
    async fn included_sensitive_data_is_written_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = options(tmp.path(), &["logs", "resources"], &["broker", "connectivity"], true);

        collect_from(&FakeSource { fail_resources: false }, "east", &opts, &TracingReporter)
            .await
            .unwrap();

        let yaml = std::fs::read_to_string(tmp.path().join("east/broker/secret_broker-secret.yaml"))
            .unwrap();
        assert!(yaml.contains("dG9rZW4tdmFsdWU="));
        let log = std::fs::read_to_string(
            tmp.path()
                .join("east/connectivity/submariner-gateway-abcde_submariner-gateway.log"),
        )
        .unwrap();
        assert!(log.contains("psk=hunter2"));
    }

    #[tokio::test]
    async fn resource_failure_fails_cluster_but_logs_are_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = options(tmp.path(), &["logs", "resources"], &["operator"], false);

        let err = collect_from(&FakeSource { fail_resources: true }, "east", &opts, &TracingReporter)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("operator resources"));
        assert!(tmp
            .path()
            .join("east/operator/submariner-operator-xyz_submariner-operator.log")
            .exists());
    }
}
