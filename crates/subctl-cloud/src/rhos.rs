//! Gateways on OpenShift running on Red Hat OpenStack
//!
//! Before anything touches the cluster the infra ID, region and cloud entry
//! are resolved from flags, the OCP installer metadata file and `clouds.yaml`.
//! Dedicated gateways are machines from a `MachineSet` managed through the
//! dynamic API; otherwise existing workers are labelled as on any cluster.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use serde::Deserialize;
use serde_json::json;
use subctl_common::reporter::Reporter;
use subctl_common::{Error, Result, FIELD_MANAGER};
use tracing::{debug, info};

use crate::generic::{GenericGatewayDeployer, GATEWAY_LABEL};
use crate::{GatewayDeployInput, GatewayDeployer};

/// Cloud entry used when none is given
pub const DEFAULT_CLOUD_ENTRY: &str = "openstack";

/// Flavor for dedicated gateway machines
pub const DEFAULT_GATEWAY_INSTANCE_TYPE: &str = "PnTAE.CPU_4_Memory_8192_Disk_50";

/// Namespace holding OpenShift machine objects
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

const CLOUDS_SECRET: &str = "openstack-cloud-credentials";
const CLOUDS_YAML: &str = "clouds.yaml";

/// RHOS settings as given on the command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RhosConfig {
    /// Provision dedicated gateway machines instead of labelling workers
    pub dedicated_gateway: bool,
    /// Cluster infra ID
    pub infra_id: Option<String>,
    /// OpenStack region
    pub region: Option<String>,
    /// OpenStack project ID
    pub project_id: Option<String>,
    /// OCP installer `metadata.json`; overrides infra and project IDs
    pub ocp_metadata_file: Option<PathBuf>,
    /// Entry in `clouds.yaml`
    pub cloud_entry: Option<String>,
    /// Flavor for dedicated gateways
    pub gateway_instance_type: String,
}

impl Default for RhosConfig {
    fn default() -> Self {
        Self {
            dedicated_gateway: false,
            infra_id: None,
            region: None,
            project_id: None,
            ocp_metadata_file: None,
            cloud_entry: None,
            gateway_instance_type: DEFAULT_GATEWAY_INSTANCE_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RhosMetadata {
    #[serde(rename = "projectID", default)]
    project_id: String,
}

/// The parts of the installer metadata file subctl reads
#[derive(Debug, Default, Deserialize)]
pub struct OcpMetadata {
    /// Cluster infra ID
    #[serde(rename = "infraID", default)]
    pub infra_id: String,
    #[serde(default)]
    rhos: RhosMetadata,
}

impl OcpMetadata {
    /// OpenStack project ID, empty if absent
    pub fn project_id(&self) -> &str {
        &self.rhos.project_id
    }
}

/// Read the OCP installer metadata file
pub fn read_metadata_file(path: &Path) -> Result<OcpMetadata> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_configuration(format!(
            "failed to read OCP metadata file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::invalid_configuration(format!(
            "failed to parse OCP metadata file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Authentication fields of a `clouds.yaml` entry; secrets are not kept
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CloudAuth {
    /// Identity endpoint
    pub auth_url: Option<String>,
    /// Project ID
    pub project_id: Option<String>,
    /// Project name
    pub project_name: Option<String>,
}

/// One entry of `clouds.yaml`
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CloudEntry {
    /// Authentication settings
    #[serde(default)]
    pub auth: CloudAuth,
    /// Region configured for the entry
    pub region_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: BTreeMap<String, CloudEntry>,
}

/// Where `clouds.yaml` is looked for, highest priority first
pub fn clouds_yaml_search_path(
    env_file: Option<PathBuf>,
    current_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(4);
    paths.extend(env_file);
    paths.extend(current_dir.map(|d| d.join(CLOUDS_YAML)));
    paths.extend(home_dir.map(|h| h.join(".config/openstack").join(CLOUDS_YAML)));
    paths.push(PathBuf::from("/etc/openstack").join(CLOUDS_YAML));
    paths
}

/// Search path built from `OS_CLIENT_CONFIG_FILE`, the working directory and `$HOME`
pub fn default_clouds_yaml_search_path() -> Vec<PathBuf> {
    clouds_yaml_search_path(
        std::env::var_os("OS_CLIENT_CONFIG_FILE").map(PathBuf::from),
        std::env::current_dir().ok(),
        dirs::home_dir(),
    )
}

/// Load the named entry from the first `clouds.yaml` on `search_path`
pub fn load_cloud_entry(search_path: &[PathBuf], name: &str) -> Result<(PathBuf, CloudEntry)> {
    let path = search_path.iter().find(|p| p.is_file()).ok_or_else(|| {
        Error::invalid_configuration(format!(
            "no {} found (searched {})",
            CLOUDS_YAML,
            search_path
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    let raw = std::fs::read_to_string(path)?;
    let file: CloudsFile = serde_yaml::from_str(&raw).map_err(|e| {
        Error::invalid_configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;

    let entry = file.clouds.get(name).cloned().ok_or_else(|| {
        Error::invalid_configuration(format!(
            "cloud {:?} not found in {}",
            name,
            path.display()
        ))
    })?;
    if entry.auth.auth_url.is_none() {
        return Err(Error::invalid_configuration(format!(
            "cloud {:?} in {} has no auth.auth_url",
            name,
            path.display()
        )));
    }
    Ok((path.clone(), entry))
}

/// Fully resolved RHOS settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRhos {
    /// Cluster infra ID
    pub infra_id: String,
    /// OpenStack region
    pub region: String,
    /// OpenStack project ID, if known
    pub project_id: Option<String>,
    /// Entry in `clouds.yaml`
    pub cloud_entry: String,
    /// Provision dedicated gateway machines
    pub dedicated_gateway: bool,
    /// Flavor for dedicated gateways
    pub gateway_instance_type: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve `config` using the default `clouds.yaml` search path
pub fn resolve(config: &RhosConfig, reporter: &dyn Reporter) -> Result<ResolvedRhos> {
    resolve_with(config, &default_clouds_yaml_search_path(), reporter)
}

/// Resolve `config` against an explicit `clouds.yaml` search path
///
/// The metadata file wins over flags for infra and project IDs. Project and
/// region fall back to the cloud entry. A missing infra ID or region is an
/// `InvalidConfiguration` error.
pub fn resolve_with(
    config: &RhosConfig,
    search_path: &[PathBuf],
    reporter: &dyn Reporter,
) -> Result<ResolvedRhos> {
    let mut infra_id = non_empty(config.infra_id.clone());
    let mut project_id = non_empty(config.project_id.clone());

    if let Some(path) = &config.ocp_metadata_file {
        let metadata = match read_metadata_file(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                reporter.failure(&format!(
                    "Failed to read RHOS information from OCP metadata file {}",
                    path.display()
                ));
                return Err(e);
            }
        };
        infra_id = non_empty(Some(metadata.infra_id.clone()));
        project_id = non_empty(Some(metadata.project_id().to_string()));
        reporter.success(&format!(
            "Obtained infra ID {:?} and project ID {:?} from OCP metadata file {}",
            infra_id.as_deref().unwrap_or_default(),
            project_id.as_deref().unwrap_or_default(),
            path.display()
        ));
    }

    reporter.start("Retrieving RHOS credentials from your RHOS configuration");
    let cloud_entry = non_empty(config.cloud_entry.clone())
        .unwrap_or_else(|| DEFAULT_CLOUD_ENTRY.to_string());
    let (path, entry) = match load_cloud_entry(search_path, &cloud_entry) {
        Ok(found) => found,
        Err(e) => {
            reporter.failure(&format!("Failed to load RHOS credentials: {}", e));
            return Err(e);
        }
    };
    debug!(cloud = %cloud_entry, path = %path.display(), "loaded cloud entry");
    reporter.end();

    let region = non_empty(config.region.clone()).or_else(|| non_empty(entry.region_name.clone()));
    let project_id = project_id.or_else(|| non_empty(entry.auth.project_id.clone()));

    let infra_id = infra_id.ok_or_else(|| {
        Error::invalid_configuration("an infra ID is required (--infra-id or --ocp-metadata)")
    })?;
    let region = region.ok_or_else(|| {
        Error::invalid_configuration(
            "a region is required (--region, OS_REGION_NAME or region_name in clouds.yaml)",
        )
    })?;

    info!(infra_id = %infra_id, region = %region, cloud = %cloud_entry, "resolved RHOS configuration");
    Ok(ResolvedRhos {
        infra_id,
        region,
        project_id,
        cloud_entry,
        dedicated_gateway: config.dedicated_gateway,
        gateway_instance_type: config.gateway_instance_type.clone(),
    })
}

fn machine_set_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "machine.openshift.io",
        "v1beta1",
        "MachineSet",
    ))
}

/// Name of the gateway `MachineSet` for a cluster
pub fn gateway_machine_set_name(infra_id: &str) -> String {
    format!("{}-submariner-gw", infra_id)
}

/// `MachineSet` producing `replicas` dedicated gateway machines
pub fn gateway_machine_set(rhos: &ResolvedRhos, replicas: usize) -> DynamicObject {
    let infra_id = rhos.infra_id.as_str();
    let name = gateway_machine_set_name(infra_id);
    let cluster_label = "machine.openshift.io/cluster-api-cluster";
    let machineset_label = "machine.openshift.io/cluster-api-machineset";

    let mut object = DynamicObject::new(&name, &machine_set_resource())
        .within(MACHINE_API_NAMESPACE)
        .data(json!({
            "spec": {
                "replicas": replicas,
                "selector": {
                    "matchLabels": {
                        cluster_label: infra_id,
                        machineset_label: name,
                    }
                },
                "template": {
                    "metadata": {
                        "labels": {
                            cluster_label: infra_id,
                            "machine.openshift.io/cluster-api-machine-role": "worker",
                            "machine.openshift.io/cluster-api-machine-type": "worker",
                            machineset_label: name,
                        }
                    },
                    "spec": {
                        "metadata": {
                            "labels": {
                                GATEWAY_LABEL: "true",
                                "node-role.kubernetes.io/worker": "",
                            }
                        },
                        "providerSpec": {
                            "value": {
                                "apiVersion": "openstackproviderconfig.openshift.io/v1alpha1",
                                "kind": "OpenstackProviderSpec",
                                "cloudName": rhos.cloud_entry,
                                "cloudsSecret": {
                                    "name": CLOUDS_SECRET,
                                    "namespace": MACHINE_API_NAMESPACE,
                                },
                                "flavor": rhos.gateway_instance_type,
                                "image": format!("{}-rhcos", infra_id),
                                "networks": [{
                                    "filter": {},
                                    "subnets": [{
                                        "filter": {
                                            "name": format!("{}-nodes", infra_id),
                                            "tags": format!("openshiftClusterID={}", infra_id),
                                        }
                                    }]
                                }],
                                "securityGroups": [
                                    { "name": format!("{}-worker", infra_id) },
                                    { "name": format!("{}-submariner-gw-sg", infra_id) },
                                ],
                                "serverMetadata": {
                                    "Name": format!("{}-worker", infra_id),
                                    "openshiftClusterID": infra_id,
                                },
                                "tags": [format!("openshiftClusterID={}", infra_id)],
                                "trunk": true,
                                "userDataSecret": { "name": "worker-user-data" },
                            }
                        }
                    }
                }
            }
        }));

    object.metadata.labels = Some(BTreeMap::from([(
        cluster_label.to_string(),
        infra_id.to_string(),
    )]));
    object
}

/// Gateway deployer for OpenShift on OpenStack
pub struct RhosGatewayDeployer {
    client: Client,
    rhos: ResolvedRhos,
    workers: GenericGatewayDeployer,
}

impl RhosGatewayDeployer {
    /// Deploy through `client` with resolved settings
    pub fn new(client: Client, rhos: ResolvedRhos) -> Self {
        Self {
            workers: GenericGatewayDeployer::new(client.clone()),
            client,
            rhos,
        }
    }

    fn machine_sets(&self) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            MACHINE_API_NAMESPACE,
            &machine_set_resource(),
        )
    }
}

#[async_trait]
impl GatewayDeployer for RhosGatewayDeployer {
    async fn deploy(&self, input: &GatewayDeployInput, reporter: &dyn Reporter) -> Result<()> {
        if !self.rhos.dedicated_gateway {
            return self.workers.deploy(input, reporter).await;
        }

        let machine_set = gateway_machine_set(&self.rhos, input.gateways);
        let name = gateway_machine_set_name(&self.rhos.infra_id);
        reporter.start(&format!(
            "Deploying {} dedicated gateway(s) through MachineSet {}",
            input.gateways, name
        ));

        let applied = self
            .machine_sets()
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&machine_set),
            )
            .await
            .map_err(|e| Error::from_kube(format!("MachineSet/{}", name), e));
        if let Err(e) = applied {
            reporter.failure(&format!("Failed to deploy MachineSet {}: {}", name, e));
            return Err(e);
        }

        reporter.success(&format!("MachineSet {} deployed", name));
        Ok(())
    }

    async fn cleanup(&self, reporter: &dyn Reporter) -> Result<()> {
        let name = gateway_machine_set_name(&self.rhos.infra_id);
        reporter.start(&format!("Removing gateway MachineSet {}", name));
        match self
            .machine_sets()
            .delete(&name, &DeleteParams::default())
            .await
        {
            Ok(_) => reporter.success(&format!("MachineSet {} deleted", name)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                reporter.success(&format!("MachineSet {} not present", name))
            }
            Err(e) => {
                let e = Error::from_kube(format!("MachineSet/{}", name), e);
                reporter.failure(&format!("Failed to delete MachineSet {}: {}", name, e));
                return Err(e);
            }
        }

        self.workers.cleanup(reporter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use subctl_common::reporter::TracingReporter;

    const CLOUDS: &str = r#"
clouds:
  openstack:
    auth:
      auth_url: https://keystone.example:5000/v3
      username: admin
      password: hunter2
      project_id: p-123
    region_name: regionOne
  bare:
    auth:
      auth_url: https://keystone.example:5000/v3
  broken:
    region_name: regionTwo
"#;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn config() -> RhosConfig {
        RhosConfig {
            infra_id: Some("ocp-x7k2p".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn search_path_order() {
        let paths = clouds_yaml_search_path(
            Some(PathBuf::from("/tmp/custom.yaml")),
            Some(PathBuf::from("/work")),
            Some(PathBuf::from("/home/me")),
        );
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/tmp/custom.yaml"),
                PathBuf::from("/work/clouds.yaml"),
                PathBuf::from("/home/me/.config/openstack/clouds.yaml"),
                PathBuf::from("/etc/openstack/clouds.yaml"),
            ]
        );
    }

    #[test]
    fn first_existing_file_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let missing = first.path().join("nope.yaml");
        let found = write(second.path(), "clouds.yaml", CLOUDS);

        let (path, entry) = load_cloud_entry(&[missing, found.clone()], "openstack").unwrap();
        assert_eq!(path, found);
        assert_eq!(entry.region_name.as_deref(), Some("regionOne"));
        assert_eq!(entry.auth.project_id.as_deref(), Some("p-123"));
    }

    #[test]
    fn password_is_not_retained() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clouds.yaml", CLOUDS);
        let (_, entry) = load_cloud_entry(&[path], "openstack").unwrap();
        assert!(!format!("{:?}", entry).contains("hunter2"));
    }

    #[test]
    fn unknown_or_incomplete_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clouds.yaml", CLOUDS);

        let err = load_cloud_entry(&[path.clone()], "devstack").unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("devstack"));

        let err = load_cloud_entry(&[path], "broken").unwrap_err();
        assert!(err.to_string().contains("auth_url"));

        let err = load_cloud_entry(&[dir.path().join("absent.yaml")], "openstack").unwrap_err();
        assert!(err.to_string().contains("no clouds.yaml found"));
    }

    #[test]
    fn defaults_to_openstack_entry_and_its_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clouds.yaml", CLOUDS);

        let resolved = resolve_with(&config(), &[path], &TracingReporter).unwrap();
        assert_eq!(resolved.cloud_entry, "openstack");
        assert_eq!(resolved.region, "regionOne");
        assert_eq!(resolved.project_id.as_deref(), Some("p-123"));
        assert_eq!(resolved.gateway_instance_type, DEFAULT_GATEWAY_INSTANCE_TYPE);
    }

    /// Story: the installer metadata file supplies infra and project IDs
    #[test]
    fn metadata_file_overrides_flags() {
        let dir = tempfile::tempdir().unwrap();
        let clouds = write(dir.path(), "clouds.yaml", CLOUDS);
        let metadata = write(
            dir.path(),
            "metadata.json",
            r#"{"clusterName":"ocp","infraID":"ocp-abcde","rhos":{"projectID":"p-999"}}"#,
        );

        let config = RhosConfig {
            ocp_metadata_file: Some(metadata),
            region: Some("regionThree".to_string()),
            ..config()
        };
        let resolved = resolve_with(&config, &[clouds], &TracingReporter).unwrap();
        assert_eq!(resolved.infra_id, "ocp-abcde");
        assert_eq!(resolved.project_id.as_deref(), Some("p-999"));
        assert_eq!(resolved.region, "regionThree");
    }

    #[test]
    fn missing_infra_id_or_region_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let clouds = write(dir.path(), "clouds.yaml", CLOUDS);

        let no_infra = RhosConfig::default();
        let err = resolve_with(&no_infra, &[clouds.clone()], &TracingReporter).unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("infra ID"));

        let no_region = RhosConfig {
            cloud_entry: Some("bare".to_string()),
            ..config()
        };
        let err = resolve_with(&no_region, &[clouds], &TracingReporter).unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn unreadable_metadata_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let clouds = write(dir.path(), "clouds.yaml", CLOUDS);
        let metadata = write(dir.path(), "metadata.json", "not json");

        let config = RhosConfig {
            ocp_metadata_file: Some(metadata),
            ..config()
        };
        let err = resolve_with(&config, &[clouds], &TracingReporter).unwrap_err();
        assert!(err.is_invalid_configuration());
    }

    #[test]
    fn machine_set_targets_gateway_nodes() {
        let resolved = ResolvedRhos {
            infra_id: "ocp-x7k2p".to_string(),
            region: "regionOne".to_string(),
            project_id: None,
            cloud_entry: "openstack".to_string(),
            dedicated_gateway: true,
            gateway_instance_type: "m1.large".to_string(),
        };
        let ms = gateway_machine_set(&resolved, 2);

        assert_eq!(ms.metadata.name.as_deref(), Some("ocp-x7k2p-submariner-gw"));
        assert_eq!(ms.metadata.namespace.as_deref(), Some(MACHINE_API_NAMESPACE));
        let types = ms.types.as_ref().unwrap();
        assert_eq!(types.api_version, "machine.openshift.io/v1beta1");
        assert_eq!(types.kind, "MachineSet");

        let spec = &ms.data["spec"];
        assert_eq!(spec["replicas"], 2);
        assert_eq!(
            spec["template"]["spec"]["metadata"]["labels"][GATEWAY_LABEL],
            "true"
        );
        let provider = &spec["template"]["spec"]["providerSpec"]["value"];
        assert_eq!(provider["flavor"], "m1.large");
        assert_eq!(provider["cloudName"], "openstack");
        assert_eq!(provider["image"], "ocp-x7k2p-rhcos");
        assert_eq!(
            spec["selector"]["matchLabels"]["machine.openshift.io/cluster-api-machineset"],
            "ocp-x7k2p-submariner-gw"
        );
    }
}
