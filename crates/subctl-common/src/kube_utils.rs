//! Cluster connection and server-side apply helpers
//!
//! Every multi-cluster operation starts by resolving kubeconfig contexts into
//! [`ClusterContext`]s. Resolution validates all requested context names up
//! front so a typo fails before any cluster is touched.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result, FIELD_MANAGER};

/// Default connect timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything an operation can run against, identified by name
pub trait ClusterHandle: Send + Sync {
    /// Name used in reports, output paths and failure aggregation
    fn name(&self) -> &str;
}

/// A connected cluster, named after its kubeconfig context
#[derive(Clone)]
pub struct ClusterContext {
    /// Context name
    pub name: String,
    /// Default namespace of the context
    pub namespace: String,
    /// Client bound to the context
    pub client: Client,
}

impl ClusterHandle for ClusterContext {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Read a kubeconfig from `path`, or from `KUBECONFIG` / `~/.kube/config`
pub fn load_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig> {
    let loaded = match path {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    };

    loaded.map_err(|e| {
        Error::invalid_configuration(format!("failed to read kubeconfig: {}", e))
    })
}

/// Pick the contexts to operate on
///
/// An empty request means the current context. Every requested name must
/// exist in the kubeconfig; duplicates are collapsed keeping first occurrence.
pub fn select_contexts(kubeconfig: &Kubeconfig, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return match kubeconfig.current_context.as_deref() {
            Some(current) if !current.is_empty() => Ok(vec![current.to_string()]),
            _ => Err(Error::invalid_configuration(
                "no context requested and kubeconfig has no current context",
            )),
        };
    }

    let unknown: Vec<&str> = requested
        .iter()
        .filter(|name| !kubeconfig.contexts.iter().any(|c| &c.name == *name))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(Error::invalid_configuration(format!(
            "unknown kubeconfig context(s): {}",
            unknown.join(", ")
        )));
    }

    let mut selected: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    Ok(selected)
}

/// Load the client config for one context with explicit timeouts
pub async fn config_for_context(
    kubeconfig: Kubeconfig,
    context: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Config> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| {
            Error::invalid_configuration(format!(
                "failed to load context {}: {}",
                context, e
            ))
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Ok(config)
}

/// Resolve the requested contexts into connected clusters
pub async fn resolve_cluster_contexts(
    kubeconfig: Option<&Path>,
    contexts: &[String],
) -> Result<Vec<ClusterContext>> {
    let kubeconfig = load_kubeconfig(kubeconfig)?;
    let selected = select_contexts(&kubeconfig, contexts)?;

    let mut clusters = Vec::with_capacity(selected.len());
    for name in selected {
        debug!(context = %name, "creating client");
        let config = config_for_context(
            kubeconfig.clone(),
            &name,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
        )
        .await?;
        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config).map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to create client for {}: {}", name, e),
            )
        })?;
        clusters.push(ClusterContext {
            name,
            namespace,
            client,
        });
    }
    Ok(clusters)
}

/// What an apply did to the stored object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist
    Created,
    /// The object existed and its stored state changed
    Updated,
    /// The object already matched
    Unchanged,
}

impl ApplyOutcome {
    /// Classify an apply from the resource versions seen before and after it
    ///
    /// The API server leaves `resourceVersion` untouched for no-op applies.
    pub fn from_versions(before: Option<Option<&str>>, after: Option<&str>) -> Self {
        match before {
            None => ApplyOutcome::Created,
            Some(previous) if previous.is_some() && previous == after => ApplyOutcome::Unchanged,
            Some(_) => ApplyOutcome::Updated,
        }
    }

    /// Whether the apply mutated the cluster
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }

    /// Merge the outcomes of applying several objects as one unit
    pub fn combine(outcomes: impl IntoIterator<Item = ApplyOutcome>) -> Self {
        let mut created = false;
        let mut changed = false;
        let mut any_existing = false;
        for outcome in outcomes {
            match outcome {
                ApplyOutcome::Created => created = true,
                ApplyOutcome::Updated => changed = true,
                ApplyOutcome::Unchanged => any_existing = true,
            }
        }
        match (created, changed, any_existing) {
            (true, false, false) => ApplyOutcome::Created,
            (false, false, _) => ApplyOutcome::Unchanged,
            _ => ApplyOutcome::Updated,
        }
    }

    /// Lower-case label for reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side apply `resource` through `api`, reporting what changed
///
/// Ownership conflicts are forced so subctl can take over fields it wrote
/// with an older field manager.
pub async fn apply_with<K>(api: &Api<K>, resource: &K) -> Result<ApplyOutcome>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let name = resource.meta().name.clone().ok_or_else(|| {
        Error::internal_with_context("apply", format!("{} without metadata.name", kind))
    })?;
    let label = format!("{}/{}", kind, name);

    let before = api
        .get_opt(&name)
        .await
        .map_err(|e| Error::from_kube(&label, e))?
        .map(|existing| existing.meta().resource_version.clone());

    let applied = api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .await
        .map_err(|e| Error::from_kube(&label, e))?;

    let outcome = ApplyOutcome::from_versions(
        before.as_ref().map(|v| v.as_deref()),
        applied.meta().resource_version.as_deref(),
    );
    debug!(resource = %label, ?outcome, "applied");
    Ok(outcome)
}

/// Ensure a namespace exists (idempotent)
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<ApplyOutcome> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    apply_with(&api, &namespace).await
}
