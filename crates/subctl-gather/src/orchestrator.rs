//! Fan-out of one gather run across clusters

use std::collections::BTreeMap;
use std::sync::Arc;

use subctl_common::kube_utils::ClusterHandle;
use subctl_common::reporter::{Reporter, ScopedReporter};
use subctl_common::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collector::{sanitize, Collector};
use crate::options::GatherOptions;

/// Result of a gather run in which every cluster succeeded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatherSummary {
    /// Clusters whose data was written, in input order
    pub clusters: Vec<String>,
}

/// Collect data from every cluster concurrently
///
/// Options are validated before any task starts, and clusters whose output
/// directories would coincide are rejected. Each cluster runs in its
/// own task with its own scoped reporter; a failing or panicking cluster does
/// not stop the others. If any cluster failed, the returned
/// [`Error::ClusterFailures`] lists exactly those clusters.
pub async fn gather_all<C, K>(
    clusters: Vec<C>,
    collector: Arc<K>,
    options: Arc<GatherOptions>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) -> Result<GatherSummary>
where
    C: ClusterHandle + 'static,
    K: Collector<C> + 'static,
{
    options.validate()?;
    check_distinct_directories(clusters.iter().map(|c| c.name()))?;

    info!(
        clusters = clusters.len(),
        directory = %options.directory.display(),
        "gathering diagnostics"
    );

    let mut tasks = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let name = cluster.name().to_string();
        let collector = Arc::clone(&collector);
        let options = Arc::clone(&options);
        let scoped = ScopedReporter::new(name.clone(), Arc::clone(&reporter));
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::cancelled(format!("gather on {}", cluster.name()))),
                result = collector.collect(&cluster, &options, &scoped) => result,
            }
        });
        tasks.push((name, handle));
    }

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (name, handle) in tasks {
        match handle.await {
            Ok(Ok(())) => succeeded.push(name),
            Ok(Err(e)) => {
                warn!(cluster = %name, error = %e, "gather failed");
                failed.push((name, e.to_string()));
            }
            Err(join_error) => {
                warn!(cluster = %name, error = %join_error, "gather task aborted");
                failed.push((name, format!("collection task aborted: {}", join_error)));
            }
        }
    }

    if failed.is_empty() {
        Ok(GatherSummary {
            clusters: succeeded,
        })
    } else {
        Err(Error::ClusterFailures { failed })
    }
}

/// Fail if two cluster names map to the same output subdirectory
fn check_distinct_directories<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for name in names {
        let dir = sanitize(name);
        if let Some(previous) = seen.insert(dir.clone(), name) {
            return Err(Error::invalid_configuration(format!(
                "clusters {:?} and {:?} would both be gathered into directory {:?}",
                previous, name, dir
            )));
        }
    }
    Ok(())
}
