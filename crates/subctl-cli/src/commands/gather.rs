//! Gather command: collect diagnostics from one or more clusters

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use subctl_common::reporter::Reporter;
use subctl_gather::{gather_all, GatherOptions, KubeCollector};
use tokio_util::sync::CancellationToken;

use super::ClusterArgs;
use crate::reporter::CliReporter;
use crate::Result;

/// Gather logs and resources for troubleshooting
#[derive(Args, Debug, Clone)]
pub struct GatherArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Data types to gather: logs, resources (comma-separated, default all)
    #[arg(long = "type", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Modules to gather: connectivity, service-discovery, broker, operator
    /// (comma-separated, default all)
    #[arg(long = "module", value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Output directory (default submariner-<UTC timestamp>)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Keep credentials and tokens in the output
    #[arg(long)]
    pub include_sensitive_data: bool,
}

impl GatherArgs {
    /// Build validated gather options
    pub fn gather_options(&self) -> Result<GatherOptions> {
        Ok(GatherOptions::new(
            &self.types,
            &self.modules,
            self.dir.clone(),
            self.include_sensitive_data,
        )?)
    }
}

pub async fn run(args: GatherArgs, cancel: CancellationToken) -> Result<()> {
    let options = Arc::new(args.gather_options()?);
    let clusters = args.cluster.resolve().await?;

    let reporter: Arc<dyn Reporter> = Arc::new(CliReporter::stdout());
    let summary = gather_all(
        clusters,
        Arc::new(KubeCollector),
        Arc::clone(&options),
        reporter,
        cancel,
    )
    .await?;

    println!(
        "Gathered data from {} cluster(s) into {}",
        summary.clusters.len(),
        options.directory.display()
    );
    Ok(())
}
