//! CLI commands

use std::path::PathBuf;

use clap::Args;
use subctl_common::kube_utils::{resolve_cluster_contexts, ClusterContext};

use crate::{config, Error, Result};

pub mod cloud;
pub mod deploy_broker;
pub mod gather;

/// Kubeconfig and context selection shared by every command
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterArgs {
    /// Kubeconfig file (defaults to SUBCTL_KUBECONFIG, then KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context(s) to use, comma-separated (defaults to the current context)
    #[arg(long = "context", alias = "contexts", value_delimiter = ',')]
    pub contexts: Vec<String>,
}

impl ClusterArgs {
    /// Connect to every selected context
    ///
    /// Unknown context names fail before any client is created.
    pub async fn resolve(&self) -> Result<Vec<ClusterContext>> {
        let kubeconfig = config::resolve_kubeconfig(self.kubeconfig.as_deref());
        Ok(resolve_cluster_contexts(kubeconfig.as_deref(), &self.contexts).await?)
    }

    /// Reject more than one context for single-cluster commands
    pub fn ensure_single(&self, command: &str) -> Result<()> {
        if self.contexts.len() > 1 {
            return Err(Error::validation(format!(
                "{} runs against a single context, got {}",
                command,
                self.contexts.join(", ")
            )));
        }
        Ok(())
    }

    /// Connect to the single selected context
    pub async fn resolve_one(&self, command: &str) -> Result<ClusterContext> {
        self.ensure_single(command)?;
        self.resolve()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::validation("no kubeconfig context selected"))
    }
}
