//! Kubeconfig resolution for subctl commands
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `SUBCTL_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config`)

use std::path::{Path, PathBuf};

const SUBCTL_KUBECONFIG_ENV: &str = "SUBCTL_KUBECONFIG";

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Resolve a kubeconfig path from the flag and an environment value
pub fn resolve_kubeconfig_from(explicit: Option<&Path>, env: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_home(path));
    }

    env.filter(|p| !p.is_empty())
        .map(|p| expand_home(Path::new(&p)))
}

/// Resolve a kubeconfig path using the priority chain
///
/// Returns `None` to use the kube defaults.
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_kubeconfig_from(explicit, std::env::var(SUBCTL_KUBECONFIG_ENV).ok())
}
