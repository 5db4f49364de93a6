//! Deploy-broker command: set up the broker control point on one cluster
//!
//! Flags are turned into an immutable [`BrokerOptions`] and validated before
//! the kubeconfig is even read, so a bad component or CIDR exits with the
//! invalid-configuration code without contacting the cluster.

use std::time::Duration;

use clap::Args;
use subctl_common::component::validate_components;
use subctl_common::crd::BrokerSpec;
use subctl_common::globalnet::{check_globalnet_config, DEFAULT_GLOBALNET_CIDR_RANGE};
use subctl_common::image::parse_image_overrides;
use subctl_common::kube_utils::ClusterHandle;
use subctl_common::DEFAULT_BROKER_NAMESPACE;
use subctl_deploy::{deploy_broker, BrokerOptions, KubeAppliers};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ClusterArgs;
use crate::reporter::CliReporter;
use crate::Result;

/// Deploy the broker control point
#[derive(Args, Debug, Clone)]
pub struct DeployBrokerArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Components to enable, comma-separated
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [
            subctl_common::component::SERVICE_DISCOVERY.to_string(),
            subctl_common::component::CONNECTIVITY.to_string(),
        ]
    )]
    pub components: Vec<String>,

    /// Enable the globalnet overlapping-CIDR support
    #[arg(long)]
    pub globalnet: bool,

    /// Range from which every cluster's global CIDR is allotted
    #[arg(long, default_value = DEFAULT_GLOBALNET_CIDR_RANGE)]
    pub globalnet_cidr_range: String,

    /// Addresses allotted to each joining cluster (0 picks a default)
    #[arg(long, default_value_t = 0)]
    pub globalnet_cluster_size: u32,

    /// Image repository
    #[arg(long, env = "SUBCTL_REPOSITORY", default_value = "")]
    pub repository: String,

    /// Image version (tag or sha256 digest)
    #[arg(long, env = "SUBCTL_VERSION", default_value = "")]
    pub version: String,

    /// Override a component image, as <name>=<image> (repeatable)
    #[arg(long = "image-override")]
    pub image_overrides: Vec<String>,

    /// Run the operator with verbose logging
    #[arg(long)]
    pub operator_debug: bool,

    /// Namespace of the broker control point
    #[arg(long, default_value = DEFAULT_BROKER_NAMESPACE)]
    pub broker_namespace: String,

    /// Give up on a step after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl DeployBrokerArgs {
    /// Build validated broker options
    pub fn broker_options(&self) -> Result<BrokerOptions> {
        let broker_spec = BrokerSpec {
            components: self.components.clone(),
            globalnet_enabled: self.globalnet,
            globalnet_cidr_range: self.globalnet_cidr_range.clone(),
            default_globalnet_cluster_size: self.globalnet_cluster_size,
        };
        validate_components(&broker_spec.components)?;
        check_globalnet_config(&mut broker_spec.clone())?;

        Ok(BrokerOptions {
            operator_debug: self.operator_debug,
            repository: self.repository.clone(),
            image_version: self.version.clone(),
            image_overrides: parse_image_overrides(&self.image_overrides)?,
            broker_namespace: self.broker_namespace.clone(),
            broker_spec,
            step_timeout: self.timeout.map(Duration::from_secs),
        })
    }
}

pub async fn run(args: DeployBrokerArgs, cancel: CancellationToken) -> Result<()> {
    let options = args.broker_options()?;
    let cluster = args.cluster.resolve_one("deploy-broker").await?;

    let reporter = CliReporter::stdout();
    let appliers = KubeAppliers::new(cluster.client.clone());
    let report = deploy_broker(
        &options,
        cluster.name(),
        &appliers.appliers(),
        &reporter,
        &cancel,
    )
    .await?;

    info!(cluster = %cluster.name(), state = ?report.state, "broker deployment finished");
    if report.mutated() {
        println!(
            "Broker deployed to namespace {} on {}",
            options.broker_namespace,
            cluster.name()
        );
    } else {
        println!("Broker on {} is already up to date", cluster.name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;
    use rstest::rstest;

    fn parse(args: &[&str]) -> DeployBrokerArgs {
        let mut argv = vec!["subctl", "deploy-broker"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::DeployBroker(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn defaults_match_broker_options() {
        let options = parse(&[]).broker_options().unwrap();
        let defaults = BrokerOptions::default();
        assert_eq!(options.broker_spec, defaults.broker_spec);
        assert_eq!(options.broker_namespace, defaults.broker_namespace);
        assert_eq!(options.step_timeout, None);
    }

    #[test]
    fn flags_flow_into_options() {
        let options = parse(&[
            "--components",
            "connectivity",
            "--globalnet",
            "--globalnet-cidr-range",
            "243.0.0.0/16",
            "--globalnet-cluster-size",
            "1000",
            "--repository",
            "registry.local/sm",
            "--version",
            "0.18.0",
            "--image-override",
            "submariner-operator=registry.local/op:dev",
            "--operator-debug",
            "--broker-namespace",
            "brokers",
            "--timeout",
            "90",
        ])
        .broker_options()
        .unwrap();

        assert_eq!(options.broker_spec.components, vec!["connectivity"]);
        assert!(options.broker_spec.globalnet_enabled);
        assert_eq!(options.broker_spec.globalnet_cidr_range, "243.0.0.0/16");
        assert_eq!(options.broker_spec.default_globalnet_cluster_size, 1000);
        assert_eq!(options.repository, "registry.local/sm");
        assert_eq!(options.image_version, "0.18.0");
        assert_eq!(
            options.image_overrides.get("submariner-operator").map(String::as_str),
            Some("registry.local/op:dev")
        );
        assert!(options.operator_debug);
        assert_eq!(options.broker_namespace, "brokers");
        assert_eq!(options.step_timeout, Some(Duration::from_secs(90)));
    }

    /// Story: bad input exits with the invalid-configuration code
    #[rstest]
    #[case(&["--components", "service-discovery,bogus"])]
    #[case(&["--globalnet", "--globalnet-cidr-range", "242.0.0.0/33"])]
    #[case(&["--globalnet", "--globalnet-cidr-range", "127.0.0.0/16"])]
    #[case(&["--globalnet", "--globalnet-cidr-range", "242.0.0.0/24", "--globalnet-cluster-size", "256"])]
    #[case(&["--image-override", "not-an-image=x"])]
    fn invalid_flags_are_rejected(#[case] args: &[&str]) {
        let err = parse(args).broker_options().unwrap_err();
        assert!(err.is_invalid_configuration(), "{}", err);
    }

    #[test]
    fn disabled_globalnet_ignores_range() {
        let options = parse(&["--globalnet-cidr-range", "garbage"])
            .broker_options()
            .unwrap();
        assert!(!options.broker_spec.globalnet_enabled);
    }

    #[test]
    fn several_contexts_are_rejected() {
        let args = parse(&["--context", "east,west"]);
        let err = args.cluster.ensure_single("deploy-broker").unwrap_err();
        assert!(err.is_invalid_configuration());
    }
}
