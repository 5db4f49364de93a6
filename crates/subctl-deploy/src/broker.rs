//! Broker deployment sequencer
//!
//! Deploying a broker is a short state machine:
//!
//! ```text
//! NotStarted -> RbacDone -> OperatorDone -> BrokerDone -> GlobalnetDone
//!      \____________\____________\_____________\______> Failed(step)
//! ```
//!
//! Every step is idempotent on its own, so a failed run is recovered by
//! running again rather than by rolling back. Input validation happens before
//! the first step so a bad flag never leaves half-applied state behind.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use subctl_common::component::{effective_components, validate_components};
use subctl_common::crd::BrokerSpec;
use subctl_common::globalnet::{check_globalnet_config, GlobalnetInfo, DEFAULT_GLOBALNET_CIDR_RANGE};
use subctl_common::image::RepositoryInfo;
use subctl_common::reporter::Reporter;
use subctl_common::{Error, Result, DEFAULT_BROKER_NAMESPACE, OPERATOR_NAMESPACE};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::appliers::{Appliers, EnsureOutcome, OperatorDesired, RbacDesired};

/// Everything a broker deployment needs, fixed for the whole run
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerOptions {
    /// Run the operator with verbose logging
    pub operator_debug: bool,
    /// Image repository (empty for the default)
    pub repository: String,
    /// Image tag or digest (empty for the default)
    pub image_version: String,
    /// Per-image overrides by image name
    pub image_overrides: BTreeMap<String, String>,
    /// Namespace of the broker control point
    pub broker_namespace: String,
    /// Requested Broker spec
    pub broker_spec: BrokerSpec,
    /// Upper bound for each step, if any
    pub step_timeout: Option<Duration>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            operator_debug: false,
            repository: String::new(),
            image_version: String::new(),
            image_overrides: BTreeMap::new(),
            broker_namespace: DEFAULT_BROKER_NAMESPACE.to_string(),
            broker_spec: BrokerSpec {
                components: vec![
                    subctl_common::component::SERVICE_DISCOVERY.to_string(),
                    subctl_common::component::CONNECTIVITY.to_string(),
                ],
                globalnet_enabled: false,
                globalnet_cidr_range: DEFAULT_GLOBALNET_CIDR_RANGE.to_string(),
                default_globalnet_cluster_size: 0,
            },
            step_timeout: None,
        }
    }
}

/// A step of the deployment pipeline, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeployStep {
    /// Broker namespace, CRD and RBAC
    Rbac,
    /// Operator installation
    Operator,
    /// The Broker object
    Broker,
    /// The globalnet record
    Globalnet,
}

impl DeployStep {
    /// Short identifier used in errors
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStep::Rbac => "rbac",
            DeployStep::Operator => "operator",
            DeployStep::Broker => "broker",
            DeployStep::Globalnet => "globalnet",
        }
    }

    /// Progress message shown when the step starts
    pub fn description(&self) -> &'static str {
        match self {
            DeployStep::Rbac => "Setting up broker RBAC",
            DeployStep::Operator => "Deploying the Submariner operator",
            DeployStep::Broker => "Deploying the broker",
            DeployStep::Globalnet => "Configuring globalnet",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Validation passed, nothing applied yet
    NotStarted,
    /// RBAC is in place
    RbacDone,
    /// The operator is deployed
    OperatorDone,
    /// The Broker object is in place
    BrokerDone,
    /// The globalnet record is in place or not needed (terminal)
    GlobalnetDone,
    /// A step failed (terminal)
    Failed(DeployStep),
}

impl PipelineState {
    /// The step to run next, or `None` in a terminal state
    pub fn next_step(&self) -> Option<DeployStep> {
        match self {
            PipelineState::NotStarted => Some(DeployStep::Rbac),
            PipelineState::RbacDone => Some(DeployStep::Operator),
            PipelineState::OperatorDone => Some(DeployStep::Broker),
            PipelineState::BrokerDone => Some(DeployStep::Globalnet),
            PipelineState::GlobalnetDone | PipelineState::Failed(_) => None,
        }
    }

    /// State after `step` completed successfully
    pub fn completed(step: DeployStep) -> Self {
        match step {
            DeployStep::Rbac => PipelineState::RbacDone,
            DeployStep::Operator => PipelineState::OperatorDone,
            DeployStep::Broker => PipelineState::BrokerDone,
            DeployStep::Globalnet => PipelineState::GlobalnetDone,
        }
    }

    /// Whether the run has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        self.next_step().is_none()
    }
}

/// What a successful run did, step by step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployReport {
    /// Final state
    pub state: PipelineState,
    /// Outcome of every step that ran; a skipped globalnet step is absent
    pub outcomes: Vec<(DeployStep, EnsureOutcome)>,
}

impl DeployReport {
    /// Whether any step changed the cluster
    pub fn mutated(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_mutation())
    }
}

/// Validated inputs derived from [`BrokerOptions`]
struct Plan {
    namespace: String,
    spec: BrokerSpec,
    rbac: RbacDesired,
    operator: OperatorDesired,
}

fn plan(options: &BrokerOptions) -> Result<Plan> {
    validate_components(&options.broker_spec.components)?;

    let mut spec = options.broker_spec.clone();
    check_globalnet_config(&mut spec)?;
    let spec = spec.normalized();

    let repository = RepositoryInfo::new(
        options.repository.as_str(),
        options.image_version.as_str(),
        options.image_overrides.clone(),
    );

    Ok(Plan {
        namespace: options.broker_namespace.clone(),
        rbac: RbacDesired {
            broker_namespace: options.broker_namespace.clone(),
            components: effective_components(&spec.components, spec.globalnet_enabled),
        },
        operator: OperatorDesired {
            namespace: OPERATOR_NAMESPACE.to_string(),
            image: repository.operator_image(),
            debug: options.operator_debug,
        },
        spec,
    })
}

/// Run one step, giving up on cancellation or when the step timeout elapses
async fn bounded<F>(
    step: DeployStep,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    work: F,
) -> Result<EnsureOutcome>
where
    F: Future<Output = Result<EnsureOutcome>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(format!("{} step", step)));
    }

    let timed = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                Error::cancelled(format!("{} step timed out after {:?}", step, limit))
            })?,
            None => work.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(format!("{} step", step))),
        result = timed => result,
    }
}

async fn run_step(step: DeployStep, plan: &Plan, appliers: &Appliers<'_>) -> Result<EnsureOutcome> {
    match step {
        DeployStep::Rbac => appliers.rbac.ensure_rbac(&plan.rbac).await,
        DeployStep::Operator => appliers.operator.ensure_operator(&plan.operator).await,
        DeployStep::Broker => appliers.broker.ensure_broker(&plan.namespace, &plan.spec).await,
        DeployStep::Globalnet => {
            let desired = GlobalnetInfo::from_spec(&plan.spec);
            appliers
                .globalnet
                .validate_existing(&plan.namespace, &desired)
                .await?;
            appliers.globalnet.ensure(&plan.namespace, &desired).await
        }
    }
}

/// Deploy the broker control point onto `cluster`
///
/// Components and globalnet settings are validated before any applier is
/// called. Steps then run strictly in order and the first failure aborts the
/// run with [`Error::StepFailure`] naming the step. The globalnet step is
/// skipped when globalnet is disabled.
pub async fn deploy_broker(
    options: &BrokerOptions,
    cluster: &str,
    appliers: &Appliers<'_>,
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<DeployReport> {
    let plan = match plan(options) {
        Ok(plan) => plan,
        Err(e) => {
            reporter.failure(&format!("Invalid broker configuration: {}", e));
            return Err(e);
        }
    };

    info!(
        cluster,
        namespace = %plan.namespace,
        components = ?plan.rbac.components,
        globalnet = plan.spec.globalnet_enabled,
        "deploying broker"
    );

    let mut state = PipelineState::NotStarted;
    let mut outcomes = Vec::new();

    while let Some(step) = state.next_step() {
        if step == DeployStep::Globalnet && !plan.spec.globalnet_enabled {
            state = PipelineState::completed(step);
            continue;
        }

        reporter.start(step.description());
        match bounded(step, options.step_timeout, cancel, run_step(step, &plan, appliers)).await {
            Ok(outcome) => {
                reporter.success(&format!("{} ({})", step.description(), outcome));
                outcomes.push((step, outcome));
                state = PipelineState::completed(step);
            }
            Err(e) => {
                warn!(cluster, %step, error = %e, "broker deployment step failed");
                reporter.failure(&format!("{} failed: {}", step.description(), e));
                return Err(Error::step_failure(step.as_str(), cluster, e));
            }
        }
        reporter.end();
    }

    Ok(DeployReport { state, outcomes })
}
