//! End-to-end pipeline runs against an in-memory cluster
//!
//! The fake keeps the last applied desired state per step and counts every
//! call that would have written to the API server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use subctl_common::crd::BrokerSpec;
use subctl_common::globalnet::{check_existing, ClusterAllocation, GlobalnetAction, GlobalnetInfo};
use subctl_common::reporter::TracingReporter;
use subctl_common::{Error, Result};
use subctl_deploy::appliers::{
    BrokerApplier, GlobalnetConfigApplier, OperatorApplier, OperatorDesired, RbacApplier,
    RbacDesired,
};
use subctl_deploy::{deploy_broker, Appliers, BrokerOptions, DeployStep, EnsureOutcome, PipelineState};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeCluster {
    rbac: Mutex<Option<RbacDesired>>,
    operator: Mutex<Option<OperatorDesired>>,
    broker: Mutex<Option<BrokerSpec>>,
    globalnet: Mutex<Option<GlobalnetInfo>>,
    calls: Mutex<Vec<&'static str>>,
    mutations: AtomicUsize,
}

impl FakeCluster {
    fn store<T: Clone + PartialEq>(&self, slot: &Mutex<Option<T>>, desired: &T) -> EnsureOutcome {
        let mut slot = slot.lock().unwrap();
        let outcome = match slot.as_ref() {
            None => EnsureOutcome::Created,
            Some(current) if current == desired => EnsureOutcome::Unchanged,
            Some(_) => EnsureOutcome::Updated,
        };
        if outcome.is_mutation() {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            *slot = Some(desired.clone());
        }
        outcome
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn appliers(&self) -> Appliers<'_> {
        Appliers {
            rbac: self,
            operator: self,
            broker: self,
            globalnet: self,
        }
    }
}

#[async_trait]
impl RbacApplier for FakeCluster {
    async fn ensure_rbac(&self, desired: &RbacDesired) -> Result<EnsureOutcome> {
        self.record("rbac");
        Ok(self.store(&self.rbac, desired))
    }
}

#[async_trait]
impl OperatorApplier for FakeCluster {
    async fn ensure_operator(&self, desired: &OperatorDesired) -> Result<EnsureOutcome> {
        self.record("operator");
        Ok(self.store(&self.operator, desired))
    }
}

#[async_trait]
impl BrokerApplier for FakeCluster {
    async fn ensure_broker(&self, _namespace: &str, spec: &BrokerSpec) -> Result<EnsureOutcome> {
        self.record("broker");
        Ok(self.store(&self.broker, spec))
    }
}

#[async_trait]
impl GlobalnetConfigApplier for FakeCluster {
    async fn validate_existing(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<()> {
        self.record("globalnet-validate");
        let stored = self.globalnet.lock().unwrap().clone();
        check_existing(stored.as_ref(), desired, namespace).map(|_| ())
    }

    async fn ensure(&self, namespace: &str, desired: &GlobalnetInfo) -> Result<EnsureOutcome> {
        self.record("globalnet-ensure");
        let mut slot = self.globalnet.lock().unwrap();
        match check_existing(slot.as_ref(), desired, namespace)? {
            GlobalnetAction::Unchanged => Ok(EnsureOutcome::Unchanged),
            action => {
                let clusters = slot.take().map(|s| s.clusters).unwrap_or_default();
                *slot = Some(GlobalnetInfo {
                    clusters,
                    ..desired.clone()
                });
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(if action == GlobalnetAction::Create {
                    EnsureOutcome::Created
                } else {
                    EnsureOutcome::Updated
                })
            }
        }
    }
}

fn globalnet_options() -> BrokerOptions {
    let mut options = BrokerOptions::default();
    options.broker_spec.globalnet_enabled = true;
    options
}

async fn deploy(options: &BrokerOptions, cluster: &FakeCluster) -> Result<subctl_deploy::DeployReport> {
    deploy_broker(
        options,
        "broker-cluster",
        &cluster.appliers(),
        &TracingReporter,
        &CancellationToken::new(),
    )
    .await
}

/// Story: redeploying with identical input is a no-op on every step
#[tokio::test]
async fn second_run_performs_no_mutations() {
    let cluster = FakeCluster::default();
    let options = globalnet_options();

    let first = deploy(&options, &cluster).await.unwrap();
    assert_eq!(first.state, PipelineState::GlobalnetDone);
    assert!(first
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == EnsureOutcome::Created));
    let after_first = cluster.mutations();
    assert_eq!(after_first, 4);

    let second = deploy(&options, &cluster).await.unwrap();
    assert_eq!(second.state, PipelineState::GlobalnetDone);
    assert!(!second.mutated());
    assert_eq!(cluster.mutations(), after_first);
}

#[tokio::test]
async fn changed_image_updates_only_the_operator() {
    let cluster = FakeCluster::default();
    let mut options = BrokerOptions::default();
    deploy(&options, &cluster).await.unwrap();

    options.image_version = "0.19.0".to_string();
    let report = deploy(&options, &cluster).await.unwrap();

    let changed: Vec<DeployStep> = report
        .outcomes
        .iter()
        .filter(|(_, o)| o.is_mutation())
        .map(|(step, _)| *step)
        .collect();
    assert_eq!(changed, vec![DeployStep::Operator]);
    assert_eq!(
        cluster.operator.lock().unwrap().as_ref().map(|o| o.image.clone()),
        Some("quay.io/submariner/submariner-operator:0.19.0".to_string())
    );
}

#[tokio::test]
async fn changed_components_update_rbac_and_broker() {
    let cluster = FakeCluster::default();
    let mut options = BrokerOptions::default();
    options.broker_spec.components = vec!["connectivity".to_string()];
    deploy(&options, &cluster).await.unwrap();

    options.broker_spec.components.push("service-discovery".to_string());
    let report = deploy(&options, &cluster).await.unwrap();

    assert!(report
        .outcomes
        .contains(&(DeployStep::Rbac, EnsureOutcome::Updated)));
    assert!(report
        .outcomes
        .contains(&(DeployStep::Broker, EnsureOutcome::Updated)));
    assert!(report
        .outcomes
        .contains(&(DeployStep::Operator, EnsureOutcome::Unchanged)));
}

/// Story: a broker whose range already hands out blocks keeps that range
#[tokio::test]
async fn existing_range_with_members_is_a_conflict() {
    let cluster = FakeCluster::default();
    let stored = GlobalnetInfo {
        enabled: true,
        cidr_range: "243.0.0.0/16".to_string(),
        cluster_size: 4096,
        clusters: vec![ClusterAllocation {
            cluster_id: "west".to_string(),
            global_cidr: vec!["243.0.0.0/20".to_string()],
        }],
    };
    *cluster.globalnet.lock().unwrap() = Some(stored.clone());

    let err = deploy(&globalnet_options(), &cluster).await.unwrap_err();
    assert_eq!(err.step(), Some("globalnet"));
    assert!(!err.is_retryable());
    assert_eq!(cluster.globalnet.lock().unwrap().as_ref(), Some(&stored));
    assert!(!cluster.calls().contains(&"globalnet-ensure"));
}

#[tokio::test]
async fn size_change_before_any_member_joined_is_applied() {
    let cluster = FakeCluster::default();
    let mut options = globalnet_options();
    deploy(&options, &cluster).await.unwrap();

    options.broker_spec.default_globalnet_cluster_size = 8192;
    let report = deploy(&options, &cluster).await.unwrap();
    assert!(report
        .outcomes
        .contains(&(DeployStep::Globalnet, EnsureOutcome::Updated)));
    assert_eq!(
        cluster.globalnet.lock().unwrap().as_ref().map(|g| g.cluster_size),
        Some(8192)
    );
}

/// Story: a broker deployed earlier without globalnet left a disabled, empty
/// record behind; enabling globalnet now takes it over
#[tokio::test]
async fn disabled_placeholder_record_is_taken_over() {
    let cluster = FakeCluster::default();
    *cluster.globalnet.lock().unwrap() = Some(GlobalnetInfo::default());

    let report = deploy(&globalnet_options(), &cluster).await.unwrap();

    assert_eq!(report.state, PipelineState::GlobalnetDone);
    assert!(report
        .outcomes
        .contains(&(DeployStep::Globalnet, EnsureOutcome::Updated)));
    let stored = cluster.globalnet.lock().unwrap().clone().unwrap();
    assert!(stored.enabled);
    assert_eq!(stored.cidr_range, "242.0.0.0/8");
    assert_eq!(stored.cluster_size, 65536);
}

#[tokio::test]
async fn padded_range_redeploys_without_conflict() {
    let cluster = FakeCluster::default();
    deploy(&globalnet_options(), &cluster).await.unwrap();

    let mut padded = globalnet_options();
    padded.broker_spec.globalnet_cidr_range = " 242.0.0.0/8 ".to_string();
    let report = deploy(&padded, &cluster).await.unwrap();

    assert!(!report.mutated());
    assert_eq!(
        cluster.broker.lock().unwrap().as_ref().map(|b| b.globalnet_cidr_range.clone()),
        Some("242.0.0.0/8".to_string())
    );
}

#[tokio::test]
async fn disabled_globalnet_never_touches_the_record() {
    let cluster = FakeCluster::default();
    deploy(&BrokerOptions::default(), &cluster).await.unwrap();
    assert_eq!(cluster.calls(), vec!["rbac", "operator", "broker"]);
    assert!(cluster.globalnet.lock().unwrap().is_none());
}

/// Operator applier that never finishes, optionally cancelling the run first
struct StuckOperator {
    cancel: Option<CancellationToken>,
}

#[async_trait]
impl OperatorApplier for StuckOperator {
    async fn ensure_operator(&self, _desired: &OperatorDesired) -> Result<EnsureOutcome> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        std::future::pending::<()>().await;
        Err(Error::internal("unreachable"))
    }
}

#[tokio::test]
async fn step_timeout_aborts_the_pipeline() {
    let cluster = FakeCluster::default();
    let stuck = StuckOperator { cancel: None };
    let appliers = Appliers {
        operator: &stuck,
        ..cluster.appliers()
    };
    let options = BrokerOptions {
        step_timeout: Some(Duration::from_millis(50)),
        ..globalnet_options()
    };

    let err = deploy_broker(
        &options,
        "broker-cluster",
        &appliers,
        &TracingReporter,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.step(), Some("operator"));
    assert!(err.to_string().contains("timed out"));
    assert_eq!(cluster.calls(), vec!["rbac"]);
}

/// Story: Ctrl-C during a step returns promptly and nothing further runs
#[tokio::test]
async fn cancellation_mid_step_stops_the_pipeline() {
    let cluster = FakeCluster::default();
    let cancel = CancellationToken::new();
    let stuck = StuckOperator {
        cancel: Some(cancel.clone()),
    };
    let appliers = Appliers {
        operator: &stuck,
        ..cluster.appliers()
    };

    let err = deploy_broker(
        &BrokerOptions::default(),
        "broker-cluster",
        &appliers,
        &TracingReporter,
        &cancel,
    )
    .await
    .unwrap_err();

    assert_eq!(err.step(), Some("operator"));
    assert!(matches!(
        err,
        Error::StepFailure { ref source, .. } if matches!(**source, Error::Cancelled { .. })
    ));
    assert_eq!(cluster.calls(), vec!["rbac"]);
}
