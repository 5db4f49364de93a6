//! Multi-cluster gather runs against in-memory clusters

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use subctl_common::kube_utils::ClusterHandle;
use subctl_common::reporter::{Reporter, TracingReporter};
use subctl_common::{Error, Result};
use subctl_gather::{
    collect_from, gather_all, ClusterSource, Collector, GatherOptions, PodInfo, ResourceKind,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Healthy,
    Unreachable,
    Panics,
    Hangs,
}

struct FakeCluster {
    name: String,
    behaviour: Behaviour,
}

impl FakeCluster {
    fn new(name: &str, behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
        }
    }
}

impl ClusterHandle for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ClusterSource for FakeCluster {
    async fn pods(&self, _namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        if self.behaviour == Behaviour::Unreachable {
            return Err(Error::internal("connection refused"));
        }
        Ok(if selector == "app=submariner-gateway" {
            vec![PodInfo {
                name: format!("{}-gateway", self.name),
                containers: vec!["submariner-gateway".to_string()],
            }]
        } else {
            Vec::new()
        })
    }

    async fn logs(&self, _namespace: &str, _pod: &str, _container: &str) -> Result<String> {
        Ok("IPsec tunnel up, Authorization: Bearer abc.def.ghi\n".to_string())
    }

    async fn resources(&self, _namespace: &str, kind: ResourceKind) -> Result<Vec<Value>> {
        if self.behaviour == Behaviour::Unreachable {
            return Err(Error::internal("connection refused"));
        }
        Ok(match kind {
            ResourceKind::Secret => vec![json!({
                "kind": "Secret",
                "metadata": { "name": "submariner-ipsec-psk" },
                "data": { "psk": "c3VwZXItc2VjcmV0LXBzaw==" }
            })],
            ResourceKind::DaemonSet => vec![json!({
                "kind": "DaemonSet",
                "metadata": { "name": "submariner-gateway" },
                "spec": { "template": { "spec": { "containers": [ {
                    "name": "submariner-gateway",
                    "env": [
                        { "name": "BROKER_K8S_APISERVERTOKEN", "value": "eyJicm9rZXItdG9rZW4" },
                        { "name": "CE_IPSEC_PSK", "value": "gateway-psk-value" },
                        { "name": "SUBMARINER_CLUSTERID", "value": self.name }
                    ]
                } ] } } }
            })],
            _ => Vec::new(),
        })
    }
}

/// Collector that reads from the fake cluster itself and counts invocations
#[derive(Default)]
struct FakeCollector {
    calls: AtomicUsize,
}

#[async_trait]
impl Collector<FakeCluster> for FakeCollector {
    async fn collect(
        &self,
        cluster: &FakeCluster,
        options: &GatherOptions,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match cluster.behaviour {
            Behaviour::Panics => panic!("collector bug"),
            Behaviour::Hangs => {
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => collect_from(cluster, &cluster.name, options, reporter).await,
        }
    }
}

fn options(dir: &std::path::Path, include_sensitive_data: bool) -> Arc<GatherOptions> {
    Arc::new(
        GatherOptions::new(
            &[],
            &["connectivity".to_string(), "broker".to_string()],
            Some(dir.to_path_buf()),
            include_sensitive_data,
        )
        .unwrap(),
    )
}

fn reporter() -> Arc<dyn Reporter> {
    Arc::new(TracingReporter)
}

/// Story: the second of three clusters is down; the others still produce output
#[tokio::test]
async fn failing_cluster_does_not_stop_the_others() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = Arc::new(FakeCollector::default());
    let clusters = vec![
        FakeCluster::new("east", Behaviour::Healthy),
        FakeCluster::new("central", Behaviour::Unreachable),
        FakeCluster::new("west", Behaviour::Healthy),
    ];

    let err = gather_all(
        clusters,
        collector.clone(),
        options(tmp.path(), false),
        reporter(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.failed_clusters(), vec!["central"]);
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(collector.calls.load(Ordering::SeqCst), 3);

    for healthy in ["east", "west"] {
        let log = tmp
            .path()
            .join(healthy)
            .join("connectivity")
            .join(format!("{}-gateway_submariner-gateway.log", healthy));
        assert!(log.exists(), "missing {}", log.display());
        assert!(tmp
            .path()
            .join(healthy)
            .join("broker/secret_submariner-ipsec-psk.yaml")
            .exists());
    }
}

#[tokio::test]
async fn all_healthy_clusters_succeed() {
    let tmp = tempfile::tempdir().unwrap();
    let summary = gather_all(
        vec![
            FakeCluster::new("east", Behaviour::Healthy),
            FakeCluster::new("west", Behaviour::Healthy),
        ],
        Arc::new(FakeCollector::default()),
        options(tmp.path(), false),
        reporter(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.clusters, vec!["east", "west"]);
}

/// Story: a bad --type value is rejected before any cluster is contacted
#[tokio::test]
async fn unknown_type_makes_no_cluster_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = Arc::new(FakeCollector::default());
    let mut bad = GatherOptions::new(&[], &[], Some(tmp.path().to_path_buf()), false).unwrap();
    bad.types = BTreeSet::from(["badvalue".to_string()]);

    let err = gather_all(
        vec![FakeCluster::new("east", Behaviour::Healthy)],
        collector.clone(),
        Arc::new(bad),
        reporter(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_invalid_configuration());
    assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
    assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn panicking_collector_fails_only_its_cluster() {
    let tmp = tempfile::tempdir().unwrap();
    let err = gather_all(
        vec![
            FakeCluster::new("east", Behaviour::Panics),
            FakeCluster::new("west", Behaviour::Healthy),
        ],
        Arc::new(FakeCollector::default()),
        options(tmp.path(), false),
        reporter(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.failed_clusters(), vec!["east"]);
    assert!(tmp.path().join("west/connectivity").exists());
}

#[tokio::test]
async fn cancellation_fails_hanging_clusters() {
    let tmp = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(gather_all(
        vec![
            FakeCluster::new("east", Behaviour::Healthy),
            FakeCluster::new("west", Behaviour::Hangs),
        ],
        Arc::new(FakeCollector::default()),
        options(tmp.path(), false),
        reporter(),
        cancel.clone(),
    ));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.failed_clusters(), vec!["west"]);
    assert!(err.to_string().contains("cancelled"));
}

#[tokio::test]
async fn redaction_follows_the_sensitive_data_flag() {
    let redacted = tempfile::tempdir().unwrap();
    let verbatim = tempfile::tempdir().unwrap();

    for (dir, include) in [(&redacted, false), (&verbatim, true)] {
        gather_all(
            vec![FakeCluster::new("east", Behaviour::Healthy)],
            Arc::new(FakeCollector::default()),
            options(dir.path(), include),
            reporter(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let read = |dir: &tempfile::TempDir| {
        let secret =
            std::fs::read_to_string(dir.path().join("east/broker/secret_submariner-ipsec-psk.yaml"))
                .unwrap();
        let log = std::fs::read_to_string(
            dir.path()
                .join("east/connectivity/east-gateway_submariner-gateway.log"),
        )
        .unwrap();
        let daemonset = std::fs::read_to_string(
            dir.path()
                .join("east/connectivity/daemonset_submariner-gateway.yaml"),
        )
        .unwrap();
        format!("{}{}{}", secret, log, daemonset)
    };

    let masked = read(&redacted);
    for raw in [
        "c3VwZXItc2VjcmV0LXBzaw==",
        "abc.def.ghi",
        "eyJicm9rZXItdG9rZW4",
        "gateway-psk-value",
    ] {
        assert!(!masked.contains(raw), "{} leaked", raw);
    }
    assert!(masked.contains("SUBMARINER_CLUSTERID"));

    let raw = read(&verbatim);
    assert!(raw.contains("c3VwZXItc2VjcmV0LXBzaw=="));
    assert!(raw.contains("Bearer abc.def.ghi"));
    assert!(raw.contains("eyJicm9rZXItdG9rZW4"));
    assert!(raw.contains("gateway-psk-value"));
}

/// Story: two contexts whose names differ only in path-unsafe characters
/// would write into the same directory, so nothing is gathered
#[tokio::test]
async fn colliding_output_directories_are_rejected_up_front() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = Arc::new(FakeCollector::default());

    let err = gather_all(
        vec![
            FakeCluster::new("admin/prod", Behaviour::Healthy),
            FakeCluster::new("admin:prod", Behaviour::Healthy),
        ],
        collector.clone(),
        options(tmp.path(), false),
        reporter(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_invalid_configuration());
    assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
}
