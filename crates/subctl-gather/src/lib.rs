//! Diagnostic data collection across clusters
//!
//! A gather run validates its [`GatherOptions`] once, then runs a
//! [`Collector`] against every cluster concurrently. Each cluster writes into
//! its own subdirectory and fails on its own; the run as a whole fails if any
//! cluster did, naming every cluster that failed.

#![deny(missing_docs)]

pub mod collector;
pub mod options;
pub mod orchestrator;
pub mod redact;

pub use collector::{
    collect_from, ClusterSource, Collector, KubeCollector, KubeSource, PodInfo, ResourceKind,
};
pub use options::{default_directory, GatherOptions, ALL_MODULES, ALL_TYPES};
pub use orchestrator::{gather_all, GatherSummary};
pub use redact::{Redactor, REDACTED};
