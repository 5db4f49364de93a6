//! Broker deployment for subctl
//!
//! [`deploy_broker`] validates a [`BrokerOptions`] value and then drives the
//! four-step pipeline (RBAC, operator, Broker object, globalnet record)
//! against one cluster through the appliers in [`appliers`].

#![deny(missing_docs)]

pub mod appliers;
pub mod broker;

pub use appliers::{Appliers, EnsureOutcome, KubeAppliers};
pub use broker::{deploy_broker, BrokerOptions, DeployReport, DeployStep, PipelineState};
