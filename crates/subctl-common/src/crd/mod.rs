//! Custom Resource Definitions used by subctl
//!
//! Only the broker control object is modelled here; the member-side CRDs are
//! owned by the operator.

mod broker;

pub use broker::{Broker, BrokerSpec, BROKER_NAME};
