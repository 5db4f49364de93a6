//! Common types for subctl: errors, validation, CRDs, and cluster utilities

#![deny(missing_docs)]

pub mod component;
pub mod crd;
pub mod error;
pub mod globalnet;
pub mod image;
pub mod kube_utils;
pub mod reporter;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the Submariner operator runs in
pub const OPERATOR_NAMESPACE: &str = "submariner-operator";

/// Default namespace for the broker control point
pub const DEFAULT_BROKER_NAMESPACE: &str = "submariner-k8s-broker";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "subctl";
