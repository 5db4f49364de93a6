//! Gather options and their pre-flight validation

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use subctl_common::{Error, Result};

/// Pod logs
pub const TYPE_LOGS: &str = "logs";
/// Object manifests
pub const TYPE_RESOURCES: &str = "resources";

/// Every data type a gather run can collect
pub const ALL_TYPES: [&str; 2] = [TYPE_LOGS, TYPE_RESOURCES];

/// Gateway, route agent and globalnet
pub const MODULE_CONNECTIVITY: &str = "connectivity";
/// Lighthouse agent and DNS
pub const MODULE_SERVICE_DISCOVERY: &str = "service-discovery";
/// The broker namespace
pub const MODULE_BROKER: &str = "broker";
/// The operator
pub const MODULE_OPERATOR: &str = "operator";

/// Every module a gather run can inspect
pub const ALL_MODULES: [&str; 4] = [
    MODULE_CONNECTIVITY,
    MODULE_SERVICE_DISCOVERY,
    MODULE_BROKER,
    MODULE_OPERATOR,
];

/// Default output directory name for a run started at `now`
///
/// Two runs started within the same second get the same name.
pub fn default_directory(now: DateTime<Utc>) -> String {
    format!("submariner-{}", now.format("%Y%m%d%H%M%S"))
}

/// What to gather and where to put it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatherOptions {
    /// Requested data types
    pub types: BTreeSet<String>,
    /// Requested modules
    pub modules: BTreeSet<String>,
    /// Output root; each cluster writes to a subdirectory
    pub directory: PathBuf,
    /// Keep credentials and tokens verbatim
    pub include_sensitive_data: bool,
}

impl GatherOptions {
    /// Build validated options
    ///
    /// Empty `types` or `modules` select everything; a missing directory
    /// defaults to a timestamped name in the working directory.
    pub fn new(
        types: &[String],
        modules: &[String],
        directory: Option<PathBuf>,
        include_sensitive_data: bool,
    ) -> Result<Self> {
        let options = Self {
            types: select(types, &ALL_TYPES),
            modules: select(modules, &ALL_MODULES),
            directory: directory.unwrap_or_else(|| PathBuf::from(default_directory(Utc::now()))),
            include_sensitive_data,
        };
        options.validate()?;
        Ok(options)
    }

    /// Check every type and module against the known sets
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.types.iter().find(|t| !ALL_TYPES.contains(&t.as_str())) {
            return Err(Error::invalid_configuration(format!(
                "{:?} is not a supported type (expected one of {})",
                t,
                ALL_TYPES.join(", ")
            )));
        }

        if let Some(m) = self.modules.iter().find(|m| !ALL_MODULES.contains(&m.as_str())) {
            return Err(Error::invalid_configuration(format!(
                "{:?} is not a supported module (expected one of {})",
                m,
                ALL_MODULES.join(", ")
            )));
        }

        Ok(())
    }

    /// Whether data type `name` was requested
    pub fn wants_type(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    /// Whether module `name` was requested
    pub fn wants_module(&self, name: &str) -> bool {
        self.modules.contains(name)
    }
}

fn select(requested: &[String], all: &[&str]) -> BTreeSet<String> {
    if requested.is_empty() {
        all.iter().map(|s| s.to_string()).collect()
    } else {
        requested.iter().map(|s| s.trim().to_string()).collect()
    }
}
