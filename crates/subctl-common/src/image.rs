//! Container image resolution for deployed components

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Default image repository
pub const DEFAULT_REPOSITORY: &str = "quay.io/submariner";

/// Default image version
pub const DEFAULT_IMAGE_VERSION: &str = "devel";

/// Operator image name
pub const OPERATOR_IMAGE: &str = "submariner-operator";

/// Images that may be overridden with `--image-override`
pub const KNOWN_IMAGES: [&str; 8] = [
    OPERATOR_IMAGE,
    "submariner-gateway",
    "submariner-route-agent",
    "submariner-globalnet",
    "submariner-metrics-proxy",
    "lighthouse-agent",
    "lighthouse-coredns",
    "nettest",
];

/// Where component images come from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Registry and organisation, e.g. `quay.io/submariner`
    pub repository: String,
    /// Tag, or a `sha256:` digest to pin images
    pub version: String,
    /// Full image references replacing the computed ones, by image name
    pub overrides: BTreeMap<String, String>,
}

impl RepositoryInfo {
    /// Build repository info, falling back to defaults for empty values
    pub fn new(
        repository: impl Into<String>,
        version: impl Into<String>,
        overrides: BTreeMap<String, String>,
    ) -> Self {
        let repository = repository.into();
        let version = version.into();
        Self {
            repository: if repository.is_empty() {
                DEFAULT_REPOSITORY.to_string()
            } else {
                repository.trim_end_matches('/').to_string()
            },
            version: if version.is_empty() {
                DEFAULT_IMAGE_VERSION.to_string()
            } else {
                version
            },
            overrides,
        }
    }

    /// Resolve the full reference for the named image
    pub fn image(&self, name: &str) -> String {
        if let Some(image) = self.overrides.get(name) {
            return image.clone();
        }

        if self.version.starts_with("sha256:") {
            format!("{}/{}@{}", self.repository, name, self.version)
        } else {
            format!("{}/{}:{}", self.repository, name, self.version)
        }
    }

    /// Resolve the operator image
    pub fn operator_image(&self) -> String {
        self.image(OPERATOR_IMAGE)
    }
}

/// Parse `name=image` override entries, rejecting unknown image names
pub fn parse_image_overrides<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();

    for entry in entries {
        let entry = entry.as_ref();
        let (name, image) = entry
            .split_once('=')
            .filter(|(n, i)| !n.is_empty() && !i.is_empty())
            .ok_or_else(|| {
                Error::invalid_configuration(format!(
                    "invalid image override {:?}, expected <name>=<image>",
                    entry
                ))
            })?;

        if !KNOWN_IMAGES.contains(&name) {
            return Err(Error::invalid_configuration(format!(
                "unknown image name in override: {}",
                name
            )));
        }

        overrides.insert(name.to_string(), image.to_string());
    }

    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_version_produces_tagged_image() {
        let info = RepositoryInfo::new("quay.io/example/", "0.18.0", BTreeMap::new());
        assert_eq!(
            info.operator_image(),
            "quay.io/example/submariner-operator:0.18.0"
        );
    }

    #[test]
    fn digest_version_pins_image() {
        let info = RepositoryInfo::new("quay.io/example", "sha256:abc123", BTreeMap::new());
        assert_eq!(
            info.operator_image(),
            "quay.io/example/submariner-operator@sha256:abc123"
        );
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let info = RepositoryInfo::new("", "", BTreeMap::new());
        assert_eq!(info.operator_image(), "quay.io/submariner/submariner-operator:devel");
    }

    #[test]
    fn override_wins_over_computed_reference() {
        let overrides = parse_image_overrides(&["submariner-operator=localhost:5000/op:dev"]).unwrap();
        let info = RepositoryInfo::new("quay.io/example", "1.0", overrides);
        assert_eq!(info.operator_image(), "localhost:5000/op:dev");
        assert_eq!(info.image("nettest"), "quay.io/example/nettest:1.0");
    }

    #[test]
    fn malformed_or_unknown_overrides_are_rejected() {
        for bad in ["submariner-operator", "=img", "submariner-operator=", "bogus=img:1"] {
            let err = parse_image_overrides(&[bad]).unwrap_err();
            assert!(err.is_invalid_configuration(), "{}", bad);
        }
    }
}
