//! Deployable components and component-set validation

use std::collections::BTreeSet;

use crate::{Error, Result};

/// Multi-cluster service discovery (Lighthouse)
pub const SERVICE_DISCOVERY: &str = "service-discovery";

/// Cross-cluster connectivity (gateways and route agents)
pub const CONNECTIVITY: &str = "connectivity";

/// Global address translation; added implicitly, never requested directly
pub const GLOBALNET: &str = "globalnet";

/// Components a user may request for deployment
pub const VALID_COMPONENTS: [&str; 2] = [SERVICE_DISCOVERY, CONNECTIVITY];

/// Validate a requested component set.
///
/// The set must be non-empty and every member must be one of
/// [`VALID_COMPONENTS`]. Synonyms and the implicit `globalnet` component are
/// rejected like any other unknown name.
pub fn validate_components<S: AsRef<str>>(components: &[S]) -> Result<()> {
    if components.is_empty() {
        return Err(Error::invalid_configuration(
            "at least one component required",
        ));
    }

    for component in components {
        let name = component.as_ref();
        if !VALID_COMPONENTS.contains(&name) {
            return Err(Error::invalid_configuration(format!(
                "unknown component: {}",
                name
            )));
        }
    }

    Ok(())
}

/// The deduplicated component set that is actually deployed.
///
/// Adds [`GLOBALNET`] when globalnet is enabled.
pub fn effective_components<S: AsRef<str>>(
    components: &[S],
    globalnet_enabled: bool,
) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = components
        .iter()
        .map(|c| c.as_ref().to_string())
        .collect();
    if globalnet_enabled {
        set.insert(GLOBALNET.to_string());
    }
    set
}
