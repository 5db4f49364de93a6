//! Globalnet address space validation and the broker's globalnet record
//!
//! Globalnet reserves one cluster-spanning IPv4 range and allots each joining
//! cluster a disjoint, power-of-two sized block of it. The range and the block
//! size are fixed once clusters have joined, so the broker keeps them in a
//! config map that later deployments validate against instead of overwriting.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::crd::BrokerSpec;
use crate::{Error, Result};

/// Default globalnet range used when none is supplied
pub const DEFAULT_GLOBALNET_CIDR_RANGE: &str = "242.0.0.0/8";

/// Upper bound for a computed default cluster block size
pub const MAX_DEFAULT_CLUSTER_SIZE: u64 = 65536;

/// Number of clusters a computed default block size aims to accommodate
pub const DEFAULT_CLUSTER_SLOTS: u64 = 16;

/// Name of the config map holding the broker's globalnet record
pub const GLOBALNET_CONFIGMAP_NAME: &str = "submariner-globalnet-info";

const KEY_ENABLED: &str = "globalnetEnabled";
const KEY_CIDR_RANGE: &str = "globalnetCidrRange";
const KEY_CLUSTER_SIZE: &str = "globalnetClusterSize";
const KEY_CLUSTER_INFO: &str = "clusterInfo";

/// Ranges that can never carry global addresses
const RESERVED_RANGES: [(&str, [u8; 4], u8); 5] = [
    ("\"this\" network", [0, 0, 0, 0], 8),
    ("loopback", [127, 0, 0, 0], 8),
    ("link-local", [169, 254, 0, 0], 16),
    ("multicast", [224, 0, 0, 0], 4),
    ("broadcast", [255, 255, 255, 255], 32),
];

/// A parsed IPv4 CIDR block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Network address of the block
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length (0-32)
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Total number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    /// Whether two blocks share at least one address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let shorter = self.prefix_len.min(other.prefix_len);
        let mask = Self::mask(shorter);
        (u32::from(self.network) & mask) == (u32::from(other.network) & mask)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| {
            Error::invalid_configuration(format!("{:?} is not a CIDR (expected a.b.c.d/n)", s))
        })?;

        let addr: Ipv4Addr = addr.parse().map_err(|_| {
            Error::invalid_configuration(format!("{:?} has an invalid IPv4 address", s))
        })?;

        let prefix_len: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| {
                Error::invalid_configuration(format!("{:?} has an invalid prefix length", s))
            })?;

        if u32::from(addr) & !Self::mask(prefix_len) != 0 {
            return Err(Error::invalid_configuration(format!(
                "{:?} has host bits set; did you mean {}/{}?",
                s,
                Ipv4Addr::from(u32::from(addr) & Self::mask(prefix_len)),
                prefix_len
            )));
        }

        Ok(Self {
            network: addr,
            prefix_len,
        })
    }
}

/// Parse a CIDR string into an [`Ipv4Cidr`]
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Cidr> {
    cidr.parse()
}

/// Compute or validate the per-cluster block size for a globalnet range.
///
/// A zero request yields the default `min(65536, max(total/16, 1))`.
/// A non-zero request is rounded up to the next power of two and must not
/// exceed half the range, so every valid size is strictly smaller than the
/// range itself.
pub fn get_valid_cluster_size(cidr_range: &str, requested: u32) -> Result<u32> {
    let cidr = parse_cidr(cidr_range)?;
    let total = cidr.size();
    let max_size = total / 2;

    if max_size == 0 {
        return Err(Error::invalid_configuration(format!(
            "globalnet CIDR {} is too small to allot cluster blocks",
            cidr_range
        )));
    }

    if requested == 0 {
        let size = (total / DEFAULT_CLUSTER_SLOTS)
            .max(1)
            .min(MAX_DEFAULT_CLUSTER_SIZE);
        return Ok(size as u32);
    }

    let size = u64::from(requested).next_power_of_two();
    if size > max_size {
        return Err(Error::invalid_configuration(format!(
            "cluster size {} does not fit in globalnet CIDR {}: must be <= {}",
            requested, cidr_range, max_size
        )));
    }

    Ok(size as u32)
}

/// Check that a CIDR can be used as the globalnet range.
///
/// The range must parse and must not overlap any reserved block.
pub fn is_valid_cidr(cidr_range: &str) -> Result<()> {
    let cidr = parse_cidr(cidr_range)?;

    for (name, octets, prefix_len) in RESERVED_RANGES {
        let reserved = Ipv4Cidr {
            network: Ipv4Addr::from(octets),
            prefix_len,
        };
        if cidr.overlaps(&reserved) {
            return Err(Error::invalid_configuration(format!(
                "{} can't be used as globalnet CIDR: overlaps the {} range {}",
                cidr_range, name, reserved
            )));
        }
    }

    Ok(())
}

/// Validate the globalnet settings of a broker spec.
///
/// Disabled globalnet short-circuits without inspecting the range or size.
/// When enabled, the cluster size is validated (or defaulted) and written
/// back into `spec` together with the range in canonical `a.b.c.d/n` form,
/// so callers must treat the spec as input and output.
pub fn check_globalnet_config(spec: &mut BrokerSpec) -> Result<()> {
    if !spec.globalnet_enabled {
        return Ok(());
    }

    spec.default_globalnet_cluster_size =
        get_valid_cluster_size(&spec.globalnet_cidr_range, spec.default_globalnet_cluster_size)?;

    is_valid_cidr(&spec.globalnet_cidr_range)?;
    spec.globalnet_cidr_range = parse_cidr(&spec.globalnet_cidr_range)?.to_string();
    Ok(())
}

/// Compare stored and requested ranges by network, falling back to text for
/// values that do not parse
fn same_range(stored: &str, requested: &str) -> bool {
    match (parse_cidr(stored), parse_cidr(requested)) {
        (Ok(a), Ok(b)) => a == b,
        _ => stored.trim() == requested.trim(),
    }
}

/// A block already allotted to a joined member cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAllocation {
    /// Member cluster ID
    pub cluster_id: String,
    /// Global CIDRs allotted to the cluster
    #[serde(rename = "globalCidr", default)]
    pub global_cidr: Vec<String>,
}

/// The broker's globalnet record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalnetInfo {
    /// Whether globalnet is enabled for the broker
    pub enabled: bool,
    /// The cluster-spanning range
    pub cidr_range: String,
    /// Default block size per joining cluster
    pub cluster_size: u32,
    /// Blocks allotted so far
    pub clusters: Vec<ClusterAllocation>,
}

impl GlobalnetInfo {
    /// Build the desired record from a validated broker spec
    pub fn from_spec(spec: &BrokerSpec) -> Self {
        Self {
            enabled: spec.globalnet_enabled,
            cidr_range: spec.globalnet_cidr_range.clone(),
            cluster_size: spec.default_globalnet_cluster_size,
            clusters: Vec::new(),
        }
    }

    /// A disabled record that holds no range and no allotted blocks
    pub fn is_placeholder(&self) -> bool {
        !self.enabled && self.cidr_range.trim().is_empty() && self.clusters.is_empty()
    }

    /// Render the record as a config map in `namespace`
    pub fn to_config_map(&self, namespace: &str) -> Result<ConfigMap> {
        let cluster_info = serde_json::to_string(&self.clusters)
            .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;

        let data = BTreeMap::from([
            (KEY_ENABLED.to_string(), self.enabled.to_string()),
            (KEY_CIDR_RANGE.to_string(), self.cidr_range.clone()),
            (KEY_CLUSTER_SIZE.to_string(), self.cluster_size.to_string()),
            (KEY_CLUSTER_INFO.to_string(), cluster_info),
        ]);

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(GLOBALNET_CONFIGMAP_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    /// Parse the record from an existing config map
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        fn get<'a>(data: Option<&'a BTreeMap<String, String>>, key: &str) -> &'a str {
            data.and_then(|d| d.get(key)).map(String::as_str).unwrap_or_default()
        }
        let data = cm.data.as_ref();

        let enabled = get(data, KEY_ENABLED).eq_ignore_ascii_case("true");

        let cluster_size = match get(data, KEY_CLUSTER_SIZE) {
            "" => 0,
            v => v.parse().map_err(|_| {
                Error::serialization_for_kind(
                    "ConfigMap",
                    format!("invalid {} value {:?}", KEY_CLUSTER_SIZE, v),
                )
            })?,
        };

        let clusters = match get(data, KEY_CLUSTER_INFO) {
            "" => Vec::new(),
            v => serde_json::from_str(v)
                .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?,
        };

        Ok(Self {
            enabled,
            cidr_range: get(data, KEY_CIDR_RANGE).to_string(),
            cluster_size,
            clusters,
        })
    }
}

/// What to do with the broker's globalnet record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlobalnetAction {
    /// No record exists yet
    Create,
    /// The existing record already matches
    Unchanged,
    /// The record may be rewritten: only the default block size differs and
    /// no cluster has joined yet, or the record is a disabled placeholder
    Update,
}

/// Decide how an existing globalnet record relates to the requested one.
///
/// A disabled record without a range or allotted blocks, as written for
/// brokers deployed without globalnet, is a placeholder and may be rewritten.
/// Otherwise a record whose enabled flag or range differs is a conflict, as is
/// a block-size change once member clusters hold allotted blocks.
pub fn check_existing(
    existing: Option<&GlobalnetInfo>,
    desired: &GlobalnetInfo,
    namespace: &str,
) -> Result<GlobalnetAction> {
    let Some(existing) = existing else {
        return Ok(GlobalnetAction::Create);
    };

    if existing.is_placeholder() && desired.enabled {
        return Ok(GlobalnetAction::Update);
    }

    if existing.enabled != desired.enabled {
        return Err(Error::conflicting_state(
            namespace,
            format!(
                "broker was deployed with globalnet {}; redeploy with the same setting",
                if existing.enabled { "enabled" } else { "disabled" }
            ),
        ));
    }

    if !same_range(&existing.cidr_range, &desired.cidr_range) {
        return Err(Error::conflicting_state(
            namespace,
            format!(
                "existing globalnet CIDR range {} conflicts with requested range {}",
                existing.cidr_range, desired.cidr_range
            ),
        ));
    }

    if existing.cluster_size == desired.cluster_size {
        return Ok(GlobalnetAction::Unchanged);
    }

    if !existing.clusters.is_empty() {
        return Err(Error::conflicting_state(
            namespace,
            format!(
                "cluster size {} conflicts with size {} already allotted to {} member cluster(s)",
                desired.cluster_size,
                existing.cluster_size,
                existing.clusters.len()
            ),
        ));
    }

    Ok(GlobalnetAction::Update)
}
