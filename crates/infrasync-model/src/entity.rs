//! # Canonical Entity Model
//!
//! This module defines the typed entities the whole pipeline operates on.
//! Each source reports a different slice of the estate under its own
//! identifiers; everything downstream (resolution, diffing, applying) works
//! exclusively on the canonical shapes defined here.
//!
//! ## Convergence Model
//!
//! The types in this module underpin three guarantees:
//!
//! | Guarantee | Mechanism |
//! |-----------|-----------|
//! | One record per real object | Stable [`NaturalKey`] per kind |
//! | Deterministic ordering | Fixed dependency tier per [`EntityKind`] |
//! | Auditable merges | Per-attribute provenance in [`AttrValue`] |
//!
//! ## Entity Kinds and Dependency Tiers
//!
//! Referenced objects must exist in the registry before their referrers,
//! so every kind carries a fixed tier:
//!
//! ```text
//! tier 0: device
//! tier 1: interface        (refers to its device)
//! tier 2: vlan, prefix
//! tier 3: ip_address       (refers to interface/prefix)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Source identifier for the firewall appliance.
pub const SOURCE_FIREWALL: &str = "firewall";

/// Source identifier for the mobile-device-management service.
pub const SOURCE_MDM: &str = "mdm";

/// Source identifier for the endpoint-security console.
pub const SOURCE_ENDPOINT: &str = "endpoint";

/// Well-known attribute names shared by normalizers, the merge precedence
/// table, and tests. Attribute values are free-form JSON; the names are not.
pub mod attrs {
    pub const NAME: &str = "name";
    pub const DEVICE_CLASS: &str = "device_class";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const MODEL: &str = "model";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const OPERATING_SYSTEM: &str = "operating_system";
    pub const OS_VERSION: &str = "os_version";
    pub const OWNER: &str = "owner";
    pub const COMPLIANCE: &str = "compliance";
    pub const AV_STATUS: &str = "av_status";
    pub const THREAT_COUNT: &str = "threat_count";
    pub const MAC_ADDRESS: &str = "mac_address";
    pub const LAST_SEEN: &str = "last_seen";
    pub const SITE: &str = "site";
    pub const DEVICE: &str = "device";
    pub const STATUS: &str = "status";
    pub const MTU: &str = "mtu";
    pub const VLAN_ID: &str = "vlan_id";
    pub const DESCRIPTION: &str = "description";
    pub const ADDRESSES: &str = "addresses";
    pub const ADDRESS: &str = "address";
    pub const LEASE_TYPE: &str = "lease_type";
    pub const HOSTNAME: &str = "hostname";
    pub const INTERFACE: &str = "interface";
    pub const VID: &str = "vid";
    pub const PREFIX: &str = "prefix";
}

/// The five entity types the registry is converged over.
///
/// The enum order is not load-bearing; ordering decisions go through
/// [`EntityKind::tier`] so the dependency topology stays explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A physical or virtual device (server, workstation, firewall, VM).
    Device,

    /// A network interface owned by a device.
    Interface,

    /// An 802.1Q VLAN scoped to a site.
    Vlan,

    /// A network prefix (CIDR) scoped to a site.
    Prefix,

    /// A single IP address in CIDR notation.
    IpAddress,
}

impl EntityKind {
    /// All kinds, in ascending dependency-tier order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Device,
        EntityKind::Interface,
        EntityKind::Vlan,
        EntityKind::Prefix,
        EntityKind::IpAddress,
    ];

    /// Dependency tier: referenced objects carry a lower tier than their
    /// referrers. Creates ascend tiers; removals descend them.
    pub fn tier(&self) -> u8 {
        match self {
            EntityKind::Device => 0,
            EntityKind::Interface => 1,
            EntityKind::Vlan | EntityKind::Prefix => 2,
            EntityKind::IpAddress => 3,
        }
    }

    /// Stable string form used in store keys and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Device => "device",
            EntityKind::Interface => "interface",
            EntityKind::Vlan => "vlan",
            EntityKind::Prefix => "prefix",
            EntityKind::IpAddress => "ip_address",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stable identity of one real-world object.
///
/// A natural key is an ordered tuple of identifying attributes specific to
/// the kind. It must be derivable from any source's view of the object so
/// that independent sightings of the same object land on the same key.
///
/// # Key Composition
///
/// | Kind | Parts |
/// |------|-------|
/// | device | lowercased hostname |
/// | interface | owning device key, interface name |
/// | ip_address | address in CIDR notation |
/// | vlan | vid, site |
/// | prefix | network CIDR, site |
///
/// A device's chassis serial participates in identity *resolution* (alias
/// matching) rather than in the key itself: sources report serials
/// unevenly, and a key that appears and disappears with one source would
/// oscillate the registry.
///
/// # Example
///
/// ```rust
/// use infrasync_model::{EntityKind, NaturalKey};
///
/// let key = NaturalKey::device("FW01");
/// assert_eq!(key.kind(), EntityKind::Device);
/// assert_eq!(key.to_string(), "device/fw01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    kind: EntityKind,
    parts: Vec<String>,
}

impl NaturalKey {
    /// Key for a device, from its hostname (case-insensitive).
    pub fn device(hostname: &str) -> Self {
        Self {
            kind: EntityKind::Device,
            parts: vec![hostname.trim().to_lowercase()],
        }
    }

    /// Key for an interface, from its owning device's hostname and the
    /// interface name.
    pub fn interface(device_hostname: &str, name: &str) -> Self {
        Self {
            kind: EntityKind::Interface,
            parts: vec![device_hostname.trim().to_lowercase(), name.trim().to_string()],
        }
    }

    /// Key for an IP address, from its CIDR form (`10.0.0.5/32`).
    pub fn ip_address(cidr: &str) -> Self {
        Self {
            kind: EntityKind::IpAddress,
            parts: vec![cidr.trim().to_string()],
        }
    }

    /// Key for a VLAN, from its 802.1Q id and site.
    pub fn vlan(vid: u16, site: &str) -> Self {
        Self {
            kind: EntityKind::Vlan,
            parts: vec![vid.to_string(), site.trim().to_lowercase()],
        }
    }

    /// Key for a prefix, from its CIDR form and site.
    pub fn prefix(cidr: &str, site: &str) -> Self {
        Self {
            kind: EntityKind::Prefix,
            parts: vec![cidr.trim().to_string(), site.trim().to_lowercase()],
        }
    }

    /// The entity kind this key identifies.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The ordered identifying parts.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Appends a disambiguating part to the key.
    ///
    /// Used when two distinct logical entities of the same kind would
    /// otherwise collide on the same key (e.g. two devices sharing a
    /// hostname, distinguished by chassis serial).
    pub fn disambiguated(&self, part: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.trim().to_lowercase());
        Self {
            kind: self.kind,
            parts,
        }
    }
}

impl fmt::Display for NaturalKey {
    /// Renders `kind/part|part`, the form used as a store key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.parts.join("|"))
    }
}

/// A value a source reported for an attribute, with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// The reported value.
    pub value: serde_json::Value,

    /// The source that reported it.
    pub source: String,

    /// When the source last observed it.
    pub observed_at: DateTime<Utc>,
}

/// One attribute of an entity: the winning value plus full provenance.
///
/// After the identity resolver merges sightings from several sources, the
/// winning value sits in `value`/`source`/`observed_at` and every losing
/// value is retained in `superseded` for audit and debugging. Content
/// hashing covers `value` only — a provenance-only change never triggers
/// a registry write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrValue {
    /// The merged (winning) value.
    pub value: serde_json::Value,

    /// Source that contributed the winning value.
    pub source: String,

    /// When the winning source observed the value.
    pub observed_at: DateTime<Utc>,

    /// Losing values from other sources, kept for audit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<Provenance>,
}

impl AttrValue {
    /// Creates an attribute value with no superseded history.
    pub fn new(
        value: impl Into<serde_json::Value>,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value: value.into(),
            source: source.into(),
            observed_at,
            superseded: Vec::new(),
        }
    }
}

/// One object as seen by one source (pre-merge), or by all sources that
/// reported it (post-merge).
///
/// The normalizers emit one `CanonicalEntity` per source sighting; the
/// identity resolver folds sightings of the same real-world object into a
/// single entity with the union of their `sources` and merged
/// `attributes`. The merged form is also called a *logical entity*
/// ([`LogicalEntity`]); it is transient and rebuilt in full every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// The entity type.
    pub kind: EntityKind,

    /// Stable identity of the underlying object.
    pub natural_key: NaturalKey,

    /// Attribute name → merged value with provenance. A `BTreeMap` so
    /// iteration (and therefore hashing) is deterministic.
    pub attributes: BTreeMap<String, AttrValue>,

    /// Sources that contributed to this entity in the current run.
    pub sources: BTreeSet<String>,
}

impl CanonicalEntity {
    /// Creates an entity reported by a single source with no attributes.
    pub fn new(natural_key: NaturalKey, source: impl Into<String>) -> Self {
        let source = source.into();
        let mut sources = BTreeSet::new();
        sources.insert(source);
        Self {
            kind: natural_key.kind(),
            natural_key,
            attributes: BTreeMap::new(),
            sources,
        }
    }

    /// Sets an attribute, replacing any previous value outright.
    ///
    /// This is the normalizer-side setter; merge semantics (precedence,
    /// provenance retention) live in the identity resolver.
    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Returns an attribute's merged value as a string slice, if present
    /// and string-typed.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|a| a.value.as_str())
    }
}

/// The merged, de-duplicated representation of one real-world object
/// across all sources. Produced only by the identity resolver.
pub type LogicalEntity = CanonicalEntity;
