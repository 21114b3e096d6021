//! Candidate alias keys for cross-source identity matching.
//!
//! Two sightings of the same kind merge when they share *any* candidate
//! key. Candidates are kind-specific and ordered by reliability: a
//! chassis serial is a stronger identity claim than a hostname, so it is
//! tried first when disambiguation is needed.

use infrasync_model::{attrs, CanonicalEntity, EntityKind};

/// One candidate identity claim extracted from an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AliasKey {
    /// The kind the claim applies to — keys never match across kinds.
    pub kind: EntityKind,

    /// Which identity facet this is (`serial`, `mac`, `hostname`, `key`).
    pub field: &'static str,

    /// The normalized claim value.
    pub value: String,
}

impl AliasKey {
    fn new(kind: EntityKind, field: &'static str, value: &str) -> Self {
        Self {
            kind,
            field,
            value: value.trim().to_lowercase(),
        }
    }
}

/// Extracts an entity's candidate keys in priority order.
///
/// Devices match on chassis serial, then MAC address, then normalized
/// hostname. Every other kind has exactly one identity facet — its
/// natural key — because those keys are already fully derivable from any
/// source's view.
///
/// The list is never empty for entities produced by the normalizers
/// (every kind's natural key requires its identifying fields), so no
/// sighting is ever dropped for want of a classifiable identity.
pub fn alias_keys(entity: &CanonicalEntity) -> Vec<AliasKey> {
    match entity.kind {
        EntityKind::Device => {
            let mut keys = Vec::new();
            if let Some(serial) = entity.attr_str(attrs::SERIAL_NUMBER) {
                keys.push(AliasKey::new(entity.kind, "serial", serial));
            }
            if let Some(mac) = entity.attr_str(attrs::MAC_ADDRESS) {
                keys.push(AliasKey::new(entity.kind, "mac", mac));
            }
            if let Some(hostname) = entity.natural_key.parts().first() {
                keys.push(AliasKey::new(entity.kind, "hostname", hostname));
            }
            keys
        }
        _ => vec![AliasKey::new(
            entity.kind,
            "key",
            &entity.natural_key.to_string(),
        )],
    }
}
