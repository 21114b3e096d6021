//! Group merging and field-level conflict resolution.
//!
//! Once the disjoint-set has grouped the sightings of one real-world
//! object, this module folds each group into a single logical entity.
//! When sources disagree on an attribute, a fixed per-attribute
//! precedence table decides the winner; ties fall to the most recently
//! observed value. Losing values are kept as provenance — they matter
//! for audit, never for the content fingerprint.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use infrasync_model::canonical::canonicalize;
use infrasync_model::{
    attrs, AttrValue, CanonicalEntity, EntityKind, LogicalEntity, NaturalKey, Provenance,
    SOURCE_ENDPOINT, SOURCE_FIREWALL, SOURCE_MDM,
};

use crate::alias::alias_keys;
use crate::dsu::DisjointSet;

/// Per-attribute source precedence.
///
/// Conflict-resolution policy is deployment data, not code: which source
/// wins an attribute is expressed as an ordered source list per attribute
/// name, with a fallback order for everything unlisted. The table is a
/// plain serializable value so deployments can override it through
/// configuration and tests can pin it down in isolation.
///
/// # Default policy
///
/// | Attributes | Order |
/// |------------|-------|
/// | owner, compliance | mdm, endpoint, firewall |
/// | av_status, threat_count | endpoint, mdm, firewall |
/// | serial_number, manufacturer, model, OS fields | mdm, firewall, endpoint |
/// | everything else (topology) | firewall, mdm, endpoint |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedenceTable {
    /// Attribute name → source ids, highest priority first.
    pub rules: BTreeMap<String, Vec<String>>,

    /// Order applied to attributes with no explicit rule.
    pub default_order: Vec<String>,
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        let mdm_first = vec![
            SOURCE_MDM.to_string(),
            SOURCE_ENDPOINT.to_string(),
            SOURCE_FIREWALL.to_string(),
        ];
        let endpoint_first = vec![
            SOURCE_ENDPOINT.to_string(),
            SOURCE_MDM.to_string(),
            SOURCE_FIREWALL.to_string(),
        ];
        let hardware = vec![
            SOURCE_MDM.to_string(),
            SOURCE_FIREWALL.to_string(),
            SOURCE_ENDPOINT.to_string(),
        ];

        let mut rules = BTreeMap::new();
        for attr in [attrs::OWNER, attrs::COMPLIANCE] {
            rules.insert(attr.to_string(), mdm_first.clone());
        }
        for attr in [attrs::AV_STATUS, attrs::THREAT_COUNT] {
            rules.insert(attr.to_string(), endpoint_first.clone());
        }
        for attr in [
            attrs::SERIAL_NUMBER,
            attrs::MANUFACTURER,
            attrs::MODEL,
            attrs::OPERATING_SYSTEM,
            attrs::OS_VERSION,
        ] {
            rules.insert(attr.to_string(), hardware.clone());
        }

        Self {
            rules,
            default_order: vec![
                SOURCE_FIREWALL.to_string(),
                SOURCE_MDM.to_string(),
                SOURCE_ENDPOINT.to_string(),
            ],
        }
    }
}

impl PrecedenceTable {
    /// Rank of `source` for `attr`; lower wins. Sources absent from the
    /// applicable order rank last.
    fn rank(&self, attr: &str, source: &str) -> usize {
        let order = self.rules.get(attr).unwrap_or(&self.default_order);
        order
            .iter()
            .position(|s| s == source)
            .unwrap_or(order.len())
    }
}

/// The identity resolver.
///
/// Consumes the unioned canonical entities from all sources for one run
/// and produces one logical entity per real-world object. Resolution is
/// deterministic and commutative: any arrival order of the same
/// sightings yields the same entities with the same content hashes.
#[derive(Debug, Default)]
pub struct Resolver {
    table: PrecedenceTable,
}

impl Resolver {
    pub fn new(table: PrecedenceTable) -> Self {
        Self { table }
    }

    /// Resolves the run's entity union into logical entities.
    ///
    /// # Returns
    ///
    /// Logical entities sorted by natural key, plus soft warnings
    /// (identity conflicts kept separate rather than conflated).
    pub fn resolve(&self, entities: Vec<CanonicalEntity>) -> (Vec<LogicalEntity>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut resolved = Vec::new();

        // Partition by kind; keys never match across kinds.
        let mut by_kind: BTreeMap<EntityKind, Vec<CanonicalEntity>> = BTreeMap::new();
        for entity in entities {
            by_kind.entry(entity.kind).or_default().push(entity);
        }

        for (kind, mut members) in by_kind {
            // Sort sightings into a canonical order first so grouping and
            // merging are independent of arrival order.
            members.sort_by_cached_key(sighting_sort_key);

            let mut dsu = DisjointSet::new(members.len());
            let mut seen: HashMap<crate::alias::AliasKey, usize> = HashMap::new();
            for (index, member) in members.iter().enumerate() {
                for key in alias_keys(member) {
                    match seen.get(&key) {
                        Some(&other) => dsu.union(index, other),
                        None => {
                            seen.insert(key, index);
                        }
                    }
                }
            }

            let mut taken: BTreeSet<NaturalKey> = BTreeSet::new();
            for group in dsu.groups() {
                let group: Vec<&CanonicalEntity> = group.iter().map(|&i| &members[i]).collect();
                if group.len() > 1 {
                    debug!(
                        kind = %kind,
                        sightings = group.len(),
                        key = %group[0].natural_key,
                        "merged multi-source group"
                    );
                }
                let mut merged = self.merge_group(&group);

                // Under-merge safety: two groups the resolver judged to be
                // distinct objects may still land on the same natural key
                // (two devices sharing a hostname). Keep them separate
                // under a disambiguated key rather than conflating them.
                if taken.contains(&merged.natural_key) {
                    let base = merged.natural_key.clone();
                    let disambiguated = match merged.attr_str(attrs::SERIAL_NUMBER) {
                        Some(serial) => base.disambiguated(serial),
                        None => {
                            let joined: Vec<&str> =
                                merged.sources.iter().map(String::as_str).collect();
                            base.disambiguated(&joined.join("+"))
                        }
                    };
                    warn!(key = %base, kept_as = %disambiguated, "identity conflict, entities kept separate");
                    warnings.push(format!(
                        "identity conflict: distinct {} groups share key {}, second kept as {}",
                        kind, base, disambiguated
                    ));
                    merged.natural_key = disambiguated;
                }
                taken.insert(merged.natural_key.clone());
                resolved.push(merged);
            }
        }

        resolved.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        (resolved, warnings)
    }

    /// Folds one group of sightings into a single logical entity.
    fn merge_group(&self, group: &[&CanonicalEntity]) -> LogicalEntity {
        let kind = group[0].kind;

        let mut sources = BTreeSet::new();
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for member in group {
            sources.extend(member.sources.iter().cloned());
            names.extend(member.attributes.keys().map(String::as_str));
        }

        let mut attributes = BTreeMap::new();
        for name in names {
            let mut contributions: Vec<&AttrValue> = group
                .iter()
                .filter_map(|member| member.attributes.get(name))
                .collect();
            contributions.sort_by_cached_key(|attr| {
                (
                    self.table.rank(name, &attr.source),
                    std::cmp::Reverse(attr.observed_at),
                    attr.source.clone(),
                    canonicalize(&attr.value),
                )
            });

            let winner = contributions[0];
            let mut merged = AttrValue::new(winner.value.clone(), winner.source.clone(), winner.observed_at);
            let mut recorded: BTreeSet<(String, String)> = BTreeSet::new();
            for loser in &contributions[1..] {
                if loser.value == winner.value {
                    continue;
                }
                let dedup_key = (loser.source.clone(), canonicalize(&loser.value));
                if !recorded.insert(dedup_key) {
                    continue;
                }
                merged.superseded.push(Provenance {
                    value: loser.value.clone(),
                    source: loser.source.clone(),
                    observed_at: loser.observed_at,
                });
            }
            attributes.insert(name.to_string(), merged);
        }

        // Devices grouped through a serial or MAC can disagree on
        // hostname; the merged key follows the winning name. All other
        // kinds group strictly by natural key, so any member's key works.
        let natural_key = if kind == EntityKind::Device {
            attributes
                .get(attrs::NAME)
                .and_then(|attr| attr.value.as_str())
                .map(NaturalKey::device)
                .unwrap_or_else(|| group[0].natural_key.clone())
        } else {
            group[0].natural_key.clone()
        };

        LogicalEntity {
            kind,
            natural_key,
            attributes,
            sources,
        }
    }
}

/// Total deterministic order over sightings, independent of arrival
/// order: natural key, then source set, then canonical attribute values.
fn sighting_sort_key(entity: &CanonicalEntity) -> (String, String, String) {
    let sources: Vec<&str> = entity.sources.iter().map(String::as_str).collect();
    let attrs_canonical: String = entity
        .attributes
        .iter()
        .map(|(name, attr)| format!("{}={};", name, canonicalize(&attr.value)))
        .collect();
    (
        entity.natural_key.to_string(),
        sources.join(","),
        attrs_canonical,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use infrasync_model::content_hash;
    use serde_json::json;

    fn device(source: &str, hostname: &str, fields: &[(&str, serde_json::Value)], at: DateTime<Utc>) -> CanonicalEntity {
        let mut entity = CanonicalEntity::new(NaturalKey::device(hostname), source);
        entity.set_attr(attrs::NAME, AttrValue::new(json!(hostname), source, at));
        for (name, value) in fields {
            entity.set_attr(name, AttrValue::new(value.clone(), source, at));
        }
        entity
    }

    #[test]
    fn test_two_sources_one_device() {
        // firewall sees {serial, hostname}; mdm sees {hostname, owner}.
        let now = Utc::now();
        let fw = device(SOURCE_FIREWALL, "fw01", &[(attrs::SERIAL_NUMBER, json!("X1"))], now);
        let mdm = device(SOURCE_MDM, "fw01", &[(attrs::OWNER, json!("alice"))], now);

        let (merged, warnings) = Resolver::default().resolve(vec![fw, mdm]);
        assert!(warnings.is_empty());
        assert_eq!(merged.len(), 1);

        let entity = &merged[0];
        assert_eq!(entity.attr_str(attrs::OWNER), Some("alice"));
        assert_eq!(entity.attr_str(attrs::SERIAL_NUMBER), Some("X1"));
        assert_eq!(entity.sources.len(), 2);
    }

    #[test]
    fn test_merge_commutative() {
        let now = Utc::now();
        let fw = device(SOURCE_FIREWALL, "fw01", &[(attrs::SERIAL_NUMBER, json!("X1"))], now);
        let mdm = device(SOURCE_MDM, "FW01", &[(attrs::OWNER, json!("alice"))], now);

        let (forward, _) = Resolver::default().resolve(vec![fw.clone(), mdm.clone()]);
        let (reverse, _) = Resolver::default().resolve(vec![mdm, fw]);

        assert_eq!(forward, reverse);
        assert_eq!(content_hash(&forward[0]), content_hash(&reverse[0]));
    }

    #[test]
    fn test_transitive_merge_via_alias_chain() {
        // A and B share a hostname; B and C share a serial. All three are
        // one device even though A and C share no direct key.
        let now = Utc::now();
        let a = device(SOURCE_FIREWALL, "host-a", &[], now);
        let b = device(SOURCE_MDM, "host-a", &[(attrs::SERIAL_NUMBER, json!("S9"))], now);
        let mut c = CanonicalEntity::new(NaturalKey::device("host-c"), SOURCE_ENDPOINT);
        c.set_attr(attrs::NAME, AttrValue::new(json!("host-c"), SOURCE_ENDPOINT, now));
        c.set_attr(attrs::SERIAL_NUMBER, AttrValue::new(json!("S9"), SOURCE_ENDPOINT, now));

        let (merged, _) = Resolver::default().resolve(vec![a, b, c]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sources.len(), 3);
    }

    #[test]
    fn test_under_merge_without_shared_key() {
        // Same OS, same model — but no shared candidate key. Two devices.
        let now = Utc::now();
        let a = device(SOURCE_FIREWALL, "host-a", &[(attrs::OPERATING_SYSTEM, json!("Ubuntu"))], now);
        let b = device(SOURCE_MDM, "host-b", &[(attrs::OPERATING_SYSTEM, json!("Ubuntu"))], now);

        let (merged, _) = Resolver::default().resolve(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_precedence_mdm_wins_owner() {
        let now = Utc::now();
        let fw = device(SOURCE_FIREWALL, "x", &[(attrs::OWNER, json!("fw-guess"))], now);
        let mdm = device(SOURCE_MDM, "x", &[(attrs::OWNER, json!("alice@example.com"))], now);

        let (merged, _) = Resolver::default().resolve(vec![fw, mdm]);
        let owner = &merged[0].attributes[attrs::OWNER];
        assert_eq!(owner.value, json!("alice@example.com"));
        assert_eq!(owner.source, SOURCE_MDM);
        // The losing claim is retained as provenance.
        assert_eq!(owner.superseded.len(), 1);
        assert_eq!(owner.superseded[0].value, json!("fw-guess"));
    }

    #[test]
    fn test_tie_resolved_by_recency() {
        // An empty table ranks every source equal, so recency decides.
        let table = PrecedenceTable {
            rules: BTreeMap::new(),
            default_order: Vec::new(), // every source ranks equal
        };
        let base = Utc::now();
        let older = device(SOURCE_FIREWALL, "x", &[(attrs::MODEL, json!("old"))], base);
        let newer = device(SOURCE_MDM, "x", &[(attrs::MODEL, json!("new"))], base + Duration::minutes(5));

        let (merged, _) = Resolver::new(table).resolve(vec![older, newer]);
        assert_eq!(merged[0].attributes[attrs::MODEL].value, json!("new"));
    }

    #[test]
    fn test_provenance_does_not_change_hash() {
        let now = Utc::now();
        let fw = device(SOURCE_FIREWALL, "x", &[(attrs::MODEL, json!("M1"))], now);
        let both_a = device(SOURCE_MDM, "x", &[(attrs::MODEL, json!("M1"))], now);

        let (only_mdm, _) = Resolver::default().resolve(vec![both_a.clone()]);
        let (merged, _) = Resolver::default().resolve(vec![fw, both_a]);
        assert_eq!(content_hash(&only_mdm[0]), content_hash(&merged[0]));
    }

    #[test]
    fn test_singleton_passthrough() {
        let now = Utc::now();
        let vlan = {
            let mut v = CanonicalEntity::new(NaturalKey::vlan(100, "hq"), SOURCE_FIREWALL);
            v.set_attr(attrs::VID, AttrValue::new(json!(100), SOURCE_FIREWALL, now));
            v
        };
        let (merged, warnings) = Resolver::default().resolve(vec![vlan.clone()]);
        assert!(warnings.is_empty());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].natural_key, vlan.natural_key);
    }

    #[test]
    fn test_output_sorted_by_natural_key() {
        let now = Utc::now();
        let b = device(SOURCE_FIREWALL, "bbb", &[], now);
        let a = device(SOURCE_FIREWALL, "aaa", &[], now);
        let (merged, _) = Resolver::default().resolve(vec![b, a]);
        assert_eq!(merged[0].natural_key, NaturalKey::device("aaa"));
        assert_eq!(merged[1].natural_key, NaturalKey::device("bbb"));
    }
}
