//! # Canonical Serialization and Content Fingerprints
//!
//! Change detection rests on one property: semantically identical merged
//! entities must produce bytewise identical serializations, so their
//! SHA-256 fingerprints can be compared across runs. This module provides
//! that canonical form and the fingerprint over it.
//!
//! ## What the fingerprint covers
//!
//! The hash is computed over the attribute **name → merged value** map
//! with keys sorted. It deliberately excludes:
//!
//! - provenance (winning source, `observed_at`, superseded values) — a
//!   change in *who* reported a value must not trigger a registry write
//!   when the value itself is unchanged;
//! - the contributing source set — a source dropping out while another
//!   still reports the same values is not a content change.
//!
//! ## Canonical form
//!
//! - Object keys sorted lexicographically by UTF-16 code units
//! - No insignificant whitespace
//! - Minimal string escaping (only `"`, `\` and control characters)
//! - Arrays keep their element order
//!
//! ## Example
//!
//! ```rust
//! use infrasync_model::canonical::canonicalize;
//! use serde_json::json;
//!
//! let a = json!({"owner": "alice", "name": "fw01"});
//! let b = json!({"name": "fw01", "owner": "alice"});
//! assert_eq!(canonicalize(&a), canonicalize(&b));
//! assert_eq!(canonicalize(&a), r#"{"name":"fw01","owner":"alice"}"#);
//! ```

use crate::entity::CanonicalEntity;
use sha2::{Digest, Sha256};

/// SHA-256 digest size in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte SHA-256 content fingerprint.
pub type Hash = [u8; HASH_SIZE];

/// Computes the content fingerprint of an entity.
///
/// Builds the provenance-free attribute map and hashes its canonical
/// serialization. Two entities with the same merged values always produce
/// the same fingerprint regardless of which sources contributed them or
/// in which order they arrived.
///
/// # Example
///
/// ```rust
/// use infrasync_model::{attrs, AttrValue, CanonicalEntity, NaturalKey};
/// use infrasync_model::canonical::content_hash;
/// use chrono::Utc;
/// use serde_json::json;
///
/// let mut a = CanonicalEntity::new(NaturalKey::device("fw01"), "firewall");
/// a.set_attr(attrs::NAME, AttrValue::new(json!("fw01"), "firewall", Utc::now()));
///
/// let mut b = CanonicalEntity::new(NaturalKey::device("fw01"), "mdm");
/// b.set_attr(attrs::NAME, AttrValue::new(json!("fw01"), "mdm", Utc::now()));
///
/// // Different source, different timestamp, same merged value: same hash.
/// assert_eq!(content_hash(&a), content_hash(&b));
/// ```
pub fn content_hash(entity: &CanonicalEntity) -> Hash {
    let mut map = serde_json::Map::new();
    for (name, attr) in &entity.attributes {
        map.insert(name.clone(), attr.value.clone());
    }
    hash_canonical(&serde_json::Value::Object(map))
}

/// Computes the SHA-256 hash of a canonicalized JSON value.
pub fn hash_canonical(value: &serde_json::Value) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    hasher.finalize().into()
}

/// Canonicalizes a JSON value to a deterministic string form.
///
/// Semantically identical inputs always produce bytewise identical
/// output; this is the serialization every fingerprint is computed over.
pub fn canonicalize(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Renders a hash as lowercase hex, the form persisted in the
/// fingerprint store and shown in audit records.
pub fn to_hex(hash: &Hash) -> String {
    let mut s = String::with_capacity(HASH_SIZE * 2);
    for byte in hash {
        s.push_str(&format!("{:02x}", byte));
    }
    s
}

fn write_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(true) => out.push_str("true"),
        serde_json::Value::Bool(false) => out.push_str("false"),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => write_string(out, s),
        serde_json::Value::Array(arr) => {
            out.push('[');
            for (i, element) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, element);
            }
            out.push(']');
        }
        serde_json::Value::Object(obj) => {
            // Sort keys by UTF-16 code units. For ASCII keys this matches
            // byte order; for the rare non-ASCII key it keeps the output
            // stable across serializer versions.
            let mut entries: Vec<(&String, &serde_json::Value)> = obj.iter().collect();
            entries.sort_by(|(a, _), (b, _)| {
                a.encode_utf16()
                    .collect::<Vec<u16>>()
                    .cmp(&b.encode_utf16().collect::<Vec<u16>>())
            });

            out.push('{');
            for (i, (key, element)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, element);
            }
            out.push('}');
        }
    }
}

/// Minimal escaping: `"`, `\`, and control characters only.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\x20' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{attrs, AttrValue, CanonicalEntity, NaturalKey, SOURCE_FIREWALL, SOURCE_MDM};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_canonicalize_scalars() {
        assert_eq!(canonicalize(&json!(null)), "null");
        assert_eq!(canonicalize(&json!(true)), "true");
        assert_eq!(canonicalize(&json!(42)), "42");
        assert_eq!(canonicalize(&json!("up")), r#""up""#);
    }

    #[test]
    fn test_canonicalize_sorts_keys() {
        let value = json!({"mtu": 1500, "description": "uplink", "status": "up"});
        assert_eq!(
            canonicalize(&value),
            r#"{"description":"uplink","mtu":1500,"status":"up"}"#
        );
    }

    #[test]
    fn test_canonicalize_nested_and_arrays() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [3, 1, 2]});
        assert_eq!(canonicalize(&value), r#"{"a":[3,1,2],"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_canonicalize_escapes() {
        assert_eq!(canonicalize(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canonicalize(&json!("line\nbreak")), r#""line\nbreak""#);
    }

    #[test]
    fn test_hash_ignores_key_order() {
        assert_eq!(
            hash_canonical(&json!({"a": 1, "b": 2})),
            hash_canonical(&json!({"b": 2, "a": 1}))
        );
    }

    #[test]
    fn test_content_hash_excludes_provenance() {
        let now = Utc::now();

        let mut from_firewall = CanonicalEntity::new(NaturalKey::device("fw01"), SOURCE_FIREWALL);
        from_firewall.set_attr(attrs::NAME, AttrValue::new(json!("fw01"), SOURCE_FIREWALL, now));

        let mut from_mdm = CanonicalEntity::new(NaturalKey::device("fw01"), SOURCE_MDM);
        let mut attr = AttrValue::new(json!("fw01"), SOURCE_MDM, now);
        attr.superseded.push(crate::entity::Provenance {
            value: json!("FW01-old"),
            source: SOURCE_FIREWALL.to_string(),
            observed_at: now,
        });
        from_mdm.set_attr(attrs::NAME, attr);

        assert_eq!(content_hash(&from_firewall), content_hash(&from_mdm));
    }

    #[test]
    fn test_content_hash_changes_with_value() {
        let now = Utc::now();
        let mut entity = CanonicalEntity::new(NaturalKey::device("fw01"), SOURCE_FIREWALL);
        entity.set_attr(attrs::OWNER, AttrValue::new(json!("alice"), SOURCE_MDM, now));
        let before = content_hash(&entity);

        entity.set_attr(attrs::OWNER, AttrValue::new(json!("bob"), SOURCE_MDM, now));
        assert_ne!(before, content_hash(&entity));
    }

    #[test]
    fn test_to_hex() {
        let mut hash = [0u8; HASH_SIZE];
        hash[0] = 0xab;
        hash[31] = 0x01;
        let hex = to_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
    }
}
