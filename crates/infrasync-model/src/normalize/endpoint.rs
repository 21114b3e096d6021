//! Normalizer for the endpoint-security console source.
//!
//! The console is authoritative for antivirus state. It reports managed
//! agents (devices) and, for some platforms, the adapters the agent
//! enumerated.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{canonical_mac, observed_at, parse_utc, str_field};
use crate::entity::{attrs, AttrValue, CanonicalEntity, NaturalKey, SOURCE_ENDPOINT};

/// Normalizes an endpoint-console payload
/// (`{"devices": [...], "interfaces": [...]}`).
pub fn normalize(payload: &Value, fetched_at: DateTime<Utc>) -> (Vec<CanonicalEntity>, Vec<String>) {
    let mut entities = Vec::new();
    let mut warnings = Vec::new();

    for (index, record) in records(payload, "devices") {
        match normalize_device(record, fetched_at) {
            Some(entity) => entities.push(entity),
            None => warnings.push(format!("endpoint devices[{}]: missing hostname, skipped", index)),
        }
    }

    for (index, record) in records(payload, "interfaces") {
        match normalize_interface(record, fetched_at) {
            Some(entity) => entities.push(entity),
            None => warnings.push(format!(
                "endpoint interfaces[{}]: missing hostname or adapter, skipped",
                index
            )),
        }
    }

    (entities, warnings)
}

fn records<'a>(payload: &'a Value, field: &str) -> impl Iterator<Item = (usize, &'a Value)> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
        .iter()
        .enumerate()
}

fn normalize_device(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let hostname = str_field(record, "hostname")?;
    let at = observed_at(record, "last_seen", fetched_at);

    let mut entity = CanonicalEntity::new(NaturalKey::device(hostname), SOURCE_ENDPOINT);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(hostname), SOURCE_ENDPOINT, at));

    let av = str_field(record, "antivirus_status").unwrap_or("unknown");
    entity.set_attr(attrs::AV_STATUS, AttrValue::new(json!(av), SOURCE_ENDPOINT, at));

    if let Some(threats) = record.get("threat_count").and_then(Value::as_u64) {
        entity.set_attr(attrs::THREAT_COUNT, AttrValue::new(json!(threats), SOURCE_ENDPOINT, at));
    }
    if let Some(os) = str_field(record, "os_name") {
        entity.set_attr(attrs::OPERATING_SYSTEM, AttrValue::new(json!(os), SOURCE_ENDPOINT, at));
    }
    if let Some(version) = str_field(record, "os_version") {
        entity.set_attr(attrs::OS_VERSION, AttrValue::new(json!(version), SOURCE_ENDPOINT, at));
    }
    if let Some(mac) = str_field(record, "mac_address").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_ENDPOINT, at));
    }
    // Only a payload-supplied timestamp becomes an attribute: stamping
    // the fetch time in would make every run hash differently.
    if let Some(seen) = str_field(record, "last_seen").and_then(parse_utc) {
        entity.set_attr(
            attrs::LAST_SEEN,
            AttrValue::new(json!(seen.to_rfc3339()), SOURCE_ENDPOINT, at),
        );
    }

    Some(entity)
}

fn normalize_interface(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let hostname = str_field(record, "hostname")?;
    let adapter = str_field(record, "adapter")?;
    let at = fetched_at;

    let mut entity = CanonicalEntity::new(NaturalKey::interface(hostname, adapter), SOURCE_ENDPOINT);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(adapter), SOURCE_ENDPOINT, at));
    entity.set_attr(
        attrs::DEVICE,
        AttrValue::new(json!(hostname.to_lowercase()), SOURCE_ENDPOINT, at),
    );
    if let Some(mac) = str_field(record, "mac").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_ENDPOINT, at));
    }

    Some(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use serde_json::json;

    #[test]
    fn test_device_and_interface() {
        let payload = json!({
            "devices": [
                {"hostname": "web01", "uuid": "a1b2", "os_name": "Ubuntu",
                 "antivirus_status": "protected", "threat_count": 0,
                 "mac_address": "00:1A:2B:3C:4D:5E",
                 "last_seen": "2025-06-01T09:00:00Z"}
            ],
            "interfaces": [
                {"hostname": "web01", "adapter": "eth0", "mac": "00:1a:2b:3c:4d:5e"}
            ]
        });
        let (entities, warnings) = normalize(&payload, Utc::now());
        assert!(warnings.is_empty());
        assert_eq!(entities.len(), 2);

        let device = entities.iter().find(|e| e.kind == EntityKind::Device).unwrap();
        assert_eq!(device.attr_str(attrs::AV_STATUS), Some("protected"));
        assert_eq!(device.attr_str(attrs::MAC_ADDRESS), Some("00:1a:2b:3c:4d:5e"));

        let interface = entities.iter().find(|e| e.kind == EntityKind::Interface).unwrap();
        assert_eq!(interface.natural_key, NaturalKey::interface("web01", "eth0"));
    }

    #[test]
    fn test_missing_av_status_defaults_unknown() {
        let (entities, _) = normalize(&json!({"devices": [{"hostname": "x"}]}), Utc::now());
        assert_eq!(entities[0].attr_str(attrs::AV_STATUS), Some("unknown"));
    }

    #[test]
    fn test_malformed_records_skipped() {
        let payload = json!({
            "devices": [{"uuid": "no-hostname"}],
            "interfaces": [{"hostname": "web01"}]
        });
        let (entities, warnings) = normalize(&payload, Utc::now());
        assert!(entities.is_empty());
        assert_eq!(warnings.len(), 2);
    }
}
