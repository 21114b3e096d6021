//! Normalizer for the mobile-device-management source.
//!
//! The MDM service is authoritative for ownership and compliance; it
//! reports enrolled devices only, never network topology.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{canonical_mac, observed_at, parse_utc, str_field};
use crate::entity::{attrs, AttrValue, CanonicalEntity, NaturalKey, SOURCE_MDM};

/// Maps the service's compliance states onto the canonical vocabulary.
fn compliance(raw: &str) -> &'static str {
    match raw {
        "compliant" => "compliant",
        "noncompliant" => "non_compliant",
        _ => "unknown",
    }
}

/// Normalizes an MDM payload (`{"devices": [...]}`).
pub fn normalize(payload: &Value, fetched_at: DateTime<Utc>) -> (Vec<CanonicalEntity>, Vec<String>) {
    let mut entities = Vec::new();
    let mut warnings = Vec::new();

    let records = payload
        .get("devices")
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    for (index, record) in records.iter().enumerate() {
        match normalize_device(record, fetched_at) {
            Some(entity) => entities.push(entity),
            None => warnings.push(format!("mdm devices[{}]: missing deviceName, skipped", index)),
        }
    }

    (entities, warnings)
}

fn normalize_device(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let name = str_field(record, "deviceName")?;
    let at = observed_at(record, "lastSyncDateTime", fetched_at);

    let mut entity = CanonicalEntity::new(NaturalKey::device(name), SOURCE_MDM);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(name), SOURCE_MDM, at));

    let class = match str_field(record, "deviceType") {
        Some("virtual") => "virtual",
        _ => "physical",
    };
    entity.set_attr(attrs::DEVICE_CLASS, AttrValue::new(json!(class), SOURCE_MDM, at));

    let state = str_field(record, "complianceState").unwrap_or("unknown");
    entity.set_attr(attrs::COMPLIANCE, AttrValue::new(json!(compliance(state)), SOURCE_MDM, at));

    if let Some(serial) = str_field(record, "serialNumber") {
        entity.set_attr(attrs::SERIAL_NUMBER, AttrValue::new(json!(serial), SOURCE_MDM, at));
    }
    if let Some(owner) = str_field(record, "userPrincipalName") {
        entity.set_attr(attrs::OWNER, AttrValue::new(json!(owner), SOURCE_MDM, at));
    }
    if let Some(manufacturer) = str_field(record, "manufacturer") {
        entity.set_attr(attrs::MANUFACTURER, AttrValue::new(json!(manufacturer), SOURCE_MDM, at));
    }
    if let Some(model) = str_field(record, "model") {
        entity.set_attr(attrs::MODEL, AttrValue::new(json!(model), SOURCE_MDM, at));
    }
    if let Some(os) = str_field(record, "operatingSystem") {
        entity.set_attr(attrs::OPERATING_SYSTEM, AttrValue::new(json!(os), SOURCE_MDM, at));
    }
    if let Some(version) = str_field(record, "osVersion") {
        entity.set_attr(attrs::OS_VERSION, AttrValue::new(json!(version), SOURCE_MDM, at));
    }
    if let Some(mac) = str_field(record, "macAddress").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_MDM, at));
    }
    // Only a payload-supplied timestamp becomes an attribute: stamping
    // the fetch time in would make every run hash differently.
    if let Some(seen) = str_field(record, "lastSyncDateTime").and_then(parse_utc) {
        entity.set_attr(attrs::LAST_SEEN, AttrValue::new(json!(seen.to_rfc3339()), SOURCE_MDM, at));
    }

    Some(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_device() -> Value {
        json!({
            "deviceName": "LAPTOP-042",
            "serialNumber": "C02XK1ZKJGH5",
            "manufacturer": "Apple",
            "model": "MacBookPro18,3",
            "operatingSystem": "macOS",
            "osVersion": "14.5",
            "userPrincipalName": "alice@example.com",
            "complianceState": "noncompliant",
            "lastSyncDateTime": "2025-06-01T08:30:00Z"
        })
    }

    #[test]
    fn test_device_fields() {
        let (entities, warnings) = normalize(&json!({"devices": [sample_device()]}), Utc::now());
        assert!(warnings.is_empty());
        assert_eq!(entities.len(), 1);

        let device = &entities[0];
        assert_eq!(device.natural_key, NaturalKey::device("laptop-042"));
        assert_eq!(device.attr_str(attrs::OWNER), Some("alice@example.com"));
        assert_eq!(device.attr_str(attrs::COMPLIANCE), Some("non_compliant"));
        assert_eq!(device.attr_str(attrs::SERIAL_NUMBER), Some("C02XK1ZKJGH5"));
    }

    #[test]
    fn test_sync_time_becomes_observed_at() {
        let (entities, _) = normalize(&json!({"devices": [sample_device()]}), Utc::now());
        let owner = &entities[0].attributes[attrs::OWNER];
        assert_eq!(owner.observed_at.to_rfc3339(), "2025-06-01T08:30:00+00:00");
    }

    #[test]
    fn test_unknown_compliance_state() {
        let (entities, _) = normalize(
            &json!({"devices": [{"deviceName": "x", "complianceState": "inGracePeriod"}]}),
            Utc::now(),
        );
        assert_eq!(entities[0].attr_str(attrs::COMPLIANCE), Some("unknown"));
    }

    #[test]
    fn test_nameless_record_skipped() {
        let (entities, warnings) = normalize(
            &json!({"devices": [{"serialNumber": "S1"}, sample_device()]}),
            Utc::now(),
        );
        assert_eq!(entities.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("devices[0]"));
    }
}
