//! Normalizer for the firewall appliance source.
//!
//! The appliance reports itself (system status), the hosts it has
//! detected on its segments, its own interfaces, VLANs, configured
//! subnets, DHCP leases, and the ARP table. Leases and ARP entries
//! become `/32` host addresses; configured subnets become prefixes.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::{canonical_mac, normalize_cidr, observed_at, parse_utc, str_field};
use crate::entity::{attrs, AttrValue, CanonicalEntity, NaturalKey, SOURCE_FIREWALL};

/// Hostnames that are really UUIDs or MACs belong to hosts the appliance
/// could not resolve; they are almost always VMs or transient clients.
fn uuid_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$")
            .expect("static pattern")
    })
}

fn mac_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^([a-f0-9]{2}[:-]){5}[a-f0-9]{2}$").expect("static pattern")
    })
}

const GENERIC_VM_NAMES: [&str; 4] = ["valuearray", "unknown-", "generic-", "vm-"];

/// Infers the device class from hostname shape and reported hardware.
fn classify(hostname: &str, hardware_type: &str) -> &'static str {
    let lower = hostname.to_lowercase();
    if uuid_pattern().is_match(&lower)
        || mac_pattern().is_match(&lower)
        || GENERIC_VM_NAMES.iter().any(|name| lower.contains(name))
    {
        "virtual"
    } else if hardware_type.contains("Firewall") || lower == "fortigate" {
        "firewall"
    } else {
        "physical"
    }
}

/// Normalizes a firewall appliance payload.
pub fn normalize(
    payload: &Value,
    site: &str,
    fetched_at: DateTime<Utc>,
) -> (Vec<CanonicalEntity>, Vec<String>) {
    let mut entities = Vec::new();
    let mut warnings = Vec::new();

    let appliance_host = normalize_appliance(payload, fetched_at, &mut entities);

    for (index, record) in array(payload, "devices") {
        if let Some(entity) = normalize_device(record, fetched_at) {
            entities.push(entity);
        } else {
            warnings.push(format!("firewall devices[{}]: missing hostname, skipped", index));
        }
    }

    for (index, record) in array(payload, "interfaces") {
        match normalize_interface(record, appliance_host.as_deref(), fetched_at) {
            Some((interface, addresses)) => {
                entities.push(interface);
                entities.extend(addresses);
            }
            None => warnings.push(format!(
                "firewall interfaces[{}]: missing name or owning device, skipped",
                index
            )),
        }
    }

    for (index, record) in array(payload, "vlans") {
        if let Some(entity) = normalize_vlan(record, site, fetched_at) {
            entities.push(entity);
        } else {
            warnings.push(format!("firewall vlans[{}]: missing or invalid vlan_id, skipped", index));
        }
    }

    for (index, record) in array(payload, "prefixes") {
        if let Some(entity) = normalize_prefix(record, site, fetched_at) {
            entities.push(entity);
        } else {
            warnings.push(format!("firewall prefixes[{}]: missing or invalid subnet, skipped", index));
        }
    }

    for (index, record) in array(payload, "dhcp_leases") {
        if let Some(entity) = normalize_lease(record, fetched_at) {
            entities.push(entity);
        } else {
            warnings.push(format!("firewall dhcp_leases[{}]: invalid ip, skipped", index));
        }
    }

    for (index, record) in array(payload, "arp_table") {
        if let Some(entity) = normalize_arp(record, fetched_at) {
            entities.push(entity);
        } else {
            warnings.push(format!("firewall arp_table[{}]: invalid ip, skipped", index));
        }
    }

    (entities, warnings)
}

fn array<'a>(payload: &'a Value, field: &str) -> impl Iterator<Item = (usize, &'a Value)> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
        .iter()
        .enumerate()
}

/// The appliance itself is a device: the interfaces, VLANs, and subnets
/// it reports hang off it.
fn normalize_appliance(
    payload: &Value,
    fetched_at: DateTime<Utc>,
    entities: &mut Vec<CanonicalEntity>,
) -> Option<String> {
    let hostname = str_field(payload, "hostname")?;
    let at = fetched_at;
    let mut entity = CanonicalEntity::new(NaturalKey::device(hostname), SOURCE_FIREWALL);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(hostname), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::DEVICE_CLASS, AttrValue::new(json!("firewall"), SOURCE_FIREWALL, at));
    if let Some(serial) = str_field(payload, "serial") {
        entity.set_attr(attrs::SERIAL_NUMBER, AttrValue::new(json!(serial), SOURCE_FIREWALL, at));
    }
    if let Some(version) = str_field(payload, "os_version") {
        entity.set_attr(attrs::OS_VERSION, AttrValue::new(json!(version), SOURCE_FIREWALL, at));
    }
    let hostname = hostname.to_string();
    entities.push(entity);
    Some(hostname)
}

fn normalize_device(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let hostname = str_field(record, "hostname")?;
    let at = observed_at(record, "last_seen", fetched_at);
    let hardware_type = str_field(record, "hardware_type").unwrap_or("");

    let mut entity = CanonicalEntity::new(NaturalKey::device(hostname), SOURCE_FIREWALL);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(hostname), SOURCE_FIREWALL, at));
    entity.set_attr(
        attrs::DEVICE_CLASS,
        AttrValue::new(json!(classify(hostname, hardware_type)), SOURCE_FIREWALL, at),
    );

    if let Some(serial) = str_field(record, "serial") {
        entity.set_attr(attrs::SERIAL_NUMBER, AttrValue::new(json!(serial), SOURCE_FIREWALL, at));
    }
    if let Some(vendor) = str_field(record, "hardware_vendor") {
        entity.set_attr(attrs::MANUFACTURER, AttrValue::new(json!(vendor), SOURCE_FIREWALL, at));
    }
    if !hardware_type.is_empty() {
        entity.set_attr(attrs::MODEL, AttrValue::new(json!(hardware_type), SOURCE_FIREWALL, at));
    }
    if let Some(os) = str_field(record, "os_name") {
        entity.set_attr(attrs::OPERATING_SYSTEM, AttrValue::new(json!(os), SOURCE_FIREWALL, at));
    }
    if let Some(version) = str_field(record, "os_version") {
        entity.set_attr(attrs::OS_VERSION, AttrValue::new(json!(version), SOURCE_FIREWALL, at));
    }
    if let Some(mac) = str_field(record, "mac").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_FIREWALL, at));
    }
    // Only a payload-supplied timestamp becomes an attribute: stamping
    // the fetch time in would make every run hash differently.
    if let Some(seen) = str_field(record, "last_seen").and_then(parse_utc) {
        entity.set_attr(
            attrs::LAST_SEEN,
            AttrValue::new(json!(seen.to_rfc3339()), SOURCE_FIREWALL, at),
        );
    }

    Some(entity)
}

fn normalize_interface(
    record: &Value,
    appliance_host: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Option<(CanonicalEntity, Vec<CanonicalEntity>)> {
    let name = str_field(record, "name")?;
    let device = str_field(record, "device").or(appliance_host)?;
    let at = fetched_at;

    let mut entity = CanonicalEntity::new(NaturalKey::interface(device, name), SOURCE_FIREWALL);
    entity.set_attr(attrs::NAME, AttrValue::new(json!(name), SOURCE_FIREWALL, at));
    entity.set_attr(
        attrs::DEVICE,
        AttrValue::new(json!(device.to_lowercase()), SOURCE_FIREWALL, at),
    );

    let status = match str_field(record, "status") {
        Some("up") => "active",
        Some("down") => "inactive",
        _ => "unknown",
    };
    entity.set_attr(attrs::STATUS, AttrValue::new(json!(status), SOURCE_FIREWALL, at));

    if let Some(mac) = str_field(record, "mac").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_FIREWALL, at));
    }
    if let Some(mtu) = record.get("mtu").and_then(Value::as_u64) {
        entity.set_attr(attrs::MTU, AttrValue::new(json!(mtu), SOURCE_FIREWALL, at));
    }
    if let Some(vid) = record.get("vlan_id").and_then(Value::as_u64) {
        entity.set_attr(attrs::VLAN_ID, AttrValue::new(json!(vid), SOURCE_FIREWALL, at));
    }
    if let Some(description) = str_field(record, "description") {
        entity.set_attr(attrs::DESCRIPTION, AttrValue::new(json!(description), SOURCE_FIREWALL, at));
    }

    // The interface's own addresses are registry objects in their own
    // right, assigned to this interface.
    let mut addresses = Vec::new();
    let mut cidrs = Vec::new();
    for raw in record
        .get("addresses")
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
    {
        let Some(cidr) = raw.as_str().and_then(normalize_cidr) else {
            continue;
        };
        let mut ip = CanonicalEntity::new(NaturalKey::ip_address(&cidr), SOURCE_FIREWALL);
        ip.set_attr(attrs::ADDRESS, AttrValue::new(json!(cidr), SOURCE_FIREWALL, at));
        ip.set_attr(attrs::DEVICE, AttrValue::new(json!(device.to_lowercase()), SOURCE_FIREWALL, at));
        ip.set_attr(attrs::INTERFACE, AttrValue::new(json!(name), SOURCE_FIREWALL, at));
        ip.set_attr(attrs::STATUS, AttrValue::new(json!("active"), SOURCE_FIREWALL, at));
        ip.set_attr(attrs::LEASE_TYPE, AttrValue::new(json!("static"), SOURCE_FIREWALL, at));
        addresses.push(ip);
        cidrs.push(json!(cidr));
    }
    if !cidrs.is_empty() {
        entity.set_attr(attrs::ADDRESSES, AttrValue::new(Value::Array(cidrs), SOURCE_FIREWALL, at));
    }

    Some((entity, addresses))
}

fn normalize_vlan(record: &Value, site: &str, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let vid = record.get("vlan_id").and_then(Value::as_u64)?;
    if vid == 0 || vid > 4094 {
        return None;
    }
    let vid = vid as u16;
    let at = fetched_at;
    let name = str_field(record, "name")
        .map(str::to_string)
        .unwrap_or_else(|| format!("VLAN-{}", vid));

    let mut entity = CanonicalEntity::new(NaturalKey::vlan(vid, site), SOURCE_FIREWALL);
    entity.set_attr(attrs::VID, AttrValue::new(json!(vid), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::NAME, AttrValue::new(json!(name), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::SITE, AttrValue::new(json!(site), SOURCE_FIREWALL, at));
    if let Some(description) = str_field(record, "description") {
        entity.set_attr(attrs::DESCRIPTION, AttrValue::new(json!(description), SOURCE_FIREWALL, at));
    }
    Some(entity)
}

fn normalize_prefix(record: &Value, site: &str, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let cidr = str_field(record, "subnet").and_then(normalize_cidr)?;
    let at = fetched_at;

    let mut entity = CanonicalEntity::new(NaturalKey::prefix(&cidr, site), SOURCE_FIREWALL);
    entity.set_attr(attrs::PREFIX, AttrValue::new(json!(cidr), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::SITE, AttrValue::new(json!(site), SOURCE_FIREWALL, at));
    if let Some(description) = str_field(record, "description") {
        entity.set_attr(attrs::DESCRIPTION, AttrValue::new(json!(description), SOURCE_FIREWALL, at));
    }
    if let Some(vid) = record.get("vlan_id").and_then(Value::as_u64) {
        entity.set_attr(attrs::VLAN_ID, AttrValue::new(json!(vid), SOURCE_FIREWALL, at));
    }
    Some(entity)
}

fn normalize_lease(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let cidr = str_field(record, "ip").and_then(normalize_cidr)?;
    let at = fetched_at;
    let hostname = str_field(record, "hostname");

    let mut entity = CanonicalEntity::new(NaturalKey::ip_address(&cidr), SOURCE_FIREWALL);
    entity.set_attr(attrs::ADDRESS, AttrValue::new(json!(cidr), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::LEASE_TYPE, AttrValue::new(json!("dhcp"), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::STATUS, AttrValue::new(json!("active"), SOURCE_FIREWALL, at));
    entity.set_attr(
        attrs::DESCRIPTION,
        AttrValue::new(
            json!(format!("DHCP lease for {}", hostname.unwrap_or("unknown host"))),
            SOURCE_FIREWALL,
            at,
        ),
    );
    entity.set_attr(
        attrs::INTERFACE,
        AttrValue::new(
            json!(str_field(record, "interface").unwrap_or("lan")),
            SOURCE_FIREWALL,
            at,
        ),
    );
    if let Some(mac) = str_field(record, "mac").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_FIREWALL, at));
    }
    if let Some(hostname) = hostname {
        entity.set_attr(attrs::HOSTNAME, AttrValue::new(json!(hostname), SOURCE_FIREWALL, at));
    }
    Some(entity)
}

fn normalize_arp(record: &Value, fetched_at: DateTime<Utc>) -> Option<CanonicalEntity> {
    let cidr = str_field(record, "ip").and_then(normalize_cidr)?;
    let at = fetched_at;

    let mut entity = CanonicalEntity::new(NaturalKey::ip_address(&cidr), SOURCE_FIREWALL);
    entity.set_attr(attrs::ADDRESS, AttrValue::new(json!(cidr), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::LEASE_TYPE, AttrValue::new(json!("arp"), SOURCE_FIREWALL, at));
    entity.set_attr(attrs::STATUS, AttrValue::new(json!("active"), SOURCE_FIREWALL, at));
    entity.set_attr(
        attrs::DESCRIPTION,
        AttrValue::new(json!("ARP table entry"), SOURCE_FIREWALL, at),
    );
    if let Some(mac) = str_field(record, "mac").and_then(canonical_mac) {
        entity.set_attr(attrs::MAC_ADDRESS, AttrValue::new(json!(mac), SOURCE_FIREWALL, at));
    }
    if let Some(interface) = str_field(record, "interface") {
        entity.set_attr(attrs::INTERFACE, AttrValue::new(json!(interface), SOURCE_FIREWALL, at));
    }
    Some(entity)
}
