//! # Source Normalizers
//!
//! Each source reports the estate in its own vocabulary: the firewall
//! appliance speaks interfaces and DHCP leases, the MDM service speaks
//! enrolled devices and compliance, the endpoint console speaks agents
//! and antivirus state. The normalizers translate one source's raw
//! payload into canonical entities, tagging every attribute with the
//! contributing source.
//!
//! Normalizers are pure functions: no I/O, no shared state. A malformed
//! record is skipped and reported as a per-record warning; one bad record
//! never discards the rest of the source's contribution.
//!
//! ## Unit and format conversions
//!
//! | Input | Canonical form |
//! |-------|----------------|
//! | MAC address (any case/separator) | lowercase, colon-separated |
//! | IP address with or without mask | CIDR (`/32`, `/128` host default) |
//! | Timestamps | RFC 3339 UTC |

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::net::IpAddr;

use crate::entity::{CanonicalEntity, SOURCE_ENDPOINT, SOURCE_FIREWALL, SOURCE_MDM};

pub mod endpoint;
pub mod firewall;
pub mod mdm;

/// Normalizes one source's raw payload into canonical entities.
///
/// # Arguments
///
/// * `source_id` - Which source produced the payload
/// * `payload` - The raw fetched payload
/// * `site` - Site scope applied to VLANs and prefixes
/// * `fetched_at` - Observation time used when a record carries none
///
/// # Returns
///
/// The entities recognized in the payload plus one warning per skipped
/// record. An unknown source id contributes nothing and one warning.
pub fn normalize(
    source_id: &str,
    payload: &Value,
    site: &str,
    fetched_at: DateTime<Utc>,
) -> (Vec<CanonicalEntity>, Vec<String>) {
    match source_id {
        SOURCE_FIREWALL => firewall::normalize(payload, site, fetched_at),
        SOURCE_MDM => mdm::normalize(payload, fetched_at),
        SOURCE_ENDPOINT => endpoint::normalize(payload, fetched_at),
        other => (
            Vec::new(),
            vec![format!("unknown source id '{}', payload ignored", other)],
        ),
    }
}

/// Canonicalizes a MAC address to lowercase colon-separated form.
///
/// Accepts any of the common separators (`:`, `-`, `.`) or none at all;
/// returns `None` when the input does not contain exactly twelve hex
/// digits.
///
/// # Example
///
/// ```rust
/// use infrasync_model::normalize::canonical_mac;
///
/// assert_eq!(canonical_mac("00-1A-2B-3C-4D-5E").as_deref(), Some("00:1a:2b:3c:4d:5e"));
/// assert_eq!(canonical_mac("001a.2b3c.4d5e").as_deref(), Some("00:1a:2b:3c:4d:5e"));
/// assert_eq!(canonical_mac("not-a-mac"), None);
/// ```
pub fn canonical_mac(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let lower = digits.to_lowercase();
    let pairs: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

/// Normalizes an IP address, with or without a mask, to CIDR notation.
///
/// A bare host address gets `/32` (IPv4) or `/128` (IPv6). Returns
/// `None` for unparseable addresses or out-of-range masks.
pub fn normalize_cidr(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (addr_part, mask_part) = match raw.split_once('/') {
        Some((a, m)) => (a, Some(m)),
        None => (raw, None),
    };

    let addr: IpAddr = addr_part.trim().parse().ok()?;
    let max_mask = if addr.is_ipv4() { 32 } else { 128 };

    let mask: u8 = match mask_part {
        Some(m) => m.trim().parse().ok()?,
        None => max_mask,
    };
    if mask > max_mask {
        return None;
    }

    Some(format!("{}/{}", addr, mask))
}

/// Parses a source timestamp into UTC.
///
/// Accepts RFC 3339 (with `Z` or an explicit offset) and the bare
/// `YYYY-MM-DDTHH:MM:SS` form some consoles emit, which is taken as UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Record-level observation time: the record's own timestamp when it
/// carries a parseable one, the fetch time otherwise.
pub(crate) fn observed_at(record: &Value, field: &str, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
    record
        .get(field)
        .and_then(Value::as_str)
        .and_then(parse_utc)
        .unwrap_or(fetched_at)
}

/// Fetches a non-empty string field from a record.
pub(crate) fn str_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
