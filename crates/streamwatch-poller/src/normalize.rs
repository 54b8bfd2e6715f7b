//! Sample normalization.
//!
//! Pure functions from a raw vendor status payload to a [`PollOutcome`].
//! Vendor firmwares are inconsistent about field names and value types
//! (numeric status codes vs. labels, numbers serialized as strings, links
//! as an array or a keyed map), so every accessor here tries the known
//! spellings in order and gives up with `None` rather than guessing.
//!
//! Required fields are the observation timestamp and at least one
//! interface reading; a payload missing either is a parse failure, and
//! the scheduler routes it as "unreachable". Whatever did parse is still
//! packaged as a partial sample so an open session's timeline stays
//! contiguous. Optional fields that are absent stay `None`; zero is a
//! legitimate observed value and must remain distinguishable from
//! "not reported".

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use streamwatch_client::RawPayload;
use streamwatch_core::{FailureKind, GpsFix, InterfaceReading, PollOutcome, Sample};

/// Broadcast state as reported by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Live,
    Idle,
}

/// Normalize one raw payload into a poll outcome.
pub fn normalize(device_id: &str, payload: &RawPayload) -> PollOutcome {
    let body = &payload.body;

    let Some(liveness) = parse_liveness(body) else {
        // No readable broadcast state at all; salvage what we can.
        let partial = build_partial(device_id, body, payload.fetched_at);
        return PollOutcome::Unreachable(FailureKind::Malformed, partial);
    };

    match liveness {
        Liveness::Idle => PollOutcome::Idle,
        Liveness::Live => {
            let timestamp = parse_timestamp(body);
            let links = parse_links(body);
            let gps = parse_gps(body);

            if let Some(ts) = timestamp {
                if !links.is_empty() {
                    let mut sample = Sample::new(device_id, ts);
                    sample.gps = gps;
                    sample.links = links;
                    return PollOutcome::Live(sample);
                }
            }

            // Live but missing a required field: timestamp or links.
            let mut partial =
                Sample::new(device_id, timestamp.unwrap_or(payload.fetched_at));
            partial.gps = gps;
            partial.links = links;
            PollOutcome::Unreachable(FailureKind::Malformed, Some(partial))
        }
    }
}

/// A partial sample for payloads whose status could not be read.
///
/// Returns `None` when nothing sample-worthy parsed either.
fn build_partial(device_id: &str, body: &Value, fetched_at: DateTime<Utc>) -> Option<Sample> {
    let gps = parse_gps(body);
    let links = parse_links(body);
    if gps.is_none() && links.is_empty() {
        return None;
    }
    let mut sample = Sample::new(device_id, parse_timestamp(body).unwrap_or(fetched_at));
    sample.gps = gps;
    sample.links = links;
    Some(sample)
}

/// Read the broadcast state, tolerating codes, labels and booleans.
///
/// Numeric codes follow the vendor convention 0=off, 1=idle, 2=on,
/// 3/4=error. An error state is an explicit "not broadcasting" answer,
/// so it maps to idle rather than unreachable.
fn parse_liveness(body: &Value) -> Option<Liveness> {
    let value = first_field(body, &["status", "channelStatus", "channel_status", "state"])?;

    if let Some(b) = value.as_bool() {
        return Some(if b { Liveness::Live } else { Liveness::Idle });
    }
    if let Some(code) = value.as_i64() {
        return liveness_from_code(code);
    }
    if let Some(s) = value.as_str() {
        let s = s.trim().to_ascii_lowercase();
        if let Ok(code) = s.parse::<i64>() {
            return liveness_from_code(code);
        }
        return match s.as_str() {
            "on" | "running" | "live" | "true" => Some(Liveness::Live),
            "off" | "idle" | "error" => Some(Liveness::Idle),
            _ => None,
        };
    }
    None
}

fn liveness_from_code(code: i64) -> Option<Liveness> {
    match code {
        2 => Some(Liveness::Live),
        0 | 1 | 3 | 4 => Some(Liveness::Idle),
        _ => None,
    }
}

/// Observation timestamp: epoch seconds or an RFC 3339 string.
fn parse_timestamp(body: &Value) -> Option<DateTime<Utc>> {
    let value = first_field(body, &["timestamp", "ts", "time"])?;
    if let Some(epoch) = value.as_i64() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    None
}

/// GPS fix: a `location` container or flat latitude/longitude keys.
fn parse_gps(body: &Value) -> Option<GpsFix> {
    let container = first_field(body, &["location", "gps", "position"]).unwrap_or(body);

    let latitude = number_field(container, &["latitude", "lat"])?;
    let longitude = number_field(container, &["longitude", "lon", "lng"])?;
    Some(GpsFix {
        latitude,
        longitude,
        altitude: number_field(container, &["altitude", "alt"]),
        fix_quality: unsigned_field(container, &["fix_quality", "fixQuality", "quality"])
            .and_then(|q| u8::try_from(q).ok()),
    })
}

/// Per-link readings: an array of objects, or a map of name to object.
///
/// Map form may carry aggregate keys next to the links (the vendor mixes
/// `total_links` and friends into the same object); those are skipped.
fn parse_links(body: &Value) -> Vec<InterfaceReading> {
    let Some(links) = first_field(body, &["links", "linkStats", "link_stats"]) else {
        return Vec::new();
    };

    match links {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| parse_link(item, None))
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !key.starts_with("total_"))
            .filter_map(|(key, item)| parse_link(item, Some(key.as_str())))
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_link(item: &Value, fallback_name: Option<&str>) -> Option<InterfaceReading> {
    let name = item
        .get("name")
        .or_else(|| item.get("itf_name"))
        .and_then(Value::as_str)
        .or(fallback_name)?
        .to_string();

    let mut reading = InterfaceReading::named(name);
    reading.bitrate_kbps =
        unsigned_field(item, &["rx_bitrate", "rxBitrate", "rx_kbits", "bitrate"]);
    reading.one_way_delay_ms = unsigned_field(item, &["owdR", "owd_r", "owd", "oneway", "rtt"]);
    reading.loss_percent = number_field(
        item,
        &["rx_percent_lost", "rx_percent_loss", "rx_loss_percent"],
    );
    reading.dropped_packets = unsigned_field(
        item,
        &["rx_lost_nb_packets", "rx_lost_packets", "rx_lost_nb", "rx_lost"],
    );
    // Links reported without an explicit flag are assumed to carry traffic.
    reading.link_up = first_field(item, &["up", "link_up", "connected"])
        .and_then(Value::as_bool)
        .unwrap_or(true);
    Some(reading)
}

/// First present field among the candidate spellings.
fn first_field<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| {
        let v = body.get(k)?;
        if v.is_null() { None } else { Some(v) }
    })
}

/// Numeric field, accepting numbers and number-ish strings,
/// comma decimal separators included.
fn number_field(body: &Value, keys: &[&str]) -> Option<f64> {
    let value = first_field(body, keys)?;
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    value
        .as_str()
        .and_then(|s| s.trim().replace(',', ".").parse::<f64>().ok())
}

fn unsigned_field(body: &Value, keys: &[&str]) -> Option<u64> {
    let n = number_field(body, keys)?;
    if n.is_finite() && n >= 0.0 {
        Some(n as u64)
    } else {
        None
    }
}
