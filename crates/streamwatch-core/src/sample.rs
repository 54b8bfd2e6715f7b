//! Normalized telemetry samples.
//!
//! A `Sample` is one snapshot of a device's transmission state at a point
//! in time: an optional GPS fix plus the metrics of every bonded link the
//! device reported. Samples are append-only; once stored they are never
//! mutated.
//!
//! Optional fields that the device did not report stay `None`. Zero is a
//! legitimate observed value (zero packet loss, zero dropped packets) and
//! must remain distinguishable from "not reported".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GPS fix attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters, when the receiver reports one
    pub altitude: Option<f64>,
    /// NMEA-style fix quality indicator
    pub fix_quality: Option<u8>,
}

impl GpsFix {
    /// Create a fix from a bare coordinate pair.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            fix_quality: None,
        }
    }
}

/// Physical transport class of a bonded link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Cellular,
    Ethernet,
    Wifi,
    Usb,
    Other,
}

impl InterfaceKind {
    /// Classify an interface from its OS-level name.
    ///
    /// Transmitters report links under their kernel interface names
    /// (`eth0`, `wlan0`, `wwan1`, ...); this is a best-effort mapping and
    /// anything unrecognized is `Other`.
    pub fn from_interface_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        if lower.starts_with("wwan")
            || lower.starts_with("cell")
            || lower.starts_with("lte")
            || lower.starts_with("modem")
            || lower.starts_with("sim")
        {
            Self::Cellular
        } else if lower.starts_with("eth") || lower.starts_with("lan") || lower.starts_with("en") {
            Self::Ethernet
        } else if lower.starts_with("wlan") || lower.starts_with("wifi") || lower.starts_with("wl")
        {
            Self::Wifi
        } else if lower.starts_with("usb") {
            Self::Usb
        } else {
            Self::Other
        }
    }
}

/// Metrics of one bonded link at the sample's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceReading {
    /// Interface name as reported by the device (`eth0`, `wwan1`, ...)
    pub name: String,
    /// Transport class derived from the name
    pub kind: InterfaceKind,
    /// Receive bitrate in kbit/s
    pub bitrate_kbps: Option<u64>,
    /// One-way delay in milliseconds
    pub one_way_delay_ms: Option<u64>,
    /// Packet loss rate in percent
    pub loss_percent: Option<f64>,
    /// Cumulative dropped-packet count
    pub dropped_packets: Option<u64>,
    /// Whether the link currently carries traffic
    pub link_up: bool,
}

impl InterfaceReading {
    /// Create a reading with all metrics unreported.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = InterfaceKind::from_interface_name(&name);
        Self {
            name,
            kind,
            bitrate_kbps: None,
            one_way_delay_ms: None,
            loss_percent: None,
            dropped_packets: None,
            link_up: false,
        }
    }
}

/// One normalized telemetry snapshot.
///
/// `seq` is the sample's position within its session. The store assigns it
/// at append time; indices within a session are contiguous starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device that produced this sample
    pub device_id: String,
    /// Wall-clock time of the observation
    pub timestamp: DateTime<Utc>,
    /// Sequence index within the owning session
    pub seq: u64,
    /// GPS fix, absent when the device reported none
    pub gps: Option<GpsFix>,
    /// Per-link metrics; may be empty only for partial samples
    pub links: Vec<InterfaceReading>,
}

impl Sample {
    /// Create a sample; the store overwrites `seq` on append.
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            seq: 0,
            gps: None,
            links: Vec::new(),
        }
    }

    /// Attach a GPS fix.
    pub fn with_gps(mut self, gps: GpsFix) -> Self {
        self.gps = Some(gps);
        self
    }

    /// Attach an interface reading.
    pub fn with_link(mut self, link: InterfaceReading) -> Self {
        self.links.push(link);
        self
    }
}
