//! Usage classification for outbound traffic
//!
//! Turns raw per-server counters into a `UsageRecord` and its bucket.
//! Buckets are derived from the raw byte ratio only; the rounded percent and
//! the formatted byte strings are presentation values.

use crate::error::{Result, WardenError};
use crate::provider::{ProviderCredential, ServerSnapshot};
use serde::Serialize;

/// Classification outcome, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bucket {
    Ok,
    Notify,
    Kill,
}

/// Notify and kill thresholds, in percent of the included traffic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    notify_percent: f64,
    kill_percent: f64,
}

impl Thresholds {
    pub fn new(notify_percent: f64, kill_percent: f64) -> Result<Self> {
        if !notify_percent.is_finite() || !kill_percent.is_finite() {
            return Err(WardenError::Config("thresholds must be finite numbers".into()));
        }
        if notify_percent < 0.0 {
            return Err(WardenError::Config(format!(
                "notify threshold must not be negative (got {notify_percent})"
            )));
        }
        if kill_percent < notify_percent {
            return Err(WardenError::Config(format!(
                "kill threshold ({kill_percent}) must be >= notify threshold ({notify_percent})"
            )));
        }

        Ok(Self {
            notify_percent,
            kill_percent,
        })
    }

    pub fn notify_percent(&self) -> f64 {
        self.notify_percent
    }

    pub fn kill_percent(&self) -> f64 {
        self.kill_percent
    }

    /// Boundaries are inclusive: a ratio equal to a threshold takes the higher bucket
    pub fn bucket_for(&self, raw_ratio: f64) -> Bucket {
        if raw_ratio >= self.kill_percent / 100.0 {
            Bucket::Kill
        } else if raw_ratio >= self.notify_percent / 100.0 {
            Bucket::Notify
        } else {
            Bucket::Ok
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            notify_percent: 50.0,
            kill_percent: 90.0,
        }
    }
}

/// Classified view of one server for the current cycle
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub outgoing_bytes: u64,
    pub included_bytes: u64,
    pub usage_percent: f64,
    pub raw_ratio: f64,
    pub bucket: Bucket,
    pub credential: ProviderCredential,
}

pub fn raw_ratio(outgoing_bytes: u64, included_bytes: u64) -> f64 {
    if included_bytes == 0 {
        0.0
    } else {
        outgoing_bytes as f64 / included_bytes as f64
    }
}

fn round_percent(raw_ratio: f64) -> f64 {
    (raw_ratio * 100.0 * 100.0).round() / 100.0
}

pub fn classify(snapshot: &ServerSnapshot, thresholds: &Thresholds) -> UsageRecord {
    let ratio = raw_ratio(snapshot.outgoing_bytes, snapshot.included_bytes);

    UsageRecord {
        id: snapshot.id,
        name: snapshot.name.clone(),
        status: snapshot.status.clone(),
        outgoing_bytes: snapshot.outgoing_bytes,
        included_bytes: snapshot.included_bytes,
        usage_percent: round_percent(ratio),
        raw_ratio: ratio,
        bucket: thresholds.bucket_for(ratio),
        credential: snapshot.credential.clone(),
    }
}

pub fn classify_all(snapshots: &[ServerSnapshot], thresholds: &Thresholds) -> Vec<UsageRecord> {
    snapshots.iter().map(|s| classify(s, thresholds)).collect()
}

/// How byte counts are rendered in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteUnit {
    /// Largest unit that keeps the value >= 1
    #[default]
    Auto,
    /// Always terabytes with two decimals
    Terabytes,
}

impl ByteUnit {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "tb" | "terabytes" => Some(Self::Terabytes),
            _ => None,
        }
    }

    pub fn format(&self, bytes: u64) -> String {
        match self {
            ByteUnit::Auto => format_bytes(bytes),
            ByteUnit::Terabytes => format_terabytes(bytes),
        }
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

pub fn format_terabytes(bytes: u64) -> String {
    format!("{:.2} TB", bytes as f64 / 1024f64.powi(4))
}
