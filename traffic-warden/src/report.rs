//! Report composition
//!
//! Builds the summary payload (killed + high usage sections, or the
//! all-clear), and optional per-server detail payloads. Name obfuscation is
//! applied here and nowhere else.

use crate::chat::{ReportPayload, COLOR_AMBER, COLOR_GREEN, COLOR_RED, FIELD_VALUE_LIMIT};
use crate::executor::ActionResult;
use crate::reconciler::ReportSlot;
use crate::usage::{Bucket, ByteUnit, Thresholds, UsageRecord};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const MASK_CHAR: char = '*';

pub const KILLED_SECTION: &str = "Killed";
pub const HIGH_USAGE_SECTION: &str = "High Usage";

/// Characters the summary sections may use together; the rest of the embed
/// total is left to title, description, field names and footer
const SECTION_TEXT_BUDGET: usize = 5000;
/// Room kept for the trailing "… and N more" line
const OVERFLOW_RESERVE: usize = 24;

#[derive(Debug, Clone)]
pub struct ComposerOptions {
    pub always_send: bool,
    pub obfuscate_names: bool,
    pub per_server: bool,
    pub unit: ByteUnit,
    pub thresholds: Thresholds,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self {
            always_send: false,
            obfuscate_names: false,
            per_server: false,
            unit: ByteUnit::Auto,
            thresholds: Thresholds::default(),
        }
    }
}

/// Payloads produced for one cycle
#[derive(Debug, Clone, Default)]
pub struct ComposedReport {
    /// `None` leaves the existing summary message untouched
    pub summary: Option<ReportPayload>,
    pub servers: Vec<(ReportSlot, ReportPayload)>,
}

pub struct ReportComposer {
    options: ComposerOptions,
}

/// Keeps first and last character, masks the rest; names of two characters or less pass through
pub fn obfuscate_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= 2 {
        return name.to_string();
    }

    let mut masked = String::with_capacity(name.len());
    masked.push(chars[0]);
    masked.extend(std::iter::repeat(MASK_CHAR).take(chars.len() - 2));
    masked.push(chars[chars.len() - 1]);
    masked
}

/// Packs lines into field values that stay under the per-field limit.
/// Continuation fields are named "<section> (cont.)". Lines past `budget`
/// collapse into a single "… and N more" line.
fn section_fields(section: &str, lines: &[String], budget: &mut usize) -> Vec<(String, String)> {
    let mut values = FieldValues::default();

    for (i, line) in lines.iter().enumerate() {
        let cost = line.chars().count() + 1;
        if cost + OVERFLOW_RESERVE > *budget {
            values.push(&format!("… and {} more", lines.len() - i));
            *budget = budget.saturating_sub(OVERFLOW_RESERVE);
            break;
        }
        values.push(line);
        *budget -= cost;
    }

    values
        .finish()
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let name = if i == 0 {
                section.to_string()
            } else {
                format!("{section} (cont.)")
            };
            (name, value)
        })
        .collect()
}

#[derive(Default)]
struct FieldValues {
    done: Vec<String>,
    current: String,
    current_len: usize,
}

impl FieldValues {
    fn push(&mut self, line: &str) {
        let len = line.chars().count();
        if !self.current.is_empty() && self.current_len + 1 + len > FIELD_VALUE_LIMIT {
            self.done.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
        if !self.current.is_empty() {
            self.current.push('\n');
            self.current_len += 1;
        }
        self.current.push_str(line);
        self.current_len += len;
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}

impl ReportComposer {
    pub fn new(options: ComposerOptions) -> Self {
        Self { options }
    }

    pub fn compose(&self, records: &[UsageRecord], killed: &[ActionResult]) -> ComposedReport {
        self.compose_at(records, killed, Utc::now())
    }

    pub fn compose_at(&self, records: &[UsageRecord], killed: &[ActionResult], now: DateTime<Utc>) -> ComposedReport {
        let killed_ids: HashSet<u64> = killed
            .iter()
            .filter(|r| r.succeeded)
            .map(|r| r.record.id)
            .collect();

        let servers = if self.options.per_server {
            records
                .iter()
                .map(|r| {
                    (
                        ReportSlot::Server(r.id),
                        self.server_payload(r, killed_ids.contains(&r.id), now),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        ComposedReport {
            summary: self.summary_payload(records, &killed_ids, now),
            servers,
        }
    }

    fn display_name(&self, name: &str) -> String {
        if self.options.obfuscate_names {
            obfuscate_name(name)
        } else {
            name.to_string()
        }
    }

    fn traffic_line(&self, record: &UsageRecord) -> String {
        format!(
            "{} / {}",
            self.options.unit.format(record.outgoing_bytes),
            self.options.unit.format(record.included_bytes)
        )
    }

    fn server_line(&self, record: &UsageRecord) -> String {
        format!(
            "**{}**: {:.2}% ({})",
            self.display_name(&record.name),
            record.usage_percent,
            self.traffic_line(record)
        )
    }

    fn footer(&self) -> String {
        format!(
            "Notify at {}% | Kill at {}%",
            self.options.thresholds.notify_percent(),
            self.options.thresholds.kill_percent()
        )
    }

    fn summary_payload(
        &self,
        records: &[UsageRecord],
        killed_ids: &HashSet<u64>,
        now: DateTime<Utc>,
    ) -> Option<ReportPayload> {
        let killed: Vec<&UsageRecord> = records.iter().filter(|r| killed_ids.contains(&r.id)).collect();
        let high_usage: Vec<&UsageRecord> = records
            .iter()
            .filter(|r| r.bucket >= Bucket::Notify && !killed_ids.contains(&r.id))
            .collect();

        if killed.is_empty() && high_usage.is_empty() {
            if !self.options.always_send {
                return None;
            }
            let payload = ReportPayload::new(
                "Traffic Report: All Clear",
                format!("All {} servers are within traffic limits.", records.len()),
                COLOR_GREEN,
            )
            .field("Servers", records.len().to_string(), true)
            .footer(self.footer())
            .timestamp(now);
            return Some(payload);
        }

        let color = if !killed.is_empty() { COLOR_RED } else { COLOR_AMBER };
        let mut payload = ReportPayload::new(
            "Traffic Report",
            format!(
                "{} server(s) shut down, {} server(s) with high usage out of {} monitored.",
                killed.len(),
                high_usage.len(),
                records.len()
            ),
            color,
        );

        let mut budget = SECTION_TEXT_BUDGET;
        for (section, servers) in [(KILLED_SECTION, &killed), (HIGH_USAGE_SECTION, &high_usage)] {
            let lines: Vec<String> = servers.iter().map(|r| self.server_line(r)).collect();
            for (name, value) in section_fields(section, &lines, &mut budget) {
                payload = payload.field(name, value, false);
            }
        }

        Some(payload.footer(self.footer()).timestamp(now))
    }

    fn server_payload(&self, record: &UsageRecord, killed: bool, now: DateTime<Utc>) -> ReportPayload {
        let color = match record.bucket {
            Bucket::Kill => COLOR_RED,
            Bucket::Notify => COLOR_AMBER,
            Bucket::Ok => COLOR_GREEN,
        };
        let status = if killed {
            "shut down by warden".to_string()
        } else {
            record.status.clone()
        };

        ReportPayload::new(self.display_name(&record.name), String::new(), color)
            .field("Status", status, true)
            .field("Usage", format!("{:.2}%", record.usage_percent), true)
            .field("Traffic", self.traffic_line(record), true)
            .footer(self.footer())
            .timestamp(now)
    }
}
