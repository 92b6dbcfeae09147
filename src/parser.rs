use crate::types::TraceRecord;
use regex::Regex;
use std::sync::LazyLock;

/// Turns raw device output into a [`TraceRecord`].
pub trait ResponseParser {
    fn parse(&self, raw: &str) -> TraceRecord;
}

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(input-interface|input-status|input-line-status|output-interface|output-status|output-line-status|Action|Drop-reason):\s*(.*?)\s*$")
        .expect("field regex")
});

static TRANSLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btranslate\s+(\S+)\s+to\s+(\S+)").expect("translate regex")
});

/// Parses the `packet-tracer ... detail` output of the firewall.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketTracerParser;

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

impl PacketTracerParser {
    /// First NAT phase: rule text from its Config section, endpoints from the
    /// translate line.
    fn nat(lines: &[&str], record: &mut TraceRecord) {
        let mut in_nat = false;
        let mut in_config = false;
        for line in lines {
            let line = line.trim();
            if line.starts_with("Phase:") {
                if in_nat && record.nat_rule.is_some() {
                    return;
                }
                in_nat = false;
                in_config = false;
                continue;
            }
            if let Some(kind) = line.strip_prefix("Type:") {
                in_nat = kind.trim().eq_ignore_ascii_case("NAT");
                continue;
            }
            if !in_nat {
                continue;
            }
            if line.starts_with("Config:") {
                in_config = true;
                continue;
            }
            if line.starts_with("Additional Information:") {
                in_config = false;
                continue;
            }
            if in_config && record.nat_rule.is_none() {
                record.nat_rule = non_empty(line);
            }
            if record.nat_from.is_none() {
                if let Some(caps) = TRANSLATE.captures(line) {
                    record.nat_from = Some(caps[1].to_string());
                    record.nat_to = Some(caps[2].to_string());
                }
            }
        }
    }
}

impl ResponseParser for PacketTracerParser {
    fn parse(&self, raw: &str) -> TraceRecord {
        let mut record = TraceRecord::default();
        let lines: Vec<&str> = raw.lines().collect();
        for line in &lines {
            let Some(caps) = FIELD.captures(line) else {
                continue;
            };
            let value = non_empty(&caps[2]);
            let slot = match &caps[1] {
                "input-interface" => &mut record.input_interface,
                "input-status" => &mut record.input_interface_status,
                "input-line-status" => &mut record.input_interface_line_status,
                "output-interface" => &mut record.output_interface,
                "output-status" => &mut record.output_interface_status,
                "output-line-status" => &mut record.output_interface_line_status,
                "Action" => &mut record.action,
                _ => {
                    if record.drop_reason.is_some() {
                        continue;
                    }
                    record.drop_reason = value.map(|v| match v.split_once(", Drop-location:") {
                        Some((reason, _)) => reason.to_string(),
                        None => v,
                    });
                    continue;
                }
            };
            if slot.is_none() {
                *slot = value;
            }
        }
        Self::nat(&lines, &mut record);
        record
    }
}
