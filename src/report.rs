use crate::spec::show_value;
use crate::types::{Counters, Grade, RunSummary};
use anyhow::{Context, Result};
use colored::Colorize;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

fn counts_line(label: &str, c: &Counters) -> String {
    format!(
        "{} Total: {}, Passed: {}, Failed: {}, Skipped: {}",
        label.bold(),
        c.total,
        c.pass.to_string().green(),
        if c.fail > 0 {
            c.fail.to_string().red().bold().to_string()
        } else {
            c.fail.to_string().green().to_string()
        },
        if c.skip > 0 {
            c.skip.to_string().yellow().to_string()
        } else {
            c.skip.to_string()
        }
    )
}

pub fn render_human(summary: &RunSummary, hide_passes: bool) -> String {
    let mut out = String::new();
    for (group, counters) in &summary.statistics.groups {
        out.push_str(&counts_line(&format!("{group}:"), counters));
        out.push('\n');
        for o in summary.outcomes.iter().filter(|o| &o.testlet.interface == group) {
            let t = &o.testlet;
            match o.grade {
                Grade::Pass => {
                    if !hide_passes {
                        out.push_str(&format!("{} {}\n", "[PASS]".green().bold(), t.command.green()));
                    }
                }
                Grade::Fail => {
                    out.push_str(&format!("{} {}\n", "[FAIL]".red().bold(), t.command.red().bold()));
                    out.push_str(&format!("  {} {}\n", "expected:".bold(), t.expected_result));
                    out.push_str(&format!("  {} {}\n", "actual  :".bold(), o.observed_action));
                    if !o.drop_reason.is_empty() {
                        out.push_str(&format!("  {} {}\n", "reason  :".bold(), o.drop_reason));
                    }
                }
                Grade::Skip => {
                    out.push_str(&format!(
                        "{} {}\n",
                        "[SKIP]".yellow().bold(),
                        show_value(&Value::Mapping(t.origin_record.clone()))
                    ));
                    out.push_str(&format!("  {} unresolved address\n", "reason  :".bold()));
                }
            }
            if let Some(nat) = o.nat() {
                out.push_str(&format!("  {} {} -> {} ({})\n", "nat     :".bold(), nat.from, nat.to, nat.rule));
            }
        }
    }
    out.push_str(&counts_line("All interfaces:", &summary.statistics.aggregate));
    out.push('\n');
    out
}

pub fn print_human(summary: &RunSummary, hide_passes: bool) {
    print!("{}", render_human(summary, hide_passes));
}

/// Writes statistics and every outcome as YAML, replacing `path`.
pub fn write_results(path: &Path, summary: &RunSummary) -> Result<()> {
    let yaml = serde_yaml::to_string(summary).context("failed to serialise results")?;
    fs::write(path, yaml).with_context(|| format!("failed to write results {}", path.display()))
}
