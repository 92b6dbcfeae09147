use crate::types::{ExecutionOutcome, Grade, OneOrMany, Port, Protocol};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// A minimal declaration for re-running one FAIL or SKIP testlet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryDeclaration {
    pub protocol: Protocol,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub source_ip: String,
    pub source_port: Option<OneOrMany<Port>>,
    pub destination_ip: String,
    pub destination_port: Option<Port>,
    pub expected_result: String,
}

/// Same top-level shape as the input spec.
pub type RetrySpec = IndexMap<String, Vec<RetryDeclaration>>;

pub fn compose(outcomes: &[ExecutionOutcome]) -> RetrySpec {
    let mut spec = RetrySpec::new();
    for outcome in outcomes.iter().filter(|o| matches!(o.grade, Grade::Fail | Grade::Skip)) {
        let t = &outcome.testlet;
        spec.entry(t.interface.clone()).or_default().push(RetryDeclaration {
            protocol: t.protocol,
            icmp_type: t.icmp_type,
            icmp_code: t.icmp_code,
            source_ip: t.source_ip.clone(),
            source_port: t.source_port.clone(),
            destination_ip: t.destination_ip.clone(),
            destination_port: t.destination_port,
            expected_result: t.expected_result.clone(),
        });
    }
    spec
}

/// Replaces the retry artifact at `path`. Any previous file is removed first;
/// a new one is written only when there is something to retry. Returns the
/// number of declarations written.
pub fn write_retry(path: &Path, outcomes: &[ExecutionOutcome]) -> Result<usize> {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed previous retry file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to remove old retry file {}", path.display()));
        }
    }

    let spec = compose(outcomes);
    let count: usize = spec.values().map(Vec::len).sum();
    if count == 0 {
        return Ok(0);
    }
    let yaml = serde_yaml::to_string(&spec).context("failed to serialise retry spec")?;
    fs::write(path, yaml)
        .with_context(|| format!("failed to write retry file {}", path.display()))?;
    info!("{} generated for {} failed/skipped testlets", path.display(), count);
    Ok(count)
}
