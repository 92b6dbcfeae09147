use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Keys a declaration may carry.
pub const REGISTERED_KEYS: [&str; 8] = [
    "protocol",
    "source_ip",
    "source_port",
    "destination_ip",
    "destination_port",
    "icmp_code",
    "icmp_type",
    "expected_result",
];

/// Interface/group name to its declarations, in file order.
#[derive(Debug, Clone, Default)]
pub struct TestSpec {
    pub groups: IndexMap<String, Vec<Mapping>>,
}

impl TestSpec {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: Option<IndexMap<String, Option<Vec<Mapping>>>> = serde_yaml::from_str(content)?;
        let groups = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(group, decls)| (group.trim().to_string(), decls.unwrap_or_default()))
            .collect();
        Ok(Self { groups })
    }

    pub fn declaration_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &Mapping)> {
        self.groups.iter().flat_map(|(group, decls)| {
            decls
                .iter()
                .enumerate()
                .map(move |(index, decl)| (group.as_str(), index, decl))
        })
    }
}

pub fn load_spec(path: &Path) -> Result<TestSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read test spec {}", path.display()))?;
    TestSpec::from_yaml(&content)
        .with_context(|| format!("YAML error in test spec {}", path.display()))
}

/// Default location of the retry artifact: next to the policy file it was derived from.
pub fn default_retry_path(spec_path: &Path) -> PathBuf {
    spec_path
        .parent()
        .map(|dir| dir.join("retry.yml"))
        .unwrap_or_else(|| PathBuf::from("retry.yml"))
}

/// Compact, single-line rendering of a YAML value for diagnostics.
pub fn show_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Sequence(items) => {
            let inner: Vec<String> = items.iter().map(show_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Mapping(m) => {
            let inner: Vec<String> = m
                .iter()
                .map(|(k, v)| format!("{}: {}", show_value(k), show_value(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Tagged(t) => format!("{} {}", t.tag, show_value(&t.value)),
    }
}
