//! Static checks over the raw test spec, run before anything is expanded or
//! sent to the device. One bad declaration fails the whole run.

use crate::error::SchemaError;
use crate::resolve::AddressResolver;
use crate::spec::{REGISTERED_KEYS, TestSpec, show_value};
use crate::types::{Declaration, Protocol};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use tracing::{debug, error, info};

const ICMP_REQUIRED: [&str; 6] = [
    "protocol",
    "expected_result",
    "icmp_type",
    "icmp_code",
    "source_ip",
    "destination_ip",
];

const PORTED_REQUIRED: [&str; 6] = [
    "protocol",
    "expected_result",
    "source_ip",
    "source_port",
    "destination_ip",
    "destination_port",
];

const IP_KEYS: [&str; 2] = ["source_ip", "destination_ip"];
const PORT_KEYS: [&str; 2] = ["source_port", "destination_port"];
const ICMP_KEYS: [&str; 2] = ["icmp_type", "icmp_code"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Issues {
    pub invalid_keys: Vec<String>,
    pub missing_keys: Vec<String>,
    pub invalid_instances: Vec<(String, Value)>,
    pub invalid_data: Vec<(String, Value)>,
}

impl Issues {
    pub fn is_empty(&self) -> bool {
        self.invalid_keys.is_empty()
            && self.missing_keys.is_empty()
            && self.invalid_instances.is_empty()
            && self.invalid_data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DeclarationReport {
    pub group: String,
    /// Position within the group.
    pub id: usize,
    pub ok: bool,
    pub issues: Issues,
    pub declaration: Mapping,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub declarations: Vec<DeclarationReport>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.declarations.iter().fold(true, |acc, d| acc && d.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeclarationReport> {
        self.declarations.iter().filter(|d| !d.ok)
    }

    pub fn log_failures(&self) {
        for d in self.failures() {
            let shown = show_value(&Value::Mapping(d.declaration.clone()));
            error!("Interface '{}', declaration {}: {}", d.group, d.id, shown);
            if !d.issues.invalid_keys.is_empty() {
                error!("  unknown keys: {}", d.issues.invalid_keys.join(", "));
            }
            if !d.issues.missing_keys.is_empty() {
                error!("  missing keys: {}", d.issues.missing_keys.join(", "));
            }
            for (key, value) in &d.issues.invalid_instances {
                error!("  wrong type: {} = {}", key, show_value(value));
            }
            for (key, value) in &d.issues.invalid_data {
                error!("  invalid value: {} = {}", key, show_value(value));
            }
        }
    }
}

/// Keys a declaration must carry, given its (possibly unknown) protocol.
pub fn required_keys(protocol: Option<Protocol>) -> &'static [&'static str] {
    match protocol {
        Some(Protocol::Icmp) => &ICMP_REQUIRED,
        Some(Protocol::Tcp | Protocol::Udp | Protocol::Esp) => &PORTED_REQUIRED,
        None => &REGISTERED_KEYS,
    }
}

fn declared_protocol(decl: &Mapping) -> Option<Protocol> {
    decl.get("protocol")
        .and_then(Value::as_str)
        .and_then(Protocol::from_name)
}

fn key_name(key: &Value) -> String {
    match key.as_str() {
        Some(s) => s.to_string(),
        None => show_value(key),
    }
}

fn is_integer(value: &Value) -> bool {
    value.as_i64().is_some() || value.as_u64().is_some()
}

fn port_scalar_shape(value: &Value) -> bool {
    value.is_string() || is_integer(value)
}

fn instance_ok(key: &str, value: &Value) -> bool {
    match key {
        "source_ip" | "destination_ip" => match value {
            Value::String(_) => true,
            Value::Sequence(items) => items.iter().all(Value::is_string),
            _ => false,
        },
        "source_port" | "destination_port" => match value {
            Value::Sequence(items) => items.iter().all(port_scalar_shape),
            other => port_scalar_shape(other),
        },
        "icmp_type" | "icmp_code" => is_integer(value),
        "protocol" | "expected_result" => value.is_string(),
        _ => true,
    }
}

fn port_in_range(value: &Value) -> bool {
    let n = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        other => other.as_i64(),
    };
    matches!(n, Some(0..=65535))
}

fn elements(value: &Value) -> &[Value] {
    match value {
        Value::Sequence(items) => items.as_slice(),
        other => std::slice::from_ref(other),
    }
}

fn unmonitored_keys(decl: &Mapping) -> Vec<String> {
    decl.keys()
        .map(key_name)
        .filter(|k| !REGISTERED_KEYS.contains(&k.as_str()))
        .collect()
}

fn missing_keys(decl: &Mapping, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|k| !decl.contains_key(**k))
        .map(|k| k.to_string())
        .collect()
}

fn invalid_instances(decl: &Mapping, required: &[&str]) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in decl {
        let key = key_name(key);
        if !REGISTERED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let ok = if value.is_null() {
            !required.contains(&key.as_str())
        } else {
            instance_ok(&key, value)
        };
        if !ok {
            out.push((key, value.clone()));
        }
    }
    out
}

fn invalid_data(decl: &Mapping, resolver: &AddressResolver) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in decl {
        let key = key_name(key);
        if !REGISTERED_KEYS.contains(&key.as_str())
            || value.is_null()
            || !instance_ok(&key, value)
        {
            continue;
        }
        if let Value::Sequence(items) = value {
            if items.is_empty() {
                out.push((key, value.clone()));
                continue;
            }
        }
        match key.as_str() {
            "protocol" => {
                if value.as_str().and_then(Protocol::from_name).is_none() {
                    out.push((key, value.clone()));
                }
            }
            "expected_result" => {
                let s = value.as_str().unwrap_or_default();
                if !(s.eq_ignore_ascii_case("allow") || s.eq_ignore_ascii_case("drop")) {
                    out.push((key, value.clone()));
                }
            }
            k if ICMP_KEYS.contains(&k) => {
                if !matches!(value.as_i64(), Some(0..=254)) {
                    out.push((key, value.clone()));
                }
            }
            k if PORT_KEYS.contains(&k) => {
                for port in elements(value).iter().filter(|p| !port_in_range(p)) {
                    out.push((key.clone(), port.clone()));
                }
            }
            k if IP_KEYS.contains(&k) => {
                for host in elements(value) {
                    let token = host.as_str().unwrap_or_default();
                    if !resolver.resolve(token).ok {
                        out.push((key.clone(), host.clone()));
                    }
                }
            }
            _ => {}
        }
    }
    out
}

pub fn validate_declaration(
    group: &str,
    id: usize,
    decl: &Mapping,
    resolver: &AddressResolver,
) -> DeclarationReport {
    let required = required_keys(declared_protocol(decl));
    let issues = Issues {
        invalid_keys: unmonitored_keys(decl),
        missing_keys: missing_keys(decl, required),
        invalid_instances: invalid_instances(decl, required),
        invalid_data: invalid_data(decl, resolver),
    };
    debug!("validated '{}' #{}: {:?}", group, id, issues);
    DeclarationReport {
        group: group.to_string(),
        id,
        ok: issues.is_empty(),
        issues,
        declaration: decl.clone(),
    }
}

/// Checks every declaration independently and collects all issues.
pub fn validate(spec: &TestSpec, resolver: &AddressResolver) -> ValidationReport {
    info!("Validating {} declarations", spec.declaration_count());
    let declarations = spec
        .iter()
        .map(|(group, id, decl)| validate_declaration(group, id, decl, resolver))
        .collect();
    ValidationReport { declarations }
}

#[derive(Debug, Clone)]
pub struct ValidDeclaration {
    pub index: usize,
    pub declaration: Declaration,
    pub origin: Mapping,
}

/// A spec that passed every check, in typed form. Only `check_spec` builds it.
#[derive(Debug, Clone, Default)]
pub struct ValidatedSpec {
    groups: IndexMap<String, Vec<ValidDeclaration>>,
}

impl ValidatedSpec {
    pub fn groups(&self) -> &IndexMap<String, Vec<ValidDeclaration>> {
        &self.groups
    }

    pub fn declaration_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// All-or-nothing gate between the raw spec and expansion.
pub fn check_spec(spec: &TestSpec, resolver: &AddressResolver) -> Result<ValidatedSpec, SchemaError> {
    let report = validate(spec, resolver);
    if !report.ok() {
        return Err(SchemaError::Invalid(report));
    }

    let mut groups: IndexMap<String, Vec<ValidDeclaration>> = IndexMap::new();
    for (group, decls) in &spec.groups {
        let mut typed = Vec::with_capacity(decls.len());
        for (index, origin) in decls.iter().enumerate() {
            let declaration: Declaration = serde_yaml::from_value(Value::Mapping(origin.clone()))
                .map_err(|e| SchemaError::Malformed {
                    group: group.clone(),
                    index,
                    message: e.to_string(),
                })?;
            typed.push(ValidDeclaration {
                index,
                declaration,
                origin: origin.clone(),
            });
        }
        groups.insert(group.clone(), typed);
    }
    info!("All {} declarations passed validation", spec.declaration_count());
    Ok(ValidatedSpec { groups })
}
