use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fmt;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Esp,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Esp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Esp => "esp",
        }
    }

    /// Exact, case-sensitive match against the registered names.
    pub fn from_name(name: &str) -> Option<Protocol> {
        Protocol::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field given either as a scalar or as a list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v),
            OneOrMany::Many(v) => v.as_slice(),
        }
    }
}

impl<T: fmt::Display> fmt::Display for OneOrMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OneOrMany::One(v) => write!(f, "{v}"),
            OneOrMany::Many(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A TCP/UDP port. Accepts integers or decimal strings in the policy file.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "PortRepr", into = "u16")]
pub struct Port(pub u16);

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(i64),
    Text(String),
}

impl TryFrom<PortRepr> for Port {
    type Error = String;

    fn try_from(value: PortRepr) -> Result<Self, Self::Error> {
        let n = match value {
            PortRepr::Number(n) => n,
            PortRepr::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("'{s}' is not a port number"))?,
        };
        u16::try_from(n)
            .map(Port)
            .map_err(|_| format!("port {n} outside 0-65535"))
    }
}

impl From<Port> for u16 {
    fn from(p: Port) -> u16 {
        p.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed form of one declaration, only produced after validation passed.
#[derive(Debug, Clone, Deserialize)]
pub struct Declaration {
    pub protocol: Protocol,
    pub source_ip: OneOrMany<String>,
    #[serde(default)]
    pub source_port: Option<OneOrMany<Port>>,
    pub destination_ip: OneOrMany<String>,
    #[serde(default)]
    pub destination_port: Option<OneOrMany<Port>>,
    #[serde(default)]
    pub icmp_type: Option<u8>,
    #[serde(default)]
    pub icmp_code: Option<u8>,
    pub expected_result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupSource {
    Literal,
    Hostfile { line: usize },
    Dns,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEndpoint {
    pub ok: bool,
    /// The concrete address, or the original token when `ok` is false.
    pub address: String,
    pub source: LookupSource,
}

impl ResolvedEndpoint {
    pub fn resolved(address: impl Into<String>, source: LookupSource) -> Self {
        Self {
            ok: true,
            address: address.into(),
            source,
        }
    }

    pub fn unresolved(token: impl Into<String>) -> Self {
        Self {
            ok: false,
            address: token.into(),
            source: LookupSource::Unresolved,
        }
    }
}

/// One atomic, fully resolved test case bound to exactly one device command.
#[derive(Debug, Clone, Serialize)]
pub struct Testlet {
    pub interface: String,
    /// Position of the origin declaration within its interface group.
    pub index: usize,
    pub protocol: Protocol,
    pub source_ip: String,
    pub source_port: Option<OneOrMany<Port>>,
    pub destination_ip: String,
    pub destination_port: Option<Port>,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub expected_result: String,
    pub command: String,
    pub executable: bool,
    pub origin_record: Mapping,
}

/// Fields extracted from a packet-tracer response. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    pub input_interface: Option<String>,
    pub input_interface_status: Option<String>,
    pub input_interface_line_status: Option<String>,
    pub output_interface: Option<String>,
    pub output_interface_status: Option<String>,
    pub output_interface_line_status: Option<String>,
    pub action: Option<String>,
    pub drop_reason: Option<String>,
    pub nat_rule: Option<String>,
    pub nat_from: Option<String>,
    pub nat_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grade::Pass => "[PASS]",
            Grade::Fail => "[FAIL]",
            Grade::Skip => "[SKIP]",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatTranslation<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub rule: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub testlet: Testlet,
    pub observed_action: String,
    pub output_interface: String,
    pub drop_reason: String,
    pub nat_rule: String,
    pub nat_from: String,
    pub nat_to: String,
    pub grade: Grade,
}

impl ExecutionOutcome {
    pub fn skipped(testlet: Testlet) -> Self {
        Self {
            testlet,
            observed_action: String::new(),
            output_interface: String::new(),
            drop_reason: String::new(),
            nat_rule: String::new(),
            nat_from: String::new(),
            nat_to: String::new(),
            grade: Grade::Skip,
        }
    }

    /// Grades an executed testlet. The comparison is exact and case-sensitive.
    pub fn graded(testlet: Testlet, record: TraceRecord) -> Self {
        let observed_action = record.action.unwrap_or_default();
        let grade = if observed_action == testlet.expected_result {
            Grade::Pass
        } else {
            Grade::Fail
        };
        Self {
            testlet,
            observed_action,
            output_interface: record.output_interface.unwrap_or_default(),
            drop_reason: record.drop_reason.unwrap_or_default(),
            nat_rule: record.nat_rule.unwrap_or_default(),
            nat_from: record.nat_from.unwrap_or_default(),
            nat_to: record.nat_to.unwrap_or_default(),
            grade,
        }
    }

    pub fn nat(&self) -> Option<NatTranslation<'_>> {
        if self.nat_rule.is_empty() {
            return None;
        }
        Some(NatTranslation {
            from: &self.nat_from,
            to: &self.nat_to,
            rule: &self.nat_rule,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

impl Counters {
    pub fn record(&mut self, grade: Grade) {
        self.total += 1;
        match grade {
            Grade::Pass => self.pass += 1,
            Grade::Fail => self.fail += 1,
            Grade::Skip => self.skip += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub groups: IndexMap<String, Counters>,
    pub aggregate: Counters,
}

impl RunStatistics {
    pub fn record(&mut self, group: &str, grade: Grade) {
        self.groups.entry(group.to_string()).or_default().record(grade);
        self.aggregate.record(grade);
    }

    pub fn group(&self, name: &str) -> Counters {
        self.groups.get(name).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub statistics: RunStatistics,
    pub outcomes: Vec<ExecutionOutcome>,
}
