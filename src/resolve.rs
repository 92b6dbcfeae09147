use crate::types::{LookupSource, ResolvedEndpoint};
use anyhow::{Context, Result};
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;
use tracing::{debug, error, warn};

pub fn is_ip_literal(token: &str) -> bool {
    token.parse::<IpAddr>().is_ok()
}

/// Name resolution used after the hostfile. Swappable so tests never touch DNS.
pub trait NameResolver: Send + Sync {
    fn lookup(&self, host: &str) -> Option<String>;
}

/// Resolves through the operating system's resolver, IPv4 first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl NameResolver for SystemResolver {
    fn lookup(&self, host: &str) -> Option<String> {
        if host.is_empty() {
            return None;
        }
        let addrs: Vec<IpAddr> = match (host, 0).to_socket_addrs() {
            Ok(iter) => iter.map(|sa| sa.ip()).collect(),
            Err(e) => {
                debug!("DNS lookup of '{}' failed: {}", host, e);
                return None;
            }
        };
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .map(|ip| ip.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostfileHit<'a> {
    /// 1-based line number in the hostfile.
    pub line: usize,
    pub address: &'a str,
}

/// Static name table. Column 2 is the address, column 3 the name.
#[derive(Debug, Clone, Default)]
pub struct Hostfile {
    rows: Vec<(usize, String, String)>,
}

impl Hostfile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read hostfile {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let rows = content
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                let cols: Vec<&str> = trimmed.split_whitespace().collect();
                if cols.len() < 3 {
                    return None;
                }
                Some((i + 1, cols[1].to_string(), cols[2].to_string()))
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row whose name matches `name` case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<HostfileHit<'_>> {
        self.rows
            .iter()
            .find(|(_, _, n)| n.eq_ignore_ascii_case(name))
            .map(|(line, address, _)| HostfileHit {
                line: *line,
                address,
            })
    }
}

pub struct AddressResolver {
    hostfile: Option<Hostfile>,
    names: Box<dyn NameResolver>,
}

impl AddressResolver {
    pub fn new(hostfile: Option<Hostfile>) -> Self {
        Self::with_name_resolver(hostfile, Box::new(SystemResolver))
    }

    pub fn with_name_resolver(hostfile: Option<Hostfile>, names: Box<dyn NameResolver>) -> Self {
        Self { hostfile, names }
    }

    pub fn hostfile_enabled(&self) -> bool {
        self.hostfile.is_some()
    }

    /// Literal address, then hostfile, then name resolution. Never fails hard:
    /// an unusable token comes back with `ok == false`.
    pub fn resolve(&self, token: &str) -> ResolvedEndpoint {
        let token = token.trim();
        if is_ip_literal(token) {
            debug!("'{}' is an address, no lookup needed", token);
            return ResolvedEndpoint::resolved(token, LookupSource::Literal);
        }

        let mut found = None;
        if let Some(hostfile) = &self.hostfile {
            match hostfile.lookup(token) {
                Some(hit) => {
                    debug!("'{}' found in hostfile on line {}: {}", token, hit.line, hit.address);
                    found = Some((hit.address.to_string(), LookupSource::Hostfile { line: hit.line }));
                }
                None => debug!("'{}' not in hostfile", token),
            }
        }
        if found.is_none() {
            debug!("resolving '{}' via DNS", token);
            found = self.names.lookup(token).map(|a| (a, LookupSource::Dns));
        }

        match found {
            Some((address, source)) if is_ip_literal(&address) => {
                ResolvedEndpoint::resolved(address, source)
            }
            Some((address, source)) => {
                warn!("'{}' resolved via {:?} to '{}', which is not an address", token, source, address);
                ResolvedEndpoint::unresolved(token)
            }
            None => {
                error!("unable to resolve '{}' to an address", token);
                ResolvedEndpoint::unresolved(token)
            }
        }
    }
}
