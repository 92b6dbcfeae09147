use crate::resolve::AddressResolver;
use crate::types::{Declaration, OneOrMany, Port, Protocol, ResolvedEndpoint, Testlet};
use crate::validate::{ValidDeclaration, ValidatedSpec};
use rayon::prelude::*;
use tracing::{debug, info};

/// Which expansion axes of a declaration are lists. Source ports are never an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub sources: bool,
    pub destinations: bool,
    pub destination_ports: bool,
}

impl Shape {
    pub fn of(decl: &Declaration) -> Self {
        Self {
            sources: decl.source_ip.is_many(),
            destinations: decl.destination_ip.is_many(),
            destination_ports: decl.destination_port.as_ref().is_some_and(OneOrMany::is_many),
        }
    }
}

pub fn cardinality(decl: &Declaration) -> usize {
    let ports = decl.destination_port.as_ref().map_or(1, |p| p.as_slice().len());
    decl.source_ip.as_slice().len() * decl.destination_ip.as_slice().len() * ports
}

/// The device command for one testlet.
#[allow(clippy::too_many_arguments)]
pub fn packet_tracer_command(
    interface: &str,
    protocol: Protocol,
    source_ip: &str,
    source_port: Option<&OneOrMany<Port>>,
    destination_ip: &str,
    destination_port: Option<Port>,
    icmp_type: Option<u8>,
    icmp_code: Option<u8>,
) -> String {
    fn or_blank<T: ToString>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_default()
    }
    match protocol {
        Protocol::Tcp | Protocol::Udp => format!(
            "packet-tracer input {} {} {} {} {} {} detail",
            interface,
            protocol,
            source_ip,
            or_blank(source_port),
            destination_ip,
            or_blank(destination_port)
        ),
        Protocol::Icmp => format!(
            "packet-tracer input {} {} {} {} {} {} detail",
            interface,
            protocol,
            source_ip,
            or_blank(icmp_type),
            or_blank(icmp_code),
            destination_ip
        ),
        Protocol::Esp => format!(
            "packet-tracer input {} raw {} 50 {} detail",
            interface, source_ip, destination_ip
        ),
    }
}

/// Resolves each token independently; results stay in token order.
fn resolve_all(resolver: &AddressResolver, tokens: &[String]) -> Vec<ResolvedEndpoint> {
    tokens.par_iter().map(|t| resolver.resolve(t)).collect()
}

/// Expands one declaration into the cross product of its list fields.
pub fn expand_declaration(
    interface: &str,
    valid: &ValidDeclaration,
    resolver: &AddressResolver,
) -> Vec<Testlet> {
    let decl = &valid.declaration;
    let shape = Shape::of(decl);
    debug!(
        "'{}' #{}: shape {:?}, {} testlet(s)",
        interface,
        valid.index,
        shape,
        cardinality(decl)
    );

    let sources = resolve_all(resolver, decl.source_ip.as_slice());
    let destinations = resolve_all(resolver, decl.destination_ip.as_slice());
    let ports: Vec<Option<Port>> = match &decl.destination_port {
        Some(p) => p.as_slice().iter().copied().map(Some).collect(),
        None => vec![None],
    };

    let mut out = Vec::with_capacity(sources.len() * destinations.len() * ports.len());
    for src in &sources {
        for dst in &destinations {
            for port in &ports {
                let command = packet_tracer_command(
                    interface,
                    decl.protocol,
                    &src.address,
                    decl.source_port.as_ref(),
                    &dst.address,
                    *port,
                    decl.icmp_type,
                    decl.icmp_code,
                );
                out.push(Testlet {
                    interface: interface.to_string(),
                    index: valid.index,
                    protocol: decl.protocol,
                    source_ip: src.address.clone(),
                    source_port: decl.source_port.clone(),
                    destination_ip: dst.address.clone(),
                    destination_port: *port,
                    icmp_type: decl.icmp_type,
                    icmp_code: decl.icmp_code,
                    expected_result: decl.expected_result.clone(),
                    command,
                    executable: src.ok && dst.ok,
                    origin_record: valid.origin.clone(),
                });
            }
        }
    }
    out
}

/// Every declaration in spec order, every combination in list order.
pub fn expand(spec: &ValidatedSpec, resolver: &AddressResolver) -> Vec<Testlet> {
    let testlets: Vec<Testlet> = spec
        .groups()
        .iter()
        .flat_map(move |(interface, decls)| {
            decls
                .iter()
                .flat_map(move |valid| expand_declaration(interface, valid, resolver))
        })
        .collect();
    let runnable = testlets.iter().filter(|t| t.executable).count();
    info!(
        "Expanded {} declarations into {} testlets ({} executable)",
        spec.declaration_count(),
        testlets.len(),
        runnable
    );
    testlets
}
