use anyhow::Result;
use policy_test::expand::{Shape, cardinality, expand_declaration};
use policy_test::resolve::{AddressResolver, Hostfile, NameResolver};
use policy_test::types::{Declaration, OneOrMany, Port};
use policy_test::validate::ValidDeclaration;
use serde_yaml::{Mapping, Value};

struct NoDns;

impl NameResolver for NoDns {
    fn lookup(&self, _host: &str) -> Option<String> {
        None
    }
}

fn resolver() -> AddressResolver {
    let hosts = Hostfile::parse("h 10.0.0.1 web1\nh 10.0.0.2 web2\nh 10.0.1.1 db1\n");
    AddressResolver::with_name_resolver(Some(hosts), Box::new(NoDns))
}

fn declaration(yaml: &str) -> Result<ValidDeclaration> {
    let origin: Mapping = serde_yaml::from_str(yaml)?;
    let declaration: Declaration = serde_yaml::from_value(Value::Mapping(origin.clone()))?;
    Ok(ValidDeclaration {
        index: 0,
        declaration,
        origin,
    })
}

#[test]
fn two_sources_by_three_destinations_is_six() -> Result<()> {
    let d = declaration(
        r#"
protocol: tcp
source_ip: [web1, ghost]
source_port: 1024
destination_ip: [db1, "192.0.2.5", nowhere]
destination_port: 443
expected_result: allow
"#,
    )?;
    assert_eq!(cardinality(&d.declaration), 6);
    let testlets = expand_declaration("outside", &d, &resolver());
    assert_eq!(testlets.len(), 6);

    let pairs: Vec<(&str, &str, bool)> = testlets
        .iter()
        .map(|t| (t.source_ip.as_str(), t.destination_ip.as_str(), t.executable))
        .collect();
    assert_eq!(
        pairs,
        [
            ("10.0.0.1", "10.0.1.1", true),
            ("10.0.0.1", "192.0.2.5", true),
            ("10.0.0.1", "nowhere", false),
            ("ghost", "10.0.1.1", false),
            ("ghost", "192.0.2.5", false),
            ("ghost", "nowhere", false),
        ]
    );
    assert_eq!(
        testlets[1].command,
        "packet-tracer input outside tcp 10.0.0.1 1024 192.0.2.5 443 detail"
    );
    Ok(())
}

#[test]
fn all_scalars_is_exactly_one() -> Result<()> {
    let d = declaration(
        r#"
protocol: udp
source_ip: web2
source_port: "53"
destination_ip: "8.8.8.8"
destination_port: 53
expected_result: allow
"#,
    )?;
    assert_eq!(
        Shape::of(&d.declaration),
        Shape {
            sources: false,
            destinations: false,
            destination_ports: false
        }
    );
    let testlets = expand_declaration("dmz", &d, &resolver());
    assert_eq!(testlets.len(), 1);
    assert!(testlets[0].executable);
    assert_eq!(
        testlets[0].command,
        "packet-tracer input dmz udp 10.0.0.2 53 8.8.8.8 53 detail"
    );
    Ok(())
}

#[test]
fn every_axis_a_list_follows_list_order() -> Result<()> {
    let d = declaration(
        r#"
protocol: tcp
source_ip: [web1, web2]
source_port: 1024
destination_ip: ["192.0.2.1", "192.0.2.2"]
destination_port: [80, 443]
expected_result: drop
"#,
    )?;
    let testlets = expand_declaration("inside", &d, &resolver());
    let triples: Vec<(&str, &str, Option<u16>)> = testlets
        .iter()
        .map(|t| {
            (
                t.source_ip.as_str(),
                t.destination_ip.as_str(),
                t.destination_port.map(u16::from),
            )
        })
        .collect();
    assert_eq!(
        triples,
        [
            ("10.0.0.1", "192.0.2.1", Some(80)),
            ("10.0.0.1", "192.0.2.1", Some(443)),
            ("10.0.0.1", "192.0.2.2", Some(80)),
            ("10.0.0.1", "192.0.2.2", Some(443)),
            ("10.0.0.2", "192.0.2.1", Some(80)),
            ("10.0.0.2", "192.0.2.1", Some(443)),
            ("10.0.0.2", "192.0.2.2", Some(80)),
            ("10.0.0.2", "192.0.2.2", Some(443)),
        ]
    );
    assert!(testlets.iter().all(|t| t.executable));
    Ok(())
}

#[test]
fn source_port_list_is_carried_not_multiplied() -> Result<()> {
    let d = declaration(
        r#"
protocol: tcp
source_ip: web1
source_port: [1024, 2048]
destination_ip: db1
destination_port: [22, 3306]
expected_result: allow
"#,
    )?;
    let testlets = expand_declaration("inside", &d, &resolver());
    assert_eq!(testlets.len(), 2);
    for t in &testlets {
        assert_eq!(t.source_port, Some(OneOrMany::Many(vec![Port(1024), Port(2048)])));
    }
    assert_eq!(
        testlets[0].command,
        "packet-tracer input inside tcp 10.0.0.1 [1024, 2048] 10.0.1.1 22 detail"
    );
    Ok(())
}

#[test]
fn icmp_and_esp_commands() -> Result<()> {
    let icmp = declaration(
        r#"
protocol: icmp
source_ip: web1
destination_ip: ["192.0.2.1", db1]
icmp_type: 8
icmp_code: 0
expected_result: allow
"#,
    )?;
    let commands: Vec<String> = expand_declaration("outside", &icmp, &resolver())
        .into_iter()
        .map(|t| t.command)
        .collect();
    assert_eq!(
        commands,
        [
            "packet-tracer input outside icmp 10.0.0.1 8 0 192.0.2.1 detail",
            "packet-tracer input outside icmp 10.0.0.1 8 0 10.0.1.1 detail",
        ]
    );

    let esp = declaration(
        r#"
protocol: esp
source_ip: "198.51.100.1"
source_port: 0
destination_ip: "198.51.100.2"
destination_port: 0
expected_result: allow
"#,
    )?;
    let t = expand_declaration("outside", &esp, &resolver());
    assert_eq!(t[0].command, "packet-tracer input outside raw 198.51.100.1 50 198.51.100.2 detail");
    Ok(())
}

#[test]
fn testlets_keep_their_origin_record() -> Result<()> {
    let d = declaration(
        r#"
protocol: tcp
source_ip: [web1, web2]
source_port: 1024
destination_ip: db1
destination_port: 80
expected_result: allow
"#,
    )?;
    for t in expand_declaration("inside", &d, &resolver()) {
        assert_eq!(t.origin_record, d.origin);
        assert_eq!(t.origin_record.get("source_ip"), d.origin.get("source_ip"));
        assert_eq!(t.expected_result, "allow");
    }
    Ok(())
}
