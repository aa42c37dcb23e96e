//! Topology validation for the site-to-site VPN resources
//!
//! Schema checks (types, required attributes) run in vpnlab-core. The checks
//! here need to look at several resources at once: ASN collisions, overlapping
//! VPC blocks, and which gateways a VPN connection attaches to.

use std::net::Ipv4Addr;

use vpnlab_core::parser::ParsedFile;
use vpnlab_core::resource::{Resource, ResourceId, Value};
use vpnlab_core::schema::{Ipv4Cidr, parse_cidr};
use vpnlab_core::validation::Diagnostic;

use crate::schemas::types::{DEFAULT_AMAZON_SIDE_ASN, is_private_asn, validate_asn, validate_region};

/// Smallest and largest VPC prefix AWS accepts
const VPC_PREFIX_RANGE: (u8, u8) = (16, 28);

/// Attributes holding ASNs, normalized to integers
const ASN_ATTRIBUTES: &[&str] = &["bgp_asn", "amazon_side_asn"];

/// Run every AWS topology check on a parsed declaration
pub fn validate_topology(parsed: &ParsedFile) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_provider(parsed, &mut diagnostics);
    check_vpcs(&parsed.resources, &mut diagnostics);
    let customer_asns = check_customer_gateways(&parsed.resources, &mut diagnostics);
    check_transit_gateways(&parsed.resources, &customer_asns, &mut diagnostics);
    check_vpn_connections(&parsed.resources, &mut diagnostics);
    diagnostics
}

/// Rewrite ASNs given as numeric strings into integers
///
/// `bgp_asn = "65000"` and `bgp_asn = 65000` then plan identically against
/// the integer the provider reads back.
pub fn normalize(resource: &mut Resource) {
    for name in ASN_ATTRIBUTES {
        if let Some(value) = resource.attributes.get_mut(*name)
            && matches!(value, Value::String(_))
            && let Some(asn) = value.as_int()
        {
            *value = Value::Int(asn);
        }
    }
}

fn of_type<'a>(resources: &'a [Resource], resource_type: &'a str) -> impl Iterator<Item = &'a Resource> {
    resources
        .iter()
        .filter(move |r| r.id.resource_type == resource_type)
}

fn check_provider(parsed: &ParsedFile, out: &mut Vec<Diagnostic>) {
    for provider in &parsed.providers {
        if provider.name != "aws" {
            out.push(Diagnostic::error(
                None,
                format!("unsupported provider '{}'", provider.name),
            ));
            continue;
        }
        match provider.attributes.get("region") {
            Some(Value::String(region)) => {
                if let Err(e) = validate_region(region) {
                    out.push(Diagnostic::error(None, format!("provider \"aws\": {}", e)));
                }
            }
            Some(_) => out.push(Diagnostic::error(
                None,
                "provider \"aws\": region must be a string",
            )),
            None => {}
        }
    }
}

fn check_vpcs(resources: &[Resource], out: &mut Vec<Diagnostic>) {
    let mut blocks: Vec<(&ResourceId, Ipv4Cidr)> = Vec::new();

    for vpc in of_type(resources, "aws_vpc") {
        // Malformed blocks are reported by the schema check
        let Some(Ok(cidr)) = vpc.get_str("cidr_block").map(parse_cidr) else {
            continue;
        };

        let (min, max) = VPC_PREFIX_RANGE;
        if cidr.prefix < min || cidr.prefix > max {
            out.push(Diagnostic::error(
                Some(&vpc.id),
                format!(
                    "cidr_block {} has prefix /{}, VPCs need /{} to /{}",
                    cidr, cidr.prefix, min, max
                ),
            ));
        }
        if !cidr.is_network_address() {
            out.push(Diagnostic::error(
                Some(&vpc.id),
                format!("cidr_block {} has host bits set", cidr),
            ));
        }
        if !cidr.is_private() {
            out.push(Diagnostic::warning(
                Some(&vpc.id),
                format!("cidr_block {} is not an RFC 1918 private range", cidr),
            ));
        }

        for (other_id, other) in &blocks {
            if cidr.overlaps(other) {
                out.push(Diagnostic::error(
                    Some(&vpc.id),
                    format!("cidr_block {} overlaps {} of {}", cidr, other, other_id),
                ));
            }
        }
        blocks.push((&vpc.id, cidr));
    }
}

/// Returns the valid customer gateway ASNs for the collision check
fn check_customer_gateways(
    resources: &[Resource],
    out: &mut Vec<Diagnostic>,
) -> Vec<(ResourceId, i64)> {
    let mut asns = Vec::new();

    for cgw in of_type(resources, "aws_customer_gateway") {
        if let Some(value) = cgw.attributes.get("bgp_asn")
            && !value.contains_ref()
        {
            match validate_asn(value) {
                Ok(asn) => asns.push((cgw.id.clone(), asn)),
                Err(e) => out.push(Diagnostic::error(Some(&cgw.id), format!("bgp_asn: {}", e))),
            }
        }

        if let Some(Ok(ip)) = cgw.get_str("ip_address").map(str::parse::<Ipv4Addr>) {
            if ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || ip.is_broadcast() {
                out.push(Diagnostic::error(
                    Some(&cgw.id),
                    format!("ip_address {} cannot be a VPN endpoint", ip),
                ));
            } else if ip.is_private() {
                out.push(Diagnostic::warning(
                    Some(&cgw.id),
                    format!("ip_address {} is a private address", ip),
                ));
            }
        }
    }

    asns
}

fn check_transit_gateways(
    resources: &[Resource],
    customer_asns: &[(ResourceId, i64)],
    out: &mut Vec<Diagnostic>,
) {
    for tgw in of_type(resources, "aws_ec2_transit_gateway") {
        let asn = match tgw.attributes.get("amazon_side_asn") {
            None => DEFAULT_AMAZON_SIDE_ASN,
            Some(value) if value.contains_ref() => continue,
            Some(value) => match validate_asn(value) {
                Ok(asn) => asn,
                Err(e) => {
                    out.push(Diagnostic::error(
                        Some(&tgw.id),
                        format!("amazon_side_asn: {}", e),
                    ));
                    continue;
                }
            },
        };

        if !is_private_asn(asn) {
            out.push(Diagnostic::error(
                Some(&tgw.id),
                format!(
                    "amazon_side_asn {} is not a private ASN (64512-65534 or 4200000000-4294967294)",
                    asn
                ),
            ));
        }

        for (cgw_id, cgw_asn) in customer_asns {
            if *cgw_asn == asn {
                out.push(Diagnostic::error(
                    Some(&tgw.id),
                    format!("amazon_side_asn {} collides with bgp_asn of {}", asn, cgw_id),
                ));
            }
        }
    }
}

fn check_vpn_connections(resources: &[Resource], out: &mut Vec<Diagnostic>) {
    for vpn in of_type(resources, "aws_vpn_connection") {
        if let Some(value) = vpn.attributes.get("customer_gateway_id") {
            check_gateway_ref(vpn, "customer_gateway_id", value, "aws_customer_gateway", "cgw-", out);
        }

        match vpn.attributes.get("transit_gateway_id") {
            Some(value) => check_gateway_ref(
                vpn,
                "transit_gateway_id",
                value,
                "aws_ec2_transit_gateway",
                "tgw-",
                out,
            ),
            None => out.push(Diagnostic::error(
                Some(&vpn.id),
                "transit_gateway_id is required: the connection must attach to exactly one transit gateway",
            )),
        }

        if vpn.attributes.contains_key("vpn_gateway_id") {
            out.push(Diagnostic::error(
                Some(&vpn.id),
                "vpn_gateway_id must not be set on a transit gateway VPN connection",
            ));
        }

        if !matches!(vpn.attributes.get("static_routes_only"), Some(Value::Bool(true))) {
            out.push(Diagnostic::warning(
                Some(&vpn.id),
                "static_routes_only is not true; the tunnels will expect BGP route advertisement",
            ));
        }
    }
}

/// A gateway attribute is a reference to `<expected_type>.<name>.id` or a literal id
fn check_gateway_ref(
    vpn: &Resource,
    attribute: &str,
    value: &Value,
    expected_type: &str,
    id_prefix: &str,
    out: &mut Vec<Diagnostic>,
) {
    match value {
        Value::ResourceRef(address, attr) => {
            match ResourceId::from_address(address) {
                Some(target) if target.resource_type == expected_type => {
                    if attr != "id" {
                        out.push(Diagnostic::error(
                            Some(&vpn.id),
                            format!("{} must reference {}.id, not .{}", attribute, address, attr),
                        ));
                    }
                }
                _ => out.push(Diagnostic::error(
                    Some(&vpn.id),
                    format!(
                        "{} must reference a {} resource, got {}",
                        attribute, expected_type, address
                    ),
                )),
            }
        }
        Value::String(literal) if literal.starts_with(id_prefix) => {}
        Value::String(literal) => out.push(Diagnostic::error(
            Some(&vpn.id),
            format!(
                "{} must be a reference to a {} or an id starting with '{}', got '{}'",
                attribute, expected_type, id_prefix, literal
            ),
        )),
        // Type errors are reported by the schema check
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnlab_core::parser::parse;
    use vpnlab_core::validation::Severity;

    const TOPOLOGY: &str = r#"
        provider "aws" {
          region = "ap-northeast-1"
        }

        resource "aws_vpc" "main" {
          cidr_block = "10.10.0.0/16"
        }

        resource "aws_customer_gateway" "main" {
          bgp_asn    = 65000
          ip_address = "203.0.113.12"
          type       = "ipsec.1"
        }

        resource "aws_ec2_transit_gateway" "main" {
          amazon_side_asn = 64512
        }

        resource "aws_vpn_connection" "main" {
          customer_gateway_id    = aws_customer_gateway.main.id
          transit_gateway_id     = aws_ec2_transit_gateway.main.id
          type                   = "ipsec.1"
          static_routes_only     = true
          tunnel1_startup_action = "start"
          tunnel2_startup_action = "start"
        }
    "#;

    fn check(input: &str) -> Vec<Diagnostic> {
        validate_topology(&parse(input).unwrap())
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<String> {
        diagnostics.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn sample_topology_is_valid() {
        let diagnostics = check(TOPOLOGY);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn invalid_region() {
        let diagnostics = check(&TOPOLOGY.replace("ap-northeast-1", "mars-north-1"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("Invalid region"));
    }

    #[test]
    fn asn_collision() {
        let diagnostics = check(&TOPOLOGY.replace("bgp_asn    = 65000", "bgp_asn = \"64512\""));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("collides with bgp_asn"));
        assert_eq!(
            diagnostics[0].resource,
            Some(ResourceId::new("aws_ec2_transit_gateway", "main"))
        );
    }

    #[test]
    fn default_side_asn_collides_too() {
        let input = TOPOLOGY
            .replace("amazon_side_asn = 64512", "")
            .replace("bgp_asn    = 65000", "bgp_asn = 64512");
        let diagnostics = check(&input);
        assert!(messages(&diagnostics)[0].contains("amazon_side_asn 64512 collides"));
    }

    #[test]
    fn public_side_asn_rejected() {
        let diagnostics = check(&TOPOLOGY.replace("amazon_side_asn = 64512", "amazon_side_asn = 7224"));
        assert!(messages(&diagnostics)[0].contains("not a private ASN"));
    }

    #[test]
    fn invalid_asn_rejected() {
        let diagnostics = check(&TOPOLOGY.replace("bgp_asn    = 65000", "bgp_asn = 4294967295"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.starts_with("bgp_asn: ASN 4294967295 is out of range"));
    }

    #[test]
    fn vpc_prefix_and_host_bits() {
        let diagnostics = check(&TOPOLOGY.replace("10.10.0.0/16", "10.10.0.1/8"));
        let messages = messages(&diagnostics);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("/16 to /28"));
        assert!(messages[1].contains("host bits"));
    }

    #[test]
    fn public_vpc_block_is_a_warning() {
        let diagnostics = check(&TOPOLOGY.replace("10.10.0.0/16", "100.64.0.0/16"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn overlapping_vpcs() {
        let input = format!(
            "{}\nresource \"aws_vpc\" \"other\" {{\n  cidr_block = \"10.10.128.0/17\"\n}}\n",
            TOPOLOGY
        );
        let diagnostics = check(&input);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("overlaps 10.10.0.0/16 of aws_vpc.main"));
    }

    #[test]
    fn private_customer_gateway_ip_is_a_warning() {
        let diagnostics = check(&TOPOLOGY.replace("203.0.113.12", "192.168.1.1"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);

        let diagnostics = check(&TOPOLOGY.replace("203.0.113.12", "127.0.0.1"));
        assert!(diagnostics[0].is_error());
    }

    #[test]
    fn vpn_must_reference_one_cgw_and_one_tgw() {
        let input = TOPOLOGY.replace(
            "transit_gateway_id     = aws_ec2_transit_gateway.main.id",
            "vpn_gateway_id = \"vgw-0123\"",
        );
        let messages = messages(&check(&input));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("transit_gateway_id is required"));
        assert!(messages[1].contains("vpn_gateway_id must not be set"));
    }

    #[test]
    fn vpn_reference_of_wrong_type() {
        let input = TOPOLOGY.replace(
            "customer_gateway_id    = aws_customer_gateway.main.id",
            "customer_gateway_id = aws_ec2_transit_gateway.main.id",
        );
        let messages = messages(&check(&input));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("must reference a aws_customer_gateway resource"));
    }

    #[test]
    fn vpn_literal_ids() {
        let input = TOPOLOGY
            .replace(
                "customer_gateway_id    = aws_customer_gateway.main.id",
                "customer_gateway_id = \"cgw-0abc\"",
            )
            .replace(
                "transit_gateway_id     = aws_ec2_transit_gateway.main.id",
                "transit_gateway_id = \"vpc-0abc\"",
            );
        let messages = messages(&check(&input));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("starting with 'tgw-'"));
    }

    #[test]
    fn dynamic_routing_is_a_warning() {
        let diagnostics = check(&TOPOLOGY.replace("static_routes_only     = true", ""));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn normalize_numeric_asn_strings() {
        let mut resource = Resource::new("aws_customer_gateway", "main")
            .with_attribute("bgp_asn", Value::String("65000".to_string()))
            .with_attribute("type", Value::String("ipsec.1".to_string()));
        normalize(&mut resource);
        assert_eq!(resource.attributes.get("bgp_asn"), Some(&Value::Int(65000)));
        assert_eq!(
            resource.attributes.get("type"),
            Some(&Value::String("ipsec.1".to_string()))
        );
    }
}
