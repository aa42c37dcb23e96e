//! Site-to-site VPN resource schema definitions
//!
//! Customer gateway, transit gateway and VPN connection.

use vpnlab_core::resource::Value;
use vpnlab_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as aws_types;

pub fn customer_gateway_schema() -> ResourceSchema {
    ResourceSchema::new("aws_customer_gateway")
        .with_description("The customer side of a site-to-site VPN connection")
        .attribute(
            AttributeSchema::new("bgp_asn", aws_types::bgp_asn())
                .required()
                .force_new()
                .with_description("BGP ASN of the customer gateway device"),
        )
        .attribute(
            AttributeSchema::new("ip_address", types::ipv4_address())
                .required()
                .force_new()
                .with_description("Public IPv4 address of the customer gateway device"),
        )
        .attribute(
            AttributeSchema::new("type", aws_types::gateway_type())
                .required()
                .force_new()
                .with_description("VPN type; only ipsec.1 is supported"),
        )
        .attribute(
            AttributeSchema::new("device_name", AttributeType::String)
                .force_new()
                .with_description("Name of the customer gateway device"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(
            AttributeSchema::new("id", AttributeType::String)
                .computed()
                .with_description("The ID of the customer gateway (cgw-...)"),
        )
}

fn flag(name: &str, default: &str, description: &str) -> AttributeSchema {
    AttributeSchema::new(name, aws_types::enable_disable())
        .with_default(Value::String(default.to_string()))
        .with_description(description)
}

pub fn transit_gateway_schema() -> ResourceSchema {
    ResourceSchema::new("aws_ec2_transit_gateway")
        .with_description("A regional hub interconnecting VPCs and VPN connections")
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new("amazon_side_asn", aws_types::bgp_asn())
                .with_default(Value::Int(aws_types::DEFAULT_AMAZON_SIDE_ASN))
                .force_new()
                .with_description("Private ASN for the Amazon side of BGP sessions"),
        )
        .attribute(flag(
            "auto_accept_shared_attachments",
            "disable",
            "Automatically accept cross-account attachments",
        ))
        .attribute(flag(
            "default_route_table_association",
            "enable",
            "Associate attachments with the default route table",
        ))
        .attribute(flag(
            "default_route_table_propagation",
            "enable",
            "Propagate attachment routes into the default route table",
        ))
        .attribute(flag("dns_support", "enable", "DNS support"))
        .attribute(flag("vpn_ecmp_support", "enable", "Equal-cost multi-path routing over VPN"))
        .attribute(
            flag("multicast_support", "disable", "Multicast support").force_new(),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(
            AttributeSchema::new("id", AttributeType::String)
                .computed()
                .with_description("The ID of the transit gateway (tgw-...)"),
        )
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("owner_id", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new("association_default_route_table_id", AttributeType::String)
                .computed(),
        )
        .attribute(
            AttributeSchema::new("propagation_default_route_table_id", AttributeType::String)
                .computed(),
        )
}

pub fn vpn_connection_schema() -> ResourceSchema {
    ResourceSchema::new("aws_vpn_connection")
        .with_description("An IPsec tunnel pair between a customer gateway and AWS")
        .attribute(
            AttributeSchema::new("customer_gateway_id", AttributeType::String)
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("transit_gateway_id", AttributeType::String).force_new())
        .attribute(AttributeSchema::new("vpn_gateway_id", AttributeType::String).force_new())
        .attribute(
            AttributeSchema::new("type", aws_types::gateway_type())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("static_routes_only", AttributeType::Bool)
                .with_default(Value::Bool(false))
                .force_new()
                .with_description("Use static routes instead of BGP"),
        )
        .attribute(
            AttributeSchema::new("tunnel1_startup_action", aws_types::tunnel_startup_action())
                .with_default(Value::String("add".to_string()))
                .with_description("Whether AWS initiates the first tunnel (start) or waits (add)"),
        )
        .attribute(
            AttributeSchema::new("tunnel2_startup_action", aws_types::tunnel_startup_action())
                .with_default(Value::String("add".to_string()))
                .with_description("Whether AWS initiates the second tunnel (start) or waits (add)"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(
            AttributeSchema::new("id", AttributeType::String)
                .computed()
                .with_description("The ID of the VPN connection (vpn-...)"),
        )
        .attribute(AttributeSchema::new("transit_gateway_attachment_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("tunnel1_address", AttributeType::String).computed())
        .attribute(AttributeSchema::new("tunnel2_address", AttributeType::String).computed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn valid_customer_gateway() {
        let mut attrs = HashMap::new();
        attrs.insert("bgp_asn".to_string(), string("65000"));
        attrs.insert("ip_address".to_string(), string("203.0.113.12"));
        attrs.insert("type".to_string(), string("ipsec.1"));

        assert!(customer_gateway_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn customer_gateway_rejects_bad_ip_and_type() {
        let mut attrs = HashMap::new();
        attrs.insert("bgp_asn".to_string(), Value::Int(65000));
        attrs.insert("ip_address".to_string(), string("203.0.113"));
        attrs.insert("type".to_string(), string("ipsec.2"));

        let errors = customer_gateway_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn transit_gateway_defaults() {
        let mut attrs = HashMap::new();
        attrs.insert("default_route_table_association".to_string(), string("disable"));
        transit_gateway_schema().apply_defaults(&mut attrs);

        assert_eq!(
            attrs.get("default_route_table_association"),
            Some(&string("disable"))
        );
        assert_eq!(attrs.get("dns_support"), Some(&string("enable")));
        assert_eq!(attrs.get("amazon_side_asn"), Some(&Value::Int(64512)));
        assert!(transit_gateway_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn transit_gateway_flags_are_enable_or_disable() {
        let mut attrs = HashMap::new();
        attrs.insert("dns_support".to_string(), Value::Bool(true));
        assert!(transit_gateway_schema().validate(&attrs).is_err());
    }

    #[test]
    fn vpn_connection_with_references() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "customer_gateway_id".to_string(),
            Value::ResourceRef("aws_customer_gateway.main".to_string(), "id".to_string()),
        );
        attrs.insert(
            "transit_gateway_id".to_string(),
            Value::ResourceRef("aws_ec2_transit_gateway.main".to_string(), "id".to_string()),
        );
        attrs.insert("type".to_string(), string("ipsec.1"));
        attrs.insert("static_routes_only".to_string(), Value::Bool(true));
        attrs.insert("tunnel1_startup_action".to_string(), string("start"));
        attrs.insert("tunnel2_startup_action".to_string(), string("start"));

        assert!(vpn_connection_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn startup_actions_update_in_place() {
        let schema = vpn_connection_schema();
        assert!(!schema.is_force_new("tunnel1_startup_action"));
        assert!(schema.is_force_new("customer_gateway_id"));
        assert!(schema.is_force_new("transit_gateway_id"));
    }
}
