//! AWS-specific type definitions

use vpnlab_core::resource::Value;
use vpnlab_core::schema::AttributeType;

/// Valid AWS regions (in AWS format with hyphens)
pub const VALID_REGIONS: &[&str] = &[
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "ca-central-1",
    "sa-east-1",
];

/// Largest usable ASN (4294967295 is reserved)
pub const MAX_ASN: i64 = 4_294_967_294;

/// Private ASN ranges (RFC 6996)
pub const PRIVATE_ASN_RANGES: &[(i64, i64)] = &[(64_512, 65_534), (4_200_000_000, 4_294_967_294)];

/// Default Amazon side ASN of a transit gateway
pub const DEFAULT_AMAZON_SIDE_ASN: i64 = 64_512;

/// The only VPN/customer gateway type AWS supports
pub const IPSEC_1: &str = "ipsec.1";

/// AWS region type with custom validation
pub fn aws_region() -> AttributeType {
    AttributeType::Custom {
        name: "Region".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            if let Value::String(s) = value {
                validate_region(s)
            } else {
                Err("Expected string".to_string())
            }
        },
    }
}

pub fn validate_region(region: &str) -> Result<(), String> {
    if VALID_REGIONS.contains(&region) {
        Ok(())
    } else {
        Err(format!(
            "Invalid region '{}', expected one of: {}",
            region,
            VALID_REGIONS.join(", ")
        ))
    }
}

/// BGP ASN, given as an integer or a numeric string
pub fn bgp_asn() -> AttributeType {
    AttributeType::Custom {
        name: "BgpAsn".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value {
            Value::Int(_) | Value::String(_) => validate_asn(value).map(|_| ()),
            _ => Err("Expected integer".to_string()),
        },
    }
}

/// Parse and range-check an ASN value
pub fn validate_asn(value: &Value) -> Result<i64, String> {
    let asn = value
        .as_int()
        .ok_or_else(|| format!("ASN must be an integer, got {:?}", value))?;
    if (1..=MAX_ASN).contains(&asn) {
        Ok(asn)
    } else {
        Err(format!("ASN {} is out of range (1-{})", asn, MAX_ASN))
    }
}

pub fn is_private_asn(asn: i64) -> bool {
    PRIVATE_ASN_RANGES
        .iter()
        .any(|(low, high)| (*low..=*high).contains(&asn))
}

/// Transit gateway option flag ("enable" / "disable")
pub fn enable_disable() -> AttributeType {
    AttributeType::Enum(vec!["enable".to_string(), "disable".to_string()])
}

/// VPN tunnel startup action
pub fn tunnel_startup_action() -> AttributeType {
    AttributeType::Enum(vec!["add".to_string(), "start".to_string()])
}

/// Gateway type of customer gateways and VPN connections
pub fn gateway_type() -> AttributeType {
    AttributeType::Enum(vec![IPSEC_1.to_string()])
}

/// VPC instance tenancy
pub fn instance_tenancy() -> AttributeType {
    AttributeType::Enum(vec!["default".to_string(), "dedicated".to_string()])
}
