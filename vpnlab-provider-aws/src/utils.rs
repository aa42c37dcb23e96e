//! Helpers shared by the EC2 resource implementations

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{Filter, ResourceType as Ec2ResourceType, Tag, TagSpecification};
use vpnlab_core::provider::{ProviderError, ProviderResult};
use vpnlab_core::resource::{Resource, ResourceId, Value};

/// Tag carrying the declaration address of every resource this tool creates
pub const ADDRESS_TAG: &str = "vpnlab:address";

/// EC2 error codes that usually clear up when retried later
const RETRYABLE_ERROR_CODES: &[&str] = &[
    "Throttling",
    "RequestLimitExceeded",
    "IncorrectState",
    "DependencyViolation",
];

pub fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_ERROR_CODES.contains(&code)
}

/// `InvalidVpcID.NotFound`, `InvalidTransitGatewayID.NotFound`, ...
pub fn is_not_found_code(code: &str) -> bool {
    code.ends_with(".NotFound")
}

pub fn is_not_found<E: ProvideErrorMetadata>(err: &E) -> bool {
    err.code().is_some_and(is_not_found_code)
}

/// Convert an SDK error into a ProviderError, flagging retryable codes
pub fn api_error<E>(context: &str, err: &E) -> ProviderError
where
    E: ProvideErrorMetadata + Debug,
{
    match err.code() {
        Some(code) => {
            let error = ProviderError::new(format!(
                "{}: {}: {}",
                context,
                code,
                err.message().unwrap_or("no message")
            ));
            if is_retryable_code(code) {
                error.retryable()
            } else {
                error
            }
        }
        None => ProviderError::new(format!("{}: {:?}", context, err)),
    }
}

/// Resources in these states are on their way out and count as absent
pub fn is_gone(state: &str) -> bool {
    matches!(state, "deleted" | "deleting")
}

pub fn address_filter(id: &ResourceId) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", ADDRESS_TAG))
        .values(id.address())
        .build()
}

pub fn required_str<'a>(resource: &'a Resource, name: &str) -> ProviderResult<&'a str> {
    resource.get_str(name).ok_or_else(|| {
        ProviderError::new(format!("{} is required", name)).for_resource(resource.id.clone())
    })
}

/// User tags declared on a resource
pub fn declared_tags(attributes: &HashMap<String, Value>) -> Option<BTreeMap<String, String>> {
    match attributes.get("tags") {
        Some(Value::Map(map)) => Some(
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        ),
        _ => None,
    }
}

/// Tags to attach at creation: the declared ones plus the address tag
pub fn tag_specification(resource_type: Ec2ResourceType, resource: &Resource) -> TagSpecification {
    let mut builder = TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key(ADDRESS_TAG).value(resource.id.address()).build());
    for (key, value) in declared_tags(&resource.attributes).unwrap_or_default() {
        builder = builder.tags(Tag::builder().key(key).value(value).build());
    }
    builder.build()
}

/// Tags as reported to the differ; the address tag is not part of the user's map
pub fn tags_to_value(tags: &[Tag]) -> Value {
    Value::Map(
        tags.iter()
            .filter_map(|tag| Some((tag.key()?, tag.value().unwrap_or(""))))
            .filter(|(key, _)| *key != ADDRESS_TAG)
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect(),
    )
}

/// Tags to set and tag keys to remove to get from `current` to `desired`
pub fn tag_changes(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> (Vec<(String, String)>, Vec<String>) {
    let to_set = desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let to_remove = current
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .collect();
    (to_set, to_remove)
}

/// Customer gateway ASNs come back as strings
pub fn parse_asn(asn: Option<&str>) -> Option<i64> {
    asn.and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn retryable_codes() {
        assert!(is_retryable_code("DependencyViolation"));
        assert!(is_retryable_code("IncorrectState"));
        assert!(is_retryable_code("RequestLimitExceeded"));
        assert!(!is_retryable_code("InvalidParameterValue"));
    }

    #[test]
    fn not_found_codes() {
        assert!(is_not_found_code("InvalidVpcID.NotFound"));
        assert!(is_not_found_code("InvalidVpnConnectionID.NotFound"));
        assert!(!is_not_found_code("InvalidVpcID.Malformed"));
    }

    #[test]
    fn gone_states() {
        assert!(is_gone("deleted"));
        assert!(is_gone("deleting"));
        assert!(!is_gone("available"));
        assert!(!is_gone("pending"));
    }

    #[test]
    fn tags_hide_address_tag() {
        let tags = vec![
            Tag::builder().key(ADDRESS_TAG).value("aws_vpc.main").build(),
            Tag::builder().key("Name").value("lab").build(),
        ];
        let expected = Value::Map(HashMap::from([(
            "Name".to_string(),
            Value::String("lab".to_string()),
        )]));
        assert_eq!(tags_to_value(&tags), expected);
    }

    #[test]
    fn tag_specification_includes_address() {
        let resource = Resource::new("aws_vpc", "main").with_attribute(
            "tags",
            Value::Map(HashMap::from([(
                "Name".to_string(),
                Value::String("lab".to_string()),
            )])),
        );
        let tag_spec = tag_specification(Ec2ResourceType::Vpc, &resource);
        let keys: Vec<&str> = tag_spec.tags().iter().filter_map(|t| t.key()).collect();
        assert_eq!(keys, vec![ADDRESS_TAG, "Name"]);
        assert_eq!(tag_spec.tags()[0].value(), Some("aws_vpc.main"));
    }

    #[test]
    fn tag_changes_sets_and_removes() {
        let current = map(&[("Name", "old"), ("Owner", "ops"), ("Keep", "x")]);
        let desired = map(&[("Name", "new"), ("Keep", "x"), ("Env", "lab")]);

        let (to_set, to_remove) = tag_changes(&current, &desired);
        assert_eq!(
            to_set,
            vec![
                ("Env".to_string(), "lab".to_string()),
                ("Name".to_string(), "new".to_string())
            ]
        );
        assert_eq!(to_remove, vec!["Owner".to_string()]);
    }

    #[test]
    fn declared_tags_absent() {
        assert_eq!(declared_tags(&HashMap::new()), None);
    }

    #[test]
    fn asn_strings() {
        assert_eq!(parse_asn(Some("65000")), Some(65000));
        assert_eq!(parse_asn(Some("4200000000")), Some(4_200_000_000));
        assert_eq!(parse_asn(None), None);
    }

    #[test]
    fn missing_required_attribute() {
        let resource = Resource::new("aws_vpc", "main");
        let err = required_str(&resource, "cidr_block").unwrap_err();
        assert_eq!(err.to_string(), "[aws_vpc.main] cidr_block is required");
    }
}
