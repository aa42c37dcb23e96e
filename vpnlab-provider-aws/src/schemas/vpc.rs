//! VPC resource schema definitions

use vpnlab_core::resource::Value;
use vpnlab_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::types as aws_types;

pub fn vpc_schema() -> ResourceSchema {
    ResourceSchema::new("aws_vpc")
        .with_description("An AWS VPC (Virtual Private Cloud)")
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .force_new()
                .with_description("The IPv4 network range for the VPC, in CIDR notation"),
        )
        .attribute(
            AttributeSchema::new("instance_tenancy", aws_types::instance_tenancy())
                .with_default(Value::String("default".to_string()))
                .force_new()
                .with_description("The allowed tenancy of instances launched into the VPC"),
        )
        .attribute(
            AttributeSchema::new("enable_dns_support", AttributeType::Bool)
                .with_default(Value::Bool(true))
                .with_description("Whether DNS resolution is supported for the VPC"),
        )
        .attribute(
            AttributeSchema::new("enable_dns_hostnames", AttributeType::Bool)
                .with_default(Value::Bool(false))
                .with_description("Whether instances launched in the VPC get DNS hostnames"),
        )
        .attribute(
            AttributeSchema::new("tags", types::tags())
                .with_description("Tags for the VPC. Example: { Name = \"lab\" }"),
        )
        .attribute(
            AttributeSchema::new("id", AttributeType::String)
                .computed()
                .with_description("The ID of the VPC (vpc-...)"),
        )
        .attribute(
            AttributeSchema::new("owner_id", AttributeType::String)
                .computed()
                .with_description("The ID of the AWS account that owns the VPC"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vpnlab_core::schema::TypeError;

    #[test]
    fn valid_vpc_minimal() {
        let schema = vpc_schema();
        let mut attrs = HashMap::new();
        attrs.insert(
            "cidr_block".to_string(),
            Value::String("10.0.0.0/16".to_string()),
        );

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn valid_vpc_full() {
        let schema = vpc_schema();
        let mut attrs = HashMap::new();
        attrs.insert(
            "cidr_block".to_string(),
            Value::String("10.0.0.0/16".to_string()),
        );
        attrs.insert("enable_dns_support".to_string(), Value::Bool(true));
        attrs.insert("enable_dns_hostnames".to_string(), Value::Bool(true));
        attrs.insert(
            "instance_tenancy".to_string(),
            Value::String("dedicated".to_string()),
        );
        attrs.insert(
            "tags".to_string(),
            Value::Map(HashMap::from([(
                "Name".to_string(),
                Value::String("lab".to_string()),
            )])),
        );

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn vpc_missing_cidr() {
        let errors = vpc_schema().validate(&HashMap::new()).unwrap_err();
        assert!(matches!(
            &errors[0],
            TypeError::MissingRequired { name } if name == "cidr_block"
        ));
    }

    #[test]
    fn vpc_rejects_host_tenancy_and_computed_id() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "cidr_block".to_string(),
            Value::String("10.0.0.0/16".to_string()),
        );
        attrs.insert(
            "instance_tenancy".to_string(),
            Value::String("host".to_string()),
        );
        attrs.insert("id".to_string(), Value::String("vpc-123".to_string()));

        let errors = vpc_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn vpc_defaults() {
        let mut attrs = HashMap::new();
        vpc_schema().apply_defaults(&mut attrs);
        assert_eq!(attrs.get("enable_dns_support"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("enable_dns_hostnames"), Some(&Value::Bool(false)));
        assert_eq!(
            attrs.get("instance_tenancy"),
            Some(&Value::String("default".to_string()))
        );
        assert!(vpc_schema().is_force_new("cidr_block"));
        assert!(!vpc_schema().is_force_new("enable_dns_support"));
    }
}
