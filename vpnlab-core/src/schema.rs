//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type,
//! enabling type validation before anything is planned.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // References resolve at plan time; function calls are checked separately
            (_, Value::ResourceRef(_, _) | Value::Call(_, _)) => Ok(()),
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, .. }, v) => {
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed by the provider and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::ResourceRef(binding, attr) => format!("ResourceRef({}.{})", binding, attr),
            Value::Call(name, _) => format!("Call({})", name),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Changing this attribute replaces the resource
    pub force_new: bool,
    /// Set by the provider only (e.g., `id`)
    pub computed: bool,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            default: None,
            description: None,
            force_new: false,
            computed: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Returns true if changing `name` forces replacement
    pub fn is_force_new(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    /// Fill in schema defaults for attributes that are not declared
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !attributes.contains_key(name)
            {
                attributes.insert(name.clone(), default.clone());
            }
        }
    }

    /// Validate resource attributes
    ///
    /// Meta attributes (starting with `_`) are skipped.
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        // Check required attributes
        let mut names: Vec<&String> = self.attributes.keys().collect();
        names.sort();
        for name in names {
            let schema = &self.attributes[name];
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        // Type check each attribute
        let mut declared: Vec<(&String, &Value)> = attributes
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .collect();
        declared.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in declared {
            match self.attributes.get(name) {
                Some(schema) if schema.computed => {
                    errors.push(TypeError::ComputedAttribute { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.attr_type.validate(value) {
                        errors.push(TypeError::AttributeError {
                            name: name.clone(),
                            inner: Box::new(e),
                        });
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_cidr(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// IPv4 address type (e.g., "203.0.113.12")
    pub fn ipv4_address() -> AttributeType {
        AttributeType::Custom {
            name: "Ipv4Address".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    s.parse::<Ipv4Addr>()
                        .map(|_| ())
                        .map_err(|_| format!("Invalid IPv4 address '{}'", s))
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// Tags map (e.g., tags = { Name = "lab" })
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

/// An IPv4 CIDR block split into network address and prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Cidr {
    /// Network mask as an integer
    pub fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// True if bits outside the prefix are zero
    pub fn is_network_address(&self) -> bool {
        u32::from(self.address) & !self.mask() == 0
    }

    /// True if the two blocks share any address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let mask = self.mask() & other.mask();
        u32::from(self.address) & mask == u32::from(other.address) & mask
    }

    /// True if the block lies inside an RFC 1918 private range
    pub fn is_private(&self) -> bool {
        const PRIVATE: [(Ipv4Addr, u8); 3] = [
            (Ipv4Addr::new(10, 0, 0, 0), 8),
            (Ipv4Addr::new(172, 16, 0, 0), 12),
            (Ipv4Addr::new(192, 168, 0, 0), 16),
        ];
        PRIVATE.iter().any(|(address, prefix)| {
            let range = Ipv4Cidr {
                address: *address,
                prefix: *prefix,
            };
            self.prefix >= range.prefix && range.overlaps(self)
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Parse CIDR block format (e.g., "10.0.0.0/16")
///
/// Octets and prefix must be plain decimal digits; signs and empty octets are rejected.
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Cidr, String> {
    let (ip, prefix) = cidr
        .split_once('/')
        .filter(|(_, prefix)| !prefix.contains('/'))
        .ok_or_else(|| format!("Invalid CIDR format '{}': expected IP/prefix", cidr))?;

    let address = ip.parse::<Ipv4Addr>().map_err(|_| {
        format!(
            "Invalid IP address '{}': expected 4 decimal octets of 0-255",
            ip
        )
    })?;

    if prefix.is_empty() || prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        ));
    }

    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(Ipv4Cidr { address, prefix: p }),
        _ => Err(format!("Invalid prefix length '{}': must be 0-32", prefix)),
    }
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    parse_cidr(cidr).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&Value::String("hello".to_string())).is_ok());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn references_pass_any_type() {
        let r = Value::ResourceRef("aws_vpc.main".to_string(), "id".to_string());
        assert!(AttributeType::Int.validate(&r).is_ok());
        assert!(types::cidr().validate(&r).is_ok());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::Enum(vec!["enable".to_string(), "disable".to_string()]);
        assert!(t.validate(&Value::String("enable".to_string())).is_ok());
        assert!(t.validate(&Value::String("enabled".to_string())).is_err());
    }

    #[test]
    fn validate_positive_int() {
        let t = types::positive_int();
        assert!(t.validate(&Value::Int(1)).is_ok());
        assert!(t.validate(&Value::Int(0)).is_err());
        assert!(t.validate(&Value::Int(-1)).is_err());
    }

    #[test]
    fn validate_resource_schema() {
        let schema = ResourceSchema::new("aws_vpc")
            .attribute(AttributeSchema::new("cidr_block", types::cidr()).required())
            .attribute(AttributeSchema::new("enable_dns_support", AttributeType::Bool))
            .attribute(AttributeSchema::new("tags", types::tags()));

        let mut attrs = HashMap::new();
        attrs.insert(
            "cidr_block".to_string(),
            Value::String("10.0.0.0/16".to_string()),
        );
        attrs.insert("enable_dns_support".to_string(), Value::Bool(true));
        attrs.insert(
            "_binding".to_string(),
            Value::String("aws_vpc.main".to_string()),
        );

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn missing_required_attribute() {
        let schema = ResourceSchema::new("aws_vpc")
            .attribute(AttributeSchema::new("cidr_block", types::cidr()).required());

        let errors = schema.validate(&HashMap::new()).unwrap_err();
        assert!(matches!(
            &errors[0],
            TypeError::MissingRequired { name } if name == "cidr_block"
        ));
    }

    #[test]
    fn unknown_and_computed_attributes() {
        let schema = ResourceSchema::new("aws_vpc")
            .attribute(AttributeSchema::new("id", AttributeType::String).computed());

        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), Value::String("vpc-1".to_string()));
        attrs.insert("cidr".to_string(), Value::String("10.0.0.0/16".to_string()));

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], TypeError::UnknownAttribute { name } if name == "cidr"));
        assert!(matches!(&errors[1], TypeError::ComputedAttribute { name } if name == "id"));
    }

    #[test]
    fn apply_defaults_keeps_declared() {
        let schema = ResourceSchema::new("aws_vpc")
            .attribute(
                AttributeSchema::new("instance_tenancy", AttributeType::String)
                    .with_default(Value::String("default".to_string())),
            )
            .attribute(
                AttributeSchema::new("enable_dns_support", AttributeType::Bool)
                    .with_default(Value::Bool(true)),
            );

        let mut attrs = HashMap::new();
        attrs.insert("enable_dns_support".to_string(), Value::Bool(false));
        schema.apply_defaults(&mut attrs);

        assert_eq!(attrs.get("enable_dns_support"), Some(&Value::Bool(false)));
        assert_eq!(
            attrs.get("instance_tenancy"),
            Some(&Value::String("default".to_string()))
        );
    }

    #[test]
    fn validate_cidr_type() {
        let t = types::cidr();

        // Valid CIDRs
        assert!(t.validate(&Value::String("10.0.0.0/16".to_string())).is_ok());
        assert!(t.validate(&Value::String("192.168.1.0/24".to_string())).is_ok());
        assert!(t.validate(&Value::String("0.0.0.0/0".to_string())).is_ok());

        // Invalid CIDRs
        assert!(t.validate(&Value::String("10.0.0.0".to_string())).is_err());
        assert!(t.validate(&Value::String("10.0.0.0/33".to_string())).is_err());
        assert!(t.validate(&Value::String("10.0.0.256/16".to_string())).is_err());
        assert!(t.validate(&Value::String("10.0.0/16".to_string())).is_err());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn cidr_overlap_and_private() {
        let a = parse_cidr("10.0.0.0/16").unwrap();
        let b = parse_cidr("10.0.128.0/17").unwrap();
        let c = parse_cidr("10.1.0.0/16").unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));

        assert!(a.is_private());
        assert!(parse_cidr("172.31.0.0/16").unwrap().is_private());
        assert!(!parse_cidr("172.32.0.0/16").unwrap().is_private());
        assert!(!parse_cidr("100.64.0.0/16").unwrap().is_private());
    }

    #[test]
    fn cidr_rejects_signed_and_empty_parts() {
        for bad in [
            "+10.0.0.0/16",
            "10.+0.0.0/16",
            "10.0.0.0/+16",
            "10.0.0.0/-1",
            "10..0.0/16",
            "10.0.0.0/",
            "/16",
            "10.0.0.0/016",
            "10.0.0.0/16/8",
            " 10.0.0.0/16",
        ] {
            assert!(parse_cidr(bad).is_err(), "{} should be rejected", bad);
        }
        assert_eq!(parse_cidr("10.0.0.0/16").unwrap().to_string(), "10.0.0.0/16");
    }

    #[test]
    fn cidr_host_bits() {
        assert!(parse_cidr("10.0.0.0/16").unwrap().is_network_address());
        assert!(!parse_cidr("10.0.1.0/16").unwrap().is_network_address());
        assert!(parse_cidr("0.0.0.0/0").unwrap().is_network_address());
    }

    #[test]
    fn ipv4_address_type() {
        let t = types::ipv4_address();
        assert!(t.validate(&Value::String("203.0.113.12".to_string())).is_ok());
        assert!(t.validate(&Value::String("203.0.113".to_string())).is_err());
    }
}
