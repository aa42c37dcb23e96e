//! Resource - Representing resources and their state

use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Resource type (e.g., "aws_vpc", "aws_vpn_connection")
    pub resource_type: String,
    /// Resource name (the second label of the resource block)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Address used by references (e.g., "aws_vpc.main")
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Parse an address of the form "type.name"
    pub fn from_address(address: &str) -> Option<Self> {
        let (resource_type, name) = address.split_once('.')?;
        if resource_type.is_empty() || name.is_empty() || name.contains('.') {
            return None;
        }
        Some(Self::new(resource_type, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's attribute (address, attribute_name)
    ///
    /// The attribute is empty for bare references such as `depends_on` entries.
    ResourceRef(String, String),
    /// Function call kept unevaluated (function_name, arguments)
    Call(String, Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; numeric strings count as integers
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns true if this value or anything nested in it is a reference
    pub fn contains_ref(&self) -> bool {
        match self {
            Value::ResourceRef(_, _) => true,
            Value::List(items) | Value::Call(_, items) => items.iter().any(Value::contains_ref),
            Value::Map(map) => map.values().any(Value::contains_ref),
            _ => false,
        }
    }
}

/// Known attribute values per resource address, used to resolve references
///
/// The AWS identifier of each resource is available as `id`.
pub type Bindings = HashMap<String, HashMap<String, Value>>;

impl Value {
    /// Substitute references whose target attribute is known
    ///
    /// Unknown references are kept as they are.
    pub fn resolve(&self, bindings: &Bindings) -> Value {
        match self {
            Value::ResourceRef(address, attribute) => bindings
                .get(address)
                .and_then(|attrs| attrs.get(attribute))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Value::List(items) => Value::List(items.iter().map(|v| v.resolve(bindings)).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve(bindings)))
                    .collect(),
            ),
            Value::Call(name, args) => Value::Call(
                name.clone(),
                args.iter().map(|v| v.resolve(bindings)).collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Desired state declared in a `resource` block
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attributes that are sent to the provider (meta attributes start with `_`)
    pub fn user_attributes(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter().filter(|(k, _)| !k.starts_with('_'))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Copy of this resource with references in user attributes resolved
    pub fn resolve(&self, bindings: &Bindings) -> Resource {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| {
                if k.starts_with('_') {
                    (k.clone(), v.clone())
                } else {
                    (k.clone(), v.resolve(bindings))
                }
            })
            .collect();
        Resource {
            id: self.id.clone(),
            attributes,
        }
    }

    /// References still present in user attributes, as `address.attribute`
    pub fn unresolved_refs(&self) -> Vec<String> {
        fn walk(value: &Value, out: &mut Vec<String>) {
            match value {
                Value::ResourceRef(address, attribute) => {
                    out.push(format!("{}.{}", address, attribute))
                }
                Value::List(items) | Value::Call(_, items) => {
                    items.iter().for_each(|v| walk(v, out))
                }
                Value::Map(map) => map.values().for_each(|v| walk(v, out)),
                _ => {}
            }
        }

        let mut out = Vec::new();
        for (_, value) in self.user_attributes() {
            walk(value, &mut out);
        }
        out.sort();
        out
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// AWS internal identifier (e.g., vpc-xxx, tgw-xxx)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Attributes other resources may reference, including `id`
    pub fn binding_attributes(&self) -> HashMap<String, Value> {
        let mut attrs = self.attributes.clone();
        if let Some(identifier) = &self.identifier {
            attrs.insert("id".to_string(), Value::String(identifier.clone()));
        }
        attrs
    }
}
