//! State file structures for persisting infrastructure state

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use vpnlab_core::differ::Orphan;
use vpnlab_core::resource::{Bindings, ResourceId, State, Value};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of vpnlab that last modified this state
    pub vpnlab_version: String,
    /// All managed resources and their current state
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            vpnlab_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and update vpnlab version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.vpnlab_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Find a resource mutably by type and name
    pub fn find_resource_mut(
        &mut self,
        resource_type: &str,
        name: &str,
    ) -> Option<&mut ResourceState> {
        self.resources
            .iter_mut()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Add or update a resource in the state
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        if let Some(existing) = self.find_resource_mut(&resource.resource_type, &resource.name) {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }

    /// Remove a resource from the state
    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// AWS identifier recorded for a resource
    pub fn identifier_of(&self, id: &ResourceId) -> Option<&str> {
        self.find_resource(&id.resource_type, &id.name)
            .and_then(|r| r.identifier.as_deref())
    }

    /// Recorded resources that are not in `declared`
    pub fn orphans(&self, declared: &[ResourceId]) -> Vec<Orphan> {
        let declared: HashSet<ResourceId> = declared.iter().cloned().collect();
        self.resources
            .iter()
            .filter(|r| !declared.contains(&r.id()))
            .filter_map(ResourceState::to_orphan)
            .collect()
    }

    /// Every recorded resource, for teardown
    pub fn tracked(&self) -> Vec<Orphan> {
        self.resources
            .iter()
            .filter_map(ResourceState::to_orphan)
            .collect()
    }

    /// Recorded attributes per address, with `id` set to the identifier
    pub fn bindings(&self) -> Bindings {
        self.resources
            .iter()
            .map(|r| (r.id().address(), r.to_state().binding_attributes()))
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "aws_vpc", "aws_vpn_connection")
    pub resource_type: String,
    /// Resource name (second label of the resource block)
    pub name: String,
    /// Provider name (e.g., "aws")
    pub provider: String,
    /// AWS identifier (e.g., "vpc-0abc...")
    #[serde(default)]
    pub identifier: Option<String>,
    /// All attributes of the resource as JSON values
    pub attributes: HashMap<String, serde_json::Value>,
    /// Addresses of resources this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            identifier: None,
            attributes: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Record a provider-reported state
    pub fn from_state(state: &State, provider: impl Into<String>, dependencies: Vec<String>) -> Self {
        let attributes = state
            .attributes
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            provider: provider.into(),
            identifier: state.identifier.clone(),
            attributes,
            dependencies,
        }
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }

    /// Recorded state as a core `State`
    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
            .collect();
        let mut state = State::existing(self.id(), attributes);
        state.identifier = self.identifier.clone();
        state
    }

    fn to_orphan(&self) -> Option<Orphan> {
        Some(Orphan {
            id: self.id(),
            identifier: self.identifier.clone()?,
            dependencies: self.dependencies.clone(),
        })
    }
}

/// Convert an attribute value to JSON
///
/// Unresolved references are recorded as their address; function calls
/// are never stored and become `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::ResourceRef(address, attribute) => {
            serde_json::Value::String(format!("{}.{}", address, attribute))
        }
        Value::Call(_, _) => serde_json::Value::Null,
    }
}

/// Convert JSON back to an attribute value; `null` has no value
pub fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::String(n.to_string()),
        }),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            Some(Value::List(items.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        let lineage = state.lineage.clone();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
        assert_eq!(state.lineage, lineage);
    }

    #[test]
    fn test_state_file_upsert_resource() {
        let mut state = StateFile::new();

        let cgw = ResourceState::new("aws_customer_gateway", "cgw", "aws")
            .with_identifier("cgw-1")
            .with_attribute("bgp_asn", serde_json::json!(65000));
        state.upsert_resource(cgw);
        assert_eq!(state.resources.len(), 1);

        // Replacement gets a new identifier
        let cgw = ResourceState::new("aws_customer_gateway", "cgw", "aws")
            .with_identifier("cgw-2")
            .with_attribute("bgp_asn", serde_json::json!(65001));
        state.upsert_resource(cgw);
        assert_eq!(state.resources.len(), 1);
        assert_eq!(
            state.identifier_of(&ResourceId::new("aws_customer_gateway", "cgw")),
            Some("cgw-2")
        );
    }

    #[test]
    fn test_state_file_remove_resource() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("aws_vpc", "main", "aws"));

        assert!(state.remove_resource("aws_vpc", "main").is_some());
        assert!(state.resources.is_empty());
        assert!(state.remove_resource("aws_vpc", "other").is_none());
    }

    #[test]
    fn test_orphans_and_tracked() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("aws_vpc", "main", "aws").with_identifier("vpc-1"));
        state.upsert_resource(
            ResourceState::new("aws_vpn_connection", "old", "aws")
                .with_identifier("vpn-1")
                .with_dependencies(vec!["aws_customer_gateway.cgw".to_string()]),
        );
        // Never created, nothing to delete
        state.upsert_resource(ResourceState::new("aws_customer_gateway", "cgw", "aws"));

        let orphans = state.orphans(&[ResourceId::new("aws_vpc", "main")]);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].identifier, "vpn-1");
        assert_eq!(orphans[0].dependencies, vec!["aws_customer_gateway.cgw"]);

        assert_eq!(state.tracked().len(), 2);
    }

    #[test]
    fn test_state_roundtrip_through_core_state() {
        let mut attrs = HashMap::new();
        attrs.insert("amazon_side_asn".to_string(), Value::Int(64512));
        attrs.insert("dns_support".to_string(), Value::String("enable".to_string()));
        attrs.insert("_binding".to_string(), Value::String("x".to_string()));
        let mut tags = HashMap::new();
        tags.insert("Name".to_string(), Value::String("hub".to_string()));
        attrs.insert("tags".to_string(), Value::Map(tags));

        let core = State::existing(ResourceId::new("aws_ec2_transit_gateway", "tgw"), attrs)
            .with_identifier("tgw-1");
        let recorded = ResourceState::from_state(&core, "aws", vec![]);
        assert!(!recorded.attributes.contains_key("_binding"));

        let back = recorded.to_state();
        assert!(back.exists);
        assert_eq!(back.identifier.as_deref(), Some("tgw-1"));
        assert_eq!(back.attributes.get("amazon_side_asn"), Some(&Value::Int(64512)));
        assert_eq!(back.attributes.len(), 3);

        let bindings = {
            let mut state = StateFile::new();
            state.upsert_resource(recorded);
            state.bindings()
        };
        assert_eq!(
            bindings["aws_ec2_transit_gateway.tgw"].get("id"),
            Some(&Value::String("tgw-1".to_string()))
        );
    }

    #[test]
    fn test_json_null_and_calls() {
        assert_eq!(json_to_value(&serde_json::Value::Null), None);
        assert_eq!(
            value_to_json(&Value::Call("timestamp".to_string(), vec![])),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_state_file_serialization() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("aws_vpc", "main", "aws")
                .with_identifier("vpc-1")
                .with_attribute("cidr_block", serde_json::json!("10.0.0.0/16")),
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.serial, state.serial);
        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.resources[0].identifier.as_deref(), Some("vpc-1"));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "version": 1, "serial": 3, "lineage": "abc", "vpnlab_version": "0.1.0",
            "resources": [
                {"resource_type": "aws_vpc", "name": "main", "provider": "aws", "attributes": {}}
            ]
        }"#;
        let state: StateFile = serde_json::from_str(json).unwrap();
        assert!(state.resources[0].identifier.is_none());
        assert!(state.resources[0].dependencies.is_empty());
    }
}
