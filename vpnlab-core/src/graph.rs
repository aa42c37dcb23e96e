//! Graph - Dependency analysis between declared resources
//!
//! Edges come from attribute references (`aws_vpc.main.id`) and explicit
//! `depends_on` entries.

use std::collections::{HashMap, HashSet};

use crate::resource::{Resource, Value};

/// Dependency between resources
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    /// Target resource address
    pub target: String,
    /// Referenced attribute (e.g., "id"); empty for `depends_on`
    pub attribute: String,
    /// Where this reference is used (e.g., "customer_gateway_id")
    pub used_in: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Dependency graph over resource addresses
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Addresses in declaration order
    nodes: Vec<String>,
    /// Resource address -> list of dependencies
    edges: HashMap<String, Vec<Dependency>>,
    /// Reverse edges: target -> list of resources that depend on it
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of declared resources
    pub fn from_resources(resources: &[Resource]) -> Self {
        let mut graph = Self::new();
        for resource in resources {
            graph.add_node(resource.id.address());
        }
        for resource in resources {
            let from = resource.id.address();
            let mut keys: Vec<&String> = resource.attributes.keys().collect();
            keys.sort();
            for key in keys {
                let used_in = key.strip_prefix('_').unwrap_or(key);
                let mut refs = Vec::new();
                collect_refs(&resource.attributes[key], &mut refs);
                for (target, attribute) in refs {
                    if target == from {
                        continue;
                    }
                    graph.add_edge(
                        from.clone(),
                        Dependency {
                            target,
                            attribute,
                            used_in: used_in.to_string(),
                        },
                    );
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, address: String) {
        if !self.nodes.contains(&address) {
            self.nodes.push(address);
        }
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, from: String, dependency: Dependency) {
        let target = dependency.target.clone();
        let deps = self.edges.entry(from.clone()).or_default();
        if deps.iter().any(|d| d.target == target) {
            // Keep one edge per target; remember the first usage
            return;
        }
        deps.push(dependency);
        self.reverse_edges.entry(target).or_default().push(from);
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, resource: &str) -> &[Dependency] {
        self.edges.get(resource).map_or(&[], |v| v.as_slice())
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, resource: &str) -> &[String] {
        self.reverse_edges
            .get(resource)
            .map_or(&[], |v| v.as_slice())
    }

    /// All addresses that transitively depend on `resource`
    pub fn transitive_dependents(&self, resource: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![resource.to_string()];
        while let Some(node) = stack.pop() {
            for dependent in self.dependents_of(&node) {
                if seen.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }
        seen
    }

    /// Order nodes so every resource comes after its dependencies
    ///
    /// Among independent resources the declaration order is kept.
    /// Edges to unknown addresses are ignored here; dangling references are
    /// reported by validation.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let known: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|node| {
                !emitted.contains(node.as_str())
                    && self.dependencies_of(node).iter().all(|d| {
                        !known.contains(d.target.as_str()) || emitted.contains(d.target.as_str())
                    })
            });

            match next {
                Some(node) => {
                    emitted.insert(node.as_str());
                    order.push(node.clone());
                }
                None => {
                    let path = self.find_cycle().unwrap_or_default();
                    return Err(GraphError::Cycle(path));
                }
            }
        }

        Ok(order)
    }

    /// Dependents before dependencies; used for deletes
    pub fn reverse_topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find one cycle, returned as a closed path (`a -> b -> a`)
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if let Some(path) = self.find_cycle_util(node, &mut visited, &mut stack) {
                return Some(path);
            }
        }
        None
    }

    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| n == node) {
            let mut path = stack[pos..].to_vec();
            path.push(node.to_string());
            return Some(path);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        stack.push(node.to_string());

        for dep in self.dependencies_of(node) {
            if let Some(path) = self.find_cycle_util(&dep.target, visited, stack) {
                return Some(path);
            }
        }

        stack.pop();
        None
    }
}

/// Collect `(address, attribute)` pairs of every reference inside a value
pub fn collect_refs(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::ResourceRef(address, attribute) => out.push((address.clone(), attribute.clone())),
        Value::List(items) | Value::Call(_, items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                collect_refs(&map[key], out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(address: &str, attr: &str) -> Value {
        Value::ResourceRef(address.to_string(), attr.to_string())
    }

    fn topology() -> Vec<Resource> {
        vec![
            Resource::new("aws_vpn_connection", "vpn")
                .with_attribute(
                    "customer_gateway_id",
                    reference("aws_customer_gateway.cgw", "id"),
                )
                .with_attribute(
                    "transit_gateway_id",
                    reference("aws_ec2_transit_gateway.tgw", "id"),
                ),
            Resource::new("aws_vpc", "main"),
            Resource::new("aws_customer_gateway", "cgw"),
            Resource::new("aws_ec2_transit_gateway", "tgw"),
        ]
    }

    #[test]
    fn edges_from_references() {
        let graph = DependencyGraph::from_resources(&topology());
        let deps = graph.dependencies_of("aws_vpn_connection.vpn");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].target, "aws_customer_gateway.cgw");
        assert_eq!(deps[0].used_in, "customer_gateway_id");
        assert_eq!(
            graph.dependents_of("aws_ec2_transit_gateway.tgw"),
            &["aws_vpn_connection.vpn".to_string()]
        );
    }

    #[test]
    fn topological_order_is_stable() {
        let graph = DependencyGraph::from_resources(&topology());
        assert_eq!(
            graph.topological_order().unwrap(),
            vec![
                "aws_vpc.main",
                "aws_customer_gateway.cgw",
                "aws_ec2_transit_gateway.tgw",
                "aws_vpn_connection.vpn",
            ]
        );
        assert_eq!(
            graph.reverse_topological_order().unwrap()[0],
            "aws_vpn_connection.vpn"
        );
    }

    #[test]
    fn depends_on_adds_edge() {
        let resources = vec![
            Resource::new("aws_vpc", "main").with_attribute(
                "_depends_on",
                Value::List(vec![reference("aws_ec2_transit_gateway.tgw", "")]),
            ),
            Resource::new("aws_ec2_transit_gateway", "tgw"),
        ];
        let graph = DependencyGraph::from_resources(&resources);
        assert_eq!(graph.dependencies_of("aws_vpc.main")[0].used_in, "depends_on");
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["aws_ec2_transit_gateway.tgw", "aws_vpc.main"]
        );
    }

    #[test]
    fn cycle_detection() {
        let resources = vec![
            Resource::new("aws_vpc", "a").with_attribute("x", reference("aws_vpc.b", "id")),
            Resource::new("aws_vpc", "b").with_attribute("x", reference("aws_vpc.c", "id")),
            Resource::new("aws_vpc", "c").with_attribute("x", reference("aws_vpc.a", "id")),
        ];
        let graph = DependencyGraph::from_resources(&resources);

        assert!(graph.has_cycle());
        match graph.topological_order() {
            Err(GraphError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("Expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn unknown_targets_do_not_block_order() {
        let resources = vec![
            Resource::new("aws_vpn_connection", "vpn")
                .with_attribute("customer_gateway_id", reference("aws_customer_gateway.gone", "id")),
        ];
        let graph = DependencyGraph::from_resources(&resources);
        assert!(!graph.has_cycle());
        assert_eq!(graph.topological_order().unwrap(), vec!["aws_vpn_connection.vpn"]);
    }

    #[test]
    fn transitive_dependents() {
        let resources = vec![
            Resource::new("aws_vpc", "a"),
            Resource::new("aws_vpc", "b").with_attribute("x", reference("aws_vpc.a", "id")),
            Resource::new("aws_vpc", "c").with_attribute("x", reference("aws_vpc.b", "id")),
        ];
        let graph = DependencyGraph::from_resources(&resources);
        let dependents = graph.transitive_dependents("aws_vpc.a");
        assert!(dependents.contains("aws_vpc.b"));
        assert!(dependents.contains("aws_vpc.c"));
        assert_eq!(dependents.len(), 2);
    }
}
