//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the "desired state" declared in the .tf file with the "current state"
//! fetched from the Provider, and generates a list of required Effects (Plan).

use std::collections::HashMap;

use log::debug;

use crate::effect::Effect;
use crate::graph::{DependencyGraph, GraphError};
use crate::plan::Plan;
use crate::resource::{Bindings, Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists and a force-new attribute differs -> delete then create
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// A resource recorded in state that is no longer declared
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub id: ResourceId,
    pub identifier: String,
    /// Addresses this resource depended on when it was created
    pub dependencies: Vec<String>,
}

/// Compare desired state with current state to compute a Diff
///
/// `desired` should already have its references resolved as far as possible;
/// a reference that is still unresolved always counts as a change.
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = schema.is_some_and(|s| changed.iter().any(|name| s.is_force_new(name)));
    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        if desired_value.contains_ref() {
            changed.push(key.clone());
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

/// Compute Diffs for all declared resources and generate a Plan
///
/// Resources are visited in dependency order. References are resolved against
/// the current state; a resource that is created or replaced drops out of the
/// bindings, so its dependents see an unresolved reference and are updated or,
/// through a force-new attribute, replaced as well.
///
/// Deletes (orphans and the first half of replacements) run first, in reverse
/// dependency order; creates and updates follow in dependency order.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
    orphans: &[Orphan],
) -> Result<Plan, GraphError> {
    let graph = DependencyGraph::from_resources(desired);
    let order = graph.topological_order()?;
    let by_address: HashMap<String, &Resource> =
        desired.iter().map(|r| (r.id.address(), r)).collect();

    let mut bindings: Bindings = current_states
        .values()
        .filter(|s| s.exists)
        .map(|s| (s.id.address(), s.binding_attributes()))
        .collect();

    let mut plan = Plan::new();
    let mut deletes: Vec<(ResourceId, String, Vec<String>)> = Vec::new();
    let mut changes = Vec::new();

    for address in &order {
        let Some(resource) = by_address.get(address) else {
            continue;
        };
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));
        let resolved = resource.resolve(&bindings);

        match diff(&resolved, &current, schemas.get(&resource.id.resource_type)) {
            Diff::Create(r) => {
                debug!("{}: create", address);
                bindings.remove(address);
                changes.push(Effect::Create(r));
            }
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => {
                debug!("{}: update {:?}", address, changed_attributes);
                changes.push(Effect::Update {
                    id,
                    from,
                    to,
                    changed: changed_attributes,
                });
            }
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => {
                debug!("{}: replace because of {:?}", address, changed_attributes);
                bindings.remove(address);
                let dependencies = graph
                    .dependencies_of(address)
                    .iter()
                    .map(|d| d.target.clone())
                    .collect();
                deletes.push((
                    id.clone(),
                    from.identifier.clone().unwrap_or_default(),
                    dependencies,
                ));
                plan.mark_replaced(id);
                changes.push(Effect::Create(to));
            }
            Diff::NoChange(_) => {}
        }
    }

    for orphan in orphans {
        debug!("{}: no longer declared, delete", orphan.id);
        deletes.push((
            orphan.id.clone(),
            orphan.identifier.clone(),
            orphan.dependencies.clone(),
        ));
    }

    for effect in order_deletes(deletes)? {
        plan.add(effect);
    }
    for effect in changes {
        plan.add(effect);
    }

    Ok(plan)
}

/// Plan that deletes every given resource, dependents first
pub fn destroy_plan(resources: &[Orphan]) -> Result<Plan, GraphError> {
    let mut plan = Plan::new();
    let deletes = resources
        .iter()
        .map(|r| (r.id.clone(), r.identifier.clone(), r.dependencies.clone()))
        .collect();
    for effect in order_deletes(deletes)? {
        plan.add(effect);
    }
    Ok(plan)
}

fn order_deletes(
    deletes: Vec<(ResourceId, String, Vec<String>)>,
) -> Result<Vec<Effect>, GraphError> {
    let mut graph = DependencyGraph::new();
    for (id, _, _) in &deletes {
        graph.add_node(id.address());
    }
    for (id, _, dependencies) in &deletes {
        for target in dependencies {
            graph.add_edge(
                id.address(),
                crate::graph::Dependency {
                    target: target.clone(),
                    attribute: String::new(),
                    used_in: String::new(),
                },
            );
        }
    }

    let mut by_address: HashMap<String, (ResourceId, String)> = deletes
        .into_iter()
        .map(|(id, identifier, _)| (id.address(), (id, identifier)))
        .collect();

    Ok(graph
        .reverse_topological_order()?
        .into_iter()
        .filter_map(|address| by_address.remove(&address))
        .map(|(id, identifier)| Effect::Delete { id, identifier })
        .collect())
}
