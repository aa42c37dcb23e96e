//! Effect - Side effects represented as values
//!
//! An Effect describes one operation against real infrastructure.
//! Nothing happens until the Interpreter runs it.

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a new resource
    Create(Resource),
    /// Update an existing resource in place
    Update {
        id: ResourceId,
        /// Current state (carries the AWS identifier)
        from: State,
        to: Resource,
        /// Attributes that differ, sorted
        changed: Vec<String>,
    },
    /// Delete a resource by its AWS identifier
    Delete {
        id: ResourceId,
        identifier: String,
    },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } => id,
            Effect::Delete { id, .. } => id,
        }
    }

    /// Human-readable kind, used in logs and plan output
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Create(_) => "create",
            Effect::Update { .. } => "update",
            Effect::Delete { .. } => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_of_each_effect() {
        let id = ResourceId::new("aws_vpc", "main");
        let create = Effect::Create(Resource::new("aws_vpc", "main"));
        let delete = Effect::Delete {
            id: id.clone(),
            identifier: "vpc-0abc".to_string(),
        };
        assert_eq!(create.resource_id(), &id);
        assert_eq!(delete.resource_id(), &id);
        assert_eq!(delete.kind(), "delete");
    }
}
