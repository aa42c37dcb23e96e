//! Validation - Static checks on a parsed declaration
//!
//! Everything here runs before any provider call. Provider-specific topology
//! rules live with the provider and produce the same `Diagnostic` type.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::graph::DependencyGraph;
use crate::parser::ParsedFile;
use crate::resource::{ResourceId, Value};
use crate::schema::ResourceSchema;

/// Functions whose result changes between runs
pub const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &["timestamp", "uuid", "bcrypt", "plantimestamp"];

/// Meta-arguments this tool does not implement
pub const UNSUPPORTED_META_ARGUMENTS: &[&str] = &["count", "for_each", "provider", "lifecycle"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub resource: Option<ResourceId>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(resource: Option<&ResourceId>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            resource: resource.cloned(),
            message: message.into(),
        }
    }

    pub fn warning(resource: Option<&ResourceId>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            resource: resource.cloned(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(id) => write!(f, "{}: {}: {}", self.severity, id, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Run every provider-independent check
pub fn validate(parsed: &ParsedFile, schemas: &HashMap<String, ResourceSchema>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_meta_arguments(parsed, &mut diagnostics);
    check_references(parsed, schemas, &mut diagnostics);
    check_expressions(parsed, &mut diagnostics);
    check_cycles(parsed, &mut diagnostics);
    check_schemas(parsed, schemas, &mut diagnostics);
    diagnostics
}

fn check_meta_arguments(parsed: &ParsedFile, out: &mut Vec<Diagnostic>) {
    for resource in &parsed.resources {
        for meta in UNSUPPORTED_META_ARGUMENTS {
            if resource.attributes.contains_key(*meta) {
                out.push(Diagnostic::error(
                    Some(&resource.id),
                    format!("meta-argument '{}' is not supported", meta),
                ));
            }
        }
    }
}

/// Every reference must name a declared resource (and a known attribute)
fn check_references(
    parsed: &ParsedFile,
    schemas: &HashMap<String, ResourceSchema>,
    out: &mut Vec<Diagnostic>,
) {
    let declared: HashSet<String> = parsed.resources.iter().map(|r| r.id.address()).collect();

    let check = |owner: Option<&ResourceId>, value: &Value, out: &mut Vec<Diagnostic>| {
        let mut refs = Vec::new();
        crate::graph::collect_refs(value, &mut refs);
        for (address, attribute) in refs {
            if !declared.contains(&address) {
                let target = if attribute.is_empty() {
                    address.clone()
                } else {
                    format!("{}.{}", address, attribute)
                };
                out.push(Diagnostic::error(
                    owner,
                    format!("reference to undeclared resource '{}'", target),
                ));
                continue;
            }
            if attribute.is_empty() || attribute == "id" {
                continue;
            }
            let known = ResourceId::from_address(&address)
                .and_then(|id| schemas.get(&id.resource_type))
                .is_none_or(|schema| schema.attributes.contains_key(&attribute));
            if !known {
                out.push(Diagnostic::error(
                    owner,
                    format!("'{}' has no attribute '{}'", address, attribute),
                ));
            }
        }
    };

    for resource in &parsed.resources {
        let mut keys: Vec<&String> = resource.attributes.keys().collect();
        keys.sort();
        for key in keys {
            check(Some(&resource.id), &resource.attributes[key], out);
        }
    }
    for output in &parsed.outputs {
        check(None, &output.value, out);
    }
}

/// Function calls and string templates are not evaluated
fn check_expressions(parsed: &ParsedFile, out: &mut Vec<Diagnostic>) {
    fn walk(owner: Option<&ResourceId>, path: &str, value: &Value, out: &mut Vec<Diagnostic>) {
        match value {
            Value::Call(name, args) => {
                if NON_DETERMINISTIC_FUNCTIONS.contains(&name.as_str()) {
                    out.push(Diagnostic::error(
                        owner,
                        format!(
                            "{}: non-deterministic function '{}()' breaks idempotent re-applies",
                            path, name
                        ),
                    ));
                } else {
                    out.push(Diagnostic::error(
                        owner,
                        format!("{}: function '{}()' is not supported", path, name),
                    ));
                }
                for arg in args {
                    walk(owner, path, arg, out);
                }
            }
            Value::String(s) if s.contains("${") => out.push(Diagnostic::error(
                owner,
                format!("{}: string interpolation is not supported", path),
            )),
            Value::List(items) => {
                for item in items {
                    walk(owner, path, item, out);
                }
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    walk(owner, &format!("{}.{}", path, key), &map[key], out);
                }
            }
            _ => {}
        }
    }

    for resource in &parsed.resources {
        let mut attrs: Vec<(&String, &Value)> = resource.user_attributes().collect();
        attrs.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in attrs {
            walk(Some(&resource.id), key, value, out);
        }
    }
    for output in &parsed.outputs {
        walk(None, &format!("output.{}", output.name), &output.value, out);
    }
}

fn check_cycles(parsed: &ParsedFile, out: &mut Vec<Diagnostic>) {
    let graph = DependencyGraph::from_resources(&parsed.resources);
    if let Err(e) = graph.topological_order() {
        out.push(Diagnostic::error(None, e.to_string()));
    }
}

fn check_schemas(
    parsed: &ParsedFile,
    schemas: &HashMap<String, ResourceSchema>,
    out: &mut Vec<Diagnostic>,
) {
    for resource in &parsed.resources {
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            out.push(Diagnostic::error(
                Some(&resource.id),
                format!("unknown resource type '{}'", resource.id.resource_type),
            ));
            continue;
        };

        let attributes: HashMap<String, Value> = resource
            .user_attributes()
            .filter(|(k, _)| !UNSUPPORTED_META_ARGUMENTS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Err(errors) = schema.validate(&attributes) {
            for e in errors {
                out.push(Diagnostic::error(Some(&resource.id), e.to_string()));
            }
        }
    }
}
