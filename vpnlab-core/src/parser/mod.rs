//! Parser - Parse .tf declarations
//!
//! Convert the Terraform-compatible declaration subset to resources using pest

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::collections::HashMap;

use crate::resource::{Resource, ResourceId, Value};

#[derive(Parser)]
#[grammar = "parser/vpnlab.pest"]
struct DeclarationParser;

/// Parse error
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),

    #[error("Invalid expression at line {line}: {message}")]
    InvalidExpression { line: usize, message: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Unsupported block type '{name}' at line {line}")]
    UnsupportedBlock { line: usize, name: String },

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Duplicate attribute '{name}' at line {line}")]
    DuplicateAttribute { line: usize, name: String },
}

/// Provider configuration (`provider "aws" { ... }`)
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub attributes: HashMap<String, Value>,
}

/// Backend configuration for state storage (`terraform { backend "local" { ... } }`)
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, Value>,
}

/// Output declaration (`output "vpn_id" { value = ... }`)
#[derive(Debug, Clone)]
pub struct OutputValue {
    pub name: String,
    pub value: Value,
    pub description: Option<String>,
}

/// Parse result
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub providers: Vec<ProviderConfig>,
    /// Resources in declaration order
    pub resources: Vec<Resource>,
    /// Variable defaults
    pub variables: HashMap<String, Value>,
    pub outputs: Vec<OutputValue>,
    /// Backend configuration for state storage
    pub backend: Option<BackendConfig>,
}

impl ParsedFile {
    /// Find a declared resource by address
    pub fn resource(&self, address: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id.address() == address)
    }

    /// Find a provider block by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Parse context (variable scope)
struct ParseContext {
    /// Declared variables; `None` when the variable has no default
    variables: HashMap<String, Option<Value>>,
}

impl ParseContext {
    fn get_variable(&self, name: &str) -> Result<Value, ParseError> {
        match self.variables.get(name) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(ParseError::UndefinedVariable(format!(
                "var.{} (no default value)",
                name
            ))),
            None => Err(ParseError::UndefinedVariable(format!("var.{}", name))),
        }
    }
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Parsed block header and raw body
struct RawBlock<'a> {
    line: usize,
    kind: String,
    labels: Vec<String>,
    body: Pair<'a, Rule>,
}

fn split_block(pair: Pair<'_, Rule>) -> Result<RawBlock<'_>, ParseError> {
    let line = line_of(&pair);
    let mut kind = String::new();
    let mut labels = Vec::new();
    let mut body = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => kind = inner.as_str().to_string(),
            Rule::label => {
                let label = inner.into_inner().next();
                labels.push(match label {
                    Some(l) if l.as_rule() == Rule::string => parse_string(l),
                    Some(l) => l.as_str().to_string(),
                    None => String::new(),
                });
            }
            Rule::body => body = Some(inner),
            _ => {}
        }
    }

    Ok(RawBlock {
        line,
        kind,
        labels,
        body: body.ok_or_else(|| missing(line))?,
    })
}

fn expect_labels(block: &RawBlock, count: usize) -> Result<(), ParseError> {
    if block.labels.len() == count {
        Ok(())
    } else {
        Err(ParseError::InvalidExpression {
            line: block.line,
            message: format!(
                "'{}' block expects {} label(s), got {}",
                block.kind,
                count,
                block.labels.len()
            ),
        })
    }
}

/// Parse a .tf declaration
pub fn parse(input: &str) -> Result<ParsedFile, ParseError> {
    let file = DeclarationParser::parse(Rule::file, input)
        .map_err(Box::new)?
        .next()
        .ok_or_else(|| ParseError::InvalidExpression {
            line: 0,
            message: "empty input".to_string(),
        })?;

    let blocks: Vec<RawBlock> = file
        .into_inner()
        .filter(|p| p.as_rule() == Rule::block)
        .map(split_block)
        .collect::<Result<_, _>>()?;

    // Variables may be referenced before they are declared
    let mut ctx = ParseContext {
        variables: HashMap::new(),
    };
    for block in blocks.iter().filter(|b| b.kind == "variable") {
        expect_labels(block, 1)?;
        let empty = ParseContext {
            variables: HashMap::new(),
        };
        let attrs = parse_body(block.body.clone(), &empty)?;
        ctx.variables
            .insert(block.labels[0].clone(), attrs.get("default").cloned());
    }

    let mut parsed = ParsedFile::default();
    for (name, value) in &ctx.variables {
        if let Some(value) = value {
            parsed.variables.insert(name.clone(), value.clone());
        }
    }

    for block in blocks {
        match block.kind.as_str() {
            "variable" => {}
            "resource" => {
                expect_labels(&block, 2)?;
                let resource = parse_resource_block(&block, &ctx)?;
                let address = resource.id.address();
                if parsed.resource(&address).is_some() {
                    return Err(ParseError::DuplicateResource(address));
                }
                parsed.resources.push(resource);
            }
            "provider" => {
                expect_labels(&block, 1)?;
                let attributes = parse_body(block.body.clone(), &ctx)?;
                parsed.providers.push(ProviderConfig {
                    name: block.labels[0].clone(),
                    attributes,
                });
            }
            "output" => {
                expect_labels(&block, 1)?;
                let attrs = parse_body(block.body.clone(), &ctx)?;
                let value = attrs
                    .get("value")
                    .cloned()
                    .ok_or_else(|| ParseError::InvalidExpression {
                        line: block.line,
                        message: format!("output '{}' has no value", block.labels[0]),
                    })?;
                parsed.outputs.push(OutputValue {
                    name: block.labels[0].clone(),
                    value,
                    description: attrs
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                });
            }
            "terraform" => {
                if let Some(backend) = parse_terraform_block(&block, &ctx)? {
                    parsed.backend = Some(backend);
                }
            }
            other => {
                return Err(ParseError::UnsupportedBlock {
                    line: block.line,
                    name: other.to_string(),
                });
            }
        }
    }

    Ok(parsed)
}

fn parse_resource_block(block: &RawBlock, ctx: &ParseContext) -> Result<Resource, ParseError> {
    let resource_type = block.labels[0].clone();
    let name = block.labels[1].clone();
    let id = ResourceId::new(&resource_type, &name);

    let mut attributes = parse_body(block.body.clone(), ctx)?;

    if let Some(deps) = attributes.remove("depends_on") {
        match deps {
            Value::List(items) => {
                attributes.insert("_depends_on".to_string(), Value::List(items));
            }
            _ => {
                return Err(ParseError::InvalidExpression {
                    line: block.line,
                    message: format!("depends_on of {} must be a list", id),
                });
            }
        }
    }

    // Provider is the type prefix (aws_vpc -> aws)
    let provider = resource_type
        .split('_')
        .next()
        .unwrap_or(&resource_type)
        .to_string();
    attributes.insert("_provider".to_string(), Value::String(provider));
    attributes.insert("_binding".to_string(), Value::String(id.address()));

    Ok(Resource { id, attributes })
}

fn parse_terraform_block(
    block: &RawBlock,
    ctx: &ParseContext,
) -> Result<Option<BackendConfig>, ParseError> {
    let mut backend = None;
    for item in block.body.clone().into_inner() {
        if item.as_rule() != Rule::block {
            continue;
        }
        let nested = split_block(item)?;
        if nested.kind == "backend" {
            expect_labels(&nested, 1)?;
            backend = Some(BackendConfig {
                backend_type: nested.labels[0].clone(),
                attributes: parse_body(nested.body.clone(), ctx)?,
            });
        }
    }
    Ok(backend)
}

/// Parse block body (attributes and nested blocks)
/// Nested blocks with the same name are collected into a list
fn parse_body(body: Pair<Rule>, ctx: &ParseContext) -> Result<HashMap<String, Value>, ParseError> {
    let mut attributes: HashMap<String, Value> = HashMap::new();
    let mut nested_blocks: Vec<(String, Value)> = Vec::new();

    for item in body.into_inner() {
        match item.as_rule() {
            Rule::attribute => {
                let line = line_of(&item);
                let mut inner = item.into_inner();
                let key = next_str(&mut inner, line)?;
                let expr = inner.next().ok_or_else(|| missing(line))?;
                let value = parse_expression(expr, ctx)?;
                if attributes.contains_key(&key) {
                    return Err(ParseError::DuplicateAttribute { line, name: key });
                }
                // `null` means "not set"
                if let Some(value) = value {
                    attributes.insert(key, value);
                }
            }
            Rule::block => {
                let nested = split_block(item)?;
                let block_attrs = parse_body(nested.body.clone(), ctx)?;
                nested_blocks.push((nested.kind, Value::Map(block_attrs)));
            }
            _ => {}
        }
    }

    for (name, block) in nested_blocks {
        match attributes.get_mut(&name) {
            Some(Value::List(items)) => items.push(block),
            _ => {
                attributes.insert(name, Value::List(vec![block]));
            }
        }
    }

    Ok(attributes)
}

fn missing(line: usize) -> ParseError {
    ParseError::InvalidExpression {
        line,
        message: "incomplete expression".to_string(),
    }
}

fn next_str(inner: &mut pest::iterators::Pairs<Rule>, line: usize) -> Result<String, ParseError> {
    inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| missing(line))
}

/// Parse an expression; `Ok(None)` is the literal `null`
fn parse_expression(pair: Pair<Rule>, ctx: &ParseContext) -> Result<Option<Value>, ParseError> {
    let line = line_of(&pair);
    let inner = if pair.as_rule() == Rule::expression {
        pair.into_inner().next().ok_or_else(|| missing(line))?
    } else {
        pair
    };

    let value = match inner.as_rule() {
        Rule::expression => return parse_expression(inner, ctx),
        Rule::null_lit => return Ok(None),
        Rule::string => Value::String(parse_string(inner)),
        Rule::boolean => Value::Bool(inner.as_str() == "true"),
        Rule::number => {
            let n = inner
                .as_str()
                .parse::<i64>()
                .map_err(|e| ParseError::InvalidExpression {
                    line,
                    message: format!("invalid number '{}': {}", inner.as_str(), e),
                })?;
            Value::Int(n)
        }
        Rule::list => Value::List(parse_items(inner, ctx)?),
        Rule::map => {
            let mut map = HashMap::new();
            for entry in inner.into_inner() {
                let mut entry_inner = entry.into_inner();
                let key_pair = entry_inner
                    .next()
                    .and_then(|k| k.into_inner().next())
                    .ok_or_else(|| missing(line))?;
                let key = if key_pair.as_rule() == Rule::string {
                    parse_string(key_pair)
                } else {
                    key_pair.as_str().to_string()
                };
                let expr = entry_inner.next().ok_or_else(|| missing(line))?;
                if let Some(value) = parse_expression(expr, ctx)? {
                    map.insert(key, value);
                }
            }
            Value::Map(map)
        }
        Rule::call => {
            let mut call_inner = inner.into_inner();
            let name = next_str(&mut call_inner, line)?;
            let mut args = Vec::new();
            for arg in call_inner {
                args.push(parse_expression(arg, ctx)?.unwrap_or(Value::String(String::new())));
            }
            Value::Call(name, args)
        }
        Rule::traversal => parse_traversal(inner.as_str(), line, ctx)?,
        _ => {
            return Err(ParseError::InvalidExpression {
                line,
                message: format!("unexpected token '{}'", inner.as_str()),
            });
        }
    };

    Ok(Some(value))
}

fn parse_items(pair: Pair<Rule>, ctx: &ParseContext) -> Result<Vec<Value>, ParseError> {
    let mut items = Vec::new();
    for item in pair.into_inner() {
        if let Some(value) = parse_expression(item, ctx)? {
            items.push(value);
        }
    }
    Ok(items)
}

/// Resolve a dotted traversal
///
/// - `var.name` -> the variable's default value
/// - `type.name` -> bare resource reference (used by depends_on)
/// - `type.name.attr` -> resource attribute reference
/// - `ident` -> the identifier as a string (keywords like `string` in type constraints)
fn parse_traversal(path: &str, line: usize, ctx: &ParseContext) -> Result<Value, ParseError> {
    let parts: Vec<&str> = path.split('.').collect();

    if parts[0] == "var" {
        if parts.len() != 2 {
            return Err(ParseError::InvalidExpression {
                line,
                message: format!("invalid variable reference '{}'", path),
            });
        }
        return ctx.get_variable(parts[1]);
    }

    match parts.len() {
        1 => Ok(Value::String(path.to_string())),
        2 => Ok(Value::ResourceRef(path.to_string(), String::new())),
        _ => Ok(Value::ResourceRef(
            format!("{}.{}", parts[0], parts[1]),
            parts[2..].join("."),
        )),
    }
}

fn parse_string(pair: Pair<Rule>) -> String {
    let raw = match pair.as_rule() {
        Rule::string => pair
            .into_inner()
            .next()
            .map(|p| p.as_str())
            .unwrap_or_default(),
        _ => pair.as_str(),
    };

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"
        provider "aws" {
          region = "ap-northeast-1"
        }

        resource "aws_vpc" "main" {
          cidr_block       = "10.0.0.0/16"
          instance_tenancy = "default"
        }

        resource "aws_customer_gateway" "cgw" {
          bgp_asn    = 65000
          ip_address = "203.0.113.12"
          type       = "ipsec.1"
        }

        resource "aws_ec2_transit_gateway" "tgw" {
          amazon_side_asn                 = 64512
          default_route_table_association = "disable"
          default_route_table_propagation = "disable"
          auto_accept_shared_attachments  = "enable"
          dns_support                     = "enable"
          vpn_ecmp_support                = "enable"
        }

        resource "aws_vpn_connection" "vpn" {
          customer_gateway_id    = aws_customer_gateway.cgw.id
          transit_gateway_id     = aws_ec2_transit_gateway.tgw.id
          type                   = aws_customer_gateway.cgw.type
          static_routes_only     = true
          tunnel1_startup_action = "start"
          tunnel2_startup_action = "start"
        }
    "#;

    #[test]
    fn parse_topology() {
        let result = parse(TOPOLOGY).unwrap();
        assert_eq!(result.providers.len(), 1);
        assert_eq!(result.providers[0].name, "aws");
        assert_eq!(result.resources.len(), 4);

        let ids: Vec<String> = result.resources.iter().map(|r| r.id.address()).collect();
        assert_eq!(
            ids,
            vec![
                "aws_vpc.main",
                "aws_customer_gateway.cgw",
                "aws_ec2_transit_gateway.tgw",
                "aws_vpn_connection.vpn"
            ]
        );
    }

    #[test]
    fn parse_references() {
        let result = parse(TOPOLOGY).unwrap();
        let vpn = result.resource("aws_vpn_connection.vpn").unwrap();
        assert_eq!(
            vpn.attributes.get("customer_gateway_id"),
            Some(&Value::ResourceRef(
                "aws_customer_gateway.cgw".to_string(),
                "id".to_string()
            ))
        );
        assert_eq!(
            vpn.attributes.get("static_routes_only"),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            vpn.attributes.get("_binding"),
            Some(&Value::String("aws_vpn_connection.vpn".to_string()))
        );
        assert_eq!(
            vpn.attributes.get("_provider"),
            Some(&Value::String("aws".to_string()))
        );
    }

    #[test]
    fn parse_variables_declared_after_use() {
        let input = r#"
            resource "aws_customer_gateway" "cgw" {
              bgp_asn    = var.asn
              ip_address = var.peer_ip
              type       = "ipsec.1"
            }

            variable "asn" {
              type    = number
              default = 65010
            }

            variable "peer_ip" {
              default = "198.51.100.7"
            }
        "#;

        let result = parse(input).unwrap();
        let cgw = &result.resources[0];
        assert_eq!(cgw.attributes.get("bgp_asn"), Some(&Value::Int(65010)));
        assert_eq!(cgw.get_str("ip_address"), Some("198.51.100.7"));
        assert_eq!(result.variables.len(), 2);
    }

    #[test]
    fn variable_without_default_fails() {
        let input = r#"
            variable "asn" {}
            resource "aws_customer_gateway" "cgw" {
              bgp_asn = var.asn
            }
        "#;
        assert!(matches!(
            parse(input),
            Err(ParseError::UndefinedVariable(name)) if name.contains("asn")
        ));
    }

    #[test]
    fn undeclared_variable_fails() {
        let input = r#"
            resource "aws_vpc" "main" {
              cidr_block = var.cidr
            }
        "#;
        assert!(matches!(parse(input), Err(ParseError::UndefinedVariable(_))));
    }

    #[test]
    fn parse_tags_map_and_comments() {
        let input = r#"
            # line comment
            // another comment
            resource "aws_vpc" "main" {
              cidr_block = "10.0.0.0/16" /* inline */
              tags = {
                Name        = "lab-vpc"
                "owner:team" = "network",
              }
            }
        "#;

        let result = parse(input).unwrap();
        let tags = result.resources[0].attributes.get("tags").unwrap();
        match tags {
            Value::Map(map) => {
                assert_eq!(map.get("Name"), Some(&Value::String("lab-vpc".to_string())));
                assert_eq!(
                    map.get("owner:team"),
                    Some(&Value::String("network".to_string()))
                );
            }
            other => panic!("Expected map, got {:?}", other),
        }
    }

    #[test]
    fn parse_nested_blocks_as_list() {
        let input = r#"
            resource "aws_vpn_connection" "vpn" {
              tunnel1_log_options {
                enabled = true
              }
              tunnel1_log_options {
                enabled = false
              }
            }
        "#;

        let result = parse(input).unwrap();
        match result.resources[0].attributes.get("tunnel1_log_options") {
            Some(Value::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("Expected list, got {:?}", other),
        }
    }

    #[test]
    fn parse_depends_on_and_calls() {
        let input = r#"
            resource "aws_vpc" "main" {
              cidr_block = "10.0.0.0/16"
              tags = {
                Created = timestamp()
              }
              depends_on = [aws_ec2_transit_gateway.tgw]
            }
        "#;

        let result = parse(input).unwrap();
        let vpc = &result.resources[0];
        assert!(!vpc.attributes.contains_key("depends_on"));
        assert_eq!(
            vpc.attributes.get("_depends_on"),
            Some(&Value::List(vec![Value::ResourceRef(
                "aws_ec2_transit_gateway.tgw".to_string(),
                String::new()
            )]))
        );
        match vpc.attributes.get("tags") {
            Some(Value::Map(map)) => assert_eq!(
                map.get("Created"),
                Some(&Value::Call("timestamp".to_string(), vec![]))
            ),
            other => panic!("Expected map, got {:?}", other),
        }
    }

    #[test]
    fn null_attribute_is_omitted() {
        let input = r#"
            resource "aws_vpc" "main" {
              cidr_block       = "10.0.0.0/16"
              instance_tenancy = null
            }
        "#;
        let result = parse(input).unwrap();
        assert!(!result.resources[0].attributes.contains_key("instance_tenancy"));
    }

    #[test]
    fn parse_outputs_and_backend() {
        let input = r#"
            terraform {
              backend "local" {
                path = "state/lab.json"
              }
            }

            output "vpn_id" {
              value       = aws_vpn_connection.vpn.id
              description = "VPN connection id"
            }
        "#;

        let result = parse(input).unwrap();
        let backend = result.backend.unwrap();
        assert_eq!(backend.backend_type, "local");
        assert_eq!(
            backend.attributes.get("path"),
            Some(&Value::String("state/lab.json".to_string()))
        );
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].name, "vpn_id");
        assert_eq!(
            result.outputs[0].description.as_deref(),
            Some("VPN connection id")
        );
    }

    #[test]
    fn duplicate_resource_fails() {
        let input = r#"
            resource "aws_vpc" "main" { cidr_block = "10.0.0.0/16" }
            resource "aws_vpc" "main" { cidr_block = "10.1.0.0/16" }
        "#;
        assert!(matches!(
            parse(input),
            Err(ParseError::DuplicateResource(addr)) if addr == "aws_vpc.main"
        ));
    }

    #[test]
    fn duplicate_attribute_fails() {
        let input = r#"
            resource "aws_vpc" "main" {
              cidr_block = "10.0.0.0/16"
              cidr_block = "10.1.0.0/16"
            }
        "#;
        assert!(matches!(
            parse(input),
            Err(ParseError::DuplicateAttribute { name, .. }) if name == "cidr_block"
        ));
    }

    #[test]
    fn unsupported_block_fails() {
        let input = r#"
            data "aws_vpc" "default" {
              default = true
            }
        "#;
        assert!(matches!(
            parse(input),
            Err(ParseError::UnsupportedBlock { name, .. }) if name == "data"
        ));
    }

    #[test]
    fn syntax_error_is_reported() {
        let input = r#"resource "aws_vpc" "main" { cidr_block = }"#;
        assert!(matches!(parse(input), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn string_escapes() {
        let input = r#"
            resource "aws_vpc" "main" {
              tags = { Note = "a \"quoted\"\tvalue" }
            }
        "#;
        let result = parse(input).unwrap();
        match result.resources[0].attributes.get("tags") {
            Some(Value::Map(map)) => assert_eq!(
                map.get("Note"),
                Some(&Value::String("a \"quoted\"\tvalue".to_string()))
            ),
            other => panic!("Expected map, got {:?}", other),
        }
    }
}
