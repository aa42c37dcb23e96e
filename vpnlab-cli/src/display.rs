//! Terminal output for plans, apply results, outputs and diffs

use std::path::Path;

use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use vpnlab_core::effect::Effect;
use vpnlab_core::interpreter::{ApplyResult, EffectOutcome};
use vpnlab_core::parser::ParsedFile;
use vpnlab_core::plan::Plan;
use vpnlab_core::resource::{Bindings, Value};
use vpnlab_core::validation::{Diagnostic, Severity};

pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let symbol = match diagnostic.severity {
            Severity::Error => "✗".red().bold(),
            Severity::Warning => "!".yellow().bold(),
        };
        println!("  {} {}", symbol, diagnostic);
    }
}

pub fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let replaced = plan.is_replaced(effect.resource_id());
        match effect {
            Effect::Create(resource) => {
                if replaced {
                    println!("  {} {} (replacement)", "+".green().bold(), resource.id);
                } else {
                    println!("  {} {}", "+".green().bold(), resource.id);
                }
                let mut attributes: Vec<_> = resource.user_attributes().collect();
                attributes.sort_by(|a, b| a.0.cmp(b.0));
                for (key, value) in attributes {
                    println!("      {} = {}", key, format_value(value));
                }
            }
            Effect::Update {
                id,
                from,
                to,
                changed,
            } => {
                println!("  {} {}", "~".yellow().bold(), id);
                for key in changed {
                    let old = from
                        .attributes
                        .get(key)
                        .map(format_value)
                        .unwrap_or_else(|| "(unset)".to_string());
                    let new = to
                        .attributes
                        .get(key)
                        .map(format_value)
                        .unwrap_or_default();
                    println!("      {}: {} → {}", key, old.red(), new.green());
                }
            }
            Effect::Delete { id, identifier } => {
                if replaced {
                    println!(
                        "  {} {} ({}) {}",
                        "-/+".yellow().bold(),
                        id,
                        identifier,
                        "must be replaced".yellow()
                    );
                } else {
                    println!("  {} {} ({})", "-".red().bold(), id, identifier);
                }
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

pub fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Create(r) => format!("Create {}", r.id),
        Effect::Update { id, .. } => format!("Update {}", id),
        Effect::Delete { id, identifier } => format!("Delete {} ({})", id, identifier),
    }
}

/// One line per executed effect; effects after a stopping failure are not listed
pub fn print_outcomes(plan: &Plan, result: &ApplyResult) {
    for (effect, outcome) in plan.effects().iter().zip(&result.outcomes) {
        match outcome {
            Ok(EffectOutcome::Created { state }) | Ok(EffectOutcome::Updated { state }) => {
                let identifier = state.identifier.as_deref().unwrap_or("-");
                println!(
                    "  {} {} → {}",
                    "✓".green(),
                    format_effect(effect),
                    identifier
                );
            }
            Ok(EffectOutcome::Deleted { .. }) => {
                println!("  {} {}", "✓".green(), format_effect(effect));
            }
            Ok(EffectOutcome::Skipped { reason }) => {
                println!("  {} {} ({})", "-".dimmed(), format_effect(effect), reason);
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
            }
        }
    }
}

pub fn print_outputs(parsed: &ParsedFile, bindings: &Bindings) {
    if parsed.outputs.is_empty() {
        return;
    }

    println!();
    println!("{}", "Outputs:".cyan().bold());
    for output in &parsed.outputs {
        let value = output.value.resolve(bindings);
        let shown = if value.contains_ref() {
            "(known after apply)".dimmed().to_string()
        } else {
            format_value(&value)
        };
        println!("  {} = {}", output.name, shown);
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let strs: Vec<_> = entries
                .into_iter()
                .map(|(k, v)| format!("{} = {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(address, attribute) if attribute.is_empty() => address.clone(),
        Value::ResourceRef(address, attribute) => format!("{}.{}", address, attribute),
        Value::Call(name, args) => {
            let strs: Vec<_> = args.iter().map(format_value).collect();
            format!("{}({})", name, strs.join(", "))
        }
    }
}

pub fn print_diff(file: &Path, original: &str, patched: &str) {
    println!("\n{} {}:", "Diff for".cyan().bold(), file.display());

    let diff = TextDiff::from_lines(original, patched);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-".red(),
            ChangeTag::Insert => "+".green(),
            ChangeTag::Equal => " ".normal(),
        };
        print!("{}{}", sign, change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vpnlab_core::resource::{Resource, ResourceId};

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::String("ipsec.1".to_string())), "\"ipsec.1\"");
        assert_eq!(format_value(&Value::Int(65000)), "65000");
        assert_eq!(
            format_value(&Value::ResourceRef(
                "aws_customer_gateway.onprem".to_string(),
                "id".to_string()
            )),
            "aws_customer_gateway.onprem.id"
        );
        assert_eq!(
            format_value(&Value::ResourceRef("aws_vpc.main".to_string(), String::new())),
            "aws_vpc.main"
        );
    }

    #[test]
    fn test_format_map_sorted() {
        let tags = Value::Map(HashMap::from([
            ("Name".to_string(), Value::String("lab".to_string())),
            ("Env".to_string(), Value::String("dev".to_string())),
        ]));
        assert_eq!(format_value(&tags), "{Env = \"dev\", Name = \"lab\"}");
    }

    #[test]
    fn test_format_call() {
        let call = Value::Call(
            "cidrsubnet".to_string(),
            vec![Value::String("10.0.0.0/16".to_string()), Value::Int(8)],
        );
        assert_eq!(format_value(&call), "cidrsubnet(\"10.0.0.0/16\", 8)");
    }

    #[test]
    fn test_format_effect() {
        let create = Effect::Create(Resource::new("aws_vpc", "main"));
        assert_eq!(format_effect(&create), "Create aws_vpc.main");

        let delete = Effect::Delete {
            id: ResourceId::new("aws_vpn_connection", "s2s"),
            identifier: "vpn-0abc".to_string(),
        };
        assert_eq!(format_effect(&delete), "Delete aws_vpn_connection.s2s (vpn-0abc)");
    }
}
