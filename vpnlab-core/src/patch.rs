//! Patch - Ensure VPN connections start both tunnels
//!
//! Works on the raw .tf text, line by line, so comments and formatting of
//! everything else are left untouched. For each
//! `resource "aws_vpn_connection" "<name>" {` block both
//! `tunnel1_startup_action` and `tunnel2_startup_action` end up as `"start"`.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

const TARGET_VALUE: &str = "\"start\"";
const TARGET_ATTRS: [&str; 2] = ["tunnel1_startup_action", "tunnel2_startup_action"];

/// Result of patching one file's text
#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    /// Patched text (identical to the input when nothing changed)
    pub text: String,
    pub modified: bool,
    /// Number of VPN connection blocks found
    pub blocks: usize,
    /// One line per attribute per block, prefixed with `[start-end]`
    pub messages: Vec<String>,
}

/// Matches: resource "aws_vpn_connection" "name" {
static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    case_insensitive(r#"^\s*resource\s+"aws_vpn_connection"\s+"[^"]+"\s*\{\s*$"#)
});

static INDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)").expect("Invalid indent regex"));

static ATTR_PATTERNS: LazyLock<Vec<AttrPatterns>> =
    LazyLock::new(|| TARGET_ATTRS.iter().map(|attr| AttrPatterns::new(attr)).collect());

/// Line patterns for one target attribute
struct AttrPatterns {
    attr: &'static str,
    /// Uncommented with the target value
    start: Regex,
    /// Behind `#` or `//`
    commented: Regex,
    /// Uncommented with any value
    any_value: Regex,
}

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("Invalid patch regex")
}

impl AttrPatterns {
    fn new(attr: &'static str) -> Self {
        let name = regex::escape(attr);
        let value = regex::escape(TARGET_VALUE);
        Self {
            attr,
            start: case_insensitive(&format!(r"^\s*{name}\s*=\s*{value}\s*$")),
            commented: case_insensitive(&format!(r"^\s*(#|//)\s*{name}\s*=.*$")),
            any_value: case_insensitive(&format!(r"^\s*{name}\s*=\s*.+$")),
        }
    }
}

fn indent_of(line: &str) -> &str {
    INDENT_REGEX
        .captures(line)
        .and_then(|c| c.get(1))
        .map_or("", |m| m.as_str())
}

/// Locate VPN connection blocks as inclusive `(start, end)` line indexes
///
/// Braces are counted per line; a block without a closing brace is ignored.
fn find_blocks(lines: &[String]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if HEADER_REGEX.is_match(&lines[i]) {
            let mut depth: i64 = 0;
            for (j, line) in lines.iter().enumerate().skip(i) {
                depth += line.matches('{').count() as i64;
                depth -= line.matches('}').count() as i64;
                if depth == 0 {
                    blocks.push((i, j));
                    i = j;
                    break;
                }
            }
        }
        i += 1;
    }
    blocks
}

/// Returns (modified, lines inserted, messages)
fn patch_block(
    lines: &mut Vec<String>,
    start: usize,
    mut end: usize,
    enforce_start: bool,
) -> (bool, usize, Vec<String>) {
    let mut modified = false;
    let mut inserted = 0;
    let mut messages = Vec::new();

    let inner_indent = lines[start + 1..=end]
        .iter()
        .find(|line| !line.trim().is_empty())
        .map(|line| indent_of(line))
        .filter(|indent| !indent.is_empty())
        .unwrap_or("  ")
        .to_string();

    for attr_patterns in ATTR_PATTERNS.iter() {
        let attr = attr_patterns.attr;
        let mut has_start = false;
        let mut commented: Option<usize> = None;
        let mut other_value: Option<usize> = None;

        for (idx, line) in lines.iter().enumerate().take(end).skip(start + 1) {
            if attr_patterns.start.is_match(line) {
                has_start = true;
            } else if attr_patterns.commented.is_match(line) {
                commented.get_or_insert(idx);
            } else if attr_patterns.any_value.is_match(line) {
                other_value.get_or_insert(idx);
            }
        }

        let target_line = format!("{} = {}", attr, TARGET_VALUE);

        if has_start {
            messages.push(format!(
                "No change: '{}' already present (uncommented).",
                target_line
            ));
        } else if let Some(idx) = other_value {
            if enforce_start {
                let new_line = format!("{}{}", indent_of(&lines[idx]), target_line);
                lines[idx] = new_line;
                modified = true;
                messages.push(format!(
                    "Updated '{}' at line {} to {}.",
                    attr,
                    idx + 1,
                    TARGET_VALUE
                ));
            } else {
                messages.push(format!(
                    "Skipped: '{}' present with a different value at line {} (use --enforce-start to set to {}).",
                    attr,
                    idx + 1,
                    TARGET_VALUE
                ));
            }
        } else if let Some(idx) = commented {
            let indent = match indent_of(&lines[idx]) {
                "" => inner_indent.clone(),
                indent => indent.to_string(),
            };
            lines[idx] = format!("{}{}", indent, target_line);
            modified = true;
            messages.push(format!(
                "Uncommented & normalized '{}' at line {}.",
                attr,
                idx + 1
            ));
        } else {
            lines.insert(end, format!("{}{}", inner_indent, target_line));
            modified = true;
            messages.push(format!(
                "Appended '{}' in resource block (before line {}).",
                attr,
                end + 1
            ));
            end += 1;
            inserted += 1;
        }
    }

    (modified, inserted, messages)
}

/// Patch .tf text so every VPN connection starts both tunnels
///
/// Existing values other than `"start"` are only rewritten when
/// `enforce_start` is set. CRLF line endings and the presence of a trailing
/// newline are preserved.
pub fn patch_tunnel_startup(source: &str, enforce_start: bool) -> PatchReport {
    let had_crlf = source.contains("\r\n");
    let text = source.replace("\r\n", "\n");
    let mut lines: Vec<String> = text.split('\n').map(String::from).collect();

    let blocks = find_blocks(&lines);
    if blocks.is_empty() {
        return PatchReport {
            text: source.to_string(),
            modified: false,
            blocks: 0,
            messages: vec![
                "No 'aws_vpn_connection' resource blocks found. No changes made.".to_string(),
            ],
        };
    }

    let mut modified = false;
    let mut messages = Vec::new();
    // Lines inserted by earlier blocks shift the later ones
    let mut offset = 0;
    for (start, end) in &blocks {
        let (start, end) = (start + offset, end + offset);
        let (changed, inserted, block_messages) =
            patch_block(&mut lines, start, end, enforce_start);
        modified |= changed;
        messages.extend(
            block_messages
                .into_iter()
                .map(|m| format!("[{}-{}] {}", start + 1, end + 1, m)),
        );
        offset += inserted;
    }

    if !modified {
        return PatchReport {
            text: source.to_string(),
            modified,
            blocks: blocks.len(),
            messages,
        };
    }

    // The split keeps an empty last element for a trailing newline
    let mut patched = lines.join("\n");
    if had_crlf {
        patched = patched.replace('\n', "\r\n");
    }

    PatchReport {
        text: patched,
        modified,
        blocks: blocks.len(),
        messages,
    }
}
