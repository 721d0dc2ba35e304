//! Regex and heading/bullet extraction from narrative text

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::debug;

use super::changes::{ChangeBuckets, ExtractedChange, FieldScope, FieldUpdate, KnowledgeItem, Removal};

type Builder = fn(&Captures) -> Option<ExtractedChange>;

fn capture(caps: &Captures, i: usize) -> Option<String> {
    caps.get(i)
        .map(|m| m.as_str().trim().trim_matches('"').trim().to_string())
        .filter(|s| !s.is_empty())
}

/// JSON literal if the text is one, otherwise a string
fn loose_value(raw: &str) -> Value {
    let raw = raw.trim().trim_end_matches(['.', ',']);
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.trim_matches('"').to_string()))
}

fn field_update(scope: FieldScope, field: &str, value: Value) -> ExtractedChange {
    ExtractedChange::UpdateField(FieldUpdate {
        scope,
        field: field.to_string(),
        value,
        reason: None,
    })
}

fn normalize_field(field: &str) -> String {
    field.trim().to_lowercase().replace([' ', '-'], "_")
}

fn tool_list(raw: &str) -> Value {
    let tools: Vec<Value> = raw
        .split([',', ' '])
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("and"))
        .map(|t| Value::String(t.to_string()))
        .collect();
    Value::Array(tools)
}

fn pattern(re: &str, build: Builder) -> (Regex, Builder) {
    (Regex::new(re).unwrap(), build)
}

/// Category patterns, each with the builder for its captures
static PATTERNS: Lazy<Vec<(Regex, Builder)>> = Lazy::new(|| {
    vec![
        // Knowledge add
        pattern(
            r"(?im)\badd (?:new |a |some )?knowledge(?: (?:about|on|for) [^:\n]+)?\s*[:\-]\s*(.+)$",
            |c| {
                Some(ExtractedChange::AddKnowledge(KnowledgeItem {
                    content: capture(c, 1)?,
                    ..Default::default()
                }))
            },
        ),
        // Knowledge update in a named file
        pattern(
            r"(?im)\bupdate (?:the )?knowledge (?:in |file )?([\w./-]+\.md)\s*[:\-]\s*(.+)$",
            |c| {
                Some(ExtractedChange::UpdateKnowledge(KnowledgeItem {
                    file: capture(c, 1),
                    content: capture(c, 2)?,
                    ..Default::default()
                }))
            },
        ),
        // Knowledge remove
        pattern(
            r"(?im)\bremove (?:outdated |obsolete |incorrect )?knowledge\s*[:\-]\s*(.+)$",
            |c| {
                Some(ExtractedChange::Remove(Removal {
                    file: None,
                    pattern: regex::escape(&capture(c, 1)?),
                    reason: None,
                }))
            },
        ),
        // Agent role / goal / backstory
        pattern(
            r#"(?im)\b(?:update|change|set) (?:the )?([\w -]+?) agent'?s? (role|goal|backstory) to\s*[:\-]?\s*"?([^"\n]+)"?"#,
            |c| {
                Some(field_update(
                    FieldScope::Agent(capture(c, 1)?),
                    &normalize_field(&capture(c, 2)?),
                    Value::String(capture(c, 3)?.trim_end_matches('.').to_string()),
                ))
            },
        ),
        // Agent tools
        pattern(
            r"(?im)\b(?:add|give) (?:the )?tools? ([\w, -]+?) to (?:the )?([\w -]+?) agent\b",
            |c| {
                Some(field_update(
                    FieldScope::Agent(capture(c, 2)?),
                    "tools",
                    tool_list(&capture(c, 1)?),
                ))
            },
        ),
        // Task description / expected output
        pattern(
            r#"(?im)\b(?:update|change|set) (?:the )?([\w -]+?) task'?s? (description|expected[_ ]output) to\s*[:\-]?\s*"?([^"\n]+)"?"#,
            |c| {
                Some(field_update(
                    FieldScope::Task(capture(c, 1)?),
                    &normalize_field(&capture(c, 2)?),
                    Value::String(capture(c, 3)?.trim_end_matches('.').to_string()),
                ))
            },
        ),
        // Crew memory / cache / planning toggles
        pattern(
            r"(?i)\b(enable|disable|turn on|turn off) (?:the )?(?:crew )?(memory|cache|planning)\b",
            |c| {
                let on = matches!(capture(c, 1)?.to_lowercase().as_str(), "enable" | "turn on");
                Some(field_update(FieldScope::Crew, &capture(c, 2)?.to_lowercase(), Value::Bool(on)))
            },
        ),
        // Crew process
        pattern(
            r"(?i)\b(?:set|use|change|switch) (?:the )?(?:crew )?process (?:to )?(sequential|hierarchical)\b",
            |c| {
                Some(field_update(
                    FieldScope::Crew,
                    "process",
                    Value::String(capture(c, 1)?.to_lowercase()),
                ))
            },
        ),
        // Crew tools
        pattern(
            r"(?im)\bset (?:the )?(?:default |crew )?tools\s*[:\-]\s*([\w, -]+)$",
            |c| Some(field_update(FieldScope::Crew, "tools", tool_list(&capture(c, 1)?))),
        ),
    ]
});

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:#{1,6}\s+(.+?)\s*#*|\*\*(.+?)\*\*:?|([A-Za-z][\w /&-]{1,60}):)$").unwrap()
});
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*+•]|\d+[.)])\s+(.+)$").unwrap());
/// `researcher.max_iter: 30` or `researcher.max_iter = 30`
static SCOPED_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^`?([\w -]+?)\.(\w+)`?\s*[:=]\s*(.+)$").unwrap());
/// `memory: true` or `memory = true`
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^`?(\w+)`?\s*[:=]\s*(.+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Knowledge,
    Agent,
    Task,
    Config,
}

fn categorize(heading: &str) -> Option<Category> {
    let h = heading.to_lowercase();
    if h.contains("knowledge") {
        Some(Category::Knowledge)
    } else if h.contains("agent") {
        Some(Category::Agent)
    } else if h.contains("task") {
        Some(Category::Task)
    } else if h.contains("config") || h.contains("crew") || h.contains("setting") {
        Some(Category::Config)
    } else {
        None
    }
}

fn bullet_change(category: Category, item: &str) -> Option<ExtractedChange> {
    let item = item.trim();
    match category {
        Category::Knowledge => Some(ExtractedChange::AddKnowledge(KnowledgeItem {
            content: item.to_string(),
            ..Default::default()
        })),
        Category::Agent | Category::Task => {
            let caps = SCOPED_ASSIGNMENT.captures(item)?;
            let name = capture(&caps, 1)?;
            let scope = if category == Category::Agent {
                FieldScope::Agent(name)
            } else {
                FieldScope::Task(name)
            };
            Some(field_update(scope, &normalize_field(&capture(&caps, 2)?), loose_value(&caps[3])))
        }
        Category::Config => {
            let caps = ASSIGNMENT.captures(item)?;
            Some(field_update(
                FieldScope::Crew,
                &normalize_field(&capture(&caps, 1)?),
                loose_value(&caps[2]),
            ))
        }
    }
}

/// Run every category pattern over the raw text
pub fn regex_changes(text: &str) -> ChangeBuckets {
    let mut buckets = ChangeBuckets::default();
    for (re, build) in PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            if let Some(change) = build(&caps) {
                buckets.push(change);
            }
        }
    }
    buckets
}

/// Bucket bullet items under the nearest recognized heading
pub fn structural_changes(text: &str) -> ChangeBuckets {
    let mut buckets = ChangeBuckets::default();
    let mut current: Option<Category> = None;
    let mut in_fence = false;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || line.is_empty() {
            continue;
        }

        if let Some(caps) = BULLET.captures(line) {
            let Some(category) = current else { continue };
            match bullet_change(category, &caps[1]) {
                Some(change) => {
                    buckets.push(change);
                }
                None => debug!("Ignoring {:?} bullet without an assignment: {}", category, &caps[1]),
            }
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            let heading = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            current = categorize(heading);
        }
    }

    buckets
}
