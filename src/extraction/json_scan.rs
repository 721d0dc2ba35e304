//! Balanced-bracket JSON recovery from mixed prose
//!
//! Candidates are the top-level `{...}` spans, plus `[...]` spans whose first
//! element is an object (this also catches a bare `"changes": [...]`).
//! Brackets inside JSON strings are ignored. Candidates that fail to parse
//! are dropped.

use serde_json::{Map, Value};
use tracing::debug;

/// Change objects found in the text, in order of appearance
#[derive(Debug, Default)]
pub struct JsonScan {
    pub objects: Vec<Map<String, Value>>,
    /// Candidates that looked like JSON but did not parse
    pub dropped: usize,
}

/// Byte ranges of top-level bracketed candidates
pub fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if stack.is_empty() {
            let opens = match c {
                '{' => true,
                '[' => text[i + 1..].trim_start().starts_with('{'),
                _ => false,
            };
            if opens {
                start = i;
                stack.push(c);
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => stack.push(c),
            '}' | ']' => {
                let expected = if c == '}' { '{' } else { '[' };
                if stack.last() == Some(&expected) {
                    stack.pop();
                    if stack.is_empty() {
                        spans.push((start, i + c.len_utf8()));
                    }
                } else {
                    // Mismatched closer: give up on this candidate
                    stack.clear();
                }
            }
            _ => {}
        }
    }

    spans
}

fn expand(obj: Map<String, Value>, out: &mut Vec<Map<String, Value>>) {
    if !obj.contains_key("type") {
        if let Some(Value::Array(items)) = obj.get("changes") {
            for item in items {
                if let Value::Object(inner) = item {
                    expand(inner.clone(), out);
                }
            }
            return;
        }
    }
    out.push(obj);
}

/// Parse every candidate span into change objects
pub fn scan(text: &str) -> JsonScan {
    let mut result = JsonScan::default();

    for (start, end) in balanced_spans(text) {
        let fragment = &text[start..end];
        match serde_json::from_str::<Value>(fragment) {
            Ok(Value::Object(obj)) => expand(obj, &mut result.objects),
            Ok(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(obj) = item {
                        expand(obj, &mut result.objects);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Dropping unparseable JSON fragment at {}..{}: {}", start, end, e);
                result.dropped += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(scan: &JsonScan) -> Vec<&str> {
        scan.objects
            .iter()
            .map(|o| o.get("type").and_then(Value::as_str).unwrap_or(""))
            .collect()
    }

    #[test]
    fn test_object_in_prose() {
        let text = r#"Here is the plan: {"type":"add_knowledge","file":"knowledge/x.md","content":"hello","reason":"r"} done."#;
        let scan = scan(text);
        assert_eq!(types(&scan), vec!["add_knowledge"]);
        assert_eq!(scan.objects[0]["content"], "hello");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"x {"type":"add_knowledge","content":"use } and { freely \" ok"} y"#;
        let scan = scan(text);
        assert_eq!(scan.objects.len(), 1);
        assert_eq!(scan.objects[0]["content"], "use } and { freely \" ok");
    }

    #[test]
    fn test_wrapped_and_bare_changes_arrays() {
        let wrapped = r#"{"changes": [{"type": "a"}, {"type": "b"}]}"#;
        assert_eq!(types(&scan(wrapped)), vec!["a", "b"]);

        let bare = r#"Proposed: "changes": [ {"type": "a"}, {"type": "b"} ] end"#;
        assert_eq!(types(&scan(bare)), vec!["a", "b"]);

        let top = r#"[{"type": "a"}, {"type": "b"}]"#;
        assert_eq!(types(&scan(top)), vec!["a", "b"]);
    }

    #[test]
    fn test_bad_fragments_dropped() {
        let text = r#"{not json} then [see above] then {"type": "ok"} and {"unclosed": "#;
        let scan = scan(text);
        assert_eq!(types(&scan), vec!["ok"]);
        assert_eq!(scan.dropped, 1);
    }

    #[test]
    fn test_multiple_objects() {
        let text = "first {\"type\": \"a\"}\nsecond {\"type\": \"b\", \"nested\": {\"k\": [1, 2]}}";
        assert_eq!(types(&scan(text)), vec!["a", "b"]);
    }
}
