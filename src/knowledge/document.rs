//! Markdown section model for heading-anchored edits
//!
//! A document is parsed into its lines plus the ATX headings and thematic
//! breaks found outside code fences. A heading's section runs until the next
//! heading of the same or shallower depth, or the next break. Edits operate on
//! that structure and re-render.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    /// Number of leading `#`
    pub level: usize,
    pub title: String,
    /// Line index of the heading itself
    pub line: usize,
}

/// Line span of one heading's section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub level: usize,
    /// Heading line
    pub heading_line: usize,
    /// One past the last line belonging to the section
    pub end: usize,
}

impl Section {
    pub fn body_start(&self) -> usize {
        self.heading_line + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
    headings: Vec<Heading>,
    /// Line indexes of `---`-style breaks that follow a blank line
    breaks: Vec<usize>,
    trailing_newline: bool,
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    // More than three spaces of indentation is a code block
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end().to_string();
    Some((level, title))
}

fn is_break(line: &str) -> bool {
    let t: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    t.len() >= 3
        && (t.chars().all(|c| c == '-') || t.chars().all(|c| c == '*') || t.chars().all(|c| c == '_'))
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Strip leading `#` markers so callers may pass either "Notes" or "## Notes"
fn heading_key(name: &str) -> String {
    name.trim().trim_start_matches('#').trim().to_lowercase()
}

fn content_lines(content: &str) -> Vec<String> {
    content.trim_matches('\n').lines().map(str::to_string).collect()
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut headings = Vec::new();
        let mut breaks = Vec::new();
        let mut in_fence = false;

        for (idx, line) in lines.iter().enumerate() {
            if is_fence(line) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some((level, title)) = parse_heading(line) {
                headings.push(Heading { level, title, line: idx });
            } else if is_break(line) && (idx == 0 || lines[idx - 1].trim().is_empty()) {
                breaks.push(idx);
            }
        }

        Self {
            lines,
            headings,
            breaks,
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    /// Title of the first level-1 heading, if any
    pub fn title(&self) -> Option<&str> {
        self.headings
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.title.as_str())
    }

    /// First section whose heading matches `name` (case-insensitive)
    pub fn find_section(&self, name: &str) -> Option<Section> {
        let key = heading_key(name);
        let pos = self
            .headings
            .iter()
            .position(|h| h.title.to_lowercase() == key)?;
        let heading = &self.headings[pos];
        let next_heading = self.headings[pos + 1..]
            .iter()
            .find(|h| h.level <= heading.level)
            .map(|h| h.line);
        let next_break = self.breaks.iter().copied().find(|&b| b > heading.line);
        let end = match (next_heading, next_break) {
            (Some(h), Some(b)) => h.min(b),
            (Some(h), None) => h,
            (None, Some(b)) => b,
            (None, None) => self.lines.len(),
        };

        Some(Section {
            level: heading.level,
            heading_line: heading.line,
            end,
        })
    }

    /// Add content at the end of the named section; a missing heading becomes a new `##` section
    pub fn append_to_section(&mut self, name: &str, content: &str) {
        let Some(section) = self.find_section(name) else {
            self.push_section(name, content);
            return;
        };

        // Land after the last non-blank body line so the section keeps its trailing spacing
        let mut at = section.end;
        while at > section.body_start() && self.lines[at - 1].trim().is_empty() {
            at -= 1;
        }

        let mut block = vec![String::new()];
        block.extend(content_lines(content));
        if at < self.lines.len() && at == section.end {
            block.push(String::new());
        }
        self.splice(at, at, block);
    }

    /// Swap the body of the named section, keeping its heading line
    pub fn replace_section(&mut self, name: &str, content: &str) {
        let Some(section) = self.find_section(name) else {
            self.push_section(name, content);
            return;
        };

        let mut block = vec![String::new()];
        block.extend(content_lines(content));
        if section.end < self.lines.len() {
            block.push(String::new());
        }
        self.splice(section.body_start(), section.end, block);
    }

    /// Place content directly under the heading line
    pub fn insert_after_heading(&mut self, name: &str, content: &str) {
        let Some(section) = self.find_section(name) else {
            self.push_section(name, content);
            return;
        };

        let at = section.body_start();
        let mut block = vec![String::new()];
        block.extend(content_lines(content));
        let next_is_blank = self.lines.get(at).map_or(true, |l| l.trim().is_empty());
        if !next_is_blank {
            block.push(String::new());
        }
        self.splice(at, at, block);
    }

    /// Append free content at the end of the body, ahead of a trailing footer break
    pub fn append(&mut self, content: &str) {
        let footer = self.breaks.last().copied();
        let mut at = footer.unwrap_or(self.lines.len());
        while footer.is_some() && at > 0 && self.lines[at - 1].trim().is_empty() {
            at -= 1;
        }

        let mut block = Vec::new();
        if at > 0 && !self.lines[at - 1].trim().is_empty() {
            block.push(String::new());
        }
        block.extend(content_lines(content));
        if footer == Some(at) {
            block.push(String::new());
        }
        self.splice(at, at, block);
    }

    /// Rewrite every line for which `f` returns a replacement
    pub fn map_lines(&mut self, mut f: impl FnMut(&str) -> Option<String>) {
        let mut changed = false;
        for line in &mut self.lines {
            if let Some(new_line) = f(line) {
                *line = new_line;
                changed = true;
            }
        }
        if changed {
            self.reparse();
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    fn push_section(&mut self, name: &str, content: &str) {
        let title = name.trim().trim_start_matches('#').trim();
        let mut block = format!("## {}", title);
        block.push_str("\n\n");
        block.push_str(content.trim_matches('\n'));
        self.append(&block);
    }

    fn splice(&mut self, start: usize, end: usize, block: Vec<String>) {
        self.lines.splice(start..end, block);
        self.reparse();
    }

    fn reparse(&mut self) {
        let trailing = self.trailing_newline;
        *self = Document::parse(&self.lines.join("\n"));
        self.trailing_newline = trailing;
    }
}
