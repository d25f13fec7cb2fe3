//! Service-local key-value configuration files.
//!
//! One `KEY=VALUE` assignment per line, optional `export ` prefix, `#` comments,
//! no interpolation. Lines that are not recognised assignments are kept
//! verbatim, and an unmodified document renders back byte-identical.

use crate::utils::CONFIG_KEY_REGEX;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String, raw: String, export: bool },
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl EnvFile {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }

        let (body, trailing_newline) = match text.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (text, false),
        };

        let lines = body.split('\n').map(parse_line).collect();
        Self { lines, trailing_newline }
    }

    /// Value of the last assignment for `key`, with surrounding quotes removed
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, .. } => Some(key.as_str()),
            Line::Other(_) => None,
        })
    }

    /// Set every assignment of `key` to `value`, appending one if the key is
    /// absent. Returns whether the document changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let mut found = false;
        let mut changed = false;

        for line in self.lines.iter_mut() {
            if let Line::Entry { key: k, value: v, raw, export } = line {
                if k != key {
                    continue;
                }
                found = true;
                if v != value {
                    *raw = render_assignment(key, value, *export);
                    *v = value.to_string();
                    changed = true;
                }
            }
        }

        if !found {
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
                raw: render_assignment(key, value, false),
                export: false,
            });
            self.trailing_newline = true;
            changed = true;
        }

        changed
    }

    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(|line| match line {
                Line::Entry { raw, .. } => raw.as_str(),
                Line::Other(raw) => raw.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(raw.to_string());
    }

    let (export, assignment) = match trimmed.strip_prefix("export ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };

    let Some((key, value)) = assignment.split_once('=') else {
        return Line::Other(raw.to_string());
    };

    let key = key.trim();
    if !CONFIG_KEY_REGEX.is_match(key) {
        return Line::Other(raw.to_string());
    }

    Line::Entry {
        key: key.to_string(),
        value: unquote(value.trim()).to_string(),
        raw: raw.to_string(),
        export,
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn render_assignment(key: &str, value: &str, export: bool) -> String {
    let prefix = if export { "export " } else { "" };
    let needs_quotes = value.chars().any(|c| c.is_whitespace() || c == '#' || c == '\'');
    if needs_quotes && !value.contains('"') {
        format!("{}{}=\"{}\"", prefix, key, value)
    } else {
        format!("{}{}={}", prefix, key, value)
    }
}
