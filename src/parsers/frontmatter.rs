//! Leading `---` metadata blocks in text documents.
//!
//! Two parsers are available: [`YamlFrontmatter`] for full YAML fidelity and
//! [`LineFrontmatter`], a permissive `key: value` reader that never fails.
//! The active one is chosen by [`FrontmatterStyle`] from the configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CrucibleError;

pub const MARKER: &str = "---";

/// Ordered key/value pairs from a frontmatter block.
pub type Frontmatter = Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontmatterStyle {
    #[default]
    Yaml,
    Lines,
}

impl FrontmatterStyle {
    pub fn parser(self) -> &'static dyn FrontmatterParser {
        match self {
            FrontmatterStyle::Yaml => &YamlFrontmatter,
            FrontmatterStyle::Lines => &LineFrontmatter,
        }
    }
}

impl fmt::Display for FrontmatterStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontmatterStyle::Yaml => write!(f, "yaml"),
            FrontmatterStyle::Lines => write!(f, "lines"),
        }
    }
}

impl FromStr for FrontmatterStyle {
    type Err = CrucibleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "yaml" => Ok(FrontmatterStyle::Yaml),
            "lines" => Ok(FrontmatterStyle::Lines),
            other => Err(CrucibleError::ConfigKey(format!("frontmatter_parser={other}"))),
        }
    }
}

pub trait FrontmatterParser: Send + Sync {
    fn parse(&self, block: &str) -> Result<Frontmatter, CrucibleError>;
}

pub struct YamlFrontmatter;

impl FrontmatterParser for YamlFrontmatter {
    fn parse(&self, block: &str) -> Result<Frontmatter, CrucibleError> {
        let value: Value = serde_yml::from_str(block)
            .map_err(|err| CrucibleError::MalformedFrontmatter(err.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Frontmatter::new()),
            other => Err(CrucibleError::MalformedFrontmatter(format!(
                "expected a mapping, found {other}"
            ))),
        }
    }
}

/// Flat `key: value` and `key: a, b` lines. Lines it cannot read are skipped.
pub struct LineFrontmatter;

impl FrontmatterParser for LineFrontmatter {
    fn parse(&self, block: &str) -> Result<Frontmatter, CrucibleError> {
        let mut map = Frontmatter::new();
        for line in block.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once(':') else {
                tracing::debug!("skipping frontmatter line without a key: {trimmed}");
                continue;
            };
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                tracing::debug!("skipping frontmatter line with invalid key: {trimmed}");
                continue;
            }
            map.insert(key.to_string(), line_value(value.trim()));
        }
        Ok(map)
    }
}

fn line_value(raw: &str) -> Value {
    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'));
    if inner.is_some() || raw.contains(',') {
        let items = inner
            .unwrap_or(raw)
            .split(',')
            .map(|item| unquote(item.trim()))
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        return Value::Array(items);
    }
    Value::String(unquote(raw).to_string())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

struct Bounds {
    block_start: usize,
    block_end: usize,
    body_start: usize,
}

fn locate(text: &str) -> Option<Bounds> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != MARKER || !first.ends_with('\n') {
        return None;
    }
    let block_start = first.len();
    let mut offset = block_start;
    for line in lines {
        if line.trim_end() == MARKER {
            return Some(Bounds {
                block_start,
                block_end: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

/// Splits a document into its frontmatter block (without markers) and body.
/// An unterminated block is treated as no block at all.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    match locate(text) {
        Some(bounds) => {
            let block = text[bounds.block_start..bounds.block_end].trim_end_matches(['\n', '\r']);
            (Some(block), &text[bounds.body_start..])
        }
        None => (None, text),
    }
}

/// Parses the leading block, returning an empty map and the untouched text
/// when there is none. Malformed YAML degrades to the line parser.
pub fn parse_frontmatter(text: &str, style: FrontmatterStyle) -> (Frontmatter, &str) {
    let (block, body) = split_frontmatter(text);
    let Some(block) = block else {
        return (Frontmatter::new(), body);
    };
    match style.parser().parse(block) {
        Ok(map) => (map, body),
        Err(err) => {
            tracing::warn!("{err}; falling back to line-based frontmatter parsing");
            let map = LineFrontmatter.parse(block).unwrap_or_default();
            (map, body)
        }
    }
}

/// Writes `key: value` into the document's frontmatter, filling an empty
/// occurrence of the key or appending it before the closing marker. A block is
/// created when the document has none. All other bytes are kept as they were.
pub fn inject_field(text: &str, key: &str, value: &str) -> String {
    let Some(bounds) = locate(text) else {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        return format!("{MARKER}{newline}{key}: {value}{newline}{MARKER}{newline}{text}");
    };
    let newline = if text[..bounds.block_start].ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    };

    let mut offset = bounds.block_start;
    for line in text[bounds.block_start..bounds.block_end].split_inclusive('\n') {
        let is_empty_field = line.split_once(':').is_some_and(|(name, rest)| {
            name.trim() == key && matches!(rest.trim(), "" | "\"\"" | "''" | "~" | "null")
        });
        if is_empty_field {
            let ending = if line.ends_with("\r\n") {
                "\r\n"
            } else if line.ends_with('\n') {
                "\n"
            } else {
                ""
            };
            return format!(
                "{}{key}: {value}{ending}{}",
                &text[..offset],
                &text[offset + line.len()..]
            );
        }
        offset += line.len();
    }

    format!(
        "{}{key}: {value}{newline}{}",
        &text[..bounds.block_end],
        &text[bounds.block_end..]
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn no_block_returns_empty_map_and_same_body() {
        for text in ["# Title\n\nbody", "   ---\nkey: v\n---\n", "---\nkey: v\nno close"] {
            let (map, body) = parse_frontmatter(text, FrontmatterStyle::Yaml);
            assert!(map.is_empty());
            assert_eq!(body, text);
        }
    }

    #[test]
    fn yaml_block_keeps_order_and_types() {
        let text = "---\ntitle: Run 4\ncount: 3\ntags: [a, b]\n---\n# Heading\n";
        let (map, body) = parse_frontmatter(text, FrontmatterStyle::Yaml);
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["title", "count", "tags"]);
        assert_eq!(map["count"], json!(3));
        assert_eq!(map["tags"], json!(["a", "b"]));
        assert_eq!(body, "# Heading\n");
    }

    #[test]
    fn line_parser_splits_lists_and_skips_garbage() {
        let block = "title: Run 4\ntags: alpha, beta ,\nnot a field\n: empty key\nquoted: \"x\"\nlist: [c, d]";
        let map = LineFrontmatter.parse(block).unwrap();
        assert_eq!(map["title"], json!("Run 4"));
        assert_eq!(map["tags"], json!(["alpha", "beta"]));
        assert_eq!(map["quoted"], json!("x"));
        assert_eq!(map["list"], json!(["c", "d"]));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn malformed_yaml_falls_back_to_lines() {
        let text = "---\ntitle: [unclosed\nauthor: ada\n---\nbody";
        let (map, body) = parse_frontmatter(text, FrontmatterStyle::Yaml);
        assert_eq!(map["author"], json!("ada"));
        assert_eq!(body, "body");
    }

    #[test]
    fn inject_appends_before_closing_marker() {
        let text = "---\ntitle: Run 4\n---\nbody\n";
        let updated = inject_field(text, "mfid", "abc");
        assert_eq!(updated, "---\ntitle: Run 4\nmfid: abc\n---\nbody\n");
    }

    #[test]
    fn inject_fills_empty_field_in_place() {
        let text = "---\nmfid:\ntitle: Run 4\n---\nbody";
        let updated = inject_field(text, "mfid", "abc");
        assert_eq!(updated, "---\nmfid: abc\ntitle: Run 4\n---\nbody");
    }

    #[test]
    fn inject_creates_block_and_keeps_crlf() {
        assert_eq!(
            inject_field("# Note\n", "mfid", "abc"),
            "---\nmfid: abc\n---\n# Note\n"
        );
        assert_eq!(
            inject_field("---\r\ntitle: x\r\n---\r\nbody", "mfid", "abc"),
            "---\r\ntitle: x\r\nmfid: abc\r\n---\r\nbody"
        );
    }
}
