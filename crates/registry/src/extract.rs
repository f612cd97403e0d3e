//! Heuristic metadata and link extraction.
//!
//! Extraction is a strategy behind [`MetadataExtractor`] so the store and graph logic never
//! depend on how titles or links are recognized.

use crate::model::{LinkRecord, LinkType};
use crate::{RegistryError, Result};
use docreg_matcher::{basename, normalize_target};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const MAX_DESCRIPTION_CHARS: usize = 200;

static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!?\[([^\]]*)\]\(\s*(<[^>]+>|[^)\s]+)(?:\s+"[^"]*")?\s*\)"#)
        .expect("markdown link regex")
});
static BARE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://|mailto:)[^\s<>()\[\]"'`]+"#).expect("bare url regex")
});
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*\s*$").expect("heading regex"));
static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("url scheme regex"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: String,
    pub description: String,
    pub links: Vec<LinkRecord>,
}

/// Turns raw file content into registry metadata.
pub trait MetadataExtractor: Send + Sync {
    /// `path` is root-relative. A `ParseError` marks the file corrupt.
    fn extract(&self, path: &str, content: &str) -> Result<Extracted>;
}

/// Default strategy: front matter, first heading, first paragraph, `[text](target)` links
/// and bare URLs. `.json` files are parsed as JSON.
#[derive(Debug, Clone)]
pub struct MarkdownExtractor {
    document_extensions: Vec<String>,
}

impl MarkdownExtractor {
    /// `document_extensions` decides which link targets are typed `markdown`.
    pub fn new(document_extensions: &[String]) -> Self {
        Self {
            document_extensions: document_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, target: &str) -> LinkType {
        let trimmed = target.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("mailto:") || URL_SCHEME.is_match(trimmed) {
            return LinkType::Url;
        }
        if trimmed.starts_with('#') {
            return LinkType::Anchor;
        }
        let normalized = normalize_target(trimmed).to_ascii_lowercase();
        let is_document = basename(&normalized)
            .rsplit_once('.')
            .is_some_and(|(_, ext)| self.document_extensions.iter().any(|d| d == ext));
        if is_document {
            LinkType::Markdown
        } else {
            LinkType::Other
        }
    }

    /// All links in `text`, in order of appearance.
    pub fn links(&self, text: &str) -> Vec<LinkRecord> {
        let mut found: Vec<(usize, LinkRecord)> = Vec::new();
        let mut spans: Vec<(usize, usize)> = Vec::new();

        for caps in MARKDOWN_LINK.captures_iter(text) {
            let (Some(whole), Some(target)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let label = caps.get(1).map_or("", |m| m.as_str());
            let raw = target
                .as_str()
                .trim_start_matches('<')
                .trim_end_matches('>');
            spans.push((whole.start(), whole.end()));
            found.push((
                whole.start(),
                LinkRecord::new(label, raw, self.classify(raw)),
            ));
        }

        for url in BARE_URL.find_iter(text) {
            let inside_markdown = spans
                .iter()
                .any(|(start, end)| url.start() >= *start && url.end() <= *end);
            if inside_markdown {
                continue;
            }
            let raw = url.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            found.push((url.start(), LinkRecord::new(raw, raw, LinkType::Url)));
        }

        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, link)| link).collect()
    }

    fn extract_markdown(&self, path: &str, content: &str) -> Extracted {
        let (front, body) = split_front_matter(content);
        let title = front
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("title"))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
            .or_else(|| first_heading(body))
            .unwrap_or_else(|| basename(path).to_string());
        let description = front
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("description"))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
            .or_else(|| first_paragraph(body))
            .map(|text| truncate_chars(&text, MAX_DESCRIPTION_CHARS))
            .unwrap_or_default();

        Extracted {
            title,
            description,
            links: self.links(content),
        }
    }

    fn extract_json(&self, path: &str, content: &str) -> Result<Extracted> {
        let value: Value =
            serde_json::from_str(content).map_err(|err| RegistryError::parse(path, err.to_string()))?;

        let field = |names: &[&str]| -> Option<String> {
            let object = value.as_object()?;
            names
                .iter()
                .find_map(|name| object.get(*name).and_then(Value::as_str))
                .map(str::to_string)
        };
        let title = field(&["title", "name"]).unwrap_or_else(|| basename(path).to_string());
        let description = field(&["description"])
            .map(|text| truncate_chars(&text, MAX_DESCRIPTION_CHARS))
            .unwrap_or_default();

        let mut strings = Vec::new();
        collect_strings(&value, &mut strings);
        let links = strings
            .into_iter()
            .flat_map(|text| self.links(text))
            .collect();

        Ok(Extracted {
            title,
            description,
            links,
        })
    }
}

impl MetadataExtractor for MarkdownExtractor {
    fn extract(&self, path: &str, content: &str) -> Result<Extracted> {
        let is_json = basename(path)
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("json"));
        if is_json {
            self.extract_json(path, content)
        } else {
            Ok(self.extract_markdown(path, content))
        }
    }
}

/// Leading `---` block of `key: value` lines, and the remaining body.
fn split_front_matter(content: &str) -> (Vec<(String, String)>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (Vec::new(), content);
    };

    let mut fields = Vec::new();
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed == "---" {
            return (fields, &rest[offset..]);
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            fields.push((key.trim().to_string(), value.to_string()));
        }
    }
    // Unterminated block: treat the whole file as body.
    (Vec::new(), content)
}

fn first_heading(body: &str) -> Option<String> {
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = HEADING.captures(trimmed) {
            if let Some(text) = caps.get(1) {
                return Some(text.as_str().to_string());
            }
        }
    }
    None
}

fn first_paragraph(body: &str) -> Option<String> {
    let mut in_fence = false;
    let mut paragraph: Vec<&str> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            if !paragraph.is_empty() {
                break;
            }
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(trimmed);
    }
    (!paragraph.is_empty()).then(|| paragraph.join(" "))
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => out.push(text),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
