//! Metadata extraction for markdown notes.
//!
//! Produces the `CachedMetadata` shape plugins read through
//! `metadataCache.getFileCache`: frontmatter, headings, wikilinks, embeds
//! and inline tags, each with a source position.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").expect("heading regex"));

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(!?)\[\[([^\]\|#]*)(#[^\]\|]*)?(?:\|([^\]]*))?\]\]").expect("link regex")
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(#[\p{L}\p{N}_/\-]+)").expect("tag regex"));

/// A location inside a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

/// Start and end of a cached item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub start: Loc,
    pub end: Loc,
}

/// A markdown heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingCache {
    pub heading: String,
    pub level: u8,
    pub position: Pos,
}

/// A wikilink or embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCache {
    /// Link target including any `#heading` suffix.
    pub link: String,
    /// The raw source text.
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
    pub position: Pos,
}

impl LinkCache {
    /// Link target without the `#heading` part.
    pub fn path(&self) -> &str {
        self.link.split('#').next().unwrap_or_default()
    }
}

/// An inline `#tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCache {
    pub tag: String,
    pub position: Pos,
}

/// Parsed metadata of one note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontmatter: Option<Value>,
    #[serde(default)]
    pub headings: Vec<HeadingCache>,
    #[serde(default)]
    pub links: Vec<LinkCache>,
    #[serde(default)]
    pub embeds: Vec<LinkCache>,
    #[serde(default)]
    pub tags: Vec<TagCache>,
}

impl CachedMetadata {
    /// Inline tags plus any `tags`/`tag` frontmatter entries, `#`-prefixed.
    pub fn all_tags(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(fm) = &self.frontmatter {
            for key in ["tags", "tag"] {
                match fm.get(key) {
                    Some(Value::String(s)) => {
                        out.extend(s.split([',', ' ']).filter(|t| !t.is_empty()).map(hashed));
                    }
                    Some(Value::Array(items)) => {
                        out.extend(items.iter().filter_map(Value::as_str).map(hashed));
                    }
                    _ => {}
                }
            }
        }
        out.extend(self.tags.iter().map(|t| t.tag.clone()));
        out
    }
}

fn hashed(tag: &str) -> String {
    if tag.starts_with('#') {
        tag.to_string()
    } else {
        format!("#{}", tag)
    }
}

/// Extract metadata from note text.
pub fn parse(text: &str) -> CachedMetadata {
    let mut meta = CachedMetadata::default();
    let lines: Vec<&str> = text.split('\n').collect();

    let mut offset = 0usize;
    let mut start_line = 0usize;

    if lines.first().map(|l| l.trim_end()) == Some("---") {
        if let Some(end) = lines.iter().skip(1).position(|l| l.trim_end() == "---") {
            let yaml = lines[1..=end].join("\n");
            meta.frontmatter = parse_frontmatter(&yaml);
            start_line = end + 2;
            offset = lines[..start_line].iter().map(|l| l.len() + 1).sum();
        }
    }

    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate().skip(start_line) {
        let line_start = offset;
        offset += line.len() + 1;

        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            meta.headings.push(HeadingCache {
                heading: caps[2].trim().to_string(),
                level: caps[1].len() as u8,
                position: span(idx, line_start, 0, line.len()),
            });
        }

        for caps in LINK_RE.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            let mut link = caps[2].trim().to_string();
            if let Some(sub) = caps.get(3) {
                link.push_str(sub.as_str());
            }
            let entry = LinkCache {
                display_text: caps.get(4).map(|m| m.as_str().to_string()),
                link,
                original: whole.as_str().to_string(),
                position: span(idx, line_start, whole.start(), whole.end()),
            };
            if &caps[1] == "!" {
                meta.embeds.push(entry);
            } else {
                meta.links.push(entry);
            }
        }

        for caps in TAG_RE.captures_iter(line) {
            let Some(tag) = caps.get(1) else { continue };
            if tag.as_str()[1..].chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            meta.tags.push(TagCache {
                tag: tag.as_str().to_string(),
                position: span(idx, line_start, tag.start(), tag.end()),
            });
        }
    }

    meta
}

fn parse_frontmatter(yaml: &str) -> Option<Value> {
    if yaml.trim().is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(value) => serde_json::to_value(value).ok(),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed frontmatter");
            None
        }
    }
}

fn span(line: usize, line_start: usize, start: usize, end: usize) -> Pos {
    Pos {
        start: Loc { line, col: start, offset: line_start + start },
        end: Loc { line, col: end, offset: line_start + end },
    }
}

/// A fenced code block with a language tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub language: String,
    pub source: String,
}

/// Fenced code blocks that name a language, in document order. Unterminated
/// fences run to the end of the text.
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    fn close(blocks: &mut Vec<CodeBlock>, language: String, body: &[&str]) {
        if !language.is_empty() {
            blocks.push(CodeBlock { language, source: body.join("\n") });
        }
    }

    let mut blocks = Vec::new();
    let mut open: Option<(&str, String, Vec<&str>)> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        let fence = ["```", "~~~"].into_iter().find(|f| trimmed.starts_with(*f));
        let closes = match (&open, fence) {
            (Some((marker, _, _)), Some(f)) => *marker == f && trimmed.trim_end() == f,
            _ => false,
        };
        if closes {
            if let Some((_, language, body)) = open.take() {
                close(&mut blocks, language, &body);
            }
        } else if let Some((_, _, body)) = open.as_mut() {
            body.push(line);
        } else if let Some(f) = fence {
            let language = trimmed[f.len()..].split_whitespace().next().unwrap_or_default().to_string();
            open = Some((f, language, Vec::new()));
        }
    }
    if let Some((_, language, body)) = open {
        close(&mut blocks, language, &body);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "---\ntitle: Daily\ntags: [journal, work]\n---\n# Monday\n\nMet with [[Alice|A.]] about [[Projects/Roadmap#Q3]].\n![[diagram.png]]\n\n## Tasks #todo\n```\n# not a heading [[nope]]\n```\nDone #work/ops and #2024\n";

    #[test]
    fn test_frontmatter() {
        let meta = parse(NOTE);
        let fm = meta.frontmatter.unwrap();
        assert_eq!(fm["title"], "Daily");
        assert_eq!(fm["tags"][1], "work");
    }

    #[test]
    fn test_headings_skip_code_fences() {
        let meta = parse(NOTE);
        let headings: Vec<_> = meta.headings.iter().map(|h| (h.heading.as_str(), h.level)).collect();
        assert_eq!(headings, vec![("Monday", 1), ("Tasks #todo", 2)]);
        assert_eq!(meta.headings[0].position.start.line, 4);
    }

    #[test]
    fn test_links_and_embeds() {
        let meta = parse(NOTE);
        assert_eq!(meta.links.len(), 2);
        assert_eq!(meta.links[0].link, "Alice");
        assert_eq!(meta.links[0].display_text.as_deref(), Some("A."));
        assert_eq!(meta.links[1].link, "Projects/Roadmap#Q3");
        assert_eq!(meta.links[1].path(), "Projects/Roadmap");
        assert_eq!(meta.embeds.len(), 1);
        assert_eq!(meta.embeds[0].link, "diagram.png");
    }

    #[test]
    fn test_tags_ignore_numbers() {
        let meta = parse(NOTE);
        let tags: Vec<_> = meta.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["#todo", "#work/ops"]);
        assert_eq!(meta.all_tags(), vec!["#journal", "#work", "#todo", "#work/ops"]);
    }

    #[test]
    fn test_plain_note() {
        let meta = parse("just text");
        assert!(meta.frontmatter.is_none());
        assert!(meta.headings.is_empty());
    }

    #[test]
    fn test_code_blocks() {
        let text = "intro\n```dice\n2d6\n1d20\n```\n```\nplain\n```\n~~~mermaid extra\ngraph\n~~~\n```tail\nopen";
        let blocks = code_blocks(text);
        assert_eq!(
            blocks,
            vec![
                CodeBlock { language: "dice".into(), source: "2d6\n1d20".into() },
                CodeBlock { language: "mermaid".into(), source: "graph".into() },
                CodeBlock { language: "tail".into(), source: "open".into() },
            ]
        );
    }
}
