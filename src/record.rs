use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The metadata written into a media file.
///
/// Keyword order is significant: marketplaces treat the leading keywords as
/// the most relevant, so the order is preserved everywhere it is written.
/// Duplicates are kept as given.
///
/// # Example
///
/// ```rust
/// use stockmeta::record::MetadataRecord;
///
/// let record = MetadataRecord::new(
///     "City skyline at dusk",
///     "A calm evening view",
///     ["city", "skyline", "dusk"],
/// );
/// assert_eq!(record.keywords[1], "skyline");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
}

impl MetadataRecord {
    pub fn new<I, S>(title: impl Into<String>, description: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: title.into(),
            description: description.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Keywords joined the way Windows XP* tags expect them.
    pub fn keywords_joined(&self) -> String {
        self.keywords.join("; ")
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty() && self.keywords.is_empty()
    }

    /// Load a record from a JSON file (lenient, see [`parse_record_response`]).
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata file {}", path.display()))?;
        parse_record_response(&contents)
    }
}

/// Parse the text returned by a metadata-generation model into a record.
///
/// Handles common model quirks: markdown code fences, prose around the JSON
/// object, trailing commas, `tags` instead of `keywords`, and keywords given
/// as one comma- or semicolon-separated string.
pub fn parse_record_response(text: &str) -> Result<MetadataRecord> {
    log::debug!("Raw metadata response:\n{text}");

    let cleaned = text.trim();
    if cleaned.is_empty() {
        anyhow::bail!("Metadata response is empty");
    }

    for candidate in extract_json_candidates(cleaned) {
        let value = serde_json::from_str::<serde_json::Value>(&candidate)
            .or_else(|_| serde_json::from_str(&fix_trailing_commas(&candidate)));
        if let Ok(value) = value {
            if let Some(record) = value_to_record(&value) {
                return Ok(record);
            }
            log::warn!("Metadata response is valid JSON but has no title, description or keywords");
        }
    }

    anyhow::bail!("Could not parse metadata response as JSON")
}

/// Extract possible JSON object strings from response text.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if text.contains("```") {
        let stripped = text
            .lines()
            .skip_while(|l| !l.trim().starts_with("```"))
            .skip(1)
            .take_while(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
        if !stripped.is_empty() {
            candidates.push(stripped);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].to_string());
        }
    }

    candidates.push(text.to_string());
    candidates
}

/// Remove trailing commas before `}` or `]`, leaving string contents alone.
fn fix_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            result.push(c);
            continue;
        }
        if !in_string && c == ',' {
            let rest: String = chars.clone().collect();
            let trimmed = rest.trim_start();
            if trimmed.starts_with('}') || trimmed.starts_with(']') {
                continue;
            }
        }
        result.push(c);
    }
    result
}

fn value_to_record(val: &serde_json::Value) -> Option<MetadataRecord> {
    let obj = val.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let keywords = obj
        .get("keywords")
        .or_else(|| obj.get("tags"))
        .map(keywords_from_value)
        .unwrap_or_default();

    let record = MetadataRecord {
        title: text("title"),
        description: text("description"),
        keywords,
    };

    if record.is_empty() { None } else { Some(record) }
}

fn keywords_from_value(val: &serde_json::Value) -> Vec<String> {
    match val {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        serde_json::Value::String(s) => split_keywords(s),
        _ => Vec::new(),
    }
}

/// Split a comma or semicolon separated keyword list, dropping blanks.
///
/// ```rust
/// use stockmeta::record::split_keywords;
///
/// assert_eq!(split_keywords("sea, boat;; harbor "), vec!["sea", "boat", "harbor"]);
/// ```
pub fn split_keywords(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── MetadataRecord ───────────────────────────────────────────────

    #[test]
    fn keywords_joined_with_semicolons() {
        let r = MetadataRecord::new("t", "d", ["a", "b", "a"]);
        assert_eq!(r.keywords_joined(), "a; b; a");
    }

    #[test]
    fn default_is_empty() {
        assert!(MetadataRecord::default().is_empty());
        assert!(!MetadataRecord::new("t", "", Vec::<String>::new()).is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(
            &path,
            r#"{"title": "Harbor", "description": "Boats", "keywords": ["boat", "sea"]}"#,
        )
        .unwrap();

        let r = MetadataRecord::load(&path).unwrap();
        assert_eq!(r.title, "Harbor");
        assert_eq!(r.keywords, vec!["boat", "sea"]);
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(MetadataRecord::load(Path::new("/nonexistent/meta.json")).is_err());
    }

    // ── parse_record_response ────────────────────────────────────────

    #[test]
    fn parse_plain_json() {
        let r = parse_record_response(
            r#"{"title": "Sunset", "description": "Over the sea", "keywords": ["sun", "sea"]}"#,
        )
        .unwrap();
        assert_eq!(r.title, "Sunset");
        assert_eq!(r.description, "Over the sea");
        assert_eq!(r.keywords, vec!["sun", "sea"]);
    }

    #[test]
    fn parse_markdown_fence() {
        let text = "Here you go:\n\n```json\n{\"title\": \"Lake\", \"keywords\": [\"water\"]}\n```";
        let r = parse_record_response(text).unwrap();
        assert_eq!(r.title, "Lake");
        assert_eq!(r.keywords, vec!["water"]);
    }

    #[test]
    fn parse_surrounding_prose() {
        let text = "Sure! {\"title\": \"Cat\", \"description\": \"Fluffy\"} Hope this helps.";
        let r = parse_record_response(text).unwrap();
        assert_eq!(r.title, "Cat");
        assert!(r.keywords.is_empty());
    }

    #[test]
    fn parse_trailing_commas() {
        let r = parse_record_response(r#"{"title": "T", "keywords": ["a", "b",],}"#).unwrap();
        assert_eq!(r.keywords, vec!["a", "b"]);
    }

    #[test]
    fn parse_tags_alias_and_string_keywords() {
        let r = parse_record_response(r#"{"title": "T", "tags": "one, two; three"}"#).unwrap();
        assert_eq!(r.keywords, vec!["one", "two", "three"]);
    }

    #[test]
    fn parse_keeps_duplicate_keywords_in_order() {
        let r = parse_record_response(r#"{"keywords": ["b", "a", "b"]}"#).unwrap();
        assert_eq!(r.keywords, vec!["b", "a", "b"]);
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_record_response("not json at all").is_err());
    }

    #[test]
    fn parse_empty_fails() {
        assert!(parse_record_response("   ").is_err());
    }

    #[test]
    fn parse_empty_object_fails() {
        assert!(parse_record_response("{}").is_err());
    }

    // ── fix_trailing_commas ──────────────────────────────────────────

    #[test]
    fn fix_trailing_commas_in_string_untouched() {
        let s = r#"{"a": "hello,}"}"#;
        assert_eq!(fix_trailing_commas(s), s);
    }
}
