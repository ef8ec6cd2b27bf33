use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::news::RawArticle;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");
}

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// NFC-normalizes text coming from third-party feeds.
pub fn clean_text(text: &str) -> String {
    text.nfc().collect::<String>().trim().to_string()
}

/// Returns at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Shortens `text` to `max_chars` characters, ending with "..." when cut.
pub fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    format!("{}...", truncate_chars(text, keep))
}

/// Current UTC time as an ISO-8601 string.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

/// Loads NewsAPI-shaped article files (`*.json`) from a directory recursively.
///
/// A file may hold a single article object, an array of articles, or a full
/// `{"status": "ok", "articles": [...]}` response. Unreadable or malformed
/// files are skipped. A missing directory yields no articles.
pub fn load_article_files(dir_path: impl AsRef<Path>) -> Result<Vec<RawArticle>> {
    let mut articles = Vec::new();

    if !dir_path.as_ref().exists() {
        warn!("article directory {} does not exist", dir_path.as_ref().display());
        return Ok(articles);
    }

    for entry in fs::read_dir(&dir_path)
        .with_context(|| format!("failed to read {}", dir_path.as_ref().display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            articles.extend(load_article_files(path)?);
            continue;
        }
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("skipping {}: {}", path.display(), err);
                continue;
            }
        };
        match parse_article_payload(&raw) {
            Ok(batch) => articles.extend(batch),
            Err(err) => warn!("skipping {}: {}", path.display(), err),
        }
    }

    Ok(articles)
}

fn parse_article_payload(raw: &str) -> Result<Vec<RawArticle>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let list = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(ref map) if map.contains_key("articles") => {
            map["articles"].clone()
        }
        other => serde_json::Value::Array(vec![other]),
    };
    Ok(serde_json::from_value(list)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a\n\tb   c "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_ellipsize() {
        let long = "x".repeat(300);
        let short = ellipsize(&long, 240);
        assert_eq!(short.chars().count(), 240);
        assert!(short.ends_with("..."));
        assert_eq!(ellipsize("short", 240), "short");
    }

    #[test]
    fn test_load_article_files() -> Result<()> {
        let dir = tempdir()?;
        let mut file = File::create(dir.path().join("batch.json"))?;
        writeln!(
            file,
            r#"{{"status": "ok", "articles": [{{"source": {{"name": "BBC"}}, "title": "Test", "url": "https://example.com/1", "publishedAt": "2024-01-18T10:00:00Z"}}]}}"#
        )?;
        let mut single = File::create(dir.path().join("single.json"))?;
        writeln!(single, r#"{{"title": "Other", "url": "https://example.com/2"}}"#)?;
        File::create(dir.path().join("notes.txt"))?;

        let mut articles = load_article_files(dir.path())?;
        articles.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title.as_deref(), Some("Test"));
        assert_eq!(articles[1].url.as_deref(), Some("https://example.com/2"));

        Ok(())
    }

    #[test]
    fn test_load_article_files_missing_dir_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("seed");
        assert!(load_article_files(&missing)?.is_empty());
        assert!(!missing.exists());
        Ok(())
    }

    #[test]
    fn test_load_article_files_skips_non_utf8() -> Result<()> {
        let dir = tempdir()?;
        let mut good = File::create(dir.path().join("a_good.json"))?;
        writeln!(good, r#"{{"title": "Kept", "url": "https://example.com/1"}}"#)?;
        let mut bad = File::create(dir.path().join("b_bad.json"))?;
        bad.write_all(&[0xff, 0xfe, 0x00, 0x7b])?;

        let articles = load_article_files(dir.path())?;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title.as_deref(), Some("Kept"));
        Ok(())
    }
}
