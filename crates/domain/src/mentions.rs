//! Identifier & mention utilities (spec §4.1, component C1).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_-]+)").unwrap());
static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, map non-alphanumerics to `-`, collapse runs, trim edges.
/// Idempotent: `to_kebab_case(to_kebab_case(x)) == to_kebab_case(x)`.
pub fn to_kebab_case(name: &str) -> String {
    let lower = name.to_lowercase();
    let collapsed = NON_ALNUM_RE.replace_all(&lower, "-");
    collapsed.trim_matches('-').to_string()
}

/// All `@token` occurrences anywhere in `text`, lowercased.
pub fn extract_mentions(text: &str) -> HashSet<String> {
    MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect()
}

/// Mentions that begin a paragraph: start of string, or immediately after
/// `\n\n`, optionally preceded by whitespace.
pub fn extract_paragraph_beginning_mentions(text: &str) -> HashSet<String> {
    let mut mentions = HashSet::new();
    let paragraphs = split_paragraphs(text);
    for para in paragraphs {
        let trimmed = para.trim_start_matches(|c: char| c.is_whitespace() && c != '\n');
        if let Some(stripped) = trimmed.strip_prefix('@') {
            let token: String = stripped
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            if !token.is_empty() {
                mentions.insert(token.to_lowercase());
            }
        }
    }
    mentions
}

/// Split `text` on blank-line boundaries (`\n\n`), the same boundary
/// `extract_paragraph_beginning_mentions` and `has_any_mention_at_beginning`
/// use to define "start of a paragraph".
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            parts.push(&text[start..i]);
            start = i + 2;
            i += 2;
            continue;
        }
        i += 1;
    }
    parts.push(&text[start..]);
    parts
}

/// Parse `KEY=value` lines from a `variables` text block, returning the
/// first match for `key`.
pub fn get_env_value_from_text(variables_block: &str, key: &str) -> Option<String> {
    for line in variables_block.lines() {
        let line = line.trim();
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                return Some(v.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_basic() {
        assert_eq!(to_kebab_case("Research Bot"), "research-bot");
        assert_eq!(to_kebab_case("  Weird!!Name__2  "), "weird-name-2");
    }

    #[test]
    fn kebab_case_is_idempotent() {
        for input in ["Research Bot", "already-kebab", "__edge__", "MiXeD_Case 42"] {
            let once = to_kebab_case(input);
            let twice = to_kebab_case(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn extract_mentions_anywhere() {
        let mentions = extract_mentions("hello @Alice, cc @bob and @Alice again");
        assert_eq!(mentions.len(), 2);
        assert!(mentions.contains("alice"));
        assert!(mentions.contains("bob"));
    }

    #[test]
    fn paragraph_beginning_mentions_only_at_start() {
        let text = "@alice please help\n\nsome text mentioning @bob mid-sentence";
        let mentions = extract_paragraph_beginning_mentions(text);
        assert_eq!(mentions, HashSet::from(["alice".to_string()]));
    }

    #[test]
    fn paragraph_beginning_allows_leading_whitespace() {
        let text = "  @alice hi there";
        let mentions = extract_paragraph_beginning_mentions(text);
        assert!(mentions.contains("alice"));
    }

    #[test]
    fn paragraph_beginning_second_paragraph_counts() {
        let text = "no mention here\n\n@bob this one counts";
        let mentions = extract_paragraph_beginning_mentions(text);
        assert_eq!(mentions, HashSet::from(["bob".to_string()]));
    }

    #[test]
    fn env_value_from_text_finds_first_match() {
        let block = "working_directory=/tmp/project\nother=1\nworking_directory=/tmp/second";
        assert_eq!(
            get_env_value_from_text(block, "working_directory").as_deref(),
            Some("/tmp/project")
        );
    }

    #[test]
    fn env_value_from_text_missing_key() {
        let block = "foo=bar";
        assert_eq!(get_env_value_from_text(block, "working_directory"), None);
    }
}
