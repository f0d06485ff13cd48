//! Content gate
//!
//! Quality checks applied to fetched content before it is stored. A
//! rejection is a skip with a reason, never a page failure.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Quality rules taken from the source and crawler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRules {
    /// Minimum characters after sanitization
    pub min_chars: usize,
    /// Whether at least one code snippet is required
    pub require_code_snippets: bool,
}

/// Why the gate refused a document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("Document too small after sanitization ({chars} < {min} chars)")]
    TooSmall { chars: usize, min: usize },

    #[error("Document missing code snippets")]
    MissingCodeSnippets,
}

/// Checks content against the rules
pub fn check_content(content: &str, rules: &GateRules) -> Result<(), GateRejection> {
    let chars = sanitized_len(content);
    if chars < rules.min_chars {
        return Err(GateRejection::TooSmall {
            chars,
            min: rules.min_chars,
        });
    }

    if rules.require_code_snippets && !contains_code_snippet(content) {
        return Err(GateRejection::MissingCodeSnippets);
    }

    Ok(())
}

fn image_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").ok())
        .as_ref()
}

/// Length of the content once images, HTML comments and whitespace runs are removed
pub fn sanitized_len(content: &str) -> usize {
    let without_comments = strip_html_comments(content);
    let text = match image_pattern() {
        Some(pattern) => pattern.replace_all(&without_comments, "").into_owned(),
        None => without_comments,
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    letters + words.len().saturating_sub(1)
}

fn strip_html_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Returns true if markdown contains a fenced or indented code block
pub fn contains_code_snippet(content: &str) -> bool {
    let mut previous_blank = true;
    let mut in_list = false;

    for line in content.lines() {
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            return true;
        }

        if trimmed.is_empty() {
            previous_blank = true;
            continue;
        }

        let indented = line.starts_with("    ") || line.starts_with('\t');
        if indented && previous_blank && !in_list {
            return true;
        }

        if !indented {
            in_list = is_list_item(trimmed);
        }
        previous_blank = false;
    }

    false
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && line[digits..].starts_with(". ")
}
