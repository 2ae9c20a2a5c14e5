//! Low-level text cleanup and span extraction.

use regex::Regex;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```").expect("regex for code fences"))
}

/// Removes reasoning blocks emitted before the answer.
///
/// Everything up to the last `</think>` is dropped; an unterminated
/// `<think>` drops the rest of the text.
#[must_use]
pub fn strip_reasoning(text: &str) -> &str {
    if let Some(end) = text.rfind("</think>") {
        return &text[end + "</think>".len()..];
    }
    match text.find("<think>") {
        Some(start) => &text[..start],
        None => text,
    }
}

/// Strips reasoning blocks and markdown code fences, keeping the fenced body.
#[must_use]
pub fn strip_wrappers(text: &str) -> String {
    let text = strip_reasoning(text);
    match fence_re().captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Returns every balanced span opened by `open` and closed by `close`, in
/// order of their opening position.
///
/// A single pass keeps a stack of open positions. Brackets inside JSON
/// string literals are ignored once a span is open. Unterminated spans are
/// skipped.
pub fn balanced_spans(text: &str, open: char, close: char) -> impl Iterator<Item = &str> {
    let mut starts: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' && !starts.is_empty() {
            in_string = true;
        } else if c == open {
            starts.push(i);
        } else if c == close {
            if let Some(start) = starts.pop() {
                spans.push((start, i + c.len_utf8()));
            }
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans.into_iter().map(move |(start, end)| &text[start..end])
}

/// Strips surrounding whitespace and quote characters from a short answer.
#[must_use]
pub fn clean_scalar(text: &str) -> String {
    strip_wrappers(text)
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」' | '`' | '*'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_reasoning() {
        assert_eq!(strip_reasoning("<think>hmm {}</think>{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_reasoning("answer<think>unfinished"), "answer");
        assert_eq!(strip_reasoning("plain"), "plain");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_wrappers("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_wrappers("Here:\n```\n[1,2]\n```\nthanks"), "[1,2]");
        assert_eq!(strip_wrappers("  raw  "), "raw");
    }

    #[test]
    fn test_balanced_spans_skip_strings() {
        let text = r#"x {"a": "}{", "b": {"c": 1}} y {bad"#;
        let spans: Vec<&str> = balanced_spans(text, '{', '}').collect();
        assert_eq!(spans[0], r#"{"a": "}{", "b": {"c": 1}}"#);
        assert_eq!(spans[1], r#"{"c": 1}"#);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_unbalanced_close_is_ignored() {
        assert_eq!(balanced_spans("]]", '[', ']').count(), 0);
    }

    #[test]
    fn test_brackets_inside_strings_do_not_open_spans() {
        let text = r#"{"k": "{x}"}"#;
        let spans: Vec<&str> = balanced_spans(text, '{', '}').collect();
        assert_eq!(spans, vec![text]);
    }

    #[test]
    fn test_quote_in_prose_before_span() {
        let spans: Vec<&str> = balanced_spans(r#"He said "hi: {"a": 1}"#, '{', '}').collect();
        assert_eq!(spans, vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn test_deep_unterminated_opens() {
        let text = format!("{}{{\"a\": 1}}", "{".repeat(10_000));
        let spans: Vec<&str> = balanced_spans(&text, '{', '}').collect();
        assert_eq!(spans, vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn test_clean_scalar() {
        assert_eq!(clean_scalar("  \"图生万物\"\n"), "图生万物");
        assert_eq!(clean_scalar("**视频秒懂**"), "视频秒懂");
    }
}
