//! Token extraction: pull candidate name tokens out of the `*delimited*`
//! span of a message.
//!
//! The extractor performs no semantic filtering — every word inside the
//! delimiters comes back as a candidate with confidence 1.0. Whether those
//! candidates are trusted outright or routed through the classifier is a
//! policy decision made downstream.

use regex_lite::Regex;

use crate::arabic;

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateToken {
    pub text: String,
    pub position: usize,
    pub confidence: f32,
}

/// Characters that separate tokens inside a span: whitespace, slash, dash,
/// pipe, and the Arabic/Latin list separators.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '/' | '-' | '|' | '،' | ',' | '؛' | ';' | ':')
}

/// Symbol and pictograph ranges stripped before tokenizing: emoticons,
/// miscellaneous symbols and pictographs, transport, regional indicators,
/// miscellaneous symbols, dingbats.
fn is_pictograph(c: char) -> bool {
    matches!(
        c,
        '\u{1F600}'..='\u{1F64F}'
            | '\u{1F300}'..='\u{1F5FF}'
            | '\u{1F680}'..='\u{1F6FF}'
            | '\u{1F1E0}'..='\u{1F1FF}'
            | '\u{2600}'..='\u{26FF}'
            | '\u{2700}'..='\u{27BF}'
    )
}

/// Extract candidate tokens from `text`.
///
/// Messages without a paired `*...*` span yield an empty list. Inside the
/// spans, only Arabic-script letters, ASCII letters and whitespace survive;
/// the remainder is split on the separator set and every non-empty word
/// becomes one candidate, in order of appearance.
pub fn extract(text: &str) -> Vec<CandidateToken> {
    let span_re = Regex::new(r"\*([^*]+)\*").expect("span pattern is valid");

    let mut joined = String::new();
    for caps in span_re.captures_iter(text) {
        if let Some(span) = caps.get(1) {
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(span.as_str());
        }
    }
    if joined.is_empty() {
        return Vec::new();
    }

    let cleaned: String = joined
        .chars()
        .map(|c| {
            if is_pictograph(c) || is_separator(c) {
                ' '
            } else if arabic::is_arabic_script(c) || c.is_ascii_alphabetic() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .enumerate()
        .map(|(position, word)| CandidateToken {
            text: word.to_string(),
            position,
            confidence: 1.0,
        })
        .collect()
}
