//! Trigger pattern classification and content extraction
//!
//! Trigger text is stored verbatim on the persona. Its shape decides how it
//! matches:
//! - `[...]` matches any text wrapped in square brackets
//! - `(...)` matches any text wrapped in parentheses
//! - anything else (including `name:`) matches as a case-insensitive prefix,
//!   and an exact match leaves no content

/// How a stored trigger matches inbound text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPattern<'a> {
    /// `[text]` style
    Bracketed,
    /// `(text)` style
    Parenthesized,
    /// `name:` style
    Colon(&'a str),
    /// Any other literal prefix
    Prefix(&'a str),
}

impl<'a> TriggerPattern<'a> {
    pub fn classify(trigger: &'a str) -> Self {
        if trigger.starts_with('[') && trigger.ends_with(']') {
            TriggerPattern::Bracketed
        } else if trigger.starts_with('(') && trigger.ends_with(')') {
            TriggerPattern::Parenthesized
        } else if trigger.ends_with(':') {
            TriggerPattern::Colon(trigger)
        } else {
            TriggerPattern::Prefix(trigger)
        }
    }

    /// Extracted content if `text` matches, `None` otherwise.
    ///
    /// The content keeps the original casing and is trimmed. An exact match
    /// yields an empty string.
    pub fn extract(&self, text: &str) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        match *self {
            TriggerPattern::Bracketed => unwrap_pair(text, '[', ']'),
            TriggerPattern::Parenthesized => unwrap_pair(text, '(', ')'),
            TriggerPattern::Colon(prefix) | TriggerPattern::Prefix(prefix) => {
                if prefix.is_empty() {
                    return None;
                }
                strip_prefix_ignore_case(text, prefix).map(|rest| rest.trim().to_string())
            }
        }
    }

    /// Key under which triggers that always match the same texts are grouped.
    pub fn equivalence_key(&self) -> String {
        match *self {
            TriggerPattern::Bracketed => "[...]".to_string(),
            TriggerPattern::Parenthesized => "(...)".to_string(),
            TriggerPattern::Colon(p) | TriggerPattern::Prefix(p) => p.to_lowercase(),
        }
    }

    /// Cheap check for "something that looks like this trigger appears in text".
    pub fn appears_in(&self, text: &str) -> bool {
        match *self {
            TriggerPattern::Bracketed => text.contains('[') && text.contains(']'),
            TriggerPattern::Parenthesized => text.contains('(') && text.contains(')'),
            TriggerPattern::Colon(p) | TriggerPattern::Prefix(p) => {
                !p.is_empty() && text.to_lowercase().contains(&p.to_lowercase())
            }
        }
    }
}

/// Match `trigger` against `text`, returning the extracted content.
pub fn extract(trigger: &str, text: &str) -> Option<String> {
    TriggerPattern::classify(trigger).extract(text)
}

/// `[...]`/`(...)` rule: wrapped text longer than the two delimiters.
fn unwrap_pair(text: &str, open: char, close: char) -> Option<String> {
    if !text.starts_with(open) || !text.ends_with(close) || text.chars().count() <= 2 {
        return None;
    }
    let inner = &text[open.len_utf8()..text.len() - close.len_utf8()];
    Some(inner.trim().to_string())
}

/// Case-insensitive `str::strip_prefix` that slices the original text.
///
/// Characters are compared one at a time by their lowercase expansion, so the
/// returned slice always starts on a char boundary of `text`.
pub fn strip_prefix_ignore_case<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let mut text_chars = text.char_indices();
    for p in prefix.chars() {
        let (_, t) = text_chars.next()?;
        if !chars_eq_ignore_case(p, t) {
            return None;
        }
    }
    let offset = text_chars.next().map(|(i, _)| i).unwrap_or(text.len());
    Some(&text[offset..])
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}
