//! Component A — IdentifierUtilities.
//!
//! Pure, deterministic normalization/extraction helpers. No I/O. These are
//! the only place allowed to know what an ASIN/ISBN "looks like" or how a
//! title gets folded into a cache key.

use unicode_normalization::UnicodeNormalization;

const LEADING_ARTICLES: &[&str] = &["the ", "a ", "an "];

const FORMAT_PARENTHETICALS: &[&str] = &[
    "unabridged",
    "abridged",
    "audiobook",
    "audio",
    "ebook",
    "digital",
    "audio edition",
    "audiobook edition",
];

const ROMAN_NUMERALS: &[(&str, &str)] = &[
    ("xiii", "13"),
    ("xii", "12"),
    ("xi", "11"),
    ("x", "10"),
    ("ix", "9"),
    ("viii", "8"),
    ("vii", "7"),
    ("vi", "6"),
    ("v", "5"),
    ("iv", "4"),
    ("iii", "3"),
    ("ii", "2"),
    ("i", "1"),
];

const NUMBER_WORDS: &[(&str, &str)] = &[
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
];

/// Strip `[- ]`, uppercase, accept length 10 or 13.
pub fn normalize_isbn(s: &str) -> Option<String> {
    let cleaned: String = s.chars().filter(|c| *c != '-' && *c != ' ').collect();
    let upper = cleaned.to_ascii_uppercase();
    match upper.len() {
        10 | 13 => Some(upper),
        _ => None,
    }
}

/// Uppercase, 10 chars, must start with a letter; purely numeric rejected.
pub fn normalize_asin(s: &str) -> Option<String> {
    let trimmed: String = s.trim().chars().filter(|c| !c.is_whitespace()).collect();
    let upper = trimmed.to_ascii_uppercase();
    if upper.len() != 10 {
        return None;
    }
    if !upper.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let first = upper.chars().next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if upper.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(upper)
}

fn strip_combining_marks(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}')
}

fn strip_leading_article(s: &str) -> String {
    let lower = s.to_lowercase();
    for article in LEADING_ARTICLES {
        if let Some(rest) = lower.strip_prefix(article) {
            return rest.to_string();
        }
    }
    s.to_string()
}

fn strip_format_parentheticals(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut buf = String::new();
    for c in s.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                buf.clear();
            }
            ')' | ']' => {
                if depth > 0 {
                    depth -= 1;
                    let inner = buf.trim().to_lowercase();
                    let is_format = FORMAT_PARENTHETICALS
                        .iter()
                        .any(|kw| inner.contains(kw));
                    if !is_format {
                        out.push('(');
                        out.push_str(&buf);
                        out.push(')');
                    }
                    buf.clear();
                } else {
                    out.push(c);
                }
            }
            _ if depth > 0 => buf.push(c),
            _ => out.push(c),
        }
    }
    out
}

fn fold_numbers(s: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for token in s.split_whitespace() {
        let lower = token.to_lowercase();
        if let Some((_, digit)) = NUMBER_WORDS.iter().find(|(w, _)| *w == lower) {
            words.push(digit.to_string());
            continue;
        }
        if let Some((_, digit)) = ROMAN_NUMERALS.iter().find(|(r, _)| *r == lower) {
            words.push(digit.to_string());
            continue;
        }
        words.push(token.to_string());
    }
    words.join(" ")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_text(s: &str) -> String {
    if s.trim().is_empty() {
        return String::new();
    }
    let no_parens = strip_format_parentheticals(s);
    let lower = no_parens.to_lowercase();
    let no_marks = strip_combining_marks(&lower);
    let no_article = strip_leading_article(&no_marks);
    let folded = fold_numbers(&no_article);
    let collapsed = collapse_whitespace(&folded);
    collapsed.trim().to_string()
}

/// Lowercase; NFD + strip combining marks; drop leading articles; fold
/// number-words/roman-numerals to digits; strip format parentheticals;
/// collapse whitespace. Falls back to the lowercased original if the
/// result would otherwise be empty.
///
/// Only the *leading* article is stripped (section 4.1), so "The Laws of
/// the Skies" normalizes to "laws of the skies" — the internal "the" is
/// left alone. A literal scenario key elsewhere drops that internal
/// article too; we treat that as a looser illustrative example rather
/// than a second normalization rule, since 4.1 only ever mentions leading
/// articles.
pub fn normalize_title(s: &str) -> String {
    let normalized = normalize_text(s);
    if normalized.is_empty() && !s.trim().is_empty() {
        return s.trim().to_lowercase();
    }
    normalized
}

pub fn normalize_author(s: &str) -> String {
    normalize_title(s)
}

pub fn normalize_narrator(s: &str) -> String {
    normalize_title(s)
}

/// Strip leading sequence prefixes such as "06 " or "Book 2: ".
pub fn clean_title(s: &str) -> String {
    let trimmed = s.trim();
    let digits_prefix = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits_prefix > 0 && digits_prefix < trimmed.len() {
        let rest = trimmed[digits_prefix..].trim_start();
        if rest.len() != trimmed.len() {
            return rest.to_string();
        }
    }
    let lower = trimmed.to_lowercase();
    if let Some(rest) = lower.strip_prefix("book ") {
        if let Some(colon) = rest.find(':') {
            return trimmed[("book ".len() + colon + 1)..].trim_start().to_string();
        }
        if let Some(space) = rest.find(' ') {
            return trimmed[("book ".len() + space + 1)..].trim_start().to_string();
        }
    }
    trimmed.to_string()
}

/// The canonical composite key for a title/author identifier.
pub fn title_author_key(title: &str, author: &str) -> String {
    format!("{}|{}", normalize_title(title), normalize_author(author))
}

/// Probes a nested JSON-ish record for a field, trying direct field ->
/// `media.*` -> `media.metadata.*` in that order. Arrays return their
/// first element; objects return `.name`.
pub fn extract_field<'a>(record: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    if let Some(v) = record.get(field) {
        if !v.is_null() {
            return Some(v);
        }
    }
    if let Some(v) = record
        .get("media")
        .and_then(|m| m.get(field))
        .filter(|v| !v.is_null())
    {
        return Some(v);
    }
    if let Some(v) = record
        .get("media")
        .and_then(|m| m.get("metadata"))
        .and_then(|m| m.get(field))
        .filter(|v| !v.is_null())
    {
        return Some(v);
    }
    None
}

pub fn extract_string_field(record: &serde_json::Value, field: &str) -> Option<String> {
    let v = extract_field(record, field)?;
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(arr) => arr
            .first()
            .and_then(|first| extract_string_from_scalar_or_object(first)),
        serde_json::Value::Object(_) => extract_string_from_scalar_or_object(v),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_string_from_scalar_or_object(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o.get("name").and_then(|n| n.as_str()).map(String::from),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
