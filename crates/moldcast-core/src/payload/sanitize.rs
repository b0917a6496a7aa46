//! Response sanitization: isolate the structured payload from the
//! formatting and prose a model wraps around it.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A fenced block opening at the start of a line, with optional info string.
    static ref FENCED_BLOCK: Regex = Regex::new(
        r"(?sm)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```"
    ).unwrap();

    /// An opening fence whose closing fence never arrived (truncated output).
    static ref OPEN_FENCE: Regex = Regex::new(
        r"(?sm)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*)\z"
    ).unwrap();

    /// Start of any fence line.
    static ref FENCE_START: Regex = Regex::new(r"(?m)^[ \t]*```").unwrap();
}

/// Strip fences, preamble and postamble from raw model text.
///
/// Every step only ever takes a substring, so the steps are repeated until
/// nothing changes; the result is therefore a fixpoint and
/// `sanitize(sanitize(x)) == sanitize(x)` holds for any input.
pub fn sanitize(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let next = sanitize_once(current);
        // A substring of equal length is the same string.
        if next.len() == current.len() {
            return next.to_string();
        }
        current = next;
    }
}

fn sanitize_once(text: &str) -> &str {
    let text = extract_fenced(text.trim()).trim();
    let text = skip_preamble(text);
    drop_postamble(text).trim()
}

/// Interior of the first fenced block.
///
/// Text that already parses is returned untouched. When the text starts
/// with an aggregate, fences inside JSON string literals are skipped, and a
/// fence whose interior holds no aggregate is ignored.
fn extract_fenced(text: &str) -> &str {
    if serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok() {
        return text;
    }

    // Quotes in a prose preamble are not string delimiters.
    let aggregate = starts_with_aggregate(text);
    let Some(start) = FENCE_START
        .find_iter(text)
        .map(|m| m.start())
        .find(|&start| !aggregate || !inside_string(&text[..start]))
    else {
        return text;
    };

    let rest = &text[start..];
    let interior = FENCED_BLOCK
        .captures(rest)
        .or_else(|| OPEN_FENCE.captures(rest))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    match interior {
        Some(interior) if !aggregate || interior.contains(['{', '[']) => interior,
        _ => text,
    }
}

/// Whether the end of `prefix` lies inside a JSON string literal.
fn inside_string(prefix: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    for c in prefix.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }
    in_string
}

fn skip_preamble(text: &str) -> &str {
    if starts_with_aggregate(text) {
        return text;
    }
    match text.find(['{', '[']) {
        Some(start) => &text[start..],
        None => text,
    }
}

fn drop_postamble(text: &str) -> &str {
    let closer = match text.chars().next() {
        Some('{') => '}',
        Some('[') => ']',
        _ => return text,
    };
    if text.ends_with(closer) {
        return text;
    }
    match text.rfind(['}', ']']) {
        Some(end) => &text[..=end],
        None => text,
    }
}

fn starts_with_aggregate(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}
