//! Truncation repair.
//!
//! A response cut off by an output-length limit is usually a valid payload
//! missing its tail. Repair runs three passes over the sanitized text:
//!
//! 1. **String closure**: if the text ends inside a string literal, drop any
//!    partial escape sequence and append the closing quote.
//! 2. **Dangling tail removal**: drop trailing commas and colons, object keys
//!    with no value, and partial scalars (`tru`, `1.`, `-`).
//! 3. **Bracket closure**: append a closer for every delimiter still open,
//!    innermost first.
//!
//! Repair never invents a value. It only closes what was left open and
//! prefers dropping an incomplete trailing field over guessing its content.

use serde_json::Value;

/// Repair a broken payload.
///
/// Always returns syntactically valid JSON. Input that cannot be repaired
/// becomes an empty object (or an empty array if it opened with `[`).
pub fn repair(text: &str) -> String {
    try_repair(text).unwrap_or_else(|| empty_aggregate(text).to_string())
}

/// Repair a broken payload, or `None` if the passes do not produce valid JSON.
pub fn try_repair(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_valid(trimmed) {
        return Some(trimmed.to_string());
    }

    let closed = close_open_string(trimmed);
    let tokens = tokenize(&closed);
    let kept = drop_dangling_tail(&closed, &tokens);
    if kept == 0 {
        return None;
    }

    let repaired = close_brackets(&closed, &tokens[..kept]);
    if is_valid(&repaired) {
        tracing::debug!(
            original_len = trimmed.len(),
            repaired_len = repaired.len(),
            "Repaired truncated payload"
        );
        Some(repaired)
    } else {
        None
    }
}

fn empty_aggregate(text: &str) -> &'static str {
    if text.trim_start().starts_with('[') {
        "[]"
    } else {
        "{}"
    }
}

fn is_valid(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}

// ---------------------------------------------------------------------------
// Pass 1: string closure
// ---------------------------------------------------------------------------

fn close_open_string(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut escapes: Vec<usize> = Vec::new();
    let mut cut = bytes.len();
    let mut i = 0;

    while i < bytes.len() {
        match (in_string, bytes[i]) {
            (false, b'"') => {
                in_string = true;
                escapes.clear();
                i += 1;
            }
            (true, b'\\') => {
                if i + 2 > bytes.len() {
                    cut = i;
                    break;
                }
                escapes.push(i);
                i += 2;
            }
            (true, b'"') => {
                in_string = false;
                i += 1;
            }
            _ => i += 1,
        }
    }

    if !in_string {
        return text.to_string();
    }

    // A \u escape needs four hex digits after it.
    if let Some(&start) = escapes.last() {
        if bytes[start + 1] == b'u' && start + 6 > cut {
            cut = start;
            escapes.pop();
        }
    }

    // A high surrogate is invalid without its low half.
    while let Some(&start) = escapes.last() {
        let is_lone_high = start + 6 == cut
            && bytes[start + 1] == b'u'
            && text.get(start + 2..start + 6).is_some_and(is_high_surrogate);
        if !is_lone_high {
            break;
        }
        cut = start;
        escapes.pop();
    }

    let mut out = String::with_capacity(cut + 1);
    out.push_str(&text[..cut]);
    out.push('"');
    out
}

fn is_high_surrogate(hex: &str) -> bool {
    u16::from_str_radix(hex, 16)
        .map(|unit| (0xD800..=0xDBFF).contains(&unit))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Open(u8),
    Close(u8),
    Comma,
    Colon,
    Str,
    Scalar,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    /// Innermost open delimiter when the token was reached
    container: Option<u8>,
}

fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut stack: Vec<u8> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let container = stack.last().copied();
        let kind = match byte {
            b'{' | b'[' => {
                stack.push(byte);
                i += 1;
                TokenKind::Open(byte)
            }
            b'}' | b']' => {
                if stack.last() == Some(&opener_for(byte)) {
                    stack.pop();
                }
                i += 1;
                TokenKind::Close(byte)
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b':' => {
                i += 1;
                TokenKind::Colon
            }
            b'"' => {
                i = string_end(bytes, i);
                TokenKind::Str
            }
            _ => {
                while i < bytes.len() && !is_delimiter(bytes[i]) {
                    i += 1;
                }
                TokenKind::Scalar
            }
        };

        tokens.push(Token {
            kind,
            start,
            end: i,
            container,
        });
    }

    tokens
}

fn string_end(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || b"{}[],:\"".contains(&byte)
}

fn opener_for(closer: u8) -> u8 {
    if closer == b'}' {
        b'{'
    } else {
        b'['
    }
}

fn closer_for(opener: u8) -> u8 {
    if opener == b'{' {
        b'}'
    } else {
        b']'
    }
}

// ---------------------------------------------------------------------------
// Pass 2: dangling tail removal
// ---------------------------------------------------------------------------

/// Number of leading tokens to keep once the incomplete tail is dropped.
fn drop_dangling_tail(text: &str, tokens: &[Token]) -> usize {
    let mut kept = tokens.len();

    while kept > 0 {
        let last = tokens[kept - 1];
        let previous = kept.checked_sub(2).map(|i| tokens[i].kind);

        let dangling = match last.kind {
            TokenKind::Comma | TokenKind::Colon => true,
            TokenKind::Str => !in_value_position(last.container, previous),
            TokenKind::Scalar => {
                !is_complete_scalar(&text[last.start..last.end])
                    || !in_value_position(last.container, previous)
            }
            TokenKind::Open(_) | TokenKind::Close(_) => false,
        };

        if !dangling {
            break;
        }
        kept -= 1;
    }

    kept
}

/// Whether a string or scalar sits where a value belongs. Inside an object
/// that means after a colon; a string after `{` or `,` is a key whose value
/// was cut off.
fn in_value_position(container: Option<u8>, previous: Option<TokenKind>) -> bool {
    match container {
        Some(b'{') => previous == Some(TokenKind::Colon),
        Some(_) => matches!(
            previous,
            Some(TokenKind::Open(b'[')) | Some(TokenKind::Comma)
        ),
        None => previous.is_none(),
    }
}

fn is_complete_scalar(text: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(text),
        Ok(Value::Number(_) | Value::Bool(_) | Value::Null)
    )
}

// ---------------------------------------------------------------------------
// Pass 3: bracket closure
// ---------------------------------------------------------------------------

fn close_brackets(text: &str, tokens: &[Token]) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<u8> = Vec::new();
    let mut copied_to = 0;

    for (index, token) in tokens.iter().enumerate() {
        let skip = match token.kind {
            // A comma directly before a closer is never valid.
            TokenKind::Comma => matches!(
                tokens.get(index + 1).map(|t| t.kind),
                Some(TokenKind::Close(_))
            ),
            // Closers that match nothing open are dropped.
            TokenKind::Close(closer) => stack.last() != Some(&opener_for(closer)),
            _ => false,
        };

        if !skip {
            match token.kind {
                TokenKind::Open(opener) => stack.push(opener),
                TokenKind::Close(_) => {
                    stack.pop();
                }
                _ => {}
            }
            out.push_str(&text[copied_to..token.end]);
        }
        copied_to = token.end;
    }

    for opener in stack.iter().rev() {
        out.push(closer_for(*opener) as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap_or_else(|e| panic!("{text:?} did not parse: {e}"))
    }

    #[test]
    fn test_truncated_mid_array() {
        let repaired = repair(r#"{"a": 1, "list": [1, 2,"#);
        let value = parse(&repaired);
        assert_eq!(value["a"], 1);
        assert_eq!(value["list"], json!([1, 2]));
    }

    #[test]
    fn test_valid_input_is_unchanged() {
        assert_eq!(repair(r#" {"a": [1]} "#), r#"{"a": [1]}"#);
    }

    #[test]
    fn test_unterminated_string_value_is_closed() {
        let value = parse(&repair(r#"{"title": "The Sea", "body": "Waves crash"#));
        assert_eq!(value, json!({"title": "The Sea", "body": "Waves crash"}));
    }

    #[test]
    fn test_dangling_key_is_dropped() {
        let value = parse(&repair(r#"{"a": 1, "b"#));
        assert_eq!(value, json!({"a": 1}));

        let value = parse(&repair(r#"{"a": 1, "b":"#));
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_partial_scalars_are_dropped() {
        assert_eq!(parse(&repair(r#"{"a": 1, "ok": tr"#)), json!({"a": 1}));
        assert_eq!(parse(&repair(r#"[1, 2, 3."#)), json!([1, 2]));
        assert_eq!(parse(&repair(r#"{"n": -"#)), json!({}));
    }

    #[test]
    fn test_nested_structures_close_innermost_first() {
        let value = parse(&repair(r#"{"a": [{"b": {"c": [1, {"d": "x"#));
        assert_eq!(value, json!({"a": [{"b": {"c": [1, {"d": "x"}]}}]}));
    }

    #[test]
    fn test_partial_escape_is_removed() {
        assert_eq!(parse(&repair(r#"["line\"#)), json!(["line"]));
        assert_eq!(parse(&repair(r#"["caf\u00"#)), json!(["caf"]));
        assert_eq!(parse(&repair(r#"["\ud83d\ude"#)), json!([""]));
        assert_eq!(parse(&repair(r#"["ok\\"#)), json!(["ok\\"]));
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let value = parse(&repair(r#"{"pattern": "[{", "next": ["#));
        assert_eq!(value, json!({"pattern": "[{", "next": []}));
    }

    #[test]
    fn test_trailing_comma_before_closer() {
        assert_eq!(parse(&repair(r#"{"a": [1, 2,], "b": 3,}"#)), json!({"a": [1, 2], "b": 3}));
    }

    #[test]
    fn test_mismatched_closer_is_dropped() {
        assert_eq!(parse(&repair(r#"{"a": [1, 2}"#)), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_unrepairable_falls_back_to_empty_aggregate() {
        assert_eq!(try_repair("I cannot help with that."), None);
        assert_eq!(repair("I cannot help with that."), "{}");
        assert_eq!(repair(""), "{}");
        assert_eq!(try_repair(r#"[1, 2] and {"x": 1}"#), None);
        assert_eq!(repair(r#"[1, 2] and {"x": 1}"#), "[]");
    }
}
