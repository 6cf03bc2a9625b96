//! Lens expression parsing.
//!
//! ```text
//! expression := step ('|' step)*
//! step       := '.' IDENT ('.' IDENT)* | IDENT '(' ARGLIST? ')' | IDENT | '.value'
//! ```

use serde_json::{Number, Value};

use super::step::{LensArgs, LensStep};

/// Split on `sep` outside of quotes and parentheses.
pub(crate) fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_field_name(s: &str) -> bool {
    !s.is_empty()
        && !s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '|' | '"' | '\''))
}

/// Parse one `|`-separated step. A dotted path yields one step per segment.
pub(crate) fn parse_step(raw: &str) -> Result<Vec<LensStep>, String> {
    let step = raw.trim();
    if step.is_empty() {
        return Err("empty step".to_string());
    }

    if step == ".value" {
        return Ok(vec![LensStep::ValueProjection]);
    }

    if let Some(path) = step.strip_prefix('.') {
        return path
            .split('.')
            .map(|segment| {
                if is_field_name(segment) {
                    Ok(LensStep::field(segment))
                } else {
                    Err(format!("invalid field name {segment:?} in {step:?}"))
                }
            })
            .collect();
    }

    if let Some(open) = step.find('(') {
        let name = step[..open].trim();
        if !is_identifier(name) {
            return Err(format!("invalid operator name {name:?}"));
        }
        let Some(inner) = step[open + 1..].strip_suffix(')') else {
            return Err(format!("unclosed argument list in {step:?}"));
        };
        let args: LensArgs = if inner.trim().is_empty() {
            LensArgs::new()
        } else {
            split_top_level(inner, ',').into_iter().map(parse_literal).collect()
        };
        return Ok(vec![LensStep::OperatorCall {
            name: name.to_string(),
            args,
        }]);
    }

    if is_identifier(step) {
        Ok(vec![LensStep::bare(step)])
    } else {
        Err(format!("unrecognized step {step:?}"))
    }
}

/// Parse a literal argument: null, booleans, numbers, quoted strings, and
/// anything else as a raw string.
pub fn parse_literal(raw: &str) -> Value {
    let s = raw.trim();
    match s {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(n) = s.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }

    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return Value::String(unescape(&s[1..s.len() - 1]));
        }
    }

    Value::String(s.to_string())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Lenient parse used at evaluation time: malformed steps are reported and
/// dropped instead of failing the whole expression.
pub(crate) fn parse_lenient(expression: &str) -> (Vec<LensStep>, Vec<(usize, String, String)>) {
    let mut steps = Vec::new();
    let mut rejected = Vec::new();
    if expression.trim().is_empty() {
        return (steps, rejected);
    }
    for (index, raw) in split_top_level(expression, '|').into_iter().enumerate() {
        match parse_step(raw) {
            Ok(parsed) => steps.extend(parsed),
            Err(reason) => rejected.push((index, raw.trim().to_string(), reason)),
        }
    }
    (steps, rejected)
}
