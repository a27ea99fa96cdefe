//! Splitting text into literal runs and `{expr}` spans.
//!
//! Braces nest and quoted strings inside a span are skipped, so
//! `{ {a: 1}.a }` and `{ "}" }` are single spans. An unbalanced `{` is kept
//! as literal text.

/// A piece of interpolated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Expression source between the braces, trimmed.
    Expr(String),
}

/// Byte length of the span starting at the `{` at `text[0]`, including both
/// braces, or `None` when it never closes.
pub(crate) fn span_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
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
            '"' | '\'' | '`' if depth > 0 => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `text` into literal and expression segments.
pub fn split(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        literal.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match span_len(candidate) {
            Some(len) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Expr(candidate[1..len - 1].trim().to_string()));
                rest = &candidate[len..];
            }
            None => {
                literal.push_str(candidate);
                rest = "";
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Whether `text` contains at least one `{expr}` span.
pub fn has_interpolation(text: &str) -> bool {
    split(text).iter().any(|s| matches!(s, Segment::Expr(_)))
}

/// The expression when `text` is exactly one span (surrounding whitespace
/// allowed), e.g. `{items}`.
pub fn single_expression(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || span_len(trimmed) != Some(trimmed.len()) {
        return None;
    }
    Some(trimmed[1..trimmed.len() - 1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Segment {
        Segment::Literal(s.to_string())
    }

    fn expr(s: &str) -> Segment {
        Segment::Expr(s.to_string())
    }

    #[test]
    fn test_split_mixed_text() {
        assert_eq!(
            split("Hello {name}, you have {count} items"),
            vec![lit("Hello "), expr("name"), lit(", you have "), expr("count"), lit(" items")]
        );
    }

    #[test]
    fn test_nested_braces_and_quotes() {
        assert_eq!(split("{ {a: 1}.a }"), vec![expr("{a: 1}.a")]);
        assert_eq!(split(r#"{ "}" + x }!"#), vec![expr(r#""}" + x"#), lit("!")]);
        assert_eq!(split("{ 'it\\'s' }"), vec![expr("'it\\'s'")]);
    }

    #[test]
    fn test_unbalanced_brace_is_literal() {
        assert_eq!(split("a { b"), vec![lit("a { b")]);
        assert!(!has_interpolation("a { b"));
        assert!(has_interpolation("x{y}"));
    }

    #[test]
    fn test_single_expression() {
        assert_eq!(single_expression(" {items} ").as_deref(), Some("items"));
        assert_eq!(single_expression("{a}{b}"), None);
        assert_eq!(single_expression("plain"), None);
    }
}
