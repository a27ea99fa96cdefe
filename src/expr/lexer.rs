//! Tokenizer for template expressions.

use std::rc::Rc;

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Str(Rc<str>),
    Ident(Rc<str>),
    Punct(&'static str),
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source text.
    pub offset: usize,
}

/// Longest first, so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "=>", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "+", "-", "*", "/", "%", "<", ">", "!", "=", "?", ":", ".", ",", "(", ")",
    "[", "]", "{", "}", ";",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Split `src` into tokens, ending with [`TokenKind::End`].
pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(c) = src[pos..].chars().next() {
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let offset = pos;
        let kind = if c.is_ascii_digit()
            || (c == '.' && src[pos + 1..].starts_with(|d: char| d.is_ascii_digit()))
        {
            let (number, len) = lex_number(src, pos)?;
            pos += len;
            TokenKind::Number(number)
        } else if c == '"' || c == '\'' {
            let (text, len) = lex_string(src, pos, c)?;
            pos += len;
            TokenKind::Str(text.into())
        } else if is_ident_start(c) {
            let len = src[pos..]
                .find(|ch: char| !is_ident_continue(ch))
                .unwrap_or(src.len() - pos);
            let ident = &src[pos..pos + len];
            pos += len;
            TokenKind::Ident(ident.into())
        } else {
            let rest = &src[pos..];
            let punct = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .copied()
                .ok_or(ParseError::UnexpectedChar { ch: c, offset })?;
            // `a?.5:1` is a conditional, not optional chaining.
            let punct = if punct == "?."
                && rest[2..].starts_with(|d: char| d.is_ascii_digit())
            {
                "?"
            } else {
                punct
            };
            pos += punct.len();
            TokenKind::Punct(punct)
        };
        tokens.push(Token { kind, offset });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        offset: src.len(),
    });
    Ok(tokens)
}

fn lex_number(src: &str, start: usize) -> Result<(f64, usize), ParseError> {
    let rest = &src[start..];
    let invalid = |len: usize| ParseError::InvalidNumber {
        text: rest[..len].to_string(),
        offset: start,
    };

    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        let len = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        let value = u64::from_str_radix(&hex[..len], 16).map_err(|_| invalid(len + 2))?;
        return Ok((value as f64, len + 2));
    }

    let bytes = rest.as_bytes();
    let mut len = 0;
    let digits = |len: &mut usize| {
        while *len < bytes.len() && bytes[*len].is_ascii_digit() {
            *len += 1;
        }
    };
    digits(&mut len);
    if len < bytes.len() && bytes[len] == b'.' {
        len += 1;
        digits(&mut len);
    }
    if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
        let mut exp = len + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            len = exp;
            digits(&mut len);
        }
    }

    rest[..len]
        .parse::<f64>()
        .map(|n| (n, len))
        .map_err(|_| invalid(len))
}

fn lex_string(src: &str, start: usize, quote: char) -> Result<(String, usize), ParseError> {
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, i + 2)),
            '\\' => {
                let Some((_, escaped)) = chars.next() else { break };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                        let decoded = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or(ParseError::InvalidEscape { offset: start + 1 + i })?;
                        out.push(decoded);
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
    Err(ParseError::UnterminatedString { offset: start })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_punctuators_longest_match() {
        assert_eq!(
            kinds("a === b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::End,
            ]
        );
        assert_eq!(kinds("x?.y")[1], TokenKind::Punct("?."));
        assert_eq!(kinds("x?.5:1")[1], TokenKind::Punct("?"));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5e2")[0], TokenKind::Number(150.0));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#""a\"b""#)[0], TokenKind::Str("a\"b".into()));
        assert_eq!(kinds(r"'A\n'")[0], TokenKind::Str("A\n".into()));
        assert!(matches!(
            tokenize("'open"),
            Err(ParseError::UnterminatedString { offset: 0 })
        ));
    }

    #[test]
    fn test_unexpected_char() {
        assert!(matches!(
            tokenize("a # b"),
            Err(ParseError::UnexpectedChar { ch: '#', offset: 2 })
        ));
    }
}
