//! Markup parser: template text to a fragment [`Node`].

use crate::engine::{Node, VOID_ELEMENTS};

use super::interpolate::span_len;
use super::TemplateError;

/// Elements whose content is raw text up to the closing tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Parse `markup` into a fragment.
///
/// Whitespace-only text is dropped, tag names are lower-cased, template
/// comments are discarded. Attribute names keep their case so custom
/// `on:` event names match what components emit.
pub fn parse(markup: &str) -> Result<Node, TemplateError> {
    let root = Node::fragment();
    let mut parser = MarkupParser {
        src: markup,
        pos: 0,
        stack: vec![root.clone()],
    };
    parser.run()?;
    Ok(root)
}

struct MarkupParser<'a> {
    src: &'a str,
    pos: usize,
    /// Open elements; the fragment root is at the bottom.
    stack: Vec<Node>,
}

impl<'a> MarkupParser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn current(&self) -> &Node {
        // The root is never popped.
        &self.stack[self.stack.len() - 1]
    }

    fn run(&mut self) -> Result<(), TemplateError> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment()?;
            } else if rest.starts_with("</") {
                self.close_tag()?;
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.open_tag()?;
            } else {
                self.text();
            }
        }

        if self.stack.len() > 1 {
            let open = self.current().tag().to_string();
            return Err(TemplateError::Unclosed {
                tag: open,
                offset: self.src.len(),
            });
        }
        Ok(())
    }

    fn comment(&mut self) -> Result<(), TemplateError> {
        let start = self.pos;
        let end = self.rest()[4..]
            .find("-->")
            .ok_or(TemplateError::UnterminatedComment { offset: start })?;
        self.pos += 4 + end + 3;
        Ok(())
    }

    fn text(&mut self) {
        let rest = self.rest();
        let mut end = 0;
        while end < rest.len() {
            let tail = &rest[end..];
            if tail.starts_with('{') {
                if let Some(len) = span_len(tail) {
                    end += len;
                    continue;
                }
            }
            if tail.starts_with('<') && end > 0 && starts_markup(tail) {
                break;
            }
            end += tail.chars().next().map_or(1, char::len_utf8);
        }

        let raw = &rest[..end];
        self.pos += end;
        if !raw.trim().is_empty() {
            self.current().append_child(&Node::text(&decode_entities(raw)));
        }
    }

    fn close_tag(&mut self) -> Result<(), TemplateError> {
        let start = self.pos;
        let rest = &self.rest()[2..];
        let end = rest
            .find('>')
            .ok_or(TemplateError::UnexpectedEof { offset: start })?;
        let name = rest[..end].trim().to_ascii_lowercase();
        self.pos += 2 + end + 1;

        if self.stack.len() == 1 {
            return Err(TemplateError::UnexpectedClose { tag: name, offset: start });
        }
        if self.current().tag() != name {
            return Err(TemplateError::MismatchedClose {
                expected: self.current().tag().to_string(),
                found: name,
                offset: start,
            });
        }
        self.stack.pop();
        Ok(())
    }

    fn open_tag(&mut self) -> Result<(), TemplateError> {
        let start = self.pos;
        self.pos += 1;
        let name_len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
            .unwrap_or(self.rest().len());
        let element = Node::element(&self.rest()[..name_len]);
        self.pos += name_len;

        let self_closing = loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(TemplateError::UnexpectedEof { offset: start });
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            self.attribute(&element)?;
        };

        self.current().append_child(&element);
        let tag = element.tag().to_string();
        if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
            return Ok(());
        }
        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            return self.raw_text(&element, start);
        }
        self.stack.push(element);
        Ok(())
    }

    fn attribute(&mut self, element: &Node) -> Result<(), TemplateError> {
        let start = self.pos;
        let rest = self.rest();
        let name_len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/'))
            .unwrap_or(rest.len());
        let name_len = if name_len == 0 {
            // A stray `/` not followed by `>`.
            rest.chars().next().map_or(1, char::len_utf8)
        } else {
            name_len
        };
        let name = rest[..name_len].to_string();
        self.pos += name_len;

        self.skip_whitespace();
        if !self.rest().starts_with('=') {
            if name != "/" {
                element.set_attribute(&name, "");
            }
            return Ok(());
        }
        self.pos += 1;
        self.skip_whitespace();

        let rest = self.rest();
        let value = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let end = rest[1..]
                    .find(q)
                    .ok_or(TemplateError::UnterminatedAttribute { name: name.clone(), offset: start })?;
                self.pos += end + 2;
                decode_entities(&rest[1..end + 1])
            }
            Some('{') => {
                let len = span_len(rest)
                    .ok_or(TemplateError::UnterminatedAttribute { name: name.clone(), offset: start })?;
                self.pos += len;
                rest[..len].to_string()
            }
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                let end = if rest[..end].ends_with('/') && rest[end..].starts_with('>') {
                    end - 1
                } else {
                    end
                };
                self.pos += end;
                decode_entities(&rest[..end])
            }
            None => return Err(TemplateError::UnexpectedEof { offset: start }),
        };
        element.set_attribute(&name, &value);
        Ok(())
    }

    fn raw_text(&mut self, element: &Node, start: usize) -> Result<(), TemplateError> {
        let close = format!("</{}", element.tag());
        let rest = self.rest();
        let end = rest
            .to_ascii_lowercase()
            .find(&close)
            .ok_or(TemplateError::Unclosed {
                tag: element.tag().to_string(),
                offset: start,
            })?;
        if !rest[..end].trim().is_empty() {
            element.append_child(&Node::text(&rest[..end]));
        }
        self.pos += end;
        self.close_tag_for_raw()
    }

    fn close_tag_for_raw(&mut self) -> Result<(), TemplateError> {
        let start = self.pos;
        let end = self
            .rest()
            .find('>')
            .ok_or(TemplateError::UnexpectedEof { offset: start })?;
        self.pos += end + 1;
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }
}

/// Whether `tail` (starting with `<`) opens a tag, closing tag or comment.
fn starts_markup(tail: &str) -> bool {
    let next = &tail[1..];
    next.starts_with('/')
        || next.starts_with("!--")
        || next.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Decode the common named and numeric character references.
pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            c.map(|c| (c, end + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_elements_and_text() {
        let fragment = parse("<div class=\"card\"><h1>{title}</h1><p>Hi {name}</p></div>").unwrap();
        assert_eq!(
            fragment.to_html(),
            "<div class=\"card\"><h1>{title}</h1><p>Hi {name}</p></div>"
        );
    }

    #[test]
    fn test_whitespace_only_text_is_dropped() {
        let fragment = parse("\n  <ul>\n    <li>a</li>\n  </ul>\n").unwrap();
        assert_eq!(fragment.child_count(), 1);
        assert_eq!(fragment.to_html(), "<ul><li>a</li></ul>");
    }

    #[test]
    fn test_attribute_forms() {
        let fragment =
            parse("<input type=checkbox disabled bind='done' items={list} on:click=\"n++\"/>")
                .unwrap();
        let input = fragment.first_child().unwrap();
        assert_eq!(input.attribute("type").as_deref(), Some("checkbox"));
        assert_eq!(input.attribute("disabled").as_deref(), Some(""));
        assert_eq!(input.attribute("bind").as_deref(), Some("done"));
        assert_eq!(input.attribute("items").as_deref(), Some("{list}"));
        assert_eq!(input.attribute("on:click").as_deref(), Some("n++"));
    }

    #[test]
    fn test_brace_spans_may_contain_angle_brackets() {
        let fragment = parse("<p>{a < b ? 'yes' : 'no'}</p>").unwrap();
        assert_eq!(fragment.text_content(), "{a < b ? 'yes' : 'no'}");
        let fragment = parse("<p>1 < 2</p>").unwrap();
        assert_eq!(fragment.text_content(), "1 < 2");
    }

    #[test]
    fn test_tags_are_lowercased_and_void_elements_close() {
        let fragment = parse("<DIV><BR><Img src=x></DIV>").unwrap();
        assert_eq!(fragment.to_html(), "<div><br><img src=\"x\"></div>");
    }

    #[test]
    fn test_comments_and_entities() {
        let fragment = parse("<p><!-- note -->a &amp; b &lt; c &#65;&#x42; &bogus;</p>").unwrap();
        assert_eq!(fragment.text_content(), "a & b < c AB &bogus;");
    }

    #[test]
    fn test_raw_text_elements() {
        let fragment = parse("<style>a > b { color: red }</style>").unwrap();
        assert_eq!(fragment.text_content(), "a > b { color: red }");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse("<div><span></div>"),
            Err(TemplateError::MismatchedClose { .. })
        ));
        assert!(matches!(
            parse("</p>"),
            Err(TemplateError::UnexpectedClose { .. })
        ));
        assert!(matches!(parse("<div>"), Err(TemplateError::Unclosed { .. })));
        assert!(matches!(
            parse("<!-- open"),
            Err(TemplateError::UnterminatedComment { offset: 0 })
        ));
        assert!(matches!(
            parse("<a href=\"x>"),
            Err(TemplateError::UnterminatedAttribute { .. })
        ));
    }
}
