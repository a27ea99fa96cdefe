//! Scoped component styles.
//!
//! Each component tag registers its CSS once. Every selector is prefixed
//! with the tag (`p` becomes `x-card p`); `:host` stands for the tag itself.
//! Rules nested in `@media`/`@supports` blocks are scoped the same way;
//! other at-rules are kept as written.

use std::cell::RefCell;

thread_local! {
    /// Registered `(tag, scoped css)` pairs, in registration order.
    static STYLES: RefCell<Vec<(String, String)>> = const { RefCell::new(Vec::new()) };
}

/// Scope `css` under `tag` and store it. Returns false, leaving the stored
/// CSS unchanged, if `tag` already registered its styles.
pub fn register_style(tag: &str, css: &str) -> bool {
    STYLES.with(|styles| {
        let mut styles = styles.borrow_mut();
        if styles.iter().any(|(t, _)| t == tag) {
            return false;
        }
        styles.push((tag.to_string(), scope_css(tag, css)));
        tracing::debug!(tag, "style registered");
        true
    })
}

pub fn has_style(tag: &str) -> bool {
    STYLES.with(|styles| styles.borrow().iter().any(|(t, _)| t == tag))
}

/// Every registered block, joined with newlines.
pub fn stylesheet() -> String {
    STYLES.with(|styles| {
        styles
            .borrow()
            .iter()
            .map(|(_, css)| css.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Forget all registered styles (for testing).
pub fn reset_styles() {
    STYLES.with(|styles| styles.borrow_mut().clear());
}

/// Prefix every selector in `css` with `tag`.
pub fn scope_css(tag: &str, css: &str) -> String {
    let mut out = Vec::new();
    let mut rest = css;
    while let Some(open) = rest.find('{') {
        let prelude = rest[..open].trim();
        let Some(len) = block_len(&rest[open..]) else {
            break;
        };
        let body = &rest[open + 1..open + len - 1];
        rest = &rest[open + len..];

        if prelude.starts_with("@media") || prelude.starts_with("@supports") {
            out.push(format!("{prelude} {{ {} }}", scope_css(tag, body)));
        } else if prelude.starts_with('@') {
            out.push(format!("{prelude} {{{body}}}"));
        } else {
            let selectors: Vec<String> = prelude
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| scope_selector(tag, s))
                .collect();
            out.push(format!("{} {{ {} }}", selectors.join(", "), body.trim()));
        }
    }
    out.join("\n")
}

fn scope_selector(tag: &str, selector: &str) -> String {
    match selector.strip_prefix(":host") {
        Some(rest) => format!("{tag}{rest}"),
        None => format!("{tag} {selector}"),
    }
}

/// Length of the `{...}` block at the start of `text`, braces included.
fn block_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
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
