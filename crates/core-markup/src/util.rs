//! Helpers for callers that embed untrusted text in element content.

const NOPARSE_CLOSE: &str = "</noparse>";

/// Wrap `text` so it renders verbatim: the whole run goes inside a no-parse
/// span and any closing no-parse tag already in `text` is broken up with a
/// zero-width space so it cannot end the span early.
pub fn escape_markup(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len() + 2 * NOPARSE_CLOSE.len());
    out.push_str("<noparse>");
    let mut last = 0;
    for (idx, _) in lower.match_indices(NOPARSE_CLOSE) {
        let split = idx + NOPARSE_CLOSE.len() - 1;
        out.push_str(&text[last..split]);
        out.push('\u{200B}');
        last = split;
    }
    out.push_str(&text[last..]);
    out.push_str(NOPARSE_CLOSE);
    out
}
