//! Element Compositor.
//!
//! The display shows one block of text, so independent elements are stacked
//! by inserting a spacer line between consecutive elements whose line height
//! moves the cursor from where the previous element ended to where the next
//! one should start. The whole block is then shifted by a leading line whose
//! height cancels the accumulated total.
//!
//! Layout of the output:
//!
//! ```text
//! <line-height={-total}px>\n</line-height>
//! {element 0}{CLOSING_TAGS}
//! <line-height={spacer_1}px>\n</line-height>
//! {element 1}{CLOSING_TAGS}
//! ...
//! ```

use std::fmt::Write;

use core_markup::{Parser, format_px};
use tracing::{trace, warn};

use crate::element::Element;

/// Appended after every element so its formatting cannot leak into the next.
pub const CLOSING_TAGS: &str = "</noparse></align></color></b></cspace></indent></line-height></line-indent></lowercase></uppercase></smallcaps></mspace></nobr></size></sub></sup>";

/// Line height that moves from an element at `last_pos` spanning
/// `last_offset` to the next element at `pos`.
///
/// Satisfies `last_pos + 2 * last_offset + 2 * spacer == pos`.
pub fn spacer_height(last_pos: f32, last_offset: f32, pos: f32) -> f32 {
    -(last_pos + 2.0 * last_offset - pos) / 2.0
}

fn finite_or_zero(value: f32, field: &'static str) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!(target: "compose.combiner", field, value, "non_finite_value_zeroed");
        0.0
    }
}

fn push_line_height(out: &mut String, height: f32) {
    // `String` as `fmt::Write` cannot fail.
    let _ = write!(out, "<line-height={}px>\n</line-height>", format_px(height));
}

/// Composite `elements` into one markup block. Disabled elements are
/// skipped; no enabled elements yields `""`.
pub fn combine<'a, I>(parser: &Parser, elements: I) -> String
where
    I: IntoIterator<Item = &'a Element>,
{
    let mut visible: Vec<&Element> = elements.into_iter().filter(|e| e.enabled).collect();
    if visible.is_empty() {
        return String::new();
    }
    // Stable: equal z-index keeps registration order.
    visible.sort_by(|a, b| b.z_index.cmp(&a.z_index));

    let metrics = parser.metrics();
    let mut body = String::new();
    let mut total = 0.0f32;
    let mut last: Option<(f32, f32)> = None;

    for element in &visible {
        let parsed = element.parsed(parser);
        let position = metrics.functional_position(finite_or_zero(element.position, "position"));
        let breaks = element.options.additional_line_breaks;
        let offset = finite_or_zero(parsed.offset, "offset")
            + breaks as f32 * metrics.default_line_height;

        match last {
            None => total += position,
            Some((last_pos, last_offset)) => {
                let spacer = spacer_height(last_pos, last_offset, position);
                push_line_height(&mut body, spacer);
                total += spacer;
            }
        }

        body.push_str(&parsed.content);
        body.push_str(CLOSING_TAGS);
        for _ in 0..breaks {
            body.push('\n');
        }

        total += offset;
        last = Some((position, offset));
    }

    let mut out = String::with_capacity(body.len() + 48);
    push_line_height(&mut out, -total);
    out.push_str(&body);
    trace!(target: "compose.combiner", elements = visible.len(), total, bytes = out.len(), "combined");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_text::DEFAULT_HEIGHT;
    use pretty_assertions::assert_eq;

    fn fixed(parser: &Parser, text: &str, position: f32) -> Element {
        Element::fixed(parser, text, position)
    }

    #[test]
    fn empty_and_all_disabled() {
        let p = Parser::default();
        assert_eq!(combine(&p, []), "");
        let els = [fixed(&p, "a", 0.0).disabled(), fixed(&p, "b", 10.0).disabled()];
        assert_eq!(combine(&p, &els), "");
    }

    #[test]
    fn single_element_at_bottom() {
        let p = Parser::default();
        let els = [fixed(&p, "hi", 0.0)];
        // functional position = 0 * 2.14 - 755
        let expected = format!("<line-height=755px>\n</line-height>hi{CLOSING_TAGS}");
        assert_eq!(combine(&p, &els), expected);
    }

    #[test]
    fn two_elements_use_spacer() {
        let p = Parser::default();
        let els = [fixed(&p, "a", 0.0), fixed(&p, "b", 100.0)];
        let p1 = -755.0f32;
        let p2 = 100.0 * 2.14 - 755.0;
        let spacer = spacer_height(p1, 0.0, p2);
        let total = p1 + spacer;
        let expected = format!(
            "<line-height={}px>\n</line-height>a{CLOSING_TAGS}<line-height={}px>\n</line-height>b{CLOSING_TAGS}",
            format_px(-total),
            format_px(spacer),
        );
        assert_eq!(combine(&p, &els), expected);
    }

    #[test]
    fn negative_offset_participates_unchanged() {
        let p = Parser::default();
        let source = "<line-height=-20>a\nb";
        let parsed = p.parse(source);
        assert_eq!(parsed.offset, -20.0);

        let els = [fixed(&p, source, 0.0), fixed(&p, "c", 100.0)];
        let p1 = -755.0f32;
        let p2 = 100.0 * 2.14 - 755.0;
        let spacer = spacer_height(p1, -20.0, p2);
        let total = p1 - 20.0 + spacer;
        let expected = format!(
            "<line-height={}px>\n</line-height>{}{CLOSING_TAGS}<line-height={}px>\n</line-height>c{CLOSING_TAGS}",
            format_px(-total),
            parsed.content,
            format_px(spacer),
        );
        assert_eq!(combine(&p, &els), expected);
    }

    #[test]
    fn higher_z_index_comes_first() {
        let p = Parser::default();
        let els = [
            fixed(&p, "LOW1", 0.0),
            fixed(&p, "HIGH", 0.0).with_z_index(5),
            fixed(&p, "LOW2", 0.0),
        ];
        let out = combine(&p, &els);
        let high = out.find("HIGH").unwrap();
        let low = out.find("LOW1").unwrap();
        let low2 = out.find("LOW2").unwrap();
        assert!(high < low && low < low2);
    }

    #[test]
    fn additional_line_breaks_extend_offset() {
        let p = Parser::default();
        let plain = [fixed(&p, "a", 0.0), fixed(&p, "b", 0.0)];
        let padded = [
            fixed(&p, "a", 0.0).with_options(crate::ElementOptions { additional_line_breaks: 2 }),
            fixed(&p, "b", 0.0),
        ];
        let spacer_plain = spacer_height(-755.0, 0.0, -755.0);
        let spacer_padded = spacer_height(-755.0, 2.0 * DEFAULT_HEIGHT, -755.0);
        assert!(combine(&p, &plain).contains(&format!("<line-height={}px>", format_px(spacer_plain))));
        let out = combine(&p, &padded);
        assert!(out.contains(&format!("{CLOSING_TAGS}\n\n<line-height={}px>", format_px(spacer_padded))));
    }

    #[test]
    fn non_finite_position_treated_as_zero() {
        let p = Parser::default();
        let a = combine(&p, &[fixed(&p, "x", f32::NAN)]);
        let b = combine(&p, &[fixed(&p, "x", 0.0)]);
        assert_eq!(a, b);
    }

    #[test]
    fn spacer_formula() {
        assert_eq!(spacer_height(10.0, 5.0, 40.0), 10.0);
        assert_eq!(spacer_height(0.0, 0.0, 0.0), 0.0);
    }
}
